//! On-disk persistence: TOML application config and the JSON credential
//! store, both under the platform config directory.

pub mod config;
pub mod credentials;
