//! Infrastructure: the transport seam and on-disk persistence.

pub mod storage;
pub mod transport;
