//! # mediaremote-core
//!
//! Shared library for MediaRemote containing the lifecycle state machine,
//! credential bundle model (including legacy-format migration), device
//! identity types, and the remote-key table.
//!
//! This crate is pure domain logic: it has no dependency on OS APIs, UI
//! frameworks, or network sockets. The client application layers pairing,
//! connection management, and persistence on top of it.

pub mod domain;
pub mod keymap;

// Re-export the most-used types at the crate root so callers can write
// `mediaremote_core::StateMachine` instead of the full module path.
pub use domain::credentials::CredentialBundle;
pub use domain::device::{parse_device_address, DeviceDescriptor, DeviceStringError};
pub use domain::state::{
    LifecycleConfig, Phase, StateChange, StateEvent, StateMachine, TransitionData,
};
pub use keymap::{KeyAction, RemoteKey, UnknownKeyError};
