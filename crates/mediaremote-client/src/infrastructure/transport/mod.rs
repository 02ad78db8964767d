//! Device transport abstraction.
//!
//! [`DeviceTransport`] is the seam between the connection lifecycle and the
//! byte-level device protocols. It covers network scan, the two pairing
//! handshakes (AirPlay, then Companion), connection open/close, and command
//! dispatch. The application layer depends only on this trait; the in-memory
//! implementation in [`mock`] serves tests and headless operation, while a
//! production protocol stack implements the trait out-of-tree.
//!
//! Connection loss is reported asynchronously: [`DeviceTransport::connect`]
//! returns the open handle together with a channel that yields at most one
//! error when the transport notices the connection is gone.

use std::time::Duration;

use async_trait::async_trait;
use thiserror::Error;
use tokio::sync::mpsc;
use uuid::Uuid;

use mediaremote_core::{DeviceDescriptor, RemoteKey};

pub mod mock;

/// Error type for transport operations.
#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum TransportError {
    /// The network scan itself failed.
    #[error("scan failed: {0}")]
    Scan(String),
    /// A pairing handshake step failed (bad PIN, device went away, ...).
    #[error("pairing handshake failed: {0}")]
    Handshake(String),
    /// The connection could not be opened.
    #[error("could not open connection: {0}")]
    Connect(String),
    /// A command could not be dispatched on an open connection.
    #[error("command dispatch failed: {0}")]
    Command(String),
    /// The device closed the connection.
    #[error("connection closed by device")]
    ConnectionClosed,
}

/// Opaque handle to an in-progress pairing handshake.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct PairingHandle(Uuid);

impl PairingHandle {
    pub fn new() -> Self {
        Self(Uuid::new_v4())
    }
}

impl Default for PairingHandle {
    fn default() -> Self {
        Self::new()
    }
}

/// Opaque handle to an open device connection.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct ConnectionHandle(Uuid);

impl ConnectionHandle {
    pub fn new() -> Self {
        Self(Uuid::new_v4())
    }
}

impl Default for ConnectionHandle {
    fn default() -> Self {
        Self::new()
    }
}

/// Credential produced by one completed handshake phase.
///
/// The content is opaque to the lifecycle layer; it is serialized once and
/// carried as a string from then on.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Credential(String);

impl Credential {
    pub fn new(serialized: impl Into<String>) -> Self {
        Self(serialized.into())
    }

    /// Consumes the credential, yielding its serialized form.
    pub fn into_serialized(self) -> String {
        self.0
    }
}

/// An open connection plus the channel on which the transport reports
/// asynchronous connection loss.
pub struct ActiveConnection {
    pub handle: ConnectionHandle,
    pub lost: mpsc::UnboundedReceiver<TransportError>,
}

/// Capability contract for talking to a media device on the network.
///
/// All methods are async; the implementation owns every timeout except the
/// scan's, which the caller passes explicitly.
#[async_trait]
pub trait DeviceTransport: Send + Sync {
    /// Scans the network for devices, waiting up to `timeout`.
    async fn scan(&self, timeout: Duration) -> Result<Vec<DeviceDescriptor>, TransportError>;

    /// Opens the AirPlay (phase 1) pairing handshake with `device`.
    async fn start_airplay_pairing(
        &self,
        device: &DeviceDescriptor,
    ) -> Result<PairingHandle, TransportError>;

    /// Completes the AirPlay handshake with the on-screen PIN.
    async fn finish_airplay_pairing(
        &self,
        handle: PairingHandle,
        pin: &str,
    ) -> Result<Credential, TransportError>;

    /// Opens the Companion (phase 2) pairing handshake with `device`.
    async fn start_companion_pairing(
        &self,
        device: &DeviceDescriptor,
    ) -> Result<PairingHandle, TransportError>;

    /// Completes the Companion handshake with the on-screen PIN.
    async fn finish_companion_pairing(
        &self,
        handle: PairingHandle,
        pin: &str,
    ) -> Result<Credential, TransportError>;

    /// Opens a control connection using both serialized credentials.
    async fn connect(
        &self,
        device: &DeviceDescriptor,
        airplay_credential: &str,
        companion_credential: &str,
    ) -> Result<ActiveConnection, TransportError>;

    /// Closes `handle`. Safe to call on an already-closed connection.
    async fn disconnect(&self, handle: ConnectionHandle);

    /// Whether `handle` still refers to a live connection.
    async fn is_connected(&self, handle: ConnectionHandle) -> bool;

    /// Dispatches a remote-control key press.
    async fn send_key(
        &self,
        handle: ConnectionHandle,
        key: RemoteKey,
    ) -> Result<(), TransportError>;

    /// Whether a text field currently has keyboard focus on the device.
    async fn keyboard_focus_state(
        &self,
        handle: ConnectionHandle,
    ) -> Result<bool, TransportError>;

    /// Current content of the focused text field, if any.
    async fn text(&self, handle: ConnectionHandle) -> Result<Option<String>, TransportError>;

    /// Replaces the content of the focused text field.
    async fn set_text(&self, handle: ConnectionHandle, text: &str)
        -> Result<(), TransportError>;
}
