//! Connection management: open, retry, watch, dispatch.
//!
//! [`ConnectionManager`] owns the single active device connection. It opens
//! connections from a credential bundle (resolving the device by re-scan when
//! the bundle embeds no descriptor), retries failed attempts on a fixed delay
//! up to the state machine's budget, watches for asynchronous connection
//! loss, and dispatches remote-control commands.
//!
//! Retry accounting lives in the state machine: every retry re-enters
//! `CONNECTING` from `CONNECTING`, which increments the retry counter, and a
//! `connect` that ultimately fails walks the machine back to `SCANNING`. One
//! call to [`ConnectionManager::connect_with_retry`] therefore performs
//! exactly `max_retries + 1` transport attempts before giving up.

use std::sync::Arc;
use std::time::Duration;

use thiserror::Error;
use tokio::sync::{mpsc, Mutex};
use tracing::{debug, error, info, warn};

use mediaremote_core::{
    CredentialBundle, DeviceDescriptor, KeyAction, Phase, RemoteKey, StateMachine, TransitionData,
};

use crate::infrastructure::storage::config::ConnectionConfig;
use crate::infrastructure::transport::{ConnectionHandle, DeviceTransport, TransportError};

/// Error type for connection operations.
#[derive(Debug, Error)]
pub enum ConnectError {
    /// No device could be resolved from a scan.
    #[error("no media device found on the network; make sure it is powered on")]
    DeviceNotFound,

    /// The bundle is missing one of the two credentials.
    #[error("stored credentials are incomplete; re-pair the device")]
    InvalidCredentials,

    /// A command was issued with no connection open.
    #[error("not connected")]
    NotConnected,

    /// The transport failed.
    #[error(transparent)]
    Transport(#[from] TransportError),
}

/// Events emitted by the connection manager.
#[derive(Debug)]
pub enum ConnectionEvent {
    /// A transport connection was opened.
    Connected,
    /// The transport reported the connection gone.
    ConnectionLost(TransportError),
}

/// Owns the single active connection to the device.
pub struct ConnectionManager {
    transport: Arc<dyn DeviceTransport>,
    state: Arc<Mutex<StateMachine>>,
    current: Arc<Mutex<Option<ConnectionHandle>>>,
    events: mpsc::UnboundedSender<ConnectionEvent>,
    retry_delay: Duration,
    scan_timeout: Duration,
}

impl ConnectionManager {
    /// Creates the manager and returns it together with the receiving end of
    /// its event channel.
    pub fn new(
        transport: Arc<dyn DeviceTransport>,
        state: Arc<Mutex<StateMachine>>,
        config: &ConnectionConfig,
    ) -> (Self, mpsc::UnboundedReceiver<ConnectionEvent>) {
        let (tx, rx) = mpsc::unbounded_channel();
        let manager = Self {
            transport,
            state,
            current: Arc::new(Mutex::new(None)),
            events: tx,
            retry_delay: config.retry_delay(),
            scan_timeout: config.scan_timeout(),
        };
        (manager, rx)
    }

    /// Opens a connection from `credentials`.
    ///
    /// Legacy-shaped bundles have already been normalized at deserialization,
    /// so only the current shape arrives here. When no device descriptor is
    /// embedded the network is re-scanned, matching by stable identifier when
    /// one is present and falling back to the first discovered device.
    ///
    /// On success the manager registers a watcher for asynchronous connection
    /// loss and emits [`ConnectionEvent::Connected`].
    ///
    /// # Errors
    ///
    /// [`ConnectError::DeviceNotFound`] when a needed re-scan yields nothing,
    /// [`ConnectError::InvalidCredentials`] when either credential is missing
    /// (the user must re-pair), and [`ConnectError::Transport`] when the open
    /// fails.
    pub async fn connect(&self, credentials: &CredentialBundle) -> Result<(), ConnectError> {
        let device = match &credentials.device {
            Some(device) => device.clone(),
            None => self.resolve_device(credentials).await?,
        };

        let (airplay, companion) = match (&credentials.airplay, &credentials.companion) {
            (Some(airplay), Some(companion)) => (airplay.as_str(), companion.as_str()),
            _ => return Err(ConnectError::InvalidCredentials),
        };

        let connection = self.transport.connect(&device, airplay, companion).await?;
        let handle = connection.handle;
        *self.current.lock().await = Some(handle);
        self.watch_connection(handle, connection.lost);

        info!("connected to {}", device.display_name());
        let _ = self.events.send(ConnectionEvent::Connected);
        Ok(())
    }

    /// [`Self::connect`] plus retry bookkeeping against the state machine.
    ///
    /// On success the machine transitions to `CONNECTED`. On failure, while
    /// the retry budget lasts, the machine re-enters `CONNECTING` (counting
    /// the retry), the fixed delay elapses, and the attempt repeats with the
    /// same credentials. Once the budget is exhausted the machine falls back
    /// to `SCANNING` and the last error is returned.
    pub async fn connect_with_retry(
        &self,
        credentials: CredentialBundle,
    ) -> Result<(), ConnectError> {
        loop {
            match self.connect(&credentials).await {
                Ok(()) => {
                    let mut state = self.state.lock().await;
                    state.transition(Phase::Connected, TransitionData::default());
                    return Ok(());
                }
                Err(err) => {
                    error!("connection attempt failed: {err}");
                    let retrying = {
                        let mut state = self.state.lock().await;
                        let retrying = state.should_retry_connection()
                            && state.transition(
                                Phase::Connecting,
                                TransitionData::with_credentials(credentials.clone()),
                            );
                        if !retrying {
                            warn!("retry budget exhausted, falling back to scanning");
                            state.transition(Phase::Scanning, TransitionData::default());
                        }
                        retrying
                    };
                    if !retrying {
                        return Err(err);
                    }
                    tokio::time::sleep(self.retry_delay).await;
                }
            }
        }
    }

    /// Tears down the current connection. Safe to call when none exists.
    pub async fn disconnect(&self) {
        let handle = self.current.lock().await.take();
        if let Some(handle) = handle {
            self.transport.disconnect(handle).await;
            debug!("disconnected");
        }
    }

    /// Whether a live connection exists.
    pub async fn is_connected(&self) -> bool {
        let handle = *self.current.lock().await;
        match handle {
            Some(handle) => self.transport.is_connected(handle).await,
            None => false,
        }
    }

    /// Dispatches a remote-control key press.
    ///
    /// Hold presses resolve through the key table first (a held home key is
    /// a different wire key, not a longer press).
    ///
    /// # Errors
    ///
    /// [`ConnectError::NotConnected`] with no connection open, or
    /// [`ConnectError::Transport`] when dispatch fails.
    pub async fn send_key(&self, key: RemoteKey, action: KeyAction) -> Result<(), ConnectError> {
        let handle = self.current_handle().await.ok_or(ConnectError::NotConnected)?;
        let resolved = key.for_action(action);
        self.transport.send_key(handle, resolved).await?;
        Ok(())
    }

    // ── Soft operations ───────────────────────────────────────────────────────
    //
    // UI-sync conveniences. Transport errors are swallowed into safe defaults
    // so they can never destabilize the connection path.

    /// Whether a text field has keyboard focus on the device. `false` when
    /// unknown.
    pub async fn keyboard_focus(&self) -> bool {
        let Some(handle) = self.current_handle().await else {
            return false;
        };
        match self.transport.keyboard_focus_state(handle).await {
            Ok(focused) => focused,
            Err(e) => {
                debug!("keyboard focus probe failed: {e}");
                false
            }
        }
    }

    /// Content of the focused text field. `None` when unknown.
    pub async fn text(&self) -> Option<String> {
        let handle = self.current_handle().await?;
        match self.transport.text(handle).await {
            Ok(text) => text,
            Err(e) => {
                debug!("text read failed: {e}");
                None
            }
        }
    }

    /// Replaces the content of the focused text field. A no-op when it fails.
    pub async fn set_text(&self, text: &str) {
        let Some(handle) = self.current_handle().await else {
            return;
        };
        if let Err(e) = self.transport.set_text(handle, text).await {
            debug!("text write failed: {e}");
        }
    }

    // ── Internals ─────────────────────────────────────────────────────────────

    async fn current_handle(&self) -> Option<ConnectionHandle> {
        *self.current.lock().await
    }

    /// Re-scans and resolves the device for a bundle with no embedded
    /// descriptor: by stable identifier when the bundle carries one, else the
    /// first discovered device.
    async fn resolve_device(
        &self,
        credentials: &CredentialBundle,
    ) -> Result<DeviceDescriptor, ConnectError> {
        let devices = self.transport.scan(self.scan_timeout).await?;
        let matched = credentials
            .device_identifier()
            .and_then(|id| devices.iter().find(|d| d.identifier == id).cloned());
        matched
            .or_else(|| devices.into_iter().next())
            .ok_or(ConnectError::DeviceNotFound)
    }

    /// Watches the loss channel of an open connection. When the transport
    /// reports the connection gone, the current-connection slot is cleared
    /// (unless a newer connection already replaced it) and
    /// [`ConnectionEvent::ConnectionLost`] is emitted.
    fn watch_connection(
        &self,
        handle: ConnectionHandle,
        mut lost: mpsc::UnboundedReceiver<TransportError>,
    ) {
        let current = Arc::clone(&self.current);
        let events = self.events.clone();
        tokio::spawn(async move {
            if let Some(err) = lost.recv().await {
                warn!("connection lost: {err}");
                {
                    let mut guard = current.lock().await;
                    if *guard == Some(handle) {
                        *guard = None;
                    }
                }
                let _ = events.send(ConnectionEvent::ConnectionLost(err));
            }
        });
    }
}

// ── Tests ─────────────────────────────────────────────────────────────────────
