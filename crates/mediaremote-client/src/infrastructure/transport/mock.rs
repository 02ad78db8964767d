//! In-memory [`DeviceTransport`] for tests and headless operation.
//!
//! [`MockTransport`] simulates a small network of media devices: scans return
//! a configurable device list, pairing handshakes succeed against an optional
//! expected PIN, and connections are plain bookkeeping entries whose loss can
//! be triggered on demand. Failure injection knobs cover every operation the
//! lifecycle layer needs to exercise its error paths.

use std::collections::HashMap;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Mutex;
use std::time::Duration;

use async_trait::async_trait;
use tokio::sync::mpsc;

use mediaremote_core::{DeviceDescriptor, RemoteKey};

use super::{
    ActiveConnection, ConnectionHandle, Credential, DeviceTransport, PairingHandle,
    TransportError,
};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum MockProtocol {
    Airplay,
    Companion,
}

#[derive(Debug, Clone)]
struct MockSession {
    protocol: MockProtocol,
    device_identifier: String,
}

struct MockConnection {
    connected: bool,
    lost_tx: mpsc::UnboundedSender<TransportError>,
}

#[derive(Default)]
struct Inner {
    devices: Vec<DeviceDescriptor>,
    fail_scan: bool,
    expected_pin: Option<String>,
    handshake_delay: Duration,
    remaining_connect_failures: usize,
    fail_send_key: bool,
    fail_soft_ops: bool,
    sessions: HashMap<PairingHandle, MockSession>,
    connections: HashMap<ConnectionHandle, MockConnection>,
    sent_keys: Vec<RemoteKey>,
    keyboard_focused: bool,
    text_field: Option<String>,
}

/// Simulated device transport.
#[derive(Default)]
pub struct MockTransport {
    inner: Mutex<Inner>,
    scan_calls: AtomicUsize,
    connect_attempts: AtomicUsize,
}

/// Convenience constructor for test device descriptors.
pub fn device(name: &str, address: &str, identifier: &str) -> DeviceDescriptor {
    DeviceDescriptor {
        name: name.to_string(),
        address: address.to_string(),
        control_port: 49152,
        companion_port: 7000,
        identifier: identifier.to_string(),
    }
}

impl MockTransport {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_devices(devices: Vec<DeviceDescriptor>) -> Self {
        let transport = Self::default();
        transport.set_devices(devices);
        transport
    }

    // ── Configuration knobs ───────────────────────────────────────────────────

    pub fn set_devices(&self, devices: Vec<DeviceDescriptor>) {
        self.inner.lock().unwrap().devices = devices;
    }

    pub fn fail_scans(&self, fail: bool) {
        self.inner.lock().unwrap().fail_scan = fail;
    }

    /// Handshakes completed with any other PIN are rejected.
    pub fn expect_pin(&self, pin: &str) {
        self.inner.lock().unwrap().expected_pin = Some(pin.to_string());
    }

    /// Delay inserted before each `finish_*_pairing` resolves, to let tests
    /// race a handshake against a pairing restart.
    pub fn set_handshake_delay(&self, delay: Duration) {
        self.inner.lock().unwrap().handshake_delay = delay;
    }

    /// The next `n` connect calls fail with an injected error.
    pub fn fail_next_connects(&self, n: usize) {
        self.inner.lock().unwrap().remaining_connect_failures = n;
    }

    pub fn fail_send_key(&self, fail: bool) {
        self.inner.lock().unwrap().fail_send_key = fail;
    }

    pub fn fail_soft_ops(&self, fail: bool) {
        self.inner.lock().unwrap().fail_soft_ops = fail;
    }

    pub fn set_keyboard_focus(&self, focused: bool) {
        self.inner.lock().unwrap().keyboard_focused = focused;
    }

    pub fn set_text_field(&self, text: Option<String>) {
        self.inner.lock().unwrap().text_field = text;
    }

    // ── Observations ──────────────────────────────────────────────────────────

    pub fn scan_count(&self) -> usize {
        self.scan_calls.load(Ordering::Relaxed)
    }

    pub fn connect_attempts(&self) -> usize {
        self.connect_attempts.load(Ordering::Relaxed)
    }

    pub fn sent_keys(&self) -> Vec<RemoteKey> {
        self.inner.lock().unwrap().sent_keys.clone()
    }

    pub fn text_field(&self) -> Option<String> {
        self.inner.lock().unwrap().text_field.clone()
    }

    pub fn active_pairing_sessions(&self) -> usize {
        self.inner.lock().unwrap().sessions.len()
    }

    pub fn open_connection_count(&self) -> usize {
        self.inner
            .lock()
            .unwrap()
            .connections
            .values()
            .filter(|c| c.connected)
            .count()
    }

    /// Drops every live connection and reports `error` on its loss channel,
    /// as a transport would after the device vanished.
    pub fn drop_connections(&self, error: TransportError) {
        let mut inner = self.inner.lock().unwrap();
        for connection in inner.connections.values_mut() {
            if connection.connected {
                connection.connected = false;
                let _ = connection.lost_tx.send(error.clone());
            }
        }
    }

    fn start_session(
        &self,
        device: &DeviceDescriptor,
        protocol: MockProtocol,
    ) -> PairingHandle {
        let handle = PairingHandle::new();
        self.inner.lock().unwrap().sessions.insert(
            handle,
            MockSession {
                protocol,
                device_identifier: device.identifier.clone(),
            },
        );
        handle
    }

    async fn finish_session(
        &self,
        handle: PairingHandle,
        protocol: MockProtocol,
        pin: &str,
        credential_prefix: &str,
    ) -> Result<Credential, TransportError> {
        let (delay, expected_pin, session) = {
            let inner = self.inner.lock().unwrap();
            let session = inner.sessions.get(&handle).cloned();
            (inner.handshake_delay, inner.expected_pin.clone(), session)
        };

        let session = session.filter(|s| s.protocol == protocol).ok_or_else(|| {
            TransportError::Handshake("no matching pairing session".to_string())
        })?;

        if !delay.is_zero() {
            tokio::time::sleep(delay).await;
        }

        self.inner.lock().unwrap().sessions.remove(&handle);

        if let Some(expected) = expected_pin {
            if expected != pin {
                return Err(TransportError::Handshake("PIN rejected".to_string()));
            }
        }

        Ok(Credential::new(format!(
            "{credential_prefix}:{}",
            session.device_identifier
        )))
    }
}

#[async_trait]
impl DeviceTransport for MockTransport {
    async fn scan(&self, _timeout: Duration) -> Result<Vec<DeviceDescriptor>, TransportError> {
        self.scan_calls.fetch_add(1, Ordering::Relaxed);
        let inner = self.inner.lock().unwrap();
        if inner.fail_scan {
            return Err(TransportError::Scan("injected failure".to_string()));
        }
        Ok(inner.devices.clone())
    }

    async fn start_airplay_pairing(
        &self,
        device: &DeviceDescriptor,
    ) -> Result<PairingHandle, TransportError> {
        Ok(self.start_session(device, MockProtocol::Airplay))
    }

    async fn finish_airplay_pairing(
        &self,
        handle: PairingHandle,
        pin: &str,
    ) -> Result<Credential, TransportError> {
        self.finish_session(handle, MockProtocol::Airplay, pin, "airplay")
            .await
    }

    async fn start_companion_pairing(
        &self,
        device: &DeviceDescriptor,
    ) -> Result<PairingHandle, TransportError> {
        Ok(self.start_session(device, MockProtocol::Companion))
    }

    async fn finish_companion_pairing(
        &self,
        handle: PairingHandle,
        pin: &str,
    ) -> Result<Credential, TransportError> {
        self.finish_session(handle, MockProtocol::Companion, pin, "companion")
            .await
    }

    async fn connect(
        &self,
        _device: &DeviceDescriptor,
        _airplay_credential: &str,
        _companion_credential: &str,
    ) -> Result<ActiveConnection, TransportError> {
        self.connect_attempts.fetch_add(1, Ordering::Relaxed);
        let mut inner = self.inner.lock().unwrap();
        if inner.remaining_connect_failures > 0 {
            inner.remaining_connect_failures -= 1;
            return Err(TransportError::Connect("injected failure".to_string()));
        }
        let handle = ConnectionHandle::new();
        let (lost_tx, lost) = mpsc::unbounded_channel();
        inner.connections.insert(
            handle,
            MockConnection {
                connected: true,
                lost_tx,
            },
        );
        Ok(ActiveConnection { handle, lost })
    }

    async fn disconnect(&self, handle: ConnectionHandle) {
        if let Some(connection) = self.inner.lock().unwrap().connections.get_mut(&handle) {
            connection.connected = false;
        }
    }

    async fn is_connected(&self, handle: ConnectionHandle) -> bool {
        self.inner
            .lock()
            .unwrap()
            .connections
            .get(&handle)
            .map(|c| c.connected)
            .unwrap_or(false)
    }

    async fn send_key(
        &self,
        handle: ConnectionHandle,
        key: RemoteKey,
    ) -> Result<(), TransportError> {
        let mut inner = self.inner.lock().unwrap();
        let live = inner
            .connections
            .get(&handle)
            .map(|c| c.connected)
            .unwrap_or(false);
        if !live {
            return Err(TransportError::Command("connection is gone".to_string()));
        }
        if inner.fail_send_key {
            return Err(TransportError::Command("injected failure".to_string()));
        }
        inner.sent_keys.push(key);
        Ok(())
    }

    async fn keyboard_focus_state(
        &self,
        _handle: ConnectionHandle,
    ) -> Result<bool, TransportError> {
        let inner = self.inner.lock().unwrap();
        if inner.fail_soft_ops {
            return Err(TransportError::Command("injected failure".to_string()));
        }
        Ok(inner.keyboard_focused)
    }

    async fn text(&self, _handle: ConnectionHandle) -> Result<Option<String>, TransportError> {
        let inner = self.inner.lock().unwrap();
        if inner.fail_soft_ops {
            return Err(TransportError::Command("injected failure".to_string()));
        }
        Ok(inner.text_field.clone())
    }

    async fn set_text(
        &self,
        _handle: ConnectionHandle,
        text: &str,
    ) -> Result<(), TransportError> {
        let mut inner = self.inner.lock().unwrap();
        if inner.fail_soft_ops {
            return Err(TransportError::Command("injected failure".to_string()));
        }
        inner.text_field = Some(text.to_string());
        Ok(())
    }
}

// ── Tests ─────────────────────────────────────────────────────────────────────
