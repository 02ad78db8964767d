//! Lifecycle controller: wires the state machine to the I/O components.
//!
//! [`RemoteController`] is the long-lived instance that owns the state
//! machine, the pairing orchestrator, the connection manager, and the
//! credential store. UI-facing requests (scan, pick a device, submit a PIN,
//! press a key) arrive as method calls; each one requests a state transition
//! and/or performs the matching I/O. Two event pumps (state-machine events
//! and connection events) run as background tasks and turn events back into
//! follow-up work:
//!
//! - entering `SCANNING` refreshes the device list;
//! - entering `PAIRING_AIRPLAY` starts the pairing handshake for the device
//!   named in the transition data;
//! - a *fresh* entry into `CONNECTING` (from any state but `CONNECTING`
//!   itself) launches the connect-with-retry flow; re-entries from the retry
//!   loop are bookkeeping only, so a second flow is never spawned;
//! - a lost connection re-enters `CONNECTING` with the active credentials.

use std::sync::Arc;
use std::time::Duration;

use tokio::sync::{mpsc, Mutex};
use tracing::{debug, error, info, warn};

use mediaremote_core::{
    KeyAction, LifecycleConfig, Phase, RemoteKey, StateChange, StateEvent, StateMachine,
    TransitionData,
};

use crate::application::connection::{ConnectionEvent, ConnectionManager};
use crate::application::pairing::{PairingError, PairingOrchestrator};
use crate::infrastructure::storage::config::AppConfig;
use crate::infrastructure::storage::credentials::CredentialStore;
use crate::infrastructure::transport::DeviceTransport;

/// Pause before requesting a fresh PIN after a failed one, so the failure is
/// observable before the device replaces it on screen.
const PAIRING_RESTART_DELAY: Duration = Duration::from_millis(1500);

/// The long-lived application controller.
pub struct RemoteController {
    transport: Arc<dyn DeviceTransport>,
    state: Arc<Mutex<StateMachine>>,
    pairing: PairingOrchestrator,
    connection: Arc<ConnectionManager>,
    store: CredentialStore,
    scan_timeout: Duration,
    /// Pending delayed pairing restart. Scheduling a new restart cancels any
    /// prior one still waiting out its delay.
    restart_task: Mutex<Option<tokio::task::JoinHandle<()>>>,
}

impl RemoteController {
    /// Builds the controller, wires the event pumps, and returns it ready for
    /// requests. Call [`Self::bootstrap`] to enter the lifecycle.
    pub fn start(
        transport: Arc<dyn DeviceTransport>,
        store: CredentialStore,
        config: &AppConfig,
    ) -> Arc<Self> {
        let lifecycle = LifecycleConfig {
            max_retries: config.connection.max_retries,
            stale_after: config.connection.stale_after(),
        };
        let (machine, state_events) = StateMachine::new(lifecycle);
        let state = Arc::new(Mutex::new(machine));

        let (connection, connection_events) = ConnectionManager::new(
            Arc::clone(&transport),
            Arc::clone(&state),
            &config.connection,
        );
        let pairing =
            PairingOrchestrator::new(Arc::clone(&transport), config.connection.scan_timeout());

        let controller = Arc::new(Self {
            transport,
            state,
            pairing,
            connection: Arc::new(connection),
            store,
            scan_timeout: config.connection.scan_timeout(),
            restart_task: Mutex::new(None),
        });
        Arc::clone(&controller).spawn_event_pumps(state_events, connection_events);
        controller
    }

    /// Entry point on startup: connect with saved credentials when a usable
    /// active bundle exists, otherwise start scanning.
    pub async fn bootstrap(&self) {
        if self.store.has_valid_credentials() {
            if let Some(credentials) = self.store.active_credentials() {
                info!("found saved credentials, connecting");
                self.state
                    .lock()
                    .await
                    .transition(Phase::Connecting, TransitionData::with_credentials(credentials));
                return;
            }
        }
        self.state
            .lock()
            .await
            .transition(Phase::Scanning, TransitionData::default());
    }

    /// Current lifecycle phase.
    pub async fn phase(&self) -> Phase {
        self.state.lock().await.phase()
    }

    pub fn store(&self) -> &CredentialStore {
        &self.store
    }

    /// Scans the network and returns device display strings for a picker.
    /// A failed scan yields an empty list.
    pub async fn scan(&self) -> Vec<String> {
        match self.transport.scan(self.scan_timeout).await {
            Ok(devices) => devices.iter().map(|d| d.display_name()).collect(),
            Err(e) => {
                error!("scan failed: {e}");
                Vec::new()
            }
        }
    }

    /// The user picked a device from the scan list. Enters the pairing flow;
    /// the event pump opens the handshake.
    pub async fn select_device(&self, device_string: &str) -> bool {
        self.state
            .lock()
            .await
            .transition(Phase::PairingAirplay, TransitionData::with_device(device_string))
    }

    /// Routes a pairing PIN to the handshake phase the machine is in.
    ///
    /// Phase-1 success advances to `PAIRING_COMPANION`; phase-2 success saves
    /// the bundle (named map entry + active slot) and enters `CONNECTING`.
    /// Any pairing failure restarts the flow from scratch against the same
    /// device.
    ///
    /// # Errors
    ///
    /// [`PairingError::NoSession`] when no pairing phase is active, otherwise
    /// the underlying pairing error (after the restart has been scheduled).
    pub async fn submit_pin(&self, pin: &str) -> Result<(), PairingError> {
        match self.phase().await {
            Phase::PairingAirplay => match self.pairing.finish_pair1(pin).await {
                Ok(_) => {
                    self.state
                        .lock()
                        .await
                        .transition(Phase::PairingCompanion, TransitionData::default());
                    Ok(())
                }
                Err(err) => {
                    warn!("AirPlay pairing failed: {err}");
                    self.schedule_pairing_restart().await;
                    Err(err)
                }
            },
            Phase::PairingCompanion => match self.pairing.finish_pair2(pin).await {
                Ok(bundle) => {
                    let device_name = self
                        .state
                        .lock()
                        .await
                        .pair_device()
                        .map(str::to_string);
                    if let Some(name) = &device_name {
                        if let Err(e) = self.store.save_credentials(name, &bundle) {
                            error!("could not save credentials for {name:?}: {e}");
                        }
                    }
                    if let Err(e) = self.store.set_active_credentials(&bundle) {
                        error!("could not store active credentials: {e}");
                    }
                    self.state
                        .lock()
                        .await
                        .transition(Phase::Connecting, TransitionData::with_credentials(bundle));
                    Ok(())
                }
                Err(err) => {
                    warn!("Companion pairing failed: {err}");
                    self.schedule_pairing_restart().await;
                    Err(err)
                }
            },
            _ => Err(PairingError::NoSession),
        }
    }

    /// Sends a remote-control command, refreshing the activity clock first.
    /// Dispatch failures are logged, not propagated: a missed key press must
    /// not surface as an application error.
    pub async fn send_command(&self, key: RemoteKey, action: KeyAction) {
        self.state.lock().await.update_activity();
        debug!("sending {} ({action:?})", key.description());
        if let Err(err) = self.connection.send_key(key, action).await {
            error!("send_key failed: {err}");
        }
    }

    /// Re-enters `CONNECTING` with the active credentials. Used after
    /// connection loss, on power resume, and when a stale connection is
    /// detected. Returns `false` when no usable credentials exist or the
    /// transition is rejected.
    pub async fn reconnect(&self) -> bool {
        let Some(credentials) = self.store.active_credentials() else {
            return false;
        };
        self.state
            .lock()
            .await
            .transition(Phase::Connecting, TransitionData::with_credentials(credentials))
    }

    /// Forces a reconnect when a connected session has been idle past the
    /// staleness threshold. Cheap when not connected.
    pub async fn check_stale_connection(&self) {
        let stale = {
            let state = self.state.lock().await;
            state.phase() == Phase::Connected && state.is_connection_stale()
        };
        if stale && self.store.has_valid_credentials() {
            info!("connection is stale, reconnecting");
            self.reconnect().await;
        }
    }

    /// Tears down the current connection.
    pub async fn disconnect(&self) {
        self.connection.disconnect().await;
    }

    pub async fn is_connected(&self) -> bool {
        self.connection.is_connected().await
    }

    /// Whether a text field has keyboard focus on the device.
    pub async fn keyboard_focus(&self) -> bool {
        self.connection.keyboard_focus().await
    }

    /// Content of the focused text field, if any.
    pub async fn text(&self) -> Option<String> {
        self.connection.text().await
    }

    /// Replaces the content of the focused text field.
    pub async fn set_text(&self, text: &str) {
        self.connection.set_text(text).await;
    }

    // ── Event pumps ───────────────────────────────────────────────────────────

    fn spawn_event_pumps(
        self: Arc<Self>,
        mut state_events: mpsc::UnboundedReceiver<StateEvent>,
        mut connection_events: mpsc::UnboundedReceiver<ConnectionEvent>,
    ) {
        let controller = Arc::clone(&self);
        tokio::spawn(async move {
            while let Some(event) = state_events.recv().await {
                controller.handle_state_event(event).await;
            }
        });

        let controller = self;
        tokio::spawn(async move {
            while let Some(event) = connection_events.recv().await {
                controller.handle_connection_event(event).await;
            }
        });
    }

    async fn handle_state_event(&self, event: StateEvent) {
        match event {
            StateEvent::Changed(change) => self.handle_state_change(change),
            StateEvent::Entered {
                phase: Phase::Scanning,
                ..
            } => {
                let devices = self.scan().await;
                info!("scan found {} device(s)", devices.len());
                for device in &devices {
                    debug!("  {device}");
                }
            }
            StateEvent::Entered {
                phase: Phase::PairingAirplay,
                data,
            } => {
                if let Some(device) = data.device {
                    match self.pairing.start_pairing(&device).await {
                        Ok(protocol) => {
                            info!("enter the {protocol} PIN shown on the device");
                        }
                        Err(err) => {
                            error!("could not start pairing: {err}");
                            self.state
                                .lock()
                                .await
                                .transition(Phase::Scanning, TransitionData::default());
                        }
                    }
                }
            }
            StateEvent::Entered { .. } | StateEvent::Reset => {}
        }
    }

    /// Launches the connect flow on a *fresh* entry into `CONNECTING`.
    /// Retry re-entries (`CONNECTING` → `CONNECTING`) belong to the loop
    /// already running inside the connection manager.
    fn handle_state_change(&self, change: StateChange) {
        if change.to != Phase::Connecting || change.from == Phase::Connecting {
            return;
        }
        let Some(credentials) = change.data.credentials else {
            return;
        };
        let connection = Arc::clone(&self.connection);
        tokio::spawn(async move {
            if let Err(err) = connection.connect_with_retry(credentials).await {
                error!("connection failed after retries: {err}");
            }
        });
    }

    async fn handle_connection_event(&self, event: ConnectionEvent) {
        match event {
            ConnectionEvent::Connected => info!("device connected"),
            ConnectionEvent::ConnectionLost(err) => {
                warn!("connection lost ({err}), attempting reconnect");
                if !self.reconnect().await {
                    warn!("no usable credentials for reconnect");
                }
            }
        }
    }

    /// Schedules a pairing restart from scratch against the remembered
    /// device after a failed PIN. Falls back to scanning when no device is
    /// remembered. A newly scheduled restart cancels any pending prior one.
    async fn schedule_pairing_restart(&self) {
        let device = self.state.lock().await.pair_device().map(str::to_string);
        let Some(device) = device else {
            self.state
                .lock()
                .await
                .transition(Phase::Scanning, TransitionData::default());
            return;
        };

        let state = Arc::clone(&self.state);
        let task = tokio::spawn(async move {
            tokio::time::sleep(PAIRING_RESTART_DELAY).await;
            info!("restarting pairing for {device}");
            let mut state = state.lock().await;
            state.transition(Phase::Scanning, TransitionData::default());
            state.transition(Phase::PairingAirplay, TransitionData::with_device(device));
        });

        let mut pending = self.restart_task.lock().await;
        if let Some(prior) = pending.replace(task) {
            prior.abort();
        }
    }
}
