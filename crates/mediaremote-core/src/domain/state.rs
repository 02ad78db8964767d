//! Application lifecycle state machine.
//!
//! Single source of truth for the app's phase. Every component (pairing,
//! connection management, and the out-of-tree UI) requests transitions
//! here and reacts to the events the machine publishes. Transitions are
//! validated against an explicit table; an invalid request is logged and
//! rejected with no side effects.
//!
//! ```text
//!              ┌────────────────────────────────────────┐
//!              ▼                                        │
//! INIT ──► SCANNING ──► PAIRING_AIRPLAY ──► PAIRING_COMPANION
//!   │          ▲  ▲             │                    │
//!   │          │  └─────────────┘                    │
//!   │          │                                     ▼
//!   └──────────┼────────────────────────────► CONNECTING ◄─┐ (retry)
//!              │                                  │  │  └──┘
//!              └──────────────────────────────────┘  ▼
//!                                                CONNECTED
//! ```
//!
//! `CONNECTED` can fall back to `SCANNING` or re-enter `CONNECTING`. There is
//! no terminal state: the machine lives as long as the process.
//!
//! Event ordering is part of the contract: a successful `transition` applies
//! its side effects, then enqueues the generic [`StateEvent::Changed`]
//! followed by the state-specific [`StateEvent::Entered`], all before it
//! returns. Consumers therefore never observe a half-applied transition.

use std::fmt;
use std::time::{Duration, Instant};

use tokio::sync::mpsc;
use tracing::{debug, warn};

use crate::domain::credentials::CredentialBundle;

/// Lifecycle phase of the application.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Phase {
    Init,
    Scanning,
    PairingAirplay,
    PairingCompanion,
    Connecting,
    Connected,
}

impl fmt::Display for Phase {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            Phase::Init => "init",
            Phase::Scanning => "scanning",
            Phase::PairingAirplay => "pairing_airplay",
            Phase::PairingCompanion => "pairing_companion",
            Phase::Connecting => "connecting",
            Phase::Connected => "connected",
        };
        f.write_str(name)
    }
}

/// Allowed next phases for each phase.
const fn allowed_transitions(from: Phase) -> &'static [Phase] {
    match from {
        Phase::Init => &[Phase::Scanning, Phase::Connecting],
        Phase::Scanning => &[Phase::PairingAirplay],
        Phase::PairingAirplay => &[Phase::PairingCompanion, Phase::Scanning],
        Phase::PairingCompanion => &[Phase::Connecting, Phase::Scanning],
        Phase::Connecting => &[Phase::Connected, Phase::Connecting, Phase::Scanning],
        Phase::Connected => &[Phase::Scanning, Phase::Connecting],
    }
}

/// Optional payload attached to a transition request and forwarded verbatim
/// to event consumers.
#[derive(Debug, Clone, Default)]
pub struct TransitionData {
    /// Display name of the device being paired (`"Name (address)"`).
    pub device: Option<String>,
    /// Credentials to connect with.
    pub credentials: Option<CredentialBundle>,
}

impl TransitionData {
    pub fn with_device(device: impl Into<String>) -> Self {
        Self {
            device: Some(device.into()),
            credentials: None,
        }
    }

    pub fn with_credentials(credentials: CredentialBundle) -> Self {
        Self {
            device: None,
            credentials: Some(credentials),
        }
    }
}

/// Generic transition notification.
#[derive(Debug, Clone)]
pub struct StateChange {
    pub from: Phase,
    pub to: Phase,
    pub data: TransitionData,
}

/// Events published by the state machine.
#[derive(Debug, Clone)]
pub enum StateEvent {
    /// A transition was applied. Emitted first.
    Changed(StateChange),
    /// The machine entered `phase`. Emitted immediately after [`Self::Changed`].
    Entered { phase: Phase, data: TransitionData },
    /// The machine was reset to [`Phase::Init`].
    Reset,
}

/// Tunables for the lifecycle machine.
#[derive(Debug, Clone)]
pub struct LifecycleConfig {
    /// Connection retries allowed before falling back to scanning.
    pub max_retries: u32,
    /// Idle time after which a connected session counts as stale.
    pub stale_after: Duration,
}

impl Default for LifecycleConfig {
    fn default() -> Self {
        Self {
            max_retries: 3,
            stale_after: Duration::from_secs(3600),
        }
    }
}

/// The lifecycle state machine.
///
/// Owned behind a mutex by the controller; every mutation goes through
/// [`StateMachine::transition`] (plus [`StateMachine::update_activity`] and
/// [`StateMachine::reset`]).
pub struct StateMachine {
    phase: Phase,
    retry_count: u32,
    max_retries: u32,
    pair_device: Option<String>,
    credentials: Option<CredentialBundle>,
    last_activity: Instant,
    stale_after: Duration,
    events: mpsc::UnboundedSender<StateEvent>,
}

impl StateMachine {
    /// Creates the machine in [`Phase::Init`] and returns it together with
    /// the receiving end of its event channel.
    pub fn new(config: LifecycleConfig) -> (Self, mpsc::UnboundedReceiver<StateEvent>) {
        let (tx, rx) = mpsc::unbounded_channel();
        let machine = Self {
            phase: Phase::Init,
            retry_count: 0,
            max_retries: config.max_retries,
            pair_device: None,
            credentials: None,
            last_activity: Instant::now(),
            stale_after: config.stale_after,
            events: tx,
        };
        (machine, rx)
    }

    pub fn phase(&self) -> Phase {
        self.phase
    }

    /// Display name of the device currently being paired, if any.
    pub fn pair_device(&self) -> Option<&str> {
        self.pair_device.as_deref()
    }

    /// Credentials most recently attached to a `Connecting` transition.
    pub fn credentials(&self) -> Option<&CredentialBundle> {
        self.credentials.as_ref()
    }

    pub fn retry_count(&self) -> u32 {
        self.retry_count
    }

    /// Requests a transition to `to`.
    ///
    /// Returns `false`, with no side effects and a warning logged, when the
    /// edge is not in the transition table. Otherwise applies the entry side
    /// effects, enqueues the `Changed` and `Entered` events in that order,
    /// and returns `true`.
    pub fn transition(&mut self, to: Phase, data: TransitionData) -> bool {
        if !allowed_transitions(self.phase).contains(&to) {
            warn!("rejected state transition {} -> {}", self.phase, to);
            return false;
        }

        let from = self.phase;
        self.phase = to;

        match to {
            Phase::Scanning => {
                self.pair_device = None;
                self.retry_count = 0;
            }
            Phase::PairingAirplay => {
                self.pair_device = data.device.clone();
            }
            Phase::Connecting => {
                if from == Phase::Connecting {
                    // Re-entry from CONNECTING is a retry.
                    self.retry_count += 1;
                } else {
                    self.retry_count = 0;
                }
                if let Some(credentials) = &data.credentials {
                    self.credentials = Some(credentials.clone());
                }
            }
            Phase::Connected => {
                self.retry_count = 0;
                self.last_activity = Instant::now();
            }
            Phase::Init | Phase::PairingCompanion => {}
        }

        debug!("state {from} -> {to}");
        let _ = self.events.send(StateEvent::Changed(StateChange {
            from,
            to,
            data: data.clone(),
        }));
        let _ = self.events.send(StateEvent::Entered { phase: to, data });
        true
    }

    /// Records user activity. Called before every user-initiated command.
    pub fn update_activity(&mut self) {
        self.last_activity = Instant::now();
    }

    /// Time elapsed since the last recorded activity.
    pub fn time_since_activity(&self) -> Duration {
        self.last_activity.elapsed()
    }

    /// Whether the connection has been idle past the staleness threshold.
    /// Only meaningful while the phase is [`Phase::Connected`].
    pub fn is_connection_stale(&self) -> bool {
        let elapsed = self.last_activity.elapsed();
        let stale = elapsed > self.stale_after;
        if stale {
            debug!(
                "connection stale: {}s since last activity (threshold {}s)",
                elapsed.as_secs(),
                self.stale_after.as_secs()
            );
        }
        stale
    }

    /// Whether another connection retry is allowed.
    pub fn should_retry_connection(&self) -> bool {
        self.retry_count < self.max_retries
    }

    /// Returns to [`Phase::Init`], dropping the paired device, credentials
    /// and retry counter, and emits [`StateEvent::Reset`].
    pub fn reset(&mut self) {
        self.phase = Phase::Init;
        self.retry_count = 0;
        self.pair_device = None;
        self.credentials = None;
        let _ = self.events.send(StateEvent::Reset);
    }
}

// ── Tests ─────────────────────────────────────────────────────────────────────
