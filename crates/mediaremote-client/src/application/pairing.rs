//! Two-phase pairing orchestration.
//!
//! Pairing runs two sequential handshakes against the same device: AirPlay
//! first, then Companion. Each handshake is opened, the user reads a PIN off
//! the device's screen, and the handshake is completed with that PIN. The
//! Companion session carries the serialized AirPlay credential forward so
//! that finishing phase 2 can assemble the complete [`CredentialBundle`].
//!
//! At most one pairing session exists at a time. Starting a new session
//! invalidates any session already in flight: every handshake future checks,
//! after its network round trip, that it still belongs to the current session
//! (by generation number) before committing its result, so a slow completion
//! racing a restart can never corrupt the fresh session. A failed handshake
//! is never resumed; the session is dropped and the caller restarts from
//! scratch.

use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Duration;

use thiserror::Error;
use tokio::sync::Mutex;
use tracing::{debug, info};

use mediaremote_core::{parse_device_address, CredentialBundle, DeviceDescriptor, DeviceStringError};

use crate::infrastructure::transport::{DeviceTransport, PairingHandle, TransportError};

/// Which of the two handshake protocols a session is in.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PairingProtocol {
    AirPlay,
    Companion,
}

impl std::fmt::Display for PairingProtocol {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(match self {
            PairingProtocol::AirPlay => "AirPlay",
            PairingProtocol::Companion => "Companion",
        })
    }
}

/// Error type for pairing operations.
#[derive(Debug, Error)]
pub enum PairingError {
    /// The device string is not in `"Name (address)"` form.
    #[error("invalid device string: {0}")]
    InvalidDeviceString(#[from] DeviceStringError),

    /// No scanned device matched the requested address.
    #[error("no device at {0} found on the network")]
    DeviceNotFound(String),

    /// A PIN was submitted with no pairing session active.
    #[error("no pairing session active")]
    NoSession,

    /// A PIN was submitted against the wrong handshake phase.
    #[error("pairing session is in the {current} phase, not {expected}")]
    WrongPhase {
        expected: PairingProtocol,
        current: PairingProtocol,
    },

    /// The session was replaced while this handshake was in flight; its
    /// result was discarded.
    #[error("pairing session was superseded by a newer one")]
    Superseded,

    /// The transport failed during the handshake.
    #[error(transparent)]
    Transport(#[from] TransportError),
}

/// Session state, tagged by phase. Each variant carries only the fields that
/// are valid for that phase.
#[derive(Debug, Clone)]
enum PairingSession {
    AirPlay {
        generation: u64,
        device: DeviceDescriptor,
        handle: PairingHandle,
    },
    Companion {
        generation: u64,
        device: DeviceDescriptor,
        handle: PairingHandle,
        airplay_credential: String,
    },
}

impl PairingSession {
    fn generation(&self) -> u64 {
        match self {
            PairingSession::AirPlay { generation, .. }
            | PairingSession::Companion { generation, .. } => *generation,
        }
    }

    fn protocol(&self) -> PairingProtocol {
        match self {
            PairingSession::AirPlay { .. } => PairingProtocol::AirPlay,
            PairingSession::Companion { .. } => PairingProtocol::Companion,
        }
    }
}

/// Drives the two-phase pairing flow and hands back a complete credential
/// bundle.
pub struct PairingOrchestrator {
    transport: Arc<dyn DeviceTransport>,
    scan_timeout: Duration,
    session: Mutex<Option<PairingSession>>,
    generation: AtomicU64,
}

impl PairingOrchestrator {
    pub fn new(transport: Arc<dyn DeviceTransport>, scan_timeout: Duration) -> Self {
        Self {
            transport,
            scan_timeout,
            session: Mutex::new(None),
            generation: AtomicU64::new(0),
        }
    }

    /// Phase of the current session, if any.
    pub async fn current_protocol(&self) -> Option<PairingProtocol> {
        self.session.lock().await.as_ref().map(|s| s.protocol())
    }

    /// Starts pairing with the device named by a `"Name (address)"` display
    /// string, opening the AirPlay handshake.
    ///
    /// The display string alone is not enough to pair (the address may be
    /// stale, and the handshake needs ports and the device identifier), so
    /// the network is re-scanned for the full descriptor.
    ///
    /// Any session already in flight is invalidated.
    ///
    /// # Errors
    ///
    /// [`PairingError::InvalidDeviceString`] for a malformed display string,
    /// [`PairingError::DeviceNotFound`] when no scanned device matches, and
    /// [`PairingError::Transport`] when the handshake cannot be opened.
    pub async fn start_pairing(&self, device_string: &str) -> Result<PairingProtocol, PairingError> {
        let address = parse_device_address(device_string)?;

        let devices = self.transport.scan(self.scan_timeout).await?;
        let device = devices
            .into_iter()
            .find(|d| d.address == address)
            .ok_or_else(|| PairingError::DeviceNotFound(address.to_string()))?;

        let handle = self.transport.start_airplay_pairing(&device).await?;
        let generation = self.next_generation();
        info!("AirPlay pairing started with {}", device.display_name());

        *self.session.lock().await = Some(PairingSession::AirPlay {
            generation,
            device,
            handle,
        });
        Ok(PairingProtocol::AirPlay)
    }

    /// Completes the AirPlay handshake with the on-screen PIN, then
    /// immediately opens the Companion handshake against the same device.
    ///
    /// On success the session advances to the Companion phase, carrying the
    /// serialized AirPlay credential; the caller must collect a second PIN.
    ///
    /// # Errors
    ///
    /// [`PairingError::NoSession`] / [`PairingError::WrongPhase`] when no
    /// AirPlay-phase session is active, [`PairingError::Superseded`] when the
    /// session was replaced mid-handshake, and [`PairingError::Transport`]
    /// when a handshake step fails (the session is dropped).
    pub async fn finish_pair1(&self, pin: &str) -> Result<PairingProtocol, PairingError> {
        let (generation, device, handle) = match &*self.session.lock().await {
            Some(PairingSession::AirPlay {
                generation,
                device,
                handle,
            }) => (*generation, device.clone(), *handle),
            Some(other) => {
                return Err(PairingError::WrongPhase {
                    expected: PairingProtocol::AirPlay,
                    current: other.protocol(),
                })
            }
            None => return Err(PairingError::NoSession),
        };

        let credential = match self.transport.finish_airplay_pairing(handle, pin).await {
            Ok(credential) => credential,
            Err(e) => {
                self.clear_if_current(generation).await;
                return Err(e.into());
            }
        };
        let airplay_credential = credential.into_serialized();

        if !self.is_current(generation).await {
            debug!("discarding AirPlay handshake result from a superseded session");
            return Err(PairingError::Superseded);
        }

        let handle = match self.transport.start_companion_pairing(&device).await {
            Ok(handle) => handle,
            Err(e) => {
                self.clear_if_current(generation).await;
                return Err(e.into());
            }
        };
        info!("Companion pairing started with {}", device.display_name());

        let next_generation = self.next_generation();
        let mut session = self.session.lock().await;
        match &*session {
            Some(current) if current.generation() == generation => {
                *session = Some(PairingSession::Companion {
                    generation: next_generation,
                    device,
                    handle,
                    airplay_credential,
                });
                Ok(PairingProtocol::Companion)
            }
            _ => Err(PairingError::Superseded),
        }
    }

    /// Completes the Companion handshake with the on-screen PIN and returns
    /// the complete credential bundle.
    ///
    /// The session is cleared whether the handshake succeeds or fails; there
    /// is nothing to resume after phase 2.
    ///
    /// # Errors
    ///
    /// [`PairingError::NoSession`] / [`PairingError::WrongPhase`] when no
    /// Companion-phase session is active, [`PairingError::Superseded`] when
    /// the session was replaced mid-handshake, and
    /// [`PairingError::Transport`] when the handshake fails.
    pub async fn finish_pair2(&self, pin: &str) -> Result<CredentialBundle, PairingError> {
        let (generation, device, handle, airplay_credential) =
            match &*self.session.lock().await {
                Some(PairingSession::Companion {
                    generation,
                    device,
                    handle,
                    airplay_credential,
                }) => (*generation, device.clone(), *handle, airplay_credential.clone()),
                Some(other) => {
                    return Err(PairingError::WrongPhase {
                        expected: PairingProtocol::Companion,
                        current: other.protocol(),
                    })
                }
                None => return Err(PairingError::NoSession),
            };

        let result = self.transport.finish_companion_pairing(handle, pin).await;

        {
            let mut session = self.session.lock().await;
            match &*session {
                Some(current) if current.generation() == generation => {
                    *session = None;
                }
                _ => {
                    debug!("discarding Companion handshake result from a superseded session");
                    return Err(PairingError::Superseded);
                }
            }
        }

        let companion_credential = result?.into_serialized();
        info!("pairing complete with {}", device.display_name());
        Ok(CredentialBundle::new(
            airplay_credential,
            companion_credential,
            device,
        ))
    }

    fn next_generation(&self) -> u64 {
        self.generation.fetch_add(1, Ordering::Relaxed) + 1
    }

    async fn is_current(&self, generation: u64) -> bool {
        self.session
            .lock()
            .await
            .as_ref()
            .map(|s| s.generation() == generation)
            .unwrap_or(false)
    }

    async fn clear_if_current(&self, generation: u64) {
        let mut session = self.session.lock().await;
        if session.as_ref().map(|s| s.generation()) == Some(generation) {
            *session = None;
        }
    }
}

// ── Tests ─────────────────────────────────────────────────────────────────────

#[cfg(test)]
mod tests {
    use super::*;
    use crate::infrastructure::transport::mock::{device, MockTransport};

    fn orchestrator_with(devices: Vec<DeviceDescriptor>) -> (PairingOrchestrator, Arc<MockTransport>) {
        let transport = Arc::new(MockTransport::with_devices(devices));
        let orchestrator = PairingOrchestrator::new(
            Arc::clone(&transport) as Arc<dyn DeviceTransport>,
            Duration::from_millis(10),
        );
        (orchestrator, transport)
    }

    #[tokio::test]
    async fn test_full_pairing_flow_produces_complete_bundle() {
        let (orchestrator, _transport) =
            orchestrator_with(vec![device("Living Room", "10.0.0.5", "AA")]);

        let phase = orchestrator
            .start_pairing("Living Room (10.0.0.5)")
            .await
            .unwrap();
        assert_eq!(phase, PairingProtocol::AirPlay);

        let phase = orchestrator.finish_pair1("1111").await.unwrap();
        assert_eq!(phase, PairingProtocol::Companion);

        let bundle = orchestrator.finish_pair2("2222").await.unwrap();
        assert!(bundle.is_complete());
        assert_eq!(bundle.airplay.as_deref(), Some("airplay:AA"));
        assert_eq!(bundle.companion.as_deref(), Some("companion:AA"));
        assert_eq!(bundle.device.unwrap().identifier, "AA");

        // No session survives a completed flow.
        assert_eq!(orchestrator.current_protocol().await, None);
    }

    #[tokio::test]
    async fn test_start_pairing_resolves_address_from_last_group() {
        let (orchestrator, _transport) =
            orchestrator_with(vec![device("Living Room (2)", "10.0.0.5", "AA")]);
        let result = orchestrator.start_pairing("Living Room (2) (10.0.0.5)").await;
        assert!(result.is_ok());
    }

    #[tokio::test]
    async fn test_start_pairing_rejects_malformed_device_string() {
        let (orchestrator, transport) = orchestrator_with(vec![]);
        let result = orchestrator.start_pairing("no address here").await;
        assert!(matches!(result, Err(PairingError::InvalidDeviceString(_))));
        // Parsing fails before any network traffic.
        assert_eq!(transport.scan_count(), 0);
    }

    #[tokio::test]
    async fn test_start_pairing_fails_when_device_absent_from_scan() {
        let (orchestrator, _transport) =
            orchestrator_with(vec![device("Other", "10.0.0.9", "BB")]);
        let result = orchestrator.start_pairing("Living Room (10.0.0.5)").await;
        assert!(matches!(result, Err(PairingError::DeviceNotFound(addr)) if addr == "10.0.0.5"));
    }

    #[tokio::test]
    async fn test_finish_pair1_without_session_fails() {
        let (orchestrator, _transport) = orchestrator_with(vec![]);
        assert!(matches!(
            orchestrator.finish_pair1("1111").await,
            Err(PairingError::NoSession)
        ));
    }

    #[tokio::test]
    async fn test_finish_pair2_without_session_fails() {
        let (orchestrator, _transport) = orchestrator_with(vec![]);
        assert!(matches!(
            orchestrator.finish_pair2("2222").await,
            Err(PairingError::NoSession)
        ));
    }

    #[tokio::test]
    async fn test_finish_pair2_against_airplay_session_reports_wrong_phase() {
        let (orchestrator, _transport) =
            orchestrator_with(vec![device("Living Room", "10.0.0.5", "AA")]);
        orchestrator.start_pairing("Living Room (10.0.0.5)").await.unwrap();

        let result = orchestrator.finish_pair2("2222").await;
        assert!(matches!(
            result,
            Err(PairingError::WrongPhase {
                expected: PairingProtocol::Companion,
                current: PairingProtocol::AirPlay,
            })
        ));
    }

    #[tokio::test]
    async fn test_failed_pin_drops_the_session() {
        let (orchestrator, transport) =
            orchestrator_with(vec![device("Living Room", "10.0.0.5", "AA")]);
        transport.expect_pin("9999");

        orchestrator.start_pairing("Living Room (10.0.0.5)").await.unwrap();
        let result = orchestrator.finish_pair1("0000").await;
        assert!(matches!(result, Err(PairingError::Transport(_))));

        // The broken session is gone; the next PIN has nothing to land on.
        assert_eq!(orchestrator.current_protocol().await, None);
        assert!(matches!(
            orchestrator.finish_pair1("9999").await,
            Err(PairingError::NoSession)
        ));
    }

    #[tokio::test]
    async fn test_restart_invalidates_in_flight_session() {
        let (orchestrator, transport) =
            orchestrator_with(vec![device("Living Room", "10.0.0.5", "AA")]);
        let orchestrator = Arc::new(orchestrator);
        transport.set_handshake_delay(Duration::from_millis(50));

        orchestrator.start_pairing("Living Room (10.0.0.5)").await.unwrap();

        // A slow phase-1 completion is racing...
        let slow = {
            let orchestrator = Arc::clone(&orchestrator);
            tokio::spawn(async move { orchestrator.finish_pair1("1111").await })
        };
        tokio::time::sleep(Duration::from_millis(10)).await;

        // ...a pairing restart, which replaces the session.
        transport.set_handshake_delay(Duration::ZERO);
        orchestrator.start_pairing("Living Room (10.0.0.5)").await.unwrap();

        // The stale completion is discarded and must not corrupt the fresh
        // session, which is still awaiting its phase-1 PIN.
        let stale_result = slow.await.unwrap();
        assert!(matches!(stale_result, Err(PairingError::Superseded)));
        assert_eq!(
            orchestrator.current_protocol().await,
            Some(PairingProtocol::AirPlay)
        );

        // The fresh session completes normally.
        assert_eq!(
            orchestrator.finish_pair1("1111").await.unwrap(),
            PairingProtocol::Companion
        );
        let bundle = orchestrator.finish_pair2("2222").await.unwrap();
        assert!(bundle.is_complete());
    }
}
