//! Integration tests for the pairing lifecycle, driven through the
//! controller's public API the same way the graphical shell drives it:
//! scan → pick a device → two PINs → connected, plus the failure path where
//! a rejected PIN restarts pairing from scratch.
//!
//! The tests run against the in-memory transport and a temp-dir credential
//! store. Tokio's paused clock auto-advances the fixed delays (retry sleep,
//! pairing-restart delay), so the tests run in milliseconds of wall time.

use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;

use mediaremote_client::application::controller::RemoteController;
use mediaremote_client::infrastructure::storage::config::AppConfig;
use mediaremote_client::infrastructure::storage::credentials::CredentialStore;
use mediaremote_client::infrastructure::transport::mock::{device, MockTransport};
use mediaremote_client::infrastructure::transport::DeviceTransport;
use mediaremote_core::Phase;

// ── Harness ───────────────────────────────────────────────────────────────────

struct Harness {
    controller: Arc<RemoteController>,
    transport: Arc<MockTransport>,
    store_dir: PathBuf,
}

impl Harness {
    fn new() -> Self {
        let transport = Arc::new(MockTransport::with_devices(vec![device(
            "Living Room",
            "192.168.1.50",
            "AA:BB:CC",
        )]));

        let store_dir = std::env::temp_dir().join(format!(
            "mediaremote_lifecycle_test_{}",
            uuid::Uuid::new_v4()
        ));
        let store = CredentialStore::with_path(store_dir.join("credentials.json"));

        let mut config = AppConfig::default();
        config.connection.retry_delay_ms = 10;
        config.connection.scan_timeout_ms = 10;

        let controller = RemoteController::start(
            Arc::clone(&transport) as Arc<dyn DeviceTransport>,
            store,
            &config,
        );
        Self {
            controller,
            transport,
            store_dir,
        }
    }

    async fn wait_for_phase(&self, phase: Phase) -> bool {
        let deadline = tokio::time::Instant::now() + Duration::from_secs(10);
        while tokio::time::Instant::now() < deadline {
            if self.controller.phase().await == phase {
                return true;
            }
            tokio::time::sleep(Duration::from_millis(5)).await;
        }
        false
    }

    /// Waits for the event pump to open a pairing handshake, plus one extra
    /// tick so the orchestrator has committed its session record.
    async fn wait_for_pairing_session(&self) -> bool {
        let deadline = tokio::time::Instant::now() + Duration::from_secs(10);
        while tokio::time::Instant::now() < deadline {
            if self.transport.active_pairing_sessions() > 0 {
                tokio::time::sleep(Duration::from_millis(5)).await;
                return true;
            }
            tokio::time::sleep(Duration::from_millis(5)).await;
        }
        false
    }

    /// Runs the happy path up to and including phase-1 PIN entry.
    async fn pair_through_phase1(&self) {
        self.controller.bootstrap().await;
        assert!(self.wait_for_phase(Phase::Scanning).await);

        assert!(self.controller.select_device("Living Room (192.168.1.50)").await);
        assert!(self.wait_for_pairing_session().await);

        self.controller.submit_pin("1111").await.expect("phase 1 PIN");
        assert_eq!(self.controller.phase().await, Phase::PairingCompanion);
    }
}

impl Drop for Harness {
    fn drop(&mut self) {
        std::fs::remove_dir_all(&self.store_dir).ok();
    }
}

// ── Happy path ────────────────────────────────────────────────────────────────

#[tokio::test(start_paused = true)]
async fn test_full_pairing_flow_reaches_connected() {
    let harness = Harness::new();
    harness.pair_through_phase1().await;

    harness.controller.submit_pin("2222").await.expect("phase 2 PIN");
    assert!(harness.wait_for_phase(Phase::Connected).await);
    assert!(harness.controller.is_connected().await);
}

#[tokio::test(start_paused = true)]
async fn test_completed_pairing_persists_credentials() {
    let harness = Harness::new();
    harness.pair_through_phase1().await;
    harness.controller.submit_pin("2222").await.unwrap();
    assert!(harness.wait_for_phase(Phase::Connected).await);

    let store = harness.controller.store();
    assert!(store.has_valid_credentials());
    let saved = store
        .credentials(Some("Living Room (192.168.1.50)"))
        .expect("bundle saved under the display name");
    assert!(saved.is_complete());
    assert_eq!(
        store.active_credentials().expect("active slot populated"),
        saved
    );
}

#[tokio::test(start_paused = true)]
async fn test_bootstrap_with_saved_credentials_connects_directly() {
    let harness = Harness::new();
    harness.pair_through_phase1().await;
    harness.controller.submit_pin("2222").await.unwrap();
    assert!(harness.wait_for_phase(Phase::Connected).await);
    let scans_before = harness.transport.scan_count();

    // A second controller over the same store starts straight into
    // CONNECTING: no scanning, no pairing.
    let store = CredentialStore::with_path(harness.store_dir.join("credentials.json"));
    let mut config = AppConfig::default();
    config.connection.retry_delay_ms = 10;
    let controller = RemoteController::start(
        Arc::clone(&harness.transport) as Arc<dyn DeviceTransport>,
        store,
        &config,
    );
    controller.bootstrap().await;

    let deadline = tokio::time::Instant::now() + Duration::from_secs(10);
    while tokio::time::Instant::now() < deadline {
        if controller.phase().await == Phase::Connected {
            break;
        }
        tokio::time::sleep(Duration::from_millis(5)).await;
    }
    assert_eq!(controller.phase().await, Phase::Connected);
    assert_eq!(
        harness.transport.scan_count(),
        scans_before,
        "saved bundle embeds the descriptor; no re-scan needed"
    );
}

#[tokio::test(start_paused = true)]
async fn test_bootstrap_without_credentials_scans() {
    let harness = Harness::new();
    harness.controller.bootstrap().await;
    assert!(harness.wait_for_phase(Phase::Scanning).await);
    assert!(!harness.controller.is_connected().await);
}

// ── Failure path ──────────────────────────────────────────────────────────────

#[tokio::test(start_paused = true)]
async fn test_rejected_pin_restarts_pairing_from_scratch() {
    let harness = Harness::new();
    harness.transport.expect_pin("4321");

    harness.controller.bootstrap().await;
    assert!(harness.wait_for_phase(Phase::Scanning).await);
    assert!(harness.controller.select_device("Living Room (192.168.1.50)").await);
    assert!(harness.wait_for_pairing_session().await);

    // Wrong PIN: the broken session is discarded and pairing restarts
    // against the remembered device after the restart delay.
    assert!(harness.controller.submit_pin("0000").await.is_err());
    assert!(harness.wait_for_pairing_session().await);
    assert_eq!(harness.controller.phase().await, Phase::PairingAirplay);

    // The restarted flow completes with the right PINs.
    harness.controller.submit_pin("4321").await.expect("phase 1 PIN");
    harness.controller.submit_pin("4321").await.expect("phase 2 PIN");
    assert!(harness.wait_for_phase(Phase::Connected).await);
}

#[tokio::test(start_paused = true)]
async fn test_pin_without_pairing_phase_is_rejected() {
    let harness = Harness::new();
    harness.controller.bootstrap().await;
    assert!(harness.wait_for_phase(Phase::Scanning).await);

    assert!(harness.controller.submit_pin("1234").await.is_err());
    assert_eq!(harness.controller.phase().await, Phase::Scanning);
}

#[tokio::test(start_paused = true)]
async fn test_select_device_is_rejected_outside_scanning() {
    let harness = Harness::new();
    // Still in INIT; SCANNING is the only state that can enter pairing.
    assert!(!harness.controller.select_device("Living Room (192.168.1.50)").await);
    assert_eq!(harness.controller.phase().await, Phase::Init);
}
