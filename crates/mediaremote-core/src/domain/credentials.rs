//! Credential bundles: the combined artifact of the two pairing phases.
//!
//! Two wire shapes exist in stored data:
//!
//! - **current**: `{"airplay": ..., "companion": ..., "device": {...}}`,
//!   written since the two-phase pairing flow landed;
//! - **legacy**: `{"credentials": ..., "identifier": ..., "Companion"?: ...}`,
//!   written by the old single-protocol flow, with the companion key
//!   appearing in either capitalization.
//!
//! Normalization is consolidated here: [`CredentialBundle`] deserializes
//! through the private `RawCredentialBundle` superset, so every reader
//! (credential store, serialized input, connect path) only ever sees the
//! current shape. The conversion is idempotent: re-serializing a migrated
//! bundle writes the current shape back.

use serde::{Deserialize, Serialize};

use crate::domain::device::DeviceDescriptor;

/// The combined artifact of both pairing phases plus the device descriptor.
///
/// A bundle is *complete* only once both credential fields are populated,
/// which happens only when the Companion phase finishes.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(from = "RawCredentialBundle")]
pub struct CredentialBundle {
    /// Serialized credential from the AirPlay pairing phase.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub airplay: Option<String>,
    /// Serialized credential from the Companion pairing phase.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub companion: Option<String>,
    /// Descriptor of the device the credentials were minted for. Absent in
    /// bundles migrated from the legacy shape.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub device: Option<DeviceDescriptor>,
    /// Device identifier carried over from the legacy shape, used to
    /// re-resolve the device by scan when no descriptor is embedded.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub identifier: Option<String>,
}

impl CredentialBundle {
    /// Builds the complete bundle produced by a finished Companion phase.
    pub fn new(airplay: String, companion: String, device: DeviceDescriptor) -> Self {
        Self {
            airplay: Some(airplay),
            companion: Some(companion),
            device: Some(device),
            identifier: None,
        }
    }

    /// Both pairing phases have completed.
    pub fn is_complete(&self) -> bool {
        self.airplay.is_some() && self.companion.is_some()
    }

    /// The bundle can drive a connection attempt: either a complete
    /// current-shape bundle, or a legacy bundle carrying the single
    /// credential plus the device identifier.
    pub fn is_usable(&self) -> bool {
        self.is_complete() || (self.airplay.is_some() && self.identifier.is_some())
    }

    /// Stable device identifier, from the embedded descriptor when present,
    /// falling back to the legacy top-level field.
    pub fn device_identifier(&self) -> Option<&str> {
        self.device
            .as_ref()
            .map(|d| d.identifier.as_str())
            .or(self.identifier.as_deref())
    }
}

/// Superset of every field either wire shape may carry. All migration logic
/// lives in the `From` conversion below.
#[derive(Debug, Deserialize)]
struct RawCredentialBundle {
    airplay: Option<String>,
    companion: Option<String>,
    /// Legacy files wrote the companion credential with a capitalized key.
    #[serde(rename = "Companion")]
    companion_capitalized: Option<String>,
    /// Legacy single-credential field (the AirPlay credential).
    credentials: Option<String>,
    identifier: Option<String>,
    device: Option<DeviceDescriptor>,
}

impl From<RawCredentialBundle> for CredentialBundle {
    fn from(raw: RawCredentialBundle) -> Self {
        if raw.airplay.is_none() && raw.credentials.is_some() {
            // Legacy shape. The capitalized companion key takes precedence,
            // matching how the old readers resolved it.
            return Self {
                airplay: raw.credentials,
                companion: raw.companion_capitalized.or(raw.companion),
                device: raw.device,
                identifier: raw.identifier,
            };
        }
        Self {
            airplay: raw.airplay,
            companion: raw.companion.or(raw.companion_capitalized),
            device: raw.device,
            identifier: raw.identifier,
        }
    }
}

// ── Tests ─────────────────────────────────────────────────────────────────────
