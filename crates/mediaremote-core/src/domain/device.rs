//! Device identity: the network descriptor produced by a scan and the
//! display-string format used everywhere a device is named to the user.
//!
//! A scan yields [`DeviceDescriptor`]s. The canonical label for a device is
//! `"Name (address)"`; that string is what device pickers show, what the
//! credential store keys entries by, and what pairing receives back when the
//! user picks a device. Descriptors are ephemeral (addresses change between
//! scans); only `identifier` is assumed stable.

use serde::{Deserialize, Serialize};
use thiserror::Error;

/// Network-identifying record for a media device, as returned by a scan.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct DeviceDescriptor {
    /// Human-readable name advertised by the device.
    pub name: String,
    /// Network address at the time of the scan. Not stable across scans.
    pub address: String,
    /// Port of the control (Companion) service.
    #[serde(alias = "port")]
    pub control_port: u16,
    /// Port of the AirPlay service.
    #[serde(alias = "airplayPort")]
    pub companion_port: u16,
    /// Stable unique identifier advertised by the device.
    pub identifier: String,
}

impl DeviceDescriptor {
    /// Canonical `"Name (address)"` label used in pickers and as the
    /// credential-store key.
    pub fn display_name(&self) -> String {
        format!("{} ({})", self.name, self.address)
    }
}

/// Error type for device display-string parsing.
#[derive(Debug, Error, PartialEq, Eq)]
pub enum DeviceStringError {
    /// The string does not end in a parenthesized address.
    #[error("device string {0:?} has no parenthesized address")]
    MissingAddress(String),
}

/// Extracts the address from a `"Name (address)"` display string.
///
/// The address is the *last* parenthesized group. Device names may themselves
/// contain parenthesized suffixes (`"Upstairs Bedroom (3) (10.0.0.7)"` must
/// yield `"10.0.0.7"`, not `"3"`), so the match is anchored to the end of the
/// string rather than taken from the first group.
///
/// # Errors
///
/// Returns [`DeviceStringError::MissingAddress`] when the string does not end
/// with a non-empty `(...)` group.
pub fn parse_device_address(device_string: &str) -> Result<&str, DeviceStringError> {
    device_string
        .strip_suffix(')')
        .and_then(|s| s.rfind('(').map(|open| &s[open + 1..]))
        .filter(|address| !address.is_empty() && !address.contains(')'))
        .ok_or_else(|| DeviceStringError::MissingAddress(device_string.to_string()))
}

// ── Tests ─────────────────────────────────────────────────────────────────────
