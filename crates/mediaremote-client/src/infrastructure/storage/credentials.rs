//! JSON-backed credential store.
//!
//! One file, `credentials.json`, beside the config file, holding two
//! persisted keys:
//!
//! ```json
//! {
//!   "devices": { "Living Room (192.168.1.50)": { "airplay": "...", ... } },
//!   "active": { "airplay": "...", "companion": "...", "device": { ... } }
//! }
//! ```
//!
//! `devices` maps a device display name to its credential bundle; `active` is
//! an independent single slot (or `null`). Reads are deliberately lenient: a
//! missing or corrupt file yields an empty store, and a garbage entry is
//! skipped with a warning rather than poisoning the rest. Legacy-shaped
//! bundles are migrated on deserialization (see
//! `mediaremote_core::domain::credentials`), so callers only ever see the
//! current shape. Writes replace the whole file.

use std::collections::BTreeMap;
use std::path::PathBuf;

use serde::{Deserialize, Serialize};
use serde_json::Value;
use thiserror::Error;
use tracing::warn;

use mediaremote_core::CredentialBundle;

use super::config::config_dir;

/// Error type for credential store writes. Reads never fail; they degrade to
/// an empty store.
#[derive(Debug, Error)]
pub enum StoreError {
    /// The platform config directory could not be determined.
    #[error("could not determine platform config directory")]
    NoPlatformConfigDir,

    /// A file system I/O error occurred.
    #[error("I/O error accessing credential store at {path}: {source}")]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    /// Serialized credentials passed by the caller could not be parsed.
    #[error("failed to parse credentials: {0}")]
    Parse(#[source] serde_json::Error),

    /// The store content could not be serialized.
    #[error("failed to serialize credential store: {0}")]
    Serialize(#[source] serde_json::Error),
}

/// On-disk layout. Entries stay as raw JSON values until they are read, so a
/// single bad entry cannot take the whole store down.
#[derive(Debug, Default, Serialize, Deserialize)]
struct StoredCredentials {
    #[serde(default)]
    devices: BTreeMap<String, Value>,
    #[serde(default)]
    active: Value,
}

/// Persistent store for paired-device credentials.
pub struct CredentialStore {
    path: PathBuf,
}

impl CredentialStore {
    /// Opens the store at the platform-default location.
    ///
    /// # Errors
    ///
    /// Returns [`StoreError::NoPlatformConfigDir`] when the platform config
    /// directory cannot be determined.
    pub fn open_default() -> Result<Self, StoreError> {
        let dir = config_dir().map_err(|_| StoreError::NoPlatformConfigDir)?;
        Ok(Self {
            path: dir.join("credentials.json"),
        })
    }

    /// Opens the store at an explicit path.
    pub fn with_path(path: PathBuf) -> Self {
        Self { path }
    }

    pub fn path(&self) -> &PathBuf {
        &self.path
    }

    // ── Named bundle map ──────────────────────────────────────────────────────

    /// Upserts `bundle` under the device display name.
    ///
    /// # Errors
    ///
    /// Returns [`StoreError::Io`] / [`StoreError::Serialize`] when the store
    /// cannot be written back.
    pub fn save_credentials(
        &self,
        name: &str,
        bundle: &CredentialBundle,
    ) -> Result<(), StoreError> {
        let mut stored = self.load();
        let value = serde_json::to_value(bundle).map_err(StoreError::Serialize)?;
        stored.devices.insert(name.to_string(), value);
        self.persist(&stored)
    }

    /// Upserts an already-serialized bundle (legacy or current shape) under
    /// the device display name.
    ///
    /// # Errors
    ///
    /// Returns [`StoreError::Parse`] when `serialized` is not a credential
    /// bundle in either shape.
    pub fn save_serialized_credentials(
        &self,
        name: &str,
        serialized: &str,
    ) -> Result<(), StoreError> {
        let bundle: CredentialBundle =
            serde_json::from_str(serialized).map_err(StoreError::Parse)?;
        self.save_credentials(name, &bundle)
    }

    /// Every stored bundle, keyed by device display name. Corrupt entries are
    /// skipped.
    pub fn all_credentials(&self) -> BTreeMap<String, CredentialBundle> {
        self.load()
            .devices
            .into_iter()
            .filter_map(|(name, value)| match serde_json::from_value(value) {
                Ok(bundle) => Some((name, bundle)),
                Err(e) => {
                    warn!("skipping corrupt credential entry {name:?}: {e}");
                    None
                }
            })
            .collect()
    }

    /// The bundle stored under `name`. When `name` is `None` or not found,
    /// falls back to the first stored bundle. `None` when the store is empty.
    pub fn credentials(&self, name: Option<&str>) -> Option<CredentialBundle> {
        let mut all = self.all_credentials();
        if let Some(name) = name {
            if let Some(bundle) = all.remove(name) {
                return Some(bundle);
            }
        }
        all.into_values().next()
    }

    /// Display names of every saved device.
    pub fn saved_device_names(&self) -> Vec<String> {
        self.all_credentials().into_keys().collect()
    }

    // ── Active slot ───────────────────────────────────────────────────────────

    /// The active bundle, or `None` when absent or malformed.
    pub fn active_credentials(&self) -> Option<CredentialBundle> {
        let active = self.load().active;
        if active.is_null() {
            return None;
        }
        match serde_json::from_value(active) {
            Ok(bundle) => Some(bundle),
            Err(e) => {
                warn!("active credentials are malformed: {e}");
                None
            }
        }
    }

    /// Replaces the active bundle.
    ///
    /// # Errors
    ///
    /// Returns [`StoreError::Io`] / [`StoreError::Serialize`] when the store
    /// cannot be written back.
    pub fn set_active_credentials(&self, bundle: &CredentialBundle) -> Result<(), StoreError> {
        let mut stored = self.load();
        stored.active = serde_json::to_value(bundle).map_err(StoreError::Serialize)?;
        self.persist(&stored)
    }

    /// Clears the active slot.
    pub fn clear_active_credentials(&self) -> Result<(), StoreError> {
        let mut stored = self.load();
        stored.active = Value::Null;
        self.persist(&stored)
    }

    /// Whether the active bundle can drive a connection attempt, in either
    /// the legacy shape (single credential + identifier) or the current shape
    /// (both credentials present).
    pub fn has_valid_credentials(&self) -> bool {
        self.active_credentials()
            .map(|bundle| bundle.is_usable())
            .unwrap_or(false)
    }

    // ── File access ───────────────────────────────────────────────────────────

    fn load(&self) -> StoredCredentials {
        let content = match std::fs::read_to_string(&self.path) {
            Ok(content) => content,
            Err(e) => {
                if e.kind() != std::io::ErrorKind::NotFound {
                    warn!("could not read credential store: {e}");
                }
                return StoredCredentials::default();
            }
        };
        match serde_json::from_str(&content) {
            Ok(stored) => stored,
            Err(e) => {
                warn!("credential store is corrupt, starting empty: {e}");
                StoredCredentials::default()
            }
        }
    }

    fn persist(&self, stored: &StoredCredentials) -> Result<(), StoreError> {
        if let Some(dir) = self.path.parent() {
            std::fs::create_dir_all(dir).map_err(|source| StoreError::Io {
                path: dir.to_path_buf(),
                source,
            })?;
        }
        let content = serde_json::to_string_pretty(stored).map_err(StoreError::Serialize)?;
        std::fs::write(&self.path, content).map_err(|source| StoreError::Io {
            path: self.path.clone(),
            source,
        })
    }
}

// ── Tests ─────────────────────────────────────────────────────────────────────

#[cfg(test)]
mod tests {
    use super::*;
    use mediaremote_core::DeviceDescriptor;

    fn temp_store() -> (CredentialStore, PathBuf) {
        let dir = std::env::temp_dir().join(format!(
            "mediaremote_store_test_{}",
            uuid::Uuid::new_v4()
        ));
        let path = dir.join("credentials.json");
        (CredentialStore::with_path(path), dir)
    }

    fn bundle(tag: &str) -> CredentialBundle {
        CredentialBundle::new(
            format!("airplay-{tag}"),
            format!("companion-{tag}"),
            DeviceDescriptor {
                name: "Living Room".to_string(),
                address: "192.168.1.50".to_string(),
                control_port: 49152,
                companion_port: 7000,
                identifier: format!("ID-{tag}"),
            },
        )
    }

    #[test]
    fn test_empty_store_yields_no_credentials() {
        let (store, dir) = temp_store();
        assert!(store.all_credentials().is_empty());
        assert!(store.credentials(None).is_none());
        assert!(store.active_credentials().is_none());
        assert!(!store.has_valid_credentials());
        std::fs::remove_dir_all(&dir).ok();
    }

    #[test]
    fn test_save_then_get_round_trips_structurally() {
        let (store, dir) = temp_store();
        let original = bundle("a");
        store
            .save_credentials("Living Room (192.168.1.50)", &original)
            .unwrap();

        let restored = store.credentials(Some("Living Room (192.168.1.50)")).unwrap();
        assert_eq!(restored, original);
        std::fs::remove_dir_all(&dir).ok();
    }

    #[test]
    fn test_get_without_name_returns_first_entry() {
        let (store, dir) = temp_store();
        store.save_credentials("B Device (10.0.0.2)", &bundle("b")).unwrap();
        store.save_credentials("A Device (10.0.0.1)", &bundle("a")).unwrap();

        // Unknown name falls back the same way.
        let by_fallback = store.credentials(Some("nope")).unwrap();
        let first = store.credentials(None).unwrap();
        assert_eq!(first, by_fallback);
        std::fs::remove_dir_all(&dir).ok();
    }

    #[test]
    fn test_saved_device_names_lists_all_entries() {
        let (store, dir) = temp_store();
        store.save_credentials("A (1)", &bundle("a")).unwrap();
        store.save_credentials("B (2)", &bundle("b")).unwrap();
        let mut names = store.saved_device_names();
        names.sort();
        assert_eq!(names, vec!["A (1)", "B (2)"]);
        std::fs::remove_dir_all(&dir).ok();
    }

    #[test]
    fn test_active_slot_is_independent_of_the_map() {
        let (store, dir) = temp_store();
        store.set_active_credentials(&bundle("active")).unwrap();

        assert!(store.all_credentials().is_empty());
        assert_eq!(store.active_credentials().unwrap(), bundle("active"));
        assert!(store.has_valid_credentials());

        store.clear_active_credentials().unwrap();
        assert!(store.active_credentials().is_none());
        std::fs::remove_dir_all(&dir).ok();
    }

    #[test]
    fn test_corrupt_file_degrades_to_empty_store() {
        let (store, dir) = temp_store();
        std::fs::create_dir_all(&dir).unwrap();
        std::fs::write(store.path(), "{ not json at all").unwrap();

        assert!(store.all_credentials().is_empty());
        assert!(store.active_credentials().is_none());
        // And the store is still writable afterwards.
        store.save_credentials("A (1)", &bundle("a")).unwrap();
        assert_eq!(store.all_credentials().len(), 1);
        std::fs::remove_dir_all(&dir).ok();
    }

    #[test]
    fn test_corrupt_entry_is_skipped_without_poisoning_others() {
        let (store, dir) = temp_store();
        store.save_credentials("Good (1)", &bundle("good")).unwrap();

        // Inject a garbage entry next to the good one.
        let content = std::fs::read_to_string(store.path()).unwrap();
        let mut value: Value = serde_json::from_str(&content).unwrap();
        value["devices"]["Bad (2)"] = Value::String("not a bundle".to_string());
        std::fs::write(store.path(), serde_json::to_string(&value).unwrap()).unwrap();

        let all = store.all_credentials();
        assert_eq!(all.len(), 1);
        assert!(all.contains_key("Good (1)"));
        std::fs::remove_dir_all(&dir).ok();
    }

    #[test]
    fn test_legacy_shaped_entry_is_migrated_on_load() {
        let (store, dir) = temp_store();
        store
            .save_serialized_credentials(
                "Old TV (10.0.0.3)",
                r#"{"credentials": "air-blob", "identifier": "OLD:ID", "Companion": "comp-blob"}"#,
            )
            .unwrap();

        let restored = store.credentials(Some("Old TV (10.0.0.3)")).unwrap();
        assert_eq!(restored.airplay.as_deref(), Some("air-blob"));
        assert_eq!(restored.companion.as_deref(), Some("comp-blob"));
        assert_eq!(restored.identifier.as_deref(), Some("OLD:ID"));

        // The file itself now holds the migrated, current shape.
        let content = std::fs::read_to_string(store.path()).unwrap();
        assert!(content.contains("\"airplay\""));
        assert!(!content.contains("\"credentials\""));
        std::fs::remove_dir_all(&dir).ok();
    }

    #[test]
    fn test_save_serialized_rejects_non_bundle_json() {
        let (store, dir) = temp_store();
        let result = store.save_serialized_credentials("X (1)", "[1, 2, 3]");
        assert!(matches!(result, Err(StoreError::Parse(_))));
        std::fs::remove_dir_all(&dir).ok();
    }

    #[test]
    fn test_legacy_active_credentials_are_usable() {
        let (store, dir) = temp_store();
        let legacy: CredentialBundle =
            serde_json::from_str(r#"{"credentials": "air", "identifier": "AA"}"#).unwrap();
        store.set_active_credentials(&legacy).unwrap();
        assert!(store.has_valid_credentials());
        std::fs::remove_dir_all(&dir).ok();
    }

    #[test]
    fn test_malformed_active_slot_reads_as_none() {
        let (store, dir) = temp_store();
        store.save_credentials("A (1)", &bundle("a")).unwrap();

        let content = std::fs::read_to_string(store.path()).unwrap();
        let mut value: Value = serde_json::from_str(&content).unwrap();
        value["active"] = Value::Bool(false);
        std::fs::write(store.path(), serde_json::to_string(&value).unwrap()).unwrap();

        assert!(store.active_credentials().is_none());
        assert!(!store.has_valid_credentials());
        std::fs::remove_dir_all(&dir).ok();
    }
}
