//! Remote-control key table.
//!
//! [`RemoteKey`] enumerates every command the device accepts, with the wire
//! names the transport dispatches. The hold remap is a protocol-level
//! distinction, not a UI affordance: a long press of the home key is a
//! different key identifier on the wire, not the same key held longer.

use std::fmt;
use std::str::FromStr;

use serde::{Deserialize, Serialize};
use thiserror::Error;

/// A remote-control command key.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum RemoteKey {
    Up,
    Down,
    Left,
    Right,
    Select,
    Menu,
    TopMenu,
    Home,
    HomeHold,
    PlayPause,
    SkipForward,
    SkipBackward,
    VolumeUp,
    VolumeDown,
    VolumeMute,
}

impl RemoteKey {
    /// Every key, in picker order.
    pub const ALL: [RemoteKey; 15] = [
        RemoteKey::Up,
        RemoteKey::Down,
        RemoteKey::Left,
        RemoteKey::Right,
        RemoteKey::Select,
        RemoteKey::Menu,
        RemoteKey::TopMenu,
        RemoteKey::Home,
        RemoteKey::HomeHold,
        RemoteKey::PlayPause,
        RemoteKey::SkipForward,
        RemoteKey::SkipBackward,
        RemoteKey::VolumeUp,
        RemoteKey::VolumeDown,
        RemoteKey::VolumeMute,
    ];

    /// Name of the key on the wire.
    pub fn wire_name(self) -> &'static str {
        match self {
            RemoteKey::Up => "up",
            RemoteKey::Down => "down",
            RemoteKey::Left => "left",
            RemoteKey::Right => "right",
            RemoteKey::Select => "select",
            RemoteKey::Menu => "menu",
            RemoteKey::TopMenu => "top_menu",
            RemoteKey::Home => "home",
            RemoteKey::HomeHold => "home_hold",
            RemoteKey::PlayPause => "play_pause",
            RemoteKey::SkipForward => "skip_forward",
            RemoteKey::SkipBackward => "skip_backward",
            RemoteKey::VolumeUp => "volume_up",
            RemoteKey::VolumeDown => "volume_down",
            RemoteKey::VolumeMute => "volume_mute",
        }
    }

    /// Human-readable label shown as command feedback.
    pub fn description(self) -> &'static str {
        match self {
            RemoteKey::Home => "TV",
            RemoteKey::HomeHold => "TV long press",
            RemoteKey::PlayPause => "play/pause",
            RemoteKey::VolumeUp => "Raise Volume",
            RemoteKey::VolumeDown => "Lower Volume",
            other => other.wire_name(),
        }
    }

    /// Resolves the key actually dispatched for a press action.
    ///
    /// Held home presses map to the dedicated long-press key identifier;
    /// every other key is dispatched unchanged.
    pub fn for_action(self, action: KeyAction) -> RemoteKey {
        match (self, action) {
            (RemoteKey::Home | RemoteKey::HomeHold, KeyAction::Hold) => RemoteKey::HomeHold,
            (key, _) => key,
        }
    }
}

impl fmt::Display for RemoteKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.wire_name())
    }
}

/// Error type for parsing a key name.
#[derive(Debug, Error, PartialEq, Eq)]
#[error("unknown remote key {0:?}")]
pub struct UnknownKeyError(pub String);

impl FromStr for RemoteKey {
    type Err = UnknownKeyError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        RemoteKey::ALL
            .into_iter()
            .find(|key| key.wire_name() == s)
            .ok_or_else(|| UnknownKeyError(s.to_string()))
    }
}

/// How a key was pressed.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum KeyAction {
    #[default]
    Tap,
    Hold,
    DoubleTap,
}

// ── Tests ─────────────────────────────────────────────────────────────────────
