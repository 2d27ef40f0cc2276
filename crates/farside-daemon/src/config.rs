//! Master configuration loaded from TOML.
//!
//! The file names the remotes, their neighbor graph, hotkey bindings,
//! and the focus-hint and mouse-switch behavior. Because it decides
//! where keystrokes go, the file must be owned by the invoking user and
//! not writable by anyone else; [`load`] enforces that before parsing.

use std::collections::BTreeMap;
use std::os::unix::fs::MetadataExt;
use std::path::Path;

use farside_types::Direction;
use serde::Deserialize;
use tracing::warn;

use crate::error::DaemonError;

/// Top-level configuration.
#[derive(Debug, Clone, Default, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct Config {
    #[serde(default)]
    pub master: NeighborSection,
    #[serde(default)]
    pub ssh: SshSection,
    #[serde(default)]
    pub remotes: Vec<RemoteSection>,
    #[serde(default)]
    pub hotkeys: Vec<HotkeySection>,
    #[serde(default)]
    pub focus_hint: FocusHintSection,
    #[serde(default)]
    pub mouse_switch: MouseSwitchSection,
    #[serde(default)]
    pub show_nullswitch: ShowNullswitch,
}

/// Neighbor names for one node. `"master"` refers to the master
/// itself; anything else must match a remote's alias or hostname.
#[derive(Debug, Clone, Default, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct NeighborSection {
    pub left: Option<String>,
    pub right: Option<String>,
    pub up: Option<String>,
    pub down: Option<String>,
}

impl NeighborSection {
    /// The configured name for a direction.
    #[must_use]
    pub fn get(&self, dir: Direction) -> Option<&str> {
        match dir {
            Direction::Left => self.left.as_deref(),
            Direction::Right => self.right.as_deref(),
            Direction::Up => self.up.as_deref(),
            Direction::Down => self.down.as_deref(),
        }
    }
}

/// Transport settings; the global section provides defaults that each
/// remote's own section may override field by field.
#[derive(Debug, Clone, Default, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct SshSection {
    pub remote_shell: Option<String>,
    pub port: Option<u16>,
    pub bind_address: Option<String>,
    pub identity_file: Option<String>,
    pub username: Option<String>,
    pub remote_command: Option<String>,
}

/// One remote host.
#[derive(Debug, Clone, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct RemoteSection {
    /// Defaults to the hostname.
    pub alias: Option<String>,
    pub hostname: String,
    pub left: Option<String>,
    pub right: Option<String>,
    pub up: Option<String>,
    pub down: Option<String>,
    /// Parameters handed to the subordinate in Setup.
    #[serde(default)]
    pub params: BTreeMap<String, String>,
    #[serde(default)]
    pub ssh: SshSection,
}

impl RemoteSection {
    #[must_use]
    pub fn alias(&self) -> &str {
        self.alias.as_deref().unwrap_or(&self.hostname)
    }

    #[must_use]
    pub fn neighbor(&self, dir: Direction) -> Option<&str> {
        match dir {
            Direction::Left => self.left.as_deref(),
            Direction::Right => self.right.as_deref(),
            Direction::Up => self.up.as_deref(),
            Direction::Down => self.down.as_deref(),
        }
    }
}

/// A hotkey binding. The action tag selects the variant:
///
/// ```toml
/// [[hotkeys]]
/// keys = "ctrl+alt+right"
/// action = "switch"
/// direction = "right"
/// ```
#[derive(Debug, Clone, Deserialize)]
pub struct HotkeySection {
    pub keys: String,
    #[serde(flatten)]
    pub action: ActionSection,
}

#[derive(Debug, Clone, Deserialize)]
#[serde(tag = "action", rename_all = "kebab-case")]
pub enum ActionSection {
    Switch { direction: Direction },
    SwitchTo { node: String },
    Reconnect,
    Quit,
}

/// Visual focus-change indication.
#[derive(Debug, Clone, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct FocusHintSection {
    #[serde(rename = "type", default)]
    pub kind: FocusHintKind,
    #[serde(default = "default_hint_brightness")]
    pub brightness: f32,
    #[serde(default = "default_hint_duration_ms")]
    pub duration_ms: u64,
    #[serde(default = "default_fade_steps")]
    pub fade_steps: u32,
}

impl Default for FocusHintSection {
    fn default() -> Self {
        Self {
            kind: FocusHintKind::default(),
            brightness: default_hint_brightness(),
            duration_ms: default_hint_duration_ms(),
            fade_steps: default_fade_steps(),
        }
    }
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum FocusHintKind {
    #[default]
    None,
    DimInactive,
    FlashActive,
}

/// Mouse-driven switching on screen edges.
#[derive(Debug, Clone, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct MouseSwitchSection {
    #[serde(rename = "type", default)]
    pub kind: MouseSwitchKind,
    #[serde(default = "default_taps")]
    pub taps: u32,
    #[serde(default = "default_window_ms")]
    pub window_ms: u64,
}

impl Default for MouseSwitchSection {
    fn default() -> Self {
        Self {
            kind: MouseSwitchKind::default(),
            taps: default_taps(),
            window_ms: default_window_ms(),
        }
    }
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum MouseSwitchKind {
    #[default]
    None,
    MultiTap,
}

/// Whether switching to the already-focused node still indicates
/// visually.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum ShowNullswitch {
    #[default]
    Never,
    Always,
    HotkeyOnly,
}

fn default_hint_brightness() -> f32 {
    0.5
}

fn default_hint_duration_ms() -> u64 {
    250
}

fn default_fade_steps() -> u32 {
    8
}

fn default_taps() -> u32 {
    2
}

fn default_window_ms() -> u64 {
    300
}

/// Multi-tap lookback is bounded by the edge-history ring (length 6),
/// which covers up to triple-tap.
const MAX_TAPS: u32 = 3;

impl Config {
    /// Parse from TOML text and validate.
    pub fn parse(text: &str) -> Result<Self, DaemonError> {
        let mut config: Config = toml::from_str(text)
            .map_err(|e| DaemonError::Config(format!("failed to parse config: {e}")))?;
        config.validate()?;
        Ok(config)
    }

    fn validate(&mut self) -> Result<(), DaemonError> {
        if !(0.0..=1.0).contains(&self.focus_hint.brightness) {
            return Err(DaemonError::Config(format!(
                "focus_hint.brightness {} outside 0.0..=1.0",
                self.focus_hint.brightness
            )));
        }
        if self.focus_hint.fade_steps == 0 {
            return Err(DaemonError::Config(
                "focus_hint.fade_steps must be at least 1".to_string(),
            ));
        }
        if self.mouse_switch.taps == 0 {
            return Err(DaemonError::Config(
                "mouse_switch.taps must be at least 1".to_string(),
            ));
        }
        if self.mouse_switch.taps > MAX_TAPS {
            warn!(
                taps = self.mouse_switch.taps,
                "mouse_switch.taps capped at {MAX_TAPS}"
            );
            self.mouse_switch.taps = MAX_TAPS;
        }
        for remote in &self.remotes {
            if remote.hostname.is_empty() {
                return Err(DaemonError::Config(
                    "remote with empty hostname".to_string(),
                ));
            }
        }
        Ok(())
    }
}

/// Load and validate the config file after checking its ownership and
/// permissions.
pub fn load(path: &Path) -> Result<Config, DaemonError> {
    check_access(path)?;
    let text = std::fs::read_to_string(path)
        .map_err(|e| DaemonError::Config(format!("{}: {e}", path.display())))?;
    Config::parse(&text)
}

/// The config file steers input to other machines, so refuse one the
/// invoking user does not exclusively control.
fn check_access(path: &Path) -> Result<(), DaemonError> {
    let meta = std::fs::metadata(path)
        .map_err(|e| DaemonError::Config(format!("{}: {e}", path.display())))?;

    let uid = nix::unistd::getuid().as_raw();
    if meta.uid() != uid {
        return Err(DaemonError::Config(format!(
            "bad ownership on {}: owned by uid {}, not {}",
            path.display(),
            meta.uid(),
            uid
        )));
    }

    if meta.mode() & 0o022 != 0 {
        return Err(DaemonError::Config(format!(
            "bad permissions on {} (writable by group or others)",
            path.display()
        )));
    }

    Ok(())
}
