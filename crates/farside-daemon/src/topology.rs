//! Topology resolution.
//!
//! Configuration refers to nodes by name. Resolution turns every name
//! into a [`Node`] handle (alias first, then hostname), overlays each
//! remote's transport settings on the global defaults, and checks the
//! resulting graph, so nothing unresolved survives into the event loop.

use std::collections::BTreeMap;

use farside_types::{Direction, Node, RemoteId};
use tracing::warn;

use crate::config::{
    ActionSection, Config, FocusHintKind, MouseSwitchKind, ShowNullswitch, SshSection,
};
use crate::error::DaemonError;
use crate::link::SshSettings;
use crate::remote::Remote;

/// A resolved hotkey binding.
#[derive(Debug, Clone)]
pub struct HotkeyBinding {
    pub keys: String,
    pub action: HotkeyAction,
}

#[derive(Debug, Clone)]
pub enum HotkeyAction {
    Switch(Direction),
    SwitchTo(Node),
    Reconnect,
    Quit,
}

/// Focus-hint settings with durations in microseconds.
#[derive(Debug, Clone, Copy)]
pub struct FocusHint {
    pub kind: FocusHintKind,
    pub brightness: f32,
    pub duration_us: u64,
    pub fade_steps: u32,
}

/// Mouse-switch settings with the window in microseconds.
#[derive(Debug, Clone, Copy)]
pub enum MouseSwitch {
    None,
    MultiTap { taps: u32, window_us: u64 },
}

/// Everything the master needs, fully resolved.
#[derive(Debug)]
pub struct ResolvedConfig {
    pub master_neighbors: [Option<Node>; 4],
    pub remotes: Vec<Remote>,
    pub hotkeys: Vec<HotkeyBinding>,
    pub focus_hint: FocusHint,
    pub mouse_switch: MouseSwitch,
    pub show_nullswitch: ShowNullswitch,
}

/// Resolve a parsed config. `progname` becomes the default remote
/// command when neither the global nor the per-remote section names
/// one.
pub fn resolve(config: Config, progname: &str) -> Result<ResolvedConfig, DaemonError> {
    let mut by_alias = BTreeMap::new();
    let mut by_hostname = BTreeMap::new();
    for (idx, remote) in config.remotes.iter().enumerate() {
        if by_alias
            .insert(remote.alias().to_string(), RemoteId(idx))
            .is_some()
        {
            return Err(DaemonError::Config(format!(
                "duplicate remote alias '{}'",
                remote.alias()
            )));
        }
        by_hostname
            .entry(remote.hostname.clone())
            .or_insert(RemoteId(idx));
    }

    let lookup = |name: &str| -> Result<Node, DaemonError> {
        if name == "master" {
            return Ok(Node::Master);
        }
        by_alias
            .get(name)
            .or_else(|| by_hostname.get(name))
            .map(|id| Node::Remote(*id))
            .ok_or_else(|| DaemonError::Config(format!("no such remote: '{name}'")))
    };

    let mut master_neighbors = [None; 4];
    for dir in Direction::ALL {
        if let Some(name) = config.master.get(dir) {
            master_neighbors[dir.index()] = Some(lookup(name)?);
        }
    }

    let mut remotes = Vec::with_capacity(config.remotes.len());
    for section in &config.remotes {
        let mut neighbors = [None; 4];
        for dir in Direction::ALL {
            if let Some(name) = section.neighbor(dir) {
                neighbors[dir.index()] = Some(lookup(name)?);
            }
        }
        remotes.push(Remote::new(
            section.alias().to_string(),
            section.hostname.clone(),
            section.params.clone(),
            overlay_ssh(&config.ssh, &section.ssh, progname),
            neighbors,
        ));
    }

    let mut hotkeys = Vec::with_capacity(config.hotkeys.len());
    for section in &config.hotkeys {
        let action = match &section.action {
            ActionSection::Switch { direction } => HotkeyAction::Switch(*direction),
            ActionSection::SwitchTo { node } => HotkeyAction::SwitchTo(lookup(node)?),
            ActionSection::Reconnect => HotkeyAction::Reconnect,
            ActionSection::Quit => HotkeyAction::Quit,
        };
        hotkeys.push(HotkeyBinding {
            keys: section.keys.clone(),
            action,
        });
    }

    for id in unreachable_remotes(&master_neighbors, &remotes) {
        warn!(remote = %remotes[id.0].alias, "remote is not reachable from the master");
    }
    for id in isolated_remotes(&remotes) {
        warn!(remote = %remotes[id.0].alias, "remote has no neighbors");
    }

    let focus_hint = FocusHint {
        kind: config.focus_hint.kind,
        brightness: config.focus_hint.brightness,
        duration_us: config.focus_hint.duration_ms * 1000,
        fade_steps: config.focus_hint.fade_steps,
    };
    let mouse_switch = match config.mouse_switch.kind {
        MouseSwitchKind::None => MouseSwitch::None,
        MouseSwitchKind::MultiTap => MouseSwitch::MultiTap {
            taps: config.mouse_switch.taps,
            window_us: config.mouse_switch.window_ms * 1000,
        },
    };

    Ok(ResolvedConfig {
        master_neighbors,
        remotes,
        hotkeys,
        focus_hint,
        mouse_switch,
        show_nullswitch: config.show_nullswitch,
    })
}

fn overlay_ssh(global: &SshSection, per_remote: &SshSection, progname: &str) -> SshSettings {
    SshSettings {
        remote_shell: per_remote
            .remote_shell
            .clone()
            .or_else(|| global.remote_shell.clone())
            .unwrap_or_else(|| "ssh".to_string()),
        port: per_remote.port.or(global.port),
        bind_address: per_remote
            .bind_address
            .clone()
            .or_else(|| global.bind_address.clone()),
        identity_file: per_remote
            .identity_file
            .clone()
            .or_else(|| global.identity_file.clone()),
        username: per_remote
            .username
            .clone()
            .or_else(|| global.username.clone()),
        remote_command: per_remote
            .remote_command
            .clone()
            .or_else(|| global.remote_command.clone())
            .unwrap_or_else(|| progname.to_string()),
    }
}

/// Remotes no walk from the master's neighbor slots can reach.
#[must_use]
pub fn unreachable_remotes(
    master_neighbors: &[Option<Node>; 4],
    remotes: &[Remote],
) -> Vec<RemoteId> {
    let mut seen = vec![false; remotes.len()];
    let mut stack: Vec<RemoteId> = master_neighbors
        .iter()
        .flatten()
        .filter_map(|node| match node {
            Node::Remote(id) => Some(*id),
            Node::Master => None,
        })
        .collect();

    while let Some(id) = stack.pop() {
        if std::mem::replace(&mut seen[id.0], true) {
            continue;
        }
        for node in remotes[id.0].neighbors.iter().flatten() {
            if let Node::Remote(next) = node {
                if !seen[next.0] {
                    stack.push(*next);
                }
            }
        }
    }

    seen.iter()
        .enumerate()
        .filter(|(_, reached)| !**reached)
        .map(|(idx, _)| RemoteId(idx))
        .collect()
}

/// Remotes with every neighbor slot empty.
#[must_use]
pub fn isolated_remotes(remotes: &[Remote]) -> Vec<RemoteId> {
    remotes
        .iter()
        .enumerate()
        .filter(|(_, remote)| remote.neighbors.iter().all(Option::is_none))
        .map(|(idx, _)| RemoteId(idx))
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::Config;

    fn resolve_str(text: &str) -> Result<ResolvedConfig, DaemonError> {
        resolve(Config::parse(text).unwrap(), "farside")
    }

    const TWO_REMOTES: &str = r#"
[master]
right = "den"

[ssh]
username = "u"
port = 22

[[remotes]]
alias = "den"
hostname = "den.example.net"
left = "master"
right = "attic"

[remotes.ssh]
port = 2222

[[remotes]]
hostname = "attic"
left = "den.example.net"
"#;

    #[test]
    fn resolves_by_alias_and_hostname() {
        let resolved = resolve_str(TWO_REMOTES).unwrap();
        assert_eq!(
            resolved.master_neighbors[Direction::Right.index()],
            Some(Node::Remote(RemoteId(0)))
        );
        let den = &resolved.remotes[0];
        assert_eq!(den.neighbors[Direction::Left.index()], Some(Node::Master));
        assert_eq!(
            den.neighbors[Direction::Right.index()],
            Some(Node::Remote(RemoteId(1)))
        );
        // attic points back at den through its hostname
        let attic = &resolved.remotes[1];
        assert_eq!(
            attic.neighbors[Direction::Left.index()],
            Some(Node::Remote(RemoteId(0)))
        );
    }

    #[test]
    fn ssh_overlay_prefers_the_remote_section() {
        let resolved = resolve_str(TWO_REMOTES).unwrap();
        assert_eq!(resolved.remotes[0].ssh.port, Some(2222));
        assert_eq!(resolved.remotes[1].ssh.port, Some(22));
        assert_eq!(resolved.remotes[0].ssh.username.as_deref(), Some("u"));
        assert_eq!(resolved.remotes[0].ssh.remote_command, "farside");
    }

    #[test]
    fn unknown_neighbor_is_fatal() {
        let err = resolve_str("[master]\nleft = \"nowhere\"\n").unwrap_err();
        assert!(err.to_string().contains("no such remote"));
    }

    #[test]
    fn duplicate_alias_is_fatal() {
        let text = r#"
[[remotes]]
alias = "twin"
hostname = "a"

[[remotes]]
alias = "twin"
hostname = "b"
"#;
        assert!(resolve_str(text).is_err());
    }

    #[test]
    fn reachability_walks_the_neighbor_graph() {
        let resolved = resolve_str(TWO_REMOTES).unwrap();
        assert!(unreachable_remotes(&resolved.master_neighbors, &resolved.remotes).is_empty());

        let orphaned = resolve_str(
            r#"
[[remotes]]
alias = "island"
hostname = "island"
"#,
        )
        .unwrap();
        assert_eq!(
            unreachable_remotes(&orphaned.master_neighbors, &orphaned.remotes),
            vec![RemoteId(0)]
        );
        assert_eq!(isolated_remotes(&orphaned.remotes), vec![RemoteId(0)]);
    }

    #[test]
    fn cyclic_graphs_terminate() {
        let text = r#"
[master]
right = "a"

[[remotes]]
alias = "a"
hostname = "a"
left = "b"
right = "b"

[[remotes]]
alias = "b"
hostname = "b"
left = "a"
right = "a"
"#;
        let resolved = resolve_str(text).unwrap();
        assert!(unreachable_remotes(&resolved.master_neighbors, &resolved.remotes).is_empty());
    }

    #[test]
    fn hotkey_targets_resolve() {
        let text = r#"
[[remotes]]
alias = "den"
hostname = "den"

[[hotkeys]]
keys = "ctrl+alt+d"
action = "switch-to"
node = "den"

[[hotkeys]]
keys = "ctrl+alt+m"
action = "switch-to"
node = "master"
"#;
        let resolved = resolve_str(text).unwrap();
        assert!(matches!(
            resolved.hotkeys[0].action,
            HotkeyAction::SwitchTo(Node::Remote(RemoteId(0)))
        ));
        assert!(matches!(
            resolved.hotkeys[1].action,
            HotkeyAction::SwitchTo(Node::Master)
        ));
    }

    #[test]
    fn durations_convert_to_microseconds() {
        let text = r#"
[focus_hint]
type = "flash-active"
duration_ms = 300

[mouse_switch]
type = "multi-tap"
window_ms = 400
"#;
        let resolved = resolve_str(text).unwrap();
        assert_eq!(resolved.focus_hint.duration_us, 300_000);
        assert!(
            matches!(resolved.mouse_switch, MouseSwitch::MultiTap { window_us, .. } if window_us == 400_000)
        );
    }
}
