//! The master control plane.
//!
//! A single cooperative task owns all state: remotes, focus, schedules.
//! Transport reader/writer tasks and the platform event pump only feed
//! the event queue; every mutation happens here between awaits.

use std::collections::HashMap;

use farside_platform::{HotkeyId, Platform, PlatformEvent};
use farside_types::{
    Direction, EdgeMask, KeyCode, Message, Node, Point, PressRelease, RemoteId, PROTOCOL_VERSION,
};
use tokio::sync::mpsc;
use tokio::sync::mpsc::error::TrySendError;
use tracing::{debug, info, warn};

use crate::clock::Clock;
use crate::config::{FocusHintKind, ShowNullswitch};
use crate::edge::{self, EdgeEvent, EdgeState};
use crate::error::DaemonError;
use crate::link::{self, RemoteLink};
use crate::remote::{reconnect_delay_us, ConnState, Remote, MAX_RECONNECT_ATTEMPTS};
use crate::scheduler::Scheduler;
use crate::topology::{FocusHint, HotkeyAction, HotkeyBinding, MouseSwitch, ResolvedConfig};

const EVENT_QUEUE: usize = 1024;

/// A scheduled callback. Whatever it needs it owns.
pub(crate) type MasterCall = Box<dyn FnOnce(&mut Master) + Send>;

/// Everything the master loop wakes up for.
pub(crate) enum MasterEvent {
    Platform(PlatformEvent),
    Link {
        id: RemoteId,
        generation: u64,
        event: LinkEvent,
    },
}

/// What a transport link task has to report.
pub(crate) enum LinkEvent {
    Message(Message),
    Closed { reason: String },
}

/// The master: remote registry, focus state, and the event loop.
pub struct Master {
    pub(crate) platform: Box<dyn Platform>,
    pub(crate) clock: Clock,
    pub(crate) remotes: Vec<Remote>,
    pub(crate) master_neighbors: [Option<Node>; 4],
    pub(crate) master_edges: EdgeState,
    pub(crate) focus_hint: FocusHint,
    pub(crate) mouse_switch: MouseSwitch,
    pub(crate) show_nullswitch: ShowNullswitch,
    hotkey_bindings: Vec<HotkeyBinding>,
    pub(crate) hotkey_actions: HashMap<HotkeyId, HotkeyAction>,
    /// The node currently receiving input; `None` is the master.
    pub(crate) focused: Option<RemoteId>,
    /// Pointer position captured when focus last left the master.
    pub(crate) saved_master_mousepos: Point,
    pub(crate) calls: Scheduler<MasterCall>,
    pub(crate) events_tx: mpsc::Sender<MasterEvent>,
    events_rx: mpsc::Receiver<MasterEvent>,
    pub(crate) quit: bool,
}

impl Master {
    #[must_use]
    pub fn new(config: ResolvedConfig, platform: Box<dyn Platform>) -> Self {
        let (events_tx, events_rx) = mpsc::channel(EVENT_QUEUE);
        Self {
            platform,
            clock: Clock::new(),
            remotes: config.remotes,
            master_neighbors: config.master_neighbors,
            master_edges: EdgeState::default(),
            focus_hint: config.focus_hint,
            mouse_switch: config.mouse_switch,
            show_nullswitch: config.show_nullswitch,
            hotkey_bindings: config.hotkeys,
            hotkey_actions: HashMap::new(),
            focused: None,
            saved_master_mousepos: Point::default(),
            calls: Scheduler::new(),
            events_tx,
            events_rx,
            quit: false,
        }
    }

    /// Run until a quit action. Startup failures (hotkey binds,
    /// platform init, missing transport binary) are fatal.
    pub async fn run(&mut self) -> Result<(), DaemonError> {
        self.bind_hotkeys()?;

        let (platform_tx, mut platform_rx) = mpsc::channel(EVENT_QUEUE);
        self.platform.start(platform_tx).await?;
        let forward = self.events_tx.clone();
        tokio::spawn(async move {
            while let Some(event) = platform_rx.recv().await {
                if forward.send(MasterEvent::Platform(event)).await.is_err() {
                    break;
                }
            }
        });

        for idx in 0..self.remotes.len() {
            self.setup_remote(RemoteId(idx))?;
        }
        info!(remotes = self.remotes.len(), "master running");

        while !self.quit {
            let now = self.clock.now_us();
            for call in self.calls.pop_due(now) {
                call(self);
            }
            self.run_due_reconnects(now)?;
            self.flush_scheduled_messages(now);
            if self.quit {
                break;
            }

            let deadline = self.next_deadline().map(|us| self.clock.instant_at(us));
            let event = tokio::select! {
                maybe = self.events_rx.recv() => maybe,
                () = async { tokio::time::sleep_until(deadline.unwrap()).await },
                    if deadline.is_some() => continue,
            };
            match event {
                Some(event) => self.handle_event(event),
                None => break,
            }
        }

        self.shutdown();
        Ok(())
    }

    fn bind_hotkeys(&mut self) -> Result<(), DaemonError> {
        let bindings = std::mem::take(&mut self.hotkey_bindings);
        for binding in &bindings {
            let id = self.platform.bind_hotkey(&binding.keys)?;
            self.hotkey_actions.insert(id, binding.action.clone());
            debug!(keys = %binding.keys, "bound hotkey");
        }
        self.hotkey_bindings = bindings;
        Ok(())
    }

    // ------------------------------------------------------------------
    // Remote lifecycle
    // ------------------------------------------------------------------

    fn setup_remote(&mut self, id: RemoteId) -> Result<(), DaemonError> {
        let (hostname, ssh, generation, params) = {
            let rmt = &mut self.remotes[id.0];
            rmt.generation += 1;
            rmt.state = ConnState::SettingUp;
            (
                rmt.hostname.clone(),
                rmt.ssh.clone(),
                rmt.generation,
                rmt.params.clone(),
            )
        };
        info!(remote = %self.remotes[id.0].alias, host = %hostname, "starting transport");

        let mut child = match link::spawn_transport(&ssh, &hostname) {
            Ok(child) => child,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => {
                return Err(DaemonError::Spawn {
                    command: ssh.remote_shell,
                    source: e,
                });
            }
            Err(e) => {
                self.fail_remote(id, &format!("transport spawn failed: {e}"));
                return Ok(());
            }
        };

        let (Some(stdin), Some(stdout)) = (child.stdin.take(), child.stdout.take()) else {
            self.fail_remote(id, "transport spawned without piped stdio");
            return Ok(());
        };

        let (tx, outbound) = mpsc::channel(link::OUTBOUND_BACKLOG);
        link::start_io(
            stdin,
            stdout,
            id,
            generation,
            self.events_tx.clone(),
            outbound,
        );
        self.remotes[id.0].link = Some(RemoteLink {
            tx,
            child: Some(child),
        });

        self.enqueue(
            id,
            Message::Setup {
                version: PROTOCOL_VERSION,
                params,
            },
        );
        Ok(())
    }

    pub(crate) fn fail_remote(&mut self, id: RemoteId, reason: &str) {
        if !self.remotes[id.0].is_live() {
            return;
        }
        warn!(remote = %self.remotes[id.0].alias, %reason, "disconnecting remote");
        self.disconnect_remote(id);

        let now = self.clock.now_us();
        let rmt = &mut self.remotes[id.0];
        rmt.failcount += 1;
        if rmt.failcount > MAX_RECONNECT_ATTEMPTS {
            warn!(remote = %rmt.alias, "failure limit exceeded, permanently failed until a reconnect action");
            rmt.state = ConnState::PermFailed;
            return;
        }
        rmt.state = ConnState::Failed;
        rmt.next_reconnect_time = now + reconnect_delay_us(rmt.failcount);
    }

    fn disconnect_remote(&mut self, id: RemoteId) {
        if let Some(mut link) = self.remotes[id.0].link.take() {
            if let Some(mut child) = link.child.take() {
                // ssh has been seen ignoring polite termination and
                // leaving the parent stuck in the reap, so kill
                // outright and let a detached task collect the status.
                if let Err(e) = child.start_kill() {
                    debug!(remote = %self.remotes[id.0].alias, error = %e, "transport kill");
                }
                tokio::spawn(async move {
                    let _ = child.wait().await;
                });
            }
        }

        if self.focused == Some(id) {
            self.focus_master();
        }
        self.remotes[id.0].scheduled.clear();
    }

    fn run_due_reconnects(&mut self, now: u64) -> Result<(), DaemonError> {
        for idx in 0..self.remotes.len() {
            let rmt = &self.remotes[idx];
            if rmt.state == ConnState::Failed && rmt.next_reconnect_time <= now {
                self.setup_remote(RemoteId(idx))?;
            }
        }
        Ok(())
    }

    fn flush_scheduled_messages(&mut self, now: u64) {
        for idx in 0..self.remotes.len() {
            if !self.remotes[idx].is_live() {
                continue;
            }
            for msg in self.remotes[idx].scheduled.pop_due(now) {
                self.enqueue(RemoteId(idx), msg);
            }
        }
    }

    /// Queue a message for immediate delivery. Backlog overflow is a
    /// hard failure of the remote; a remote that is not live silently
    /// drops the message, which also keeps the failure path from
    /// re-entering itself while it hands focus back to the master.
    pub(crate) fn enqueue(&mut self, id: RemoteId, msg: Message) {
        let rmt = &self.remotes[id.0];
        if !rmt.is_live() {
            debug!(remote = %rmt.alias, kind = msg.kind(), "dropping message for dead remote");
            return;
        }
        let Some(link) = &rmt.link else {
            debug!(remote = %rmt.alias, kind = msg.kind(), "dropping message, no transport");
            return;
        };
        match link.tx.try_send(msg) {
            Ok(()) => {}
            Err(TrySendError::Full(_)) => self.fail_remote(id, "send backlog exceeded"),
            Err(TrySendError::Closed(_)) => {
                // The writer died; its Closed event is already on the
                // queue and will run the failure path.
                debug!(remote = %self.remotes[id.0].alias, "dropping message, writer gone");
            }
        }
    }

    fn next_deadline(&self) -> Option<u64> {
        let mut next = self.calls.next_deadline();
        for rmt in &self.remotes {
            let candidate = match rmt.state {
                ConnState::Failed => Some(rmt.next_reconnect_time),
                _ => rmt.scheduled.next_deadline(),
            };
            next = match (next, candidate) {
                (Some(a), Some(b)) => Some(a.min(b)),
                (a, None) => a,
                (None, b) => b,
            };
        }
        next
    }

    // ------------------------------------------------------------------
    // Event dispatch
    // ------------------------------------------------------------------

    pub(crate) fn handle_event(&mut self, event: MasterEvent) {
        match event {
            MasterEvent::Platform(pev) => self.handle_platform_event(pev),
            MasterEvent::Link {
                id,
                generation,
                event,
            } => {
                let rmt = &self.remotes[id.0];
                if rmt.generation != generation || !rmt.is_live() {
                    debug!(remote = %rmt.alias, "ignoring event from stale link");
                    return;
                }
                match event {
                    LinkEvent::Message(msg) => self.handle_message(id, msg),
                    LinkEvent::Closed { reason } => self.fail_remote(id, &reason),
                }
            }
        }
    }

    fn handle_platform_event(&mut self, event: PlatformEvent) {
        match event {
            PlatformEvent::Key { key, state } => {
                if let Some(id) = self.focused {
                    self.enqueue(id, Message::KeyEvent { key, state });
                }
            }
            PlatformEvent::Motion { dx, dy } => {
                if let Some(id) = self.focused {
                    self.enqueue(id, Message::MoveRel { dx, dy });
                }
            }
            PlatformEvent::Button { button, state } => {
                if let Some(id) = self.focused {
                    self.enqueue(id, Message::ClickEvent { button, state });
                }
            }
            PlatformEvent::EdgeMask { old, new, x, y } => {
                self.check_edge_events(None, old, new, x, y);
            }
            PlatformEvent::Hotkey { id, modifiers } => self.run_hotkey(id, &modifiers),
        }
    }

    pub(crate) fn handle_message(&mut self, id: RemoteId, msg: Message) {
        let alias = self.remotes[id.0].alias.clone();
        match msg {
            Message::Ready => {
                if self.remotes[id.0].state != ConnState::SettingUp {
                    self.fail_remote(id, "unexpected READY message");
                    return;
                }
                self.remotes[id.0].state = ConnState::Connected;
                self.remotes[id.0].failcount = 0;
                info!(remote = %alias, "remote ready");
                let hint = self.focus_hint;
                if hint.kind == FocusHintKind::DimInactive {
                    self.transition_brightness(
                        Some(id),
                        1.0,
                        hint.brightness,
                        hint.duration_us,
                        hint.fade_steps,
                    );
                }
            }

            Message::SetClipboard { text } => {
                if self.remotes[id.0].state != ConnState::Connected {
                    warn!(remote = %alias, "unexpected SETCLIPBOARD from non-connected remote, ignoring");
                    return;
                }
                self.platform.set_clipboard_text(&text);
                // Whoever holds focus now gets the fresh contents, even
                // if the response was solicited while they had it.
                if let Some(focused) = self.focused {
                    let text = self.platform.clipboard_text();
                    self.enqueue(focused, Message::SetClipboard { text });
                }
            }

            Message::LogMsg { text } => {
                info!(remote = %alias, "{}", text.trim_end());
            }

            Message::EdgeMaskChange { old, new, x, y } => {
                if !old.is_valid() || !new.is_valid() {
                    self.fail_remote(id, "invalid edge mask");
                } else {
                    self.check_edge_events(Some(id), old, new, x, y);
                }
            }

            other => {
                self.fail_remote(id, &format!("unexpected {} message", other.kind()));
            }
        }
    }

    // ------------------------------------------------------------------
    // Edge events
    // ------------------------------------------------------------------

    pub(crate) fn check_edge_events(
        &mut self,
        source: Option<RemoteId>,
        old: EdgeMask,
        new: EdgeMask,
        x: f32,
        y: f32,
    ) {
        let now = self.clock.now_us();
        for (dir, event) in edge::mask_transitions(old, new) {
            let recorded = match source {
                Some(id) => self.remotes[id.0].edges.record(dir, event, now),
                None => self.master_edges.record(dir, event, now),
            };
            if recorded.is_err() {
                let name = self.source_name(source);
                warn!(source = name, direction = %dir, "out-of-sync edge event ignored");
                continue;
            }

            let MouseSwitch::MultiTap { taps, window_us } = self.mouse_switch else {
                continue;
            };
            if event != EdgeEvent::Arrive {
                continue;
            }

            // The first arrival of an N-tap run sits (N-1)*2 entries
            // back: each earlier tap contributed an arrive and a
            // depart.
            let lookback = (taps as usize - 1) * 2;
            let first_tap = match source {
                Some(id) => self.remotes[id.0].edges.entry_back(dir, lookback),
                None => self.master_edges.entry_back(dir, lookback),
            };
            if now.saturating_sub(first_tap) < window_us {
                let modifiers = self.platform.current_modifiers();
                if self.focus_neighbor(dir, &modifiers, false) {
                    self.edgeswitch_reposition(dir, x, y);
                }
            }
        }
    }

    fn source_name(&self, source: Option<RemoteId>) -> &str {
        match source {
            Some(id) => &self.remotes[id.0].alias,
            None => "master",
        }
    }

    /// Put the pointer at the opposite edge of the node just focused,
    /// so a switch-by-mouse reads as the cursor sliding across rather
    /// than jumping to wherever it last was.
    fn edgeswitch_reposition(&mut self, dir: Direction, src_x: f32, src_y: f32) {
        let (x, y) = match dir {
            Direction::Left => (1.0, src_y),
            Direction::Right => (0.0, src_y),
            Direction::Up => (src_x, 1.0),
            Direction::Down => (src_x, 0.0),
        };
        match self.focused {
            Some(id) => self.enqueue(id, Message::SetMousePosScreenRel { x, y }),
            None => self.platform.set_mouse_pos_screenrel(x, y),
        }
    }

    // ------------------------------------------------------------------
    // Focus
    // ------------------------------------------------------------------

    pub(crate) fn focus_master(&mut self) {
        let modifiers = self.platform.current_modifiers();
        self.focus_node(Some(Node::Master), &modifiers, false);
    }

    pub(crate) fn focus_neighbor(
        &mut self,
        dir: Direction,
        modifiers: &[KeyCode],
        from_hotkey: bool,
    ) -> bool {
        let target = match self.focused {
            Some(id) => self.remotes[id.0].neighbors[dir.index()],
            None => self.master_neighbors[dir.index()],
        };
        self.focus_node(target, modifiers, from_hotkey)
    }

    /// Move focus. Returns whether an actual switch happened; staying
    /// on the current node may still indicate visually, depending on
    /// the nullswitch policy.
    pub(crate) fn focus_node(
        &mut self,
        target: Option<Node>,
        modifiers: &[KeyCode],
        from_hotkey: bool,
    ) -> bool {
        let switch_to = match target {
            None => self.focused,
            Some(Node::Master) => None,
            Some(Node::Remote(id)) => {
                if self.remotes[id.0].state != ConnState::Connected {
                    warn!(remote = %self.remotes[id.0].alias, "remote not connected, can't focus");
                    return false;
                }
                Some(id)
            }
        };

        if switch_to != self.focused
            || self.show_nullswitch == ShowNullswitch::Always
            || (self.show_nullswitch == ShowNullswitch::HotkeyOnly && from_hotkey)
        {
            self.indicate_switch(self.focused, switch_to);
        }

        if switch_to == self.focused {
            return false;
        }

        match (self.focused, switch_to) {
            (Some(_), None) => {
                self.platform.ungrab_inputs();
                self.platform.set_mouse_pos(self.saved_master_mousepos);
            }
            (None, Some(_)) => {
                self.saved_master_mousepos = self.platform.mouse_pos();
                if let Err(e) = self.platform.grab_inputs() {
                    warn!(error = %e, "failed to grab inputs");
                }
            }
            _ => {}
        }

        if switch_to.is_some() {
            let center = self.platform.screen_center();
            self.platform.set_mouse_pos(center);
        }

        self.transfer_clipboard(self.focused, switch_to);
        self.transfer_modifiers(self.focused, switch_to, modifiers);

        self.focused = switch_to;
        true
    }

    /// Leaving a remote asks it for its clipboard (the SetClipboard
    /// answer arrives later and lands wherever focus is then); entering
    /// one pushes ours.
    fn transfer_clipboard(&mut self, from: Option<RemoteId>, to: Option<RemoteId>) {
        if from.is_none() && to.is_none() {
            warn!("clipboard transfer from master to master");
            return;
        }
        if let Some(from) = from {
            self.enqueue(from, Message::GetClipboard);
        } else if let Some(to) = to {
            let text = self.platform.clipboard_text();
            self.enqueue(to, Message::SetClipboard { text });
        }
    }

    /// Release held modifiers on the node losing focus and press them
    /// on the one gaining it, so no key is left stuck on either side.
    fn transfer_modifiers(
        &mut self,
        from: Option<RemoteId>,
        to: Option<RemoteId>,
        modifiers: &[KeyCode],
    ) {
        if let Some(from) = from {
            for &key in modifiers {
                self.enqueue(
                    from,
                    Message::KeyEvent {
                        key,
                        state: PressRelease::Release,
                    },
                );
            }
        }
        if let Some(to) = to {
            for &key in modifiers {
                self.enqueue(
                    to,
                    Message::KeyEvent {
                        key,
                        state: PressRelease::Press,
                    },
                );
            }
        }
    }

    // ------------------------------------------------------------------
    // Brightness hints
    // ------------------------------------------------------------------

    fn indicate_switch(&mut self, from: Option<RemoteId>, to: Option<RemoteId>) {
        let hint = self.focus_hint;
        match hint.kind {
            FocusHintKind::None => {}
            FocusHintKind::DimInactive => {
                if from != to {
                    self.transition_brightness(
                        from,
                        1.0,
                        hint.brightness,
                        hint.duration_us,
                        hint.fade_steps,
                    );
                }
                self.transition_brightness(
                    to,
                    hint.brightness,
                    1.0,
                    hint.duration_us,
                    hint.fade_steps,
                );
            }
            FocusHintKind::FlashActive => {
                self.transition_brightness(
                    to,
                    hint.brightness,
                    1.0,
                    hint.duration_us,
                    hint.fade_steps,
                );
            }
        }
    }

    /// Fade a node's brightness linearly: an immediate jump to `from`,
    /// `steps - 1` intermediate scheduled levels, and a final one at
    /// `duration_us`.
    pub(crate) fn transition_brightness(
        &mut self,
        node: Option<RemoteId>,
        from: f32,
        to: f32,
        duration_us: u64,
        steps: u32,
    ) {
        let now = self.clock.now_us();
        self.set_node_brightness(node, from);
        for i in 1..steps {
            let frac = i as f32 / steps as f32;
            let at = now + (frac * duration_us as f32) as u64;
            let level = from + frac * (to - from);
            self.schedule_brightness_change(node, level, at);
        }
        self.schedule_brightness_change(node, to, now + duration_us);
    }

    fn set_node_brightness(&mut self, node: Option<RemoteId>, level: f32) {
        match node {
            Some(id) => self.enqueue(id, Message::SetBrightness { level }),
            None => self.platform.set_display_brightness(level),
        }
    }

    fn schedule_brightness_change(&mut self, node: Option<RemoteId>, level: f32, at: u64) {
        match node {
            Some(id) => self.remotes[id.0]
                .scheduled
                .schedule(Message::SetBrightness { level }, at),
            None => self
                .calls
                .schedule(Box::new(move |m| m.platform.set_display_brightness(level)), at),
        }
    }

    // ------------------------------------------------------------------
    // Hotkey actions
    // ------------------------------------------------------------------

    fn run_hotkey(&mut self, id: HotkeyId, modifiers: &[KeyCode]) {
        let Some(action) = self.hotkey_actions.get(&id).cloned() else {
            warn!(hotkey = id.0, "hotkey fired without a bound action");
            return;
        };
        match action {
            HotkeyAction::Switch(dir) => {
                self.focus_neighbor(dir, modifiers, true);
            }
            HotkeyAction::SwitchTo(node) => {
                self.focus_node(Some(node), modifiers, true);
            }
            HotkeyAction::Reconnect => self.reconnect_all(),
            HotkeyAction::Quit => {
                info!("quit requested");
                self.quit = true;
            }
        }
    }

    /// The reconnect action: revive permanently failed remotes and make
    /// every remote due for a fresh attempt now.
    pub(crate) fn reconnect_all(&mut self) {
        let now = self.clock.now_us();
        for rmt in &mut self.remotes {
            if rmt.state == ConnState::PermFailed {
                rmt.state = ConnState::Failed;
            }
            rmt.failcount = 0;
            rmt.next_reconnect_time = now;
        }
        info!("reconnect requested for all remotes");
    }

    fn shutdown(&mut self) {
        info!("shutting down");
        for idx in 0..self.remotes.len() {
            self.disconnect_remote(RemoteId(idx));
        }
        self.platform.shutdown();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::BTreeMap;
    use std::time::Duration;

    use farside_platform::mock::{MockPlatform, MockPlatformHandle};
    use farside_types::MouseButton;

    use crate::link::SshSettings;
    use crate::topology::MouseSwitch;

    const SHIFT: KeyCode = KeyCode(0xffe1);

    struct Rig {
        master: Master,
        platform: MockPlatformHandle,
        outbound: Vec<mpsc::Receiver<Message>>,
    }

    struct RigOptions {
        remotes: usize,
        focus_hint: FocusHint,
        mouse_switch: MouseSwitch,
        show_nullswitch: ShowNullswitch,
    }

    impl Default for RigOptions {
        fn default() -> Self {
            Self {
                remotes: 1,
                focus_hint: FocusHint {
                    kind: FocusHintKind::None,
                    brightness: 0.3,
                    duration_us: 300_000,
                    fade_steps: 6,
                },
                mouse_switch: MouseSwitch::None,
                show_nullswitch: ShowNullswitch::Never,
            }
        }
    }

    /// Build a master with `remotes` connected peers in a row to the
    /// right of the master, each link backed by a channel the test
    /// holds the receiving end of.
    fn rig(options: RigOptions) -> Rig {
        let (mock, _feed) = MockPlatform::new();
        let handle = mock.handle();

        let mut remotes = Vec::new();
        for idx in 0..options.remotes {
            let mut neighbors: [Option<Node>; 4] = [None; 4];
            neighbors[Direction::Left.index()] = if idx == 0 {
                Some(Node::Master)
            } else {
                Some(Node::Remote(RemoteId(idx - 1)))
            };
            if idx + 1 < options.remotes {
                neighbors[Direction::Right.index()] = Some(Node::Remote(RemoteId(idx + 1)));
            }
            remotes.push(Remote::new(
                format!("rmt{idx}"),
                format!("rmt{idx}.example.net"),
                BTreeMap::new(),
                SshSettings::default(),
                neighbors,
            ));
        }

        let mut master_neighbors: [Option<Node>; 4] = [None; 4];
        if options.remotes > 0 {
            master_neighbors[Direction::Right.index()] = Some(Node::Remote(RemoteId(0)));
        }

        let resolved = ResolvedConfig {
            master_neighbors,
            remotes,
            hotkeys: Vec::new(),
            focus_hint: options.focus_hint,
            mouse_switch: options.mouse_switch,
            show_nullswitch: options.show_nullswitch,
        };

        let mut master = Master::new(resolved, Box::new(mock));
        let mut outbound = Vec::new();
        for idx in 0..options.remotes {
            let (tx, rx) = mpsc::channel(link::OUTBOUND_BACKLOG);
            master.remotes[idx].link = Some(RemoteLink { tx, child: None });
            master.remotes[idx].state = ConnState::Connected;
            outbound.push(rx);
        }

        Rig {
            master,
            platform: handle,
            outbound,
        }
    }

    fn drain(rx: &mut mpsc::Receiver<Message>) -> Vec<Message> {
        let mut msgs = Vec::new();
        while let Ok(msg) = rx.try_recv() {
            msgs.push(msg);
        }
        msgs
    }

    fn link_closed(id: usize, generation: u64, reason: &str) -> MasterEvent {
        MasterEvent::Link {
            id: RemoteId(id),
            generation,
            event: LinkEvent::Closed {
                reason: reason.to_string(),
            },
        }
    }

    #[tokio::test(start_paused = true)]
    async fn backoff_doubles_then_caps_then_permfails() {
        let mut rig = rig(RigOptions::default());
        let expected_secs = [0.5, 1.0, 2.0, 4.0, 8.0, 16.0, 30.0, 30.0, 30.0, 30.0];

        for (i, secs) in expected_secs.iter().enumerate() {
            if i > 0 {
                // a reconnect attempt put it back into setup
                rig.master.remotes[0].state = ConnState::SettingUp;
            }
            let now = rig.master.clock.now_us();
            rig.master.fail_remote(RemoteId(0), "transport exited");
            assert_eq!(rig.master.remotes[0].state, ConnState::Failed);
            assert_eq!(
                rig.master.remotes[0].next_reconnect_time - now,
                (secs * 1_000_000.0) as u64,
                "failure #{}",
                i + 1
            );
        }

        rig.master.remotes[0].state = ConnState::SettingUp;
        rig.master.fail_remote(RemoteId(0), "transport exited");
        assert_eq!(rig.master.remotes[0].state, ConnState::PermFailed);

        // no deadline left for a permfailed remote
        assert_eq!(rig.master.next_deadline(), None);
    }

    #[tokio::test(start_paused = true)]
    async fn switch_presses_held_modifiers_on_the_new_node() {
        let mut rig = rig(RigOptions::default());

        assert!(rig
            .master
            .focus_node(Some(Node::Remote(RemoteId(0))), &[SHIFT], true));

        let msgs = drain(&mut rig.outbound[0]);
        let key_events: Vec<&Message> = msgs
            .iter()
            .filter(|m| matches!(m, Message::KeyEvent { .. }))
            .collect();
        assert_eq!(
            key_events,
            vec![&Message::KeyEvent {
                key: SHIFT,
                state: PressRelease::Press,
            }]
        );
        assert!(rig.platform.grabbed());
        // pointer parked at screen center while a remote has focus
        assert_eq!(rig.platform.mouse_pos(), Point::new(960, 540));
    }

    #[tokio::test(start_paused = true)]
    async fn returning_to_master_releases_modifiers_on_the_remote() {
        let mut rig = rig(RigOptions::default());
        rig.platform.set_mouse_pos(Point::new(42, 37));

        rig.master
            .focus_node(Some(Node::Remote(RemoteId(0))), &[SHIFT], true);
        drain(&mut rig.outbound[0]);

        assert!(rig.master.focus_node(Some(Node::Master), &[SHIFT], true));
        let msgs = drain(&mut rig.outbound[0]);
        assert!(msgs.contains(&Message::GetClipboard));
        assert!(msgs.contains(&Message::KeyEvent {
            key: SHIFT,
            state: PressRelease::Release,
        }));
        assert!(!rig.platform.grabbed());
        assert_eq!(rig.platform.mouse_pos(), Point::new(42, 37));
        assert_eq!(rig.master.focused, None);
    }

    #[tokio::test(start_paused = true)]
    async fn double_tap_inside_window_switches_and_repositions() {
        tokio::time::advance(Duration::from_secs(10)).await;
        let mut rig = rig(RigOptions {
            mouse_switch: MouseSwitch::MultiTap {
                taps: 2,
                window_us: 400_000,
            },
            ..RigOptions::default()
        });

        let touching = EdgeMask::default().with(Direction::Right);
        let clear = EdgeMask::default();

        rig.master
            .handle_platform_event(PlatformEvent::EdgeMask {
                old: clear,
                new: touching,
                x: 1.0,
                y: 0.25,
            });
        assert_eq!(rig.master.focused, None, "first tap alone must not switch");

        tokio::time::advance(Duration::from_millis(50)).await;
        rig.master
            .handle_platform_event(PlatformEvent::EdgeMask {
                old: touching,
                new: clear,
                x: 1.0,
                y: 0.25,
            });

        tokio::time::advance(Duration::from_millis(150)).await;
        rig.master
            .handle_platform_event(PlatformEvent::EdgeMask {
                old: clear,
                new: touching,
                x: 1.0,
                y: 0.25,
            });

        assert_eq!(rig.master.focused, Some(RemoteId(0)));
        let msgs = drain(&mut rig.outbound[0]);
        assert_eq!(
            msgs.last(),
            Some(&Message::SetMousePosScreenRel { x: 0.0, y: 0.25 })
        );
    }

    #[tokio::test(start_paused = true)]
    async fn double_tap_outside_window_stays_put() {
        tokio::time::advance(Duration::from_secs(10)).await;
        let mut rig = rig(RigOptions {
            mouse_switch: MouseSwitch::MultiTap {
                taps: 2,
                window_us: 100_000,
            },
            ..RigOptions::default()
        });

        let touching = EdgeMask::default().with(Direction::Right);
        let clear = EdgeMask::default();
        rig.master
            .handle_platform_event(PlatformEvent::EdgeMask {
                old: clear,
                new: touching,
                x: 1.0,
                y: 0.25,
            });
        tokio::time::advance(Duration::from_millis(50)).await;
        rig.master
            .handle_platform_event(PlatformEvent::EdgeMask {
                old: touching,
                new: clear,
                x: 1.0,
                y: 0.25,
            });
        tokio::time::advance(Duration::from_millis(150)).await;
        rig.master
            .handle_platform_event(PlatformEvent::EdgeMask {
                old: clear,
                new: touching,
                x: 1.0,
                y: 0.25,
            });

        assert_eq!(rig.master.focused, None);
        assert!(drain(&mut rig.outbound[0]).is_empty());
    }

    #[tokio::test(start_paused = true)]
    async fn clipboard_follows_focus_and_unsolicited_updates_echo_back() {
        let mut rig = rig(RigOptions::default());
        rig.platform.set_clipboard("hello");

        rig.master
            .focus_node(Some(Node::Remote(RemoteId(0))), &[], true);
        let msgs = drain(&mut rig.outbound[0]);
        assert!(msgs.contains(&Message::SetClipboard {
            text: "hello".to_string(),
        }));

        // the focused remote pushes new contents of its own accord
        rig.master.handle_message(
            RemoteId(0),
            Message::SetClipboard {
                text: "world".to_string(),
            },
        );
        assert_eq!(rig.platform.clipboard(), "world");
        let msgs = drain(&mut rig.outbound[0]);
        assert_eq!(
            msgs,
            vec![Message::SetClipboard {
                text: "world".to_string(),
            }]
        );
    }

    #[tokio::test(start_paused = true)]
    async fn focused_remote_failure_returns_focus_to_master() {
        let mut rig = rig(RigOptions::default());
        rig.platform.set_mouse_pos(Point::new(42, 37));
        rig.master
            .focus_node(Some(Node::Remote(RemoteId(0))), &[], true);
        assert_eq!(rig.master.focused, Some(RemoteId(0)));

        rig.master
            .handle_event(link_closed(0, rig.master.remotes[0].generation, "eof"));

        assert_eq!(rig.master.remotes[0].state, ConnState::Failed);
        assert_eq!(rig.master.focused, None);
        assert!(!rig.platform.grabbed());
        assert_eq!(rig.platform.mouse_pos(), Point::new(42, 37));
        assert!(rig.master.remotes[0].scheduled.is_empty());
    }

    #[tokio::test(start_paused = true)]
    async fn ready_schedules_the_dim_inactive_fade() {
        tokio::time::advance(Duration::from_secs(1)).await;
        let mut rig = rig(RigOptions {
            focus_hint: FocusHint {
                kind: FocusHintKind::DimInactive,
                brightness: 0.3,
                duration_us: 300_000,
                fade_steps: 6,
            },
            ..RigOptions::default()
        });
        rig.master.remotes[0].state = ConnState::SettingUp;
        rig.master.remotes[0].failcount = 3;

        let now = rig.master.clock.now_us();
        rig.master.handle_message(RemoteId(0), Message::Ready);

        assert_eq!(rig.master.remotes[0].state, ConnState::Connected);
        assert_eq!(rig.master.remotes[0].failcount, 0);

        // immediate jump to full brightness...
        let msgs = drain(&mut rig.outbound[0]);
        assert_eq!(msgs, vec![Message::SetBrightness { level: 1.0 }]);

        // ...then six scheduled levels walking down to 0.3
        let scheduled: Vec<(u64, f32)> = rig.master.remotes[0]
            .scheduled
            .iter()
            .map(|(at, msg)| match msg {
                Message::SetBrightness { level } => (at - now, *level),
                other => panic!("unexpected scheduled message {other:?}"),
            })
            .collect();
        let times: Vec<u64> = scheduled.iter().map(|(at, _)| *at).collect();
        assert_eq!(
            times,
            vec![50_000, 100_000, 150_000, 200_000, 250_000, 300_000]
        );
        for window in scheduled.windows(2) {
            assert!(window[0].1 > window[1].1, "fade must descend: {scheduled:?}");
        }
        assert!((scheduled.last().unwrap().1 - 0.3).abs() < f32::EPSILON);
    }

    #[tokio::test(start_paused = true)]
    async fn nullswitch_always_still_indicates() {
        let mut rig = rig(RigOptions {
            focus_hint: FocusHint {
                kind: FocusHintKind::FlashActive,
                brightness: 0.3,
                duration_us: 300_000,
                fade_steps: 4,
            },
            show_nullswitch: ShowNullswitch::Always,
            ..RigOptions::default()
        });

        // switching to the already-focused master: no state change but
        // the flash still runs, locally
        assert!(!rig.master.focus_node(Some(Node::Master), &[], true));
        assert_eq!(rig.platform.brightness_calls(), vec![0.3]);
        assert_eq!(rig.master.calls.len(), 4);

        // run the scheduled calls; the fade ends back at full
        let due = rig.master.calls.pop_due(rig.master.clock.now_us() + 300_000);
        for call in due {
            call(&mut rig.master);
        }
        assert_eq!(rig.platform.brightness_calls().last(), Some(&1.0));
    }

    #[tokio::test(start_paused = true)]
    async fn nullswitch_never_is_silent() {
        let mut rig = rig(RigOptions {
            focus_hint: FocusHint {
                kind: FocusHintKind::FlashActive,
                brightness: 0.3,
                duration_us: 300_000,
                fade_steps: 4,
            },
            ..RigOptions::default()
        });
        assert!(!rig.master.focus_node(Some(Node::Master), &[], true));
        assert!(rig.platform.brightness_calls().is_empty());
        assert!(rig.master.calls.is_empty());
    }

    #[tokio::test(start_paused = true)]
    async fn backlog_overflow_fails_the_remote() {
        let mut rig = rig(RigOptions::default());
        for _ in 0..link::OUTBOUND_BACKLOG {
            rig.master.enqueue(
                RemoteId(0),
                Message::MoveRel { dx: 1, dy: 0 },
            );
        }
        assert_eq!(rig.master.remotes[0].state, ConnState::Connected);
        rig.master
            .enqueue(RemoteId(0), Message::MoveRel { dx: 1, dy: 0 });
        assert_eq!(rig.master.remotes[0].state, ConnState::Failed);
    }

    #[tokio::test(start_paused = true)]
    async fn reconnect_action_only_touches_deadlines_on_healthy_remotes() {
        let mut rig = rig(RigOptions { remotes: 2, ..RigOptions::default() });
        rig.master.remotes[1].state = ConnState::PermFailed;
        rig.master.remotes[1].failcount = 11;

        rig.master.reconnect_all();

        let now = rig.master.clock.now_us();
        assert_eq!(rig.master.remotes[0].state, ConnState::Connected);
        assert_eq!(rig.master.remotes[0].failcount, 0);
        assert_eq!(rig.master.remotes[0].next_reconnect_time, now);
        assert_eq!(rig.master.remotes[1].state, ConnState::Failed);
        assert_eq!(rig.master.remotes[1].failcount, 0);
        assert_eq!(rig.master.remotes[1].next_reconnect_time, now);
    }

    #[tokio::test(start_paused = true)]
    async fn unexpected_message_type_fails_the_remote() {
        let mut rig = rig(RigOptions::default());
        rig.master
            .handle_message(RemoteId(0), Message::MoveRel { dx: 1, dy: 2 });
        assert_eq!(rig.master.remotes[0].state, ConnState::Failed);
    }

    #[tokio::test(start_paused = true)]
    async fn ready_outside_setup_fails_the_remote() {
        let mut rig = rig(RigOptions::default());
        rig.master.handle_message(RemoteId(0), Message::Ready);
        assert_eq!(rig.master.remotes[0].state, ConnState::Failed);
    }

    #[tokio::test(start_paused = true)]
    async fn setclipboard_from_non_connected_remote_is_ignored() {
        let mut rig = rig(RigOptions::default());
        rig.platform.set_clipboard("keep");
        rig.master.remotes[0].state = ConnState::SettingUp;
        rig.master.handle_message(
            RemoteId(0),
            Message::SetClipboard {
                text: "stolen".to_string(),
            },
        );
        assert_eq!(rig.platform.clipboard(), "keep");
        assert_eq!(rig.master.remotes[0].state, ConnState::SettingUp);
    }

    #[tokio::test(start_paused = true)]
    async fn invalid_edge_mask_fails_the_sender() {
        let mut rig = rig(RigOptions::default());
        rig.master.handle_message(
            RemoteId(0),
            Message::EdgeMaskChange {
                old: EdgeMask(0x10),
                new: EdgeMask(0),
                x: 0.0,
                y: 0.0,
            },
        );
        assert_eq!(rig.master.remotes[0].state, ConnState::Failed);
    }

    #[tokio::test(start_paused = true)]
    async fn out_of_sync_edge_events_are_ignored_not_fatal() {
        let mut rig = rig(RigOptions::default());
        let touching = EdgeMask::default().with(Direction::Left);
        let arrive = Message::EdgeMaskChange {
            old: EdgeMask::default(),
            new: touching,
            x: 0.0,
            y: 0.5,
        };
        rig.master.handle_message(RemoteId(0), arrive.clone());
        rig.master.handle_message(RemoteId(0), arrive);
        assert_eq!(rig.master.remotes[0].state, ConnState::Connected);
        assert_eq!(
            rig.master.remotes[0].edges.last_event(Direction::Left),
            Some(EdgeEvent::Arrive)
        );
    }

    #[tokio::test(start_paused = true)]
    async fn cannot_focus_a_remote_that_is_not_connected() {
        let mut rig = rig(RigOptions::default());
        rig.master.remotes[0].state = ConnState::SettingUp;
        assert!(!rig
            .master
            .focus_node(Some(Node::Remote(RemoteId(0))), &[], true));
        assert_eq!(rig.master.focused, None);
        assert!(!rig.platform.grabbed());
    }

    #[tokio::test(start_paused = true)]
    async fn stale_link_events_are_discarded() {
        let mut rig = rig(RigOptions::default());
        rig.master.remotes[0].generation = 5;
        rig.master.handle_event(link_closed(0, 4, "old reader"));
        assert_eq!(rig.master.remotes[0].state, ConnState::Connected);
    }

    #[tokio::test(start_paused = true)]
    async fn input_events_forward_only_while_a_remote_is_focused() {
        let mut rig = rig(RigOptions::default());

        rig.master.handle_platform_event(PlatformEvent::Key {
            key: KeyCode(30),
            state: PressRelease::Press,
        });
        assert!(drain(&mut rig.outbound[0]).is_empty());

        rig.master
            .focus_node(Some(Node::Remote(RemoteId(0))), &[], true);
        drain(&mut rig.outbound[0]);

        rig.master.handle_platform_event(PlatformEvent::Key {
            key: KeyCode(30),
            state: PressRelease::Press,
        });
        rig.master.handle_platform_event(PlatformEvent::Motion { dx: 4, dy: -2 });
        rig.master.handle_platform_event(PlatformEvent::Button {
            button: MouseButton::Left,
            state: PressRelease::Press,
        });

        let msgs = drain(&mut rig.outbound[0]);
        assert_eq!(
            msgs,
            vec![
                Message::KeyEvent {
                    key: KeyCode(30),
                    state: PressRelease::Press,
                },
                Message::MoveRel { dx: 4, dy: -2 },
                Message::ClickEvent {
                    button: MouseButton::Left,
                    state: PressRelease::Press,
                },
            ]
        );
    }

    #[tokio::test(start_paused = true)]
    async fn hotkey_dispatch_uses_the_drivers_modifier_snapshot() {
        let mut rig = rig(RigOptions::default());
        rig.master
            .hotkey_actions
            .insert(HotkeyId(0), HotkeyAction::Switch(Direction::Right));

        rig.master.handle_platform_event(PlatformEvent::Hotkey {
            id: HotkeyId(0),
            modifiers: vec![SHIFT],
        });

        assert_eq!(rig.master.focused, Some(RemoteId(0)));
        let msgs = drain(&mut rig.outbound[0]);
        assert!(msgs.contains(&Message::KeyEvent {
            key: SHIFT,
            state: PressRelease::Press,
        }));
    }

    #[tokio::test(start_paused = true)]
    async fn quit_hotkey_raises_the_quit_flag() {
        let mut rig = rig(RigOptions::default());
        rig.master
            .hotkey_actions
            .insert(HotkeyId(7), HotkeyAction::Quit);
        rig.master.handle_platform_event(PlatformEvent::Hotkey {
            id: HotkeyId(7),
            modifiers: vec![],
        });
        assert!(rig.master.quit);
    }

    #[tokio::test(start_paused = true)]
    async fn scheduled_messages_flush_when_due_and_feed_the_deadline() {
        tokio::time::advance(Duration::from_secs(1)).await;
        let mut rig = rig(RigOptions::default());
        let now = rig.master.clock.now_us();
        rig.master.remotes[0]
            .scheduled
            .schedule(Message::SetBrightness { level: 0.5 }, now + 100_000);

        assert_eq!(rig.master.next_deadline(), Some(now + 100_000));

        rig.master.flush_scheduled_messages(now + 50_000);
        assert!(drain(&mut rig.outbound[0]).is_empty());

        rig.master.flush_scheduled_messages(now + 100_000);
        assert_eq!(
            drain(&mut rig.outbound[0]),
            vec![Message::SetBrightness { level: 0.5 }]
        );
        assert_eq!(rig.master.next_deadline(), None);
    }

    #[tokio::test(start_paused = true)]
    async fn remote_to_remote_switch_asks_the_old_side_for_its_clipboard() {
        let mut rig = rig(RigOptions { remotes: 2, ..RigOptions::default() });
        rig.master
            .focus_node(Some(Node::Remote(RemoteId(0))), &[], true);
        drain(&mut rig.outbound[0]);
        let grabs_before = rig.platform.grab_count();

        assert!(rig
            .master
            .focus_node(Some(Node::Remote(RemoteId(1))), &[], true));

        let old = drain(&mut rig.outbound[0]);
        assert_eq!(old, vec![Message::GetClipboard]);
        // no clipboard push to the new side; the GetClipboard answer
        // will be forwarded when it arrives
        assert!(drain(&mut rig.outbound[1]).is_empty());
        // grabs were held the whole time, not re-acquired
        assert_eq!(rig.platform.grab_count(), grabs_before);
        assert!(rig.platform.grabbed());
    }
}
