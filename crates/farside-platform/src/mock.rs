//! Mock driver for tests.
//!
//! Records every call the control plane makes and lets tests inject
//! platform events through a feed channel.

use std::sync::{Arc, Mutex};

use async_trait::async_trait;
use farside_types::{KeyCode, MouseButton, Point, PressRelease};
use tokio::sync::mpsc;

use crate::error::PlatformError;
use crate::{HotkeyId, Platform, PlatformEvent};

const MOCK_SCREEN_WIDTH: i32 = 1920;
const MOCK_SCREEN_HEIGHT: i32 = 1080;

/// An event replayed through the injection half of the trait.
#[derive(Debug, Clone, PartialEq)]
pub enum InjectedInput {
    Key { key: KeyCode, state: PressRelease },
    Button {
        button: MouseButton,
        state: PressRelease,
    },
    MoveRel { dx: i32, dy: i32 },
}

#[derive(Debug, Default)]
struct MockState {
    grabbed: bool,
    grab_count: u32,
    ungrab_count: u32,
    mouse: Point,
    screenrel_moves: Vec<(f32, f32)>,
    clipboard: String,
    brightness: f32,
    brightness_calls: Vec<f32>,
    bound_hotkeys: Vec<String>,
    modifiers: Vec<KeyCode>,
    injected: Vec<InjectedInput>,
    warps: Vec<Point>,
    shutdown: bool,
}

/// Mock driver backend.
pub struct MockPlatform {
    state: Arc<Mutex<MockState>>,
    feed_rx: Option<mpsc::Receiver<PlatformEvent>>,
}

impl MockPlatform {
    /// Create a mock driver plus a sender tests use to inject platform
    /// events once the pump is started.
    pub fn new() -> (Self, mpsc::Sender<PlatformEvent>) {
        let (feed_tx, feed_rx) = mpsc::channel(1024);
        let platform = Self {
            state: Arc::new(Mutex::new(MockState {
                brightness: 1.0,
                ..MockState::default()
            })),
            feed_rx: Some(feed_rx),
        };
        (platform, feed_tx)
    }

    /// Clonable observer handle for inspecting recorded calls.
    pub fn handle(&self) -> MockPlatformHandle {
        MockPlatformHandle {
            state: Arc::clone(&self.state),
        }
    }
}

/// Observer handle for [`MockPlatform`].
#[derive(Clone)]
pub struct MockPlatformHandle {
    state: Arc<Mutex<MockState>>,
}

impl MockPlatformHandle {
    pub fn grabbed(&self) -> bool {
        self.state.lock().unwrap().grabbed
    }

    pub fn grab_count(&self) -> u32 {
        self.state.lock().unwrap().grab_count
    }

    pub fn ungrab_count(&self) -> u32 {
        self.state.lock().unwrap().ungrab_count
    }

    pub fn mouse_pos(&self) -> Point {
        self.state.lock().unwrap().mouse
    }

    /// Preload the pointer position tests expect the master to save.
    pub fn set_mouse_pos(&self, pos: Point) {
        self.state.lock().unwrap().mouse = pos;
    }

    pub fn screenrel_moves(&self) -> Vec<(f32, f32)> {
        self.state.lock().unwrap().screenrel_moves.clone()
    }

    pub fn clipboard(&self) -> String {
        self.state.lock().unwrap().clipboard.clone()
    }

    /// Preload clipboard contents.
    pub fn set_clipboard(&self, text: &str) {
        self.state.lock().unwrap().clipboard = text.to_string();
    }

    /// Every brightness level the control plane set, in order.
    pub fn brightness_calls(&self) -> Vec<f32> {
        self.state.lock().unwrap().brightness_calls.clone()
    }

    pub fn bound_hotkeys(&self) -> Vec<String> {
        self.state.lock().unwrap().bound_hotkeys.clone()
    }

    /// Preload the held-modifier snapshot.
    pub fn set_modifiers(&self, modifiers: Vec<KeyCode>) {
        self.state.lock().unwrap().modifiers = modifiers;
    }

    pub fn injected(&self) -> Vec<InjectedInput> {
        self.state.lock().unwrap().injected.clone()
    }

    /// Every absolute warp the control plane performed, in order.
    pub fn warps(&self) -> Vec<Point> {
        self.state.lock().unwrap().warps.clone()
    }

    pub fn is_shutdown(&self) -> bool {
        self.state.lock().unwrap().shutdown
    }
}

#[async_trait]
impl Platform for MockPlatform {
    async fn start(&mut self, tx: mpsc::Sender<PlatformEvent>) -> Result<(), PlatformError> {
        let mut feed_rx = self
            .feed_rx
            .take()
            .ok_or_else(|| PlatformError::Init("mock driver already started".to_string()))?;
        tokio::spawn(async move {
            while let Some(event) = feed_rx.recv().await {
                if tx.send(event).await.is_err() {
                    break;
                }
            }
        });
        Ok(())
    }

    fn grab_inputs(&mut self) -> Result<(), PlatformError> {
        let mut state = self.state.lock().unwrap();
        state.grabbed = true;
        state.grab_count += 1;
        Ok(())
    }

    fn ungrab_inputs(&mut self) {
        let mut state = self.state.lock().unwrap();
        state.grabbed = false;
        state.ungrab_count += 1;
    }

    fn mouse_pos(&mut self) -> Point {
        self.state.lock().unwrap().mouse
    }

    fn set_mouse_pos(&mut self, pos: Point) {
        let mut state = self.state.lock().unwrap();
        state.mouse = pos;
        state.warps.push(pos);
    }

    fn set_mouse_pos_screenrel(&mut self, x: f32, y: f32) {
        let mut state = self.state.lock().unwrap();
        state.screenrel_moves.push((x, y));
        state.mouse = Point::new(
            (x * MOCK_SCREEN_WIDTH as f32) as i32,
            (y * MOCK_SCREEN_HEIGHT as f32) as i32,
        );
    }

    fn screen_center(&self) -> Point {
        Point::new(MOCK_SCREEN_WIDTH / 2, MOCK_SCREEN_HEIGHT / 2)
    }

    fn clipboard_text(&mut self) -> String {
        self.state.lock().unwrap().clipboard.clone()
    }

    fn set_clipboard_text(&mut self, text: &str) {
        self.state.lock().unwrap().clipboard = text.to_string();
    }

    fn display_brightness(&self) -> f32 {
        self.state.lock().unwrap().brightness
    }

    fn set_display_brightness(&mut self, level: f32) {
        let mut state = self.state.lock().unwrap();
        state.brightness = level;
        state.brightness_calls.push(level);
    }

    fn bind_hotkey(&mut self, combo: &str) -> Result<HotkeyId, PlatformError> {
        let mut state = self.state.lock().unwrap();
        if state.bound_hotkeys.iter().any(|k| k == combo) {
            return Err(PlatformError::HotkeyBind {
                combo: combo.to_string(),
                reason: "already bound".to_string(),
            });
        }
        state.bound_hotkeys.push(combo.to_string());
        Ok(HotkeyId(u32::try_from(state.bound_hotkeys.len() - 1).unwrap_or(u32::MAX)))
    }

    fn current_modifiers(&self) -> Vec<KeyCode> {
        self.state.lock().unwrap().modifiers.clone()
    }

    fn inject_key(&mut self, key: KeyCode, state: PressRelease) {
        self.state
            .lock()
            .unwrap()
            .injected
            .push(InjectedInput::Key { key, state });
    }

    fn inject_button(&mut self, button: MouseButton, state: PressRelease) {
        self.state
            .lock()
            .unwrap()
            .injected
            .push(InjectedInput::Button { button, state });
    }

    fn move_mouse_rel(&mut self, dx: i32, dy: i32) {
        let mut state = self.state.lock().unwrap();
        state.mouse.x += dx;
        state.mouse.y += dy;
        state.injected.push(InjectedInput::MoveRel { dx, dy });
    }

    fn shutdown(&mut self) {
        self.state.lock().unwrap().shutdown = true;
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn feed_events_reach_the_pump() {
        let (mut platform, feed) = MockPlatform::new();
        let (tx, mut rx) = mpsc::channel(8);
        platform.start(tx).await.unwrap();

        feed.send(PlatformEvent::Motion { dx: 3, dy: -1 })
            .await
            .unwrap();
        let got = rx.recv().await.unwrap();
        assert_eq!(got, PlatformEvent::Motion { dx: 3, dy: -1 });
    }

    #[test]
    fn duplicate_hotkey_binding_fails() {
        let (mut platform, _feed) = MockPlatform::new();
        platform.bind_hotkey("ctrl+alt+l").unwrap();
        assert!(matches!(
            platform.bind_hotkey("ctrl+alt+l"),
            Err(PlatformError::HotkeyBind { .. })
        ));
    }

    #[test]
    fn records_grabs_and_warps() {
        let (mut platform, _feed) = MockPlatform::new();
        let handle = platform.handle();

        platform.grab_inputs().unwrap();
        assert!(handle.grabbed());
        platform.set_mouse_pos(Point::new(10, 20));
        platform.ungrab_inputs();
        assert!(!handle.grabbed());
        assert_eq!(handle.warps(), vec![Point::new(10, 20)]);
    }
}
