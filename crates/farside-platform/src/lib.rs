//! Platform-driver seam for farside.
//!
//! The [`Platform`] trait is everything the control plane asks of the
//! display layer: grabbing input, warping the pointer, clipboard and
//! gamma access, hotkey binding, and (on the subordinate side) event
//! injection. Display-server backends (X11, Wayland) plug in behind
//! this trait in later phases; [`mock::MockPlatform`] is the complete
//! reference implementation used by the test suites.

use async_trait::async_trait;
use farside_types::{EdgeMask, KeyCode, MouseButton, Point, PressRelease};
use tokio::sync::mpsc;

pub mod error;
pub mod mock;

pub use error::PlatformError;

/// Identifies a bound hotkey combination.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct HotkeyId(pub u32);

/// Events the driver delivers to the control plane.
#[derive(Debug, Clone, PartialEq)]
pub enum PlatformEvent {
    /// A grabbed key press or release (master side, while focus is
    /// away).
    Key { key: KeyCode, state: PressRelease },

    /// Grabbed relative pointer motion.
    Motion { dx: i32, dy: i32 },

    /// A grabbed mouse button press or release.
    Button {
        button: MouseButton,
        state: PressRelease,
    },

    /// The local cursor entered or left screen-edge bands.
    EdgeMask {
        old: EdgeMask,
        new: EdgeMask,
        x: f32,
        y: f32,
    },

    /// A bound hotkey fired. `modifiers` is the driver's snapshot of
    /// the modifier keys held at the moment of the chord.
    Hotkey {
        id: HotkeyId,
        modifiers: Vec<KeyCode>,
    },
}

/// The display-layer driver.
///
/// Apart from [`start`](Self::start), calls are synchronous: the
/// control plane is single-threaded and the only operation allowed to
/// stall is clipboard acquisition, which the driver bounds internally
/// (~100 ms).
#[async_trait]
pub trait Platform: Send + 'static {
    /// Start the driver's event pump, delivering events to `tx`.
    async fn start(&mut self, tx: mpsc::Sender<PlatformEvent>) -> Result<(), PlatformError>;

    /// Grab keyboard and pointer so local input is captured instead of
    /// delivered to local applications.
    fn grab_inputs(&mut self) -> Result<(), PlatformError>;

    /// Release a previous grab.
    fn ungrab_inputs(&mut self);

    fn mouse_pos(&mut self) -> Point;
    fn set_mouse_pos(&mut self, pos: Point);

    /// Place the pointer at a screen-relative position (0.0..=1.0).
    fn set_mouse_pos_screenrel(&mut self, x: f32, y: f32);

    fn screen_center(&self) -> Point;

    /// Read the clipboard as text. Bounded wait inside the driver.
    fn clipboard_text(&mut self) -> String;
    fn set_clipboard_text(&mut self, text: &str);

    fn display_brightness(&self) -> f32;
    fn set_display_brightness(&mut self, level: f32);

    /// Bind a key-combination string. Collisions and unparsable
    /// combinations are errors; the caller treats them as fatal.
    fn bind_hotkey(&mut self, combo: &str) -> Result<HotkeyId, PlatformError>;

    /// Snapshot of the modifier keys currently held.
    fn current_modifiers(&self) -> Vec<KeyCode>;

    /// Replay a key event (subordinate side).
    fn inject_key(&mut self, key: KeyCode, state: PressRelease);

    /// Replay a mouse button event (subordinate side).
    fn inject_button(&mut self, button: MouseButton, state: PressRelease);

    /// Replay relative pointer motion (subordinate side).
    fn move_mouse_rel(&mut self, dx: i32, dy: i32);

    /// Tear down driver state on shutdown.
    fn shutdown(&mut self) {}
}

/// The display-server backend compiled into this build, if any.
///
/// Backends are a later phase; until one lands this reports that the
/// build has no driver, and the binary exits with a startup error.
pub fn default_platform() -> Result<Box<dyn Platform>, PlatformError> {
    Err(PlatformError::NoBackend)
}
