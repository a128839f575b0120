pub mod keys;
pub mod stub;

#[cfg(target_os = "windows")]
pub mod win32;

use image::RgbaImage;

use crate::error::AgentResult;
use crate::types::*;
use crate::logger;
use self::keys::KeyChord;

/// Desktop automation primitives the agent drives.
///
/// Everything here touches global OS state (foreground window, cursor,
/// keyboard, clipboard), so callers use one platform from one thread.
pub trait Platform: Send {
    fn name(&self) -> &'static str;

    /// Visible top-level windows whose title contains `title_filter` (case-insensitive).
    fn find_windows(&self, title_filter: &str) -> AgentResult<Vec<TargetWindow>>;
    /// One activation attempt: restore or re-show, then bring to foreground.
    fn activate(&self, window: &TargetWindow) -> AgentResult<()>;

    fn screen_size(&self) -> (i32, i32);
    fn cursor_position(&self) -> AgentResult<Point>;
    fn click(&self, at: Point) -> AgentResult<()>;
    /// Press at `from`, move to `to`, release.
    fn drag(&self, from: Point, to: Point) -> AgentResult<()>;
    fn send_keys(&self, chord: &KeyChord) -> AgentResult<()>;

    fn clipboard_text(&self) -> AgentResult<String>;
    fn set_clipboard_text(&self, text: &str) -> AgentResult<()>;

    /// Primary-screen capture, in the same coordinates as `click`.
    fn capture_screen(&self) -> AgentResult<RgbaImage>;
}

/// Create the platform appropriate for the current OS.
pub fn create_platform(force_stub: bool) -> Box<dyn Platform> {
    if force_stub {
        logger::register_prefix("stub", logger::COLOR_GRAY);
        return Box::new(stub::StubPlatform::new());
    }
    #[cfg(target_os = "windows")]
    {
        logger::register_prefix("win32", logger::COLOR_GRAY);
        return Box::new(win32::Win32Platform::new());
    }
    #[cfg(not(target_os = "windows"))]
    {
        logger::register_prefix("stub", logger::COLOR_GRAY);
        logger::warn("GUI automation is only implemented for Windows; using the stub platform");
        return Box::new(stub::StubPlatform::new());
    }
}
