use std::collections::VecDeque;
use std::sync::Mutex;

use image::{Rgba, RgbaImage};

use crate::error::{AgentError, AgentResult};
use crate::types::*;
use crate::logger;
use super::keys::KeyChord;
use super::Platform;

/// In-memory desktop: logs every call and simulates a chat panel that
/// answers whatever was pasted into it.
pub struct StubPlatform {
    state: Mutex<StubState>,
}

struct StubState {
    windows: Vec<TargetWindow>,
    screen: Option<RgbaImage>,
    screen_size: (i32, i32),
    cursor: Point,
    clipboard: String,
    last_pasted: Option<String>,
    copy_chords: Vec<KeyChord>,
    copy_script: VecDeque<Option<String>>,
    activation_failures: u32,
    actions: Vec<String>,
}

impl StubPlatform {
    pub fn new() -> Self {
        let window = TargetWindow {
            handle: 30001,
            title: "chat.md - Stub IDE - Visual Studio Code".into(),
            is_active: true,
            is_minimized: false,
            is_maximized: false,
            width: 1600,
            height: 900,
        };
        Self {
            state: Mutex::new(StubState {
                windows: vec![window],
                screen: None,
                screen_size: (1920, 1080),
                cursor: Point::new(960, 540),
                clipboard: String::new(),
                last_pasted: None,
                copy_chords: vec![KeyChord::copy()],
                copy_script: VecDeque::new(),
                activation_failures: 0,
                actions: Vec::new(),
            }),
        }
    }

    pub fn with_windows(self, windows: Vec<TargetWindow>) -> Self {
        self.lock().windows = windows;
        self
    }

    /// Use `image` for screen captures (and its size as the screen size).
    pub fn with_screen(self, image: RgbaImage) -> Self {
        {
            let mut s = self.lock();
            s.screen_size = (image.width() as i32, image.height() as i32);
            s.screen = Some(image);
        }
        self
    }

    /// Extra chord that behaves like ctrl+c.
    pub fn with_copy_chord(self, chord: KeyChord) -> Self {
        self.lock().copy_chords.push(chord);
        self
    }

    /// Queue what each copy gesture puts on the clipboard; `None` leaves it unchanged.
    pub fn script_copies<I: IntoIterator<Item = Option<String>>>(self, copies: I) -> Self {
        self.lock().copy_script.extend(copies);
        self
    }

    /// Make the next `n` activation attempts fail.
    pub fn fail_activations(self, n: u32) -> Self {
        self.lock().activation_failures = n;
        self
    }

    pub fn set_cursor(&self, at: Point) {
        self.lock().cursor = at;
    }

    /// Everything the agent did to this desktop, oldest first.
    pub fn actions(&self) -> Vec<String> {
        self.lock().actions.clone()
    }

    fn lock(&self) -> std::sync::MutexGuard<'_, StubState> {
        match self.state.lock() {
            Ok(guard) => guard,
            Err(poisoned) => poisoned.into_inner(),
        }
    }

    fn record(state: &mut StubState, action: String) {
        logger::info_p("stub", &action);
        state.actions.push(action);
    }
}

impl Default for StubPlatform {
    fn default() -> Self {
        Self::new()
    }
}

impl Platform for StubPlatform {
    fn name(&self) -> &'static str {
        "stub"
    }

    fn find_windows(&self, title_filter: &str) -> AgentResult<Vec<TargetWindow>> {
        let mut s = self.lock();
        Self::record(&mut s, format!("find_windows(\"{}\")", title_filter));
        let needle = title_filter.to_lowercase();
        Ok(s.windows
            .iter()
            .filter(|w| w.title.to_lowercase().contains(&needle))
            .cloned()
            .collect())
    }

    fn activate(&self, window: &TargetWindow) -> AgentResult<()> {
        let mut s = self.lock();
        Self::record(&mut s, format!("activate({})", window.handle));
        if s.activation_failures > 0 {
            s.activation_failures -= 1;
            return Err(AgentError::platform("SetForegroundWindow refused"));
        }
        for w in s.windows.iter_mut() {
            w.is_active = w.handle == window.handle;
            if w.handle == window.handle {
                w.is_minimized = false;
            }
        }
        Ok(())
    }

    fn screen_size(&self) -> (i32, i32) {
        self.lock().screen_size
    }

    fn cursor_position(&self) -> AgentResult<Point> {
        Ok(self.lock().cursor)
    }

    fn click(&self, at: Point) -> AgentResult<()> {
        let mut s = self.lock();
        s.cursor = at;
        Self::record(&mut s, format!("click({})", at));
        Ok(())
    }

    fn drag(&self, from: Point, to: Point) -> AgentResult<()> {
        let mut s = self.lock();
        s.cursor = to;
        Self::record(&mut s, format!("drag({} -> {})", from, to));
        Ok(())
    }

    fn send_keys(&self, chord: &KeyChord) -> AgentResult<()> {
        let mut guard = self.lock();
        let s = &mut *guard;
        Self::record(s, format!("keys({})", chord));

        if *chord == KeyChord::paste() {
            s.last_pasted = Some(s.clipboard.clone());
        } else if s.copy_chords.contains(chord) {
            let copied = match s.copy_script.pop_front() {
                Some(scripted) => scripted,
                None => s
                    .last_pasted
                    .as_ref()
                    .map(|q| format!("You: {}\nAssistant: stub reply to: {}", q, q)),
            };
            if let Some(text) = copied {
                s.clipboard = text;
            }
        }
        Ok(())
    }

    fn clipboard_text(&self) -> AgentResult<String> {
        Ok(self.lock().clipboard.clone())
    }

    fn set_clipboard_text(&self, text: &str) -> AgentResult<()> {
        let mut s = self.lock();
        s.clipboard = text.to_string();
        Self::record(&mut s, format!("set_clipboard({} chars)", text.chars().count()));
        Ok(())
    }

    fn capture_screen(&self) -> AgentResult<RgbaImage> {
        let s = self.lock();
        if let Some(img) = &s.screen {
            return Ok(img.clone());
        }
        let (w, h) = s.screen_size;
        Ok(RgbaImage::from_pixel(w as u32, h as u32, Rgba([32, 32, 40, 255])))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn simulated_chat_echoes_pasted_question() {
        let p = StubPlatform::new();
        p.set_clipboard_text("what is 6*7?").unwrap();
        p.send_keys(&KeyChord::paste()).unwrap();
        p.set_clipboard_text("sentinel").unwrap();
        p.send_keys(&KeyChord::copy()).unwrap();
        assert_eq!(
            p.clipboard_text().unwrap(),
            "You: what is 6*7?\nAssistant: stub reply to: what is 6*7?"
        );
    }

    #[test]
    fn scripted_copy_can_leave_clipboard_unchanged() {
        let p = StubPlatform::new().script_copies([None, Some("Assistant: hi".to_string())]);
        p.set_clipboard_text("sentinel").unwrap();
        p.send_keys(&KeyChord::copy()).unwrap();
        assert_eq!(p.clipboard_text().unwrap(), "sentinel");
        p.send_keys(&KeyChord::copy()).unwrap();
        assert_eq!(p.clipboard_text().unwrap(), "Assistant: hi");
    }

    #[test]
    fn find_windows_is_case_insensitive() {
        let p = StubPlatform::new();
        assert_eq!(p.find_windows("visual studio").unwrap().len(), 1);
        assert!(p.find_windows("Cursor").unwrap().is_empty());
    }
}
