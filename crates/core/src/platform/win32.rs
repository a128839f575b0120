use std::ffi::c_void;
use std::mem::size_of;
use std::thread;
use std::time::Duration;

use image::RgbaImage;
use windows::Win32::Foundation::{BOOL, HWND, LPARAM, POINT, RECT};
use windows::Win32::Graphics::Gdi::{
    BitBlt, CreateCompatibleBitmap, CreateCompatibleDC, DeleteDC, DeleteObject, GetDC, GetDIBits,
    ReleaseDC, SelectObject, BITMAPINFO, BITMAPINFOHEADER, BI_RGB, DIB_RGB_COLORS, SRCCOPY,
};
use windows::Win32::System::Threading::AttachThreadInput;
use windows::Win32::UI::Input::KeyboardAndMouse::{
    SendInput, SetFocus, VkKeyScanW, INPUT, INPUT_0, INPUT_KEYBOARD, INPUT_MOUSE, KEYBDINPUT,
    KEYBD_EVENT_FLAGS, KEYEVENTF_KEYUP, MOUSEEVENTF_LEFTDOWN, MOUSEEVENTF_LEFTUP, MOUSEINPUT,
    MOUSE_EVENT_FLAGS, VIRTUAL_KEY,
};
use windows::Win32::UI::WindowsAndMessaging::{
    EnumWindows, GetCursorPos, GetForegroundWindow, GetSystemMetrics, GetWindowRect,
    GetWindowTextLengthW, GetWindowTextW, GetWindowThreadProcessId, IsIconic, IsWindowVisible,
    IsZoomed, SetCursorPos, SetForegroundWindow, ShowWindow, SM_CXSCREEN,
    SM_CYSCREEN, SW_RESTORE, SW_SHOW, SW_SHOWMAXIMIZED,
};

use crate::error::{AgentError, AgentResult};
use crate::logger;
use crate::types::*;
use super::keys::{Key, KeyChord};
use super::Platform;

pub struct Win32Platform;

impl Win32Platform {
    pub fn new() -> Self {
        Win32Platform
    }
}

impl Default for Win32Platform {
    fn default() -> Self {
        Self::new()
    }
}

fn hwnd_of(window: &TargetWindow) -> HWND {
    HWND(window.handle as usize as *mut c_void)
}

fn window_title(hwnd: HWND) -> String {
    unsafe {
        let len = GetWindowTextLengthW(hwnd);
        if len <= 0 {
            return String::new();
        }
        let mut buf = vec![0u16; len as usize + 1];
        let copied = GetWindowTextW(hwnd, &mut buf);
        String::from_utf16_lossy(&buf[..copied.max(0) as usize])
    }
}

unsafe extern "system" fn collect_window(hwnd: HWND, lparam: LPARAM) -> BOOL {
    let out = &mut *(lparam.0 as *mut Vec<HWND>);
    if IsWindowVisible(hwnd).as_bool() {
        out.push(hwnd);
    }
    BOOL(1)
}

fn vk_for(key: Key) -> Option<u16> {
    let vk = match key {
        Key::Ctrl => 0x11,
        Key::Shift => 0x10,
        Key::Alt => 0x12,
        Key::Meta => 0x5B,
        Key::Enter => 0x0D,
        Key::Tab => 0x09,
        Key::Escape => 0x1B,
        Key::Backspace => 0x08,
        Key::Delete => 0x2E,
        Key::Space => 0x20,
        Key::PageUp => 0x21,
        Key::PageDown => 0x22,
        Key::End => 0x23,
        Key::Home => 0x24,
        Key::Left => 0x25,
        Key::Up => 0x26,
        Key::Right => 0x27,
        Key::Down => 0x28,
        Key::F(n) => 0x70 + (n as u16 - 1),
        Key::Char(c) if c.is_ascii_alphabetic() => c.to_ascii_uppercase() as u16,
        Key::Char(c) if c.is_ascii_digit() => c as u16,
        Key::Char(c) => {
            let mut units = [0u16; 2];
            if c.encode_utf16(&mut units).len() != 1 {
                return None;
            }
            let scan = unsafe { VkKeyScanW(units[0]) };
            if scan == -1 {
                return None;
            }
            (scan as u16) & 0xFF
        }
    };
    Some(vk)
}

fn key_input(vk: u16, up: bool) -> INPUT {
    INPUT {
        r#type: INPUT_KEYBOARD,
        Anonymous: INPUT_0 {
            ki: KEYBDINPUT {
                wVk: VIRTUAL_KEY(vk),
                wScan: 0,
                dwFlags: if up { KEYEVENTF_KEYUP } else { KEYBD_EVENT_FLAGS(0) },
                time: 0,
                dwExtraInfo: 0,
            },
        },
    }
}

fn mouse_input(flags: MOUSE_EVENT_FLAGS) -> INPUT {
    INPUT {
        r#type: INPUT_MOUSE,
        Anonymous: INPUT_0 {
            mi: MOUSEINPUT { dx: 0, dy: 0, mouseData: 0, dwFlags: flags, time: 0, dwExtraInfo: 0 },
        },
    }
}

fn send(inputs: &[INPUT]) -> AgentResult<()> {
    let sent = unsafe { SendInput(inputs, size_of::<INPUT>() as i32) };
    if sent as usize != inputs.len() {
        return Err(AgentError::platform(format!(
            "SendInput delivered {} of {} events",
            sent,
            inputs.len()
        )));
    }
    Ok(())
}

fn move_cursor(at: Point) -> AgentResult<()> {
    unsafe { SetCursorPos(at.x, at.y) }.map_err(|e| AgentError::platform(format!("SetCursorPos: {}", e)))
}

fn clipboard() -> AgentResult<arboard::Clipboard> {
    arboard::Clipboard::new().map_err(|e| AgentError::platform(format!("clipboard unavailable: {}", e)))
}

impl Platform for Win32Platform {
    fn name(&self) -> &'static str {
        "win32"
    }

    fn find_windows(&self, title_filter: &str) -> AgentResult<Vec<TargetWindow>> {
        let mut handles: Vec<HWND> = Vec::new();
        unsafe {
            EnumWindows(Some(collect_window), LPARAM(&mut handles as *mut Vec<HWND> as isize))
                .map_err(|e| AgentError::platform(format!("EnumWindows: {}", e)))?;
        }

        let needle = title_filter.to_lowercase();
        let foreground = unsafe { GetForegroundWindow() };
        let mut found = Vec::new();
        for hwnd in handles {
            let title = window_title(hwnd);
            if title.is_empty() || !title.to_lowercase().contains(&needle) {
                continue;
            }
            let mut rect = RECT::default();
            let _ = unsafe { GetWindowRect(hwnd, &mut rect) };
            let window = TargetWindow {
                handle: hwnd.0 as usize as WindowId,
                title,
                is_active: hwnd == foreground,
                is_minimized: unsafe { IsIconic(hwnd) }.as_bool(),
                is_maximized: unsafe { IsZoomed(hwnd) }.as_bool(),
                width: rect.right - rect.left,
                height: rect.bottom - rect.top,
            };
            logger::debug_p("win32", &format!("found window: \"{}\" (hwnd: {})", window.title, window.handle));
            found.push(window);
        }
        Ok(found)
    }

    fn activate(&self, window: &TargetWindow) -> AgentResult<()> {
        let hwnd = hwnd_of(window);
        unsafe {
            if IsIconic(hwnd).as_bool() {
                let _ = ShowWindow(hwnd, SW_RESTORE);
            } else if IsZoomed(hwnd).as_bool() {
                let _ = ShowWindow(hwnd, SW_SHOWMAXIMIZED);
            } else {
                let _ = ShowWindow(hwnd, SW_SHOW);
            }

            let foreground = GetForegroundWindow();
            let current_tid = GetWindowThreadProcessId(foreground, None);
            let target_tid = GetWindowThreadProcessId(hwnd, None);
            let attach = current_tid != 0 && current_tid != target_tid;
            if attach {
                let _ = AttachThreadInput(current_tid, target_tid, BOOL::from(true));
            }
            let ok = SetForegroundWindow(hwnd).as_bool();
            let _ = SetFocus(hwnd);
            if attach {
                let _ = AttachThreadInput(current_tid, target_tid, BOOL::from(false));
            }

            if !ok && GetForegroundWindow() != hwnd {
                return Err(AgentError::platform(format!(
                    "SetForegroundWindow refused for \"{}\"",
                    window.title
                )));
            }
        }
        Ok(())
    }

    fn screen_size(&self) -> (i32, i32) {
        unsafe { (GetSystemMetrics(SM_CXSCREEN), GetSystemMetrics(SM_CYSCREEN)) }
    }

    fn cursor_position(&self) -> AgentResult<Point> {
        let mut p = POINT::default();
        unsafe { GetCursorPos(&mut p) }.map_err(|e| AgentError::platform(format!("GetCursorPos: {}", e)))?;
        Ok(Point::new(p.x, p.y))
    }

    fn click(&self, at: Point) -> AgentResult<()> {
        move_cursor(at)?;
        thread::sleep(Duration::from_millis(15));
        send(&[mouse_input(MOUSEEVENTF_LEFTDOWN), mouse_input(MOUSEEVENTF_LEFTUP)])
    }

    fn drag(&self, from: Point, to: Point) -> AgentResult<()> {
        move_cursor(from)?;
        thread::sleep(Duration::from_millis(15));
        send(&[mouse_input(MOUSEEVENTF_LEFTDOWN)])?;
        // Intermediate moves so the target sees a real drag, not a jump.
        for step in 1..=10 {
            let x = from.x + (to.x - from.x) * step / 10;
            let y = from.y + (to.y - from.y) * step / 10;
            move_cursor(Point::new(x, y))?;
            thread::sleep(Duration::from_millis(20));
        }
        send(&[mouse_input(MOUSEEVENTF_LEFTUP)])
    }

    fn send_keys(&self, chord: &KeyChord) -> AgentResult<()> {
        let mut vks = Vec::new();
        for key in chord.keys() {
            match vk_for(*key) {
                Some(vk) => vks.push(vk),
                None => return Err(AgentError::platform(format!("no virtual key for {}", key))),
            }
        }
        let mut inputs: Vec<INPUT> = vks.iter().map(|vk| key_input(*vk, false)).collect();
        inputs.extend(vks.iter().rev().map(|vk| key_input(*vk, true)));
        send(&inputs)?;
        thread::sleep(Duration::from_millis(30));
        Ok(())
    }

    fn clipboard_text(&self) -> AgentResult<String> {
        // Non-text clipboard content reads as empty.
        Ok(clipboard()?.get_text().unwrap_or_default())
    }

    fn set_clipboard_text(&self, text: &str) -> AgentResult<()> {
        clipboard()?
            .set_text(text.to_string())
            .map_err(|e| AgentError::platform(format!("clipboard write failed: {}", e)))
    }

    fn capture_screen(&self) -> AgentResult<RgbaImage> {
        unsafe {
            let (width, height) = self.screen_size();
            if width <= 0 || height <= 0 {
                return Err(AgentError::platform("screen has no area"));
            }

            let screen_dc = GetDC(HWND::default());
            let mem_dc = CreateCompatibleDC(screen_dc);
            let bitmap = CreateCompatibleBitmap(screen_dc, width, height);
            let previous = SelectObject(mem_dc, bitmap);

            let blit = BitBlt(mem_dc, 0, 0, width, height, screen_dc, 0, 0, SRCCOPY);

            let mut info = BITMAPINFO {
                bmiHeader: BITMAPINFOHEADER {
                    biSize: size_of::<BITMAPINFOHEADER>() as u32,
                    biWidth: width,
                    biHeight: -height, // top-down rows
                    biPlanes: 1,
                    biBitCount: 32,
                    biCompression: BI_RGB.0,
                    ..Default::default()
                },
                ..Default::default()
            };
            let mut bgra = vec![0u8; (width * height * 4) as usize];
            let lines = GetDIBits(
                mem_dc,
                bitmap,
                0,
                height as u32,
                Some(bgra.as_mut_ptr() as *mut c_void),
                &mut info,
                DIB_RGB_COLORS,
            );

            SelectObject(mem_dc, previous);
            let _ = DeleteObject(bitmap);
            let _ = DeleteDC(mem_dc);
            ReleaseDC(HWND::default(), screen_dc);

            blit.map_err(|e| AgentError::platform(format!("BitBlt: {}", e)))?;
            if lines == 0 {
                return Err(AgentError::platform("GetDIBits returned no rows"));
            }

            for px in bgra.chunks_exact_mut(4) {
                px.swap(0, 2);
                px[3] = 255;
            }
            RgbaImage::from_raw(width as u32, height as u32, bgra)
                .ok_or_else(|| AgentError::platform("capture buffer size mismatch"))
        }
    }
}
