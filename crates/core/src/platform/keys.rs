use std::fmt;
use std::str::FromStr;

use crate::error::AgentError;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Key {
    Ctrl,
    Shift,
    Alt,
    Meta,
    Enter,
    Tab,
    Escape,
    Backspace,
    Delete,
    Space,
    Up,
    Down,
    Left,
    Right,
    Home,
    End,
    PageUp,
    PageDown,
    F(u8),
    Char(char),
}

impl Key {
    pub fn is_modifier(&self) -> bool {
        matches!(self, Key::Ctrl | Key::Shift | Key::Alt | Key::Meta)
    }

    fn from_name(name: &str) -> Option<Key> {
        let lower = name.to_lowercase();
        let key = match lower.as_str() {
            "ctrl" | "control" => Key::Ctrl,
            "shift" => Key::Shift,
            "alt" | "option" => Key::Alt,
            "win" | "cmd" | "command" | "meta" | "super" => Key::Meta,
            "enter" | "return" => Key::Enter,
            "tab" => Key::Tab,
            "esc" | "escape" => Key::Escape,
            "backspace" => Key::Backspace,
            "delete" | "del" => Key::Delete,
            "space" => Key::Space,
            "up" => Key::Up,
            "down" => Key::Down,
            "left" => Key::Left,
            "right" => Key::Right,
            "home" => Key::Home,
            "end" => Key::End,
            "pageup" | "pgup" => Key::PageUp,
            "pagedown" | "pgdn" => Key::PageDown,
            _ => {
                let mut chars = lower.chars();
                match (chars.next(), chars.next()) {
                    (Some(c), None) => Key::Char(c),
                    (Some('f'), Some(_)) => {
                        let n: u8 = lower[1..].parse().ok()?;
                        if !(1..=24).contains(&n) {
                            return None;
                        }
                        Key::F(n)
                    }
                    _ => return None,
                }
            }
        };
        Some(key)
    }
}

impl fmt::Display for Key {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Key::Ctrl => write!(f, "ctrl"),
            Key::Shift => write!(f, "shift"),
            Key::Alt => write!(f, "alt"),
            Key::Meta => write!(f, "win"),
            Key::Enter => write!(f, "enter"),
            Key::Tab => write!(f, "tab"),
            Key::Escape => write!(f, "esc"),
            Key::Backspace => write!(f, "backspace"),
            Key::Delete => write!(f, "delete"),
            Key::Space => write!(f, "space"),
            Key::Up => write!(f, "up"),
            Key::Down => write!(f, "down"),
            Key::Left => write!(f, "left"),
            Key::Right => write!(f, "right"),
            Key::Home => write!(f, "home"),
            Key::End => write!(f, "end"),
            Key::PageUp => write!(f, "pageup"),
            Key::PageDown => write!(f, "pagedown"),
            Key::F(n) => write!(f, "f{}", n),
            Key::Char(c) => write!(f, "{}", c),
        }
    }
}

/// Keys pressed together, in order, then released in reverse (`ctrl+shift+p`).
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct KeyChord {
    keys: Vec<Key>,
}

impl KeyChord {
    pub fn single(key: Key) -> Self {
        Self { keys: vec![key] }
    }

    pub fn with_ctrl(c: char) -> Self {
        Self { keys: vec![Key::Ctrl, Key::Char(c)] }
    }

    pub fn keys(&self) -> &[Key] {
        &self.keys
    }

    pub fn paste() -> Self {
        Self::with_ctrl('v')
    }

    pub fn copy() -> Self {
        Self::with_ctrl('c')
    }

    pub fn select_all() -> Self {
        Self::with_ctrl('a')
    }

    pub fn enter() -> Self {
        Self::single(Key::Enter)
    }
}

impl FromStr for KeyChord {
    type Err = AgentError;

    fn from_str(spec: &str) -> Result<Self, Self::Err> {
        let keys = spec
            .split('+')
            .map(str::trim)
            .filter(|k| !k.is_empty())
            .map(|k| Key::from_name(k).ok_or_else(|| AgentError::config(format!("unknown key {:?} in hotkey {:?}", k, spec))))
            .collect::<Result<Vec<_>, _>>()?;
        if keys.is_empty() {
            return Err(AgentError::config(format!("empty hotkey {:?}", spec)));
        }
        Ok(Self { keys })
    }
}

impl fmt::Display for KeyChord {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let names: Vec<String> = self.keys.iter().map(Key::to_string).collect();
        write!(f, "{}", names.join("+"))
    }
}
