use std::path::{Path, PathBuf};
use std::str::FromStr;
use std::time::Duration;

use crate::error::{AgentError, AgentResult};
use crate::platform::keys::KeyChord;
use crate::types::*;

pub const DEFAULT_ANSWER_MARKERS: &str = "Assistant:,AI:,Codex:,Claude:,Cursor:,Antigravity:,답변:,Assistant";

/// Every IDE_* key the agent reads, in status-report order.
pub const IDE_KEYS: &[&str] = &[
    "IDE_TARGET",
    "IDE_WINDOW_TITLE_SUBSTR",
    "IDE_OPEN_CHAT_HOTKEY",
    "IDE_CHAT_FOCUS_HOTKEY",
    "IDE_FOCUS_TRANSCRIPT_HOTKEY",
    "IDE_COPY_TRANSCRIPT_HOTKEY",
    "IDE_INPUT_POS",
    "IDE_OUTPUT_POS",
    "IDE_INPUT_REGION",
    "IDE_OUTPUT_REGION",
    "IDE_INPUT_IMAGE",
    "IDE_OUTPUT_IMAGE",
    "IDE_IMAGE_TIMEOUT_SEC",
    "IDE_IMAGE_CONFIDENCE",
    "IDE_LEARN_TEMPLATE_W",
    "IDE_LEARN_TEMPLATE_H",
    "IDE_LEARN_COUNTDOWN_SEC",
    "IDE_RESPONSE_WAIT_SEC",
    "IDE_RETRY_COUNT",
    "IDE_RETRY_WAIT_SEC",
];

#[derive(Debug, Clone, PartialEq)]
pub struct Backend {
    pub url: String,
    pub key: String,
}

/// How to find, focus and read the IDE chat panel.
#[derive(Debug, Clone, PartialEq)]
pub struct InteractionProfile {
    pub target: String,
    pub window_title_filter: String,
    pub open_chat_hotkey: Option<KeyChord>,
    pub focus_input_hotkey: Option<KeyChord>,
    pub focus_transcript_hotkey: Option<KeyChord>,
    pub copy_transcript_hotkey: Option<KeyChord>,
    pub input_point: Option<Point>,
    pub output_point: Option<Point>,
    pub input_region: Option<Region>,
    pub output_region: Option<Region>,
    pub input_template: Option<PathBuf>,
    pub output_template: Option<PathBuf>,
    pub image_timeout: Duration,
    pub image_confidence: f32,
    pub learn_template_width: i32,
    pub learn_template_height: i32,
    pub learn_countdown: Duration,
    pub response_wait: Duration,
    pub retry_count: u32,
    pub retry_wait: Duration,
    pub answer_markers: String,
}

impl Default for InteractionProfile {
    fn default() -> Self {
        Self {
            target: "vscode".into(),
            window_title_filter: String::new(),
            open_chat_hotkey: None,
            focus_input_hotkey: None,
            focus_transcript_hotkey: None,
            copy_transcript_hotkey: None,
            input_point: None,
            output_point: None,
            input_region: None,
            output_region: None,
            input_template: None,
            output_template: None,
            image_timeout: Duration::from_secs(4),
            image_confidence: 0.85,
            learn_template_width: 320,
            learn_template_height: 160,
            learn_countdown: Duration::from_secs(5),
            response_wait: Duration::from_secs(15),
            retry_count: 2,
            retry_wait: Duration::from_secs(5),
            answer_markers: DEFAULT_ANSWER_MARKERS.into(),
        }
    }
}

impl InteractionProfile {
    pub fn require_window_filter(&self) -> AgentResult<&str> {
        if self.window_title_filter.is_empty() {
            return Err(AgentError::config(
                "IDE_WINDOW_TITLE_SUBSTR is required for IDE chat automation.",
            ));
        }
        Ok(&self.window_title_filter)
    }
}

/// Everything the agent reads from its environment.
#[derive(Debug, Clone)]
pub struct AgentConfig {
    pub env_path: PathBuf,
    pub backend: Option<Backend>,
    pub agent_user_id: Option<String>,
    pub command_timeout: Duration,
    pub log_flush_interval: Duration,
    pub log_max_chars: usize,
    pub poll_interval: Duration,
    pub poll_max_batch: usize,
    pub lock_port: u16,
    pub ide: InteractionProfile,
    /// Raw IDE_* values as read, for the status report.
    pub raw_ide: Vec<(String, String)>,
}

impl AgentConfig {
    pub fn from_env(env_path: &Path) -> AgentResult<Self> {
        Self::from_lookup(env_path, |k| std::env::var(k).ok())
    }

    /// Build the config from any key lookup. Blank values count as unset.
    pub fn from_lookup<F>(env_path: &Path, lookup: F) -> AgentResult<Self>
    where
        F: Fn(&str) -> Option<String>,
    {
        let get = |key: &str| -> Option<String> {
            lookup(key).map(|v| v.trim().to_string()).filter(|v| !v.is_empty())
        };
        let base_dir = env_path
            .parent()
            .filter(|p| !p.as_os_str().is_empty())
            .map(Path::to_path_buf)
            .unwrap_or_else(|| PathBuf::from("."));

        let backend = match (get("SUPABASE_URL"), get("SUPABASE_KEY")) {
            (Some(url), Some(key)) => Some(Backend { url: url.trim_end_matches('/').to_string(), key }),
            _ => None,
        };

        let secs = |key: &str, default: f64| -> AgentResult<Duration> {
            let v: f64 = parse_or(&get, key, default)?;
            if !v.is_finite() || v < 0.0 {
                return Err(AgentError::config(format!("{} must be a non-negative number of seconds, got {}", key, v)));
            }
            Ok(Duration::from_secs_f64(v))
        };

        let image_confidence: f32 = parse_or(&get, "IDE_IMAGE_CONFIDENCE", 0.85)?;
        if !(0.0..=1.0).contains(&image_confidence) {
            return Err(AgentError::config(format!(
                "IDE_IMAGE_CONFIDENCE must be between 0 and 1, got {}",
                image_confidence
            )));
        }

        let ide = InteractionProfile {
            target: get("IDE_TARGET").map(|t| t.to_lowercase()).unwrap_or_else(|| "vscode".into()),
            window_title_filter: get("IDE_WINDOW_TITLE_SUBSTR").unwrap_or_default(),
            open_chat_hotkey: hotkey(&get, "IDE_OPEN_CHAT_HOTKEY")?,
            focus_input_hotkey: hotkey(&get, "IDE_CHAT_FOCUS_HOTKEY")?,
            focus_transcript_hotkey: hotkey(&get, "IDE_FOCUS_TRANSCRIPT_HOTKEY")?,
            copy_transcript_hotkey: hotkey(&get, "IDE_COPY_TRANSCRIPT_HOTKEY")?,
            input_point: point(&get, "IDE_INPUT_POS")?,
            output_point: point(&get, "IDE_OUTPUT_POS")?,
            input_region: region(&get, "IDE_INPUT_REGION")?,
            output_region: region(&get, "IDE_OUTPUT_REGION")?,
            input_template: get("IDE_INPUT_IMAGE").map(|p| resolve_asset(&base_dir, &p)),
            output_template: get("IDE_OUTPUT_IMAGE").map(|p| resolve_asset(&base_dir, &p)),
            image_timeout: secs("IDE_IMAGE_TIMEOUT_SEC", 4.0)?,
            image_confidence,
            learn_template_width: parse_or::<i32, _>(&get, "IDE_LEARN_TEMPLATE_W", 320)?.max(MIN_REGION_SIDE),
            learn_template_height: parse_or::<i32, _>(&get, "IDE_LEARN_TEMPLATE_H", 160)?.max(MIN_REGION_SIDE),
            learn_countdown: secs("IDE_LEARN_COUNTDOWN_SEC", 5.0)?,
            response_wait: secs("IDE_RESPONSE_WAIT_SEC", 15.0)?,
            retry_count: parse_or(&get, "IDE_RETRY_COUNT", 2)?,
            retry_wait: secs("IDE_RETRY_WAIT_SEC", 5.0)?,
            answer_markers: get("AI_ANSWER_MARKERS").unwrap_or_else(|| DEFAULT_ANSWER_MARKERS.into()),
        };

        let raw_ide = IDE_KEYS
            .iter()
            .map(|k| (k.to_string(), lookup(k).unwrap_or_default()))
            .collect();

        Ok(Self {
            env_path: env_path.to_path_buf(),
            backend,
            agent_user_id: get("AGENT_USER_ID"),
            command_timeout: secs("COMMAND_TIMEOUT_SEC", 120.0)?,
            log_flush_interval: secs("LOG_FLUSH_INTERVAL_SEC", 1.5)?,
            log_max_chars: parse_or(&get, "LOG_MAX_CHARS", 20_000)?,
            poll_interval: secs("POLL_INTERVAL_SEC", 1.0)?,
            poll_max_batch: parse_or::<usize, _>(&get, "POLL_MAX_BATCH", 20)?.max(1),
            lock_port: parse_or(&get, "AGENT_LOCK_PORT", 45321)?,
            ide,
            raw_ide,
        })
    }

    /// Backend credentials, required once the agent talks to the queue.
    pub fn require_backend(&self) -> AgentResult<&Backend> {
        self.backend
            .as_ref()
            .ok_or_else(|| AgentError::config("SUPABASE_URL and SUPABASE_KEY are required in .env"))
    }

    /// Directory relative paths (assets, logs) hang off.
    pub fn base_dir(&self) -> PathBuf {
        self.env_path
            .parent()
            .filter(|p| !p.as_os_str().is_empty())
            .map(Path::to_path_buf)
            .unwrap_or_else(|| PathBuf::from("."))
    }
}

fn parse_or<T, G>(get: &G, key: &str, default: T) -> AgentResult<T>
where
    T: FromStr,
    T::Err: std::fmt::Display,
    G: Fn(&str) -> Option<String>,
{
    match get(key) {
        None => Ok(default),
        Some(raw) => raw
            .parse()
            .map_err(|e| AgentError::config(format!("invalid {}={:?}: {}", key, raw, e))),
    }
}

fn hotkey<G: Fn(&str) -> Option<String>>(get: &G, key: &str) -> AgentResult<Option<KeyChord>> {
    get(key)
        .map(|raw| {
            raw.parse::<KeyChord>()
                .map_err(|e| AgentError::config(format!("invalid {}: {}", key, e)))
        })
        .transpose()
}

fn point<G: Fn(&str) -> Option<String>>(get: &G, key: &str) -> AgentResult<Option<Point>> {
    get(key)
        .map(|raw| {
            Point::parse(&raw).ok_or_else(|| AgentError::config(format!("invalid {}={:?}, expected x,y", key, raw)))
        })
        .transpose()
}

fn region<G: Fn(&str) -> Option<String>>(get: &G, key: &str) -> AgentResult<Option<Region>> {
    get(key)
        .map(|raw| {
            Region::parse(&raw).ok_or_else(|| {
                AgentError::config(format!("invalid {}={:?}, expected left,top,width,height", key, raw))
            })
        })
        .transpose()
}

fn resolve_asset(base_dir: &Path, raw: &str) -> PathBuf {
    let p = PathBuf::from(raw);
    if p.is_absolute() {
        p
    } else {
        base_dir.join(p)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashMap;

    fn load(pairs: &[(&str, &str)]) -> AgentResult<AgentConfig> {
        let map: HashMap<String, String> = pairs.iter().map(|(k, v)| (k.to_string(), v.to_string())).collect();
        AgentConfig::from_lookup(Path::new("/opt/agent/.env"), move |k| map.get(k).cloned())
    }

    #[test]
    fn defaults_apply_when_unset() {
        let cfg = load(&[]).unwrap();
        assert!(cfg.backend.is_none());
        assert_eq!(cfg.command_timeout, Duration::from_secs(120));
        assert_eq!(cfg.log_flush_interval, Duration::from_millis(1500));
        assert_eq!(cfg.log_max_chars, 20_000);
        assert_eq!(cfg.poll_max_batch, 20);
        assert_eq!(cfg.lock_port, 45321);
        assert_eq!(cfg.ide.retry_count, 2);
        assert_eq!(cfg.ide.response_wait, Duration::from_secs(15));
        assert_eq!(cfg.ide.answer_markers, DEFAULT_ANSWER_MARKERS);
        assert!(cfg.require_backend().is_err());
        assert!(cfg.ide.require_window_filter().is_err());
    }

    #[test]
    fn parses_profile_values() {
        let cfg = load(&[
            ("SUPABASE_URL", "https://abc.supabase.co/"),
            ("SUPABASE_KEY", "k"),
            ("AGENT_USER_ID", "  "),
            ("IDE_WINDOW_TITLE_SUBSTR", "Visual Studio Code"),
            ("IDE_CHAT_FOCUS_HOTKEY", "ctrl+alt+i"),
            ("IDE_INPUT_REGION", "10, 20, 300, 60"),
            ("IDE_OUTPUT_POS", "800,400"),
            ("IDE_INPUT_IMAGE", "assets/ide_input_template.png"),
            ("IDE_OUTPUT_IMAGE", "/abs/out.png"),
        ])
        .unwrap();
        assert_eq!(cfg.require_backend().unwrap().url, "https://abc.supabase.co");
        assert_eq!(cfg.agent_user_id, None);
        assert_eq!(cfg.ide.require_window_filter().unwrap(), "Visual Studio Code");
        assert_eq!(cfg.ide.focus_input_hotkey.as_ref().unwrap().to_string(), "ctrl+alt+i");
        assert_eq!(cfg.ide.input_region, Some(Region::new(10, 20, 300, 60)));
        assert_eq!(cfg.ide.output_point, Some(Point::new(800, 400)));
        assert_eq!(
            cfg.ide.input_template.as_deref(),
            Some(Path::new("/opt/agent/assets/ide_input_template.png"))
        );
        assert_eq!(cfg.ide.output_template.as_deref(), Some(Path::new("/abs/out.png")));
    }

    #[test]
    fn bad_values_name_the_key() {
        let err = load(&[("IDE_RETRY_COUNT", "lots")]).unwrap_err().to_string();
        assert!(err.contains("IDE_RETRY_COUNT"), "{}", err);

        let err = load(&[("IDE_INPUT_POS", "12")]).unwrap_err().to_string();
        assert!(err.contains("IDE_INPUT_POS"), "{}", err);

        let err = load(&[("IDE_OPEN_CHAT_HOTKEY", "ctrl+nope")]).unwrap_err().to_string();
        assert!(err.contains("IDE_OPEN_CHAT_HOTKEY"), "{}", err);

        assert!(load(&[("IDE_IMAGE_CONFIDENCE", "1.5")]).is_err());
        assert!(load(&[("POLL_INTERVAL_SEC", "-1")]).is_err());
    }

    #[test]
    fn raw_ide_values_are_kept_for_status() {
        let cfg = load(&[("IDE_TARGET", "Cursor")]).unwrap();
        assert_eq!(cfg.ide.target, "cursor");
        assert!(cfg.raw_ide.contains(&("IDE_TARGET".to_string(), "Cursor".to_string())));
        assert_eq!(cfg.raw_ide.len(), IDE_KEYS.len());
    }
}
