use std::time::{Duration, SystemTime, UNIX_EPOCH};

use rand::Rng;
use regex::Regex;

use crate::config::InteractionProfile;
use crate::error::{AgentError, AgentResult};
use crate::focus::{FocusTarget, Focuser};
use crate::logger;
use crate::platform::keys::KeyChord;
use crate::platform::Platform;
use crate::sleep::Clock;

/// Placeholder answer when nothing usable came back.
pub const NO_ANSWER: &str = "(no answer extracted)";

const FALLBACK_LINES: usize = 120;
const SELECTION_INSET: i32 = 8;
const CLIPBOARD_POLL_MS: u64 = 50;
const CLIPBOARD_WAIT: Duration = Duration::from_secs(3);

/// Case-insensitive literals that introduce an assistant reply.
pub struct AnswerMarkers {
    patterns: Vec<Regex>,
}

impl AnswerMarkers {
    /// Build from a comma-separated list; blank entries are skipped.
    pub fn parse(csv: &str) -> AgentResult<Self> {
        let patterns = csv
            .split(',')
            .map(str::trim)
            .filter(|m| !m.is_empty())
            .map(|m| {
                Regex::new(&format!("(?i){}", regex::escape(m)))
                    .map_err(|e| AgentError::config(format!("invalid answer marker {:?}: {}", m, e)))
            })
            .collect::<AgentResult<Vec<_>>>()?;
        Ok(Self { patterns })
    }

    /// Text after the right-most marker, or the tail of the transcript.
    pub fn extract_last_answer(&self, copied: &str) -> String {
        let text = copied.replace("\r\n", "\n");
        let text = text.trim();
        if text.is_empty() {
            return String::new();
        }

        // (start, end) of the chosen marker; earlier markers win ties.
        let mut cut: Option<(usize, usize)> = None;
        for pattern in &self.patterns {
            if let Some((start, end)) = last_match(pattern, text) {
                if cut.map_or(true, |(best, _)| start > best) {
                    cut = Some((start, end));
                }
            }
        }

        match cut {
            Some((_, end)) => text[end..].trim().to_string(),
            None => {
                let lines: Vec<&str> = text.lines().collect();
                let from = lines.len().saturating_sub(FALLBACK_LINES);
                lines[from..].join("\n").trim().to_string()
            }
        }
    }
}

/// Right-most match of `pattern`, counting overlapping occurrences.
fn last_match(pattern: &Regex, text: &str) -> Option<(usize, usize)> {
    let mut found = None;
    let mut from = 0;
    while let Some(m) = pattern.find_at(text, from) {
        found = Some((m.start(), m.end()));
        match text[m.start()..].chars().next() {
            Some(c) => from = m.start() + c.len_utf8(),
            None => break,
        }
    }
    found
}

/// A clipboard value nobody else will produce.
pub fn sentinel() -> String {
    let nanos = SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .map(|d| d.as_nanos())
        .unwrap_or_default();
    let salt: u32 = rand::thread_rng().gen();
    format!("__vibe_clip_sentinel_{}_{:08x}__", nanos, salt)
}

/// Copies the visible chat transcript through the clipboard.
pub struct TranscriptCopier<'a> {
    platform: &'a dyn Platform,
    clock: &'a dyn Clock,
    profile: &'a InteractionProfile,
}

impl<'a> TranscriptCopier<'a> {
    pub fn new(platform: &'a dyn Platform, clock: &'a dyn Clock, profile: &'a InteractionProfile) -> Self {
        Self { platform, clock, profile }
    }

    /// Focus the transcript, copy it, and wait for the clipboard to change.
    ///
    /// Returns whatever the clipboard holds when the wait runs out, which may
    /// still be the sentinel.
    pub fn copy_transcript(&self) -> AgentResult<String> {
        let marker = sentinel();
        self.platform.set_clipboard_text(&marker)?;

        Focuser::new(self.platform, self.clock, self.profile).focus(FocusTarget::Transcript)?;

        if let Some(chord) = &self.profile.copy_transcript_hotkey {
            self.platform.send_keys(chord)?;
        } else if let Some(region) = self.profile.output_region {
            let (sw, sh) = self.platform.screen_size();
            let r = region.clamp(sw, sh);
            self.platform.drag(r.near_bottom_right(SELECTION_INSET), r.near_top_left(SELECTION_INSET))?;
            self.platform.send_keys(&KeyChord::copy())?;
        } else {
            self.platform.send_keys(&KeyChord::select_all())?;
            self.platform.send_keys(&KeyChord::copy())?;
        }

        let deadline = self.clock.now() + CLIPBOARD_WAIT;
        loop {
            let current = self.platform.clipboard_text()?;
            if current != marker && !current.trim().is_empty() {
                return Ok(current);
            }
            if self.clock.now() >= deadline {
                logger::warn_p("transcript", "clipboard did not change after copy");
                return Ok(current);
            }
            self.clock.sleep_ms(CLIPBOARD_POLL_MS);
        }
    }
}
