use std::time::Duration;

use crate::config::InteractionProfile;
use crate::error::AgentResult;
use crate::focus::{FocusTarget, Focuser};
use crate::locator::WindowLocator;
use crate::logger;
use crate::platform::keys::KeyChord;
use crate::platform::Platform;
use crate::sleep::Clock;
use crate::transcript::{AnswerMarkers, TranscriptCopier, NO_ANSWER};

const MIN_ANSWER_CHARS: usize = 4;
const OPEN_CHAT_SETTLE_MS: u64 = 100;
const PASTE_SETTLE_MS: u64 = 50;

/// Something a question can be typed into and an answer read back from.
pub trait ChatSurface {
    /// Put `question` into the input and submit it.
    fn send(&mut self, question: &str) -> AgentResult<()>;
    /// Submit again without re-typing.
    fn resubmit(&mut self) -> AgentResult<()>;
    /// Current answer text, possibly empty.
    fn read_answer(&mut self) -> AgentResult<String>;
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RetryPolicy {
    pub response_wait: Duration,
    pub retry_wait: Duration,
    pub retry_count: u32,
}

impl RetryPolicy {
    pub fn from_profile(profile: &InteractionProfile) -> Self {
        Self {
            response_wait: profile.response_wait,
            retry_wait: profile.retry_wait,
            retry_count: profile.retry_count,
        }
    }

    pub fn total_attempts(&self) -> u32 {
        1 + self.retry_count
    }
}

pub fn is_usable_answer(answer: &str) -> bool {
    let trimmed = answer.trim();
    !trimmed.is_empty() && trimmed != NO_ANSWER && trimmed.chars().count() >= MIN_ANSWER_CHARS
}

#[derive(Debug)]
enum SendState {
    Idle,
    Sent { attempt: u32 },
    Waiting { attempt: u32 },
    Extracted { attempt: u32, answer: Option<String> },
    Done(String),
    Exhausted,
}

/// Drives one question through send, wait, extract and bounded retries.
pub struct SendRetryController<'a> {
    policy: RetryPolicy,
    clock: &'a dyn Clock,
}

impl<'a> SendRetryController<'a> {
    pub fn new(policy: RetryPolicy, clock: &'a dyn Clock) -> Self {
        Self { policy, clock }
    }

    /// Returns the answer, or the placeholder once every attempt came back empty.
    pub fn run(&self, surface: &mut dyn ChatSurface, question: &str) -> AgentResult<String> {
        let total = self.policy.total_attempts();
        let mut state = SendState::Idle;
        loop {
            state = match state {
                SendState::Idle => {
                    surface.send(question)?;
                    SendState::Sent { attempt: 1 }
                }
                SendState::Sent { attempt } => {
                    let wait = if attempt == 1 { self.policy.response_wait } else { self.policy.retry_wait };
                    self.clock.sleep(wait);
                    SendState::Waiting { attempt }
                }
                SendState::Waiting { attempt } => match surface.read_answer() {
                    Ok(answer) => SendState::Extracted { attempt, answer: Some(answer) },
                    Err(e) if e.is_transient() => {
                        logger::warn_p("bridge", &format!("attempt {}/{}: could not read answer: {}", attempt, total, e));
                        SendState::Extracted { attempt, answer: None }
                    }
                    Err(e) => return Err(e),
                },
                SendState::Extracted { attempt, answer } => match answer {
                    Some(a) if is_usable_answer(&a) => SendState::Done(a.trim().to_string()),
                    _ if attempt < total => {
                        logger::info_p("bridge", &format!("no usable answer after attempt {}/{}, resubmitting", attempt, total));
                        if let Err(e) = surface.resubmit() {
                            if !e.is_transient() {
                                return Err(e);
                            }
                            logger::warn_p("bridge", &format!("resubmit failed: {}", e));
                        }
                        SendState::Sent { attempt: attempt + 1 }
                    }
                    _ => SendState::Exhausted,
                },
                SendState::Done(answer) => return Ok(answer),
                SendState::Exhausted => {
                    logger::warn_p("bridge", &format!("no answer after {} attempt(s)", total));
                    return Ok(NO_ANSWER.to_string());
                }
            };
        }
    }
}

/// The IDE chat panel on the real (or stub) desktop.
pub struct DeskChat<'a> {
    platform: &'a dyn Platform,
    clock: &'a dyn Clock,
    profile: &'a InteractionProfile,
    markers: AnswerMarkers,
}

impl<'a> DeskChat<'a> {
    pub fn new(platform: &'a dyn Platform, clock: &'a dyn Clock, profile: &'a InteractionProfile) -> AgentResult<Self> {
        Ok(Self {
            platform,
            clock,
            profile,
            markers: AnswerMarkers::parse(&profile.answer_markers)?,
        })
    }

    /// Find and raise the IDE window, then open its chat panel if configured.
    pub fn open(&self) -> AgentResult<()> {
        let filter = self.profile.require_window_filter()?;
        let window = WindowLocator::new(self.platform, self.clock).locate_and_activate(filter)?;
        logger::info_p("bridge", &format!("using window \"{}\"", window.title));
        if let Some(chord) = &self.profile.open_chat_hotkey {
            self.platform.send_keys(chord)?;
            self.clock.sleep_ms(OPEN_CHAT_SETTLE_MS);
        }
        Ok(())
    }

    fn focuser(&self) -> Focuser<'_> {
        Focuser::new(self.platform, self.clock, self.profile)
    }
}

impl ChatSurface for DeskChat<'_> {
    fn send(&mut self, question: &str) -> AgentResult<()> {
        self.platform.set_clipboard_text(question)?;
        self.focuser().focus(FocusTarget::Input)?;
        self.platform.send_keys(&KeyChord::paste())?;
        self.clock.sleep_ms(PASTE_SETTLE_MS);
        self.platform.send_keys(&KeyChord::enter())
    }

    fn resubmit(&mut self) -> AgentResult<()> {
        self.focuser().focus(FocusTarget::Input)?;
        self.platform.send_keys(&KeyChord::enter())
    }

    fn read_answer(&mut self) -> AgentResult<String> {
        let copied = TranscriptCopier::new(self.platform, self.clock, self.profile).copy_transcript()?;
        if copied.starts_with("__vibe_clip_sentinel_") {
            return Ok(String::new());
        }
        Ok(self.markers.extract_last_answer(&copied))
    }
}

/// Ask the IDE chat `question` and return its reply.
pub fn ask(platform: &dyn Platform, clock: &dyn Clock, profile: &InteractionProfile, question: &str) -> AgentResult<String> {
    let mut chat = DeskChat::new(platform, clock, profile)?;
    chat.open()?;
    SendRetryController::new(RetryPolicy::from_profile(profile), clock).run(&mut chat, question)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::AgentError;
    use crate::platform::stub::StubPlatform;
    use crate::sleep::ManualClock;
    use crate::types::*;
    use std::collections::VecDeque;

    struct FakeSurface {
        answers: VecDeque<AgentResult<String>>,
        sends: u32,
        resubmits: u32,
    }

    impl FakeSurface {
        fn new(answers: Vec<AgentResult<String>>) -> Self {
            Self { answers: answers.into(), sends: 0, resubmits: 0 }
        }
    }

    impl ChatSurface for FakeSurface {
        fn send(&mut self, _question: &str) -> AgentResult<()> {
            self.sends += 1;
            Ok(())
        }

        fn resubmit(&mut self) -> AgentResult<()> {
            self.resubmits += 1;
            Ok(())
        }

        fn read_answer(&mut self) -> AgentResult<String> {
            self.answers.pop_front().unwrap_or_else(|| Ok(String::new()))
        }
    }

    fn policy(retry_count: u32) -> RetryPolicy {
        RetryPolicy {
            response_wait: Duration::from_secs(15),
            retry_wait: Duration::from_secs(5),
            retry_count,
        }
    }

    #[test]
    fn third_attempt_succeeds_after_two_retries() {
        let clock = ManualClock::new();
        let mut surface = FakeSurface::new(vec![Ok(String::new()), Ok("ok".into()), Ok("the answer".into())]);
        let answer = SendRetryController::new(policy(2), &clock).run(&mut surface, "q").unwrap();
        assert_eq!(answer, "the answer");
        assert_eq!(surface.sends + surface.resubmits, 3);
        assert_eq!(surface.sends, 1);
        assert_eq!(
            clock.sleeps(),
            vec![Duration::from_secs(15), Duration::from_secs(5), Duration::from_secs(5)]
        );
    }

    #[test]
    fn exhaustion_yields_placeholder() {
        let clock = ManualClock::new();
        let mut surface = FakeSurface::new(vec![Ok(NO_ANSWER.into()), Ok("  ".into())]);
        let answer = SendRetryController::new(policy(1), &clock).run(&mut surface, "q").unwrap();
        assert_eq!(answer, NO_ANSWER);
        assert_eq!(surface.resubmits, 1);
    }

    #[test]
    fn transient_read_failure_counts_as_attempt() {
        let clock = ManualClock::new();
        let mut surface = FakeSurface::new(vec![
            Err(AgentError::FocusFailed { target: "transcript", details: "template not matched".into() }),
            Ok("recovered".into()),
        ]);
        let answer = SendRetryController::new(policy(1), &clock).run(&mut surface, "q").unwrap();
        assert_eq!(answer, "recovered");
    }

    #[test]
    fn config_error_aborts() {
        let clock = ManualClock::new();
        let mut surface = FakeSurface::new(vec![Err(AgentError::config("broken"))]);
        assert!(SendRetryController::new(policy(3), &clock).run(&mut surface, "q").is_err());
        assert_eq!(surface.resubmits, 0);
    }

    #[test]
    fn usable_answer_rules() {
        assert!(is_usable_answer(" done "));
        assert!(!is_usable_answer("ok"));
        assert!(!is_usable_answer(NO_ANSWER));
        assert!(!is_usable_answer("\n\n"));
    }

    #[test]
    fn asks_the_stub_desktop_end_to_end() {
        let platform = StubPlatform::new();
        let clock = ManualClock::new();
        let profile = InteractionProfile {
            window_title_filter: "visual studio code".into(),
            open_chat_hotkey: Some("ctrl+alt+i".parse().unwrap()),
            input_point: Some(Point::new(900, 850)),
            output_point: Some(Point::new(900, 400)),
            ..Default::default()
        };
        let answer = ask(&platform, &clock, &profile, "what is a borrow checker").unwrap();
        assert_eq!(answer, "stub reply to: what is a borrow checker");

        let actions = platform.actions();
        let paste = actions.iter().position(|a| a == "keys(ctrl+v)").unwrap();
        let enter = actions.iter().position(|a| a == "keys(enter)").unwrap();
        assert!(actions[0].starts_with("find_windows"));
        assert!(paste < enter);
    }

    #[test]
    fn missing_window_filter_is_a_config_error() {
        let platform = StubPlatform::new();
        let clock = ManualClock::new();
        let err = ask(&platform, &clock, &InteractionProfile::default(), "hi").unwrap_err();
        assert!(err.to_string().contains("IDE_WINDOW_TITLE_SUBSTR"));
    }
}
