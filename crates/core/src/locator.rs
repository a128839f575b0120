use crate::error::{AgentError, AgentResult};
use crate::logger;
use crate::platform::Platform;
use crate::sleep::Clock;
use crate::types::*;

const ACTIVATE_ATTEMPTS: u32 = 6;
const ACTIVATE_BACKOFF_MS: u64 = 150;
const SETTLE_MS: u64 = 150;

/// Preference for a window: active beats restored beats large.
pub fn window_score(w: &TargetWindow) -> (bool, bool, i64) {
    let area = (w.width.max(0) as i64) * (w.height.max(0) as i64);
    (w.is_active, !w.is_minimized, area)
}

/// Highest-scoring window; the earliest one wins ties.
pub fn choose_best(windows: &[TargetWindow]) -> Option<&TargetWindow> {
    let mut best: Option<&TargetWindow> = None;
    for w in windows {
        if best.map_or(true, |b| window_score(w) > window_score(b)) {
            best = Some(w);
        }
    }
    best
}

pub struct WindowLocator<'a> {
    platform: &'a dyn Platform,
    clock: &'a dyn Clock,
}

impl<'a> WindowLocator<'a> {
    pub fn new(platform: &'a dyn Platform, clock: &'a dyn Clock) -> Self {
        Self { platform, clock }
    }

    pub fn locate(&self, title_filter: &str) -> AgentResult<TargetWindow> {
        let windows = self.platform.find_windows(title_filter)?;
        let best = choose_best(&windows)
            .cloned()
            .ok_or_else(|| AgentError::WindowNotFound(title_filter.to_string()))?;
        logger::debug_p(
            "window",
            &format!("{} candidate(s), picked \"{}\" (score {:?})", windows.len(), best.title, window_score(&best)),
        );
        Ok(best)
    }

    /// Bring `window` to the foreground, retrying a few times.
    pub fn activate(&self, window: &TargetWindow) -> AgentResult<()> {
        let mut last = String::new();
        for attempt in 1..=ACTIVATE_ATTEMPTS {
            match self.platform.activate(window) {
                Ok(()) => {
                    if attempt > 1 {
                        logger::info_p("window", &format!("activated \"{}\" on attempt {}", window.title, attempt));
                    }
                    self.clock.sleep_ms(SETTLE_MS);
                    return Ok(());
                }
                Err(e) => {
                    logger::debug_p("window", &format!("activation attempt {} failed: {}", attempt, e));
                    last = e.to_string();
                    if attempt < ACTIVATE_ATTEMPTS {
                        self.clock.sleep_ms(ACTIVATE_BACKOFF_MS);
                    }
                }
            }
        }
        Err(AgentError::Activation { attempts: ACTIVATE_ATTEMPTS, last })
    }

    pub fn locate_and_activate(&self, title_filter: &str) -> AgentResult<TargetWindow> {
        let window = self.locate(title_filter)?;
        self.activate(&window)?;
        Ok(window)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::platform::stub::StubPlatform;
    use crate::sleep::ManualClock;
    use std::time::Duration;

    fn win(handle: u64, active: bool, minimized: bool, w: i32, h: i32) -> TargetWindow {
        TargetWindow {
            handle,
            title: format!("Code {}", handle),
            is_active: active,
            is_minimized: minimized,
            is_maximized: false,
            width: w,
            height: h,
        }
    }

    #[test]
    fn score_is_monotonic_in_each_flag() {
        let base = win(1, false, true, 800, 600);
        let mut active = base.clone();
        active.is_active = true;
        let mut restored = base.clone();
        restored.is_minimized = false;
        let mut larger = base.clone();
        larger.width += 1;

        assert!(window_score(&active) > window_score(&base));
        assert!(window_score(&restored) > window_score(&base));
        assert!(window_score(&larger) > window_score(&base));
        assert!(window_score(&win(2, true, true, 1, 1)) > window_score(&win(3, false, false, 900, 900)));
    }

    #[test]
    fn active_beats_bigger_background_window() {
        let windows = vec![win(1, false, false, 1920, 1080), win(2, true, false, 800, 600)];
        assert_eq!(choose_best(&windows).unwrap().handle, 2);

        let windows = vec![win(1, false, false, 3840, 2160), win(2, true, true, 400, 300)];
        assert_eq!(choose_best(&windows).unwrap().handle, 2);
    }

    #[test]
    fn restored_beats_bigger_minimized_window() {
        let windows = vec![win(1, false, true, 3840, 2160), win(2, false, false, 640, 480)];
        assert_eq!(choose_best(&windows).unwrap().handle, 2);
    }

    #[test]
    fn ties_keep_enumeration_order() {
        let windows = vec![win(1, false, false, 100, 100), win(2, false, false, 100, 100)];
        assert_eq!(choose_best(&windows).unwrap().handle, 1);
        assert!(choose_best(&[]).is_none());
    }

    #[test]
    fn missing_window_is_reported() {
        let platform = StubPlatform::new();
        let clock = ManualClock::new();
        let err = WindowLocator::new(&platform, &clock).locate("Cursor").unwrap_err();
        assert!(matches!(err, AgentError::WindowNotFound(ref t) if t == "Cursor"));
    }

    #[test]
    fn activation_retries_then_settles() {
        let platform = StubPlatform::new().fail_activations(2);
        let clock = ManualClock::new();
        let locator = WindowLocator::new(&platform, &clock);
        locator.locate_and_activate("Visual Studio").unwrap();
        assert_eq!(
            clock.sleeps(),
            vec![Duration::from_millis(150), Duration::from_millis(150), Duration::from_millis(150)]
        );
    }

    #[test]
    fn activation_gives_up_after_six_attempts() {
        let platform = StubPlatform::new().fail_activations(10);
        let clock = ManualClock::new();
        let locator = WindowLocator::new(&platform, &clock);
        let window = locator.locate("Visual Studio").unwrap();
        match locator.activate(&window).unwrap_err() {
            AgentError::Activation { attempts, last } => {
                assert_eq!(attempts, 6);
                assert!(last.contains("refused"));
            }
            other => panic!("unexpected error: {}", other),
        }
    }
}
