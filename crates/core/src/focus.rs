use std::fmt;
use std::path::PathBuf;

use crate::config::InteractionProfile;
use crate::error::{AgentError, AgentResult};
use crate::logger;
use crate::matcher::TemplateSearch;
use crate::platform::keys::KeyChord;
use crate::platform::Platform;
use crate::sleep::Clock;
use crate::types::*;

const SETTLE_MS: u64 = 50;

/// Which part of the chat panel to put the keyboard focus on.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FocusTarget {
    Input,
    Transcript,
}

impl FocusTarget {
    /// Parse the `input` / `output` words used in commands.
    pub fn from_kind(kind: &str) -> Option<Self> {
        match kind.trim().to_lowercase().as_str() {
            "input" => Some(FocusTarget::Input),
            "output" => Some(FocusTarget::Transcript),
            _ => None,
        }
    }

    /// `input` or `output`, as used in env keys and file names.
    pub fn kind(&self) -> &'static str {
        match self {
            FocusTarget::Input => "input",
            FocusTarget::Transcript => "output",
        }
    }

    pub fn label(&self) -> &'static str {
        match self {
            FocusTarget::Input => "chat input",
            FocusTarget::Transcript => "transcript",
        }
    }

    pub fn hotkey_key(&self) -> &'static str {
        match self {
            FocusTarget::Input => "IDE_CHAT_FOCUS_HOTKEY",
            FocusTarget::Transcript => "IDE_FOCUS_TRANSCRIPT_HOTKEY",
        }
    }

    /// Env keys that can configure this target, highest priority first.
    pub fn option_keys(&self) -> [&'static str; 4] {
        match self {
            FocusTarget::Input => ["IDE_CHAT_FOCUS_HOTKEY", "IDE_INPUT_REGION", "IDE_INPUT_IMAGE", "IDE_INPUT_POS"],
            FocusTarget::Transcript => [
                "IDE_FOCUS_TRANSCRIPT_HOTKEY",
                "IDE_OUTPUT_REGION",
                "IDE_OUTPUT_IMAGE",
                "IDE_OUTPUT_POS",
            ],
        }
    }
}

#[derive(Debug, Clone, PartialEq)]
pub enum FocusMethod {
    Hotkey(KeyChord),
    Region(Region),
    Template(PathBuf),
    Point(Point),
}

impl fmt::Display for FocusMethod {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            FocusMethod::Hotkey(chord) => write!(f, "hotkey {}", chord),
            FocusMethod::Region(r) => write!(f, "region {}", r),
            FocusMethod::Template(p) => write!(f, "template {}", p.display()),
            FocusMethod::Point(p) => write!(f, "point {}", p),
        }
    }
}

/// Configured focus methods for `target`, in the order they are tried.
pub fn methods_for(profile: &InteractionProfile, target: FocusTarget) -> Vec<FocusMethod> {
    let (hotkey, region, template, point) = match target {
        FocusTarget::Input => (
            &profile.focus_input_hotkey,
            profile.input_region,
            &profile.input_template,
            profile.input_point,
        ),
        FocusTarget::Transcript => (
            &profile.focus_transcript_hotkey,
            profile.output_region,
            &profile.output_template,
            profile.output_point,
        ),
    };
    let mut methods = Vec::new();
    if let Some(chord) = hotkey {
        methods.push(FocusMethod::Hotkey(chord.clone()));
    }
    if let Some(r) = region {
        methods.push(FocusMethod::Region(r));
    }
    if let Some(p) = template {
        methods.push(FocusMethod::Template(p.clone()));
    }
    if let Some(p) = point {
        methods.push(FocusMethod::Point(p));
    }
    methods
}

pub struct Focuser<'a> {
    platform: &'a dyn Platform,
    clock: &'a dyn Clock,
    profile: &'a InteractionProfile,
}

impl<'a> Focuser<'a> {
    pub fn new(platform: &'a dyn Platform, clock: &'a dyn Clock, profile: &'a InteractionProfile) -> Self {
        Self { platform, clock, profile }
    }

    /// Focus `target` using the first configured method that works.
    pub fn focus(&self, target: FocusTarget) -> AgentResult<FocusMethod> {
        let methods = methods_for(self.profile, target);
        if methods.is_empty() {
            return Err(AgentError::NoFocusMethod {
                target: target.label(),
                options: target.option_keys().join(" or "),
            });
        }

        let mut misses = Vec::new();
        for method in methods {
            if self.apply(&method)? {
                logger::debug_p("focus", &format!("{} focused via {}", target.label(), method));
                self.clock.sleep_ms(SETTLE_MS);
                return Ok(method);
            }
            misses.push(format!("{} not matched", method));
        }
        Err(AgentError::FocusFailed { target: target.label(), details: misses.join("; ") })
    }

    /// `Ok(false)` when the method could not find its target on screen.
    fn apply(&self, method: &FocusMethod) -> AgentResult<bool> {
        match method {
            FocusMethod::Hotkey(chord) => self.platform.send_keys(chord)?,
            FocusMethod::Region(r) => {
                let (sw, sh) = self.platform.screen_size();
                self.platform.click(r.clamp(sw, sh).center())?;
            }
            FocusMethod::Template(path) => {
                let search = TemplateSearch::standard(self.profile.image_timeout, self.profile.image_confidence);
                match search.search(self.platform, self.clock, path)? {
                    Some(found) => self.platform.click(found.center())?,
                    None => return Ok(false),
                }
            }
            FocusMethod::Point(p) => self.platform.click(*p)?,
        }
        Ok(true)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::platform::stub::StubPlatform;
    use crate::sleep::ManualClock;
    use image::{Luma, Rgba, RgbaImage};
    use std::time::Duration;

    #[test]
    fn nothing_configured_names_every_option() {
        let platform = StubPlatform::new();
        let clock = ManualClock::new();
        let profile = InteractionProfile::default();
        let focuser = Focuser::new(&platform, &clock, &profile);

        let err = focuser.focus(FocusTarget::Input).unwrap_err();
        assert!(!err.is_transient());
        assert_eq!(
            err.to_string(),
            "No way to focus chat input. Set IDE_CHAT_FOCUS_HOTKEY or IDE_INPUT_REGION or IDE_INPUT_IMAGE or IDE_INPUT_POS."
        );
        let err = focuser.focus(FocusTarget::Transcript).unwrap_err().to_string();
        assert!(err.contains("IDE_FOCUS_TRANSCRIPT_HOTKEY or IDE_OUTPUT_REGION or IDE_OUTPUT_IMAGE or IDE_OUTPUT_POS"));
    }

    #[test]
    fn hotkey_wins_over_lower_methods() {
        let platform = StubPlatform::new();
        let clock = ManualClock::new();
        let profile = InteractionProfile {
            focus_input_hotkey: Some("ctrl+l".parse().unwrap()),
            input_point: Some(Point::new(5, 5)),
            ..Default::default()
        };
        let used = Focuser::new(&platform, &clock, &profile).focus(FocusTarget::Input).unwrap();
        assert!(matches!(used, FocusMethod::Hotkey(_)));
        assert_eq!(platform.actions(), vec!["keys(ctrl+l)".to_string()]);
        assert_eq!(clock.sleeps(), vec![Duration::from_millis(50)]);
    }

    #[test]
    fn region_click_stays_on_screen() {
        let platform = StubPlatform::new();
        let clock = ManualClock::new();
        let profile = InteractionProfile {
            output_region: Some(Region::new(1900, 1000, 400, 200)),
            output_point: Some(Point::new(1, 1)),
            ..Default::default()
        };
        Focuser::new(&platform, &clock, &profile).focus(FocusTarget::Transcript).unwrap();
        // clamped to (1520,880,400,200)
        assert_eq!(platform.actions(), vec!["click(1720,980)".to_string()]);
    }

    #[test]
    fn unmatched_template_falls_back_to_point() {
        let dir = tempfile::tempdir().unwrap();
        let tpl = dir.path().join("input.png");
        image::GrayImage::from_fn(24, 24, |x, y| Luma([(x * 10 + y) as u8])).save(&tpl).unwrap();

        let platform = StubPlatform::new().with_screen(RgbaImage::from_pixel(200, 100, Rgba([0, 0, 0, 255])));
        let clock = ManualClock::new();
        let mut profile = InteractionProfile {
            input_template: Some(tpl),
            input_point: Some(Point::new(40, 60)),
            image_timeout: Duration::from_millis(200),
            ..Default::default()
        };
        let used = Focuser::new(&platform, &clock, &profile).focus(FocusTarget::Input).unwrap();
        assert_eq!(used, FocusMethod::Point(Point::new(40, 60)));

        profile.input_point = None;
        let err = Focuser::new(&platform, &clock, &profile).focus(FocusTarget::Input).unwrap_err();
        assert!(matches!(err, AgentError::FocusFailed { .. }));
        assert!(err.is_transient());
    }

    #[test]
    fn matched_template_is_clicked_at_its_centre() {
        let dir = tempfile::tempdir().unwrap();
        let tpl = dir.path().join("input.png");
        let mut screen = RgbaImage::from_pixel(200, 100, Rgba([0, 0, 0, 255]));
        for y in 0..20 {
            for x in 0..20 {
                let v = ((x * 13 + y * 7) % 200 + 40) as u8;
                screen.put_pixel(100 + x, 30 + y, Rgba([v, v, v, 255]));
            }
        }
        image::imageops::crop_imm(&screen, 100, 30, 20, 20).to_image().save(&tpl).unwrap();

        let platform = StubPlatform::new().with_screen(screen);
        let clock = ManualClock::new();
        let profile = InteractionProfile { input_template: Some(tpl), ..Default::default() };
        Focuser::new(&platform, &clock, &profile).focus(FocusTarget::Input).unwrap();
        assert_eq!(platform.actions(), vec!["click(110,40)".to_string()]);
    }

    #[test]
    fn missing_template_file_is_a_config_error() {
        let platform = StubPlatform::new();
        let clock = ManualClock::new();
        let profile = InteractionProfile {
            output_template: Some(PathBuf::from("/definitely/missing.png")),
            output_point: Some(Point::new(1, 1)),
            ..Default::default()
        };
        let err = Focuser::new(&platform, &clock, &profile).focus(FocusTarget::Transcript).unwrap_err();
        assert!(matches!(err, AgentError::TemplateMissing(_)));
    }

    #[test]
    fn kinds_parse() {
        assert_eq!(FocusTarget::from_kind("Input"), Some(FocusTarget::Input));
        assert_eq!(FocusTarget::from_kind("output"), Some(FocusTarget::Transcript));
        assert_eq!(FocusTarget::from_kind("both"), None);
    }
}
