use std::fs;
use std::path::PathBuf;

use image::{imageops, Rgba, RgbaImage};

use crate::command::CalibrateKind;
use crate::config::AgentConfig;
use crate::error::{AgentError, AgentResult};
use crate::focus::{methods_for, FocusTarget};
use crate::logger;
use crate::matcher::TemplateSearch;
use crate::platform::Platform;
use crate::settings;
use crate::sleep::Clock;
use crate::storage::{self, ObjectStore};
use crate::types::*;

const TITLE_SAMPLE: usize = 5;
const TITLE_MAX_CHARS: usize = 80;

const RED: Rgba<u8> = Rgba([255, 0, 0, 255]);
const WHITE: Rgba<u8> = Rgba([255, 255, 255, 255]);

/// Red box with a thin white frame around it, visible on light and dark UIs.
pub fn mark_region(img: &mut RgbaImage, r: Region) {
    draw_rect_outline(img, r, RED, 6);
    let outer = Region::new(r.left - 8, r.top - 8, r.width + 16, r.height + 16);
    draw_rect_outline(img, outer, WHITE, 2);
}

fn draw_rect_outline(img: &mut RgbaImage, r: Region, color: Rgba<u8>, thickness: i32) {
    let (img_w, img_h) = (img.width() as i32, img.height() as i32);
    if r.width <= 0 || r.height <= 0 || img_w == 0 || img_h == 0 {
        return;
    }
    for t in 0..thickness.max(1) {
        let x0 = (r.left + t).clamp(0, img_w - 1);
        let y0 = (r.top + t).clamp(0, img_h - 1);
        let x1 = (r.right() - 1 - t).clamp(0, img_w - 1);
        let y1 = (r.bottom() - 1 - t).clamp(0, img_h - 1);
        if x0 > x1 || y0 > y1 {
            break;
        }
        for x in x0..=x1 {
            img.put_pixel(x as u32, y0 as u32, color);
            img.put_pixel(x as u32, y1 as u32, color);
        }
        for y in y0..=y1 {
            img.put_pixel(x0 as u32, y as u32, color);
            img.put_pixel(x1 as u32, y as u32, color);
        }
    }
}

/// Handlers for the local inspection and setup commands.
pub struct Diagnostics<'a> {
    pub platform: &'a dyn Platform,
    pub clock: &'a dyn Clock,
    pub store: &'a dyn ObjectStore,
    /// Owner of the job; objects are stored under this prefix.
    pub owner: &'a str,
}

impl<'a> Diagnostics<'a> {
    pub fn position(&self) -> AgentResult<Outcome> {
        Ok(Outcome::text(self.platform.cursor_position()?.to_string()))
    }

    pub fn capture(&self) -> AgentResult<Outcome> {
        let path = format!("{}/{}.png", self.owner, storage::timestamp());
        let url = storage::upload_image(self.store, &path, &self.platform.capture_screen()?)?;
        Ok(Outcome::with_image(format!("Screenshot uploaded: {}", path), url))
    }

    pub fn debug_screen(&self) -> AgentResult<Outcome> {
        let path = format!("{}/debug/ide_debug_screen_{}.png", self.owner, storage::timestamp());
        let url = storage::upload_image(self.store, &path, &self.platform.capture_screen()?)?;
        Ok(Outcome::with_image(format!("Uploaded debug screen: {}", path), url))
    }

    /// Search for the configured template once and upload the marked-up screen.
    pub fn debug_locate(&self, config: &AgentConfig, target: FocusTarget) -> AgentResult<Outcome> {
        let profile = &config.ide;
        let template = match target {
            FocusTarget::Input => &profile.input_template,
            FocusTarget::Transcript => &profile.output_template,
        }
        .clone()
        .ok_or_else(|| {
            AgentError::config(format!("IDE_{}_IMAGE is not set", target.kind().to_uppercase()))
        })?;

        let search = TemplateSearch::standard(profile.image_timeout, profile.image_confidence);
        let found = search.search(self.platform, self.clock, &template)?;
        let mut screen = self.platform.capture_screen()?;
        if let Some(r) = found {
            mark_region(&mut screen, r);
        }

        let verdict = if found.is_some() { "found" } else { "not_found" };
        let path = format!(
            "{}/debug/locate_{}_{}_{}.png",
            self.owner,
            target.kind(),
            verdict,
            storage::timestamp()
        );
        let url = storage::upload_image(self.store, &path, &screen)?;

        let mut log = format!(
            "template={} timeout={:.1}s conf={:.2}\n",
            template.display(),
            profile.image_timeout.as_secs_f64(),
            profile.image_confidence
        );
        match found {
            Some(r) => log.push_str(&format!("found box={}", r)),
            None => log.push_str("not found"),
        }
        Ok(Outcome::with_image(log, url))
    }

    /// Countdown, then the template-sized region around the mouse.
    fn region_at_mouse(&self, config: &AgentConfig, target: FocusTarget) -> AgentResult<(Point, Region)> {
        let profile = &config.ide;
        logger::info_p(
            "diag",
            &format!("move the mouse over the {} within {:?}", target.label(), profile.learn_countdown),
        );
        self.clock.sleep(profile.learn_countdown);
        let mouse = self.platform.cursor_position()?;
        let (sw, sh) = self.platform.screen_size();
        let region = Region::centered_on(mouse, profile.learn_template_width, profile.learn_template_height)
            .clamp(sw, sh);
        Ok((mouse, region))
    }

    /// Save the screen around the mouse as the focus template for `target`.
    pub fn learn(&self, config: &AgentConfig, target: FocusTarget) -> AgentResult<Outcome> {
        let (mouse, region) = self.region_at_mouse(config, target)?;
        let screen = self.platform.capture_screen()?;
        let r = region.clamp(screen.width() as i32, screen.height() as i32);
        let template =
            imageops::crop_imm(&screen, r.left as u32, r.top as u32, r.width as u32, r.height as u32).to_image();

        let relative = PathBuf::from("assets").join(format!("ide_{}_template.png", target.kind()));
        let local = config.base_dir().join(&relative);
        if let Some(dir) = local.parent() {
            fs::create_dir_all(dir)?;
        }
        template.save(&local)?;
        logger::info_p("diag", &format!("saved {} template to {}", target.kind(), local.display()));

        let ts = storage::timestamp();
        let template_path = format!("{}/templates/ide_{}_template_{}.png", self.owner, target.kind(), ts);
        let template_url = storage::upload_image(self.store, &template_path, &template)?;

        let mut marked = screen;
        mark_region(&mut marked, r);
        let debug_path = format!("{}/debug/learn_{}_region_{}.png", self.owner, target.kind(), ts);
        let image_url = match storage::upload_image(self.store, &debug_path, &marked) {
            Ok(url) => url,
            Err(e) => {
                logger::debug_p("diag", &format!("learn debug upload failed: {}", e));
                template_url.clone()
            }
        };

        let log = format!(
            "Saved {} template: {}\nmouse_pos={}\nregion={}\ntemplate_url={}\nSet IDE_{}_IMAGE={}",
            target.kind(),
            local.display(),
            mouse,
            r,
            template_url,
            target.kind().to_uppercase(),
            relative.display()
        );
        Ok(Outcome::with_image(log, image_url))
    }

    /// Record regions around the mouse into the env file and the live profile.
    pub fn calibrate(&self, config: &mut AgentConfig, kind: CalibrateKind) -> AgentResult<Outcome> {
        let mut updates: Vec<(&str, String)> = Vec::new();
        let mut regions = Vec::new();
        for target in kind.targets() {
            let (_, region) = self.region_at_mouse(config, *target)?;
            let center = region.center();
            match target {
                FocusTarget::Input => {
                    config.ide.input_region = Some(region);
                    config.ide.input_point = Some(center);
                    updates.push(("IDE_INPUT_REGION", region.to_env()));
                    updates.push(("IDE_INPUT_POS", center.to_string()));
                }
                FocusTarget::Transcript => {
                    config.ide.output_region = Some(region);
                    config.ide.output_point = Some(center);
                    updates.push(("IDE_OUTPUT_REGION", region.to_env()));
                    updates.push(("IDE_OUTPUT_POS", center.to_string()));
                }
            }
            regions.push(region);
        }

        settings::upsert_env_vars(&config.env_path, &updates)
            .map_err(|e| AgentError::config(format!("{:#}", e)))?;
        for (k, v) in &updates {
            if let Some(raw) = config.raw_ide.iter_mut().find(|(key, _)| key == k) {
                raw.1 = v.clone();
            }
        }

        let mut screen = self.platform.capture_screen()?;
        for r in &regions {
            mark_region(&mut screen, *r);
        }
        let kind_name = match kind {
            CalibrateKind::Regions => "regions",
            CalibrateKind::Input => "input",
            CalibrateKind::Output => "output",
        };
        let path = format!("{}/debug/calibrate_{}_{}.png", self.owner, kind_name, storage::timestamp());
        let url = storage::upload_image(self.store, &path, &screen)?;

        let mut log = format!("Wrote {}:", config.env_path.display());
        for (k, v) in &updates {
            log.push_str(&format!("\n{}={}", k, v));
        }
        Ok(Outcome::with_image(log, url))
    }

    /// Snapshot of the chat bridge setup, aimed at "why does IDE chat fail?".
    pub fn status(&self, config: &AgentConfig) -> Outcome {
        let profile = &config.ide;
        let mut lines = vec![format!("env_path: {}", config.env_path.display())];
        for (key, raw) in &config.raw_ide {
            lines.push(format!("{}: {:?}", key, raw));
        }

        lines.push(format!("parsed input_pos: {}", show(profile.input_point)));
        lines.push(format!("parsed output_pos: {}", show(profile.output_point)));
        lines.push(format!("parsed input_region: {}", show(profile.input_region)));
        lines.push(format!("parsed output_region: {}", show(profile.output_region)));
        for (label, template) in [("input_template", &profile.input_template), ("output_template", &profile.output_template)] {
            match template {
                Some(p) => lines.push(format!("{}: {} (exists={})", label, p.display(), p.is_file())),
                None => lines.push(format!("{}: (unset)", label)),
            }
        }
        lines.push(format!("image_timeout: {:.1}s", profile.image_timeout.as_secs_f64()));
        lines.push(format!("image_confidence: {:.2}", profile.image_confidence));
        lines.push(format!("learn_countdown: {:.1}s", profile.learn_countdown.as_secs_f64()));
        lines.push(format!("response_wait: {:.1}s", profile.response_wait.as_secs_f64()));
        lines.push(format!("retry_count: {}", profile.retry_count));
        lines.push(format!("retry_wait: {:.1}s", profile.retry_wait.as_secs_f64()));
        let search = TemplateSearch::standard(profile.image_timeout, profile.image_confidence);
        lines.push(format!("matchers: {}", search.strategy_names().join(", ")));

        let input_ok = !methods_for(profile, FocusTarget::Input).is_empty();
        let transcript_ok = !methods_for(profile, FocusTarget::Transcript).is_empty();
        lines.push(format!("focus_input_configured: {}", input_ok));
        lines.push(format!("focus_transcript_configured: {}", transcript_ok));

        if profile.window_title_filter.is_empty() {
            lines.push("window_matches: (skipped; IDE_WINDOW_TITLE_SUBSTR is empty)".into());
        } else {
            match self.platform.find_windows(&profile.window_title_filter) {
                Ok(windows) => {
                    lines.push(format!("window_matches: {}", windows.len()));
                    let titles: Vec<String> = windows
                        .iter()
                        .map(|w| w.title.trim())
                        .filter(|t| !t.is_empty())
                        .take(TITLE_SAMPLE)
                        .map(|t| t.chars().take(TITLE_MAX_CHARS).collect())
                        .collect();
                    if !titles.is_empty() {
                        lines.push("window_titles_sample:".into());
                        lines.extend(titles.into_iter().map(|t| format!("- {}", t)));
                    }
                }
                Err(e) => lines.push(format!("window_check_error: {}", e)),
            }
        }

        if profile.window_title_filter.is_empty() {
            lines.push("WARN: IDE_WINDOW_TITLE_SUBSTR is empty (IDE chat will fail).".into());
        }
        if !input_ok {
            lines.push(format!(
                "WARN: No input focus method configured (set {}).",
                FocusTarget::Input.option_keys().join(" or ")
            ));
        }
        if !transcript_ok {
            lines.push(format!(
                "WARN: No transcript focus method configured (set {}).",
                FocusTarget::Transcript.option_keys().join(" or ")
            ));
        }
        Outcome::text(lines.join("\n"))
    }
}

fn show<T: std::fmt::Display>(v: Option<T>) -> String {
    v.map(|v| v.to_string()).unwrap_or_else(|| "(unset)".into())
}
