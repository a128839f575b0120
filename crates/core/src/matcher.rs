use std::path::Path;
use std::time::Duration;

use image::{imageops, GrayImage, Luma};

use crate::error::{AgentError, AgentResult};
use crate::logger;
use crate::platform::Platform;
use crate::sleep::Clock;
use crate::types::*;

const POLL_MS: u64 = 100;

/// One strategy for finding a template inside a screenshot.
pub trait Matcher: Send + Sync {
    fn name(&self) -> &'static str;
    /// Best location of `template` in `screen`, if it clears `confidence`.
    fn locate(&self, screen: &GrayImage, template: &GrayImage, confidence: f32) -> Option<Region>;
}

/// Similarity-scored search: `1 - mean(|screen - template|) / 255`.
///
/// Large templates are searched on a box-downsampled copy first and the
/// best coarse hits are refined at full resolution.
pub struct ScoredMatcher {
    pub max_candidates: usize,
}

impl Default for ScoredMatcher {
    fn default() -> Self {
        Self { max_candidates: 8 }
    }
}

/// Pixel-exact search, for when scoring rejects a template that is really there.
pub struct ExactMatcher;

fn downsample(img: &GrayImage, factor: u32) -> GrayImage {
    if factor <= 1 {
        return img.clone();
    }
    let w = img.width() / factor;
    let h = img.height() / factor;
    let area = factor * factor;
    GrayImage::from_fn(w, h, |x, y| {
        let mut sum = 0u32;
        for dy in 0..factor {
            for dx in 0..factor {
                sum += img.get_pixel(x * factor + dx, y * factor + dy)[0] as u32;
            }
        }
        Luma([(sum / area) as u8])
    })
}

/// Sum of absolute differences at (`ox`, `oy`), giving up once it exceeds `limit`.
fn sad_at(screen: &GrayImage, template: &GrayImage, ox: u32, oy: u32, limit: u64) -> Option<u64> {
    let tw = template.width() as usize;
    let sw = screen.width() as usize;
    let s = screen.as_raw();
    let t = template.as_raw();
    let mut total = 0u64;
    for y in 0..template.height() as usize {
        let srow = (oy as usize + y) * sw + ox as usize;
        let trow = y * tw;
        total += s[srow..srow + tw]
            .iter()
            .zip(&t[trow..trow + tw])
            .map(|(a, b)| (*a as i32 - *b as i32).unsigned_abs() as u64)
            .sum::<u64>();
        if total > limit {
            return None;
        }
    }
    Some(total)
}

fn fits(screen: &GrayImage, template: &GrayImage) -> bool {
    template.width() > 0
        && template.height() > 0
        && template.width() <= screen.width()
        && template.height() <= screen.height()
}

impl Matcher for ScoredMatcher {
    fn name(&self) -> &'static str {
        "scored-grayscale"
    }

    fn locate(&self, screen: &GrayImage, template: &GrayImage, confidence: f32) -> Option<Region> {
        if !fits(screen, template) {
            return None;
        }
        let (tw, th) = template.dimensions();
        let factor = (tw.min(th) / 16).clamp(1, 4);

        // Coarse pass: keep the lowest-SAD positions.
        let small_screen = downsample(screen, factor);
        let small_template = downsample(template, factor);
        if !fits(&small_screen, &small_template) {
            return None;
        }
        let keep = self.max_candidates.max(1);
        let mut candidates: Vec<(u64, u32, u32)> = Vec::with_capacity(keep + 1);
        for y in 0..=(small_screen.height() - small_template.height()) {
            for x in 0..=(small_screen.width() - small_template.width()) {
                let limit = if candidates.len() < keep {
                    u64::MAX
                } else {
                    candidates[candidates.len() - 1].0
                };
                if let Some(sad) = sad_at(&small_screen, &small_template, x, y, limit) {
                    let pos = candidates.partition_point(|c| c.0 <= sad);
                    candidates.insert(pos, (sad, x, y));
                    candidates.truncate(keep);
                }
            }
        }

        // Fine pass around each coarse hit.
        let n = (tw * th) as f64;
        let budget = ((1.0 - confidence as f64) * 255.0 * n).floor() as u64;
        let max_x = screen.width() - tw;
        let max_y = screen.height() - th;
        let reach = factor as i64;
        let mut best: Option<(u64, u32, u32)> = None;
        for (_, cx, cy) in candidates {
            let (bx, by) = ((cx * factor) as i64, (cy * factor) as i64);
            for y in (by - reach).max(0)..=(by + reach).min(max_y as i64) {
                for x in (bx - reach).max(0)..=(bx + reach).min(max_x as i64) {
                    let limit = best.map(|b| b.0).unwrap_or(budget).min(budget);
                    if let Some(sad) = sad_at(screen, template, x as u32, y as u32, limit) {
                        if best.map_or(true, |b| sad < b.0) {
                            best = Some((sad, x as u32, y as u32));
                        }
                    }
                }
            }
            if best.map_or(false, |b| b.0 == 0) {
                break;
            }
        }

        best.map(|(_, x, y)| Region::new(x as i32, y as i32, tw as i32, th as i32))
    }
}

impl Matcher for ExactMatcher {
    fn name(&self) -> &'static str {
        "exact-grayscale"
    }

    fn locate(&self, screen: &GrayImage, template: &GrayImage, _confidence: f32) -> Option<Region> {
        if !fits(screen, template) {
            return None;
        }
        let (tw, th) = template.dimensions();
        for y in 0..=(screen.height() - th) {
            for x in 0..=(screen.width() - tw) {
                if sad_at(screen, template, x, y, 0).is_some() {
                    return Some(Region::new(x as i32, y as i32, tw as i32, th as i32));
                }
            }
        }
        None
    }
}

pub fn load_template(path: &Path) -> AgentResult<GrayImage> {
    if !path.is_file() {
        return Err(AgentError::TemplateMissing(path.to_path_buf()));
    }
    Ok(image::open(path)?.to_luma8())
}

/// Time-bounded template search over repeated screenshots.
pub struct TemplateSearch {
    matchers: Vec<Box<dyn Matcher>>,
    pub timeout: Duration,
    pub confidence: f32,
}

impl TemplateSearch {
    /// Scored match first, exact match as fallback.
    pub fn standard(timeout: Duration, confidence: f32) -> Self {
        Self::with_matchers(
            vec![Box::new(ScoredMatcher::default()), Box::new(ExactMatcher)],
            timeout,
            confidence,
        )
    }

    pub fn with_matchers(matchers: Vec<Box<dyn Matcher>>, timeout: Duration, confidence: f32) -> Self {
        Self { matchers, timeout, confidence }
    }

    pub fn strategy_names(&self) -> Vec<&'static str> {
        self.matchers.iter().map(|m| m.name()).collect()
    }

    /// Try every matcher once against a single screenshot.
    pub fn find_once(&self, screen: &GrayImage, template: &GrayImage) -> Option<Region> {
        for m in &self.matchers {
            if let Some(found) = m.locate(screen, template, self.confidence) {
                logger::debug_p("match", &format!("{} matched at {}", m.name(), found));
                return Some(found);
            }
        }
        None
    }

    /// Poll the screen until the template shows up or the timeout passes.
    pub fn search(&self, platform: &dyn Platform, clock: &dyn Clock, template_path: &Path) -> AgentResult<Option<Region>> {
        let template = load_template(template_path)?;
        let deadline = clock.now() + self.timeout;
        loop {
            let screen = imageops::grayscale(&platform.capture_screen()?);
            if let Some(found) = self.find_once(&screen, &template) {
                return Ok(Some(found));
            }
            if clock.now() >= deadline {
                logger::debug_p(
                    "match",
                    &format!("{} not found within {:?}", template_path.display(), self.timeout),
                );
                return Ok(None);
            }
            clock.sleep_ms(POLL_MS);
        }
    }
}
