use std::fmt;

use serde::{Deserialize, Deserializer, Serialize};

/// Native window handle (HWND on Windows)
pub type WindowId = u64;

/// Smallest width/height a region may shrink to.
pub const MIN_REGION_SIDE: i32 = 40;

/// Screen point in pixels
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct Point {
    pub x: i32,
    pub y: i32,
}

impl Point {
    pub fn new(x: i32, y: i32) -> Self {
        Self { x, y }
    }

    /// Parse `"x,y"`.
    pub fn parse(spec: &str) -> Option<Self> {
        let parts: Vec<&str> = spec.split(',').map(str::trim).collect();
        if parts.len() != 2 {
            return None;
        }
        Some(Self::new(parts[0].parse().ok()?, parts[1].parse().ok()?))
    }
}

impl fmt::Display for Point {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{},{}", self.x, self.y)
    }
}

/// Screen rectangle used as a click or selection target
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct Region {
    pub left: i32,
    pub top: i32,
    pub width: i32,
    pub height: i32,
}

impl Region {
    pub fn new(left: i32, top: i32, width: i32, height: i32) -> Self {
        Self { left, top, width, height }
    }

    /// Region of the given size centred on `p`.
    pub fn centered_on(p: Point, width: i32, height: i32) -> Self {
        Self::new(p.x - width / 2, p.y - height / 2, width, height)
    }

    /// Parse `"left,top,width,height"`.
    pub fn parse(spec: &str) -> Option<Self> {
        let parts: Vec<i32> = spec
            .split(',')
            .map(|p| p.trim().parse::<i32>())
            .collect::<Result<_, _>>()
            .ok()?;
        match parts[..] {
            [l, t, w, h] => Some(Self::new(l, t, w, h)),
            _ => None,
        }
    }

    pub fn right(&self) -> i32 {
        self.left + self.width
    }

    pub fn bottom(&self) -> i32 {
        self.top + self.height
    }

    pub fn center(&self) -> Point {
        Point::new(self.left + self.width / 2, self.top + self.height / 2)
    }

    /// Keep the region on screen and at least `MIN_REGION_SIDE` on each side.
    pub fn clamp(&self, screen_w: i32, screen_h: i32) -> Self {
        let w = self.width.min(screen_w).max(MIN_REGION_SIDE);
        let h = self.height.min(screen_h).max(MIN_REGION_SIDE);
        let l = self.left.min(screen_w - w).max(0);
        let t = self.top.min(screen_h - h).max(0);
        Self::new(l, t, w, h)
    }

    /// Point `inset` pixels inside the top-left corner.
    pub fn near_top_left(&self, inset: i32) -> Point {
        let inset = inset.min(self.width / 2).min(self.height / 2);
        Point::new(self.left + inset, self.top + inset)
    }

    /// Point `inset` pixels inside the bottom-right corner.
    pub fn near_bottom_right(&self, inset: i32) -> Point {
        let inset = inset.min(self.width / 2).min(self.height / 2);
        Point::new(self.right() - inset, self.bottom() - inset)
    }

    pub fn to_env(&self) -> String {
        format!("{},{},{},{}", self.left, self.top, self.width, self.height)
    }
}

impl fmt::Display for Region {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "({},{},{},{})", self.left, self.top, self.width, self.height)
    }
}

/// One OS window that matched a title filter
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub struct TargetWindow {
    pub handle: WindowId,
    pub title: String,
    pub is_active: bool,
    pub is_minimized: bool,
    pub is_maximized: bool,
    pub width: i32,
    pub height: i32,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum JobStatus {
    Pending,
    Processing,
    Completed,
    Error,
    #[serde(other)]
    Unknown,
}

impl JobStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            JobStatus::Pending => "pending",
            JobStatus::Processing => "processing",
            JobStatus::Completed => "completed",
            JobStatus::Error => "error",
            JobStatus::Unknown => "unknown",
        }
    }

    pub fn is_terminal(&self) -> bool {
        matches!(self, JobStatus::Completed | JobStatus::Error)
    }
}

/// One row of the `commands` table
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Job {
    #[serde(default, deserialize_with = "string_or_number")]
    pub id: String,
    #[serde(default, deserialize_with = "string_or_number")]
    pub user_id: String,
    #[serde(default)]
    pub command_text: Option<String>,
    #[serde(default = "unknown_status", deserialize_with = "status_or_unknown")]
    pub status: JobStatus,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub response_log: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub image_url: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub created_at: Option<String>,
}

impl Job {
    pub fn new(id: impl Into<String>, user_id: impl Into<String>, command_text: impl Into<String>) -> Self {
        Self {
            id: id.into(),
            user_id: user_id.into(),
            command_text: Some(command_text.into()),
            status: JobStatus::Pending,
            response_log: None,
            image_url: None,
            created_at: None,
        }
    }

    pub fn command(&self) -> &str {
        self.command_text.as_deref().unwrap_or_default().trim()
    }
}

fn unknown_status() -> JobStatus {
    JobStatus::Unknown
}

fn status_or_unknown<'de, D: Deserializer<'de>>(de: D) -> Result<JobStatus, D::Error> {
    Ok(Option::<JobStatus>::deserialize(de)?.unwrap_or(JobStatus::Unknown))
}

impl Job {
    /// Decode a batch of rows one by one. Rows that do not parse are
    /// returned as errors next to the good ones instead of failing the batch.
    pub fn decode_rows(rows: Vec<serde_json::Value>) -> (Vec<Job>, Vec<String>) {
        let mut jobs = Vec::with_capacity(rows.len());
        let mut bad = Vec::new();
        for row in rows {
            match serde_json::from_value::<Job>(row.clone()) {
                Ok(job) => jobs.push(job),
                Err(e) => bad.push(format!("{}: {}", e, row)),
            }
        }
        (jobs, bad)
    }
}

fn string_or_number<'de, D: Deserializer<'de>>(de: D) -> Result<String, D::Error> {
    #[derive(Deserialize)]
    #[serde(untagged)]
    enum Id {
        Text(String),
        Number(i64),
        Missing(Option<()>),
    }
    Ok(match Id::deserialize(de)? {
        Id::Text(s) => s,
        Id::Number(n) => n.to_string(),
        Id::Missing(_) => String::new(),
    })
}

/// What a successful handler reports back to the job
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub struct Outcome {
    pub log: String,
    pub image_url: Option<String>,
}

impl Outcome {
    pub fn text(log: impl Into<String>) -> Self {
        Self { log: log.into(), image_url: None }
    }

    pub fn with_image(log: impl Into<String>, image_url: impl Into<String>) -> Self {
        Self { log: log.into(), image_url: Some(image_url.into()) }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn clamp_keeps_region_on_screen() {
        let screens = [(1920, 1080), (800, 600), (40, 40)];
        let regions = [
            Region::new(-50, -20, 10, 5),
            Region::new(1900, 1070, 300, 200),
            Region::new(100, 100, 5000, 5000),
            Region::new(0, 0, 0, 0),
            Region::new(500, 300, 120, 80),
        ];
        for (sw, sh) in screens {
            for r in regions {
                let c = r.clamp(sw, sh);
                assert!(c.width >= MIN_REGION_SIDE && c.height >= MIN_REGION_SIDE, "{c:?}");
                assert!(c.left >= 0 && c.top >= 0, "{c:?}");
                assert!(c.right() <= sw && c.bottom() <= sh, "{c:?} on {sw}x{sh}");
            }
        }
    }

    #[test]
    fn clamp_leaves_valid_region_alone() {
        let r = Region::new(500, 300, 120, 80);
        assert_eq!(r.clamp(1920, 1080), r);
    }

    #[test]
    fn parses_env_encodings() {
        assert_eq!(Point::parse("960, 980"), Some(Point::new(960, 980)));
        assert_eq!(Point::parse("960"), None);
        assert_eq!(Point::parse("a,b"), None);
        assert_eq!(Region::parse("10,20,300,40"), Some(Region::new(10, 20, 300, 40)));
        assert_eq!(Region::parse("10,20,300"), None);
        assert_eq!(Region::new(10, 20, 300, 40).to_env(), "10,20,300,40");
    }

    #[test]
    fn corner_points_stay_inside() {
        let r = Region::new(100, 200, 400, 300);
        assert_eq!(r.near_bottom_right(8), Point::new(492, 492));
        assert_eq!(r.near_top_left(8), Point::new(108, 208));
        assert_eq!(r.center(), Point::new(300, 350));
    }

    #[test]
    fn job_rows_accept_numeric_ids_and_unknown_status() {
        let job: Job = serde_json::from_str(
            r#"{"id": 42, "user_id": "u1", "command_text": " /pos ", "status": "queued"}"#,
        )
        .unwrap();
        assert_eq!(job.id, "42");
        assert_eq!(job.status, JobStatus::Unknown);
        assert_eq!(job.command(), "/pos");

        let job: Job = serde_json::from_str(r#"{"user_id": "u1", "status": "pending"}"#).unwrap();
        assert!(job.id.is_empty());
        assert_eq!(job.command(), "");
    }

    #[test]
    fn null_owner_row_does_not_sink_the_batch() {
        let rows: Vec<serde_json::Value> = serde_json::from_str(
            r#"[
                {"id": 1, "user_id": null, "command_text": "/pos", "status": "pending"},
                {"id": 2, "user_id": "u", "command_text": "/pos", "status": null},
                {"id": {"nested": true}, "user_id": "u", "command_text": "/pos"},
                {"id": 3, "user_id": "u", "command_text": "/sh ls", "status": "pending"}
            ]"#,
        )
        .unwrap();
        let (jobs, bad) = Job::decode_rows(rows);

        let ids: Vec<&str> = jobs.iter().map(|j| j.id.as_str()).collect();
        assert_eq!(ids, vec!["1", "2", "3"]);
        assert!(jobs[0].user_id.is_empty());
        assert_eq!(jobs[1].status, JobStatus::Unknown);
        assert_eq!(jobs[2].user_id, "u");
        assert_eq!(bad.len(), 1);
    }
}
