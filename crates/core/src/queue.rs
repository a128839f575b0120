use std::collections::BTreeMap;
use std::sync::{Arc, Mutex};
use std::time::Duration;

use reqwest::blocking::Client;
use serde::Serialize;
use serde_json::json;

use crate::config::Backend;
use crate::error::AgentResult;
use crate::logger;
use crate::types::*;

const TABLE: &str = "commands";
const TRUNCATED_PREFIX: &str = "[log truncated]\n";

/// Fields written back to a job row. `None` leaves the column alone.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct JobUpdate {
    pub status: JobStatus,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub response_log: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub image_url: Option<String>,
}

impl JobUpdate {
    pub fn progress(log: impl Into<String>) -> Self {
        Self { status: JobStatus::Processing, response_log: Some(log.into()), image_url: None }
    }

    pub fn completed(outcome: Outcome) -> Self {
        Self { status: JobStatus::Completed, response_log: Some(outcome.log), image_url: outcome.image_url }
    }

    pub fn failed(log: impl Into<String>) -> Self {
        Self { status: JobStatus::Error, response_log: Some(log.into()), image_url: None }
    }
}

/// Persistent table of jobs.
pub trait JobQueue: Send {
    /// Pending jobs, oldest first, optionally only those owned by `owner`.
    fn pending(&self, limit: usize, owner: Option<&str>) -> AgentResult<Vec<Job>>;
    /// Conditionally move `pending -> processing`. `Ok(None)` means someone else won.
    fn claim(&self, id: &str) -> AgentResult<Option<Job>>;
    fn update(&self, id: &str, update: &JobUpdate) -> AgentResult<()>;
}

impl<Q: JobQueue + Sync> JobQueue for Arc<Q> {
    fn pending(&self, limit: usize, owner: Option<&str>) -> AgentResult<Vec<Job>> {
        (**self).pending(limit, owner)
    }

    fn claim(&self, id: &str) -> AgentResult<Option<Job>> {
        (**self).claim(id)
    }

    fn update(&self, id: &str, update: &JobUpdate) -> AgentResult<()> {
        (**self).update(id, update)
    }
}

/// Keep the tail of `text` when it runs over `max_chars` characters.
pub fn truncate_log(text: &str, max_chars: usize) -> String {
    let total = text.chars().count();
    if total <= max_chars {
        return text.to_string();
    }
    let tail: String = text.chars().skip(total - max_chars).collect();
    format!("{}{}", TRUNCATED_PREFIX, tail)
}

fn bounded(update: &JobUpdate, max_chars: usize) -> JobUpdate {
    let mut update = update.clone();
    if let Some(log) = update.response_log.take() {
        update.response_log = Some(truncate_log(&log, max_chars));
    }
    update
}

/// PostgREST client for the `commands` table.
pub struct SupabaseQueue {
    client: Client,
    base: String,
    key: String,
    max_log_chars: usize,
}

impl SupabaseQueue {
    pub fn new(backend: &Backend, max_log_chars: usize) -> AgentResult<Self> {
        let client = Client::builder().timeout(Duration::from_secs(30)).build()?;
        Ok(Self {
            client,
            base: format!("{}/rest/v1/{}", backend.url, TABLE),
            key: backend.key.clone(),
            max_log_chars,
        })
    }

    fn authed(&self, req: reqwest::blocking::RequestBuilder) -> reqwest::blocking::RequestBuilder {
        req.header("apikey", &self.key)
            .header("Authorization", format!("Bearer {}", self.key))
    }
}

impl JobQueue for SupabaseQueue {
    fn pending(&self, limit: usize, owner: Option<&str>) -> AgentResult<Vec<Job>> {
        let mut query: Vec<(&str, String)> = vec![
            ("select", "id,user_id,command_text,status,created_at".into()),
            ("status", "eq.pending".into()),
            ("order", "created_at.asc".into()),
            ("limit", limit.to_string()),
        ];
        if let Some(owner) = owner {
            query.push(("user_id", format!("eq.{}", owner)));
        }
        let rows = self
            .authed(self.client.get(&self.base))
            .query(&query)
            .send()?
            .error_for_status()?
            .json::<Vec<serde_json::Value>>()?;
        let (jobs, bad) = Job::decode_rows(rows);
        for row in bad {
            logger::warn(&format!("skipping malformed row: {}", row));
        }
        Ok(jobs)
    }

    fn claim(&self, id: &str) -> AgentResult<Option<Job>> {
        let rows = self
            .authed(self.client.patch(&self.base))
            .query(&[("id", format!("eq.{}", id)), ("status", "eq.pending".to_string())])
            .header("Prefer", "return=representation")
            .json(&json!({ "status": "processing", "response_log": "Command received" }))
            .send()?
            .error_for_status()?
            .json::<Vec<Job>>()?;
        Ok(rows.into_iter().next())
    }

    fn update(&self, id: &str, update: &JobUpdate) -> AgentResult<()> {
        let body = bounded(update, self.max_log_chars);
        self.authed(self.client.patch(&self.base))
            .query(&[("id", format!("eq.{}", id))])
            .json(&body)
            .send()?
            .error_for_status()?;
        logger::debug_p("queue", &format!("job {} -> {}", id, body.status.as_str()));
        Ok(())
    }
}

/// In-process queue with the same claim semantics as the backend.
pub struct MemoryQueue {
    jobs: Mutex<BTreeMap<String, Job>>,
    history: Mutex<Vec<(String, JobUpdate)>>,
    max_log_chars: usize,
}

impl MemoryQueue {
    pub fn new(max_log_chars: usize) -> Self {
        Self {
            jobs: Mutex::new(BTreeMap::new()),
            history: Mutex::new(Vec::new()),
            max_log_chars,
        }
    }

    pub fn push(&self, job: Job) {
        self.lock_jobs().insert(job.id.clone(), job);
    }

    pub fn get(&self, id: &str) -> Option<Job> {
        self.lock_jobs().get(id).cloned()
    }

    /// Every update applied, oldest first (claims excluded).
    pub fn history(&self) -> Vec<(String, JobUpdate)> {
        self.lock_history().clone()
    }

    /// Every update applied to `id`, in order (claims excluded).
    pub fn updates_for(&self, id: &str) -> Vec<JobUpdate> {
        self.lock_history()
            .iter()
            .filter(|(job, _)| job == id)
            .map(|(_, u)| u.clone())
            .collect()
    }

    fn lock_jobs(&self) -> std::sync::MutexGuard<'_, BTreeMap<String, Job>> {
        self.jobs.lock().unwrap_or_else(|p| p.into_inner())
    }

    fn lock_history(&self) -> std::sync::MutexGuard<'_, Vec<(String, JobUpdate)>> {
        self.history.lock().unwrap_or_else(|p| p.into_inner())
    }
}

impl JobQueue for MemoryQueue {
    fn pending(&self, limit: usize, owner: Option<&str>) -> AgentResult<Vec<Job>> {
        let mut jobs: Vec<Job> = self
            .lock_jobs()
            .values()
            .filter(|j| j.status == JobStatus::Pending)
            .filter(|j| owner.map_or(true, |o| j.user_id == o))
            .cloned()
            .collect();
        jobs.sort_by(|a, b| a.created_at.cmp(&b.created_at));
        jobs.truncate(limit);
        Ok(jobs)
    }

    fn claim(&self, id: &str) -> AgentResult<Option<Job>> {
        let mut jobs = self.lock_jobs();
        match jobs.get_mut(id) {
            Some(job) if job.status == JobStatus::Pending => {
                job.status = JobStatus::Processing;
                job.response_log = Some("Command received".into());
                Ok(Some(job.clone()))
            }
            _ => Ok(None),
        }
    }

    fn update(&self, id: &str, update: &JobUpdate) -> AgentResult<()> {
        let body = bounded(update, self.max_log_chars);
        if let Some(job) = self.lock_jobs().get_mut(id) {
            job.status = body.status;
            if body.response_log.is_some() {
                job.response_log = body.response_log.clone();
            }
            if body.image_url.is_some() {
                job.image_url = body.image_url.clone();
            }
        }
        self.lock_history().push((id.to_string(), body));
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Arc;
    use std::thread;

    #[test]
    fn truncation_keeps_the_tail() {
        assert_eq!(truncate_log("short", 10), "short");
        assert_eq!(truncate_log("abcdefghij", 4), "[log truncated]\nghij");
        assert_eq!(truncate_log("가나다라", 2), "[log truncated]\n다라");
    }

    #[test]
    fn only_one_of_two_racing_claims_wins() {
        for round in 0..50 {
            let queue = Arc::new(MemoryQueue::new(100));
            queue.push(Job::new(format!("job-{}", round), "u1", "/pos"));
            let id = format!("job-{}", round);

            let handles: Vec<_> = (0..2)
                .map(|_| {
                    let q = Arc::clone(&queue);
                    let id = id.clone();
                    thread::spawn(move || q.claim(&id).unwrap().is_some())
                })
                .collect();
            let wins = handles.into_iter().map(|h| h.join().unwrap()).filter(|w| *w).count();
            assert_eq!(wins, 1);
            assert_eq!(queue.get(&id).unwrap().status, JobStatus::Processing);
        }
    }

    #[test]
    fn pending_filters_owner_and_orders_by_creation() {
        let queue = MemoryQueue::new(100);
        let mut a = Job::new("a", "u1", "x");
        a.created_at = Some("2024-05-01T10:00:02Z".into());
        let mut b = Job::new("b", "u1", "x");
        b.created_at = Some("2024-05-01T10:00:01Z".into());
        let mut c = Job::new("c", "u2", "x");
        c.created_at = Some("2024-05-01T10:00:00Z".into());
        queue.push(a);
        queue.push(b);
        queue.push(c);

        let ids: Vec<String> = queue.pending(10, Some("u1")).unwrap().into_iter().map(|j| j.id).collect();
        assert_eq!(ids, vec!["b", "a"]);
        assert_eq!(queue.pending(1, None).unwrap()[0].id, "c");
    }

    #[test]
    fn updates_are_truncated() {
        let queue = MemoryQueue::new(3);
        queue.push(Job::new("1", "u", "x"));
        queue.update("1", &JobUpdate::failed("abcdef")).unwrap();
        let job = queue.get("1").unwrap();
        assert_eq!(job.status, JobStatus::Error);
        assert_eq!(job.response_log.as_deref(), Some("[log truncated]\ndef"));
    }

    #[test]
    fn update_payload_omits_unset_columns() {
        let body = serde_json::to_value(JobUpdate::progress("half")).unwrap();
        assert_eq!(body, json!({ "status": "processing", "response_log": "half" }));
    }
}
