use crate::error::AgentResult;
use crate::interpreter::{Handled, Interpreter};
use crate::logger;
use crate::types::*;

/// Batch size for the first sweep after startup.
pub const BOOTSTRAP_BATCH: usize = 50;

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct PollSummary {
    pub fetched: usize,
    pub finished: usize,
    pub skipped: usize,
    pub lost: usize,
    pub failed: usize,
}

/// Sequential poll loop: fetch pending jobs, run each to completion, sleep.
pub struct Orchestrator {
    interpreter: Interpreter,
}

impl Orchestrator {
    pub fn new(interpreter: Interpreter) -> Self {
        Self { interpreter }
    }

    pub fn interpreter(&self) -> &Interpreter {
        &self.interpreter
    }

    /// One fetch plus handling of every row it returned, oldest first.
    pub fn poll_once(&mut self, limit: usize) -> AgentResult<PollSummary> {
        let ctx = self.interpreter.context();
        let owner = ctx.config.agent_user_id.clone();
        let mut jobs = ctx.queue.pending(limit, owner.as_deref())?;
        jobs.sort_by(|a: &Job, b: &Job| a.created_at.cmp(&b.created_at));

        let mut summary = PollSummary { fetched: jobs.len(), ..Default::default() };
        for job in &jobs {
            match self.interpreter.handle(job) {
                Ok(Handled::Finished(_)) => summary.finished += 1,
                Ok(Handled::Skipped(why)) => {
                    logger::debug(&format!("job {} skipped: {}", job.id, why));
                    summary.skipped += 1;
                }
                Ok(Handled::Lost) => summary.lost += 1,
                Err(e) => {
                    logger::error(&format!("job {}: queue error: {}", job.id, e));
                    summary.failed += 1;
                }
            }
        }
        Ok(summary)
    }

    /// Work off whatever piled up while the agent was down.
    pub fn bootstrap(&mut self) -> AgentResult<PollSummary> {
        let summary = self.poll_once(BOOTSTRAP_BATCH)?;
        if summary.fetched > 0 {
            logger::info(&format!("found {} pending command(s) on startup", summary.fetched));
        }
        Ok(summary)
    }

    /// Bootstrap, then poll every `POLL_INTERVAL_SEC`. `max_polls` bounds the
    /// loop; `None` runs until the process is stopped.
    pub fn run(&mut self, max_polls: Option<u64>) {
        if let Err(e) = self.bootstrap() {
            logger::error(&format!("startup sweep failed: {}", e));
        }
        let (interval, batch) = {
            let config = &self.interpreter.context().config;
            (config.poll_interval, config.poll_max_batch)
        };
        logger::info(&format!("polling pending commands every {:.2}s", interval.as_secs_f64()));

        let mut polls = 0u64;
        while max_polls.map_or(true, |max| polls < max) {
            if let Err(e) = self.poll_once(batch) {
                logger::error(&format!("polling loop error: {}", e));
            }
            polls += 1;
            self.interpreter.context().clock.sleep(interval);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::AgentConfig;
    use crate::interpreter::AgentContext;
    use crate::platform::stub::StubPlatform;
    use crate::queue::MemoryQueue;
    use crate::sleep::ManualClock;
    use crate::storage::LocalStore;
    use std::path::Path;
    use std::sync::Arc;

    fn orchestrator(owner: Option<&str>) -> (Arc<MemoryQueue>, Orchestrator) {
        let owner = owner.map(str::to_string);
        let config = AgentConfig::from_lookup(Path::new(".env"), move |k| {
            if k == "AGENT_USER_ID" {
                owner.clone()
            } else {
                None
            }
        })
        .unwrap();
        let queue = Arc::new(MemoryQueue::new(1000));
        let interpreter = Interpreter::new(AgentContext {
            config,
            queue: Box::new(Arc::clone(&queue)),
            store: Box::new(LocalStore::new(&std::env::temp_dir())),
            platform: Box::new(StubPlatform::new()),
            clock: Box::new(ManualClock::new()),
        });
        (queue, Orchestrator::new(interpreter))
    }

    fn job(id: &str, owner: &str, created: &str) -> Job {
        let mut j = Job::new(id, owner, "/pos");
        j.created_at = Some(created.to_string());
        j
    }

    #[test]
    fn jobs_run_oldest_first() {
        let (queue, mut orch) = orchestrator(None);
        queue.push(job("late", "u1", "2024-05-01T10:00:09Z"));
        queue.push(job("early", "u1", "2024-05-01T10:00:01Z"));
        queue.push(job("middle", "u2", "2024-05-01T10:00:05Z"));

        let summary = orch.poll_once(20).unwrap();
        assert_eq!(summary.fetched, 3);
        assert_eq!(summary.finished, 3);

        let order: Vec<String> = queue.history().into_iter().map(|(id, _)| id).collect();
        assert_eq!(order, vec!["early", "middle", "late"]);
    }

    #[test]
    fn owner_filter_and_batch_limit_apply() {
        let (queue, mut orch) = orchestrator(Some("u1"));
        queue.push(job("a", "u1", "2024-05-01T10:00:01Z"));
        queue.push(job("b", "u2", "2024-05-01T10:00:02Z"));
        queue.push(job("c", "u1", "2024-05-01T10:00:03Z"));

        assert_eq!(orch.poll_once(1).unwrap().finished, 1);
        assert_eq!(queue.get("c").unwrap().status, JobStatus::Pending);
        orch.run(Some(1));
        assert_eq!(queue.get("c").unwrap().status, JobStatus::Completed);
        assert_eq!(queue.get("b").unwrap().status, JobStatus::Pending);
    }

    #[test]
    fn finished_jobs_are_not_picked_up_again() {
        let (queue, mut orch) = orchestrator(None);
        queue.push(job("a", "u1", "2024-05-01T10:00:01Z"));
        orch.run(Some(3));
        assert_eq!(queue.updates_for("a").len(), 1);
    }
}
