use std::any::Any;
use std::panic::{self, AssertUnwindSafe};

use crate::bridge;
use crate::command::Command;
use crate::config::AgentConfig;
use crate::diagnostics::Diagnostics;
use crate::error::AgentResult;
use crate::logger;
use crate::platform::Platform;
use crate::queue::{JobQueue, JobUpdate};
use crate::shell::{self, ShellOptions};
use crate::sleep::Clock;
use crate::storage::ObjectStore;
use crate::types::*;

/// Everything a job handler may touch.
pub struct AgentContext {
    pub config: AgentConfig,
    pub queue: Box<dyn JobQueue>,
    pub store: Box<dyn ObjectStore>,
    pub platform: Box<dyn Platform>,
    pub clock: Box<dyn Clock>,
}

/// What became of one job row.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Handled {
    Skipped(&'static str),
    /// Another worker claimed it first.
    Lost,
    Finished(JobStatus),
}

pub struct Interpreter {
    ctx: AgentContext,
}

fn panic_message(payload: &(dyn Any + Send)) -> String {
    if let Some(s) = payload.downcast_ref::<&str>() {
        s.to_string()
    } else if let Some(s) = payload.downcast_ref::<String>() {
        s.clone()
    } else {
        "unknown panic".to_string()
    }
}

impl Interpreter {
    pub fn new(ctx: AgentContext) -> Self {
        Self { ctx }
    }

    pub fn context(&self) -> &AgentContext {
        &self.ctx
    }

    /// Claim and run one job, reporting exactly one terminal status for it.
    ///
    /// Only queue failures come back as `Err`; handler failures and panics
    /// are written to the job.
    pub fn handle(&mut self, job: &Job) -> AgentResult<Handled> {
        if job.id.is_empty() || job.user_id.is_empty() {
            logger::warn(&format!("skipping malformed row: {:?}", job));
            return Ok(Handled::Skipped("malformed"));
        }
        if let Some(owner) = &self.ctx.config.agent_user_id {
            if &job.user_id != owner {
                return Ok(Handled::Skipped("other owner"));
            }
        }
        if job.status != JobStatus::Pending {
            return Ok(Handled::Skipped("not pending"));
        }

        let text = job.command().to_string();
        if text.is_empty() {
            self.ctx.queue.update(&job.id, &JobUpdate::failed("Empty command_text"))?;
            return Ok(Handled::Finished(JobStatus::Error));
        }

        if self.ctx.queue.claim(&job.id)?.is_none() {
            logger::debug(&format!("job {} already claimed elsewhere", job.id));
            return Ok(Handled::Lost);
        }
        logger::info(&format!("job {} claimed: {:?}", job.id, text));

        let result = panic::catch_unwind(AssertUnwindSafe(|| self.dispatch(&job.id, &job.user_id, &text)));
        let update = match result {
            Ok(Ok(outcome)) => {
                logger::info(&format!("job {} completed", job.id));
                JobUpdate::completed(outcome)
            }
            Ok(Err(e)) => {
                logger::error(&format!("job {} failed: {}", job.id, e));
                JobUpdate::failed(e.to_string())
            }
            Err(payload) => {
                let msg = panic_message(payload.as_ref());
                logger::error(&format!("job {} panicked: {}", job.id, msg));
                JobUpdate::failed(format!("Handler panicked: {}", msg))
            }
        };
        let status = update.status;
        self.ctx.queue.update(&job.id, &update)?;
        Ok(Handled::Finished(status))
    }

    fn dispatch(&mut self, job_id: &str, owner: &str, text: &str) -> AgentResult<Outcome> {
        let command = Command::parse(text)?;
        let ctx = &mut self.ctx;
        let diag = Diagnostics {
            platform: ctx.platform.as_ref(),
            clock: ctx.clock.as_ref(),
            store: ctx.store.as_ref(),
            owner,
        };

        match command {
            Command::Position => diag.position(),
            Command::Learn(target) => diag.learn(&ctx.config, target),
            Command::Status => Ok(diag.status(&ctx.config)),
            Command::Calibrate(kind) => diag.calibrate(&mut ctx.config, kind),
            Command::DebugScreen => diag.debug_screen(),
            Command::DebugLocate(target) => diag.debug_locate(&ctx.config, target),
            Command::Capture => diag.capture(),
            Command::Open(app) => shell::open_app(&app).map(Outcome::text),
            Command::Shell(cmd) => run_reporting(ctx.queue.as_ref(), &ctx.config, job_id, &cmd),
            Command::Whoami => run_reporting(ctx.queue.as_ref(), &ctx.config, job_id, "whoami"),
            Command::Ask { target, question } => {
                if let Some(t) = target {
                    logger::info(&format!("job {} addressed to {} (using the configured window)", job_id, t.name()));
                }
                bridge::ask(ctx.platform.as_ref(), ctx.clock.as_ref(), &ctx.config.ide, &question).map(Outcome::text)
            }
        }
    }
}

/// Run a shell command, mirroring partial output onto the job as it arrives.
fn run_reporting(queue: &dyn JobQueue, config: &AgentConfig, job_id: &str, cmd: &str) -> AgentResult<Outcome> {
    let opts = ShellOptions { timeout: config.command_timeout, flush_interval: config.log_flush_interval };
    let mut report = |partial: &str| {
        if let Err(e) = queue.update(job_id, &JobUpdate::progress(partial)) {
            logger::warn(&format!("job {}: partial log update failed: {}", job_id, e));
        }
    };
    shell::run_shell(cmd, opts, &mut report).map(Outcome::text)
}
