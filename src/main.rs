use std::path::PathBuf;
use std::process::ExitCode;
use std::sync::Arc;

use anyhow::{Context, Result};
use clap::Parser;

use vibe_core::config::AgentConfig;
use vibe_core::guard::InstanceGuard;
use vibe_core::interpreter::{AgentContext, Handled, Interpreter};
use vibe_core::orchestrator::Orchestrator;
use vibe_core::platform::create_platform;
use vibe_core::queue::{MemoryQueue, SupabaseQueue};
use vibe_core::sleep::SystemClock;
use vibe_core::storage::{LocalStore, SupabaseStorage};
use vibe_core::types::{Job, JobStatus};
use vibe_core::logger;

#[derive(Parser, Debug)]
#[command(name = "vibe-agent", version, about = "Runs queued remote commands on this desktop")]
struct Cli {
    /// Env file to load (and to update when calibrating)
    #[arg(long, default_value = ".env")]
    env: PathBuf,

    /// Use the in-memory desktop instead of real input and windows
    #[arg(long)]
    stub: bool,

    /// Run one command locally and print the result; no backend involved
    #[arg(long, value_name = "COMMAND")]
    exec: Option<String>,

    /// Work off the pending backlog once, then exit
    #[arg(long)]
    once: bool,

    /// Write debug lines to the log
    #[arg(long)]
    verbose: bool,
}

fn main() -> ExitCode {
    let cli = Cli::parse();
    match run(cli) {
        Ok(code) => code,
        Err(e) => {
            logger::error(&format!("{:#}", e));
            eprintln!("error: {:#}", e);
            ExitCode::FAILURE
        }
    }
}

fn run(cli: Cli) -> Result<ExitCode> {
    let env_loaded = dotenvy::from_path_override(&cli.env).is_ok();
    let config = AgentConfig::from_env(&cli.env).context("invalid configuration")?;

    logger::init(&config.base_dir().join("logs"), true, cli.verbose)
        .context("failed to open log file")?;
    logger::register_prefix("bridge", logger::COLOR_BLUE);
    logger::register_prefix("shell", logger::COLOR_YELLOW);
    if env_loaded {
        logger::info(&format!("loaded {}", cli.env.display()));
    } else {
        logger::warn(&format!("{} not found; using process environment only", cli.env.display()));
    }

    let platform = create_platform(cli.stub);
    logger::info(&format!("platform: {}", platform.name()));

    if let Some(command) = cli.exec {
        return exec_local(config, platform, &command);
    }

    let _guard = InstanceGuard::acquire(config.lock_port)?;
    let backend = config.require_backend()?.clone();
    let ctx = AgentContext {
        queue: Box::new(SupabaseQueue::new(&backend, config.log_max_chars)?),
        store: Box::new(SupabaseStorage::new(&backend)?),
        platform,
        clock: Box::new(SystemClock),
        config,
    };

    let mut orchestrator = Orchestrator::new(Interpreter::new(ctx));
    if cli.once {
        let summary = orchestrator.bootstrap()?;
        logger::info(&format!("done: {:?}", summary));
    } else {
        orchestrator.run(None);
    }
    Ok(ExitCode::SUCCESS)
}

/// Push `command` through the interpreter against an in-memory queue.
fn exec_local(
    config: AgentConfig,
    platform: Box<dyn vibe_core::platform::Platform>,
    command: &str,
) -> Result<ExitCode> {
    let owner = config.agent_user_id.clone().unwrap_or_else(|| "local".to_string());
    let queue = Arc::new(MemoryQueue::new(config.log_max_chars));
    let store = LocalStore::new(&config.base_dir().join("captures"));
    queue.push(Job::new("local-1", owner, command));

    let mut interpreter = Interpreter::new(AgentContext {
        config,
        queue: Box::new(Arc::clone(&queue)),
        store: Box::new(store),
        platform,
        clock: Box::new(SystemClock),
    });
    let job = queue.get("local-1").context("local job vanished")?;
    let handled = interpreter.handle(&job)?;

    let done = queue.get("local-1").context("local job vanished")?;
    println!("status: {}", done.status.as_str());
    if let Some(url) = &done.image_url {
        println!("image: {}", url);
    }
    println!("{}", done.response_log.unwrap_or_default());

    Ok(match handled {
        Handled::Finished(JobStatus::Completed) => ExitCode::SUCCESS,
        _ => ExitCode::FAILURE,
    })
}
