//! Single job execution command.

use anyhow::{Context, Result};
use buildit_config::WorkerConfig;
use buildit_core::job::JobData;
use buildit_executor::LocalRunner;
use buildit_worker::git::SPAWN_FAILURE_EXIT_CODE;
use buildit_worker::{BroadcastQueue, Job, QueueEvent};
use serde_json::json;
use std::path::PathBuf;
use std::sync::Arc;
use tokio::sync::broadcast::error::RecvError;
use tracing::{info, warn};

pub struct RunOptions {
    pub job_path: PathBuf,
    pub dir: PathBuf,
    pub config_path: PathBuf,
    pub disable_pty: bool,
    pub no_update: bool,
    pub command: Option<String>,
}

/// Run one job and return the exit code it completed with.
pub async fn run_job(options: RunOptions) -> Result<i32> {
    let content = std::fs::read_to_string(&options.job_path)
        .with_context(|| format!("Failed to read job file: {}", options.job_path.display()))?;
    let data: JobData = serde_json::from_str(&content)
        .with_context(|| format!("Failed to parse job file: {}", options.job_path.display()))?;

    let config = load_config(&options)?;

    std::fs::create_dir_all(&options.dir).with_context(|| {
        format!("Failed to create working directory: {}", options.dir.display())
    })?;

    let queue = BroadcastQueue::default();
    let mut rx = queue.subscribe();
    let printer = tokio::spawn(async move {
        loop {
            match rx.recv().await {
                Ok(event) => println!("{}", event_line(&event)),
                Err(RecvError::Lagged(skipped)) => {
                    warn!(skipped, "Event printer fell behind; events dropped");
                }
                Err(RecvError::Closed) => break,
            }
        }
    });

    let code = {
        let job = Job::builder(data, &options.dir, Arc::new(queue), Arc::new(LocalRunner::new()))
            .config(config)
            .build()?;
        job.start();
        execute(&job, options.command.as_deref()).await?
    };

    // The job owned the last queue sender.
    printer.await.context("Event printer task failed")?;
    Ok(code)
}

async fn execute(job: &Job, command: Option<&str>) -> Result<i32> {
    let context = match job.git_step().await {
        Ok(context) => context,
        Err(e) => {
            warn!(job_id = %job.id(), error = %e, "Checkout failed");
            return Ok(e.exit_code());
        }
    };

    let Some(command) = command else {
        job.complete(None, None, None)?;
        return Ok(0);
    };

    info!(job_id = %job.id(), command, "Running job command");
    let code = match context.launch(context.shell_wrap(command)).await {
        Ok(outcome) => outcome.code,
        Err(e) => {
            warn!(job_id = %job.id(), error = %e, "Job command could not be run");
            SPAWN_FAILURE_EXIT_CODE
        }
    };
    job.complete(Some(code), None, None)?;
    Ok(code)
}

fn load_config(options: &RunOptions) -> Result<WorkerConfig> {
    let mut config = if options.config_path.exists() {
        WorkerConfig::load(&options.config_path).with_context(|| {
            format!("Failed to load config: {}", options.config_path.display())
        })?
    } else {
        info!(path = %options.config_path.display(), "No worker config found; using defaults");
        WorkerConfig::default()
    };

    if options.disable_pty {
        config.interactive = false;
    }
    if options.no_update {
        config.update_in_place = false;
    }
    Ok(config)
}

/// One JSON line per lifecycle event: its name and payload.
fn event_line(event: &QueueEvent) -> String {
    json!({
        "event": event.kind.to_string(),
        "payload": event.event,
    })
    .to_string()
}
