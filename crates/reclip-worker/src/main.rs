//! One-shot clip worker binary.
//!
//! Processes at most one job and exits, for cron-style schedulers. Exit code
//! is 0 whenever the outcome was recorded on the job, 1 when the worker could
//! not start or the queue was unreachable.

use std::sync::Arc;

use anyhow::Context;
use tracing::{error, info, warn};
use tracing_subscriber::{fmt, prelude::*, EnvFilter};

use reclip_queue::JobQueue;
use reclip_worker::{ClipWorker, RunOutcome, WorkerContext};

#[tokio::main]
async fn main() {
    // Install rustls crypto provider (required for TLS/HTTPS)
    let _ = rustls::crypto::ring::default_provider().install_default();

    dotenvy::dotenv().ok();
    init_tracing();

    info!("Starting reclip-worker");

    match run().await {
        Ok(RunOutcome::Idle) => info!("No jobs to process"),
        Ok(outcome @ RunOutcome::Failed { .. }) => warn!(
            job_id = ?outcome.job_id(),
            "{}", outcome.message()
        ),
        Ok(outcome) => info!(job_id = ?outcome.job_id(), "{}", outcome.message()),
        Err(e) => {
            error!("Worker invocation failed: {:#}", e);
            std::process::exit(1);
        }
    }
}

async fn run() -> anyhow::Result<RunOutcome> {
    let queue = JobQueue::from_env().context("failed to create job queue")?;
    let ctx = WorkerContext::from_env(Arc::new(queue))
        .await
        .context("failed to initialize worker")?;

    let outcome = ClipWorker::new(ctx)
        .run_once()
        .await
        .context("failed to claim a job")?;
    Ok(outcome)
}

fn init_tracing() {
    let use_json = std::env::var("LOG_FORMAT")
        .map(|v| v.to_lowercase() == "json")
        .unwrap_or(false);

    let env_filter =
        EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"));

    if use_json {
        tracing_subscriber::registry()
            .with(fmt::layer().json())
            .with(env_filter)
            .init();
    } else {
        tracing_subscriber::registry()
            .with(fmt::layer().with_ansi(true).with_target(true))
            .with(env_filter)
            .init();
    }
}
