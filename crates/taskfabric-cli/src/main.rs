//! Demo REPL for the taskfabric execution fabric.
//!
//! Wires the whole fabric — store, session, dispatcher, worker pool —
//! around an offline echo model so the scheduling substrate can be
//! exercised without any model provider configured. Everything typed at
//! the prompt goes down the synchronous main path; `/work`, `/at`, and
//! `/every` create background tasks whose output surfaces as
//! notifications before the next prompt.

mod echo;
mod repl;

use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;

use anyhow::{Context, Result};
use clap::Parser;
use tracing::info;
use tracing_subscriber::EnvFilter;

use taskfabric_exec::{ExecConfig, Session};
use taskfabric_runner::{NoTools, SingleTurnRunner};
use taskfabric_store::StateStore;

use crate::echo::EchoLlm;

/// taskfabric — task-oriented execution fabric demo.
#[derive(Parser)]
#[command(name = "taskfabric", version, about = "taskfabric demo REPL")]
struct Cli {
    /// Directory holding the SQLite state database.
    #[arg(long, default_value = "data")]
    data_dir: PathBuf,

    /// Override the in-flight worker parallelism bound.
    #[arg(long)]
    worker_count: Option<usize>,

    /// Override the background loop poll interval, in milliseconds.
    #[arg(long)]
    poll_interval_ms: Option<u64>,
}

#[tokio::main]
async fn main() -> Result<()> {
    // Load .env if present (silently ignore if missing).
    dotenvy::dotenv().ok();

    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("warn")))
        .init();

    let cli = Cli::parse();

    std::fs::create_dir_all(&cli.data_dir).context("failed to create data directory")?;
    let db_path = cli.data_dir.join("taskfabric.db");
    let state = StateStore::open(db_path.clone())
        .await
        .context("failed to open state store")?;
    info!(path = %db_path.display(), "state store ready");

    let mut config = ExecConfig::from_env();
    if let Some(count) = cli.worker_count {
        config.dispatch.worker_count = count;
    }
    if let Some(ms) = cli.poll_interval_ms {
        config.exec_loop.poll_interval = Duration::from_millis(ms);
    }

    let session = Session::new(
        state,
        Arc::new(SingleTurnRunner::default()),
        Arc::new(NoTools),
        Arc::new(EchoLlm),
        config,
    );

    repl::run(session).await
}
