//! `graphload` CLI — follow an import task from the terminal.

use std::path::PathBuf;
use std::sync::{Arc, Mutex};

use anyhow::{Context as _, Result};
use clap::{Parser, Subcommand};
use tokio::sync::oneshot;
use tracing::{info, warn};
use tracing_subscriber::EnvFilter;

use graphload::{
    HttpTaskApi, PollChannel, ProgressConfig, PushChannel, Reconciler, TaskEventHandlers, TaskId,
    TaskStatusStore, TaskSubscription,
};

#[derive(Parser)]
#[command(
    name = "graphload",
    about = "Track asynchronous CSV → graph import tasks",
    version
)]
struct Args {
    #[command(subcommand)]
    command: Command,

    /// REST API base URL
    #[arg(long, env = "GRAPHLOAD_API_URL")]
    api_url: Option<String>,

    /// Progress socket base URL (derived from the API URL when omitted)
    #[arg(long, env = "GRAPHLOAD_WS_URL")]
    ws_url: Option<String>,

    /// Log level (trace, debug, info, warn, error)
    #[arg(long, env = "GRAPHLOAD_LOG")]
    log: Option<String>,

    /// Path to an optional config.toml
    #[arg(long)]
    config: Option<PathBuf>,
}

#[derive(Subcommand)]
enum Command {
    /// Follow a task's progress until it completes or fails
    Watch {
        task_id: TaskId,
        /// Use the polling fallback instead of the push socket
        #[arg(long)]
        poll: bool,
    },
}

#[tokio::main]
async fn main() -> Result<()> {
    let args = Args::parse();
    let config = Arc::new(ProgressConfig::new(
        args.api_url,
        args.ws_url,
        args.config.as_deref(),
    ));

    let filter = args.log.unwrap_or_else(|| config.log.clone());
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::new(filter))
        .compact()
        .init();

    match args.command {
        Command::Watch { task_id, poll } => watch(config, task_id, poll).await,
    }
}

type Outcome = std::result::Result<(), String>;

async fn watch(config: Arc<ProgressConfig>, task_id: TaskId, use_poll: bool) -> Result<()> {
    let store = TaskStatusStore::new();
    let (done_tx, done_rx) = oneshot::channel::<Outcome>();
    let done_tx = Arc::new(Mutex::new(Some(done_tx)));

    let complete_tx = done_tx.clone();
    let failed_tx = done_tx.clone();
    let reconciler = Reconciler::new(store.clone(), task_id)
        .on_complete(move || {
            if let Some(tx) = complete_tx.lock().unwrap().take() {
                let _ = tx.send(Ok(()));
            }
        })
        .on_failed(move |e| {
            if let Some(tx) = failed_tx.lock().unwrap().take() {
                let _ = tx.send(Err(e.to_string()));
            }
        });

    let outcome = if use_poll {
        let api = Arc::new(HttpTaskApi::new(config.clone()));
        let channel = PollChannel::new(api, &config);
        let _handle = channel.watch(reconciler);
        done_rx.await.context("poll channel ended unexpectedly")?
    } else {
        let reconciler = Arc::new(reconciler);
        let channel = Arc::new(PushChannel::new(config.clone()));

        let progress_store = store.clone();
        let rec = reconciler.clone();
        let exhausted_tx = done_tx.clone();
        let handlers = TaskEventHandlers::new()
            .on_message(move |frame| {
                rec.apply(frame);
                if let Some(state) = progress_store.get(task_id) {
                    info!(
                        status = %state.status,
                        progress = state.progress,
                        message = state.message.as_deref().unwrap_or(""),
                        "task update"
                    );
                }
            })
            .on_disconnect(|| warn!("progress socket disconnected"))
            .on_exhausted(move || {
                if let Some(tx) = exhausted_tx.lock().unwrap().take() {
                    let _ = tx.send(Err("reconnect attempts exhausted".to_string()));
                }
            });

        let sub = TaskSubscription::new(channel.clone(), Some(task_id), true, handlers).await;
        let outcome = done_rx.await.context("push channel ended unexpectedly")?;
        sub.detach().await;
        outcome
    };

    match outcome {
        Ok(()) => {
            println!("task {task_id} completed");
            Ok(())
        }
        Err(e) => {
            eprintln!("task {task_id} failed: {e}");
            std::process::exit(1);
        }
    }
}
