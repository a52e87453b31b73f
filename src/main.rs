use std::path::{Path, PathBuf};
use std::sync::Arc;

use anyhow::{Context, Result};
use clap::{Parser, Subcommand};
use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;
use tracing::info;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};
use url::Url;

use runsync_config::SyncConfig;
use runsync_engine::{ChannelNotifier, ProjectionChange, SyncEngine};
use runsync_transport::SseDecoder;
use runsync_workflow::Workflow;

/// Runsync - live run-state projections from a workflow console event stream
#[derive(Parser)]
#[command(name = "runsync")]
#[command(version, about, long_about = None)]
struct Cli {
  #[command(subcommand)]
  command: Option<Commands>,
}

#[derive(Subcommand)]
enum Commands {
  /// Stream events and print every projection change until Ctrl-C
  Watch {
    /// Path to a JSON config file
    #[arg(long)]
    config: Option<PathBuf>,

    /// Stream endpoint, overriding the config file
    #[arg(long)]
    url: Option<Url>,

    /// Workflow to open in the editor projection
    #[arg(long)]
    workflow: Option<PathBuf>,

    /// Run to bind the editor projection to
    #[arg(long)]
    run: Option<String>,
  },

  /// Replay a captured event stream and print the resulting projections
  Replay {
    /// Captured `text/event-stream` body
    file: PathBuf,

    /// Workflow to open in the editor projection
    #[arg(long)]
    workflow: Option<PathBuf>,

    /// Run to bind the editor projection to
    #[arg(long)]
    run: Option<String>,
  },
}

fn main() -> Result<()> {
  tracing_subscriber::registry()
    .with(tracing_subscriber::fmt::layer().with_writer(std::io::stderr))
    .with(
      tracing_subscriber::EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new("info")),
    )
    .init();

  let cli = Cli::parse();

  match cli.command {
    Some(Commands::Watch {
      config,
      url,
      workflow,
      run,
    }) => {
      let rt = tokio::runtime::Runtime::new()?;
      rt.block_on(async { watch(config, url, workflow, run).await })?;
    }
    Some(Commands::Replay {
      file,
      workflow,
      run,
    }) => {
      replay(&file, workflow, run)?;
    }
    None => {
      println!("runsync - use --help to see available commands");
    }
  }

  Ok(())
}

async fn watch(
  config_file: Option<PathBuf>,
  url: Option<Url>,
  workflow_file: Option<PathBuf>,
  run_id: Option<String>,
) -> Result<()> {
  let mut config = match &config_file {
    Some(path) => SyncConfig::load(path)
      .with_context(|| format!("failed to load config file: {}", path.display()))?,
    None => SyncConfig::default(),
  };
  if url.is_some() {
    config.endpoint = url;
  }

  let (tx, mut rx) = mpsc::unbounded_channel();
  let engine = SyncEngine::builder()
    .notifier(Arc::new(ChannelNotifier::new(tx)))
    .with_config(&config)
    .context("failed to set up the event stream")?
    .build();

  if let Some(path) = workflow_file {
    engine.open_workflow(read_workflow(&path)?, run_id)?;
  }
  engine.start().context("failed to start sync engine")?;

  let cancel = CancellationToken::new();
  let ctrl_c = cancel.clone();
  tokio::spawn(async move {
    if tokio::signal::ctrl_c().await.is_ok() {
      ctrl_c.cancel();
    }
  });

  loop {
    tokio::select! {
      _ = cancel.cancelled() => break,
      change = rx.recv() => match change {
        Some(change) => print_change(&engine, &change)?,
        None => break,
      },
    }
  }

  engine.stop();
  if let Some(client) = engine.client() {
    client.shutdown();
  }
  info!(runs = engine.runs().list().len(), "watch_finished");
  Ok(())
}

fn print_change(engine: &SyncEngine, change: &ProjectionChange) -> Result<()> {
  let current = match change {
    ProjectionChange::Run { run_id } => serde_json::to_value(engine.runs().get(run_id))?,
    ProjectionChange::Node { run_id, node_id } => serde_json::to_value(
      engine
        .runs()
        .get(run_id)
        .and_then(|run| run.node(node_id).cloned()),
    )?,
    ProjectionChange::Worker { worker_name } => {
      serde_json::to_value(engine.fleet().get(worker_name))?
    }
  };

  let line = serde_json::json!({ "change": change, "current": current });
  println!("{}", serde_json::to_string(&line)?);
  Ok(())
}

fn replay(file: &Path, workflow_file: Option<PathBuf>, run_id: Option<String>) -> Result<()> {
  let capture = std::fs::read(file)
    .with_context(|| format!("failed to read capture file: {}", file.display()))?;

  let engine = SyncEngine::builder().build();
  if let Some(path) = workflow_file {
    engine.open_workflow(read_workflow(&path)?, run_id)?;
  }
  engine.start()?;

  let mut decoder = SseDecoder::new();
  let mut frames = decoder.feed(&capture);
  // Flush a final frame missing its blank-line terminator.
  frames.extend(decoder.feed(b"\n\n"));
  eprintln!("Replaying {} frames", frames.len());

  for frame in &frames {
    engine.ingest_frame(frame);
  }
  engine.stop();

  let output = serde_json::json!({
    "runs": engine.runs().list(),
    "workflow": engine.editor().workflow(),
    "workers": engine.fleet().list(),
  });
  println!("{}", serde_json::to_string_pretty(&output)?);

  Ok(())
}

fn read_workflow(path: &Path) -> Result<Workflow> {
  let content = std::fs::read_to_string(path)
    .with_context(|| format!("failed to read workflow file: {}", path.display()))?;
  Workflow::from_json(&content)
    .with_context(|| format!("failed to parse workflow file: {}", path.display()))
}
