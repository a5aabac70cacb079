//! jade server binary.
//!
//! Reads `jade.toml` (or the path given with `--config`), opens the
//! engine's SQLite store and the hospital export, starts the follow-up
//! workers, and serves the query API over HTTP until interrupted.

mod config;

use std::{
  path::{Path, PathBuf},
  sync::Arc,
  time::Duration,
};

use anyhow::Context as _;
use clap::Parser;
use jade_api::AppState;
use jade_core::dialogue::Script;
use jade_engine::{AmiDialer, Engine, alerts::AlertContext};
use jade_store_sqlite::{SqliteSource, SqliteStore};
use tokio::{net::TcpListener, sync::watch};
use tower_http::trace::TraceLayer;
use tracing::level_filters::LevelFilter;
use tracing_subscriber::EnvFilter;

use crate::config::{ServerConfig, expand_tilde};

#[derive(Parser)]
#[command(author, version, about = "Jade discharge follow-up server")]
struct Cli {
  /// Path to the TOML configuration file.
  #[arg(short, long, default_value = "jade.toml")]
  config: PathBuf,

  /// Validate the configuration and exit.
  #[arg(long)]
  check: bool,
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
  tracing_subscriber::fmt()
    .with_env_filter(
      EnvFilter::builder()
        .with_default_directive(LevelFilter::INFO.into())
        .from_env_lossy(),
    )
    .init();

  let cli = Cli::parse();

  let cfg = ServerConfig::load(&cli.config)
    .with_context(|| format!("failed to read configuration from {:?}", cli.config))?;
  cfg.validate().context("invalid configuration")?;
  if cli.check {
    println!("configuration ok");
    return Ok(());
  }

  let store_path = expand_tilde(&cfg.store_path);
  let store = SqliteStore::open(&store_path)
    .await
    .with_context(|| format!("failed to open store at {store_path:?}"))?;
  let source_path = expand_tilde(Path::new(&cfg.sync.source_path));
  let source = SqliteSource::open(&source_path)
    .await
    .with_context(|| format!("failed to open hospital export at {source_path:?}"))?;

  let dialer = AmiDialer::new(
    cfg.manager.clone(),
    Script::standard(cfg.dialogue.clone()),
    cfg.policy.dialogue_timeout(),
  );

  let store = Arc::new(store);
  let (shutdown, shutdown_rx) = watch::channel(false);
  let engine = Engine::start(
    store.clone(),
    Arc::new(source),
    Arc::new(dialer),
    cfg.policy.clone(),
    cfg.sync.clone(),
    cfg.scoring.clone(),
    shutdown_rx,
  )
  .await
  .context("failed to start engine")?;

  let state = AppState {
    store,
    controls: engine.controls().clone(),
    alerts: AlertContext {
      urgency_threshold: cfg.alerts.urgency_threshold,
      max_attempts:      cfg.policy.max_attempts,
      staleness:         cfg.sync.staleness(),
    },
  };
  let app = jade_api::api_router(state).layer(TraceLayer::new_for_http());

  let address = format!("{}:{}", cfg.http.host, cfg.http.port);
  tracing::info!("Listening on http://{address}");
  let listener = TcpListener::bind(&address)
    .await
    .with_context(|| format!("failed to bind {address}"))?;

  axum::serve(listener, app)
    .with_graceful_shutdown(interrupted())
    .await
    .context("server error")?;

  tracing::info!("shutting down, waiting for calls in flight");
  // An error means every worker has already exited.
  let _ = shutdown.send(true);
  if tokio::time::timeout(SHUTDOWN_GRACE, engine.join()).await.is_err() {
    tracing::warn!(grace = ?SHUTDOWN_GRACE, "workers still running at exit");
  }
  Ok(())
}

/// Upper bound on waiting for attempts in flight after an interrupt.
const SHUTDOWN_GRACE: Duration = Duration::from_secs(600);

async fn interrupted() {
  if let Err(e) = tokio::signal::ctrl_c().await {
    tracing::error!(error = %e, "failed to listen for ctrl-c");
    std::future::pending::<()>().await;
  }
}
