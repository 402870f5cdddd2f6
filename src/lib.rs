//! QuietCare sign engine: streaming sign-language gloss recognition and
//! gloss-to-sentence translation behind a small HTTP API.
//! Main library: tracing setup, engine loading, background tasks, server.

pub mod config;
pub mod engine;
pub mod expiring;
pub mod keypoints;
pub mod metrics;
pub mod recognizer;
pub mod server;
pub mod sessions;
pub mod translate;
pub mod worker;

use std::path::PathBuf;
use std::sync::Arc;

use anyhow::Context;
use tokio_util::sync::CancellationToken;
use tracing::{info, warn};

use config::{EngineConfig, DEFAULT_CONFIG_PATH};
use engine::Engine;

/// Initialize tracing. `RUST_LOG` overrides the default filter;
/// `QUIETCARE_LOG_FORMAT=json` switches to JSON lines.
pub fn init_tracing() {
    let filter = tracing_subscriber::EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new("quietcare=info"));
    let builder = tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_target(true)
        .with_thread_ids(true);
    let json = std::env::var("QUIETCARE_LOG_FORMAT").is_ok_and(|v| v.eq_ignore_ascii_case("json"));
    let result = if json {
        builder.json().try_init()
    } else {
        builder.try_init()
    };
    if let Err(e) = result {
        eprintln!("tracing already initialized: {e}");
    }
}

/// Resolve config from `QUIETCARE_CONFIG` (default `quietcare.json`) plus env overrides.
pub fn load_config() -> anyhow::Result<EngineConfig> {
    let path = std::env::var("QUIETCARE_CONFIG")
        .map(PathBuf::from)
        .unwrap_or_else(|_| PathBuf::from(DEFAULT_CONFIG_PATH));
    let config = EngineConfig::load_or_default(&path)
        .with_context(|| format!("loading config {}", path.display()))?
        .with_env_overrides();
    config.validate().context("invalid configuration")?;
    info!(path = %path.display(), listen = %config.server.listen_addr, "configuration loaded");
    Ok(config)
}

/// Load the engine, start background tasks and serve until Ctrl-C.
pub async fn run() -> anyhow::Result<()> {
    init_tracing();
    info!(version = env!("CARGO_PKG_VERSION"), "quietcare starting");

    let config = load_config()?;
    let addr = config.listen_addr()?;

    let engine = tokio::task::spawn_blocking(move || Engine::load(config))
        .await
        .context("engine load task panicked")?
        .context("loading models")?;
    let engine = Arc::new(engine);

    let cancel = CancellationToken::new();
    let sweeper = Engine::spawn_session_sweeper(Arc::clone(&engine), cancel.clone());
    let health = engine.spawn_worker_health(cancel.clone());

    let shutdown = cancel.clone();
    tokio::spawn(async move {
        match tokio::signal::ctrl_c().await {
            Ok(()) => info!("ctrl-c received, shutting down"),
            Err(e) => warn!(error = %e, "ctrl-c handler failed, shutting down"),
        }
        shutdown.cancel();
    });

    let listener = tokio::net::TcpListener::bind(addr)
        .await
        .with_context(|| format!("binding {addr}"))?;
    server::serve(listener, Arc::clone(&engine), cancel.clone())
        .await
        .context("http server error")?;

    cancel.cancel();
    let _ = sweeper.await;
    if let Some(health) = health {
        let _ = health.await;
    }
    tokio::task::spawn_blocking(move || engine.shutdown())
        .await
        .context("worker shutdown task panicked")?;
    info!("quietcare stopped");
    Ok(())
}
