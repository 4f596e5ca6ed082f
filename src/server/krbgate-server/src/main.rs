//! krbgate Server - Main entry point.

use std::path::{Path, PathBuf};
use std::sync::Arc;

use anyhow::{Context, Result};
use clap::Parser;
use krbgate_api::AppState;
use krbgate_auth::{ConfigStore, LdapDirectory, LoginOrchestrator};
use krbgate_storage::{MemoryBackend, StorageBackend};
use tokio::net::TcpListener;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt, EnvFilter};

mod settings;

use settings::Settings;

const DEFAULT_BIND: &str = "0.0.0.0:8200";

#[derive(Parser)]
#[command(name = "krbgate-server")]
#[command(about = "krbgate - Kerberos/SPNEGO login server")]
#[command(version)]
struct Cli {
    /// Configuration file path
    #[arg(short, long, default_value = "config/krbgate.toml", env = "KRBGATE_CONFIG")]
    config: PathBuf,

    /// Server bind address (overrides the configuration file)
    #[arg(long, env = "KRBGATE_BIND_ADDRESS")]
    bind: Option<String>,

    /// Emit logs as JSON
    #[arg(long, env = "KRBGATE_LOG_JSON")]
    log_json: bool,
}

fn init_tracing(json: bool) {
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"));
    let registry = tracing_subscriber::registry().with(filter);
    if json {
        registry.with(tracing_subscriber::fmt::layer().json()).init();
    } else {
        registry.with(tracing_subscriber::fmt::layer()).init();
    }
}

/// Seeds storage from the settings file and publishes a new snapshot.
async fn load(path: &Path, storage: &dyn StorageBackend, store: &ConfigStore) -> Result<Settings> {
    let settings = Settings::load(path)?;
    settings.seed(storage).await?;
    store
        .reload(storage)
        .await
        .context("Invalid kerberos configuration")?;
    Ok(settings)
}

#[cfg(unix)]
async fn reload_on_hangup(path: PathBuf, storage: Arc<MemoryBackend>, store: Arc<ConfigStore>) {
    use tokio::signal::unix::{signal, SignalKind};

    let mut hangup = match signal(SignalKind::hangup()) {
        Ok(stream) => stream,
        Err(e) => {
            tracing::warn!(error = %e, "SIGHUP handler unavailable, reload disabled");
            return;
        },
    };

    while hangup.recv().await.is_some() {
        tracing::info!(path = %path.display(), "reloading configuration");
        if let Err(e) = load(&path, &*storage, &store).await {
            tracing::error!(error = %format!("{e:#}"), "reload failed, keeping previous configuration");
        }
    }
}

async fn shutdown_signal() {
    if let Err(e) = tokio::signal::ctrl_c().await {
        tracing::error!(error = %e, "failed to listen for shutdown signal");
    }
    tracing::info!("Shutting down...");
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();
    init_tracing(cli.log_json);

    tracing::info!("Starting krbgate server...");

    let storage = Arc::new(MemoryBackend::new());
    let store = Arc::new(ConfigStore::new());
    let settings = load(&cli.config, &*storage, &store).await?;

    let bind = cli
        .bind
        .or(settings.server.bind)
        .unwrap_or_else(|| DEFAULT_BIND.to_string());

    #[cfg(unix)]
    tokio::spawn(reload_on_hangup(
        cli.config.clone(),
        Arc::clone(&storage),
        Arc::clone(&store),
    ));

    let backend = LoginOrchestrator::new(store, Arc::new(LdapDirectory::new()));
    let app = krbgate_api::router(AppState::new(Arc::new(backend)));

    let listener = TcpListener::bind(&bind)
        .await
        .with_context(|| format!("Failed to bind {bind}"))?;
    tracing::info!(address = %listener.local_addr()?, "krbgate server started successfully");

    axum::serve(listener, app)
        .with_graceful_shutdown(shutdown_signal())
        .await?;

    Ok(())
}
