//! Aegis Server - Main entry point
//!
//! Wires the command engine and the PAR repository to Postgres and waits for
//! a shutdown signal. Transport layers embed these components separately.

use std::sync::Arc;

use aegis_core::{
    cache::{PgParStore, PushedAuthRequestCache, PushedAuthRequestRepository},
    command::Commands,
    config::Config,
    db::Database,
    events::{event_types, EventRegistry, PgEventLog},
    telemetry,
};

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    dotenvy::dotenv().ok();

    let config = match std::env::var("AEGIS_CONFIG") {
        Ok(path) => Config::from_file(&path)?,
        Err(_) => Config::load()?,
    };

    telemetry::init_logging(&config.logging)?;

    tracing::info!(
        version = env!("CARGO_PKG_VERSION"),
        "Starting Aegis Server"
    );

    let registry = Arc::new(EventRegistry::project());
    registry.ensure_registered(event_types::ALL)?;

    let db = Database::new(&config.database).await?;
    db.ping().await?;
    tracing::info!("Connected to database");

    let log = Arc::new(PgEventLog::new(db.pool().clone()));
    let commands = Commands::with_event_log(log, registry);
    tracing::info!("Command engine ready");

    let cache = Arc::new(PushedAuthRequestCache::new(
        Arc::new(PgParStore::new(db.pool().clone())),
        config.par.cache_config(),
    ));
    let par = PushedAuthRequestRepository::new(cache, config.par.lifetime);
    par.health().await?;
    tracing::info!(
        lifetime = ?config.par.lifetime,
        memory_tier = par.cache().memory_tier_enabled(),
        "PAR repository ready"
    );

    shutdown_signal().await;

    // Components live until the signal, then release their pool handles
    // before the pool itself closes.
    drop(commands);
    drop(par);
    db.pool().close().await;
    tracing::info!("Server shutdown complete");

    Ok(())
}

/// Wait for ctrl-c or SIGTERM.
async fn shutdown_signal() {
    let ctrl_c = async {
        if let Err(e) = tokio::signal::ctrl_c().await {
            tracing::error!(error = %e, "Failed to listen for Ctrl+C");
            std::future::pending::<()>().await;
        }
    };

    #[cfg(unix)]
    let terminate = async {
        match tokio::signal::unix::signal(tokio::signal::unix::SignalKind::terminate()) {
            Ok(mut signal) => {
                signal.recv().await;
            }
            Err(e) => {
                tracing::error!(error = %e, "Failed to install SIGTERM handler");
                std::future::pending::<()>().await;
            }
        }
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        _ = ctrl_c => {},
        _ = terminate => {},
    }

    tracing::info!("Shutdown signal received");
}
