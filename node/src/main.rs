//! Notificator backend daemon.
//!
//! Composition root for the collaboration backend: loads configuration,
//! opens the persistence backend and runs migrations, then serves the gRPC
//! surface and the HTTP health/metrics port until a termination signal
//! arrives. Shutdown is staged and bounded by a 30 second deadline.
//!
//! Usage:
//!   notificator-backend --config notificator.toml
//!
//! Configuration precedence: CLI flags > NOTIFICATOR_* environment > file >
//! defaults.

use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;

use anyhow::{Context, Result};
use clap::Parser;
use tokio::signal;
use tokio::sync::watch;
use tracing::{error, info, warn};
use tracing_subscriber::{fmt, EnvFilter};

use notificator_auth::{spawn_reaper, AuthService, REAP_INTERVAL};
use notificator_bus::{UpdateBus, DEFAULT_DRAIN_GRACE};
use notificator_config::{parse_listen_addr, AppConfig, LoggingSection};
use notificator_interactions::InteractionService;
use notificator_persistence::open_store;
use notificator_rpc_server::{http::serve_http, AppState, RpcServer};

/// Upper bound on the whole shutdown sequence.
const SHUTDOWN_DEADLINE: Duration = Duration::from_secs(30);

#[derive(Parser, Debug)]
#[command(name = "notificator-backend", about = "Notificator collaboration backend", version)]
struct Cli {
    /// Path to the TOML configuration file.
    #[arg(long, short = 'c', value_name = "PATH")]
    config: Option<PathBuf>,

    /// Overrides the gRPC bind address.
    #[arg(long, value_name = "ADDR")]
    grpc_listen: Option<String>,

    /// Overrides the HTTP health/metrics bind address.
    #[arg(long, value_name = "ADDR")]
    http_listen: Option<String>,

    /// Overrides the database backend (sqlite, postgres).
    #[arg(long, value_name = "TYPE")]
    database_type: Option<String>,

    /// Overrides the embedded database file path.
    #[arg(long, value_name = "PATH")]
    sqlite_path: Option<String>,

    /// Overrides the log filter directive.
    #[arg(long, value_name = "LEVEL")]
    log_level: Option<String>,

    /// Overrides the log format (text, json).
    #[arg(long, value_name = "FORMAT")]
    log_format: Option<String>,
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();

    // Resolve configuration: file, then environment, then CLI flags.
    let mut config = match &cli.config {
        Some(path) => AppConfig::load(path)
            .with_context(|| format!("failed to load config {}", path.display()))?,
        None => AppConfig::default(),
    };
    config.apply_env().context("invalid environment override")?;
    if let Some(addr) = cli.grpc_listen {
        config.backend.grpc_listen = addr;
    }
    if let Some(addr) = cli.http_listen {
        config.backend.http_listen = addr;
    }
    if let Some(db_type) = &cli.database_type {
        config.backend.database.db_type = db_type
            .parse()
            .map_err(|err: String| anyhow::anyhow!(err))
            .context("invalid --database-type")?;
    }
    if let Some(path) = cli.sqlite_path {
        config.backend.database.sqlite_path = path;
    }
    if let Some(level) = cli.log_level {
        config.logging.level = level;
    }
    if let Some(format) = cli.log_format {
        config.logging.format = format;
    }

    init_tracing(&config.logging);

    let grpc_addr = parse_listen_addr(&config.backend.grpc_listen)
        .context("invalid grpc listen address")?;
    let http_addr = parse_listen_addr(&config.backend.http_listen)
        .context("invalid http listen address")?;

    // Startup sequence, fail-fast on each step.
    let store = open_store(&config.backend.database)
        .await
        .context("failed to open persistence backend")?;
    store.migrate().await.context("migration failed")?;
    info!(
        target: "node",
        backend = %config.backend.database.db_type,
        "persistence ready"
    );

    let auth = AuthService::new(store.clone(), &config.backend.auth)
        .context("failed to construct auth service")?;
    let bus = Arc::new(UpdateBus::new());
    let interactions = Arc::new(InteractionService::new(store.clone(), bus.clone()));
    let state = Arc::new(AppState::new(auth, interactions, bus.clone(), store.clone()));

    let reaper = spawn_reaper(store.clone(), REAP_INTERVAL);

    let (grpc_stop, grpc_signal) = watch::channel(false);
    let (http_stop, http_signal) = watch::channel(false);

    let rpc = RpcServer::new(state.clone());
    let mut grpc_task = tokio::spawn(async move {
        let mut signal = grpc_signal;
        rpc.serve(grpc_addr, async move {
            let _ = signal.changed().await;
        })
        .await
    });

    let http_state = state.clone();
    let mut http_task = tokio::spawn(async move {
        let mut signal = http_signal;
        serve_http(http_addr, http_state, async move {
            let _ = signal.changed().await;
        })
        .await
    });

    info!(
        target: "node",
        grpc = %grpc_addr,
        http = %http_addr,
        "notificator backend started; press Ctrl+C to stop"
    );

    // Run until a termination signal arrives or a server dies on its own.
    tokio::select! {
        _ = termination_signal() => {
            info!(target: "node", "termination signal received");
        }
        result = &mut grpc_task => {
            let outcome = result.context("grpc server task panicked")?;
            outcome.context("grpc server failed")?;
            anyhow::bail!("grpc server exited unexpectedly");
        }
        result = &mut http_task => {
            let outcome = result.context("http server task panicked")?;
            outcome.context("http server failed")?;
            anyhow::bail!("http server exited unexpectedly");
        }
    }

    // Staged shutdown: refuse new work, let in-flight unary calls finish,
    // drain the streams, then stop the sidecar and background tasks.
    let shutdown = async {
        state.begin_drain();
        let _ = grpc_stop.send(true);
        bus.drain(DEFAULT_DRAIN_GRACE).await;
        if let Ok(outcome) = grpc_task.await {
            if let Err(err) = outcome {
                error!(target: "node", error = %err, "grpc server error during shutdown");
            }
        }
        let _ = http_stop.send(true);
        if let Ok(outcome) = http_task.await {
            if let Err(err) = outcome {
                error!(target: "node", error = %err, "http server error during shutdown");
            }
        }
        reaper.stop().await;
    };
    if tokio::time::timeout(SHUTDOWN_DEADLINE, shutdown).await.is_err() {
        warn!(target: "node", "shutdown deadline exceeded; exiting anyway");
    }

    info!(target: "node", "shutdown complete");
    Ok(())
}

fn init_tracing(logging: &LoggingSection) {
    let filter =
        EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(&logging.level));
    let builder = fmt().with_env_filter(filter);
    match logging.format.as_str() {
        "json" => {
            let _ = builder.json().try_init();
        }
        _ => {
            let _ = builder.try_init();
        }
    }
}

async fn termination_signal() {
    #[cfg(unix)]
    {
        let mut sigterm = match signal::unix::signal(signal::unix::SignalKind::terminate()) {
            Ok(stream) => stream,
            Err(err) => {
                error!(target: "node", error = %err, "failed to install SIGTERM handler");
                let _ = signal::ctrl_c().await;
                return;
            }
        };
        tokio::select! {
            _ = signal::ctrl_c() => {}
            _ = sigterm.recv() => {}
        }
    }
    #[cfg(not(unix))]
    {
        let _ = signal::ctrl_c().await;
    }
}
