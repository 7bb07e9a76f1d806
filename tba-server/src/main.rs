//! tba-server - Tax budget allocator HTTP server
//!
//! Serves the allocation, results and aggregate endpoints and runs the
//! background aggregate workers.

use anyhow::{Context, Result};
use clap::Parser;
use std::net::SocketAddr;
use std::path::PathBuf;
use std::sync::Arc;
use tba_common::config::AppConfig;
use tba_common::AllocationService;
use tba_server::{build_router, logging, AppState};
use tokio::signal;
use tracing::{error, info, warn};

/// Command-line arguments for tba-server
#[derive(Parser, Debug)]
#[command(name = "tba-server")]
#[command(about = "Tax budget allocator HTTP server")]
#[command(version)]
struct Args {
    /// Config file (overrides TBA_CONFIG and the default locations)
    #[arg(short, long)]
    config: Option<PathBuf>,

    /// Data folder holding the database (overrides TBA_DATA_FOLDER)
    #[arg(short, long)]
    data_folder: Option<PathBuf>,

    /// Listen address (overrides [server] bind)
    #[arg(short, long, env = "TBA_BIND")]
    bind: Option<SocketAddr>,
}

#[tokio::main]
async fn main() -> Result<()> {
    let args = Args::parse();
    let log = logging::init_tracing();

    info!(
        "Starting tba-server v{} [{}] built {} ({})",
        env!("CARGO_PKG_VERSION"),
        env!("GIT_HASH"),
        env!("BUILD_TIMESTAMP"),
        env!("BUILD_PROFILE")
    );

    let mut config = AppConfig::load(args.config.as_deref(), args.data_folder.as_deref())
        .context("Failed to load configuration")?;
    log.apply_level(&config.log_level);
    if let Some(bind) = args.bind {
        config.bind = bind;
    }
    info!("Database path: {}", config.database.path.display());

    let service = Arc::new(
        AllocationService::from_config(&config)
            .await
            .context("Failed to open database")?,
    );

    if service.list_categories().await?.is_empty() {
        warn!("No categories defined; run `tba-admin seed-categories`");
    }

    if let Some(every) = config.updater.rebuild_interval {
        service.spawn_scheduled_rebuild(every);
    }

    let app = build_router(AppState::new(Arc::clone(&service)));

    let listener = tokio::net::TcpListener::bind(config.bind)
        .await
        .with_context(|| format!("Failed to bind to {}", config.bind))?;
    info!("tba-server listening on http://{}", config.bind);
    info!("Health check: http://{}/health", config.bind);

    axum::serve(listener, app)
        .with_graceful_shutdown(shutdown_signal())
        .await
        .context("Server error")?;

    service.shutdown().await;
    info!("tba-server stopped");

    Ok(())
}

async fn shutdown_signal() {
    let ctrl_c = async {
        if let Err(e) = signal::ctrl_c().await {
            error!(error = %e, "Failed to install Ctrl+C handler");
            std::future::pending::<()>().await;
        }
    };

    #[cfg(unix)]
    let terminate = async {
        match signal::unix::signal(signal::unix::SignalKind::terminate()) {
            Ok(mut stream) => {
                stream.recv().await;
            }
            Err(e) => {
                error!(error = %e, "Failed to install terminate handler");
                std::future::pending::<()>().await;
            }
        }
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        _ = ctrl_c => {
            info!("Received Ctrl+C, shutting down");
        },
        _ = terminate => {
            info!("Received terminate signal, shutting down");
        },
    }
}
