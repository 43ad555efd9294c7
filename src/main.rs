//! AxoShare server binary.
//!
//! A small file-sharing service: browsers upload files in chunks, the last
//! chunk merges the staged pieces into the shared directory under a per-path
//! lock, and stale staging sessions are reaped. A message board rides along.

mod atomic;
mod background;
mod config;
mod error;
mod files;
mod http;
mod locking;
mod logging;
mod merge;
mod messages;
mod reaper;
mod staging;
mod state;
mod storage;
mod upload;

use clap::Parser;
use std::net::{IpAddr, SocketAddr};
use std::path::PathBuf;
use tokio::net::TcpListener;
use tokio::signal;
use tracing::{info, warn};

use crate::background::spawn_background_tasks;
use crate::config::{Args, UploadConfig};
use crate::http::build_router;
use crate::state::AppContext;

/// Starts the server and blocks until shutdown.
#[tokio::main]
async fn main() -> Result<(), std::io::Error> {
    let args = Args::parse();
    let _log_guard = logging::init_logging(&PathBuf::from(&args.log_dir), args.log_max_files)?;

    let upload_config = UploadConfig::from_args(&args);
    let ctx = AppContext::new(
        PathBuf::from(&args.shared_dir),
        PathBuf::from(&args.temp_dir),
        PathBuf::from(&args.messages_file),
        upload_config.clone(),
    );
    ctx.prepare()
        .await
        .map_err(|err| std::io::Error::other(err.to_string()))?;

    match ctx.reaper.sweep(upload_config.temp_max_age).await {
        Ok(removed) => info!(op = "reap", removed, "start-up staging sweep done"),
        Err(err) => warn!(op = "reap", error = %err, "start-up staging sweep failed"),
    }

    let app = build_router(&ctx, args.cors_origins.as_deref());

    let host = args
        .host
        .parse::<IpAddr>()
        .map_err(|err| std::io::Error::new(std::io::ErrorKind::InvalidInput, err.to_string()))?;
    let addr = SocketAddr::new(host, args.port);
    let listener = TcpListener::bind(addr).await?;

    info!(
        shared_dir = ?ctx.shared.root_path(),
        temp_dir = ?ctx.staging.root_path(),
        messages = ?ctx.messages.path(),
        "🚀 Starting HTTP server at {}",
        addr
    );
    spawn_background_tasks(ctx.reaper.clone(), &upload_config);

    axum::serve(listener, app)
        .with_graceful_shutdown(shutdown_signal())
        .await
}

async fn shutdown_signal() {
    let ctrl_c = async {
        signal::ctrl_c()
            .await
            .expect("failed to install Ctrl+C handler");
    };

    #[cfg(unix)]
    let terminate = async {
        signal::unix::signal(signal::unix::SignalKind::terminate())
            .expect("failed to install signal handler")
            .recv()
            .await;
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        _ = ctrl_c => {},
        _ = terminate => {},
    }

    info!("Received termination signal shutting down");
}
