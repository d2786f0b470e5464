use clap::Parser;
use std::net::SocketAddr;
use std::path::PathBuf;
use std::sync::Arc;
use tokio::signal;
use tokio::sync::watch;
use tracing::{info, warn};
use tracing_subscriber::EnvFilter;

use turnstile::admission::Gatekeeper;
use turnstile::config::TurnstileConfig;
use turnstile::http::HttpServer;
use turnstile::journal::AuditJournal;
use turnstile::ratelimit::{RateLimiter, WindowStore};
use turnstile::shipper::{HttpStore, LogShipper};

/// Command-line arguments.
#[derive(Parser, Debug)]
#[command(name = "turnstile", version)]
#[command(about = "Per-client admission control with a shipped audit journal")]
struct Args {
    /// Configuration file (YAML, TOML or JSON)
    #[arg(short, long)]
    config: Option<PathBuf>,

    /// Override the HTTP listen address
    #[arg(short, long)]
    listen: Option<SocketAddr>,

    /// Emit logs as JSON
    #[arg(long)]
    log_json: bool,
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let args = Args::parse();
    init_tracing(args.log_json);

    info!("Starting Turnstile");
    info!("Version: {}", env!("CARGO_PKG_VERSION"));

    let mut config = TurnstileConfig::load(args.config.as_deref())?;
    if let Some(listen) = args.listen {
        config.server.listen_addr = listen;
    }
    info!(
        listen_addr = %config.server.listen_addr,
        window_ms = config.rate_limiting.window_ms,
        limit = config.rate_limiting.limit,
        "Configuration loaded"
    );

    let limiter = Arc::new(RateLimiter::new(
        Arc::new(WindowStore::new()),
        &config.rate_limiting,
    ));
    let journal = Arc::new(AuditJournal::open(&config.journal)?);
    let gate = Arc::new(Gatekeeper::new(Arc::clone(&limiter), Arc::clone(&journal)));

    let (shutdown_tx, shutdown_rx) = watch::channel(false);

    let sweeper = limiter.spawn_sweeper(config.rate_limiting.sweep_interval(), shutdown_rx.clone());

    let shipper = match HttpStore::new(config.store.clone()) {
        Ok(store) => {
            let shipper = Arc::new(LogShipper::new(
                Arc::clone(&journal),
                Arc::new(store),
                config.shipping.clone(),
            ));
            Some(shipper.spawn(shutdown_rx.clone()))
        }
        Err(e) => {
            warn!(error = %e, "Log shipping disabled, audit records stay in the local journal");
            None
        }
    };

    HttpServer::new(config.server.listen_addr, gate)
        .serve_with_shutdown(shutdown_signal())
        .await?;

    // Stop background tasks; the shipper flushes once more on the way out
    let _ = shutdown_tx.send(true);
    sweeper.await?;
    if let Some(shipper) = shipper {
        shipper.await?;
    }

    info!("Turnstile stopped");
    Ok(())
}

/// Install the global tracing subscriber, honouring `RUST_LOG`.
fn init_tracing(json: bool) {
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"));
    let builder = tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_target(false)
        .with_thread_ids(true);

    if json {
        builder.json().init();
    } else {
        builder.init();
    }
}

/// Wait for a shutdown signal (Ctrl+C or SIGTERM).
async fn shutdown_signal() {
    let ctrl_c = async {
        signal::ctrl_c()
            .await
            .expect("Failed to install Ctrl+C handler");
    };

    #[cfg(unix)]
    let terminate = async {
        signal::unix::signal(signal::unix::SignalKind::terminate())
            .expect("Failed to install SIGTERM handler")
            .recv()
            .await;
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        _ = ctrl_c => {
            info!("Received Ctrl+C, initiating graceful shutdown");
        }
        _ = terminate => {
            info!("Received SIGTERM, initiating graceful shutdown");
        }
    }
}
