mod config;
mod paths;
mod process_monitor;
mod publisher;
mod resolver;
mod scheduler;
mod snapshot;
mod status;

use anyhow::{Context, Result};
use std::future::Future;
use std::sync::Arc;
use tokio::sync::watch;

use crate::config::{ListingSource, PublisherKind};
use crate::process_monitor::{CommandLister, ProcessLister, SysinfoLister};
use crate::publisher::{GithubPublisher, LogPublisher, Publisher};
use crate::resolver::RngPicker;
use crate::scheduler::Scheduler;
use crate::status::StatusConfig;

#[tokio::main]
async fn main() -> Result<()> {
    // ── Logging ───────────────────────────────────────────────────────────────
    let filter = std::env::var("PRESENCE_LOG")
        .or_else(|_| std::env::var("RUST_LOG"))
        .unwrap_or_else(|_| "info".to_string());
    tracing_subscriber::fmt()
        .with_env_filter(tracing_subscriber::EnvFilter::new(filter))
        .init();

    // ── Configuration ─────────────────────────────────────────────────────────
    let config_path = paths::config_file_path();
    let config = config::load(&config_path)?;
    let status_config = config
        .status_config()
        .with_context(|| format!("Invalid config file: {}", config_path.display()))?;
    tracing::info!(path = %config_path.display(), "config loaded");

    // ── Process listing ───────────────────────────────────────────────────────
    let lister: Arc<dyn ProcessLister> = match config.listing.source {
        ListingSource::Command => Arc::new(CommandLister::new(
            &config.listing.effective_command(),
            config.listing.effective_format(),
        )?),
        ListingSource::Sysinfo => Arc::new(SysinfoLister::new()),
    };

    // ── Shutdown signal ───────────────────────────────────────────────────────
    // The first signal clears the status and exits cleanly. A second one, e.g.
    // while the clearing publish waits on a slow endpoint, exits at once.
    let (stop_tx, stop_rx) = watch::channel(false);
    tokio::spawn(async move {
        forward_signals(wait_for_signal, stop_tx).await;
        tracing::warn!("second signal received, exiting without clearing status");
        std::process::exit(130);
    });

    println!("presence-daemon v{} started", env!("CARGO_PKG_VERSION"));

    // ── Publisher + scheduler ─────────────────────────────────────────────────
    let publisher_config = &config.publisher;
    match publisher_config.kind {
        PublisherKind::Github => {
            let token = std::env::var(&publisher_config.token_env).with_context(|| {
                format!("{} not set", publisher_config.token_env)
            })?;
            let publisher = GithubPublisher::new(
                &publisher_config.endpoint,
                token,
                &publisher_config.client_mutation_id,
                publisher_config.timeout(),
            )?;
            match publisher.whoami().await {
                Ok(login) => tracing::info!(%login, "authenticated"),
                Err(e) => tracing::warn!("could not verify token: {e}"),
            }
            run(status_config, lister, publisher, stop_rx).await;
        }
        PublisherKind::Log => {
            run(status_config, lister, LogPublisher::new(), stop_rx).await;
        }
    }

    tracing::info!("stopped");
    Ok(())
}

async fn run<P: Publisher>(
    config: StatusConfig,
    lister: Arc<dyn ProcessLister>,
    publisher: P,
    stop_rx: watch::Receiver<bool>,
) {
    Scheduler::new(config, lister, publisher, RngPicker::from_os_rng())
        .run(stop_rx)
        .await;
}

/// Forwards the first signal to `stop_tx` and returns when a second one arrives.
async fn forward_signals<F, Fut>(mut next_signal: F, stop_tx: watch::Sender<bool>)
where
    F: FnMut() -> Fut,
    Fut: Future<Output = ()>,
{
    next_signal().await;
    let _ = stop_tx.send(true);
    next_signal().await;
}

/// Resolves on SIGINT or SIGTERM (ctrl-c only on non-unix platforms).
async fn wait_for_signal() {
    #[cfg(unix)]
    {
        use tokio::signal::unix::{signal, SignalKind};

        match signal(SignalKind::terminate()) {
            Ok(mut sigterm) => {
                tokio::select! {
                    _ = tokio::signal::ctrl_c() => tracing::info!("received ctrl-c, shutting down"),
                    _ = sigterm.recv() => tracing::info!("received SIGTERM, shutting down"),
                }
                return;
            }
            Err(e) => tracing::warn!("failed to register SIGTERM handler: {e}"),
        }
    }

    match tokio::signal::ctrl_c().await {
        Ok(()) => tracing::info!("received ctrl-c, shutting down"),
        // Keep the sender alive so the scheduler keeps running.
        Err(e) => {
            tracing::error!("failed to listen for ctrl-c: {e}");
            std::future::pending::<()>().await;
        }
    }
}
