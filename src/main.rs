//! Matterlink - Matrix-Mattermost bridge
//!
//! Mirrors the membership of bridged rooms and channels and relays
//! messages, edits, emotes, files and typing between both platforms.

mod bridge;
mod common;
mod config;
mod mattermost;
mod matrix;
mod store;

use std::sync::Arc;

use anyhow::Result;
use tokio::net::TcpListener;
use tokio::signal;
use tokio::sync::{mpsc, watch};
use tracing::{debug, error, info, warn};

use bridge::{Bridge, BridgeContext, GhostNamespace, MarkdownConverter, UserDirectory};
use common::reconnect::{reconnect_backoff, MAX_RECONNECT_DELAY};
use common::AppError;
use config::{env::get_config_path, load_and_validate, Config};
use mattermost::events::MattermostMessage;
use mattermost::websocket::run_event_stream;
use mattermost::MattermostClient;
use matrix::api::MatrixApi;
use matrix::events::MatrixEvent;
use matrix::{Appservice, MatrixClient};
use store::{CorrelationStore, Database, UserTable};

#[tokio::main]
async fn main() -> Result<()> {
    // Initialize logging
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::from_default_env()
                .add_directive(tracing::Level::INFO.into()),
        )
        .init();

    info!("Matterlink v{} starting...", env!("CARGO_PKG_VERSION"));

    let config_path = get_config_path();
    info!("Loading configuration from {}...", config_path);

    let config = load_and_validate(&config_path).map_err(|e| {
        error!("Failed to load configuration: {}", e);
        error!("Please ensure {} exists and is properly formatted.", config_path);
        e
    })?;

    info!("Configuration loaded successfully");
    info!("  Matrix homeserver: {}", config.matrix.homeserver_url);
    info!("  Matrix bot: {}", config.matrix.bot_user_id());
    info!("  Mattermost server: {}", config.mattermost.url);
    info!("  Channel mappings: {}", config.mappings.len());

    let (correlations, users) = open_store(&config)?;
    let (mattermost, matrix) = connect_clients(&config)?;

    let namespace = GhostNamespace::from_config(&config);
    let identities = UserDirectory::new(
        users,
        mattermost.clone(),
        matrix.clone(),
        namespace.clone(),
        config.mattermost.puppet_prefix.clone(),
        config.mattermost.email_domain.clone(),
    )?;

    let ctx = Arc::new(BridgeContext {
        mattermost: mattermost.clone(),
        matrix: matrix.clone(),
        identities: Arc::new(identities),
        store: correlations,
        formatter: Arc::new(MarkdownConverter::new()?),
        namespace,
    });
    let bridge = Arc::new(Bridge::new(ctx, &config));

    if let Some(name) = &config.matrix.bot_display_name {
        if let Err(e) = matrix.set_display_name(matrix.bot_user_id(), name).await {
            warn!("Failed to set bot display name: {}", e);
        }
    }

    // ============================================================
    // Event streams
    // ============================================================
    let (shutdown_tx, shutdown_rx) = watch::channel(false);
    let (mattermost_tx, mut mattermost_rx) = mpsc::unbounded_channel::<MattermostMessage>();
    let (matrix_tx, mut matrix_rx) = mpsc::unbounded_channel::<MatrixEvent>();

    let mattermost_stream = tokio::spawn(mattermost_loop(
        mattermost.clone(),
        mattermost_tx,
        shutdown_rx.clone(),
    ));

    let listener = TcpListener::bind(&config.matrix.listen_address)
        .await
        .map_err(|e| {
            error!(
                "Failed to listen on {}: {}",
                config.matrix.listen_address, e
            );
            e
        })?;
    let appservice = Arc::new(Appservice::new(
        config.matrix.homeserver_token.clone(),
        matrix_tx,
    ));
    let matrix_stream = tokio::spawn(async move {
        let mut shutdown_rx = shutdown_rx;
        let shutdown = async move {
            let _ = shutdown_rx.wait_for(|stop| *stop).await;
        };
        if let Err(e) = appservice.serve(listener, shutdown).await {
            error!("Homeserver transaction endpoint failed: {}", e);
        }
        info!("Matrix event stream stopped");
    });

    // Events arriving before start() stay queued on the closed lanes.
    let forward_mattermost = {
        let bridge = bridge.clone();
        tokio::spawn(async move {
            while let Some(message) = mattermost_rx.recv().await {
                bridge.handle_mattermost(message);
            }
            debug!("Mattermost forwarding task ended");
        })
    };
    let forward_matrix = {
        let bridge = bridge.clone();
        tokio::spawn(async move {
            while let Some(event) = matrix_rx.recv().await {
                bridge.handle_matrix(event);
            }
            debug!("Matrix forwarding task ended");
        })
    };

    bridge.start().await.map_err(|e| {
        error!("Failed to start bridge: {:#}", e);
        e
    })?;
    info!("Bridge running with {} channel pairs", bridge.bridged_pairs());

    // ============================================================
    // Run until shutdown
    // ============================================================
    let mut reload = reload_signal()?;
    let shutdown = shutdown_signal();
    tokio::pin!(shutdown);

    loop {
        tokio::select! {
            biased;
            _ = &mut shutdown => {
                info!("Shutdown signal received");
                break;
            }
            Some(()) = reload.recv() => {
                info!("Reloading configuration from {}...", config_path);
                match load_and_validate(&config_path) {
                    Ok(config) => {
                        if let Err(e) = bridge.reload(&config) {
                            error!("Failed to apply configuration: {:#}", e);
                        }
                    }
                    Err(e) => error!("Failed to reload configuration: {}", e),
                }
            }
        }
    }

    if let Err(e) = shutdown_tx.send(true) {
        debug!("Shutdown channel closed (streams already exited): {}", e);
    }
    let timeout = tokio::time::Duration::from_secs(5);
    for (name, task) in [("Mattermost", mattermost_stream), ("Matrix", matrix_stream)] {
        match tokio::time::timeout(timeout, task).await {
            Ok(Ok(())) => debug!("{} stream stopped", name),
            Ok(Err(e)) => warn!("{} stream task panicked: {}", name, e),
            Err(_) => warn!("{} stream shutdown timed out", name),
        }
    }
    match tokio::time::timeout(timeout, bridge.drain()).await {
        Ok(Ok(())) => debug!("Relay lanes drained"),
        Ok(Err(e)) => warn!("Failed to drain relay lanes: {:#}", e),
        Err(_) => warn!("Relay lanes did not drain in time"),
    }
    forward_mattermost.abort();
    forward_matrix.abort();

    info!("Exiting...");
    Ok(())
}

fn open_store(config: &Config) -> Result<(CorrelationStore, UserTable), AppError> {
    let db = Database::open(&config.database.path)?;
    Ok((CorrelationStore::new(db.clone()), UserTable::new(db)))
}

fn connect_clients(
    config: &Config,
) -> Result<(Arc<MattermostClient>, Arc<MatrixClient>), AppError> {
    let mattermost = MattermostClient::new(&config.mattermost)?;
    let matrix = MatrixClient::new(&config.matrix)?;
    Ok((Arc::new(mattermost), Arc::new(matrix)))
}

/// Keep the Mattermost websocket connected until shutdown.
async fn mattermost_loop(
    client: Arc<MattermostClient>,
    events: mpsc::UnboundedSender<MattermostMessage>,
    mut shutdown_rx: watch::Receiver<bool>,
) {
    let mut backoff = reconnect_backoff();

    loop {
        match client.websocket_url() {
            Ok(url) => {
                let stream = run_event_stream(&url, client.bot_token(), &events);
                tokio::select! {
                    result = stream => match result {
                        Ok(()) => {
                            info!("Mattermost websocket disconnected");
                            backoff = reconnect_backoff();
                        }
                        Err(e) => error!("Mattermost websocket error: {}", e),
                    },
                    _ = shutdown_rx.changed() => break,
                }
            }
            Err(e) => error!("Invalid Mattermost websocket url: {}", e),
        }

        if events.is_closed() || *shutdown_rx.borrow() {
            break;
        }

        let delay = backoff.next().unwrap_or(MAX_RECONNECT_DELAY);
        info!("Reconnecting to Mattermost in {:.1} seconds...", delay.as_secs_f64());
        tokio::select! {
            _ = tokio::time::sleep(delay) => {},
            _ = shutdown_rx.changed() => break,
        }
    }

    info!("Mattermost event stream stopped");
}

async fn shutdown_signal() {
    let ctrl_c = async {
        if let Err(e) = signal::ctrl_c().await {
            error!("Failed to listen for Ctrl+C: {}", e);
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
                error!("Failed to install SIGTERM handler: {}", e);
                std::future::pending::<()>().await;
            }
        }
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        _ = ctrl_c => info!("Received Ctrl+C"),
        _ = terminate => info!("Received SIGTERM"),
    }
}

/// Configuration reload requests (SIGHUP).
fn reload_signal() -> Result<mpsc::Receiver<()>> {
    let (tx, rx) = mpsc::channel(1);

    #[cfg(unix)]
    {
        let mut hangup = signal::unix::signal(signal::unix::SignalKind::hangup())?;
        tokio::spawn(async move {
            while hangup.recv().await.is_some() {
                if tx.send(()).await.is_err() {
                    break;
                }
            }
        });
    }

    #[cfg(not(unix))]
    drop(tx);

    Ok(rx)
}
