//! Live audio relay (relay-server) - Main entry point

use std::net::SocketAddr;
use std::path::PathBuf;
use std::sync::Arc;

use anyhow::{Context, Result};
use clap::Parser;
use tokio::signal;
use tracing::{info, warn};
use tracing_subscriber::{layer::SubscriberExt, reload, util::SubscriberInitExt, EnvFilter};

use relay_common::config::{ConfigResolver, TomlConfig};
use relay_server::api::{self, AppState};
use relay_server::StreamingController;

/// Command-line arguments for relay-server
#[derive(Parser, Debug)]
#[command(name = "relay-server")]
#[command(about = "Relays one song live to every connected listener")]
#[command(version)]
struct Args {
    /// Path to the TOML config file
    #[arg(short, long, env = "RELAY_CONFIG")]
    config: Option<PathBuf>,

    /// Port to listen on (overrides the config file)
    #[arg(short, long, env = "RELAY_PORT")]
    port: Option<u16>,

    /// Directory holding the web pages (overrides the config file)
    #[arg(long, env = "RELAY_PUBLIC_DIRECTORY")]
    public_directory: Option<PathBuf>,

    /// Song to relay, relative to the audio directory (overrides the config file)
    #[arg(long, env = "RELAY_CURRENT_SONG")]
    current_song: Option<String>,
}

impl Args {
    fn apply(&self, config: &mut TomlConfig) {
        if let Some(port) = self.port {
            config.port = port;
        }
        if let Some(dir) = &self.public_directory {
            config.public_directory = dir.clone();
        }
        if let Some(song) = &self.current_song {
            config.current_song = song.clone();
        }
    }
}

/// Default filter directives for a log level
fn log_filter(level: &str) -> String {
    format!("relay_server={level},relay_common={level},tower_http=debug")
}

#[tokio::main]
async fn main() -> Result<()> {
    let args = Args::parse();

    // Tracing comes up before the config so config resolution is logged;
    // the configured level replaces the default once known, RUST_LOG wins over both
    let env_filter = EnvFilter::try_from_default_env().ok();
    let filter_from_env = env_filter.is_some();
    let (filter, filter_handle) =
        reload::Layer::new(env_filter.unwrap_or_else(|| EnvFilter::new(log_filter("info"))));
    tracing_subscriber::registry()
        .with(filter)
        .with(tracing_subscriber::fmt::layer())
        .init();

    let mut config = ConfigResolver::new(args.config.clone())
        .load()
        .context("Failed to load configuration")?;
    args.apply(&mut config);

    if !filter_from_env {
        if let Err(e) = filter_handle.reload(EnvFilter::new(log_filter(&config.logging.level))) {
            warn!(error = %e, level = %config.logging.level, "Cannot apply configured log level");
        }
    }

    info!(
        version = env!("CARGO_PKG_VERSION"),
        git = env!("GIT_HASH"),
        built = env!("BUILD_TIMESTAMP"),
        profile = env!("BUILD_PROFILE"),
        "Starting relay-server"
    );
    info!(
        public_directory = %config.public_directory.display(),
        song = %config.song_path().display(),
        "Configuration loaded"
    );

    let controller = Arc::new(
        StreamingController::from_config(&config)
            .context("Failed to initialize streaming controller")?,
    );

    let app = api::create_router(AppState {
        controller: Arc::clone(&controller),
        home_page: config.home_page.clone(),
        controller_page: config.controller_page.clone(),
    });

    let addr = SocketAddr::from(([0, 0, 0, 0], config.port));
    info!("Starting HTTP server on {}", addr);

    let listener = tokio::net::TcpListener::bind(addr)
        .await
        .context("Failed to bind to address")?;

    // Open /stream responses only end once their listeners are disconnected
    let shutdown = async move {
        shutdown_signal().await;
        controller.shutdown().await;
    };

    axum::serve(listener, app)
        .with_graceful_shutdown(shutdown)
        .await
        .context("Server error")?;

    info!("Server shutdown complete");
    Ok(())
}

/// Resolves on Ctrl+C or SIGTERM
async fn shutdown_signal() {
    let ctrl_c = async {
        if let Err(e) = signal::ctrl_c().await {
            warn!(error = %e, "Failed to listen for Ctrl+C");
            std::future::pending::<()>().await;
        }
    };

    #[cfg(unix)]
    let terminate = async {
        match signal::unix::signal(signal::unix::SignalKind::terminate()) {
            Ok(mut sigterm) => {
                sigterm.recv().await;
            }
            Err(e) => {
                warn!(error = %e, "Failed to install SIGTERM handler");
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
