//! Parlor voice service - main entry point
//!
//! Loads configuration, builds the voice context, starts the backend health
//! monitor and serves the HTTP control surface until shutdown.

use std::path::PathBuf;

use anyhow::{Context, Result};
use clap::Parser;
use parlor_voice::api::{self, AppContext};
use parlor_voice::config::{self, ConfigOverrides, VoiceConfig, CONFIG_ENV_VAR, CONFIG_FILE_NAME};
use parlor_voice::VoiceContext;
use tokio::signal;
use tokio_util::sync::CancellationToken;
use tracing::info;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

/// Command-line arguments for parlor-voice
#[derive(Parser, Debug)]
#[command(name = "parlor-voice")]
#[command(about = "Channel-scheduled voice synthesis and playback service")]
#[command(version)]
struct Args {
    /// Config file (TOML)
    #[arg(short, long)]
    config: Option<PathBuf>,

    /// HTTP bind address
    #[arg(short, long, env = "PARLOR_VOICE_BIND")]
    bind: Option<String>,

    /// Fixed participant concurrency ceiling (0 derives it)
    #[arg(long)]
    ceiling: Option<usize>,

    /// Number of participants at the table
    #[arg(long)]
    participants: Option<usize>,

    /// Start with speech disabled
    #[arg(long)]
    disabled: bool,
}

impl Args {
    fn overrides(&self) -> ConfigOverrides {
        ConfigOverrides {
            bind_addr: self.bind.clone(),
            concurrency_ceiling: self.ceiling,
            total_participants: self.participants,
            enabled: self.disabled.then_some(false),
            ..Default::default()
        }
    }
}

#[tokio::main]
async fn main() -> Result<()> {
    tracing_subscriber::registry()
        .with(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "parlor_voice=debug,tower_http=debug".into()),
        )
        .with(tracing_subscriber::fmt::layer())
        .init();

    let args = Args::parse();

    let config_path =
        parlor_common::config::resolve_config_path(args.config.as_deref(), CONFIG_ENV_VAR, CONFIG_FILE_NAME);
    match &config_path {
        Some(path) => info!("Using config file {}", path.display()),
        None => info!("No config file found, using defaults"),
    }

    let file_config = VoiceConfig::load(config_path.as_deref()).context("Failed to load configuration")?;
    let voice_config = config::merge(file_config, args.overrides());
    let bind_addr = voice_config.bind_addr.clone();

    info!(
        "Starting parlor-voice: {} participant channels, {} backends",
        voice_config.participant_channels,
        voice_config.backends.len()
    );

    let voice = VoiceContext::new(voice_config).context("Failed to initialize voice context")?;

    let shutdown = CancellationToken::new();
    let monitor = voice.spawn_health_monitor(shutdown.child_token());

    let signal_token = shutdown.clone();
    tokio::spawn(async move {
        shutdown_signal().await;
        signal_token.cancel();
    });

    api::run(AppContext::new(voice.clone()), &bind_addr, shutdown.clone())
        .await
        .context("Server error")?;

    shutdown.cancel();
    voice.stop_all();
    let _ = monitor.await;

    info!("Server shutdown complete");
    Ok(())
}

/// Graceful shutdown signal handler
async fn shutdown_signal() {
    let ctrl_c = async {
        if let Err(e) = signal::ctrl_c().await {
            tracing::error!("Failed to listen for Ctrl+C: {}", e);
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
                tracing::error!("Failed to install terminate handler: {}", e);
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
