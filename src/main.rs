//! ClawKangsar - Lightweight Personal Assistant Gateway
//!
//! Runs the chat gateways, the on-demand headless browser and the health
//! endpoints in one process.

use anyhow::Result;
use clap::{Parser, Subcommand};
use clawkangsar::{
    config::ClawConfig,
    gateway::{Gateway, APP_NAME},
    tools::browser::ChromeLauncher,
};
use std::path::{Path, PathBuf};
use tokio_util::sync::CancellationToken;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

#[derive(Parser)]
#[command(name = "clawkangsar")]
#[command(author = "ClawKangsar Team")]
#[command(version)]
#[command(about = "Lightweight personal assistant gateway for constrained hosts")]
struct Cli {
    /// Configuration file path
    #[arg(short, long, env = "CLAWKANGSAR_CONFIG", default_value = "clawkangsar.toml")]
    config: PathBuf,

    /// Enable verbose logging
    #[arg(short, long)]
    verbose: bool,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Start the gateway
    Gateway,

    /// Run diagnostics
    Doctor,

    /// Show configuration
    Config {
        /// Show default configuration
        #[arg(long)]
        default: bool,
    },
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();
    let config = ClawConfig::load(&cli.config)?;

    // Initialize logging
    let log_level = if cli.verbose {
        "debug"
    } else {
        config.log_directive()
    };
    tracing_subscriber::registry()
        .with(
            tracing_subscriber::EnvFilter::try_from_default_env().unwrap_or_else(|_| {
                format!("clawkangsar={},tower_http={}", log_level, log_level).into()
            }),
        )
        .with(tracing_subscriber::fmt::layer())
        .init();

    match cli.command {
        Commands::Gateway => run_gateway(config).await?,
        Commands::Doctor => run_doctor(&cli.config, &config).await?,
        Commands::Config { default } => show_config(if default { None } else { Some(&config) })?,
    }

    Ok(())
}

async fn run_gateway(config: ClawConfig) -> Result<()> {
    tracing::info!(
        session_dir = %config.storage.session_dir.display(),
        health = config.health.enabled,
        "Starting {} gateway",
        APP_NAME
    );

    let gateway = Gateway::new(config).await?;

    let shutdown = CancellationToken::new();
    tokio::spawn({
        let shutdown = shutdown.clone();
        async move {
            wait_for_signal().await;
            shutdown.cancel();
        }
    });

    gateway.run(shutdown).await?;
    Ok(())
}

async fn wait_for_signal() {
    #[cfg(unix)]
    {
        use tokio::signal::unix::{signal, SignalKind};
        match signal(SignalKind::terminate()) {
            Ok(mut terminate) => {
                tokio::select! {
                    _ = tokio::signal::ctrl_c() => {}
                    _ = terminate.recv() => {}
                }
            }
            Err(e) => {
                tracing::warn!("Failed to install SIGTERM handler: {}", e);
                let _ = tokio::signal::ctrl_c().await;
            }
        }
    }
    #[cfg(not(unix))]
    {
        let _ = tokio::signal::ctrl_c().await;
    }
}

async fn run_doctor(config_path: &Path, config: &ClawConfig) -> Result<()> {
    println!("{} Doctor", APP_NAME);
    println!();

    println!("Checking configuration...");
    if config_path.exists() {
        println!("  ✓ Configuration file found: {}", config_path.display());
    } else {
        println!("  ℹ No configuration file at {} (using defaults)", config_path.display());
    }

    println!();
    println!("Checking headless browser...");
    match ChromeLauncher::new(config.browser.executable.clone()).resolve_executable() {
        Ok(path) if path.exists() => println!("  ✓ Browser executable: {}", path.display()),
        Ok(path) => println!("  ✗ Browser executable missing: {}", path.display()),
        Err(e) => println!("  ✗ {}", e),
    }

    println!();
    println!("Checking session storage...");
    let dir = &config.storage.session_dir;
    match tokio::fs::create_dir_all(dir).await {
        Ok(()) => {
            let probe = dir.join(".doctor-probe");
            match tokio::fs::write(&probe, b"ok").await {
                Ok(()) => {
                    let _ = tokio::fs::remove_file(&probe).await;
                    println!("  ✓ Session directory writable: {}", dir.display());
                }
                Err(e) => println!("  ✗ Session directory not writable: {} ({})", dir.display(), e),
            }
        }
        Err(e) => println!("  ✗ Cannot create session directory {}: {}", dir.display(), e),
    }

    println!();
    println!("Checking channels...");
    if !config.telegram.enabled {
        println!("  ℹ Telegram disabled");
    } else if config.telegram.token.trim().is_empty() {
        println!("  ✗ Telegram enabled but no token configured");
    } else if config.telegram.allow_list.is_empty() {
        println!("  ✗ Telegram allow_list is empty; every user will be rejected");
    } else {
        println!(
            "  ✓ Telegram enabled for {} user(s)",
            config.telegram.allow_list.len()
        );
    }

    println!();
    println!("Doctor check complete!");

    Ok(())
}

fn show_config(config: Option<&ClawConfig>) -> Result<()> {
    let config = config.cloned().unwrap_or_default();
    let toml = toml::to_string_pretty(&config)?;
    println!("{}", toml);
    Ok(())
}
