//! cloudvar daemon - cloud variable server
//!
//! Serves shared project variables over WebSocket. Clients handshake with
//! a `(user, project)` pair, then create, rename, delete and set variables;
//! every `set` is broadcast to all connected clients.
//!
//! # Usage
//!
//! ```bash
//! # Start the server (foreground) with the default config file
//! cloudvard start
//!
//! # Start on a different address
//! cloudvard start --host 0.0.0.0 --port 8080
//! CLOUDVAR_PORT=8080 cloudvard start
//!
//! # Validate a config file and print the effective configuration
//! cloudvard check-config --config ./cloudvar.toml
//!
//! # Enable debug logging
//! RUST_LOG=cloudvard=debug cloudvard start
//! ```
//!
//! # Signal Handling
//!
//! - SIGTERM/SIGINT: Graceful shutdown

use std::path::{Path, PathBuf};
use std::process;
use std::sync::Arc;

use anyhow::{Context, Result};
use clap::{Parser, Subcommand};
use tokio_util::sync::CancellationToken;
use tracing::{error, info, warn};
use tracing_subscriber::EnvFilter;

use cloudvard::audit::{JsonFileStore, PersistenceGateway};
use cloudvard::config::{default_config_path, CloudConfig};
use cloudvard::registry::spawn_registry;
use cloudvard::server::CloudServer;
use cloudvard::state::CloudState;

/// cloudvar daemon - cloud variable server
#[derive(Parser, Debug)]
#[command(name = "cloudvard", version, about)]
struct Args {
    #[command(subcommand)]
    command: Option<Command>,
}

#[derive(Subcommand, Debug)]
enum Command {
    /// Start the server in the foreground
    Start {
        #[command(flatten)]
        source: ConfigSource,

        /// Host to bind (overrides the config file)
        #[arg(long, env = "CLOUDVAR_HOST")]
        host: Option<String>,

        /// Port to bind (overrides the config file)
        #[arg(long, env = "CLOUDVAR_PORT")]
        port: Option<u16>,
    },
    /// Validate the configuration and print it
    CheckConfig {
        #[command(flatten)]
        source: ConfigSource,
    },
}

#[derive(clap::Args, Debug, Default)]
struct ConfigSource {
    /// Path to the TOML config file
    #[arg(short, long)]
    config: Option<PathBuf>,
}

impl ConfigSource {
    /// Loads the config file, falling back to defaults when the default
    /// path does not exist. An explicit `--config` must exist.
    fn load(&self) -> Result<CloudConfig> {
        match &self.config {
            Some(path) => load_file(path),
            None => {
                let path = default_config_path();
                if path.exists() {
                    load_file(&path)
                } else {
                    Ok(CloudConfig::default())
                }
            }
        }
    }
}

fn load_file(path: &Path) -> Result<CloudConfig> {
    CloudConfig::from_file(path)
        .with_context(|| format!("Failed to load config from {}", path.display()))
}

fn main() -> Result<()> {
    let args = Args::parse();

    let command = args.command.unwrap_or(Command::Start {
        source: ConfigSource::default(),
        host: None,
        port: None,
    });

    match command {
        Command::Start { source, host, port } => {
            let mut config = source.load()?;
            config.apply_overrides(host, port);
            config.validate().context("Invalid configuration")?;
            run_server(config)
        }
        Command::CheckConfig { source } => {
            let config = source.load()?;
            config.validate().context("Invalid configuration")?;
            let policy = config.access_policy()?;
            println!("{}", config.to_toml()?);
            println!(
                "# bind {}, project policy {}, {} banned users, {} banned addresses",
                config.bind_addr()?,
                policy.projects().mode(),
                policy.banned_username_count(),
                policy.banned_address_count()
            );
            Ok(())
        }
    }
}

#[tokio::main]
async fn run_server(config: CloudConfig) -> Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::from_default_env()
                .add_directive("cloudvard=info".parse()?)
                .add_directive("cloudvar_core=info".parse()?)
                .add_directive("cloudvar_protocol=info".parse()?),
        )
        .init();

    info!(
        version = env!("CARGO_PKG_VERSION"),
        pid = process::id(),
        "cloudvar daemon starting"
    );

    let policy = config.access_policy()?;
    let mut state = CloudState::new(policy, config.limits.size_limit);

    if config.audit.enabled {
        let path = config.audit.resolved_path();
        match JsonFileStore::open(&path).await {
            Ok(store) => {
                info!(path = %path.display(), "Handshake audit enabled");
                let gateway: Arc<dyn PersistenceGateway> = Arc::new(store);
                state = state.with_audit(gateway);
            }
            Err(e) => {
                warn!(path = %path.display(), error = %e, "Handshake audit disabled");
            }
        }
    }

    let cancel_token = CancellationToken::new();

    let shutdown_token = cancel_token.clone();
    tokio::spawn(async move {
        if let Err(e) = wait_for_shutdown_signal().await {
            error!(error = %e, "Error waiting for shutdown signal");
        }
        info!("Shutdown signal received");
        shutdown_token.cancel();
    });

    let registry = spawn_registry(state);
    info!("Registry started");

    let server = CloudServer::bind(
        config.bind_addr()?,
        registry.clone(),
        cancel_token,
        config.limits.max_message_bytes,
    )
    .await?;

    if let Err(e) = server.run().await {
        error!(error = %e, "Server error");
        return Err(e.into());
    }

    let stats = registry.stats().await;
    info!(
        sessions = stats.sessions,
        variables = stats.variables,
        "cloudvar daemon stopped"
    );
    Ok(())
}

async fn wait_for_shutdown_signal() -> Result<()> {
    #[cfg(unix)]
    {
        use tokio::signal::unix::{signal, SignalKind};

        let mut sigterm = signal(SignalKind::terminate())?;
        let mut sigint = signal(SignalKind::interrupt())?;

        tokio::select! {
            _ = sigterm.recv() => {
                info!("Received SIGTERM");
            }
            _ = sigint.recv() => {
                info!("Received SIGINT");
            }
        }
    }

    #[cfg(not(unix))]
    {
        tokio::signal::ctrl_c().await?;
        info!("Received Ctrl+C");
    }

    Ok(())
}
