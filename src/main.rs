//! Steward - Cluster Node Agent
//!
//! Participates in leader election and tracks cluster membership through a
//! shared coordination store.

use std::path::PathBuf;
use std::sync::Arc;

use clap::{Parser, Subcommand};
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

use steward::api::HttpServer;
use steward::config::StewardConfig;
use steward::coord::MemoryCoordinationStore;
use steward::error::Result;
use steward::node::{LifecycleOptions, NodeDescriptor, NodeLifecycle};

/// Steward - Cluster Node Agent
#[derive(Parser)]
#[command(name = "steward")]
#[command(author, version, about, long_about = None)]
struct Cli {
    /// Path to configuration file
    #[arg(short, long, default_value = "steward.toml")]
    config: PathBuf,

    /// Log level (trace, debug, info, warn, error)
    #[arg(short, long, default_value = "info")]
    log_level: String,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Start the steward node
    Start {
        /// Override the configured node ID
        #[arg(long)]
        node_id: Option<String>,
    },

    /// Check node status
    Status {
        /// Node address to query (defaults to localhost)
        #[arg(short, long, default_value = "localhost:8080")]
        address: String,
    },

    /// Initialize a new configuration file
    Init {
        /// Output path for configuration file
        #[arg(short, long, default_value = "steward.toml")]
        output: PathBuf,

        /// Node ID
        #[arg(long, default_value = "node-1")]
        node_id: String,
    },

    /// Validate configuration file
    Validate,

    /// Show node information
    Info,
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();

    // Initialize logging
    init_logging(&cli.log_level);

    match cli.command {
        Commands::Start { node_id } => run_start(cli.config, node_id).await,
        Commands::Status { address } => run_status(address).await,
        Commands::Init { output, node_id } => run_init(output, node_id),
        Commands::Validate => run_validate(cli.config),
        Commands::Info => run_info(cli.config),
    }
}

/// Initialize logging
fn init_logging(level: &str) {
    let env_filter = tracing_subscriber::EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| level.into());

    tracing_subscriber::registry()
        .with(env_filter)
        .with(tracing_subscriber::fmt::layer())
        .init();
}

/// Start the steward node
async fn run_start(config_path: PathBuf, node_id: Option<String>) -> Result<()> {
    tracing::info!("Starting steward node...");

    let mut config = match StewardConfig::from_file(&config_path) {
        Ok(c) => c,
        Err(e) => {
            tracing::error!("Failed to load configuration from {:?}: {}", config_path, e);
            tracing::error!("Please check that the config file exists and is valid TOML");
            return Err(e);
        }
    };
    if let Some(id) = node_id {
        config.node.id = id;
        config.validate()?;
    }
    tracing::info!("Loaded configuration for node: {}", config.node.id);

    // The shipped binary runs against the in-process coordination store.
    // Multi-node deployments embed the library and inject a real backend
    // through the CoordinationStore trait.
    let store = Arc::new(MemoryCoordinationStore::new());
    tracing::warn!("Using in-process coordination store (single-node operation)");

    let descriptor = NodeDescriptor::new(
        config.node.id.clone(),
        config.node.advertise_address.clone(),
    );
    let lifecycle = Arc::new(NodeLifecycle::new(
        descriptor,
        LifecycleOptions::from_config(&config),
        store,
    ));

    // HTTP API for readiness, status, and remote shutdown
    if config.api.enabled {
        let http_server = HttpServer::new(config.api.clone(), Arc::clone(&lifecycle));
        tokio::spawn(async move {
            if let Err(e) = http_server.start().await {
                tracing::error!("HTTP server error: {}", e);
            }
        });
    }

    // SIGINT/SIGTERM trigger a graceful shutdown
    {
        let lifecycle = Arc::clone(&lifecycle);
        tokio::spawn(async move {
            wait_for_termination_signal().await;
            lifecycle.shutdown();
        });
    }

    lifecycle.run().await?;
    tracing::info!("Steward shutdown complete");
    Ok(())
}

/// Block until SIGINT or SIGTERM is delivered
async fn wait_for_termination_signal() {
    #[cfg(unix)]
    {
        let mut sigterm =
            match tokio::signal::unix::signal(tokio::signal::unix::SignalKind::terminate()) {
                Ok(s) => s,
                Err(e) => {
                    tracing::error!("Failed to install SIGTERM handler: {}", e);
                    let _ = tokio::signal::ctrl_c().await;
                    return;
                }
            };
        tokio::select! {
            _ = tokio::signal::ctrl_c() => {}
            _ = sigterm.recv() => {}
        }
    }
    #[cfg(not(unix))]
    {
        let _ = tokio::signal::ctrl_c().await;
    }
}

/// Check node status over the HTTP API
async fn run_status(address: String) -> Result<()> {
    let url = format!("http://{}/status", address);

    match reqwest::get(&url).await {
        Ok(response) => {
            let status: serde_json::Value = response
                .json()
                .await
                .map_err(|e| steward::Error::Network(e.to_string()))?;
            println!("{}", serde_json::to_string_pretty(&status).unwrap());
            Ok(())
        }
        Err(e) => {
            eprintln!("Failed to get status: {}", e);
            Err(steward::Error::Network(e.to_string()))
        }
    }
}

/// Initialize configuration file
fn run_init(output: PathBuf, node_id: String) -> Result<()> {
    let config_content = format!(
        r#"# Steward Configuration
# Generated configuration file

[node]
id = "{node_id}"
# advertise_address = "my-public-ip:7654"

[coordination]
namespace = "/steward"
session_ttl_secs = 30

[lifecycle]
poll_interval_ms = 1000
campaign_retry_delay_ms = 500
campaign_retry_max = 5
observe_retry_delay_ms = 250
observe_retry_max = 5

[api]
enabled = true
bind_address = "0.0.0.0:8080"
cors_enabled = false

[logging]
level = "info"
format = "pretty"
"#
    );

    std::fs::write(&output, config_content)?;
    println!("Configuration file created: {}", output.display());
    println!("\nEdit the file to configure your node and coordination settings.");
    println!("Then start with: steward start --config {}", output.display());

    Ok(())
}

/// Validate configuration
fn run_validate(config_path: PathBuf) -> Result<()> {
    match StewardConfig::from_file(&config_path) {
        Ok(config) => {
            println!("✓ Configuration is valid");
            println!("  Node ID: {}", config.node.id);
            println!("  Namespace: {}", config.coordination.namespace);
            println!("  Session TTL: {}s", config.coordination.session_ttl_secs);
            println!("  Poll Interval: {} ms", config.lifecycle.poll_interval_ms);
            Ok(())
        }
        Err(e) => {
            eprintln!("✗ Configuration error: {}", e);
            Err(e)
        }
    }
}

/// Show node information
fn run_info(config_path: PathBuf) -> Result<()> {
    let config = StewardConfig::from_file(&config_path)?;

    println!("Steward Node Information");
    println!("========================");
    println!();
    println!("Node ID:          {}", config.node.id);
    println!(
        "Advertise:        {}",
        config.node.advertise_address.as_deref().unwrap_or("(none)")
    );
    println!();
    println!("Coordination:");
    println!("  Namespace:      {}", config.coordination.namespace);
    println!("  Elections:      {}", config.election_namespace());
    println!("  Members:        {}", config.member_namespace());
    println!("  Session TTL:    {}s", config.coordination.session_ttl_secs);
    println!();
    println!("Lifecycle:");
    println!("  Poll Interval:  {} ms", config.lifecycle.poll_interval_ms);
    println!(
        "  Campaign Retry: {} ms x {}",
        config.lifecycle.campaign_retry_delay_ms, config.lifecycle.campaign_retry_max
    );
    println!();
    println!("API:");
    println!("  Enabled:        {}", config.api.enabled);
    println!("  Bind Address:   {}", config.api.bind_address);

    Ok(())
}
