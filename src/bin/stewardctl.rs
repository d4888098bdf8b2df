//! StewardCtl - Command line tool for inspecting and controlling steward nodes
//!
//! Usage:
//!   stewardctl status           - Show node status
//!   stewardctl ready            - Check node readiness (exit code reflects it)
//!   stewardctl shutdown         - Request a graceful shutdown

use anyhow::Context;
use clap::{Parser, Subcommand};
use serde::Deserialize;

/// Steward Node Control Tool
#[derive(Parser)]
#[command(name = "stewardctl")]
#[command(about = "Inspect and control steward nodes", long_about = None)]
struct Cli {
    /// API endpoint to connect to
    #[arg(short, long, default_value = "localhost:8080")]
    endpoint: String,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Show node status
    Status,
    /// Check node readiness; exits non-zero when not ready
    Ready,
    /// Request a graceful shutdown of the node
    Shutdown,
}

// ============ API Response Types ============

#[derive(Debug, Deserialize)]
struct StatusResponse {
    #[serde(default)]
    node_id: String,
    #[serde(default)]
    state: String,
    #[serde(default)]
    is_leader: bool,
    #[serde(default)]
    leader_id: Option<String>,
}

#[derive(Debug, Deserialize)]
struct ShutdownResponse {
    #[serde(default)]
    shutting_down: bool,
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let cli = Cli::parse();
    let base = format!("http://{}", cli.endpoint);

    match cli.command {
        Commands::Status => run_status(&base).await,
        Commands::Ready => run_ready(&base).await,
        Commands::Shutdown => run_shutdown(&base).await,
    }
}

async fn run_status(base: &str) -> anyhow::Result<()> {
    let status: StatusResponse = reqwest::get(format!("{}/status", base))
        .await
        .context("failed to reach node API")?
        .json()
        .await
        .context("failed to parse status response")?;

    println!("Node:    {}", status.node_id);
    println!("State:   {}", status.state);
    println!(
        "Role:    {}",
        if status.is_leader { "LEADER" } else { "FOLLOWER" }
    );
    println!(
        "Leader:  {}",
        status.leader_id.as_deref().unwrap_or("(unknown)")
    );
    Ok(())
}

async fn run_ready(base: &str) -> anyhow::Result<()> {
    let response = reqwest::get(format!("{}/ready", base))
        .await
        .context("failed to reach node API")?;

    if response.status().is_success() {
        println!("ready");
        Ok(())
    } else {
        println!("not ready");
        std::process::exit(1);
    }
}

async fn run_shutdown(base: &str) -> anyhow::Result<()> {
    let client = reqwest::Client::new();
    let response: ShutdownResponse = client
        .post(format!("{}/admin/shutdown", base))
        .send()
        .await
        .context("failed to reach node API")?
        .json()
        .await
        .context("failed to parse shutdown response")?;

    if response.shutting_down {
        println!("Shutdown requested");
    } else {
        println!("Node declined shutdown");
    }
    Ok(())
}
