use clap::{Parser, Subcommand};
use std::time::Duration;

use crate::api::types::{ClientsResponse, DownloadAccepted, DownloadStatusResponse};
use crate::error::{Result, UplinkError};
use crate::protocol::DEFAULT_CHUNK_SIZE;

#[derive(Parser)]
#[command(name = "uplink")]
#[command(version = "0.1.0")]
#[command(about = "Pull files from NAT'd on-premise agents over persistent uplinks", long_about = None)]
pub struct Cli {
    #[command(subcommand)]
    pub command: Commands,
}

#[derive(Subcommand)]
pub enum Commands {
    /// Run the cloud-side server (control plane + agent uplinks)
    Server {
        /// Config directory containing default.toml
        #[arg(short, long, default_value = "config")]
        config: String,
    },
    /// Run the on-premise agent
    Agent {
        /// Server base URL
        #[arg(short, long, default_value = "http://localhost:8080")]
        server: String,
        /// Unique agent identifier (e.g. a site name)
        #[arg(short, long)]
        agent_id: String,
        /// Chunk size in bytes (default: 1MB)
        #[arg(long, default_value_t = DEFAULT_CHUNK_SIZE)]
        chunk_size: usize,
    },
    /// Trigger a download from a connected agent
    Download {
        /// Server base URL
        #[arg(short, long, default_value = "http://localhost:8080")]
        server: String,
        /// Agent to pull from
        #[arg(short, long)]
        client_id: String,
        /// Path on the agent's filesystem
        #[arg(short, long)]
        file_path: String,
        /// Poll until the transfer reaches a terminal state
        #[arg(long)]
        wait: bool,
    },
    /// List connected agents
    Clients {
        /// Server base URL
        #[arg(short, long, default_value = "http://localhost:8080")]
        server: String,
    },
}

/// Poll interval while waiting for a transfer to settle
const POLL_INTERVAL: Duration = Duration::from_secs(2);

/// Trigger a download via the control-plane API
pub async fn trigger_download(
    server: &str,
    client_id: &str,
    file_path: &str,
    wait: bool,
) -> Result<()> {
    let client = reqwest::Client::new();
    let resp = client
        .post(format!("{server}/api/download"))
        .json(&serde_json::json!({
            "client_id": client_id,
            "file_path": file_path,
        }))
        .send()
        .await?;

    if !resp.status().is_success() {
        let status = resp.status();
        let body = resp.text().await.unwrap_or_default();
        return Err(UplinkError::Internal(format!(
            "download request failed ({status}): {body}"
        )));
    }

    let accepted: DownloadAccepted = resp.json().await?;
    println!("✓ Download triggered");
    println!("  Download ID: {}", accepted.download_id);
    println!("  Status: {}", accepted.status);

    if wait {
        poll_download(server, &accepted.download_id).await?;
    }
    Ok(())
}

/// Poll download status until it reaches a terminal state
pub async fn poll_download(server: &str, download_id: &str) -> Result<()> {
    let client = reqwest::Client::new();
    let url = format!("{server}/api/downloads/{download_id}");

    loop {
        let status: DownloadStatusResponse = client.get(&url).send().await?.json().await?;

        match status.status.as_str() {
            "completed" => {
                println!("\n✓ Download completed");
                println!("  File saved to: {}", status.local_path);
                println!(
                    "  {} bytes in {} chunks",
                    status.bytes_received, status.chunks_received
                );
                break;
            }
            "failed" => {
                println!(
                    "\n✗ Download failed: {}",
                    status.error.as_deref().unwrap_or("unknown error")
                );
                break;
            }
            other => {
                println!(
                    "  Status: {other} (chunks: {}, bytes: {})",
                    status.chunks_received, status.bytes_received
                );
            }
        }

        tokio::time::sleep(POLL_INTERVAL).await;
    }
    Ok(())
}

/// List connected agents via the control-plane API
pub async fn list_clients(server: &str) -> Result<()> {
    let resp: ClientsResponse = reqwest::get(format!("{server}/api/clients"))
        .await?
        .json()
        .await?;

    if resp.clients.is_empty() {
        println!("No agents connected");
        return Ok(());
    }

    for client in resp.clients {
        println!(
            "{}  connected_at={}  last_seen={}",
            client.client_id,
            client.connected_at.format("%Y-%m-%d %H:%M:%S"),
            client.last_seen.format("%Y-%m-%d %H:%M:%S")
        );
    }
    Ok(())
}
