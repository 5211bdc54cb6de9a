//! Agent-side sender: the on-premise peer.
//!
//! Runs behind NAT/firewall and initiates the outbound connection, then
//! serves transfer requests by streaming the requested file back over the
//! same socket as ordered chunk messages. Each requested transfer streams
//! from its own task, so concurrent transfers interleave on the shared
//! outbound queue.

use futures_util::{SinkExt, StreamExt};
use std::path::PathBuf;
use std::time::Duration;
use tokio::fs::File;
use tokio::io::AsyncReadExt;
use tokio::sync::mpsc;
use tokio_tungstenite::{connect_async, tungstenite::Message};
use tracing::{debug, error, info, warn};
use url::Url;

use crate::error::{Result, UplinkError};
use crate::protocol::{AgentMessage, ServerMessage};

/// Maximum reconnection delay
const MAX_RECONNECT_DELAY_SECS: u64 = 60;

/// Connection establishment timeout
const CONNECT_TIMEOUT: Duration = Duration::from_secs(10);

/// Outbound queue shared by all in-flight transfers on the connection
const OUTBOUND_QUEUE: usize = 8;

#[derive(Debug, Clone)]
pub struct AgentConfig {
    /// Server base URL, e.g. http://cloud.example.com:8080
    pub server_url: String,
    /// Unique agent identifier (e.g. a site name)
    pub agent_id: String,
    /// Chunk payload size in bytes
    pub chunk_size: usize,
}

impl AgentConfig {
    fn ws_url(&self) -> String {
        let base = self
            .server_url
            .replace("http://", "ws://")
            .replace("https://", "wss://");
        format!("{}/ws", base.trim_end_matches('/'))
    }
}

/// Outbound-connecting sender with automatic reconnection.
pub struct AgentSender {
    config: AgentConfig,
    reconnect_delay: Duration,
}

impl AgentSender {
    pub fn new(config: AgentConfig) -> Self {
        Self {
            config,
            reconnect_delay: Duration::from_secs(1),
        }
    }

    /// Run the connection with automatic reconnection. Never returns under
    /// normal operation.
    pub async fn run(&self) -> Result<()> {
        let mut attempt: u32 = 0;
        let max_delay = Duration::from_secs(MAX_RECONNECT_DELAY_SECS);

        info!(
            agent_id = %self.config.agent_id,
            server = %self.config.server_url,
            "starting uplink agent"
        );

        loop {
            match self.connect_and_serve().await {
                Ok(()) => {
                    info!("connection closed by server");
                    attempt = 0;
                }
                Err(e) => {
                    attempt += 1;
                    error!("connection error (attempt {}): {}", attempt, e);
                }
            }

            // Calculate backoff with jitter
            let base_delay = self.reconnect_delay * attempt.min(10);
            let delay = base_delay.min(max_delay);

            let jitter_range = delay.as_millis() as u64 / 4;
            let seed = std::time::SystemTime::now()
                .duration_since(std::time::UNIX_EPOCH)
                .unwrap_or_default()
                .as_nanos() as u64;
            let jitter = Duration::from_millis(seed % jitter_range.max(1));
            let final_delay = delay + jitter;

            info!("reconnecting in {:?} (attempt {})", final_delay, attempt + 1);
            tokio::time::sleep(final_delay).await;
        }
    }

    async fn connect_and_serve(&self) -> Result<()> {
        let url = Url::parse(&self.config.ws_url())
            .map_err(|e| UplinkError::Internal(format!("invalid server URL: {e}")))?;

        info!("connecting to {url}");

        let (ws_stream, _) = tokio::time::timeout(CONNECT_TIMEOUT, connect_async(url.as_str()))
            .await
            .map_err(|_| UplinkError::Internal("connection timeout".to_string()))?
            .map_err(UplinkError::WebSocket)?;

        let (mut sink, mut stream) = ws_stream.split();

        // Register with the server
        let register = AgentMessage::Register {
            agent_id: self.config.agent_id.clone(),
        };
        sink.send(Message::Text(serde_json::to_string(&register)?))
            .await?;

        let (outbound_tx, mut outbound_rx) = mpsc::channel::<AgentMessage>(OUTBOUND_QUEUE);

        info!("connected, waiting for transfer requests");

        loop {
            tokio::select! {
                Some(msg) = outbound_rx.recv() => {
                    sink.send(Message::Text(serde_json::to_string(&msg)?)).await?;
                }
                frame = stream.next() => {
                    match frame {
                        Some(Ok(Message::Text(text))) => {
                            self.handle_frame(&text, &outbound_tx);
                        }
                        Some(Ok(Message::Ping(data))) => {
                            sink.send(Message::Pong(data)).await?;
                        }
                        Some(Ok(Message::Close(_))) => {
                            info!("received close frame from server");
                            return Ok(());
                        }
                        Some(Ok(_)) => {}
                        Some(Err(e)) => {
                            return Err(UplinkError::WebSocket(e));
                        }
                        None => {
                            info!("stream ended");
                            return Ok(());
                        }
                    }
                }
            }
        }
    }

    fn handle_frame(&self, text: &str, outbound: &mpsc::Sender<AgentMessage>) {
        match serde_json::from_str::<ServerMessage>(text) {
            Ok(ServerMessage::TransferRequest { transfer_id, path }) => {
                info!(transfer_id, path, "transfer requested");
                let outbound = outbound.clone();
                let chunk_size = self.config.chunk_size;
                tokio::spawn(async move {
                    if let Err(e) = stream_file(&transfer_id, &path, chunk_size, &outbound).await {
                        error!(transfer_id, "cannot send file: {e}");
                        let _ = outbound
                            .send(AgentMessage::Abort {
                                transfer_id: transfer_id.clone(),
                                message: e.to_string(),
                            })
                            .await;
                    }
                });
            }
            Ok(ServerMessage::Registered { message }) => {
                info!("{message}");
            }
            Err(e) => {
                debug!("unrecognized frame: {e}");
            }
        }
    }
}

/// Stream one file as ordered chunk messages, `seq` starting at 1 and
/// `is_last` on the final chunk. An empty file becomes a single empty final
/// chunk, since end-of-stream rides on a chunk.
async fn stream_file(
    transfer_id: &str,
    raw_path: &str,
    chunk_size: usize,
    outbound: &mpsc::Sender<AgentMessage>,
) -> Result<()> {
    let path = expand_path(raw_path);
    // The error text travels to the server verbatim in the abort message.
    let mut file = File::open(&path)
        .await
        .map_err(|e| anyhow::anyhow!("File not found: {} ({e})", path.display()))?;
    let size = file.metadata().await?.len();

    info!(transfer_id, size, "streaming {}", path.display());

    let mut seq: u64 = 0;
    let mut sent: u64 = 0;
    loop {
        let mut buf = vec![0u8; chunk_size];
        let n = read_full(&mut file, &mut buf).await?;
        buf.truncate(n);
        sent += n as u64;
        seq += 1;

        // A short read means EOF; `sent >= size` covers the exact-multiple
        // case without an extra empty chunk.
        let is_last = n < chunk_size || sent >= size;

        outbound
            .send(AgentMessage::Chunk {
                transfer_id: transfer_id.to_string(),
                seq,
                data: buf,
                is_last,
            })
            .await
            .map_err(|_| UplinkError::Internal("connection closed".to_string()))?;

        if is_last {
            break;
        }
    }

    info!(transfer_id, chunks = seq, bytes = sent, "file sent");
    Ok(())
}

/// Read until the buffer is full or EOF.
async fn read_full(file: &mut File, buf: &mut [u8]) -> std::io::Result<usize> {
    let mut filled = 0;
    while filled < buf.len() {
        let n = file.read(&mut buf[filled..]).await?;
        if n == 0 {
            break;
        }
        filled += n;
    }
    Ok(filled)
}

/// Expand a leading `~` or `$HOME` the way operators write remote paths.
fn expand_path(raw: &str) -> PathBuf {
    for prefix in ["~", "$HOME"] {
        if let Some(rest) = raw.strip_prefix(prefix) {
            if rest.is_empty() || rest.starts_with('/') {
                if let Some(home) = dirs::home_dir() {
                    if rest.is_empty() {
                        return home;
                    }
                    return home.join(rest.trim_start_matches('/'));
                }
                warn!("cannot resolve home directory, using path as-is");
            }
        }
    }
    PathBuf::from(raw)
}
