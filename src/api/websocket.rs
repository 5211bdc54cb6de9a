//! Agent uplink endpoint: the data plane.
//!
//! Each agent holds one persistent WebSocket here. The first frame must be a
//! `register` message; after that the connection gets a dedicated reader
//! loop, so a stalled agent never blocks processing for other agents. Frames
//! are demultiplexed by transfer id before any blocking work.

use axum::{
    extract::{
        ws::{Message, WebSocket, WebSocketUpgrade},
        State,
    },
    response::IntoResponse,
};
use futures_util::{sink::SinkExt, stream::StreamExt};
use std::time::Duration;
use tokio::sync::mpsc;
use tracing::{debug, info, warn};

use crate::api::state::AppState;
use crate::protocol::{AgentMessage, ServerMessage, MAX_FRAME_BYTES};

/// How long a fresh socket gets to identify itself before being dropped.
const HANDSHAKE_TIMEOUT: Duration = Duration::from_secs(10);

/// Outbound queue per agent connection.
const OUTBOUND_QUEUE: usize = 32;

/// WebSocket handler for agent connections.
pub async fn ws_handler(ws: WebSocketUpgrade, State(state): State<AppState>) -> impl IntoResponse {
    ws.max_message_size(MAX_FRAME_BYTES)
        .on_upgrade(|socket| handle_socket(socket, state))
}

async fn handle_socket(mut socket: WebSocket, state: AppState) {
    // The connection is anonymous until it registers.
    let agent_id = match tokio::time::timeout(HANDSHAKE_TIMEOUT, socket.recv()).await {
        Ok(Some(Ok(Message::Text(text)))) => match serde_json::from_str::<AgentMessage>(&text) {
            Ok(AgentMessage::Register { agent_id }) if !agent_id.trim().is_empty() => {
                agent_id.trim().to_string()
            }
            Ok(_) => {
                warn!("connection sent a non-register frame first, dropping");
                return;
            }
            Err(e) => {
                warn!("malformed handshake frame, dropping: {e}");
                return;
            }
        },
        Ok(_) => {
            debug!("connection closed before registering");
            return;
        }
        Err(_) => {
            warn!("handshake timeout, dropping connection");
            return;
        }
    };

    let (outbound_tx, mut outbound_rx) = mpsc::channel::<ServerMessage>(OUTBOUND_QUEUE);
    // Keep only the generation: the registry entry must hold the one
    // long-lived sender, so replacement actually closes this connection.
    let generation = state.registry.register(&agent_id, outbound_tx).generation;
    info!(agent_id, "agent registered");

    let (mut sink, mut stream) = socket.split();

    // Handshake ack (original protocol behavior; agents log it).
    let ack = ServerMessage::Registered {
        message: format!("registered as {agent_id}"),
    };
    match serde_json::to_string(&ack) {
        Ok(json) => {
            if sink.send(Message::Text(json)).await.is_err() {
                state.registry.deregister(&agent_id, generation);
                return;
            }
        }
        Err(e) => {
            warn!(agent_id, "failed to serialize ack: {e}");
        }
    }

    loop {
        tokio::select! {
            outbound = outbound_rx.recv() => {
                match outbound {
                    Some(msg) => {
                        let json = match serde_json::to_string(&msg) {
                            Ok(json) => json,
                            Err(e) => {
                                warn!(agent_id, "failed to serialize outbound message: {e}");
                                continue;
                            }
                        };
                        if sink.send(Message::Text(json)).await.is_err() {
                            break;
                        }
                    }
                    // The registry dropped our sender: this connection was
                    // replaced by a newer one for the same agent id.
                    None => {
                        debug!(agent_id, "connection superseded, closing");
                        let _ = sink.send(Message::Close(None)).await;
                        break;
                    }
                }
            }
            inbound = stream.next() => {
                match inbound {
                    Some(Ok(Message::Text(text))) => {
                        state.registry.touch(&agent_id);
                        handle_frame(&state, &agent_id, &text).await;
                    }
                    Some(Ok(Message::Close(_))) | None => break,
                    Some(Ok(_)) => {
                        // Ping/pong handled by axum; binary frames are not
                        // part of the protocol.
                    }
                    Some(Err(e)) => {
                        warn!(agent_id, "websocket error: {e}");
                        break;
                    }
                }
            }
        }
    }

    // Generation-checked: if we were replaced, the successor stays put and
    // the orchestrator was already told via the Replaced event.
    if state.registry.deregister(&agent_id, generation) {
        info!(agent_id, "agent disconnected");
    }
}

/// Demultiplex one inbound frame into the orchestrator.
async fn handle_frame(state: &AppState, agent_id: &str, text: &str) {
    match serde_json::from_str::<AgentMessage>(text) {
        Ok(AgentMessage::Chunk {
            transfer_id,
            seq,
            data,
            is_last,
        }) => {
            state
                .orchestrator
                .on_chunk(agent_id, &transfer_id, seq, data, is_last)
                .await;
        }
        Ok(AgentMessage::Abort {
            transfer_id,
            message,
        }) => {
            state.orchestrator.on_abort(agent_id, &transfer_id, message);
        }
        Ok(AgentMessage::Register { .. }) => {
            warn!(agent_id, "duplicate register frame ignored");
        }
        Err(e) => {
            // Unattributable to any transfer; log and drop.
            debug!(agent_id, "unrecognized frame: {e}");
        }
    }
}
