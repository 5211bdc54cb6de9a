//! Wire contract carried over each agent's persistent connection.
//!
//! Both control messages (transfer requests) and data messages (chunks)
//! travel as tagged JSON text frames, so a single socket can interleave
//! messages for any number of concurrent transfers. Every transfer-scoped
//! message carries its `transfer_id`; the server demultiplexes on it.

use serde::{Deserialize, Serialize};

/// Hard cap on a single WebSocket frame. A 1 MiB chunk grows by ~4/3 when
/// base64-encoded plus JSON envelope overhead, so 16 MiB leaves headroom for
/// operators who raise the chunk size.
pub const MAX_FRAME_BYTES: usize = 16 * 1024 * 1024;

/// Default chunk payload size (1 MiB).
pub const DEFAULT_CHUNK_SIZE: usize = 1024 * 1024;

/// Messages sent agent -> server.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum AgentMessage {
    /// Connection handshake. Must be the first frame on a fresh socket;
    /// anything else gets the connection dropped.
    Register { agent_id: String },

    /// One ordered unit of transfer payload. `seq` is 1-based and strictly
    /// increasing per transfer; `is_last` marks end-of-stream (there is no
    /// separate completion message).
    Chunk {
        transfer_id: String,
        seq: u64,
        #[serde(with = "base64_bytes")]
        data: Vec<u8>,
        is_last: bool,
    },

    /// The agent cannot complete the read. Fails the transfer immediately
    /// with the given message as its error.
    Abort { transfer_id: String, message: String },
}

/// Messages sent server -> agent.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum ServerMessage {
    /// Handshake ack.
    Registered { message: String },

    /// Ask the agent to stream back the file at `path`. The path is opaque
    /// to the server; the agent interprets it.
    TransferRequest { transfer_id: String, path: String },
}

/// Number of chunks a well-behaved sender produces for `size` payload bytes.
/// An empty file is sent as a single empty final chunk, since end-of-stream
/// rides on a chunk.
pub fn expected_chunks(size: u64, chunk_size: u64) -> u64 {
    if size == 0 {
        1
    } else {
        size.div_ceil(chunk_size)
    }
}

/// Chunk payloads are raw bytes; JSON text frames require base64.
mod base64_bytes {
    use base64::{engine::general_purpose::STANDARD as BASE64, Engine};
    use serde::{Deserialize, Deserializer, Serializer};

    pub fn serialize<S: Serializer>(bytes: &[u8], ser: S) -> Result<S::Ok, S::Error> {
        ser.serialize_str(&BASE64.encode(bytes))
    }

    pub fn deserialize<'de, D: Deserializer<'de>>(de: D) -> Result<Vec<u8>, D::Error> {
        let encoded = String::deserialize(de)?;
        BASE64
            .decode(encoded.as_bytes())
            .map_err(serde::de::Error::custom)
    }
}
