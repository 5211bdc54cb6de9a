use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::registry::AgentInfo;
use crate::transfer::TransferSnapshot;

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct HealthResponse {
    pub status: String,
    pub connected_agents: usize,
    pub active_transfers: usize,
    pub uptime_secs: i64,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ClientInfo {
    pub client_id: String,
    pub connected: bool,
    pub connected_at: DateTime<Utc>,
    pub last_seen: DateTime<Utc>,
}

impl From<AgentInfo> for ClientInfo {
    fn from(info: AgentInfo) -> Self {
        Self {
            client_id: info.agent_id,
            connected: info.connected,
            connected_at: info.connected_at,
            last_seen: info.last_seen,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ClientsResponse {
    pub clients: Vec<ClientInfo>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DownloadRequest {
    pub client_id: String,
    pub file_path: String,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DownloadAccepted {
    pub download_id: String,
    pub status: String,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DownloadStatusResponse {
    pub id: String,
    pub client_id: String,
    pub remote_path: String,
    pub local_path: String,
    pub status: String,
    pub chunks_received: u64,
    pub bytes_received: u64,
    pub created_at: DateTime<Utc>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub completed_at: Option<DateTime<Utc>>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
}

impl From<TransferSnapshot> for DownloadStatusResponse {
    fn from(snapshot: TransferSnapshot) -> Self {
        Self {
            id: snapshot.id,
            client_id: snapshot.agent_id,
            remote_path: snapshot.remote_path,
            local_path: snapshot.local_path.display().to_string(),
            status: snapshot.status.as_str().to_string(),
            chunks_received: snapshot.chunks_received,
            bytes_received: snapshot.bytes_received,
            created_at: snapshot.created_at,
            completed_at: snapshot.completed_at,
            error: snapshot.error,
        }
    }
}
