use axum::{
    extract::{Path, State},
    http::StatusCode,
    Json,
};

use crate::api::{state::AppState, types::*};
use crate::error::UplinkError;

/// GET /health -- lightweight liveness probe
pub async fn health(State(state): State<AppState>) -> Json<HealthResponse> {
    Json(HealthResponse {
        status: "healthy".to_string(),
        connected_agents: state.registry.len(),
        active_transfers: state.orchestrator.active_transfers(),
        uptime_secs: state.uptime_seconds(),
    })
}

/// GET /api/clients -- list connected agents
pub async fn list_clients(State(state): State<AppState>) -> Json<ClientsResponse> {
    let mut clients: Vec<ClientInfo> = state
        .registry
        .list()
        .into_iter()
        .map(ClientInfo::from)
        .collect();
    clients.sort_by(|a, b| a.client_id.cmp(&b.client_id));

    Json(ClientsResponse { clients })
}

/// POST /api/download -- trigger a file pull from a connected agent
pub async fn trigger_download(
    State(state): State<AppState>,
    Json(req): Json<DownloadRequest>,
) -> std::result::Result<Json<DownloadAccepted>, (StatusCode, String)> {
    let client_id = req.client_id.trim();
    if client_id.is_empty() {
        return Err((StatusCode::BAD_REQUEST, "client_id is required".to_string()));
    }
    let file_path = req.file_path.trim();
    if file_path.is_empty() {
        return Err((StatusCode::BAD_REQUEST, "file_path is required".to_string()));
    }

    match state.orchestrator.create(client_id, file_path).await {
        Ok(snapshot) => Ok(Json(DownloadAccepted {
            download_id: snapshot.id,
            status: snapshot.status.as_str().to_string(),
        })),
        Err(e @ UplinkError::AgentNotConnected(_)) => Err((StatusCode::NOT_FOUND, e.to_string())),
        Err(e @ UplinkError::AgentBusy(_)) => Err((StatusCode::CONFLICT, e.to_string())),
        Err(e) => Err((StatusCode::INTERNAL_SERVER_ERROR, e.to_string())),
    }
}

/// GET /api/downloads/:id -- status of a specific transfer
pub async fn download_status(
    State(state): State<AppState>,
    Path(id): Path<String>,
) -> std::result::Result<Json<DownloadStatusResponse>, (StatusCode, String)> {
    state
        .orchestrator
        .status(&id)
        .map(|snapshot| Json(snapshot.into()))
        .ok_or_else(|| (StatusCode::NOT_FOUND, format!("Download not found: {id}")))
}
