use axum::{
    routing::{get, post},
    Router,
};
use tower_http::cors::{Any, CorsLayer};

use crate::api::{handlers, state::AppState, websocket::ws_handler};

pub fn create_router(state: AppState) -> Router {
    // CORS configuration
    let cors = CorsLayer::new()
        .allow_origin(Any)
        .allow_methods(Any)
        .allow_headers(Any);

    Router::new()
        // Control plane
        .route("/health", get(handlers::health))
        .route("/api/clients", get(handlers::list_clients))
        .route("/api/download", post(handlers::trigger_download))
        .route("/api/downloads/:id", get(handlers::download_status))
        // Data plane: agent uplink endpoint
        .route("/ws", get(ws_handler))
        // Add state and CORS
        .with_state(state)
        .layer(cors)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::TransferConfig;
    use crate::orchestrator::TransferOrchestrator;
    use crate::registry::ConnectionRegistry;
    use axum::body::Body;
    use axum::http::{Request, StatusCode};
    use std::sync::Arc;
    use tempfile::tempdir;
    use tower::ServiceExt;

    fn test_router() -> (Router, Arc<ConnectionRegistry>, tempfile::TempDir) {
        let dir = tempdir().unwrap();
        let (registry, registry_events) = ConnectionRegistry::new();
        let registry = Arc::new(registry);
        let orchestrator = TransferOrchestrator::new(
            Arc::clone(&registry),
            registry_events,
            TransferConfig::default(),
            dir.path().to_path_buf(),
        );
        let state = AppState::new(Arc::clone(&registry), orchestrator);
        (create_router(state), registry, dir)
    }

    async fn body_json(response: axum::response::Response) -> serde_json::Value {
        let bytes = axum::body::to_bytes(response.into_body(), usize::MAX)
            .await
            .unwrap();
        serde_json::from_slice(&bytes).unwrap()
    }

    #[tokio::test]
    async fn test_health_reports_counts() {
        let (router, registry, _dir) = test_router();
        let (tx, _rx) = tokio::sync::mpsc::channel(8);
        registry.register("restaurant-001", tx);

        let response = router
            .oneshot(Request::get("/health").body(Body::empty()).unwrap())
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::OK);

        let body = body_json(response).await;
        assert_eq!(body["status"], "healthy");
        assert_eq!(body["connected_agents"], 1);
        assert_eq!(body["active_transfers"], 0);
    }

    #[tokio::test]
    async fn test_download_for_unknown_client_is_404() {
        let (router, _registry, _dir) = test_router();

        let response = router
            .oneshot(
                Request::post("/api/download")
                    .header("content-type", "application/json")
                    .body(Body::from(
                        r#"{"client_id":"restaurant-999","file_path":"/data/export.csv"}"#,
                    ))
                    .unwrap(),
            )
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::NOT_FOUND);
    }

    #[tokio::test]
    async fn test_download_requires_client_id() {
        let (router, _registry, _dir) = test_router();

        let response = router
            .oneshot(
                Request::post("/api/download")
                    .header("content-type", "application/json")
                    .body(Body::from(r#"{"client_id":"  ","file_path":"/data/x"}"#))
                    .unwrap(),
            )
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::BAD_REQUEST);
    }

    #[tokio::test]
    async fn test_unknown_download_id_is_404() {
        let (router, _registry, _dir) = test_router();

        let response = router
            .oneshot(
                Request::get("/api/downloads/no-such-id")
                    .body(Body::empty())
                    .unwrap(),
            )
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::NOT_FOUND);
    }

    #[tokio::test]
    async fn test_trigger_then_status_round_trip() {
        let (router, registry, _dir) = test_router();
        let (tx, mut rx) = tokio::sync::mpsc::channel(8);
        registry.register("restaurant-001", tx);

        let response = router
            .clone()
            .oneshot(
                Request::post("/api/download")
                    .header("content-type", "application/json")
                    .body(Body::from(
                        r#"{"client_id":"restaurant-001","file_path":"/data/export.csv"}"#,
                    ))
                    .unwrap(),
            )
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::OK);
        let accepted = body_json(response).await;
        assert_eq!(accepted["status"], "dispatched");
        let id = accepted["download_id"].as_str().unwrap().to_string();

        // The request actually went down the agent's connection.
        assert!(rx.recv().await.is_some());

        let response = router
            .oneshot(
                Request::get(format!("/api/downloads/{id}"))
                    .body(Body::empty())
                    .unwrap(),
            )
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::OK);
        let status = body_json(response).await;
        assert_eq!(status["id"], id.as_str());
        assert_eq!(status["client_id"], "restaurant-001");
        assert_eq!(status["status"], "dispatched");
        assert_eq!(status["chunks_received"], 0);
    }
}
