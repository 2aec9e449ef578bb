//! HTTP API routes and handlers.
//!
//! This module contains all HTTP endpoint implementations organized by domain:
//! - `health` - Service health checks
//! - `scan` - Peripheral discovery
//! - `connection` - The peripheral link
//! - `timetable` - Stored timetable and sync
//! - `status` - Persisted device status
//! - `error` - API error types
//! - `openapi` - OpenAPI specification generation

use axum::routing::get;
use axum::Router;
use utoipa::OpenApi;
use utoipa_swagger_ui::SwaggerUi;

use crate::state::SharedState;

pub mod connection;
pub mod error;
pub mod health;
pub mod openapi;
pub mod scan;
pub mod status;
pub mod timetable;

// Re-export commonly used types
pub use error::{ApiError, ApiResult, ErrorResponse};

// Re-export OpenAPI utilities for the gen-openapi binary
pub use openapi::get_openapi_json;

/// Creates the combined API router with all endpoints.
///
/// # Route Structure
///
/// ```text
/// /health                - Health check
/// /api
/// ├── /scan/start        - Start discovery
/// ├── /scan/stop         - Stop discovery
/// ├── /devices           - Discovery results
/// ├── /connection        - Link state, connect, disconnect
/// ├── /timetable         - Stored timetable
/// ├── /timetable/sync    - Push to the ready peripheral
/// ├── /status            - Persisted device status
/// └── /openapi.json      - OpenAPI specification
/// /swagger-ui            - Interactive documentation
/// ```
pub fn create_router(state: SharedState) -> Router {
    Router::new()
        .nest("/health", health::router())
        .nest(
            "/api",
            Router::new()
                .nest("/scan", scan::router())
                .route("/devices", get(scan::list_devices))
                .nest("/connection", connection::router())
                .nest("/timetable", timetable::router())
                .route("/status", get(status::get_status))
                .route("/openapi.json", get(openapi::get_openapi_spec)),
        )
        .merge(
            SwaggerUi::new("/swagger-ui")
                .url("/api-docs/openapi.json", openapi::ApiDoc::openapi()),
        )
        .with_state(state)
}

#[cfg(test)]
mod tests {
    use std::path::PathBuf;
    use std::sync::Arc;

    use axum::http::StatusCode;
    use axum_test::TestServer;
    use hypnos_core::{
        Config, ConnectionState, DeviceStatus, EngineOptions, JsonFileStore, LinkStatus,
        MockPeripheral, MockPlatform, PeripheralId, ProtocolFacade, StatusStore,
    };
    use serde_json::json;
    use tempfile::TempDir;
    use tokio_test::assert_ok;

    use super::*;
    use crate::state::AppState;

    const ADDRESS: &str = "F1:E2:D3:C4:B5:A6";

    fn timetable_json() -> serde_json::Value {
        json!({
            "morning_curfew": {"hour": 7, "minute": 0},
            "night_curfew": {"hour": 22, "minute": 30},
            "work_duration_minutes": 50,
            "break_duration_minutes": 10,
            "active_exceptions": [
                {"start": "2025-01-15T20:00:00Z", "end": "2025-01-15T23:30:00Z"}
            ],
            "tokens_left": 3
        })
    }

    fn server_with(store: StatusStore) -> (TestServer, Arc<MockPlatform>) {
        let mock = Arc::new(MockPlatform::new());
        mock.add_peripheral(
            PeripheralId::parse(ADDRESS).unwrap(),
            MockPeripheral::hypnos("Hypnos"),
        );
        let config = Config::default();
        let facade = ProtocolFacade::spawn_shared(
            Arc::clone(&mock),
            store.clone(),
            EngineOptions::from_config(&config),
        );
        let state = AppState::new(facade, store, config, PathBuf::from("config.toml")).shared();
        (assert_ok!(TestServer::new(create_router(state))), mock)
    }

    fn server() -> (TestServer, Arc<MockPlatform>) {
        server_with(StatusStore::in_memory())
    }

    #[tokio::test]
    async fn test_health_reports_connection_state() {
        let (server, _) = server();
        let response = server.get("/health").await;
        response.assert_status_ok();
        let body: health::HealthResponse = response.json();
        assert_eq!(body.status, "ok");
        assert_eq!(body.connection_state, ConnectionState::Disconnected);
    }

    #[tokio::test]
    async fn test_scan_lists_devices() {
        let (server, _) = server();
        server.post("/api/scan/start").await.assert_status_ok();

        let mut devices = Vec::new();
        for _ in 0..50 {
            let body: scan::DevicesResponse = server.get("/api/devices").await.json();
            devices = body.devices;
            if !devices.is_empty() {
                break;
            }
            tokio::time::sleep(std::time::Duration::from_millis(10)).await;
        }
        assert_eq!(devices.len(), 1);
        assert_eq!(devices[0].id.as_str(), ADDRESS);

        let body: scan::ScanResponse = server.post("/api/scan/stop").await.json();
        assert!(!body.scanning);
        let body: scan::DevicesResponse = server.get("/api/devices").await.json();
        assert!(body.devices.is_empty());
    }

    #[tokio::test]
    async fn test_connect_pushes_stored_timetable() {
        let (server, _) = server();
        server
            .put("/api/timetable")
            .json(&timetable_json())
            .await
            .assert_status_ok();

        let response = server
            .post("/api/connection")
            .json(&json!({ "address": ADDRESS.to_lowercase() }))
            .await;
        response.assert_status_ok();
        let link: LinkStatus = response.json();
        assert_eq!(link.state, ConnectionState::Ready);
        assert_eq!(link.peripheral.unwrap().as_str(), ADDRESS);
        assert_eq!(link.snapshot.active_exceptions.map(|e| e.len()), Some(1));

        let status: DeviceStatus = server.get("/api/status").await.json();
        assert_eq!(status.battery, 100);
        assert_ne!(status.sync_time, "None");

        server.post("/api/timetable/sync").await.assert_status_ok();

        let response = server
            .post("/api/connection")
            .json(&json!({ "address": ADDRESS }))
            .await;
        response.assert_status(StatusCode::CONFLICT);
        let error: ErrorResponse = response.json();
        assert_eq!(error.error, "already_active");
        assert_eq!(error.details, Some(json!({ "state": "ready" })));

        let link: LinkStatus = server
            .delete("/api/connection")
            .add_query_param("unbond", true)
            .await
            .json();
        assert_eq!(link.state, ConnectionState::Disconnected);
        assert_eq!(link.peripheral, None);
    }

    #[tokio::test]
    async fn test_invalid_address_is_bad_request() {
        let (server, mock) = server();
        let response = server
            .post("/api/connection")
            .json(&json!({ "address": "not-a-mac" }))
            .await;
        response.assert_status(StatusCode::BAD_REQUEST);
        let error: ErrorResponse = response.json();
        assert_eq!(error.error, "invalid_address");
        assert!(mock.calls().is_empty());
    }

    #[tokio::test]
    async fn test_rejected_write_is_bad_gateway() {
        let (server, mock) = server();
        mock.fail_writes_to(hypnos_core::Characteristic::NightCurfew);
        server
            .put("/api/timetable")
            .json(&timetable_json())
            .await
            .assert_status_ok();

        let response = server
            .post("/api/connection")
            .json(&json!({ "address": ADDRESS }))
            .await;
        response.assert_status(StatusCode::BAD_GATEWAY);
        let error: ErrorResponse = response.json();
        assert_eq!(error.error, "write_rejected");

        let link: LinkStatus = server.get("/api/connection").await.json();
        assert_eq!(link.state, ConnectionState::Disconnected);
    }

    #[tokio::test]
    async fn test_sync_requires_ready_link() {
        let (server, _) = server();
        let response = server.post("/api/timetable/sync").await;
        response.assert_status(StatusCode::CONFLICT);
        let error: ErrorResponse = response.json();
        assert_eq!(error.error, "not_ready");
    }

    #[tokio::test]
    async fn test_too_many_exceptions_rejected() {
        let (server, _) = server();
        let mut timetable = timetable_json();
        timetable["active_exceptions"] = json!([
            {"start": "2025-01-15T20:00:00Z", "end": "2025-01-15T21:00:00Z"},
            {"start": "2025-01-16T20:00:00Z", "end": "2025-01-16T21:00:00Z"},
            {"start": "2025-01-17T20:00:00Z", "end": "2025-01-17T21:00:00Z"},
            {"start": "2025-01-18T20:00:00Z", "end": "2025-01-18T21:00:00Z"},
            {"start": "2025-01-19T20:00:00Z", "end": "2025-01-19T21:00:00Z"}
        ]);

        let response = server.put("/api/timetable").json(&timetable).await;
        response.assert_status(StatusCode::BAD_REQUEST);

        let body: timetable::TimetableResponse = server.get("/api/timetable").await.json();
        assert!(body.timetable.is_none());
    }

    #[tokio::test]
    async fn test_status_sentinels_and_file_store() {
        let dir = TempDir::new().unwrap();
        let store = StatusStore::new(JsonFileStore::open(dir.path()).unwrap());
        let (server, _) = server_with(store);

        let status: DeviceStatus = server.get("/api/status").await.json();
        assert_eq!(status, DeviceStatus::default());

        server
            .put("/api/timetable")
            .json(&timetable_json())
            .await
            .assert_status_ok();
        assert!(dir.path().join("status.json").exists());
    }

    #[tokio::test]
    async fn test_openapi_served() {
        let (server, _) = server();
        let spec: serde_json::Value = server.get("/api/openapi.json").await.json();
        assert_eq!(spec["info"]["title"], "hypnos API");
    }
}
