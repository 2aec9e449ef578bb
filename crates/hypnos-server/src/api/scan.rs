//! Discovery API endpoints.
//!
//! Starting and stopping the scan, and listing what it found. The result
//! set is maintained by the engine: deduplicated by address and emptied
//! periodically so peripherals that went out of range drop off.

use axum::extract::State;
use axum::routing::post;
use axum::{Json, Router};
use chrono::{DateTime, Utc};
use hypnos_core::PeripheralHandle;
use serde::{Deserialize, Serialize};
use tracing::info;
use utoipa::ToSchema;

use crate::api::error::{ApiResult, ErrorResponse};
use crate::state::SharedState;

/// Creates the scan router. `/devices` is routed directly in `api.rs`.
pub fn router() -> Router<SharedState> {
    Router::new()
        .route("/start", post(start_scan))
        .route("/stop", post(stop_scan))
}

// ============================================================================
// Request/Response Types
// ============================================================================

/// Scan state after a start or stop request.
#[derive(Debug, Clone, Serialize, Deserialize, ToSchema)]
#[schema(example = json!({ "scanning": true }))]
pub struct ScanResponse {
    /// Whether discovery is running.
    #[schema(example = true)]
    pub scanning: bool,
}

/// Current discovery results.
#[derive(Debug, Clone, Serialize, Deserialize, ToSchema)]
#[schema(example = json!({
    "devices": [
        {
            "id": "F1:E2:D3:C4:B5:A6",
            "name": "Hypnos",
            "rssi_dbm": -58,
            "last_seen_utc": "2025-01-15T21:04:11Z"
        }
    ],
    "listed_at_utc": "2025-01-15T21:04:12Z"
}))]
pub struct DevicesResponse {
    /// One entry per peripheral, latest report wins.
    pub devices: Vec<PeripheralHandle>,

    /// When the list was taken.
    pub listed_at_utc: DateTime<Utc>,
}

// ============================================================================
// Handlers
// ============================================================================

/// Start discovering peripherals.
#[utoipa::path(
    post,
    path = "/scan/start",
    tag = "scan",
    operation_id = "startScan",
    summary = "Start scanning",
    description = "Starts Bluetooth discovery. Returns once the adapter confirms. \
        Calling it while already scanning is a no-op. A known peripheral that \
        shows up is connected automatically, which stops the scan.",
    responses(
        (status = 200, description = "Scanning", body = ScanResponse),
        (status = 503, description = "Discovery could not start", body = ErrorResponse)
    )
)]
pub async fn start_scan(State(state): State<SharedState>) -> ApiResult<Json<ScanResponse>> {
    let facade = state.read().await.facade.clone();
    facade.start_scan().await?;
    info!("Scan started via API");
    Ok(Json(ScanResponse { scanning: true }))
}

/// Stop discovering peripherals.
#[utoipa::path(
    post,
    path = "/scan/stop",
    tag = "scan",
    operation_id = "stopScan",
    summary = "Stop scanning",
    description = "Stops Bluetooth discovery and clears the result set. Idempotent.",
    responses(
        (status = 200, description = "Not scanning", body = ScanResponse)
    )
)]
pub async fn stop_scan(State(state): State<SharedState>) -> ApiResult<Json<ScanResponse>> {
    let facade = state.read().await.facade.clone();
    facade.stop_scan().await?;
    Ok(Json(ScanResponse { scanning: false }))
}

/// List discovered peripherals.
#[utoipa::path(
    get,
    path = "/devices",
    tag = "scan",
    operation_id = "listDevices",
    summary = "List discovered peripherals",
    description = "Returns the current deduplicated result set, ordered by address. \
        Empty when not scanning.",
    responses(
        (status = 200, description = "Current results", body = DevicesResponse)
    )
)]
pub async fn list_devices(State(state): State<SharedState>) -> ApiResult<Json<DevicesResponse>> {
    let facade = state.read().await.facade.clone();
    let devices = facade.devices().await?;
    Ok(Json(DevicesResponse {
        devices,
        listed_at_utc: Utc::now(),
    }))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_scan_response_serialization() {
        let json = serde_json::to_string(&ScanResponse { scanning: true }).unwrap();
        assert_eq!(json, r#"{"scanning":true}"#);
    }
}
