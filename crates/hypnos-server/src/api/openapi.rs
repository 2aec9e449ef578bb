//! OpenAPI specification generation for the hypnos API.
//!
//! The specification is served at `/api/openapi.json`, rendered by Swagger UI
//! at `/swagger-ui`, and written to disk by the `gen-openapi` binary for
//! client generation.

use axum::Json;
use hypnos_core::{
    ConnectionState, DeviceStatus, HourMinuteTime, LinkStatus, PeripheralHandle, PeripheralId,
    PeripheralSnapshot, TimeException, TimetableConfig,
};
use utoipa::OpenApi;

use super::connection::ConnectRequest;
use super::error::ErrorResponse;
use super::health::HealthResponse;
use super::scan::{DevicesResponse, ScanResponse};
use super::timetable::{TimetableResponse, UpdateTimetableResponse};

/// Serve the OpenAPI specification as JSON.
///
/// This endpoint is available at `/api/openapi.json` and returns the complete
/// OpenAPI 3.0 specification for the hypnos API.
pub async fn get_openapi_spec() -> Json<utoipa::openapi::OpenApi> {
    Json(ApiDoc::openapi())
}

/// Returns the OpenAPI specification as a string (for writing to file).
/// Used by the gen-openapi binary.
///
/// # Errors
///
/// Returns an error if the document cannot be serialized.
pub fn get_openapi_json() -> Result<String, serde_json::Error> {
    ApiDoc::openapi().to_pretty_json()
}

/// Main OpenAPI document structure for hypnos.
#[derive(OpenApi)]
#[openapi(
    info(
        title = "hypnos API",
        version = "0.1.0",
        description = r#"
# hypnos API

Drives a Hypnos timetable peripheral over Bluetooth Low Energy.

## Overview

1. **Scan**: start discovery and pick the peripheral from `/api/devices`.
   Known peripherals (bonded and named like the filter, listed in the
   configuration, or the last one used) are connected automatically.
2. **Timetable**: store curfews, work/break durations, up to 4 exceptions
   and the token budget.
3. **Connect**: the daemon connects, sets the peripheral clock, writes the
   stored timetable and reads back exceptions and battery level.
4. **Sync**: push a changed timetable to a connected peripheral.

## Link states

`disconnected` → `connecting` → `discovering_services` → `syncing` → `ready`,
and `disconnecting` while a teardown is in flight. Only one link exists at a
time. A failure returns to `disconnected`; nothing is retried automatically.
"#,
        license(name = "MIT", url = "https://opensource.org/licenses/MIT")
    ),
    servers(
        (url = "/", description = "Local hypnos daemon")
    ),
    tags(
        (
            name = "system",
            description = "Health checks"
        ),
        (
            name = "scan",
            description = "Peripheral discovery"
        ),
        (
            name = "connection",
            description = "The single peripheral link"
        ),
        (
            name = "timetable",
            description = "Stored timetable and sync"
        ),
        (
            name = "status",
            description = "Persisted device status"
        )
    ),
    paths(
        // Health endpoints
        super::health::health_check,
        // Scan endpoints
        super::scan::start_scan,
        super::scan::stop_scan,
        super::scan::list_devices,
        // Connection endpoints
        super::connection::get_connection,
        super::connection::connect,
        super::connection::disconnect,
        // Timetable endpoints
        super::timetable::get_timetable,
        super::timetable::update_timetable,
        super::timetable::sync_timetable,
        // Status endpoints
        super::status::get_status,
    ),
    components(
        schemas(
            // Error types
            ErrorResponse,
            // Health types
            HealthResponse,
            // Scan types
            ScanResponse,
            DevicesResponse,
            PeripheralHandle,
            PeripheralId,
            // Connection types
            ConnectRequest,
            ConnectionState,
            LinkStatus,
            PeripheralSnapshot,
            // Timetable types
            TimetableConfig,
            HourMinuteTime,
            TimeException,
            TimetableResponse,
            UpdateTimetableResponse,
            // Status types
            DeviceStatus,
        )
    )
)]
pub struct ApiDoc;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_openapi_spec_generation() {
        let spec = ApiDoc::openapi();
        assert_eq!(spec.info.title, "hypnos API");
        assert!(spec.paths.paths.contains_key("/connection"));
        assert!(spec.paths.paths.contains_key("/timetable/sync"));
    }

    #[test]
    fn test_openapi_json_serialization() {
        let json = get_openapi_json().unwrap();
        assert!(json.contains("\"openapi\":"));
        assert!(json.contains("\"hypnos API\""));
    }
}
