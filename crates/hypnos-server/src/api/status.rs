//! Device status API endpoint.
//!
//! Reports the persisted status fields. Values never written read as their
//! sentinels: `-1` for numbers and `"None"` for the sync time.

use axum::extract::State;
use axum::Json;
use hypnos_core::DeviceStatus;

use crate::api::error::{ApiResult, ErrorResponse};
use crate::state::SharedState;

/// Get the persisted device status.
#[utoipa::path(
    get,
    path = "/status",
    tag = "status",
    operation_id = "getStatus",
    summary = "Get device status",
    description = "Returns phase, time left, battery, last sync time (local HH:MM) \
        and the last peripheral that completed a sync.",
    responses(
        (status = 200, description = "Persisted status", body = DeviceStatus),
        (status = 500, description = "Store unreadable", body = ErrorResponse)
    )
)]
pub async fn get_status(State(state): State<SharedState>) -> ApiResult<Json<DeviceStatus>> {
    let store = state.read().await.store.clone();
    Ok(Json(store.status()?))
}
