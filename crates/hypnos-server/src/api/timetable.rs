//! Timetable API endpoints.
//!
//! Reading and storing the timetable, and pushing it to a ready peripheral.
//! Storing never talks to the peripheral; the new values go out on the next
//! sync (a fresh connect or an explicit `POST /timetable/sync`).

use axum::extract::State;
use axum::routing::{get, post};
use axum::{Json, Router};
use hypnos_core::{LinkStatus, TimetableConfig};
use serde::{Deserialize, Serialize};
use tracing::info;
use utoipa::ToSchema;

use crate::api::error::{ApiResult, ErrorResponse};
use crate::state::SharedState;

/// Creates the timetable router.
pub fn router() -> Router<SharedState> {
    Router::new()
        .route("/", get(get_timetable).put(update_timetable))
        .route("/sync", post(sync_timetable))
}

// ============================================================================
// Request/Response Types
// ============================================================================

/// The stored timetable, if any.
#[derive(Debug, Clone, Serialize, Deserialize, ToSchema)]
pub struct TimetableResponse {
    /// Stored configuration; `null` until one is saved.
    pub timetable: Option<TimetableConfig>,
}

/// Response after storing a timetable.
#[derive(Debug, Clone, Serialize, Deserialize, ToSchema)]
pub struct UpdateTimetableResponse {
    /// Whether the timetable was stored.
    pub success: bool,

    /// The stored configuration.
    pub timetable: TimetableConfig,

    /// When the change reaches the peripheral.
    pub message: String,
}

// ============================================================================
// Handlers
// ============================================================================

/// Get the stored timetable.
#[utoipa::path(
    get,
    path = "/timetable",
    tag = "timetable",
    operation_id = "getTimetable",
    summary = "Get stored timetable",
    description = "Returns the timetable that is pushed to the peripheral on sync.",
    responses(
        (status = 200, description = "Stored timetable", body = TimetableResponse),
        (status = 500, description = "Store unreadable", body = ErrorResponse)
    )
)]
pub async fn get_timetable(State(state): State<SharedState>) -> ApiResult<Json<TimetableResponse>> {
    let store = state.read().await.store.clone();
    Ok(Json(TimetableResponse {
        timetable: store.timetable_config()?,
    }))
}

/// Store a new timetable.
#[utoipa::path(
    put,
    path = "/timetable",
    tag = "timetable",
    operation_id = "updateTimetable",
    summary = "Store timetable",
    description = "Validates and stores the timetable. At most 4 exceptions are \
        allowed. The peripheral is not contacted; sync to push it.",
    request_body = TimetableConfig,
    responses(
        (status = 200, description = "Timetable stored", body = UpdateTimetableResponse),
        (status = 400, description = "Invalid timetable", body = ErrorResponse)
    )
)]
pub async fn update_timetable(
    State(state): State<SharedState>,
    Json(timetable): Json<TimetableConfig>,
) -> ApiResult<Json<UpdateTimetableResponse>> {
    let facade = state.read().await.facade.clone();
    facade.configure_timetable(timetable.clone()).await?;

    let message = if facade.state() == hypnos_core::ConnectionState::Ready {
        "Stored. Sync to push it to the connected peripheral."
    } else {
        "Stored. It is pushed on the next connect."
    };
    info!(exceptions = timetable.active_exceptions.len(), "Timetable updated via API");

    Ok(Json(UpdateTimetableResponse {
        success: true,
        timetable,
        message: message.to_string(),
    }))
}

/// Push the stored timetable again.
#[utoipa::path(
    post,
    path = "/timetable/sync",
    tag = "timetable",
    operation_id = "syncTimetable",
    summary = "Sync the peripheral",
    description = "Writes the clock and the stored timetable to the ready \
        peripheral, then reads back exceptions and battery. Only allowed while \
        the link is ready.",
    responses(
        (status = 200, description = "Sync drained", body = LinkStatus),
        (status = 409, description = "Link not ready", body = ErrorResponse),
        (status = 502, description = "A write was rejected or the link failed", body = ErrorResponse)
    )
)]
pub async fn sync_timetable(State(state): State<SharedState>) -> ApiResult<Json<LinkStatus>> {
    let facade = state.read().await.facade.clone();
    facade.sync_timetable().await?;
    Ok(Json(facade.link_status().await?))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_timetable_request_deserialization() {
        let timetable: TimetableConfig = serde_json::from_str(
            r#"{
                "morning_curfew": {"hour": 7, "minute": 0},
                "night_curfew": {"hour": 22, "minute": 30},
                "work_duration_minutes": 50,
                "break_duration_minutes": 10,
                "tokens_left": 3
            }"#,
        )
        .unwrap();
        assert!(timetable.active_exceptions.is_empty());
        assert_eq!(timetable.tokens_left, 3);
    }

    #[test]
    fn test_empty_timetable_response() {
        let json = serde_json::to_string(&TimetableResponse { timetable: None }).unwrap();
        assert_eq!(json, r#"{"timetable":null}"#);
    }
}
