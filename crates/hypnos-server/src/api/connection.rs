//! Connection API endpoints.
//!
//! Connect, disconnect and inspect the single peripheral link. Connecting
//! returns only once the first sync has drained (or failed), so a `200`
//! means the peripheral holds the stored timetable.

use axum::extract::{Query, State};
use axum::routing::get;
use axum::{Json, Router};
use hypnos_core::{LinkStatus, PeripheralId};
use serde::{Deserialize, Serialize};
use tracing::info;
use utoipa::{IntoParams, ToSchema};

use crate::api::error::{ApiResult, ErrorResponse};
use crate::state::SharedState;

/// Creates the connection router.
pub fn router() -> Router<SharedState> {
    Router::new().route(
        "/",
        get(get_connection).post(connect).delete(disconnect),
    )
}

// ============================================================================
// Request/Response Types
// ============================================================================

/// Request to connect to a peripheral.
#[derive(Debug, Clone, Serialize, Deserialize, ToSchema)]
#[schema(example = json!({ "address": "F1:E2:D3:C4:B5:A6" }))]
pub struct ConnectRequest {
    /// Bluetooth MAC address (XX:XX:XX:XX:XX:XX format).
    #[schema(example = "F1:E2:D3:C4:B5:A6")]
    pub address: String,
}

/// Options for tearing the link down.
#[derive(Debug, Clone, Default, Deserialize, IntoParams)]
#[into_params(parameter_in = Query)]
pub struct DisconnectQuery {
    /// Remove the bond before disconnecting. Failure to do so is only logged.
    #[serde(default)]
    pub unbond: bool,
}

// ============================================================================
// Handlers
// ============================================================================

/// Get the current link.
#[utoipa::path(
    get,
    path = "/connection",
    tag = "connection",
    operation_id = "getConnection",
    summary = "Get link state",
    description = "Returns the link state, the peripheral it belongs to, and the \
        values read back during the last sync.",
    responses(
        (status = 200, description = "Current link", body = LinkStatus)
    )
)]
pub async fn get_connection(State(state): State<SharedState>) -> ApiResult<Json<LinkStatus>> {
    let facade = state.read().await.facade.clone();
    Ok(Json(facade.link_status().await?))
}

/// Connect to a peripheral and sync it.
#[utoipa::path(
    post,
    path = "/connection",
    tag = "connection",
    operation_id = "connect",
    summary = "Connect to a peripheral",
    description = "Connects, resolves services and pushes the stored timetable. \
        Stops any running scan. Only one link exists at a time: the request is \
        rejected unless the link is disconnected. Failures are not retried.",
    request_body = ConnectRequest,
    responses(
        (status = 200, description = "Peripheral ready", body = LinkStatus),
        (status = 400, description = "Invalid address", body = ErrorResponse),
        (status = 409, description = "A link is already active", body = ErrorResponse),
        (status = 502, description = "Link failed or a write was rejected", body = ErrorResponse)
    )
)]
pub async fn connect(
    State(state): State<SharedState>,
    Json(request): Json<ConnectRequest>,
) -> ApiResult<Json<LinkStatus>> {
    let id = PeripheralId::parse(&request.address)?;
    let facade = state.read().await.facade.clone();

    info!(peripheral = %id, "Connect requested via API");
    facade.connect(id).await?;
    Ok(Json(facade.link_status().await?))
}

/// Tear the link down.
#[utoipa::path(
    delete,
    path = "/connection",
    tag = "connection",
    operation_id = "disconnect",
    summary = "Disconnect",
    description = "Closes the link from any state, optionally removing the bond \
        first. Succeeds when there is no link.",
    params(DisconnectQuery),
    responses(
        (status = 200, description = "Disconnected", body = LinkStatus)
    )
)]
pub async fn disconnect(
    State(state): State<SharedState>,
    Query(query): Query<DisconnectQuery>,
) -> ApiResult<Json<LinkStatus>> {
    let facade = state.read().await.facade.clone();
    facade.disconnect(query.unbond).await?;
    Ok(Json(facade.link_status().await?))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_connect_request_deserialization() {
        let request: ConnectRequest =
            serde_json::from_str(r#"{"address": "f1:e2:d3:c4:b5:a6"}"#).unwrap();
        assert_eq!(request.address, "f1:e2:d3:c4:b5:a6");
    }

    #[test]
    fn test_unbond_defaults_to_false() {
        let query: DisconnectQuery = serde_json::from_str("{}").unwrap();
        assert!(!query.unbond);
    }
}
