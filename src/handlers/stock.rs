use axum::{
    extract::{Json, Query, State},
    response::IntoResponse,
    routing::{get, put},
    Router,
};
use serde::{Deserialize, Serialize};
use utoipa::{IntoParams, ToSchema};
use uuid::Uuid;
use validator::Validate;

use crate::errors::ApiError;
use crate::handlers::common::{map_service_error, success_response, validate_input};
use crate::AppState;

/// Creates the router for stock endpoints
pub fn stock_routes() -> Router<AppState> {
    Router::new()
        .route("/availability", get(get_availability))
        .route("/levels", put(set_level))
}

#[derive(Debug, Deserialize, IntoParams)]
pub struct AvailabilityQuery {
    pub item_id: Uuid,
    /// Defaults to the configured warehouse when omitted
    pub location_id: Option<Uuid>,
}

#[derive(Debug, Serialize, ToSchema)]
pub struct AvailabilityResponse {
    pub item_id: Uuid,
    pub location_id: Uuid,
    pub available: i32,
}

/// Quantity still reservable for an item at a location
#[utoipa::path(
    get,
    path = "/api/v1/stock/availability",
    params(AvailabilityQuery),
    responses(
        (status = 200, description = "Available quantity", body = AvailabilityResponse)
    ),
    tag = "Stock"
)]
pub async fn get_availability(
    State(state): State<AppState>,
    Query(query): Query<AvailabilityQuery>,
) -> Result<impl IntoResponse, ApiError> {
    let location_id = query
        .location_id
        .unwrap_or(state.config.default_location_id);

    let available = state
        .services
        .stock_ledger
        .available_quantity(query.item_id, location_id)
        .await
        .map_err(map_service_error)?;

    Ok(success_response(AvailabilityResponse {
        item_id: query.item_id,
        location_id,
        available,
    }))
}

#[derive(Debug, Deserialize, Validate, ToSchema)]
pub struct SetLevelRequest {
    pub item_id: Uuid,
    pub location_id: Option<Uuid>,
    #[validate(range(min = 0))]
    pub quantity_on_hand: i32,
}

/// Set the on-hand stock level for an item at a location
#[utoipa::path(
    put,
    path = "/api/v1/stock/levels",
    request_body = SetLevelRequest,
    responses(
        (status = 200, description = "Stock level updated"),
        (status = 400, description = "Level below current reservations", body = crate::errors::ErrorResponse)
    ),
    tag = "Stock"
)]
pub async fn set_level(
    State(state): State<AppState>,
    Json(payload): Json<SetLevelRequest>,
) -> Result<impl IntoResponse, ApiError> {
    validate_input(&payload)?;

    let location_id = payload
        .location_id
        .unwrap_or(state.config.default_location_id);

    let record = state
        .services
        .stock_ledger
        .set_level(payload.item_id, location_id, payload.quantity_on_hand)
        .await
        .map_err(map_service_error)?;

    Ok(success_response(record))
}
