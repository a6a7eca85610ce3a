use axum::{
    extract::{Json, Query, State},
    response::IntoResponse,
    routing::{get, post},
    Router,
};
use serde::{Deserialize, Serialize};
use utoipa::{IntoParams, ToSchema};
use uuid::Uuid;
use validator::Validate;

use crate::errors::ApiError;
use crate::handlers::common::{
    created_response, map_service_error, no_content_response, success_response, validate_input,
};
use crate::services::carts::CartSnapshot;
use crate::AppState;

/// Creates the router for cart endpoints
pub fn cart_routes() -> Router<AppState> {
    Router::new()
        .route("/", get(get_cart))
        .route("/items", post(add_item).delete(remove_item))
}

#[derive(Debug, Deserialize, IntoParams)]
pub struct CartQuery {
    pub user_id: Uuid,
}

#[derive(Debug, Serialize, ToSchema)]
pub struct CartLineResponse {
    pub item_id: Uuid,
    pub quantity: i32,
    pub title: Option<String>,
    #[schema(value_type = Option<String>)]
    pub unit_price: Option<rust_decimal::Decimal>,
    #[schema(value_type = String)]
    pub line_total: rust_decimal::Decimal,
}

#[derive(Debug, Serialize, ToSchema)]
pub struct CartResponse {
    pub user_id: Uuid,
    pub cart_id: Option<Uuid>,
    pub lines: Vec<CartLineResponse>,
    #[schema(value_type = String)]
    pub subtotal: rust_decimal::Decimal,
}

impl From<CartSnapshot> for CartResponse {
    fn from(snapshot: CartSnapshot) -> Self {
        let subtotal = snapshot.subtotal();
        Self {
            user_id: snapshot.user_id,
            cart_id: snapshot.cart_id,
            lines: snapshot
                .lines
                .into_iter()
                .map(|l| {
                    let line_total = l.line_total();
                    CartLineResponse {
                        item_id: l.item_id,
                        quantity: l.quantity,
                        title: l.product.as_ref().map(|p| p.title.clone()),
                        unit_price: l.product.as_ref().map(|p| p.price),
                        line_total,
                    }
                })
                .collect(),
            subtotal,
        }
    }
}

/// Get the user's active cart
#[utoipa::path(
    get,
    path = "/api/v1/carts",
    params(CartQuery),
    responses(
        (status = 200, description = "Cart snapshot", body = CartResponse)
    ),
    tag = "Carts"
)]
pub async fn get_cart(
    State(state): State<AppState>,
    Query(query): Query<CartQuery>,
) -> Result<impl IntoResponse, ApiError> {
    let snapshot = state
        .services
        .carts
        .snapshot(query.user_id)
        .await
        .map_err(map_service_error)?;

    Ok(success_response(CartResponse::from(snapshot)))
}

#[derive(Debug, Deserialize, Validate, ToSchema)]
pub struct AddItemRequest {
    pub user_id: Uuid,
    pub item_id: Uuid,
    #[validate(range(min = 1))]
    pub quantity: i32,
}

/// Add an item to the user's active cart
#[utoipa::path(
    post,
    path = "/api/v1/carts/items",
    request_body = AddItemRequest,
    responses(
        (status = 201, description = "Item added"),
        (status = 404, description = "Item not found", body = crate::errors::ErrorResponse)
    ),
    tag = "Carts"
)]
pub async fn add_item(
    State(state): State<AppState>,
    Json(payload): Json<AddItemRequest>,
) -> Result<impl IntoResponse, ApiError> {
    validate_input(&payload)?;

    let item = state
        .services
        .carts
        .add_item(payload.user_id, payload.item_id, payload.quantity)
        .await
        .map_err(map_service_error)?;

    Ok(created_response(item))
}

#[derive(Debug, Deserialize, IntoParams)]
pub struct RemoveItemQuery {
    pub user_id: Uuid,
    pub item_id: Uuid,
}

/// Remove an item from the user's active cart
#[utoipa::path(
    delete,
    path = "/api/v1/carts/items",
    params(RemoveItemQuery),
    responses(
        (status = 204, description = "Item removed"),
        (status = 404, description = "No active cart", body = crate::errors::ErrorResponse)
    ),
    tag = "Carts"
)]
pub async fn remove_item(
    State(state): State<AppState>,
    Query(query): Query<RemoveItemQuery>,
) -> Result<impl IntoResponse, ApiError> {
    state
        .services
        .carts
        .remove_item(query.user_id, query.item_id)
        .await
        .map_err(map_service_error)?;

    Ok(no_content_response())
}
