use axum::{
    extract::{Json, State},
    http::HeaderMap,
    response::IntoResponse,
    routing::post,
    Router,
};
use bytes::Bytes;
use hmac::{Hmac, Mac};
use serde::{Deserialize, Serialize};
use sha2::Sha256;
use tracing::warn;
use utoipa::ToSchema;
use uuid::Uuid;
use validator::Validate;

use crate::errors::{ApiError, ServiceError};
use crate::handlers::common::{created_response, map_service_error, success_response, validate_input};
use crate::services::checkout::CheckoutRequest;
use crate::services::payments::GatewayStatus;
use crate::AppState;

type HmacSha256 = Hmac<Sha256>;

/// Creates the router for checkout endpoints
pub fn checkout_routes() -> Router<AppState> {
    Router::new()
        .route("/", post(start_checkout))
        .route("/payment-callback", post(payment_callback))
}

#[derive(Debug, Deserialize, Validate, ToSchema)]
pub struct StartCheckoutRequest {
    pub user_id: Uuid,
    #[validate(length(min = 1, max = 64))]
    pub coupon_code: Option<String>,
    #[validate(length(min = 1, max = 512))]
    pub shipping_address: Option<String>,
}

#[derive(Debug, Serialize, ToSchema)]
pub struct CheckoutResponse {
    pub order_id: Uuid,
    pub order_number: String,
    #[schema(value_type = String)]
    pub subtotal: rust_decimal::Decimal,
    #[schema(value_type = String)]
    pub discount_total: rust_decimal::Decimal,
    #[schema(value_type = String)]
    pub total_amount: rust_decimal::Decimal,
    pub currency: String,
    pub payment_url: String,
    pub qr_code_url: String,
}

/// Start checkout from the user's active cart
#[utoipa::path(
    post,
    path = "/api/v1/checkout",
    request_body = StartCheckoutRequest,
    responses(
        (status = 201, description = "Order created, payment pending", body = CheckoutResponse),
        (status = 400, description = "Validation failed", body = crate::errors::ErrorResponse),
        (status = 422, description = "Stock was consumed by a concurrent checkout", body = crate::errors::ErrorResponse),
        (status = 502, description = "Order persistence failed after reservation", body = crate::errors::ErrorResponse)
    ),
    tag = "Checkout"
)]
pub async fn start_checkout(
    State(state): State<AppState>,
    Json(payload): Json<StartCheckoutRequest>,
) -> Result<impl IntoResponse, ApiError> {
    validate_input(&payload)?;

    let outcome = state
        .services
        .checkout
        .process_checkout(CheckoutRequest {
            user_id: payload.user_id,
            coupon_code: payload.coupon_code,
            shipping_address: payload.shipping_address,
        })
        .await
        .map_err(map_service_error)?;

    Ok(created_response(CheckoutResponse {
        order_id: outcome.order_id,
        order_number: outcome.order_number,
        subtotal: outcome.subtotal,
        discount_total: outcome.discount_total,
        total_amount: outcome.total_amount,
        currency: outcome.currency,
        payment_url: outcome.payment_url,
        qr_code_url: outcome.qr_code_url,
    }))
}

#[derive(Debug, Deserialize, ToSchema)]
pub struct PaymentCallbackPayload {
    pub transaction_code: String,
    /// Gateway result: "success"/"completed" settle the order,
    /// "failed"/"cancelled" cancel it, anything else is rejected
    pub status: String,
    /// Amount echoed by the gateway; rejected when it disagrees with the
    /// pending transaction
    #[schema(value_type = Option<String>)]
    pub amount: Option<rust_decimal::Decimal>,
}

#[derive(Debug, Serialize, ToSchema)]
pub struct PaymentCallbackResponse {
    pub order_id: Uuid,
    pub transaction_code: String,
    pub payment_status: String,
    pub order_status: String,
    pub replayed: bool,
}

/// Settle a payment gateway callback
#[utoipa::path(
    post,
    path = "/api/v1/checkout/payment-callback",
    request_body = PaymentCallbackPayload,
    responses(
        (status = 200, description = "Callback processed", body = PaymentCallbackResponse),
        (status = 401, description = "Invalid signature", body = crate::errors::ErrorResponse),
        (status = 404, description = "Unknown transaction code", body = crate::errors::ErrorResponse)
    ),
    tag = "Checkout"
)]
pub async fn payment_callback(
    State(state): State<AppState>,
    headers: HeaderMap,
    body: Bytes,
) -> Result<impl IntoResponse, ServiceError> {
    if let Some(secret) = state.config.payment_webhook_secret.clone() {
        let tolerance = state.config.payment_webhook_tolerance_secs.unwrap_or(300);
        if !verify_signature(&headers, &body, &secret, tolerance) {
            warn!("Payment callback signature verification failed");
            return Err(ServiceError::Unauthorized(
                "invalid callback signature".to_string(),
            ));
        }
    }

    let payload: PaymentCallbackPayload = serde_json::from_slice(&body)
        .map_err(|e| ServiceError::ValidationError(format!("invalid callback body: {}", e)))?;

    let status = GatewayStatus::parse(&payload.status).ok_or_else(|| {
        ServiceError::ValidationError(format!(
            "unrecognized payment status '{}'",
            payload.status
        ))
    })?;

    let raw = String::from_utf8(body.to_vec()).ok();

    let outcome = state
        .services
        .payments
        .handle_callback(&payload.transaction_code, status, payload.amount, raw)
        .await?;

    Ok(success_response(PaymentCallbackResponse {
        order_id: outcome.order_id,
        transaction_code: outcome.transaction_code,
        payment_status: outcome.payment_status.as_str().to_string(),
        order_status: outcome.order_status.as_str().to_string(),
        replayed: outcome.replayed,
    }))
}

/// Generic HMAC verification over `x-timestamp` and `x-signature` headers:
/// the signed string is `{timestamp}.{body}`.
fn verify_signature(headers: &HeaderMap, payload: &Bytes, secret: &str, tolerance_secs: u64) -> bool {
    let (Some(ts), Some(sig)) = (headers.get("x-timestamp"), headers.get("x-signature")) else {
        return false;
    };
    let (Ok(ts), Ok(sig)) = (ts.to_str(), sig.to_str()) else {
        return false;
    };

    if let Ok(ts_i) = ts.parse::<i64>() {
        let now = chrono::Utc::now().timestamp();
        if (now - ts_i).unsigned_abs() > tolerance_secs {
            return false;
        }
    }

    let signed = format!("{}.{}", ts, std::str::from_utf8(payload).unwrap_or(""));
    let Ok(mut mac) = HmacSha256::new_from_slice(secret.as_bytes()) else {
        return false;
    };
    mac.update(signed.as_bytes());
    let expected = hex::encode(mac.finalize().into_bytes());

    constant_time_eq(&expected, sig)
}

fn constant_time_eq(a: &str, b: &str) -> bool {
    if a.len() != b.len() {
        return false;
    }
    let mut res = 0u8;
    for (x, y) in a.as_bytes().iter().zip(b.as_bytes()) {
        res |= x ^ y;
    }
    res == 0
}
