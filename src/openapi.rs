use utoipa::OpenApi;

#[derive(OpenApi)]
#[openapi(
    info(
        title = "Bookstore Checkout API",
        version = "1.0.0",
        description = r#"
# Bookstore Checkout API

Inventory-safe checkout for an online bookstore.

- **Stock**: per-location ledger with on-hand and reserved counters
- **Carts**: one active cart per user, converted at checkout
- **Checkout**: validates the whole cart, reserves stock atomically, and
  hands the user a payment gateway link
- **Payment callbacks**: idempotent settlement that confirms or releases
  the order's stock holds
        "#,
        license(
            name = "MIT",
            url = "https://opensource.org/licenses/MIT"
        )
    ),
    servers(
        (url = "http://localhost:8080/api/v1", description = "Local development")
    ),
    tags(
        (name = "Checkout", description = "Checkout and payment settlement endpoints"),
        (name = "Carts", description = "Cart management endpoints"),
        (name = "Stock", description = "Stock ledger endpoints")
    ),
    paths(
        crate::handlers::checkout::start_checkout,
        crate::handlers::checkout::payment_callback,
        crate::handlers::carts::get_cart,
        crate::handlers::carts::add_item,
        crate::handlers::carts::remove_item,
        crate::handlers::stock::get_availability,
        crate::handlers::stock::set_level,
    ),
    components(
        schemas(
            crate::ApiResponse<serde_json::Value>,
            crate::handlers::checkout::StartCheckoutRequest,
            crate::handlers::checkout::CheckoutResponse,
            crate::handlers::checkout::PaymentCallbackPayload,
            crate::handlers::checkout::PaymentCallbackResponse,
            crate::handlers::carts::CartResponse,
            crate::handlers::carts::CartLineResponse,
            crate::handlers::carts::AddItemRequest,
            crate::handlers::stock::AvailabilityResponse,
            crate::handlers::stock::SetLevelRequest,
            crate::errors::ErrorResponse
        )
    )
)]
pub struct ApiDocV1;
