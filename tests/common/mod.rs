use std::sync::Arc;

use axum::{
    body::Body,
    http::{Method, Request},
    Router,
};
use rust_decimal::Decimal;
use sea_orm::{ActiveModelTrait, Set};
use serde_json::Value;
use tempfile::TempDir;
use tokio::sync::mpsc;
use tower::ServiceExt;
use uuid::Uuid;

use bookstore_checkout_api::{
    config::AppConfig,
    db,
    entities::{coupon, product},
    events::{self, EventSender},
    AppState,
};

/// Helper harness for spinning up an application backed by a throwaway
/// SQLite database.
pub struct TestApp {
    router: Router,
    pub state: AppState,
    _db_dir: TempDir,
    _event_task: tokio::task::JoinHandle<()>,
}

impl TestApp {
    /// Construct a new test application with fresh database state.
    pub async fn new() -> Self {
        let db_dir = TempDir::new().expect("create temp dir for test db");
        let db_path = db_dir.path().join("checkout_test.db");

        let mut cfg = AppConfig::new(
            format!("sqlite://{}?mode=rwc", db_path.display()),
            "127.0.0.1".to_string(),
            18_080,
            "test".to_string(),
        );
        cfg.db_max_connections = 5;
        cfg.db_min_connections = 1;

        let pool = db::establish_connection_from_app_config(&cfg)
            .await
            .expect("failed to create test database");
        db::run_migrations(&pool)
            .await
            .expect("failed to run migrations in tests");

        let db_arc = Arc::new(pool);
        let (event_tx, event_rx) = mpsc::channel(256);
        let event_sender = EventSender::new(event_tx);
        let event_task = tokio::spawn(events::process_events(event_rx));

        let state = AppState::new(db_arc, cfg, event_sender);

        let router = Router::new()
            .nest("/api/v1", bookstore_checkout_api::api_v1_routes())
            .with_state(state.clone());

        Self {
            router,
            state,
            _db_dir: db_dir,
            _event_task: event_task,
        }
    }

    /// Send a JSON request against the router.
    pub async fn request(
        &self,
        method: Method,
        uri: &str,
        body: Option<Value>,
    ) -> axum::response::Response {
        let mut builder = Request::builder().method(method).uri(uri);

        let body = if let Some(json) = body {
            builder = builder.header("content-type", "application/json");
            Body::from(serde_json::to_vec(&json).expect("failed to serialize json request body"))
        } else {
            Body::empty()
        };

        let request = builder.body(body).expect("failed to build request");
        self.router
            .clone()
            .oneshot(request)
            .await
            .expect("router error during test request")
    }

    /// The warehouse location checkout reserves against in tests.
    pub fn location_id(&self) -> Uuid {
        self.state.config.default_location_id
    }

    /// Seed a catalog product and return it.
    pub async fn seed_product(&self, title: &str, price: Decimal) -> product::Model {
        let model = product::ActiveModel {
            id: Set(Uuid::new_v4()),
            title: Set(title.to_string()),
            sku: Set(format!("BK-{}", Uuid::new_v4().simple())),
            price: Set(price),
            is_available: Set(true),
            created_at: Set(chrono::Utc::now()),
            updated_at: Set(None),
        };
        model
            .insert(&*self.state.db)
            .await
            .expect("seed product for tests")
    }

    /// Seed the stock ledger for an item at the default location.
    pub async fn seed_stock(&self, item_id: Uuid, on_hand: i32) {
        self.state
            .services
            .stock_ledger
            .set_level(item_id, self.location_id(), on_hand)
            .await
            .expect("seed stock for tests");
    }

    /// Put an item into a user's cart.
    pub async fn add_to_cart(&self, user_id: Uuid, item_id: Uuid, quantity: i32) {
        self.state
            .services
            .carts
            .add_item(user_id, item_id, quantity)
            .await
            .expect("seed cart line for tests");
    }

    /// Seed an active percentage or fixed coupon.
    #[allow(dead_code)]
    pub async fn seed_coupon(
        &self,
        code: &str,
        discount_type: coupon::DiscountType,
        value: Decimal,
    ) -> coupon::Model {
        let now = chrono::Utc::now();
        let model = coupon::ActiveModel {
            id: Set(Uuid::new_v4()),
            code: Set(code.to_string()),
            discount_type: Set(discount_type.as_str().to_string()),
            discount_value: Set(value),
            max_discount_amount: Set(None),
            usage_limit: Set(None),
            usage_count: Set(0),
            starts_at: Set(now - chrono::Duration::hours(1)),
            expires_at: Set(now + chrono::Duration::days(30)),
            is_active: Set(true),
            created_at: Set(now),
            updated_at: Set(None),
        };
        model
            .insert(&*self.state.db)
            .await
            .expect("seed coupon for tests")
    }
}

impl Drop for TestApp {
    fn drop(&mut self) {
        self._event_task.abort();
    }
}

/// Read a response body as JSON.
pub async fn response_json(response: axum::response::Response) -> Value {
    let bytes = axum::body::to_bytes(response.into_body(), usize::MAX)
        .await
        .expect("read response body");
    serde_json::from_slice(&bytes).expect("response body should be json")
}
