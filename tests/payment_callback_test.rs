mod common;

use axum::http::{Method, StatusCode};
use rust_decimal_macros::dec;
use sea_orm::{ColumnTrait, EntityTrait, QueryFilter};
use serde_json::json;
use uuid::Uuid;

use bookstore_checkout_api::entities::order::{self, OrderStatus};
use bookstore_checkout_api::entities::payment_transaction::{self, PaymentStatus};
use common::{response_json, TestApp};

/// Runs a checkout and returns (order_id, transaction_code).
async fn checkout(app: &TestApp, user_id: Uuid, item_id: Uuid, quantity: i32) -> (Uuid, String) {
    app.add_to_cart(user_id, item_id, quantity).await;

    let response = app
        .request(
            Method::POST,
            "/api/v1/checkout",
            Some(json!({ "user_id": user_id })),
        )
        .await;
    assert_eq!(response.status(), StatusCode::CREATED);

    let body = response_json(response).await;
    let order_id = body["order_id"].as_str().unwrap().parse().unwrap();
    let link = body["payment_url"].as_str().unwrap();
    let code = url::Url::parse(link)
        .unwrap()
        .query_pairs()
        .find(|(k, _)| k == "code")
        .map(|(_, v)| v.into_owned())
        .expect("transaction code in payment link");

    (order_id, code)
}

#[tokio::test]
async fn successful_payment_confirms_the_sale() {
    let app = TestApp::new().await;
    let user_id = Uuid::new_v4();
    let book = app.seed_product("Paid In Full", dec!(100000)).await;
    app.seed_stock(book.id, 5).await;

    let (order_id, code) = checkout(&app, user_id, book.id, 2).await;

    let response = app
        .request(
            Method::POST,
            "/api/v1/checkout/payment-callback",
            Some(json!({ "transaction_code": code, "status": "success" })),
        )
        .await;
    assert_eq!(response.status(), StatusCode::OK);

    let body = response_json(response).await;
    assert_eq!(body["payment_status"], json!("success"));
    assert_eq!(body["order_status"], json!("paid"));
    assert_eq!(body["replayed"], json!(false));

    // The hold became a permanent deduction.
    let record = app
        .state
        .services
        .stock_ledger
        .get_record(book.id, app.location_id())
        .await
        .unwrap()
        .unwrap();
    assert_eq!(record.quantity_on_hand, 3);
    assert_eq!(record.quantity_reserved, 0);

    let order = order::Entity::find_by_id(order_id)
        .one(&*app.state.db)
        .await
        .unwrap()
        .unwrap();
    assert_eq!(order.status, OrderStatus::Paid.as_str());
}

#[tokio::test]
async fn completed_status_settles_as_paid() {
    let app = TestApp::new().await;
    let user_id = Uuid::new_v4();
    let book = app.seed_product("Alternate Spelling", dec!(100000)).await;
    app.seed_stock(book.id, 5).await;

    let (order_id, code) = checkout(&app, user_id, book.id, 2).await;

    // Some gateways report "Completed" instead of "success".
    let response = app
        .request(
            Method::POST,
            "/api/v1/checkout/payment-callback",
            Some(json!({ "transaction_code": code, "status": "Completed" })),
        )
        .await;
    assert_eq!(response.status(), StatusCode::OK);

    let body = response_json(response).await;
    assert_eq!(body["payment_status"], json!("success"));
    assert_eq!(body["order_status"], json!("paid"));

    let record = app
        .state
        .services
        .stock_ledger
        .get_record(book.id, app.location_id())
        .await
        .unwrap()
        .unwrap();
    assert_eq!(record.quantity_on_hand, 3);
    assert_eq!(record.quantity_reserved, 0);

    let order = order::Entity::find_by_id(order_id)
        .one(&*app.state.db)
        .await
        .unwrap()
        .unwrap();
    assert_eq!(order.status, OrderStatus::Paid.as_str());
}

#[tokio::test]
async fn cancelled_status_releases_and_records_the_cancellation() {
    let app = TestApp::new().await;
    let user_id = Uuid::new_v4();
    let book = app.seed_product("Abandoned Checkout", dec!(100000)).await;
    app.seed_stock(book.id, 5).await;

    let (order_id, code) = checkout(&app, user_id, book.id, 2).await;

    let response = app
        .request(
            Method::POST,
            "/api/v1/checkout/payment-callback",
            Some(json!({ "transaction_code": code, "status": "Cancelled" })),
        )
        .await;
    assert_eq!(response.status(), StatusCode::OK);

    let body = response_json(response).await;
    assert_eq!(body["payment_status"], json!("cancelled"));
    assert_eq!(body["order_status"], json!("cancelled"));

    // The cancellation is kept distinct from a decline on the transaction.
    let transaction = payment_transaction::Entity::find()
        .filter(payment_transaction::Column::TransactionCode.eq(code))
        .one(&*app.state.db)
        .await
        .unwrap()
        .unwrap();
    assert_eq!(transaction.status, PaymentStatus::Cancelled.as_str());

    let record = app
        .state
        .services
        .stock_ledger
        .get_record(book.id, app.location_id())
        .await
        .unwrap()
        .unwrap();
    assert_eq!(record.quantity_on_hand, 5);
    assert_eq!(record.quantity_reserved, 0);

    let order = order::Entity::find_by_id(order_id)
        .one(&*app.state.db)
        .await
        .unwrap()
        .unwrap();
    assert_eq!(order.status, OrderStatus::Cancelled.as_str());
}

#[tokio::test]
async fn non_terminal_status_changes_nothing() {
    let app = TestApp::new().await;
    let user_id = Uuid::new_v4();
    let book = app.seed_product("Still Processing", dec!(100000)).await;
    app.seed_stock(book.id, 5).await;

    let (order_id, code) = checkout(&app, user_id, book.id, 2).await;

    let response = app
        .request(
            Method::POST,
            "/api/v1/checkout/payment-callback",
            Some(json!({ "transaction_code": code, "status": "processing" })),
        )
        .await;
    assert_eq!(response.status(), StatusCode::BAD_REQUEST);

    // The hold survives and the order is still awaiting payment.
    let record = app
        .state
        .services
        .stock_ledger
        .get_record(book.id, app.location_id())
        .await
        .unwrap()
        .unwrap();
    assert_eq!(record.quantity_on_hand, 5);
    assert_eq!(record.quantity_reserved, 2);

    let order = order::Entity::find_by_id(order_id)
        .one(&*app.state.db)
        .await
        .unwrap()
        .unwrap();
    assert_eq!(order.status, OrderStatus::PaymentPending.as_str());
}

#[tokio::test]
async fn failed_payment_releases_the_holds() {
    let app = TestApp::new().await;
    let user_id = Uuid::new_v4();
    let book = app.seed_product("Declined Card", dec!(100000)).await;
    app.seed_stock(book.id, 5).await;

    let (order_id, code) = checkout(&app, user_id, book.id, 2).await;

    let response = app
        .request(
            Method::POST,
            "/api/v1/checkout/payment-callback",
            Some(json!({ "transaction_code": code, "status": "failed" })),
        )
        .await;
    assert_eq!(response.status(), StatusCode::OK);

    let body = response_json(response).await;
    assert_eq!(body["payment_status"], json!("failed"));
    assert_eq!(body["order_status"], json!("cancelled"));

    // The stock went back to available.
    let record = app
        .state
        .services
        .stock_ledger
        .get_record(book.id, app.location_id())
        .await
        .unwrap()
        .unwrap();
    assert_eq!(record.quantity_on_hand, 5);
    assert_eq!(record.quantity_reserved, 0);

    let order = order::Entity::find_by_id(order_id)
        .one(&*app.state.db)
        .await
        .unwrap()
        .unwrap();
    assert_eq!(order.status, OrderStatus::Cancelled.as_str());
}

#[tokio::test]
async fn replayed_callback_does_not_touch_stock_twice() {
    let app = TestApp::new().await;
    let user_id = Uuid::new_v4();
    let book = app.seed_product("Retry Storm", dec!(100000)).await;
    app.seed_stock(book.id, 5).await;

    let (_, code) = checkout(&app, user_id, book.id, 2).await;

    let first = app
        .request(
            Method::POST,
            "/api/v1/checkout/payment-callback",
            Some(json!({ "transaction_code": code, "status": "success" })),
        )
        .await;
    assert_eq!(first.status(), StatusCode::OK);

    // The gateway retries; even a contradictory result is ignored.
    let second = app
        .request(
            Method::POST,
            "/api/v1/checkout/payment-callback",
            Some(json!({ "transaction_code": code, "status": "failed" })),
        )
        .await;
    assert_eq!(second.status(), StatusCode::OK);

    let body = response_json(second).await;
    assert_eq!(body["replayed"], json!(true));
    assert_eq!(body["payment_status"], json!("success"));
    assert_eq!(body["order_status"], json!("paid"));

    let record = app
        .state
        .services
        .stock_ledger
        .get_record(book.id, app.location_id())
        .await
        .unwrap()
        .unwrap();
    assert_eq!(record.quantity_on_hand, 3);
    assert_eq!(record.quantity_reserved, 0);
}

#[tokio::test]
async fn mismatched_amount_is_rejected() {
    let app = TestApp::new().await;
    let user_id = Uuid::new_v4();
    let book = app.seed_product("Price Tampering", dec!(100000)).await;
    app.seed_stock(book.id, 5).await;

    let (order_id, code) = checkout(&app, user_id, book.id, 1).await;

    let response = app
        .request(
            Method::POST,
            "/api/v1/checkout/payment-callback",
            Some(json!({ "transaction_code": code, "status": "success", "amount": "1" })),
        )
        .await;
    assert_eq!(response.status(), StatusCode::BAD_REQUEST);

    // Nothing settled; the hold is still active.
    let order = order::Entity::find_by_id(order_id)
        .one(&*app.state.db)
        .await
        .unwrap()
        .unwrap();
    assert_eq!(order.status, OrderStatus::PaymentPending.as_str());
}

#[tokio::test]
async fn unknown_transaction_code_is_not_found() {
    let app = TestApp::new().await;

    let response = app
        .request(
            Method::POST,
            "/api/v1/checkout/payment-callback",
            Some(json!({ "transaction_code": "NOSUCHCODE123456", "status": "success" })),
        )
        .await;
    assert_eq!(response.status(), StatusCode::NOT_FOUND);
}
