mod common;

use axum::http::{Method, StatusCode};
use rust_decimal_macros::dec;
use sea_orm::{ColumnTrait, EntityTrait, QueryFilter};
use serde_json::json;
use uuid::Uuid;

use bookstore_checkout_api::entities::{
    coupon::DiscountType,
    order::{self, OrderStatus},
    stock_reservation::{self, ReservationStatus},
};
use common::{response_json, TestApp};

#[tokio::test]
async fn successful_checkout_reserves_stock_and_creates_order() {
    let app = TestApp::new().await;
    let user_id = Uuid::new_v4();

    let book = app.seed_product("The Rust Book", dec!(100000)).await;
    app.seed_stock(book.id, 5).await;
    app.add_to_cart(user_id, book.id, 2).await;

    let response = app
        .request(
            Method::POST,
            "/api/v1/checkout",
            Some(json!({ "user_id": user_id })),
        )
        .await;
    assert_eq!(response.status(), StatusCode::CREATED);

    let body = response_json(response).await;
    assert_eq!(body["subtotal"], json!("200000"));
    assert_eq!(body["discount_total"], json!("0"));
    assert_eq!(body["total_amount"], json!("200000"));
    let payment_url = body["payment_url"].as_str().expect("payment url");
    assert!(payment_url.contains("code="));
    assert!(payment_url.contains("amount=200000"));
    let qr_code_url = body["qr_code_url"].as_str().expect("qr url");
    assert!(qr_code_url.contains("render=qr"));

    // Stock is held, not yet deducted.
    let record = app
        .state
        .services
        .stock_ledger
        .get_record(book.id, app.location_id())
        .await
        .expect("ledger query")
        .expect("ledger row");
    assert_eq!(record.quantity_on_hand, 5);
    assert_eq!(record.quantity_reserved, 2);

    // Cart was converted; the next snapshot is empty.
    let snapshot = app
        .state
        .services
        .carts
        .snapshot(user_id)
        .await
        .expect("cart snapshot");
    assert!(snapshot.is_empty());

    // The order is awaiting payment and its hold carries a deadline.
    let order_id: Uuid = body["order_id"].as_str().unwrap().parse().unwrap();
    let order = order::Entity::find_by_id(order_id)
        .one(&*app.state.db)
        .await
        .expect("order query")
        .expect("order row");
    assert_eq!(order.status, OrderStatus::PaymentPending.as_str());

    let holds = stock_reservation::Entity::find()
        .filter(stock_reservation::Column::OrderId.eq(order_id))
        .all(&*app.state.db)
        .await
        .expect("reservation query");
    assert_eq!(holds.len(), 1);
    assert_eq!(holds[0].status, ReservationStatus::Active.as_str());
    assert!(holds[0].expires_at.is_some());
}

#[tokio::test]
async fn insufficient_stock_rejects_checkout_without_mutation() {
    let app = TestApp::new().await;
    let user_id = Uuid::new_v4();

    let book = app.seed_product("Rare First Edition", dec!(500000)).await;
    app.seed_stock(book.id, 1).await;
    app.add_to_cart(user_id, book.id, 3).await;

    let response = app
        .request(
            Method::POST,
            "/api/v1/checkout",
            Some(json!({ "user_id": user_id })),
        )
        .await;
    assert_eq!(response.status(), StatusCode::BAD_REQUEST);

    let body = response_json(response).await;
    let errors = body["errors"].as_array().expect("error list");
    assert_eq!(errors.len(), 1);
    assert!(errors[0].as_str().unwrap().contains("in stock"));

    // Nothing moved.
    let record = app
        .state
        .services
        .stock_ledger
        .get_record(book.id, app.location_id())
        .await
        .unwrap()
        .unwrap();
    assert_eq!(record.quantity_reserved, 0);

    let snapshot = app.state.services.carts.snapshot(user_id).await.unwrap();
    assert_eq!(snapshot.lines.len(), 1);
}

#[tokio::test]
async fn validation_reports_every_problem_at_once() {
    let app = TestApp::new().await;
    let user_id = Uuid::new_v4();

    let scarce = app.seed_product("Scarce Title", dec!(80000)).await;
    app.seed_stock(scarce.id, 1).await;
    app.add_to_cart(user_id, scarce.id, 2).await;

    let vanished = app.seed_product("Soon Delisted", dec!(60000)).await;
    app.seed_stock(vanished.id, 10).await;
    app.add_to_cart(user_id, vanished.id, 1).await;

    // Delist the second title after it entered the cart.
    bookstore_checkout_api::entities::product::Entity::delete_by_id(vanished.id)
        .exec(&*app.state.db)
        .await
        .expect("delist product");

    let response = app
        .request(
            Method::POST,
            "/api/v1/checkout",
            Some(json!({ "user_id": user_id, "coupon_code": "NOPE" })),
        )
        .await;
    assert_eq!(response.status(), StatusCode::BAD_REQUEST);

    let body = response_json(response).await;
    let errors = body["errors"].as_array().expect("error list");
    assert_eq!(errors.len(), 3);
}

#[tokio::test]
async fn empty_cart_cannot_check_out() {
    let app = TestApp::new().await;

    let response = app
        .request(
            Method::POST,
            "/api/v1/checkout",
            Some(json!({ "user_id": Uuid::new_v4() })),
        )
        .await;
    assert_eq!(response.status(), StatusCode::BAD_REQUEST);

    let body = response_json(response).await;
    let errors = body["errors"].as_array().expect("error list");
    assert_eq!(errors[0], json!("cart is empty"));
}

#[tokio::test]
async fn percentage_coupon_discounts_the_order() {
    let app = TestApp::new().await;
    let user_id = Uuid::new_v4();

    let book = app.seed_product("Discounted Title", dec!(100000)).await;
    app.seed_stock(book.id, 5).await;
    app.add_to_cart(user_id, book.id, 2).await;
    let coupon = app
        .seed_coupon("SAVE10", DiscountType::Percentage, dec!(10))
        .await;

    let response = app
        .request(
            Method::POST,
            "/api/v1/checkout",
            Some(json!({ "user_id": user_id, "coupon_code": "SAVE10" })),
        )
        .await;
    assert_eq!(response.status(), StatusCode::CREATED);

    let body = response_json(response).await;
    assert_eq!(body["discount_total"], json!("20000"));
    assert_eq!(body["total_amount"], json!("180000"));

    let coupon = bookstore_checkout_api::entities::coupon::Entity::find_by_id(coupon.id)
        .one(&*app.state.db)
        .await
        .unwrap()
        .unwrap();
    assert_eq!(coupon.usage_count, 1);
}

#[tokio::test]
async fn order_persistence_failure_releases_the_holds() {
    let app = TestApp::new().await;
    let user_id = Uuid::new_v4();

    let book = app.seed_product("Fragile Checkout", dec!(50000)).await;
    app.seed_stock(book.id, 4).await;
    app.add_to_cart(user_id, book.id, 2).await;

    // Break order persistence after validation and reservation succeed.
    use sea_orm::{ConnectionTrait, Statement};
    let backend = app.state.db.get_database_backend();
    app.state
        .db
        .execute(Statement::from_string(
            backend,
            "DROP TABLE orders;".to_string(),
        ))
        .await
        .expect("drop orders table");

    let response = app
        .request(
            Method::POST,
            "/api/v1/checkout",
            Some(json!({ "user_id": user_id })),
        )
        .await;
    assert_eq!(response.status(), StatusCode::BAD_GATEWAY);

    // Compensation gave the stock back.
    let record = app
        .state
        .services
        .stock_ledger
        .get_record(book.id, app.location_id())
        .await
        .unwrap()
        .unwrap();
    assert_eq!(record.quantity_on_hand, 4);
    assert_eq!(record.quantity_reserved, 0);

    let holds = stock_reservation::Entity::find()
        .filter(stock_reservation::Column::Status.eq(ReservationStatus::Active.as_str()))
        .all(&*app.state.db)
        .await
        .unwrap();
    assert!(holds.is_empty());
}
