pub mod carts;
pub mod checkout;
pub mod common;
pub mod stock;

use std::sync::Arc;

use sea_orm::DatabaseConnection;

use crate::config::AppConfig;
use crate::events::EventSender;
use crate::services::checkout::CheckoutSettings;
use crate::services::{
    CartService, CheckoutService, CouponService, PaymentService, ReservationSweeper,
    StockLedgerService,
};

/// All domain services, wired once at startup and shared via `AppState`.
#[derive(Clone)]
pub struct AppServices {
    pub carts: CartService,
    pub stock_ledger: StockLedgerService,
    pub coupons: CouponService,
    pub payments: PaymentService,
    pub checkout: CheckoutService,
    pub reservation_sweeper: ReservationSweeper,
}

impl AppServices {
    pub fn new(
        db: Arc<DatabaseConnection>,
        event_sender: EventSender,
        config: &AppConfig,
    ) -> Self {
        let carts = CartService::new(db.clone());
        let stock_ledger = StockLedgerService::new(db.clone(), event_sender.clone());
        let coupons = CouponService::new(db.clone());
        let payments = PaymentService::new(
            db.clone(),
            event_sender.clone(),
            stock_ledger.clone(),
            config.payment_gateway_url.clone(),
        );
        let checkout = CheckoutService::new(
            db.clone(),
            carts.clone(),
            stock_ledger.clone(),
            coupons.clone(),
            payments.clone(),
            event_sender.clone(),
            CheckoutSettings {
                default_location_id: config.default_location_id,
                currency: config.currency.clone(),
                reservation_ttl_secs: config.reservation_ttl_secs,
            },
        );
        let reservation_sweeper =
            ReservationSweeper::new(db, stock_ledger.clone(), event_sender);

        Self {
            carts,
            stock_ledger,
            coupons,
            payments,
            checkout,
            reservation_sweeper,
        }
    }
}
