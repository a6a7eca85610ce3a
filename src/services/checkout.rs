use chrono::Utc;
use rand::distributions::Alphanumeric;
use rand::Rng;
use rust_decimal::Decimal;
use sea_orm::{ActiveModelTrait, DatabaseConnection, DatabaseTransaction, Set, TransactionTrait};
use serde::Serialize;
use std::sync::Arc;
use tracing::{error, info, instrument, warn};
use uuid::Uuid;

use crate::entities::order::{self, OrderStatus};
use crate::entities::order_item;
use crate::errors::ServiceError;
use crate::events::{Event, EventSender};
use crate::services::carts::{CartService, CartSnapshot};
use crate::services::coupons::{CouponEvaluation, CouponService};
use crate::services::payments::{PaymentLink, PaymentService};
use crate::services::stock_ledger::{ReservationLine, StockLedgerService};

/// Tunables the orchestrator takes from application config.
#[derive(Debug, Clone)]
pub struct CheckoutSettings {
    pub default_location_id: Uuid,
    pub currency: String,
    pub reservation_ttl_secs: u64,
}

/// What a user submits to start checkout.
#[derive(Debug, Clone)]
pub struct CheckoutRequest {
    pub user_id: Uuid,
    pub coupon_code: Option<String>,
    pub shipping_address: Option<String>,
}

/// Successful checkout result handed back to the HTTP layer.
#[derive(Debug, Clone, Serialize)]
pub struct CheckoutOutcome {
    pub order_id: Uuid,
    pub order_number: String,
    pub subtotal: Decimal,
    pub discount_total: Decimal,
    pub total_amount: Decimal,
    pub currency: String,
    pub transaction_code: String,
    pub payment_url: String,
    pub qr_code_url: String,
}

/// Orchestrates the checkout pipeline: snapshot, validate, reserve, persist,
/// payment link. Stock is the only state touched before the order transaction,
/// so compensation is a single release of the order's holds.
#[derive(Clone)]
pub struct CheckoutService {
    db: Arc<DatabaseConnection>,
    carts: CartService,
    stock_ledger: StockLedgerService,
    coupons: CouponService,
    payments: PaymentService,
    event_sender: EventSender,
    settings: CheckoutSettings,
}

impl CheckoutService {
    pub fn new(
        db: Arc<DatabaseConnection>,
        carts: CartService,
        stock_ledger: StockLedgerService,
        coupons: CouponService,
        payments: PaymentService,
        event_sender: EventSender,
        settings: CheckoutSettings,
    ) -> Self {
        Self {
            db,
            carts,
            stock_ledger,
            coupons,
            payments,
            event_sender,
            settings,
        }
    }

    /// Runs the full checkout for a user. Validation failures report every
    /// problem at once and mutate nothing; a reservation conflict means a
    /// concurrent checkout won the stock between validation and reserve.
    #[instrument(skip(self, request), fields(user_id = %request.user_id))]
    pub async fn process_checkout(
        &self,
        request: CheckoutRequest,
    ) -> Result<CheckoutOutcome, ServiceError> {
        let snapshot = self.carts.snapshot(request.user_id).await?;

        let (subtotal, coupon_eval) = match self
            .validate(&snapshot, request.coupon_code.as_deref())
            .await
        {
            Ok(v) => v,
            Err(e) => {
                self.emit_failure(request.user_id, &e).await;
                return Err(e);
            }
        };

        let discount_total = coupon_eval
            .as_ref()
            .map(|c| c.discount_amount)
            .unwrap_or(Decimal::ZERO);
        let total_amount = subtotal - discount_total;

        let order_id = Uuid::new_v4();
        let lines: Vec<ReservationLine> = snapshot
            .lines
            .iter()
            .map(|l| ReservationLine {
                item_id: l.item_id,
                location_id: self.settings.default_location_id,
                quantity: l.quantity,
            })
            .collect();

        if let Err(e) = self
            .stock_ledger
            .reserve_all(&lines, Some(order_id), self.settings.reservation_ttl_secs)
            .await
        {
            self.emit_failure(request.user_id, &e).await;
            return Err(e);
        }

        // Stock is held from here on; any later failure must give it back.
        let persisted = self
            .persist_order(
                order_id,
                &request,
                &snapshot,
                subtotal,
                discount_total,
                total_amount,
            )
            .await;

        let (order, transaction_code, link) = match persisted {
            Ok(v) => v,
            Err(e) => {
                error!(order_id = %order_id, error = %e, "Order persistence failed, releasing holds");
                if let Err(release_err) = self.stock_ledger.release_order_holds(order_id).await {
                    error!(
                        order_id = %order_id,
                        error = %release_err,
                        "Compensation failed, reservation sweeper will reclaim the holds"
                    );
                }
                self.emit_failure(request.user_id, &e).await;
                return Err(ServiceError::DownstreamFailure(format!(
                    "checkout could not complete: {}",
                    e.response_message()
                )));
            }
        };

        if let Some(coupon) = coupon_eval.and_then(|c| c.coupon) {
            if let Err(e) = self.coupons.increment_usage_count(coupon.id).await {
                warn!(coupon = %coupon.code, error = %e, "Failed to bump coupon usage");
            }
        }

        info!(
            order_id = %order.id,
            order_number = %order.order_number,
            total = %order.total_amount,
            "Checkout completed"
        );

        if let Err(e) = self
            .event_sender
            .send(Event::CheckoutCompleted {
                user_id: request.user_id,
                order_id: order.id,
                total: order.total_amount,
            })
            .await
        {
            warn!(error = %e, "Failed to emit checkout event");
        }
        if let Err(e) = self.event_sender.send(Event::OrderCreated(order.id)).await {
            warn!(error = %e, "Failed to emit order event");
        }

        Ok(CheckoutOutcome {
            order_id: order.id,
            order_number: order.order_number,
            subtotal: order.subtotal,
            discount_total: order.discount_total,
            total_amount: order.total_amount,
            currency: order.currency,
            transaction_code,
            payment_url: link.payment_url,
            qr_code_url: link.qr_code_url,
        })
    }

    /// Checks the whole snapshot and collects every problem instead of
    /// stopping at the first, so the user can fix their cart in one pass.
    async fn validate(
        &self,
        snapshot: &CartSnapshot,
        coupon_code: Option<&str>,
    ) -> Result<(Decimal, Option<CouponEvaluation>), ServiceError> {
        if snapshot.is_empty() {
            return Err(ServiceError::ValidationFailed(vec![
                "cart is empty".to_string(),
            ]));
        }

        let mut problems = Vec::new();

        for line in &snapshot.lines {
            if line.quantity <= 0 {
                problems.push(format!(
                    "item {} has non-positive quantity {}",
                    line.item_id, line.quantity
                ));
                continue;
            }

            let Some(product) = &line.product else {
                problems.push(format!("item {} is no longer in the catalog", line.item_id));
                continue;
            };

            if !product.is_available {
                problems.push(format!("'{}' is currently unavailable", product.title));
                continue;
            }

            let available = self
                .stock_ledger
                .available_quantity(line.item_id, self.settings.default_location_id)
                .await?;
            if available < line.quantity {
                problems.push(format!(
                    "only {} of '{}' in stock, {} requested",
                    available, product.title, line.quantity
                ));
            }
        }

        let subtotal = snapshot.subtotal();

        let coupon_eval = match coupon_code {
            Some(code) => {
                let eval = self.coupons.validate(code, subtotal).await?;
                if !eval.is_valid {
                    problems.push(format!("coupon '{}' is not valid", code));
                    None
                } else {
                    Some(eval)
                }
            }
            None => None,
        };

        if !problems.is_empty() {
            return Err(ServiceError::ValidationFailed(problems));
        }

        Ok((subtotal, coupon_eval))
    }

    /// Writes order, order lines, pending payment transaction, and the cart
    /// conversion in one transaction, then builds the gateway link.
    async fn persist_order(
        &self,
        order_id: Uuid,
        request: &CheckoutRequest,
        snapshot: &CartSnapshot,
        subtotal: Decimal,
        discount_total: Decimal,
        total_amount: Decimal,
    ) -> Result<(order::Model, String, PaymentLink), ServiceError> {
        let txn = self.db.begin().await?;

        let result = self
            .persist_order_on(
                &txn,
                order_id,
                request,
                snapshot,
                subtotal,
                discount_total,
                total_amount,
            )
            .await;

        match result {
            Ok(v) => {
                txn.commit().await?;
                Ok(v)
            }
            Err(e) => {
                txn.rollback().await?;
                Err(e)
            }
        }
    }

    async fn persist_order_on(
        &self,
        txn: &DatabaseTransaction,
        order_id: Uuid,
        request: &CheckoutRequest,
        snapshot: &CartSnapshot,
        subtotal: Decimal,
        discount_total: Decimal,
        total_amount: Decimal,
    ) -> Result<(order::Model, String, PaymentLink), ServiceError> {
        let order = order::ActiveModel {
            id: Set(order_id),
            order_number: Set(generate_order_number()),
            user_id: Set(request.user_id),
            status: Set(OrderStatus::PaymentPending.as_str().to_string()),
            subtotal: Set(subtotal),
            discount_total: Set(discount_total),
            total_amount: Set(total_amount),
            currency: Set(self.settings.currency.clone()),
            coupon_code: Set(request.coupon_code.clone()),
            shipping_address: Set(request.shipping_address.clone()),
            created_at: Set(Utc::now()),
            updated_at: Set(None),
        };
        let order = order.insert(txn).await?;

        for line in &snapshot.lines {
            let item = order_item::ActiveModel {
                id: Set(Uuid::new_v4()),
                order_id: Set(order.id),
                item_id: Set(line.item_id),
                quantity: Set(line.quantity),
                unit_price: Set(line.unit_price()),
                line_total: Set(line.line_total()),
                created_at: Set(Utc::now()),
                updated_at: Set(None),
            };
            item.insert(txn).await?;
        }

        let transaction = self.payments.create_pending_transaction(txn, &order).await?;
        let link = self
            .payments
            .build_payment_link(&order, &transaction.transaction_code)?;

        self.carts.clear_on(txn, request.user_id).await?;

        Ok((order, transaction.transaction_code, link))
    }

    async fn emit_failure(&self, user_id: Uuid, error: &ServiceError) {
        if let Err(e) = self
            .event_sender
            .send(Event::CheckoutFailed {
                user_id,
                reason: error.response_message(),
            })
            .await
        {
            warn!(error = %e, "Failed to emit checkout event");
        }
    }
}

fn generate_order_number() -> String {
    let suffix: String = rand::thread_rng()
        .sample_iter(&Alphanumeric)
        .take(10)
        .map(char::from)
        .collect();
    format!("ORD-{}", suffix.to_uppercase())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn order_numbers_carry_prefix_and_are_distinct() {
        let a = generate_order_number();
        let b = generate_order_number();
        assert!(a.starts_with("ORD-"));
        assert_eq!(a.len(), 14);
        assert_ne!(a, b);
    }
}
