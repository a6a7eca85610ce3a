use chrono::Utc;
use rand::distributions::Alphanumeric;
use rand::Rng;
use rust_decimal::Decimal;
use sea_orm::{
    ActiveModelTrait, ColumnTrait, ConnectionTrait, DatabaseConnection, EntityTrait, QueryFilter,
    Set, TransactionTrait,
};
use serde::Serialize;
use std::sync::Arc;
use tracing::{info, instrument, warn};
use url::Url;
use uuid::Uuid;

use crate::entities::order::{self, Entity as OrderEntity, OrderStatus};
use crate::entities::payment_transaction::{
    self, Entity as PaymentTransactionEntity, PaymentStatus,
};
use crate::errors::ServiceError;
use crate::events::{Event, EventSender};
use crate::services::stock_ledger::StockLedgerService;

const TRANSACTION_CODE_LEN: usize = 16;

/// Redirect and QR targets for a pending transaction.
#[derive(Debug, Clone, Serialize)]
pub struct PaymentLink {
    pub payment_url: String,
    pub qr_code_url: String,
}

/// Terminal result a gateway may report. Parsing is case-insensitive; a
/// non-terminal status (`pending`, `processing`, ...) does not parse, so the
/// callback handler rejects it before anything mutates.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum GatewayStatus {
    Success,
    Completed,
    Failed,
    Cancelled,
}

impl GatewayStatus {
    pub fn parse(s: &str) -> Option<Self> {
        match s.to_ascii_lowercase().as_str() {
            "success" => Some(GatewayStatus::Success),
            "completed" => Some(GatewayStatus::Completed),
            "failed" => Some(GatewayStatus::Failed),
            "cancelled" => Some(GatewayStatus::Cancelled),
            _ => None,
        }
    }

    pub fn is_success(self) -> bool {
        matches!(self, GatewayStatus::Success | GatewayStatus::Completed)
    }

    fn payment_status(self) -> PaymentStatus {
        match self {
            GatewayStatus::Success | GatewayStatus::Completed => PaymentStatus::Success,
            GatewayStatus::Failed => PaymentStatus::Failed,
            GatewayStatus::Cancelled => PaymentStatus::Cancelled,
        }
    }
}

/// Result of processing one gateway callback. `replayed` is true when the
/// transaction was already terminal and nothing changed.
#[derive(Debug, Clone, Serialize)]
pub struct CallbackOutcome {
    pub order_id: Uuid,
    pub transaction_code: String,
    pub payment_status: PaymentStatus,
    pub order_status: OrderStatus,
    pub replayed: bool,
}

/// Payment-side of checkout: pending transactions, redirect links, and the
/// gateway callback that settles them.
#[derive(Clone)]
pub struct PaymentService {
    db: Arc<DatabaseConnection>,
    event_sender: EventSender,
    stock_ledger: StockLedgerService,
    gateway_base_url: String,
}

impl PaymentService {
    pub fn new(
        db: Arc<DatabaseConnection>,
        event_sender: EventSender,
        stock_ledger: StockLedgerService,
        gateway_base_url: String,
    ) -> Self {
        Self {
            db,
            event_sender,
            stock_ledger,
            gateway_base_url,
        }
    }

    /// Inserts the pending transaction for an order. Runs on the caller's
    /// connection so checkout can include it in the order transaction.
    pub async fn create_pending_transaction<C: ConnectionTrait>(
        &self,
        conn: &C,
        order: &order::Model,
    ) -> Result<payment_transaction::Model, ServiceError> {
        let transaction = payment_transaction::ActiveModel {
            order_id: Set(order.id),
            transaction_code: Set(generate_transaction_code()),
            provider: Set("gateway".to_string()),
            method: Set("redirect".to_string()),
            amount: Set(order.total_amount),
            status: Set(PaymentStatus::Pending.as_str().to_string()),
            raw_payload: Set(None),
            ..Default::default()
        };

        Ok(transaction.insert(conn).await?)
    }

    /// Builds the gateway redirect URL and its QR rendering for a pending
    /// transaction. Pure formatting, no stock side effect.
    pub fn build_payment_link(
        &self,
        order: &order::Model,
        transaction_code: &str,
    ) -> Result<PaymentLink, ServiceError> {
        let mut url = Url::parse(&self.gateway_base_url).map_err(|e| {
            ServiceError::DownstreamFailure(format!("invalid payment gateway URL: {}", e))
        })?;

        url.query_pairs_mut()
            .append_pair("code", transaction_code)
            .append_pair("order", &order.order_number)
            .append_pair("amount", &order.total_amount.to_string())
            .append_pair("currency", &order.currency);

        let payment_url = url.to_string();
        url.query_pairs_mut().append_pair("render", "qr");
        let qr_code_url = url.to_string();

        Ok(PaymentLink {
            payment_url,
            qr_code_url,
        })
    }

    /// Settles a gateway callback. A success status confirms the order's
    /// stock holds and marks the order paid; `failed` and `cancelled` release
    /// the holds and cancel the order, each recorded under its own
    /// transaction status. A transaction already in a terminal state is
    /// returned as-is, so replayed callbacks observe the first outcome
    /// without touching stock.
    #[instrument(skip(self, raw_payload))]
    pub async fn handle_callback(
        &self,
        transaction_code: &str,
        status: GatewayStatus,
        amount: Option<Decimal>,
        raw_payload: Option<String>,
    ) -> Result<CallbackOutcome, ServiceError> {
        let transaction = PaymentTransactionEntity::find()
            .filter(payment_transaction::Column::TransactionCode.eq(transaction_code))
            .one(&*self.db)
            .await?
            .ok_or_else(|| ServiceError::CallbackNotFound(transaction_code.to_string()))?;

        if let Some(amount) = amount {
            if amount != transaction.amount {
                return Err(ServiceError::ValidationError(format!(
                    "callback amount {} does not match transaction amount {}",
                    amount, transaction.amount
                )));
            }
        }

        let current_status = PaymentStatus::from_str(&transaction.status).ok_or_else(|| {
            ServiceError::InternalError(format!(
                "transaction {} has unknown status '{}'",
                transaction.id, transaction.status
            ))
        })?;

        let order = OrderEntity::find_by_id(transaction.order_id)
            .one(&*self.db)
            .await?
            .ok_or_else(|| {
                ServiceError::InternalError(format!(
                    "transaction {} references missing order {}",
                    transaction.id, transaction.order_id
                ))
            })?;

        if current_status.is_terminal() {
            info!(
                transaction_code = %transaction_code,
                status = %transaction.status,
                "Ignoring replayed payment callback"
            );
            let order_status = OrderStatus::from_str(&order.status)
                .unwrap_or(OrderStatus::Cancelled);
            return Ok(CallbackOutcome {
                order_id: order.id,
                transaction_code: transaction_code.to_string(),
                payment_status: current_status,
                order_status,
                replayed: true,
            });
        }

        let success = status.is_success();
        let payment_status = status.payment_status();
        let order_status = if success {
            OrderStatus::Paid
        } else {
            OrderStatus::Cancelled
        };

        // Stock settles first: the hold rows make confirm/release no-ops on a
        // retry, so a failure in the status flip below leaves the transaction
        // pending and the next replay finishes the job.
        if success {
            self.stock_ledger.confirm_order_holds(order.id).await?;
        } else {
            self.stock_ledger.release_order_holds(order.id).await?;
        }

        // Transaction and order reach their terminal states together.
        let order_id = order.id;
        let txn = self.db.begin().await?;

        let mut active: payment_transaction::ActiveModel = transaction.into();
        active.status = Set(payment_status.as_str().to_string());
        if raw_payload.is_some() {
            active.raw_payload = Set(raw_payload);
        }
        active.update(&txn).await?;

        let mut active_order: order::ActiveModel = order.into();
        active_order.status = Set(order_status.as_str().to_string());
        active_order.updated_at = Set(Some(Utc::now()));
        active_order.update(&txn).await?;

        txn.commit().await?;

        let event = if success {
            Event::PaymentSucceeded(order_id)
        } else {
            Event::PaymentFailed(order_id)
        };
        if let Err(e) = self.event_sender.send(event).await {
            warn!(error = %e, "Failed to emit payment event");
        }
        let order_event = if success {
            Event::OrderPaid(order_id)
        } else {
            Event::OrderCancelled(order_id)
        };
        if let Err(e) = self.event_sender.send(order_event).await {
            warn!(error = %e, "Failed to emit order event");
        }

        Ok(CallbackOutcome {
            order_id,
            transaction_code: transaction_code.to_string(),
            payment_status,
            order_status,
            replayed: false,
        })
    }
}

fn generate_transaction_code() -> String {
    rand::thread_rng()
        .sample_iter(&Alphanumeric)
        .take(TRANSACTION_CODE_LEN)
        .map(char::from)
        .collect::<String>()
        .to_uppercase()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn transaction_codes_are_distinct_and_sized() {
        let a = generate_transaction_code();
        let b = generate_transaction_code();
        assert_eq!(a.len(), TRANSACTION_CODE_LEN);
        assert_ne!(a, b);
        assert!(a.chars().all(|c| c.is_ascii_alphanumeric()));
    }

    #[test]
    fn gateway_status_parses_case_insensitively() {
        assert_eq!(GatewayStatus::parse("Success"), Some(GatewayStatus::Success));
        assert_eq!(
            GatewayStatus::parse("COMPLETED"),
            Some(GatewayStatus::Completed)
        );
        assert_eq!(GatewayStatus::parse("failed"), Some(GatewayStatus::Failed));
        assert_eq!(
            GatewayStatus::parse("Cancelled"),
            Some(GatewayStatus::Cancelled)
        );
        assert_eq!(GatewayStatus::parse("pending"), None);
        assert_eq!(GatewayStatus::parse("processing"), None);
    }

    #[test]
    fn gateway_status_maps_to_transaction_status() {
        assert!(GatewayStatus::Completed.is_success());
        assert!(!GatewayStatus::Cancelled.is_success());
        assert_eq!(
            GatewayStatus::Completed.payment_status(),
            PaymentStatus::Success
        );
        assert_eq!(GatewayStatus::Failed.payment_status(), PaymentStatus::Failed);
        assert_eq!(
            GatewayStatus::Cancelled.payment_status(),
            PaymentStatus::Cancelled
        );
    }
}
