use chrono::{Duration, Utc};
use sea_orm::sea_query::Expr;
use sea_orm::{
    ActiveModelTrait, ColumnTrait, ConnectionTrait, DatabaseConnection, EntityTrait, QueryFilter,
    Set, TransactionTrait,
};
use std::sync::Arc;
use tracing::{instrument, warn};
use uuid::Uuid;

use crate::entities::stock_record::{self, Entity as StockRecordEntity};
use crate::entities::stock_reservation::{self, ReservationStatus};
use crate::errors::ServiceError;
use crate::events::{Event, EventSender};

/// One line of a multi-line reservation request, in declaration order.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ReservationLine {
    pub item_id: Uuid,
    pub location_id: Uuid,
    pub quantity: i32,
}

/// Service owning the per-(item, location) stock ledger.
///
/// The check-then-increment of `reserve` is a single conditional UPDATE, so
/// the row write lock makes it atomic with respect to concurrent reserves:
/// two reservations whose combined quantity exceeds availability can never
/// both match the `available >= quantity` predicate.
#[derive(Clone)]
pub struct StockLedgerService {
    db: Arc<DatabaseConnection>,
    event_sender: EventSender,
}

impl StockLedgerService {
    pub fn new(db: Arc<DatabaseConnection>, event_sender: EventSender) -> Self {
        Self { db, event_sender }
    }

    /// Attempts to place a hold on `quantity` units. Returns `false` without
    /// mutating anything when available stock is insufficient or the record
    /// does not exist.
    #[instrument(skip(self))]
    pub async fn reserve(
        &self,
        item_id: Uuid,
        location_id: Uuid,
        quantity: i32,
    ) -> Result<bool, ServiceError> {
        require_positive(quantity)?;

        let reserved = Self::try_reserve_on(&*self.db, item_id, location_id, quantity).await?;

        if reserved {
            self.emit(Event::StockReserved {
                item_id,
                location_id,
                quantity,
            })
            .await;
        }

        Ok(reserved)
    }

    /// Reserves every line or none: the whole loop runs in one transaction,
    /// so a line that fails rolls back every earlier line structurally rather
    /// than by compensation. Reservation rows with the given TTL are written
    /// in the same transaction.
    #[instrument(skip(self, lines), fields(line_count = lines.len()))]
    pub async fn reserve_all(
        &self,
        lines: &[ReservationLine],
        order_id: Option<Uuid>,
        ttl_secs: u64,
    ) -> Result<(), ServiceError> {
        for line in lines {
            require_positive(line.quantity)?;
        }

        let txn = self.db.begin().await?;

        for line in lines {
            let reserved =
                Self::try_reserve_on(&txn, line.item_id, line.location_id, line.quantity).await?;
            if !reserved {
                txn.rollback().await?;
                return Err(ServiceError::ReservationConflict(format!(
                    "item {} sold out during checkout",
                    line.item_id
                )));
            }
        }

        let expires_at = Utc::now() + Duration::seconds(ttl_secs as i64);
        for line in lines {
            let reservation = stock_reservation::ActiveModel {
                item_id: Set(line.item_id),
                location_id: Set(line.location_id),
                quantity: Set(line.quantity),
                status: Set(ReservationStatus::Active.as_str().to_string()),
                order_id: Set(order_id),
                expires_at: Set(Some(expires_at)),
                ..Default::default()
            };
            reservation.insert(&txn).await?;
        }

        txn.commit().await?;

        for line in lines {
            self.emit(Event::StockReserved {
                item_id: line.item_id,
                location_id: line.location_id,
                quantity: line.quantity,
            })
            .await;
        }

        Ok(())
    }

    /// Gives back a hold. Clamped at zero and safe to call after partial
    /// failures; over-release is never an error.
    #[instrument(skip(self))]
    pub async fn release(
        &self,
        item_id: Uuid,
        location_id: Uuid,
        quantity: i32,
    ) -> Result<(), ServiceError> {
        require_positive(quantity)?;

        let result = StockRecordEntity::update_many()
            .col_expr(
                stock_record::Column::QuantityReserved,
                Expr::col(stock_record::Column::QuantityReserved).sub(quantity),
            )
            .col_expr(stock_record::Column::UpdatedAt, Expr::value(Utc::now()))
            .filter(stock_record::Column::ItemId.eq(item_id))
            .filter(stock_record::Column::LocationId.eq(location_id))
            .filter(stock_record::Column::QuantityReserved.gte(quantity))
            .exec(&*self.db)
            .await?;

        if result.rows_affected == 0 {
            // Over-release: clamp whatever is still held to zero.
            StockRecordEntity::update_many()
                .col_expr(stock_record::Column::QuantityReserved, Expr::value(0))
                .col_expr(stock_record::Column::UpdatedAt, Expr::value(Utc::now()))
                .filter(stock_record::Column::ItemId.eq(item_id))
                .filter(stock_record::Column::LocationId.eq(location_id))
                .filter(stock_record::Column::QuantityReserved.lt(quantity))
                .exec(&*self.db)
                .await?;
        }

        self.emit(Event::StockReleased {
            item_id,
            location_id,
            quantity,
        })
        .await;

        Ok(())
    }

    /// Converts a hold into a permanent deduction after payment success:
    /// both counters drop by `quantity`.
    #[instrument(skip(self))]
    pub async fn confirm_sale(
        &self,
        item_id: Uuid,
        location_id: Uuid,
        quantity: i32,
    ) -> Result<(), ServiceError> {
        require_positive(quantity)?;

        let result = StockRecordEntity::update_many()
            .col_expr(
                stock_record::Column::QuantityOnHand,
                Expr::col(stock_record::Column::QuantityOnHand).sub(quantity),
            )
            .col_expr(
                stock_record::Column::QuantityReserved,
                Expr::col(stock_record::Column::QuantityReserved).sub(quantity),
            )
            .col_expr(stock_record::Column::UpdatedAt, Expr::value(Utc::now()))
            .filter(stock_record::Column::ItemId.eq(item_id))
            .filter(stock_record::Column::LocationId.eq(location_id))
            .filter(stock_record::Column::QuantityReserved.gte(quantity))
            .filter(stock_record::Column::QuantityOnHand.gte(quantity))
            .exec(&*self.db)
            .await?;

        if result.rows_affected == 0 {
            return Err(ServiceError::InvalidOperation(format!(
                "cannot confirm sale of {} units of item {} at location {}: no matching hold",
                quantity, item_id, location_id
            )));
        }

        self.emit(Event::SaleConfirmed {
            item_id,
            location_id,
            quantity,
        })
        .await;

        Ok(())
    }

    /// Quantity still reservable; missing records count as zero.
    #[instrument(skip(self))]
    pub async fn available_quantity(
        &self,
        item_id: Uuid,
        location_id: Uuid,
    ) -> Result<i32, ServiceError> {
        let record = self.get_record(item_id, location_id).await?;
        Ok(record.map(|r| r.available_quantity()).unwrap_or(0))
    }

    /// Fetches the ledger row for an (item, location) pair.
    pub async fn get_record(
        &self,
        item_id: Uuid,
        location_id: Uuid,
    ) -> Result<Option<stock_record::Model>, ServiceError> {
        let record = StockRecordEntity::find()
            .filter(stock_record::Column::ItemId.eq(item_id))
            .filter(stock_record::Column::LocationId.eq(location_id))
            .one(&*self.db)
            .await?;

        Ok(record)
    }

    /// Sets the on-hand level for an (item, location) pair, creating the
    /// record when the item is first stocked at the location.
    #[instrument(skip(self))]
    pub async fn set_level(
        &self,
        item_id: Uuid,
        location_id: Uuid,
        quantity_on_hand: i32,
    ) -> Result<stock_record::Model, ServiceError> {
        if quantity_on_hand < 0 {
            return Err(ServiceError::ValidationError(
                "quantity_on_hand must not be negative".to_string(),
            ));
        }

        match self.get_record(item_id, location_id).await? {
            Some(existing) => {
                if quantity_on_hand < existing.quantity_reserved {
                    return Err(ServiceError::InvalidOperation(format!(
                        "cannot set on-hand below the {} units currently reserved",
                        existing.quantity_reserved
                    )));
                }
                let mut active: stock_record::ActiveModel = existing.into();
                active.quantity_on_hand = Set(quantity_on_hand);
                active.updated_at = Set(Some(Utc::now()));
                Ok(active.update(&*self.db).await?)
            }
            None => {
                let record = stock_record::ActiveModel {
                    id: Set(Uuid::new_v4()),
                    item_id: Set(item_id),
                    location_id: Set(location_id),
                    quantity_on_hand: Set(quantity_on_hand),
                    quantity_reserved: Set(0),
                    created_at: Set(Utc::now()),
                    updated_at: Set(None),
                };
                Ok(record.insert(&*self.db).await?)
            }
        }
    }

    /// Releases every active hold an order placed. Used by checkout
    /// compensation and by failed-payment callbacks.
    #[instrument(skip(self))]
    pub async fn release_order_holds(&self, order_id: Uuid) -> Result<(), ServiceError> {
        let holds = self.active_holds_for_order(order_id).await?;

        for hold in holds {
            self.release(hold.item_id, hold.location_id, hold.quantity)
                .await?;
            self.mark_reservation(hold, ReservationStatus::Released)
                .await?;
        }

        Ok(())
    }

    /// Converts every active hold an order placed into a permanent deduction.
    /// A line that no longer has a matching hold is logged and skipped so a
    /// retried callback cannot double-decrement.
    #[instrument(skip(self))]
    pub async fn confirm_order_holds(&self, order_id: Uuid) -> Result<(), ServiceError> {
        let holds = self.active_holds_for_order(order_id).await?;

        for hold in holds {
            if let Err(e) = self
                .confirm_sale(hold.item_id, hold.location_id, hold.quantity)
                .await
            {
                warn!(
                    order_id = %order_id,
                    item_id = %hold.item_id,
                    error = %e,
                    "Skipping sale confirmation for order line"
                );
                continue;
            }
            self.mark_reservation(hold, ReservationStatus::Consumed)
                .await?;
        }

        Ok(())
    }

    async fn active_holds_for_order(
        &self,
        order_id: Uuid,
    ) -> Result<Vec<stock_reservation::Model>, ServiceError> {
        let holds = stock_reservation::Entity::find()
            .filter(stock_reservation::Column::OrderId.eq(order_id))
            .filter(stock_reservation::Column::Status.eq(ReservationStatus::Active.as_str()))
            .all(&*self.db)
            .await?;

        Ok(holds)
    }

    pub(crate) async fn mark_reservation(
        &self,
        reservation: stock_reservation::Model,
        status: ReservationStatus,
    ) -> Result<(), ServiceError> {
        let mut active: stock_reservation::ActiveModel = reservation.into();
        active.status = Set(status.as_str().to_string());
        active.updated_at = Set(Some(Utc::now()));
        active.update(&*self.db).await?;
        Ok(())
    }

    /// Conditional increment of the reserved counter; the predicate and the
    /// increment execute as one statement.
    async fn try_reserve_on<C: ConnectionTrait>(
        conn: &C,
        item_id: Uuid,
        location_id: Uuid,
        quantity: i32,
    ) -> Result<bool, ServiceError> {
        let result = StockRecordEntity::update_many()
            .col_expr(
                stock_record::Column::QuantityReserved,
                Expr::col(stock_record::Column::QuantityReserved).add(quantity),
            )
            .col_expr(stock_record::Column::UpdatedAt, Expr::value(Utc::now()))
            .filter(stock_record::Column::ItemId.eq(item_id))
            .filter(stock_record::Column::LocationId.eq(location_id))
            .filter(
                Expr::expr(
                    Expr::col(stock_record::Column::QuantityOnHand)
                        .sub(Expr::col(stock_record::Column::QuantityReserved)),
                )
                .gte(quantity),
            )
            .exec(conn)
            .await?;

        Ok(result.rows_affected > 0)
    }

    async fn emit(&self, event: Event) {
        if let Err(e) = self.event_sender.send(event).await {
            warn!(error = %e, "Failed to emit stock event");
        }
    }
}

fn require_positive(quantity: i32) -> Result<(), ServiceError> {
    if quantity <= 0 {
        return Err(ServiceError::ValidationError(
            "quantity must be positive".to_string(),
        ));
    }
    Ok(())
}
