use chrono::Utc;
use sea_orm::{ColumnTrait, DatabaseConnection, EntityTrait, QueryFilter};
use std::sync::Arc;
use std::time::Duration;
use tracing::{error, info, instrument, warn};

use crate::entities::stock_reservation::{self, Entity as StockReservationEntity, ReservationStatus};
use crate::errors::ServiceError;
use crate::events::{Event, EventSender};
use crate::services::stock_ledger::StockLedgerService;

/// Background task that reclaims holds whose checkout never settled. A
/// reservation past its deadline goes back to available stock and the row is
/// marked expired, so a late payment callback cannot consume it.
#[derive(Clone)]
pub struct ReservationSweeper {
    db: Arc<DatabaseConnection>,
    stock_ledger: StockLedgerService,
    event_sender: EventSender,
}

impl ReservationSweeper {
    pub fn new(
        db: Arc<DatabaseConnection>,
        stock_ledger: StockLedgerService,
        event_sender: EventSender,
    ) -> Self {
        Self {
            db,
            stock_ledger,
            event_sender,
        }
    }

    /// Runs the sweep on a fixed interval until the process shuts down.
    pub async fn run(self, interval_secs: u64) {
        info!(interval_secs, "Reservation sweeper started");
        let mut ticker = tokio::time::interval(Duration::from_secs(interval_secs));
        ticker.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Skip);

        loop {
            ticker.tick().await;
            match self.sweep_once().await {
                Ok(0) => {}
                Ok(n) => info!(expired = n, "Reclaimed expired reservations"),
                Err(e) => error!(error = %e, "Reservation sweep failed"),
            }
        }
    }

    /// Releases every active reservation past its deadline. Returns how many
    /// were reclaimed.
    #[instrument(skip(self))]
    pub async fn sweep_once(&self) -> Result<usize, ServiceError> {
        let now = Utc::now();

        let expired = StockReservationEntity::find()
            .filter(stock_reservation::Column::Status.eq(ReservationStatus::Active.as_str()))
            .filter(stock_reservation::Column::ExpiresAt.lte(now))
            .all(&*self.db)
            .await?;

        let mut reclaimed = 0;
        for reservation in expired {
            if let Err(e) = self
                .stock_ledger
                .release(
                    reservation.item_id,
                    reservation.location_id,
                    reservation.quantity,
                )
                .await
            {
                warn!(
                    reservation_id = %reservation.id,
                    error = %e,
                    "Could not release expired reservation, will retry next sweep"
                );
                continue;
            }

            let reservation_id = reservation.id;
            let item_id = reservation.item_id;
            let quantity = reservation.quantity;
            self.stock_ledger
                .mark_reservation(reservation, ReservationStatus::Expired)
                .await?;

            if let Err(e) = self
                .event_sender
                .send(Event::ReservationExpired {
                    reservation_id,
                    item_id,
                    quantity,
                })
                .await
            {
                warn!(error = %e, "Failed to emit expiry event");
            }

            reclaimed += 1;
        }

        Ok(reclaimed)
    }
}
