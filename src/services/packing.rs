//! Packing tracker and the stock-reserving order completion it triggers.
//!
//! Packing is tracked per (order, product) as a completed flag with no
//! quantity of its own; the quantities live on the order lines. Marking the
//! last record of an order automatically runs order completion, which claims
//! the order and reserves stock for all of its lines in one transaction.

use std::sync::Arc;

use chrono::Utc;
use sea_orm::sea_query::Expr;
use sea_orm::{ActiveModelTrait, ColumnTrait, EntityTrait, QueryFilter, Set, TransactionTrait};
use serde::Serialize;
use tracing::{instrument, warn};
use uuid::Uuid;

use crate::db::DbPool;
use crate::entities::{order, order_item, packing_record, OrderStatus, SessionStatus};
use crate::errors::ServiceError;
use crate::events::{Event, EventSender};
use crate::services::inventory::InventoryService;
use crate::services::sessions::{find_session_on, session_status};

/// Result of a packing report: the updated record, and whether this report
/// was the one that completed the whole order.
#[derive(Clone, Debug, Serialize)]
pub struct PackingOutcome {
    pub record: packing_record::Model,
    pub order_completed: bool,
}

#[derive(Clone)]
pub struct PackingService {
    db_pool: Arc<DbPool>,
    event_sender: Option<Arc<EventSender>>,
    inventory: InventoryService,
}

impl PackingService {
    pub fn new(
        db_pool: Arc<DbPool>,
        event_sender: Option<Arc<EventSender>>,
        inventory: InventoryService,
    ) -> Self {
        Self {
            db_pool,
            event_sender,
            inventory,
        }
    }

    async fn notify(&self, event: Event) {
        if let Some(sender) = &self.event_sender {
            if let Err(e) = sender.send(event).await {
                warn!("Failed to publish event: {}", e);
            }
        }
    }

    /// Marks one (order, product) of the session as packed. Reporting an
    /// already-packed record is a no-op, except that it re-attempts order
    /// completion when the order is fully packed but a previous completion
    /// failed (for example on a lock conflict).
    #[instrument(skip(self))]
    pub async fn report_packed(
        &self,
        session_id: Uuid,
        order_id: Uuid,
        product_id: Uuid,
    ) -> Result<PackingOutcome, ServiceError> {
        let session = find_session_on(&*self.db_pool, session_id).await?;
        let status = session_status(&session)?;
        if status != SessionStatus::Packing {
            return Err(ServiceError::PreconditionFailed(format!(
                "Session {} is not packing (status {})",
                session.code, session.status
            )));
        }

        let record = packing_record::Entity::find()
            .filter(packing_record::Column::SessionId.eq(session_id))
            .filter(packing_record::Column::OrderId.eq(order_id))
            .filter(packing_record::Column::ProductId.eq(product_id))
            .one(&*self.db_pool)
            .await
            .map_err(ServiceError::DatabaseError)?
            .ok_or_else(|| {
                ServiceError::ValidationError(format!(
                    "No packing line for order {} / product {} in session {}",
                    order_id, product_id, session.code
                ))
            })?;

        let record = if record.completed {
            record
        } else {
            let mut active: packing_record::ActiveModel = record.into();
            active.completed = Set(true);
            active.updated_at = Set(Some(Utc::now()));
            active
                .update(&*self.db_pool)
                .await
                .map_err(ServiceError::DatabaseError)?
        };

        let remaining = packing_record::Entity::find()
            .filter(packing_record::Column::SessionId.eq(session_id))
            .filter(packing_record::Column::OrderId.eq(order_id))
            .filter(packing_record::Column::Completed.eq(false))
            .all(&*self.db_pool)
            .await
            .map_err(ServiceError::DatabaseError)?;

        let order_completed = if remaining.is_empty() {
            self.complete_order(session.store_id, order_id).await?
        } else {
            false
        };

        Ok(PackingOutcome {
            record,
            order_completed,
        })
    }

    /// Claims the order and reserves stock for every line, all or nothing.
    /// Returns `true` when the order reached ready-to-ship (either now or on
    /// an earlier call).
    #[instrument(skip(self))]
    async fn complete_order(&self, store_id: Uuid, order_id: Uuid) -> Result<bool, ServiceError> {
        let order = order::Entity::find_by_id(order_id)
            .one(&*self.db_pool)
            .await
            .map_err(ServiceError::DatabaseError)?
            .ok_or_else(|| ServiceError::NotFound(format!("Order {} not found", order_id)))?;

        match order.status() {
            Some(OrderStatus::ReadyToShip) => return Ok(true),
            Some(OrderStatus::InPreparation) => {}
            Some(other) => {
                return Err(ServiceError::Conflict(format!(
                    "Order {} cannot complete from status {}",
                    order.order_number,
                    other.as_str()
                )));
            }
            None => {
                return Err(ServiceError::IntegrityError(format!(
                    "Order {} has unknown status '{}'",
                    order.id, order.status
                )));
            }
        }

        let items = order_item::Entity::find()
            .filter(order_item::Column::OrderId.eq(order_id))
            .all(&*self.db_pool)
            .await
            .map_err(ServiceError::DatabaseError)?;
        if items.is_empty() {
            return Err(ServiceError::IntegrityError(format!(
                "Order {} has no line items",
                order_id
            )));
        }

        let product_ids: Vec<Uuid> = items.iter().map(|i| i.product_id).collect();
        let _guards = self
            .inventory
            .locks()
            .try_acquire_many(&product_ids)
            .ok_or_else(|| {
                ServiceError::Conflict(format!(
                    "Stock for order {} is locked by another in-flight operation",
                    order_id
                ))
            })?;

        let txn = self
            .db_pool
            .begin()
            .await
            .map_err(ServiceError::DatabaseError)?;

        // Claim first: a concurrent cancel or a duplicate completion loses
        // the claim and rolls back without touching stock.
        let claimed = order::Entity::update_many()
            .col_expr(
                order::Column::Status,
                Expr::value(OrderStatus::ReadyToShip.as_str()),
            )
            .col_expr(order::Column::UpdatedAt, Expr::value(Utc::now()))
            .filter(order::Column::Id.eq(order_id))
            .filter(order::Column::Status.eq(OrderStatus::InPreparation.as_str()))
            .exec(&txn)
            .await
            .map_err(ServiceError::DatabaseError)?;
        if claimed.rows_affected != 1 {
            return Err(ServiceError::Conflict(format!(
                "Order {} was claimed concurrently",
                order_id
            )));
        }

        let mut decremented = Vec::with_capacity(items.len());
        for item in &items {
            let (movement, created) = self
                .inventory
                .reserve_line(&txn, store_id, item.product_id, item.quantity, order_id)
                .await?;
            if created {
                decremented.push(movement);
            }
        }

        txn.commit().await.map_err(ServiceError::DatabaseError)?;

        for movement in decremented {
            self.notify(Event::StockDecremented {
                product_id: movement.product_id,
                order_id,
                quantity: -movement.quantity_delta,
                stock_after: movement.stock_after,
            })
            .await;
        }
        self.notify(Event::OrderReadyToShip(order_id)).await;
        Ok(true)
    }
}
