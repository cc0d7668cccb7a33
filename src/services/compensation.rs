//! Cascade compensation for order removal.
//!
//! Cancelling or hard-deleting an order must put stock back exactly once and
//! scrub the order out of any working session. How much to put back is read
//! from the ledger itself (decrements minus restores already applied), never
//! from the order's status history, so cancel-then-hard-delete cannot restore
//! twice.

use std::collections::HashSet;
use std::sync::Arc;

use chrono::Utc;
use sea_orm::sea_query::Expr;
use sea_orm::{
    ActiveModelTrait, ColumnTrait, ConnectionTrait, EntityTrait, QueryFilter, Set,
    TransactionTrait,
};
use serde::Serialize;
use tracing::{info, instrument, warn};
use uuid::Uuid;

use crate::db::DbPool;
use crate::entities::{
    fulfillment_session, inventory_movement, order, order_item, packing_record, picking_item,
    return_request, session_order, MovementReason, OrderStatus,
};
use crate::errors::ServiceError;
use crate::events::{Event, EventSender};
use crate::services::inventory::InventoryService;
use crate::services::sessions::session_status;

/// How the order is being removed. Cancellation keeps the row around in a
/// terminal state; hard deletion purges it entirely.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum RemovalKind {
    Cancel,
    HardDelete,
}

impl RemovalKind {
    fn restore_reason(self) -> MovementReason {
        match self {
            RemovalKind::Cancel => MovementReason::RestoreOnCancel,
            RemovalKind::HardDelete => MovementReason::RestoreOnHardDelete,
        }
    }
}

/// What a removal actually did: `removed` is false for idempotent replays,
/// and `restored` lists the ledger rows appended this time around.
#[derive(Clone, Debug, Serialize)]
pub struct RemovalReport {
    pub order_id: Uuid,
    pub removed: bool,
    pub restored: Vec<inventory_movement::Model>,
}

#[derive(Clone)]
pub struct CompensationService {
    db_pool: Arc<DbPool>,
    event_sender: Option<Arc<EventSender>>,
    inventory: InventoryService,
}

impl CompensationService {
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

    /// Removes an order, restoring whatever stock the ledger still owes it
    /// and detaching it from working sessions.
    ///
    /// Replays are no-ops: cancelling a cancelled order and hard-deleting a
    /// missing order both report `removed: false` with nothing restored.
    #[instrument(skip(self))]
    pub async fn remove_order(
        &self,
        order_id: Uuid,
        kind: RemovalKind,
    ) -> Result<RemovalReport, ServiceError> {
        let order = order::Entity::find_by_id(order_id)
            .one(&*self.db_pool)
            .await
            .map_err(ServiceError::DatabaseError)?;

        let current = match (order, kind) {
            (Some(order), _) => order,
            (None, RemovalKind::HardDelete) => {
                info!(%order_id, "hard delete replay, order already gone");
                return Ok(RemovalReport {
                    order_id,
                    removed: false,
                    restored: Vec::new(),
                });
            }
            (None, RemovalKind::Cancel) => {
                return Err(ServiceError::NotFound(format!(
                    "Order {} not found",
                    order_id
                )));
            }
        };

        if kind == RemovalKind::Cancel && current.status() == Some(OrderStatus::Cancelled) {
            info!(%order_id, "cancel replay, order already cancelled");
            return Ok(RemovalReport {
                order_id,
                removed: false,
                restored: Vec::new(),
            });
        }

        // Lock only the products the ledger still owes something for. The
        // outstanding set is recomputed inside the transaction; this pass
        // just decides which locks to take.
        let outstanding = self.inventory.outstanding_restorations(order_id).await?;
        let product_ids: Vec<Uuid> = outstanding.iter().map(|(p, _)| *p).collect();
        let _guards = if product_ids.is_empty() {
            None
        } else {
            Some(
                self.inventory
                    .locks()
                    .try_acquire_many(&product_ids)
                    .ok_or_else(|| {
                        ServiceError::Conflict(format!(
                            "Stock for order {} is locked by another in-flight operation",
                            order_id
                        ))
                    })?,
            )
        };

        let txn = self
            .db_pool
            .begin()
            .await
            .map_err(ServiceError::DatabaseError)?;

        if kind == RemovalKind::Cancel {
            // Claim the transition so a racing completion or a second cancel
            // loses cleanly instead of interleaving.
            let claimed = order::Entity::update_many()
                .col_expr(
                    order::Column::Status,
                    Expr::value(OrderStatus::Cancelled.as_str()),
                )
                .col_expr(order::Column::ArchivedAt, Expr::value(Some(Utc::now())))
                .col_expr(order::Column::UpdatedAt, Expr::value(Utc::now()))
                .filter(order::Column::Id.eq(order_id))
                .filter(order::Column::Status.is_in([
                    OrderStatus::Confirmed.as_str(),
                    OrderStatus::InPreparation.as_str(),
                    OrderStatus::ReadyToShip.as_str(),
                ]))
                .exec(&txn)
                .await
                .map_err(ServiceError::DatabaseError)?;
            if claimed.rows_affected != 1 {
                return Err(ServiceError::Conflict(format!(
                    "Order {} changed status concurrently",
                    order_id
                )));
            }
        }

        let restored = self
            .inventory
            .restore_lines(&txn, order_id, kind.restore_reason())
            .await?;

        // The outstanding set is recomputed inside the transaction, so a
        // packing completion that committed a decrement between the lock
        // pass and here could widen it past the locks we hold. Dropping the
        // transaction rolls the restoration back; the caller retries.
        let locked: HashSet<Uuid> = product_ids.iter().copied().collect();
        if let Some(product_id) = unlocked_restoration(&restored, &locked) {
            return Err(ServiceError::Conflict(format!(
                "Stock for product {} changed while removing order {}",
                product_id, order_id
            )));
        }

        self.detach_from_sessions(&txn, order_id, kind).await?;

        return_request::Entity::delete_many()
            .filter(return_request::Column::OrderId.eq(order_id))
            .exec(&txn)
            .await
            .map_err(ServiceError::DatabaseError)?;

        if kind == RemovalKind::HardDelete {
            order_item::Entity::delete_many()
                .filter(order_item::Column::OrderId.eq(order_id))
                .exec(&txn)
                .await
                .map_err(ServiceError::DatabaseError)?;
            order::Entity::delete_by_id(order_id)
                .exec(&txn)
                .await
                .map_err(ServiceError::DatabaseError)?;
        }

        txn.commit().await.map_err(ServiceError::DatabaseError)?;

        for movement in &restored {
            self.notify(Event::StockRestored {
                product_id: movement.product_id,
                order_id,
                quantity: movement.quantity_delta,
                stock_after: movement.stock_after,
                reason: movement.reason.clone(),
            })
            .await;
        }
        match kind {
            RemovalKind::Cancel => self.notify(Event::OrderCancelled(order_id)).await,
            RemovalKind::HardDelete => self.notify(Event::OrderPurged(order_id)).await,
        }

        Ok(RemovalReport {
            order_id,
            removed: true,
            restored,
        })
    }

    /// Scrubs the order out of sessions. Working sessions get their picking
    /// aggregate shrunk by the order's line quantities and the order's
    /// packing records deleted; a hard delete additionally purges membership
    /// rows left behind by terminal sessions.
    async fn detach_from_sessions<C: ConnectionTrait>(
        &self,
        conn: &C,
        order_id: Uuid,
        kind: RemovalKind,
    ) -> Result<(), ServiceError> {
        let memberships = session_order::Entity::find()
            .filter(session_order::Column::OrderId.eq(order_id))
            .all(conn)
            .await
            .map_err(ServiceError::DatabaseError)?;
        if memberships.is_empty() {
            return Ok(());
        }

        let items = order_item::Entity::find()
            .filter(order_item::Column::OrderId.eq(order_id))
            .all(conn)
            .await
            .map_err(ServiceError::DatabaseError)?;

        for membership in memberships {
            let session = fulfillment_session::Entity::find_by_id(membership.session_id)
                .one(conn)
                .await
                .map_err(ServiceError::DatabaseError)?
                .ok_or_else(|| {
                    ServiceError::IntegrityError(format!(
                        "Membership points at missing session {}",
                        membership.session_id
                    ))
                })?;

            if !session_status(&session)?.is_terminal() {
                packing_record::Entity::delete_many()
                    .filter(packing_record::Column::SessionId.eq(session.id))
                    .filter(packing_record::Column::OrderId.eq(order_id))
                    .exec(conn)
                    .await
                    .map_err(ServiceError::DatabaseError)?;

                for item in &items {
                    self.shrink_picking_item(conn, session.id, item.product_id, item.quantity)
                        .await?;
                }

                session_order::Entity::delete_by_id((session.id, order_id))
                    .exec(conn)
                    .await
                    .map_err(ServiceError::DatabaseError)?;
            } else if kind == RemovalKind::HardDelete {
                // Terminal sessions keep no per-order rows beyond membership;
                // a purge removes that last reference too.
                session_order::Entity::delete_by_id((session.id, order_id))
                    .exec(conn)
                    .await
                    .map_err(ServiceError::DatabaseError)?;
            }
        }
        Ok(())
    }

    async fn shrink_picking_item<C: ConnectionTrait>(
        &self,
        conn: &C,
        session_id: Uuid,
        product_id: Uuid,
        quantity: i32,
    ) -> Result<(), ServiceError> {
        let Some(item) = picking_item::Entity::find()
            .filter(picking_item::Column::SessionId.eq(session_id))
            .filter(picking_item::Column::ProductId.eq(product_id))
            .one(conn)
            .await
            .map_err(ServiceError::DatabaseError)?
        else {
            return Ok(());
        };

        let required = item.required_quantity - quantity;
        if required <= 0 {
            picking_item::Entity::delete_by_id(item.id)
                .exec(conn)
                .await
                .map_err(ServiceError::DatabaseError)?;
            return Ok(());
        }

        // Already-picked units above the shrunken requirement go back on the
        // shelf physically; the aggregate just clamps.
        let picked = item.picked_quantity.min(required);
        let mut active: picking_item::ActiveModel = item.into();
        active.required_quantity = Set(required);
        active.picked_quantity = Set(picked);
        active.updated_at = Set(Some(Utc::now()));
        active
            .update(conn)
            .await
            .map_err(ServiceError::DatabaseError)?;
        Ok(())
    }
}

/// Returns a product whose restoration row is not covered by a held lock,
/// if any. Restorations touching unlocked products mean the ledger grew
/// between lock acquisition and the transaction.
fn unlocked_restoration(
    restored: &[inventory_movement::Model],
    locked: &HashSet<Uuid>,
) -> Option<Uuid> {
    restored
        .iter()
        .map(|movement| movement.product_id)
        .find(|product_id| !locked.contains(product_id))
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Utc;

    fn restore_row(product_id: Uuid) -> inventory_movement::Model {
        inventory_movement::Model {
            id: Uuid::new_v4(),
            product_id,
            order_id: Some(Uuid::new_v4()),
            reason: MovementReason::RestoreOnCancel.as_str().to_string(),
            quantity_delta: 2,
            stock_before: 3,
            stock_after: 5,
            created_at: Utc::now(),
        }
    }

    #[test]
    fn restorations_within_the_locked_set_pass() {
        let a = Uuid::new_v4();
        let b = Uuid::new_v4();
        let locked: HashSet<Uuid> = [a, b].into_iter().collect();
        let restored = vec![restore_row(a), restore_row(b)];
        assert_eq!(unlocked_restoration(&restored, &locked), None);
    }

    #[test]
    fn a_restoration_outside_the_locked_set_is_flagged() {
        let a = Uuid::new_v4();
        let stranger = Uuid::new_v4();
        let locked: HashSet<Uuid> = [a].into_iter().collect();
        let restored = vec![restore_row(a), restore_row(stranger)];
        assert_eq!(unlocked_restoration(&restored, &locked), Some(stranger));
    }

    #[test]
    fn an_empty_restoration_needs_no_locks() {
        let locked = HashSet::new();
        assert_eq!(unlocked_restoration(&[], &locked), None);
    }
}
