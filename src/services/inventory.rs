//! Stock validator and inventory ledger.
//!
//! Every stock mutation flows through this service: the fail-fast reservation
//! path used by packing completion, and the restoration path used by the
//! cascade compensator. Each mutation appends exactly one ledger row carrying
//! the before/after stock captured in the same transaction.

use std::collections::BTreeMap;
use std::sync::Arc;

use chrono::Utc;
use dashmap::DashMap;
use rust_decimal::Decimal;
use sea_orm::{
    ActiveModelTrait, ColumnTrait, ConnectionTrait, EntityTrait, QueryFilter, QueryOrder, Set,
    TransactionTrait,
};
use serde::Deserialize;
use tokio::sync::{Mutex, OwnedMutexGuard};
use tracing::{instrument, warn};
use uuid::Uuid;
use validator::Validate;

use crate::db::DbPool;
use crate::entities::{inventory_movement, product, MovementReason};
use crate::errors::ServiceError;
use crate::events::{Event, EventSender};

/// Registry of per-product exclusive locks. Reservation and restoration are
/// the only writers of `stock_on_hand`, and both must hold the product's lock
/// for the duration of their transaction.
///
/// Acquisition never blocks: a held lock means another reservation is in
/// flight and the caller gets `Conflict` instead of waiting, so contention
/// cannot cascade into latency or deadlock.
#[derive(Clone, Default)]
pub struct ProductLocks {
    locks: Arc<DashMap<Uuid, Arc<Mutex<()>>>>,
}

impl ProductLocks {
    pub fn new() -> Self {
        Self::default()
    }

    /// Returns `None` immediately when the product is locked elsewhere.
    pub fn try_acquire(&self, product_id: Uuid) -> Option<OwnedMutexGuard<()>> {
        let lock = self
            .locks
            .entry(product_id)
            .or_insert_with(|| Arc::new(Mutex::new(())))
            .clone();
        lock.try_lock_owned().ok()
    }

    /// Acquires the locks of all given products in sorted id order, or none
    /// at all: any contention releases the guards taken so far and yields
    /// `None`.
    pub fn try_acquire_many(&self, product_ids: &[Uuid]) -> Option<Vec<OwnedMutexGuard<()>>> {
        let mut ids = product_ids.to_vec();
        ids.sort();
        ids.dedup();

        let mut guards = Vec::with_capacity(ids.len());
        for id in ids {
            match self.try_acquire(id) {
                Some(guard) => guards.push(guard),
                None => return None,
            }
        }
        Some(guards)
    }
}

#[derive(Clone, Debug, Deserialize, Validate, utoipa::ToSchema)]
#[serde(deny_unknown_fields)]
pub struct CreateProductInput {
    pub store_id: Uuid,
    #[validate(length(min = 1, max = 64, message = "SKU must be between 1 and 64 characters"))]
    pub sku: String,
    #[validate(length(min = 1, max = 255, message = "Name must be between 1 and 255 characters"))]
    pub name: String,
    pub unit_price: Decimal,
    #[validate(range(min = 0, message = "Initial stock cannot be negative"))]
    pub initial_stock: i32,
}

#[derive(Clone)]
pub struct InventoryService {
    db_pool: Arc<DbPool>,
    event_sender: Option<Arc<EventSender>>,
    locks: ProductLocks,
}

impl InventoryService {
    pub fn new(
        db_pool: Arc<DbPool>,
        event_sender: Option<Arc<EventSender>>,
        locks: ProductLocks,
    ) -> Self {
        Self {
            db_pool,
            event_sender,
            locks,
        }
    }

    /// The shared lock registry, for callers that drive their own
    /// multi-product transaction (packing completion, compensation).
    pub fn locks(&self) -> ProductLocks {
        self.locks.clone()
    }

    async fn notify(&self, event: Event) {
        if let Some(sender) = &self.event_sender {
            if let Err(e) = sender.send(event).await {
                warn!("Failed to publish event: {}", e);
            }
        }
    }

    #[instrument(skip(self, input))]
    pub async fn create_product(
        &self,
        input: CreateProductInput,
    ) -> Result<product::Model, ServiceError> {
        input.validate()?;

        let model = product::ActiveModel {
            id: Set(Uuid::new_v4()),
            store_id: Set(input.store_id),
            sku: Set(input.sku),
            name: Set(input.name),
            unit_price: Set(input.unit_price),
            stock_on_hand: Set(input.initial_stock),
            created_at: Set(Utc::now()),
            updated_at: Set(None),
        }
        .insert(&*self.db_pool)
        .await
        .map_err(ServiceError::DatabaseError)?;

        self.notify(Event::ProductCreated(model.id)).await;
        Ok(model)
    }

    pub async fn get_product(&self, product_id: Uuid) -> Result<product::Model, ServiceError> {
        product::Entity::find_by_id(product_id)
            .one(&*self.db_pool)
            .await
            .map_err(ServiceError::DatabaseError)?
            .ok_or_else(|| ServiceError::NotFound(format!("Product {} not found", product_id)))
    }

    pub async fn list_products(&self, store_id: Uuid) -> Result<Vec<product::Model>, ServiceError> {
        product::Entity::find()
            .filter(product::Column::StoreId.eq(store_id))
            .order_by_asc(product::Column::Sku)
            .all(&*self.db_pool)
            .await
            .map_err(ServiceError::DatabaseError)
    }

    /// Reserves `quantity` units of a product for an order: the exactly-once,
    /// conflict-detecting decrement behind the order's transition to ready.
    ///
    /// Retries are safe: a movement already recorded for this
    /// (order, product) is returned unchanged. Contention on the product is
    /// reported as `Conflict` without waiting.
    #[instrument(skip(self))]
    pub async fn reserve(
        &self,
        store_id: Uuid,
        product_id: Uuid,
        quantity: i32,
        order_id: Uuid,
    ) -> Result<inventory_movement::Model, ServiceError> {
        if quantity <= 0 {
            return Err(ServiceError::ValidationError(format!(
                "Reservation quantity must be positive, got {}",
                quantity
            )));
        }

        if let Some(existing) = self
            .find_decrement(&*self.db_pool, order_id, product_id)
            .await?
        {
            return Ok(existing);
        }

        let _guard = self.locks.try_acquire(product_id).ok_or_else(|| {
            ServiceError::Conflict(format!(
                "Product {} is locked by another in-flight reservation",
                product_id
            ))
        })?;

        let txn = self
            .db_pool
            .begin()
            .await
            .map_err(ServiceError::DatabaseError)?;
        let (movement, created) = self
            .reserve_line(&txn, store_id, product_id, quantity, order_id)
            .await?;
        txn.commit().await.map_err(ServiceError::DatabaseError)?;

        if created {
            self.notify(Event::StockDecremented {
                product_id,
                order_id,
                quantity,
                stock_after: movement.stock_after,
            })
            .await;
        }
        Ok(movement)
    }

    /// Single reservation step inside a caller-owned transaction. The caller
    /// must hold the product's lock. Returns the movement and whether it was
    /// newly created (false on an idempotent replay).
    pub(crate) async fn reserve_line<C: ConnectionTrait>(
        &self,
        conn: &C,
        store_id: Uuid,
        product_id: Uuid,
        quantity: i32,
        order_id: Uuid,
    ) -> Result<(inventory_movement::Model, bool), ServiceError> {
        if quantity <= 0 {
            return Err(ServiceError::ValidationError(format!(
                "Reservation quantity must be positive, got {}",
                quantity
            )));
        }

        if let Some(existing) = self.find_decrement(conn, order_id, product_id).await? {
            return Ok((existing, false));
        }

        let product = product::Entity::find_by_id(product_id)
            .one(conn)
            .await
            .map_err(ServiceError::DatabaseError)?
            .ok_or_else(|| {
                ServiceError::IntegrityError(format!(
                    "Product {} disappeared during reservation",
                    product_id
                ))
            })?;
        if product.store_id != store_id {
            return Err(ServiceError::NotFound(format!(
                "Product {} not found in store {}",
                product_id, store_id
            )));
        }

        let stock_before = product.stock_on_hand;
        if stock_before < quantity {
            return Err(ServiceError::InsufficientStock {
                product_id,
                requested: quantity,
                available: stock_before,
            });
        }
        let stock_after = stock_before - quantity;

        let mut active: product::ActiveModel = product.into();
        active.stock_on_hand = Set(stock_after);
        active.updated_at = Set(Some(Utc::now()));
        active
            .update(conn)
            .await
            .map_err(ServiceError::DatabaseError)?;

        let movement = inventory_movement::ActiveModel {
            id: Set(Uuid::new_v4()),
            product_id: Set(product_id),
            order_id: Set(Some(order_id)),
            quantity_delta: Set(-quantity),
            stock_before: Set(stock_before),
            stock_after: Set(stock_after),
            reason: Set(MovementReason::DecrementOnReady.as_str().to_string()),
            created_at: Set(Utc::now()),
        }
        .insert(conn)
        .await
        .map_err(ServiceError::DatabaseError)?;

        Ok((movement, true))
    }

    /// Quantities still owed back to stock for an order: per product,
    /// decrements minus restores already applied. Used by the compensator to
    /// decide which product locks to take; the authoritative recomputation
    /// happens again inside its transaction.
    pub async fn outstanding_restorations(
        &self,
        order_id: Uuid,
    ) -> Result<Vec<(Uuid, i32)>, ServiceError> {
        let outstanding = self
            .outstanding_by_product(&*self.db_pool, order_id)
            .await?;
        Ok(outstanding.into_iter().filter(|(_, q)| *q > 0).collect())
    }

    async fn outstanding_by_product<C: ConnectionTrait>(
        &self,
        conn: &C,
        order_id: Uuid,
    ) -> Result<BTreeMap<Uuid, i32>, ServiceError> {
        let movements = inventory_movement::Entity::find()
            .filter(inventory_movement::Column::OrderId.eq(order_id))
            .all(conn)
            .await
            .map_err(ServiceError::DatabaseError)?;

        // Decrements carry a negative delta, restores a positive one, so the
        // amount still owed back is simply the negated sum per product.
        let mut outstanding: BTreeMap<Uuid, i32> = BTreeMap::new();
        for movement in &movements {
            if movement.reason().is_none() {
                return Err(ServiceError::IntegrityError(format!(
                    "Unknown movement reason '{}' for movement {}",
                    movement.reason, movement.id
                )));
            }
            *outstanding.entry(movement.product_id).or_insert(0) -= movement.quantity_delta;
        }
        Ok(outstanding)
    }

    /// Restores whatever the ledger still owes back to stock for an order,
    /// appending one restore movement per product with the given reason.
    /// Idempotent: a second pass finds nothing outstanding and appends
    /// nothing. The caller must hold the affected product locks and owns the
    /// transaction.
    pub(crate) async fn restore_lines<C: ConnectionTrait>(
        &self,
        conn: &C,
        order_id: Uuid,
        reason: MovementReason,
    ) -> Result<Vec<inventory_movement::Model>, ServiceError> {
        debug_assert!(reason.is_restore());

        let outstanding = self.outstanding_by_product(conn, order_id).await?;
        let mut restored = Vec::new();

        for (product_id, remainder) in outstanding {
            if remainder <= 0 {
                continue;
            }

            let product = product::Entity::find_by_id(product_id)
                .one(conn)
                .await
                .map_err(ServiceError::DatabaseError)?
                .ok_or_else(|| {
                    ServiceError::IntegrityError(format!(
                        "Product {} missing during stock restoration",
                        product_id
                    ))
                })?;

            let stock_before = product.stock_on_hand;
            let stock_after = stock_before + remainder;

            let mut active: product::ActiveModel = product.into();
            active.stock_on_hand = Set(stock_after);
            active.updated_at = Set(Some(Utc::now()));
            active
                .update(conn)
                .await
                .map_err(ServiceError::DatabaseError)?;

            let movement = inventory_movement::ActiveModel {
                id: Set(Uuid::new_v4()),
                product_id: Set(product_id),
                order_id: Set(Some(order_id)),
                quantity_delta: Set(remainder),
                stock_before: Set(stock_before),
                stock_after: Set(stock_after),
                reason: Set(reason.as_str().to_string()),
                created_at: Set(Utc::now()),
            }
            .insert(conn)
            .await
            .map_err(ServiceError::DatabaseError)?;
            restored.push(movement);
        }

        Ok(restored)
    }

    /// Recomputes the product's stock from its ledger and reports drift.
    /// `initial + Σ quantity_delta` must equal the current counter, and every
    /// row must satisfy `stock_after == stock_before + quantity_delta`.
    #[instrument(skip(self))]
    pub async fn audit_product(&self, product_id: Uuid) -> Result<(), ServiceError> {
        let product = self.get_product(product_id).await?;
        let movements = self.movements_for_product(product_id).await?;

        let Some(first) = movements.first() else {
            return Ok(());
        };

        let mut expected = first.stock_before;
        for movement in &movements {
            if movement.stock_after != movement.stock_before + movement.quantity_delta {
                return Err(ServiceError::IntegrityError(format!(
                    "Movement {} is internally inconsistent: {} + {} != {}",
                    movement.id,
                    movement.stock_before,
                    movement.quantity_delta,
                    movement.stock_after
                )));
            }
            expected += movement.quantity_delta;
        }

        if expected != product.stock_on_hand {
            return Err(ServiceError::IntegrityError(format!(
                "Ledger drift for product {}: expected stock {}, counter holds {}",
                product_id, expected, product.stock_on_hand
            )));
        }
        Ok(())
    }

    pub async fn movements_for_product(
        &self,
        product_id: Uuid,
    ) -> Result<Vec<inventory_movement::Model>, ServiceError> {
        inventory_movement::Entity::find()
            .filter(inventory_movement::Column::ProductId.eq(product_id))
            .order_by_asc(inventory_movement::Column::CreatedAt)
            .all(&*self.db_pool)
            .await
            .map_err(ServiceError::DatabaseError)
    }

    pub async fn movements_for_order(
        &self,
        order_id: Uuid,
    ) -> Result<Vec<inventory_movement::Model>, ServiceError> {
        inventory_movement::Entity::find()
            .filter(inventory_movement::Column::OrderId.eq(order_id))
            .order_by_asc(inventory_movement::Column::CreatedAt)
            .all(&*self.db_pool)
            .await
            .map_err(ServiceError::DatabaseError)
    }

    async fn find_decrement<C: ConnectionTrait>(
        &self,
        conn: &C,
        order_id: Uuid,
        product_id: Uuid,
    ) -> Result<Option<inventory_movement::Model>, ServiceError> {
        inventory_movement::Entity::find()
            .filter(inventory_movement::Column::OrderId.eq(order_id))
            .filter(inventory_movement::Column::ProductId.eq(product_id))
            .filter(
                inventory_movement::Column::Reason
                    .eq(MovementReason::DecrementOnReady.as_str()),
            )
            .one(conn)
            .await
            .map_err(ServiceError::DatabaseError)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn try_acquire_is_exclusive_and_fail_fast() {
        let locks = ProductLocks::new();
        let product = Uuid::new_v4();

        let guard = locks.try_acquire(product);
        assert!(guard.is_some());
        // Second acquisition fails immediately while the guard is held
        assert!(locks.try_acquire(product).is_none());

        drop(guard);
        assert!(locks.try_acquire(product).is_some());
    }

    #[tokio::test]
    async fn distinct_products_do_not_contend() {
        let locks = ProductLocks::new();
        let _a = locks.try_acquire(Uuid::new_v4());
        let b = locks.try_acquire(Uuid::new_v4());
        assert!(b.is_some());
    }

    #[tokio::test]
    async fn try_acquire_many_is_all_or_nothing() {
        let locks = ProductLocks::new();
        let a = Uuid::new_v4();
        let b = Uuid::new_v4();

        let held = locks.try_acquire(b);
        assert!(held.is_some());

        // One contended product fails the whole batch and releases nothing
        assert!(locks.try_acquire_many(&[a, b]).is_none());
        // Product `a` must not have been left locked by the failed batch
        assert!(locks.try_acquire(a).is_some());

        drop(held);
        let guards = locks.try_acquire_many(&[a, b]).unwrap();
        assert_eq!(guards.len(), 2);
    }

    #[tokio::test]
    async fn try_acquire_many_dedupes_repeated_products() {
        let locks = ProductLocks::new();
        let a = Uuid::new_v4();
        let guards = locks.try_acquire_many(&[a, a, a]).unwrap();
        assert_eq!(guards.len(), 1);
    }
}
