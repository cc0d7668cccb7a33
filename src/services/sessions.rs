//! Fulfillment session lifecycle: creation over a fixed set of confirmed
//! orders, the picking aggregate computed at creation, abandonment, and
//! completion. The session owns its member list one-directionally; orders
//! never point back at a session.

use std::collections::{BTreeMap, HashSet};
use std::sync::Arc;

use chrono::{DateTime, NaiveDate, NaiveTime, Utc};
use sea_orm::sea_query::Expr;
use sea_orm::{
    ActiveModelTrait, ColumnTrait, ConnectionTrait, EntityTrait, PaginatorTrait, QueryFilter,
    QueryOrder, Set, SqlErr, TransactionTrait,
};
use serde::Serialize;
use tracing::{instrument, warn};
use uuid::Uuid;

use crate::db::DbPool;
use crate::entities::{
    fulfillment_session, order, order_item, packing_record, picking_item, session_order,
    OrderStatus, SessionStatus,
};
use crate::errors::ServiceError;
use crate::events::{Event, EventSender};

/// Prefix of the human-readable per-store per-day sequence code.
const SESSION_CODE_PREFIX: &str = "PREP";

/// A session together with its member order ids and picking aggregate.
#[derive(Clone, Debug, Serialize)]
pub struct SessionDetail {
    pub session: fulfillment_session::Model,
    pub order_ids: Vec<Uuid>,
    pub picking_items: Vec<picking_item::Model>,
}

#[derive(Clone)]
pub struct SessionService {
    db_pool: Arc<DbPool>,
    event_sender: Option<Arc<EventSender>>,
}

impl SessionService {
    pub fn new(db_pool: Arc<DbPool>, event_sender: Option<Arc<EventSender>>) -> Self {
        Self {
            db_pool,
            event_sender,
        }
    }

    async fn notify(&self, event: Event) {
        if let Some(sender) = &self.event_sender {
            if let Err(e) = sender.send(event).await {
                warn!("Failed to publish event: {}", e);
            }
        }
    }

    /// Creates a picking/packing session over the given confirmed orders.
    /// All-or-nothing: any invalid member fails the whole call and no
    /// session is created.
    #[instrument(skip(self, order_ids), fields(orders = order_ids.len()))]
    pub async fn create_session(
        &self,
        store_id: Uuid,
        order_ids: Vec<Uuid>,
    ) -> Result<SessionDetail, ServiceError> {
        if order_ids.is_empty() {
            return Err(ServiceError::ValidationError(
                "A session needs at least one order".into(),
            ));
        }
        let distinct: HashSet<Uuid> = order_ids.iter().copied().collect();
        if distinct.len() != order_ids.len() {
            return Err(ServiceError::ValidationError(
                "Order list contains duplicates".into(),
            ));
        }

        let txn = self
            .db_pool
            .begin()
            .await
            .map_err(ServiceError::DatabaseError)?;

        let orders = order::Entity::find()
            .filter(order::Column::Id.is_in(order_ids.clone()))
            .filter(order::Column::StoreId.eq(store_id))
            .all(&txn)
            .await
            .map_err(ServiceError::DatabaseError)?;
        if orders.len() != order_ids.len() {
            let found: HashSet<Uuid> = orders.iter().map(|o| o.id).collect();
            let missing: Vec<String> = order_ids
                .iter()
                .filter(|id| !found.contains(id))
                .map(|id| id.to_string())
                .collect();
            return Err(ServiceError::NotFound(format!(
                "Orders not found in store {}: {}",
                store_id,
                missing.join(", ")
            )));
        }

        let not_confirmed: Vec<&order::Model> = orders
            .iter()
            .filter(|o| o.status() != Some(OrderStatus::Confirmed))
            .collect();
        if !not_confirmed.is_empty() {
            let detail: Vec<String> = not_confirmed
                .iter()
                .map(|o| format!("{} ({})", o.order_number, o.status))
                .collect();
            return Err(ServiceError::PreconditionFailed(format!(
                "Only confirmed orders can join a session: {}",
                detail.join(", ")
            )));
        }

        // Belt and braces: confirmed status should already exclude active
        // membership, but a stale membership row must never be silently
        // duplicated.
        let memberships = session_order::Entity::find()
            .filter(session_order::Column::OrderId.is_in(order_ids.clone()))
            .all(&txn)
            .await
            .map_err(ServiceError::DatabaseError)?;
        if !memberships.is_empty() {
            let session_ids: Vec<Uuid> = memberships.iter().map(|m| m.session_id).collect();
            let active = fulfillment_session::Entity::find()
                .filter(fulfillment_session::Column::Id.is_in(session_ids))
                .filter(fulfillment_session::Column::Status.is_in([
                    SessionStatus::Picking.as_str(),
                    SessionStatus::Packing.as_str(),
                ]))
                .count(&txn)
                .await
                .map_err(ServiceError::DatabaseError)?;
            if active > 0 {
                return Err(ServiceError::Conflict(
                    "One or more orders already belong to an active session".into(),
                ));
            }
        }

        // Claim the members: a concurrent session creation for the same order
        // loses here instead of producing a double membership.
        let claimed = order::Entity::update_many()
            .col_expr(
                order::Column::Status,
                Expr::value(OrderStatus::InPreparation.as_str()),
            )
            .col_expr(order::Column::UpdatedAt, Expr::value(Utc::now()))
            .filter(order::Column::Id.is_in(order_ids.clone()))
            .filter(order::Column::Status.eq(OrderStatus::Confirmed.as_str()))
            .exec(&txn)
            .await
            .map_err(ServiceError::DatabaseError)?;
        if claimed.rows_affected != order_ids.len() as u64 {
            return Err(ServiceError::Conflict(
                "One or more orders were claimed concurrently".into(),
            ));
        }

        let session_id = Uuid::new_v4();
        let now = Utc::now();
        let code = self
            .next_session_code(&txn, store_id, now.date_naive())
            .await?;

        let code_for_error = code.clone();
        let session = fulfillment_session::ActiveModel {
            id: Set(session_id),
            store_id: Set(store_id),
            code: Set(code),
            status: Set(SessionStatus::Picking.as_str().to_string()),
            created_at: Set(now),
            updated_at: Set(None),
        }
        .insert(&txn)
        .await
        .map_err(|e| {
            // Two concurrent creates for the same store and day compute the
            // same sequence number; the unique (store_id, code) index breaks
            // the tie. Losing that race is retryable, not a server fault.
            if matches!(e.sql_err(), Some(SqlErr::UniqueConstraintViolation(_))) {
                ServiceError::Conflict(format!(
                    "Session code {} was claimed concurrently, retry",
                    code_for_error
                ))
            } else {
                ServiceError::DatabaseError(e)
            }
        })?;

        for order_id in &order_ids {
            session_order::ActiveModel {
                session_id: Set(session_id),
                order_id: Set(*order_id),
            }
            .insert(&txn)
            .await
            .map_err(ServiceError::DatabaseError)?;
        }

        let items = order_item::Entity::find()
            .filter(order_item::Column::OrderId.is_in(order_ids.clone()))
            .all(&txn)
            .await
            .map_err(ServiceError::DatabaseError)?;

        let mut required: BTreeMap<Uuid, i32> = BTreeMap::new();
        for item in &items {
            *required.entry(item.product_id).or_insert(0) += item.quantity;
        }

        let mut picking_items = Vec::with_capacity(required.len());
        for (product_id, quantity) in &required {
            let picking = picking_item::ActiveModel {
                id: Set(Uuid::new_v4()),
                session_id: Set(session_id),
                product_id: Set(*product_id),
                required_quantity: Set(*quantity),
                picked_quantity: Set(0),
                created_at: Set(now),
                updated_at: Set(None),
            }
            .insert(&txn)
            .await
            .map_err(ServiceError::DatabaseError)?;
            picking_items.push(picking);
        }

        for item in &items {
            packing_record::ActiveModel {
                id: Set(Uuid::new_v4()),
                session_id: Set(session_id),
                order_id: Set(item.order_id),
                product_id: Set(item.product_id),
                completed: Set(false),
                created_at: Set(now),
                updated_at: Set(None),
            }
            .insert(&txn)
            .await
            .map_err(ServiceError::DatabaseError)?;
        }

        txn.commit().await.map_err(ServiceError::DatabaseError)?;

        self.notify(Event::SessionCreated {
            session_id,
            store_id,
            code: session.code.clone(),
        })
        .await;

        Ok(SessionDetail {
            session,
            order_ids,
            picking_items,
        })
    }

    pub async fn get_session(&self, session_id: Uuid) -> Result<SessionDetail, ServiceError> {
        let session = self.find_session(session_id).await?;
        let order_ids = member_order_ids(&*self.db_pool, session_id).await?;
        let picking_items = picking_item::Entity::find()
            .filter(picking_item::Column::SessionId.eq(session_id))
            .order_by_asc(picking_item::Column::ProductId)
            .all(&*self.db_pool)
            .await
            .map_err(ServiceError::DatabaseError)?;

        Ok(SessionDetail {
            session,
            order_ids,
            picking_items,
        })
    }

    /// The aggregated picking list: per product, required and picked so far.
    pub async fn get_picking_list(
        &self,
        session_id: Uuid,
    ) -> Result<Vec<picking_item::Model>, ServiceError> {
        self.find_session(session_id).await?;
        picking_item::Entity::find()
            .filter(picking_item::Column::SessionId.eq(session_id))
            .order_by_asc(picking_item::Column::ProductId)
            .all(&*self.db_pool)
            .await
            .map_err(ServiceError::DatabaseError)
    }

    /// Hard-cancels a working session. Members still in preparation revert to
    /// confirmed; members that independently reached ready-to-ship are frozen
    /// with their reservations intact. No inventory movement is ever created
    /// here — stock is only taken at packing completion, so there is nothing
    /// to undo before that point.
    #[instrument(skip(self))]
    pub async fn abandon_session(
        &self,
        session_id: Uuid,
    ) -> Result<fulfillment_session::Model, ServiceError> {
        let txn = self
            .db_pool
            .begin()
            .await
            .map_err(ServiceError::DatabaseError)?;

        let session = find_session_on(&txn, session_id).await?;
        let status = session_status(&session)?;
        if status.is_terminal() {
            return Err(ServiceError::PreconditionFailed(format!(
                "Session {} is already {}",
                session.code, session.status
            )));
        }

        let members = member_order_ids(&txn, session_id).await?;
        order::Entity::update_many()
            .col_expr(
                order::Column::Status,
                Expr::value(OrderStatus::Confirmed.as_str()),
            )
            .col_expr(order::Column::UpdatedAt, Expr::value(Utc::now()))
            .filter(order::Column::Id.is_in(members))
            .filter(order::Column::Status.eq(OrderStatus::InPreparation.as_str()))
            .exec(&txn)
            .await
            .map_err(ServiceError::DatabaseError)?;

        picking_item::Entity::delete_many()
            .filter(picking_item::Column::SessionId.eq(session_id))
            .exec(&txn)
            .await
            .map_err(ServiceError::DatabaseError)?;
        packing_record::Entity::delete_many()
            .filter(packing_record::Column::SessionId.eq(session_id))
            .exec(&txn)
            .await
            .map_err(ServiceError::DatabaseError)?;

        let mut active: fulfillment_session::ActiveModel = session.into();
        active.status = Set(SessionStatus::Abandoned.as_str().to_string());
        active.updated_at = Set(Some(Utc::now()));
        let session = active
            .update(&txn)
            .await
            .map_err(ServiceError::DatabaseError)?;

        txn.commit().await.map_err(ServiceError::DatabaseError)?;

        self.notify(Event::SessionAbandoned(session_id)).await;
        Ok(session)
    }

    /// Closes a packing session once every remaining member order is ready
    /// to ship.
    #[instrument(skip(self))]
    pub async fn complete_session(
        &self,
        session_id: Uuid,
    ) -> Result<fulfillment_session::Model, ServiceError> {
        let txn = self
            .db_pool
            .begin()
            .await
            .map_err(ServiceError::DatabaseError)?;

        let session = find_session_on(&txn, session_id).await?;
        let status = session_status(&session)?;
        if status != SessionStatus::Packing {
            return Err(ServiceError::PreconditionFailed(format!(
                "Session {} cannot be completed from status {}",
                session.code, session.status
            )));
        }

        let members = member_order_ids(&txn, session_id).await?;
        let orders = order::Entity::find()
            .filter(order::Column::Id.is_in(members))
            .all(&txn)
            .await
            .map_err(ServiceError::DatabaseError)?;
        let stragglers: Vec<String> = orders
            .iter()
            .filter(|o| o.status() != Some(OrderStatus::ReadyToShip))
            .map(|o| format!("{} ({})", o.order_number, o.status))
            .collect();
        if !stragglers.is_empty() {
            return Err(ServiceError::PreconditionFailed(format!(
                "Not every order is ready to ship: {}",
                stragglers.join(", ")
            )));
        }

        let mut active: fulfillment_session::ActiveModel = session.into();
        active.status = Set(SessionStatus::Completed.as_str().to_string());
        active.updated_at = Set(Some(Utc::now()));
        let session = active
            .update(&txn)
            .await
            .map_err(ServiceError::DatabaseError)?;

        txn.commit().await.map_err(ServiceError::DatabaseError)?;

        self.notify(Event::SessionCompleted(session_id)).await;
        Ok(session)
    }

    async fn find_session(
        &self,
        session_id: Uuid,
    ) -> Result<fulfillment_session::Model, ServiceError> {
        find_session_on(&*self.db_pool, session_id).await
    }

    async fn next_session_code<C: ConnectionTrait>(
        &self,
        conn: &C,
        store_id: Uuid,
        day: NaiveDate,
    ) -> Result<String, ServiceError> {
        let start = DateTime::<Utc>::from_naive_utc_and_offset(day.and_time(NaiveTime::MIN), Utc);
        let end = start + chrono::Duration::days(1);

        let today_count = fulfillment_session::Entity::find()
            .filter(fulfillment_session::Column::StoreId.eq(store_id))
            .filter(fulfillment_session::Column::CreatedAt.gte(start))
            .filter(fulfillment_session::Column::CreatedAt.lt(end))
            .count(conn)
            .await
            .map_err(ServiceError::DatabaseError)?;

        Ok(format_session_code(day, today_count as u32 + 1))
    }
}

pub(crate) async fn find_session_on<C: ConnectionTrait>(
    conn: &C,
    session_id: Uuid,
) -> Result<fulfillment_session::Model, ServiceError> {
    fulfillment_session::Entity::find_by_id(session_id)
        .one(conn)
        .await
        .map_err(ServiceError::DatabaseError)?
        .ok_or_else(|| ServiceError::NotFound(format!("Session {} not found", session_id)))
}

pub(crate) fn session_status(
    session: &fulfillment_session::Model,
) -> Result<SessionStatus, ServiceError> {
    session.status().ok_or_else(|| {
        ServiceError::IntegrityError(format!(
            "Session {} has unknown status '{}'",
            session.id, session.status
        ))
    })
}

pub(crate) async fn member_order_ids<C: ConnectionTrait>(
    conn: &C,
    session_id: Uuid,
) -> Result<Vec<Uuid>, ServiceError> {
    let members = session_order::Entity::find()
        .filter(session_order::Column::SessionId.eq(session_id))
        .all(conn)
        .await
        .map_err(ServiceError::DatabaseError)?;
    Ok(members.into_iter().map(|m| m.order_id).collect())
}

fn format_session_code(day: NaiveDate, sequence: u32) -> String {
    format!(
        "{}-{}-{:03}",
        SESSION_CODE_PREFIX,
        day.format("%d%m%Y"),
        sequence
    )
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn session_code_format() {
        let day = NaiveDate::from_ymd_opt(2024, 6, 3).unwrap();
        assert_eq!(format_session_code(day, 1), "PREP-03062024-001");
        assert_eq!(format_session_code(day, 42), "PREP-03062024-042");
        // The counter keeps going past three digits rather than wrapping
        assert_eq!(format_session_code(day, 1000), "PREP-03062024-1000");
    }
}
