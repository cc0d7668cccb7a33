//! Picking progress over a session's aggregated per-product totals.
//!
//! Progress is reported cumulatively ("picked so far"), never as increments,
//! so a duplicated report is harmless. The picking phase only ends once every
//! product in the aggregate is fully picked.

use std::sync::Arc;

use chrono::Utc;
use sea_orm::{
    ActiveModelTrait, ColumnTrait, EntityTrait, QueryFilter, QueryOrder, Set, TransactionTrait,
};
use tracing::{instrument, warn};
use uuid::Uuid;

use crate::db::DbPool;
use crate::entities::{fulfillment_session, picking_item, SessionStatus};
use crate::errors::ServiceError;
use crate::events::{Event, EventSender};
use crate::services::sessions::{find_session_on, session_status};

#[derive(Clone)]
pub struct PickingService {
    db_pool: Arc<DbPool>,
    event_sender: Option<Arc<EventSender>>,
}

impl PickingService {
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

    /// Records the cumulative picked quantity for one product of the session.
    /// The new value must stay within `0..=required` and never move backwards.
    #[instrument(skip(self))]
    pub async fn report_picked(
        &self,
        session_id: Uuid,
        product_id: Uuid,
        picked_quantity: i32,
    ) -> Result<picking_item::Model, ServiceError> {
        let txn = self
            .db_pool
            .begin()
            .await
            .map_err(ServiceError::DatabaseError)?;

        let session = find_session_on(&txn, session_id).await?;
        let status = session_status(&session)?;
        if status != SessionStatus::Picking {
            return Err(ServiceError::PreconditionFailed(format!(
                "Session {} is not picking (status {})",
                session.code, session.status
            )));
        }

        let item = picking_item::Entity::find()
            .filter(picking_item::Column::SessionId.eq(session_id))
            .filter(picking_item::Column::ProductId.eq(product_id))
            .one(&txn)
            .await
            .map_err(ServiceError::DatabaseError)?
            .ok_or_else(|| {
                ServiceError::ValidationError(format!(
                    "Product {} is not part of session {}",
                    product_id, session.code
                ))
            })?;

        if picked_quantity < 0 || picked_quantity > item.required_quantity {
            return Err(ServiceError::ValidationError(format!(
                "Picked quantity {} is outside 0..={} for product {}",
                picked_quantity, item.required_quantity, product_id
            )));
        }
        if picked_quantity < item.picked_quantity {
            return Err(ServiceError::ValidationError(format!(
                "Picked quantity cannot decrease ({} -> {}) for product {}",
                item.picked_quantity, picked_quantity, product_id
            )));
        }

        let mut active: picking_item::ActiveModel = item.into();
        active.picked_quantity = Set(picked_quantity);
        active.updated_at = Set(Some(Utc::now()));
        let item = active
            .update(&txn)
            .await
            .map_err(ServiceError::DatabaseError)?;

        txn.commit().await.map_err(ServiceError::DatabaseError)?;
        Ok(item)
    }

    /// Moves the session from picking to packing. Legal only when every
    /// product is fully picked; otherwise the caller gets the deficient
    /// products and the session stays in picking.
    #[instrument(skip(self))]
    pub async fn finish_picking(
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
        if status != SessionStatus::Picking {
            return Err(ServiceError::PreconditionFailed(format!(
                "Session {} is not picking (status {})",
                session.code, session.status
            )));
        }

        let items = picking_item::Entity::find()
            .filter(picking_item::Column::SessionId.eq(session_id))
            .order_by_asc(picking_item::Column::ProductId)
            .all(&txn)
            .await
            .map_err(ServiceError::DatabaseError)?;

        let deficient: Vec<String> = items
            .iter()
            .filter(|i| !i.is_fully_picked())
            .map(|i| {
                format!(
                    "{} ({}/{})",
                    i.product_id, i.picked_quantity, i.required_quantity
                )
            })
            .collect();
        if !deficient.is_empty() {
            return Err(ServiceError::PreconditionFailed(format!(
                "Picking incomplete for: {}",
                deficient.join(", ")
            )));
        }

        let mut active: fulfillment_session::ActiveModel = session.into();
        active.status = Set(SessionStatus::Packing.as_str().to_string());
        active.updated_at = Set(Some(Utc::now()));
        let session = active
            .update(&txn)
            .await
            .map_err(ServiceError::DatabaseError)?;

        txn.commit().await.map_err(ServiceError::DatabaseError)?;

        self.notify(Event::PickingFinished { session_id }).await;
        Ok(session)
    }
}
