//! Order intake surface. Orders normally arrive from the upstream intake
//! collaborator already confirmed; this service exists for seeding and ops
//! tooling and never mutates line items after creation.

use std::collections::HashSet;
use std::sync::Arc;

use chrono::Utc;
use rust_decimal::Decimal;
use sea_orm::{
    ActiveModelTrait, ColumnTrait, EntityTrait, QueryFilter, QueryOrder, Set, TransactionTrait,
};
use serde::{Deserialize, Serialize};
use tracing::{instrument, warn};
use uuid::Uuid;
use validator::Validate;

use crate::db::DbPool;
use crate::entities::{order, order_item, product, OrderStatus};
use crate::errors::ServiceError;
use crate::events::{Event, EventSender};

#[derive(Clone, Debug, Serialize, Deserialize, Validate, utoipa::ToSchema)]
#[serde(deny_unknown_fields)]
pub struct OrderLineInput {
    pub product_id: Uuid,
    #[validate(range(min = 1, message = "Line quantity must be at least 1"))]
    pub quantity: i32,
}

#[derive(Clone, Debug, Deserialize, Validate, utoipa::ToSchema)]
#[serde(deny_unknown_fields)]
pub struct CreateOrderInput {
    pub store_id: Uuid,
    #[serde(default)]
    pub order_number: Option<String>,
    #[validate(length(min = 1, message = "Order must have at least one line item"))]
    pub items: Vec<OrderLineInput>,
}

/// An order together with its immutable line items.
#[derive(Clone, Debug, Serialize)]
pub struct OrderDetail {
    pub order: order::Model,
    pub items: Vec<order_item::Model>,
}

#[derive(Clone)]
pub struct OrderService {
    db_pool: Arc<DbPool>,
    event_sender: Option<Arc<EventSender>>,
}

impl OrderService {
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

    #[instrument(skip(self, input))]
    pub async fn create_order(&self, input: CreateOrderInput) -> Result<OrderDetail, ServiceError> {
        input.validate()?;

        for line in &input.items {
            line.validate()?;
        }
        let distinct: HashSet<Uuid> = input.items.iter().map(|i| i.product_id).collect();
        if distinct.len() != input.items.len() {
            return Err(ServiceError::ValidationError(
                "Order lines must reference distinct products".into(),
            ));
        }

        let txn = self
            .db_pool
            .begin()
            .await
            .map_err(ServiceError::DatabaseError)?;

        let product_ids: Vec<Uuid> = input.items.iter().map(|i| i.product_id).collect();
        let products = product::Entity::find()
            .filter(product::Column::Id.is_in(product_ids.clone()))
            .filter(product::Column::StoreId.eq(input.store_id))
            .all(&txn)
            .await
            .map_err(ServiceError::DatabaseError)?;
        if products.len() != product_ids.len() {
            let found: HashSet<Uuid> = products.iter().map(|p| p.id).collect();
            let missing: Vec<String> = product_ids
                .iter()
                .filter(|id| !found.contains(id))
                .map(|id| id.to_string())
                .collect();
            return Err(ServiceError::NotFound(format!(
                "Products not found in store {}: {}",
                input.store_id,
                missing.join(", ")
            )));
        }

        let order_id = Uuid::new_v4();
        let mut total = Decimal::ZERO;
        let mut items = Vec::with_capacity(input.items.len());
        for line in &input.items {
            // Products were fetched by the ids of these very lines
            let unit_price = products
                .iter()
                .find(|p| p.id == line.product_id)
                .map(|p| p.unit_price)
                .ok_or_else(|| {
                    ServiceError::IntegrityError(format!(
                        "Product {} vanished during order creation",
                        line.product_id
                    ))
                })?;
            total += unit_price * Decimal::from(line.quantity);
            items.push(order_item::ActiveModel {
                id: Set(Uuid::new_v4()),
                order_id: Set(order_id),
                product_id: Set(line.product_id),
                quantity: Set(line.quantity),
                unit_price: Set(unit_price),
            });
        }

        let order_number = input
            .order_number
            .unwrap_or_else(|| generate_order_number(order_id));

        let order = order::ActiveModel {
            id: Set(order_id),
            store_id: Set(input.store_id),
            order_number: Set(order_number),
            status: Set(OrderStatus::Confirmed.as_str().to_string()),
            total_amount: Set(total),
            archived_at: Set(None),
            created_at: Set(Utc::now()),
            updated_at: Set(None),
        }
        .insert(&txn)
        .await
        .map_err(ServiceError::DatabaseError)?;

        let mut inserted = Vec::with_capacity(items.len());
        for item in items {
            inserted.push(
                item.insert(&txn)
                    .await
                    .map_err(ServiceError::DatabaseError)?,
            );
        }

        txn.commit().await.map_err(ServiceError::DatabaseError)?;

        self.notify(Event::OrderCreated(order.id)).await;
        Ok(OrderDetail {
            order,
            items: inserted,
        })
    }

    pub async fn get_order(&self, order_id: Uuid) -> Result<OrderDetail, ServiceError> {
        let order = order::Entity::find_by_id(order_id)
            .one(&*self.db_pool)
            .await
            .map_err(ServiceError::DatabaseError)?
            .ok_or_else(|| ServiceError::NotFound(format!("Order {} not found", order_id)))?;

        let items = order_item::Entity::find()
            .filter(order_item::Column::OrderId.eq(order_id))
            .all(&*self.db_pool)
            .await
            .map_err(ServiceError::DatabaseError)?;

        Ok(OrderDetail { order, items })
    }

    pub async fn list_orders(&self, store_id: Uuid) -> Result<Vec<order::Model>, ServiceError> {
        order::Entity::find()
            .filter(order::Column::StoreId.eq(store_id))
            .order_by_desc(order::Column::CreatedAt)
            .all(&*self.db_pool)
            .await
            .map_err(ServiceError::DatabaseError)
    }
}

fn generate_order_number(order_id: Uuid) -> String {
    let simple = order_id.simple().to_string();
    format!("ORD-{}", simple[..8].to_uppercase())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn generated_order_numbers_are_prefixed_and_short() {
        let number = generate_order_number(Uuid::new_v4());
        assert!(number.starts_with("ORD-"));
        assert_eq!(number.len(), 12);
    }
}
