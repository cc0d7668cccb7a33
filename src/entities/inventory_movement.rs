use chrono::{DateTime, Utc};
use sea_orm::entity::prelude::*;
use serde::{Deserialize, Serialize};
use std::str::FromStr;
use strum::{Display, EnumString};
use uuid::Uuid;

/// Why a stock level changed. `(order_id, product_id, reason)` is the
/// idempotency key: at most one movement exists per combination.
#[derive(Copy, Clone, Debug, PartialEq, Eq, Serialize, Deserialize, Display, EnumString)]
#[serde(rename_all = "snake_case")]
#[strum(serialize_all = "snake_case")]
pub enum MovementReason {
    DecrementOnReady,
    RestoreOnCancel,
    RestoreOnHardDelete,
}

impl MovementReason {
    pub fn as_str(&self) -> &'static str {
        match self {
            MovementReason::DecrementOnReady => "decrement_on_ready",
            MovementReason::RestoreOnCancel => "restore_on_cancel",
            MovementReason::RestoreOnHardDelete => "restore_on_hard_delete",
        }
    }

    pub fn parse(s: &str) -> Option<Self> {
        MovementReason::from_str(s).ok()
    }

    pub fn is_restore(&self) -> bool {
        matches!(
            self,
            MovementReason::RestoreOnCancel | MovementReason::RestoreOnHardDelete
        )
    }
}

/// Append-only stock ledger row. Never updated or deleted; rows survive the
/// hard deletion of their order (`order_id` stays populated but is not a
/// foreign key). Invariants: `stock_after == stock_before + quantity_delta`
/// and, per product, `initial stock + Σ quantity_delta == current stock`.
#[derive(Clone, Debug, PartialEq, DeriveEntityModel, Serialize, Deserialize)]
#[sea_orm(table_name = "inventory_movements")]
pub struct Model {
    #[sea_orm(primary_key, auto_increment = false)]
    pub id: Uuid,
    pub product_id: Uuid,
    pub order_id: Option<Uuid>,
    pub quantity_delta: i32,
    pub stock_before: i32,
    pub stock_after: i32,
    pub reason: String,
    pub created_at: DateTime<Utc>,
}

impl Model {
    pub fn reason(&self) -> Option<MovementReason> {
        MovementReason::parse(&self.reason)
    }
}

#[derive(Copy, Clone, Debug, EnumIter, DeriveRelation)]
pub enum Relation {
    #[sea_orm(
        belongs_to = "super::product::Entity",
        from = "Column::ProductId",
        to = "super::product::Column::Id"
    )]
    Product,
}

impl Related<super::product::Entity> for Entity {
    fn to() -> RelationDef {
        Relation::Product.def()
    }
}

impl ActiveModelBehavior for ActiveModel {}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn reason_round_trips_through_strings() {
        for reason in [
            MovementReason::DecrementOnReady,
            MovementReason::RestoreOnCancel,
            MovementReason::RestoreOnHardDelete,
        ] {
            assert_eq!(MovementReason::parse(reason.as_str()), Some(reason));
        }
        assert_eq!(MovementReason::parse("adjustment"), None);
    }

    #[test]
    fn restore_classification() {
        assert!(!MovementReason::DecrementOnReady.is_restore());
        assert!(MovementReason::RestoreOnCancel.is_restore());
        assert!(MovementReason::RestoreOnHardDelete.is_restore());
    }
}
