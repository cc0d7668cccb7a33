use chrono::{DateTime, Utc};
use sea_orm::entity::prelude::*;
use serde::{Deserialize, Serialize};
use std::str::FromStr;
use strum::{Display, EnumString};
use uuid::Uuid;

/// Session lifecycle: `picking -> packing -> completed`, with `abandoned`
/// reachable from either working phase. Both `completed` and `abandoned`
/// are terminal.
#[derive(Copy, Clone, Debug, PartialEq, Eq, Serialize, Deserialize, Display, EnumString)]
#[serde(rename_all = "snake_case")]
#[strum(serialize_all = "snake_case")]
pub enum SessionStatus {
    Picking,
    Packing,
    Completed,
    Abandoned,
}

impl SessionStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            SessionStatus::Picking => "picking",
            SessionStatus::Packing => "packing",
            SessionStatus::Completed => "completed",
            SessionStatus::Abandoned => "abandoned",
        }
    }

    pub fn parse(s: &str) -> Option<Self> {
        SessionStatus::from_str(s).ok()
    }

    pub fn is_terminal(&self) -> bool {
        matches!(self, SessionStatus::Completed | SessionStatus::Abandoned)
    }
}

/// One picking/packing unit of work over a fixed set of member orders.
/// `code` is the human-readable sequence code, unique per store per day.
#[derive(Clone, Debug, PartialEq, DeriveEntityModel, Serialize, Deserialize)]
#[sea_orm(table_name = "fulfillment_sessions")]
pub struct Model {
    #[sea_orm(primary_key, auto_increment = false)]
    pub id: Uuid,
    pub store_id: Uuid,
    pub code: String,
    pub status: String,
    pub created_at: DateTime<Utc>,
    pub updated_at: Option<DateTime<Utc>>,
}

impl Model {
    pub fn status(&self) -> Option<SessionStatus> {
        SessionStatus::parse(&self.status)
    }
}

#[derive(Copy, Clone, Debug, EnumIter, DeriveRelation)]
pub enum Relation {
    #[sea_orm(has_many = "super::session_order::Entity")]
    SessionOrders,
    #[sea_orm(has_many = "super::picking_item::Entity")]
    PickingItems,
    #[sea_orm(has_many = "super::packing_record::Entity")]
    PackingRecords,
}

impl Related<super::session_order::Entity> for Entity {
    fn to() -> RelationDef {
        Relation::SessionOrders.def()
    }
}

impl Related<super::picking_item::Entity> for Entity {
    fn to() -> RelationDef {
        Relation::PickingItems.def()
    }
}

impl Related<super::packing_record::Entity> for Entity {
    fn to() -> RelationDef {
        Relation::PackingRecords.def()
    }
}

impl ActiveModelBehavior for ActiveModel {}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn terminal_states() {
        assert!(!SessionStatus::Picking.is_terminal());
        assert!(!SessionStatus::Packing.is_terminal());
        assert!(SessionStatus::Completed.is_terminal());
        assert!(SessionStatus::Abandoned.is_terminal());
    }

    #[test]
    fn status_round_trips_through_strings() {
        for status in [
            SessionStatus::Picking,
            SessionStatus::Packing,
            SessionStatus::Completed,
            SessionStatus::Abandoned,
        ] {
            assert_eq!(SessionStatus::parse(status.as_str()), Some(status));
        }
    }
}
