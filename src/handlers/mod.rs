pub mod orders;
pub mod products;
pub mod sessions;

use std::sync::Arc;

use crate::db::DbPool;
use crate::events::EventSender;
use crate::services::{
    CompensationService, InventoryService, OrderService, PackingService, PickingService,
    ProductLocks, SessionService,
};

/// The full service graph behind the HTTP surface. Built once at startup
/// (and per test database); every service shares the same lock registry so
/// reservation, completion and compensation contend on the same guards.
#[derive(Clone)]
pub struct AppServices {
    pub inventory: InventoryService,
    pub orders: OrderService,
    pub sessions: SessionService,
    pub picking: PickingService,
    pub packing: PackingService,
    pub compensation: CompensationService,
}

impl AppServices {
    pub fn new(db_pool: Arc<DbPool>, event_sender: Option<Arc<EventSender>>) -> Self {
        let locks = ProductLocks::new();
        let inventory = InventoryService::new(db_pool.clone(), event_sender.clone(), locks);

        Self {
            orders: OrderService::new(db_pool.clone(), event_sender.clone()),
            sessions: SessionService::new(db_pool.clone(), event_sender.clone()),
            picking: PickingService::new(db_pool.clone(), event_sender.clone()),
            packing: PackingService::new(db_pool.clone(), event_sender.clone(), inventory.clone()),
            compensation: CompensationService::new(db_pool, event_sender, inventory.clone()),
            inventory,
        }
    }
}
