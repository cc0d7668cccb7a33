pub mod compensation;
pub mod inventory;
pub mod orders;
pub mod packing;
pub mod picking;
pub mod sessions;

pub use compensation::{CompensationService, RemovalKind, RemovalReport};
pub use inventory::{InventoryService, ProductLocks};
pub use orders::OrderService;
pub use packing::{PackingOutcome, PackingService};
pub use picking::PickingService;
pub use sessions::{SessionDetail, SessionService};
