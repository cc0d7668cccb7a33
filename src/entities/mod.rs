pub mod fulfillment_session;
pub mod inventory_movement;
pub mod order;
pub mod order_item;
pub mod packing_record;
pub mod picking_item;
pub mod product;
pub mod return_request;
pub mod session_order;

pub use fulfillment_session::SessionStatus;
pub use inventory_movement::MovementReason;
pub use order::OrderStatus;
