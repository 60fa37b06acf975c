//! Business logic services for the Farm Operations Platform

pub mod events;
pub mod locks;
pub mod movement;
pub mod system;
pub mod tray;

pub use events::{EventBus, FarmEvent, FarmEventKind};
pub use locks::TransitionLocks;
pub use movement::{spawn_scheduler, MovementBoard, MovementService, MovementSnapshot};
pub use system::SystemService;
pub use tray::TrayService;
