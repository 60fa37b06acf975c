//! HTTP handlers

pub mod events;
pub mod health;
pub mod movement;
pub mod system;
pub mod tray;

pub use events::*;
pub use health::*;
pub use movement::*;
pub use system::*;
pub use tray::*;
