//! Domain models for the Farm Operations Platform

mod crop;
mod movement;
mod system;
mod tray;
mod tray_id;

pub use crop::*;
pub use movement::*;
pub use system::*;
pub use tray::*;
pub use tray_id::*;
