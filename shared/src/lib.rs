//! Shared types and domain logic for the Farm Operations Platform
//!
//! This crate contains the tray/growing-system domain model together with the
//! capacity ledger, spot allocator, tray lifecycle engine and movement
//! scheduler. Everything here is pure: callers own storage, clocks and locking.

pub mod allocator;
pub mod error;
pub mod ledger;
pub mod lifecycle;
pub mod models;
pub mod scheduler;
pub mod types;
pub mod validation;

pub use allocator::*;
pub use error::*;
pub use models::*;
pub use types::*;
pub use validation::*;
