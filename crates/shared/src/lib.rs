//! SMS Dashboard Shared Types and Utilities
//!
//! Wire types spoken by the realtime server and client, plus the record
//! types and database helpers shared by the API crate.

pub mod db;
pub mod events;
pub mod types;

pub use db::*;
pub use events::*;
pub use types::*;
