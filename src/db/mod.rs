//! Database module for campus-status.
//!
//! The monitoring pipeline only talks to [`StatusStore`]; SQLite and an
//! in-memory map both implement it.

mod memory;
mod models;
mod sqlite;
mod store;

pub use memory::*;
pub use models::*;
pub use sqlite::*;
pub use store::*;
