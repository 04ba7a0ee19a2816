//! Durable store for Backlog

mod connection;
mod migrations;
mod store;
mod table;

pub use connection::Database;
pub use store::DurableStore;
pub use table::{IndexRange, IndexValue, Query, Record, Table};
