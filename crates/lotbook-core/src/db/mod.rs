//! Local cache database layer for Lotbook

mod connection;
mod migrations;
mod repository;

pub use connection::Database;
pub use migrations::CURRENT_VERSION as SCHEMA_VERSION;
pub use repository::{LibSqlStoreRepository, StoreRepository, LAST_SYNC_TIME_KEY};
