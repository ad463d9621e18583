//! Persistence layer — SQLite-backed storage for subscriptions and dedup state.

pub mod libsql_backend;
pub mod migrations;
pub mod traits;

pub use libsql_backend::LibSqlBackend;
pub use traits::Store;
