//! SQLite storage layer.
//!
//! The persistence adapter backed by SQLite with WAL mode and split
//! read/write connection pools.

pub mod persistence;
pub mod pool;

pub use persistence::SqlitePersistence;
pub use pool::DatabasePool;
