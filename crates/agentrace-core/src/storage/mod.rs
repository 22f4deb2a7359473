//! Storage abstractions for the trace orchestrator.
//!
//! Defines the persistence adapter trait and an in-memory implementation.
//! The SQLite implementation lives in agentrace-infra.

pub mod memory;
pub mod persistence;

pub use memory::InMemoryPersistence;
pub use persistence::PersistenceAdapter;
