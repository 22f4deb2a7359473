//! Quota and subscription gating.

pub mod gate;
pub mod memory;

pub use gate::{GateError, QuotaGate, UnlimitedQuotaGate};
pub use memory::InMemoryQuotaGate;
