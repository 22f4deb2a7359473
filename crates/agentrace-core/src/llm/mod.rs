//! Model invocation abstractions used by `llm_call` steps.
//!
//! - `ModelInvoker`: RPITIT trait for concrete backends
//! - `BoxModelInvoker`: object-safe wrapper for dynamic dispatch
//! - `PricingLookup`: token usage to cost

pub mod box_invoker;
pub mod invoker;
pub mod pricing;

pub use box_invoker::{BoxModelInvoker, UnconfiguredInvoker};
pub use invoker::ModelInvoker;
pub use pricing::{FreePricing, PricingLookup};
