//! Model invocation adapters.
//!
//! The OpenAI-compatible invoker and the pricing table used to cost
//! `llm_call` steps.

pub mod openai_compat;
pub mod pricing;

pub use openai_compat::OpenAiCompatInvoker;
pub use pricing::{TablePricing, format_cost};
