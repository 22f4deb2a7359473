//! Tracing setup for the agentrace binary.
//!
//! Structured logging through `tracing-subscriber`, with optional JSON
//! output and an optional OpenTelemetry stdout exporter.

pub mod tracing_setup;

pub use tracing_setup::{TracingOptions, init_tracing, shutdown_tracing};
