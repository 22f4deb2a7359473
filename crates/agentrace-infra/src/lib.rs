//! Infrastructure adapters for the agent trace orchestrator.
//!
//! Implements the engine's seams against real systems: SQLite persistence,
//! an OpenAI-compatible model invoker, the pricing table, a reqwest HTTP
//! caller, and the `config.toml` loader.

pub mod config;
pub mod http;
pub mod llm;
pub mod retry;
pub mod sqlite;

#[cfg(test)]
mod test_server;
