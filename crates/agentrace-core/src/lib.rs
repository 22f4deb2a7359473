//! Trace orchestration logic and the traits at its seams.
//!
//! This crate defines the "ports" (persistence adapter, quota gate, model
//! invoker, pricing lookup, HTTP caller) that the infrastructure layer
//! implements. It depends only on `agentrace-types` -- never on
//! `agentrace-infra` or any database/IO crate.

pub mod event;
pub mod http;
pub mod llm;
pub mod quota;
pub mod storage;
pub mod trace;
