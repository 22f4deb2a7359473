//! Lifecycle event distribution.
//!
//! Provides an `EventBus` that delivers `TraceEvent` messages to broadcast
//! subscribers and to registered `TraceObserver`s.

pub mod bus;
pub mod observer;

pub use bus::EventBus;
pub use observer::{LoggingObserver, TraceObserver};
