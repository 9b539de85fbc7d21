//! Topicflow Testing Utilities.

/// In-memory partitioned broker for testing.
pub mod simplebroker;

pub use simplebroker::{ErrorInjector, SimpleBroker, SimpleConsumer};
