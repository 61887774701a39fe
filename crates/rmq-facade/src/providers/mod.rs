//! Broker client implementations.
//!
//! This module contains the in-process implementation of the
//! [`BrokerConnector`](crate::broker::BrokerConnector) seam and the filter
//! evaluator it uses.

pub mod memory;
pub mod selector;

pub use memory::{
    InMemoryBroker, InMemoryConfig, InMemoryProducer, InMemorySimpleConsumer, InMemoryTransaction,
};
pub use selector::{Selector, SelectorError};
