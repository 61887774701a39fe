//! # rmq-facade
//!
//! Convenience layer over a RocketMQ-style broker client.
//!
//! This library provides:
//! - Envelope validation per topic type (normal, FIFO, delay, transaction)
//! - A producer facade with blocking, future-based and transactional sends
//! - A simple-consumer poll loop with per-message ack and lease extension
//! - Flow coloring, so several environments can share one physical topic
//! - Optional OpenTelemetry spans linking sends to consumes
//!
//! ## Module Organization
//!
//! - [`broker`] - The broker client seam the facades drive
//! - [`providers`] - Broker implementations, including the in-memory broker
//! - [`producer`] / [`transaction`] - Sending, including two-phase transactions
//! - [`consumer`] - Simple consumer, message leases and the poll loop
//! - [`otel`] - Span instrumentation for sends and consumes
//! - [`client`] - One entry point tying configuration, producer and consumers together
//!
//! ## Example
//!
//! ```no_run
//! use rmq_facade::{ClientConfig, InMemoryBroker, Message, Producer, ProducerOptions, TopicType};
//!
//! # async fn run() -> Result<(), rmq_facade::FacadeError> {
//! let broker = InMemoryBroker::default();
//! let config = ClientConfig::new("127.0.0.1:8081", "demo");
//! let producer = Producer::start(&config, ProducerOptions::default(), &broker).await?;
//!
//! producer
//!     .send(TopicType::Normal, &Message::new("orders", "msg1").with_tag("created"))
//!     .await?;
//! # Ok(())
//! # }
//! ```

// Module declarations
pub mod broker;
pub mod client;
pub mod config;
pub mod consumer;
pub mod diagnostics;
pub mod envelope;
pub mod error;
pub mod filter;
pub mod message;
pub mod otel;
pub mod producer;
pub mod providers;
pub mod telemetry;
pub mod transaction;

#[cfg(test)]
mod test_support;

// Re-export commonly used types at crate root for convenience
pub use broker::{
    BrokerConnector, BrokerProducer, BrokerTransaction, ConnectionSettings, ConsumerSettings,
    ProducerSettings, SimpleConsumerClient, TransactionChecker,
};
pub use client::Client;
pub use config::{ClientConfig, Credentials, DebugHandler, FlowColorConfig, LogConfig};
pub use consumer::{
    simple_consume, spawn_poll_loop, ConsumerHandle, ConsumerOptions, MessageHandler,
    MessageLease, SimpleConsumer,
};
pub use diagnostics::Diagnostics;
pub use envelope::{build_envelope, OutboundMessage};
pub use error::{
    is_no_new_message, is_too_many_requests, BrokerError, BrokerErrorKind, ConfigurationError,
    FacadeError, ValidationError,
};
pub use filter::{FilterExpression, FilterType, FLOW_COLOR_PROPERTY};
pub use message::{
    Message, MessageId, MessageReceipt, MessageView, ReceiptHandle, SendReceipt, TopicType,
    TransactionResolution,
};
pub use otel::{traced_simple_consume, TracedHandler, TracedProducer};
pub use producer::{PendingSend, Producer, ProducerOptions, SendCompletion};
pub use providers::{InMemoryBroker, InMemoryConfig};
pub use transaction::{Transaction, TransactionOutcome, TransactionState};
