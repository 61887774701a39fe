//! Broker client seam.
//!
//! The facades never talk to the network themselves. They drive the traits in
//! this module, which mirror the primitives of a RocketMQ 5.x client:
//! producers with half-message transactions and "simple" consumers that pull
//! batches and acknowledge each message individually.
//!
//! [`InMemoryBroker`](crate::providers::InMemoryBroker) is the bundled
//! implementation.

use crate::config::{ClientConfig, Credentials};
use crate::envelope::OutboundMessage;
use crate::error::BrokerError;
use crate::filter::FilterExpression;
use crate::message::{MessageReceipt, MessageView, SendReceipt, TransactionResolution};
use async_trait::async_trait;
use std::collections::HashMap;
use std::fmt;
use std::sync::Arc;
use std::time::Duration;

/// Broker callback resolving half messages whose producer never committed or
/// rolled back
pub type TransactionChecker = Arc<dyn Fn(&MessageView) -> TransactionResolution + Send + Sync>;

/// Connection settings common to producers and consumers
#[derive(Debug, Clone)]
pub struct ConnectionSettings {
    pub endpoint: String,
    pub namespace: String,
    pub credentials: Option<Credentials>,
}

impl From<&ClientConfig> for ConnectionSettings {
    fn from(config: &ClientConfig) -> Self {
        Self {
            endpoint: config.endpoint.clone(),
            namespace: config.namespace.clone(),
            credentials: config.credentials.clone(),
        }
    }
}

/// Settings used to create a producer client
#[derive(Clone)]
pub struct ProducerSettings {
    pub connection: ConnectionSettings,
    /// Topics to prefetch routes for
    pub topics: Vec<String>,
    /// Send attempts made by the client before reporting failure
    pub max_attempts: u32,
    pub transaction_checker: Option<TransactionChecker>,
}

impl fmt::Debug for ProducerSettings {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ProducerSettings")
            .field("connection", &self.connection)
            .field("topics", &self.topics)
            .field("max_attempts", &self.max_attempts)
            .field("transaction_checker", &self.transaction_checker.is_some())
            .finish()
    }
}

/// Settings used to create a simple consumer client
#[derive(Debug, Clone)]
pub struct ConsumerSettings {
    pub connection: ConnectionSettings,
    pub consumer_group: String,
    /// Long-polling duration of a receive call
    pub await_duration: Duration,
    /// Topic to filter expression
    pub subscriptions: HashMap<String, FilterExpression>,
}

/// Creates producer and consumer clients
pub trait BrokerConnector: Send + Sync {
    /// Create an unstarted producer
    fn create_producer(
        &self,
        settings: ProducerSettings,
    ) -> Result<Arc<dyn BrokerProducer>, BrokerError>;

    /// Create an unstarted simple consumer
    fn create_simple_consumer(
        &self,
        settings: ConsumerSettings,
    ) -> Result<Arc<dyn SimpleConsumerClient>, BrokerError>;
}

/// Producer primitives of the broker client
#[async_trait]
pub trait BrokerProducer: Send + Sync {
    /// Connect and register the producer
    async fn start(&self) -> Result<(), BrokerError>;

    /// Send a message and wait for the broker's receipt
    async fn send(&self, message: &OutboundMessage) -> Result<Vec<SendReceipt>, BrokerError>;

    /// Open a transaction for exactly one half message
    async fn begin_transaction(&self) -> Result<Box<dyn BrokerTransaction>, BrokerError>;

    /// Send a half message; it stays invisible until the transaction commits
    async fn send_with_transaction(
        &self,
        message: &OutboundMessage,
        transaction: &dyn BrokerTransaction,
    ) -> Result<Vec<SendReceipt>, BrokerError>;

    /// Deregister the producer
    async fn graceful_stop(&self) -> Result<(), BrokerError>;
}

/// Broker side of one open transaction
#[async_trait]
pub trait BrokerTransaction: Send + Sync {
    fn transaction_id(&self) -> &str;

    async fn commit(&self) -> Result<(), BrokerError>;

    async fn rollback(&self) -> Result<(), BrokerError>;
}

/// Simple-consumer primitives of the broker client
#[async_trait]
pub trait SimpleConsumerClient: Send + Sync {
    /// Connect and register the consumer
    async fn start(&self) -> Result<(), BrokerError>;

    fn consumer_group(&self) -> &str;

    /// Pull up to `max_message_num` messages, hiding each for `invisible_duration`
    ///
    /// Fails with [`BrokerErrorKind::MessageNotFound`](crate::BrokerErrorKind::MessageNotFound)
    /// when nothing arrived within the await duration.
    async fn receive(
        &self,
        max_message_num: u32,
        invisible_duration: Duration,
    ) -> Result<Vec<MessageView>, BrokerError>;

    /// Remove a delivered message from the queue
    async fn ack(&self, receipt: &MessageReceipt) -> Result<(), BrokerError>;

    /// Reset the lease of a delivered message; returns the new receipt
    async fn change_invisible_duration(
        &self,
        receipt: &MessageReceipt,
        invisible_duration: Duration,
    ) -> Result<MessageReceipt, BrokerError>;

    /// Deregister the consumer
    async fn graceful_stop(&self) -> Result<(), BrokerError>;
}
