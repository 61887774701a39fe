//! Single entry point bundling a configuration, a broker connector and an
//! optional shared producer.

use crate::broker::BrokerConnector;
use crate::config::ClientConfig;
use crate::consumer::{simple_consume, ConsumerHandle, ConsumerOptions, MessageHandler};
use crate::error::FacadeError;
use crate::message::{Message, SendReceipt, TopicType};
use crate::producer::{PendingSend, Producer, ProducerOptions};
use crate::transaction::TransactionOutcome;
use std::fmt;
use std::sync::{Arc, Mutex, PoisonError};
use tracing::{info, warn};

#[cfg(test)]
#[path = "client_tests.rs"]
mod tests;

/// Facade over one broker endpoint
///
/// Producing requires [`Client::start_producer`] first; consumers are
/// created per call to [`Client::simple_consume`].
pub struct Client {
    config: ClientConfig,
    connector: Arc<dyn BrokerConnector>,
    producer: Mutex<Option<Arc<Producer>>>,
}

impl Client {
    /// Create a client after validating `config`
    pub fn new(
        config: ClientConfig,
        connector: Arc<dyn BrokerConnector>,
    ) -> Result<Self, FacadeError> {
        config.validate()?;
        Ok(Self {
            config,
            connector,
            producer: Mutex::new(None),
        })
    }

    pub fn config(&self) -> &ClientConfig {
        &self.config
    }

    /// Start the shared producer
    ///
    /// A producer started earlier is stopped and replaced.
    pub async fn start_producer(&self, options: ProducerOptions) -> Result<(), FacadeError> {
        let producer =
            Arc::new(Producer::start(&self.config, options, self.connector.as_ref()).await?);
        let previous = self.slot().replace(producer);

        if let Some(previous) = previous {
            info!("Replacing running producer");
            if let Err(e) = previous.stop().await {
                warn!(error = %e, "Failed to stop replaced producer");
            }
        }
        Ok(())
    }

    /// Stop the shared producer
    pub async fn stop_producer(&self) -> Result<(), FacadeError> {
        let producer = self.slot().take().ok_or(FacadeError::ProducerNotStarted)?;
        producer.stop().await
    }

    /// The shared producer, if one is running
    pub fn producer(&self) -> Result<Arc<Producer>, FacadeError> {
        self.slot()
            .as_ref()
            .map(Arc::clone)
            .ok_or(FacadeError::ProducerNotStarted)
    }

    pub async fn send(
        &self,
        topic_type: TopicType,
        message: &Message,
    ) -> Result<Vec<SendReceipt>, FacadeError> {
        self.producer()?.send(topic_type, message).await
    }

    pub fn send_async(
        &self,
        topic_type: TopicType,
        message: Message,
    ) -> Result<PendingSend, FacadeError> {
        self.producer()?.send_async(topic_type, message)
    }

    pub async fn send_transaction<F>(
        &self,
        message: &Message,
        confirm: F,
    ) -> Result<TransactionOutcome, FacadeError>
    where
        F: FnOnce(&Message, &[SendReceipt]) -> bool,
    {
        self.producer()?.send_transaction(message, confirm).await
    }

    /// Start a poll loop using this client's configuration
    pub async fn simple_consume<H>(
        &self,
        options: ConsumerOptions,
        handler: H,
    ) -> Result<ConsumerHandle, FacadeError>
    where
        H: MessageHandler,
    {
        simple_consume(&self.config, options, self.connector.as_ref(), handler).await
    }

    fn slot(&self) -> std::sync::MutexGuard<'_, Option<Arc<Producer>>> {
        self.producer.lock().unwrap_or_else(PoisonError::into_inner)
    }
}

impl fmt::Debug for Client {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Client")
            .field("config", &self.config)
            .field("producer_started", &self.slot().is_some())
            .finish()
    }
}
