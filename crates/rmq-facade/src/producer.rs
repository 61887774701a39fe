//! Producer facade.
//!
//! [`Producer`] owns a started broker producer and adds envelope validation,
//! flow-color stamping, a future-based asynchronous send and the
//! transactional send sequence on top of it.

use crate::broker::{BrokerConnector, BrokerProducer, ProducerSettings, TransactionChecker};
use crate::config::ClientConfig;
use crate::diagnostics::Diagnostics;
use crate::envelope::{build_envelope, OutboundMessage};
use crate::error::{BrokerError, BrokerErrorKind, FacadeError, ValidationError};
use crate::filter::FLOW_COLOR_PROPERTY;
use crate::message::{Message, MessageView, SendReceipt, TopicType, TransactionResolution};
use crate::transaction::{self, Transaction, TransactionOutcome};
use std::fmt;
use std::future::Future;
use std::pin::Pin;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::task::{Context, Poll};
use tokio::sync::oneshot;
use tracing::{debug, info, warn};

#[cfg(test)]
#[path = "producer_tests.rs"]
mod tests;

// ============================================================================
// Options
// ============================================================================

/// Producer-specific settings
#[derive(Clone)]
pub struct ProducerOptions {
    /// Topics whose routes are fetched when the producer starts
    pub topics: Vec<String>,
    /// Attempts the broker client makes per send before giving up
    pub max_attempts: u32,
    /// Resolves half messages left open by a crashed or careless producer
    pub transaction_checker: Option<TransactionChecker>,
}

impl ProducerOptions {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_topic(mut self, topic: impl Into<String>) -> Self {
        self.topics.push(topic.into());
        self
    }

    pub fn with_topics<I, S>(mut self, topics: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.topics.extend(topics.into_iter().map(Into::into));
        self
    }

    pub fn with_max_attempts(mut self, max_attempts: u32) -> Self {
        self.max_attempts = max_attempts;
        self
    }

    pub fn with_transaction_checker(
        mut self,
        checker: impl Fn(&MessageView) -> TransactionResolution + Send + Sync + 'static,
    ) -> Self {
        self.transaction_checker = Some(Arc::new(checker));
        self
    }

    pub fn validate(&self) -> Result<(), ValidationError> {
        if self.max_attempts == 0 {
            return Err(ValidationError::OutOfRange {
                field: "max_attempts".to_string(),
                message: "must be at least 1".to_string(),
            });
        }

        if self.topics.iter().any(|t| t.trim().is_empty()) {
            return Err(ValidationError::InvalidFormat {
                field: "topics".to_string(),
                message: "topic names must not be blank".to_string(),
            });
        }

        Ok(())
    }
}

impl Default for ProducerOptions {
    fn default() -> Self {
        Self {
            topics: Vec::new(),
            max_attempts: 3,
            transaction_checker: None,
        }
    }
}

impl fmt::Debug for ProducerOptions {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ProducerOptions")
            .field("topics", &self.topics)
            .field("max_attempts", &self.max_attempts)
            .field("transaction_checker", &self.transaction_checker.is_some())
            .finish()
    }
}

// ============================================================================
// Async Send Completion
// ============================================================================

/// Result of an asynchronous send, delivered exactly once
#[derive(Debug)]
pub struct SendCompletion {
    /// The message as it was handed to the producer
    pub message: Message,
    pub result: Result<Vec<SendReceipt>, FacadeError>,
}

/// Future resolving to the [`SendCompletion`] of a dispatched send
///
/// The send runs on its own task. Dropping this future abandons the
/// in-flight broker call.
#[must_use = "the send is abandoned when the pending future is dropped"]
pub struct PendingSend {
    receiver: oneshot::Receiver<SendCompletion>,
    message: Option<Message>,
}

impl Future for PendingSend {
    type Output = SendCompletion;

    fn poll(mut self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<Self::Output> {
        match Pin::new(&mut self.receiver).poll(cx) {
            Poll::Pending => Poll::Pending,
            Poll::Ready(Ok(completion)) => Poll::Ready(completion),
            Poll::Ready(Err(_)) => Poll::Ready(SendCompletion {
                message: self.message.take().unwrap_or_default(),
                result: Err(FacadeError::Broker(BrokerError::new(
                    BrokerErrorKind::Other,
                    "send task ended without reporting a result",
                ))),
            }),
        }
    }
}

// ============================================================================
// Producer
// ============================================================================

/// Started producer
pub struct Producer {
    client: Arc<dyn BrokerProducer>,
    diagnostics: Diagnostics,
    flow_color: Option<String>,
    running: AtomicBool,
}

impl Producer {
    /// Create and start a producer
    ///
    /// Fails when the configuration or options are invalid, or when the
    /// broker client cannot be created or started.
    pub async fn start(
        config: &ClientConfig,
        options: ProducerOptions,
        connector: &dyn BrokerConnector,
    ) -> Result<Self, FacadeError> {
        let diagnostics = Diagnostics::from_config(config);

        config.validate()?;
        options.validate()?;

        let settings = ProducerSettings {
            connection: config.into(),
            topics: options.topics,
            max_attempts: options.max_attempts,
            transaction_checker: options.transaction_checker,
        };
        debug!(settings = ?settings, "Creating producer");

        let client = connector.create_producer(settings).map_err(|e| {
            diagnostics.emit(format_args!("create producer failed: {}", e));
            FacadeError::from(e)
        })?;
        client.start().await.map_err(|e| {
            diagnostics.emit(format_args!("start producer failed: {}", e));
            FacadeError::from(e)
        })?;

        info!(
            endpoint = %config.endpoint,
            namespace = %config.namespace,
            "Producer started"
        );

        Ok(Self {
            client,
            diagnostics,
            flow_color: config.flow_color.as_ref().map(|fc| fc.color.clone()),
            running: AtomicBool::new(true),
        })
    }

    /// Send a message and wait for the broker's receipts
    ///
    /// Transactional messages must go through
    /// [`send_transaction`](Self::send_transaction).
    pub async fn send(
        &self,
        topic_type: TopicType,
        message: &Message,
    ) -> Result<Vec<SendReceipt>, FacadeError> {
        self.reject_transactional("send", topic_type)?;
        let envelope = self.prepare("send", topic_type, message)?;

        debug!(topic = %envelope.topic, topic_type = %topic_type, "Sending message");
        self.client.send(&envelope).await.map_err(|e| {
            self.report_send_failure(&envelope, &e);
            FacadeError::from(e)
        })
    }

    /// Validate a message and dispatch the send on a background task
    ///
    /// Validation errors are returned immediately and nothing is dispatched.
    pub fn send_async(
        &self,
        topic_type: TopicType,
        message: Message,
    ) -> Result<PendingSend, FacadeError> {
        self.reject_transactional("send_async", topic_type)?;
        let envelope = self.prepare("send_async", topic_type, &message)?;
        let (mut sender, receiver) = oneshot::channel();
        let client = Arc::clone(&self.client);
        let diagnostics = self.diagnostics.clone();
        let fallback = message.clone();

        tokio::spawn(async move {
            tokio::select! {
                result = client.send(&envelope) => {
                    if let Err(e) = &result {
                        diagnostics.emit(format_args!("async send to {} failed: {}", envelope.topic, e));
                    }
                    let completion = SendCompletion {
                        message,
                        result: result.map_err(FacadeError::from),
                    };
                    if sender.send(completion).is_err() {
                        debug!("Async send completed after its future was dropped");
                    }
                }
                _ = sender.closed() => {
                    debug!(topic = %envelope.topic, "Async send abandoned by caller");
                }
            }
        });

        Ok(PendingSend {
            receiver,
            message: Some(fallback),
        })
    }

    /// Validate a message and dispatch the send, reporting to `callback`
    ///
    /// The callback runs exactly once, on a runtime task.
    pub fn send_async_with<F>(
        &self,
        topic_type: TopicType,
        message: Message,
        callback: F,
    ) -> Result<(), FacadeError>
    where
        F: FnOnce(SendCompletion) + Send + 'static,
    {
        let pending = self.send_async(topic_type, message)?;
        tokio::spawn(async move {
            callback(pending.await);
        });
        Ok(())
    }

    /// Send a message in its own transaction
    ///
    /// Once the broker has accepted the half message, `confirm` decides
    /// whether it is committed (`true`) or rolled back (`false`). If the send
    /// fails, neither happens and the broker's transaction checker takes over.
    pub async fn send_transaction<F>(
        &self,
        message: &Message,
        confirm: F,
    ) -> Result<TransactionOutcome, FacadeError>
    where
        F: FnOnce(&Message, &[SendReceipt]) -> bool,
    {
        let envelope = self.prepare("send_transaction", TopicType::Transaction, message)?;

        debug!(topic = %envelope.topic, "Sending transactional message");
        transaction::send_transaction(
            self.client.as_ref(),
            &self.diagnostics,
            message,
            &envelope,
            confirm,
        )
        .await
    }

    /// Open a transaction to be driven by hand
    pub async fn begin_transaction(&self) -> Result<Transaction, FacadeError> {
        self.ensure_running()?;
        Transaction::begin(self.client.as_ref(), self.diagnostics.clone()).await
    }

    /// Send the half message of a hand-driven transaction
    pub async fn send_in_transaction(
        &self,
        transaction: &mut Transaction,
        message: &Message,
    ) -> Result<Vec<SendReceipt>, FacadeError> {
        let envelope = self.prepare("send_in_transaction", TopicType::Transaction, message)?;
        transaction.send(self.client.as_ref(), &envelope).await
    }

    /// Stop the producer; every later call fails with
    /// [`FacadeError::ProducerNotStarted`]
    pub async fn stop(&self) -> Result<(), FacadeError> {
        if !self.running.swap(false, Ordering::AcqRel) {
            return Err(FacadeError::ProducerNotStarted);
        }
        self.client.graceful_stop().await?;
        info!("Producer stopped");
        Ok(())
    }

    pub fn is_running(&self) -> bool {
        self.running.load(Ordering::Acquire)
    }

    pub(crate) fn diagnostics(&self) -> &Diagnostics {
        &self.diagnostics
    }

    fn ensure_running(&self) -> Result<(), FacadeError> {
        if self.is_running() {
            Ok(())
        } else {
            Err(FacadeError::ProducerNotStarted)
        }
    }

    /// Validate into an envelope and stamp the flow color
    fn prepare(
        &self,
        operation: &'static str,
        topic_type: TopicType,
        message: &Message,
    ) -> Result<OutboundMessage, FacadeError> {
        self.ensure_running()?;

        let mut envelope = build_envelope(topic_type, message).map_err(|e| {
            self.diagnostics
                .emit(format_args!("{} rejected invalid message: {}", operation, e));
            FacadeError::from(e)
        })?;

        if let Some(color) = &self.flow_color {
            envelope
                .properties
                .entry(FLOW_COLOR_PROPERTY.to_string())
                .or_insert_with(|| color.clone());
        }

        Ok(envelope)
    }

    fn reject_transactional(
        &self,
        operation: &'static str,
        topic_type: TopicType,
    ) -> Result<(), FacadeError> {
        if topic_type != TopicType::Transaction {
            return Ok(());
        }
        self.diagnostics.emit(format_args!(
            "{} rejected: use send_transaction for TRANSACTION messages",
            operation
        ));
        Err(FacadeError::UnsupportedOperation {
            operation,
            topic_type,
        })
    }

    fn report_send_failure(&self, envelope: &OutboundMessage, err: &BrokerError) {
        if err.is_too_many_requests() {
            warn!(topic = %envelope.topic, "Send rejected by broker flow control");
        } else {
            warn!(topic = %envelope.topic, error = %err, "Send failed");
        }
        self.diagnostics
            .emit(format_args!("send to {} failed: {}", envelope.topic, err));
    }
}

impl fmt::Debug for Producer {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Producer")
            .field("flow_color", &self.flow_color)
            .field("running", &self.is_running())
            .finish()
    }
}
