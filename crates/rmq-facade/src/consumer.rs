//! Simple-consumer facade and poll loop.
//!
//! [`SimpleConsumer`] wraps a started broker consumer: it validates the
//! subscription set, rewrites it for flow coloring and hands every received
//! message out as a [`MessageLease`]. [`simple_consume`] drives a consumer
//! from a background task and passes each lease to a [`MessageHandler`].
//!
//! The loop never acknowledges on the handler's behalf. A handler that
//! returns without calling [`MessageLease::ack`] lets the lease expire, after
//! which the broker redelivers the message.

use crate::broker::{BrokerConnector, ConsumerSettings, SimpleConsumerClient};
use crate::config::ClientConfig;
use crate::diagnostics::Diagnostics;
use crate::error::{BrokerError, BrokerErrorKind, FacadeError, ValidationError};
use crate::filter::FilterExpression;
use crate::message::{MessageReceipt, MessageView};
use async_trait::async_trait;
use std::collections::HashMap;
use std::fmt;
use std::future::Future;
use std::sync::{Arc, Mutex, PoisonError};
use std::time::Duration;
use tokio::sync::watch;
use tokio::task::JoinHandle;
use tracing::{debug, info, warn};

#[cfg(test)]
#[path = "consumer_tests.rs"]
mod tests;

/// Extra time allowed on top of the await duration before a receive call is
/// abandoned client-side
pub const RECEIVE_GRACE: Duration = Duration::from_secs(3);

/// Pause between receive calls after the broker reported no new message
pub const EMPTY_POLL_BACKOFF: Duration = Duration::from_secs(1);

// ============================================================================
// Options
// ============================================================================

/// Simple-consumer settings
#[derive(Debug, Clone)]
pub struct ConsumerOptions {
    /// How long the broker holds a receive call open waiting for messages
    pub await_duration: Duration,
    /// Upper bound on messages returned by one receive call
    pub max_message_num: u32,
    /// Lease granted on every received message
    pub invisible_duration: Duration,
    /// Topic to filter expression; at least one entry is required
    pub subscriptions: HashMap<String, FilterExpression>,
}

impl ConsumerOptions {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_await_duration(mut self, await_duration: Duration) -> Self {
        self.await_duration = await_duration;
        self
    }

    pub fn with_max_message_num(mut self, max_message_num: u32) -> Self {
        self.max_message_num = max_message_num;
        self
    }

    pub fn with_invisible_duration(mut self, invisible_duration: Duration) -> Self {
        self.invisible_duration = invisible_duration;
        self
    }

    /// Subscribe to `topic` with `filter`, replacing any earlier filter for it
    pub fn with_subscription(mut self, topic: impl Into<String>, filter: FilterExpression) -> Self {
        self.subscriptions.insert(topic.into(), filter);
        self
    }

    pub fn with_subscriptions(mut self, subscriptions: HashMap<String, FilterExpression>) -> Self {
        self.subscriptions = subscriptions;
        self
    }

    pub fn validate(&self) -> Result<(), ValidationError> {
        if self.subscriptions.is_empty() {
            return Err(ValidationError::required("subscriptions"));
        }

        if let Some(topic) = self.subscriptions.keys().find(|t| t.trim().is_empty()) {
            return Err(ValidationError::InvalidFormat {
                field: "subscriptions".to_string(),
                message: format!("blank topic name {:?}", topic),
            });
        }

        if self.max_message_num == 0 {
            return Err(ValidationError::OutOfRange {
                field: "max_message_num".to_string(),
                message: "must be at least 1".to_string(),
            });
        }

        if self.invisible_duration.is_zero() {
            return Err(ValidationError::OutOfRange {
                field: "invisible_duration".to_string(),
                message: "must be positive".to_string(),
            });
        }

        Ok(())
    }
}

impl Default for ConsumerOptions {
    fn default() -> Self {
        Self {
            await_duration: Duration::from_secs(5),
            max_message_num: 10,
            invisible_duration: Duration::from_secs(10),
            subscriptions: HashMap::new(),
        }
    }
}

// ============================================================================
// Message Lease
// ============================================================================

/// A received message bound to the consumer that delivered it
///
/// Clones share the receipt, so a lease extended through one clone can be
/// acknowledged through another.
#[derive(Clone)]
pub struct MessageLease {
    view: MessageView,
    receipt: Arc<Mutex<MessageReceipt>>,
    client: Arc<dyn SimpleConsumerClient>,
    diagnostics: Diagnostics,
}

impl MessageLease {
    fn new(
        view: MessageView,
        client: Arc<dyn SimpleConsumerClient>,
        diagnostics: Diagnostics,
    ) -> Self {
        let receipt = view.receipt();
        Self {
            view,
            receipt: Arc::new(Mutex::new(receipt)),
            client,
            diagnostics,
        }
    }

    pub fn message(&self) -> &MessageView {
        &self.view
    }

    /// Receipt of the current lease
    pub fn receipt(&self) -> MessageReceipt {
        self.receipt
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .clone()
    }

    /// Remove the message from the queue permanently
    pub async fn ack(&self) -> Result<(), FacadeError> {
        let receipt = self.receipt();
        self.client.ack(&receipt).await.map_err(|e| {
            self.diagnostics.emit(format_args!(
                "ack of message {} failed: {}",
                receipt.message_id, e
            ));
            FacadeError::from(e)
        })?;
        debug!(message_id = %receipt.message_id, topic = %receipt.topic, "Message acknowledged");
        Ok(())
    }

    /// Restart the lease with `invisible_duration`, waiting for the broker
    pub async fn change_invisible_duration(
        &self,
        invisible_duration: Duration,
    ) -> Result<(), FacadeError> {
        renew(
            &self.client,
            &self.receipt,
            &self.diagnostics,
            invisible_duration,
        )
        .await
    }

    /// Restart the lease with `invisible_duration` without waiting
    ///
    /// Failures are reported through the diagnostics sink only.
    pub fn change_invisible_duration_async(&self, invisible_duration: Duration) {
        let client = Arc::clone(&self.client);
        let receipt = Arc::clone(&self.receipt);
        let diagnostics = self.diagnostics.clone();

        tokio::spawn(async move {
            // Already reported by renew
            let _ = renew(&client, &receipt, &diagnostics, invisible_duration).await;
        });
    }
}

async fn renew(
    client: &Arc<dyn SimpleConsumerClient>,
    receipt: &Mutex<MessageReceipt>,
    diagnostics: &Diagnostics,
    invisible_duration: Duration,
) -> Result<(), FacadeError> {
    let current = receipt
        .lock()
        .unwrap_or_else(PoisonError::into_inner)
        .clone();

    match client
        .change_invisible_duration(&current, invisible_duration)
        .await
    {
        Ok(renewed) => {
            debug!(
                message_id = %current.message_id,
                invisible_duration = ?invisible_duration,
                "Message lease extended"
            );
            *receipt.lock().unwrap_or_else(PoisonError::into_inner) = renewed;
            Ok(())
        }
        Err(e) => {
            diagnostics.emit(format_args!(
                "change invisible duration of message {} failed: {}",
                current.message_id, e
            ));
            Err(e.into())
        }
    }
}

impl fmt::Debug for MessageLease {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("MessageLease")
            .field("message_id", &self.view.message_id)
            .field("topic", &self.view.topic)
            .field("receipt", &self.receipt())
            .finish()
    }
}

// ============================================================================
// Simple Consumer
// ============================================================================

/// Started simple consumer
pub struct SimpleConsumer {
    client: Arc<dyn SimpleConsumerClient>,
    options: ConsumerOptions,
    diagnostics: Diagnostics,
}

impl SimpleConsumer {
    /// Validate settings, then create and start a consumer
    ///
    /// Nothing is created when the configuration, the options or the
    /// consumer group are invalid. With flow coloring configured, every
    /// subscription is narrowed to the configured color.
    pub async fn start(
        config: &ClientConfig,
        options: ConsumerOptions,
        connector: &dyn BrokerConnector,
    ) -> Result<Self, FacadeError> {
        let diagnostics = Diagnostics::from_config(config);

        let checked = config
            .validate()
            .map_err(FacadeError::from)
            .and_then(|_| options.validate().map_err(FacadeError::from))
            .and_then(|_| {
                if config.consumer_group.trim().is_empty() {
                    Err(ValidationError::required("consumer_group").into())
                } else {
                    Ok(())
                }
            });
        if let Err(e) = checked {
            diagnostics.emit(format_args!("consumer settings invalid: {}", e));
            return Err(e);
        }

        let mut options = options;
        if let Some(flow_color) = &config.flow_color {
            for filter in options.subscriptions.values_mut() {
                *filter = filter.with_flow_color(&flow_color.color, flow_color.base);
            }
            debug!(
                color = %flow_color.color,
                base = flow_color.base,
                "Subscriptions narrowed to flow color"
            );
        }

        let settings = ConsumerSettings {
            connection: config.into(),
            consumer_group: config.consumer_group.clone(),
            await_duration: options.await_duration,
            subscriptions: options.subscriptions.clone(),
        };

        let client = connector.create_simple_consumer(settings).map_err(|e| {
            diagnostics.emit(format_args!("create consumer failed: {}", e));
            FacadeError::from(e)
        })?;
        client.start().await.map_err(|e| {
            diagnostics.emit(format_args!("start consumer failed: {}", e));
            FacadeError::from(e)
        })?;

        info!(
            consumer_group = %config.consumer_group,
            topics = ?options.subscriptions.keys().collect::<Vec<_>>(),
            "Simple consumer started"
        );

        Ok(Self {
            client,
            options,
            diagnostics,
        })
    }

    pub fn consumer_group(&self) -> &str {
        self.client.consumer_group()
    }

    /// Subscriptions as sent to the broker, after flow-color rewriting
    pub fn subscriptions(&self) -> &HashMap<String, FilterExpression> {
        &self.options.subscriptions
    }

    /// Receive one batch of messages
    ///
    /// The call is abandoned with a broker error when the broker does not
    /// answer within the await duration plus [`RECEIVE_GRACE`].
    pub async fn receive(&self) -> Result<Vec<MessageLease>, FacadeError> {
        let deadline = self.options.await_duration + RECEIVE_GRACE;
        let received = tokio::time::timeout(
            deadline,
            self.client
                .receive(self.options.max_message_num, self.options.invisible_duration),
        )
        .await
        .unwrap_or_else(|_| {
            Err(BrokerError::new(
                BrokerErrorKind::Connection,
                format!("receive did not complete within {:?}", deadline),
            ))
        })?;

        Ok(received
            .into_iter()
            .map(|view| MessageLease::new(view, Arc::clone(&self.client), self.diagnostics.clone()))
            .collect())
    }

    /// Deregister the consumer; later receive calls fail
    pub async fn stop(&self) -> Result<(), FacadeError> {
        match self.client.graceful_stop().await {
            Ok(()) => {
                self.diagnostics.emit(format_args!("consumer stopped"));
                info!(consumer_group = %self.consumer_group(), "Simple consumer stopped");
                Ok(())
            }
            Err(e) => {
                self.diagnostics
                    .emit(format_args!("consumer stop failed: {}", e));
                Err(e.into())
            }
        }
    }

    pub(crate) fn diagnostics(&self) -> &Diagnostics {
        &self.diagnostics
    }
}

impl fmt::Debug for SimpleConsumer {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("SimpleConsumer")
            .field("consumer_group", &self.consumer_group())
            .field("options", &self.options)
            .finish()
    }
}

// ============================================================================
// Poll Loop
// ============================================================================

/// Callback invoked by the poll loop for every received message
///
/// Errors are logged and reported; they never cause an ack, a retry or a
/// negative acknowledgment.
#[async_trait]
pub trait MessageHandler: Send + Sync + 'static {
    async fn handle(&self, lease: MessageLease) -> anyhow::Result<()>;
}

#[async_trait]
impl<F, Fut> MessageHandler for F
where
    F: Fn(MessageLease) -> Fut + Send + Sync + 'static,
    Fut: Future<Output = anyhow::Result<()>> + Send + 'static,
{
    async fn handle(&self, lease: MessageLease) -> anyhow::Result<()> {
        (self)(lease).await
    }
}

/// Handle of a running poll loop
pub struct ConsumerHandle {
    consumer: Arc<SimpleConsumer>,
    shutdown: watch::Sender<bool>,
    task: JoinHandle<()>,
}

impl ConsumerHandle {
    /// Stop the consumer and wait for the poll loop to exit
    ///
    /// A handler that is running when this is called is allowed to finish.
    pub async fn stop(self) -> Result<(), FacadeError> {
        // Receivers only disappear once the loop has already exited
        let _ = self.shutdown.send(true);
        let stopped = self.consumer.stop().await;

        if let Err(e) = self.task.await {
            warn!(error = %e, "Poll loop ended abnormally");
        }
        stopped
    }

    pub fn consumer(&self) -> &SimpleConsumer {
        &self.consumer
    }

    /// Whether the poll loop has exited
    pub fn is_finished(&self) -> bool {
        self.task.is_finished()
    }
}

impl fmt::Debug for ConsumerHandle {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ConsumerHandle")
            .field("consumer", &self.consumer)
            .field("finished", &self.is_finished())
            .finish()
    }
}

/// Start a consumer and run `handler` for every message it receives
///
/// Validation happens before any consumer is created. The returned handle
/// stops the loop; the loop also ends on its own once the broker reports
/// the consumer as stopped.
pub async fn simple_consume<H>(
    config: &ClientConfig,
    options: ConsumerOptions,
    connector: &dyn BrokerConnector,
    handler: H,
) -> Result<ConsumerHandle, FacadeError>
where
    H: MessageHandler,
{
    let consumer = SimpleConsumer::start(config, options, connector).await?;
    Ok(spawn_poll_loop(consumer, handler))
}

/// Drive an already started consumer from a background task
pub fn spawn_poll_loop<H>(consumer: SimpleConsumer, handler: H) -> ConsumerHandle
where
    H: MessageHandler,
{
    let consumer = Arc::new(consumer);
    let (shutdown, signal) = watch::channel(false);
    let task = tokio::spawn(poll_loop(Arc::clone(&consumer), handler, signal));

    ConsumerHandle {
        consumer,
        shutdown,
        task,
    }
}

async fn poll_loop<H>(consumer: Arc<SimpleConsumer>, handler: H, mut shutdown: watch::Receiver<bool>)
where
    H: MessageHandler,
{
    debug!(consumer_group = %consumer.consumer_group(), "Poll loop started");

    loop {
        if *shutdown.borrow() {
            break;
        }

        let received = tokio::select! {
            biased;
            Ok(()) = shutdown.changed() => continue,
            received = consumer.receive() => received,
        };

        match received {
            Ok(leases) => {
                let total = leases.len();
                for (handled, lease) in leases.into_iter().enumerate() {
                    if *shutdown.borrow() {
                        debug!(
                            skipped = total - handled,
                            "Shutdown requested, leaving rest of batch unhandled"
                        );
                        break;
                    }
                    let message_id = lease.message().message_id.clone();
                    if let Err(e) = handler.handle(lease).await {
                        warn!(message_id = %message_id, error = %e, "Message handler failed");
                        consumer.diagnostics().emit(format_args!(
                            "handler failed for message {}: {:#}",
                            message_id, e
                        ));
                    }
                }
            }
            Err(e) if e.is_no_new_message() => {
                tokio::select! {
                    biased;
                    Ok(()) = shutdown.changed() => {}
                    _ = tokio::time::sleep(EMPTY_POLL_BACKOFF) => {}
                }
            }
            Err(FacadeError::Broker(e)) if e.is_client_stopped() => {
                debug!(error = %e, "Consumer stopped, leaving poll loop");
                break;
            }
            Err(e) => {
                warn!(error = %e, "Receive failed");
                consumer
                    .diagnostics()
                    .emit(format_args!("receive failed: {}", e));
            }
        }
    }

    debug!(consumer_group = %consumer.consumer_group(), "Poll loop finished");
}
