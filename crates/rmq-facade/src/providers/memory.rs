//! In-memory broker implementation for testing and development.
//!
//! This module provides a fully functional in-process broker that:
//! - Keeps one append-only log per topic and one cursor per consumer group
//! - Implements invisibility leases, redelivery and per-group FIFO ordering
//! - Holds delay messages until their delivery timestamp
//! - Supports half-message transactions and a transaction checker
//! - Evaluates TAG and SQL92 subscription filters
//! - Optionally applies per-producer flow control
//!
//! This provider is intended for:
//! - Unit and integration testing of code built on the facades
//! - Local demos without a running broker
//! - Reference semantics for network-backed connectors

use crate::broker::{
    BrokerConnector, BrokerProducer, BrokerTransaction, ConsumerSettings, ProducerSettings,
    SimpleConsumerClient, TransactionChecker,
};
use crate::envelope::OutboundMessage;
use crate::error::{BrokerError, BrokerErrorKind};
use crate::message::{
    MessageId, MessageReceipt, MessageView, ReceiptHandle, SendReceipt, TopicType,
    TransactionResolution,
};
use crate::providers::selector::Selector;
use async_trait::async_trait;
use bytes::Bytes;
use chrono::{DateTime, Utc};
use std::collections::{HashMap, HashSet};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use std::time::Duration;
use tokio::sync::Notify;
use tokio::task::JoinHandle;
use tokio::time::Instant;
use tracing::{debug, info, warn};

#[cfg(test)]
#[path = "memory_tests.rs"]
mod tests;

// ============================================================================
// Configuration
// ============================================================================

/// In-memory broker configuration
#[derive(Debug, Clone)]
pub struct InMemoryConfig {
    /// Re-check interval while a receive call is long-polling
    pub poll_interval: Duration,
    /// Maximum sends per producer per second; `None` disables flow control
    pub send_rate_limit: Option<u32>,
    /// Age after which an unresolved transaction is handed to the checker
    pub transaction_check_delay: Duration,
}

impl Default for InMemoryConfig {
    fn default() -> Self {
        Self {
            poll_interval: Duration::from_millis(50),
            send_rate_limit: None,
            transaction_check_delay: Duration::from_secs(5),
        }
    }
}

// ============================================================================
// Internal Storage Structures
// ============================================================================

struct Shared {
    config: InMemoryConfig,
    state: Mutex<BrokerState>,
    /// Signalled whenever a message may have become deliverable
    changed: Notify,
}

impl Shared {
    fn lock(&self) -> MutexGuard<'_, BrokerState> {
        self.state.lock().unwrap_or_else(PoisonError::into_inner)
    }
}

#[derive(Default)]
struct BrokerState {
    topics: HashMap<String, TopicLog>,
    /// Keyed by (consumer group, topic)
    cursors: HashMap<(String, String), GroupCursor>,
    transactions: HashMap<String, OpenTransaction>,
    /// Keyed by producer id
    checkers: HashMap<String, TransactionChecker>,
}

#[derive(Default)]
struct TopicLog {
    declared_type: Option<TopicType>,
    messages: Vec<StoredMessage>,
}

#[derive(Debug, Clone, PartialEq, Eq)]
enum MessageStatus {
    Visible,
    /// Half message waiting for its transaction
    Prepared(String),
    RolledBack,
}

#[derive(Clone)]
struct StoredMessage {
    message_id: MessageId,
    topic: String,
    body: Bytes,
    tag: Option<String>,
    message_group: Option<String>,
    keys: Vec<String>,
    properties: HashMap<String, String>,
    delivery_timestamp: Option<DateTime<Utc>>,
    born_timestamp: DateTime<Utc>,
    status: MessageStatus,
}

impl StoredMessage {
    fn from_outbound(message: &OutboundMessage, status: MessageStatus) -> Self {
        Self {
            message_id: MessageId::new(),
            topic: message.topic.clone(),
            body: message.body.clone(),
            tag: message.tag.clone(),
            message_group: message.message_group.clone(),
            keys: message.keys.clone(),
            properties: message.properties.clone(),
            delivery_timestamp: message.delivery_timestamp,
            born_timestamp: Utc::now(),
            status,
        }
    }

    fn view(&self, delivery_attempt: u32, receipt_handle: ReceiptHandle) -> MessageView {
        MessageView {
            message_id: self.message_id.clone(),
            topic: self.topic.clone(),
            body: self.body.clone(),
            tag: self.tag.clone(),
            message_group: self.message_group.clone(),
            keys: self.keys.clone(),
            properties: self.properties.clone(),
            delivery_timestamp: self.delivery_timestamp,
            born_timestamp: self.born_timestamp,
            delivery_attempt,
            receipt_handle,
        }
    }
}

/// Consumption progress of one consumer group on one topic
#[derive(Default)]
struct GroupCursor {
    /// Every offset below this one is acknowledged or filtered out
    low_watermark: usize,
    /// Finished offsets at or above the watermark
    done: HashSet<usize>,
    leases: HashMap<usize, Lease>,
    attempts: HashMap<usize, u32>,
}

impl GroupCursor {
    fn finish(&mut self, offset: usize) {
        self.leases.remove(&offset);
        self.attempts.remove(&offset);
        self.done.insert(offset);
        while self.done.remove(&self.low_watermark) {
            self.low_watermark += 1;
        }
    }

    fn lease_for(&self, receipt_handle: &ReceiptHandle) -> Option<usize> {
        self.leases
            .iter()
            .find(|(_, lease)| lease.receipt_handle == *receipt_handle)
            .map(|(offset, _)| *offset)
    }
}

struct Lease {
    receipt_handle: ReceiptHandle,
    expires_at: Instant,
}

struct OpenTransaction {
    producer_id: String,
    /// (topic, offset) of each half message
    half_messages: Vec<(String, usize)>,
    opened_at: Instant,
}

fn new_receipt_handle() -> ReceiptHandle {
    ReceiptHandle::new(uuid::Uuid::new_v4().simple().to_string())
}

// ============================================================================
// InMemoryBroker
// ============================================================================

/// In-process broker; cloning yields another handle to the same broker
#[derive(Clone)]
pub struct InMemoryBroker {
    shared: Arc<Shared>,
}

impl InMemoryBroker {
    /// Create new in-memory broker with configuration
    pub fn new(config: InMemoryConfig) -> Self {
        Self {
            shared: Arc::new(Shared {
                config,
                state: Mutex::new(BrokerState::default()),
                changed: Notify::new(),
            }),
        }
    }

    /// Declare a topic and the only message type it accepts
    ///
    /// Undeclared topics are created on first use and accept any type.
    pub fn create_topic(&self, topic: &str, topic_type: TopicType) {
        let mut state = self.shared.lock();
        state
            .topics
            .entry(topic.to_string())
            .or_default()
            .declared_type = Some(topic_type);
    }

    /// Number of messages ever stored for `topic`, including half messages
    pub fn message_count(&self, topic: &str) -> usize {
        self.shared
            .lock()
            .topics
            .get(topic)
            .map_or(0, |log| log.messages.len())
    }

    /// Number of messages currently leased to `consumer_group`
    pub fn in_flight_count(&self, consumer_group: &str) -> usize {
        self.shared
            .lock()
            .cursors
            .iter()
            .filter(|((group, _), _)| group == consumer_group)
            .map(|(_, cursor)| cursor.leases.len())
            .sum()
    }

    /// Number of transactions begun but neither committed nor rolled back
    pub fn open_transaction_count(&self) -> usize {
        self.shared.lock().transactions.len()
    }

    /// Resolve stale transactions through their producer's checker
    ///
    /// Every open transaction with at least one half message that is older
    /// than [`InMemoryConfig::transaction_check_delay`] is offered to the
    /// checker of the producer that began it. Stale transactions that never
    /// stored a half message have nothing to check and are discarded.
    /// Returns the number of transactions committed or rolled back.
    pub fn check_transactions(&self) -> usize {
        let now = Instant::now();
        let delay = self.shared.config.transaction_check_delay;

        let candidates: Vec<(String, TransactionChecker, MessageView)> = {
            let mut state = self.shared.lock();
            state.transactions.retain(|id, tx| {
                let empty = tx.half_messages.is_empty()
                    && now.duration_since(tx.opened_at) >= delay;
                if empty {
                    debug!(transaction_id = %id, "Discarding transaction without half messages");
                }
                !empty
            });
            state
                .transactions
                .iter()
                .filter(|(_, tx)| now.duration_since(tx.opened_at) >= delay)
                .filter_map(|(id, tx)| {
                    let checker = state.checkers.get(&tx.producer_id)?;
                    let (topic, offset) = tx.half_messages.first()?;
                    let stored = state.topics.get(topic)?.messages.get(*offset)?;
                    Some((
                        id.clone(),
                        Arc::clone(checker),
                        stored.view(1, new_receipt_handle()),
                    ))
                })
                .collect()
        };

        let mut resolved = 0;
        for (transaction_id, checker, view) in candidates {
            let resolution = checker(&view);
            debug!(
                transaction_id = %transaction_id,
                message_id = %view.message_id,
                resolution = ?resolution,
                "Transaction checker answered"
            );
            if resolution != TransactionResolution::Unknown
                && resolve_transaction(&self.shared, &transaction_id, resolution).is_ok()
            {
                resolved += 1;
            }
        }

        resolved
    }

    /// Run [`check_transactions`](Self::check_transactions) every `interval`
    ///
    /// The task runs until aborted.
    pub fn spawn_transaction_checker(&self, interval: Duration) -> JoinHandle<()> {
        let broker = self.clone();
        tokio::spawn(async move {
            let mut ticker = tokio::time::interval(interval);
            loop {
                ticker.tick().await;
                let resolved = broker.check_transactions();
                if resolved > 0 {
                    info!(resolved, "Resolved stale transactions");
                }
            }
        })
    }
}

impl Default for InMemoryBroker {
    fn default() -> Self {
        Self::new(InMemoryConfig::default())
    }
}

impl BrokerConnector for InMemoryBroker {
    fn create_producer(
        &self,
        settings: ProducerSettings,
    ) -> Result<Arc<dyn BrokerProducer>, BrokerError> {
        Ok(Arc::new(InMemoryProducer {
            id: uuid::Uuid::new_v4().to_string(),
            shared: Arc::clone(&self.shared),
            settings,
            running: AtomicBool::new(false),
            stopped: AtomicBool::new(false),
            window: Mutex::new(RateWindow {
                started: Instant::now(),
                count: 0,
            }),
        }))
    }

    fn create_simple_consumer(
        &self,
        settings: ConsumerSettings,
    ) -> Result<Arc<dyn SimpleConsumerClient>, BrokerError> {
        if settings.consumer_group.trim().is_empty() {
            return Err(BrokerError::new(
                BrokerErrorKind::Other,
                "consumer group is required",
            ));
        }

        let mut selectors = settings
            .subscriptions
            .iter()
            .map(|(topic, filter)| {
                Selector::compile(filter)
                    .map(|selector| (topic.clone(), selector))
                    .map_err(|e| BrokerError::new(BrokerErrorKind::InvalidFilter, e.to_string()))
            })
            .collect::<Result<Vec<_>, _>>()?;
        selectors.sort_by(|a, b| a.0.cmp(&b.0));

        Ok(Arc::new(InMemorySimpleConsumer {
            shared: Arc::clone(&self.shared),
            settings,
            selectors,
            running: AtomicBool::new(false),
            stopped: AtomicBool::new(false),
        }))
    }
}

// ============================================================================
// Shared Operations
// ============================================================================

fn publish(
    shared: &Shared,
    message: &OutboundMessage,
    status: MessageStatus,
) -> Result<SendReceipt, BrokerError> {
    let transaction_id = match &status {
        MessageStatus::Prepared(id) => Some(id.clone()),
        _ => None,
    };

    let receipt = {
        let mut state = shared.lock();

        if let Some(id) = &transaction_id {
            if !state.transactions.contains_key(id) {
                return Err(BrokerError::new(
                    BrokerErrorKind::TransactionNotFound,
                    format!("transaction {} is not open", id),
                ));
            }
        }

        let log = state.topics.entry(message.topic.clone()).or_default();
        if let Some(declared) = log.declared_type {
            if declared != message.topic_type {
                return Err(BrokerError::new(
                    BrokerErrorKind::MessageTypeMismatch,
                    format!(
                        "topic {} accepts {} messages, got {}",
                        message.topic, declared, message.topic_type
                    ),
                ));
            }
        }

        let stored = StoredMessage::from_outbound(message, status);
        let offset = log.messages.len();
        let receipt = SendReceipt {
            message_id: stored.message_id.clone(),
            transaction_id: transaction_id.clone(),
            offset: offset as u64,
        };
        log.messages.push(stored);

        if let Some(id) = &transaction_id {
            if let Some(tx) = state.transactions.get_mut(id) {
                tx.half_messages.push((message.topic.clone(), offset));
            }
        }

        receipt
    };

    shared.changed.notify_waiters();
    Ok(receipt)
}

fn resolve_transaction(
    shared: &Shared,
    transaction_id: &str,
    resolution: TransactionResolution,
) -> Result<(), BrokerError> {
    {
        let mut state = shared.lock();
        let tx = state.transactions.remove(transaction_id).ok_or_else(|| {
            BrokerError::new(
                BrokerErrorKind::TransactionNotFound,
                format!("transaction {} is not open", transaction_id),
            )
        })?;

        let status = match resolution {
            TransactionResolution::Commit => MessageStatus::Visible,
            TransactionResolution::Rollback => MessageStatus::RolledBack,
            TransactionResolution::Unknown => {
                state.transactions.insert(transaction_id.to_string(), tx);
                return Ok(());
            }
        };

        for (topic, offset) in &tx.half_messages {
            if let Some(stored) = state
                .topics
                .get_mut(topic)
                .and_then(|log| log.messages.get_mut(*offset))
            {
                stored.status = status.clone();
            }
        }
    }

    shared.changed.notify_waiters();
    Ok(())
}

// ============================================================================
// InMemoryProducer
// ============================================================================

struct RateWindow {
    started: Instant,
    count: u32,
}

/// Producer client of an [`InMemoryBroker`]
pub struct InMemoryProducer {
    id: String,
    shared: Arc<Shared>,
    settings: ProducerSettings,
    running: AtomicBool,
    stopped: AtomicBool,
    window: Mutex<RateWindow>,
}

impl InMemoryProducer {
    fn ensure_running(&self) -> Result<(), BrokerError> {
        if self.stopped.load(Ordering::Acquire) {
            return Err(BrokerError::client_stopped("producer"));
        }
        if !self.running.load(Ordering::Acquire) {
            return Err(BrokerError::new(
                BrokerErrorKind::ClientStopped,
                "producer has not been started",
            ));
        }
        Ok(())
    }

    fn acquire_send_permit(&self) -> Result<(), BrokerError> {
        let Some(limit) = self.shared.config.send_rate_limit else {
            return Ok(());
        };

        let mut window = self.window.lock().unwrap_or_else(PoisonError::into_inner);
        let now = Instant::now();
        if now.duration_since(window.started) >= Duration::from_secs(1) {
            window.started = now;
            window.count = 0;
        }
        if window.count >= limit {
            return Err(BrokerError::too_many_requests(format!(
                "producer exceeded {} sends per second",
                limit
            )));
        }
        window.count += 1;
        Ok(())
    }
}

#[async_trait]
impl BrokerProducer for InMemoryProducer {
    async fn start(&self) -> Result<(), BrokerError> {
        if self.stopped.load(Ordering::Acquire) {
            return Err(BrokerError::client_stopped("producer"));
        }

        if let Some(checker) = &self.settings.transaction_checker {
            self.shared
                .lock()
                .checkers
                .insert(self.id.clone(), Arc::clone(checker));
        }
        self.running.store(true, Ordering::Release);

        debug!(
            producer_id = %self.id,
            endpoint = %self.settings.connection.endpoint,
            topics = ?self.settings.topics,
            max_attempts = self.settings.max_attempts,
            "In-memory producer started"
        );
        Ok(())
    }

    async fn send(&self, message: &OutboundMessage) -> Result<Vec<SendReceipt>, BrokerError> {
        self.ensure_running()?;
        if message.topic_type == TopicType::Transaction {
            return Err(BrokerError::new(
                BrokerErrorKind::MessageTypeMismatch,
                "transactional messages must be sent within a transaction",
            ));
        }
        self.acquire_send_permit()?;

        let receipt = publish(&self.shared, message, MessageStatus::Visible)?;
        Ok(vec![receipt])
    }

    async fn begin_transaction(&self) -> Result<Box<dyn BrokerTransaction>, BrokerError> {
        self.ensure_running()?;

        let id = uuid::Uuid::new_v4().to_string();
        self.shared.lock().transactions.insert(
            id.clone(),
            OpenTransaction {
                producer_id: self.id.clone(),
                half_messages: Vec::new(),
                opened_at: Instant::now(),
            },
        );

        Ok(Box::new(InMemoryTransaction {
            id,
            shared: Arc::clone(&self.shared),
        }))
    }

    async fn send_with_transaction(
        &self,
        message: &OutboundMessage,
        transaction: &dyn BrokerTransaction,
    ) -> Result<Vec<SendReceipt>, BrokerError> {
        self.ensure_running()?;
        self.acquire_send_permit()?;

        let status = MessageStatus::Prepared(transaction.transaction_id().to_string());
        let receipt = publish(&self.shared, message, status)?;
        Ok(vec![receipt])
    }

    async fn graceful_stop(&self) -> Result<(), BrokerError> {
        if self.stopped.swap(true, Ordering::AcqRel) {
            return Err(BrokerError::client_stopped("producer"));
        }
        self.running.store(false, Ordering::Release);
        debug!(producer_id = %self.id, "In-memory producer stopped");
        Ok(())
    }
}

/// Open transaction of an [`InMemoryProducer`]
pub struct InMemoryTransaction {
    id: String,
    shared: Arc<Shared>,
}

#[async_trait]
impl BrokerTransaction for InMemoryTransaction {
    fn transaction_id(&self) -> &str {
        &self.id
    }

    async fn commit(&self) -> Result<(), BrokerError> {
        resolve_transaction(&self.shared, &self.id, TransactionResolution::Commit)
    }

    async fn rollback(&self) -> Result<(), BrokerError> {
        resolve_transaction(&self.shared, &self.id, TransactionResolution::Rollback)
    }
}

// ============================================================================
// InMemorySimpleConsumer
// ============================================================================

/// Simple consumer client of an [`InMemoryBroker`]
pub struct InMemorySimpleConsumer {
    shared: Arc<Shared>,
    settings: ConsumerSettings,
    /// Compiled subscriptions, sorted by topic
    selectors: Vec<(String, Selector)>,
    running: AtomicBool,
    stopped: AtomicBool,
}

impl InMemorySimpleConsumer {
    fn ensure_running(&self) -> Result<(), BrokerError> {
        if self.stopped.load(Ordering::Acquire) {
            return Err(BrokerError::client_stopped("simple consumer"));
        }
        if !self.running.load(Ordering::Acquire) {
            return Err(BrokerError::new(
                BrokerErrorKind::ClientStopped,
                "simple consumer has not been started",
            ));
        }
        Ok(())
    }

    fn try_receive(&self, max_message_num: usize, invisible_duration: Duration) -> Vec<MessageView> {
        let now = Instant::now();
        let wall_now = Utc::now();
        let group = &self.settings.consumer_group;
        let mut received = Vec::new();

        let mut state = self.shared.lock();
        let BrokerState { topics, cursors, .. } = &mut *state;

        for (topic, selector) in &self.selectors {
            if received.len() >= max_message_num {
                break;
            }
            let Some(log) = topics.get(topic) else {
                continue;
            };
            let cursor = cursors
                .entry((group.clone(), topic.clone()))
                .or_default();

            // Message groups with an earlier message still leased or just delivered
            let mut busy_groups: HashSet<&str> = HashSet::new();
            let mut offset = cursor.low_watermark;

            while offset < log.messages.len() && received.len() < max_message_num {
                let stored = &log.messages[offset];

                if cursor.done.contains(&offset) {
                    offset += 1;
                    continue;
                }

                match stored.status {
                    MessageStatus::RolledBack => {
                        cursor.finish(offset);
                        offset += 1;
                        continue;
                    }
                    MessageStatus::Prepared(_) => {
                        offset += 1;
                        continue;
                    }
                    MessageStatus::Visible => {}
                }

                if let Some(lease) = cursor.leases.get(&offset) {
                    if lease.expires_at > now {
                        if let Some(message_group) = stored.message_group.as_deref() {
                            busy_groups.insert(message_group);
                        }
                        offset += 1;
                        continue;
                    }
                    cursor.leases.remove(&offset);
                }

                if stored.delivery_timestamp.is_some_and(|at| at > wall_now) {
                    offset += 1;
                    continue;
                }

                if !selector.matches(stored.tag.as_deref(), &stored.properties) {
                    cursor.finish(offset);
                    offset += 1;
                    continue;
                }

                if let Some(message_group) = stored.message_group.as_deref() {
                    if !busy_groups.insert(message_group) {
                        offset += 1;
                        continue;
                    }
                }

                let attempt = cursor.attempts.entry(offset).or_insert(0);
                *attempt += 1;
                let receipt_handle = new_receipt_handle();
                cursor.leases.insert(
                    offset,
                    Lease {
                        receipt_handle: receipt_handle.clone(),
                        expires_at: now + invisible_duration,
                    },
                );
                received.push(stored.view(*attempt, receipt_handle));
                offset += 1;
            }
        }

        received
    }

    fn with_lease<T>(
        &self,
        receipt: &MessageReceipt,
        action: impl FnOnce(&mut GroupCursor, usize) -> T,
    ) -> Result<T, BrokerError> {
        let mut state = self.shared.lock();
        let key = (self.settings.consumer_group.clone(), receipt.topic.clone());
        let cursor = state.cursors.get_mut(&key);

        match cursor.and_then(|c| c.lease_for(&receipt.receipt_handle).map(|offset| (c, offset))) {
            Some((cursor, offset)) => Ok(action(cursor, offset)),
            None => Err(BrokerError::new(
                BrokerErrorKind::InvalidReceipt,
                format!(
                    "receipt handle for message {} is unknown or superseded",
                    receipt.message_id
                ),
            )),
        }
    }
}

#[async_trait]
impl SimpleConsumerClient for InMemorySimpleConsumer {
    async fn start(&self) -> Result<(), BrokerError> {
        if self.stopped.load(Ordering::Acquire) {
            return Err(BrokerError::client_stopped("simple consumer"));
        }
        self.running.store(true, Ordering::Release);
        debug!(
            consumer_group = %self.settings.consumer_group,
            topics = self.selectors.len(),
            "In-memory simple consumer started"
        );
        Ok(())
    }

    fn consumer_group(&self) -> &str {
        &self.settings.consumer_group
    }

    async fn receive(
        &self,
        max_message_num: u32,
        invisible_duration: Duration,
    ) -> Result<Vec<MessageView>, BrokerError> {
        self.ensure_running()?;
        if max_message_num == 0 {
            return Err(BrokerError::new(
                BrokerErrorKind::Other,
                "max_message_num must be positive",
            ));
        }

        let deadline = Instant::now() + self.settings.await_duration;
        loop {
            // Register interest before inspecting state so no publish is missed
            let changed = self.shared.changed.notified();

            let received = self.try_receive(max_message_num as usize, invisible_duration);
            if !received.is_empty() {
                return Ok(received);
            }

            let now = Instant::now();
            if now >= deadline {
                return Err(BrokerError::message_not_found());
            }

            let wait = (deadline - now).min(self.shared.config.poll_interval);
            tokio::select! {
                _ = changed => {}
                _ = tokio::time::sleep(wait) => {}
            }

            self.ensure_running()?;
        }
    }

    async fn ack(&self, receipt: &MessageReceipt) -> Result<(), BrokerError> {
        self.ensure_running()?;
        self.with_lease(receipt, |cursor, offset| cursor.finish(offset))?;
        self.shared.changed.notify_waiters();
        Ok(())
    }

    async fn change_invisible_duration(
        &self,
        receipt: &MessageReceipt,
        invisible_duration: Duration,
    ) -> Result<MessageReceipt, BrokerError> {
        self.ensure_running()?;
        let receipt_handle = new_receipt_handle();
        let expires_at = Instant::now() + invisible_duration;

        self.with_lease(receipt, |cursor, offset| {
            cursor.leases.insert(
                offset,
                Lease {
                    receipt_handle: receipt_handle.clone(),
                    expires_at,
                },
            );
        })?;

        Ok(MessageReceipt {
            topic: receipt.topic.clone(),
            message_id: receipt.message_id.clone(),
            receipt_handle,
        })
    }

    async fn graceful_stop(&self) -> Result<(), BrokerError> {
        if self.stopped.swap(true, Ordering::AcqRel) {
            warn!(
                consumer_group = %self.settings.consumer_group,
                "Simple consumer stopped twice"
            );
            return Err(BrokerError::client_stopped("simple consumer"));
        }
        self.running.store(false, Ordering::Release);
        // Wake long-polling receive calls so they observe the stop
        self.shared.changed.notify_waiters();
        debug!(
            consumer_group = %self.settings.consumer_group,
            "In-memory simple consumer stopped"
        );
        Ok(())
    }
}
