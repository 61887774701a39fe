//! Recording doubles for the broker seam, shared by the unit tests.

use crate::broker::{
    BrokerConnector, BrokerProducer, BrokerTransaction, ConsumerSettings, ProducerSettings,
    SimpleConsumerClient,
};
use crate::envelope::OutboundMessage;
use crate::error::BrokerError;
use crate::message::{MessageId, MessageReceipt, MessageView, ReceiptHandle, SendReceipt};
use async_trait::async_trait;
use bytes::Bytes;
use chrono::Utc;
use std::collections::{HashMap, VecDeque};
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;
use tokio::time::Instant;

/// Everything the doubles observed, plus scripted failures
#[derive(Default)]
pub(crate) struct Recorded {
    pub producers_created: AtomicUsize,
    pub consumers_created: AtomicUsize,
    pub producer_settings: Mutex<Option<ProducerSettings>>,
    pub consumer_settings: Mutex<Option<ConsumerSettings>>,

    pub sends: Mutex<Vec<OutboundMessage>>,
    pub begins: AtomicUsize,
    pub commits: AtomicUsize,
    pub rollbacks: AtomicUsize,
    pub producer_stopped: AtomicBool,
    pub fail_send: Mutex<Option<BrokerError>>,
    pub fail_commit: Mutex<Option<BrokerError>>,
    /// Delay applied to every send
    pub send_delay: Mutex<Option<Duration>>,

    /// Scripted receive results; an empty script reports MessageNotFound
    pub receive_script: Mutex<VecDeque<Result<Vec<MessageView>, BrokerError>>>,
    pub receive_calls: Mutex<Vec<Instant>>,
    pub acks: Mutex<Vec<MessageReceipt>>,
    pub invisible_changes: Mutex<Vec<(MessageReceipt, Duration)>>,
    pub consumer_stopped: AtomicBool,
}

impl Recorded {
    pub fn sent(&self) -> Vec<OutboundMessage> {
        self.sends.lock().unwrap().clone()
    }

    pub fn receive_count(&self) -> usize {
        self.receive_calls.lock().unwrap().len()
    }
}

/// Connector handing out recording producers and scripted consumers
#[derive(Clone, Default)]
pub(crate) struct RecordingBroker {
    pub recorded: Arc<Recorded>,
}

impl RecordingBroker {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn fail_sends_with(&self, err: BrokerError) {
        *self.recorded.fail_send.lock().unwrap() = Some(err);
    }

    pub fn fail_commits_with(&self, err: BrokerError) {
        *self.recorded.fail_commit.lock().unwrap() = Some(err);
    }

    pub fn delay_sends(&self, delay: Duration) {
        *self.recorded.send_delay.lock().unwrap() = Some(delay);
    }

    pub fn script_receive(&self, result: Result<Vec<MessageView>, BrokerError>) {
        self.recorded.receive_script.lock().unwrap().push_back(result);
    }
}

impl BrokerConnector for RecordingBroker {
    fn create_producer(
        &self,
        settings: ProducerSettings,
    ) -> Result<Arc<dyn BrokerProducer>, BrokerError> {
        self.recorded.producers_created.fetch_add(1, Ordering::SeqCst);
        *self.recorded.producer_settings.lock().unwrap() = Some(settings);
        Ok(Arc::new(RecordingProducer {
            recorded: Arc::clone(&self.recorded),
        }))
    }

    fn create_simple_consumer(
        &self,
        settings: ConsumerSettings,
    ) -> Result<Arc<dyn SimpleConsumerClient>, BrokerError> {
        self.recorded.consumers_created.fetch_add(1, Ordering::SeqCst);
        *self.recorded.consumer_settings.lock().unwrap() = Some(settings.clone());
        Ok(Arc::new(ScriptedConsumer {
            recorded: Arc::clone(&self.recorded),
            consumer_group: settings.consumer_group,
        }))
    }
}

pub(crate) struct RecordingProducer {
    recorded: Arc<Recorded>,
}

impl RecordingProducer {
    async fn record_send(
        &self,
        message: &OutboundMessage,
        transaction_id: Option<String>,
    ) -> Result<Vec<SendReceipt>, BrokerError> {
        let delay = *self.recorded.send_delay.lock().unwrap();
        if let Some(delay) = delay {
            tokio::time::sleep(delay).await;
        }
        if let Some(err) = self.recorded.fail_send.lock().unwrap().clone() {
            return Err(err);
        }

        let mut sends = self.recorded.sends.lock().unwrap();
        sends.push(message.clone());
        Ok(vec![SendReceipt {
            message_id: MessageId::new(),
            transaction_id,
            offset: (sends.len() - 1) as u64,
        }])
    }
}

#[async_trait]
impl BrokerProducer for RecordingProducer {
    async fn start(&self) -> Result<(), BrokerError> {
        Ok(())
    }

    async fn send(&self, message: &OutboundMessage) -> Result<Vec<SendReceipt>, BrokerError> {
        self.record_send(message, None).await
    }

    async fn begin_transaction(&self) -> Result<Box<dyn BrokerTransaction>, BrokerError> {
        let n = self.recorded.begins.fetch_add(1, Ordering::SeqCst);
        Ok(Box::new(RecordingTransaction {
            id: format!("tx-{}", n),
            recorded: Arc::clone(&self.recorded),
        }))
    }

    async fn send_with_transaction(
        &self,
        message: &OutboundMessage,
        transaction: &dyn BrokerTransaction,
    ) -> Result<Vec<SendReceipt>, BrokerError> {
        self.record_send(message, Some(transaction.transaction_id().to_string()))
            .await
    }

    async fn graceful_stop(&self) -> Result<(), BrokerError> {
        self.recorded.producer_stopped.store(true, Ordering::SeqCst);
        Ok(())
    }
}

pub(crate) struct RecordingTransaction {
    id: String,
    recorded: Arc<Recorded>,
}

#[async_trait]
impl BrokerTransaction for RecordingTransaction {
    fn transaction_id(&self) -> &str {
        &self.id
    }

    async fn commit(&self) -> Result<(), BrokerError> {
        self.recorded.commits.fetch_add(1, Ordering::SeqCst);
        match self.recorded.fail_commit.lock().unwrap().clone() {
            Some(err) => Err(err),
            None => Ok(()),
        }
    }

    async fn rollback(&self) -> Result<(), BrokerError> {
        self.recorded.rollbacks.fetch_add(1, Ordering::SeqCst);
        Ok(())
    }
}

pub(crate) struct ScriptedConsumer {
    recorded: Arc<Recorded>,
    consumer_group: String,
}

#[async_trait]
impl SimpleConsumerClient for ScriptedConsumer {
    async fn start(&self) -> Result<(), BrokerError> {
        Ok(())
    }

    fn consumer_group(&self) -> &str {
        &self.consumer_group
    }

    async fn receive(
        &self,
        _max_message_num: u32,
        _invisible_duration: Duration,
    ) -> Result<Vec<MessageView>, BrokerError> {
        self.recorded.receive_calls.lock().unwrap().push(Instant::now());
        if self.recorded.consumer_stopped.load(Ordering::SeqCst) {
            return Err(BrokerError::client_stopped("simple consumer"));
        }
        let next = self.recorded.receive_script.lock().unwrap().pop_front();
        next.unwrap_or_else(|| Err(BrokerError::message_not_found()))
    }

    async fn ack(&self, receipt: &MessageReceipt) -> Result<(), BrokerError> {
        self.recorded.acks.lock().unwrap().push(receipt.clone());
        Ok(())
    }

    async fn change_invisible_duration(
        &self,
        receipt: &MessageReceipt,
        invisible_duration: Duration,
    ) -> Result<MessageReceipt, BrokerError> {
        self.recorded
            .invisible_changes
            .lock()
            .unwrap()
            .push((receipt.clone(), invisible_duration));
        Ok(MessageReceipt {
            receipt_handle: ReceiptHandle::new(format!("{}-renewed", receipt.receipt_handle)),
            ..receipt.clone()
        })
    }

    async fn graceful_stop(&self) -> Result<(), BrokerError> {
        self.recorded.consumer_stopped.store(true, Ordering::SeqCst);
        Ok(())
    }
}

/// Build a delivered message view for scripted receives
pub(crate) fn view(topic: &str, body: &str) -> MessageView {
    view_with_properties(topic, body, HashMap::new())
}

pub(crate) fn view_with_properties(
    topic: &str,
    body: &str,
    properties: HashMap<String, String>,
) -> MessageView {
    MessageView {
        message_id: MessageId::new(),
        topic: topic.to_string(),
        body: Bytes::from(body.to_string()),
        tag: None,
        message_group: None,
        keys: Vec::new(),
        properties,
        delivery_timestamp: None,
        born_timestamp: Utc::now(),
        delivery_attempt: 1,
        receipt_handle: ReceiptHandle::new(uuid::Uuid::new_v4().simple().to_string()),
    }
}
