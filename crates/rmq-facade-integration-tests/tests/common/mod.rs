//! Common test utilities for rmq-facade integration tests
//!
//! This module provides:
//! - Configuration and broker fixtures
//! - A handler that forwards every delivery to a channel
//! - Helpers for waiting on deliveries with a timeout

use rmq_facade::{
    ClientConfig, ConsumerOptions, FilterExpression, InMemoryBroker, InMemoryConfig, MessageHandler,
    MessageLease, Producer, ProducerOptions,
};
use std::time::Duration;
use tokio::sync::mpsc;

pub const ENDPOINT: &str = "127.0.0.1:8081";
pub const NAMESPACE: &str = "it";

/// Consumer-capable configuration for `group`
#[allow(dead_code)]
pub fn config(group: &str) -> ClientConfig {
    ClientConfig::new(ENDPOINT, NAMESPACE).with_consumer_group(group)
}

/// Broker with a short long-poll interval
#[allow(dead_code)]
pub fn broker() -> InMemoryBroker {
    broker_with(InMemoryConfig::default())
}

#[allow(dead_code)]
pub fn broker_with(config: InMemoryConfig) -> InMemoryBroker {
    InMemoryBroker::new(InMemoryConfig {
        poll_interval: Duration::from_millis(20),
        ..config
    })
}

#[allow(dead_code)]
pub async fn producer(broker: &InMemoryBroker) -> Producer {
    producer_with(broker, ProducerOptions::default()).await
}

#[allow(dead_code)]
pub async fn producer_with(broker: &InMemoryBroker, options: ProducerOptions) -> Producer {
    Producer::start(&ClientConfig::new(ENDPOINT, NAMESPACE), options, broker)
        .await
        .expect("producer should start")
}

/// Options subscribing to every message on `topic`, with a short await
#[allow(dead_code)]
pub fn subscribe(topic: &str) -> ConsumerOptions {
    ConsumerOptions::default()
        .with_subscription(topic, FilterExpression::sub_all())
        .with_await_duration(Duration::from_millis(200))
}

/// A delivery observed by [`forwarding_handler`]
#[derive(Debug, Clone)]
#[allow(dead_code)]
pub struct Delivery {
    pub body: String,
    pub attempt: u32,
}

/// Handler forwarding each delivery, acknowledging it when `ack` is set
#[allow(dead_code)]
pub fn forwarding_handler(ack: bool) -> (impl MessageHandler, mpsc::UnboundedReceiver<Delivery>) {
    let (tx, rx) = mpsc::unbounded_channel();
    let handler = move |lease: MessageLease| {
        let tx = tx.clone();
        async move {
            if ack {
                lease.ack().await?;
            }
            let view = lease.message();
            tx.send(Delivery {
                body: view.body_str().into_owned(),
                attempt: view.delivery_attempt,
            })?;
            Ok::<_, anyhow::Error>(())
        }
    };
    (handler, rx)
}

/// Wait for the next delivery, failing the test after `timeout`
#[allow(dead_code)]
pub async fn next_delivery(rx: &mut mpsc::UnboundedReceiver<Delivery>, timeout: Duration) -> Delivery {
    tokio::time::timeout(timeout, rx.recv())
        .await
        .expect("delivery should arrive in time")
        .expect("handler channel should stay open")
}

/// Assert nothing is delivered for `window`
#[allow(dead_code)]
pub async fn assert_quiet(rx: &mut mpsc::UnboundedReceiver<Delivery>, window: Duration) {
    if let Ok(Some(delivery)) = tokio::time::timeout(window, rx.recv()).await {
        panic!("unexpected delivery {:?}", delivery);
    }
}
