//! Integration tests for transactional sends
//!
//! These tests verify:
//! - Committed half messages become visible to consumers
//! - Rolled back half messages are never delivered
//! - Abandoned transactions are recovered by the broker's checker

mod common;

use common::{
    assert_quiet, broker, broker_with, config, forwarding_handler, next_delivery, producer,
    producer_with, subscribe,
};
use rmq_facade::{
    simple_consume, FacadeError, InMemoryConfig, Message, ProducerOptions, TopicType,
    TransactionOutcome, TransactionResolution,
};
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Duration;

const WAIT: Duration = Duration::from_secs(3);

#[tokio::test]
async fn test_committed_message_is_delivered() {
    let broker = broker();
    broker.create_topic("payments", TopicType::Transaction);
    let producer = producer(&broker).await;
    let (handler, mut rx) = forwarding_handler(true);
    let handle = simple_consume(&config("g"), subscribe("payments"), &broker, handler)
        .await
        .unwrap();

    let outcome = producer
        .send_transaction(&Message::new("payments", "charge-1"), |_, receipts| {
            receipts.len() == 1
        })
        .await
        .unwrap();

    assert!(matches!(outcome, TransactionOutcome::Committed(_)));
    assert_eq!(next_delivery(&mut rx, WAIT).await.body, "charge-1");
    assert_eq!(broker.open_transaction_count(), 0);
    handle.stop().await.unwrap();
}

#[tokio::test]
async fn test_rolled_back_message_is_never_delivered() {
    let broker = broker();
    let producer = producer(&broker).await;
    let (handler, mut rx) = forwarding_handler(true);
    let handle = simple_consume(&config("g"), subscribe("payments"), &broker, handler)
        .await
        .unwrap();

    let outcome = producer
        .send_transaction(&Message::new("payments", "charge-2"), |_, _| false)
        .await
        .unwrap();

    assert_eq!(outcome, TransactionOutcome::RolledBack);
    assert_quiet(&mut rx, Duration::from_millis(1500)).await;
    handle.stop().await.unwrap();
}

#[tokio::test]
async fn test_half_message_invisible_until_commit() {
    let broker = broker();
    let producer = producer(&broker).await;
    let (handler, mut rx) = forwarding_handler(true);
    let handle = simple_consume(&config("g"), subscribe("payments"), &broker, handler)
        .await
        .unwrap();

    let mut tx = producer.begin_transaction().await.unwrap();
    producer
        .send_in_transaction(&mut tx, &Message::new("payments", "pending"))
        .await
        .unwrap();
    assert_quiet(&mut rx, Duration::from_millis(500)).await;
    tx.commit().await.unwrap();

    assert_eq!(next_delivery(&mut rx, WAIT).await.body, "pending");
    handle.stop().await.unwrap();
}

#[tokio::test]
async fn test_abandoned_transaction_recovered_by_checker() {
    // Arrange
    let broker = broker_with(InMemoryConfig {
        transaction_check_delay: Duration::ZERO,
        ..InMemoryConfig::default()
    });
    let checked = Arc::new(AtomicUsize::new(0));
    let counter = Arc::clone(&checked);
    let options = ProducerOptions::default().with_transaction_checker(move |view| {
        counter.fetch_add(1, Ordering::SeqCst);
        assert_eq!(view.body_str(), "orphan");
        TransactionResolution::Commit
    });
    let producer = producer_with(&broker, options).await;

    let result = producer
        .send_transaction(&Message::new("payments", "orphan"), |_, _| {
            panic!("process crashed before deciding")
        })
        .await;
    assert!(matches!(result, Err(FacadeError::TransactionAbandoned { .. })));
    assert_eq!(broker.open_transaction_count(), 1);

    // Act
    let resolved = broker.check_transactions();

    // Assert
    assert_eq!(resolved, 1);
    assert_eq!(checked.load(Ordering::SeqCst), 1);
    assert_eq!(broker.open_transaction_count(), 0);

    let (handler, mut rx) = forwarding_handler(true);
    let handle = simple_consume(&config("g"), subscribe("payments"), &broker, handler)
        .await
        .unwrap();
    assert_eq!(next_delivery(&mut rx, WAIT).await.body, "orphan");
    handle.stop().await.unwrap();
}

#[tokio::test]
async fn test_unknown_resolution_keeps_transaction_open() {
    let broker = broker_with(InMemoryConfig {
        transaction_check_delay: Duration::ZERO,
        ..InMemoryConfig::default()
    });
    let options =
        ProducerOptions::default().with_transaction_checker(|_| TransactionResolution::Unknown);
    let producer = producer_with(&broker, options).await;
    let mut tx = producer.begin_transaction().await.unwrap();
    producer
        .send_in_transaction(&mut tx, &Message::new("payments", "undecided"))
        .await
        .unwrap();
    drop(tx);

    assert_eq!(broker.check_transactions(), 0);
    assert_eq!(broker.open_transaction_count(), 1);
}
