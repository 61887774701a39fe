//! Tests for the demo scenarios.

use super::*;
use std::io::Write;

async fn client(broker: &InMemoryBroker) -> Client {
    demo_client(default_config(), broker).await.unwrap()
}

/// Test CLI argument parsing
#[test]
fn test_cli_parsing() {
    // Act
    let cli = Cli::try_parse_from(["rmq-facade-demo", "produce", "--kind", "fifo", "-n", "3"]).unwrap();

    // Assert
    match cli.command {
        Commands::Produce { kind, count, commit_rate } => {
            assert_eq!(kind, ProduceKind::Fifo);
            assert_eq!(count, 3);
            assert_eq!(commit_rate, 50);
        }
        other => panic!("Expected Produce command, got {:?}", other),
    }
}

/// Test round-trip default arguments
#[test]
fn test_round_trip_defaults() {
    // Act
    let cli = Cli::try_parse_from(["rmq-facade-demo", "round-trip"]).unwrap();

    // Assert
    match cli.command {
        Commands::RoundTrip { count, duration, failure_rate } => {
            assert_eq!(count, 5);
            assert_eq!(duration, 15);
            assert_eq!(failure_rate, 30);
        }
        other => panic!("Expected RoundTrip command, got {:?}", other),
    }
}

/// Test that percentage rejects out of range
#[test]
fn test_percentage_rejects_out_of_range() {
    // Act
    let err = percentage("failure-rate", 101).unwrap_err();

    // Assert
    assert!(matches!(err, DemoError::InvalidArgument { ref arg, .. } if arg == "failure-rate"));
    assert_eq!(err.exit_code(), 4);
}

/// Test that loading a config file fills in the consumer group
#[test]
fn test_configuration_file_fills_consumer_group() {
    // Arrange
    let mut file = tempfile::Builder::new().suffix(".yaml").tempfile().unwrap();
    writeln!(file, "endpoint: \"10.0.0.1:8081\"\nnamespace: \"staging\"").unwrap();
    let cli = Cli {
        config: Some(file.path().to_path_buf()),
        json_logs: true,
        command: Commands::Produce {
            kind: ProduceKind::Normal,
            count: 1,
            commit_rate: 50,
        },
    };

    // Act
    let config = load_configuration(&cli).unwrap();

    // Assert
    assert_eq!(config.endpoint, "10.0.0.1:8081");
    assert_eq!(config.namespace, "staging");
    assert_eq!(config.consumer_group, CONSUMER_GROUP);
    assert!(config.log.json);
}

// ============================================================================
// Produce Tests
// ============================================================================

mod produce_scenarios {
    use super::*;

    /// Test that each plain kind lands on its own topic
    #[tokio::test]
    async fn test_each_plain_kind_lands_on_its_topic() {
        // Arrange
        let broker = demo_broker();
        let client = client(&broker).await;

        // Act & Assert
        for (kind, topic) in [
            (ProduceKind::Normal, NORMAL_TOPIC),
            (ProduceKind::Fifo, FIFO_TOPIC),
            (ProduceKind::Delay, DELAY_TOPIC),
        ] {
            let report = produce(&client, kind, 3, 50).await.unwrap();

            assert_eq!(report.sent, 3, "kind {:?}", kind);
            assert_eq!(report.failed, 0);
            assert_eq!(broker.message_count(topic), 3);
        }
    }

    /// Test that async sends all complete
    #[tokio::test]
    async fn test_async_sends_all_complete() {
        // Arrange
        let broker = demo_broker();
        let client = client(&broker).await;

        // Act
        let report = produce(&client, ProduceKind::Async, 4, 50).await.unwrap();

        // Assert
        assert_eq!(report.sent, 4);
        assert_eq!(broker.message_count(NORMAL_TOPIC), 4);
    }

    /// Test that transactions follow commit rate
    #[tokio::test]
    async fn test_transactions_follow_commit_rate() {
        // Arrange
        let broker = demo_broker();
        let client = client(&broker).await;

        // Act
        let all = produce(&client, ProduceKind::Transaction, 3, 100).await.unwrap();
        let none = produce(&client, ProduceKind::Transaction, 2, 0).await.unwrap();

        // Assert
        assert_eq!(all.committed, 3);
        assert_eq!(all.rolled_back, 0);
        assert_eq!(none.rolled_back, 2);
        assert_eq!(none.deliverable(), 0);
        assert_eq!(broker.open_transaction_count(), 0);
    }
}

// ============================================================================
// Consume Tests
// ============================================================================

mod consume_scenarios {
    use super::*;

    /// Test that consume acks everything when nothing fails
    #[tokio::test]
    async fn test_consume_acks_everything_without_failures() {
        // Arrange
        let broker = demo_broker();
        let client = client(&broker).await;
        produce(&client, ProduceKind::Normal, 3, 100).await.unwrap();

        // Act
        let report = consume(&client, Duration::from_millis(500), 0).await.unwrap();

        // Assert
        assert_eq!(report, ConsumeReport { acked: 3, failed: 0 });
        assert_eq!(broker.in_flight_count(CONSUMER_GROUP), 0);
    }

    /// Test that a failing handler never acks
    #[tokio::test]
    async fn test_failing_handler_never_acks() {
        // Arrange
        let broker = demo_broker();
        let client = client(&broker).await;
        produce(&client, ProduceKind::Normal, 2, 100).await.unwrap();

        // Act
        let report = consume(&client, Duration::from_millis(500), 100).await.unwrap();

        // Assert
        assert_eq!(report.acked, 0);
        assert_eq!(report.failed, 2);
    }
}
