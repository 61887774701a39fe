//! # rmq-facade demo
//!
//! Command-line scenarios exercising the producer and consumer facades
//! against an in-process broker:
//! - `produce` sends a batch of one message kind
//! - `consume` seeds the topics and runs a poll loop for a while
//! - `round-trip` produces every kind, then consumes everything

use clap::{Parser, Subcommand, ValueEnum};
use rand::Rng;
use rmq_facade::{
    telemetry, Client, ClientConfig, ConfigurationError, ConsumerOptions, FacadeError,
    FilterExpression, InMemoryBroker, InMemoryConfig, LogConfig, Message, MessageLease,
    ProducerOptions, TopicType, TransactionOutcome, TransactionResolution,
};
use std::path::PathBuf;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tracing::{info, warn};

pub const NORMAL_TOPIC: &str = "test_normal_demo";
pub const FIFO_TOPIC: &str = "test_fifo_demo";
pub const DELAY_TOPIC: &str = "test_delay_demo";
pub const TRANSACTION_TOPIC: &str = "test_transaction_demo";
pub const CONSUMER_GROUP: &str = "cg_test_demo";
pub const MESSAGE_GROUP: &str = "test_fifo_group";

/// How far in the future delay messages become visible
pub const DELAY: Duration = Duration::from_secs(10);

// ============================================================================
// CLI Structure
// ============================================================================

/// Producer and consumer scenarios for rmq-facade
#[derive(Parser, Debug)]
#[command(name = "rmq-facade-demo")]
#[command(version = env!("CARGO_PKG_VERSION"))]
#[command(about = "Runs producer and consumer scenarios against an in-memory broker")]
pub struct Cli {
    /// Client configuration file (YAML, TOML or JSON)
    #[arg(short, long, env = "RMQ_DEMO_CONFIG")]
    pub config: Option<PathBuf>,

    /// Enable JSON logging
    #[arg(long)]
    pub json_logs: bool,

    /// Subcommand to execute
    #[command(subcommand)]
    pub command: Commands,
}

/// Available scenarios
#[derive(Subcommand, Debug)]
pub enum Commands {
    /// Send a batch of messages of one kind
    Produce {
        #[arg(short, long, value_enum, default_value = "normal")]
        kind: ProduceKind,

        /// Number of messages to send
        #[arg(short = 'n', long, default_value = "5")]
        count: u32,

        /// Percentage of transactions the confirm callback commits
        #[arg(long, default_value = "50")]
        commit_rate: u32,
    },

    /// Seed the normal topic, then consume for a while
    Consume {
        /// Messages to seed before consuming
        #[arg(short = 'n', long, default_value = "5")]
        seed: u32,

        /// How long to keep the poll loop running, in seconds
        #[arg(short, long, default_value = "10")]
        duration: u64,

        /// Percentage of deliveries the handler fails on purpose
        #[arg(long, default_value = "30")]
        failure_rate: u32,
    },

    /// Produce every kind of message, then consume them all
    RoundTrip {
        #[arg(short = 'n', long, default_value = "5")]
        count: u32,

        #[arg(short, long, default_value = "15")]
        duration: u64,

        #[arg(long, default_value = "30")]
        failure_rate: u32,
    },
}

/// Message kinds the `produce` scenario can send
#[derive(Clone, Copy, Debug, PartialEq, Eq, ValueEnum)]
pub enum ProduceKind {
    Normal,
    Fifo,
    Delay,
    Async,
    Transaction,
}

impl ProduceKind {
    pub const ALL: [ProduceKind; 5] = [
        ProduceKind::Normal,
        ProduceKind::Fifo,
        ProduceKind::Delay,
        ProduceKind::Async,
        ProduceKind::Transaction,
    ];
}

// ============================================================================
// Error Types
// ============================================================================

/// Demo errors
#[derive(Debug, thiserror::Error)]
pub enum DemoError {
    #[error("Configuration error: {0}")]
    Configuration(#[from] ConfigurationError),

    #[error("Facade error: {0}")]
    Facade(#[from] FacadeError),

    #[error("Invalid argument: {arg} - {message}")]
    InvalidArgument { arg: String, message: String },
}

impl DemoError {
    /// Process exit code for this error
    pub fn exit_code(&self) -> i32 {
        match self {
            DemoError::Configuration(_) => 1,
            DemoError::Facade(_) => 2,
            DemoError::InvalidArgument { .. } => 4,
        }
    }
}

fn percentage(arg: &str, value: u32) -> Result<u32, DemoError> {
    if value > 100 {
        return Err(DemoError::InvalidArgument {
            arg: arg.to_string(),
            message: format!("{} is not a percentage", value),
        });
    }
    Ok(value)
}

fn roll(rate: u32) -> bool {
    rand::thread_rng().gen_range(0..100) < rate
}

// ============================================================================
// Demo Environment
// ============================================================================

/// Default configuration used when no file is given
pub fn default_config() -> ClientConfig {
    ClientConfig::new("127.0.0.1:8081", "test")
        .with_consumer_group(CONSUMER_GROUP)
        .with_debug(true)
        .with_log(LogConfig {
            stdout: true,
            ..LogConfig::default()
        })
}

/// Broker with the demo topics declared
pub fn demo_broker() -> InMemoryBroker {
    let broker = InMemoryBroker::new(InMemoryConfig::default());
    broker.create_topic(NORMAL_TOPIC, TopicType::Normal);
    broker.create_topic(FIFO_TOPIC, TopicType::Fifo);
    broker.create_topic(DELAY_TOPIC, TopicType::Delay);
    broker.create_topic(TRANSACTION_TOPIC, TopicType::Transaction);
    broker
}

/// Client over `broker` with a started producer
pub async fn demo_client(config: ClientConfig, broker: &InMemoryBroker) -> Result<Client, DemoError> {
    let client = Client::new(config, Arc::new(broker.clone()))?;
    let options = ProducerOptions::default()
        .with_topics([NORMAL_TOPIC, FIFO_TOPIC, DELAY_TOPIC, TRANSACTION_TOPIC])
        .with_max_attempts(3)
        .with_transaction_checker(|view| {
            info!(body = %view.body_str(), "Transaction checker committing message");
            TransactionResolution::Commit
        });
    client.start_producer(options).await?;
    Ok(client)
}

fn demo_message(topic: &str, kind: &str, i: u32) -> Message {
    let tag = format!("test_{}", kind);
    Message::new(topic, format!("{}msg{}", kind, i))
        .with_tag(tag.clone())
        .with_key(tag)
        .with_property("attr1", "1")
        .with_property("attr2", "2")
}

// ============================================================================
// Produce
// ============================================================================

/// Outcome counts of a produce run
#[derive(Debug, Default, Clone, PartialEq, Eq)]
pub struct ProduceReport {
    pub sent: usize,
    pub failed: usize,
    pub committed: usize,
    pub rolled_back: usize,
}

impl ProduceReport {
    fn merge(&mut self, other: &ProduceReport) {
        self.sent += other.sent;
        self.failed += other.failed;
        self.committed += other.committed;
        self.rolled_back += other.rolled_back;
    }

    /// Messages a consumer can eventually receive
    pub fn deliverable(&self) -> usize {
        self.sent - self.rolled_back
    }
}

/// Send `count` messages of `kind`
pub async fn produce(
    client: &Client,
    kind: ProduceKind,
    count: u32,
    commit_rate: u32,
) -> Result<ProduceReport, DemoError> {
    let mut report = ProduceReport::default();

    match kind {
        ProduceKind::Normal | ProduceKind::Fifo | ProduceKind::Delay => {
            for i in 1..=count {
                let (topic_type, message) = match kind {
                    ProduceKind::Fifo => (
                        TopicType::Fifo,
                        demo_message(FIFO_TOPIC, "fifo", i).with_message_group(MESSAGE_GROUP),
                    ),
                    ProduceKind::Delay => (
                        TopicType::Delay,
                        demo_message(DELAY_TOPIC, "delay", i)
                            .with_delivery_timestamp(
                                chrono::Utc::now() + chrono::Duration::seconds(DELAY.as_secs() as i64),
                            ),
                    ),
                    _ => (TopicType::Normal, demo_message(NORMAL_TOPIC, "normal", i)),
                };

                match client.send(topic_type, &message).await {
                    Ok(receipts) => {
                        report.sent += 1;
                        println!(
                            "message [{}] producer success: {}",
                            i,
                            serde_json::to_string(&receipts).unwrap_or_default()
                        );
                    }
                    Err(e) => {
                        report.failed += 1;
                        println!("message [{}] produce failed: {}", i, e);
                    }
                }
            }
        }
        ProduceKind::Async => {
            let mut pending = Vec::new();
            for i in 1..=count {
                let message = demo_message(NORMAL_TOPIC, "async", i);
                pending.push((i, client.send_async(TopicType::Normal, message)?));
            }
            for (i, send) in pending {
                let completion = send.await;
                match completion.result {
                    Ok(receipts) => {
                        report.sent += 1;
                        println!(
                            "message [{}] async producer success: {}",
                            i,
                            serde_json::to_string(&receipts).unwrap_or_default()
                        );
                    }
                    Err(e) => {
                        report.failed += 1;
                        println!("message [{}] async produce failed: {}", i, e);
                    }
                }
            }
        }
        ProduceKind::Transaction => {
            for i in 1..=count {
                let message = demo_message(TRANSACTION_TOPIC, "transaction", i);
                let outcome = client
                    .send_transaction(&message, |message, receipts| {
                        let commit = roll(commit_rate);
                        println!(
                            "message [{}] half sent: {}, confirm {}",
                            message.body_str(),
                            serde_json::to_string(receipts).unwrap_or_default(),
                            commit
                        );
                        commit
                    })
                    .await;

                match outcome {
                    Ok(TransactionOutcome::Committed(_)) => {
                        report.sent += 1;
                        report.committed += 1;
                    }
                    Ok(TransactionOutcome::RolledBack) => {
                        report.sent += 1;
                        report.rolled_back += 1;
                    }
                    Err(e) => {
                        report.failed += 1;
                        println!("message [{}] produce failed: {}", i, e);
                    }
                }
            }
        }
    }

    info!(kind = ?kind, report = ?report, "Produce finished");
    Ok(report)
}

// ============================================================================
// Consume
// ============================================================================

/// Outcome counts of a consume run
#[derive(Debug, Default, Clone, PartialEq, Eq)]
pub struct ConsumeReport {
    pub acked: usize,
    pub failed: usize,
}

/// Consumer options subscribing to every demo topic
pub fn demo_consumer_options() -> ConsumerOptions {
    ConsumerOptions::default()
        .with_subscription(NORMAL_TOPIC, FilterExpression::sub_all())
        .with_subscription(FIFO_TOPIC, FilterExpression::sub_all())
        .with_subscription(DELAY_TOPIC, FilterExpression::sub_all())
        .with_subscription(TRANSACTION_TOPIC, FilterExpression::sub_all())
        .with_await_duration(Duration::from_secs(5))
        .with_max_message_num(5)
        .with_invisible_duration(Duration::from_secs(10))
}

/// Run a poll loop for `duration`, failing `failure_rate` percent of deliveries
pub async fn consume(
    client: &Client,
    duration: Duration,
    failure_rate: u32,
) -> Result<ConsumeReport, DemoError> {
    let acked = Arc::new(AtomicUsize::new(0));
    let failed = Arc::new(AtomicUsize::new(0));

    let handler = {
        let acked = Arc::clone(&acked);
        let failed = Arc::clone(&failed);
        move |lease: MessageLease| {
            let acked = Arc::clone(&acked);
            let failed = Arc::clone(&failed);
            async move {
                let body = lease.message().body_str().into_owned();
                if roll(failure_rate) {
                    failed.fetch_add(1, Ordering::SeqCst);
                    println!("message [{}] consumer failed", body);
                    anyhow::bail!("random consume failure for {}", body);
                }

                lease.ack().await?;
                acked.fetch_add(1, Ordering::SeqCst);
                println!("message [{}] ack success", body);
                Ok(())
            }
        }
    };

    let handle = client
        .simple_consume(demo_consumer_options(), handler)
        .await?;
    tokio::time::sleep(duration).await;
    if let Err(e) = handle.stop().await {
        warn!(error = %e, "Consumer did not stop cleanly");
    }

    let report = ConsumeReport {
        acked: acked.load(Ordering::SeqCst),
        failed: failed.load(Ordering::SeqCst),
    };
    info!(report = ?report, "Consume finished");
    Ok(report)
}

// ============================================================================
// Main Entry Point
// ============================================================================

/// Resolve the client configuration for `cli`
pub fn load_configuration(cli: &Cli) -> Result<ClientConfig, DemoError> {
    let mut config = match &cli.config {
        Some(path) => ClientConfig::load(Some(path.as_path()))?,
        None => default_config(),
    };
    if cli.json_logs {
        config.log.json = true;
    }
    if config.consumer_group.trim().is_empty() {
        config.consumer_group = CONSUMER_GROUP.to_string();
    }
    Ok(config)
}

/// Execute the parsed command line
pub async fn run(cli: Cli) -> Result<(), DemoError> {
    let config = load_configuration(&cli)?;
    telemetry::init_logging(&config.log, config.debug)?;

    let broker = demo_broker();
    let client = demo_client(config, &broker).await?;

    match cli.command {
        Commands::Produce {
            kind,
            count,
            commit_rate,
        } => {
            let report = produce(&client, kind, count, percentage("commit-rate", commit_rate)?)
                .await?;
            println!("{:?}", report);
        }
        Commands::Consume {
            seed,
            duration,
            failure_rate,
        } => {
            let failure_rate = percentage("failure-rate", failure_rate)?;
            produce(&client, ProduceKind::Normal, seed, 100).await?;
            let report = consume(&client, Duration::from_secs(duration), failure_rate).await?;
            println!("{:?}", report);
        }
        Commands::RoundTrip {
            count,
            duration,
            failure_rate,
        } => {
            let failure_rate = percentage("failure-rate", failure_rate)?;
            let mut produced = ProduceReport::default();
            for kind in ProduceKind::ALL {
                produced.merge(&produce(&client, kind, count, 50).await?);
            }
            let consumed = consume(&client, Duration::from_secs(duration), failure_rate).await?;
            println!("produced {:?}, consumed {:?}", produced, consumed);
        }
    }

    client.stop_producer().await?;
    Ok(())
}

/// Parse the command line and run it
pub async fn run_cli() -> Result<(), DemoError> {
    run(Cli::parse()).await
}

#[cfg(test)]
#[path = "lib_tests.rs"]
mod tests;
