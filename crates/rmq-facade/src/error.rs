//! Error types for producer, consumer and broker operations.

use crate::message::TopicType;
use std::fmt;
use thiserror::Error;

/// Top-level error returned by the producer and consumer facades
#[derive(Debug, Error)]
pub enum FacadeError {
    #[error("Validation error: {0}")]
    Validation(#[from] ValidationError),

    #[error("Configuration error: {0}")]
    Configuration(#[from] ConfigurationError),

    #[error("{operation} does not support {topic_type} messages")]
    UnsupportedOperation {
        operation: &'static str,
        topic_type: TopicType,
    },

    #[error("Producer is not started or has already been stopped")]
    ProducerNotStarted,

    #[error("Transaction {transaction_id} abandoned before commit or rollback: {reason}")]
    TransactionAbandoned {
        transaction_id: String,
        reason: String,
    },

    #[error("Broker error: {0}")]
    Broker(#[from] BrokerError),
}

impl FacadeError {
    /// Check if the broker rejected the call because of flow control
    pub fn is_too_many_requests(&self) -> bool {
        matches!(self, Self::Broker(e) if e.is_too_many_requests())
    }

    /// Check if a receive call found nothing to deliver
    pub fn is_no_new_message(&self) -> bool {
        matches!(self, Self::Broker(e) if e.is_no_new_message())
    }

    /// Check if the error is transient and the caller may try again
    pub fn is_transient(&self) -> bool {
        match self {
            Self::Validation(_) => false,
            Self::Configuration(_) => false,
            Self::UnsupportedOperation { .. } => false,
            Self::ProducerNotStarted => false,
            Self::TransactionAbandoned { .. } => false,
            Self::Broker(e) => e.is_transient(),
        }
    }
}

/// Returns true when `err` is the broker's flow-control signal.
pub fn is_too_many_requests(err: &FacadeError) -> bool {
    err.is_too_many_requests()
}

/// Returns true when `err` is the broker's "no message available" signal.
pub fn is_no_new_message(err: &FacadeError) -> bool {
    err.is_no_new_message()
}

/// Classification of errors reported by the broker client
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum BrokerErrorKind {
    /// Flow control kicked in; the request was not accepted
    TooManyRequests,
    /// A receive call completed without any message to deliver
    MessageNotFound,
    /// The producer or consumer handle has been stopped
    ClientStopped,
    /// The transaction is unknown or already resolved
    TransactionNotFound,
    /// The receipt handle is unknown or its lease has expired
    InvalidReceipt,
    /// A subscription filter expression could not be parsed
    InvalidFilter,
    /// The message type does not match the topic's declared type
    MessageTypeMismatch,
    /// Connection to the endpoint failed
    Connection,
    /// Anything else reported by the client
    Other,
}

impl fmt::Display for BrokerErrorKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            Self::TooManyRequests => "TOO_MANY_REQUESTS",
            Self::MessageNotFound => "MESSAGE_NOT_FOUND",
            Self::ClientStopped => "CLIENT_STOPPED",
            Self::TransactionNotFound => "TRANSACTION_NOT_FOUND",
            Self::InvalidReceipt => "INVALID_RECEIPT_HANDLE",
            Self::InvalidFilter => "ILLEGAL_FILTER_EXPRESSION",
            Self::MessageTypeMismatch => "ILLEGAL_MESSAGE_TYPE",
            Self::Connection => "CONNECTION_FAILED",
            Self::Other => "INTERNAL_ERROR",
        };
        f.write_str(name)
    }
}

/// Error reported by a broker client implementation
#[derive(Debug, Clone, PartialEq, Eq, Error)]
#[error("{kind} - {message}")]
pub struct BrokerError {
    kind: BrokerErrorKind,
    message: String,
}

impl BrokerError {
    /// Create a new broker error
    pub fn new(kind: BrokerErrorKind, message: impl Into<String>) -> Self {
        Self {
            kind,
            message: message.into(),
        }
    }

    pub fn too_many_requests(message: impl Into<String>) -> Self {
        Self::new(BrokerErrorKind::TooManyRequests, message)
    }

    pub fn message_not_found() -> Self {
        Self::new(BrokerErrorKind::MessageNotFound, "no new message")
    }

    pub fn client_stopped(client: &str) -> Self {
        Self::new(
            BrokerErrorKind::ClientStopped,
            format!("{} has been stopped", client),
        )
    }

    /// Get error classification
    pub fn kind(&self) -> BrokerErrorKind {
        self.kind
    }

    /// Get error detail
    pub fn message(&self) -> &str {
        &self.message
    }

    pub fn is_too_many_requests(&self) -> bool {
        self.kind == BrokerErrorKind::TooManyRequests
    }

    pub fn is_no_new_message(&self) -> bool {
        self.kind == BrokerErrorKind::MessageNotFound
    }

    pub fn is_client_stopped(&self) -> bool {
        self.kind == BrokerErrorKind::ClientStopped
    }

    /// Check if error is transient
    pub fn is_transient(&self) -> bool {
        matches!(
            self.kind,
            BrokerErrorKind::TooManyRequests
                | BrokerErrorKind::MessageNotFound
                | BrokerErrorKind::Connection
        )
    }
}

/// Configuration errors
#[derive(Debug, Error)]
pub enum ConfigurationError {
    #[error("Invalid configuration: {message}")]
    Invalid { message: String },

    #[error("Missing required configuration: {key}")]
    Missing { key: String },

    #[error("Configuration parsing failed: {message}")]
    Parsing { message: String },
}

/// Validation errors for messages and consumer options
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum ValidationError {
    #[error("Required field missing: {field}")]
    Required { field: String },

    #[error("Invalid format for {field}: {message}")]
    InvalidFormat { field: String, message: String },

    #[error("Value out of range for {field}: {message}")]
    OutOfRange { field: String, message: String },
}

impl ValidationError {
    pub(crate) fn required(field: &str) -> Self {
        Self::Required {
            field: field.to_string(),
        }
    }
}

#[cfg(test)]
#[path = "error_tests.rs"]
mod tests;
