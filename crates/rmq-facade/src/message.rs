//! Message types shared by producers, consumers and broker implementations.

use crate::error::ValidationError;
use bytes::Bytes;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::str::FromStr;

// ============================================================================
// Topic Types
// ============================================================================

/// Kind of topic a message is sent to
///
/// The topic type decides which message fields are mandatory and which send
/// operation may be used.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "UPPERCASE")]
pub enum TopicType {
    Normal,
    Fifo,
    Delay,
    Transaction,
}

impl TopicType {
    /// Get the topic type name as used by the broker admin tooling
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Normal => "NORMAL",
            Self::Fifo => "FIFO",
            Self::Delay => "DELAY",
            Self::Transaction => "TRANSACTION",
        }
    }
}

impl std::fmt::Display for TopicType {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for TopicType {
    type Err = ValidationError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_uppercase().as_str() {
            "NORMAL" => Ok(Self::Normal),
            "FIFO" => Ok(Self::Fifo),
            "DELAY" => Ok(Self::Delay),
            "TRANSACTION" => Ok(Self::Transaction),
            other => Err(ValidationError::InvalidFormat {
                field: "topic_type".to_string(),
                message: format!("unknown topic type '{}'", other),
            }),
        }
    }
}

// ============================================================================
// Identifiers
// ============================================================================

/// Broker-assigned message identifier
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct MessageId(String);

impl MessageId {
    /// Generate new random message ID
    pub fn new() -> Self {
        Self(uuid::Uuid::new_v4().simple().to_string().to_uppercase())
    }

    /// Get message ID as string
    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl Default for MessageId {
    fn default() -> Self {
        Self::new()
    }
}

impl std::fmt::Display for MessageId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.0)
    }
}

impl FromStr for MessageId {
    type Err = ValidationError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        if s.is_empty() {
            return Err(ValidationError::required("message_id"));
        }

        Ok(Self(s.to_string()))
    }
}

/// Opaque token identifying one delivery of a received message
///
/// A new handle is issued on every delivery and on every lease extension;
/// only the latest handle can acknowledge the message.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct ReceiptHandle(String);

impl ReceiptHandle {
    pub fn new(handle: String) -> Self {
        Self(handle)
    }

    /// Get handle string
    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl std::fmt::Display for ReceiptHandle {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.0)
    }
}

// ============================================================================
// Message Types
// ============================================================================

/// A message to be sent through a producer
///
/// Only `topic` and `body` are always required. `message_group` is required
/// for FIFO topics and `delivery_timestamp` for delay topics; both are
/// ignored for every other topic type.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Message {
    pub body: Bytes,
    pub topic: String,
    pub tag: Option<String>,
    pub message_group: Option<String>,
    pub keys: Vec<String>,
    pub properties: HashMap<String, String>,
    pub delivery_timestamp: Option<DateTime<Utc>>,
}

impl Message {
    /// Create new message for a topic
    pub fn new(topic: impl Into<String>, body: impl Into<Bytes>) -> Self {
        Self {
            body: body.into(),
            topic: topic.into(),
            ..Self::default()
        }
    }

    /// Set the classification tag
    pub fn with_tag(mut self, tag: impl Into<String>) -> Self {
        self.tag = Some(tag.into());
        self
    }

    /// Set the message group for ordered delivery (FIFO topics only)
    pub fn with_message_group(mut self, group: impl Into<String>) -> Self {
        self.message_group = Some(group.into());
        self
    }

    /// Add a secondary index key
    pub fn with_key(mut self, key: impl Into<String>) -> Self {
        self.keys.push(key.into());
        self
    }

    /// Add a user property
    pub fn with_property(mut self, key: impl Into<String>, value: impl Into<String>) -> Self {
        self.properties.insert(key.into(), value.into());
        self
    }

    /// Set the earliest delivery time (delay topics only)
    pub fn with_delivery_timestamp(mut self, at: DateTime<Utc>) -> Self {
        self.delivery_timestamp = Some(at);
        self
    }

    /// Body rendered as UTF-8, lossy
    pub fn body_str(&self) -> std::borrow::Cow<'_, str> {
        String::from_utf8_lossy(&self.body)
    }
}

/// Broker acknowledgment for a sent message
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SendReceipt {
    pub message_id: MessageId,
    pub transaction_id: Option<String>,
    pub offset: u64,
}

/// A message delivered to a simple consumer
#[derive(Debug, Clone)]
pub struct MessageView {
    pub message_id: MessageId,
    pub topic: String,
    pub body: Bytes,
    pub tag: Option<String>,
    pub message_group: Option<String>,
    pub keys: Vec<String>,
    pub properties: HashMap<String, String>,
    pub delivery_timestamp: Option<DateTime<Utc>>,
    pub born_timestamp: DateTime<Utc>,
    /// Number of times this message has been delivered, starting at 1
    pub delivery_attempt: u32,
    pub receipt_handle: ReceiptHandle,
}

impl MessageView {
    /// Body rendered as UTF-8, lossy
    pub fn body_str(&self) -> std::borrow::Cow<'_, str> {
        String::from_utf8_lossy(&self.body)
    }

    /// Look up a user property
    pub fn property(&self, key: &str) -> Option<&str> {
        self.properties.get(key).map(String::as_str)
    }

    /// Token needed to acknowledge this delivery or extend its lease
    pub fn receipt(&self) -> MessageReceipt {
        MessageReceipt {
            topic: self.topic.clone(),
            message_id: self.message_id.clone(),
            receipt_handle: self.receipt_handle.clone(),
        }
    }
}

/// Identifies one delivery of a message towards the broker
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct MessageReceipt {
    pub topic: String,
    pub message_id: MessageId,
    pub receipt_handle: ReceiptHandle,
}

/// Decision returned by a transaction checker for an unresolved half message
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum TransactionResolution {
    Commit,
    Rollback,
    /// Leave the message pending; the broker will ask again later
    Unknown,
}

#[cfg(test)]
#[path = "message_tests.rs"]
mod tests;
