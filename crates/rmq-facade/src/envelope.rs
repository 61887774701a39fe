//! Message envelope validation.
//!
//! [`build_envelope`] turns a user [`Message`] into the [`OutboundMessage`]
//! handed to the broker client, enforcing the per-topic-type rules:
//!
//! | Topic type  | Extra required field  | Extra attached field  |
//! |-------------|-----------------------|-----------------------|
//! | Normal      | -                     | -                     |
//! | FIFO        | `message_group`       | `message_group`       |
//! | Delay       | `delivery_timestamp`  | `delivery_timestamp`  |
//! | Transaction | -                     | -                     |
//!
//! Topic and body are required for every type. Fields that do not apply to
//! the topic type are dropped, not rejected.

use crate::error::ValidationError;
use crate::message::{Message, TopicType};
use bytes::Bytes;
use chrono::{DateTime, Utc};
use std::collections::HashMap;

/// Validated message ready to be handed to a broker client
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct OutboundMessage {
    pub topic_type: TopicType,
    pub topic: String,
    pub body: Bytes,
    pub tag: Option<String>,
    pub message_group: Option<String>,
    pub keys: Vec<String>,
    pub properties: HashMap<String, String>,
    pub delivery_timestamp: Option<DateTime<Utc>>,
}

/// Validate `message` for `topic_type` and build the outbound envelope
pub fn build_envelope(
    topic_type: TopicType,
    message: &Message,
) -> Result<OutboundMessage, ValidationError> {
    if message.topic.is_empty() {
        return Err(ValidationError::required("topic"));
    }

    if message.body.is_empty() {
        return Err(ValidationError::required("body"));
    }

    let message_group = message
        .message_group
        .as_deref()
        .filter(|group| !group.is_empty())
        .map(str::to_string);

    match topic_type {
        TopicType::Fifo if message_group.is_none() => {
            return Err(ValidationError::Required {
                field: "message_group (FIFO topic)".to_string(),
            });
        }
        TopicType::Delay if message.delivery_timestamp.is_none() => {
            return Err(ValidationError::Required {
                field: "delivery_timestamp (DELAY topic)".to_string(),
            });
        }
        _ => {}
    }

    Ok(OutboundMessage {
        topic_type,
        topic: message.topic.clone(),
        body: message.body.clone(),
        tag: message.tag.as_deref().filter(|t| !t.is_empty()).map(str::to_string),
        message_group: match topic_type {
            TopicType::Fifo => message_group,
            _ => None,
        },
        keys: message.keys.clone(),
        properties: message.properties.clone(),
        delivery_timestamp: match topic_type {
            TopicType::Delay => message.delivery_timestamp,
            _ => None,
        },
    })
}

#[cfg(test)]
#[path = "envelope_tests.rs"]
mod tests;
