//! Tests for message types.

use super::*;

mod topic_type {
    use super::*;

    /// Test case-insensitive topic type parsing
    #[test]
    fn test_parse_is_case_insensitive() {
        assert_eq!("fifo".parse::<TopicType>().unwrap(), TopicType::Fifo);
        assert_eq!(" Delay ".parse::<TopicType>().unwrap(), TopicType::Delay);
        assert_eq!(
            "TRANSACTION".parse::<TopicType>().unwrap(),
            TopicType::Transaction
        );
    }

    /// Test that unknown topic type names are rejected
    #[test]
    fn test_parse_rejects_unknown_names() {
        // Act
        let result = "priority".parse::<TopicType>();

        // Assert
        match result {
            Err(ValidationError::InvalidFormat { field, .. }) => assert_eq!(field, "topic_type"),
            other => panic!("Expected InvalidFormat error, got: {:?}", other),
        }
    }

    /// Test that Display matches the admin tool names
    #[test]
    fn test_display_matches_admin_names() {
        assert_eq!(TopicType::Normal.to_string(), "NORMAL");
        assert_eq!(TopicType::Fifo.to_string(), "FIFO");
    }

    /// Test that serde uses the uppercase names
    #[test]
    fn test_serde_uses_uppercase_names() {
        // Act
        let json = serde_json::to_string(&TopicType::Delay).unwrap();
        assert_eq!(json, "\"DELAY\"");

        // Assert
        let parsed: TopicType = serde_json::from_str("\"FIFO\"").unwrap();
        assert_eq!(parsed, TopicType::Fifo);
    }
}

mod message_builder {
    use super::*;

    /// Test the message builder setters
    #[test]
    fn test_builder_sets_optional_fields() {
        // Act
        let at = Utc::now();
        let message = Message::new("orders", "payload")
            .with_tag("created")
            .with_message_group("customer-7")
            .with_key("order-1")
            .with_key("order-2")
            .with_property("attr1", "1")
            .with_delivery_timestamp(at);

        // Assert
        assert_eq!(message.topic, "orders");
        assert_eq!(message.body, Bytes::from("payload"));
        assert_eq!(message.tag.as_deref(), Some("created"));
        assert_eq!(message.message_group.as_deref(), Some("customer-7"));
        assert_eq!(message.keys, vec!["order-1", "order-2"]);
        assert_eq!(message.properties.get("attr1").map(String::as_str), Some("1"));
        assert_eq!(message.delivery_timestamp, Some(at));
    }

    /// Test that a new message has no optional fields
    #[test]
    fn test_new_message_has_no_optional_fields() {
        // Act
        let message = Message::new("orders", "payload");

        // Assert
        assert!(message.tag.is_none());
        assert!(message.message_group.is_none());
        assert!(message.keys.is_empty());
        assert!(message.properties.is_empty());
        assert!(message.delivery_timestamp.is_none());
        assert_eq!(message.body_str(), "payload");
    }
}

mod identifiers {
    use super::*;

    /// Test message id uniqueness
    #[test]
    fn test_message_ids_are_unique() {
        assert_ne!(MessageId::new(), MessageId::new());
    }

    /// Test that an empty message id is rejected
    #[test]
    fn test_empty_message_id_is_rejected() {
        assert!("".parse::<MessageId>().is_err());
        assert_eq!("ABC".parse::<MessageId>().unwrap().as_str(), "ABC");
    }

    /// Test SendReceipt JSON serialization
    #[test]
    fn test_send_receipt_serializes_to_json() {
        // Arrange
        let receipt = SendReceipt {
            message_id: "01AB".parse().unwrap(),
            transaction_id: None,
            offset: 3,
        };

        // Act & Assert
        let json = serde_json::to_value(&receipt).unwrap();
        assert_eq!(json["message_id"], "01AB");
        assert_eq!(json["offset"], 3);
    }
}
