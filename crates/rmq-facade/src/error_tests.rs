//! Tests for error types.

use super::*;

/// Test flow control detection
#[test]
fn test_flow_control_is_detectable() {
    // Act
    let err = FacadeError::from(BrokerError::too_many_requests("quota exceeded"));

    // Assert
    assert!(err.is_too_many_requests());
    assert!(is_too_many_requests(&err));
    assert!(!err.is_no_new_message());
    assert!(err.is_transient());
}

/// Test no-new-message detection
#[test]
fn test_no_new_message_is_detectable() {
    // Act
    let err = FacadeError::from(BrokerError::message_not_found());

    // Assert
    assert!(err.is_no_new_message());
    assert!(is_no_new_message(&err));
    assert!(!err.is_too_many_requests());
}

/// Test that validation errors are not transient
#[test]
fn test_validation_errors_are_not_transient() {
    // Act
    let err = FacadeError::from(ValidationError::required("topic"));

    // Assert
    assert!(!err.is_transient());
    assert!(!err.is_too_many_requests());
    assert_eq!(
        err.to_string(),
        "Validation error: Required field missing: topic"
    );
}

/// Test that UnsupportedOperation names the topic type
#[test]
fn test_unsupported_operation_message_names_topic_type() {
    // Arrange
    let err = FacadeError::UnsupportedOperation {
        operation: "send",
        topic_type: TopicType::Transaction,
    };

    // Act & Assert
    assert_eq!(err.to_string(), "send does not support TRANSACTION messages");
}

/// Test BrokerError kind and display
#[test]
fn test_broker_error_display_includes_kind() {
    // Act
    let err = BrokerError::client_stopped("simple consumer");

    // Assert
    assert_eq!(err.kind(), BrokerErrorKind::ClientStopped);
    assert!(err.is_client_stopped());
    assert!(!err.is_transient());
    assert_eq!(
        err.to_string(),
        "CLIENT_STOPPED - simple consumer has been stopped"
    );
}
