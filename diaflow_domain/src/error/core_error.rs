// /////////////////////////////////////////////////////////////////////////////
// Diaflow Execution Core
// Copyright (c) 2025 Michael Gardner, A Bit of Help, Inc.
// SPDX-License-Identifier: BSD-3-Clause
// See LICENSE file in the project root.
// /////////////////////////////////////////////////////////////////////////////

//! # Domain Error Types
//!
//! This module defines the unified error type for the diaflow event core.
//! Every fallible operation in the domain and infrastructure layers returns
//! `Result<T, DiaflowError>`, keeping error handling consistent across the
//! event bus, routers, observers, and repository implementations.
//!
//! ## Design Principles
//!
//! - **Specific**: Each variant represents a distinct failure mode
//! - **Actionable**: Messages carry enough context for debugging
//! - **Categorized**: Variants group into categories for systematic handling
//! - **Recoverable**: Some variants indicate retry-able conditions
//!
//! ## Propagation Policy
//!
//! Infrastructure errors are absorbed at the component boundary: subscriber
//! handler failures are logged by the bus, delivery failures feed connection
//! health, and persistence failures never fail an execution. Only
//! construction-time programming errors (`InvalidEvent`, `ValidationError`)
//! surface to callers.

use thiserror::Error;

/// Domain-specific errors for the diaflow event core.
///
/// Each variant includes a descriptive message. Helper constructors keep
/// call sites terse (`DiaflowError::queue_full("sub 42")` instead of manual
/// variant construction).
#[derive(Error, Debug, Clone)]
pub enum DiaflowError {
    #[error("Invalid event: {0}")]
    InvalidEvent(String),

    #[error("Invalid configuration: {0}")]
    InvalidConfiguration(String),

    #[error("Queue full: {0}")]
    QueueFull(String),

    #[error("Bus not running: {0}")]
    BusNotRunning(String),

    #[error("Connection error: {0}")]
    ConnectionError(String),

    #[error("Delivery failed: {0}")]
    DeliveryFailed(String),

    #[error("Serialization error: {0}")]
    SerializationError(String),

    #[error("Persistence error: {0}")]
    PersistenceError(String),

    #[error("Unsupported operation: {0}")]
    UnsupportedOperation(String),

    #[error("Validation error: {0}")]
    ValidationError(String),

    #[error("Timeout error: {0}")]
    TimeoutError(String),

    #[error("Cancelled: {0}")]
    Cancelled(String),

    #[error("IO error: {0}")]
    IoError(String),

    #[error("Internal error: {0}")]
    InternalError(String),
}

impl DiaflowError {
    /// Creates a new invalid-event error
    pub fn invalid_event(msg: impl Into<String>) -> Self {
        Self::InvalidEvent(msg.into())
    }

    /// Creates a new configuration error
    pub fn invalid_config(msg: impl Into<String>) -> Self {
        Self::InvalidConfiguration(msg.into())
    }

    /// Creates a new queue-full error
    pub fn queue_full(msg: impl Into<String>) -> Self {
        Self::QueueFull(msg.into())
    }

    /// Creates a new connection error
    pub fn connection_error(msg: impl Into<String>) -> Self {
        Self::ConnectionError(msg.into())
    }

    /// Creates a new delivery error
    pub fn delivery_failed(msg: impl Into<String>) -> Self {
        Self::DeliveryFailed(msg.into())
    }

    /// Creates a new serialization error
    pub fn serialization_error(msg: impl Into<String>) -> Self {
        Self::SerializationError(msg.into())
    }

    /// Creates a new persistence error
    pub fn persistence_error(msg: impl Into<String>) -> Self {
        Self::PersistenceError(msg.into())
    }

    /// Creates a new unsupported-operation error
    pub fn unsupported(msg: impl Into<String>) -> Self {
        Self::UnsupportedOperation(msg.into())
    }

    /// Creates a new internal error
    pub fn internal_error(msg: impl Into<String>) -> Self {
        Self::InternalError(msg.into())
    }

    /// Checks if the error is recoverable
    ///
    /// Recoverable errors are transient conditions where a retry may
    /// succeed: timeouts, connection failures, and full queues.
    pub fn is_recoverable(&self) -> bool {
        matches!(
            self,
            DiaflowError::TimeoutError(_)
                | DiaflowError::ConnectionError(_)
                | DiaflowError::QueueFull(_)
                | DiaflowError::IoError(_)
        )
    }

    /// Gets the error category
    pub fn category(&self) -> &'static str {
        match self {
            DiaflowError::InvalidEvent(_) => "event",
            DiaflowError::InvalidConfiguration(_) => "configuration",
            DiaflowError::QueueFull(_) => "backpressure",
            DiaflowError::BusNotRunning(_) => "lifecycle",
            DiaflowError::ConnectionError(_) => "connection",
            DiaflowError::DeliveryFailed(_) => "delivery",
            DiaflowError::SerializationError(_) => "serialization",
            DiaflowError::PersistenceError(_) => "persistence",
            DiaflowError::UnsupportedOperation(_) => "capability",
            DiaflowError::ValidationError(_) => "validation",
            DiaflowError::TimeoutError(_) => "timeout",
            DiaflowError::Cancelled(_) => "cancellation",
            DiaflowError::IoError(_) => "io",
            DiaflowError::InternalError(_) => "internal",
        }
    }
}

// Implement conversion from standard library errors
impl From<std::io::Error> for DiaflowError {
    fn from(err: std::io::Error) -> Self {
        DiaflowError::IoError(err.to_string())
    }
}

impl From<serde_json::Error> for DiaflowError {
    fn from(err: serde_json::Error) -> Self {
        DiaflowError::SerializationError(err.to_string())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_error_display_includes_message() {
        let err = DiaflowError::queue_full("subscription abc");
        assert_eq!(err.to_string(), "Queue full: subscription abc");
    }

    #[test]
    fn test_recoverable_classification() {
        assert!(DiaflowError::TimeoutError("t".into()).is_recoverable());
        assert!(DiaflowError::connection_error("refused").is_recoverable());
        assert!(!DiaflowError::invalid_event("missing node id").is_recoverable());
        assert!(!DiaflowError::persistence_error("db down").is_recoverable());
    }

    #[test]
    fn test_category_mapping() {
        assert_eq!(DiaflowError::invalid_event("x").category(), "event");
        assert_eq!(DiaflowError::queue_full("x").category(), "backpressure");
        assert_eq!(DiaflowError::persistence_error("x").category(), "persistence");
    }

    #[test]
    fn test_from_serde_json_error() {
        let parse_err = serde_json::from_str::<serde_json::Value>("not json").unwrap_err();
        let err: DiaflowError = parse_err.into();
        assert_eq!(err.category(), "serialization");
    }
}
