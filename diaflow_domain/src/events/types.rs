// /////////////////////////////////////////////////////////////////////////////
// Diaflow Execution Core
// Copyright (c) 2025 Michael Gardner, A Bit of Help, Inc.
// SPDX-License-Identifier: BSD-3-Clause
// See LICENSE file in the project root.
// /////////////////////////////////////////////////////////////////////////////

//! # Event Type Definitions
//!
//! Closed enums shared by the event contracts: the event type set, event
//! priorities, execution statuses, and log levels. All wire encodings are
//! SCREAMING_SNAKE_CASE strings for compatibility with existing UI clients.

use serde::{Deserialize, Serialize};
use std::fmt;

/// Types of domain events (closed set).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum EventType {
    // Execution lifecycle
    ExecutionStarted,
    ExecutionCompleted,
    ExecutionError,
    ExecutionStatusChanged,

    // Node lifecycle
    NodeStarted,
    NodeCompleted,
    NodeError,
    NodeOutput,
    NodeStatusChanged,

    // Metrics and monitoring
    MetricsCollected,
    OptimizationSuggested,

    // External integrations
    WebhookReceived,

    // Logging
    ExecutionLog,
}

impl EventType {
    /// Returns the wire name of this event type (e.g. `NODE_STARTED`).
    pub fn as_str(&self) -> &'static str {
        match self {
            EventType::ExecutionStarted => "EXECUTION_STARTED",
            EventType::ExecutionCompleted => "EXECUTION_COMPLETED",
            EventType::ExecutionError => "EXECUTION_ERROR",
            EventType::ExecutionStatusChanged => "EXECUTION_STATUS_CHANGED",
            EventType::NodeStarted => "NODE_STARTED",
            EventType::NodeCompleted => "NODE_COMPLETED",
            EventType::NodeError => "NODE_ERROR",
            EventType::NodeOutput => "NODE_OUTPUT",
            EventType::NodeStatusChanged => "NODE_STATUS_CHANGED",
            EventType::MetricsCollected => "METRICS_COLLECTED",
            EventType::OptimizationSuggested => "OPTIMIZATION_SUGGESTED",
            EventType::WebhookReceived => "WEBHOOK_RECEIVED",
            EventType::ExecutionLog => "EXECUTION_LOG",
        }
    }

    /// True for node-scoped event types (NODE_*).
    pub fn is_node_event(&self) -> bool {
        matches!(
            self,
            EventType::NodeStarted
                | EventType::NodeCompleted
                | EventType::NodeError
                | EventType::NodeOutput
                | EventType::NodeStatusChanged
        )
    }

    /// True for terminal execution events (completed / error).
    pub fn is_terminal(&self) -> bool {
        matches!(
            self,
            EventType::ExecutionCompleted | EventType::ExecutionError
        )
    }
}

impl fmt::Display for EventType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Priority levels for event processing.
///
/// Priority never reorders delivery; it only determines whether dispatch is
/// inline (CRITICAL) or queued.
#[derive(
    Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize, Default,
)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum EventPriority {
    Low,
    #[default]
    Normal,
    High,
    Critical,
}

/// Execution status values shared by events and persisted state.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, Default)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum ExecutionStatus {
    #[default]
    Pending,
    Running,
    Completed,
    Failed,
    Aborted,
}

impl ExecutionStatus {
    /// Returns the wire name of this status (e.g. `RUNNING`).
    pub fn as_str(&self) -> &'static str {
        match self {
            ExecutionStatus::Pending => "PENDING",
            ExecutionStatus::Running => "RUNNING",
            ExecutionStatus::Completed => "COMPLETED",
            ExecutionStatus::Failed => "FAILED",
            ExecutionStatus::Aborted => "ABORTED",
        }
    }

    /// True for final statuses that must be durably persisted.
    pub fn is_terminal(&self) -> bool {
        matches!(
            self,
            ExecutionStatus::Completed | ExecutionStatus::Failed | ExecutionStatus::Aborted
        )
    }
}

impl fmt::Display for ExecutionStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Severity levels for EXECUTION_LOG events.
#[derive(
    Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize, Default,
)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum LogLevel {
    Debug,
    #[default]
    Info,
    Warning,
    Error,
    Critical,
}

impl LogLevel {
    /// Returns the wire name of this level (e.g. `INFO`).
    pub fn as_str(&self) -> &'static str {
        match self {
            LogLevel::Debug => "DEBUG",
            LogLevel::Info => "INFO",
            LogLevel::Warning => "WARNING",
            LogLevel::Error => "ERROR",
            LogLevel::Critical => "CRITICAL",
        }
    }
}

impl fmt::Display for LogLevel {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_event_type_wire_names() {
        assert_eq!(EventType::NodeStarted.as_str(), "NODE_STARTED");
        assert_eq!(
            serde_json::to_string(&EventType::ExecutionStatusChanged).unwrap(),
            "\"EXECUTION_STATUS_CHANGED\""
        );
        let parsed: EventType = serde_json::from_str("\"NODE_OUTPUT\"").unwrap();
        assert_eq!(parsed, EventType::NodeOutput);
    }

    #[test]
    fn test_priority_ordering() {
        assert!(EventPriority::Critical > EventPriority::High);
        assert!(EventPriority::High > EventPriority::Normal);
        assert!(EventPriority::Normal > EventPriority::Low);
    }

    #[test]
    fn test_node_event_classification() {
        assert!(EventType::NodeError.is_node_event());
        assert!(!EventType::ExecutionStarted.is_node_event());
    }

    #[test]
    fn test_terminal_classification() {
        assert!(EventType::ExecutionCompleted.is_terminal());
        assert!(EventType::ExecutionError.is_terminal());
        assert!(!EventType::NodeCompleted.is_terminal());
        assert!(ExecutionStatus::Failed.is_terminal());
        assert!(!ExecutionStatus::Running.is_terminal());
    }
}
