// /////////////////////////////////////////////////////////////////////////////
// Diaflow Execution Core
// Copyright (c) 2025 Michael Gardner, A Bit of Help, Inc.
// SPDX-License-Identifier: BSD-3-Clause
// See LICENSE file in the project root.
// /////////////////////////////////////////////////////////////////////////////

//! # Domain Event Contracts
//!
//! The immutable event record and its typed payloads.
//!
//! ## Overview
//!
//! A [`DomainEvent`] captures one observation made during a diagram
//! execution: a node started, an execution failed, a metric was collected.
//! Events carry:
//!
//! - **Scope**: the addressing tuple (execution id, optional node id,
//!   optional connection id, optional parent execution id)
//! - **Payload**: a closed sum type, one variant per event type
//! - **Priority**: LOW..CRITICAL; terminal execution events are always
//!   CRITICAL
//! - **Tracing metadata**: correlation id (related events) and causation id
//!   (the event that caused this one), plus a free-form metadata map
//!
//! ## Type safety
//!
//! The event type is *derived* from the payload variant via
//! [`DomainEvent::event_type`], so an event can never claim to be a
//! `NODE_STARTED` while carrying a completion payload. Serializers match
//! exhaustively on the payload; adding an event type is a compile-time
//! checklist rather than a runtime surprise.
//!
//! ## Construction
//!
//! Use the typed constructors (`DomainEvent::node_started`, ...) which
//! enforce scope invariants by signature, or the generic
//! [`DomainEvent::new`] which validates them at runtime. Builder-style
//! methods attach correlation ids and metadata:
//!
//! ```
//! use diaflow_domain::events::contracts::{DomainEvent, NodeStartedPayload};
//! use diaflow_domain::value_objects::{ExecutionId, NodeId};
//!
//! let event = DomainEvent::node_started(
//!     ExecutionId::new("exec-1").unwrap(),
//!     NodeId::new("N1").unwrap(),
//!     NodeStartedPayload {
//!         node_type: Some("job".to_string()),
//!         ..Default::default()
//!     },
//! )
//! .with_metadata("initiator", "cli");
//! assert_eq!(event.event_type().as_str(), "NODE_STARTED");
//! ```

use crate::error::DiaflowError;
use crate::events::types::{EventPriority, EventType, ExecutionStatus, LogLevel};
use crate::value_objects::{ConnectionId, ExecutionId, NodeId};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};
use std::collections::HashMap;
use uuid::Uuid;

/// Addressing tuple attached to every event: where did this happen?
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct EventScope {
    /// Execution this event belongs to (required for all scoped events).
    pub execution_id: ExecutionId,

    /// Node within the execution, for NODE_* events.
    #[serde(skip_serializing_if = "Option::is_none", default)]
    pub node_id: Option<NodeId>,

    /// Connection the event relates to, if any.
    #[serde(skip_serializing_if = "Option::is_none", default)]
    pub connection_id: Option<ConnectionId>,

    /// Parent execution id for sub-diagram executions.
    #[serde(skip_serializing_if = "Option::is_none", default)]
    pub parent_execution_id: Option<ExecutionId>,
}

impl EventScope {
    /// Creates an execution-level scope.
    pub fn execution(execution_id: ExecutionId) -> Self {
        Self {
            execution_id,
            node_id: None,
            connection_id: None,
            parent_execution_id: None,
        }
    }

    /// Creates a node-level scope.
    pub fn node(execution_id: ExecutionId, node_id: NodeId) -> Self {
        Self {
            execution_id,
            node_id: Some(node_id),
            connection_id: None,
            parent_execution_id: None,
        }
    }

    /// Attaches a parent execution id (sub-diagram executions).
    pub fn with_parent(mut self, parent_execution_id: ExecutionId) -> Self {
        self.parent_execution_id = Some(parent_execution_id);
        self
    }

    /// Attaches a connection id.
    pub fn with_connection(mut self, connection_id: ConnectionId) -> Self {
        self.connection_id = Some(connection_id);
        self
    }
}

/// Token accounting for LLM-backed nodes.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
pub struct TokenUsage {
    pub input: u64,
    pub output: u64,
    pub total: u64,
}

impl TokenUsage {
    /// Creates a usage record; `total` is derived from input + output.
    pub fn new(input: u64, output: u64) -> Self {
        Self {
            input,
            output,
            total: input + output,
        }
    }
}

/// Snapshot of a node's state carried by NODE_COMPLETED events.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct NodeState {
    pub status: ExecutionStatus,
    #[serde(skip_serializing_if = "Option::is_none", default)]
    pub started_at: Option<DateTime<Utc>>,
    #[serde(skip_serializing_if = "Option::is_none", default)]
    pub ended_at: Option<DateTime<Utc>>,
    #[serde(skip_serializing_if = "Option::is_none", default)]
    pub node_type: Option<String>,
}

// Payload variants. One struct per event type; optional fields default so
// producers only fill what they observed.

/// Execution has started.
#[derive(Debug, Clone, PartialEq, Default, Serialize, Deserialize)]
pub struct ExecutionStartedPayload {
    #[serde(skip_serializing_if = "Option::is_none", default)]
    pub diagram_id: Option<String>,
    #[serde(skip_serializing_if = "HashMap::is_empty", default)]
    pub variables: HashMap<String, Value>,
    #[serde(skip_serializing_if = "Option::is_none", default)]
    pub initiated_by: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none", default)]
    pub parent_execution_id: Option<ExecutionId>,
}

/// Execution has completed successfully.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ExecutionCompletedPayload {
    pub status: ExecutionStatus,
    #[serde(skip_serializing_if = "Option::is_none", default)]
    pub total_duration_ms: Option<u64>,
    #[serde(skip_serializing_if = "Option::is_none", default)]
    pub total_tokens_used: Option<u64>,
    #[serde(skip_serializing_if = "Option::is_none", default)]
    pub node_count: Option<u32>,
}

impl Default for ExecutionCompletedPayload {
    fn default() -> Self {
        Self {
            status: ExecutionStatus::Completed,
            total_duration_ms: None,
            total_tokens_used: None,
            node_count: None,
        }
    }
}

/// Execution has failed with an error.
#[derive(Debug, Clone, PartialEq, Default, Serialize, Deserialize)]
pub struct ExecutionErrorPayload {
    pub error_message: String,
    #[serde(skip_serializing_if = "Option::is_none", default)]
    pub error_type: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none", default)]
    pub stack_trace: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none", default)]
    pub failed_node_id: Option<NodeId>,
}

/// Execution status transition (UI-oriented).
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ExecutionStatusChangedPayload {
    pub status: ExecutionStatus,
    #[serde(default)]
    pub is_final: bool,
}

/// Log entry emitted within an execution.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ExecutionLogPayload {
    pub level: LogLevel,
    pub message: String,
    pub logger_name: String,
    #[serde(skip_serializing_if = "Option::is_none", default)]
    pub node_id: Option<NodeId>,
    #[serde(skip_serializing_if = "Map::is_empty", default)]
    pub extra_fields: Map<String, Value>,
}

/// Node execution has started.
#[derive(Debug, Clone, PartialEq, Default, Serialize, Deserialize)]
pub struct NodeStartedPayload {
    #[serde(skip_serializing_if = "Option::is_none", default)]
    pub node_type: Option<String>,
    /// Resolved inputs; a `dependencies` key feeds the metrics analyzer.
    #[serde(skip_serializing_if = "Option::is_none", default)]
    pub inputs: Option<Map<String, Value>>,
    #[serde(skip_serializing_if = "Option::is_none", default)]
    pub iteration: Option<u32>,
}

/// Node execution has completed.
#[derive(Debug, Clone, PartialEq, Default, Serialize, Deserialize)]
pub struct NodeCompletedPayload {
    #[serde(skip_serializing_if = "Option::is_none", default)]
    pub state: Option<NodeState>,
    #[serde(skip_serializing_if = "Option::is_none", default)]
    pub duration_ms: Option<u64>,
    #[serde(skip_serializing_if = "Option::is_none", default)]
    pub token_usage: Option<TokenUsage>,
    #[serde(skip_serializing_if = "Option::is_none", default)]
    pub output_summary: Option<String>,
}

/// Node execution has failed.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct NodeErrorPayload {
    pub error_message: String,
    #[serde(skip_serializing_if = "Option::is_none", default)]
    pub error_type: Option<String>,
    #[serde(default)]
    pub retryable: bool,
    #[serde(default)]
    pub retry_count: u32,
    #[serde(default = "default_max_retries")]
    pub max_retries: u32,
}

fn default_max_retries() -> u32 {
    3
}

impl Default for NodeErrorPayload {
    fn default() -> Self {
        Self {
            error_message: String::new(),
            error_type: None,
            retryable: false,
            retry_count: 0,
            max_retries: default_max_retries(),
        }
    }
}

/// Node has produced output (supports streaming via partial outputs).
#[derive(Debug, Clone, PartialEq, Default, Serialize, Deserialize)]
pub struct NodeOutputPayload {
    pub output: Value,
    #[serde(default)]
    pub is_partial: bool,
    #[serde(skip_serializing_if = "Option::is_none", default)]
    pub sequence_number: Option<u64>,
}

/// Node status transition (UI-oriented).
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct NodeStatusChangedPayload {
    pub status: ExecutionStatus,
}

/// Aggregated performance metrics for an execution.
#[derive(Debug, Clone, PartialEq, Default, Serialize, Deserialize)]
pub struct MetricsCollectedPayload {
    pub metrics: Map<String, Value>,
}

/// Optimization opportunity identified by the metrics analyzer.
#[derive(Debug, Clone, PartialEq, Default, Serialize, Deserialize)]
pub struct OptimizationSuggestedPayload {
    pub suggestion_type: String,
    #[serde(skip_serializing_if = "Vec::is_empty", default)]
    pub affected_nodes: Vec<NodeId>,
    #[serde(skip_serializing_if = "Option::is_none", default)]
    pub expected_improvement: Option<String>,
    #[serde(default)]
    pub description: String,
}

/// Webhook received from an external integration.
#[derive(Debug, Clone, PartialEq, Default, Serialize, Deserialize)]
pub struct WebhookReceivedPayload {
    pub webhook_id: String,
    pub source: String,
    #[serde(skip_serializing_if = "Map::is_empty", default)]
    pub payload: Map<String, Value>,
}

/// Closed sum type over all event payloads.
///
/// One variant per [`EventType`]; serializers and consumers match
/// exhaustively, so the compiler flags every site that needs attention when
/// the contract grows.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "event_type", content = "data")]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum EventPayload {
    ExecutionStarted(ExecutionStartedPayload),
    ExecutionCompleted(ExecutionCompletedPayload),
    ExecutionError(ExecutionErrorPayload),
    ExecutionStatusChanged(ExecutionStatusChangedPayload),
    ExecutionLog(ExecutionLogPayload),
    NodeStarted(NodeStartedPayload),
    NodeCompleted(NodeCompletedPayload),
    NodeError(NodeErrorPayload),
    NodeOutput(NodeOutputPayload),
    NodeStatusChanged(NodeStatusChangedPayload),
    MetricsCollected(MetricsCollectedPayload),
    OptimizationSuggested(OptimizationSuggestedPayload),
    WebhookReceived(WebhookReceivedPayload),
}

impl EventPayload {
    /// Returns the event type this payload encodes.
    pub fn event_type(&self) -> EventType {
        match self {
            EventPayload::ExecutionStarted(_) => EventType::ExecutionStarted,
            EventPayload::ExecutionCompleted(_) => EventType::ExecutionCompleted,
            EventPayload::ExecutionError(_) => EventType::ExecutionError,
            EventPayload::ExecutionStatusChanged(_) => EventType::ExecutionStatusChanged,
            EventPayload::ExecutionLog(_) => EventType::ExecutionLog,
            EventPayload::NodeStarted(_) => EventType::NodeStarted,
            EventPayload::NodeCompleted(_) => EventType::NodeCompleted,
            EventPayload::NodeError(_) => EventType::NodeError,
            EventPayload::NodeOutput(_) => EventType::NodeOutput,
            EventPayload::NodeStatusChanged(_) => EventType::NodeStatusChanged,
            EventPayload::MetricsCollected(_) => EventType::MetricsCollected,
            EventPayload::OptimizationSuggested(_) => EventType::OptimizationSuggested,
            EventPayload::WebhookReceived(_) => EventType::WebhookReceived,
        }
    }

    /// Default priority for events carrying this payload.
    ///
    /// Terminal execution payloads are CRITICAL; everything else NORMAL.
    fn default_priority(&self) -> EventPriority {
        if self.event_type().is_terminal() {
            EventPriority::Critical
        } else {
            EventPriority::Normal
        }
    }
}

/// Immutable domain event.
///
/// Created by a producer at the moment of observation, published once,
/// never mutated. Events may be buffered for late-join replay and are
/// discarded from replay buffers on TTL expiry or size overflow.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct DomainEvent {
    /// Unique identifier for this event instance.
    pub event_id: Uuid,

    /// Where the event occurred.
    pub scope: EventScope,

    /// When the event occurred (UTC, RFC3339 on the wire).
    pub occurred_at: DateTime<Utc>,

    /// The typed payload; the event type is derived from it.
    #[serde(flatten)]
    pub payload: EventPayload,

    /// Processing priority; terminal events are CRITICAL.
    #[serde(default)]
    pub priority: EventPriority,

    /// Optional correlation id for tracing related events.
    #[serde(skip_serializing_if = "Option::is_none", default)]
    pub correlation_id: Option<Uuid>,

    /// Optional causation id (the event that caused this one).
    #[serde(skip_serializing_if = "Option::is_none", default)]
    pub causation_id: Option<Uuid>,

    /// Free-form metadata for additional context.
    #[serde(skip_serializing_if = "HashMap::is_empty", default)]
    pub metadata: HashMap<String, String>,
}

impl DomainEvent {
    /// Creates an event from a scope and payload, validating scope
    /// invariants.
    ///
    /// NODE_* payloads require the scope to carry a node id; violations are
    /// refused before publish with [`DiaflowError::InvalidEvent`].
    pub fn new(scope: EventScope, payload: EventPayload) -> Result<Self, DiaflowError> {
        if payload.event_type().is_node_event() && scope.node_id.is_none() {
            return Err(DiaflowError::invalid_event(format!(
                "{} event requires a node id in scope",
                payload.event_type()
            )));
        }
        Ok(Self::from_parts(scope, payload))
    }

    fn from_parts(scope: EventScope, payload: EventPayload) -> Self {
        let priority = payload.default_priority();
        Self {
            event_id: Uuid::new_v4(),
            scope,
            occurred_at: Utc::now(),
            payload,
            priority,
            correlation_id: None,
            causation_id: None,
            metadata: HashMap::new(),
        }
    }

    /// Creates an EXECUTION_STARTED event.
    pub fn execution_started(execution_id: ExecutionId, payload: ExecutionStartedPayload) -> Self {
        let mut scope = EventScope::execution(execution_id);
        scope.parent_execution_id = payload.parent_execution_id.clone();
        Self::from_parts(scope, EventPayload::ExecutionStarted(payload))
    }

    /// Creates an EXECUTION_COMPLETED event (CRITICAL priority).
    pub fn execution_completed(
        execution_id: ExecutionId,
        payload: ExecutionCompletedPayload,
    ) -> Self {
        Self::from_parts(
            EventScope::execution(execution_id),
            EventPayload::ExecutionCompleted(payload),
        )
    }

    /// Creates an EXECUTION_ERROR event (CRITICAL priority).
    pub fn execution_error(execution_id: ExecutionId, payload: ExecutionErrorPayload) -> Self {
        Self::from_parts(
            EventScope::execution(execution_id),
            EventPayload::ExecutionError(payload),
        )
    }

    /// Creates an EXECUTION_STATUS_CHANGED event.
    pub fn execution_status_changed(
        execution_id: ExecutionId,
        payload: ExecutionStatusChangedPayload,
    ) -> Self {
        Self::from_parts(
            EventScope::execution(execution_id),
            EventPayload::ExecutionStatusChanged(payload),
        )
    }

    /// Creates an EXECUTION_LOG event.
    pub fn execution_log(execution_id: ExecutionId, payload: ExecutionLogPayload) -> Self {
        Self::from_parts(
            EventScope::execution(execution_id),
            EventPayload::ExecutionLog(payload),
        )
    }

    /// Creates a NODE_STARTED event.
    pub fn node_started(
        execution_id: ExecutionId,
        node_id: NodeId,
        payload: NodeStartedPayload,
    ) -> Self {
        Self::from_parts(
            EventScope::node(execution_id, node_id),
            EventPayload::NodeStarted(payload),
        )
    }

    /// Creates a NODE_COMPLETED event.
    pub fn node_completed(
        execution_id: ExecutionId,
        node_id: NodeId,
        payload: NodeCompletedPayload,
    ) -> Self {
        Self::from_parts(
            EventScope::node(execution_id, node_id),
            EventPayload::NodeCompleted(payload),
        )
    }

    /// Creates a NODE_ERROR event.
    pub fn node_error(
        execution_id: ExecutionId,
        node_id: NodeId,
        payload: NodeErrorPayload,
    ) -> Self {
        Self::from_parts(
            EventScope::node(execution_id, node_id),
            EventPayload::NodeError(payload),
        )
    }

    /// Creates a NODE_OUTPUT event.
    pub fn node_output(
        execution_id: ExecutionId,
        node_id: NodeId,
        payload: NodeOutputPayload,
    ) -> Self {
        Self::from_parts(
            EventScope::node(execution_id, node_id),
            EventPayload::NodeOutput(payload),
        )
    }

    /// Creates a NODE_STATUS_CHANGED event.
    pub fn node_status_changed(
        execution_id: ExecutionId,
        node_id: NodeId,
        payload: NodeStatusChangedPayload,
    ) -> Self {
        Self::from_parts(
            EventScope::node(execution_id, node_id),
            EventPayload::NodeStatusChanged(payload),
        )
    }

    /// Creates a METRICS_COLLECTED event; node id is optional for
    /// node-specific metric batches.
    pub fn metrics_collected(
        execution_id: ExecutionId,
        node_id: Option<NodeId>,
        payload: MetricsCollectedPayload,
    ) -> Self {
        let mut scope = EventScope::execution(execution_id);
        scope.node_id = node_id;
        Self::from_parts(scope, EventPayload::MetricsCollected(payload))
    }

    /// Creates an OPTIMIZATION_SUGGESTED event.
    pub fn optimization_suggested(
        execution_id: ExecutionId,
        payload: OptimizationSuggestedPayload,
    ) -> Self {
        Self::from_parts(
            EventScope::execution(execution_id),
            EventPayload::OptimizationSuggested(payload),
        )
    }

    /// Creates a WEBHOOK_RECEIVED event scoped to the execution the webhook
    /// triggers.
    pub fn webhook_received(execution_id: ExecutionId, payload: WebhookReceivedPayload) -> Self {
        Self::from_parts(
            EventScope::execution(execution_id),
            EventPayload::WebhookReceived(payload),
        )
    }

    /// Returns the event type derived from the payload.
    pub fn event_type(&self) -> EventType {
        self.payload.event_type()
    }

    /// Overrides the priority (builder style).
    pub fn with_priority(mut self, priority: EventPriority) -> Self {
        self.priority = priority;
        self
    }

    /// Sets the correlation id (builder style).
    pub fn with_correlation_id(mut self, correlation_id: Uuid) -> Self {
        self.correlation_id = Some(correlation_id);
        self
    }

    /// Sets the causation id (builder style).
    pub fn with_causation_id(mut self, causation_id: Uuid) -> Self {
        self.causation_id = Some(causation_id);
        self
    }

    /// Adds a metadata entry (builder style).
    pub fn with_metadata(mut self, key: impl Into<String>, value: impl Into<String>) -> Self {
        self.metadata.insert(key.into(), value.into());
        self
    }

    /// Checks whether this event was caused by the given event.
    pub fn was_caused_by(&self, other_event_id: Uuid) -> bool {
        self.causation_id == Some(other_event_id)
    }
}
