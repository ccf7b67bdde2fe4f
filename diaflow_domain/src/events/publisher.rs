// /////////////////////////////////////////////////////////////////////////////
// Diaflow Execution Core
// Copyright (c) 2025 Michael Gardner, A Bit of Help, Inc.
// SPDX-License-Identifier: BSD-3-Clause
// See LICENSE file in the project root.
// /////////////////////////////////////////////////////////////////////////////

//! # Event Publisher Facade
//!
//! Thin facade over the [`EventBus`] that constructs well-formed events
//! from plain arguments, so producers never assemble [`DomainEvent`]
//! records by hand. Each method builds the appropriate scope and payload,
//! attaches optional metadata, and publishes.

use crate::error::DiaflowError;
use crate::events::contracts::{
    DomainEvent, EventScope, ExecutionCompletedPayload, ExecutionErrorPayload,
    ExecutionLogPayload, ExecutionStartedPayload, MetricsCollectedPayload, NodeCompletedPayload,
    NodeErrorPayload, NodeOutputPayload, NodeStartedPayload, NodeState, TokenUsage,
    WebhookReceivedPayload,
};
use crate::events::ports::EventBus;
use crate::events::types::{ExecutionStatus, LogLevel};
use crate::value_objects::{ExecutionId, NodeId};
use serde_json::{json, Map, Value};
use std::collections::HashMap;
use std::sync::Arc;

/// Convenient, typed publication of all standard domain events.
#[derive(Clone)]
pub struct EventPublisher {
    bus: Arc<dyn EventBus>,
}

impl EventPublisher {
    /// Creates a publisher over the given bus.
    pub fn new(bus: Arc<dyn EventBus>) -> Self {
        Self { bus }
    }

    async fn publish(
        &self,
        event: DomainEvent,
        metadata: Option<HashMap<String, String>>,
    ) -> Result<(), DiaflowError> {
        let event = match metadata {
            Some(meta) => {
                let mut event = event;
                event.metadata = meta;
                event
            }
            None => event,
        };
        self.bus.publish(event).await
    }

    /// Publishes an EXECUTION_STARTED event.
    pub async fn execution_started(
        &self,
        execution_id: ExecutionId,
        diagram_id: impl Into<String>,
        variables: HashMap<String, Value>,
        initiated_by: Option<String>,
        parent_execution_id: Option<ExecutionId>,
        metadata: Option<HashMap<String, String>>,
    ) -> Result<(), DiaflowError> {
        let event = DomainEvent::execution_started(
            execution_id,
            ExecutionStartedPayload {
                diagram_id: Some(diagram_id.into()),
                variables,
                initiated_by,
                parent_execution_id,
            },
        );
        self.publish(event, metadata).await
    }

    /// Publishes an EXECUTION_COMPLETED event (CRITICAL priority).
    pub async fn execution_completed(
        &self,
        execution_id: ExecutionId,
        status: ExecutionStatus,
        total_duration_ms: Option<u64>,
        total_tokens_used: Option<u64>,
        node_count: Option<u32>,
        metadata: Option<HashMap<String, String>>,
    ) -> Result<(), DiaflowError> {
        let event = DomainEvent::execution_completed(
            execution_id,
            ExecutionCompletedPayload {
                status,
                total_duration_ms,
                total_tokens_used,
                node_count,
            },
        );
        self.publish(event, metadata).await
    }

    /// Publishes an EXECUTION_ERROR event (CRITICAL priority).
    pub async fn execution_error(
        &self,
        execution_id: ExecutionId,
        error_message: impl Into<String>,
        error_type: Option<String>,
        stack_trace: Option<String>,
        metadata: Option<HashMap<String, String>>,
    ) -> Result<(), DiaflowError> {
        let event = DomainEvent::execution_error(
            execution_id,
            ExecutionErrorPayload {
                error_message: error_message.into(),
                error_type,
                stack_trace,
                failed_node_id: None,
            },
        );
        self.publish(event, metadata).await
    }

    /// Publishes a NODE_STARTED event.
    pub async fn node_started(
        &self,
        execution_id: ExecutionId,
        node_id: NodeId,
        node_type: impl Into<String>,
        inputs: Option<Map<String, Value>>,
        metadata: Option<HashMap<String, String>>,
    ) -> Result<(), DiaflowError> {
        let event = DomainEvent::node_started(
            execution_id,
            node_id,
            NodeStartedPayload {
                node_type: Some(node_type.into()),
                inputs,
                iteration: None,
            },
        );
        self.publish(event, metadata).await
    }

    /// Publishes a NODE_COMPLETED event.
    pub async fn node_completed(
        &self,
        execution_id: ExecutionId,
        node_id: NodeId,
        state: Option<NodeState>,
        duration_ms: Option<u64>,
        token_usage: Option<TokenUsage>,
        metadata: Option<HashMap<String, String>>,
    ) -> Result<(), DiaflowError> {
        let event = DomainEvent::node_completed(
            execution_id,
            node_id,
            NodeCompletedPayload {
                state,
                duration_ms,
                token_usage,
                output_summary: None,
            },
        );
        self.publish(event, metadata).await
    }

    /// Publishes a NODE_ERROR event.
    pub async fn node_error(
        &self,
        execution_id: ExecutionId,
        node_id: NodeId,
        error_message: impl Into<String>,
        error_type: Option<String>,
        metadata: Option<HashMap<String, String>>,
    ) -> Result<(), DiaflowError> {
        let event = DomainEvent::node_error(
            execution_id,
            node_id,
            NodeErrorPayload {
                error_message: error_message.into(),
                error_type,
                ..Default::default()
            },
        );
        self.publish(event, metadata).await
    }

    /// Publishes a node progress update as a NODE_OUTPUT event carrying a
    /// progress payload (there is no dedicated progress payload variant).
    pub async fn node_progress(
        &self,
        execution_id: ExecutionId,
        node_id: NodeId,
        progress: u8,
        message: Option<String>,
        metadata: Option<HashMap<String, String>>,
    ) -> Result<(), DiaflowError> {
        let event = DomainEvent::node_output(
            execution_id,
            node_id,
            NodeOutputPayload {
                output: json!({ "progress": progress, "message": message }),
                is_partial: true,
                sequence_number: None,
            },
        );
        self.publish(event, metadata).await
    }

    /// Publishes a general execution update as an EXECUTION_LOG event.
    pub async fn execution_update(
        &self,
        execution_id: ExecutionId,
        message: impl Into<String>,
        level: LogLevel,
        metadata: Option<HashMap<String, String>>,
    ) -> Result<(), DiaflowError> {
        let event = DomainEvent::execution_log(
            execution_id,
            ExecutionLogPayload {
                level,
                message: message.into(),
                logger_name: "execution".to_string(),
                node_id: None,
                extra_fields: Map::new(),
            },
        );
        self.publish(event, metadata).await
    }

    /// Publishes a METRICS_COLLECTED event.
    pub async fn metrics_collected(
        &self,
        execution_id: ExecutionId,
        metrics: Map<String, Value>,
        node_id: Option<NodeId>,
        metadata: Option<HashMap<String, String>>,
    ) -> Result<(), DiaflowError> {
        let event = DomainEvent::metrics_collected(
            execution_id,
            node_id,
            MetricsCollectedPayload { metrics },
        );
        self.publish(event, metadata).await
    }

    /// Publishes a WEBHOOK_RECEIVED event.
    pub async fn webhook_received(
        &self,
        execution_id: ExecutionId,
        webhook_id: impl Into<String>,
        source: impl Into<String>,
        payload: Map<String, Value>,
        metadata: Option<HashMap<String, String>>,
    ) -> Result<(), DiaflowError> {
        let event = DomainEvent::webhook_received(
            execution_id,
            WebhookReceivedPayload {
                webhook_id: webhook_id.into(),
                source: source.into(),
                payload,
            },
        );
        self.publish(event, metadata).await
    }

    /// Publishes multiple pre-built events atomically (see
    /// [`EventBus::publish_batch`]).
    pub async fn publish_batch(&self, events: Vec<DomainEvent>) -> Result<(), DiaflowError> {
        self.bus.publish_batch(events).await
    }
}

// Keep a scope helper close to the facade for producers that need custom
// events with consistent scoping.
impl EventPublisher {
    /// Builds an execution-level scope for custom event construction.
    pub fn execution_scope(execution_id: ExecutionId) -> EventScope {
        EventScope::execution(execution_id)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::events::filters::EventFilter;
    use crate::events::ports::{EventHandler, EventSubscription};
    use crate::events::types::{EventPriority, EventType};
    use async_trait::async_trait;
    use std::sync::Mutex;

    /// Bus double that records published events.
    #[derive(Default)]
    struct RecordingBus {
        published: Mutex<Vec<DomainEvent>>,
    }

    #[async_trait]
    impl EventBus for RecordingBus {
        async fn publish(&self, event: DomainEvent) -> Result<(), DiaflowError> {
            self.published.lock().unwrap().push(event);
            Ok(())
        }

        async fn publish_batch(&self, events: Vec<DomainEvent>) -> Result<(), DiaflowError> {
            self.published.lock().unwrap().extend(events);
            Ok(())
        }

        async fn subscribe(
            &self,
            event_types: Vec<EventType>,
            _handler: Arc<dyn EventHandler>,
            _filter: Option<Arc<dyn EventFilter>>,
            priority: EventPriority,
        ) -> Result<EventSubscription, DiaflowError> {
            Ok(EventSubscription::new(event_types, priority))
        }

        async fn unsubscribe(
            &self,
            _subscription: &EventSubscription,
        ) -> Result<(), DiaflowError> {
            Ok(())
        }

        async fn initialize(&self) -> Result<(), DiaflowError> {
            Ok(())
        }

        async fn cleanup(&self) -> Result<(), DiaflowError> {
            Ok(())
        }
    }

    fn exec_id() -> ExecutionId {
        ExecutionId::new("exec-1").unwrap()
    }

    #[tokio::test]
    async fn test_typed_methods_build_matching_events() {
        let bus = Arc::new(RecordingBus::default());
        let publisher = EventPublisher::new(bus.clone());

        publisher
            .execution_started(exec_id(), "diagram-1", HashMap::new(), None, None, None)
            .await
            .unwrap();
        publisher
            .node_started(
                exec_id(),
                NodeId::new("N1").unwrap(),
                "job",
                None,
                Some(HashMap::from([("source".to_string(), "cli".to_string())])),
            )
            .await
            .unwrap();
        publisher
            .execution_completed(exec_id(), ExecutionStatus::Completed, Some(100), None, None, None)
            .await
            .unwrap();

        let published = bus.published.lock().unwrap();
        assert_eq!(published.len(), 3);
        assert_eq!(published[0].event_type(), EventType::ExecutionStarted);
        assert_eq!(published[1].event_type(), EventType::NodeStarted);
        assert_eq!(
            published[1].metadata.get("source"),
            Some(&"cli".to_string())
        );
        assert_eq!(published[2].event_type(), EventType::ExecutionCompleted);
        assert_eq!(published[2].priority, EventPriority::Critical);
    }

    #[tokio::test]
    async fn test_node_progress_uses_output_payload() {
        let bus = Arc::new(RecordingBus::default());
        let publisher = EventPublisher::new(bus.clone());

        publisher
            .node_progress(exec_id(), NodeId::new("N1").unwrap(), 40, None, None)
            .await
            .unwrap();

        let published = bus.published.lock().unwrap();
        assert_eq!(published[0].event_type(), EventType::NodeOutput);
        let crate::events::contracts::EventPayload::NodeOutput(payload) = &published[0].payload
        else {
            panic!("expected node output payload");
        };
        assert!(payload.is_partial);
        assert_eq!(payload.output["progress"], 40);
    }
}
