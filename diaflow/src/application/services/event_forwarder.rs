// /////////////////////////////////////////////////////////////////////////////
// Diaflow Execution Core
// Copyright (c) 2025 Michael Gardner, A Bit of Help, Inc.
// SPDX-License-Identifier: BSD-3-Clause
// See LICENSE file in the project root.
// /////////////////////////////////////////////////////////////////////////////

//! # Event Forwarder
//!
//! Ships status-changing events from a detached CLI execution to the
//! background server, so the server's UI sees live status for an execution
//! it is not running itself.
//!
//! The forwarder subscribes to the local bus, filters to its configured
//! execution and the status-relevant event types, and drains an internal
//! queue: node events become node-state updates, terminal execution events
//! become execution-control requests (`complete` / `abort`).
//!
//! Network failures degrade gracefully: connect/timeout errors retry with
//! bounded exponential backoff, everything else is logged and dropped. A
//! detached CLI that loses connectivity keeps executing locally.

use crate::infrastructure::config::ForwarderSettings;
use async_trait::async_trait;
use diaflow_domain::events::contracts::EventPayload;
use diaflow_domain::events::ports::EventHandler;
use diaflow_domain::{
    DiaflowError, DomainEvent, EventType, ExecutionId, ExecutionStatus,
};
use parking_lot::Mutex;
use serde::Serialize;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tracing::{debug, error, warn};

/// Event types relayed to the background server.
const FORWARDED_TYPES: [EventType; 5] = [
    EventType::NodeStarted,
    EventType::NodeCompleted,
    EventType::NodeError,
    EventType::ExecutionCompleted,
    EventType::ExecutionError,
];

/// Node-state mutation submitted for node lifecycle events.
#[derive(Debug, Clone, Serialize, PartialEq)]
pub struct UpdateNodeStateRequest {
    pub execution_id: String,
    pub node_id: String,
    pub status: ExecutionStatus,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
}

/// Execution-control mutation submitted for terminal execution events.
#[derive(Debug, Clone, Serialize, PartialEq)]
pub struct ExecutionControlRequest {
    pub execution_id: String,
    pub action: String,
    pub reason: String,
}

/// Forwards execution events from the CLI to the background server.
pub struct EventForwarder {
    execution_id: ExecutionId,
    settings: ForwarderSettings,
    client: reqwest::Client,
    sender: Mutex<Option<mpsc::UnboundedSender<DomainEvent>>>,
    drain_task: Mutex<Option<JoinHandle<()>>>,
}

impl EventForwarder {
    /// Creates a forwarder for one execution.
    pub fn new(execution_id: ExecutionId, settings: ForwarderSettings) -> Arc<Self> {
        let client = reqwest::Client::builder()
            .timeout(Duration::from_secs(settings.request_timeout_s))
            .build()
            .unwrap_or_default();
        Arc::new(Self {
            execution_id,
            settings,
            client,
            sender: Mutex::new(None),
            drain_task: Mutex::new(None),
        })
    }

    /// Starts the drain task. Idempotent.
    pub async fn start(self: &Arc<Self>) {
        let mut sender_slot = self.sender.lock();
        if sender_slot.is_some() {
            return;
        }

        let (tx, mut rx) = mpsc::unbounded_channel::<DomainEvent>();
        *sender_slot = Some(tx);
        drop(sender_slot);

        let forwarder = self.clone();
        let handle = tokio::spawn(async move {
            while let Some(event) = rx.recv().await {
                forwarder.forward_event(&event).await;
            }
            debug!("event forwarder drain task exited");
        });
        *self.drain_task.lock() = Some(handle);
        debug!(execution_id = %self.execution_id, "event forwarder started");
    }

    /// Stops the forwarder, waiting for queued events to be forwarded.
    pub async fn stop(&self) {
        // Closing the channel lets the drain task finish the backlog and
        // exit on its own.
        self.sender.lock().take();
        let task = self.drain_task.lock().take();
        if let Some(task) = task {
            let _ = task.await;
        }
        debug!(execution_id = %self.execution_id, "event forwarder stopped");
    }

    async fn forward_event(&self, event: &DomainEvent) {
        match &event.payload {
            EventPayload::ExecutionCompleted(_) | EventPayload::ExecutionError(_) => {
                self.forward_execution_event(event).await;
            }
            _ => self.forward_node_event(event).await,
        }
    }

    async fn forward_node_event(&self, event: &DomainEvent) {
        let Some(node_id) = &event.scope.node_id else {
            warn!(event_type = %event.event_type(), "node event missing node id, skipping forward");
            return;
        };

        let status = match event.event_type() {
            EventType::NodeStarted => ExecutionStatus::Running,
            EventType::NodeCompleted => ExecutionStatus::Completed,
            EventType::NodeError => ExecutionStatus::Failed,
            other => {
                warn!(event_type = %other, "unexpected event type, skipping forward");
                return;
            }
        };

        let error = match &event.payload {
            EventPayload::NodeError(payload) => Some(payload.error_message.clone()),
            _ => None,
        };

        let request = UpdateNodeStateRequest {
            execution_id: self.execution_id.to_string(),
            node_id: node_id.to_string(),
            status,
            error,
        };

        let url = format!("{}/api/node-state", self.settings.server_url);
        self.submit_with_retry(&url, &request, event.event_type())
            .await;
    }

    async fn forward_execution_event(&self, event: &DomainEvent) {
        let (action, reason) = match &event.payload {
            EventPayload::ExecutionCompleted(_) => {
                ("complete", "Execution completed successfully".to_string())
            }
            EventPayload::ExecutionError(payload) => {
                let reason = if payload.error_message.is_empty() {
                    "Execution failed".to_string()
                } else {
                    payload.error_message.clone()
                };
                ("abort", reason)
            }
            _ => return,
        };

        let request = ExecutionControlRequest {
            execution_id: self.execution_id.to_string(),
            action: action.to_string(),
            reason,
        };

        let url = format!("{}/api/execution-control", self.settings.server_url);
        self.submit_with_retry(&url, &request, event.event_type())
            .await;
    }

    /// POSTs the request, retrying with exponential backoff on
    /// connect/timeout errors only.
    async fn submit_with_retry<T: Serialize>(&self, url: &str, request: &T, event_type: EventType) {
        let mut delay = Duration::from_millis(self.settings.retry_initial_delay_ms);
        let max_delay = Duration::from_millis(self.settings.retry_max_delay_ms);

        for attempt in 1..=self.settings.retry_max_attempts {
            match self.client.post(url).json(request).send().await {
                Ok(response) => {
                    if response.status().is_success() {
                        debug!(event_type = %event_type, "forwarded event to server");
                    } else {
                        warn!(
                            event_type = %event_type,
                            status = %response.status(),
                            "server rejected forwarded event"
                        );
                    }
                    return;
                }
                Err(e) if e.is_connect() || e.is_timeout() => {
                    if attempt < self.settings.retry_max_attempts {
                        debug!(
                            event_type = %event_type,
                            attempt,
                            max_attempts = self.settings.retry_max_attempts,
                            "failed to forward event, retrying"
                        );
                        tokio::time::sleep(delay).await;
                        delay = (delay * 2).min(max_delay);
                    } else {
                        warn!(
                            event_type = %event_type,
                            attempts = self.settings.retry_max_attempts,
                            error = %e,
                            "could not forward event, dropping"
                        );
                        return;
                    }
                }
                Err(e) => {
                    error!(event_type = %event_type, error = %e, "error forwarding event");
                    return;
                }
            }
        }
    }
}

#[async_trait]
impl EventHandler for EventForwarder {
    /// Enqueues status-relevant events for this forwarder's execution.
    async fn handle(&self, event: Arc<DomainEvent>) -> Result<(), DiaflowError> {
        if event.scope.execution_id != self.execution_id {
            return Ok(());
        }
        if !FORWARDED_TYPES.contains(&event.event_type()) {
            return Ok(());
        }

        if let Some(sender) = self.sender.lock().as_ref() {
            if sender.send((*event).clone()).is_err() {
                warn!("event forwarder queue closed, dropping event");
            }
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use diaflow_domain::events::contracts::{
        ExecutionStartedPayload, NodeErrorPayload, NodeOutputPayload, NodeStartedPayload,
    };
    use diaflow_domain::NodeId;

    fn exec_id() -> ExecutionId {
        ExecutionId::new("exec-1").unwrap()
    }

    fn forwarder() -> Arc<EventForwarder> {
        EventForwarder::new(
            exec_id(),
            ForwarderSettings {
                // Unroutable address: submissions fail fast with a connect
                // error and exercise the retry/drop path.
                server_url: "http://127.0.0.1:1".to_string(),
                retry_initial_delay_ms: 1,
                retry_max_delay_ms: 2,
                ..Default::default()
            },
        )
    }

    #[tokio::test]
    async fn test_filters_to_configured_execution() {
        let forwarder = forwarder();
        forwarder.start().await;

        let other_exec = DomainEvent::node_started(
            ExecutionId::new("exec-other").unwrap(),
            NodeId::new("N1").unwrap(),
            NodeStartedPayload::default(),
        );
        forwarder.handle(Arc::new(other_exec)).await.unwrap();

        let irrelevant_type = DomainEvent::node_output(
            exec_id(),
            NodeId::new("N1").unwrap(),
            NodeOutputPayload::default(),
        );
        forwarder.handle(Arc::new(irrelevant_type)).await.unwrap();

        let not_forwarded = DomainEvent::execution_started(
            exec_id(),
            ExecutionStartedPayload::default(),
        );
        forwarder.handle(Arc::new(not_forwarded)).await.unwrap();

        // Nothing enqueued: stop returns immediately without network
        // activity.
        forwarder.stop().await;
    }

    #[tokio::test]
    async fn test_stop_drains_queue_and_drops_unreachable() {
        let forwarder = forwarder();
        forwarder.start().await;

        let event = DomainEvent::node_error(
            exec_id(),
            NodeId::new("N1").unwrap(),
            NodeErrorPayload {
                error_message: "boom".to_string(),
                ..Default::default()
            },
        );
        forwarder.handle(Arc::new(event)).await.unwrap();

        // Stop waits for the drain task; the unreachable server exhausts
        // retries and the event is dropped without hanging.
        forwarder.stop().await;
    }

    #[test]
    fn test_request_shapes() {
        let node_request = UpdateNodeStateRequest {
            execution_id: "exec-1".to_string(),
            node_id: "N1".to_string(),
            status: ExecutionStatus::Failed,
            error: Some("boom".to_string()),
        };
        let value = serde_json::to_value(&node_request).unwrap();
        assert_eq!(value["status"], "FAILED");
        assert_eq!(value["error"], "boom");

        let control_request = ExecutionControlRequest {
            execution_id: "exec-1".to_string(),
            action: "abort".to_string(),
            reason: "boom".to_string(),
        };
        let value = serde_json::to_value(&control_request).unwrap();
        assert_eq!(value["action"], "abort");
    }

    #[test]
    fn test_status_mapping_for_node_events() {
        // The forwarded status derives from the event type.
        assert!(matches!(
            EventType::NodeStarted,
            t if FORWARDED_TYPES.contains(&t)
        ));
        assert!(matches!(
            EventType::ExecutionError,
            t if FORWARDED_TYPES.contains(&t)
        ));
        assert!(!FORWARDED_TYPES.contains(&EventType::NodeOutput));
        assert!(!FORWARDED_TYPES.contains(&EventType::ExecutionStarted));
    }
}
