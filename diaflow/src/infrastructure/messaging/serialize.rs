// /////////////////////////////////////////////////////////////////////////////
// Diaflow Execution Core
// Copyright (c) 2025 Michael Gardner, A Bit of Help, Inc.
// SPDX-License-Identifier: BSD-3-Clause
// See LICENSE file in the project root.
// /////////////////////////////////////////////////////////////////////////////

//! # Event Serialization
//!
//! Centralized serialization of domain events to the JSON wire format
//! consumed by client connections, ensuring a consistent shape across the
//! in-process and Redis routers.
//!
//! Every broadcast message is a JSON object:
//!
//! ```text
//! { "type": <EventType>, "execution_id": <string>, "node_id": <string?>,
//!   "event_id": <uuid>, "timestamp": <ISO-8601>,
//!   "data": { ...payload fields, plus "timestamp" again for legacy consumers } }
//! ```
//!
//! Serialization is an exhaustive pattern match over the payload sum type;
//! there is no reflective field probing. [`ui_envelope`] is the single
//! source of truth for the backward-compatibility `NODE_STATUS_CHANGED` /
//! `EXECUTION_STATUS_CHANGED` envelopes synthesized from lifecycle events.

use chrono::{DateTime, SecondsFormat, Utc};
use diaflow_domain::events::contracts::EventPayload;
use diaflow_domain::{DomainEvent, EventType, ExecutionId, ExecutionStatus};
use serde_json::{json, Map, Value};

fn iso(ts: DateTime<Utc>) -> String {
    ts.to_rfc3339_opts(SecondsFormat::Micros, true)
}

/// Converts a domain event to its JSON wire payload.
///
/// The `data` object carries the payload fields with a few
/// backward-compatibility adjustments kept from the legacy streaming
/// protocol: a mirrored `timestamp`, the node id for node events, a derived
/// `status` for lifecycle events, and the node-state snapshot flattened
/// into the envelope.
pub fn event_to_json_payload(event: &DomainEvent) -> Value {
    let mut message = Map::new();
    message.insert("type".into(), json!(event.event_type().as_str()));
    message.insert("event_id".into(), json!(event.event_id.to_string()));
    message.insert(
        "execution_id".into(),
        json!(event.scope.execution_id.as_str()),
    );
    if let Some(node_id) = &event.scope.node_id {
        message.insert("node_id".into(), json!(node_id.as_str()));
    }
    if let Some(connection_id) = &event.scope.connection_id {
        message.insert("connection_id".into(), json!(connection_id.as_str()));
    }
    if let Some(parent) = &event.scope.parent_execution_id {
        message.insert("parent_execution_id".into(), json!(parent.as_str()));
    }
    if let Some(correlation_id) = &event.correlation_id {
        message.insert("correlation_id".into(), json!(correlation_id.to_string()));
    }
    message.insert("timestamp".into(), json!(iso(event.occurred_at)));
    message.insert("data".into(), Value::Object(payload_data(event)));

    Value::Object(message)
}

fn payload_data(event: &DomainEvent) -> Map<String, Value> {
    // Payload structs serialize cleanly; unwrap the enum wrapper so `data`
    // carries the bare fields.
    let mut data = match &event.payload {
        EventPayload::ExecutionStarted(p) => to_map(p),
        EventPayload::ExecutionCompleted(p) => to_map(p),
        EventPayload::ExecutionError(p) => to_map(p),
        EventPayload::ExecutionStatusChanged(p) => to_map(p),
        EventPayload::ExecutionLog(p) => to_map(p),
        EventPayload::NodeStarted(p) => to_map(p),
        EventPayload::NodeCompleted(p) => to_map(p),
        EventPayload::NodeError(p) => to_map(p),
        EventPayload::NodeOutput(p) => to_map(p),
        EventPayload::NodeStatusChanged(p) => to_map(p),
        EventPayload::MetricsCollected(p) => to_map(p),
        EventPayload::OptimizationSuggested(p) => to_map(p),
        EventPayload::WebhookReceived(p) => to_map(p),
    };

    // Legacy consumers read the timestamp from the data object.
    data.insert("timestamp".into(), json!(iso(event.occurred_at)));

    if event.event_type().is_node_event() {
        if let Some(node_id) = &event.scope.node_id {
            data.insert("node_id".into(), json!(node_id.as_str()));
        }
    }

    match &event.payload {
        EventPayload::ExecutionStarted(_) => {
            data.insert("status".into(), json!(ExecutionStatus::Running.as_str()));
            if let Some(parent) = &event.scope.parent_execution_id {
                data.insert("parent_execution_id".into(), json!(parent.as_str()));
            }
        }
        EventPayload::ExecutionError(_) => {
            data.insert("status".into(), json!(ExecutionStatus::Failed.as_str()));
        }
        EventPayload::NodeStarted(_) => {
            data.insert("status".into(), json!(ExecutionStatus::Running.as_str()));
        }
        EventPayload::NodeCompleted(p) => {
            // Flatten the node-state snapshot into the data object.
            data.remove("state");
            let status = p
                .state
                .as_ref()
                .map(|s| s.status)
                .unwrap_or(ExecutionStatus::Completed);
            data.insert("status".into(), json!(status.as_str()));
            if let Some(state) = &p.state {
                if let Some(started_at) = state.started_at {
                    data.insert("started_at".into(), json!(iso(started_at)));
                }
                if let Some(ended_at) = state.ended_at {
                    data.insert("ended_at".into(), json!(iso(ended_at)));
                }
                if let Some(node_type) = &state.node_type {
                    data.insert("node_type".into(), json!(node_type));
                }
            }
        }
        EventPayload::NodeError(_) => {
            data.insert("status".into(), json!(ExecutionStatus::Failed.as_str()));
        }
        _ => {}
    }

    data
}

fn to_map<T: serde::Serialize>(payload: &T) -> Map<String, Value> {
    match serde_json::to_value(payload) {
        Ok(Value::Object(map)) => map,
        Ok(other) => {
            let mut map = Map::new();
            map.insert("value".into(), other);
            map
        }
        Err(_) => Map::new(),
    }
}

/// Maps a lifecycle event to the UI-oriented status envelope, if the event
/// has one.
///
/// `NODE_STARTED` / `NODE_COMPLETED` / `NODE_ERROR` synthesize
/// `NODE_STATUS_CHANGED` with status RUNNING / COMPLETED / FAILED;
/// `EXECUTION_STARTED` / `EXECUTION_COMPLETED` / `EXECUTION_ERROR`
/// synthesize `EXECUTION_STATUS_CHANGED` (terminal envelopes carry
/// `is_final: true`). Explicit `NODE_STATUS_CHANGED` events pass through
/// with their payload status. Everything else has no UI envelope.
///
/// The envelope duplicates the raw event on the wire; that duplication is
/// intentional for older UI clients, which read the mirrored `event_type`
/// field.
pub fn ui_envelope(event: &DomainEvent) -> Option<Value> {
    let exec_id = event.scope.execution_id.as_str();
    let ts = iso(event.occurred_at);

    match &event.payload {
        EventPayload::ExecutionStarted(_) => Some(execution_status_envelope(
            exec_id,
            ExecutionStatus::Running,
            false,
            &ts,
        )),
        EventPayload::ExecutionCompleted(p) => {
            Some(execution_status_envelope(exec_id, p.status, true, &ts))
        }
        EventPayload::ExecutionError(_) => Some(execution_status_envelope(
            exec_id,
            ExecutionStatus::Failed,
            true,
            &ts,
        )),
        EventPayload::NodeStarted(_) => {
            node_status_envelope(event, ExecutionStatus::Running, &ts)
        }
        EventPayload::NodeCompleted(_) => {
            node_status_envelope(event, ExecutionStatus::Completed, &ts)
        }
        EventPayload::NodeError(_) => node_status_envelope(event, ExecutionStatus::Failed, &ts),
        EventPayload::NodeStatusChanged(p) => node_status_envelope(event, p.status, &ts),
        _ => None,
    }
}

fn execution_status_envelope(
    execution_id: &str,
    status: ExecutionStatus,
    is_final: bool,
    timestamp: &str,
) -> Value {
    let envelope_type = EventType::ExecutionStatusChanged.as_str();
    let mut data = json!({
        "status": status.as_str(),
        "timestamp": timestamp,
    });
    if is_final {
        data["is_final"] = json!(true);
    }
    json!({
        "type": envelope_type,
        // Mirrored for older clients that read `event_type`.
        "event_type": envelope_type,
        "execution_id": execution_id,
        "data": data,
        "timestamp": timestamp,
    })
}

fn node_status_envelope(
    event: &DomainEvent,
    status: ExecutionStatus,
    timestamp: &str,
) -> Option<Value> {
    let node_id = event.scope.node_id.as_ref()?;
    let envelope_type = EventType::NodeStatusChanged.as_str();
    Some(json!({
        "type": envelope_type,
        "event_type": envelope_type,
        "execution_id": event.scope.execution_id.as_str(),
        "data": {
            "node_id": node_id.as_str(),
            "status": status.as_str(),
            "timestamp": timestamp,
        },
        "timestamp": timestamp,
    }))
}

/// A batch of messages for one execution, flushed together.
///
/// Internally batches are a typed value; the `BATCH_UPDATE` tag exists only
/// on the wire.
#[derive(Debug, Clone)]
pub struct BatchEnvelope {
    pub execution_id: ExecutionId,
    pub events: Vec<Value>,
    pub timestamp: DateTime<Utc>,
}

impl BatchEnvelope {
    pub fn new(execution_id: ExecutionId, events: Vec<Value>) -> Self {
        Self {
            execution_id,
            events,
            timestamp: Utc::now(),
        }
    }

    /// Number of events in the batch.
    pub fn batch_size(&self) -> usize {
        self.events.len()
    }

    /// Renders the wire shape.
    pub fn to_value(&self) -> Value {
        json!({
            "type": "BATCH_UPDATE",
            "execution_id": self.execution_id.as_str(),
            "events": self.events,
            "timestamp": iso(self.timestamp),
            "batch_size": self.events.len(),
        })
    }
}
