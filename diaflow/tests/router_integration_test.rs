// /////////////////////////////////////////////////////////////////////////////
// Diaflow Execution Core
// Copyright (c) 2025 Michael Gardner, A Bit of Help, Inc.
// SPDX-License-Identifier: BSD-3-Clause
// See LICENSE file in the project root.
// /////////////////////////////////////////////////////////////////////////////

//! # Message Router Integration Tests
//!
//! End-to-end scenarios over the broadcast plane: late-join replay,
//! time- and size-triggered batching, and replay exclusion rules.

use async_trait::async_trait;
use diaflow::infrastructure::config::MessagingSettings;
use diaflow::infrastructure::messaging::serialize::event_to_json_payload;
use diaflow::MessageRouter;
use diaflow_domain::events::contracts::{
    ExecutionStartedPayload, NodeCompletedPayload, NodeStartedPayload,
};
use diaflow_domain::events::ports::{ConnectionHandler, EventHandler, MessageRouterPort};
use diaflow_domain::{ConnectionId, DiaflowError, DomainEvent, ExecutionId, NodeId};
use parking_lot::Mutex;
use serde_json::{json, Value};
use std::sync::Arc;
use std::time::Duration;

struct CollectingConnection {
    messages: Mutex<Vec<Value>>,
}

impl CollectingConnection {
    fn new() -> Arc<Self> {
        Arc::new(Self {
            messages: Mutex::new(Vec::new()),
        })
    }

    fn snapshot(&self) -> Vec<Value> {
        self.messages.lock().clone()
    }
}

#[async_trait]
impl ConnectionHandler for CollectingConnection {
    async fn send(&self, message: Value) -> Result<(), DiaflowError> {
        self.messages.lock().push(message);
        Ok(())
    }
}

fn exec_id(id: &str) -> ExecutionId {
    ExecutionId::new(id).unwrap()
}

fn node_id(id: &str) -> NodeId {
    NodeId::new(id).unwrap()
}

fn conn_id(id: &str) -> ConnectionId {
    ConnectionId::new(id).unwrap()
}

#[tokio::test]
async fn test_late_join_replays_buffered_events_in_order() {
    let router = MessageRouter::new(MessagingSettings::default());
    router.initialize().await.unwrap();
    let exec = exec_id("E1");

    // Publish the lifecycle before any connection exists.
    let events = vec![
        DomainEvent::execution_started(
            exec.clone(),
            ExecutionStartedPayload {
                diagram_id: Some("D".to_string()),
                ..Default::default()
            },
        ),
        DomainEvent::node_started(
            exec.clone(),
            node_id("N1"),
            NodeStartedPayload {
                node_type: Some("job".to_string()),
                ..Default::default()
            },
        ),
        DomainEvent::node_completed(
            exec.clone(),
            node_id("N1"),
            NodeCompletedPayload {
                duration_ms: Some(42),
                ..Default::default()
            },
        ),
    ];
    for event in &events {
        router.handle(Arc::new(event.clone())).await.unwrap();
    }

    // Late join: register and subscribe after the fact.
    let connection = CollectingConnection::new();
    router
        .register_connection(conn_id("C"), connection.clone())
        .await
        .unwrap();
    router
        .subscribe_connection_to_execution(conn_id("C"), exec.clone())
        .await
        .unwrap();

    // Each lifecycle event was buffered twice: raw shape plus the
    // synthesized UI envelope, replayed in buffer order.
    let received = connection.snapshot();
    let types: Vec<&str> = received
        .iter()
        .map(|m| m["type"].as_str().unwrap())
        .collect();
    assert_eq!(
        types,
        vec![
            "EXECUTION_STARTED",
            "EXECUTION_STATUS_CHANGED",
            "NODE_STARTED",
            "NODE_STATUS_CHANGED",
            "NODE_COMPLETED",
            "NODE_STATUS_CHANGED",
        ]
    );

    // Subsequent broadcasts flow to the connection as batches.
    router
        .handle(Arc::new(events[2].clone()))
        .await
        .unwrap();
    tokio::time::sleep(Duration::from_millis(120)).await;
    let received = connection.snapshot();
    assert_eq!(received.last().unwrap()["type"], "BATCH_UPDATE");

    router.cleanup().await.unwrap();
}

#[tokio::test]
async fn test_batching_collects_burst_into_single_envelope() {
    let router = MessageRouter::new(MessagingSettings {
        batch_interval_ms: 50,
        batch_max: 100,
        ..Default::default()
    });
    router.initialize().await.unwrap();
    let exec = exec_id("E2");

    let connection = CollectingConnection::new();
    router
        .register_connection(conn_id("C"), connection.clone())
        .await
        .unwrap();
    router
        .subscribe_connection_to_execution(conn_id("C"), exec.clone())
        .await
        .unwrap();

    // Ten completions in a burst, well inside the flush window.
    for i in 0..10 {
        let event = DomainEvent::node_completed(
            exec.clone(),
            node_id(&format!("N{i}")),
            NodeCompletedPayload {
                duration_ms: Some(i),
                ..Default::default()
            },
        );
        router
            .broadcast_to_execution(&exec, event_to_json_payload(&event))
            .await
            .unwrap();
    }

    tokio::time::sleep(Duration::from_millis(100)).await;

    let received = connection.snapshot();
    assert_eq!(received.len(), 1, "expected exactly one BATCH_UPDATE");
    let batch = &received[0];
    assert_eq!(batch["type"], "BATCH_UPDATE");
    assert_eq!(batch["execution_id"], "E2");
    assert_eq!(batch["batch_size"], 10);

    // Arrival order is preserved inside the batch.
    let sequence: Vec<u64> = batch["events"]
        .as_array()
        .unwrap()
        .iter()
        .map(|e| e["data"]["duration_ms"].as_u64().unwrap())
        .collect();
    assert_eq!(sequence, (0..10).collect::<Vec<u64>>());

    router.cleanup().await.unwrap();
}

#[tokio::test]
async fn test_full_batch_flushes_without_waiting() {
    let router = MessageRouter::new(MessagingSettings {
        batch_interval_ms: 10_000,
        batch_max: 3,
        ..Default::default()
    });
    router.initialize().await.unwrap();
    let exec = exec_id("E3");

    let connection = CollectingConnection::new();
    router
        .register_connection(conn_id("C"), connection.clone())
        .await
        .unwrap();
    router
        .subscribe_connection_to_execution(conn_id("C"), exec.clone())
        .await
        .unwrap();

    for i in 0..3 {
        router
            .broadcast_to_execution(&exec, json!({"type": "NODE_OUTPUT", "seq": i}))
            .await
            .unwrap();
    }

    // The size trigger flushed synchronously; the long interval never ran.
    let received = connection.snapshot();
    assert_eq!(received.len(), 1);
    assert_eq!(received[0]["batch_size"], 3);

    router.cleanup().await.unwrap();
}

#[tokio::test]
async fn test_replay_skips_transport_control_messages() {
    let router = MessageRouter::new(MessagingSettings::default());
    router.initialize().await.unwrap();
    let exec = exec_id("E4");

    router
        .broadcast_to_execution(&exec, json!({"type": "HEARTBEAT"}))
        .await
        .unwrap();
    router
        .broadcast_to_execution(&exec, json!({"type": "CONNECTION_ESTABLISHED"}))
        .await
        .unwrap();
    router
        .broadcast_to_execution(&exec, json!({"type": "NODE_OUTPUT", "seq": 1}))
        .await
        .unwrap();

    let connection = CollectingConnection::new();
    router
        .register_connection(conn_id("C"), connection.clone())
        .await
        .unwrap();
    router
        .subscribe_connection_to_execution(conn_id("C"), exec.clone())
        .await
        .unwrap();

    let received = connection.snapshot();
    assert_eq!(received.len(), 1);
    assert_eq!(received[0]["type"], "NODE_OUTPUT");

    router.cleanup().await.unwrap();
}

#[tokio::test]
async fn test_cleanup_flushes_pending_batches() {
    let router = MessageRouter::new(MessagingSettings {
        batch_interval_ms: 10_000,
        batch_max: 100,
        ..Default::default()
    });
    router.initialize().await.unwrap();
    let exec = exec_id("E5");

    let connection = CollectingConnection::new();
    router
        .register_connection(conn_id("C"), connection.clone())
        .await
        .unwrap();
    router
        .subscribe_connection_to_execution(conn_id("C"), exec.clone())
        .await
        .unwrap();

    router
        .broadcast_to_execution(&exec, json!({"type": "NODE_OUTPUT"}))
        .await
        .unwrap();

    // The delayed flush would fire far in the future; cleanup must flush
    // the pending batch synchronously before shutdown.
    router.cleanup().await.unwrap();

    let received = connection.snapshot();
    assert_eq!(received.len(), 1);
    assert_eq!(received[0]["type"], "BATCH_UPDATE");
}
