// /////////////////////////////////////////////////////////////////////////////
// Diaflow Execution Core
// Copyright (c) 2025 Michael Gardner, A Bit of Help, Inc.
// SPDX-License-Identifier: BSD-3-Clause
// See LICENSE file in the project root.
// /////////////////////////////////////////////////////////////////////////////

//! # Message Router
//!
//! Central broadcast engine distributing execution events to client
//! connections in real time. The router is the single source of truth for
//! live monitoring: it owns the connection registry, the
//! execution-to-connection subscription map, the late-join replay buffer,
//! and the batching machinery.
//!
//! ## Overview
//!
//! - **Connections** are opaque ids backed by an async delivery handler;
//!   health is tracked per connection and three consecutive delivery
//!   failures evict it.
//! - **Replay buffer**: a bounded, TTL-capped ring buffer per execution so
//!   late joiners catch up. Disabled for `_batch_` item executions, which
//!   would otherwise explode memory.
//! - **Batching**: per-execution pending batches flush when they reach
//!   `batch_max` or `batch_interval_ms` after the first enqueue, whichever
//!   comes first. Flushes fan out to all subscribed connections
//!   concurrently; one failing connection never cancels its siblings.
//! - **Backpressure**: a connection whose outstanding-send count exceeds
//!   `max_queue_size` has the newest broadcast dropped (with a warning);
//!   producers are never blocked.
//!
//! As an [`EventHandler`], the router subscribes directly to the event bus:
//! each event is serialized once and broadcast under its execution id, and
//! lifecycle events additionally produce the UI-oriented status envelope
//! (see [`crate::infrastructure::messaging::serialize::ui_envelope`]).

use crate::infrastructure::config::MessagingSettings;
use crate::infrastructure::messaging::serialize::{
    event_to_json_payload, ui_envelope, BatchEnvelope,
};
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use diaflow_domain::events::ports::{ConnectionHandler, EventHandler, MessageRouterPort};
use diaflow_domain::{ConnectionId, DiaflowError, DomainEvent, ExecutionId};
use futures::future::join_all;
use parking_lot::{Mutex, RwLock};
use serde_json::{json, Value};
use std::collections::{HashMap, HashSet, VecDeque};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Weak};
use std::time::Instant;
use tokio::task::JoinHandle;
use tracing::{debug, error, warn};

/// Consecutive delivery failures after which a connection is evicted.
const FAILURE_THRESHOLD: u32 = 3;

/// A connection is reported unhealthy when it has not taken a message for
/// this long, seconds.
const UNHEALTHY_AFTER_S: i64 = 60;

/// Message types excluded from late-join replay.
const REPLAY_EXCLUDED_TYPES: [&str; 2] = ["HEARTBEAT", "CONNECTION_ESTABLISHED"];

/// Cadence of the replay-buffer TTL sweep, seconds.
const BUFFER_SWEEP_INTERVAL_S: u64 = 60;

/// Per-connection delivery health.
#[derive(Debug, Clone)]
pub struct ConnectionHealth {
    pub last_successful_send: DateTime<Utc>,
    pub failed_attempts: u32,
    pub total_messages: u64,
    pub avg_latency_ms: f64,
}

impl ConnectionHealth {
    fn new() -> Self {
        Self {
            last_successful_send: Utc::now(),
            failed_attempts: 0,
            total_messages: 0,
            avg_latency_ms: 0.0,
        }
    }

    fn record_success(&mut self, latency_ms: f64) {
        self.last_successful_send = Utc::now();
        self.total_messages += 1;
        self.avg_latency_ms = (self.avg_latency_ms * (self.total_messages - 1) as f64
            + latency_ms)
            / self.total_messages as f64;
        self.failed_attempts = 0;
    }
}

struct BufferedEvent {
    message: Value,
    buffered_at: DateTime<Utc>,
}

/// Central message router (in-process variant).
///
/// Construct with [`MessageRouter::new`], which returns an `Arc`: the
/// router spawns per-execution delayed-flush tasks that hold a weak
/// back-reference.
pub struct MessageRouter {
    settings: MessagingSettings,
    initialized: AtomicBool,

    handlers: RwLock<HashMap<ConnectionId, Arc<dyn ConnectionHandler>>>,
    execution_subscriptions: RwLock<HashMap<ExecutionId, HashSet<ConnectionId>>>,
    connection_health: RwLock<HashMap<ConnectionId, ConnectionHealth>>,

    // Outstanding-send counters are read and written across delivery tasks.
    outstanding: Mutex<HashMap<ConnectionId, usize>>,

    event_buffer: Mutex<HashMap<ExecutionId, VecDeque<BufferedEvent>>>,
    batch_queue: Mutex<HashMap<ExecutionId, Vec<Value>>>,
    batch_tasks: Mutex<HashMap<ExecutionId, JoinHandle<()>>>,
    sweep_task: Mutex<Option<JoinHandle<()>>>,

    self_ref: Weak<MessageRouter>,
}

impl MessageRouter {
    /// Creates a router with the given messaging settings.
    pub fn new(settings: MessagingSettings) -> Arc<Self> {
        Arc::new_cyclic(|weak| Self {
            settings,
            initialized: AtomicBool::new(false),
            handlers: RwLock::new(HashMap::new()),
            execution_subscriptions: RwLock::new(HashMap::new()),
            connection_health: RwLock::new(HashMap::new()),
            outstanding: Mutex::new(HashMap::new()),
            event_buffer: Mutex::new(HashMap::new()),
            batch_queue: Mutex::new(HashMap::new()),
            batch_tasks: Mutex::new(HashMap::new()),
            sweep_task: Mutex::new(None),
            self_ref: weak.clone(),
        })
    }

    /// Replay buffering is disabled for batch-item executions.
    fn should_buffer_events(execution_id: &ExecutionId) -> bool {
        !execution_id.is_batch_item()
    }

    pub(crate) fn buffer_event(&self, execution_id: &ExecutionId, message: &Value) {
        let mut message = message.clone();
        if message.get("timestamp").is_none() {
            message["timestamp"] = json!(Utc::now().to_rfc3339());
        }

        let mut buffers = self.event_buffer.lock();
        let buffer = buffers.entry(execution_id.clone()).or_default();
        buffer.push_back(BufferedEvent {
            message,
            buffered_at: Utc::now(),
        });
        while buffer.len() > self.settings.buffer_max_per_exec {
            buffer.pop_front();
        }
    }

    async fn replay_buffered_events(
        &self,
        connection_id: &ConnectionId,
        execution_id: &ExecutionId,
    ) {
        let buffered: Vec<Value> = {
            let buffers = self.event_buffer.lock();
            match buffers.get(execution_id) {
                Some(buffer) => buffer.iter().map(|e| e.message.clone()).collect(),
                None => return,
            }
        };

        for message in buffered {
            let message_type = message
                .get("type")
                .and_then(Value::as_str)
                .unwrap_or_default();
            if REPLAY_EXCLUDED_TYPES.contains(&message_type) {
                continue;
            }

            match self.route_to_connection(connection_id, message).await {
                Ok(true) => {}
                _ => {
                    warn!(
                        connection_id = %connection_id,
                        execution_id = %execution_id,
                        "failed to replay event to connection, stopping replay"
                    );
                    break;
                }
            }
        }
    }

    fn schedule_delayed_flush(&self, execution_id: &ExecutionId) {
        let mut tasks = self.batch_tasks.lock();
        if tasks.contains_key(execution_id) {
            return;
        }
        let Some(router) = self.self_ref.upgrade() else {
            return;
        };
        let exec_id = execution_id.clone();
        let interval = self.settings.batch_interval();
        let handle = tokio::spawn(async move {
            tokio::time::sleep(interval).await;
            router.flush_batch(&exec_id).await;
        });
        tasks.insert(execution_id.clone(), handle);
    }

    /// Appends a message to the execution's pending batch and flushes when
    /// the batch is full, otherwise arms the delayed flush. Also the entry
    /// point for the Redis variant's subscriber task, which feeds consumed
    /// channel messages into local batching.
    pub(crate) async fn enqueue_for_batch(&self, execution_id: &ExecutionId, message: Value) {
        let flush_now = {
            let mut queue = self.batch_queue.lock();
            let batch = queue.entry(execution_id.clone()).or_default();
            batch.push(message);
            batch.len() >= self.settings.batch_max
        };

        if flush_now {
            self.flush_batch(execution_id).await;
        } else {
            self.schedule_delayed_flush(execution_id);
        }
    }

    /// Flushes the pending batch for an execution to all subscribed
    /// connections.
    pub async fn flush_batch(&self, execution_id: &ExecutionId) {
        let messages = {
            let mut queue = self.batch_queue.lock();
            queue.remove(execution_id).unwrap_or_default()
        };
        self.batch_tasks.lock().remove(execution_id);

        if messages.is_empty() {
            return;
        }

        let connection_ids: Vec<ConnectionId> = {
            let subs = self.execution_subscriptions.read();
            match subs.get(execution_id) {
                Some(connections) if !connections.is_empty() => {
                    connections.iter().cloned().collect()
                }
                _ => return,
            }
        };

        let start = Instant::now();
        let message_count = messages.len();
        let envelope = BatchEnvelope::new(execution_id.clone(), messages).to_value();

        // Fan out concurrently; a failing sibling never cancels the rest.
        let deliveries = connection_ids
            .iter()
            .map(|conn_id| self.route_to_connection(conn_id, envelope.clone()));
        let results = join_all(deliveries).await;

        let successful = results.iter().filter(|r| matches!(r, Ok(true))).count();
        let failed = results.len() - successful;

        let elapsed = start.elapsed().as_secs_f64();
        if elapsed > self.settings.broadcast_warning_threshold_s {
            warn!(
                execution_id = %execution_id,
                elapsed_s = elapsed,
                events = message_count,
                connections = connection_ids.len(),
                successful,
                failed,
                "slow batch broadcast"
            );
        }
    }

    fn sweep_expired_buffers(&self) {
        let cutoff = Utc::now()
            - chrono::Duration::from_std(self.settings.buffer_ttl())
                .unwrap_or_else(|_| chrono::Duration::zero());

        let mut buffers = self.event_buffer.lock();
        buffers.retain(|_, buffer| {
            buffer.retain(|event| event.buffered_at > cutoff);
            !buffer.is_empty()
        });
    }

    /// True when at least one local connection is subscribed to the
    /// execution.
    pub(crate) fn has_subscribers(&self, execution_id: &ExecutionId) -> bool {
        self.execution_subscriptions
            .read()
            .get(execution_id)
            .map(|connections| !connections.is_empty())
            .unwrap_or(false)
    }

    /// Number of buffered replay events for an execution (stats and tests).
    pub fn buffered_event_count(&self, execution_id: &ExecutionId) -> usize {
        self.event_buffer
            .lock()
            .get(execution_id)
            .map(VecDeque::len)
            .unwrap_or(0)
    }
}

#[async_trait]
impl MessageRouterPort for MessageRouter {
    async fn initialize(&self) -> Result<(), DiaflowError> {
        if self.initialized.swap(true, Ordering::AcqRel) {
            return Ok(());
        }

        // The sweep task holds only a weak reference so an undropped
        // router cannot outlive its owner.
        let router = self.self_ref.clone();
        let handle = tokio::spawn(async move {
            let mut ticker =
                tokio::time::interval(std::time::Duration::from_secs(BUFFER_SWEEP_INTERVAL_S));
            ticker.tick().await;
            loop {
                ticker.tick().await;
                let Some(router) = router.upgrade() else { break };
                router.sweep_expired_buffers();
            }
        });
        *self.sweep_task.lock() = Some(handle);
        Ok(())
    }

    async fn cleanup(&self) -> Result<(), DiaflowError> {
        // Cancel pending flush tasks, then flush remaining batches
        // synchronously before dropping state.
        let tasks: Vec<JoinHandle<()>> = {
            let mut batch_tasks = self.batch_tasks.lock();
            batch_tasks.drain().map(|(_, task)| task).collect()
        };
        for task in tasks {
            task.abort();
        }

        let pending: Vec<ExecutionId> = self.batch_queue.lock().keys().cloned().collect();
        for execution_id in pending {
            self.flush_batch(&execution_id).await;
        }

        if let Some(task) = self.sweep_task.lock().take() {
            task.abort();
        }

        self.handlers.write().clear();
        self.execution_subscriptions.write().clear();
        self.connection_health.write().clear();
        self.outstanding.lock().clear();
        self.batch_queue.lock().clear();
        self.event_buffer.lock().clear();
        self.initialized.store(false, Ordering::Release);
        debug!("message router cleaned up");
        Ok(())
    }

    async fn register_connection(
        &self,
        connection_id: ConnectionId,
        handler: Arc<dyn ConnectionHandler>,
    ) -> Result<(), DiaflowError> {
        self.handlers.write().insert(connection_id.clone(), handler);
        self.connection_health
            .write()
            .insert(connection_id.clone(), ConnectionHealth::new());
        self.outstanding.lock().insert(connection_id, 0);
        Ok(())
    }

    async fn unregister_connection(
        &self,
        connection_id: &ConnectionId,
    ) -> Result<(), DiaflowError> {
        self.handlers.write().remove(connection_id);
        self.connection_health.write().remove(connection_id);
        self.outstanding.lock().remove(connection_id);

        let mut subs = self.execution_subscriptions.write();
        subs.retain(|_, connections| {
            connections.remove(connection_id);
            !connections.is_empty()
        });
        Ok(())
    }

    async fn subscribe_connection_to_execution(
        &self,
        connection_id: ConnectionId,
        execution_id: ExecutionId,
    ) -> Result<(), DiaflowError> {
        self.execution_subscriptions
            .write()
            .entry(execution_id.clone())
            .or_default()
            .insert(connection_id.clone());

        self.replay_buffered_events(&connection_id, &execution_id)
            .await;
        Ok(())
    }

    async fn unsubscribe_connection_from_execution(
        &self,
        connection_id: &ConnectionId,
        execution_id: &ExecutionId,
    ) -> Result<(), DiaflowError> {
        let mut subs = self.execution_subscriptions.write();
        if let Some(connections) = subs.get_mut(execution_id) {
            connections.remove(connection_id);
            if connections.is_empty() {
                subs.remove(execution_id);
            }
        }
        Ok(())
    }

    async fn broadcast_to_execution(
        &self,
        execution_id: &ExecutionId,
        message: Value,
    ) -> Result<(), DiaflowError> {
        let has_subscribers = self.has_subscribers(execution_id);
        let should_buffer = Self::should_buffer_events(execution_id);
        if !has_subscribers && !should_buffer {
            return Ok(());
        }

        if should_buffer {
            self.buffer_event(execution_id, &message);
        }

        if !has_subscribers {
            return Ok(());
        }

        self.enqueue_for_batch(execution_id, message).await;
        Ok(())
    }

    async fn route_to_connection(
        &self,
        connection_id: &ConnectionId,
        message: Value,
    ) -> Result<bool, DiaflowError> {
        let Some(handler) = self.handlers.read().get(connection_id).cloned() else {
            warn!(connection_id = %connection_id, "no handler for connection");
            return Ok(false);
        };

        {
            let mut outstanding = self.outstanding.lock();
            let count = outstanding.entry(connection_id.clone()).or_insert(0);
            if *count > self.settings.max_queue_size {
                warn!(
                    connection_id = %connection_id,
                    outstanding = *count,
                    "connection queue full, applying backpressure"
                );
                return Ok(false);
            }
            *count += 1;
        }

        let start = Instant::now();
        let result = handler.send(message).await;

        {
            let mut outstanding = self.outstanding.lock();
            if let Some(count) = outstanding.get_mut(connection_id) {
                *count = count.saturating_sub(1);
            }
        }

        match result {
            Ok(()) => {
                let latency_ms = start.elapsed().as_secs_f64() * 1000.0;
                if let Some(health) = self.connection_health.write().get_mut(connection_id) {
                    health.record_success(latency_ms);
                }
                Ok(true)
            }
            Err(e) => {
                error!(connection_id = %connection_id, error = %e, "error delivering message");

                let evict = {
                    let mut health_map = self.connection_health.write();
                    match health_map.get_mut(connection_id) {
                        Some(health) => {
                            health.failed_attempts += 1;
                            health.failed_attempts >= FAILURE_THRESHOLD
                        }
                        None => false,
                    }
                };

                if evict {
                    error!(
                        connection_id = %connection_id,
                        "connection exceeded failure threshold, unregistering"
                    );
                    self.unregister_connection(connection_id).await?;
                }
                Ok(false)
            }
        }
    }

    fn get_stats(&self) -> Value {
        let handlers = self.handlers.read();
        let subs = self.execution_subscriptions.read();
        let health_map = self.connection_health.read();
        let outstanding = self.outstanding.lock();

        let now = Utc::now();
        let unhealthy = health_map
            .values()
            .filter(|h| (now - h.last_successful_send).num_seconds() > UNHEALTHY_AFTER_S)
            .count();

        let avg_queue_size = if outstanding.is_empty() {
            0.0
        } else {
            outstanding.values().sum::<usize>() as f64 / outstanding.len() as f64
        };

        let buffered_events: usize = self.event_buffer.lock().values().map(VecDeque::len).sum();

        let connection_health: serde_json::Map<String, Value> = health_map
            .iter()
            .map(|(conn_id, health)| {
                (
                    conn_id.to_string(),
                    json!({
                        "last_send": health.last_successful_send.to_rfc3339(),
                        "failed_attempts": health.failed_attempts,
                        "total_messages": health.total_messages,
                        "avg_latency_ms": (health.avg_latency_ms * 100.0).round() / 100.0,
                    }),
                )
            })
            .collect();

        json!({
            "worker_id": "single-worker",
            "active_connections": handlers.len(),
            "active_executions": subs.len(),
            "total_subscriptions": subs.values().map(HashSet::len).sum::<usize>(),
            "unhealthy_connections": unhealthy,
            "avg_queue_size": (avg_queue_size * 100.0).round() / 100.0,
            "buffered_events": buffered_events,
            "connection_health": connection_health,
        })
    }
}

#[async_trait]
impl EventHandler for MessageRouter {
    /// Routes a domain event to subscribed connections.
    ///
    /// The event is serialized once and broadcast under its execution id;
    /// lifecycle events additionally broadcast the synthesized UI status
    /// envelope. Both shapes land in the replay buffer, so late joiners
    /// observe the same doubled stream live clients did.
    async fn handle(&self, event: Arc<DomainEvent>) -> Result<(), DiaflowError> {
        let payload = event_to_json_payload(&event);
        let execution_id = event.scope.execution_id.clone();

        self.broadcast_to_execution(&execution_id, payload).await?;

        if let Some(envelope) = ui_envelope(&event) {
            self.broadcast_to_execution(&execution_id, envelope).await?;
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use parking_lot::Mutex as PlMutex;

    struct CollectingHandler {
        messages: PlMutex<Vec<Value>>,
        fail: AtomicBool,
    }

    impl CollectingHandler {
        fn new() -> Arc<Self> {
            Arc::new(Self {
                messages: PlMutex::new(Vec::new()),
                fail: AtomicBool::new(false),
            })
        }

        fn count(&self) -> usize {
            self.messages.lock().len()
        }
    }

    #[async_trait]
    impl ConnectionHandler for CollectingHandler {
        async fn send(&self, message: Value) -> Result<(), DiaflowError> {
            if self.fail.load(Ordering::Relaxed) {
                return Err(DiaflowError::delivery_failed("simulated failure"));
            }
            self.messages.lock().push(message);
            Ok(())
        }
    }

    fn settings() -> MessagingSettings {
        MessagingSettings {
            batch_interval_ms: 20,
            batch_max: 10,
            ..Default::default()
        }
    }

    fn exec_id(id: &str) -> ExecutionId {
        ExecutionId::new(id).unwrap()
    }

    fn conn_id(id: &str) -> ConnectionId {
        ConnectionId::new(id).unwrap()
    }

    #[tokio::test]
    async fn test_broadcast_buffers_without_subscribers() {
        let router = MessageRouter::new(settings());
        let exec = exec_id("E1");

        router
            .broadcast_to_execution(&exec, json!({"type": "NODE_STARTED"}))
            .await
            .unwrap();

        assert_eq!(router.buffered_event_count(&exec), 1);
    }

    #[tokio::test]
    async fn test_batch_item_executions_are_not_buffered() {
        let router = MessageRouter::new(settings());
        let exec = exec_id("E1_batch_3");

        router
            .broadcast_to_execution(&exec, json!({"type": "NODE_STARTED"}))
            .await
            .unwrap();

        assert_eq!(router.buffered_event_count(&exec), 0);
    }

    #[tokio::test]
    async fn test_replay_buffer_evicts_oldest_on_overflow() {
        let router = MessageRouter::new(MessagingSettings {
            buffer_max_per_exec: 3,
            ..settings()
        });
        let exec = exec_id("E1");

        for i in 0..5 {
            router
                .broadcast_to_execution(&exec, json!({"type": "NODE_OUTPUT", "seq": i}))
                .await
                .unwrap();
        }

        assert_eq!(router.buffered_event_count(&exec), 3);
        let buffers = router.event_buffer.lock();
        let oldest = &buffers.get(&exec).unwrap().front().unwrap().message;
        assert_eq!(oldest["seq"], 2);
    }

    #[tokio::test]
    async fn test_three_consecutive_failures_evict_connection() {
        let router = MessageRouter::new(settings());
        let conn = conn_id("C1");
        let handler = CollectingHandler::new();
        handler.fail.store(true, Ordering::Relaxed);

        router
            .register_connection(conn.clone(), handler)
            .await
            .unwrap();

        for _ in 0..3 {
            let delivered = router
                .route_to_connection(&conn, json!({"type": "X"}))
                .await
                .unwrap();
            assert!(!delivered);
        }

        assert!(!router.handlers.read().contains_key(&conn));
    }

    #[tokio::test]
    async fn test_success_resets_failure_count() {
        let router = MessageRouter::new(settings());
        let conn = conn_id("C1");
        let handler = CollectingHandler::new();

        router
            .register_connection(conn.clone(), handler.clone())
            .await
            .unwrap();

        handler.fail.store(true, Ordering::Relaxed);
        for _ in 0..2 {
            router
                .route_to_connection(&conn, json!({"type": "X"}))
                .await
                .unwrap();
        }
        handler.fail.store(false, Ordering::Relaxed);
        assert!(router
            .route_to_connection(&conn, json!({"type": "X"}))
            .await
            .unwrap());

        let health = router.connection_health.read();
        assert_eq!(health.get(&conn).unwrap().failed_attempts, 0);
        assert_eq!(health.get(&conn).unwrap().total_messages, 1);
    }

    #[tokio::test]
    async fn test_unregister_drops_execution_subscriptions() {
        let router = MessageRouter::new(settings());
        let conn = conn_id("C1");
        let exec = exec_id("E1");

        router
            .register_connection(conn.clone(), CollectingHandler::new())
            .await
            .unwrap();
        router
            .subscribe_connection_to_execution(conn.clone(), exec.clone())
            .await
            .unwrap();
        router.unregister_connection(&conn).await.unwrap();

        assert!(router.execution_subscriptions.read().get(&exec).is_none());
    }

    #[tokio::test]
    async fn test_stats_snapshot_shape() {
        let router = MessageRouter::new(settings());
        let conn = conn_id("C1");
        let handler = CollectingHandler::new();

        router
            .register_connection(conn.clone(), handler)
            .await
            .unwrap();
        router
            .subscribe_connection_to_execution(conn.clone(), exec_id("E1"))
            .await
            .unwrap();

        let stats = router.get_stats();
        assert_eq!(stats["active_connections"], 1);
        assert_eq!(stats["active_executions"], 1);
        assert_eq!(stats["total_subscriptions"], 1);
        assert!(stats["connection_health"]["C1"]["failed_attempts"].is_u64());
    }

    #[tokio::test]
    async fn test_sweep_removes_expired_buffer_entries() {
        let router = MessageRouter::new(MessagingSettings {
            buffer_ttl_s: 0,
            ..settings()
        });
        let exec = exec_id("E1");

        router
            .broadcast_to_execution(&exec, json!({"type": "NODE_STARTED"}))
            .await
            .unwrap();
        assert_eq!(router.buffered_event_count(&exec), 1);

        // TTL of zero expires everything on the next sweep.
        tokio::time::sleep(std::time::Duration::from_millis(5)).await;
        router.sweep_expired_buffers();
        assert_eq!(router.buffered_event_count(&exec), 0);
    }
}
