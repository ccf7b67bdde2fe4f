// /////////////////////////////////////////////////////////////////////////////
// Diaflow Execution Core
// Copyright (c) 2025 Michael Gardner, A Bit of Help, Inc.
// SPDX-License-Identifier: BSD-3-Clause
// See LICENSE file in the project root.
// /////////////////////////////////////////////////////////////////////////////

//! # Redis Message Router
//!
//! Cross-process variant of the message router for distributed deployments
//! (multiple worker processes serving client subscriptions).
//!
//! Semantics differ from the in-process router only in the broadcast path:
//! [`MessageRouterPort::broadcast_to_execution`] publishes the serialized
//! message to the Redis Pub/Sub channel `exec:{execution_id}`, and a
//! per-execution subscriber task consumes the channel and feeds the local
//! batch queue for delivery to local connections. Connection registration,
//! health tracking, batching, and unhealthy-connection eviction are shared
//! with the in-process router.
//!
//! The replay buffer is kept per-process: a late joiner on this worker
//! replays this worker's buffer only. Cross-process late-join relies on a
//! higher-layer event store.

use crate::infrastructure::config::MessagingSettings;
use crate::infrastructure::messaging::message_router::MessageRouter;
use crate::infrastructure::messaging::serialize::{event_to_json_payload, ui_envelope};
use async_trait::async_trait;
use diaflow_domain::events::ports::{ConnectionHandler, EventHandler, MessageRouterPort};
use diaflow_domain::{ConnectionId, DiaflowError, DomainEvent, ExecutionId};
use futures::StreamExt;
use parking_lot::Mutex;
use redis::aio::ConnectionManager;
use redis::AsyncCommands;
use serde_json::Value;
use std::collections::HashMap;
use std::sync::{Arc, Weak};
use tokio::task::JoinHandle;
use tracing::{debug, error, warn};

fn channel_for(execution_id: &ExecutionId) -> String {
    format!("exec:{execution_id}")
}

/// Redis-backed message router for multi-worker deployments.
pub struct RedisMessageRouter {
    redis_url: String,
    /// Local delivery plane: registry, health, batching, replay buffer.
    local: Arc<MessageRouter>,
    publisher: Mutex<Option<ConnectionManager>>,
    subscription_tasks: Mutex<HashMap<ExecutionId, JoinHandle<()>>>,
    self_ref: Weak<RedisMessageRouter>,
}

impl RedisMessageRouter {
    /// Creates a router publishing through the given Redis URL.
    pub fn new(redis_url: impl Into<String>, settings: MessagingSettings) -> Arc<Self> {
        Arc::new_cyclic(|weak| Self {
            redis_url: redis_url.into(),
            local: MessageRouter::new(settings),
            publisher: Mutex::new(None),
            subscription_tasks: Mutex::new(HashMap::new()),
            self_ref: weak.clone(),
        })
    }

    /// Creates a router from settings; fails when no Redis URL is
    /// configured.
    pub fn from_settings(settings: MessagingSettings) -> Result<Arc<Self>, DiaflowError> {
        let url = settings.redis_url.clone().ok_or_else(|| {
            DiaflowError::invalid_config(
                "redis URL not configured; set DIAFLOW_MESSAGING__REDIS_URL",
            )
        })?;
        Ok(Self::new(url, settings))
    }

    async fn publisher(&self) -> Result<ConnectionManager, DiaflowError> {
        if let Some(conn) = self.publisher.lock().clone() {
            return Ok(conn);
        }

        let client = redis::Client::open(self.redis_url.as_str())
            .map_err(|e| DiaflowError::connection_error(e.to_string()))?;
        let manager = ConnectionManager::new(client)
            .await
            .map_err(|e| DiaflowError::connection_error(e.to_string()))?;
        *self.publisher.lock() = Some(manager.clone());
        Ok(manager)
    }

    /// Starts the Pub/Sub consumer for an execution if not already running.
    fn ensure_channel_subscription(&self, execution_id: &ExecutionId) {
        let mut tasks = self.subscription_tasks.lock();
        if tasks.contains_key(execution_id) {
            return;
        }
        let Some(router) = self.self_ref.upgrade() else {
            return;
        };

        let exec_id = execution_id.clone();
        let handle = tokio::spawn(async move {
            if let Err(e) = router.consume_channel(exec_id.clone()).await {
                error!(execution_id = %exec_id, error = %e, "redis subscription failed");
            }
        });
        tasks.insert(execution_id.clone(), handle);
        debug!(execution_id = %execution_id, "started redis subscription");
    }

    fn stop_channel_subscription(&self, execution_id: &ExecutionId) {
        if let Some(task) = self.subscription_tasks.lock().remove(execution_id) {
            task.abort();
            debug!(execution_id = %execution_id, "stopped redis subscription");
        }
    }

    async fn consume_channel(&self, execution_id: ExecutionId) -> Result<(), DiaflowError> {
        let channel = channel_for(&execution_id);
        let client = redis::Client::open(self.redis_url.as_str())
            .map_err(|e| DiaflowError::connection_error(e.to_string()))?;
        let mut pubsub = client
            .get_async_pubsub()
            .await
            .map_err(|e| DiaflowError::connection_error(e.to_string()))?;
        pubsub
            .subscribe(&channel)
            .await
            .map_err(|e| DiaflowError::connection_error(e.to_string()))?;
        debug!(channel = %channel, "subscribed to redis channel");

        let mut stream = pubsub.on_message();
        while let Some(message) = stream.next().await {
            let payload: String = match message.get_payload() {
                Ok(payload) => payload,
                Err(e) => {
                    error!(channel = %channel, error = %e, "failed to read redis message");
                    continue;
                }
            };
            let value: Value = match serde_json::from_str(&payload) {
                Ok(value) => value,
                Err(e) => {
                    error!(channel = %channel, error = %e, "failed to decode redis message");
                    continue;
                }
            };

            if self.local.has_subscribers(&execution_id) {
                self.local.enqueue_for_batch(&execution_id, value).await;
            }
        }
        Ok(())
    }
}

#[async_trait]
impl MessageRouterPort for RedisMessageRouter {
    async fn initialize(&self) -> Result<(), DiaflowError> {
        // Establish the publishing connection eagerly so configuration
        // problems surface at startup, not on the first broadcast.
        self.publisher().await?;
        self.local.initialize().await?;
        debug!("redis message router initialized");
        Ok(())
    }

    async fn cleanup(&self) -> Result<(), DiaflowError> {
        let tasks: Vec<JoinHandle<()>> = {
            let mut map = self.subscription_tasks.lock();
            map.drain().map(|(_, task)| task).collect()
        };
        for task in tasks {
            task.abort();
        }
        *self.publisher.lock() = None;
        self.local.cleanup().await
    }

    async fn register_connection(
        &self,
        connection_id: ConnectionId,
        handler: Arc<dyn ConnectionHandler>,
    ) -> Result<(), DiaflowError> {
        self.local.register_connection(connection_id, handler).await
    }

    async fn unregister_connection(
        &self,
        connection_id: &ConnectionId,
    ) -> Result<(), DiaflowError> {
        self.local.unregister_connection(connection_id).await
    }

    async fn subscribe_connection_to_execution(
        &self,
        connection_id: ConnectionId,
        execution_id: ExecutionId,
    ) -> Result<(), DiaflowError> {
        self.ensure_channel_subscription(&execution_id);
        self.local
            .subscribe_connection_to_execution(connection_id, execution_id)
            .await
    }

    async fn unsubscribe_connection_from_execution(
        &self,
        connection_id: &ConnectionId,
        execution_id: &ExecutionId,
    ) -> Result<(), DiaflowError> {
        self.local
            .unsubscribe_connection_from_execution(connection_id, execution_id)
            .await?;
        if !self.local.has_subscribers(execution_id) {
            self.stop_channel_subscription(execution_id);
        }
        Ok(())
    }

    async fn broadcast_to_execution(
        &self,
        execution_id: &ExecutionId,
        message: Value,
    ) -> Result<(), DiaflowError> {
        // The replay buffer stays per-process.
        if !execution_id.is_batch_item() {
            self.local.buffer_event(execution_id, &message);
        }

        let channel = channel_for(execution_id);
        let payload = serde_json::to_string(&message)?;
        let mut publisher = self.publisher().await?;
        match publisher.publish::<_, _, i64>(&channel, payload).await {
            Ok(receivers) => {
                debug!(channel = %channel, receivers, "published message to redis");
                Ok(())
            }
            Err(e) => {
                error!(channel = %channel, error = %e, "failed to publish to redis");
                Err(DiaflowError::connection_error(e.to_string()))
            }
        }
    }

    async fn route_to_connection(
        &self,
        connection_id: &ConnectionId,
        message: Value,
    ) -> Result<bool, DiaflowError> {
        self.local.route_to_connection(connection_id, message).await
    }

    fn get_stats(&self) -> Value {
        let mut stats = self.local.get_stats();
        stats["subscribed_channels"] =
            Value::from(self.subscription_tasks.lock().len());
        stats
    }
}

#[async_trait]
impl EventHandler for RedisMessageRouter {
    /// Routes a domain event through Redis: serialize once, publish the raw
    /// payload and (for lifecycle events) the UI envelope to the
    /// execution's channel.
    async fn handle(&self, event: Arc<DomainEvent>) -> Result<(), DiaflowError> {
        let payload = event_to_json_payload(&event);
        let execution_id = event.scope.execution_id.clone();

        if let Err(e) = self.broadcast_to_execution(&execution_id, payload).await {
            warn!(execution_id = %execution_id, error = %e, "redis broadcast failed");
        }
        if let Some(envelope) = ui_envelope(&event) {
            if let Err(e) = self.broadcast_to_execution(&execution_id, envelope).await {
                warn!(execution_id = %execution_id, error = %e, "redis envelope broadcast failed");
            }
        }
        Ok(())
    }
}
