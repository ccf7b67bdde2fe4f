// /////////////////////////////////////////////////////////////////////////////
// Diaflow Execution Core
// Copyright (c) 2025 Michael Gardner, A Bit of Help, Inc.
// SPDX-License-Identifier: BSD-3-Clause
// See LICENSE file in the project root.
// /////////////////////////////////////////////////////////////////////////////

//! # Event Ports
//!
//! Port interfaces for event handling, publication, and real-time
//! broadcast. The domain layer owns the contracts; infrastructure provides
//! the implementations (in-memory bus, in-process router, Redis router).
//!
//! ## Design Principles
//!
//! - **Async-First**: All delivery operations are asynchronous
//! - **Fire-and-Forget Publish**: Publishing never blocks on slow consumers
//! - **Error Absorption**: Handler failures are logged by the bus, never
//!   propagated to producers
//! - **Type Safety**: Strong typing with [`DomainEvent`] and the id value
//!   objects

use crate::error::DiaflowError;
use crate::events::contracts::DomainEvent;
use crate::events::filters::EventFilter;
use crate::events::types::{EventPriority, EventType};
use crate::value_objects::{ConnectionId, ExecutionId};
use async_trait::async_trait;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use uuid::Uuid;

/// Handler invoked by the bus for each matching event.
///
/// Events are shared (`Arc`) because one publish fans out to many
/// subscriptions. Returned errors are caught and logged by the bus; they
/// never terminate the processor task or affect other subscriptions.
#[async_trait]
pub trait EventHandler: Send + Sync {
    async fn handle(&self, event: Arc<DomainEvent>) -> Result<(), DiaflowError>;
}

/// Represents a registered subscription to domain events.
///
/// Returned by [`EventBus::subscribe`]; pass it back to
/// [`EventBus::unsubscribe`] to cancel. The `active` flag flips to false on
/// unsubscribe so in-flight queue items are skipped.
#[derive(Debug, Clone)]
pub struct EventSubscription {
    pub subscription_id: Uuid,
    pub event_types: Vec<EventType>,
    pub priority: EventPriority,
    active: Arc<AtomicBool>,
}

impl EventSubscription {
    /// Creates an active subscription handle.
    pub fn new(event_types: Vec<EventType>, priority: EventPriority) -> Self {
        Self {
            subscription_id: Uuid::new_v4(),
            event_types,
            priority,
            active: Arc::new(AtomicBool::new(true)),
        }
    }

    /// True while the subscription has not been cancelled.
    pub fn is_active(&self) -> bool {
        self.active.load(Ordering::Acquire)
    }

    /// Marks the subscription inactive. Idempotent.
    pub fn deactivate(&self) {
        self.active.store(false, Ordering::Release);
    }
}

/// Port interface for the in-process domain event bus.
///
/// Infrastructure implementations provide in-memory pub/sub for
/// single-process deployments; the broadcast routers implement the
/// connection-facing [`MessageRouterPort`] instead and subscribe to this
/// bus as handlers.
#[async_trait]
pub trait EventBus: Send + Sync {
    /// Publishes a domain event.
    ///
    /// Non-blocking from the producer's perspective: queued subscriptions
    /// receive via bounded queues (a full queue drops the newest event with
    /// a warning), while CRITICAL subscriptions are invoked inline.
    /// Priority never reorders delivery within a subscription; it only
    /// selects inline versus queued dispatch. Consumers that must observe
    /// terminal events synchronously subscribe at CRITICAL priority.
    async fn publish(&self, event: DomainEvent) -> Result<(), DiaflowError>;

    /// Publishes multiple events sequentially with all-or-nothing error
    /// semantics: the first failure is logged and returned, already
    /// published events stay published.
    async fn publish_batch(&self, events: Vec<DomainEvent>) -> Result<(), DiaflowError>;

    /// Subscribes a handler to a set of event types.
    ///
    /// Allocates a subscription id, indexes the subscription by each type,
    /// and (for non-CRITICAL priorities) provisions a bounded queue with a
    /// processor task. The optional filter is evaluated per event after the
    /// type match.
    async fn subscribe(
        &self,
        event_types: Vec<EventType>,
        handler: Arc<dyn EventHandler>,
        filter: Option<Arc<dyn EventFilter>>,
        priority: EventPriority,
    ) -> Result<EventSubscription, DiaflowError>;

    /// Unsubscribes: marks the subscription inactive, cancels its processor
    /// task (remaining queue items are drained with errors suppressed), and
    /// removes it from the indexes.
    async fn unsubscribe(&self, subscription: &EventSubscription) -> Result<(), DiaflowError>;

    /// Starts the bus. Idempotent.
    async fn initialize(&self) -> Result<(), DiaflowError>;

    /// Stops the bus and cleans up: cancels all processor tasks and waits
    /// for them to terminate. Idempotent.
    async fn cleanup(&self) -> Result<(), DiaflowError>;
}

/// Delivery callback backing a registered client connection.
///
/// The router invokes `send` for every message routed to the connection;
/// failures feed the connection's health record and three consecutive
/// failures evict the connection.
#[async_trait]
pub trait ConnectionHandler: Send + Sync {
    async fn send(&self, message: serde_json::Value) -> Result<(), DiaflowError>;
}

/// Port interface for the real-time broadcast router.
///
/// Routers deliver execution-scoped messages to client connections with
/// late-join replay, time/size-triggered batching, and health-based
/// eviction. The in-process and Redis-backed implementations share this
/// contract; they differ only in the broadcast path.
#[async_trait]
pub trait MessageRouterPort: Send + Sync {
    /// Initializes the router. Idempotent.
    async fn initialize(&self) -> Result<(), DiaflowError>;

    /// Shuts the router down: cancels pending flush tasks, flushes any
    /// remaining batches synchronously, and clears all registries.
    async fn cleanup(&self) -> Result<(), DiaflowError>;

    /// Registers a connection with its delivery handler and fresh health.
    async fn register_connection(
        &self,
        connection_id: ConnectionId,
        handler: Arc<dyn ConnectionHandler>,
    ) -> Result<(), DiaflowError>;

    /// Unregisters a connection and drops all subscriptions referencing it;
    /// execution entries that become empty are removed.
    async fn unregister_connection(&self, connection_id: &ConnectionId)
        -> Result<(), DiaflowError>;

    /// Subscribes a connection to an execution's updates and replays
    /// buffered events in order (heartbeat and connection-established
    /// messages excluded); replay stops on the first delivery failure.
    async fn subscribe_connection_to_execution(
        &self,
        connection_id: ConnectionId,
        execution_id: ExecutionId,
    ) -> Result<(), DiaflowError>;

    /// Unsubscribes a connection from an execution.
    async fn unsubscribe_connection_from_execution(
        &self,
        connection_id: &ConnectionId,
        execution_id: &ExecutionId,
    ) -> Result<(), DiaflowError>;

    /// Broadcasts a serialized message to every connection subscribed to
    /// the execution; the message is also appended to the replay buffer
    /// (unless buffering is disabled for the execution) so late joiners
    /// catch up.
    async fn broadcast_to_execution(
        &self,
        execution_id: &ExecutionId,
        message: serde_json::Value,
    ) -> Result<(), DiaflowError>;

    /// Delivers one message directly to one connection, with backpressure
    /// check, latency measurement, and health update. Returns whether the
    /// delivery succeeded; three consecutive failures evict the connection.
    async fn route_to_connection(
        &self,
        connection_id: &ConnectionId,
        message: serde_json::Value,
    ) -> Result<bool, DiaflowError>;

    /// Returns a statistics snapshot (connections, subscriptions, buffer
    /// sizes, per-connection health).
    fn get_stats(&self) -> serde_json::Value;
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_subscription_activation_flag() {
        let sub = EventSubscription::new(vec![EventType::NodeStarted], EventPriority::Normal);
        assert!(sub.is_active());
        sub.deactivate();
        assert!(!sub.is_active());
        // Clones share the flag.
        let clone = sub.clone();
        assert!(!clone.is_active());
    }
}
