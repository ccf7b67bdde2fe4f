// /////////////////////////////////////////////////////////////////////////////
// Diaflow Execution Core
// Copyright (c) 2025 Michael Gardner, A Bit of Help, Inc.
// SPDX-License-Identifier: BSD-3-Clause
// See LICENSE file in the project root.
// /////////////////////////////////////////////////////////////////////////////

//! # In-Memory Event Bus
//!
//! In-process implementation of the [`EventBus`] port for single-process
//! deployments.
//!
//! ## Overview
//!
//! - **Zero network overhead**: events are `Arc`-shared between
//!   subscriptions
//! - **Priority-based dispatch**: CRITICAL subscriptions have no queue and
//!   are invoked inline; everything else flows through a bounded
//!   per-subscription queue with its own processor task
//! - **Backpressure without blocking**: a full queue drops the newest event
//!   with a warning; producers never wait on slow consumers
//! - **Failure isolation**: handler errors are logged and never terminate
//!   the processor task or affect other subscriptions
//!
//! ## Ordering
//!
//! Within one subscription, events are delivered FIFO in publish order;
//! priority never reorders them, it only decides whether a subscription's
//! dispatch is inline or queued. Across subscriptions there is no ordering
//! guarantee. Terminal execution events carry CRITICAL priority, and the
//! consumers that must see them synchronously even under queue saturation
//! (the result observer) subscribe at CRITICAL priority.

use async_trait::async_trait;
use diaflow_domain::events::filters::EventFilter;
use diaflow_domain::events::ports::{EventBus, EventHandler, EventSubscription};
use diaflow_domain::{DiaflowError, DomainEvent, EventPriority, EventType};
use parking_lot::RwLock;
use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tracing::{debug, error, warn};
use uuid::Uuid;

/// Default bound for per-subscription queues.
pub const DEFAULT_MAX_QUEUE_SIZE: usize = 1000;

struct SubscriptionEntry {
    subscription: EventSubscription,
    handler: Arc<dyn EventHandler>,
    filter: Option<Arc<dyn EventFilter>>,
    /// Absent for CRITICAL subscriptions, which have no queue.
    sender: Option<mpsc::Sender<Arc<DomainEvent>>>,
    task: Option<JoinHandle<()>>,
}

#[derive(Default)]
struct BusState {
    subscriptions: HashMap<Uuid, SubscriptionEntry>,
    by_type: HashMap<EventType, Vec<Uuid>>,
}

/// In-memory event bus with bounded queues and priority dispatch.
pub struct InMemoryEventBus {
    max_queue_size: usize,
    running: AtomicBool,
    state: RwLock<BusState>,
}

impl InMemoryEventBus {
    /// Creates a bus with the given per-subscription queue bound.
    pub fn new(max_queue_size: usize) -> Self {
        Self {
            max_queue_size,
            running: AtomicBool::new(false),
            state: RwLock::new(BusState::default()),
        }
    }

    fn spawn_processor(
        subscription: &EventSubscription,
        handler: Arc<dyn EventHandler>,
        mut receiver: mpsc::Receiver<Arc<DomainEvent>>,
    ) -> JoinHandle<()> {
        let subscription = subscription.clone();
        tokio::spawn(async move {
            while let Some(event) = receiver.recv().await {
                // After unsubscribe the remaining queue items are drained
                // without invoking the handler.
                if !subscription.is_active() {
                    continue;
                }
                if let Err(e) = handler.handle(event.clone()).await {
                    error!(
                        subscription_id = %subscription.subscription_id,
                        event_type = %event.event_type(),
                        error = %e,
                        "error processing event"
                    );
                }
            }
            debug!(
                subscription_id = %subscription.subscription_id,
                "queue processor exited"
            );
        })
    }

    /// Snapshot of dispatch targets for one event, ordered by subscription
    /// priority (highest first). Collected under the lock, dispatched
    /// outside it.
    fn matching_targets(&self, event: &DomainEvent) -> Vec<DispatchTarget> {
        let state = self.state.read();
        let Some(ids) = state.by_type.get(&event.event_type()) else {
            return Vec::new();
        };

        let mut targets: Vec<DispatchTarget> = ids
            .iter()
            .filter_map(|id| state.subscriptions.get(id))
            .filter(|entry| entry.subscription.is_active())
            .filter(|entry| {
                entry
                    .filter
                    .as_ref()
                    .map(|f| f.matches(event))
                    .unwrap_or(true)
            })
            .map(|entry| DispatchTarget {
                subscription_id: entry.subscription.subscription_id,
                priority: entry.subscription.priority,
                handler: entry.handler.clone(),
                sender: entry.sender.clone(),
            })
            .collect();
        targets.sort_by(|a, b| b.priority.cmp(&a.priority));
        targets
    }
}

struct DispatchTarget {
    subscription_id: Uuid,
    priority: EventPriority,
    handler: Arc<dyn EventHandler>,
    sender: Option<mpsc::Sender<Arc<DomainEvent>>>,
}

impl Default for InMemoryEventBus {
    fn default() -> Self {
        Self::new(DEFAULT_MAX_QUEUE_SIZE)
    }
}

#[async_trait]
impl EventBus for InMemoryEventBus {
    async fn publish(&self, event: DomainEvent) -> Result<(), DiaflowError> {
        if !self.running.load(Ordering::Acquire) {
            warn!(event_type = %event.event_type(), "event bus not running, event dropped");
            return Ok(());
        }

        let event = Arc::new(event);

        for target in self.matching_targets(&event) {
            let inline = target.priority == EventPriority::Critical || target.sender.is_none();
            if inline {
                if let Err(e) = target.handler.handle(event.clone()).await {
                    error!(
                        subscription_id = %target.subscription_id,
                        event_type = %event.event_type(),
                        error = %e,
                        "error handling event inline"
                    );
                }
                continue;
            }

            // Queued path: never blocks the publisher. A full queue drops
            // the newest event.
            let sender = target.sender.as_ref().unwrap();
            match sender.try_send(event.clone()) {
                Ok(()) => {}
                Err(mpsc::error::TrySendError::Full(_)) => {
                    warn!(
                        subscription_id = %target.subscription_id,
                        event_type = %event.event_type(),
                        "queue full for subscription, dropping event"
                    );
                }
                Err(mpsc::error::TrySendError::Closed(_)) => {
                    debug!(
                        subscription_id = %target.subscription_id,
                        "queue closed for subscription, dropping event"
                    );
                }
            }
        }

        Ok(())
    }

    async fn publish_batch(&self, events: Vec<DomainEvent>) -> Result<(), DiaflowError> {
        for event in events {
            if let Err(e) = self.publish(event).await {
                error!(error = %e, "batch publish failed");
                return Err(e);
            }
        }
        Ok(())
    }

    async fn subscribe(
        &self,
        event_types: Vec<EventType>,
        handler: Arc<dyn EventHandler>,
        filter: Option<Arc<dyn EventFilter>>,
        priority: EventPriority,
    ) -> Result<EventSubscription, DiaflowError> {
        let subscription = EventSubscription::new(event_types.clone(), priority);

        // CRITICAL subscriptions have no queue; they are invoked inline.
        let (sender, task) = if priority == EventPriority::Critical {
            (None, None)
        } else {
            // Channel capacity must be non-zero.
            let (tx, rx) = mpsc::channel(self.max_queue_size.max(1));
            let task = Self::spawn_processor(&subscription, handler.clone(), rx);
            (Some(tx), Some(task))
        };

        let entry = SubscriptionEntry {
            subscription: subscription.clone(),
            handler,
            filter,
            sender,
            task,
        };

        let mut state = self.state.write();
        for event_type in &event_types {
            state
                .by_type
                .entry(*event_type)
                .or_default()
                .push(subscription.subscription_id);
        }
        state
            .subscriptions
            .insert(subscription.subscription_id, entry);

        debug!(
            subscription_id = %subscription.subscription_id,
            ?event_types,
            ?priority,
            "subscribed"
        );
        Ok(subscription)
    }

    async fn unsubscribe(&self, subscription: &EventSubscription) -> Result<(), DiaflowError> {
        subscription.deactivate();

        let entry = {
            let mut state = self.state.write();
            for event_type in &subscription.event_types {
                if let Some(ids) = state.by_type.get_mut(event_type) {
                    ids.retain(|id| *id != subscription.subscription_id);
                    if ids.is_empty() {
                        state.by_type.remove(event_type);
                    }
                }
            }
            state.subscriptions.remove(&subscription.subscription_id)
        };

        if let Some(mut entry) = entry {
            // Dropping the sender closes the queue; the processor drains
            // what is left (skipped, since the subscription is inactive)
            // and exits.
            entry.sender.take();
            if let Some(task) = entry.task.take() {
                let _ = task.await;
            }
            debug!(subscription_id = %subscription.subscription_id, "unsubscribed");
        }
        Ok(())
    }

    async fn initialize(&self) -> Result<(), DiaflowError> {
        self.running.store(true, Ordering::Release);
        debug!("in-memory event bus started");
        Ok(())
    }

    async fn cleanup(&self) -> Result<(), DiaflowError> {
        self.running.store(false, Ordering::Release);

        let entries: Vec<SubscriptionEntry> = {
            let mut state = self.state.write();
            state.by_type.clear();
            state.subscriptions.drain().map(|(_, e)| e).collect()
        };

        let mut tasks = Vec::new();
        for mut entry in entries {
            entry.subscription.deactivate();
            entry.sender.take();
            if let Some(task) = entry.task.take() {
                tasks.push(task);
            }
        }
        for task in tasks {
            let _ = task.await;
        }

        debug!("in-memory event bus stopped");
        Ok(())
    }
}
