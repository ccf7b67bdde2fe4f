// /////////////////////////////////////////////////////////////////////////////
// Diaflow Execution Core
// Copyright (c) 2025 Michael Gardner, A Bit of Help, Inc.
// SPDX-License-Identifier: BSD-3-Clause
// See LICENSE file in the project root.
// /////////////////////////////////////////////////////////////////////////////

//! # Execution Log Layer
//!
//! A `tracing_subscriber` layer that captures log records while an
//! execution id is set and re-emits them as EXECUTION_LOG domain events,
//! giving UI clients a live log stream without a separate transport.
//!
//! `on_event` is synchronous while publishing is async, so records flow
//! through an unbounded channel into a drain task that publishes to the
//! bus. Records from this crate's own modules are skipped to avoid the
//! feedback loop of the bus logging about the events the layer emits.

use diaflow_domain::events::contracts::ExecutionLogPayload;
use diaflow_domain::{DomainEvent, EventBus, ExecutionId, LogLevel, NodeId};
use parking_lot::{Mutex, RwLock};
use serde_json::{json, Map, Value};
use std::fmt::Debug;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tracing::field::{Field, Visit};
use tracing::{Event, Level, Subscriber};
use tracing_subscriber::layer::Context;
use tracing_subscriber::Layer;

struct Inner {
    execution_id: RwLock<Option<ExecutionId>>,
    enabled: AtomicBool,
    sender: mpsc::UnboundedSender<DomainEvent>,
    drain_task: Mutex<Option<JoinHandle<()>>>,
}

/// Layer emitting captured log records as EXECUTION_LOG events.
///
/// Construct inside a tokio runtime (the drain task is spawned eagerly),
/// attach to a subscriber stack, then scope captures with
/// [`ExecutionLogLayer::set_execution_id`] /
/// [`ExecutionLogLayer::clear_execution_id`].
#[derive(Clone)]
pub struct ExecutionLogLayer {
    inner: Arc<Inner>,
}

impl ExecutionLogLayer {
    /// Creates the layer and spawns its publishing drain task.
    pub fn new(bus: Arc<dyn EventBus>) -> Self {
        let (sender, mut receiver) = mpsc::unbounded_channel::<DomainEvent>();
        let drain_task = tokio::spawn(async move {
            while let Some(event) = receiver.recv().await {
                let _ = bus.publish(event).await;
            }
        });

        Self {
            inner: Arc::new(Inner {
                execution_id: RwLock::new(None),
                enabled: AtomicBool::new(true),
                sender,
                drain_task: Mutex::new(Some(drain_task)),
            }),
        }
    }

    /// Associates subsequent log records with an execution.
    pub fn set_execution_id(&self, execution_id: ExecutionId) {
        *self.inner.execution_id.write() = Some(execution_id);
    }

    /// Stops associating records with any execution.
    pub fn clear_execution_id(&self) {
        *self.inner.execution_id.write() = None;
    }

    /// Enables event emission.
    pub fn enable(&self) {
        self.inner.enabled.store(true, Ordering::Release);
    }

    /// Disables event emission (useful during teardown).
    pub fn disable(&self) {
        self.inner.enabled.store(false, Ordering::Release);
    }

    /// Stops the drain task. Emission is disabled first; records still
    /// queued but unpublished are dropped.
    pub async fn shutdown(&self) {
        self.disable();
        let task = self.inner.drain_task.lock().take();
        if let Some(task) = task {
            task.abort();
            let _ = task.await;
        }
    }

    fn level_for(level: &Level) -> LogLevel {
        match *level {
            Level::ERROR => LogLevel::Error,
            Level::WARN => LogLevel::Warning,
            Level::INFO => LogLevel::Info,
            _ => LogLevel::Debug,
        }
    }
}

/// Collects the `message` field and any structured fields of a record.
#[derive(Default)]
struct LogVisitor {
    message: String,
    extra_fields: Map<String, Value>,
}

impl Visit for LogVisitor {
    fn record_debug(&mut self, field: &Field, value: &dyn Debug) {
        if field.name() == "message" {
            self.message = format!("{value:?}");
        } else {
            self.extra_fields
                .insert(field.name().to_string(), json!(format!("{value:?}")));
        }
    }

    fn record_str(&mut self, field: &Field, value: &str) {
        if field.name() == "message" {
            self.message = value.to_string();
        } else {
            self.extra_fields
                .insert(field.name().to_string(), json!(value));
        }
    }

    fn record_i64(&mut self, field: &Field, value: i64) {
        self.extra_fields
            .insert(field.name().to_string(), json!(value));
    }

    fn record_u64(&mut self, field: &Field, value: u64) {
        self.extra_fields
            .insert(field.name().to_string(), json!(value));
    }

    fn record_bool(&mut self, field: &Field, value: bool) {
        self.extra_fields
            .insert(field.name().to_string(), json!(value));
    }

    fn record_f64(&mut self, field: &Field, value: f64) {
        self.extra_fields
            .insert(field.name().to_string(), json!(value));
    }
}

impl<S: Subscriber> Layer<S> for ExecutionLogLayer {
    fn on_event(&self, event: &Event<'_>, _ctx: Context<'_, S>) {
        if !self.inner.enabled.load(Ordering::Acquire) {
            return;
        }
        let Some(execution_id) = self.inner.execution_id.read().clone() else {
            return;
        };

        let target = event.metadata().target();
        // The event plane logs about its own activity; re-emitting those
        // records would loop forever.
        if target.starts_with("diaflow") {
            return;
        }

        let mut visitor = LogVisitor::default();
        event.record(&mut visitor);

        let node_id = visitor
            .extra_fields
            .get("node_id")
            .and_then(Value::as_str)
            .and_then(|s| NodeId::new(s).ok());

        let log_event = DomainEvent::execution_log(
            execution_id,
            ExecutionLogPayload {
                level: Self::level_for(event.metadata().level()),
                message: visitor.message,
                logger_name: target.to_string(),
                node_id,
                extra_fields: visitor.extra_fields,
            },
        );

        let _ = self.inner.sender.send(log_event);
    }
}
