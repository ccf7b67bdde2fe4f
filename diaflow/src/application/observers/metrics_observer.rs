// /////////////////////////////////////////////////////////////////////////////
// Diaflow Execution Core
// Copyright (c) 2025 Michael Gardner, A Bit of Help, Inc.
// SPDX-License-Identifier: BSD-3-Clause
// See LICENSE file in the project root.
// /////////////////////////////////////////////////////////////////////////////

//! # Metrics Observer
//!
//! Event consumer that assembles per-execution metrics from the lifecycle
//! stream, runs the analysis pass on completion, and persists the result
//! through the execution-state repository.
//!
//! ## Event handling
//!
//! - `EXECUTION_STARTED` creates the metrics record
//! - `NODE_STARTED` creates the node entry and registers declared
//!   dependencies with the analyzer
//! - `NODE_COMPLETED` / `NODE_ERROR` stamp end times, durations, token
//!   usage, and errors
//! - `EXECUTION_COMPLETED` finalizes: analysis runs, timing-collector data
//!   is merged (phases not attached to a real node land on a synthetic
//!   `system` node), metrics persist, and the record moves from the active
//!   map to a bounded completed history (FIFO eviction)
//!
//! A cleanup task evicts active records for executions that never complete
//! (crashed engines, lost terminal events) so the active map cannot grow
//! without bound.
//!
//! Observability must never fail an execution: every handler error is
//! absorbed and logged.

use crate::application::observers::metrics_analysis::MetricsAnalyzer;
use crate::infrastructure::config::MetricsSettings;
use crate::infrastructure::timing::collector::{timing_collector, TimingCollector};
use async_trait::async_trait;
use chrono::Utc;
use diaflow_domain::events::contracts::EventPayload;
use diaflow_domain::events::ports::{EventHandler, EventBus};
use diaflow_domain::{
    DiaflowError, DomainEvent, ExecutionId, ExecutionMetrics, ExecutionStateRepository,
    NodeId, NodeMetrics,
};
use parking_lot::Mutex;
use serde_json::{json, Value};
use std::collections::{HashSet, VecDeque};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Weak};
use tokio::task::JoinHandle;
use tracing::{debug, error, info, warn};

#[derive(Default)]
struct ObserverState {
    active: std::collections::HashMap<ExecutionId, ExecutionMetrics>,
    completed: VecDeque<ExecutionMetrics>,
}

/// Collects execution metrics for analysis and optimization suggestions.
pub struct MetricsObserver {
    settings: MetricsSettings,
    state: Mutex<ObserverState>,
    analyzer: MetricsAnalyzer,
    state_store: Option<Arc<dyn ExecutionStateRepository>>,
    collector: Option<Arc<TimingCollector>>,
    running: AtomicBool,
    cleanup_task: Mutex<Option<JoinHandle<()>>>,
    self_ref: Weak<MetricsObserver>,
}

impl MetricsObserver {
    /// Creates an observer.
    ///
    /// `event_bus` (optional) receives the metric and optimization events
    /// emitted on completion; `state_store` (optional) receives the
    /// persisted metrics; `collector` defaults to the process-wide timing
    /// collector when `None`.
    pub fn new(
        settings: MetricsSettings,
        event_bus: Option<Arc<dyn EventBus>>,
        state_store: Option<Arc<dyn ExecutionStateRepository>>,
        collector: Option<Arc<TimingCollector>>,
    ) -> Arc<Self> {
        let analyzer = MetricsAnalyzer::new(event_bus, settings.analysis_threshold_ms);
        Arc::new_cyclic(|weak| Self {
            settings,
            state: Mutex::new(ObserverState::default()),
            analyzer,
            state_store,
            collector,
            running: AtomicBool::new(false),
            cleanup_task: Mutex::new(None),
            self_ref: weak.clone(),
        })
    }

    fn collector(&self) -> &TimingCollector {
        match &self.collector {
            Some(collector) => collector,
            None => timing_collector(),
        }
    }

    /// Starts the stale-metrics cleanup loop. Idempotent.
    pub async fn start(&self) {
        if self.running.swap(true, Ordering::AcqRel) {
            return;
        }

        // The cleanup task holds only a weak reference; it exits on its
        // own when the observer is dropped.
        let observer = self.self_ref.clone();
        let interval = std::time::Duration::from_secs(self.settings.cleanup_interval_s);
        let handle = tokio::spawn(async move {
            let mut ticker = tokio::time::interval(interval);
            ticker.tick().await;
            loop {
                ticker.tick().await;
                let Some(observer) = observer.upgrade() else { break };
                observer.evict_stale_metrics();
            }
        });
        *self.cleanup_task.lock() = Some(handle);
        debug!("metrics observer started");
    }

    /// Stops the cleanup loop. Idempotent.
    pub async fn stop(&self) {
        self.running.store(false, Ordering::Release);
        if let Some(task) = self.cleanup_task.lock().take() {
            task.abort();
        }
        info!("metrics observer stopped");
    }

    fn evict_stale_metrics(&self) {
        let now = Utc::now().timestamp_millis() as f64 / 1000.0;
        let ttl = self.settings.stale_execution_ttl_s as f64;

        let stale: Vec<ExecutionId> = {
            let state = self.state.lock();
            state
                .active
                .iter()
                .filter(|(_, metrics)| now - metrics.start_time > ttl)
                .map(|(exec_id, _)| exec_id.clone())
                .collect()
        };

        for exec_id in stale {
            warn!(execution_id = %exec_id, "cleaning up stale metrics");
            self.state.lock().active.remove(&exec_id);
            self.analyzer.clear_node_dependencies(&exec_id);
        }
    }

    /// Metrics for one execution, from the active or completed map.
    pub fn get_execution_metrics(&self, execution_id: &ExecutionId) -> Option<ExecutionMetrics> {
        let state = self.state.lock();
        state.active.get(execution_id).cloned().or_else(|| {
            state
                .completed
                .iter()
                .find(|m| &m.execution_id == execution_id)
                .cloned()
        })
    }

    /// All active (not yet finalized) metrics.
    pub fn get_all_metrics(&self) -> Vec<ExecutionMetrics> {
        self.state.lock().active.values().cloned().collect()
    }

    /// Summary view of one execution's metrics.
    pub fn get_metrics_summary(&self, execution_id: &ExecutionId) -> Option<Value> {
        let metrics = self.get_execution_metrics(execution_id)?;

        let bottlenecks: Vec<Value> = metrics
            .bottlenecks
            .iter()
            .filter_map(|node_id| metrics.node_metrics.get(node_id))
            .map(|node| {
                json!({
                    "node_id": node.node_id.as_str(),
                    "node_type": node.node_type,
                    "duration_ms": node.duration_ms,
                })
            })
            .collect();

        let node_breakdown: Vec<Value> = metrics
            .node_metrics
            .values()
            .map(|node| {
                json!({
                    "node_id": node.node_id.as_str(),
                    "node_type": node.node_type,
                    "duration_ms": node.duration_ms,
                    "token_usage": node.token_usage,
                    "error": node.error,
                    "phase_timings": node.phase_timings,
                })
            })
            .collect();

        Some(json!({
            "execution_id": metrics.execution_id.as_str(),
            "total_duration_ms": metrics.total_duration_ms,
            "node_count": metrics.node_metrics.len(),
            "total_token_usage": metrics.total_token_usage(),
            "bottlenecks": bottlenecks,
            "critical_path_length": metrics.critical_path.len(),
            "parallelizable_groups": metrics.parallelizable_groups.len(),
            "node_breakdown": node_breakdown,
        }))
    }

    fn event_seconds(event: &DomainEvent) -> f64 {
        event.occurred_at.timestamp_millis() as f64 / 1000.0
    }

    fn handle_execution_started(&self, event: &DomainEvent) {
        let execution_id = event.scope.execution_id.clone();
        let metrics = ExecutionMetrics::started(execution_id.clone(), Self::event_seconds(event));
        self.state.lock().active.insert(execution_id, metrics);
    }

    fn handle_node_started(&self, event: &DomainEvent) {
        let EventPayload::NodeStarted(payload) = &event.payload else {
            return;
        };
        let Some(node_id) = event.scope.node_id.clone() else {
            return;
        };
        let execution_id = &event.scope.execution_id;

        let dependencies = payload
            .inputs
            .as_ref()
            .and_then(|inputs| inputs.get("dependencies"))
            .and_then(Value::as_array)
            .map(|deps| {
                deps.iter()
                    .filter_map(Value::as_str)
                    .filter_map(|s| NodeId::new(s).ok())
                    .collect::<HashSet<NodeId>>()
            })
            .unwrap_or_default();

        {
            let mut state = self.state.lock();
            let Some(metrics) = state.active.get_mut(execution_id) else {
                return;
            };
            let mut node_metrics = NodeMetrics::started(
                node_id.clone(),
                payload.node_type.clone().unwrap_or_else(|| "unknown".to_string()),
                Self::event_seconds(event),
            );
            node_metrics.iteration = payload.iteration;
            node_metrics.dependencies = dependencies.clone();
            metrics.node_metrics.insert(node_id.clone(), node_metrics);
        }

        if !dependencies.is_empty() {
            self.analyzer
                .set_node_dependencies(execution_id, node_id, dependencies);
        }
    }

    fn handle_node_completed(&self, event: &DomainEvent) {
        let EventPayload::NodeCompleted(payload) = &event.payload else {
            return;
        };
        let Some(node_id) = &event.scope.node_id else {
            return;
        };

        let mut state = self.state.lock();
        let Some(metrics) = state.active.get_mut(&event.scope.execution_id) else {
            return;
        };
        let Some(node_metrics) = metrics.node_metrics.get_mut(node_id) else {
            return;
        };

        if let Some(duration_ms) = payload.duration_ms {
            node_metrics.duration_ms = Some(duration_ms as f64);
        }
        node_metrics.finish(Self::event_seconds(event));

        if let Some(token_usage) = payload.token_usage {
            node_metrics.token_usage = Some(token_usage);
            debug!(
                node_id = %node_id,
                input = token_usage.input,
                output = token_usage.output,
                "recorded token usage"
            );
        }
    }

    fn handle_node_error(&self, event: &DomainEvent) {
        let EventPayload::NodeError(payload) = &event.payload else {
            return;
        };
        let Some(node_id) = &event.scope.node_id else {
            return;
        };

        let mut state = self.state.lock();
        let Some(metrics) = state.active.get_mut(&event.scope.execution_id) else {
            return;
        };
        let Some(node_metrics) = metrics.node_metrics.get_mut(node_id) else {
            return;
        };

        node_metrics.finish(Self::event_seconds(event));
        node_metrics.error = Some(payload.error_message.clone());
    }

    async fn handle_execution_completed(&self, event: &DomainEvent) {
        let execution_id = event.scope.execution_id.clone();

        let mut metrics = {
            let mut state = self.state.lock();
            match state.active.remove(&execution_id) {
                Some(metrics) => metrics,
                None => {
                    warn!(execution_id = %execution_id, "no metrics in buffer for completed execution");
                    return;
                }
            }
        };

        metrics.finish(Self::event_seconds(event));
        self.analyzer.analyze_execution(&mut metrics).await;
        self.merge_timing_data(&mut metrics);
        self.persist_metrics(&execution_id, &metrics).await;

        {
            let mut state = self.state.lock();
            state.completed.push_back(metrics);
            while state.completed.len() > self.settings.max_completed_metrics {
                state.completed.pop_front();
            }
        }

        self.analyzer.clear_node_dependencies(&execution_id);
    }

    /// Merges popped timing-collector data into node metrics. Phases not
    /// attached to a known node (scheduler, persistence, ...) are grouped
    /// under a synthetic `system` node entry.
    fn merge_timing_data(&self, metrics: &mut ExecutionMetrics) {
        let timing_data = self.collector().pop(metrics.execution_id.as_str());

        for (node_key, phase_timings) in timing_data {
            let timings = phase_timings.timing_entries();
            let Ok(node_id) = NodeId::new(node_key.as_str()) else {
                continue;
            };

            match metrics.node_metrics.get_mut(&node_id) {
                Some(node_metrics) => {
                    node_metrics.phase_timings = timings;
                }
                None => {
                    let mut node_metrics = NodeMetrics::started(
                        node_id.clone(),
                        "system",
                        metrics.start_time,
                    );
                    node_metrics.end_time = metrics.end_time;
                    node_metrics.duration_ms = Some(phase_timings.total_ms() as f64);
                    node_metrics.phase_timings = timings;
                    metrics.node_metrics.insert(node_id, node_metrics);
                }
            }
        }
    }

    async fn persist_metrics(&self, execution_id: &ExecutionId, metrics: &ExecutionMetrics) {
        let Some(store) = &self.state_store else {
            return;
        };

        let result: Result<(), DiaflowError> = async {
            match store.get_execution(execution_id).await? {
                Some(state) => {
                    let updated = state.with_metrics(metrics.clone());
                    store.save_execution(updated).await?;

                    if store.immediate_persistence_capable() {
                        store.persist_now(execution_id, false).await?;
                        info!(
                            execution_id = %execution_id,
                            "persisted metrics for execution (immediate)"
                        );
                    } else {
                        warn!(
                            execution_id = %execution_id,
                            "state store does not support immediate persistence, metrics may not persist"
                        );
                    }
                }
                None => {
                    warn!(
                        execution_id = %execution_id,
                        "execution state not found, cannot persist metrics"
                    );
                }
            }
            Ok(())
        }
        .await;

        if let Err(e) = result {
            error!(
                execution_id = %execution_id,
                error = %e,
                "failed to persist metrics for execution"
            );
        }
    }
}

#[async_trait]
impl EventHandler for MetricsObserver {
    async fn handle(&self, event: Arc<DomainEvent>) -> Result<(), DiaflowError> {
        match &event.payload {
            EventPayload::ExecutionStarted(_) => self.handle_execution_started(&event),
            EventPayload::NodeStarted(_) => self.handle_node_started(&event),
            EventPayload::NodeCompleted(_) => self.handle_node_completed(&event),
            EventPayload::NodeError(_) => self.handle_node_error(&event),
            EventPayload::ExecutionCompleted(_) => self.handle_execution_completed(&event).await,
            _ => {}
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use diaflow_domain::events::contracts::{
        ExecutionCompletedPayload, ExecutionStartedPayload, NodeCompletedPayload,
        NodeErrorPayload, NodeStartedPayload, TokenUsage,
    };
    use serde_json::Map;

    fn exec_id(id: &str) -> ExecutionId {
        ExecutionId::new(id).unwrap()
    }

    fn node_id(id: &str) -> NodeId {
        NodeId::new(id).unwrap()
    }

    fn observer() -> Arc<MetricsObserver> {
        MetricsObserver::new(
            MetricsSettings::default(),
            None,
            None,
            Some(Arc::new(TimingCollector::new())),
        )
    }

    async fn feed(observer: &Arc<MetricsObserver>, event: DomainEvent) {
        observer.handle(Arc::new(event)).await.unwrap();
    }

    #[tokio::test]
    async fn test_node_lifecycle_assembles_metrics() {
        let observer = observer();
        let exec = exec_id("E1");

        feed(
            &observer,
            DomainEvent::execution_started(exec.clone(), ExecutionStartedPayload::default()),
        )
        .await;
        feed(
            &observer,
            DomainEvent::node_started(
                exec.clone(),
                node_id("N1"),
                NodeStartedPayload {
                    node_type: Some("job".to_string()),
                    ..Default::default()
                },
            ),
        )
        .await;
        feed(
            &observer,
            DomainEvent::node_completed(
                exec.clone(),
                node_id("N1"),
                NodeCompletedPayload {
                    duration_ms: Some(42),
                    token_usage: Some(TokenUsage::new(10, 5)),
                    ..Default::default()
                },
            ),
        )
        .await;

        let metrics = observer.get_execution_metrics(&exec).unwrap();
        let node = &metrics.node_metrics[&node_id("N1")];
        assert_eq!(node.node_type, "job");
        assert_eq!(node.duration_ms, Some(42.0));
        assert_eq!(node.token_usage, Some(TokenUsage::new(10, 5)));
    }

    #[tokio::test]
    async fn test_node_error_records_message() {
        let observer = observer();
        let exec = exec_id("E1");

        feed(
            &observer,
            DomainEvent::execution_started(exec.clone(), ExecutionStartedPayload::default()),
        )
        .await;
        feed(
            &observer,
            DomainEvent::node_started(exec.clone(), node_id("N1"), NodeStartedPayload::default()),
        )
        .await;
        feed(
            &observer,
            DomainEvent::node_error(
                exec.clone(),
                node_id("N1"),
                NodeErrorPayload {
                    error_message: "boom".to_string(),
                    ..Default::default()
                },
            ),
        )
        .await;

        let metrics = observer.get_execution_metrics(&exec).unwrap();
        assert_eq!(
            metrics.node_metrics[&node_id("N1")].error.as_deref(),
            Some("boom")
        );
    }

    #[tokio::test]
    async fn test_completion_moves_to_completed_map() {
        let observer = observer();
        let exec = exec_id("E1");

        feed(
            &observer,
            DomainEvent::execution_started(exec.clone(), ExecutionStartedPayload::default()),
        )
        .await;
        feed(
            &observer,
            DomainEvent::execution_completed(exec.clone(), ExecutionCompletedPayload::default()),
        )
        .await;

        assert!(observer.get_all_metrics().is_empty());
        let metrics = observer.get_execution_metrics(&exec).unwrap();
        assert!(metrics.total_duration_ms.is_some());
    }

    #[tokio::test]
    async fn test_completed_map_evicts_fifo() {
        let observer = MetricsObserver::new(
            MetricsSettings {
                max_completed_metrics: 2,
                ..Default::default()
            },
            None,
            None,
            Some(Arc::new(TimingCollector::new())),
        );

        for i in 0..4 {
            let exec = exec_id(&format!("E{i}"));
            feed(
                &observer,
                DomainEvent::execution_started(exec.clone(), ExecutionStartedPayload::default()),
            )
            .await;
            feed(
                &observer,
                DomainEvent::execution_completed(
                    exec.clone(),
                    ExecutionCompletedPayload::default(),
                ),
            )
            .await;
        }

        assert!(observer.get_execution_metrics(&exec_id("E0")).is_none());
        assert!(observer.get_execution_metrics(&exec_id("E1")).is_none());
        assert!(observer.get_execution_metrics(&exec_id("E2")).is_some());
        assert!(observer.get_execution_metrics(&exec_id("E3")).is_some());
    }

    #[tokio::test]
    async fn test_timing_data_merged_with_system_node() {
        let collector = Arc::new(TimingCollector::new());
        let observer = MetricsObserver::new(
            MetricsSettings::default(),
            None,
            None,
            Some(collector.clone()),
        );
        let exec = exec_id("E1");

        feed(
            &observer,
            DomainEvent::execution_started(exec.clone(), ExecutionStartedPayload::default()),
        )
        .await;
        feed(
            &observer,
            DomainEvent::node_started(exec.clone(), node_id("N1"), NodeStartedPayload::default()),
        )
        .await;

        collector.record("E1", "N1", "llm_completion", 120.0, None);
        collector.record("E1", "system", "scheduler", 30.0, None);

        feed(
            &observer,
            DomainEvent::execution_completed(exec.clone(), ExecutionCompletedPayload::default()),
        )
        .await;

        let metrics = observer.get_execution_metrics(&exec).unwrap();
        assert_eq!(
            metrics.node_metrics[&node_id("N1")].phase_timings["llm_completion"],
            120
        );
        let system = &metrics.node_metrics[&node_id("system")];
        assert_eq!(system.node_type, "system");
        assert_eq!(system.phase_timings["scheduler"], 30);
        assert_eq!(system.duration_ms, Some(30.0));

        // Collector data was popped.
        assert!(collector.get("E1").is_empty());
    }

    #[tokio::test]
    async fn test_dependencies_feed_analyzer() {
        let observer = observer();
        let exec = exec_id("E1");

        feed(
            &observer,
            DomainEvent::execution_started(exec.clone(), ExecutionStartedPayload::default()),
        )
        .await;

        let mut inputs = Map::new();
        inputs.insert("dependencies".into(), json!(["N1"]));
        feed(
            &observer,
            DomainEvent::node_started(
                exec.clone(),
                node_id("N2"),
                NodeStartedPayload {
                    inputs: Some(inputs),
                    ..Default::default()
                },
            ),
        )
        .await;

        let metrics = observer.get_execution_metrics(&exec).unwrap();
        assert!(metrics.node_metrics[&node_id("N2")]
            .dependencies
            .contains(&node_id("N1")));
    }
}
