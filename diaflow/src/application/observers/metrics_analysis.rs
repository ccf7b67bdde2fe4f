// /////////////////////////////////////////////////////////////////////////////
// Diaflow Execution Core
// Copyright (c) 2025 Michael Gardner, A Bit of Help, Inc.
// SPDX-License-Identifier: BSD-3-Clause
// See LICENSE file in the project root.
// /////////////////////////////////////////////////////////////////////////////

//! # Metrics Analysis
//!
//! Post-execution analysis over assembled [`ExecutionMetrics`]: bottleneck
//! identification, critical-path linearization, parallelization discovery,
//! and the metric/optimization events emitted back onto the bus.

use diaflow_domain::events::contracts::ExecutionLogPayload;
use diaflow_domain::{
    DomainEvent, EventBus, ExecutionId, ExecutionMetrics, LogLevel, NodeId,
};
use parking_lot::Mutex;
use serde_json::{json, Map, Value};
use std::collections::{HashMap, HashSet};
use std::sync::Arc;
use tracing::error;

/// Number of bottleneck nodes retained after ranking.
const TOP_BOTTLENECKS: usize = 5;

/// A node whose duration exceeded the analysis threshold.
#[derive(Debug, Clone)]
pub struct Bottleneck {
    pub node_id: NodeId,
    pub node_type: String,
    pub duration_ms: f64,
}

/// Analyzes execution metrics and emits optimization suggestions.
pub struct MetricsAnalyzer {
    event_bus: Option<Arc<dyn EventBus>>,
    analysis_threshold_ms: f64,
    node_dependencies: Mutex<HashMap<ExecutionId, HashMap<NodeId, HashSet<NodeId>>>>,
}

impl MetricsAnalyzer {
    pub fn new(event_bus: Option<Arc<dyn EventBus>>, analysis_threshold_ms: f64) -> Self {
        Self {
            event_bus,
            analysis_threshold_ms,
            node_dependencies: Mutex::new(HashMap::new()),
        }
    }

    /// Registers dependency information for one node of an execution.
    pub fn set_node_dependencies(
        &self,
        execution_id: &ExecutionId,
        node_id: NodeId,
        dependencies: HashSet<NodeId>,
    ) {
        self.node_dependencies
            .lock()
            .entry(execution_id.clone())
            .or_default()
            .insert(node_id, dependencies);
    }

    /// Drops dependency information for an execution.
    pub fn clear_node_dependencies(&self, execution_id: &ExecutionId) {
        self.node_dependencies.lock().remove(execution_id);
    }

    /// Analyzes a completed execution in place and emits the metric events.
    pub async fn analyze_execution(&self, metrics: &mut ExecutionMetrics) {
        let bottlenecks = self.identify_bottlenecks(metrics);
        metrics.bottlenecks = bottlenecks
            .iter()
            .take(TOP_BOTTLENECKS)
            .map(|b| b.node_id.clone())
            .collect();
        metrics.critical_path = Self::calculate_critical_path(metrics);
        metrics.parallelizable_groups = self.find_parallelizable_nodes(metrics);

        if self.event_bus.is_some() {
            self.emit_metrics_event(metrics, &bottlenecks).await;
            self.emit_optimization_suggestions(metrics).await;
        }
    }

    /// Nodes whose duration exceeds the analysis threshold, longest first.
    fn identify_bottlenecks(&self, metrics: &ExecutionMetrics) -> Vec<Bottleneck> {
        let mut bottlenecks: Vec<Bottleneck> = metrics
            .node_metrics
            .values()
            .filter_map(|node| {
                let duration = node.duration_ms?;
                (duration > self.analysis_threshold_ms).then(|| Bottleneck {
                    node_id: node.node_id.clone(),
                    node_type: node.node_type.clone(),
                    duration_ms: duration,
                })
            })
            .collect();
        bottlenecks.sort_by(|a, b| {
            b.duration_ms
                .partial_cmp(&a.duration_ms)
                .unwrap_or(std::cmp::Ordering::Equal)
        });
        bottlenecks
    }

    /// The critical path is the node ids in start-time order (ties break by
    /// node id for determinism). This is a linearization, not a
    /// longest-weighted-path through the dependency DAG; downstream
    /// consumers rely on the observed shape.
    fn calculate_critical_path(metrics: &ExecutionMetrics) -> Vec<NodeId> {
        let mut nodes: Vec<(&NodeId, f64)> = metrics
            .node_metrics
            .iter()
            .map(|(node_id, node)| (node_id, node.start_time))
            .collect();
        nodes.sort_by(|a, b| {
            a.1.partial_cmp(&b.1)
                .unwrap_or(std::cmp::Ordering::Equal)
                .then_with(|| a.0.cmp(b.0))
        });
        nodes.into_iter().map(|(node_id, _)| node_id.clone()).collect()
    }

    /// Greedily groups nodes that neither depend on nor are depended on by
    /// any current group member; only groups of two or more are reported.
    fn find_parallelizable_nodes(&self, metrics: &ExecutionMetrics) -> Vec<Vec<NodeId>> {
        let dependencies = self.node_dependencies.lock();
        let Some(dependencies) = dependencies.get(&metrics.execution_id) else {
            return Vec::new();
        };

        let empty = HashSet::new();
        let mut groups: Vec<Vec<NodeId>> = Vec::new();
        let mut potential_group: Vec<NodeId> = Vec::new();

        // Walk nodes in start-time order so grouping is deterministic.
        for node_id in Self::calculate_critical_path(metrics) {
            let node_deps = dependencies.get(&node_id).unwrap_or(&empty);

            let can_parallel = potential_group.iter().all(|other_id| {
                let other_deps = dependencies.get(other_id).unwrap_or(&empty);
                !node_deps.contains(other_id) && !other_deps.contains(&node_id)
            });

            if can_parallel {
                potential_group.push(node_id);
            } else {
                if potential_group.len() > 1 {
                    groups.push(std::mem::take(&mut potential_group));
                } else {
                    potential_group.clear();
                }
                potential_group.push(node_id);
            }
        }

        if potential_group.len() > 1 {
            groups.push(potential_group);
        }
        groups
    }

    /// For each group, running members concurrently saves
    /// (sum of durations - max of durations); total across groups.
    pub fn estimate_parallel_savings(metrics: &ExecutionMetrics) -> f64 {
        metrics
            .parallelizable_groups
            .iter()
            .map(|group| {
                let durations: Vec<f64> = group
                    .iter()
                    .filter_map(|node_id| metrics.node_metrics.get(node_id))
                    .filter_map(|node| node.duration_ms)
                    .collect();
                if durations.is_empty() {
                    return 0.0;
                }
                let sum: f64 = durations.iter().sum();
                let max = durations.iter().cloned().fold(0.0, f64::max);
                sum - max
            })
            .sum()
    }

    async fn emit_metrics_event(&self, metrics: &ExecutionMetrics, bottlenecks: &[Bottleneck]) {
        let Some(bus) = &self.event_bus else { return };

        let total_tokens = metrics.total_token_usage();
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

        let bottleneck_summaries: Vec<Value> = bottlenecks
            .iter()
            .take(TOP_BOTTLENECKS)
            .map(|b| {
                json!({
                    "node_id": b.node_id.as_str(),
                    "node_type": b.node_type,
                    "duration_ms": b.duration_ms,
                })
            })
            .collect();

        let mut extra_fields = Map::new();
        extra_fields.insert("execution_id".into(), json!(metrics.execution_id.as_str()));
        extra_fields.insert("total_duration_ms".into(), json!(metrics.total_duration_ms));
        extra_fields.insert("node_count".into(), json!(metrics.node_metrics.len()));
        extra_fields.insert("total_token_usage".into(), json!(total_tokens));
        extra_fields.insert("bottlenecks".into(), json!(bottleneck_summaries));
        extra_fields.insert(
            "critical_path_length".into(),
            json!(metrics.critical_path.len()),
        );
        extra_fields.insert(
            "parallelizable_groups".into(),
            json!(metrics.parallelizable_groups.len()),
        );
        extra_fields.insert("node_breakdown".into(), json!(node_breakdown));

        let event = DomainEvent::execution_log(
            metrics.execution_id.clone(),
            ExecutionLogPayload {
                level: LogLevel::Info,
                message: "Execution metrics collected".to_string(),
                logger_name: "metrics_observer".to_string(),
                node_id: None,
                extra_fields,
            },
        );

        if let Err(e) = bus.publish(event).await {
            error!(execution_id = %metrics.execution_id, error = %e, "failed to publish metrics event");
        }
    }

    async fn emit_optimization_suggestions(&self, metrics: &ExecutionMetrics) {
        let Some(bus) = &self.event_bus else { return };
        if metrics.parallelizable_groups.is_empty() {
            return;
        }

        let potential_savings = Self::estimate_parallel_savings(metrics);
        let affected_nodes: Vec<&str> = metrics
            .parallelizable_groups
            .iter()
            .flatten()
            .map(NodeId::as_str)
            .collect();

        let mut extra_fields = Map::new();
        extra_fields.insert("suggestion_type".into(), json!("parallelize_nodes"));
        extra_fields.insert("affected_nodes".into(), json!(affected_nodes));
        extra_fields.insert(
            "parallelizable_groups".into(),
            json!(metrics.parallelizable_groups),
        );

        let event = DomainEvent::execution_log(
            metrics.execution_id.clone(),
            ExecutionLogPayload {
                level: LogLevel::Info,
                message: format!(
                    "Found {} groups of nodes that could run in parallel. Could save up to {}ms",
                    metrics.parallelizable_groups.len(),
                    potential_savings
                ),
                logger_name: "metrics_observer".to_string(),
                node_id: None,
                extra_fields,
            },
        );

        if let Err(e) = bus.publish(event).await {
            error!(execution_id = %metrics.execution_id, error = %e, "failed to publish optimization event");
        }
    }
}
