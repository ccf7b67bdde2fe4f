// /////////////////////////////////////////////////////////////////////////////
// Diaflow Execution Core
// Copyright (c) 2025 Michael Gardner, A Bit of Help, Inc.
// SPDX-License-Identifier: BSD-3-Clause
// See LICENSE file in the project root.
// /////////////////////////////////////////////////////////////////////////////

//! # Execution Metrics
//!
//! Aggregated per-execution and per-node timing records assembled by the
//! metrics observer from the event stream and finalized when the execution
//! completes.
//!
//! Timestamps are wall-clock seconds (fractional), durations are
//! milliseconds. Phase timings use hierarchical names with a `__` separator
//! (`memory_selection__api_call`); the names are preserved verbatim on the
//! wire so presentation layers can rebuild the tree.

use crate::events::contracts::TokenUsage;
use crate::value_objects::{ExecutionId, NodeId};
use serde::{Deserialize, Serialize};
use std::collections::{HashMap, HashSet};

/// Metrics for a single node execution.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct NodeMetrics {
    pub node_id: NodeId,
    pub node_type: String,

    /// Wall-clock start, seconds since the Unix epoch.
    pub start_time: f64,
    #[serde(skip_serializing_if = "Option::is_none", default)]
    pub end_time: Option<f64>,
    #[serde(skip_serializing_if = "Option::is_none", default)]
    pub duration_ms: Option<f64>,

    #[serde(skip_serializing_if = "Option::is_none", default)]
    pub token_usage: Option<TokenUsage>,
    #[serde(skip_serializing_if = "Option::is_none", default)]
    pub error: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none", default)]
    pub iteration: Option<u32>,

    /// Upstream node ids this node depends on (feeds parallelization
    /// analysis).
    #[serde(skip_serializing_if = "HashSet::is_empty", default)]
    pub dependencies: HashSet<NodeId>,

    /// Phase name -> accumulated milliseconds. Hierarchical `__` names and
    /// the `__count` / `__max` companion entries are preserved verbatim.
    #[serde(skip_serializing_if = "HashMap::is_empty", default)]
    pub phase_timings: HashMap<String, u64>,
}

impl NodeMetrics {
    /// Creates a metrics record for a node that just started.
    pub fn started(node_id: NodeId, node_type: impl Into<String>, start_time: f64) -> Self {
        Self {
            node_id,
            node_type: node_type.into(),
            start_time,
            end_time: None,
            duration_ms: None,
            token_usage: None,
            error: None,
            iteration: None,
            dependencies: HashSet::new(),
            phase_timings: HashMap::new(),
        }
    }

    /// Marks the node finished at `end_time`, computing the duration from
    /// the timestamps unless one was already recorded.
    pub fn finish(&mut self, end_time: f64) {
        self.end_time = Some(end_time);
        if self.duration_ms.is_none() {
            self.duration_ms = Some((end_time - self.start_time) * 1000.0);
        }
    }
}

/// Metrics for an entire diagram execution.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ExecutionMetrics {
    pub execution_id: ExecutionId,

    /// Wall-clock start, seconds since the Unix epoch.
    pub start_time: f64,
    #[serde(skip_serializing_if = "Option::is_none", default)]
    pub end_time: Option<f64>,
    #[serde(skip_serializing_if = "Option::is_none", default)]
    pub total_duration_ms: Option<f64>,

    #[serde(default)]
    pub node_metrics: HashMap<NodeId, NodeMetrics>,

    /// Node ids in start-time order (see the critical-path note in the
    /// metrics analyzer).
    #[serde(skip_serializing_if = "Vec::is_empty", default)]
    pub critical_path: Vec<NodeId>,

    /// Groups of mutually independent nodes that could run concurrently.
    #[serde(skip_serializing_if = "Vec::is_empty", default)]
    pub parallelizable_groups: Vec<Vec<NodeId>>,

    /// Top offenders by duration (at most five).
    #[serde(skip_serializing_if = "Vec::is_empty", default)]
    pub bottlenecks: Vec<NodeId>,
}

impl ExecutionMetrics {
    /// Creates a metrics record for an execution that just started.
    pub fn started(execution_id: ExecutionId, start_time: f64) -> Self {
        Self {
            execution_id,
            start_time,
            end_time: None,
            total_duration_ms: None,
            node_metrics: HashMap::new(),
            critical_path: Vec::new(),
            parallelizable_groups: Vec::new(),
            bottlenecks: Vec::new(),
        }
    }

    /// Marks the execution finished at `end_time` and computes the total
    /// duration.
    pub fn finish(&mut self, end_time: f64) {
        self.end_time = Some(end_time);
        self.total_duration_ms = Some((end_time - self.start_time) * 1000.0);
    }

    /// Sums token usage across all node metrics.
    pub fn total_token_usage(&self) -> TokenUsage {
        let mut total = TokenUsage::default();
        for node in self.node_metrics.values() {
            if let Some(usage) = &node.token_usage {
                total.input += usage.input;
                total.output += usage.output;
                total.total += usage.total;
            }
        }
        total
    }
}
