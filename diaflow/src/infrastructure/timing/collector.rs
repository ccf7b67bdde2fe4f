// /////////////////////////////////////////////////////////////////////////////
// Diaflow Execution Core
// Copyright (c) 2025 Michael Gardner, A Bit of Help, Inc.
// SPDX-License-Identifier: BSD-3-Clause
// See LICENSE file in the project root.
// /////////////////////////////////////////////////////////////////////////////

//! # Timing Collector
//!
//! Thread-safe, process-wide aggregation of phase durations, keyed by
//! execution and node. No file I/O, no parsing: producers record durations
//! directly and the metrics observer pops them at execution completion.
//!
//! ## Accumulation semantics
//!
//! Recording phase `P` twice on the same (execution, node):
//!
//! - the phase total accumulates (`P` holds the sum),
//! - a `P__count` companion counts occurrences,
//! - a `P__max` companion tracks the maximum single duration.
//!
//! Hierarchical phase names (`parent__child`) are preserved verbatim; the
//! consumer is responsible for presentation. Optional metadata is stored
//! under `<phase>_metadata` and filtered out when timings are merged into
//! node metrics.
//!
//! The process owns one default instance, reachable through
//! [`timing_collector`]. Tests construct private instances.

use once_cell::sync::Lazy;
use parking_lot::Mutex;
use serde_json::Value;
use std::collections::HashMap;

/// Suffix for occurrence-count companion entries.
const COUNT_SUFFIX: &str = "__count";
/// Suffix for maximum-single-duration companion entries.
const MAX_SUFFIX: &str = "__max";
/// Suffix for per-phase metadata entries.
pub const METADATA_SUFFIX: &str = "_metadata";

/// Timings recorded for one node: phase name -> accumulated milliseconds,
/// plus metadata entries keyed `<phase>_metadata`.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct PhaseTimings {
    pub timings: HashMap<String, u64>,
    pub metadata: HashMap<String, Value>,
}

impl PhaseTimings {
    /// Phase entries without the metadata companions, suitable for merging
    /// into node metrics.
    pub fn timing_entries(&self) -> HashMap<String, u64> {
        self.timings.clone()
    }

    /// Sum of the base phase totals (companion entries excluded).
    pub fn total_ms(&self) -> u64 {
        self.timings
            .iter()
            .filter(|(phase, _)| !phase.ends_with(COUNT_SUFFIX) && !phase.ends_with(MAX_SUFFIX))
            .map(|(_, dur)| dur)
            .sum()
    }
}

/// In-process collector for phase timing metrics.
///
/// A single mutex protects all mutations; reads take the same lock.
/// Contention is negligible: records are sub-microsecond map updates.
#[derive(Default)]
pub struct TimingCollector {
    data: Mutex<HashMap<String, HashMap<String, PhaseTimings>>>,
}

impl TimingCollector {
    /// Creates a private collector instance (tests, embedded use).
    pub fn new() -> Self {
        Self::default()
    }

    /// Records timing for a phase, accumulating on repeats.
    ///
    /// `dur_ms` is rounded to whole milliseconds (sub-millisecond work
    /// records as 0). Use node id `"system"` for phases not attached to a
    /// node (scheduler, persistence).
    pub fn record(
        &self,
        exec_id: &str,
        node_id: &str,
        phase: &str,
        dur_ms: f64,
        metadata: Option<Value>,
    ) {
        let dur = dur_ms.round().max(0.0) as u64;
        let count_key = format!("{phase}{COUNT_SUFFIX}");
        let max_key = format!("{phase}{MAX_SUFFIX}");

        let mut data = self.data.lock();
        let node_timings = data
            .entry(exec_id.to_string())
            .or_default()
            .entry(node_id.to_string())
            .or_default();

        if let Some(total) = node_timings.timings.get_mut(phase) {
            *total += dur;
            *node_timings.timings.entry(count_key).or_insert(1) += 1;
            let max = node_timings.timings.entry(max_key).or_insert(0);
            *max = (*max).max(dur);
        } else {
            node_timings.timings.insert(phase.to_string(), dur);
            node_timings.timings.insert(count_key, 1);
            node_timings.timings.insert(max_key, dur);
        }

        if let Some(meta) = metadata {
            node_timings
                .metadata
                .insert(format!("{phase}{METADATA_SUFFIX}"), meta);
        }
    }

    /// Returns all timing data for an execution (non-destructive).
    pub fn get(&self, exec_id: &str) -> HashMap<String, PhaseTimings> {
        self.data.lock().get(exec_id).cloned().unwrap_or_default()
    }

    /// Returns and removes timing data for an execution.
    pub fn pop(&self, exec_id: &str) -> HashMap<String, PhaseTimings> {
        self.data.lock().remove(exec_id).unwrap_or_default()
    }

    /// Clears data for one execution, or everything when `exec_id` is
    /// `None`.
    pub fn clear(&self, exec_id: Option<&str>) {
        let mut data = self.data.lock();
        match exec_id {
            Some(id) => {
                data.remove(id);
            }
            None => data.clear(),
        }
    }
}

static TIMING_COLLECTOR: Lazy<TimingCollector> = Lazy::new(TimingCollector::new);

/// The process-wide default collector.
pub fn timing_collector() -> &'static TimingCollector {
    &TIMING_COLLECTOR
}
