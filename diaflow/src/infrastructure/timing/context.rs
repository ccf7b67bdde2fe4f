// /////////////////////////////////////////////////////////////////////////////
// Diaflow Execution Core
// Copyright (c) 2025 Michael Gardner, A Bit of Help, Inc.
// SPDX-License-Identifier: BSD-3-Clause
// See LICENSE file in the project root.
// /////////////////////////////////////////////////////////////////////////////

//! # Phase Timer
//!
//! RAII guard that records a phase duration on drop, so call sites wrap the
//! work instead of bookkeeping timestamps:
//!
//! ```
//! use diaflow::infrastructure::timing::{PhaseTimer, TimingCollector};
//!
//! let collector = TimingCollector::new();
//! {
//!     let _timer = PhaseTimer::start(&collector, "E1", "N1", "input_extraction");
//!     // ... timed work ...
//! }
//! assert_eq!(collector.get("E1")["N1"].timings["input_extraction__count"], 1);
//! ```

use crate::infrastructure::timing::collector::TimingCollector;
use serde_json::Value;
use std::time::Instant;

/// Records the elapsed phase duration into a collector when dropped.
pub struct PhaseTimer<'a> {
    collector: &'a TimingCollector,
    exec_id: String,
    node_id: String,
    phase: String,
    metadata: Option<Value>,
    started: Instant,
}

impl<'a> PhaseTimer<'a> {
    /// Starts timing a phase.
    pub fn start(
        collector: &'a TimingCollector,
        exec_id: impl Into<String>,
        node_id: impl Into<String>,
        phase: impl Into<String>,
    ) -> Self {
        Self {
            collector,
            exec_id: exec_id.into(),
            node_id: node_id.into(),
            phase: phase.into(),
            metadata: None,
            started: Instant::now(),
        }
    }

    /// Attaches metadata recorded alongside the duration.
    pub fn with_metadata(mut self, metadata: Value) -> Self {
        self.metadata = Some(metadata);
        self
    }
}

impl Drop for PhaseTimer<'_> {
    fn drop(&mut self) {
        let dur_ms = self.started.elapsed().as_secs_f64() * 1000.0;
        self.collector.record(
            &self.exec_id,
            &self.node_id,
            &self.phase,
            dur_ms,
            self.metadata.take(),
        );
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_timer_records_on_drop() {
        let collector = TimingCollector::new();
        {
            let _timer = PhaseTimer::start(&collector, "E1", "N1", "phase_a");
            std::thread::sleep(std::time::Duration::from_millis(2));
        }

        let data = collector.get("E1");
        let timings = &data["N1"].timings;
        assert_eq!(timings["phase_a__count"], 1);
        assert!(timings["phase_a"] >= 1);
    }

    #[test]
    fn test_timer_metadata() {
        let collector = TimingCollector::new();
        {
            let _timer = PhaseTimer::start(&collector, "E1", "N1", "phase_b")
                .with_metadata(serde_json::json!({"source": "test"}));
        }

        let data = collector.get("E1");
        assert!(data["N1"].metadata.contains_key("phase_b_metadata"));
    }
}
