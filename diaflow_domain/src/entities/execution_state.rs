// /////////////////////////////////////////////////////////////////////////////
// Diaflow Execution Core
// Copyright (c) 2025 Michael Gardner, A Bit of Help, Inc.
// SPDX-License-Identifier: BSD-3-Clause
// See LICENSE file in the project root.
// /////////////////////////////////////////////////////////////////////////////

//! # Execution State
//!
//! The persisted snapshot of one execution, read and written through the
//! [`crate::repositories::ExecutionStateRepository`] port. The engine owns
//! state creation; the observers attach metrics and force terminal statuses
//! to durable storage.

use crate::entities::execution_metrics::ExecutionMetrics;
use crate::events::types::ExecutionStatus;
use crate::value_objects::ExecutionId;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// Persisted state of a single execution.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ExecutionState {
    pub execution_id: ExecutionId,
    pub status: ExecutionStatus,
    #[serde(skip_serializing_if = "Option::is_none", default)]
    pub error: Option<String>,
    pub started_at: DateTime<Utc>,
    #[serde(skip_serializing_if = "Option::is_none", default)]
    pub ended_at: Option<DateTime<Utc>>,
    #[serde(skip_serializing_if = "Option::is_none", default)]
    pub metrics: Option<ExecutionMetrics>,
}

impl ExecutionState {
    /// Creates a fresh RUNNING state for a newly started execution.
    pub fn running(execution_id: ExecutionId) -> Self {
        Self {
            execution_id,
            status: ExecutionStatus::Running,
            error: None,
            started_at: Utc::now(),
            ended_at: None,
            metrics: None,
        }
    }

    /// Returns a copy with metrics attached (states are treated as
    /// immutable snapshots; updates produce new values).
    pub fn with_metrics(mut self, metrics: ExecutionMetrics) -> Self {
        self.metrics = Some(metrics);
        self
    }

    /// Applies a status transition, stamping `ended_at` for terminal
    /// statuses.
    pub fn with_status(mut self, status: ExecutionStatus, error: Option<String>) -> Self {
        self.status = status;
        self.error = error;
        if status.is_terminal() && self.ended_at.is_none() {
            self.ended_at = Some(Utc::now());
        }
        self
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_terminal_transition_stamps_end_time() {
        let state = ExecutionState::running(ExecutionId::new("exec-1").unwrap());
        assert!(state.ended_at.is_none());

        let failed = state.with_status(ExecutionStatus::Failed, Some("boom".to_string()));
        assert_eq!(failed.status, ExecutionStatus::Failed);
        assert_eq!(failed.error.as_deref(), Some("boom"));
        assert!(failed.ended_at.is_some());
    }
}
