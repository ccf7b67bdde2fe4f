// /////////////////////////////////////////////////////////////////////////////
// Diaflow Execution Core
// Copyright (c) 2025 Michael Gardner, A Bit of Help, Inc.
// SPDX-License-Identifier: BSD-3-Clause
// See LICENSE file in the project root.
// /////////////////////////////////////////////////////////////////////////////

//! # Execution Identifier
//!
//! Value object identifying one run of a diagram. Execution ids are opaque
//! strings allocated by the engine; the only structure this layer relies on
//! is the sub-execution convention: a sub-diagram's execution id is
//! lexically prefixed by its parent's id, which makes sub-tree filtering a
//! cheap prefix test.
//!
//! Batch-item sub-executions carry a `_batch_` marker in their id. The
//! message router uses this to disable replay buffering for them, since a
//! large batch would otherwise explode buffer memory.

use crate::error::DiaflowError;
use serde::{Deserialize, Serialize};
use std::fmt;

/// Marker substring identifying batch-item sub-executions.
const BATCH_MARKER: &str = "_batch_";

/// Unique identifier for a single diagram execution.
///
/// Wraps the engine-allocated id string. Construction validates that the id
/// is non-empty; every scoped event is required to carry a valid execution
/// id.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct ExecutionId(String);

impl ExecutionId {
    /// Creates an execution id from a string, validating it is non-empty.
    pub fn new(id: impl Into<String>) -> Result<Self, DiaflowError> {
        let id = id.into();
        if id.trim().is_empty() {
            return Err(DiaflowError::ValidationError(
                "execution id cannot be empty".to_string(),
            ));
        }
        Ok(Self(id))
    }

    /// Returns the id as a string slice.
    pub fn as_str(&self) -> &str {
        &self.0
    }

    /// Checks whether this execution is the given execution or one of its
    /// sub-executions.
    ///
    /// Sub-execution ids are lexically prefixed by their parent's id, so
    /// this is a prefix test. An id is always a child of itself.
    pub fn is_same_or_child_of(&self, parent: &ExecutionId) -> bool {
        self.0.starts_with(parent.as_str())
    }

    /// True when this execution is a batch-item sub-execution.
    ///
    /// Batch items are identified by a `_batch_` marker in the id.
    pub fn is_batch_item(&self) -> bool {
        self.0.contains(BATCH_MARKER)
    }
}

impl fmt::Display for ExecutionId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

impl TryFrom<&str> for ExecutionId {
    type Error = DiaflowError;

    fn try_from(value: &str) -> Result<Self, Self::Error> {
        Self::new(value)
    }
}

impl TryFrom<String> for ExecutionId {
    type Error = DiaflowError;

    fn try_from(value: String) -> Result<Self, Self::Error> {
        Self::new(value)
    }
}
