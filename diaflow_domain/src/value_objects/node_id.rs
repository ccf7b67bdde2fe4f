// /////////////////////////////////////////////////////////////////////////////
// Diaflow Execution Core
// Copyright (c) 2025 Michael Gardner, A Bit of Help, Inc.
// SPDX-License-Identifier: BSD-3-Clause
// See LICENSE file in the project root.
// /////////////////////////////////////////////////////////////////////////////

//! # Node Identifier
//!
//! Value object identifying one computational node within an execution.

use crate::error::DiaflowError;
use serde::{Deserialize, Serialize};
use std::fmt;

/// Unique identifier for a node within a diagram execution.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct NodeId(String);

impl NodeId {
    /// Creates a node id from a string, validating it is non-empty.
    pub fn new(id: impl Into<String>) -> Result<Self, DiaflowError> {
        let id = id.into();
        if id.trim().is_empty() {
            return Err(DiaflowError::ValidationError(
                "node id cannot be empty".to_string(),
            ));
        }
        Ok(Self(id))
    }

    /// Returns the id as a string slice.
    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for NodeId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

impl TryFrom<&str> for NodeId {
    type Error = DiaflowError;

    fn try_from(value: &str) -> Result<Self, Self::Error> {
        Self::new(value)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_rejects_empty_id() {
        assert!(NodeId::new("").is_err());
    }

    #[test]
    fn test_display_and_as_str() {
        let id = NodeId::new("N1").unwrap();
        assert_eq!(id.as_str(), "N1");
        assert_eq!(id.to_string(), "N1");
    }
}
