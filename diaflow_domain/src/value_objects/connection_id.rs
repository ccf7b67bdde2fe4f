// /////////////////////////////////////////////////////////////////////////////
// Diaflow Execution Core
// Copyright (c) 2025 Michael Gardner, A Bit of Help, Inc.
// SPDX-License-Identifier: BSD-3-Clause
// See LICENSE file in the project root.
// /////////////////////////////////////////////////////////////////////////////

//! # Connection Identifier
//!
//! Value object identifying an external consumer connection (typically a UI
//! client subscription). Connection ids are opaque to the router; they are
//! allocated by the transport layer that registers the connection.

use crate::error::DiaflowError;
use serde::{Deserialize, Serialize};
use std::fmt;

/// Opaque identifier for a registered client connection.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct ConnectionId(String);

impl ConnectionId {
    /// Creates a connection id from a string, validating it is non-empty.
    pub fn new(id: impl Into<String>) -> Result<Self, DiaflowError> {
        let id = id.into();
        if id.trim().is_empty() {
            return Err(DiaflowError::ValidationError(
                "connection id cannot be empty".to_string(),
            ));
        }
        Ok(Self(id))
    }

    /// Returns the id as a string slice.
    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for ConnectionId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

impl TryFrom<&str> for ConnectionId {
    type Error = DiaflowError;

    fn try_from(value: &str) -> Result<Self, Self::Error> {
        Self::new(value)
    }
}
