// /////////////////////////////////////////////////////////////////////////////
// Diaflow Execution Core
// Copyright (c) 2025 Michael Gardner, A Bit of Help, Inc.
// SPDX-License-Identifier: BSD-3-Clause
// See LICENSE file in the project root.
// /////////////////////////////////////////////////////////////////////////////

//! # Execution State Repository Interface
//!
//! Port for persisting execution state, providing the abstraction layer
//! between the observers and the storage engine.
//!
//! ## Two-phase persistence
//!
//! Backing stores are expected to be cache-fronted: `save_execution` and
//! `update_status` write to the cache, and a background writer persists
//! dirty entries on its own schedule. `update_status` does NOT eagerly
//! persist terminal states; that is what keeps the hot path cheap.
//!
//! Observers that must guarantee durability (terminal statuses, finalized
//! metrics) probe [`ExecutionStateRepository::immediate_persistence_capable`]
//! and call [`ExecutionStateRepository::persist_now`] when it returns true;
//! otherwise they log a warning and leave the cache-only save in place.
//! This typed capability pair replaces probing for private cache/persistence
//! internals on the store.

use crate::entities::ExecutionState;
use crate::error::DiaflowError;
use crate::events::types::ExecutionStatus;
use crate::value_objects::ExecutionId;
use async_trait::async_trait;

/// Repository interface for execution state persistence.
///
/// All methods are asynchronous to support non-blocking I/O. Persistence
/// failures are reported through `DiaflowError::PersistenceError`; callers
/// in the observer layer absorb them (observability must never fail an
/// execution).
#[async_trait]
pub trait ExecutionStateRepository: Send + Sync {
    /// Fetches the current state of an execution, if known.
    async fn get_execution(
        &self,
        execution_id: &ExecutionId,
    ) -> Result<Option<ExecutionState>, DiaflowError>;

    /// Saves a full state snapshot to the cache.
    async fn save_execution(&self, state: ExecutionState) -> Result<(), DiaflowError>;

    /// Updates the status (and optional error) of an execution in the
    /// cache.
    ///
    /// Terminal states are NOT eagerly persisted; callers needing
    /// durability must follow up with [`Self::persist_now`].
    async fn update_status(
        &self,
        execution_id: &ExecutionId,
        status: ExecutionStatus,
        error: Option<String>,
    ) -> Result<(), DiaflowError>;

    /// True when the repository supports forcing immediate durable
    /// persistence of a cached entry.
    fn immediate_persistence_capable(&self) -> bool {
        false
    }

    /// Forces immediate durable persistence of the execution's cache entry,
    /// marking it clean. `full_sync` requests a full storage sync (commit)
    /// rather than a buffered write.
    ///
    /// The default implementation reports the capability as unsupported;
    /// callers should have checked [`Self::immediate_persistence_capable`]
    /// first and degraded to cache-only persistence.
    async fn persist_now(
        &self,
        execution_id: &ExecutionId,
        full_sync: bool,
    ) -> Result<(), DiaflowError> {
        let _ = (execution_id, full_sync);
        Err(DiaflowError::unsupported(
            "repository does not support immediate persistence",
        ))
    }
}
