// /////////////////////////////////////////////////////////////////////////////
// Diaflow Execution Core
// Copyright (c) 2025 Michael Gardner, A Bit of Help, Inc.
// SPDX-License-Identifier: BSD-3-Clause
// See LICENSE file in the project root.
// /////////////////////////////////////////////////////////////////////////////

//! # In-Memory Execution State Repository
//!
//! Cache-fronted reference implementation of
//! [`ExecutionStateRepository`]. Entries carry explicit dirty/persisted
//! flags so the two-phase persistence contract is observable: `save` and
//! `update_status` mark the cache entry dirty, and only
//! [`ExecutionStateRepository::persist_now`] marks it persisted and clean.
//!
//! Durable storage is simulated by a second map, which is what integration
//! tests inspect to verify forced persistence of terminal states.

use async_trait::async_trait;
use diaflow_domain::{
    DiaflowError, ExecutionId, ExecutionState, ExecutionStateRepository, ExecutionStatus,
};
use std::collections::HashMap;
use tokio::sync::RwLock;
use tracing::debug;

/// One cached execution state with persistence bookkeeping.
#[derive(Debug, Clone)]
pub struct CacheEntry {
    pub state: ExecutionState,
    pub is_dirty: bool,
    pub is_persisted: bool,
}

impl CacheEntry {
    fn new(state: ExecutionState) -> Self {
        Self {
            state,
            is_dirty: true,
            is_persisted: false,
        }
    }

    /// Marks the entry as having unpersisted changes.
    pub fn mark_dirty(&mut self) {
        self.is_dirty = true;
    }
}

/// In-memory repository with a write-back cache in front of a simulated
/// durable store.
#[derive(Default)]
pub struct InMemoryStateRepository {
    cache: RwLock<HashMap<ExecutionId, CacheEntry>>,
    persisted: RwLock<HashMap<ExecutionId, ExecutionState>>,
}

impl InMemoryStateRepository {
    pub fn new() -> Self {
        Self::default()
    }

    /// Snapshot of the cache entry for an execution (tests and stats).
    pub async fn cache_entry(&self, execution_id: &ExecutionId) -> Option<CacheEntry> {
        self.cache.read().await.get(execution_id).cloned()
    }

    /// State as last durably persisted, if any.
    pub async fn persisted_state(&self, execution_id: &ExecutionId) -> Option<ExecutionState> {
        self.persisted.read().await.get(execution_id).cloned()
    }
}

#[async_trait]
impl ExecutionStateRepository for InMemoryStateRepository {
    async fn get_execution(
        &self,
        execution_id: &ExecutionId,
    ) -> Result<Option<ExecutionState>, DiaflowError> {
        Ok(self
            .cache
            .read()
            .await
            .get(execution_id)
            .map(|entry| entry.state.clone()))
    }

    async fn save_execution(&self, state: ExecutionState) -> Result<(), DiaflowError> {
        let mut cache = self.cache.write().await;
        match cache.get_mut(&state.execution_id) {
            Some(entry) => {
                entry.state = state;
                entry.mark_dirty();
            }
            None => {
                let execution_id = state.execution_id.clone();
                cache.insert(execution_id, CacheEntry::new(state));
            }
        }
        Ok(())
    }

    async fn update_status(
        &self,
        execution_id: &ExecutionId,
        status: ExecutionStatus,
        error: Option<String>,
    ) -> Result<(), DiaflowError> {
        let mut cache = self.cache.write().await;
        match cache.get_mut(execution_id) {
            Some(entry) => {
                entry.state = entry.state.clone().with_status(status, error);
                entry.mark_dirty();
            }
            None => {
                // Terminal updates must land even when the engine never
                // persisted a start for this execution.
                let state = ExecutionState::running(execution_id.clone())
                    .with_status(status, error);
                cache.insert(execution_id.clone(), CacheEntry::new(state));
            }
        }
        Ok(())
    }

    fn immediate_persistence_capable(&self) -> bool {
        true
    }

    async fn persist_now(
        &self,
        execution_id: &ExecutionId,
        full_sync: bool,
    ) -> Result<(), DiaflowError> {
        let mut cache = self.cache.write().await;
        let entry = cache.get_mut(execution_id).ok_or_else(|| {
            DiaflowError::persistence_error(format!(
                "no cache entry for execution {execution_id}"
            ))
        })?;

        self.persisted
            .write()
            .await
            .insert(execution_id.clone(), entry.state.clone());
        entry.is_persisted = true;
        entry.is_dirty = false;
        debug!(execution_id = %execution_id, full_sync, "persisted execution state");
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn exec_id() -> ExecutionId {
        ExecutionId::new("exec-1").unwrap()
    }

    #[tokio::test]
    async fn test_update_status_does_not_persist() {
        let repo = InMemoryStateRepository::new();
        repo.save_execution(ExecutionState::running(exec_id()))
            .await
            .unwrap();

        repo.update_status(&exec_id(), ExecutionStatus::Completed, None)
            .await
            .unwrap();

        let entry = repo.cache_entry(&exec_id()).await.unwrap();
        assert!(entry.is_dirty);
        assert!(!entry.is_persisted);
        assert!(repo.persisted_state(&exec_id()).await.is_none());
    }

    #[tokio::test]
    async fn test_persist_now_marks_clean() {
        let repo = InMemoryStateRepository::new();
        repo.save_execution(ExecutionState::running(exec_id()))
            .await
            .unwrap();
        repo.update_status(&exec_id(), ExecutionStatus::Failed, Some("boom".to_string()))
            .await
            .unwrap();

        repo.persist_now(&exec_id(), true).await.unwrap();

        let entry = repo.cache_entry(&exec_id()).await.unwrap();
        assert!(entry.is_persisted);
        assert!(!entry.is_dirty);

        let persisted = repo.persisted_state(&exec_id()).await.unwrap();
        assert_eq!(persisted.status, ExecutionStatus::Failed);
        assert_eq!(persisted.error.as_deref(), Some("boom"));
    }

    #[tokio::test]
    async fn test_update_status_upserts_missing_execution() {
        let repo = InMemoryStateRepository::new();
        repo.update_status(&exec_id(), ExecutionStatus::Failed, Some("timeout".to_string()))
            .await
            .unwrap();

        let state = repo.get_execution(&exec_id()).await.unwrap().unwrap();
        assert_eq!(state.status, ExecutionStatus::Failed);
    }
}
