// /////////////////////////////////////////////////////////////////////////////
// Diaflow Execution Core
// Copyright (c) 2025 Michael Gardner, A Bit of Help, Inc.
// SPDX-License-Identifier: BSD-3-Clause
// See LICENSE file in the project root.
// /////////////////////////////////////////////////////////////////////////////

//! # Result Observer
//!
//! Observer with a single responsibility: ensure terminal execution status
//! is durably persisted, including timeout and abnormal-termination paths.
//!
//! Subscribes to:
//! - `EXECUTION_STARTED`: log only (state creation is the engine's job)
//! - `EXECUTION_COMPLETED`: update status to COMPLETED
//! - `EXECUTION_ERROR`: update status to FAILED and force immediate
//!   persistence (`update_status` does not persist terminal states
//!   eagerly, so durability must be forced here)
//!
//! The observer is idempotent per execution id: duplicate terminal events
//! are no-ops, and the first error message wins.

use async_trait::async_trait;
use diaflow_domain::events::contracts::EventPayload;
use diaflow_domain::events::ports::EventHandler;
use diaflow_domain::{
    DiaflowError, DomainEvent, ExecutionId, ExecutionStateRepository, ExecutionStatus,
};
use parking_lot::Mutex;
use std::collections::HashSet;
use std::sync::Arc;
use tracing::{debug, error, info};

const UNKNOWN_ERROR: &str = "Unknown error";

/// Observer that persists terminal execution state transitions.
pub struct ResultObserver {
    state_store: Arc<dyn ExecutionStateRepository>,
    finalized: Mutex<HashSet<ExecutionId>>,
}

impl ResultObserver {
    pub fn new(state_store: Arc<dyn ExecutionStateRepository>) -> Self {
        Self {
            state_store,
            finalized: Mutex::new(HashSet::new()),
        }
    }

    /// Marks the execution finalized; returns false when it already was
    /// (duplicate terminal event).
    fn try_finalize(&self, execution_id: &ExecutionId) -> bool {
        self.finalized.lock().insert(execution_id.clone())
    }

    async fn handle_execution_completed(&self, event: &DomainEvent) {
        let execution_id = &event.scope.execution_id;
        if !self.try_finalize(execution_id) {
            debug!(execution_id = %execution_id, "duplicate terminal event ignored");
            return;
        }

        if let Err(e) = self
            .state_store
            .update_status(execution_id, ExecutionStatus::Completed, None)
            .await
        {
            error!(
                execution_id = %execution_id,
                error = %e,
                "failed to persist completion"
            );
            return;
        }
        info!(execution_id = %execution_id, "persisted COMPLETED status");
    }

    async fn handle_execution_error(&self, event: &DomainEvent) {
        let execution_id = &event.scope.execution_id;
        if !self.try_finalize(execution_id) {
            debug!(execution_id = %execution_id, "duplicate terminal event ignored");
            return;
        }

        // Payload field first, metadata fallback, literal default last.
        let error_message = match &event.payload {
            EventPayload::ExecutionError(payload) if !payload.error_message.is_empty() => {
                payload.error_message.clone()
            }
            _ => event
                .metadata
                .get("error_message")
                .cloned()
                .unwrap_or_else(|| UNKNOWN_ERROR.to_string()),
        };

        if let Err(e) = self
            .state_store
            .update_status(
                execution_id,
                ExecutionStatus::Failed,
                Some(error_message.clone()),
            )
            .await
        {
            error!(
                execution_id = %execution_id,
                error = %e,
                "failed to persist error status"
            );
            return;
        }

        // update_status leaves terminal states in cache only; force
        // durability when the store supports it.
        if self.state_store.immediate_persistence_capable() {
            match self.state_store.persist_now(execution_id, true).await {
                Ok(()) => {
                    info!(
                        execution_id = %execution_id,
                        error_message = %error_message,
                        "persisted FAILED status to durable storage"
                    );
                }
                Err(e) => {
                    error!(
                        execution_id = %execution_id,
                        error = %e,
                        "failed to force-persist error status"
                    );
                }
            }
        } else {
            info!(
                execution_id = %execution_id,
                error_message = %error_message,
                "updated FAILED status in cache"
            );
        }
    }
}

#[async_trait]
impl EventHandler for ResultObserver {
    async fn handle(&self, event: Arc<DomainEvent>) -> Result<(), DiaflowError> {
        match &event.payload {
            EventPayload::ExecutionStarted(_) => {
                // State creation is handled by the execution engine.
                debug!(execution_id = %event.scope.execution_id, "execution started");
            }
            EventPayload::ExecutionCompleted(_) => self.handle_execution_completed(&event).await,
            EventPayload::ExecutionError(_) => self.handle_execution_error(&event).await,
            _ => {}
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::infrastructure::repositories::InMemoryStateRepository;
    use diaflow_domain::events::contracts::{
        ExecutionCompletedPayload, ExecutionErrorPayload,
    };
    use diaflow_domain::ExecutionState;

    fn exec_id() -> ExecutionId {
        ExecutionId::new("exec-1").unwrap()
    }

    async fn setup() -> (Arc<InMemoryStateRepository>, ResultObserver) {
        let repo = Arc::new(InMemoryStateRepository::new());
        repo.save_execution(ExecutionState::running(exec_id()))
            .await
            .unwrap();
        let observer = ResultObserver::new(repo.clone());
        (repo, observer)
    }

    #[tokio::test]
    async fn test_completed_updates_status() {
        let (repo, observer) = setup().await;

        let event =
            DomainEvent::execution_completed(exec_id(), ExecutionCompletedPayload::default());
        observer.handle(Arc::new(event)).await.unwrap();

        let state = repo.get_execution(&exec_id()).await.unwrap().unwrap();
        assert_eq!(state.status, ExecutionStatus::Completed);
    }

    #[tokio::test]
    async fn test_error_forces_durable_persistence() {
        let (repo, observer) = setup().await;

        let event = DomainEvent::execution_error(
            exec_id(),
            ExecutionErrorPayload {
                error_message: "timeout".to_string(),
                ..Default::default()
            },
        );
        observer.handle(Arc::new(event)).await.unwrap();

        let entry = repo.cache_entry(&exec_id()).await.unwrap();
        assert!(entry.is_persisted);
        assert!(!entry.is_dirty);

        let persisted = repo.persisted_state(&exec_id()).await.unwrap();
        assert_eq!(persisted.status, ExecutionStatus::Failed);
        assert_eq!(persisted.error.as_deref(), Some("timeout"));
    }

    #[tokio::test]
    async fn test_duplicate_error_keeps_first_message() {
        let (repo, observer) = setup().await;

        let first = DomainEvent::execution_error(
            exec_id(),
            ExecutionErrorPayload {
                error_message: "first".to_string(),
                ..Default::default()
            },
        );
        let second = DomainEvent::execution_error(
            exec_id(),
            ExecutionErrorPayload {
                error_message: "second".to_string(),
                ..Default::default()
            },
        );
        observer.handle(Arc::new(first)).await.unwrap();
        observer.handle(Arc::new(second)).await.unwrap();

        let state = repo.get_execution(&exec_id()).await.unwrap().unwrap();
        assert_eq!(state.error.as_deref(), Some("first"));
    }

    #[tokio::test]
    async fn test_empty_error_message_falls_back() {
        let (repo, observer) = setup().await;

        let event = DomainEvent::execution_error(
            exec_id(),
            ExecutionErrorPayload {
                error_message: String::new(),
                ..Default::default()
            },
        );
        observer.handle(Arc::new(event)).await.unwrap();

        let state = repo.get_execution(&exec_id()).await.unwrap().unwrap();
        assert_eq!(state.error.as_deref(), Some(UNKNOWN_ERROR));
    }

    #[tokio::test]
    async fn test_metadata_fallback_for_error_message() {
        let (repo, observer) = setup().await;

        let event = DomainEvent::execution_error(
            exec_id(),
            ExecutionErrorPayload {
                error_message: String::new(),
                ..Default::default()
            },
        )
        .with_metadata("error_message", "from metadata");
        observer.handle(Arc::new(event)).await.unwrap();

        let state = repo.get_execution(&exec_id()).await.unwrap().unwrap();
        assert_eq!(state.error.as_deref(), Some("from metadata"));
    }
}
