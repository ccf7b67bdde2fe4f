// /////////////////////////////////////////////////////////////////////////////
// Diaflow Execution Core
// Copyright (c) 2025 Michael Gardner, A Bit of Help, Inc.
// SPDX-License-Identifier: BSD-3-Clause
// See LICENSE file in the project root.
// /////////////////////////////////////////////////////////////////////////////

//! # Event Flow Integration Tests
//!
//! Bus-to-observer scenarios: metrics assembly and persistence across the
//! execution lifecycle, and durable terminal-state handling including the
//! forced-persistence path for failures.

use diaflow::infrastructure::config::MetricsSettings;
use diaflow::{InMemoryEventBus, InMemoryStateRepository, MetricsObserver, ResultObserver, TimingCollector};
use diaflow_domain::events::contracts::{
    ExecutionCompletedPayload, ExecutionErrorPayload, ExecutionStartedPayload,
    NodeCompletedPayload, NodeStartedPayload,
};
use diaflow_domain::events::ports::EventBus;
use diaflow_domain::{
    DomainEvent, EventPriority, EventType, ExecutionId, ExecutionState, ExecutionStateRepository,
    ExecutionStatus, NodeId,
};
use std::sync::Arc;
use std::time::Duration;

fn exec_id(id: &str) -> ExecutionId {
    ExecutionId::new(id).unwrap()
}

fn node_id(id: &str) -> NodeId {
    NodeId::new(id).unwrap()
}

fn lifecycle_events(exec: &ExecutionId) -> Vec<DomainEvent> {
    vec![
        DomainEvent::execution_started(exec.clone(), ExecutionStartedPayload::default()),
        DomainEvent::node_started(
            exec.clone(),
            node_id("N1"),
            NodeStartedPayload {
                node_type: Some("job".to_string()),
                ..Default::default()
            },
        ),
        DomainEvent::node_completed(
            exec.clone(),
            node_id("N1"),
            NodeCompletedPayload {
                duration_ms: Some(42),
                ..Default::default()
            },
        ),
        DomainEvent::execution_completed(exec.clone(), ExecutionCompletedPayload::default()),
    ]
}

#[tokio::test]
async fn test_metrics_flow_persists_through_repository() {
    let bus = Arc::new(InMemoryEventBus::default());
    bus.initialize().await.unwrap();

    let repo = Arc::new(InMemoryStateRepository::new());
    let exec = exec_id("E1");
    repo.save_execution(ExecutionState::running(exec.clone()))
        .await
        .unwrap();

    let collector = Arc::new(TimingCollector::new());
    let observer = MetricsObserver::new(
        MetricsSettings::default(),
        Some(bus.clone()),
        Some(repo.clone()),
        Some(collector.clone()),
    );
    observer.start().await;

    bus.subscribe(
        vec![
            EventType::ExecutionStarted,
            EventType::NodeStarted,
            EventType::NodeCompleted,
            EventType::NodeError,
            EventType::ExecutionCompleted,
        ],
        observer.clone(),
        None,
        EventPriority::Normal,
    )
    .await
    .unwrap();

    collector.record("E1", "system", "scheduler", 15.0, None);

    for event in lifecycle_events(&exec) {
        bus.publish(event).await.unwrap();
    }
    tokio::time::sleep(Duration::from_millis(100)).await;

    // Metrics reached the durable store with the node and system entries.
    let persisted = repo.persisted_state(&exec).await.expect("metrics persisted");
    let metrics = persisted.metrics.expect("metrics attached");
    assert_eq!(metrics.node_metrics[&node_id("N1")].duration_ms, Some(42.0));
    assert_eq!(metrics.node_metrics[&node_id("system")].node_type, "system");
    assert_eq!(metrics.critical_path.first(), Some(&node_id("N1")));

    // Finalized record moved out of the active map.
    assert!(observer.get_all_metrics().is_empty());
    assert!(observer.get_metrics_summary(&exec).is_some());

    observer.stop().await;
    bus.cleanup().await.unwrap();
}

#[tokio::test]
async fn test_result_observer_persists_terminal_states_via_bus() {
    let bus = Arc::new(InMemoryEventBus::default());
    bus.initialize().await.unwrap();

    let repo = Arc::new(InMemoryStateRepository::new());
    let exec = exec_id("E2");
    repo.save_execution(ExecutionState::running(exec.clone()))
        .await
        .unwrap();

    let observer = Arc::new(ResultObserver::new(repo.clone()));
    bus.subscribe(
        vec![
            EventType::ExecutionStarted,
            EventType::ExecutionCompleted,
            EventType::ExecutionError,
        ],
        observer,
        None,
        EventPriority::Critical,
    )
    .await
    .unwrap();

    bus.publish(DomainEvent::execution_completed(
        exec.clone(),
        ExecutionCompletedPayload::default(),
    ))
    .await
    .unwrap();

    // CRITICAL subscription: delivery happened synchronously.
    let state = repo.get_execution(&exec).await.unwrap().unwrap();
    assert_eq!(state.status, ExecutionStatus::Completed);

    bus.cleanup().await.unwrap();
}

#[tokio::test]
async fn test_execution_error_forces_durable_persistence() {
    let bus = Arc::new(InMemoryEventBus::default());
    bus.initialize().await.unwrap();

    let repo = Arc::new(InMemoryStateRepository::new());
    let exec = exec_id("E3");
    repo.save_execution(ExecutionState::running(exec.clone()))
        .await
        .unwrap();

    let observer = Arc::new(ResultObserver::new(repo.clone()));
    bus.subscribe(
        vec![EventType::ExecutionError],
        observer,
        None,
        EventPriority::Critical,
    )
    .await
    .unwrap();

    bus.publish(DomainEvent::execution_error(
        exec.clone(),
        ExecutionErrorPayload {
            error_message: "timeout".to_string(),
            ..Default::default()
        },
    ))
    .await
    .unwrap();

    let entry = repo.cache_entry(&exec).await.unwrap();
    assert!(entry.is_persisted);
    assert!(!entry.is_dirty);

    let persisted = repo.persisted_state(&exec).await.unwrap();
    assert_eq!(persisted.status, ExecutionStatus::Failed);
    assert_eq!(persisted.error.as_deref(), Some("timeout"));

    bus.cleanup().await.unwrap();
}

#[tokio::test]
async fn test_duplicate_terminal_events_are_idempotent() {
    let bus = Arc::new(InMemoryEventBus::default());
    bus.initialize().await.unwrap();

    let repo = Arc::new(InMemoryStateRepository::new());
    let exec = exec_id("E4");
    repo.save_execution(ExecutionState::running(exec.clone()))
        .await
        .unwrap();

    let observer = Arc::new(ResultObserver::new(repo.clone()));
    bus.subscribe(
        vec![EventType::ExecutionError],
        observer,
        None,
        EventPriority::Critical,
    )
    .await
    .unwrap();

    for message in ["first failure", "second failure"] {
        bus.publish(DomainEvent::execution_error(
            exec.clone(),
            ExecutionErrorPayload {
                error_message: message.to_string(),
                ..Default::default()
            },
        ))
        .await
        .unwrap();
    }

    // The first error message is preserved.
    let state = repo.get_execution(&exec).await.unwrap().unwrap();
    assert_eq!(state.status, ExecutionStatus::Failed);
    assert_eq!(state.error.as_deref(), Some("first failure"));

    bus.cleanup().await.unwrap();
}

#[tokio::test]
async fn test_metrics_and_result_observers_share_the_stream() {
    let bus = Arc::new(InMemoryEventBus::default());
    bus.initialize().await.unwrap();

    let repo = Arc::new(InMemoryStateRepository::new());
    let exec = exec_id("E5");
    repo.save_execution(ExecutionState::running(exec.clone()))
        .await
        .unwrap();

    let metrics_observer = MetricsObserver::new(
        MetricsSettings::default(),
        None,
        Some(repo.clone()),
        Some(Arc::new(TimingCollector::new())),
    );
    let result_observer = Arc::new(ResultObserver::new(repo.clone()));

    bus.subscribe(
        vec![
            EventType::ExecutionStarted,
            EventType::NodeStarted,
            EventType::NodeCompleted,
            EventType::ExecutionCompleted,
        ],
        metrics_observer.clone(),
        None,
        EventPriority::Normal,
    )
    .await
    .unwrap();
    bus.subscribe(
        vec![EventType::ExecutionCompleted, EventType::ExecutionError],
        result_observer,
        None,
        EventPriority::Critical,
    )
    .await
    .unwrap();

    for event in lifecycle_events(&exec) {
        bus.publish(event).await.unwrap();
    }
    tokio::time::sleep(Duration::from_millis(100)).await;

    let state = repo.get_execution(&exec).await.unwrap().unwrap();
    assert_eq!(state.status, ExecutionStatus::Completed);
    assert!(state.metrics.is_some());

    bus.cleanup().await.unwrap();
}
