// /////////////////////////////////////////////////////////////////////////////
// Diaflow Execution Core
// Copyright (c) 2025 Michael Gardner, A Bit of Help, Inc.
// SPDX-License-Identifier: BSD-3-Clause
// See LICENSE file in the project root.
// /////////////////////////////////////////////////////////////////////////////

//! # Diaflow Domain Layer
//!
//! Pure domain layer for the diaflow execution event core: the typed event
//! contract, subscription filters, bus and router ports, metrics entities,
//! and the execution-state repository interface.
//!
//! ## Architecture Overview
//!
//! The event core follows a ports-and-adapters split:
//!
//! ```text
//! ┌─────────────────────────────────────────────────────────────┐
//! │                     Producers                               │
//! │  (execution engine, node handlers, webhook intake)          │
//! └─────────────────────────────────────────────────────────────┘
//!                              │ DomainEvent
//! ┌─────────────────────────────────────────────────────────────┐
//! │                 Event Bus (port: EventBus)                  │
//! │  priority dispatch, bounded per-subscription queues         │
//! └─────────────────────────────────────────────────────────────┘
//!            │                  │                    │
//! ┌────────────────┐  ┌──────────────────┐  ┌────────────────────┐
//! │ Message Router │  │ Metrics Observer │  │  Result Observer   │
//! │ (client conns) │  │ (aggregation)    │  │ (durable status)   │
//! └────────────────┘  └──────────────────┘  └────────────────────┘
//! ```
//!
//! This crate contains no I/O: the bus, routers, observers, and repository
//! implementations live in the `diaflow` crate and depend on the contracts
//! defined here.
//!
//! ## Core Concepts
//!
//! ### Events
//! Immutable records with a scope (execution / node / connection), a closed
//! payload sum type, a priority, and tracing metadata. See
//! [`events::contracts::DomainEvent`].
//!
//! ### Subscriptions
//! A registered interest in a set of event types with an optional filter
//! and a priority, bound to a handler. Per-subscription delivery is FIFO in
//! publish order.
//!
//! ### Metrics
//! Per-node and per-execution timing aggregates assembled from the event
//! stream and persisted through the repository port on completion.

pub mod entities;
pub mod error;
pub mod events;
pub mod repositories;
pub mod value_objects;

// Re-export commonly used types at the crate root
pub use entities::{ExecutionMetrics, ExecutionState, NodeMetrics};
pub use error::DiaflowError;
pub use events::{
    DomainEvent, EventBus, EventFilter, EventHandler, EventPayload, EventPriority,
    EventPublisher, EventScope, EventSubscription, EventType, ExecutionStatus, LogLevel,
    MessageRouterPort,
};
pub use repositories::ExecutionStateRepository;
pub use value_objects::{ConnectionId, ExecutionId, NodeId};
