// /////////////////////////////////////////////////////////////////////////////
// Diaflow Execution Core
// Copyright (c) 2025 Michael Gardner, A Bit of Help, Inc.
// SPDX-License-Identifier: BSD-3-Clause
// See LICENSE file in the project root.
// /////////////////////////////////////////////////////////////////////////////

//! # Domain Events
//!
//! The typed event contract at the heart of the diaflow execution core.
//!
//! Events are immutable records of something that happened during a diagram
//! execution. Each event carries a scope (where it happened), a payload
//! (what happened, as a closed sum type), a priority, and tracing metadata
//! (correlation and causation ids). Producers construct events through the
//! typed constructors on [`DomainEvent`] or the [`EventPublisher`] facade;
//! consumers receive them through [`EventBus`] subscriptions.
//!
//! ## Guarantees
//!
//! - Events are immutable after construction.
//! - The event type is derived from the payload variant; the pairing cannot
//!   diverge.
//! - Terminal execution events (completed / error) are constructed with
//!   CRITICAL priority and bypass bounded queues on delivery.
//! - Within one execution, a subscription observes events in publish order.

pub mod contracts;
pub mod filters;
pub mod ports;
pub mod publisher;
pub mod types;

pub use contracts::{DomainEvent, EventPayload, EventScope, NodeState, TokenUsage};
pub use filters::{
    CompositeFilter, EventFilter, EventTypeFilter, ExecutionScopeFilter, NodeScopeFilter,
    SubDiagramFilter,
};
pub use ports::{
    ConnectionHandler, EventBus, EventHandler, EventSubscription, MessageRouterPort,
};
pub use publisher::EventPublisher;
pub use types::{EventPriority, EventType, ExecutionStatus, LogLevel};
