// /////////////////////////////////////////////////////////////////////////////
// Diaflow Execution Core
// Copyright (c) 2025 Michael Gardner, A Bit of Help, Inc.
// SPDX-License-Identifier: BSD-3-Clause
// See LICENSE file in the project root.
// /////////////////////////////////////////////////////////////////////////////

// Production code safety enforced via CI and `make lint-strict`
// (lib/bins checked separately from tests - tests may use unwrap/expect)

//! # Diaflow Execution Event Core
//!
//! The execution event bus and real-time broadcast core of the diaflow
//! diagram-execution engine. This crate ingests strongly-typed domain
//! events emitted during the execution of a directed diagram of
//! computational nodes and distributes them to three classes of consumers:
//!
//! - **In-process observers** maintaining derived state (metrics
//!   aggregation, durable terminal status)
//! - **Client subscriptions** streaming real-time updates to a UI through
//!   the message router (with late-join replay and batching)
//! - **Cross-process subscribers** in distributed deployments (Redis
//!   router variant)
//!
//! ## Architecture Overview
//!
//! ```text
//! ┌─────────────────────────────────────────────────────────────┐
//! │                      Producers                              │
//! │   (execution engine, node handlers, timing collector)       │
//! └─────────────────────────────────────────────────────────────┘
//!                              │
//! ┌─────────────────────────────────────────────────────────────┐
//! │               InMemoryEventBus (EventBus port)              │
//! │   priority dispatch · bounded queues · batch publish        │
//! └─────────────────────────────────────────────────────────────┘
//!        │                     │                      │
//! ┌───────────────┐   ┌─────────────────┐   ┌─────────────────┐
//! │ MessageRouter │   │ MetricsObserver │   │ ResultObserver  │
//! │ replay·batch  │   │ analyze·persist │   │ durable status  │
//! └───────────────┘   └─────────────────┘   └─────────────────┘
//!        │
//! ┌───────────────┐
//! │ client conns  │  (plus RedisMessageRouter for multi-worker)
//! └───────────────┘
//! ```
//!
//! ## Delivery guarantees
//!
//! - Per-subscription FIFO in publish order; no cross-subscription order
//! - Terminal execution events carry CRITICAL priority; CRITICAL
//!   subscribers (the result observer) receive them synchronously
//! - Backpressure never blocks producers: full queues drop the newest
//!   message with a warning
//! - Replay buffers are bounded and TTL-capped; history beyond the window
//!   is lossy
//!
//! Domain contracts (events, filters, ports, entities) live in the
//! `diaflow-domain` crate.

pub mod application;
pub mod infrastructure;

// Re-export the domain layer under the name consumers expect
pub use diaflow_domain as domain;

// Commonly used implementations at the crate root
pub use application::observers::{MetricsAnalyzer, MetricsObserver, ResultObserver};
pub use application::services::EventForwarder;
pub use infrastructure::config::Settings;
pub use infrastructure::logging::ExecutionLogLayer;
pub use infrastructure::messaging::{InMemoryEventBus, MessageRouter, RedisMessageRouter};
pub use infrastructure::repositories::InMemoryStateRepository;
pub use infrastructure::timing::{timing_collector, PhaseTimer, TimingCollector};
