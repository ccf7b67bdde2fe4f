// /////////////////////////////////////////////////////////////////////////////
// Diaflow Execution Core
// Copyright (c) 2025 Michael Gardner, A Bit of Help, Inc.
// SPDX-License-Identifier: BSD-3-Clause
// See LICENSE file in the project root.
// /////////////////////////////////////////////////////////////////////////////

//! # Messaging Infrastructure
//!
//! The event plane: the in-memory bus, the broadcast routers, and the wire
//! serialization shared between them.
//!
//! Data flow: producers publish [`diaflow_domain::DomainEvent`]s to the
//! [`event_bus::InMemoryEventBus`]; the routers subscribe as handlers and
//! fan events out to client connections with replay and batching. The
//! [`redis_router::RedisMessageRouter`] replaces only the broadcast hop
//! with a Redis Pub/Sub channel per execution.

pub mod event_bus;
pub mod message_router;
pub mod redis_router;
pub mod serialize;

pub use event_bus::InMemoryEventBus;
pub use message_router::{ConnectionHealth, MessageRouter};
pub use redis_router::RedisMessageRouter;
