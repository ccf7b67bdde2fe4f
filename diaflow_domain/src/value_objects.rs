// /////////////////////////////////////////////////////////////////////////////
// Diaflow Execution Core
// Copyright (c) 2025 Michael Gardner, A Bit of Help, Inc.
// SPDX-License-Identifier: BSD-3-Clause
// See LICENSE file in the project root.
// /////////////////////////////////////////////////////////////////////////////

//! # Value Objects
//!
//! Typed identifiers for the diaflow event core. Each identifier is a thin,
//! validated wrapper over the wire representation (a string), giving the
//! type system a way to prevent execution ids, node ids, and connection ids
//! from being confused with each other.

pub mod connection_id;
pub mod execution_id;
pub mod node_id;

pub use connection_id::ConnectionId;
pub use execution_id::ExecutionId;
pub use node_id::NodeId;
