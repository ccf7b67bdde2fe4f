// /////////////////////////////////////////////////////////////////////////////
// Diaflow Execution Core
// Copyright (c) 2025 Michael Gardner, A Bit of Help, Inc.
// SPDX-License-Identifier: BSD-3-Clause
// See LICENSE file in the project root.
// /////////////////////////////////////////////////////////////////////////////

//! # Logging Infrastructure
//!
//! Bridges the process's `tracing` output into the event plane: the
//! execution-log layer captures records for the active execution and
//! re-emits them as EXECUTION_LOG domain events for real-time monitoring.

pub mod execution_log_layer;

pub use execution_log_layer::ExecutionLogLayer;
