// /////////////////////////////////////////////////////////////////////////////
// Diaflow Execution Core
// Copyright (c) 2025 Michael Gardner, A Bit of Help, Inc.
// SPDX-License-Identifier: BSD-3-Clause
// See LICENSE file in the project root.
// /////////////////////////////////////////////////////////////////////////////

//! # Execution Observers
//!
//! In-process event consumers maintaining derived state: the metrics
//! observer (aggregation and analysis) and the result observer (durable
//! terminal status).

pub mod metrics_analysis;
pub mod metrics_observer;
pub mod result_observer;

pub use metrics_analysis::MetricsAnalyzer;
pub use metrics_observer::MetricsObserver;
pub use result_observer::ResultObserver;
