// /////////////////////////////////////////////////////////////////////////////
// Diaflow Execution Core
// Copyright (c) 2025 Michael Gardner, A Bit of Help, Inc.
// SPDX-License-Identifier: BSD-3-Clause
// See LICENSE file in the project root.
// /////////////////////////////////////////////////////////////////////////////

//! # Infrastructure Configuration
//!
//! Settings for the messaging plane, the metrics observer, and the event
//! forwarder. Every knob has a production default; deployments override
//! through `DIAFLOW_`-prefixed environment variables
//! (`DIAFLOW_MESSAGING__BATCH_MAX=200` overrides
//! `settings.messaging.batch_max`).

use config::{Config, Environment};
use diaflow_domain::DiaflowError;
use serde::Deserialize;
use std::time::Duration;

/// Messaging-plane settings shared by the event bus and the routers.
#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct MessagingSettings {
    /// Maximum outstanding messages per consumer before backpressure.
    pub max_queue_size: usize,

    /// Replay ring-buffer cap per execution for late-join delivery.
    pub buffer_max_per_exec: usize,

    /// Replay buffer entry age cap, seconds.
    pub buffer_ttl_s: u64,

    /// Flush delay after the first enqueue in a batch, milliseconds.
    pub batch_interval_ms: u64,

    /// Flush-size trigger.
    pub batch_max: usize,

    /// Slow-flush log threshold, seconds.
    pub broadcast_warning_threshold_s: f64,

    /// Redis connection URL for the cross-process router variant.
    pub redis_url: Option<String>,
}

impl Default for MessagingSettings {
    fn default() -> Self {
        Self {
            max_queue_size: 1000,
            buffer_max_per_exec: 1000,
            buffer_ttl_s: 300,
            batch_interval_ms: 50,
            batch_max: 100,
            broadcast_warning_threshold_s: 1.0,
            redis_url: None,
        }
    }
}

impl MessagingSettings {
    /// Batch flush delay as a duration.
    pub fn batch_interval(&self) -> Duration {
        Duration::from_millis(self.batch_interval_ms)
    }

    /// Replay buffer TTL as a duration.
    pub fn buffer_ttl(&self) -> Duration {
        Duration::from_secs(self.buffer_ttl_s)
    }
}

/// Metrics observer settings.
#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct MetricsSettings {
    /// Minimum node duration for bottleneck classification, milliseconds.
    pub analysis_threshold_ms: f64,

    /// Bounded history of finalized executions.
    pub max_completed_metrics: usize,

    /// Stale-metrics cleanup cadence, seconds.
    pub cleanup_interval_s: u64,

    /// Age after which a never-completed execution's metrics are evicted,
    /// seconds.
    pub stale_execution_ttl_s: u64,
}

impl Default for MetricsSettings {
    fn default() -> Self {
        Self {
            analysis_threshold_ms: 1000.0,
            max_completed_metrics: 10,
            cleanup_interval_s: 300,
            stale_execution_ttl_s: 3600,
        }
    }
}

/// Event forwarder settings (detached CLI -> background server).
#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct ForwarderSettings {
    /// Base URL of the background server.
    pub server_url: String,

    /// Per-request timeout, seconds.
    pub request_timeout_s: u64,

    /// Retry attempts per event on connect/timeout errors.
    pub retry_max_attempts: u32,

    /// Initial retry backoff, milliseconds.
    pub retry_initial_delay_ms: u64,

    /// Backoff cap, milliseconds.
    pub retry_max_delay_ms: u64,
}

impl Default for ForwarderSettings {
    fn default() -> Self {
        Self {
            server_url: "http://localhost:8000".to_string(),
            request_timeout_s: 2,
            retry_max_attempts: 3,
            retry_initial_delay_ms: 100,
            retry_max_delay_ms: 1000,
        }
    }
}

/// Aggregated settings for the event core.
#[derive(Debug, Clone, Default, Deserialize)]
#[serde(default)]
pub struct Settings {
    pub messaging: MessagingSettings,
    pub metrics: MetricsSettings,
    pub forwarder: ForwarderSettings,
}

impl Settings {
    /// Loads settings from `DIAFLOW_`-prefixed environment variables
    /// layered over the defaults.
    pub fn load() -> Result<Self, DiaflowError> {
        let config = Config::builder()
            .add_source(
                Environment::with_prefix("DIAFLOW")
                    .separator("__")
                    .try_parsing(true),
            )
            .build()
            .map_err(|e| DiaflowError::invalid_config(e.to_string()))?;

        config
            .try_deserialize()
            .map_err(|e| DiaflowError::invalid_config(e.to_string()))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_defaults_match_spec() {
        let settings = Settings::default();
        assert_eq!(settings.messaging.max_queue_size, 1000);
        assert_eq!(settings.messaging.batch_interval_ms, 50);
        assert_eq!(settings.metrics.analysis_threshold_ms, 1000.0);
        assert_eq!(settings.metrics.max_completed_metrics, 10);
        assert_eq!(settings.metrics.cleanup_interval_s, 300);
        assert_eq!(settings.metrics.stale_execution_ttl_s, 3600);
        assert_eq!(settings.forwarder.retry_max_attempts, 3);
        assert_eq!(settings.forwarder.retry_initial_delay_ms, 100);
        assert_eq!(settings.forwarder.retry_max_delay_ms, 1000);
    }

    #[test]
    fn test_duration_accessors() {
        let settings = MessagingSettings::default();
        assert_eq!(settings.batch_interval(), Duration::from_millis(50));
        assert_eq!(settings.buffer_ttl(), Duration::from_secs(300));
    }
}
