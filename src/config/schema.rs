//! Configuration schema definitions.
//!
//! This module defines the complete configuration structure for the meter.
//! All types derive Serde traits for deserialization from config files.

use serde::{Deserialize, Serialize};

use crate::accounting::broker::DEFAULT_BROKER_ADDRESS;
use crate::accounting::reporter::{DEFAULT_MAX_IN_FLIGHT, DEFAULT_REPORT_TIMEOUT};

/// Root configuration for the traffic meter.
#[derive(Debug, Clone, Deserialize, Serialize, Default)]
#[serde(default)]
pub struct MeterConfig {
    /// Workload whose traffic is billed. Required.
    pub workload_id: String,

    /// Listener configuration (bind address).
    pub listener: ListenerConfig,

    /// Upstream the metered traffic is forwarded to.
    pub upstream: UpstreamConfig,

    /// Accounting broker settings.
    pub broker: BrokerConfig,

    /// Consumption reporter settings.
    pub reporter: ReporterConfig,

    /// Timeout configuration.
    pub timeouts: TimeoutConfig,

    /// Observability settings.
    pub observability: ObservabilityConfig,
}

/// Listener configuration.
#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(default)]
pub struct ListenerConfig {
    /// Bind address (e.g., "0.0.0.0:8080").
    pub bind_address: String,
}

impl Default for ListenerConfig {
    fn default() -> Self {
        Self {
            bind_address: "0.0.0.0:8080".to_string(),
        }
    }
}

/// Upstream configuration.
#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(default)]
pub struct UpstreamConfig {
    /// Upstream address (e.g., "127.0.0.1:3000").
    pub address: String,
}

impl Default for UpstreamConfig {
    fn default() -> Self {
        Self {
            address: "127.0.0.1:3000".to_string(),
        }
    }
}

/// Broker configuration.
#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(default)]
pub struct BrokerConfig {
    /// Broker location: `unix:///path` or `tcp://host:port`.
    ///
    /// The broker must speak the newline-delimited JSON framing of
    /// [`BrokerGateway`](crate::accounting::BrokerGateway); a Redis socket
    /// will not do.
    pub address: String,

    /// Connection establishment timeout in seconds.
    pub connect_timeout_secs: u64,
}

impl Default for BrokerConfig {
    fn default() -> Self {
        Self {
            address: DEFAULT_BROKER_ADDRESS.to_string(),
            connect_timeout_secs: 5,
        }
    }
}

/// Reporter configuration.
#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(default)]
pub struct ReporterConfig {
    /// Time a single report may take before it is abandoned, in seconds.
    pub timeout_secs: u64,

    /// Maximum reports in flight; further reports are dropped.
    pub max_in_flight: usize,
}

impl Default for ReporterConfig {
    fn default() -> Self {
        Self {
            timeout_secs: DEFAULT_REPORT_TIMEOUT.as_secs(),
            max_in_flight: DEFAULT_MAX_IN_FLIGHT,
        }
    }
}

/// Timeout configuration for proxied requests.
#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(default)]
pub struct TimeoutConfig {
    /// Request timeout (total time for request/response) in seconds.
    pub request_secs: u64,
}

impl Default for TimeoutConfig {
    fn default() -> Self {
        Self { request_secs: 30 }
    }
}

/// Observability configuration.
#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(default)]
pub struct ObservabilityConfig {
    /// Default tracing filter when `RUST_LOG` is unset.
    pub log_filter: String,

    /// Expose Prometheus metrics.
    pub metrics_enabled: bool,

    /// Metrics endpoint bind address.
    pub metrics_address: String,
}

impl Default for ObservabilityConfig {
    fn default() -> Self {
        Self {
            log_filter: "traffic_meter=info,tower_http=info".to_string(),
            metrics_enabled: false,
            metrics_address: "0.0.0.0:9090".to_string(),
        }
    }
}
