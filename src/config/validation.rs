//! Configuration validation.
//!
//! # Responsibilities
//! - Semantic validation (serde handles syntactic)
//! - Validate value ranges (timeouts > 0, addresses parse)
//!
//! # Design Decisions
//! - Returns all validation errors, not just first
//! - Validation is pure function: MeterConfig → Result<(), Vec<ValidationError>>
//! - Runs before config is accepted into the system

use std::net::SocketAddr;

use axum::http::uri::Authority;
use thiserror::Error;

use crate::accounting::broker::BrokerAddress;
use crate::config::schema::MeterConfig;

/// A single semantic problem with the configuration.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum ValidationError {
    #[error("workload_id must not be empty")]
    EmptyWorkloadId,

    #[error("listener.bind_address {0:?} is not a socket address")]
    InvalidBindAddress(String),

    #[error("upstream.address {0:?} is not a host:port authority")]
    InvalidUpstream(String),

    #[error("broker.address {address:?} is invalid: {reason}")]
    InvalidBroker { address: String, reason: String },

    #[error("{0} must be greater than zero")]
    Zero(&'static str),

    #[error("observability.metrics_address {0:?} is not a socket address")]
    InvalidMetricsAddress(String),
}

/// Check a configuration, collecting every problem found.
pub fn validate_config(config: &MeterConfig) -> Result<(), Vec<ValidationError>> {
    let mut errors = Vec::new();

    if config.workload_id.trim().is_empty() {
        errors.push(ValidationError::EmptyWorkloadId);
    }

    if config.listener.bind_address.parse::<SocketAddr>().is_err() {
        errors.push(ValidationError::InvalidBindAddress(
            config.listener.bind_address.clone(),
        ));
    }

    if config.upstream.address.parse::<Authority>().is_err() {
        errors.push(ValidationError::InvalidUpstream(config.upstream.address.clone()));
    }

    if let Err(e) = config.broker.address.parse::<BrokerAddress>() {
        errors.push(ValidationError::InvalidBroker {
            address: config.broker.address.clone(),
            reason: e.to_string(),
        });
    }

    for (name, value) in [
        ("broker.connect_timeout_secs", config.broker.connect_timeout_secs),
        ("reporter.timeout_secs", config.reporter.timeout_secs),
        ("reporter.max_in_flight", config.reporter.max_in_flight as u64),
        ("timeouts.request_secs", config.timeouts.request_secs),
    ] {
        if value == 0 {
            errors.push(ValidationError::Zero(name));
        }
    }

    if config.observability.metrics_enabled
        && config
            .observability
            .metrics_address
            .parse::<SocketAddr>()
            .is_err()
    {
        errors.push(ValidationError::InvalidMetricsAddress(
            config.observability.metrics_address.clone(),
        ));
    }

    if errors.is_empty() {
        Ok(())
    } else {
        Err(errors)
    }
}
