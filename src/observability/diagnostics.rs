//! Diagnostic sink capability.
//!
//! The interceptor, both wrappers and the reporter describe what they did
//! through a [`DiagnosticSink`] handed to them at construction. Recording is
//! synchronous and infallible: a sink that has nowhere to write simply drops
//! the event.

use std::sync::Arc;

use crate::accounting::reporter::{DropReason, ReportOutcome};
use crate::metering::{ExchangeId, RequestOverhead};
use crate::observability::metrics;

/// Something worth knowing about an exchange or a report.
#[derive(Debug, Clone, Copy)]
pub enum MeterEvent<'a> {
    /// Non-body request bytes seeded into the receive counter.
    RequestOverhead {
        exchange: ExchangeId,
        overhead: RequestOverhead,
    },
    /// A read from the request body delivered `bytes`.
    BodyRead {
        exchange: ExchangeId,
        bytes: u64,
        total: u64,
    },
    /// The downstream wrote `bytes` into the response sink.
    SinkWrite {
        exchange: ExchangeId,
        bytes: u64,
        total: u64,
    },
    /// Final counters of an exchange, right before reporting.
    ExchangeTotals {
        exchange: ExchangeId,
        workload_id: &'a str,
        sent: u64,
        received: u64,
    },
    /// A report task finished.
    Report {
        workload_id: &'a str,
        sent: u64,
        received: u64,
        outcome: ReportOutcome,
    },
    /// A report was never dispatched.
    ReportDropped {
        workload_id: &'a str,
        reason: DropReason,
    },
}

/// Receiver of [`MeterEvent`]s.
pub trait DiagnosticSink: Send + Sync {
    fn record(&self, event: &MeterEvent<'_>);
}

/// Emits events through `tracing`.
#[derive(Debug, Clone, Copy, Default)]
pub struct TracingSink;

impl DiagnosticSink for TracingSink {
    fn record(&self, event: &MeterEvent<'_>) {
        match *event {
            MeterEvent::RequestOverhead { exchange, overhead } => {
                tracing::debug!(
                    exchange = %exchange,
                    headers = overhead.headers,
                    host = overhead.host,
                    version = overhead.version,
                    path = overhead.path,
                    method = overhead.method,
                    total = overhead.total(),
                    "Request overhead"
                );
            }
            MeterEvent::BodyRead { exchange, bytes, total } => {
                tracing::trace!(exchange = %exchange, bytes, total, "Request body read");
            }
            MeterEvent::SinkWrite { exchange, bytes, total } => {
                tracing::trace!(exchange = %exchange, bytes, total, "Response write");
            }
            MeterEvent::ExchangeTotals {
                exchange,
                workload_id,
                sent,
                received,
            } => {
                tracing::debug!(exchange = %exchange, workload_id, sent, received, "Exchange metered");
            }
            MeterEvent::Report {
                workload_id,
                sent,
                received,
                outcome,
            } => match outcome {
                ReportOutcome::Delivered => {
                    tracing::debug!(workload_id, sent, received, "Consumption reported");
                }
                ReportOutcome::Failed | ReportOutcome::TimedOut => {
                    tracing::warn!(workload_id, sent, received, outcome = ?outcome, "Consumption report lost");
                }
            },
            MeterEvent::ReportDropped { workload_id, reason } => {
                tracing::warn!(workload_id, reason = ?reason, "Consumption report dropped");
            }
        }
    }
}

/// Feeds events into the Prometheus counters of [`metrics`].
#[derive(Debug, Clone, Copy, Default)]
pub struct MetricsSink;

impl DiagnosticSink for MetricsSink {
    fn record(&self, event: &MeterEvent<'_>) {
        match *event {
            MeterEvent::ExchangeTotals {
                workload_id,
                sent,
                received,
                ..
            } => metrics::record_exchange(workload_id, sent, received),
            MeterEvent::Report { outcome, .. } => metrics::record_report(outcome.as_str()),
            MeterEvent::ReportDropped { reason, .. } => metrics::record_report(reason.as_str()),
            _ => {}
        }
    }
}

/// Discards every event.
#[derive(Debug, Clone, Copy, Default)]
pub struct NoopSink;

impl DiagnosticSink for NoopSink {
    fn record(&self, _event: &MeterEvent<'_>) {}
}

/// Forwards every event to each inner sink in order.
#[derive(Clone, Default)]
pub struct Fanout(Vec<Arc<dyn DiagnosticSink>>);

impl Fanout {
    pub fn new(sinks: Vec<Arc<dyn DiagnosticSink>>) -> Self {
        Self(sinks)
    }
}

impl DiagnosticSink for Fanout {
    fn record(&self, event: &MeterEvent<'_>) {
        for sink in &self.0 {
            sink.record(event);
        }
    }
}
