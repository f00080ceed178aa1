//! Observability subsystem.
//!
//! # Data Flow
//! ```text
//! metering + accounting produce MeterEvents
//!     → diagnostics.rs (DiagnosticSink fan-out)
//!         → tracing events (logging.rs installs the subscriber)
//!         → metrics.rs (Prometheus counters)
//! ```
//!
//! # Design Decisions
//! - Diagnostics are passed in explicitly, never read from globals
//! - Recording an event can never fail the metering path

pub mod diagnostics;
pub mod logging;
pub mod metrics;

pub use diagnostics::{DiagnosticSink, Fanout, MeterEvent, MetricsSink, NoopSink, TracingSink};
