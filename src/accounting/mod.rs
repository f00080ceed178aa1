//! Accounting subsystem.
//!
//! # Data Flow
//! ```text
//! Interceptor (end of exchange)
//!     → reporter.rs (spawn, bounded by timeout + in-flight limit)
//!     → gateway.rs (Gateway capability)
//!     → broker.rs (newline-delimited JSON RPC to the broker)
//! ```
//!
//! # Design Decisions
//! - Reports are fire-and-forget: no queue, no retries
//! - Accounting failures never reach the HTTP client

pub mod broker;
pub mod gateway;
pub mod reporter;

pub use broker::{BrokerAddress, BrokerGateway, DEFAULT_BROKER_ADDRESS};
pub use gateway::{Gateway, GatewayError};
pub use reporter::{Consumption, ConsumptionReporter, DropReason, ReportOutcome};
