//! HTTP traffic metering.
//!
//! Counts the bytes of every HTTP exchange flowing through a service,
//! including an approximation of the wire framing, and reports the totals
//! per workload to an accounting broker.

pub mod accounting;
pub mod config;
pub mod http;
pub mod metering;
pub mod observability;

pub use config::MeterConfig;
pub use http::{MeterServer, MeteringLayer};
pub use metering::Interceptor;
