//! Traffic metering subsystem.
//!
//! # Data Flow
//! ```text
//! Request<B>
//!     → accountant.rs (request-line + header overhead seeds `received`)
//!     → body.rs (CountingBody adds every delivered data frame to `received`)
//!     → downstream handler
//!     → sink.rs (CountingSink adds every written chunk to `sent`)
//!     → accountant.rs (response header overhead seeds `sent`)
//!     → interceptor.rs hands a Consumption to the reporter
//! ```
//!
//! # Design Decisions
//! - Counters are per exchange; nothing is shared between exchanges
//! - Wire framing is reconstructed arithmetically from parsed fields
//! - Reporting happens off the request path (see `accounting`)

pub mod accountant;
pub mod body;
pub mod counters;
pub mod interceptor;
pub mod sink;

pub use accountant::RequestOverhead;
pub use body::CountingBody;
pub use counters::{ExchangeCounters, ExchangeId};
pub use interceptor::{Downstream, HandleError, Interceptor, WorkloadId};
pub use sink::{CountingSink, ResponseSink, SinkError};

/// Boxed error type used at the downstream boundary.
pub type BoxError = Box<dyn std::error::Error + Send + Sync>;
