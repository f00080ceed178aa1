//! HTTP integration subsystem.
//!
//! # Data Flow
//! ```text
//! TCP connection
//!     → server.rs (Axum setup, forward handler)
//!     → layer.rs (MeteringService: one interceptor exchange per request)
//!     → channel.rs (ChannelSink: writer-style sink → hyper Response)
//!     → Send to client
//! ```
//!
//! # Design Decisions
//! - Metering is a tower layer so any Axum router can be billed
//! - The response head is returned to hyper as soon as it is committed;
//!   body chunks are streamed afterwards

pub mod channel;
pub mod layer;
pub mod server;

pub use channel::{ChannelSink, PendingResponse};
pub use layer::{MeteredHandler, MeteringLayer, MeteringService, ServiceDownstream, DEFAULT_BODY_BUFFER};
pub use server::{AppState, MeterServer};
