//! Accounting capability and its errors.

use async_trait::async_trait;
use thiserror::Error;

/// Errors raised while talking to the accounting service.
#[derive(Debug, Error)]
pub enum GatewayError {
    /// The broker address could not be understood.
    #[error("invalid broker address {address:?}: {reason}")]
    InvalidAddress { address: String, reason: String },

    /// The broker could not be reached.
    #[error("failed to connect to broker at {address}: {source}")]
    Connect {
        address: String,
        #[source]
        source: std::io::Error,
    },

    #[error("broker I/O error: {0}")]
    Io(#[from] std::io::Error),

    /// A frame could not be encoded or decoded.
    #[error("malformed broker frame: {0}")]
    Codec(#[from] serde_json::Error),

    #[error("broker closed the connection")]
    Closed,

    /// The broker answered a different request than the one in flight.
    #[error("reply id {got} does not match request id {expected}")]
    OutOfSync { expected: u64, got: u64 },

    /// The accounting service rejected the call.
    #[error("remote error: {0}")]
    Remote(String),
}

/// Remote service recording consumption per workload.
///
/// Shared by every exchange of an interceptor; implementations must accept
/// concurrent calls.
#[async_trait]
pub trait Gateway: Send + Sync {
    async fn report_consumption(
        &self,
        workload_id: &str,
        sent: u64,
        received: u64,
    ) -> Result<(), GatewayError>;
}
