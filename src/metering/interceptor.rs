//! Metering interceptor.
//!
//! # Responsibilities
//! - Wrap the request body and the response sink of one exchange
//! - Seed both counters with the framing bytes the streams never carry
//! - Run the downstream handler and report the final counters
//!
//! # Design Decisions
//! - A downstream error or panic still reports what was counted so far
//! - Reporting is dispatched, never awaited: `handle` returns as soon as the
//!   downstream does

use std::any::Any;
use std::panic::AssertUnwindSafe;
use std::sync::Arc;

use async_trait::async_trait;
use axum::body::Body;
use axum::http::Request;
use bytes::Bytes;
use futures_util::FutureExt;
use thiserror::Error;

use crate::accounting::reporter::{Consumption, ConsumptionReporter};
use crate::config::validation::ValidationError;
use crate::metering::accountant;
use crate::metering::body::CountingBody;
use crate::metering::counters::{ExchangeCounters, ExchangeId};
use crate::metering::sink::{CountingSink, ResponseSink};
use crate::metering::BoxError;
use crate::observability::{DiagnosticSink, MeterEvent};

/// Identifier of the billed workload. Never empty.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct WorkloadId(Arc<str>);

impl WorkloadId {
    pub fn new(id: impl Into<String>) -> Result<Self, ValidationError> {
        let id = id.into();
        if id.trim().is_empty() {
            return Err(ValidationError::EmptyWorkloadId);
        }
        Ok(Self(id.into()))
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl std::fmt::Display for WorkloadId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(&self.0)
    }
}

/// The rest of the handler chain, as seen by the interceptor.
///
/// It may read the (counting) request body and write into the (counting)
/// response sink any number of times before returning.
#[async_trait]
pub trait Downstream: Send + Sync {
    async fn serve(
        &self,
        response: &mut dyn ResponseSink,
        request: Request<Body>,
    ) -> Result<(), BoxError>;
}

#[async_trait]
impl<D> Downstream for Arc<D>
where
    D: Downstream + ?Sized,
{
    async fn serve(
        &self,
        response: &mut dyn ResponseSink,
        request: Request<Body>,
    ) -> Result<(), BoxError> {
        (**self).serve(response, request).await
    }
}

/// How an exchange ended when it did not end well.
#[derive(Debug, Error)]
pub enum HandleError {
    /// The downstream handler returned an error; it is passed on unchanged.
    #[error("downstream failed: {0}")]
    Downstream(#[source] BoxError),

    /// The downstream handler panicked.
    #[error("downstream panicked: {0}")]
    Panicked(String),
}

/// Meters exchanges for a single workload.
pub struct Interceptor {
    workload_id: WorkloadId,
    reporter: ConsumptionReporter,
    diagnostics: Arc<dyn DiagnosticSink>,
}

impl Interceptor {
    /// Create an interceptor. Fails when `workload_id` is empty.
    pub fn new(
        workload_id: impl Into<String>,
        reporter: ConsumptionReporter,
        diagnostics: Arc<dyn DiagnosticSink>,
    ) -> Result<Self, ValidationError> {
        Ok(Self {
            workload_id: WorkloadId::new(workload_id)?,
            reporter,
            diagnostics,
        })
    }

    pub fn workload_id(&self) -> &WorkloadId {
        &self.workload_id
    }

    /// Meter one exchange through `downstream`.
    pub async fn handle<B, S, D>(
        &self,
        request: Request<B>,
        response: S,
        downstream: &D,
    ) -> Result<(), HandleError>
    where
        B: http_body::Body<Data = Bytes> + Unpin + Send + 'static,
        B::Error: Into<BoxError>,
        S: ResponseSink,
        D: Downstream + ?Sized,
    {
        let exchange = ExchangeId::new();
        let counters = Arc::new(ExchangeCounters::new());
        let mut sink = CountingSink::new(
            response,
            counters.clone(),
            exchange,
            self.diagnostics.clone(),
        );

        let (parts, body) = request.into_parts();
        let overhead = accountant::request_overhead(&parts);
        counters.add_received(overhead.total());
        self.diagnostics
            .record(&MeterEvent::RequestOverhead { exchange, overhead });

        let version = parts.version;
        let body = Body::new(CountingBody::new(
            body,
            counters.clone(),
            exchange,
            self.diagnostics.clone(),
        ));
        let request = Request::from_parts(parts, body);

        let outcome = AssertUnwindSafe(downstream.serve(&mut sink, request))
            .catch_unwind()
            .await;

        counters.add_sent(accountant::response_overhead(sink.headers(), version));

        let consumption = Consumption {
            workload_id: self.workload_id.clone(),
            sent: counters.sent(),
            received: counters.received(),
        };
        self.diagnostics.record(&MeterEvent::ExchangeTotals {
            exchange,
            workload_id: self.workload_id.as_str(),
            sent: consumption.sent,
            received: consumption.received,
        });
        self.reporter.dispatch(consumption);

        match outcome {
            Ok(Ok(())) => Ok(()),
            Ok(Err(err)) => Err(HandleError::Downstream(err)),
            Err(panic) => Err(HandleError::Panicked(panic_message(panic.as_ref()))),
        }
    }
}

fn panic_message(payload: &(dyn Any + Send)) -> String {
    if let Some(message) = payload.downcast_ref::<&str>() {
        (*message).to_string()
    } else if let Some(message) = payload.downcast_ref::<String>() {
        message.clone()
    } else {
        "unknown panic".to_string()
    }
}
