//! Writer-style response sink and its counting wrapper.
//!
//! # Responsibilities
//! - Define the capability set a downstream handler writes a response through
//! - Count every byte written into the sink of an exchange
//!
//! # Design Decisions
//! - Optional capabilities are trait methods with defaults: `hijack` fails
//!   with [`SinkError::Unsupported`], `flush` does nothing
//! - The header accessors expose the sink's own map so handlers can keep
//!   editing headers until the head is committed

use std::sync::Arc;

use async_trait::async_trait;
use axum::http::{HeaderMap, StatusCode};
use bytes::Bytes;
use hyper::upgrade::OnUpgrade;
use thiserror::Error;

use crate::metering::counters::{ExchangeCounters, ExchangeId};
use crate::observability::{DiagnosticSink, MeterEvent};

/// Errors surfaced by a [`ResponseSink`].
#[derive(Debug, Error)]
pub enum SinkError {
    /// The sink does not offer this capability.
    #[error("{0} is not supported by this response sink")]
    Unsupported(&'static str),

    /// The response head was already sent; the operation needs it unsent.
    #[error("response head already committed")]
    Committed,

    /// The client side of the response went away.
    #[error("response receiver closed")]
    Closed,

    #[error(transparent)]
    Io(#[from] std::io::Error),
}

/// Where a downstream handler writes its response.
#[async_trait]
pub trait ResponseSink: Send {
    /// Headers that will be (or were) sent with the response head.
    fn headers(&self) -> &HeaderMap;

    /// Live, mutable header map of the response.
    fn headers_mut(&mut self) -> &mut HeaderMap;

    /// Set the response status. Has no effect once the head is committed.
    fn write_status(&mut self, status: StatusCode);

    /// Write a chunk of the response body, returning the bytes accepted.
    async fn write(&mut self, data: Bytes) -> Result<usize, SinkError>;

    /// Take over the underlying connection for a protocol upgrade.
    fn hijack(&mut self) -> Result<OnUpgrade, SinkError> {
        Err(SinkError::Unsupported("hijack"))
    }

    /// Push buffered response bytes towards the client.
    async fn flush(&mut self) -> Result<(), SinkError> {
        Ok(())
    }
}

#[async_trait]
impl<S> ResponseSink for &mut S
where
    S: ResponseSink + ?Sized,
{
    fn headers(&self) -> &HeaderMap {
        (**self).headers()
    }

    fn headers_mut(&mut self) -> &mut HeaderMap {
        (**self).headers_mut()
    }

    fn write_status(&mut self, status: StatusCode) {
        (**self).write_status(status)
    }

    async fn write(&mut self, data: Bytes) -> Result<usize, SinkError> {
        (**self).write(data).await
    }

    fn hijack(&mut self) -> Result<OnUpgrade, SinkError> {
        (**self).hijack()
    }

    async fn flush(&mut self) -> Result<(), SinkError> {
        (**self).flush().await
    }
}

/// A [`ResponseSink`] that adds every written byte to the send counter.
pub struct CountingSink<S> {
    inner: S,
    counters: Arc<ExchangeCounters>,
    exchange: ExchangeId,
    diagnostics: Arc<dyn DiagnosticSink>,
}

impl<S> CountingSink<S> {
    pub fn new(
        inner: S,
        counters: Arc<ExchangeCounters>,
        exchange: ExchangeId,
        diagnostics: Arc<dyn DiagnosticSink>,
    ) -> Self {
        Self {
            inner,
            counters,
            exchange,
            diagnostics,
        }
    }

    pub fn get_ref(&self) -> &S {
        &self.inner
    }

    pub fn into_inner(self) -> S {
        self.inner
    }
}

#[async_trait]
impl<S> ResponseSink for CountingSink<S>
where
    S: ResponseSink,
{
    fn headers(&self) -> &HeaderMap {
        self.inner.headers()
    }

    fn headers_mut(&mut self) -> &mut HeaderMap {
        self.inner.headers_mut()
    }

    fn write_status(&mut self, status: StatusCode) {
        self.inner.write_status(status)
    }

    async fn write(&mut self, data: Bytes) -> Result<usize, SinkError> {
        let bytes = data.len() as u64;
        let total = self.counters.add_sent(bytes);
        if bytes > 0 {
            self.diagnostics.record(&MeterEvent::SinkWrite {
                exchange: self.exchange,
                bytes,
                total,
            });
        }
        self.inner.write(data).await
    }

    fn hijack(&mut self) -> Result<OnUpgrade, SinkError> {
        self.inner.hijack()
    }

    async fn flush(&mut self) -> Result<(), SinkError> {
        self.inner.flush().await
    }
}
