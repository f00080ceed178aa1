//! Counting request body.
//!
//! Wraps the inbound body so that every data frame the downstream handler
//! actually pulls is added to the exchange's receive counter. Frames are
//! forwarded untouched; errors and end-of-stream pass through as-is.

use std::pin::Pin;
use std::sync::Arc;
use std::task::{Context, Poll};

use bytes::Buf;
use http_body::{Body, Frame, SizeHint};

use crate::metering::counters::{ExchangeCounters, ExchangeId};
use crate::observability::{DiagnosticSink, MeterEvent};

/// An `http_body::Body` that counts delivered bytes.
///
/// Dropping the wrapper drops (and so releases) the wrapped body.
pub struct CountingBody<B> {
    inner: B,
    counters: Arc<ExchangeCounters>,
    exchange: ExchangeId,
    diagnostics: Arc<dyn DiagnosticSink>,
}

impl<B> CountingBody<B> {
    pub fn new(
        inner: B,
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

    pub fn get_ref(&self) -> &B {
        &self.inner
    }

    pub fn into_inner(self) -> B {
        self.inner
    }
}

impl<B> Body for CountingBody<B>
where
    B: Body + Unpin,
{
    type Data = B::Data;
    type Error = B::Error;

    fn poll_frame(
        mut self: Pin<&mut Self>,
        cx: &mut Context<'_>,
    ) -> Poll<Option<Result<Frame<Self::Data>, Self::Error>>> {
        let polled = Pin::new(&mut self.inner).poll_frame(cx);

        if let Poll::Ready(Some(Ok(frame))) = &polled {
            let bytes = frame.data_ref().map_or(0, |data| data.remaining() as u64);
            if bytes > 0 {
                let total = self.counters.add_received(bytes);
                self.diagnostics.record(&MeterEvent::BodyRead {
                    exchange: self.exchange,
                    bytes,
                    total,
                });
            }
        }

        polled
    }

    fn is_end_stream(&self) -> bool {
        self.inner.is_end_stream()
    }

    fn size_hint(&self) -> SizeHint {
        self.inner.size_hint()
    }
}
