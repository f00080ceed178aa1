//! Channel-backed response sink.
//!
//! Bridges the writer-style [`ResponseSink`] onto hyper's "return a
//! response" model: the head is handed over through a oneshot channel the
//! moment it is committed, and body chunks follow through a bounded mpsc
//! channel feeding `Body::from_stream`. An abort signal travels on its own
//! oneshot behind the body chunks, so it is never lost to a full buffer.
//!
//! The head is committed by the first `write`, by `flush`, by `hijack`
//! (as `101 Switching Protocols`) or by `finish`/`fail`.

use async_trait::async_trait;
use axum::body::Body;
use axum::http::{HeaderMap, Response, StatusCode};
use bytes::Bytes;
use futures_util::{future, stream, StreamExt};
use hyper::upgrade::OnUpgrade;
use tokio::sync::{mpsc, oneshot};
use tokio_stream::wrappers::ReceiverStream;

use crate::metering::{ResponseSink, SinkError};

type Chunk = Result<Bytes, std::io::Error>;

/// Receiving end of a [`ChannelSink`]'s response head.
pub struct PendingResponse(oneshot::Receiver<Response<Body>>);

impl PendingResponse {
    /// Wait for the head. `None` if the sink was dropped without committing.
    pub async fn recv(self) -> Option<Response<Body>> {
        self.0.await.ok()
    }
}

/// A [`ResponseSink`] producing an axum [`Response`].
pub struct ChannelSink {
    status: StatusCode,
    headers: HeaderMap,
    head: Option<oneshot::Sender<Response<Body>>>,
    body: Option<mpsc::Sender<Chunk>>,
    abort: Option<oneshot::Sender<std::io::Error>>,
    capacity: usize,
    upgrade: Option<OnUpgrade>,
}

impl ChannelSink {
    /// Create a sink whose body channel buffers up to `capacity` chunks.
    pub fn new(capacity: usize) -> (Self, PendingResponse) {
        let (tx, rx) = oneshot::channel();
        let sink = Self {
            status: StatusCode::OK,
            headers: HeaderMap::new(),
            head: Some(tx),
            body: None,
            abort: None,
            capacity: capacity.max(1),
            upgrade: None,
        };
        (sink, PendingResponse(rx))
    }

    /// Allow `hijack` by handing the sink the connection's upgrade handle.
    pub fn with_upgrade(mut self, upgrade: OnUpgrade) -> Self {
        self.upgrade = Some(upgrade);
        self
    }

    pub fn is_committed(&self) -> bool {
        self.head.is_none()
    }

    /// End the response normally, committing the head if nothing was written.
    pub fn finish(mut self) {
        let _ = self.commit();
    }

    /// End the response after a failure.
    ///
    /// Before the head is committed this sends a bare `status` response.
    /// Afterwards the body stream is aborted so the client sees a truncated
    /// response instead of a clean end. Chunks already buffered are still
    /// delivered ahead of the error.
    pub fn fail(mut self, status: StatusCode) {
        if self.is_committed() {
            self.body = None;
            if let Some(abort) = self.abort.take() {
                let _ = abort.send(std::io::Error::other("response aborted"));
            }
            return;
        }
        self.status = status;
        self.headers.clear();
        let _ = self.commit();
    }

    fn commit(&mut self) -> Result<(), SinkError> {
        let Some(head) = self.head.take() else {
            return Ok(());
        };

        let body = if self.status.is_informational() {
            Body::empty()
        } else {
            let (tx, rx) = mpsc::channel(self.capacity);
            let (abort_tx, abort_rx) = oneshot::channel();
            self.body = Some(tx);
            self.abort = Some(abort_tx);

            // A dropped abort sender means the response ended normally.
            let abort = stream::once(abort_rx)
                .filter_map(|signal| future::ready(signal.ok().map(Err::<Bytes, _>)));
            Body::from_stream(ReceiverStream::new(rx).chain(abort))
        };

        let mut response = Response::new(body);
        *response.status_mut() = self.status;
        *response.headers_mut() = self.headers.clone();

        head.send(response).map_err(|_| SinkError::Closed)
    }
}

#[async_trait]
impl ResponseSink for ChannelSink {
    fn headers(&self) -> &HeaderMap {
        &self.headers
    }

    fn headers_mut(&mut self) -> &mut HeaderMap {
        &mut self.headers
    }

    fn write_status(&mut self, status: StatusCode) {
        if !self.is_committed() {
            self.status = status;
        }
    }

    async fn write(&mut self, data: Bytes) -> Result<usize, SinkError> {
        self.commit()?;
        if data.is_empty() {
            return Ok(0);
        }
        let Some(body) = self.body.as_ref() else {
            return Err(SinkError::Closed);
        };
        let len = data.len();
        body.send(Ok(data)).await.map_err(|_| SinkError::Closed)?;
        Ok(len)
    }

    fn hijack(&mut self) -> Result<OnUpgrade, SinkError> {
        if self.upgrade.is_none() {
            return Err(SinkError::Unsupported("hijack"));
        }
        if self.is_committed() {
            return Err(SinkError::Committed);
        }
        self.status = StatusCode::SWITCHING_PROTOCOLS;
        self.commit()?;
        self.upgrade.take().ok_or(SinkError::Unsupported("hijack"))
    }

    async fn flush(&mut self) -> Result<(), SinkError> {
        self.commit()
    }
}
