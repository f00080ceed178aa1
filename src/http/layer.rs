//! Tower integration of the metering interceptor.
//!
//! # Responsibilities
//! - `MeteringLayer`/`MeteringService`: meter every exchange of an inner
//!   tower service (e.g. an axum `Router`)
//! - `MeteredHandler`: serve a writer-style [`Downstream`] directly
//! - `ServiceDownstream`: adapt a tower service into a [`Downstream`]
//!
//! # Design Decisions
//! - Each exchange runs on its own task so the response head can be returned
//!   to hyper while the body is still being written
//! - The inner service keeps the request's upgrade handle; only
//!   `MeteredHandler` hands it to the sink for `hijack`

use std::convert::Infallible;
use std::sync::Arc;
use std::task::{Context, Poll};

use async_trait::async_trait;
use axum::body::Body;
use axum::http::{Request, Response, StatusCode};
use axum::response::IntoResponse;
use bytes::Bytes;
use futures_util::future::BoxFuture;
use http_body_util::BodyExt;
use hyper::upgrade::OnUpgrade;
use tokio::sync::Mutex;
use tower::{Layer, Service, ServiceExt};

use crate::http::channel::ChannelSink;
use crate::metering::{BoxError, Downstream, Interceptor, ResponseSink};

/// Default number of response chunks buffered between handler and client.
pub const DEFAULT_BODY_BUFFER: usize = 16;

/// Layer wrapping a service in a [`MeteringService`].
#[derive(Clone)]
pub struct MeteringLayer {
    interceptor: Arc<Interceptor>,
    body_buffer: usize,
}

impl MeteringLayer {
    pub fn new(interceptor: Arc<Interceptor>) -> Self {
        Self {
            interceptor,
            body_buffer: DEFAULT_BODY_BUFFER,
        }
    }

    pub fn with_body_buffer(mut self, chunks: usize) -> Self {
        self.body_buffer = chunks;
        self
    }
}

impl<S> Layer<S> for MeteringLayer {
    type Service = MeteringService<S>;

    fn layer(&self, inner: S) -> Self::Service {
        MeteringService {
            inner,
            interceptor: self.interceptor.clone(),
            body_buffer: self.body_buffer,
        }
    }
}

/// Meters every exchange handled by `S`.
#[derive(Clone)]
pub struct MeteringService<S> {
    inner: S,
    interceptor: Arc<Interceptor>,
    body_buffer: usize,
}

impl<S, ResBody> Service<Request<Body>> for MeteringService<S>
where
    S: Service<Request<Body>, Response = Response<ResBody>> + Clone + Send + 'static,
    S::Error: Into<BoxError>,
    S::Future: Send,
    ResBody: http_body::Body<Data = Bytes> + Send + 'static,
    ResBody::Error: Into<BoxError>,
{
    type Response = Response<Body>;
    type Error = Infallible;
    type Future = BoxFuture<'static, Result<Self::Response, Self::Error>>;

    fn poll_ready(&mut self, _cx: &mut Context<'_>) -> Poll<Result<(), Self::Error>> {
        // Readiness of the inner service is awaited per exchange.
        Poll::Ready(Ok(()))
    }

    fn call(&mut self, request: Request<Body>) -> Self::Future {
        let downstream = ServiceDownstream::new(self.inner.clone());
        let interceptor = self.interceptor.clone();
        let body_buffer = self.body_buffer;

        Box::pin(async move {
            Ok(run_exchange(interceptor, request, downstream, None, body_buffer).await)
        })
    }
}

/// Serves a writer-style [`Downstream`] as a tower service, metered.
pub struct MeteredHandler<D: ?Sized> {
    downstream: Arc<D>,
    interceptor: Arc<Interceptor>,
    body_buffer: usize,
}

impl<D: ?Sized> Clone for MeteredHandler<D> {
    fn clone(&self) -> Self {
        Self {
            downstream: self.downstream.clone(),
            interceptor: self.interceptor.clone(),
            body_buffer: self.body_buffer,
        }
    }
}

impl<D: Downstream + ?Sized> MeteredHandler<D> {
    pub fn new(interceptor: Arc<Interceptor>, downstream: Arc<D>) -> Self {
        Self {
            downstream,
            interceptor,
            body_buffer: DEFAULT_BODY_BUFFER,
        }
    }
}

impl<D> Service<Request<Body>> for MeteredHandler<D>
where
    D: Downstream + ?Sized + 'static,
{
    type Response = Response<Body>;
    type Error = Infallible;
    type Future = BoxFuture<'static, Result<Self::Response, Self::Error>>;

    fn poll_ready(&mut self, _cx: &mut Context<'_>) -> Poll<Result<(), Self::Error>> {
        Poll::Ready(Ok(()))
    }

    fn call(&mut self, mut request: Request<Body>) -> Self::Future {
        let upgrade = request.extensions_mut().remove::<OnUpgrade>();
        let downstream = self.downstream.clone();
        let interceptor = self.interceptor.clone();
        let body_buffer = self.body_buffer;

        Box::pin(async move {
            Ok(run_exchange(interceptor, request, downstream, upgrade, body_buffer).await)
        })
    }
}

/// Run one metered exchange on its own task and wait for the response head.
async fn run_exchange<D>(
    interceptor: Arc<Interceptor>,
    request: Request<Body>,
    downstream: D,
    upgrade: Option<OnUpgrade>,
    body_buffer: usize,
) -> Response<Body>
where
    D: Downstream + 'static,
{
    let (sink, pending) = ChannelSink::new(body_buffer);
    let mut sink = match upgrade {
        Some(upgrade) => sink.with_upgrade(upgrade),
        None => sink,
    };

    tokio::spawn(async move {
        match interceptor.handle(request, &mut sink, &downstream).await {
            Ok(()) => sink.finish(),
            Err(e) => {
                tracing::warn!(
                    workload_id = %interceptor.workload_id(),
                    error = %e,
                    "Metered exchange failed"
                );
                sink.fail(StatusCode::BAD_GATEWAY);
            }
        }
    });

    match pending.recv().await {
        Some(response) => response,
        None => (StatusCode::INTERNAL_SERVER_ERROR, "Response was never started").into_response(),
    }
}

/// A tower service used as the downstream of an interceptor.
pub struct ServiceDownstream<S> {
    service: Mutex<S>,
}

impl<S> ServiceDownstream<S> {
    pub fn new(service: S) -> Self {
        Self {
            service: Mutex::new(service),
        }
    }
}

#[async_trait]
impl<S, ResBody> Downstream for ServiceDownstream<S>
where
    S: Service<Request<Body>, Response = Response<ResBody>> + Send + 'static,
    S::Error: Into<BoxError>,
    S::Future: Send,
    ResBody: http_body::Body<Data = Bytes> + Send + 'static,
    ResBody::Error: Into<BoxError>,
{
    async fn serve(
        &self,
        response: &mut dyn ResponseSink,
        request: Request<Body>,
    ) -> Result<(), BoxError> {
        let call = {
            let mut service = self.service.lock().await;
            service.ready().await.map_err(Into::<BoxError>::into)?.call(request)
        };
        let upstream = call.await.map_err(Into::<BoxError>::into)?;

        let (parts, body) = upstream.into_parts();
        response.write_status(parts.status);
        response.headers_mut().extend(parts.headers);

        if parts.status == StatusCode::SWITCHING_PROTOCOLS {
            // The inner service owns the upgraded connection from here on.
            response.flush().await?;
            return Ok(());
        }

        let mut body = Box::pin(body);
        loop {
            // Bind the frame first: the body error need not be `Send`.
            let frame = match body.frame().await {
                Some(frame) => frame.map_err(Into::<BoxError>::into)?,
                None => break,
            };
            if let Ok(data) = frame.into_data() {
                response.write(data).await?;
            }
        }
        response.flush().await?;
        Ok(())
    }
}
