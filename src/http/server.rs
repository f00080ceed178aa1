//! Metered forwarding server.
//!
//! # Responsibilities
//! - Create the Axum Router forwarding every request to the upstream
//! - Wire up middleware (tracing, metering, timeout)
//! - Bind server to listener and shut down gracefully

use std::future::Future;
use std::str::FromStr;
use std::sync::Arc;
use std::time::Duration;

use axum::{
    body::Body,
    extract::State,
    http::{
        uri::{Authority, InvalidUri, PathAndQuery, Scheme},
        Request, StatusCode, Uri, Version,
    },
    response::{IntoResponse, Response},
    routing::any,
    Router,
};
use hyper_util::{
    client::legacy::{connect::HttpConnector, Client},
    rt::TokioExecutor,
};
use tokio::net::TcpListener;
use tower_http::{timeout::TimeoutLayer, trace::TraceLayer};

use crate::config::MeterConfig;
use crate::http::layer::MeteringLayer;
use crate::metering::Interceptor;

/// Application state injected into handlers.
#[derive(Clone)]
pub struct AppState {
    pub client: Client<HttpConnector, Body>,
    pub upstream: Authority,
}

/// HTTP server metering all traffic it forwards to one upstream.
pub struct MeterServer {
    router: Router,
    upstream: Authority,
}

impl MeterServer {
    /// Create a server for the given configuration.
    ///
    /// Fails when `upstream.address` is not a valid authority.
    pub fn new(config: &MeterConfig, interceptor: Arc<Interceptor>) -> Result<Self, InvalidUri> {
        let upstream = Authority::from_str(&config.upstream.address)?;

        let client = Client::builder(TokioExecutor::new()).build(HttpConnector::new());
        let state = AppState {
            client,
            upstream: upstream.clone(),
        };

        let router = Self::build_router(config, state, interceptor);
        Ok(Self { router, upstream })
    }

    /// Build the Axum router with all middleware layers.
    ///
    /// Timeout responses sit inside the metering layer so they are billed too.
    #[allow(deprecated)]
    fn build_router(config: &MeterConfig, state: AppState, interceptor: Arc<Interceptor>) -> Router {
        Router::new()
            .route("/{*path}", any(forward_handler))
            .route("/", any(forward_handler))
            .with_state(state)
            .layer(TimeoutLayer::new(Duration::from_secs(config.timeouts.request_secs)))
            .layer(MeteringLayer::new(interceptor))
            .layer(TraceLayer::new_for_http())
    }

    pub fn upstream(&self) -> &Authority {
        &self.upstream
    }

    /// The metered router, for embedding or in-process testing.
    pub fn into_router(self) -> Router {
        self.router
    }

    /// Run the server until Ctrl+C.
    pub async fn run(self, listener: TcpListener) -> Result<(), std::io::Error> {
        self.run_until(listener, shutdown_signal()).await
    }

    /// Run the server until `shutdown` resolves.
    pub async fn run_until<F>(self, listener: TcpListener, shutdown: F) -> Result<(), std::io::Error>
    where
        F: Future<Output = ()> + Send + 'static,
    {
        let addr = listener.local_addr()?;
        tracing::info!(
            address = %addr,
            upstream = %self.upstream,
            "Metering server starting"
        );

        axum::serve(listener, self.router)
            .with_graceful_shutdown(shutdown)
            .await?;

        tracing::info!("Metering server stopped");
        Ok(())
    }
}

/// Forward a request to the upstream, streaming the response back.
async fn forward_handler(State(state): State<AppState>, request: Request<Body>) -> Response {
    let (mut parts, body) = request.into_parts();

    let mut uri_parts = parts.uri.clone().into_parts();
    uri_parts.scheme = Some(Scheme::HTTP);
    uri_parts.authority = Some(state.upstream.clone());
    if uri_parts.path_and_query.is_none() {
        uri_parts.path_and_query = Some(PathAndQuery::from_static("/"));
    }
    parts.uri = match Uri::from_parts(uri_parts) {
        Ok(uri) => uri,
        Err(e) => {
            tracing::warn!(error = %e, "Cannot build upstream URI");
            return (StatusCode::BAD_REQUEST, "Invalid request target").into_response();
        }
    };
    // The upstream leg always speaks HTTP/1.1.
    parts.version = Version::HTTP_11;

    tracing::debug!(method = %parts.method, uri = %parts.uri, "Forwarding request");

    match state.client.request(Request::from_parts(parts, body)).await {
        Ok(response) => {
            let (parts, body) = response.into_parts();
            Response::from_parts(parts, Body::new(body))
        }
        Err(e) => {
            tracing::error!(upstream = %state.upstream, error = %e, "Upstream error");
            (StatusCode::BAD_GATEWAY, "Upstream request failed").into_response()
        }
    }
}

/// Wait for shutdown signal (Ctrl+C).
async fn shutdown_signal() {
    if let Err(e) = tokio::signal::ctrl_c().await {
        tracing::error!(error = %e, "Failed to install Ctrl+C handler");
        std::future::pending::<()>().await;
    }
    tracing::info!("Shutdown signal received");
}
