//! Shared utilities for integration testing.

#![allow(dead_code)]

use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use axum::body::Body;
use axum::http::{header, HeaderValue, Request};
use http_body_util::BodyExt;
use hyper_util::rt::TokioIo;
use serde_json::Value;
use tokio::io::{AsyncBufReadExt, AsyncReadExt, AsyncWriteExt, BufReader};
use tokio::net::TcpListener;
use tokio::sync::mpsc;

use traffic_meter::accounting::{ConsumptionReporter, Gateway, GatewayError};
use traffic_meter::metering::{BoxError, Downstream, Interceptor, ResponseSink};
use traffic_meter::observability::NoopSink;

/// One report as seen by a gateway.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Report {
    pub workload_id: String,
    pub sent: u64,
    pub received: u64,
}

/// Gateway forwarding every report into a channel.
pub struct RecordingGateway(mpsc::UnboundedSender<Report>);

impl RecordingGateway {
    pub fn new() -> (Self, mpsc::UnboundedReceiver<Report>) {
        let (tx, rx) = mpsc::unbounded_channel();
        (Self(tx), rx)
    }
}

#[async_trait]
impl Gateway for RecordingGateway {
    async fn report_consumption(
        &self,
        workload_id: &str,
        sent: u64,
        received: u64,
    ) -> Result<(), GatewayError> {
        let _ = self.0.send(Report {
            workload_id: workload_id.to_string(),
            sent,
            received,
        });
        Ok(())
    }
}

/// Gateway rejecting every report.
pub struct FailingGateway;

#[async_trait]
impl Gateway for FailingGateway {
    async fn report_consumption(&self, _: &str, _: u64, _: u64) -> Result<(), GatewayError> {
        Err(GatewayError::Remote("broker unavailable".to_string()))
    }
}

/// Gateway that never answers.
pub struct HangingGateway;

#[async_trait]
impl Gateway for HangingGateway {
    async fn report_consumption(&self, _: &str, _: u64, _: u64) -> Result<(), GatewayError> {
        std::future::pending().await
    }
}

/// Build an interceptor for `workload_id` reporting through `gateway`.
pub fn interceptor(workload_id: &str, gateway: impl Gateway + 'static) -> Arc<Interceptor> {
    let reporter = ConsumptionReporter::new(
        Arc::new(gateway),
        Duration::from_secs(5),
        64,
        Arc::new(NoopSink),
    );
    Arc::new(Interceptor::new(workload_id, reporter, Arc::new(NoopSink)).unwrap())
}

/// Downstream writing the request body back verbatim.
pub struct Echo;

#[async_trait]
impl Downstream for Echo {
    async fn serve(
        &self,
        response: &mut dyn ResponseSink,
        request: Request<Body>,
    ) -> Result<(), BoxError> {
        let body = request.into_body().collect().await?.to_bytes();
        response.write(body).await?;
        Ok(())
    }
}

/// Start a mock upstream that answers every connection with `response`.
///
/// The request line and header lines of every request it sees are forwarded
/// to the returned channel.
pub async fn start_mock_backend(
    response: &'static str,
) -> (SocketAddr, mpsc::UnboundedReceiver<Vec<String>>) {
    let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
    let addr = listener.local_addr().unwrap();
    let (tx, rx) = mpsc::unbounded_channel();

    tokio::spawn(async move {
        while let Ok((socket, _)) = listener.accept().await {
            let tx = tx.clone();
            tokio::spawn(async move {
                let (read, mut write) = socket.into_split();
                let mut reader = BufReader::new(read);

                // Consume the whole request before answering.
                let mut head = Vec::new();
                let mut content_length = 0;
                let mut line = String::new();
                loop {
                    line.clear();
                    match reader.read_line(&mut line).await {
                        Ok(0) | Err(_) => return,
                        Ok(_) => {}
                    }
                    let header = line.trim_end();
                    if header.is_empty() {
                        break;
                    }
                    if let Some((name, value)) = header.split_once(':') {
                        if name.eq_ignore_ascii_case("content-length") {
                            content_length = value.trim().parse().unwrap_or(0);
                        }
                    }
                    head.push(header.to_string());
                }
                let _ = tx.send(head);
                let mut body = vec![0; content_length];
                if reader.read_exact(&mut body).await.is_err() {
                    return;
                }

                let response_str = format!(
                    "HTTP/1.1 200 OK\r\nContent-Length: {}\r\nConnection: close\r\n\r\n{}",
                    response.len(),
                    response
                );
                let _ = write.write_all(response_str.as_bytes()).await;
                let _ = write.shutdown().await;
            });
        }
    });

    (addr, rx)
}

/// Downstream accepting an `Upgrade: echo` request, then echoing the first
/// four bytes sent over the upgraded connection.
pub struct EchoUpgrade;

#[async_trait]
impl Downstream for EchoUpgrade {
    async fn serve(
        &self,
        response: &mut dyn ResponseSink,
        _request: Request<Body>,
    ) -> Result<(), BoxError> {
        response
            .headers_mut()
            .insert(header::CONNECTION, HeaderValue::from_static("upgrade"));
        response
            .headers_mut()
            .insert(header::UPGRADE, HeaderValue::from_static("echo"));
        let upgrade = response.hijack()?;

        tokio::spawn(async move {
            let Ok(upgraded) = upgrade.await else { return };
            let mut io = TokioIo::new(upgraded);
            let mut buf = [0u8; 4];
            if io.read_exact(&mut buf).await.is_ok() {
                let _ = io.write_all(&buf).await;
            }
        });
        Ok(())
    }
}

/// Start a mock broker acknowledging every frame; received frames are
/// forwarded to the returned channel.
pub async fn start_mock_broker() -> (String, mpsc::UnboundedReceiver<Value>) {
    let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
    let addr = listener.local_addr().unwrap();
    let (tx, rx) = mpsc::unbounded_channel();

    tokio::spawn(async move {
        while let Ok((socket, _)) = listener.accept().await {
            let tx = tx.clone();
            tokio::spawn(async move {
                let (read, mut write) = socket.into_split();
                let mut lines = BufReader::new(read).lines();
                while let Ok(Some(line)) = lines.next_line().await {
                    let frame: Value = serde_json::from_str(&line).unwrap();
                    let mut reply = serde_json::to_vec(&serde_json::json!({ "id": frame["id"] })).unwrap();
                    reply.push(b'\n');
                    let _ = tx.send(frame);
                    if write.write_all(&reply).await.is_err() {
                        break;
                    }
                }
            });
        }
    });

    (format!("tcp://{}", addr), rx)
}
