//! Broker-backed accounting gateway.
//!
//! The broker is any process speaking the framing below on a Unix or TCP
//! socket. It is not a Redis endpoint.
//!
//! # Wire Format
//! One JSON object per line in each direction:
//! ```text
//! → {"id":7,"module":"gateway","object":{"name":"manager","version":"0.0.1"},
//!    "method":"ReportConsumption","args":["wl-1",1200,640]}
//! ← {"id":7,"error":null}
//! ```
//!
//! # Design Decisions
//! - One connection per gateway, calls serialized by an async mutex
//! - A connection that fails mid-call is discarded; the next report dials a
//!   fresh one (the failed report itself is not retried)
//! - `connect` dials eagerly so an unreachable broker fails startup

use std::fmt;
use std::path::PathBuf;
use std::str::FromStr;
use std::sync::atomic::{AtomicU64, Ordering};
use std::time::Duration;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use tokio::io::{AsyncBufReadExt, AsyncRead, AsyncWrite, AsyncWriteExt, BufReader};
use tokio::net::TcpStream;
use tokio::sync::Mutex;
use url::Url;

use crate::accounting::gateway::{Gateway, GatewayError};

/// Well-known local broker socket.
pub const DEFAULT_BROKER_ADDRESS: &str = "unix:///var/run/traffic-meter/broker.sock";

const MODULE: &str = "gateway";
const OBJECT_NAME: &str = "manager";
const OBJECT_VERSION: &str = "0.0.1";
const REPORT_CONSUMPTION: &str = "ReportConsumption";

/// Where the broker listens.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum BrokerAddress {
    /// `unix:///path/to/socket`
    Unix(PathBuf),
    /// `tcp://host:port`
    Tcp(String),
}

impl FromStr for BrokerAddress {
    type Err = GatewayError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let invalid = |reason: &str| GatewayError::InvalidAddress {
            address: s.to_string(),
            reason: reason.to_string(),
        };

        let url = Url::parse(s).map_err(|e| invalid(&e.to_string()))?;
        match url.scheme() {
            "unix" => {
                // `unix://var/run/x.sock` would read `var` as a host.
                if url.host_str().is_some_and(|host| !host.is_empty()) {
                    return Err(invalid("unix address must be unix:///absolute/path"));
                }
                if url.path().is_empty() || url.path() == "/" {
                    return Err(invalid("missing socket path"));
                }
                Ok(BrokerAddress::Unix(PathBuf::from(url.path())))
            }
            "tcp" => {
                let host = url.host_str().ok_or_else(|| invalid("missing host"))?;
                let port = url.port().ok_or_else(|| invalid("missing port"))?;
                Ok(BrokerAddress::Tcp(format!("{}:{}", host, port)))
            }
            other => Err(invalid(&format!("unsupported scheme {:?}", other))),
        }
    }
}

impl fmt::Display for BrokerAddress {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            BrokerAddress::Unix(path) => write!(f, "unix://{}", path.display()),
            BrokerAddress::Tcp(addr) => write!(f, "tcp://{}", addr),
        }
    }
}

#[derive(Debug, Serialize)]
struct ObjectId<'a> {
    name: &'a str,
    version: &'a str,
}

#[derive(Debug, Serialize)]
struct RequestFrame<'a, A> {
    id: u64,
    module: &'a str,
    object: ObjectId<'a>,
    method: &'a str,
    args: A,
}

#[derive(Debug, Deserialize)]
struct ReplyFrame {
    id: u64,
    #[serde(default)]
    error: Option<String>,
}

type BoxedReader = BufReader<Box<dyn AsyncRead + Send + Unpin>>;
type BoxedWriter = Box<dyn AsyncWrite + Send + Unpin>;

struct Connection {
    reader: BoxedReader,
    writer: BoxedWriter,
}

impl Connection {
    async fn open(address: &BrokerAddress, timeout: Duration) -> Result<Self, GatewayError> {
        let connect_error = |source: std::io::Error| GatewayError::Connect {
            address: address.to_string(),
            source,
        };
        let timed_out = || {
            connect_error(std::io::Error::new(
                std::io::ErrorKind::TimedOut,
                "connect timed out",
            ))
        };

        let (reader, writer): (Box<dyn AsyncRead + Send + Unpin>, BoxedWriter) = match address {
            BrokerAddress::Tcp(addr) => {
                let stream = tokio::time::timeout(timeout, TcpStream::connect(addr))
                    .await
                    .map_err(|_| timed_out())?
                    .map_err(connect_error)?;
                stream.set_nodelay(true).map_err(connect_error)?;
                let (read, write) = stream.into_split();
                (Box::new(read), Box::new(write))
            }
            #[cfg(unix)]
            BrokerAddress::Unix(path) => {
                let stream = tokio::time::timeout(timeout, tokio::net::UnixStream::connect(path))
                    .await
                    .map_err(|_| timed_out())?
                    .map_err(connect_error)?;
                let (read, write) = stream.into_split();
                (Box::new(read), Box::new(write))
            }
            #[cfg(not(unix))]
            BrokerAddress::Unix(_) => {
                return Err(GatewayError::InvalidAddress {
                    address: address.to_string(),
                    reason: "unix sockets are not available on this platform".to_string(),
                });
            }
        };

        tracing::debug!(broker = %address, "Connected to broker");
        Ok(Self {
            reader: BufReader::new(reader),
            writer,
        })
    }

    async fn call<A: Serialize>(
        &mut self,
        frame: &RequestFrame<'_, A>,
    ) -> Result<ReplyFrame, GatewayError> {
        let mut line = serde_json::to_vec(frame)?;
        line.push(b'\n');
        self.writer.write_all(&line).await?;
        self.writer.flush().await?;

        let mut reply = String::new();
        if self.reader.read_line(&mut reply).await? == 0 {
            return Err(GatewayError::Closed);
        }
        Ok(serde_json::from_str(reply.trim_end())?)
    }
}

/// [`Gateway`] reached through the broker.
pub struct BrokerGateway {
    address: BrokerAddress,
    connect_timeout: Duration,
    connection: Mutex<Option<Connection>>,
    next_id: AtomicU64,
}

impl BrokerGateway {
    /// Dial the broker. Fails when it cannot be reached.
    pub async fn connect(
        address: BrokerAddress,
        connect_timeout: Duration,
    ) -> Result<Self, GatewayError> {
        let connection = Connection::open(&address, connect_timeout).await?;
        Ok(Self {
            address,
            connect_timeout,
            connection: Mutex::new(Some(connection)),
            next_id: AtomicU64::new(1),
        })
    }

    pub fn address(&self) -> &BrokerAddress {
        &self.address
    }

    async fn invoke<A: Serialize + Sync>(&self, method: &str, args: A) -> Result<(), GatewayError> {
        let frame = RequestFrame {
            id: self.next_id.fetch_add(1, Ordering::Relaxed),
            module: MODULE,
            object: ObjectId {
                name: OBJECT_NAME,
                version: OBJECT_VERSION,
            },
            method,
            args,
        };

        let mut slot = self.connection.lock().await;
        let mut connection = match slot.take() {
            Some(connection) => connection,
            None => Connection::open(&self.address, self.connect_timeout).await?,
        };

        let reply = match connection.call(&frame).await {
            Ok(reply) => reply,
            Err(e) => {
                tracing::debug!(broker = %self.address, error = %e, "Dropping broker connection");
                return Err(e);
            }
        };
        if reply.id != frame.id {
            return Err(GatewayError::OutOfSync {
                expected: frame.id,
                got: reply.id,
            });
        }
        *slot = Some(connection);
        drop(slot);

        match reply.error {
            Some(message) => Err(GatewayError::Remote(message)),
            None => Ok(()),
        }
    }
}

#[async_trait]
impl Gateway for BrokerGateway {
    async fn report_consumption(
        &self,
        workload_id: &str,
        sent: u64,
        received: u64,
    ) -> Result<(), GatewayError> {
        self.invoke(REPORT_CONSUMPTION, (workload_id, sent, received))
            .await
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::Value;
    use tokio::net::TcpListener;
    use tokio::sync::mpsc;

    /// Accepts connections and answers every frame with `reply(frame)`.
    /// Each accepted connection serves at most `frames_per_conn` frames.
    /// Received frames are tagged with the 1-based index of their connection.
    async fn mock_broker<F>(frames_per_conn: usize, reply: F) -> (String, mpsc::UnboundedReceiver<Value>)
    where
        F: Fn(&Value) -> Value + Send + Sync + Copy + 'static,
    {
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();
        let (tx, rx) = mpsc::unbounded_channel();

        tokio::spawn(async move {
            let mut accepted = 0u64;
            while let Ok((socket, _)) = listener.accept().await {
                accepted += 1;
                let connection = accepted;
                let tx = tx.clone();
                tokio::spawn(async move {
                    let (read, mut write) = socket.into_split();
                    let mut lines = BufReader::new(read).lines();
                    for _ in 0..frames_per_conn {
                        let Ok(Some(line)) = lines.next_line().await else { break };
                        let mut frame: Value = serde_json::from_str(&line).unwrap();
                        // Test-side tag: which accepted connection carried the frame.
                        frame["connection"] = connection.into();
                        let mut out = serde_json::to_vec(&reply(&frame)).unwrap();
                        out.push(b'\n');
                        let _ = tx.send(frame);
                        if write.write_all(&out).await.is_err() {
                            break;
                        }
                    }
                });
            }
        });

        (format!("tcp://{}", addr), rx)
    }

    fn ok(frame: &Value) -> Value {
        serde_json::json!({ "id": frame["id"], "error": null })
    }

    fn rejected(frame: &Value) -> Value {
        serde_json::json!({ "id": frame["id"], "error": "unknown workload" })
    }

    #[test]
    fn parses_addresses() {
        assert_eq!(
            DEFAULT_BROKER_ADDRESS.parse::<BrokerAddress>().unwrap(),
            BrokerAddress::Unix(PathBuf::from("/var/run/traffic-meter/broker.sock"))
        );
        assert_eq!(
            "tcp://127.0.0.1:6379".parse::<BrokerAddress>().unwrap(),
            BrokerAddress::Tcp("127.0.0.1:6379".to_string())
        );
        assert_eq!(
            "tcp://127.0.0.1:6379".parse::<BrokerAddress>().unwrap().to_string(),
            "tcp://127.0.0.1:6379"
        );
    }

    #[test]
    fn rejects_bad_addresses() {
        for bad in [
            "",
            "broker.sock",
            "tcp://localhost",
            "http://localhost:80",
            "unix://",
            "unix://var/run/broker.sock",
        ] {
            assert!(
                matches!(bad.parse::<BrokerAddress>(), Err(GatewayError::InvalidAddress { .. })),
                "{bad} should be rejected"
            );
        }
    }

    #[tokio::test]
    async fn report_frame_layout() {
        let (address, mut frames) = mock_broker(usize::MAX, ok).await;
        let gateway = BrokerGateway::connect(address.parse().unwrap(), Duration::from_secs(1))
            .await
            .unwrap();

        gateway.report_consumption("wl-1", 1200, 640).await.unwrap();

        let frame = frames.recv().await.unwrap();
        assert_eq!(frame["module"], "gateway");
        assert_eq!(frame["object"]["name"], "manager");
        assert_eq!(frame["object"]["version"], "0.0.1");
        assert_eq!(frame["method"], "ReportConsumption");
        assert_eq!(frame["args"], serde_json::json!(["wl-1", 1200, 640]));
    }

    #[tokio::test]
    async fn remote_errors_surface() {
        let (address, mut frames) = mock_broker(usize::MAX, rejected).await;
        let gateway = BrokerGateway::connect(address.parse().unwrap(), Duration::from_secs(1))
            .await
            .unwrap();

        let err = gateway.report_consumption("wl-1", 1, 1).await.unwrap_err();
        assert!(matches!(err, GatewayError::Remote(ref m) if m == "unknown workload"));

        // The connection survives an application-level error.
        let err = gateway.report_consumption("wl-1", 2, 2).await.unwrap_err();
        assert!(matches!(err, GatewayError::Remote(_)));

        let first = frames.recv().await.unwrap();
        let second = frames.recv().await.unwrap();
        assert_eq!(first["connection"], 1);
        assert_eq!(second["connection"], 1);
        assert_eq!(second["args"][1], 2);
    }

    #[tokio::test]
    async fn redials_after_connection_loss() {
        let (address, mut frames) = mock_broker(1, ok).await;
        let gateway = BrokerGateway::connect(address.parse().unwrap(), Duration::from_secs(1))
            .await
            .unwrap();

        gateway.report_consumption("wl-1", 1, 1).await.unwrap();
        // The broker hung up after one frame; this call finds the dead socket.
        assert!(gateway.report_consumption("wl-1", 2, 2).await.is_err());
        gateway.report_consumption("wl-1", 3, 3).await.unwrap();

        let first = frames.recv().await.unwrap();
        let redialled = frames.recv().await.unwrap();
        assert_eq!(first["args"][1], 1);
        assert_eq!(redialled["args"][1], 3);
        assert_eq!(redialled["connection"], 2);
    }

    #[tokio::test]
    async fn unreachable_broker_fails_connect() {
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();
        drop(listener);

        let result = BrokerGateway::connect(
            format!("tcp://{}", addr).parse().unwrap(),
            Duration::from_secs(1),
        )
        .await;

        assert!(matches!(result, Err(GatewayError::Connect { .. })));
    }
}
