//! Traffic meter
//!
//! A metering reverse proxy built with Tokio and Axum.
//!
//! # Architecture Overview
//!
//! ```text
//!                      ┌───────────────────────────────────────────────┐
//!                      │                 TRAFFIC METER                 │
//!     Client Request   │  ┌────────┐   ┌──────────────┐   ┌─────────┐  │
//!     ─────────────────┼─▶│ server │──▶│ interceptor  │──▶│ forward │──┼──▶ Upstream
//!                      │  └────────┘   │ (count bytes)│   │ handler │  │
//!     Client Response  │               └──────┬───────┘   └─────────┘  │
//!     ◀────────────────┼──────────────────────┤                        │
//!                      │                      ▼                        │
//!                      │              ┌──────────────┐                 │
//!                      │              │   reporter   │─────────────────┼──▶ Broker
//!                      │              └──────────────┘                 │
//!                      └───────────────────────────────────────────────┘
//! ```

use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;

use clap::Parser;
use tokio::net::TcpListener;

use traffic_meter::accounting::{BrokerAddress, BrokerGateway, ConsumptionReporter};
use traffic_meter::config::{read_config, validate_config, ConfigError, MeterConfig};
use traffic_meter::http::MeterServer;
use traffic_meter::metering::Interceptor;
use traffic_meter::observability::{self, DiagnosticSink, Fanout, MetricsSink, TracingSink};

#[derive(Parser)]
#[command(name = "traffic-meter")]
#[command(about = "Metering reverse proxy reporting per-workload traffic", long_about = None)]
struct Cli {
    /// TOML configuration file
    #[arg(short, long)]
    config: Option<PathBuf>,

    /// Workload billed for the traffic (overrides the config file)
    #[arg(short, long)]
    workload_id: Option<String>,

    /// Broker address, `unix:///path` or `tcp://host:port`
    #[arg(short, long)]
    broker: Option<String>,
}

impl Cli {
    fn apply(&self, config: &mut MeterConfig) {
        if let Some(workload_id) = &self.workload_id {
            config.workload_id = workload_id.clone();
        }
        if let Some(broker) = &self.broker {
            config.broker.address = broker.clone();
        }
    }
}

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    let cli = Cli::parse();

    let mut config = match &cli.config {
        Some(path) => read_config(path)?,
        None => MeterConfig::default(),
    };
    cli.apply(&mut config);
    validate_config(&config).map_err(ConfigError::Validation)?;

    observability::logging::init(&config.observability.log_filter);
    tracing::info!("traffic-meter v{} starting", env!("CARGO_PKG_VERSION"));

    tracing::info!(
        workload_id = %config.workload_id,
        bind_address = %config.listener.bind_address,
        upstream = %config.upstream.address,
        broker = %config.broker.address,
        "Configuration loaded"
    );

    let mut sinks: Vec<Arc<dyn DiagnosticSink>> = vec![Arc::new(TracingSink)];
    if config.observability.metrics_enabled {
        let addr = config.observability.metrics_address.parse()?;
        observability::metrics::init_metrics(addr)?;
        sinks.push(Arc::new(MetricsSink));
    }
    let diagnostics: Arc<dyn DiagnosticSink> = Arc::new(Fanout::new(sinks));

    let broker: BrokerAddress = config.broker.address.parse()?;
    let gateway = match BrokerGateway::connect(
        broker.clone(),
        Duration::from_secs(config.broker.connect_timeout_secs),
    )
    .await
    {
        Ok(gateway) => gateway,
        Err(e) => {
            tracing::error!(broker = %broker, error = %e, "Cannot reach accounting broker");
            return Err(e.into());
        }
    };
    tracing::info!(broker = %broker, "Connected to accounting broker");

    let reporter = ConsumptionReporter::new(
        Arc::new(gateway),
        Duration::from_secs(config.reporter.timeout_secs),
        config.reporter.max_in_flight,
        diagnostics.clone(),
    );
    let interceptor = Arc::new(Interceptor::new(
        config.workload_id.clone(),
        reporter,
        diagnostics,
    )?);

    let listener = TcpListener::bind(&config.listener.bind_address).await?;
    let server = MeterServer::new(&config, interceptor)?;
    server.run(listener).await?;

    tracing::info!("Shutdown complete");
    Ok(())
}
