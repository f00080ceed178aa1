//! Consumption reporter.
//!
//! # Responsibilities
//! - Hand each exchange's totals to the gateway off the request path
//! - Bound every report by a timeout and the number of reports in flight
//!
//! # Design Decisions
//! - A timed-out report is abandoned, not undone: the gateway future is
//!   dropped and whatever the remote side already recorded stays recorded
//! - When the in-flight limit is reached new reports are dropped rather than
//!   queued, so a stalled backend cannot grow memory without bound

use std::sync::Arc;
use std::time::Duration;

use tokio::runtime::Handle;
use tokio::sync::Semaphore;
use tokio::task::JoinHandle;

use crate::accounting::gateway::Gateway;
use crate::metering::WorkloadId;
use crate::observability::{DiagnosticSink, MeterEvent};

/// Default time a single report may take before it is abandoned.
pub const DEFAULT_REPORT_TIMEOUT: Duration = Duration::from_secs(60);

/// Default number of reports allowed in flight at once.
pub const DEFAULT_MAX_IN_FLIGHT: usize = 1024;

/// Final totals of one exchange.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Consumption {
    pub workload_id: WorkloadId,
    pub sent: u64,
    pub received: u64,
}

/// How a dispatched report ended.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ReportOutcome {
    Delivered,
    Failed,
    TimedOut,
}

impl ReportOutcome {
    pub fn as_str(&self) -> &'static str {
        match self {
            ReportOutcome::Delivered => "delivered",
            ReportOutcome::Failed => "failed",
            ReportOutcome::TimedOut => "timed_out",
        }
    }
}

/// Why a report was never dispatched.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DropReason {
    /// Too many reports already in flight.
    Saturated,
    /// Called outside a Tokio runtime.
    NoRuntime,
}

impl DropReason {
    pub fn as_str(&self) -> &'static str {
        match self {
            DropReason::Saturated => "saturated",
            DropReason::NoRuntime => "no_runtime",
        }
    }
}

/// Fire-and-forget client of the accounting [`Gateway`].
#[derive(Clone)]
pub struct ConsumptionReporter {
    gateway: Arc<dyn Gateway>,
    timeout: Duration,
    in_flight: Arc<Semaphore>,
    diagnostics: Arc<dyn DiagnosticSink>,
}

impl ConsumptionReporter {
    pub fn new(
        gateway: Arc<dyn Gateway>,
        timeout: Duration,
        max_in_flight: usize,
        diagnostics: Arc<dyn DiagnosticSink>,
    ) -> Self {
        Self {
            gateway,
            timeout,
            in_flight: Arc::new(Semaphore::new(max_in_flight.min(Semaphore::MAX_PERMITS))),
            diagnostics,
        }
    }

    pub fn timeout(&self) -> Duration {
        self.timeout
    }

    /// Spawn a report and return immediately.
    ///
    /// Returns `None` when the report was dropped instead. The handle may be
    /// awaited or ignored; dropping it does not cancel the report.
    pub fn dispatch(&self, consumption: Consumption) -> Option<JoinHandle<ReportOutcome>> {
        let runtime = match Handle::try_current() {
            Ok(runtime) => runtime,
            Err(_) => {
                self.dropped(&consumption, DropReason::NoRuntime);
                return None;
            }
        };

        let permit = match self.in_flight.clone().try_acquire_owned() {
            Ok(permit) => permit,
            Err(_) => {
                self.dropped(&consumption, DropReason::Saturated);
                return None;
            }
        };

        let gateway = self.gateway.clone();
        let diagnostics = self.diagnostics.clone();
        let timeout = self.timeout;

        Some(runtime.spawn(async move {
            let _permit = permit;
            let Consumption {
                workload_id,
                sent,
                received,
            } = consumption;

            let call = gateway.report_consumption(workload_id.as_str(), sent, received);
            let outcome = match tokio::time::timeout(timeout, call).await {
                Ok(Ok(())) => ReportOutcome::Delivered,
                Ok(Err(e)) => {
                    tracing::debug!(workload_id = %workload_id, error = %e, "Gateway rejected report");
                    ReportOutcome::Failed
                }
                Err(_) => ReportOutcome::TimedOut,
            };

            diagnostics.record(&MeterEvent::Report {
                workload_id: workload_id.as_str(),
                sent,
                received,
                outcome,
            });
            outcome
        }))
    }

    fn dropped(&self, consumption: &Consumption, reason: DropReason) {
        self.diagnostics.record(&MeterEvent::ReportDropped {
            workload_id: consumption.workload_id.as_str(),
            reason,
        });
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::accounting::gateway::GatewayError;
    use crate::observability::NoopSink;
    use async_trait::async_trait;
    use std::sync::atomic::{AtomicUsize, Ordering};

    struct Accepting(AtomicUsize);

    #[async_trait]
    impl Gateway for Accepting {
        async fn report_consumption(&self, _: &str, _: u64, _: u64) -> Result<(), GatewayError> {
            self.0.fetch_add(1, Ordering::SeqCst);
            Ok(())
        }
    }

    struct Rejecting;

    #[async_trait]
    impl Gateway for Rejecting {
        async fn report_consumption(&self, _: &str, _: u64, _: u64) -> Result<(), GatewayError> {
            Err(GatewayError::Remote("quota service down".into()))
        }
    }

    struct Hanging;

    #[async_trait]
    impl Gateway for Hanging {
        async fn report_consumption(&self, _: &str, _: u64, _: u64) -> Result<(), GatewayError> {
            std::future::pending().await
        }
    }

    fn consumption() -> Consumption {
        Consumption {
            workload_id: WorkloadId::new("wl").unwrap(),
            sent: 10,
            received: 20,
        }
    }

    fn reporter(gateway: Arc<dyn Gateway>, timeout: Duration, max: usize) -> ConsumptionReporter {
        ConsumptionReporter::new(gateway, timeout, max, Arc::new(NoopSink))
    }

    #[tokio::test]
    async fn delivers_report() {
        let gateway = Arc::new(Accepting(AtomicUsize::new(0)));
        let reporter = reporter(gateway.clone(), DEFAULT_REPORT_TIMEOUT, 4);

        let outcome = reporter.dispatch(consumption()).unwrap().await.unwrap();

        assert_eq!(outcome, ReportOutcome::Delivered);
        assert_eq!(gateway.0.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn gateway_errors_are_absorbed() {
        let reporter = reporter(Arc::new(Rejecting), DEFAULT_REPORT_TIMEOUT, 4);

        let outcome = reporter.dispatch(consumption()).unwrap().await.unwrap();

        assert_eq!(outcome, ReportOutcome::Failed);
    }

    #[tokio::test(start_paused = true)]
    async fn hanging_gateway_times_out() {
        let reporter = reporter(Arc::new(Hanging), Duration::from_secs(60), 4);

        let outcome = reporter.dispatch(consumption()).unwrap().await.unwrap();

        assert_eq!(outcome, ReportOutcome::TimedOut);
    }

    #[tokio::test(start_paused = true)]
    async fn saturated_reporter_drops_and_recovers() {
        let reporter = reporter(Arc::new(Hanging), Duration::from_secs(5), 1);

        let first = reporter.dispatch(consumption()).unwrap();
        assert!(reporter.dispatch(consumption()).is_none());

        assert_eq!(first.await.unwrap(), ReportOutcome::TimedOut);
        assert!(reporter.dispatch(consumption()).is_some());
    }

    #[test]
    fn outside_runtime_is_dropped() {
        let reporter = reporter(Arc::new(Rejecting), DEFAULT_REPORT_TIMEOUT, 4);
        assert!(reporter.dispatch(consumption()).is_none());
    }
}
