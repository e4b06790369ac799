//! Prometheus metrics for the request/reply engine.
//!
//! This module provides metric collection for:
//! - Outgoing calls (count, latency, timeouts, remote errors)
//! - The correlation table (pending calls, orphan replies)
//! - The publish path (published messages, publish errors)
//! - The consumer loop (malformed messages, dispatched requests)
//!
//! # Example
//!
//! ```rust,no_run
//! use onboarding_rpc_runtime::metrics::MetricsServer;
//!
//! # fn example() -> Result<(), Box<dyn std::error::Error>> {
//! let mut exporter = MetricsServer::new("127.0.0.1:0".parse()?);
//! exporter.start()?;
//!
//! if let Some(text) = exporter.render() {
//!     println!("{text}");
//! }
//! # Ok(())
//! # }
//! ```

use metrics::{describe_counter, describe_gauge, describe_histogram};
use metrics_exporter_prometheus::{Matcher, PrometheusBuilder, PrometheusHandle};
use std::net::SocketAddr;
use std::time::Duration;
use thiserror::Error;

pub use metrics::{counter, gauge, histogram};

/// Errors from metrics operations.
#[derive(Error, Debug)]
pub enum MetricsError {
    /// The exporter configuration was rejected
    #[error("invalid metrics exporter configuration: {0}")]
    Build(String),
    /// The recorder or its listener could not be installed
    #[error("cannot install metrics exporter: {0}")]
    Install(String),
}

/// Prometheus exporter for the engine's metrics.
///
/// [`start`](Self::start) only installs the recorder and keeps a handle for
/// [`render`](Self::render); [`serve`](Self::serve) also answers scrapes on
/// `addr`.
pub struct MetricsServer {
    addr: SocketAddr,
    handle: Option<PrometheusHandle>,
}

impl MetricsServer {
    /// Exporter for scrapes on `addr`. Nothing is installed until
    /// [`start`](Self::start) or [`serve`](Self::serve).
    #[must_use]
    pub const fn new(addr: SocketAddr) -> Self {
        Self { addr, handle: None }
    }

    /// Install the global recorder without a listener.
    ///
    /// # Errors
    ///
    /// Returns error if the exporter cannot be built or installed.
    ///
    /// A recorder installed earlier (e.g., by another test) is not an error;
    /// this instance then has no handle and [`render`](Self::render) is `None`.
    pub fn start(&mut self) -> Result<(), MetricsError> {
        match Self::builder()?.install_recorder() {
            Ok(handle) => {
                self.handle = Some(handle);
                tracing::info!("Metrics recorder installed");
                Ok(())
            }
            Err(e) => {
                let message = e.to_string();
                if message.contains("already initialized") {
                    tracing::warn!("Metrics recorder already installed, keeping the existing one");
                    Ok(())
                } else {
                    Err(MetricsError::Install(message))
                }
            }
        }
    }

    /// Install the global recorder and answer Prometheus scrapes on `addr`.
    ///
    /// Must be called from within a Tokio runtime; the listener runs on it.
    ///
    /// # Errors
    ///
    /// Returns error if the exporter cannot be built, the address cannot be
    /// bound or a recorder is already installed.
    pub fn serve(&self) -> Result<(), MetricsError> {
        Self::builder()?
            .with_http_listener(self.addr)
            .install()
            .map_err(|e| MetricsError::Install(e.to_string()))?;
        tracing::info!(addr = %self.addr, "Serving Prometheus metrics");
        Ok(())
    }

    fn builder() -> Result<PrometheusBuilder, MetricsError> {
        register_metrics();
        PrometheusBuilder::new()
            .set_buckets_for_metric(
                Matcher::Suffix("duration_seconds".to_string()),
                &[0.001, 0.005, 0.01, 0.025, 0.05, 0.1, 0.25, 0.5, 1.0, 2.5, 5.0, 10.0],
            )
            .map_err(|e| MetricsError::Build(e.to_string()))
    }

    /// Scrape address.
    #[must_use]
    pub const fn addr(&self) -> SocketAddr {
        self.addr
    }

    /// Current exposition text, if [`start`](Self::start) installed the recorder.
    #[must_use]
    pub fn render(&self) -> Option<String> {
        self.handle.as_ref().map(PrometheusHandle::render)
    }
}

/// Describe every metric the engine records.
fn register_metrics() {
    // Calls
    describe_counter!("rpc_calls_total", "Total number of outgoing broker calls");
    describe_counter!(
        "rpc_call_timeouts_total",
        "Total number of outgoing calls that timed out waiting for a reply"
    );
    describe_counter!(
        "rpc_remote_errors_total",
        "Total number of replies carrying an error payload"
    );
    describe_histogram!(
        "rpc_call_duration_seconds",
        "Time from registering a call to receiving its reply"
    );

    // Correlation table
    describe_gauge!("rpc_pending_calls", "Calls currently waiting for a reply");
    describe_counter!(
        "rpc_orphan_replies_total",
        "Total number of replies with no waiting caller"
    );

    // Publish path
    describe_counter!(
        "rpc_messages_published_total",
        "Total number of envelopes published to the broker"
    );
    describe_counter!(
        "rpc_publish_errors_total",
        "Total number of envelopes the broker refused"
    );

    // Consumer loop
    describe_counter!(
        "rpc_malformed_messages_total",
        "Total number of deliveries that could not be parsed"
    );
    describe_counter!(
        "rpc_requests_dispatched_total",
        "Total number of inbound requests routed through the dispatch table"
    );
    describe_histogram!(
        "rpc_dispatch_duration_seconds",
        "Time taken by a dispatch table handler"
    );
}

/// Outgoing call metrics recorder.
pub struct CallMetrics;

impl CallMetrics {
    /// Record a call that received a reply.
    pub fn record_completed(operation: &str, duration: Duration) {
        counter!("rpc_calls_total", "operation" => operation.to_string()).increment(1);
        histogram!("rpc_call_duration_seconds", "operation" => operation.to_string())
            .record(duration.as_secs_f64());
    }

    /// Record a call that timed out.
    pub fn record_timeout(operation: &str) {
        counter!("rpc_calls_total", "operation" => operation.to_string()).increment(1);
        counter!("rpc_call_timeouts_total", "operation" => operation.to_string()).increment(1);
    }

    /// Record an error reply.
    pub fn record_remote_error(operation: &str) {
        counter!("rpc_remote_errors_total", "operation" => operation.to_string()).increment(1);
    }
}

/// Correlation table metrics recorder.
pub struct CorrelationMetrics;

impl CorrelationMetrics {
    /// Record the current number of pending calls.
    #[allow(clippy::cast_precision_loss)] // Table size is far below 2^53
    pub fn record_pending(pending: usize) {
        gauge!("rpc_pending_calls").set(pending as f64);
    }

    /// Record a reply that found no waiting caller.
    pub fn record_orphan() {
        counter!("rpc_orphan_replies_total").increment(1);
    }
}

/// Publish path metrics recorder.
pub struct PublishMetrics;

impl PublishMetrics {
    /// Record a published envelope.
    pub fn record_published(kind: &'static str) {
        counter!("rpc_messages_published_total", "kind" => kind).increment(1);
    }

    /// Record a refused publish.
    pub fn record_error(kind: &'static str) {
        counter!("rpc_publish_errors_total", "kind" => kind).increment(1);
    }
}

/// Consumer loop metrics recorder.
pub struct ConsumerMetrics;

impl ConsumerMetrics {
    /// Record a delivery that could not be parsed.
    pub fn record_malformed() {
        counter!("rpc_malformed_messages_total").increment(1);
    }

    /// Record a dispatched request.
    pub fn record_dispatch(operation: &str, duration: Duration) {
        counter!("rpc_requests_dispatched_total", "operation" => operation.to_string())
            .increment(1);
        histogram!("rpc_dispatch_duration_seconds", "operation" => operation.to_string())
            .record(duration.as_secs_f64());
    }
}
