//! Prometheus metrics for reactors
//!
//! Provides observability into consumption, reconnects and transactions.
//! Recording is a no-op until a recorder is installed with [`init_metrics`].

use crate::error::{ErrorCategory, ReactorError};
use metrics::{counter, gauge, histogram};
use metrics_exporter_prometheus::{PrometheusBuilder, PrometheusHandle};
use once_cell::sync::OnceCell;
use std::time::Duration;
use tracing::info;

static PROMETHEUS_HANDLE: OnceCell<PrometheusHandle> = OnceCell::new();

/// Initialize Prometheus metrics
///
/// Call this once at startup. Subsequent calls are no-ops. Fails when another
/// global recorder was installed first.
pub fn init_metrics() -> Result<(), ReactorError> {
    PROMETHEUS_HANDLE.get_or_try_init(|| {
        let handle = PrometheusBuilder::new()
            .install_recorder()
            .map_err(|e| ReactorError::Internal(format!("failed to install Prometheus recorder: {e}")))?;
        info!("Prometheus metrics initialized");
        Ok::<_, ReactorError>(handle)
    })?;
    Ok(())
}

/// Get the Prometheus handle for rendering metrics
pub fn prometheus_handle() -> Option<&'static PrometheusHandle> {
    PROMETHEUS_HANDLE.get()
}

/// Render metrics in Prometheus format
pub fn render_metrics() -> String {
    prometheus_handle().map(|h| h.render()).unwrap_or_default()
}

/// Metrics helper bound to one queue
#[derive(Debug, Clone)]
pub struct ReactorMetrics {
    queue: String,
    kind: &'static str,
}

impl ReactorMetrics {
    pub fn new(queue: impl Into<String>, kind: &'static str) -> Self {
        Self {
            queue: queue.into(),
            kind,
        }
    }

    /// Record a message being received
    pub fn message_received(&self) {
        counter!(
            "queue_reactor_messages_received_total",
            "queue" => self.queue.clone(),
            "kind" => self.kind
        )
        .increment(1);
    }

    /// Record a dispatch outcome and its duration
    pub fn dispatch_finished(&self, outcome: &Result<bool, ReactorError>, duration: Duration) {
        let status = match outcome {
            Ok(true) => "processed",
            Ok(false) => "unprocessed",
            Err(_) => "failed",
        };

        counter!(
            "queue_reactor_messages_dispatched_total",
            "queue" => self.queue.clone(),
            "kind" => self.kind,
            "status" => status
        )
        .increment(1);

        if let Err(e) = outcome {
            self.error(e.category());
        }

        histogram!(
            "queue_reactor_dispatch_duration_seconds",
            "queue" => self.queue.clone(),
            "kind" => self.kind
        )
        .record(duration.as_secs_f64());
    }

    /// Record an error by category
    pub fn error(&self, category: ErrorCategory) {
        counter!(
            "queue_reactor_errors_total",
            "queue" => self.queue.clone(),
            "kind" => self.kind,
            "category" => category.as_str()
        )
        .increment(1);
    }

    /// Record a forced reconnect
    pub fn reconnect(&self) {
        counter!(
            "queue_reactor_reconnects_total",
            "queue" => self.queue.clone(),
            "kind" => self.kind
        )
        .increment(1);
    }

    pub fn committed(&self) {
        counter!(
            "queue_reactor_commits_total",
            "queue" => self.queue.clone()
        )
        .increment(1);
    }

    pub fn rolled_back(&self) {
        counter!(
            "queue_reactor_rollbacks_total",
            "queue" => self.queue.clone()
        )
        .increment(1);
    }

    pub fn replied(&self) {
        counter!(
            "queue_reactor_replies_total",
            "queue" => self.queue.clone()
        )
        .increment(1);
    }

    /// Update consecutive error gauge
    pub fn error_count(&self, count: u32) {
        gauge!(
            "queue_reactor_consecutive_errors",
            "queue" => self.queue.clone(),
            "kind" => self.kind
        )
        .set(f64::from(count));
    }

    /// Record reactor state change
    pub fn state_changed(&self, state: &str) {
        counter!(
            "queue_reactor_state_transitions_total",
            "queue" => self.queue.clone(),
            "kind" => self.kind,
            "state" => state.to_string()
        )
        .increment(1);
    }
}
