//! Queue and reactor configuration
//!
//! `QueueConfig` belongs to the adapter and describes one queue.
//! `ReactorConfig` carries the tuning knobs shared by every reactor the
//! factory builds.

use crate::backoff::{BackoffPolicy, ReconnectBackoff};
use crate::classify::{DefaultFailureClassifier, FailureClassifier};
use crate::error::ReactorError;
use crate::polling::DEFAULT_STOP_TIMEOUT;
use core_config::reactor::ReactorSettings;
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use std::time::Duration;
use strum::{AsRefStr, Display, EnumIter, EnumString};

/// Default cadence of subscribe-mode health checks and handshake retries.
pub const DEFAULT_RECONNECT_TIMEOUT: Duration = Duration::from_secs(5);

/// How a queue delivers messages
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default)]
#[derive(Display, AsRefStr, EnumString, EnumIter, Serialize, Deserialize)]
#[strum(serialize_all = "snake_case")]
#[serde(rename_all = "snake_case")]
pub enum ProcessingMode {
    /// Reactor pulls with a receive timeout
    #[default]
    Poll,
    /// Adapter pushes into a registered callback
    Subscribe,
    /// Push delivery where handlers answer the sender
    SubscribeAndReply,
}

/// Configuration of one queue, owned by its adapter
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct QueueConfig {
    /// Queue identifier handlers are registered against
    pub id: String,

    /// Delivery mode
    #[serde(default)]
    pub processing_mode: ProcessingMode,

    /// Receive timeout and idle wait in poll mode
    pub poll_interval_ms: u64,

    /// Pause consumption while health diagnostics are failing
    #[serde(default)]
    pub health_dependent: bool,
}

impl QueueConfig {
    /// Create a poll-mode queue with a 1s poll interval
    pub fn new(id: impl Into<String>) -> Self {
        Self {
            id: id.into(),
            processing_mode: ProcessingMode::Poll,
            poll_interval_ms: 1000,
            health_dependent: false,
        }
    }

    /// Set the processing mode
    pub fn with_processing_mode(mut self, mode: ProcessingMode) -> Self {
        self.processing_mode = mode;
        self
    }

    /// Set the poll interval
    pub fn with_poll_interval_ms(mut self, interval: u64) -> Self {
        self.poll_interval_ms = interval;
        self
    }

    /// Make consumption depend on health diagnostics
    pub fn with_health_dependent(mut self, health_dependent: bool) -> Self {
        self.health_dependent = health_dependent;
        self
    }

    pub fn poll_interval(&self) -> Duration {
        Duration::from_millis(self.poll_interval_ms)
    }

    pub fn validate(&self) -> Result<(), ReactorError> {
        if self.id.trim().is_empty() {
            return Err(ReactorError::config("queue id must not be empty"));
        }
        if self.poll_interval_ms == 0 {
            return Err(ReactorError::config(format!(
                "queue '{}': poll interval must be greater than zero",
                self.id
            )));
        }
        Ok(())
    }
}

/// Tuning shared by every reactor a factory builds
#[derive(Debug, Clone)]
pub struct ReactorConfig {
    /// Subscribe-mode health check cadence and handshake retry delay
    pub reconnect_timeout: Duration,

    /// Reconnect delay policy for poll reactors
    pub backoff: Arc<dyn ReconnectBackoff>,

    /// How long stop waits for a background loop before aborting it
    pub stop_timeout: Duration,

    /// Decides rollback vs commit and retry vs abort
    pub classifier: Arc<dyn FailureClassifier>,
}

impl ReactorConfig {
    /// Set the reconnect timeout
    pub fn with_reconnect_timeout(mut self, timeout: Duration) -> Self {
        self.reconnect_timeout = timeout;
        self
    }

    /// Replace the backoff policy
    pub fn with_backoff(mut self, backoff: impl ReconnectBackoff + 'static) -> Self {
        self.backoff = Arc::new(backoff);
        self
    }

    /// Set the stop timeout
    pub fn with_stop_timeout(mut self, timeout: Duration) -> Self {
        self.stop_timeout = timeout;
        self
    }

    /// Replace the failure classifier
    pub fn with_classifier(mut self, classifier: impl FailureClassifier + 'static) -> Self {
        self.classifier = Arc::new(classifier);
        self
    }
}

impl Default for ReactorConfig {
    fn default() -> Self {
        Self {
            reconnect_timeout: DEFAULT_RECONNECT_TIMEOUT,
            backoff: Arc::new(BackoffPolicy::default()),
            stop_timeout: DEFAULT_STOP_TIMEOUT,
            classifier: Arc::new(DefaultFailureClassifier),
        }
    }
}

impl From<ReactorSettings> for ReactorConfig {
    fn from(settings: ReactorSettings) -> Self {
        Self::default()
            .with_reconnect_timeout(Duration::from_millis(settings.reconnect_timeout_ms))
            .with_backoff(BackoffPolicy::new(
                settings.backoff_threshold,
                Duration::from_millis(settings.backoff_base_ms),
                Duration::from_millis(settings.backoff_max_ms),
            ))
            .with_stop_timeout(Duration::from_millis(settings.stop_timeout_ms))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_processing_mode_strings() {
        assert_eq!(ProcessingMode::SubscribeAndReply.to_string(), "subscribe_and_reply");
        let mode: ProcessingMode = "subscribe".parse().unwrap();
        assert_eq!(mode, ProcessingMode::Subscribe);
        assert!("push".parse::<ProcessingMode>().is_err());
    }

    #[test]
    fn test_queue_config_deserialization() {
        let config: QueueConfig = serde_json::from_str(
            r#"{"id":"orders","processing_mode":"subscribe_and_reply","poll_interval_ms":250}"#,
        )
        .unwrap();

        assert_eq!(config.processing_mode, ProcessingMode::SubscribeAndReply);
        assert_eq!(config.poll_interval(), Duration::from_millis(250));
        assert!(!config.health_dependent);
    }

    #[test]
    fn test_queue_config_validation() {
        assert!(QueueConfig::new("orders").validate().is_ok());

        let err = QueueConfig::new("  ").validate().unwrap_err();
        assert!(matches!(err, ReactorError::Config(_)));

        let err = QueueConfig::new("orders")
            .with_poll_interval_ms(0)
            .validate()
            .unwrap_err();
        assert!(err.to_string().contains("orders"));
    }

    #[test]
    fn test_reactor_config_defaults() {
        let config = ReactorConfig::default();
        assert_eq!(config.reconnect_timeout, Duration::from_secs(5));
        assert_eq!(config.stop_timeout, Duration::from_secs(30));
        assert_eq!(config.backoff.delay_for(1), Duration::from_millis(600));
        assert_eq!(config.backoff.delay_for(100), Duration::from_secs(60));
    }

    #[test]
    fn test_from_settings() {
        let settings = ReactorSettings {
            reconnect_timeout_ms: 250,
            backoff_threshold: 2,
            backoff_base_ms: 10,
            backoff_max_ms: 40,
            stop_timeout_ms: 1000,
        };

        let config = ReactorConfig::from(settings);
        assert_eq!(config.reconnect_timeout, Duration::from_millis(250));
        assert_eq!(config.stop_timeout, Duration::from_secs(1));
        assert_eq!(config.backoff.delay_for(2), Duration::from_millis(10));
        assert_eq!(config.backoff.delay_for(9), Duration::from_millis(40));
    }
}
