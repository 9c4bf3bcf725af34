//! Cancellable background loop shared by both reactor families.
//!
//! A [`Polling`] owns one spawned task that keeps invoking a unit of work:
//!
//! - work returned `Ok(true)`: something was processed, run again immediately
//! - work returned `Ok(false)`: nothing happened, wait `interval` first
//! - work failed or panicked: log it, wait `interval`, keep going
//!
//! The loop never inspects errors. Work units own their recovery; a work unit
//! that wants the loop gone cancels the token it was handed.

use crate::error::ReactorError;
use futures::FutureExt;
use std::any::Any;
use std::future::Future;
use std::panic::AssertUnwindSafe;
use std::time::Duration;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, warn};

/// How long `stop` waits for the loop before aborting the task.
pub const DEFAULT_STOP_TIMEOUT: Duration = Duration::from_secs(30);

/// Single background loop with graceful and forced cancellation.
pub struct Polling {
    name: String,
    interval: Duration,
    stop_timeout: Duration,
    token: Option<CancellationToken>,
    handle: Option<JoinHandle<()>>,
}

impl Polling {
    /// Create a stopped loop that waits `interval` after idle iterations.
    pub fn new(name: impl Into<String>, interval: Duration) -> Self {
        Self {
            name: name.into(),
            interval,
            stop_timeout: DEFAULT_STOP_TIMEOUT,
            token: None,
            handle: None,
        }
    }

    /// Set how long `stop` waits before aborting the task
    pub fn with_stop_timeout(mut self, timeout: Duration) -> Self {
        self.stop_timeout = timeout;
        self
    }

    /// Loop name used in logs
    pub fn name(&self) -> &str {
        &self.name
    }

    /// Wait between idle iterations
    pub fn interval(&self) -> Duration {
        self.interval
    }

    /// Whether the background task exists and has not exited on its own.
    pub fn is_started(&self) -> bool {
        self.handle.as_ref().is_some_and(|handle| !handle.is_finished())
    }

    /// Spawn the loop. Returns `false` without doing anything when it already runs.
    ///
    /// Must be called from within a Tokio runtime.
    pub fn start<F, Fut>(&mut self, mut work: F) -> bool
    where
        F: FnMut(CancellationToken) -> Fut + Send + 'static,
        Fut: Future<Output = Result<bool, ReactorError>> + Send + 'static,
    {
        if self.is_started() {
            debug!(polling = %self.name, "Polling already started");
            return false;
        }

        // A loop that cancelled itself leaves a finished handle behind.
        self.handle = None;

        let token = CancellationToken::new();
        let loop_token = token.clone();
        let name = self.name.clone();
        let interval = self.interval;

        let handle = tokio::spawn(async move {
            debug!(polling = %name, interval_ms = %interval.as_millis(), "Polling loop started");

            while !loop_token.is_cancelled() {
                let outcome = AssertUnwindSafe(work(loop_token.clone()))
                    .catch_unwind()
                    .await;

                let processed = match outcome {
                    Ok(Ok(processed)) => processed,
                    Ok(Err(e)) => {
                        warn!(polling = %name, error = %e, "Polling work unit failed");
                        false
                    }
                    Err(panic) => {
                        error!(
                            polling = %name,
                            panic = %panic_message(panic.as_ref()),
                            "Polling work unit panicked"
                        );
                        false
                    }
                };

                if processed {
                    // Drain bursts without starving other tasks on this worker.
                    tokio::task::yield_now().await;
                    continue;
                }

                tokio::select! {
                    biased;
                    _ = loop_token.cancelled() => break,
                    _ = tokio::time::sleep(interval) => {}
                }
            }

            debug!(polling = %name, "Polling loop exited");
        });

        self.token = Some(token);
        self.handle = Some(handle);
        true
    }

    /// Cancel the loop and wait (bounded) until the task has exited.
    ///
    /// Idempotent.
    pub async fn stop(&mut self) {
        if let Some(token) = self.token.take() {
            token.cancel();
        }

        let Some(mut handle) = self.handle.take() else {
            return;
        };

        match tokio::time::timeout(self.stop_timeout, &mut handle).await {
            Ok(Ok(())) => debug!(polling = %self.name, "Polling stopped"),
            Ok(Err(e)) => warn!(polling = %self.name, error = %e, "Polling task ended abnormally"),
            Err(_) => {
                warn!(
                    polling = %self.name,
                    timeout_ms = %self.stop_timeout.as_millis(),
                    "Polling loop did not exit in time, aborting"
                );
                handle.abort();
            }
        }
    }

    /// Same as [`stop`](Self::stop).
    pub async fn dispose(&mut self) {
        self.stop().await;
    }
}

impl Drop for Polling {
    fn drop(&mut self) {
        if let Some(token) = self.token.take() {
            token.cancel();
        }
        if let Some(handle) = self.handle.take() {
            if !handle.is_finished() {
                debug!(polling = %self.name, "Polling dropped while running, aborting task");
                handle.abort();
            }
        }
    }
}

/// Best-effort text of a panic payload.
pub(crate) fn panic_message(payload: &(dyn Any + Send)) -> String {
    if let Some(message) = payload.downcast_ref::<&str>() {
        (*message).to_string()
    } else if let Some(message) = payload.downcast_ref::<String>() {
        message.clone()
    } else {
        "non-string panic payload".to_string()
    }
}
