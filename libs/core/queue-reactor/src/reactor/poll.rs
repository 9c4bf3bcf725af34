//! Pull-model reactor.
//!
//! One [`Polling`] loop repeatedly connects, receives with the queue's poll
//! interval as timeout, and dispatches. Receive and dispatch happen under the
//! adapter lock, so at most one message is in flight per reactor.
//!
//! The transacted variant commits after every dispatch that did not fail
//! systemically, including handler failures (poison messages leave the queue),
//! and rolls back when the failure is systemic so the broker redelivers.

use super::shared::ReactorCore;
use super::{NeedReconnect, Reactor, ReactorKind, ReactorParts, ReactorState, ReactorStatus};
use crate::adapter::QueueAdapter;
use crate::error::ReactorError;
use crate::message::Message;
use crate::polling::Polling;
use async_trait::async_trait;
use std::sync::Arc;
use tokio::sync::{Mutex, broadcast};
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, warn};

pub struct PollReactor {
    core: Arc<ReactorCore>,
    polling: Mutex<Polling>,
}

impl PollReactor {
    /// Plain poll reactor. Messages are acknowledged by the receive itself.
    pub fn new(parts: ReactorParts) -> Self {
        Self::build(parts, ReactorKind::Poll)
    }

    /// Poll reactor that commits or rolls back after each dispatch.
    pub fn transacted(mut parts: ReactorParts) -> Result<Self, ReactorError> {
        if parts.adapter.transactions().is_none() {
            return Err(ReactorError::Unsupported(format!(
                "queue '{}': adapter does not support transactions",
                parts.adapter.configuration().id
            )));
        }
        Ok(Self::build(parts, ReactorKind::TransactedPoll))
    }

    fn build(parts: ReactorParts, kind: ReactorKind) -> Self {
        let core = Arc::new(ReactorCore::new(parts, kind));
        let polling = Polling::new(format!("poll:{}", core.queue_id()), core.queue.poll_interval())
            .with_stop_timeout(core.config.stop_timeout);

        Self {
            core,
            polling: Mutex::new(polling),
        }
    }

    /// One receive cycle. Returns `true` when the loop should run again
    /// without waiting.
    ///
    /// Normally driven by the reactor's own loop; exposed for hosts that
    /// schedule receives themselves.
    pub async fn listen_once(&self, token: &CancellationToken) -> Result<bool, ReactorError> {
        listen_once(&self.core, token).await
    }
}

async fn listen_once(core: &ReactorCore, token: &CancellationToken) -> Result<bool, ReactorError> {
    if core.diagnostics_paused() {
        debug!(queue = %core.queue_id(), "Diagnostics failing, skipping receive");
        return Ok(false);
    }

    let mut adapter = core.adapter.lock().await;
    match receive_and_dispatch(core, adapter.as_mut()).await {
        Ok(processed) => Ok(processed),
        Err(e) => recover(core, adapter.as_mut(), token, e).await,
    }
}

async fn receive_and_dispatch(
    core: &ReactorCore,
    adapter: &mut dyn QueueAdapter,
) -> Result<bool, ReactorError> {
    if !adapter.is_connected() {
        adapter.connect().await?;
        debug!(queue = %core.queue_id(), "Adapter connected");
    }
    core.mark_listening();

    let Some(message) = adapter.try_receive(core.queue.poll_interval()).await? else {
        core.reset_errors();
        return Ok(false);
    };

    handle_received(core, adapter, message).await?;
    core.reset_errors();
    Ok(true)
}

async fn handle_received(
    core: &ReactorCore,
    adapter: &mut dyn QueueAdapter,
    message: Message,
) -> Result<(), ReactorError> {
    let outcome = core.dispatch(&message).await;
    let classifier = &core.config.classifier;

    let transactions = match core.kind {
        ReactorKind::TransactedPoll => adapter.transactions(),
        _ => None,
    };

    let Some(transactions) = transactions else {
        return match outcome {
            Ok(_) => Ok(()),
            Err(e) if classifier.is_systemic(&e) => Err(e),
            Err(e) => {
                warn!(queue = %core.queue_id(), message_id = %message.id, error = %e, "Handler failed, message dropped");
                Ok(())
            }
        };
    };

    match outcome {
        Ok(_) => {
            transactions.commit_if_transacted(Some(&message)).await?;
            core.metrics.committed();
            Ok(())
        }
        Err(e) if !classifier.is_systemic(&e) => {
            warn!(
                queue = %core.queue_id(),
                message_id = %message.id,
                error = %e,
                "Handler failed, committing poison message"
            );
            transactions.commit_if_transacted(Some(&message)).await?;
            core.metrics.committed();
            Ok(())
        }
        Err(e) => {
            match transactions.rollback_if_transacted().await {
                Ok(()) => core.metrics.rolled_back(),
                Err(rollback) => {
                    error!(queue = %core.queue_id(), error = %rollback, "Rollback failed")
                }
            }
            Err(e)
        }
    }
}

/// Error path of one receive cycle: back off, announce, reconnect.
async fn recover(
    core: &ReactorCore,
    adapter: &mut dyn QueueAdapter,
    token: &CancellationToken,
    error: ReactorError,
) -> Result<bool, ReactorError> {
    let classifier = &core.config.classifier;
    let starting = core.state() == ReactorState::Starting;

    // Only a reactor that never reached `Listening` gives up; afterwards every
    // failure, whatever its category, goes through backoff and reconnect.
    if starting && !classifier.is_retryable_on_start(&error) {
        error!(queue = %core.queue_id(), error = %error, "Non-retryable start failure, stopping reactor");
        core.metrics.error(error.category());
        core.unsubscribe_health();
        core.set_state(ReactorState::Stopped);
        token.cancel();
        return Ok(false);
    }

    let error_count = core.record_error();
    core.metrics.error(error.category());
    core.set_state(ReactorState::Backoff);

    let delay = core.config.backoff.delay_for(error_count);
    warn!(
        queue = %core.queue_id(),
        error = %error,
        error_count,
        delay_ms = %delay.as_millis(),
        "Receive failed, reconnecting after backoff"
    );

    tokio::select! {
        biased;
        _ = token.cancelled() => return Ok(false),
        _ = tokio::time::sleep(delay) => {}
    }

    core.notify_need_reconnect(error_count, delay, error.to_string());
    core.metrics.reconnect();

    if let Err(e) = adapter.disconnect().await {
        debug!(queue = %core.queue_id(), error = %e, "Disconnect before reconnect failed");
    }
    match adapter.connect().await {
        Ok(()) => {
            info!(queue = %core.queue_id(), error_count, "Reconnected");
            core.mark_listening();
        }
        Err(e) => {
            warn!(queue = %core.queue_id(), error = %e, "Reconnect failed, retrying on next receive");
        }
    }

    // Skip the idle wait, the backoff delay was already taken.
    Ok(true)
}

#[async_trait]
impl Reactor for PollReactor {
    fn queue_id(&self) -> &str {
        self.core.queue_id()
    }

    fn kind(&self) -> ReactorKind {
        self.core.kind
    }

    fn state(&self) -> ReactorState {
        self.core.state()
    }

    fn error_count(&self) -> u32 {
        self.core.error_count()
    }

    fn need_reconnect(&self) -> broadcast::Receiver<NeedReconnect> {
        self.core.subscribe_reconnect()
    }

    fn status(&self) -> ReactorStatus {
        self.core.status()
    }

    async fn start_processing(&self) -> bool {
        if self.core.is_disposed() {
            warn!(queue = %self.core.queue_id(), "Cannot start a disposed reactor");
            return false;
        }

        let mut polling = self.polling.lock().await;
        if polling.is_started() {
            debug!(queue = %self.core.queue_id(), "Reactor already started");
            return true;
        }

        self.core.set_state(ReactorState::Starting);
        self.core.subscribe_health();

        if !self.core.diagnostics_paused() {
            let mut adapter = self.core.adapter.lock().await;
            if !adapter.is_connected() {
                if let Err(e) = adapter.connect().await {
                    let classifier = &self.core.config.classifier;
                    if !classifier.is_retryable_on_start(&e) {
                        error!(queue = %self.core.queue_id(), error = %e, "Initial connect failed, not retrying");
                        self.core.unsubscribe_health();
                        self.core.set_state(ReactorState::Stopped);
                        return false;
                    }
                    let error_count = self.core.record_error();
                    self.core.set_state(ReactorState::Backoff);
                    warn!(queue = %self.core.queue_id(), error = %e, error_count, "Initial connect failed, will retry");
                }
            }
        }

        let core = self.core.clone();
        polling.start(move |token| {
            let core = core.clone();
            async move { listen_once(&core, &token).await }
        });

        self.core.log_started();
        true
    }

    async fn stop(&self) {
        self.core.unsubscribe_health();
        self.polling.lock().await.stop().await;

        let mut adapter = self.core.adapter.lock().await;
        if let Err(e) = adapter.disconnect().await {
            warn!(queue = %self.core.queue_id(), error = %e, "Disconnect failed during stop");
        }
        drop(adapter);

        self.core.set_state(ReactorState::Stopped);
        info!(queue = %self.core.queue_id(), "Reactor stopped");
    }

    async fn dispose(&self) {
        if !self.core.mark_disposed() {
            return;
        }

        self.stop().await;
        if let Err(e) = self.core.adapter.lock().await.dispose().await {
            warn!(queue = %self.core.queue_id(), error = %e, "Adapter dispose failed");
        }
        self.core.set_state(ReactorState::Disposed);
    }
}

impl Drop for PollReactor {
    fn drop(&mut self) {
        // Polling aborts its own task on drop; only the health subscription is left.
        if !matches!(self.core.state(), ReactorState::Stopped | ReactorState::Disposed | ReactorState::Idle) {
            warn!(queue = %self.core.queue_id(), "Reactor dropped without stop");
            self.core.unsubscribe_health();
        }
    }
}
