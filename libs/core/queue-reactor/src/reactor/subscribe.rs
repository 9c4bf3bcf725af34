//! Push-model reactor.
//!
//! Connect and subscribe form a one-time handshake, retried every
//! `reconnect_timeout` while failures are retryable. After a successful start a
//! health-check loop re-runs the handshake whenever the adapter reports it is no
//! longer connected, which heals disconnects the push channel cannot signal.
//!
//! Deliveries are serialized through the core's in-flight lock. They never take
//! the adapter lock: `stop` holds it across `unsubscribe` and the handshake
//! holds it across `subscribe`, and adapters may wait on or run deliveries
//! inside either call. Replies go through the adapter's shared reply sender.

use super::shared::ReactorCore;
use super::{NeedReconnect, Reactor, ReactorKind, ReactorParts, ReactorState, ReactorStatus};
use crate::adapter::MessageListener;
use crate::error::ReactorError;
use crate::handler::ReplyChannel;
use crate::message::Message;
use crate::polling::Polling;
use async_trait::async_trait;
use std::sync::{Arc, Mutex as StdMutex, MutexGuard, Weak};
use tokio::sync::{Mutex, broadcast};
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, warn};

pub struct SubscribeReactor {
    core: Arc<ReactorCore>,
    health_check: Mutex<Polling>,
    startup: StdMutex<Startup>,
    lifecycle: Mutex<()>,
}

impl SubscribeReactor {
    /// Plain subscribe reactor.
    pub fn new(mut parts: ReactorParts) -> Result<Self, ReactorError> {
        if parts.adapter.subscriptions().is_none() {
            return Err(ReactorError::Unsupported(format!(
                "queue '{}': adapter does not support subscriptions",
                parts.adapter.configuration().id
            )));
        }
        Ok(Self::build(parts, ReactorKind::Subscribe))
    }

    /// Subscribe reactor whose handlers answer through the adapter's reply channel.
    pub fn with_reply(mut parts: ReactorParts) -> Result<Self, ReactorError> {
        let queue_id = parts.adapter.configuration().id.clone();
        if parts.adapter.subscriptions().is_none() {
            return Err(ReactorError::Unsupported(format!(
                "queue '{queue_id}': adapter does not support subscriptions"
            )));
        }
        if parts.adapter.replies().is_none() {
            return Err(ReactorError::Unsupported(format!(
                "queue '{queue_id}': adapter does not support replies"
            )));
        }
        Ok(Self::build(parts, ReactorKind::SubscribeAndReply))
    }

    fn build(parts: ReactorParts, kind: ReactorKind) -> Self {
        let core = Arc::new(ReactorCore::new(parts, kind));
        let health_check = Polling::new(
            format!("reconnect-check:{}", core.queue_id()),
            core.config.reconnect_timeout,
        )
        .with_stop_timeout(core.config.stop_timeout);

        Self {
            core,
            health_check: Mutex::new(health_check),
            startup: StdMutex::new(Startup::default()),
            lifecycle: Mutex::new(()),
        }
    }

    /// Handle one pushed message the way the subscription callback does.
    pub async fn on_message(&self, message: Message) -> Result<(), ReactorError> {
        deliver(&self.core, message).await
    }

    fn lock_startup(&self) -> MutexGuard<'_, Startup> {
        self.startup
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
    }

    /// Token for a start that entered when `stops` stops had been requested,
    /// or `None` when a stop arrived since.
    fn begin_startup(&self, stops: u64) -> Option<CancellationToken> {
        let mut startup = self.lock_startup();
        if startup.stops != stops {
            return None;
        }
        startup.token = CancellationToken::new();
        Some(startup.token.clone())
    }

    fn cancel_startup(&self) {
        let mut startup = self.lock_startup();
        startup.stops += 1;
        startup.token.cancel();
    }
}

/// Cancels a handshake retry loop still running inside `start_processing`.
///
/// `stops` counts stop requests so a start that was still waiting for the
/// lifecycle lock when a stop came in gives up instead of arming a fresh token
/// nobody will cancel.
#[derive(Default)]
struct Startup {
    token: CancellationToken,
    stops: u64,
}

/// Listener handed to the adapter. Holds the core weakly so an adapter that
/// outlives its reactor cannot keep it alive.
struct SubscriptionListener {
    core: Weak<ReactorCore>,
}

#[async_trait]
impl MessageListener for SubscriptionListener {
    async fn on_message(&self, message: Message) -> Result<(), ReactorError> {
        match self.core.upgrade() {
            Some(core) => deliver(&core, message).await,
            None => {
                debug!(message_id = %message.id, "Reactor gone, dropping delivery");
                Ok(())
            }
        }
    }
}

async fn deliver(core: &ReactorCore, message: Message) -> Result<(), ReactorError> {
    let _in_flight = core.in_flight.lock().await;

    if matches!(core.state(), ReactorState::Stopped | ReactorState::Disposed) {
        debug!(queue = %core.queue_id(), message_id = %message.id, "Reactor stopped, ignoring delivery");
        return Ok(());
    }

    let outcome = match core.kind {
        ReactorKind::SubscribeAndReply => process_and_reply(core, &message).await,
        _ => core.dispatch(&message).await,
    };

    match outcome {
        Ok(_) => {
            core.reset_errors();
            Ok(())
        }
        Err(e @ ReactorError::Reply(_)) => {
            error!(queue = %core.queue_id(), message_id = %message.id, error = %e, "Reply failed");
            Err(e)
        }
        Err(e) => {
            warn!(queue = %core.queue_id(), message_id = %message.id, error = %e, "Handler failed");
            Ok(())
        }
    }
}

/// Dispatch to repliable handlers, then forward every reply they emitted.
async fn process_and_reply(core: &ReactorCore, message: &Message) -> Result<bool, ReactorError> {
    let channel = ReplyChannel::for_request(message);
    let outcome = core.dispatch_with_reply(message, &channel).await;

    let replies = channel.drain();
    if !replies.is_empty() {
        let Some(replier) = &core.replier else {
            return Err(ReactorError::reply("adapter cannot send replies"));
        };
        for reply in replies {
            replier.reply(reply).await.map_err(|e| match e {
                ReactorError::Reply(_) => e,
                other => ReactorError::reply(other.to_string()),
            })?;
            core.metrics.replied();
        }
    }

    outcome
}

/// Connect (if needed) and subscribe.
async fn handshake(core: &Arc<ReactorCore>) -> Result<(), ReactorError> {
    if core.diagnostics_paused() {
        return Err(ReactorError::DiagnosticsFailing);
    }

    let mut adapter = core.adapter.lock().await;
    if !adapter.is_connected() {
        adapter.connect().await?;
    }

    let listener: Arc<dyn MessageListener> = Arc::new(SubscriptionListener {
        core: Arc::downgrade(core),
    });
    let Some(subscriptions) = adapter.subscriptions() else {
        return Err(ReactorError::Unsupported("adapter does not support subscriptions".to_string()));
    };

    if let Err(e) = subscriptions.subscribe(listener).await {
        if let Err(disconnect) = adapter.disconnect().await {
            debug!(queue = %core.queue_id(), error = %disconnect, "Disconnect after failed subscribe failed");
        }
        return Err(e);
    }

    debug!(queue = %core.queue_id(), "Subscribed");
    Ok(())
}

/// One health-check tick. Always reports "nothing processed" so the loop
/// keeps its cadence.
async fn check_connection(core: &Arc<ReactorCore>) -> Result<bool, ReactorError> {
    if core.diagnostics_paused() {
        debug!(queue = %core.queue_id(), "Diagnostics failing, skipping reconnect check");
        return Ok(false);
    }
    if core.adapter.lock().await.is_connected() {
        return Ok(false);
    }

    let error_count = core.record_error();
    core.set_state(ReactorState::Backoff);
    core.notify_need_reconnect(
        error_count,
        core.config.reconnect_timeout,
        "adapter disconnected".to_string(),
    );
    core.metrics.reconnect();
    warn!(queue = %core.queue_id(), error_count, "Adapter disconnected, resubscribing");

    match handshake(core).await {
        Ok(()) => {
            core.reset_errors();
            core.mark_listening();
            info!(queue = %core.queue_id(), "Resubscribed");
        }
        Err(e) => {
            core.metrics.error(e.category());
            warn!(queue = %core.queue_id(), error = %e, "Resubscribe failed, retrying on next check");
        }
    }

    Ok(false)
}

#[async_trait]
impl Reactor for SubscribeReactor {
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

        let stops = self.lock_startup().stops;
        let _lifecycle = self.lifecycle.lock().await;
        if self.health_check.lock().await.is_started() {
            debug!(queue = %self.core.queue_id(), "Reactor already started");
            return true;
        }

        let Some(token) = self.begin_startup(stops) else {
            info!(queue = %self.core.queue_id(), "Start cancelled");
            return false;
        };
        self.core.set_state(ReactorState::Starting);
        self.core.subscribe_health();

        loop {
            let error = match handshake(&self.core).await {
                Ok(()) => break,
                Err(e) => e,
            };

            let classifier = &self.core.config.classifier;
            if !classifier.is_retryable_on_start(&error) {
                error!(queue = %self.core.queue_id(), error = %error, "Subscribe failed, not retrying");
                self.core.metrics.error(error.category());
                self.core.unsubscribe_health();
                self.core.set_state(ReactorState::Stopped);
                return false;
            }

            let error_count = self.core.record_error();
            self.core.set_state(ReactorState::Backoff);
            warn!(
                queue = %self.core.queue_id(),
                error = %error,
                error_count,
                retry_in_ms = %self.core.config.reconnect_timeout.as_millis(),
                "Subscribe failed, retrying"
            );

            tokio::select! {
                biased;
                _ = token.cancelled() => {
                    info!(queue = %self.core.queue_id(), "Start cancelled");
                    return false;
                }
                _ = tokio::time::sleep(self.core.config.reconnect_timeout) => {}
            }
        }

        self.core.reset_errors();
        self.core.mark_listening();

        let core = self.core.clone();
        self.health_check.lock().await.start(move |_token| {
            let core = core.clone();
            async move { check_connection(&core).await }
        });

        self.core.log_started();
        true
    }

    async fn stop(&self) {
        self.cancel_startup();
        let _lifecycle = self.lifecycle.lock().await;

        self.core.unsubscribe_health();
        self.health_check.lock().await.dispose().await;

        {
            let mut adapter = self.core.adapter.lock().await;
            if let Some(subscriptions) = adapter.subscriptions() {
                if let Err(e) = subscriptions.unsubscribe().await {
                    warn!(queue = %self.core.queue_id(), error = %e, "Unsubscribe failed during stop");
                }
            }
        }

        // A delivery that already started finishes before the connection goes.
        let _in_flight = self.core.in_flight.lock().await;
        self.core.set_state(ReactorState::Stopped);

        let mut adapter = self.core.adapter.lock().await;
        if let Err(e) = adapter.disconnect().await {
            warn!(queue = %self.core.queue_id(), error = %e, "Disconnect failed during stop");
        }

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

impl Drop for SubscribeReactor {
    fn drop(&mut self) {
        self.cancel_startup();
        if !matches!(self.core.state(), ReactorState::Stopped | ReactorState::Disposed | ReactorState::Idle) {
            warn!(queue = %self.core.queue_id(), "Reactor dropped without stop");
            self.core.unsubscribe_health();
        }
    }
}
