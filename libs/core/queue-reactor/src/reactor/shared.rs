//! State and plumbing shared by both reactor families.

use super::{NeedReconnect, ReactorKind, ReactorParts, ReactorState, ReactorStatus};
use crate::adapter::{QueueAdapter, Repliable};
use crate::config::{QueueConfig, ReactorConfig};
use crate::context::{CallContext, CallContextAccessor, ContextScope};
use crate::diagnostics::{DiagnosticGate, HealthEvents, SubscriptionId};
use crate::dispatch;
use crate::error::ReactorError;
use crate::handler::{HandlerSet, ReplyChannel};
use crate::message::Message;
use crate::metrics::ReactorMetrics;
use crate::polling::panic_message;
use futures::FutureExt;
use std::future::Future;
use std::panic::AssertUnwindSafe;
use std::sync::atomic::{AtomicBool, AtomicU32, Ordering};
use std::sync::{Arc, Mutex as StdMutex, MutexGuard};
use std::time::{Duration, Instant};
use tokio::sync::{Mutex, broadcast};
use tracing::{Instrument, debug, info, warn};

const RECONNECT_CHANNEL_CAPACITY: usize = 64;

pub(crate) struct ReactorCore {
    pub(crate) queue: QueueConfig,
    pub(crate) kind: ReactorKind,
    pub(crate) config: ReactorConfig,
    pub(crate) adapter: Mutex<Box<dyn QueueAdapter>>,
    /// Held for the duration of one push delivery.
    pub(crate) in_flight: Mutex<()>,
    /// Reply sender of reply reactors, taken from the adapter at construction.
    pub(crate) replier: Option<Arc<dyn Repliable>>,
    pub(crate) metrics: ReactorMetrics,
    handlers: HandlerSet,
    state: StdMutex<ReactorState>,
    error_count: AtomicU32,
    gate: Arc<DiagnosticGate>,
    health: Option<Arc<dyn HealthEvents>>,
    health_subscription: StdMutex<Option<SubscriptionId>>,
    reconnect_tx: broadcast::Sender<NeedReconnect>,
    context: Arc<dyn CallContextAccessor>,
    disposed: AtomicBool,
}

impl ReactorCore {
    pub(crate) fn new(parts: ReactorParts, kind: ReactorKind) -> Self {
        let queue = parts.adapter.configuration().clone();
        let (reconnect_tx, _) = broadcast::channel(RECONNECT_CHANNEL_CAPACITY);
        let replier = match kind {
            ReactorKind::SubscribeAndReply => parts.adapter.replies(),
            _ => None,
        };

        Self {
            metrics: ReactorMetrics::new(queue.id.clone(), kind.into()),
            queue,
            kind,
            config: parts.config,
            adapter: Mutex::new(parts.adapter),
            in_flight: Mutex::new(()),
            replier,
            handlers: parts.handlers,
            state: StdMutex::new(ReactorState::Idle),
            error_count: AtomicU32::new(0),
            gate: Arc::new(DiagnosticGate::default()),
            health: parts.health,
            health_subscription: StdMutex::new(None),
            reconnect_tx,
            context: parts.context,
            disposed: AtomicBool::new(false),
        }
    }

    pub(crate) fn queue_id(&self) -> &str {
        &self.queue.id
    }

    pub(crate) fn state(&self) -> ReactorState {
        *self.lock_state()
    }

    /// Disposed is terminal.
    pub(crate) fn set_state(&self, next: ReactorState) {
        let mut state = self.lock_state();
        let previous = *state;
        if previous == next || previous == ReactorState::Disposed {
            return;
        }
        debug!(queue = %self.queue.id, from = %previous, to = %next, "Reactor state changed");
        *state = next;
        self.metrics.state_changed(next.as_ref());
    }

    /// Enter `Listening` unless a stop got there first.
    pub(crate) fn mark_listening(&self) {
        let mut state = self.lock_state();
        let previous = *state;
        if matches!(previous, ReactorState::Starting | ReactorState::Backoff) {
            debug!(queue = %self.queue.id, from = %previous, "Reactor listening");
            *state = ReactorState::Listening;
            self.metrics.state_changed(ReactorState::Listening.as_ref());
        }
    }

    fn lock_state(&self) -> MutexGuard<'_, ReactorState> {
        self.state.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
    }

    pub(crate) fn error_count(&self) -> u32 {
        self.error_count.load(Ordering::SeqCst)
    }

    /// Increment the consecutive error count and return the new value.
    pub(crate) fn record_error(&self) -> u32 {
        let count = self.error_count.fetch_add(1, Ordering::SeqCst).saturating_add(1);
        self.metrics.error_count(count);
        count
    }

    pub(crate) fn reset_errors(&self) {
        if self.error_count.swap(0, Ordering::SeqCst) > 0 {
            self.metrics.error_count(0);
        }
    }

    pub(crate) fn is_disposed(&self) -> bool {
        self.disposed.load(Ordering::SeqCst)
    }

    /// Returns `true` for the first caller only.
    pub(crate) fn mark_disposed(&self) -> bool {
        !self.disposed.swap(true, Ordering::SeqCst)
    }

    pub(crate) fn diagnostics_paused(&self) -> bool {
        self.queue.health_dependent && self.gate.is_closed()
    }

    pub(crate) fn subscribe_health(&self) {
        if !self.queue.health_dependent {
            return;
        }
        let Some(health) = &self.health else {
            debug!(queue = %self.queue.id, "Queue is health dependent but no health source is configured");
            return;
        };

        let mut subscription = self.lock_subscription();
        if subscription.is_some() {
            return;
        }
        self.gate.set_closed(health.is_failing());
        *subscription = Some(health.subscribe(self.gate.clone()));
        debug!(queue = %self.queue.id, "Subscribed to health diagnostics");
    }

    pub(crate) fn unsubscribe_health(&self) {
        let Some(id) = self.lock_subscription().take() else {
            return;
        };
        if let Some(health) = &self.health {
            if let Err(e) = health.unsubscribe(id) {
                warn!(queue = %self.queue.id, error = %e, "Failed to unsubscribe from health diagnostics");
            }
        }
    }

    fn lock_subscription(&self) -> MutexGuard<'_, Option<SubscriptionId>> {
        self.health_subscription
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
    }

    pub(crate) fn subscribe_reconnect(&self) -> broadcast::Receiver<NeedReconnect> {
        self.reconnect_tx.subscribe()
    }

    /// Best effort; nobody listening is not an error.
    pub(crate) fn notify_need_reconnect(&self, error_count: u32, delay: Duration, reason: String) {
        let event = NeedReconnect {
            queue_id: self.queue.id.clone(),
            error_count,
            delay,
            reason,
        };
        if self.reconnect_tx.send(event).is_err() {
            debug!(queue = %self.queue.id, "No need-reconnect subscribers");
        }
    }

    pub(crate) fn status(&self) -> ReactorStatus {
        ReactorStatus {
            queue_id: self.queue.id.clone(),
            kind: self.kind,
            state: self.state(),
            error_count: self.error_count(),
            diagnostics_failing: self.diagnostics_paused(),
        }
    }

    pub(crate) async fn dispatch(&self, message: &Message) -> Result<bool, ReactorError> {
        self.scoped(message, dispatch::dispatch(message, &self.handlers))
            .await
    }

    pub(crate) async fn dispatch_with_reply(
        &self,
        message: &Message,
        reply: &ReplyChannel,
    ) -> Result<bool, ReactorError> {
        self.scoped(
            message,
            dispatch::dispatch_with_reply(message, &self.handlers, reply),
        )
        .await
    }

    /// Run one dispatch inside the message's context and span, turning a
    /// handler panic into a message-level error.
    async fn scoped<F>(&self, message: &Message, work: F) -> Result<bool, ReactorError>
    where
        F: Future<Output = Result<bool, ReactorError>>,
    {
        let context = CallContext::from_message(message);
        let span = context.span(&self.queue.id);
        let _scope = ContextScope::enter(self.context.as_ref(), &context);

        self.metrics.message_received();
        let started = Instant::now();

        let outcome = match AssertUnwindSafe(work).catch_unwind().instrument(span).await {
            Ok(outcome) => outcome,
            Err(panic) => Err(ReactorError::HandlerPanicked(panic_message(panic.as_ref()))),
        };

        self.metrics.dispatch_finished(&outcome, started.elapsed());
        outcome
    }

    pub(crate) fn log_started(&self) {
        info!(
            queue = %self.queue.id,
            kind = %self.kind,
            interval_ms = self.queue.poll_interval_ms,
            health_dependent = self.queue.health_dependent,
            "Reactor started"
        );
    }
}
