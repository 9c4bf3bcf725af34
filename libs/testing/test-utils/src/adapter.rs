//! In-memory adapter driven by a script.
//!
//! [`ScriptedAdapter`] is handed to a reactor; the paired [`AdapterMonitor`]
//! stays with the test to inspect what the reactor did and to push messages
//! into a subscription.

use async_trait::async_trait;
use queue_reactor::{
    AdapterProvider, Message, MessageListener, ProcessingMode, QueueAdapter, QueueConfig,
    ReactorError, Repliable, Subscribable, Transactional,
};
use std::collections::{HashMap, VecDeque};
use std::sync::atomic::{AtomicBool, AtomicU32, Ordering};
use std::sync::{Arc, Mutex, MutexGuard};
use std::time::{Duration, Instant};
use tokio::sync::Notify;

/// One scripted outcome of `try_receive`.
#[derive(Debug, Clone)]
pub enum ReceiveStep {
    Message(Message),
    Empty,
    Fail(ReactorError),
}

fn lock<T>(mutex: &Mutex<T>) -> MutexGuard<'_, T> {
    mutex.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
}

#[derive(Default)]
struct Recorder {
    connected: AtomicBool,
    connects: AtomicU32,
    disconnects: AtomicU32,
    receives: AtomicU32,
    rollbacks: AtomicU32,
    unsubscribes: AtomicU32,
    disposes: AtomicU32,
    commits: Mutex<Vec<Option<String>>>,
    replies: Mutex<Vec<Message>>,
    sent: Mutex<Vec<Message>>,
    receive_script: Mutex<VecDeque<ReceiveStep>>,
    connect_failures: Mutex<VecDeque<ReactorError>>,
    subscribe_failures: Mutex<VecDeque<ReactorError>>,
    reply_failures: Mutex<VecDeque<ReactorError>>,
    prefetched: Mutex<VecDeque<Message>>,
    listener: Mutex<Option<Arc<dyn MessageListener>>>,
    subscribe_attempts: Mutex<Vec<Instant>>,
    deliveries_in_flight: AtomicU32,
    delivery_finished: Notify,
}

impl Recorder {
    async fn wait_for_deliveries(&self) {
        loop {
            let finished = self.delivery_finished.notified();
            if self.deliveries_in_flight.load(Ordering::SeqCst) == 0 {
                return;
            }
            finished.await;
        }
    }
}

/// Queue adapter whose behavior is fixed up front by the test.
///
/// Capabilities are off by default. Once the receive script runs out every
/// receive comes back empty.
pub struct ScriptedAdapter {
    config: QueueConfig,
    transactional: bool,
    subscribable: bool,
    repliable: bool,
    drain_on_unsubscribe: bool,
    supported_modes: Option<Vec<ProcessingMode>>,
    recorder: Arc<Recorder>,
}

impl ScriptedAdapter {
    pub fn new(config: QueueConfig) -> Self {
        Self {
            config,
            transactional: false,
            subscribable: false,
            repliable: false,
            drain_on_unsubscribe: false,
            supported_modes: None,
            recorder: Arc::new(Recorder::default()),
        }
    }

    /// Handle for inspecting this adapter after it moved into a reactor.
    pub fn monitor(&self) -> AdapterMonitor {
        AdapterMonitor {
            recorder: self.recorder.clone(),
        }
    }

    pub fn transactional(mut self) -> Self {
        self.transactional = true;
        self
    }

    pub fn subscribable(mut self) -> Self {
        self.subscribable = true;
        self
    }

    pub fn repliable(mut self) -> Self {
        self.repliable = true;
        self
    }

    /// `unsubscribe` waits until every delivery pushed through the monitor has
    /// returned, like brokers that drain their callbacks on cancel.
    pub fn draining_unsubscribe(mut self) -> Self {
        self.drain_on_unsubscribe = true;
        self
    }

    /// Restrict the processing modes this adapter reports as supported.
    pub fn with_supported_modes(mut self, modes: impl IntoIterator<Item = ProcessingMode>) -> Self {
        self.supported_modes = Some(modes.into_iter().collect());
        self
    }

    pub fn with_receive_script(self, steps: impl IntoIterator<Item = ReceiveStep>) -> Self {
        lock(&self.recorder.receive_script).extend(steps);
        self
    }

    /// The next `connect` calls fail with these errors, in order.
    pub fn with_connect_failures(self, errors: impl IntoIterator<Item = ReactorError>) -> Self {
        lock(&self.recorder.connect_failures).extend(errors);
        self
    }

    /// The next `subscribe` calls fail with these errors, in order.
    pub fn with_subscribe_failures(self, errors: impl IntoIterator<Item = ReactorError>) -> Self {
        lock(&self.recorder.subscribe_failures).extend(errors);
        self
    }

    /// Messages pushed into the listener from inside `subscribe`, before it
    /// returns, like brokers that flush their prefetch buffer on subscribe.
    pub fn with_prefetched(self, messages: impl IntoIterator<Item = Message>) -> Self {
        lock(&self.recorder.prefetched).extend(messages);
        self
    }

    pub fn with_reply_failures(self, errors: impl IntoIterator<Item = ReactorError>) -> Self {
        lock(&self.recorder.reply_failures).extend(errors);
        self
    }
}

#[async_trait]
impl QueueAdapter for ScriptedAdapter {
    fn configuration(&self) -> &QueueConfig {
        &self.config
    }

    fn is_connected(&self) -> bool {
        self.recorder.connected.load(Ordering::SeqCst)
    }

    async fn connect(&mut self) -> Result<(), ReactorError> {
        if self.is_connected() {
            return Err(ReactorError::AlreadyConnected);
        }
        self.recorder.connects.fetch_add(1, Ordering::SeqCst);
        if let Some(err) = lock(&self.recorder.connect_failures).pop_front() {
            return Err(err);
        }
        self.recorder.connected.store(true, Ordering::SeqCst);
        Ok(())
    }

    async fn disconnect(&mut self) -> Result<(), ReactorError> {
        self.recorder.disconnects.fetch_add(1, Ordering::SeqCst);
        self.recorder.connected.store(false, Ordering::SeqCst);
        Ok(())
    }

    async fn try_receive(&mut self, _timeout: Duration) -> Result<Option<Message>, ReactorError> {
        if !self.is_connected() {
            return Err(ReactorError::connection("not connected"));
        }
        self.recorder.receives.fetch_add(1, Ordering::SeqCst);

        let step = lock(&self.recorder.receive_script).pop_front();
        match step {
            Some(ReceiveStep::Message(message)) => Ok(Some(message)),
            Some(ReceiveStep::Fail(err)) => Err(err),
            Some(ReceiveStep::Empty) | None => Ok(None),
        }
    }

    async fn send(&mut self, message: Message) -> Result<Message, ReactorError> {
        lock(&self.recorder.sent).push(message.clone());
        Ok(message)
    }

    fn supports_processing_mode(&self, mode: ProcessingMode) -> bool {
        if let Some(modes) = &self.supported_modes {
            return modes.contains(&mode);
        }
        match mode {
            ProcessingMode::Poll => true,
            ProcessingMode::Subscribe => self.subscribable,
            ProcessingMode::SubscribeAndReply => self.subscribable && self.repliable,
        }
    }

    async fn dispose(&mut self) -> Result<(), ReactorError> {
        self.recorder.disposes.fetch_add(1, Ordering::SeqCst);
        Ok(())
    }

    fn transactions(&mut self) -> Option<&mut dyn Transactional> {
        if self.transactional { Some(self) } else { None }
    }

    fn subscriptions(&mut self) -> Option<&mut dyn Subscribable> {
        if self.subscribable { Some(self) } else { None }
    }

    fn replies(&self) -> Option<Arc<dyn Repliable>> {
        if !self.repliable {
            return None;
        }
        Some(Arc::new(ScriptedReplier {
            recorder: self.recorder.clone(),
        }))
    }
}

#[async_trait]
impl Transactional for ScriptedAdapter {
    async fn commit_if_transacted(
        &mut self,
        message: Option<&Message>,
    ) -> Result<(), ReactorError> {
        lock(&self.recorder.commits).push(message.map(|m| m.id.clone()));
        Ok(())
    }

    async fn rollback_if_transacted(&mut self) -> Result<(), ReactorError> {
        self.recorder.rollbacks.fetch_add(1, Ordering::SeqCst);
        Ok(())
    }
}

#[async_trait]
impl Subscribable for ScriptedAdapter {
    async fn subscribe(&mut self, listener: Arc<dyn MessageListener>) -> Result<(), ReactorError> {
        lock(&self.recorder.subscribe_attempts).push(Instant::now());
        if let Some(err) = lock(&self.recorder.subscribe_failures).pop_front() {
            return Err(err);
        }
        *lock(&self.recorder.listener) = Some(listener.clone());

        let prefetched: Vec<Message> = lock(&self.recorder.prefetched).drain(..).collect();
        for message in prefetched {
            // A failed exchange is the listener's to report, not a subscribe failure.
            let _ = listener.on_message(message).await;
        }
        Ok(())
    }

    async fn unsubscribe(&mut self) -> Result<(), ReactorError> {
        self.recorder.unsubscribes.fetch_add(1, Ordering::SeqCst);
        *lock(&self.recorder.listener) = None;
        if self.drain_on_unsubscribe {
            self.recorder.wait_for_deliveries().await;
        }
        Ok(())
    }
}

/// Reply side of a [`ScriptedAdapter`], shared with the reactor.
struct ScriptedReplier {
    recorder: Arc<Recorder>,
}

#[async_trait]
impl Repliable for ScriptedReplier {
    async fn reply(&self, message: Message) -> Result<(), ReactorError> {
        if let Some(err) = lock(&self.recorder.reply_failures).pop_front() {
            return Err(err);
        }
        lock(&self.recorder.replies).push(message);
        Ok(())
    }
}

/// Test-side view of a [`ScriptedAdapter`].
#[derive(Clone)]
pub struct AdapterMonitor {
    recorder: Arc<Recorder>,
}

impl AdapterMonitor {
    pub fn is_connected(&self) -> bool {
        self.recorder.connected.load(Ordering::SeqCst)
    }

    /// Connect attempts, failed ones included.
    pub fn connects(&self) -> u32 {
        self.recorder.connects.load(Ordering::SeqCst)
    }

    pub fn disconnects(&self) -> u32 {
        self.recorder.disconnects.load(Ordering::SeqCst)
    }

    pub fn receives(&self) -> u32 {
        self.recorder.receives.load(Ordering::SeqCst)
    }

    pub fn rollbacks(&self) -> u32 {
        self.recorder.rollbacks.load(Ordering::SeqCst)
    }

    pub fn unsubscribes(&self) -> u32 {
        self.recorder.unsubscribes.load(Ordering::SeqCst)
    }

    pub fn disposes(&self) -> u32 {
        self.recorder.disposes.load(Ordering::SeqCst)
    }

    /// Ids of committed messages, `None` for bare commits.
    pub fn commits(&self) -> Vec<Option<String>> {
        lock(&self.recorder.commits).clone()
    }

    pub fn replies(&self) -> Vec<Message> {
        lock(&self.recorder.replies).clone()
    }

    pub fn sent(&self) -> Vec<Message> {
        lock(&self.recorder.sent).clone()
    }

    pub fn subscribe_attempts(&self) -> Vec<Instant> {
        lock(&self.recorder.subscribe_attempts).clone()
    }

    pub fn is_subscribed(&self) -> bool {
        lock(&self.recorder.listener).is_some()
    }

    /// Append to the receive script while the reactor runs.
    pub fn push_receive(&self, step: ReceiveStep) {
        lock(&self.recorder.receive_script).push_back(step);
    }

    /// Simulate the broker dropping the connection.
    pub fn drop_connection(&self) {
        self.recorder.connected.store(false, Ordering::SeqCst);
    }

    /// Push a message into the current subscription, as the broker would.
    pub async fn deliver(&self, message: Message) -> Result<(), ReactorError> {
        let listener = lock(&self.recorder.listener).clone();
        let Some(listener) = listener else {
            return Err(ReactorError::connection("no active subscription"));
        };

        self.recorder.deliveries_in_flight.fetch_add(1, Ordering::SeqCst);
        let result = listener.on_message(message).await;
        self.recorder.deliveries_in_flight.fetch_sub(1, Ordering::SeqCst);
        self.recorder.delivery_finished.notify_waiters();
        result
    }
}

/// Provider that hands out pre-built adapters, one per queue id.
///
/// Each adapter can be taken once; a second request for the same queue fails.
#[derive(Default)]
pub struct StaticAdapterProvider {
    adapters: Mutex<HashMap<String, Box<dyn QueueAdapter>>>,
}

impl StaticAdapterProvider {
    pub fn new() -> Self {
        Self::default()
    }

    /// Register an adapter under its configured queue id.
    pub fn with_adapter(self, adapter: impl QueueAdapter + 'static) -> Self {
        let id = adapter.configuration().id.clone();
        lock(&self.adapters).insert(id, Box::new(adapter));
        self
    }

    /// Register an adapter under an explicit queue id.
    pub fn with_adapter_for(
        self,
        queue_id: impl Into<String>,
        adapter: impl QueueAdapter + 'static,
    ) -> Self {
        lock(&self.adapters).insert(queue_id.into(), Box::new(adapter));
        self
    }
}

impl AdapterProvider for StaticAdapterProvider {
    fn create_adapter(&self, queue_id: &str) -> Result<Box<dyn QueueAdapter>, ReactorError> {
        lock(&self.adapters)
            .remove(queue_id)
            .ok_or_else(|| ReactorError::config(format!("no adapter available for queue {queue_id}")))
    }
}
