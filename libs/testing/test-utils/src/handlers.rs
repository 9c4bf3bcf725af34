//! Handlers that record what they were given.
//!
//! The `Tag` parameter only exists to mint distinct handler types, so one
//! test can register several recording handlers on different queues.

use async_trait::async_trait;
use queue_reactor::{
    AsyncMessageHandler, AsyncReplyHandler, Message, MessageHandler, ReactorError, ReplyChannel,
    ReplyHandler,
};
use std::collections::VecDeque;
use std::marker::PhantomData;
use std::sync::atomic::{AtomicU32, Ordering};
use std::sync::{Mutex, MutexGuard};
use std::time::Duration;

fn lock<T>(mutex: &Mutex<T>) -> MutexGuard<'_, T> {
    mutex.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
}

/// What a handler does with a message.
#[derive(Debug, Clone)]
pub enum Outcome {
    Claim,
    Decline,
    Fail(ReactorError),
    Panic,
}

impl Outcome {
    fn resolve(self) -> Result<bool, ReactorError> {
        match self {
            Outcome::Claim => Ok(true),
            Outcome::Decline => Ok(false),
            Outcome::Fail(err) => Err(err),
            Outcome::Panic => panic!("handler gave up on purpose"),
        }
    }
}

/// Message log plus queued outcomes shared by all recording handlers.
#[derive(Debug)]
struct Journal {
    seen: Mutex<Vec<Message>>,
    script: Mutex<VecDeque<Outcome>>,
    fallback: Outcome,
}

impl Journal {
    fn new(fallback: Outcome) -> Self {
        Self {
            seen: Mutex::new(Vec::new()),
            script: Mutex::new(VecDeque::new()),
            fallback,
        }
    }

    fn record(&self, message: &Message) -> Outcome {
        lock(&self.seen).push(message.clone());
        lock(&self.script)
            .pop_front()
            .unwrap_or_else(|| self.fallback.clone())
    }
}

/// Synchronous handler that records every message.
pub struct RecordingHandler<Tag = ()> {
    journal: Journal,
    _tag: PhantomData<fn() -> Tag>,
}

impl<Tag> RecordingHandler<Tag> {
    pub fn new(fallback: Outcome) -> Self {
        Self {
            journal: Journal::new(fallback),
            _tag: PhantomData,
        }
    }

    pub fn claiming() -> Self {
        Self::new(Outcome::Claim)
    }

    pub fn declining() -> Self {
        Self::new(Outcome::Decline)
    }

    pub fn failing(err: ReactorError) -> Self {
        Self::new(Outcome::Fail(err))
    }

    /// Outcomes for the next calls, before falling back.
    pub fn with_outcomes(self, outcomes: impl IntoIterator<Item = Outcome>) -> Self {
        lock(&self.journal.script).extend(outcomes);
        self
    }

    pub fn calls(&self) -> usize {
        lock(&self.journal.seen).len()
    }

    pub fn seen(&self) -> Vec<Message> {
        lock(&self.journal.seen).clone()
    }
}

impl<Tag: 'static> MessageHandler for RecordingHandler<Tag> {
    fn process(&self, message: &Message) -> Result<bool, ReactorError> {
        self.journal.record(message).resolve()
    }
}

/// Asynchronous handler that records every message and can take its time.
///
/// Tracks how many calls overlap, so tests can assert that a reactor never
/// runs two dispatches at once.
pub struct AsyncRecordingHandler<Tag = ()> {
    journal: Journal,
    delay: Duration,
    active: AtomicU32,
    max_active: AtomicU32,
    _tag: PhantomData<fn() -> Tag>,
}

impl<Tag> AsyncRecordingHandler<Tag> {
    pub fn new(fallback: Outcome) -> Self {
        Self {
            journal: Journal::new(fallback),
            delay: Duration::ZERO,
            active: AtomicU32::new(0),
            max_active: AtomicU32::new(0),
            _tag: PhantomData,
        }
    }

    pub fn claiming() -> Self {
        Self::new(Outcome::Claim)
    }

    pub fn declining() -> Self {
        Self::new(Outcome::Decline)
    }

    pub fn failing(err: ReactorError) -> Self {
        Self::new(Outcome::Fail(err))
    }

    pub fn with_delay(mut self, delay: Duration) -> Self {
        self.delay = delay;
        self
    }

    pub fn with_outcomes(self, outcomes: impl IntoIterator<Item = Outcome>) -> Self {
        lock(&self.journal.script).extend(outcomes);
        self
    }

    pub fn calls(&self) -> usize {
        lock(&self.journal.seen).len()
    }

    pub fn seen(&self) -> Vec<Message> {
        lock(&self.journal.seen).clone()
    }

    /// Highest number of calls that were running at the same time.
    pub fn max_concurrency(&self) -> u32 {
        self.max_active.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl<Tag: 'static> AsyncMessageHandler for AsyncRecordingHandler<Tag> {
    async fn process(&self, message: &Message) -> Result<bool, ReactorError> {
        let active = self.active.fetch_add(1, Ordering::SeqCst) + 1;
        self.max_active.fetch_max(active, Ordering::SeqCst);

        if !self.delay.is_zero() {
            tokio::time::sleep(self.delay).await;
        }
        let outcome = self.journal.record(message);

        self.active.fetch_sub(1, Ordering::SeqCst);
        outcome.resolve()
    }
}

/// Replies to every request with its own body, then applies the outcome.
pub struct EchoReplyHandler<Tag = ()> {
    journal: Journal,
    _tag: PhantomData<fn() -> Tag>,
}

impl<Tag> EchoReplyHandler<Tag> {
    pub fn new(fallback: Outcome) -> Self {
        Self {
            journal: Journal::new(fallback),
            _tag: PhantomData,
        }
    }

    pub fn claiming() -> Self {
        Self::new(Outcome::Claim)
    }

    pub fn calls(&self) -> usize {
        lock(&self.journal.seen).len()
    }
}

impl<Tag: 'static> ReplyHandler for EchoReplyHandler<Tag> {
    fn process(&self, message: &Message, reply: &ReplyChannel) -> Result<bool, ReactorError> {
        let outcome = self.journal.record(message);
        reply.reply(Message::new(message.body.clone()))?;
        outcome.resolve()
    }
}

/// Async counterpart of [`EchoReplyHandler`] that upper-cases text bodies.
pub struct ShoutingReplyHandler<Tag = ()> {
    journal: Journal,
    delay: Duration,
    _tag: PhantomData<fn() -> Tag>,
}

impl<Tag> ShoutingReplyHandler<Tag> {
    pub fn new(fallback: Outcome) -> Self {
        Self {
            journal: Journal::new(fallback),
            delay: Duration::ZERO,
            _tag: PhantomData,
        }
    }

    pub fn claiming() -> Self {
        Self::new(Outcome::Claim)
    }

    /// Sleep this long after replying, before returning.
    pub fn with_delay(mut self, delay: Duration) -> Self {
        self.delay = delay;
        self
    }

    pub fn calls(&self) -> usize {
        lock(&self.journal.seen).len()
    }
}

#[async_trait]
impl<Tag: 'static> AsyncReplyHandler for ShoutingReplyHandler<Tag> {
    async fn process(&self, message: &Message, reply: &ReplyChannel) -> Result<bool, ReactorError> {
        let outcome = self.journal.record(message);
        let text = message.text()?.to_uppercase();
        reply.reply(Message::new(text))?;
        if !self.delay.is_zero() {
            tokio::time::sleep(self.delay).await;
        }
        outcome.resolve()
    }
}
