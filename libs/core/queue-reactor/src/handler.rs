//! Message handler traits and the per-queue handler set.
//!
//! Handlers come in four flavours (sync / async, plain / repliable). The
//! factory resolves them once into a [`HandlerSet`] of four ordered lists so
//! dispatch never has to re-inspect handler capabilities per message.
//!
//! Handlers are shared with the caller through `Arc`; reactors never dispose
//! them.

use crate::error::ReactorError;
use crate::message::Message;
use async_trait::async_trait;
use std::any::{TypeId, type_name};
use std::fmt;
use std::hash::{Hash, Hasher};
use std::sync::{Arc, Mutex};

/// Synchronous handler. Returns `Ok(true)` when it processed the message.
pub trait MessageHandler: Send + Sync + 'static {
    fn process(&self, message: &Message) -> Result<bool, ReactorError>;
}

/// Asynchronous handler. Returns `Ok(true)` when it processed the message.
#[async_trait]
pub trait AsyncMessageHandler: Send + Sync + 'static {
    async fn process(&self, message: &Message) -> Result<bool, ReactorError>;
}

/// Synchronous handler that may answer the sender.
pub trait ReplyHandler: Send + Sync + 'static {
    fn process(&self, message: &Message, reply: &ReplyChannel) -> Result<bool, ReactorError>;
}

/// Asynchronous handler that may answer the sender.
#[async_trait]
pub trait AsyncReplyHandler: Send + Sync + 'static {
    async fn process(&self, message: &Message, reply: &ReplyChannel)
    -> Result<bool, ReactorError>;
}

/// Identity of a handler type, used for queue registration.
#[derive(Clone, Copy)]
pub struct HandlerKey {
    type_id: TypeId,
    type_name: &'static str,
}

impl HandlerKey {
    pub fn of<H: 'static>() -> Self {
        Self {
            type_id: TypeId::of::<H>(),
            type_name: type_name::<H>(),
        }
    }

    pub fn type_name(&self) -> &'static str {
        self.type_name
    }
}

impl PartialEq for HandlerKey {
    fn eq(&self, other: &Self) -> bool {
        self.type_id == other.type_id
    }
}

impl Eq for HandlerKey {}

impl Hash for HandlerKey {
    fn hash<S: Hasher>(&self, state: &mut S) {
        self.type_id.hash(state);
    }
}

impl fmt::Debug for HandlerKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.type_name)
    }
}

impl fmt::Display for HandlerKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.type_name)
    }
}

/// A handler tagged with its capability and type identity.
#[derive(Clone)]
pub enum Handler {
    Sync(HandlerKey, Arc<dyn MessageHandler>),
    Async(HandlerKey, Arc<dyn AsyncMessageHandler>),
    SyncReply(HandlerKey, Arc<dyn ReplyHandler>),
    AsyncReply(HandlerKey, Arc<dyn AsyncReplyHandler>),
}

impl Handler {
    pub fn from_sync<H: MessageHandler>(handler: Arc<H>) -> Self {
        Handler::Sync(HandlerKey::of::<H>(), handler)
    }

    pub fn from_async<H: AsyncMessageHandler>(handler: Arc<H>) -> Self {
        Handler::Async(HandlerKey::of::<H>(), handler)
    }

    pub fn from_sync_reply<H: ReplyHandler>(handler: Arc<H>) -> Self {
        Handler::SyncReply(HandlerKey::of::<H>(), handler)
    }

    pub fn from_async_reply<H: AsyncReplyHandler>(handler: Arc<H>) -> Self {
        Handler::AsyncReply(HandlerKey::of::<H>(), handler)
    }

    pub fn key(&self) -> HandlerKey {
        match self {
            Handler::Sync(key, _)
            | Handler::Async(key, _)
            | Handler::SyncReply(key, _)
            | Handler::AsyncReply(key, _) => *key,
        }
    }

    pub fn is_repliable(&self) -> bool {
        matches!(self, Handler::SyncReply(..) | Handler::AsyncReply(..))
    }
}

impl fmt::Debug for Handler {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let kind = match self {
            Handler::Sync(..) => "Sync",
            Handler::Async(..) => "Async",
            Handler::SyncReply(..) => "SyncReply",
            Handler::AsyncReply(..) => "AsyncReply",
        };
        write!(f, "{kind}({})", self.key())
    }
}

/// Handlers bound to one queue, split by capability, in registration order.
#[derive(Clone, Default)]
pub struct HandlerSet {
    sync: Vec<(HandlerKey, Arc<dyn MessageHandler>)>,
    asynchronous: Vec<(HandlerKey, Arc<dyn AsyncMessageHandler>)>,
    sync_reply: Vec<(HandlerKey, Arc<dyn ReplyHandler>)>,
    async_reply: Vec<(HandlerKey, Arc<dyn AsyncReplyHandler>)>,
}

impl HandlerSet {
    pub fn new(handlers: impl IntoIterator<Item = Handler>) -> Self {
        let mut set = Self::default();
        for handler in handlers {
            set.push(handler);
        }
        set
    }

    pub fn push(&mut self, handler: Handler) {
        match handler {
            Handler::Sync(key, h) => self.sync.push((key, h)),
            Handler::Async(key, h) => self.asynchronous.push((key, h)),
            Handler::SyncReply(key, h) => self.sync_reply.push((key, h)),
            Handler::AsyncReply(key, h) => self.async_reply.push((key, h)),
        }
    }

    /// Same set without the handlers that cannot reply.
    pub fn repliable_only(&self) -> Self {
        Self {
            sync: Vec::new(),
            asynchronous: Vec::new(),
            sync_reply: self.sync_reply.clone(),
            async_reply: self.async_reply.clone(),
        }
    }

    pub(crate) fn sync_handlers(&self) -> &[(HandlerKey, Arc<dyn MessageHandler>)] {
        &self.sync
    }

    pub(crate) fn async_handlers(&self) -> &[(HandlerKey, Arc<dyn AsyncMessageHandler>)] {
        &self.asynchronous
    }

    pub(crate) fn sync_reply_handlers(&self) -> &[(HandlerKey, Arc<dyn ReplyHandler>)] {
        &self.sync_reply
    }

    pub(crate) fn async_reply_handlers(&self) -> &[(HandlerKey, Arc<dyn AsyncReplyHandler>)] {
        &self.async_reply
    }

    pub fn keys(&self) -> impl Iterator<Item = HandlerKey> + '_ {
        self.asynchronous
            .iter()
            .map(|(key, _)| *key)
            .chain(self.sync.iter().map(|(key, _)| *key))
            .chain(self.async_reply.iter().map(|(key, _)| *key))
            .chain(self.sync_reply.iter().map(|(key, _)| *key))
    }

    pub fn contains(&self, key: &HandlerKey) -> bool {
        self.keys().any(|k| k == *key)
    }

    pub fn type_names(&self) -> Vec<&'static str> {
        self.keys().map(|key| key.type_name()).collect()
    }

    pub fn len(&self) -> usize {
        self.sync.len() + self.asynchronous.len() + self.sync_reply.len() + self.async_reply.len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

impl fmt::Debug for HandlerSet {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_list().entries(self.type_names()).finish()
    }
}

/// Reply callback handed to repliable handlers.
///
/// Every reply is addressed to the inbound message's `reply_to` destination
/// and carries its correlation id. Replies are collected while the handler
/// runs and forwarded to the adapter once it returns.
#[derive(Debug)]
pub struct ReplyChannel {
    destination: Option<String>,
    correlation_id: Option<String>,
    outbox: Mutex<Vec<Message>>,
}

impl ReplyChannel {
    pub fn for_request(request: &Message) -> Self {
        Self {
            destination: request.reply_to.clone(),
            correlation_id: request
                .effective_correlation_id()
                .map(str::to_string)
                .or_else(|| Some(request.id.clone())),
            outbox: Mutex::new(Vec::new()),
        }
    }

    /// Destination replies are stamped with, if the request carried one.
    pub fn destination(&self) -> Option<&str> {
        self.destination.as_deref()
    }

    /// Queue a reply to the sender of the inbound message.
    pub fn reply(&self, mut message: Message) -> Result<(), ReactorError> {
        let Some(destination) = &self.destination else {
            return Err(ReactorError::reply("inbound message has no reply destination"));
        };

        message.reply_to = Some(destination.clone());
        if message.correlation_id.is_none() {
            message.correlation_id = self.correlation_id.clone();
        }

        self.outbox
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
            .push(message);
        Ok(())
    }

    pub(crate) fn drain(&self) -> Vec<Message> {
        std::mem::take(
            &mut *self
                .outbox
                .lock()
                .unwrap_or_else(|poisoned| poisoned.into_inner()),
        )
    }
}
