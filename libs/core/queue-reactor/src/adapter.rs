//! Transport adapter contracts.
//!
//! Concrete broker adapters live outside this crate. A reactor owns exactly
//! one adapter for its whole life. Optional capabilities are exposed through
//! accessor methods returning `None` by default, which lets the factory pick
//! a reactor variant without downcasting.

use crate::config::{ProcessingMode, QueueConfig};
use crate::error::ReactorError;
use crate::message::Message;
use async_trait::async_trait;
use std::sync::Arc;
use std::time::Duration;

/// Connect, receive and send on one queue.
#[async_trait]
pub trait QueueAdapter: Send + Sync {
    /// Configuration of the queue this adapter serves
    fn configuration(&self) -> &QueueConfig;

    fn is_connected(&self) -> bool;

    /// Open the connection. Fails with [`ReactorError::AlreadyConnected`]
    /// when called on a connected adapter.
    async fn connect(&mut self) -> Result<(), ReactorError>;

    async fn disconnect(&mut self) -> Result<(), ReactorError>;

    /// Wait up to `timeout` for one message.
    async fn try_receive(&mut self, timeout: Duration) -> Result<Option<Message>, ReactorError>;

    /// Send a message, returning it as the broker accepted it.
    async fn send(&mut self, message: Message) -> Result<Message, ReactorError>;

    fn supports_processing_mode(&self, mode: ProcessingMode) -> bool;

    /// Release transport resources. Called once, after the last disconnect.
    async fn dispose(&mut self) -> Result<(), ReactorError> {
        Ok(())
    }

    fn transactions(&mut self) -> Option<&mut dyn Transactional> {
        None
    }

    fn subscriptions(&mut self) -> Option<&mut dyn Subscribable> {
        None
    }

    /// Reply sender, usable without holding the adapter. Deliveries forward
    /// replies through it while the adapter may be busy in `subscribe` or
    /// `unsubscribe`.
    fn replies(&self) -> Option<Arc<dyn Repliable>> {
        None
    }
}

/// Adapter whose receives happen inside a broker transaction.
#[async_trait]
pub trait Transactional: Send {
    /// Commit the current transaction, removing `message` from the queue.
    async fn commit_if_transacted(&mut self, message: Option<&Message>)
    -> Result<(), ReactorError>;

    /// Roll the current transaction back so the message is redelivered.
    async fn rollback_if_transacted(&mut self) -> Result<(), ReactorError>;
}

/// Adapter that pushes messages into a listener.
#[async_trait]
pub trait Subscribable: Send {
    async fn subscribe(&mut self, listener: Arc<dyn MessageListener>) -> Result<(), ReactorError>;

    async fn unsubscribe(&mut self) -> Result<(), ReactorError>;
}

/// Adapter that can answer the sender of a message.
#[async_trait]
pub trait Repliable: Send + Sync {
    /// Send `message` to its `reply_to` destination.
    async fn reply(&self, message: Message) -> Result<(), ReactorError>;
}

/// Callback a subscribable adapter delivers into.
///
/// Only [`ReactorError::Reply`] comes back out of a reactor's listener; the
/// adapter should treat it as a failed exchange.
#[async_trait]
pub trait MessageListener: Send + Sync {
    async fn on_message(&self, message: Message) -> Result<(), ReactorError>;
}

/// Creates the adapter for a queue id.
#[cfg_attr(test, mockall::automock)]
pub trait AdapterProvider: Send + Sync {
    fn create_adapter(&self, queue_id: &str) -> Result<Box<dyn QueueAdapter>, ReactorError>;
}
