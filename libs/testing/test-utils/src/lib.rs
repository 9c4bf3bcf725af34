//! Shared test utilities for reactor testing
//!
//! This crate provides reusable test infrastructure for the reactor crates:
//! - `ScriptedAdapter` / `AdapterMonitor`: in-memory queue adapter with a scripted receive sequence
//! - `StaticAdapterProvider`: hands pre-built adapters to a `ReactorFactory`
//! - Recording handlers for every handler flavour
//! - `TestDataBuilder`: deterministic test data generation
//! - `wait_until`: poll a condition while background loops make progress
//!
//! # Usage
//!
//! ```rust,ignore
//! use queue_reactor::{Handler, HandlerSet, PollReactor, QueueConfig, Reactor, ReactorParts};
//! use test_utils::{RecordingHandler, ReceiveStep, ScriptedAdapter, TestDataBuilder};
//!
//! #[tokio::test]
//! async fn my_reactor_test() {
//!     let builder = TestDataBuilder::from_test_name("my_reactor_test");
//!     let adapter = ScriptedAdapter::new(QueueConfig::new(builder.queue_id("orders")))
//!         .with_receive_script([ReceiveStep::Message(builder.message(1))]);
//!     let monitor = adapter.monitor();
//!
//!     let handler = Arc::new(RecordingHandler::<()>::claiming());
//!     let reactor = PollReactor::new(ReactorParts::new(
//!         Box::new(adapter),
//!         HandlerSet::new([Handler::from_sync(handler.clone())]),
//!     ));
//!     reactor.start_processing().await;
//! }
//! ```

use queue_reactor::Message;
use std::time::Duration;
use uuid::Uuid;

mod adapter;
mod handlers;

pub use adapter::{AdapterMonitor, ReceiveStep, ScriptedAdapter, StaticAdapterProvider};
pub use handlers::{
    AsyncRecordingHandler, EchoReplyHandler, Outcome, RecordingHandler, ShoutingReplyHandler,
};

/// Builder for test data with deterministic randomization
///
/// This ensures tests are reproducible by using seeded data.
pub struct TestDataBuilder {
    seed: u64,
}

impl TestDataBuilder {
    /// Create a new builder with a seed (for deterministic tests)
    pub fn new(seed: u64) -> Self {
        Self { seed }
    }

    /// Create from test name (generates seed from test name hash)
    ///
    /// # Example
    ///
    /// ```
    /// use test_utils::TestDataBuilder;
    ///
    /// let builder = TestDataBuilder::from_test_name("test_poll_dispatch");
    /// ```
    pub fn from_test_name(name: &str) -> Self {
        use std::collections::hash_map::DefaultHasher;
        use std::hash::{Hash, Hasher};

        let mut hasher = DefaultHasher::new();
        name.hash(&mut hasher);
        Self::new(hasher.finish())
    }

    /// Deterministic user id, sent as the `user_id` header
    pub fn user_id(&self) -> Uuid {
        let bytes = self.seed.to_le_bytes();
        let mut uuid_bytes = [0u8; 16];
        uuid_bytes[..8].copy_from_slice(&bytes);
        uuid_bytes[8..16].copy_from_slice(&bytes);
        Uuid::from_bytes(uuid_bytes)
    }

    /// Generate a unique name for testing
    ///
    /// ```
    /// use test_utils::TestDataBuilder;
    ///
    /// let builder = TestDataBuilder::new(7);
    /// assert_eq!(builder.name("queue", "orders"), "test-queue-7-orders");
    /// ```
    pub fn name(&self, prefix: &str, suffix: &str) -> String {
        format!("test-{}-{}-{}", prefix, self.seed, suffix)
    }

    pub fn queue_id(&self, suffix: &str) -> String {
        self.name("queue", suffix)
    }

    /// The `n`-th message of this test, with a stable id and user header.
    pub fn message(&self, n: u32) -> Message {
        Message::new(format!("payload-{n}"))
            .with_id(self.name("msg", &n.to_string()))
            .with_header("user_id", self.user_id().to_string())
    }

    /// The `n`-th request of this test, expecting a reply on `reply_to`.
    pub fn request(&self, n: u32, reply_to: &str) -> Message {
        self.message(n)
            .with_reply_to(reply_to)
            .with_correlation_id(self.name("corr", &n.to_string()))
    }
}

/// Poll `condition` until it holds or `timeout` elapses.
///
/// Returns whether the condition was met.
pub async fn wait_until(timeout: Duration, mut condition: impl FnMut() -> bool) -> bool {
    let deadline = tokio::time::Instant::now() + timeout;
    loop {
        if condition() {
            return true;
        }
        if tokio::time::Instant::now() >= deadline {
            return false;
        }
        tokio::time::sleep(Duration::from_millis(5)).await;
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_data_builder_deterministic() {
        let builder1 = TestDataBuilder::new(42);
        let builder2 = TestDataBuilder::new(42);

        assert_eq!(builder1.user_id(), builder2.user_id());
        assert_eq!(builder1.message(3).id, builder2.message(3).id);
    }

    #[test]
    fn test_data_builder_different_names() {
        let builder1 = TestDataBuilder::from_test_name("test1");
        let builder2 = TestDataBuilder::from_test_name("test2");

        assert_ne!(builder1.user_id(), builder2.user_id());
        assert_ne!(builder1.queue_id("orders"), builder2.queue_id("orders"));
    }

    #[test]
    fn test_request_carries_reply_metadata() {
        let builder = TestDataBuilder::new(1);
        let request = builder.request(2, "replies");

        assert_eq!(request.reply_to.as_deref(), Some("replies"));
        assert_eq!(request.correlation_id.as_deref(), Some("test-corr-1-2"));
        assert_eq!(
            request.header("user_id"),
            Some(builder.user_id().to_string().as_str())
        );
    }

    #[tokio::test]
    async fn test_wait_until_times_out() {
        assert!(wait_until(Duration::from_millis(10), || true).await);
        assert!(!wait_until(Duration::from_millis(10), || false).await);
    }
}
