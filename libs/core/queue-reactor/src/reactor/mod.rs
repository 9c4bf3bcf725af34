//! Reactors: one adapter, one handler set, one supervised consumption loop.
//!
//! ```text
//! Idle ──start──▶ Starting ──connected──▶ Listening ◀──reconnected── Backoff
//!                    │                        │                         ▲
//!                    │ non-retryable          └──receive/dispatch error─┘
//!                    ▼
//!                 Stopped ◀──stop── (any) ; Stopped ──dispose──▶ Disposed
//! ```

mod poll;
mod shared;
mod subscribe;

pub use poll::PollReactor;
pub use subscribe::SubscribeReactor;

use crate::adapter::QueueAdapter;
use crate::config::ReactorConfig;
use crate::context::{CallContextAccessor, NoopContextAccessor};
use crate::diagnostics::HealthEvents;
use crate::handler::HandlerSet;
use async_trait::async_trait;
use serde::Serialize;
use std::sync::Arc;
use std::time::Duration;
use strum::{AsRefStr, Display, IntoStaticStr};
use tokio::sync::broadcast;

/// Lifecycle state of a reactor
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Display, AsRefStr, Serialize)]
#[strum(serialize_all = "snake_case")]
#[serde(rename_all = "snake_case")]
pub enum ReactorState {
    Idle,
    Starting,
    Listening,
    Backoff,
    Stopped,
    Disposed,
}

/// Reactor variant chosen by the factory
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Display, AsRefStr, IntoStaticStr, Serialize)]
#[strum(serialize_all = "snake_case")]
#[serde(rename_all = "snake_case")]
pub enum ReactorKind {
    Poll,
    TransactedPoll,
    Subscribe,
    SubscribeAndReply,
}

/// Raised each time a reactor forces a reconnect
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct NeedReconnect {
    pub queue_id: String,
    pub error_count: u32,
    pub delay: Duration,
    pub reason: String,
}

/// Point-in-time view of a reactor
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct ReactorStatus {
    pub queue_id: String,
    pub kind: ReactorKind,
    pub state: ReactorState,
    pub error_count: u32,
    pub diagnostics_failing: bool,
}

/// Lifecycle contract shared by poll and subscribe reactors.
#[async_trait]
pub trait Reactor: Send + Sync {
    fn queue_id(&self) -> &str;

    fn kind(&self) -> ReactorKind;

    fn state(&self) -> ReactorState;

    /// Consecutive errors since the last successful receive
    fn error_count(&self) -> u32;

    /// Subscribe to reconnect notifications
    fn need_reconnect(&self) -> broadcast::Receiver<NeedReconnect>;

    fn status(&self) -> ReactorStatus;

    /// Begin consuming. Returns `false` only for non-retryable start failures
    /// and for disposed reactors.
    async fn start_processing(&self) -> bool;

    /// Stop consuming and disconnect. Returns once background work has exited.
    async fn stop(&self);

    /// Stop, then release the adapter. Idempotent.
    async fn dispose(&self);
}

/// Everything a reactor is built from
pub struct ReactorParts {
    pub adapter: Box<dyn QueueAdapter>,
    pub handlers: HandlerSet,
    pub config: ReactorConfig,
    pub health: Option<Arc<dyn HealthEvents>>,
    pub context: Arc<dyn CallContextAccessor>,
}

impl ReactorParts {
    pub fn new(adapter: Box<dyn QueueAdapter>, handlers: HandlerSet) -> Self {
        Self {
            adapter,
            handlers,
            config: ReactorConfig::default(),
            health: None,
            context: Arc::new(NoopContextAccessor),
        }
    }

    pub fn with_config(mut self, config: ReactorConfig) -> Self {
        self.config = config;
        self
    }

    pub fn with_health(mut self, health: Arc<dyn HealthEvents>) -> Self {
        self.health = Some(health);
        self
    }

    pub fn with_context_accessor(mut self, context: Arc<dyn CallContextAccessor>) -> Self {
        self.context = context;
        self
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_state_labels() {
        assert_eq!(ReactorState::Listening.to_string(), "listening");
        assert_eq!(ReactorKind::SubscribeAndReply.as_ref(), "subscribe_and_reply");

        let status = ReactorStatus {
            queue_id: "orders".to_string(),
            kind: ReactorKind::TransactedPoll,
            state: ReactorState::Backoff,
            error_count: 3,
            diagnostics_failing: false,
        };
        let json = serde_json::to_value(&status).unwrap();
        assert_eq!(json["kind"], "transacted_poll");
        assert_eq!(json["state"], "backoff");
        assert_eq!(json["error_count"], 3);
    }
}
