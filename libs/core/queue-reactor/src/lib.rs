//! Queue Reactor Engine
//!
//! Turns a transport-specific queue adapter into a supervised consumption loop
//! that dispatches messages to application handlers.
//!
//! ## Features
//!
//! - **Poll reactors**: connect, receive with timeout, dispatch, self-heal
//! - **Transactions**: commit after dispatch, roll back on systemic failures
//! - **Subscribe reactors**: one-time subscribe handshake plus a reconnect check loop
//! - **Replies**: request/response over a subscribe channel
//! - **Backoff**: constant retry while errors are sparse, exponential after a threshold
//! - **Health gating**: pause consumption while diagnostics fail
//! - **Prometheus metrics** and **health endpoints**
//!
//! ## Example
//!
//! ```ignore
//! use core_config::{Environment, FromEnv, reactor::ReactorSettings, tracing};
//! use queue_reactor::{Handler, ReactorFactory, ReactorHost};
//!
//! tracing::install_color_eyre();
//! tracing::init_tracing(&Environment::from_env());
//!
//! let factory = ReactorFactory::builder(provider)
//!     .register::<OrderHandler>("orders")?
//!     .handler(Handler::from_async(Arc::new(OrderHandler::new(repo))))
//!     .with_config(ReactorSettings::from_env()?.into())
//!     .build()?;
//!
//! let host = ReactorHost::start_registered(&factory).await?;
//! // ...
//! host.shutdown().await;
//! ```

mod adapter;
mod backoff;
mod classify;
mod config;
mod context;
mod diagnostics;
mod dispatch;
mod error;
mod factory;
mod handler;
mod health;
mod host;
mod message;
pub mod metrics;
mod polling;
mod reactor;

// Re-export main types
pub use adapter::{
    AdapterProvider, MessageListener, QueueAdapter, Repliable, Subscribable, Transactional,
};
pub use backoff::{BackoffPolicy, ReconnectBackoff, compute as compute_backoff};
pub use classify::{DefaultFailureClassifier, FailureClassifier};
pub use config::{ProcessingMode, QueueConfig, ReactorConfig};
pub use context::{CallContext, CallContextAccessor, ContextScope, NoopContextAccessor};
pub use diagnostics::{
    DiagnosticGate, DiagnosticObserver, HealthCheckingService, HealthEvents, SubscriptionId,
};
pub use dispatch::{dispatch, dispatch_with_reply};
pub use error::{ErrorCategory, ReactorError};
pub use factory::{HandlerRegistry, ReactorFactory, ReactorFactoryBuilder};
pub use handler::{
    AsyncMessageHandler, AsyncReplyHandler, Handler, HandlerKey, HandlerSet, MessageHandler,
    ReplyChannel, ReplyHandler,
};
pub use health::{HealthResponse, HealthState, ReadinessReport, health_router};
pub use host::ReactorHost;
pub use message::{HeaderKey, Message};
pub use metrics::{ReactorMetrics, init_metrics};
pub use polling::Polling;
pub use reactor::{
    NeedReconnect, PollReactor, Reactor, ReactorKind, ReactorParts, ReactorState, ReactorStatus,
    SubscribeReactor,
};
