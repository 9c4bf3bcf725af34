//! Reactor factory and handler registration.
//!
//! The factory owns the handler registration table (handler type -> queue
//! id) and the live handler collection. For each queue it obtains an adapter,
//! keeps only the handlers registered for that queue, and picks the reactor
//! variant from the adapter's capabilities and the queue's processing mode:
//!
//! | adapter                      | mode                  | reactor             |
//! |------------------------------|-----------------------|---------------------|
//! | transactional                | any                   | transacted poll     |
//! | subscribable                 | `subscribe`           | subscribe           |
//! | subscribable + repliable     | `subscribe_and_reply` | reply subscribe     |
//! | anything else                | `poll`                | poll                |

use crate::adapter::AdapterProvider;
use crate::config::{ProcessingMode, ReactorConfig};
use crate::context::{CallContextAccessor, NoopContextAccessor};
use crate::diagnostics::HealthEvents;
use crate::error::ReactorError;
use crate::handler::{Handler, HandlerKey, HandlerSet};
use crate::reactor::{PollReactor, Reactor, ReactorParts, SubscribeReactor};
use std::collections::HashMap;
use std::sync::Arc;
use tracing::{info, warn};

/// Append-only table binding handler types to queue ids.
#[derive(Debug, Default, Clone)]
pub struct HandlerRegistry {
    bindings: HashMap<HandlerKey, String>,
    order: Vec<HandlerKey>,
}

impl HandlerRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Bind handler type `H` to `queue_id`. Each type can be bound once.
    pub fn register<H: 'static>(&mut self, queue_id: impl Into<String>) -> Result<(), ReactorError> {
        self.register_key(HandlerKey::of::<H>(), queue_id.into())
    }

    pub fn register_key(&mut self, key: HandlerKey, queue_id: String) -> Result<(), ReactorError> {
        if let Some(existing) = self.bindings.get(&key) {
            return Err(ReactorError::registration(format!(
                "handler '{key}' is already registered for queue '{existing}'"
            )));
        }
        self.bindings.insert(key, queue_id);
        self.order.push(key);
        Ok(())
    }

    pub fn queue_for(&self, key: &HandlerKey) -> Option<&str> {
        self.bindings.get(key).map(String::as_str)
    }

    /// Distinct queue ids in registration order.
    pub fn queue_ids(&self) -> Vec<&str> {
        let mut ids: Vec<&str> = Vec::new();
        for key in &self.order {
            if let Some(queue_id) = self.queue_for(key) {
                if !ids.contains(&queue_id) {
                    ids.push(queue_id);
                }
            }
        }
        ids
    }

    pub fn keys(&self) -> impl Iterator<Item = HandlerKey> + '_ {
        self.order.iter().copied()
    }

    pub fn len(&self) -> usize {
        self.order.len()
    }

    pub fn is_empty(&self) -> bool {
        self.order.is_empty()
    }
}

/// Builder for [`ReactorFactory`]
pub struct ReactorFactoryBuilder {
    provider: Arc<dyn AdapterProvider>,
    registry: HandlerRegistry,
    handlers: Vec<Handler>,
    config: ReactorConfig,
    health: Option<Arc<dyn HealthEvents>>,
    context: Arc<dyn CallContextAccessor>,
}

impl ReactorFactoryBuilder {
    pub fn new(provider: Arc<dyn AdapterProvider>) -> Self {
        Self {
            provider,
            registry: HandlerRegistry::default(),
            handlers: Vec::new(),
            config: ReactorConfig::default(),
            health: None,
            context: Arc::new(NoopContextAccessor),
        }
    }

    /// Bind handler type `H` to `queue_id`
    pub fn register<H: 'static>(mut self, queue_id: impl Into<String>) -> Result<Self, ReactorError> {
        self.registry.register::<H>(queue_id)?;
        Ok(self)
    }

    /// Use a prepared registration table
    pub fn with_registry(mut self, registry: HandlerRegistry) -> Self {
        self.registry = registry;
        self
    }

    /// Add a live handler
    pub fn handler(mut self, handler: Handler) -> Self {
        self.handlers.push(handler);
        self
    }

    /// Add live handlers
    pub fn handlers(mut self, handlers: impl IntoIterator<Item = Handler>) -> Self {
        self.handlers.extend(handlers);
        self
    }

    /// Set the reactor configuration
    pub fn with_config(mut self, config: ReactorConfig) -> Self {
        self.config = config;
        self
    }

    /// Set the diagnostic event source for health-dependent queues
    pub fn with_health(mut self, health: Arc<dyn HealthEvents>) -> Self {
        self.health = Some(health);
        self
    }

    /// Set the call context hook
    pub fn with_context_accessor(mut self, context: Arc<dyn CallContextAccessor>) -> Self {
        self.context = context;
        self
    }

    /// Check the registration table against the live handlers and build.
    pub fn build(self) -> Result<ReactorFactory, ReactorError> {
        let missing: Vec<&str> = self
            .registry
            .keys()
            .filter(|key| !self.handlers.iter().any(|handler| handler.key() == *key))
            .map(|key| key.type_name())
            .collect();

        if !missing.is_empty() {
            return Err(ReactorError::registration(format!(
                "registered handlers missing from the handler collection: {}",
                missing.join(", ")
            )));
        }

        for handler in &self.handlers {
            if self.registry.queue_for(&handler.key()).is_none() {
                warn!(handler = %handler.key(), "Handler is not registered for any queue and will never run");
            }
        }

        Ok(ReactorFactory {
            provider: self.provider,
            registry: self.registry,
            handlers: self.handlers,
            config: self.config,
            health: self.health,
            context: self.context,
        })
    }
}

/// Builds the right reactor for a queue.
pub struct ReactorFactory {
    provider: Arc<dyn AdapterProvider>,
    registry: HandlerRegistry,
    handlers: Vec<Handler>,
    config: ReactorConfig,
    health: Option<Arc<dyn HealthEvents>>,
    context: Arc<dyn CallContextAccessor>,
}

impl ReactorFactory {
    pub fn builder(provider: Arc<dyn AdapterProvider>) -> ReactorFactoryBuilder {
        ReactorFactoryBuilder::new(provider)
    }

    pub fn registry(&self) -> &HandlerRegistry {
        &self.registry
    }

    /// Live handlers registered for `queue_id`, in collection order
    pub fn handlers_for(&self, queue_id: &str) -> HandlerSet {
        HandlerSet::new(
            self.handlers
                .iter()
                .filter(|handler| self.registry.queue_for(&handler.key()) == Some(queue_id))
                .cloned(),
        )
    }

    pub fn create(&self, queue_id: &str) -> Result<Box<dyn Reactor>, ReactorError> {
        let mut adapter = self.provider.create_adapter(queue_id)?;

        let queue = adapter.configuration().clone();
        queue.validate()?;
        if queue.id != queue_id {
            return Err(ReactorError::config(format!(
                "adapter for queue '{queue_id}' is configured for queue '{}'",
                queue.id
            )));
        }

        let mode = queue.processing_mode;
        if !adapter.supports_processing_mode(mode) {
            return Err(ReactorError::config(format!(
                "queue '{queue_id}': adapter does not support processing mode '{mode}'"
            )));
        }

        let transactional = adapter.transactions().is_some();
        let subscribable = adapter.subscriptions().is_some();
        let repliable = adapter.replies().is_some();

        let mut handlers = self.handlers_for(queue_id);
        if mode == ProcessingMode::SubscribeAndReply {
            handlers = handlers.repliable_only();
        }
        if handlers.is_empty() {
            warn!(queue = %queue_id, "No handlers registered for queue");
        }
        let handler_count = handlers.len();

        let parts = ReactorParts {
            adapter,
            handlers,
            config: self.config.clone(),
            health: self.health.clone(),
            context: self.context.clone(),
        };

        let reactor: Box<dyn Reactor> = match mode {
            _ if transactional => Box::new(PollReactor::transacted(parts)?),
            ProcessingMode::Subscribe if subscribable => Box::new(SubscribeReactor::new(parts)?),
            ProcessingMode::SubscribeAndReply if subscribable && repliable => {
                Box::new(SubscribeReactor::with_reply(parts)?)
            }
            ProcessingMode::Poll => Box::new(PollReactor::new(parts)),
            _ => {
                return Err(ReactorError::config(format!(
                    "queue '{queue_id}': processing mode '{mode}' is not supported by the adapter's capabilities"
                )));
            }
        };

        info!(
            queue = %queue_id,
            kind = %reactor.kind(),
            mode = %mode,
            handlers = handler_count,
            "Reactor created"
        );
        Ok(reactor)
    }
}
