//! Per-dispatch call context.
//!
//! Correlation data travels with the dispatch as an explicit [`CallContext`]
//! value and a `tracing` span, never as thread-local state. Hosts that keep
//! their own ambient store can hook in through [`CallContextAccessor`]; the
//! reactor brackets every dispatch with a [`ContextScope`] so the store is
//! cleaned even when a handler fails or panics.

use crate::message::{HeaderKey, Message};
use tracing::{Span, info_span};

/// Correlation data parsed from message headers.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct CallContext {
    pub message_id: String,
    pub correlation_id: Option<String>,
    pub request_id: Option<String>,
    pub user_id: Option<String>,
}

impl CallContext {
    /// Parse the context out of a message.
    pub fn from_message(message: &Message) -> Self {
        Self {
            message_id: message.id.clone(),
            correlation_id: message.effective_correlation_id().map(str::to_string),
            request_id: message.known_header(HeaderKey::RequestId).map(str::to_string),
            user_id: message.known_header(HeaderKey::UserId).map(str::to_string),
        }
    }

    /// Span every log line of one dispatch is recorded under.
    pub fn span(&self, queue_id: &str) -> Span {
        info_span!(
            "dispatch",
            queue = %queue_id,
            message_id = %self.message_id,
            correlation_id = %self.correlation_id.as_deref().unwrap_or("-"),
            request_id = %self.request_id.as_deref().unwrap_or("-"),
            user_id = %self.user_id.as_deref().unwrap_or("-"),
        )
    }
}

/// Hook into an external context store.
pub trait CallContextAccessor: Send + Sync {
    fn set_context(&self, context: &CallContext);
    fn clean_context(&self);
}

/// Accessor that does nothing; the tracing span alone carries the context.
#[derive(Debug, Default, Clone, Copy)]
pub struct NoopContextAccessor;

impl CallContextAccessor for NoopContextAccessor {
    fn set_context(&self, _context: &CallContext) {}

    fn clean_context(&self) {}
}

/// Sets the context on creation and cleans it on drop.
pub struct ContextScope<'a> {
    accessor: &'a dyn CallContextAccessor,
}

impl<'a> ContextScope<'a> {
    pub fn enter(accessor: &'a dyn CallContextAccessor, context: &CallContext) -> Self {
        accessor.set_context(context);
        Self { accessor }
    }
}

impl Drop for ContextScope<'_> {
    fn drop(&mut self) {
        self.accessor.clean_context();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Mutex;

    #[derive(Default)]
    struct RecordingAccessor {
        events: Mutex<Vec<String>>,
    }

    impl CallContextAccessor for RecordingAccessor {
        fn set_context(&self, context: &CallContext) {
            self.events
                .lock()
                .unwrap()
                .push(format!("set:{}", context.correlation_id.as_deref().unwrap_or("-")));
        }

        fn clean_context(&self) {
            self.events.lock().unwrap().push("clean".to_string());
        }
    }

    #[test]
    fn test_context_from_headers() {
        let message = Message::new("payload")
            .with_id("m-1")
            .with_header("x-correlation-id", "corr-9")
            .with_header("request_id", "req-3")
            .with_header("X-User-Id", "bob");

        let context = CallContext::from_message(&message);

        assert_eq!(context.message_id, "m-1");
        assert_eq!(context.correlation_id.as_deref(), Some("corr-9"));
        assert_eq!(context.request_id.as_deref(), Some("req-3"));
        assert_eq!(context.user_id.as_deref(), Some("bob"));
    }

    #[test]
    fn test_context_without_headers() {
        let context = CallContext::from_message(&Message::new("payload").with_id("m-2"));
        assert_eq!(context.correlation_id, None);
        assert_eq!(context.user_id, None);
        // Should not panic
        let _span = context.span("orders");
    }

    #[test]
    fn test_scope_cleans_on_drop() {
        let accessor = RecordingAccessor::default();
        let context = CallContext {
            correlation_id: Some("corr-1".to_string()),
            ..Default::default()
        };

        {
            let _scope = ContextScope::enter(&accessor, &context);
            assert_eq!(*accessor.events.lock().unwrap(), vec!["set:corr-1"]);
        }

        assert_eq!(*accessor.events.lock().unwrap(), vec!["set:corr-1", "clean"]);
    }
}
