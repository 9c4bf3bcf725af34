//! Reactor error types and error categorization
//!
//! Errors are categorized to determine how a reactor reacts to them:
//! - **Transient**: infrastructure hiccup, reconnect with backoff
//! - **MessageLevel**: a handler failed on one message, the queue keeps flowing
//! - **Fatal**: retrying cannot help (bad credentials, double connect)
//! - **Protocol**: reply delivery failed, must be surfaced to the adapter
//! - **Configuration**: wiring mistakes caught while building reactors

use thiserror::Error;

/// Category of error for determining reactor behavior
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ErrorCategory {
    /// Connectivity problem - reconnect with backoff
    Transient,
    /// Handler rejected or failed on a single message
    MessageLevel,
    /// Unrecoverable - stop the reactor
    Fatal,
    /// Reply could not be delivered
    Protocol,
    /// Invalid factory or queue configuration
    Configuration,
}

impl ErrorCategory {
    /// Whether an operation failing with this category is worth retrying
    pub fn is_retryable(&self) -> bool {
        matches!(self, ErrorCategory::Transient)
    }

    /// Stable label used for metrics
    pub fn as_str(&self) -> &'static str {
        match self {
            ErrorCategory::Transient => "transient",
            ErrorCategory::MessageLevel => "message_level",
            ErrorCategory::Fatal => "fatal",
            ErrorCategory::Protocol => "protocol",
            ErrorCategory::Configuration => "configuration",
        }
    }
}

/// Reactor errors
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum ReactorError {
    /// Broker connection could not be established or was lost
    #[error("Connection error: {0}")]
    Connection(String),

    /// Operation did not complete in time
    #[error("Timeout: {0}")]
    Timeout(String),

    /// Connect was called on an adapter that is already connected
    #[error("Adapter is already connected")]
    AlreadyConnected,

    /// Credentials were rejected by the broker
    #[error("Authentication failed: {0}")]
    Authentication(String),

    /// Health diagnostics are failing, consumption is paused
    #[error("Diagnostics are failing, consumption is paused")]
    DiagnosticsFailing,

    /// A handler failed while processing a message
    #[error("Handler error: {0}")]
    Handler(String),

    /// A handler panicked while processing a message
    #[error("Handler panicked: {0}")]
    HandlerPanicked(String),

    /// A reply could not be sent back to the requester
    #[error("Reply error: {0}")]
    Reply(String),

    /// The adapter lacks a capability the operation requires
    #[error("Unsupported: {0}")]
    Unsupported(String),

    /// Invalid queue or reactor configuration
    #[error("Configuration error: {0}")]
    Config(String),

    /// Handler registration is inconsistent
    #[error("Registration error: {0}")]
    Registration(String),

    /// An event notification could not be delivered
    #[error("Notification error: {0}")]
    Notification(String),

    /// Internal error
    #[error("Internal error: {0}")]
    Internal(String),
}

impl ReactorError {
    /// Create a connection error
    pub fn connection(message: impl Into<String>) -> Self {
        ReactorError::Connection(message.into())
    }

    /// Create a timeout error
    pub fn timeout(message: impl Into<String>) -> Self {
        ReactorError::Timeout(message.into())
    }

    /// Create a message-level handler error
    pub fn handler(message: impl Into<String>) -> Self {
        ReactorError::Handler(message.into())
    }

    /// Create a reply error
    pub fn reply(message: impl Into<String>) -> Self {
        ReactorError::Reply(message.into())
    }

    /// Create a configuration error
    pub fn config(message: impl Into<String>) -> Self {
        ReactorError::Config(message.into())
    }

    /// Create a registration error
    pub fn registration(message: impl Into<String>) -> Self {
        ReactorError::Registration(message.into())
    }

    /// Get the error category
    pub fn category(&self) -> ErrorCategory {
        match self {
            ReactorError::Connection(_) => ErrorCategory::Transient,
            ReactorError::Timeout(_) => ErrorCategory::Transient,
            ReactorError::DiagnosticsFailing => ErrorCategory::Transient,
            ReactorError::AlreadyConnected => ErrorCategory::Fatal,
            ReactorError::Authentication(_) => ErrorCategory::Fatal,
            ReactorError::Handler(_) => ErrorCategory::MessageLevel,
            ReactorError::HandlerPanicked(_) => ErrorCategory::MessageLevel,
            ReactorError::Reply(_) => ErrorCategory::Protocol,
            ReactorError::Unsupported(_) => ErrorCategory::Configuration,
            ReactorError::Config(_) => ErrorCategory::Configuration,
            ReactorError::Registration(_) => ErrorCategory::Configuration,
            ReactorError::Notification(_) => ErrorCategory::Transient,
            ReactorError::Internal(_) => ErrorCategory::Fatal,
        }
    }

    /// Check if the failed operation may be retried
    pub fn is_retryable(&self) -> bool {
        self.category().is_retryable()
    }
}

impl From<serde_json::Error> for ReactorError {
    fn from(err: serde_json::Error) -> Self {
        ReactorError::Handler(format!("invalid message body: {err}"))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_error_categories() {
        assert_eq!(
            ReactorError::connection("refused").category(),
            ErrorCategory::Transient
        );
        assert_eq!(ReactorError::timeout("5s").category(), ErrorCategory::Transient);
        assert_eq!(ReactorError::AlreadyConnected.category(), ErrorCategory::Fatal);
        assert_eq!(
            ReactorError::handler("bad payload").category(),
            ErrorCategory::MessageLevel
        );
        assert_eq!(ReactorError::reply("gone").category(), ErrorCategory::Protocol);
        assert_eq!(
            ReactorError::registration("dup").category(),
            ErrorCategory::Configuration
        );
    }

    #[test]
    fn test_retryable() {
        assert!(ReactorError::timeout("subscribe").is_retryable());
        assert!(ReactorError::DiagnosticsFailing.is_retryable());
        assert!(!ReactorError::Authentication("bad password".into()).is_retryable());
        assert!(!ReactorError::AlreadyConnected.is_retryable());
        assert!(!ReactorError::handler("boom").is_retryable());
    }

    #[test]
    fn test_json_errors_are_message_level() {
        let err: ReactorError = serde_json::from_str::<serde_json::Value>("{not json")
            .unwrap_err()
            .into();
        assert_eq!(err.category(), ErrorCategory::MessageLevel);
        assert!(err.to_string().contains("invalid message body"));
    }
}
