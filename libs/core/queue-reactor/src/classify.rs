//! Failure classification policy.
//!
//! Reactors ask the classifier two questions instead of matching on error
//! variants themselves, so the commit/rollback boundary and the start-up retry
//! rule can be tuned per deployment.

use crate::error::{ErrorCategory, ReactorError};
use std::fmt;

pub trait FailureClassifier: fmt::Debug + Send + Sync {
    /// A dispatch failure that must roll the message back instead of
    /// committing it as poison.
    fn is_systemic(&self, error: &ReactorError) -> bool;

    /// A start-up failure worth another connect attempt.
    fn is_retryable_on_start(&self, error: &ReactorError) -> bool;
}

/// Category-based classification.
///
/// | category      | systemic | retry on start |
/// |---------------|----------|----------------|
/// | transient     | yes      | yes            |
/// | message level | no       | no             |
/// | fatal         | yes      | no             |
/// | protocol      | yes      | no             |
/// | configuration | yes      | no             |
///
/// Once a reactor is listening nothing is terminal: every failure backs off
/// and reconnects.
#[derive(Debug, Default, Clone, Copy)]
pub struct DefaultFailureClassifier;

impl FailureClassifier for DefaultFailureClassifier {
    fn is_systemic(&self, error: &ReactorError) -> bool {
        error.category() != ErrorCategory::MessageLevel
    }

    fn is_retryable_on_start(&self, error: &ReactorError) -> bool {
        error.is_retryable()
    }
}
