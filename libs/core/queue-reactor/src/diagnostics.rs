//! Health diagnostics event source.
//!
//! A process-wide [`HealthEvents`] source tells health-dependent reactors when
//! diagnostics start or stop failing. Reactors only observe it; they never
//! report into it.

use crate::error::ReactorError;
use std::collections::BTreeMap;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::{Arc, Mutex};
use tracing::{debug, info, warn};

/// Receives diagnostic transitions.
pub trait DiagnosticObserver: Send + Sync {
    fn diagnostic_passed(&self);
    fn diagnostic_failed(&self);
}

/// Handle returned by [`HealthEvents::subscribe`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct SubscriptionId(u64);

/// Source of diagnostic passed / failed events.
pub trait HealthEvents: Send + Sync {
    fn subscribe(&self, observer: Arc<dyn DiagnosticObserver>) -> SubscriptionId;

    /// Fails for ids that are not (or no longer) subscribed.
    fn unsubscribe(&self, id: SubscriptionId) -> Result<(), ReactorError>;

    /// Current state, used to initialise a new observer.
    fn is_failing(&self) -> bool {
        false
    }
}

/// In-process diagnostic event source.
#[derive(Default)]
pub struct HealthCheckingService {
    failing: AtomicBool,
    next_id: AtomicU64,
    observers: Mutex<BTreeMap<SubscriptionId, Arc<dyn DiagnosticObserver>>>,
}

impl HealthCheckingService {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn report_passed(&self) {
        if self.failing.swap(false, Ordering::SeqCst) {
            info!("Diagnostics recovered, resuming health-dependent consumers");
        }
        for observer in self.snapshot() {
            observer.diagnostic_passed();
        }
    }

    pub fn report_failed(&self) {
        if !self.failing.swap(true, Ordering::SeqCst) {
            warn!("Diagnostics failing, pausing health-dependent consumers");
        }
        for observer in self.snapshot() {
            observer.diagnostic_failed();
        }
    }

    pub fn observer_count(&self) -> usize {
        self.observers().len()
    }

    // Observers are called outside the lock so they may (un)subscribe.
    fn snapshot(&self) -> Vec<Arc<dyn DiagnosticObserver>> {
        self.observers().values().cloned().collect()
    }

    fn observers(
        &self,
    ) -> std::sync::MutexGuard<'_, BTreeMap<SubscriptionId, Arc<dyn DiagnosticObserver>>> {
        self.observers
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
    }
}

impl HealthEvents for HealthCheckingService {
    fn subscribe(&self, observer: Arc<dyn DiagnosticObserver>) -> SubscriptionId {
        let id = SubscriptionId(self.next_id.fetch_add(1, Ordering::SeqCst));
        self.observers().insert(id, observer);
        debug!(subscription = id.0, "Diagnostic observer subscribed");
        id
    }

    fn unsubscribe(&self, id: SubscriptionId) -> Result<(), ReactorError> {
        match self.observers().remove(&id) {
            Some(_) => Ok(()),
            None => Err(ReactorError::Notification(format!(
                "unknown diagnostic subscription {}",
                id.0
            ))),
        }
    }

    fn is_failing(&self) -> bool {
        self.failing.load(Ordering::SeqCst)
    }
}

/// Flag closed while diagnostics fail.
#[derive(Debug, Default)]
pub struct DiagnosticGate {
    closed: AtomicBool,
}

impl DiagnosticGate {
    pub fn is_closed(&self) -> bool {
        self.closed.load(Ordering::SeqCst)
    }

    pub(crate) fn set_closed(&self, closed: bool) {
        self.closed.store(closed, Ordering::SeqCst);
    }
}

impl DiagnosticObserver for DiagnosticGate {
    fn diagnostic_passed(&self) {
        self.set_closed(false);
    }

    fn diagnostic_failed(&self) {
        self.set_closed(true);
    }
}
