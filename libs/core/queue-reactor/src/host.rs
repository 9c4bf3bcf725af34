//! Owns the running reactors of a process.

use crate::error::ReactorError;
use crate::factory::ReactorFactory;
use crate::reactor::{Reactor, ReactorState, ReactorStatus};
use futures::future::join_all;
use tracing::{error, info, warn};

/// Starts one reactor per queue and shuts them all down together.
///
/// Shutdown is explicit: call [`shutdown`](Self::shutdown) before dropping the
/// host. Dropped reactors only cancel their loops.
#[derive(Default)]
pub struct ReactorHost {
    reactors: Vec<Box<dyn Reactor>>,
}

impl ReactorHost {
    /// Create and start a reactor for each queue id.
    ///
    /// A factory error disposes the reactors started so far and is returned.
    /// A reactor whose start fails is kept so its status stays visible.
    pub async fn start<I, S>(factory: &ReactorFactory, queue_ids: I) -> Result<Self, ReactorError>
    where
        I: IntoIterator<Item = S>,
        S: AsRef<str>,
    {
        let mut host = Self::default();

        for queue_id in queue_ids {
            let queue_id = queue_id.as_ref();
            let reactor = match factory.create(queue_id) {
                Ok(reactor) => reactor,
                Err(e) => {
                    error!(queue = %queue_id, error = %e, "Failed to create reactor");
                    host.shutdown().await;
                    return Err(e);
                }
            };

            if !reactor.start_processing().await {
                warn!(queue = %queue_id, state = %reactor.state(), "Reactor failed to start");
            }
            host.reactors.push(reactor);
        }

        info!(reactors = host.reactors.len(), "Reactor host started");
        Ok(host)
    }

    /// Start a reactor for every queue that has registered handlers.
    pub async fn start_registered(factory: &ReactorFactory) -> Result<Self, ReactorError> {
        let queue_ids: Vec<String> = factory
            .registry()
            .queue_ids()
            .into_iter()
            .map(str::to_string)
            .collect();
        Self::start(factory, queue_ids).await
    }

    pub fn reactors(&self) -> &[Box<dyn Reactor>] {
        &self.reactors
    }

    pub fn reactor(&self, queue_id: &str) -> Option<&dyn Reactor> {
        self.reactors
            .iter()
            .find(|reactor| reactor.queue_id() == queue_id)
            .map(|reactor| reactor.as_ref())
    }

    pub fn statuses(&self) -> Vec<ReactorStatus> {
        self.reactors.iter().map(|reactor| reactor.status()).collect()
    }

    /// Every reactor is listening.
    pub fn is_ready(&self) -> bool {
        !self.reactors.is_empty()
            && self
                .reactors
                .iter()
                .all(|reactor| reactor.state() == ReactorState::Listening)
    }

    /// Dispose every reactor concurrently. Idempotent.
    pub async fn shutdown(&self) {
        join_all(self.reactors.iter().map(|reactor| reactor.dispose())).await;
        info!(reactors = self.reactors.len(), "Reactor host stopped");
    }
}
