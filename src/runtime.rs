//! Runtime for dispatching chat events
//!
//! The receive loop spawns one task per inbound event. Pipelines for the same
//! user are serialized by a keyed lock inside the dispatcher.

mod executor;
pub mod traits;
mod user_locks;

#[cfg(test)]
pub mod testing;

pub use executor::{DispatchReport, Dispatcher, START_COMMAND};
pub use traits::*;
pub use user_locks::{UserLockGuard, UserLocks};

use crate::error::EngineError;
use crate::state_machine::InboundEvent;
use std::sync::Arc;
use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;
use tokio_util::task::TaskTracker;

impl<S, T> Dispatcher<S, T>
where
    S: SessionStore + 'static,
    T: Transport + 'static,
{
    /// Receive events until the channel closes or `shutdown` fires.
    ///
    /// Cancellation stops accepting new events; pipelines already running are
    /// awaited, not aborted.
    pub async fn run(
        self: Arc<Self>,
        mut events: mpsc::Receiver<InboundEvent>,
        shutdown: CancellationToken,
    ) {
        tracing::info!("Starting dispatch loop");
        let tracker = TaskTracker::new();

        loop {
            let event = tokio::select! {
                () = shutdown.cancelled() => {
                    tracing::info!("Shutdown requested, no longer accepting events");
                    break;
                }
                event = events.recv() => event,
            };
            let Some(event) = event else {
                tracing::info!("Event source closed");
                break;
            };

            let dispatcher = Arc::clone(&self);
            tracker.spawn(async move {
                let user_id = event.user_id;
                match dispatcher.dispatch(event).await {
                    Ok(_) | Err(EngineError::Unauthorized(_)) => {}
                    Err(e @ (EngineError::TransportFailure(_) | EngineError::PersistenceFailure(_))) => {
                        tracing::error!(user_id, error = %e, "Event handling failed");
                    }
                    Err(e) => {
                        tracing::warn!(user_id, error = %e, "Event rejected");
                    }
                }
            });
        }

        tracker.close();
        if !tracker.is_empty() {
            tracing::info!(in_flight = tracker.len(), "Waiting for in-flight events");
        }
        tracker.wait().await;
        tracing::info!("Dispatch loop stopped");
    }
}
