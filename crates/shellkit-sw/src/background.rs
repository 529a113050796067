//! Detached background work.
//!
//! Cache writes must never hold up or fail a response. They run as detached
//! tokio tasks; a failure is logged and reported on the event channel, and
//! nothing else.

use std::fmt::Display;
use std::future::Future;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;

use tokio::sync::{mpsc, Notify};
use tracing::{trace, warn};

use crate::event::ControllerEvent;

struct Inner {
    in_flight: AtomicUsize,
    idle: Notify,
    events: mpsc::UnboundedSender<ControllerEvent>,
}

/// Decrements the in-flight count even if the task panics.
struct InFlight(Arc<Inner>);

impl Drop for InFlight {
    fn drop(&mut self) {
        if self.0.in_flight.fetch_sub(1, Ordering::AcqRel) == 1 {
            self.0.idle.notify_waiters();
        }
    }
}

/// Spawner for fire-and-forget tasks with an error channel.
#[derive(Clone)]
pub struct BackgroundTasks {
    inner: Arc<Inner>,
}

impl BackgroundTasks {
    pub fn new(events: mpsc::UnboundedSender<ControllerEvent>) -> Self {
        Self {
            inner: Arc::new(Inner {
                in_flight: AtomicUsize::new(0),
                idle: Notify::new(),
                events,
            }),
        }
    }

    /// Spawn `task` detached from the caller. Must be called inside a tokio
    /// runtime.
    pub fn spawn<F, E>(&self, label: &'static str, task: F)
    where
        F: Future<Output = Result<(), E>> + Send + 'static,
        E: Display + Send + 'static,
    {
        self.inner.in_flight.fetch_add(1, Ordering::AcqRel);
        let guard = InFlight(Arc::clone(&self.inner));

        tokio::spawn(async move {
            let guard = guard;
            match task.await {
                Ok(()) => trace!(task = label, "Background task finished"),
                Err(e) => {
                    warn!(task = label, error = %e, "Background task failed");
                    let _ = guard.0.events.send(ControllerEvent::BackgroundFailure {
                        task: label,
                        error: e.to_string(),
                    });
                }
            }
        });
    }

    /// Tasks spawned and not yet finished.
    pub fn in_flight(&self) -> usize {
        self.inner.in_flight.load(Ordering::Acquire)
    }

    /// Wait until no task is in flight.
    ///
    /// Tasks spawned while waiting are waited for too. A task that never
    /// completes makes this wait forever.
    pub async fn settle(&self) {
        loop {
            let idle = self.inner.idle.notified();
            if self.in_flight() == 0 {
                return;
            }
            idle.await;
        }
    }
}

impl std::fmt::Debug for BackgroundTasks {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("BackgroundTasks")
            .field("in_flight", &self.in_flight())
            .finish()
    }
}
