//! Asynchronous callback delivery
//!
//! User-facing callbacks (status, reauthorize, registry subscribers) are
//! never invoked inline with the state transition that produced them, so a
//! callback can call back into the session without deadlocking. The default
//! dispatcher funnels closures through a single queue drained on the tokio
//! worker pool, preserving delivery order; embedders with a thread-affine UI
//! supply their own implementation.

use tokio::sync::mpsc;

/// A queued callback invocation.
pub type Task = Box<dyn FnOnce() + Send + 'static>;

/// Delivery seam for user-facing callbacks.
pub trait Dispatcher: Send + Sync {
    fn dispatch(&self, task: Task);
}

/// Dispatcher draining callbacks in FIFO order on a tokio task.
///
/// Must be created inside a tokio runtime. Dropping the dispatcher stops the
/// drain task once queued callbacks have run.
pub struct TokioDispatcher {
    tx: mpsc::UnboundedSender<Task>,
}

impl TokioDispatcher {
    pub fn new() -> Self {
        let (tx, mut rx) = mpsc::unbounded_channel::<Task>();
        tokio::spawn(async move {
            while let Some(task) = rx.recv().await {
                task();
            }
        });
        Self { tx }
    }
}

impl Default for TokioDispatcher {
    fn default() -> Self {
        Self::new()
    }
}

impl Dispatcher for TokioDispatcher {
    fn dispatch(&self, task: Task) {
        // A closed channel means the runtime is shutting down; callbacks are
        // dropped with it.
        let _ = self.tx.send(task);
    }
}
