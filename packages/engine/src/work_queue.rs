//! Public handle for a queue dispatcher.

use std::future::Future;
use std::sync::Arc;

use ractor::{Actor, ActorRef, RpcReplyPort, concurrency};
use serde_json::Value;
use tokio::sync::{broadcast, watch};
use work_core::{BoxError, QueueConfig, QueueEvent, QueueState, QueueStats, WorkItem};

use crate::messages::{QueueError, QueueMessage};
use crate::queue_actor::{QueueActor, QueueActorState, SharedStats};

/// Bounded-concurrency dispatcher for a dynamic, growing sequence of work
/// items.
///
/// Construction spawns a dedicated dispatcher actor which owns the item
/// queue; this handle talks to it and reads the live counters. Register
/// observers via [`WorkQueue::subscribe`] before calling
/// [`WorkQueue::start`].
pub struct WorkQueue {
    actor: ActorRef<QueueMessage>,
    shared: Arc<SharedStats>,
    event_tx: broadcast::Sender<QueueEvent>,
    config: QueueConfig,
    done: watch::Receiver<bool>,
}

impl WorkQueue {
    /// Validate the configuration and spawn the dispatcher in `Idle`.
    pub async fn spawn(config: QueueConfig) -> Result<Self, QueueError> {
        if config.throttle < 1 {
            return Err(QueueError::InvalidThrottle);
        }
        if config.attempts < 1 {
            return Err(QueueError::InvalidAttempts);
        }

        let (event_tx, _) = broadcast::channel(1024);
        let shared = Arc::new(SharedStats::new());
        let actor_state = QueueActorState::new(config.clone(), shared.clone(), event_tx.clone());

        let (actor, handle) = Actor::spawn(None, QueueActor, actor_state)
            .await
            .map_err(|e| QueueError::Spawn(e.to_string()))?;

        // Fan the dispatcher's join handle out through a watch channel so
        // both kill() and wait_for_shutdown() can observe the exit.
        let (done_tx, done) = watch::channel(false);
        tokio::spawn(async move {
            let _ = handle.await;
            let _ = done_tx.send(true);
        });

        Ok(Self {
            actor,
            shared,
            event_tx,
            config,
            done,
        })
    }

    pub fn config(&self) -> &QueueConfig {
        &self.config
    }

    /// Subscribe to queue events. Each receiver gets its own cursor; a slow
    /// or dropped subscriber cannot affect the others.
    pub fn subscribe(&self) -> broadcast::Receiver<QueueEvent> {
        self.event_tx.subscribe()
    }

    /// Append one item at the tail, waking the dispatcher if it is idle.
    pub fn enqueue(&self, item: WorkItem) -> Result<(), QueueError> {
        self.enqueue_all([item])
    }

    /// Append many items at the tail in order.
    pub fn enqueue_all(
        &self,
        items: impl IntoIterator<Item = WorkItem>,
    ) -> Result<(), QueueError> {
        self.actor
            .send_message(QueueMessage::Enqueue {
                items: items.into_iter().collect(),
            })
            .map_err(QueueError::closed)
    }

    /// Convenience constructor: wrap a callable into a [`WorkItem`], enqueue
    /// it, and return the item for observation.
    pub fn enqueue_fn<F, Fut>(&self, work: F) -> Result<WorkItem, QueueError>
    where
        F: Fn() -> Fut + Send + Sync + 'static,
        Fut: Future<Output = Result<Value, BoxError>> + Send + 'static,
    {
        let item = WorkItem::new(work);
        self.enqueue(item.clone())?;
        Ok(item)
    }

    /// Begin dispatching, or resume from `Paused`. A no-op when already
    /// processing.
    pub async fn start(&self) -> Result<(), QueueError> {
        self.call(|reply| QueueMessage::Start { reply }).await?
    }

    /// Close the pause gate. Items already in flight run to completion.
    /// Only valid while `Processing`.
    pub async fn pause(&self) -> Result<(), QueueError> {
        self.call(|reply| QueueMessage::Pause { reply }).await?
    }

    /// Request the dispatch loop exit. The queue is `Stopped` once the last
    /// in-flight item has reported back; repeated stops are no-ops.
    pub async fn stop(&self) -> Result<(), QueueError> {
        self.call(|reply| QueueMessage::Stop { reply }).await?
    }

    /// Stop dispatching, clear the queue, reset the counters, and tear the
    /// dispatcher down. Blocks until the dispatcher has fully exited.
    /// In-flight callables are abandoned, not interrupted.
    pub async fn kill(&self) -> Result<(), QueueError> {
        // An already-dead dispatcher means a previous kill won.
        let _ = self.call(|reply| QueueMessage::Kill { reply }).await;
        self.wait_for_shutdown().await;
        Ok(())
    }

    /// Clear pending items and the processed count. In-flight items are
    /// unaffected.
    pub async fn reset(&self) -> Result<(), QueueError> {
        self.call(|reply| QueueMessage::Reset { reply }).await
    }

    /// Wait until the dispatcher has exited (after [`WorkQueue::kill`]).
    /// Foreground embedders await this before returning from `main`.
    pub async fn wait_for_shutdown(&self) {
        let mut done = self.done.clone();
        let _ = done.wait_for(|exited| *exited).await;
    }

    pub fn state(&self) -> QueueState {
        self.shared.state()
    }

    /// Number of pending items.
    pub fn count(&self) -> usize {
        self.shared.pending()
    }

    /// Number of items currently executing.
    pub fn in_flight(&self) -> usize {
        self.shared.in_flight()
    }

    /// Terminal outcomes seen since the last reset.
    pub fn total_processed(&self) -> u64 {
        self.shared.total_processed()
    }

    pub fn stats(&self) -> QueueStats {
        self.shared.snapshot()
    }

    async fn call<T>(
        &self,
        make: impl FnOnce(RpcReplyPort<T>) -> QueueMessage,
    ) -> Result<T, QueueError>
    where
        T: Send + 'static,
    {
        let (tx, rx) = concurrency::oneshot();
        self.actor
            .send_message(make(tx.into()))
            .map_err(QueueError::closed)?;
        rx.await
            .map_err(|_| QueueError::closed("dispatcher dropped the reply"))
    }
}

impl std::fmt::Debug for WorkQueue {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("WorkQueue")
            .field("name", &self.config.name)
            .field("state", &self.state())
            .field("count", &self.count())
            .field("in_flight", &self.in_flight())
            .finish()
    }
}
