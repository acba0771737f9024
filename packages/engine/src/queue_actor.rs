//! Queue dispatcher actor: bounded-concurrency dispatch for a growing
//! sequence of work items.

use std::collections::VecDeque;
use std::sync::Arc;
use std::sync::atomic::{AtomicU8, AtomicU64, AtomicUsize, Ordering};

use chrono::Utc;
use ractor::{Actor, ActorProcessingErr, ActorRef};
use tokio::sync::broadcast;
use work_core::{QueueConfig, QueueEvent, QueueState, QueueStats, WorkItem, WorkState};

use crate::messages::{QueueError, QueueMessage};

/// Live counters shared between the dispatcher and the queue handle.
///
/// Kept outside the actor so they stay readable after `kill()` has torn the
/// dispatcher down.
pub(crate) struct SharedStats {
    state: AtomicU8,
    pending: AtomicUsize,
    in_flight: AtomicUsize,
    total_processed: AtomicU64,
}

impl SharedStats {
    pub(crate) fn new() -> Self {
        Self {
            state: AtomicU8::new(QueueState::Idle.as_u8()),
            pending: AtomicUsize::new(0),
            in_flight: AtomicUsize::new(0),
            total_processed: AtomicU64::new(0),
        }
    }

    pub(crate) fn state(&self) -> QueueState {
        QueueState::from_u8(self.state.load(Ordering::SeqCst))
    }

    fn swap_state(&self, new: QueueState) -> QueueState {
        QueueState::from_u8(self.state.swap(new.as_u8(), Ordering::SeqCst))
    }

    pub(crate) fn pending(&self) -> usize {
        self.pending.load(Ordering::SeqCst)
    }

    fn set_pending(&self, len: usize) {
        self.pending.store(len, Ordering::SeqCst);
    }

    pub(crate) fn in_flight(&self) -> usize {
        self.in_flight.load(Ordering::SeqCst)
    }

    pub(crate) fn total_processed(&self) -> u64 {
        self.total_processed.load(Ordering::SeqCst)
    }

    pub(crate) fn snapshot(&self) -> QueueStats {
        QueueStats {
            pending: self.pending(),
            in_flight: self.in_flight(),
            total_processed: self.total_processed(),
        }
    }
}

/// State for the queue dispatcher actor.
pub struct QueueActorState {
    config: QueueConfig,
    /// Pending items in FIFO submission order.
    pending: VecDeque<WorkItem>,
    shared: Arc<SharedStats>,
    event_tx: broadcast::Sender<QueueEvent>,
}

impl QueueActorState {
    pub(crate) fn new(
        config: QueueConfig,
        shared: Arc<SharedStats>,
        event_tx: broadcast::Sender<QueueEvent>,
    ) -> Self {
        Self {
            config,
            pending: VecDeque::new(),
            shared,
            event_tx,
        }
    }

    fn state(&self) -> QueueState {
        self.shared.state()
    }

    /// Broadcast an event. A lagging or dropped subscriber cannot affect the
    /// dispatcher or other observers.
    fn broadcast(&self, event: QueueEvent) {
        let _ = self.event_tx.send(event);
    }

    fn transition(&self, new_state: QueueState) {
        let old_state = self.shared.swap_state(new_state);
        if old_state != new_state {
            self.broadcast(QueueEvent::StateChanged {
                old_state,
                new_state,
                timestamp: Utc::now(),
            });
        }
    }

    /// Launch pending items while the queue is processing and a throttle
    /// slot is free. Each item runs on its own task and reports back with
    /// [`QueueMessage::ItemFinished`].
    fn dispatch(&mut self, myself: &ActorRef<QueueMessage>) {
        while self.state().is_processing()
            && self.shared.in_flight() < self.config.throttle as usize
        {
            let Some(item) = self.pending.pop_front() else {
                break;
            };
            self.shared.set_pending(self.pending.len());
            self.shared.in_flight.fetch_add(1, Ordering::SeqCst);

            self.broadcast(QueueEvent::ItemStarted {
                tag: item.tag().map(str::to_string),
                attempt: item.attempts(),
                timestamp: Utc::now(),
            });

            let myself = myself.clone();
            let task_item = item.clone();
            let timeout = self.config.item_timeout;
            tokio::spawn(async move {
                let outcome = task_item.run(timeout).await;
                // The dispatcher may already be gone (kill); the outcome is
                // then abandoned along with the queue.
                let _ = myself.send_message(QueueMessage::ItemFinished {
                    item: task_item,
                    outcome,
                });
            });

            if self.pending.is_empty() {
                self.broadcast(QueueEvent::QueueEmpty {
                    timestamp: Utc::now(),
                });
            }
        }
    }

    fn start(&mut self, myself: &ActorRef<QueueMessage>) -> Result<(), QueueError> {
        match self.state() {
            QueueState::Idle | QueueState::Stopped => {
                tracing::info!("Starting queue: {}", self.config.name);
                self.transition(QueueState::Processing);
                self.broadcast(QueueEvent::Started {
                    timestamp: Utc::now(),
                });
                self.dispatch(myself);
                Ok(())
            }
            QueueState::Paused => {
                // Release the pause gate and resume in place.
                self.transition(QueueState::Processing);
                self.dispatch(myself);
                Ok(())
            }
            QueueState::Processing => Ok(()),
            other => Err(QueueError::InvalidState(other)),
        }
    }

    fn pause(&self) -> Result<(), QueueError> {
        match self.state() {
            QueueState::Processing => {
                self.transition(QueueState::Paused);
                Ok(())
            }
            other => Err(QueueError::InvalidState(other)),
        }
    }

    fn stop(&self) -> Result<(), QueueError> {
        match self.state() {
            QueueState::Processing | QueueState::Paused => {
                self.broadcast(QueueEvent::Stopping {
                    timestamp: Utc::now(),
                });
                if self.shared.in_flight() == 0 {
                    self.transition(QueueState::Stopped);
                    self.broadcast(QueueEvent::Stopped {
                        timestamp: Utc::now(),
                    });
                } else {
                    // In-flight items run to completion; the last one to
                    // report back completes the stop.
                    self.transition(QueueState::PendingStop);
                }
                Ok(())
            }
            // Repeated stops are no-ops; Stopped fires exactly once.
            _ => Ok(()),
        }
    }

    fn item_finished(
        &mut self,
        myself: &ActorRef<QueueMessage>,
        item: WorkItem,
        outcome: Result<serde_json::Value, work_core::WorkError>,
    ) {
        self.shared.in_flight.fetch_sub(1, Ordering::SeqCst);

        match outcome {
            Ok(_) => {
                self.shared.total_processed.fetch_add(1, Ordering::SeqCst);
                self.broadcast(QueueEvent::ItemProcessed {
                    item: item.snapshot(),
                    timestamp: Utc::now(),
                });
            }
            Err(error) => {
                let tag = item.tag().map(str::to_string);
                let attempt = item.attempts();
                let will_retry = attempt < self.config.attempts;
                tracing::warn!(
                    "Work item {} failed on attempt {}: {}",
                    tag.as_deref().unwrap_or("<untagged>"),
                    attempt,
                    error
                );
                self.broadcast(QueueEvent::ItemFailed {
                    tag: tag.clone(),
                    error: Arc::new(error),
                    attempt,
                    will_retry,
                    timestamp: Utc::now(),
                });

                if will_retry {
                    // Back to the tail so a failing item does not starve the
                    // rest of the queue.
                    item.reset_for_retry();
                    self.broadcast(QueueEvent::ItemRetrying {
                        tag,
                        attempt: item.attempts(),
                        timestamp: Utc::now(),
                    });
                    self.pending.push_back(item);
                    self.shared.set_pending(self.pending.len());
                } else {
                    debug_assert_eq!(item.state(), WorkState::Failed);
                    self.shared.total_processed.fetch_add(1, Ordering::SeqCst);
                    self.broadcast(QueueEvent::ItemProcessed {
                        item: item.snapshot(),
                        timestamp: Utc::now(),
                    });
                }
            }
        }

        if self.state() == QueueState::PendingStop && self.shared.in_flight() == 0 {
            self.transition(QueueState::Stopped);
            self.broadcast(QueueEvent::Stopped {
                timestamp: Utc::now(),
            });
        } else {
            self.dispatch(myself);
        }
    }

    fn kill(&mut self) {
        tracing::info!("Killing queue: {}", self.config.name);
        if matches!(
            self.state(),
            QueueState::Processing | QueueState::Paused | QueueState::PendingStop
        ) {
            self.broadcast(QueueEvent::Stopping {
                timestamp: Utc::now(),
            });
        }
        // In-flight callables are abandoned, not interrupted.
        self.pending.clear();
        self.shared.set_pending(0);
        self.shared.in_flight.store(0, Ordering::SeqCst);
        self.shared.total_processed.store(0, Ordering::SeqCst);
        self.transition(QueueState::Killed);
        self.broadcast(QueueEvent::Killed {
            timestamp: Utc::now(),
        });
    }

    fn reset(&mut self) {
        self.pending.clear();
        self.shared.set_pending(0);
        self.shared.total_processed.store(0, Ordering::SeqCst);
    }
}

/// Dispatcher actor: one per queue, owning all queue state.
pub struct QueueActor;

impl Actor for QueueActor {
    type Msg = QueueMessage;
    type State = QueueActorState;
    type Arguments = QueueActorState;

    async fn pre_start(
        &self,
        _myself: ActorRef<Self::Msg>,
        args: Self::Arguments,
    ) -> Result<Self::State, ActorProcessingErr> {
        tracing::info!("Starting queue dispatcher: {}", args.config.name);
        Ok(args)
    }

    async fn handle(
        &self,
        myself: ActorRef<Self::Msg>,
        message: Self::Msg,
        state: &mut Self::State,
    ) -> Result<(), ActorProcessingErr> {
        match message {
            QueueMessage::Enqueue { items } => {
                let count = items.len();
                if count > 0 {
                    state.pending.extend(items);
                    state.shared.set_pending(state.pending.len());
                    state.broadcast(QueueEvent::ItemsAdded {
                        count,
                        timestamp: Utc::now(),
                    });
                    state.dispatch(&myself);
                }
            }

            QueueMessage::Start { reply } => {
                let _ = reply.send(state.start(&myself));
            }

            QueueMessage::Pause { reply } => {
                let _ = reply.send(state.pause());
            }

            QueueMessage::Stop { reply } => {
                let _ = reply.send(state.stop());
            }

            QueueMessage::Kill { reply } => {
                state.kill();
                let _ = reply.send(());
                myself.stop(None);
                return Ok(());
            }

            QueueMessage::Reset { reply } => {
                state.reset();
                let _ = reply.send(());
            }

            QueueMessage::ItemFinished { item, outcome } => {
                state.item_finished(&myself, item, outcome);
            }
        }

        Ok(())
    }
}
