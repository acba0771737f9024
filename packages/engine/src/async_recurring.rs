//! Stateful periodic scheduler with overlap prevention, timeout-bounded
//! waits, and lifecycle events.

use std::future::Future;
use std::sync::atomic::{AtomicU8, Ordering};
use std::sync::{Arc, Mutex, RwLock};
use std::time::Duration;

use chrono::{DateTime, Utc};
use serde_json::Value;
use tokio::sync::broadcast;
use tokio::task::JoinHandle;
use work_core::{BoxError, RecurringEvent, RecurringState, WorkError, WorkFuture};

/// The abstract operation a scheduler fires on every tick.
///
/// Implement this for stateful operations; for plain closures use
/// [`FnRecurring`] or [`AsyncRecurringTask::from_fn`].
pub trait Recurring: Send + Sync + 'static {
    /// Produce one invocation of the operation.
    fn run(&self) -> WorkFuture;

    /// Hook invoked with each accepted (non-stale) result, before the
    /// `Completed` event fires.
    fn on_complete(&self, _result: &Value) {}
}

/// A simple function-based recurring operation.
pub struct FnRecurring<F>
where
    F: Fn() -> WorkFuture + Send + Sync + 'static,
{
    f: F,
}

impl<F> FnRecurring<F>
where
    F: Fn() -> WorkFuture + Send + Sync + 'static,
{
    pub fn new(f: F) -> Self {
        Self { f }
    }
}

impl<F> Recurring for FnRecurring<F>
where
    F: Fn() -> WorkFuture + Send + Sync + 'static,
{
    fn run(&self) -> WorkFuture {
        (self.f)()
    }
}

/// Error type for scheduler lifecycle operations.
#[derive(Debug, thiserror::Error)]
pub enum RecurringError {
    #[error("recurring task is already started")]
    AlreadyStarted,

    #[error("recurring task has been stopped")]
    Stopped,

    #[error("pausing a recurring task is not supported")]
    PauseUnsupported,
}

struct Timing {
    interval: Duration,
    timeout: Option<Duration>,
}

struct Shared {
    op: Arc<dyn Recurring>,
    timing: RwLock<Timing>,
    state: AtomicU8,
    last_updated: Mutex<Option<DateTime<Utc>>>,
    event_tx: broadcast::Sender<RecurringEvent>,
}

impl Shared {
    fn state(&self) -> RecurringState {
        RecurringState::from_u8(self.state.load(Ordering::SeqCst))
    }

    fn cas_state(&self, from: RecurringState, to: RecurringState) -> Result<(), RecurringState> {
        self.state
            .compare_exchange(from.as_u8(), to.as_u8(), Ordering::SeqCst, Ordering::SeqCst)
            .map(|_| ())
            .map_err(RecurringState::from_u8)
    }

    fn send(&self, event: RecurringEvent) {
        let _ = self.event_tx.send(event);
    }

    /// One scheduled firing opportunity. Entry is a compare-and-set so a
    /// busy scheduler skips the tick rather than serializing ticks.
    async fn tick(shared: &Arc<Self>) {
        if shared
            .cas_state(RecurringState::Running, RecurringState::Processing)
            .is_err()
        {
            tracing::debug!("previous invocation still processing, skipping tick");
            return;
        }

        let started = Utc::now();
        shared.send(RecurringEvent::Updating { timestamp: started });

        // The operation's own task carries the completion protocol, so an
        // abandoned wait still resolves (and is then filtered as stale if a
        // newer tick has completed in the meantime).
        let work = {
            let shared = shared.clone();
            tokio::spawn(async move {
                match shared.op.run().await {
                    Ok(value) => shared.complete(started, value),
                    Err(cause) => shared.error(WorkError::Failed(cause)),
                }
            })
        };

        let timeout = shared.timing.read().unwrap().timeout;
        let joined = match timeout {
            Some(t) => match tokio::time::timeout(t, work).await {
                Ok(joined) => joined,
                Err(_) => {
                    tracing::debug!("invocation overran {t:?}, abandoning wait");
                    let _ = shared.cas_state(RecurringState::Processing, RecurringState::Running);
                    return;
                }
            },
            None => work.await,
        };

        if let Err(join) = joined {
            shared.error(WorkError::Panicked(join.to_string()));
        }
        let _ = shared.cas_state(RecurringState::Processing, RecurringState::Running);
    }

    /// Record a successful invocation, unless a newer one already has.
    fn complete(&self, started: DateTime<Utc>, value: Value) {
        let timestamp;
        {
            let mut last = self.last_updated.lock().unwrap();
            if let Some(prev) = *last {
                if started < prev {
                    tracing::debug!("discarding stale completion of tick started at {started}");
                    return;
                }
            }
            timestamp = Utc::now();
            *last = Some(timestamp);
        }

        self.op.on_complete(&value);
        self.send(RecurringEvent::Completed {
            result: value,
            timestamp,
        });
    }

    fn error(&self, error: WorkError) {
        self.send(RecurringEvent::Error {
            error: Arc::new(error),
            timestamp: Utc::now(),
        });
    }
}

/// Fires an abstract operation on a fixed period with a full lifecycle:
/// overlap-preventing state machine, timeout-bounded waits, stale-completion
/// discard, and broadcast events.
///
/// Register observers via [`AsyncRecurringTask::subscribe`] before calling
/// [`AsyncRecurringTask::start`].
pub struct AsyncRecurringTask {
    shared: Arc<Shared>,
    handle: Mutex<Option<JoinHandle<()>>>,
}

impl AsyncRecurringTask {
    pub fn new(op: impl Recurring, interval: Duration) -> Self {
        let (event_tx, _) = broadcast::channel(1024);
        Self {
            shared: Arc::new(Shared {
                op: Arc::new(op),
                timing: RwLock::new(Timing {
                    interval,
                    timeout: None,
                }),
                state: AtomicU8::new(RecurringState::Idle.as_u8()),
                last_updated: Mutex::new(None),
                event_tx,
            }),
            handle: Mutex::new(None),
        }
    }

    /// Build a scheduler around a plain async closure.
    pub fn from_fn<F, Fut>(interval: Duration, f: F) -> Self
    where
        F: Fn() -> Fut + Send + Sync + 'static,
        Fut: Future<Output = Result<Value, BoxError>> + Send + 'static,
    {
        Self::new(
            FnRecurring::new(move || -> WorkFuture { Box::pin(f()) }),
            interval,
        )
    }

    /// Bound the scheduler's wait per invocation. An overrunning invocation
    /// is abandoned, not cancelled.
    pub fn with_timeout(self, timeout: Duration) -> Self {
        self.shared.timing.write().unwrap().timeout = Some(timeout);
        self
    }

    /// Subscribe to scheduler events.
    pub fn subscribe(&self) -> broadcast::Receiver<RecurringEvent> {
        self.shared.event_tx.subscribe()
    }

    pub fn state(&self) -> RecurringState {
        self.shared.state()
    }

    /// Timestamp of the last accepted completion.
    pub fn last_updated(&self) -> Option<DateTime<Utc>> {
        *self.shared.last_updated.lock().unwrap()
    }

    /// Begin the periodic timer. The first tick fires immediately.
    pub fn start(&self) -> Result<(), RecurringError> {
        self.shared
            .cas_state(RecurringState::Idle, RecurringState::Running)
            .map_err(|actual| match actual {
                RecurringState::Stopped => RecurringError::Stopped,
                _ => RecurringError::AlreadyStarted,
            })?;

        let shared = self.shared.clone();
        let mut slot = self.handle.lock().unwrap();
        *slot = Some(tokio::spawn(async move {
            loop {
                if !shared.state().is_alive() {
                    break;
                }
                Shared::tick(&shared).await;
                // Read fresh each cycle so retiming applies without a
                // stop/start.
                let period = shared.timing.read().unwrap().interval;
                tokio::time::sleep(period).await;
            }
        }));
        Ok(())
    }

    /// Reserved. Pausing is not implemented; this always fails.
    pub fn pause(&self) -> Result<(), RecurringError> {
        Err(RecurringError::PauseUnsupported)
    }

    /// Cancel the timer and fire a `Stopped` notification. Safe to call from
    /// any alive state; repeated stops fire exactly one notification. An
    /// in-flight invocation is not interrupted.
    pub fn stop(&self) {
        let prev = RecurringState::from_u8(
            self.shared
                .state
                .swap(RecurringState::Stopped.as_u8(), Ordering::SeqCst),
        );
        if prev != RecurringState::Stopped {
            if let Some(handle) = self.handle.lock().unwrap().take() {
                handle.abort();
            }
            self.shared.send(RecurringEvent::Stopped {
                timestamp: Utc::now(),
            });
        }
    }

    /// Execute one invocation immediately, outside the timer cadence,
    /// following the same success/error contract as a tick. Useful for an
    /// on-demand refresh.
    pub async fn run_once(&self) -> Result<Value, Arc<WorkError>> {
        let started = Utc::now();
        match self.shared.op.run().await {
            Ok(value) => {
                self.shared.complete(started, value.clone());
                Ok(value)
            }
            Err(cause) => {
                let error = Arc::new(WorkError::Failed(cause));
                self.shared.send(RecurringEvent::Error {
                    error: error.clone(),
                    timestamp: Utc::now(),
                });
                Err(error)
            }
        }
    }

    /// Update the period of a running instance without a stop/start cycle.
    pub fn change_interval(&self, interval: Duration) {
        self.shared.timing.write().unwrap().interval = interval;
    }

    /// Update the period and the per-invocation timeout together.
    pub fn change_timing(&self, interval: Duration, timeout: Option<Duration>) {
        let mut timing = self.shared.timing.write().unwrap();
        timing.interval = interval;
        timing.timeout = timeout;
    }
}

impl Drop for AsyncRecurringTask {
    fn drop(&mut self) {
        if let Some(handle) = self.handle.lock().unwrap().take() {
            handle.abort();
        }
    }
}
