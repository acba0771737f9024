//! Fixed-period execution of a single action with overlap skipping.

use std::future::Future;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use futures_util::future::BoxFuture;
use tokio::task::JoinHandle;

type ActionFn = Arc<dyn Fn() -> BoxFuture<'static, ()> + Send + Sync>;

struct BusyGuard(Arc<AtomicBool>);

impl Drop for BusyGuard {
    fn drop(&mut self) {
        self.0.store(false, Ordering::SeqCst);
    }
}

/// Fires an async action every `interval` on a single background timer.
///
/// A tick arriving while the previous action is still running is skipped
/// (no queuing, no overlap). A `timeout`, when configured, bounds only the
/// scheduler's wait for a firing: an overrunning action is abandoned and
/// keeps running, but the scheduler moves on.
///
/// [`RecurringTask::stop`] or dropping the task cancels future firings; an
/// in-flight action is not interrupted.
pub struct RecurringTask {
    interval: Duration,
    timeout: Option<Duration>,
    action: ActionFn,
    busy: Arc<AtomicBool>,
    handle: Mutex<Option<JoinHandle<()>>>,
}

impl RecurringTask {
    pub fn new<F, Fut>(interval: Duration, action: F) -> Self
    where
        F: Fn() -> Fut + Send + Sync + 'static,
        Fut: Future<Output = ()> + Send + 'static,
    {
        Self {
            interval,
            timeout: None,
            action: Arc::new(move || -> BoxFuture<'static, ()> { Box::pin(action()) }),
            busy: Arc::new(AtomicBool::new(false)),
            handle: Mutex::new(None),
        }
    }

    /// Bound the scheduler's wait per firing.
    pub fn with_timeout(mut self, timeout: Duration) -> Self {
        self.timeout = Some(timeout);
        self
    }

    /// Begin firing. The first firing is immediate; subsequent firings
    /// follow every `interval`. A no-op when already started.
    pub fn start(&self) {
        let mut slot = self.handle.lock().unwrap();
        if slot.is_some() {
            return;
        }

        let action = self.action.clone();
        let busy = self.busy.clone();
        let period = self.interval;
        let timeout = self.timeout;

        *slot = Some(tokio::spawn(async move {
            let mut interval = tokio::time::interval(period);
            interval.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Skip);
            loop {
                interval.tick().await;

                // Skip the tick entirely while the previous action runs.
                if busy
                    .compare_exchange(false, true, Ordering::SeqCst, Ordering::SeqCst)
                    .is_err()
                {
                    tracing::debug!("recurring action still running, skipping tick");
                    continue;
                }

                let fut = action();
                let done = BusyGuard(busy.clone());
                let work = tokio::spawn(async move {
                    // Clears the busy flag on drop, even if the action panics.
                    let _done = done;
                    fut.await;
                });

                match timeout {
                    Some(t) => {
                        // An overrun is abandoned; the action keeps running
                        // and clears the busy flag at its natural end.
                        if tokio::time::timeout(t, work).await.is_err() {
                            tracing::debug!("recurring action overran {t:?}, abandoning wait");
                        }
                    }
                    None => {
                        let _ = work.await;
                    }
                }
            }
        }));
    }

    /// Cancel future firings. An in-flight action is not interrupted.
    pub fn stop(&self) {
        if let Some(handle) = self.handle.lock().unwrap().take() {
            handle.abort();
        }
    }

    /// Whether an action is currently running.
    pub fn is_busy(&self) -> bool {
        self.busy.load(Ordering::SeqCst)
    }
}

impl Drop for RecurringTask {
    fn drop(&mut self) {
        self.stop();
    }
}
