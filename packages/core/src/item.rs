//! Work item domain types: a single unit of deferred work.

use std::fmt;
use std::future::Future;
use std::sync::{Arc, Mutex};
use std::time::Duration;

use chrono::{DateTime, Utc};
use futures_util::future::BoxFuture;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use tokio::task::JoinHandle;

use crate::error::{BoxError, WorkError};

/// Future type produced by a work callable.
pub type WorkFuture = BoxFuture<'static, Result<Value, BoxError>>;

/// A stored work callable. Arguments are captured by the closure at
/// construction, so invocation takes none.
pub type WorkFn = Arc<dyn Fn() -> WorkFuture + Send + Sync>;

/// Current state of a work item in its lifecycle.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum WorkState {
    /// Waiting to be executed.
    #[default]
    Pending,
    /// An invocation is currently in flight.
    Processing,
    /// The callable returned successfully.
    Completed,
    /// The last attempt failed or timed out.
    Failed,
}

impl WorkState {
    /// Check if the item is in a terminal state.
    pub fn is_terminal(&self) -> bool {
        matches!(self, WorkState::Completed | WorkState::Failed)
    }

    /// Get a simple status string for display.
    pub fn as_str(&self) -> &'static str {
        match self {
            WorkState::Pending => "pending",
            WorkState::Processing => "processing",
            WorkState::Completed => "completed",
            WorkState::Failed => "failed",
        }
    }
}

impl fmt::Display for WorkState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

/// Read-only view of a work item, carried in events and logs.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct WorkSnapshot {
    /// Caller-supplied correlation tag, if any.
    pub tag: Option<String>,
    /// State at the time of the snapshot.
    pub state: WorkState,
    /// Attempts made so far (the first invocation counts as attempt 1).
    pub attempts: u32,
    /// Last successful return value, if any.
    pub result: Option<Value>,
    /// When the item was created.
    pub created_at: DateTime<Utc>,
}

struct ItemInner {
    state: WorkState,
    attempts: u32,
    result: Option<Value>,
}

/// A single unit of deferred work: a callable with captured arguments, an
/// attempt counter, a result slot, and a completion state machine.
///
/// Cloning is cheap and shares the same underlying item; the queue keeps one
/// clone while a spawned task runs another. All state transitions go through
/// the per-item lock. Consumers must not drive an item they have already
/// submitted to a queue.
#[derive(Clone)]
pub struct WorkItem {
    tag: Option<String>,
    work: WorkFn,
    created_at: DateTime<Utc>,
    inner: Arc<Mutex<ItemInner>>,
}

impl WorkItem {
    /// Create a new pending work item from an async callable.
    ///
    /// Arguments are captured by the closure:
    ///
    /// ```ignore
    /// let path = path.clone();
    /// let item = WorkItem::new(move || {
    ///     let path = path.clone();
    ///     async move { ingest(path).await }
    /// });
    /// ```
    pub fn new<F, Fut>(work: F) -> Self
    where
        F: Fn() -> Fut + Send + Sync + 'static,
        Fut: Future<Output = Result<Value, BoxError>> + Send + 'static,
    {
        Self {
            tag: None,
            work: Arc::new(move || -> WorkFuture { Box::pin(work()) }),
            created_at: Utc::now(),
            inner: Arc::new(Mutex::new(ItemInner {
                state: WorkState::Pending,
                attempts: 1,
                result: None,
            })),
        }
    }

    /// Attach a caller-supplied correlation tag, used for de-duplication and
    /// logging by the embedder.
    pub fn with_tag(mut self, tag: impl Into<String>) -> Self {
        self.tag = Some(tag.into());
        self
    }

    pub fn tag(&self) -> Option<&str> {
        self.tag.as_deref()
    }

    pub fn created_at(&self) -> DateTime<Utc> {
        self.created_at
    }

    pub fn state(&self) -> WorkState {
        self.inner.lock().unwrap().state
    }

    /// Attempts made so far; starts at 1.
    pub fn attempts(&self) -> u32 {
        self.inner.lock().unwrap().attempts
    }

    /// Last successful return value.
    pub fn result(&self) -> Option<Value> {
        self.inner.lock().unwrap().result.clone()
    }

    /// Take a read-only snapshot of the item.
    pub fn snapshot(&self) -> WorkSnapshot {
        let inner = self.inner.lock().unwrap();
        WorkSnapshot {
            tag: self.tag.clone(),
            state: inner.state,
            attempts: inner.attempts,
            result: inner.result.clone(),
            created_at: self.created_at,
        }
    }

    /// Put a failed item back to `Pending` and count the next attempt.
    /// Used by the owning queue when re-enqueueing.
    pub fn reset_for_retry(&self) {
        let mut inner = self.inner.lock().unwrap();
        inner.state = WorkState::Pending;
        inner.attempts = inner.attempts.saturating_add(1);
    }

    /// Invoke the callable, waiting until it finishes or `timeout` elapses.
    ///
    /// The callable runs on its own tokio task. On timeout only the wait is
    /// cancelled; the task keeps running to its natural end. Exactly one
    /// invocation may be in flight per item; a second concurrent `run` fails
    /// with [`WorkError::Busy`].
    pub async fn run(&self, timeout: Option<Duration>) -> Result<Value, WorkError> {
        {
            let mut inner = self.inner.lock().unwrap();
            if inner.state == WorkState::Processing {
                return Err(WorkError::Busy);
            }
            inner.state = WorkState::Processing;
        }

        let mut handle = tokio::spawn((self.work)());
        let joined = match timeout {
            Some(t) => match tokio::time::timeout(t, &mut handle).await {
                Ok(joined) => joined,
                Err(_) => {
                    self.mark_failed();
                    return Err(WorkError::Timeout { timeout: t });
                }
            },
            None => (&mut handle).await,
        };

        match joined {
            Ok(Ok(value)) => {
                let mut inner = self.inner.lock().unwrap();
                inner.state = WorkState::Completed;
                inner.result = Some(value.clone());
                Ok(value)
            }
            Ok(Err(cause)) => {
                self.mark_failed();
                Err(WorkError::Failed(cause))
            }
            Err(join) => {
                self.mark_failed();
                Err(WorkError::Panicked(join.to_string()))
            }
        }
    }

    /// Invoke the callable on a separate task and return immediately.
    /// Completion is observed through the returned handle or, for
    /// queue-owned items, through queue events.
    pub fn spawn(&self) -> JoinHandle<Result<Value, WorkError>> {
        let item = self.clone();
        tokio::spawn(async move { item.run(None).await })
    }

    fn mark_failed(&self) {
        self.inner.lock().unwrap().state = WorkState::Failed;
    }
}

impl fmt::Debug for WorkItem {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let inner = self.inner.lock().unwrap();
        f.debug_struct("WorkItem")
            .field("tag", &self.tag)
            .field("state", &inner.state)
            .field("attempts", &inner.attempts)
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicBool, AtomicU32, Ordering};

    #[derive(Debug, thiserror::Error)]
    #[error("boom {0}")]
    struct Boom(u32);

    #[tokio::test]
    async fn run_success_stores_result() {
        let item = WorkItem::new(|| async { Ok(serde_json::json!(42)) }).with_tag("answer");
        let value = item.run(None).await.unwrap();
        assert_eq!(value, serde_json::json!(42));
        assert_eq!(item.state(), WorkState::Completed);
        assert_eq!(item.result(), Some(serde_json::json!(42)));
        assert_eq!(item.tag(), Some("answer"));
    }

    #[tokio::test]
    async fn run_failure_preserves_original_cause() {
        let item = WorkItem::new(|| async { Err::<Value, BoxError>(Box::new(Boom(7))) });
        let err = item.run(None).await.unwrap_err();
        assert_eq!(item.state(), WorkState::Failed);
        let WorkError::Failed(cause) = &err else {
            panic!("expected Failed, got {err:?}");
        };
        let boom = cause.downcast_ref::<Boom>().expect("original cause lost");
        assert_eq!(boom.0, 7);
    }

    #[tokio::test]
    async fn run_timeout_abandons_wait_without_cancelling() {
        let finished = Arc::new(AtomicBool::new(false));
        let flag = finished.clone();
        let item = WorkItem::new(move || {
            let flag = flag.clone();
            async move {
                tokio::time::sleep(Duration::from_millis(100)).await;
                flag.store(true, Ordering::SeqCst);
                Ok(Value::Null)
            }
        });

        let err = item.run(Some(Duration::from_millis(20))).await.unwrap_err();
        assert!(err.is_timeout());
        assert_eq!(item.state(), WorkState::Failed);
        assert!(!finished.load(Ordering::SeqCst));

        // The underlying task was not cancelled and runs to its end.
        tokio::time::sleep(Duration::from_millis(150)).await;
        assert!(finished.load(Ordering::SeqCst));
    }

    #[tokio::test]
    async fn retry_reset_counts_attempts() {
        let calls = Arc::new(AtomicU32::new(0));
        let seen = calls.clone();
        let item = WorkItem::new(move || {
            let seen = seen.clone();
            async move {
                seen.fetch_add(1, Ordering::SeqCst);
                Err::<Value, BoxError>(Box::new(Boom(0)))
            }
        });

        assert_eq!(item.attempts(), 1);
        let _ = item.run(None).await;
        item.reset_for_retry();
        assert_eq!(item.state(), WorkState::Pending);
        assert_eq!(item.attempts(), 2);
        let _ = item.run(None).await;
        assert_eq!(calls.load(Ordering::SeqCst), 2);
    }

    #[tokio::test]
    async fn concurrent_run_is_rejected() {
        let item = WorkItem::new(|| async {
            tokio::time::sleep(Duration::from_millis(80)).await;
            Ok(Value::Null)
        });

        let running = item.spawn();
        tokio::time::sleep(Duration::from_millis(20)).await;
        let err = item.run(None).await.unwrap_err();
        assert!(matches!(err, WorkError::Busy));
        assert!(running.await.unwrap().is_ok());
    }
}
