//! Detached fire-and-forget work (revalidation, eviction sweeps).
//!
//! A task's failure never reaches the request that spawned it: errors and panics are
//! logged here and dropped.

use std::future::Future;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use tokio::sync::Notify;
use tracing::warn;

use crate::error::Result;

#[derive(Default)]
struct Inner {
  pending: AtomicUsize,
  failures: AtomicUsize,
  idle: Notify,
}

/// Spawner and failure sink for background tasks.
#[derive(Clone, Default)]
pub struct TaskSink {
  inner: Arc<Inner>,
}

impl TaskSink {
  pub fn new() -> Self {
    Self::default()
  }

  /// Detach `future` onto the runtime.
  pub fn spawn<F>(&self, label: &'static str, future: F)
  where
    F: Future<Output = Result<()>> + Send + 'static,
  {
    self.inner.pending.fetch_add(1, Ordering::SeqCst);
    let inner = Arc::clone(&self.inner);
    let handle = tokio::spawn(future);

    tokio::spawn(async move {
      let failed = match handle.await {
        Ok(Ok(())) => false,
        Ok(Err(e)) => {
          warn!(task = label, error = %e, "background task failed");
          true
        }
        Err(e) => {
          warn!(task = label, error = %e, "background task aborted");
          true
        }
      };
      if failed {
        inner.failures.fetch_add(1, Ordering::SeqCst);
      }
      if inner.pending.fetch_sub(1, Ordering::SeqCst) == 1 {
        inner.idle.notify_waiters();
      }
    });
  }

  /// Number of tasks still running.
  pub fn pending(&self) -> usize {
    self.inner.pending.load(Ordering::SeqCst)
  }

  /// Number of tasks that ended in an error or panic so far.
  pub fn failures(&self) -> usize {
    self.inner.failures.load(Ordering::SeqCst)
  }

  /// Wait until no task is pending.
  pub async fn drain(&self) {
    loop {
      let notified = self.inner.idle.notified();
      tokio::pin!(notified);
      // Register before checking the counter so a wakeup in between is not lost
      notified.as_mut().enable();
      if self.pending() == 0 {
        return;
      }
      notified.await;
    }
  }
}
