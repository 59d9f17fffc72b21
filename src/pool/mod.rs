//! Bounded async worker pool.
//!
//! Grounded on `tools/pool/goroutine.go`'s `ants.PoolWithFunc` sizing
//! (`GoRoutineCount = 100_000`, `GoRoutineExecSecond = 60`) and the
//! `Semaphore` + `JoinSet` dispatch shape the teacher's `planner` used for
//! its DAG barrier. Unlike `ants`, tokio has no fixed-size goroutine pool
//! primitive to wrap — a `Semaphore` capping concurrent `tokio::spawn`s is
//! the idiomatic equivalent; the semaphore permit is the "slot", the
//! spawned task is the "worker".

use std::future::Future;
use std::sync::Arc;
use tokio::sync::Semaphore;
use tracing::error;

use crate::errors::EngineError;

/// A bounded pool of concurrent task slots.
///
/// Cloning is cheap (the semaphore is reference-counted); every clone
/// shares the same capacity.
#[derive(Clone)]
pub struct WorkerPool {
    semaphore: Arc<Semaphore>,
}

impl WorkerPool {
    pub fn new(capacity: usize) -> Self {
        Self {
            semaphore: Arc::new(Semaphore::new(capacity)),
        }
    }

    /// Runs `task` on a fresh tokio task once a slot is free, catching any
    /// panic and converting it into `EngineError::SystemPanic` instead of
    /// letting it tear down the worker.
    pub async fn spawn<F, Fut>(&self, task: F) -> Result<(), EngineError>
    where
        F: FnOnce() -> Fut + Send + 'static,
        Fut: Future<Output = ()> + Send + 'static,
    {
        let permit = self
            .semaphore
            .clone()
            .acquire_owned()
            .await
            .map_err(|e| EngineError::SystemPanic(format!("worker pool closed: {e}")))?;

        let handle = tokio::spawn(async move {
            let _permit = permit;
            // Boxing pins the future behind a `Box`, which is unconditionally
            // `Unpin` — that's what lets the panic boundary below poll it
            // without requiring the task's own future to be `Unpin`.
            let boxed: std::pin::Pin<Box<dyn Future<Output = ()> + Send>> = Box::pin(task());
            let result = boxed.catch_unwind().await;
            if let Err(panic) = result {
                let msg = panic_message(&panic);
                error!(panic = %msg, "worker task panicked");
            }
        });

        // Detached: the caller tracks completion via its own WaitGroup-style
        // mechanism (see `runner`), matching `ants.Invoke`'s fire-and-forget
        // submission semantics.
        drop(handle);
        Ok(())
    }

    pub fn available_permits(&self) -> usize {
        self.semaphore.available_permits()
    }
}

trait CatchUnwind: Future + Sized {
    fn catch_unwind(self) -> futures_catch_unwind::CatchUnwind<Self>;
}

// A tiny local shim: rather than pull in `futures` solely for
// `FutureExt::catch_unwind`, wrap the synchronous panic boundary around the
// polled future's body using `std::panic::catch_unwind` at the await point.
mod futures_catch_unwind {
    use std::any::Any;
    use std::future::Future;
    use std::panic::{self, AssertUnwindSafe};
    use std::pin::Pin;
    use std::task::{Context, Poll};

    pub struct CatchUnwind<F> {
        inner: F,
    }

    impl<F: Future + Unpin> Future for CatchUnwind<F> {
        type Output = Result<F::Output, Box<dyn Any + Send>>;

        fn poll(self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<Self::Output> {
            let this = self.get_mut();
            let pinned = Pin::new(&mut this.inner);
            match panic::catch_unwind(AssertUnwindSafe(|| pinned.poll(cx))) {
                Ok(Poll::Ready(v)) => Poll::Ready(Ok(v)),
                Ok(Poll::Pending) => Poll::Pending,
                Err(e) => Poll::Ready(Err(e)),
            }
        }
    }

    pub fn wrap<F: Future + Unpin>(inner: F) -> CatchUnwind<F> {
        CatchUnwind { inner }
    }
}

impl<F: Future + Unpin> CatchUnwind for F {
    fn catch_unwind(self) -> futures_catch_unwind::CatchUnwind<Self> {
        futures_catch_unwind::wrap(self)
    }
}

fn panic_message(panic: &Box<dyn std::any::Any + Send>) -> String {
    if let Some(s) = panic.downcast_ref::<&str>() {
        s.to_string()
    } else if let Some(s) = panic.downcast_ref::<String>() {
        s.clone()
    } else {
        "non-string panic payload".to_string()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicUsize, Ordering};

    #[tokio::test]
    async fn runs_submitted_tasks() {
        let pool = WorkerPool::new(4);
        let counter = Arc::new(AtomicUsize::new(0));
        for _ in 0..10 {
            let counter = counter.clone();
            pool.spawn(move || async move {
                counter.fetch_add(1, Ordering::SeqCst);
            })
            .await
            .unwrap();
        }
        tokio::time::sleep(std::time::Duration::from_millis(50)).await;
        assert_eq!(counter.load(Ordering::SeqCst), 10);
    }

    #[tokio::test]
    async fn capacity_limits_concurrent_slots() {
        let pool = WorkerPool::new(2);
        assert_eq!(pool.available_permits(), 2);
    }
}
