//! Single-flight handles: concurrent requests for the same operation share one
//! execution instead of each starting their own.

use std::future::Future;
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};

use futures::future::{BoxFuture, FutureExt, Shared};
use tracing::trace;

pub(crate) type SharedTask<T> = Shared<BoxFuture<'static, T>>;

pub(crate) fn lock<T>(mutex: &Mutex<T>) -> MutexGuard<'_, T> {
    mutex.lock().unwrap_or_else(PoisonError::into_inner)
}

struct Slot<T: Clone> {
    generation: u64,
    task: Option<(u64, SharedTask<T>)>,
}

/// Mutex-guarded "in-flight future" for one operation class.
///
/// The first caller starts the work; later callers get a clone of the same
/// shared future until it settles. The slot is emptied by the task itself on
/// completion, and only if the slot still holds that task's generation.
///
/// The slot keeps a clone of the task, so work abandoned by every caller is
/// resumed by the next one rather than restarted.
pub(crate) struct InFlight<T: Clone> {
    name: &'static str,
    slot: Arc<Mutex<Slot<T>>>,
}

impl<T> InFlight<T>
where
    T: Clone + Send + Sync + 'static,
{
    pub(crate) fn new(name: &'static str) -> Self {
        Self {
            name,
            slot: Arc::new(Mutex::new(Slot {
                generation: 0,
                task: None,
            })),
        }
    }

    /// Join the outstanding task, or start one built by `make`.
    pub(crate) fn run<F, Fut>(&self, make: F) -> SharedTask<T>
    where
        F: FnOnce() -> Fut,
        Fut: Future<Output = T> + Send + 'static,
    {
        let mut slot = lock(&self.slot);
        if let Some((generation, task)) = slot.task.as_ref() {
            trace!(op = self.name, generation, "Joining in-flight operation");
            return task.clone();
        }

        slot.generation += 1;
        let generation = slot.generation;
        let work = make();
        let handle = Arc::clone(&self.slot);
        let name = self.name;

        let task = async move {
            let output = work.await;
            let mut slot = lock(&handle);
            if matches!(slot.task, Some((current, _)) if current == generation) {
                slot.task = None;
            }
            trace!(op = name, generation, "In-flight operation settled");
            output
        }
        .boxed()
        .shared();

        slot.task = Some((generation, task.clone()));
        task
    }

    /// The outstanding task, if any, without starting one.
    pub(crate) fn pending(&self) -> Option<SharedTask<T>> {
        lock(&self.slot).task.as_ref().map(|(_, task)| task.clone())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicUsize, Ordering};

    use tokio::sync::Notify;

    #[tokio::test]
    async fn test_concurrent_callers_share_one_run() {
        let inflight = InFlight::<u32>::new("test");
        let started = Arc::new(AtomicUsize::new(0));
        let gate = Arc::new(Notify::new());

        let make = || {
            let started = Arc::clone(&started);
            let gate = Arc::clone(&gate);
            move || async move {
                started.fetch_add(1, Ordering::SeqCst);
                gate.notified().await;
                7
            }
        };

        let a = inflight.run(make());
        let b = inflight.run(make());
        assert!(inflight.pending().is_some());

        gate.notify_one();
        let (a, b) = tokio::join!(a, b);

        assert_eq!((a, b), (7, 7));
        assert_eq!(started.load(Ordering::SeqCst), 1);
        assert!(inflight.pending().is_none());
    }

    #[tokio::test]
    async fn test_new_run_after_settle() {
        let inflight = InFlight::<u32>::new("test");
        let runs = Arc::new(AtomicUsize::new(0));

        for expected in 1..=2 {
            let runs = Arc::clone(&runs);
            let out = inflight
                .run(move || async move { runs.fetch_add(1, Ordering::SeqCst) as u32 + 1 })
                .await;
            assert_eq!(out, expected);
        }
        assert_eq!(runs.load(Ordering::SeqCst), 2);
    }

    #[tokio::test]
    async fn test_abandoned_task_is_resumed_not_restarted() {
        let inflight = InFlight::<u32>::new("test");
        let runs = Arc::new(AtomicUsize::new(0));
        let gate = Arc::new(Notify::new());

        let first = {
            let runs = Arc::clone(&runs);
            let gate = Arc::clone(&gate);
            inflight.run(move || async move {
                runs.fetch_add(1, Ordering::SeqCst);
                gate.notified().await;
                1
            })
        };
        // Poll once so the work starts, then drop the only caller handle
        let mut first = Box::pin(first);
        assert!(futures::poll!(first.as_mut()).is_pending());
        drop(first);

        let second = inflight.run(|| async { 2 });
        gate.notify_one();
        assert_eq!(second.await, 1);
        assert_eq!(runs.load(Ordering::SeqCst), 1);
    }
}
