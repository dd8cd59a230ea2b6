//! Shared timer service for session callbacks.
//!
//! Sessions never own the scheduler; they only hand it work. Periodic tasks
//! use fixed-delay semantics: the next run starts `period` after the previous
//! run finished.

use std::future::Future;
use std::ops::ControlFlow;
use std::time::Duration;

use tokio::runtime::Handle;
use tokio::task::JoinHandle;

/// Handle to scheduled work.
///
/// Dropping it leaves the work scheduled; call [`ScheduledTask::cancel`] to
/// stop it.
#[derive(Debug)]
pub struct ScheduledTask {
    handle: JoinHandle<()>,
}

impl ScheduledTask {
    /// Stop the task. A run in progress is stopped at its next suspension point.
    pub fn cancel(&self) {
        self.handle.abort();
    }

    pub fn is_finished(&self) -> bool {
        self.handle.is_finished()
    }
}

/// Timer service backed by a tokio runtime.
#[derive(Debug, Clone)]
pub struct Scheduler {
    handle: Handle,
}

impl Scheduler {
    pub fn new(handle: Handle) -> Self {
        Self { handle }
    }

    /// Scheduler on the runtime of the caller.
    ///
    /// Must be called from within a tokio runtime.
    pub fn current() -> Self {
        Self::new(Handle::current())
    }

    /// Run `task` once after `delay`.
    pub fn schedule_once<F>(&self, delay: Duration, task: F) -> ScheduledTask
    where
        F: Future<Output = ()> + Send + 'static,
    {
        let handle = self.handle.spawn(async move {
            tokio::time::sleep(delay).await;
            task.await;
        });
        ScheduledTask { handle }
    }

    /// Run `task` after `initial_delay`, then again `period` after every run
    /// until it returns [`ControlFlow::Break`] or is cancelled.
    pub fn schedule_periodic<F, Fut>(
        &self,
        initial_delay: Duration,
        period: Duration,
        mut task: F,
    ) -> ScheduledTask
    where
        F: FnMut() -> Fut + Send + 'static,
        Fut: Future<Output = ControlFlow<()>> + Send + 'static,
    {
        let handle = self.handle.spawn(async move {
            tokio::time::sleep(initial_delay).await;
            loop {
                if task().await.is_break() {
                    break;
                }
                tokio::time::sleep(period).await;
            }
        });
        ScheduledTask { handle }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Arc;
    use std::sync::atomic::{AtomicUsize, Ordering};

    #[tokio::test(start_paused = true)]
    async fn test_schedule_once_fires_after_delay() {
        let scheduler = Scheduler::current();
        let fired = Arc::new(AtomicUsize::new(0));
        let counter = fired.clone();
        scheduler.schedule_once(Duration::from_secs(10), async move {
            counter.fetch_add(1, Ordering::SeqCst);
        });

        tokio::time::sleep(Duration::from_secs(9)).await;
        assert_eq!(fired.load(Ordering::SeqCst), 0);
        tokio::time::sleep(Duration::from_secs(2)).await;
        assert_eq!(fired.load(Ordering::SeqCst), 1);
    }

    #[tokio::test(start_paused = true)]
    async fn test_periodic_initial_delay_and_period() {
        let scheduler = Scheduler::current();
        let runs = Arc::new(AtomicUsize::new(0));
        let counter = runs.clone();
        let task = scheduler.schedule_periodic(
            Duration::from_secs(20),
            Duration::from_secs(10),
            move || {
                let counter = counter.clone();
                async move {
                    counter.fetch_add(1, Ordering::SeqCst);
                    ControlFlow::Continue(())
                }
            },
        );

        tokio::time::sleep(Duration::from_secs(19)).await;
        assert_eq!(runs.load(Ordering::SeqCst), 0);
        // Runs at 20, 30, 40.
        tokio::time::sleep(Duration::from_secs(26)).await;
        assert_eq!(runs.load(Ordering::SeqCst), 3);

        task.cancel();
        tokio::time::sleep(Duration::from_secs(100)).await;
        assert_eq!(runs.load(Ordering::SeqCst), 3);
    }

    #[tokio::test(start_paused = true)]
    async fn test_periodic_stops_on_break() {
        let scheduler = Scheduler::current();
        let runs = Arc::new(AtomicUsize::new(0));
        let counter = runs.clone();
        let task = scheduler.schedule_periodic(Duration::ZERO, Duration::from_secs(1), move || {
            let counter = counter.clone();
            async move {
                if counter.fetch_add(1, Ordering::SeqCst) == 2 {
                    ControlFlow::Break(())
                } else {
                    ControlFlow::Continue(())
                }
            }
        });

        tokio::time::sleep(Duration::from_secs(30)).await;
        assert_eq!(runs.load(Ordering::SeqCst), 3);
        assert!(task.is_finished());
    }
}
