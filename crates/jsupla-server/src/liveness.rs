//! Keepalive pings and dead-connection detection.

use std::ops::ControlFlow;
use std::sync::{Arc, Weak};
use std::time::Duration;

use async_trait::async_trait;

use crate::scheduler::{ScheduledTask, Scheduler};

/// Connection watched by a [`LivenessMonitor`].
#[async_trait]
pub trait LivenessTarget: Send + Sync + 'static {
    /// Send a keepalive ping. Write failures are the target's to log.
    async fn send_ping(&self);

    /// Check whether the connection is still alive.
    ///
    /// A target that finds itself stale tears the connection down and returns
    /// `false`; monitoring stops then.
    async fn check_alive(&self) -> bool;
}

/// Armed ping and stale-check tasks of one connection.
///
/// Both tasks start after twice the period. They only hold a weak reference
/// to the target and stop once it is gone.
#[derive(Debug)]
pub struct LivenessMonitor {
    ping: ScheduledTask,
    stale_check: ScheduledTask,
}

impl LivenessMonitor {
    pub fn arm<T: LivenessTarget>(scheduler: &Scheduler, period: Duration, target: Weak<T>) -> Self {
        let initial_delay = period * 2;

        let ping_target = target.clone();
        let ping = scheduler.schedule_periodic(initial_delay, period, move || {
            let target = ping_target.clone();
            async move {
                match target.upgrade() {
                    Some(target) => {
                        target.send_ping().await;
                        ControlFlow::Continue(())
                    }
                    None => ControlFlow::Break(()),
                }
            }
        });

        let stale_check = scheduler.schedule_periodic(initial_delay, period, move || {
            let target = target.clone();
            async move { check(target.upgrade()).await }
        });

        Self { ping, stale_check }
    }

    pub fn cancel(&self) {
        self.ping.cancel();
        self.stale_check.cancel();
    }
}

impl Drop for LivenessMonitor {
    fn drop(&mut self) {
        self.cancel();
    }
}

async fn check<T: LivenessTarget>(target: Option<Arc<T>>) -> ControlFlow<()> {
    match target {
        Some(target) if target.check_alive().await => ControlFlow::Continue(()),
        _ => ControlFlow::Break(()),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};

    #[derive(Default)]
    struct CountingTarget {
        pings: AtomicUsize,
        checks: AtomicUsize,
        dead: AtomicBool,
    }

    #[async_trait]
    impl LivenessTarget for CountingTarget {
        async fn send_ping(&self) {
            self.pings.fetch_add(1, Ordering::SeqCst);
        }

        async fn check_alive(&self) -> bool {
            self.checks.fetch_add(1, Ordering::SeqCst);
            !self.dead.load(Ordering::SeqCst)
        }
    }

    #[tokio::test(start_paused = true)]
    async fn test_first_run_after_twice_the_period() {
        let target = Arc::new(CountingTarget::default());
        let _monitor = LivenessMonitor::arm(
            &Scheduler::current(),
            Duration::from_secs(10),
            Arc::downgrade(&target),
        );

        tokio::time::sleep(Duration::from_secs(19)).await;
        assert_eq!(target.pings.load(Ordering::SeqCst), 0);
        assert_eq!(target.checks.load(Ordering::SeqCst), 0);

        // Runs at 20 and 30.
        tokio::time::sleep(Duration::from_secs(16)).await;
        assert_eq!(target.pings.load(Ordering::SeqCst), 2);
        assert_eq!(target.checks.load(Ordering::SeqCst), 2);
    }

    #[tokio::test(start_paused = true)]
    async fn test_stale_check_stops_when_target_dies() {
        let target = Arc::new(CountingTarget::default());
        let _monitor = LivenessMonitor::arm(
            &Scheduler::current(),
            Duration::from_secs(10),
            Arc::downgrade(&target),
        );
        target.dead.store(true, Ordering::SeqCst);

        tokio::time::sleep(Duration::from_secs(60)).await;
        assert_eq!(target.checks.load(Ordering::SeqCst), 1);
    }

    #[tokio::test(start_paused = true)]
    async fn test_cancel_stops_both_tasks() {
        let target = Arc::new(CountingTarget::default());
        let monitor = LivenessMonitor::arm(
            &Scheduler::current(),
            Duration::from_secs(10),
            Arc::downgrade(&target),
        );
        monitor.cancel();

        tokio::time::sleep(Duration::from_secs(60)).await;
        assert_eq!(target.pings.load(Ordering::SeqCst), 0);
        assert_eq!(target.checks.load(Ordering::SeqCst), 0);
    }

    #[tokio::test(start_paused = true)]
    async fn test_dropped_target_ends_monitoring() {
        let target = Arc::new(CountingTarget::default());
        let monitor = LivenessMonitor::arm(
            &Scheduler::current(),
            Duration::from_secs(10),
            Arc::downgrade(&target),
        );
        drop(target);

        tokio::time::sleep(Duration::from_secs(25)).await;
        assert!(monitor.ping.is_finished());
        assert!(monitor.stale_check.is_finished());
    }
}
