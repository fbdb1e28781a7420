//! Cancellable periodic tasks (spec.md §9: "periodic cron jobs ... are
//! expressed as timer futures/tasks whose cancellation returns a
//! handle"). A thin wrapper over `tokio::time::interval` plus a
//! `tokio::task::JoinHandle`, in the style of the teacher's
//! connection-pool maintenance loop (`connection_pool.rs`).

use std::future::Future;
use std::time::Duration;
use tokio::task::JoinHandle;
use tokio::time::MissedTickBehavior;

/// A running periodic task. Dropping this without calling [`cancel`] lets
/// the task keep running detached — callers that need deterministic
/// teardown (tests, shutdown) should call `cancel` explicitly.
pub struct ScheduledTask {
    handle: JoinHandle<()>,
}

impl ScheduledTask {
    /// Spawns `action` to run every `period`, starting after the first
    /// `period` elapses (not immediately), per spec.md §4.4's randomized
    /// stabilization interval.
    pub fn spawn<F, Fut>(period: Duration, mut action: F) -> Self
    where
        F: FnMut() -> Fut + Send + 'static,
        Fut: Future<Output = ()> + Send,
    {
        let handle = tokio::spawn(async move {
            let mut interval = tokio::time::interval(period);
            interval.set_missed_tick_behavior(MissedTickBehavior::Delay);
            loop {
                interval.tick().await;
                action().await;
            }
        });
        Self { handle }
    }

    /// Aborts the task. Returns immediately; the task may still be
    /// mid-poll for a moment (tokio's usual abort semantics).
    pub fn cancel(self) {
        self.handle.abort();
    }

    pub fn is_finished(&self) -> bool {
        self.handle.is_finished()
    }
}

/// spec.md §4.4: "the stabilization tick is jittered, not fixed" —
/// avoids every node in a freshly-bootstrapped network hammering its
/// successor in lockstep.
pub fn jittered(base: Duration) -> Duration {
    use rand::Rng;
    let jitter_frac: f64 = rand::thread_rng().gen_range(0.75..1.25);
    Duration::from_secs_f64(base.as_secs_f64() * jitter_frac)
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicU32, Ordering};
    use std::sync::Arc;

    #[tokio::test(start_paused = true)]
    async fn spawned_task_ticks_and_cancels() {
        let count = Arc::new(AtomicU32::new(0));
        let counter = count.clone();
        let task = ScheduledTask::spawn(Duration::from_millis(10), move || {
            let counter = counter.clone();
            async move {
                counter.fetch_add(1, Ordering::SeqCst);
            }
        });
        tokio::time::advance(Duration::from_millis(35)).await;
        tokio::task::yield_now().await;
        assert!(count.load(Ordering::SeqCst) >= 2);
        task.cancel();
    }

    #[test]
    fn jitter_stays_within_bounds() {
        let base = Duration::from_secs(30);
        for _ in 0..100 {
            let j = jittered(base);
            assert!(j >= Duration::from_secs_f64(22.0));
            assert!(j <= Duration::from_secs_f64(38.0));
        }
    }
}
