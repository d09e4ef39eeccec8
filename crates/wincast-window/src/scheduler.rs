use std::collections::HashMap;
use std::sync::atomic::{AtomicU64, Ordering};
use std::time::Duration;

use parking_lot::Mutex;

/// One-shot unit of work handed to a [`Scheduler`]. `'static` and `Send`
/// because it may run on a different task/thread than the one that
/// scheduled it.
pub type BoxedTask = Box<dyn FnOnce() + Send + 'static>;

/// Handle returned by [`Scheduler::schedule_in`], used to cancel a still-
/// pending timer. Opaque and only meaningful to the scheduler that issued
/// it.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct TimerId(u64);

/// Replaces `idle_add`/`timeout_add` GUI event loop scheduling with a plain
/// trait, so `WindowSource` never depends on a concrete event loop, and
/// timer-driven transitions (expiry, max-delay safety, auto-refresh) are
/// unit-testable against a scheduler that never actually sleeps.
pub trait Scheduler: Send + Sync {
    /// Runs `task` once, after at least `delay` has elapsed.
    fn schedule_in(&self, delay: Duration, task: BoxedTask) -> TimerId;
    /// Runs `task` as soon as possible, off the caller's stack.
    fn schedule_now(&self, task: BoxedTask);
    /// Cancels a still-pending timer. A no-op if `id` already fired or was
    /// already cancelled.
    fn cancel(&self, id: TimerId);
}

/// Real scheduler backed by a Tokio runtime handle. Each `schedule_in`
/// spawns a task that sleeps then runs the callback; `cancel` aborts that
/// task outright, which is safe here because the callback itself does no
/// I/O and holds no lock across an await point.
pub struct TokioScheduler {
    handle: tokio::runtime::Handle,
    next_id: AtomicU64,
    pending: Mutex<HashMap<TimerId, tokio::task::AbortHandle>>,
}

impl TokioScheduler {
    #[must_use]
    pub fn new(handle: tokio::runtime::Handle) -> Self {
        Self {
            handle,
            next_id: AtomicU64::new(1),
            pending: Mutex::new(HashMap::new()),
        }
    }

    /// Binds to the runtime of the calling context. Panics (via
    /// [`tokio::runtime::Handle::current`]) outside a Tokio runtime.
    #[must_use]
    pub fn current() -> Self {
        Self::new(tokio::runtime::Handle::current())
    }

    fn next_id(&self) -> TimerId {
        TimerId(self.next_id.fetch_add(1, Ordering::Relaxed))
    }
}

impl Scheduler for TokioScheduler {
    fn schedule_in(&self, delay: Duration, task: BoxedTask) -> TimerId {
        let id = self.next_id();
        let join = self.handle.spawn(async move {
            tokio::time::sleep(delay).await;
            task();
        });
        self.pending.lock().insert(id, join.abort_handle());
        id
    }

    fn schedule_now(&self, task: BoxedTask) {
        self.handle.spawn(async move { task() });
    }

    fn cancel(&self, id: TimerId) {
        if let Some(handle) = self.pending.lock().remove(&id) {
            handle.abort();
        }
    }
}

struct PendingTimer {
    id: TimerId,
    delay: Duration,
    task: BoxedTask,
}

/// Test double that records scheduled work instead of running it against a
/// clock. `WindowSource`'s timer-driven transitions (expiry, max-delay
/// safety, auto-refresh) are exercised by calling [`ManualScheduler::fire`]
/// or [`ManualScheduler::fire_all`] directly, with no real sleeping and no
/// Tokio runtime required.
#[derive(Default)]
pub struct ManualScheduler {
    next_id: AtomicU64,
    pending: Mutex<Vec<PendingTimer>>,
}

impl ManualScheduler {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Number of timers currently armed (not yet fired or cancelled).
    #[must_use]
    pub fn pending_count(&self) -> usize {
        self.pending.lock().len()
    }

    /// The delays of every currently-armed timer, in scheduling order.
    #[must_use]
    pub fn pending_delays(&self) -> Vec<Duration> {
        self.pending.lock().iter().map(|t| t.delay).collect()
    }

    /// Runs the timer with this id if it's still pending, returning whether
    /// it was found. Removing before running means a task that re-arms a
    /// timer with the same semantic purpose doesn't observe a stale entry.
    pub fn fire(&self, id: TimerId) -> bool {
        let task = {
            let mut pending = self.pending.lock();
            pending.iter().position(|t| t.id == id).map(|idx| pending.remove(idx).task)
        };
        match task {
            Some(task) => {
                task();
                true
            }
            None => false,
        }
    }

    /// Runs every timer currently pending, oldest-scheduled first. Useful
    /// for tests that don't care which specific timer fires, only that
    /// everything armed so far has run.
    pub fn fire_all(&self) {
        let pending = std::mem::take(&mut *self.pending.lock());
        for timer in pending {
            (timer.task)();
        }
    }
}

impl Scheduler for ManualScheduler {
    fn schedule_in(&self, delay: Duration, task: BoxedTask) -> TimerId {
        let id = TimerId(self.next_id.fetch_add(1, Ordering::Relaxed));
        self.pending.lock().push(PendingTimer { id, delay, task });
        id
    }

    fn schedule_now(&self, task: BoxedTask) {
        task();
    }

    fn cancel(&self, id: TimerId) {
        self.pending.lock().retain(|t| t.id != id);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::AtomicBool;
    use std::sync::Arc;

    #[test]
    fn manual_scheduler_records_without_running() {
        let scheduler = ManualScheduler::new();
        let ran = Arc::new(AtomicBool::new(false));
        let flag = Arc::clone(&ran);
        scheduler.schedule_in(Duration::from_millis(50), Box::new(move || flag.store(true, Ordering::SeqCst)));
        assert_eq!(scheduler.pending_count(), 1);
        assert!(!ran.load(Ordering::SeqCst));
    }

    #[test]
    fn fire_all_runs_every_pending_timer() {
        let scheduler = ManualScheduler::new();
        let count = Arc::new(AtomicU64::new(0));
        for _ in 0..3 {
            let c = Arc::clone(&count);
            scheduler.schedule_in(Duration::from_millis(10), Box::new(move || { c.fetch_add(1, Ordering::SeqCst); }));
        }
        scheduler.fire_all();
        assert_eq!(count.load(Ordering::SeqCst), 3);
        assert_eq!(scheduler.pending_count(), 0);
    }

    #[test]
    fn cancel_prevents_a_timer_from_firing() {
        let scheduler = ManualScheduler::new();
        let ran = Arc::new(AtomicBool::new(false));
        let flag = Arc::clone(&ran);
        let id = scheduler.schedule_in(Duration::from_millis(10), Box::new(move || flag.store(true, Ordering::SeqCst)));
        scheduler.cancel(id);
        scheduler.fire_all();
        assert!(!ran.load(Ordering::SeqCst));
    }

    #[test]
    fn schedule_now_runs_synchronously_on_manual_scheduler() {
        let scheduler = ManualScheduler::new();
        let ran = Arc::new(AtomicBool::new(false));
        let flag = Arc::clone(&ran);
        scheduler.schedule_now(Box::new(move || flag.store(true, Ordering::SeqCst)));
        assert!(ran.load(Ordering::SeqCst));
    }
}
