//! Keyed delayed-task scheduler
//!
//! Every pending task is its own tokio task waiting on the wall clock. The map
//! entry is the claim ticket: whoever removes it (the firing task or `cancel`)
//! owns the task, so firing and cancellation are mutually exclusive and the
//! callback runs at most once per registration.

use crate::suspension::{Clock, SuspensionError, SuspensionResult};
use crate::SUSPENSION_TARGET;
use chrono::{DateTime, Utc};
use dashmap::DashMap;
use std::fmt::Display;
use std::future::Future;
use std::hash::Hash;
use std::pin::Pin;
use std::sync::Arc;
use std::time::Duration;
use tokio_util::sync::CancellationToken;
use tokio_util::task::TaskTracker;
use tracing::{debug, error, info};
use uuid::Uuid;

/// Boxed future returned by a task callback
pub type BoxFuture<T> = Pin<Box<dyn Future<Output = T> + Send + 'static>>;

/// Callback run when a task fires
pub type TaskCallback<K, P> = Arc<dyn Fn(K, P) -> BoxFuture<Result<(), crate::Error>> + Send + Sync>;

/// Longest single sleep. The wall clock is re-read after each slice so a clock
/// that jumps backwards postpones the task instead of firing it early.
const MAX_WAIT_SLICE: Duration = Duration::from_secs(60);

/// A pending registration
struct TaskEntry {
    /// Distinguishes this registration from a later one under the same key
    id: Uuid,
    due_at: DateTime<Utc>,
    cancel: CancellationToken,
}

/// Store of pending delayed tasks, at most one per key
pub struct Scheduler<K, P> {
    tasks: Arc<DashMap<K, TaskEntry>>,
    callback: TaskCallback<K, P>,
    clock: Arc<dyn Clock>,
    /// Parent of every task token; cancelling it cancels the whole group
    root: CancellationToken,
    tracker: TaskTracker,
}

impl<K, P> Scheduler<K, P>
where
    K: Eq + Hash + Clone + Display + Send + Sync + 'static,
    P: Send + 'static,
{
    /// Create a scheduler that runs `callback` for every task that fires
    pub fn new<F, Fut>(clock: Arc<dyn Clock>, callback: F) -> Self
    where
        F: Fn(K, P) -> Fut + Send + Sync + 'static,
        Fut: Future<Output = Result<(), crate::Error>> + Send + 'static,
    {
        let callback: TaskCallback<K, P> =
            Arc::new(move |key, payload| Box::pin(callback(key, payload)));

        Self {
            tasks: Arc::new(DashMap::new()),
            callback,
            clock,
            root: CancellationToken::new(),
            tracker: TaskTracker::new(),
        }
    }

    /// Register a task for `key`, replacing any task already pending for it
    ///
    /// # Errors
    /// Returns `InvalidDueTime` if `due_at` is not strictly in the future, and
    /// `SchedulingFailure` if there is no tokio runtime or the scheduler was
    /// shut down.
    pub fn schedule(&self, key: K, due_at: DateTime<Utc>, payload: P) -> SuspensionResult<()> {
        if self.root.is_cancelled() {
            return Err(SuspensionError::SchedulingFailure(
                "scheduler has been shut down".to_string(),
            ));
        }

        let runtime = tokio::runtime::Handle::try_current()
            .map_err(|e| SuspensionError::SchedulingFailure(e.to_string()))?;

        if due_at <= self.clock.now() {
            return Err(SuspensionError::InvalidDueTime);
        }

        let id = Uuid::new_v4();
        let cancel = self.root.child_token();

        // Insert before spawning so the task always finds its own entry.
        let entry = TaskEntry {
            id,
            due_at,
            cancel: cancel.clone(),
        };
        if let Some(previous) = self.tasks.insert(key.clone(), entry) {
            previous.cancel.cancel();
            debug!(target: SUSPENSION_TARGET, key = %key, "Replaced pending task");
        }

        let run = PendingTask {
            key: key.clone(),
            id,
            due_at,
            payload,
            cancel,
            tasks: Arc::clone(&self.tasks),
            clock: Arc::clone(&self.clock),
            callback: Arc::clone(&self.callback),
        };
        self.tracker.spawn_on(run.run(), &runtime);

        debug!(
            target: SUSPENSION_TARGET,
            key = %key,
            task_id = %id,
            due_at = %due_at,
            "Task scheduled"
        );
        Ok(())
    }

    /// Cancel the pending task for `key`
    ///
    /// Returns whether a task was pending. A task that has already claimed its
    /// entry and started firing is not interrupted.
    pub fn cancel(&self, key: &K) -> bool {
        if let Some((_, entry)) = self.tasks.remove(key) {
            entry.cancel.cancel();
            debug!(target: SUSPENSION_TARGET, key = %key, task_id = %entry.id, "Task cancelled");
            true
        } else {
            false
        }
    }

    /// Cancel every pending task, returning how many there were
    pub fn cancel_all(&self) -> usize {
        let keys: Vec<K> = self.tasks.iter().map(|entry| entry.key().clone()).collect();
        keys.iter().filter(|key| self.cancel(key)).count()
    }

    /// Whether a task is pending for `key`
    #[must_use]
    pub fn is_scheduled(&self, key: &K) -> bool {
        self.tasks.contains_key(key)
    }

    /// When the task for `key` is due, if one is pending
    #[must_use]
    pub fn due_at(&self, key: &K) -> Option<DateTime<Utc>> {
        self.tasks.get(key).map(|entry| entry.due_at)
    }

    /// Number of pending tasks
    #[must_use]
    pub fn len(&self) -> usize {
        self.tasks.len()
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.tasks.is_empty()
    }

    /// Cancel all pending tasks and wait for in-flight callbacks to finish
    ///
    /// Further calls to `schedule` fail with `SchedulingFailure`.
    pub async fn shutdown(&self) {
        self.root.cancel();
        let cancelled = self.cancel_all();
        self.tracker.close();
        self.tracker.wait().await;
        info!(target: SUSPENSION_TARGET, cancelled, "Scheduler shut down");
    }
}

/// Everything a spawned task needs, moved into it
struct PendingTask<K, P> {
    key: K,
    id: Uuid,
    due_at: DateTime<Utc>,
    payload: P,
    cancel: CancellationToken,
    tasks: Arc<DashMap<K, TaskEntry>>,
    clock: Arc<dyn Clock>,
    callback: TaskCallback<K, P>,
}

impl<K, P> PendingTask<K, P>
where
    K: Eq + Hash + Clone + Display + Send + Sync + 'static,
    P: Send + 'static,
{
    async fn run(self) {
        loop {
            // Negative remaining time fails `to_std`, which means we are due.
            let remaining = (self.due_at - self.clock.now())
                .to_std()
                .unwrap_or(Duration::ZERO);
            if remaining.is_zero() {
                break;
            }

            tokio::select! {
                biased;
                () = self.cancel.cancelled() => {
                    debug!(target: SUSPENSION_TARGET, key = %self.key, task_id = %self.id, "Wait aborted");
                    return;
                }
                () = tokio::time::sleep(remaining.min(MAX_WAIT_SLICE)) => {}
            }
        }

        let claimed = self
            .tasks
            .remove_if(&self.key, |_, entry| entry.id == self.id)
            .is_some();
        if !claimed {
            debug!(target: SUSPENSION_TARGET, key = %self.key, task_id = %self.id, "Task superseded before firing");
            return;
        }

        info!(target: SUSPENSION_TARGET, key = %self.key, task_id = %self.id, "Running scheduled task");

        // Run the callback in its own task so a panic stays contained.
        let key = self.key.clone();
        let payload = self.payload;
        let callback = Arc::clone(&self.callback);
        match tokio::spawn(async move { callback(key, payload).await }).await {
            Ok(Ok(())) => {}
            Ok(Err(e)) => {
                error!(target: SUSPENSION_TARGET, key = %self.key, error = %e, "Scheduled task failed");
            }
            Err(e) => {
                error!(target: SUSPENSION_TARGET, key = %self.key, error = %e, "Scheduled task panicked");
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::suspension::clock::TokioClock;
    use std::sync::Mutex;
    use std::sync::atomic::{AtomicI64, Ordering};

    type Fired = Arc<Mutex<Vec<(u64, &'static str)>>>;

    fn recording_scheduler(clock: Arc<dyn Clock>) -> (Scheduler<u64, &'static str>, Fired) {
        let fired: Fired = Arc::new(Mutex::new(Vec::new()));
        let sink = Arc::clone(&fired);
        let scheduler = Scheduler::new(clock, move |key, payload| {
            let sink = Arc::clone(&sink);
            async move {
                sink.lock().unwrap().push((key, payload));
                Ok::<(), crate::Error>(())
            }
        });
        (scheduler, fired)
    }

    fn minutes(n: u64) -> Duration {
        Duration::from_secs(n * 60)
    }

    #[tokio::test(start_paused = true)]
    async fn test_task_fires_once_at_due_time() {
        let clock = Arc::new(TokioClock::new());
        let (scheduler, fired) = recording_scheduler(clock.clone());

        let due = clock.now() + chrono::Duration::minutes(10);
        scheduler.schedule(1, due, "restore").unwrap();
        assert!(scheduler.is_scheduled(&1));
        assert_eq!(scheduler.due_at(&1), Some(due));

        tokio::time::sleep(minutes(9)).await;
        assert!(fired.lock().unwrap().is_empty());

        tokio::time::sleep(minutes(2)).await;
        assert_eq!(*fired.lock().unwrap(), vec![(1, "restore")]);
        assert!(!scheduler.is_scheduled(&1));
        assert!(scheduler.is_empty());

        tokio::time::sleep(minutes(30)).await;
        assert_eq!(fired.lock().unwrap().len(), 1);
    }

    #[tokio::test(start_paused = true)]
    async fn test_cancel_prevents_firing() {
        let clock = Arc::new(TokioClock::new());
        let (scheduler, fired) = recording_scheduler(clock.clone());

        scheduler
            .schedule(7, clock.now() + chrono::Duration::minutes(5), "restore")
            .unwrap();
        tokio::time::sleep(minutes(1)).await;

        assert!(scheduler.cancel(&7));
        assert!(!scheduler.cancel(&7));

        tokio::time::sleep(minutes(10)).await;
        assert!(fired.lock().unwrap().is_empty());
    }

    #[tokio::test(start_paused = true)]
    async fn test_cancel_unknown_key_is_noop() {
        let clock = Arc::new(TokioClock::new());
        let (scheduler, _fired) = recording_scheduler(clock);
        assert!(!scheduler.cancel(&42));
    }

    #[tokio::test(start_paused = true)]
    async fn test_reschedule_replaces_pending_task() {
        let clock = Arc::new(TokioClock::new());
        let (scheduler, fired) = recording_scheduler(clock.clone());

        scheduler
            .schedule(3, clock.now() + chrono::Duration::minutes(10), "first")
            .unwrap();
        scheduler
            .schedule(3, clock.now() + chrono::Duration::minutes(20), "second")
            .unwrap();
        assert_eq!(scheduler.len(), 1);

        tokio::time::sleep(minutes(15)).await;
        assert!(fired.lock().unwrap().is_empty());

        tokio::time::sleep(minutes(6)).await;
        assert_eq!(*fired.lock().unwrap(), vec![(3, "second")]);
    }

    #[tokio::test(start_paused = true)]
    async fn test_fired_key_can_be_scheduled_again() {
        let clock = Arc::new(TokioClock::new());
        let (scheduler, fired) = recording_scheduler(clock.clone());

        scheduler
            .schedule(9, clock.now() + chrono::Duration::minutes(1), "once")
            .unwrap();
        tokio::time::sleep(minutes(2)).await;

        scheduler
            .schedule(9, clock.now() + chrono::Duration::minutes(1), "twice")
            .unwrap();
        tokio::time::sleep(minutes(2)).await;

        assert_eq!(*fired.lock().unwrap(), vec![(9, "once"), (9, "twice")]);
    }

    #[tokio::test(start_paused = true)]
    async fn test_rejects_due_time_not_in_future() {
        let clock = Arc::new(TokioClock::new());
        let (scheduler, _fired) = recording_scheduler(clock.clone());

        let result = scheduler.schedule(1, clock.now(), "now");
        assert!(matches!(result, Err(SuspensionError::InvalidDueTime)));

        let result = scheduler.schedule(1, clock.now() - chrono::Duration::minutes(1), "past");
        assert!(matches!(result, Err(SuspensionError::InvalidDueTime)));
        assert!(scheduler.is_empty());
    }

    #[tokio::test(start_paused = true)]
    async fn test_failing_callback_does_not_affect_other_tasks() {
        let clock = Arc::new(TokioClock::new());
        let fired: Fired = Arc::new(Mutex::new(Vec::new()));
        let sink = Arc::clone(&fired);
        let scheduler: Scheduler<u64, &'static str> = Scheduler::new(clock.clone(), move |key, payload| {
            let sink = Arc::clone(&sink);
            async move {
                let result: Result<(), crate::Error> = match key {
                    1 => Err("restore failed".into()),
                    2 => panic!("restore panicked"),
                    _ => {
                        sink.lock().unwrap().push((key, payload));
                        Ok(())
                    }
                };
                result
            }
        });

        for key in 1..=3 {
            scheduler
                .schedule(key, clock.now() + chrono::Duration::minutes(5), "restore")
                .unwrap();
        }

        tokio::time::sleep(minutes(6)).await;
        assert_eq!(*fired.lock().unwrap(), vec![(3, "restore")]);
        assert!(scheduler.is_empty());
    }

    #[tokio::test(start_paused = true)]
    async fn test_shutdown_cancels_everything() {
        let clock = Arc::new(TokioClock::new());
        let (scheduler, fired) = recording_scheduler(clock.clone());

        for key in 1..=3 {
            scheduler
                .schedule(key, clock.now() + chrono::Duration::minutes(key as i64), "restore")
                .unwrap();
        }
        assert_eq!(scheduler.len(), 3);

        scheduler.shutdown().await;
        assert!(scheduler.is_empty());

        tokio::time::sleep(minutes(10)).await;
        assert!(fired.lock().unwrap().is_empty());

        let result = scheduler.schedule(4, clock.now() + chrono::Duration::minutes(1), "late");
        assert!(matches!(result, Err(SuspensionError::SchedulingFailure(_))));
    }

    /// Clock whose wall time can be moved independently of the timer
    struct SkewedClock {
        inner: TokioClock,
        skew_secs: AtomicI64,
    }

    impl Clock for SkewedClock {
        fn now(&self) -> DateTime<Utc> {
            self.inner.now() + chrono::Duration::seconds(self.skew_secs.load(Ordering::SeqCst))
        }
    }

    #[tokio::test(start_paused = true)]
    async fn test_backwards_clock_jump_does_not_fire_early() {
        let clock = Arc::new(SkewedClock {
            inner: TokioClock::new(),
            skew_secs: AtomicI64::new(0),
        });
        let (scheduler, fired) = recording_scheduler(clock.clone());

        scheduler
            .schedule(5, clock.now() + chrono::Duration::minutes(10), "restore")
            .unwrap();

        tokio::time::sleep(minutes(2)).await;
        // Wall clock jumps back an hour.
        clock.skew_secs.store(-3600, Ordering::SeqCst);

        tokio::time::sleep(minutes(10)).await;
        assert!(fired.lock().unwrap().is_empty());
        assert!(scheduler.is_scheduled(&5));

        tokio::time::sleep(minutes(60)).await;
        assert_eq!(fired.lock().unwrap().len(), 1);
    }
}
