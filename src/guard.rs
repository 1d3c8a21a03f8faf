//! Per-actor command guard
//!
//! Lets a member run only one instance of a guarded command at a time. A second
//! invocation while the first is still in flight is rejected immediately, it is
//! never queued.

use crate::COMMAND_TARGET;
use dashmap::DashMap;
use derive_more::Display;
use poise::serenity_prelude::UserId;
use std::future::Future;
use std::sync::Arc;
use std::time::Duration;
use tokio::task::JoinHandle;
use tokio::time::Instant;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info};

type GuardKey = (UserId, String);

#[derive(Debug)]
struct GuardEntry {
    in_progress: bool,
    last_used: Instant,
}

/// Rejection reason for a guarded invocation
#[derive(Debug, Clone, Copy, PartialEq, Eq, Display)]
#[display("already running")]
pub struct AlreadyRunning;

/// Result of [`CommandGuard::guarded_invoke`]
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum OperationOutcome<T> {
    /// The operation ran to completion and produced this value
    Ran(T),
    /// Another invocation by the same actor was still running
    Rejected(AlreadyRunning),
}

impl<T> OperationOutcome<T> {
    #[must_use]
    pub fn is_rejected(&self) -> bool {
        matches!(self, Self::Rejected(_))
    }
}

/// Map of (actor, operation) entries with acquire/release semantics
#[derive(Debug, Default)]
pub struct CommandGuard {
    entries: DashMap<GuardKey, GuardEntry>,
}

/// Scoped acquisition; releases the entry when dropped
#[derive(Debug)]
#[must_use = "the guard is released as soon as the permit is dropped"]
pub struct GuardPermit<'a> {
    guard: &'a CommandGuard,
    key: GuardKey,
}

impl Drop for GuardPermit<'_> {
    fn drop(&mut self) {
        self.guard.release_key(&self.key);
    }
}

impl CommandGuard {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Mark `operation` as running for `actor_id`
    ///
    /// Returns `None` without waiting if it is already running.
    pub fn try_acquire(&self, actor_id: UserId, operation: &str) -> Option<GuardPermit<'_>> {
        let key = (actor_id, operation.to_string());

        // The entry lock makes the check-and-set atomic for this key.
        let mut entry = self.entries.entry(key.clone()).or_insert_with(|| GuardEntry {
            in_progress: false,
            last_used: Instant::now(),
        });
        if entry.in_progress {
            debug!(
                target: COMMAND_TARGET,
                user_id = %actor_id,
                command = %operation,
                "User tried to invoke a command that is still running"
            );
            return None;
        }
        entry.in_progress = true;
        entry.last_used = Instant::now();
        drop(entry);

        Some(GuardPermit { guard: self, key })
    }

    /// Clear the running flag for `operation`
    pub fn release(&self, actor_id: UserId, operation: &str) {
        self.release_key(&(actor_id, operation.to_string()));
    }

    fn release_key(&self, key: &GuardKey) {
        if let Some(mut entry) = self.entries.get_mut(key) {
            entry.in_progress = false;
            entry.last_used = Instant::now();
        }
    }

    #[must_use]
    pub fn is_running(&self, actor_id: UserId, operation: &str) -> bool {
        self.entries
            .get(&(actor_id, operation.to_string()))
            .is_some_and(|entry| entry.in_progress)
    }

    /// Run `op` unless the same actor is already running `operation`
    ///
    /// The entry is released on every exit path, including a panic inside `op`
    /// or the returned future being dropped.
    pub async fn guarded_invoke<F, Fut, T>(
        &self,
        actor_id: UserId,
        operation: &str,
        op: F,
    ) -> OperationOutcome<T>
    where
        F: FnOnce() -> Fut,
        Fut: Future<Output = T>,
    {
        let Some(_permit) = self.try_acquire(actor_id, operation) else {
            return OperationOutcome::Rejected(AlreadyRunning);
        };
        OperationOutcome::Ran(op().await)
    }

    /// Remove released entries untouched for at least `max_idle`
    pub fn evict_idle(&self, max_idle: Duration) -> usize {
        let before = self.entries.len();
        self.entries
            .retain(|_, entry| entry.in_progress || entry.last_used.elapsed() < max_idle);
        before.saturating_sub(self.entries.len())
    }

    #[must_use]
    pub fn len(&self) -> usize {
        self.entries.len()
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    /// Periodically evict idle entries until `shutdown` is cancelled
    pub fn spawn_sweeper(
        self: Arc<Self>,
        every: Duration,
        max_idle: Duration,
        shutdown: CancellationToken,
    ) -> JoinHandle<()> {
        tokio::spawn(async move {
            info!("Starting command guard sweeper with {}s interval", every.as_secs());
            let mut interval = tokio::time::interval(every);

            loop {
                tokio::select! {
                    () = shutdown.cancelled() => break,
                    _ = interval.tick() => {
                        let evicted = self.evict_idle(max_idle);
                        if evicted > 0 {
                            debug!(target: COMMAND_TARGET, evicted, "Evicted idle command guard entries");
                        }
                    }
                }
            }

            info!("Command guard sweeper shut down");
        })
    }
}
