//! Suspend/restore state machine
//!
//! Each channel is either free or suspended. A suspended channel has exactly
//! one [`SuspensionRecord`] and, for timed suspensions, one pending restore in
//! the [`Scheduler`]. Manual and automatic restoration share `restore_inner`.

use crate::SUSPENSION_TARGET;
use crate::suspension::{
    AccessOverride, AccessStore, AuditAction, AuditDetail, AuditEvent, Clock, NotificationSink,
    Scheduler, SuspensionError, SuspensionLength, SuspensionRecord, SuspensionResult,
};
use chrono::{DateTime, Duration, Utc};
use dashmap::DashMap;
use poise::serenity_prelude::{ChannelId, UserId};
use std::sync::{Arc, Weak};
use tokio::sync::{Mutex, OwnedMutexGuard};
use tracing::{debug, error, info, warn};
use uuid::Uuid;

/// Minutes before the first retry of an automatic restore whose store write
/// failed; doubled for every further attempt
const RESTORE_RETRY_MINUTES: i64 = 1;
/// Retries of a failing automatic restore before it is left to a moderator
const MAX_RESTORE_RETRIES: u32 = 5;

/// Result of a suspend request
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SuspensionOutcome {
    /// The channel is now silenced; `None` expiry means indefinitely
    Applied { expires_at: Option<DateTime<Utc>> },
    /// The channel was already silenced, nothing changed
    AlreadySuspended,
}

/// Result of a restore request
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RestorationOutcome {
    Applied,
    NotSuspended,
}

/// Payload carried by a scheduled restoration
#[derive(Debug, Clone, Copy)]
pub struct ScheduledRestore {
    /// Generation of the suspension this task belongs to
    pub record_id: Uuid,
    /// Who silenced the channel; the automatic restore is attributed to them
    pub actor_id: UserId,
    /// Retries already made after failed store writes
    pub attempt: u32,
}

/// Held for the duration of one transition on a channel
///
/// Dropping it unlocks the channel and removes the lock entry if no other
/// transition is holding or waiting for it.
struct ChannelTransition<'a> {
    locks: &'a DashMap<ChannelId, Arc<Mutex<()>>>,
    channel_id: ChannelId,
    guard: Option<OwnedMutexGuard<()>>,
}

impl Drop for ChannelTransition<'_> {
    fn drop(&mut self) {
        self.guard.take();
        self.locks
            .remove_if(&self.channel_id, |_, lock| Arc::strong_count(lock) == 1);
    }
}

/// Owns the suspended set and drives channels between free and suspended
pub struct SuspensionController {
    store: Arc<dyn AccessStore>,
    sink: Arc<dyn NotificationSink>,
    clock: Arc<dyn Clock>,
    scheduler: Scheduler<ChannelId, ScheduledRestore>,
    records: DashMap<ChannelId, SuspensionRecord>,
    /// Serializes transitions per channel
    channel_locks: DashMap<ChannelId, Arc<Mutex<()>>>,
}

impl SuspensionController {
    /// Create a controller whose scheduler calls back into it on expiry
    pub fn new(
        store: Arc<dyn AccessStore>,
        sink: Arc<dyn NotificationSink>,
        clock: Arc<dyn Clock>,
    ) -> Arc<Self> {
        Arc::new_cyclic(|weak: &Weak<Self>| {
            let weak = weak.clone();
            let scheduler = Scheduler::new(
                Arc::clone(&clock),
                move |channel_id: ChannelId, restore: ScheduledRestore| {
                    let weak = weak.clone();
                    async move {
                        match weak.upgrade() {
                            Some(controller) => controller
                                .restore_inner(channel_id, restore.actor_id, Some(restore))
                                .await
                                .map(|_| ())
                                .map_err(crate::Error::from),
                            None => Ok(()),
                        }
                    }
                },
            );

            Self {
                store,
                sink,
                clock,
                scheduler,
                records: DashMap::new(),
                channel_locks: DashMap::new(),
            }
        })
    }

    async fn begin(&self, channel_id: ChannelId) -> ChannelTransition<'_> {
        let lock = Arc::clone(self.channel_locks.entry(channel_id).or_default().value());
        ChannelTransition {
            locks: &self.channel_locks,
            channel_id,
            guard: Some(lock.lock_owned().await),
        }
    }

    /// Silence a channel
    ///
    /// # Errors
    /// Returns `InvalidDuration` for a zero-minute length, `SchedulingFailure`
    /// if the automatic restore cannot be registered (the channel is reverted
    /// first), and store errors if the overwrite cannot be read or written.
    pub async fn suspend(
        &self,
        channel_id: ChannelId,
        actor_id: UserId,
        length: SuspensionLength,
    ) -> SuspensionResult<SuspensionOutcome> {
        if length == SuspensionLength::Minutes(0) {
            return Err(SuspensionError::InvalidDuration(
                "duration must be at least one minute".to_string(),
            ));
        }

        let _transition = self.begin(channel_id).await;

        if self.records.contains_key(&channel_id) {
            info!(
                target: SUSPENSION_TARGET,
                channel_id = %channel_id,
                actor_id = %actor_id,
                "Tried to silence a channel that is already silenced"
            );
            self.reject(channel_id, actor_id, AuditDetail::AlreadySuspended).await;
            return Ok(SuspensionOutcome::AlreadySuspended);
        }

        let previous = self.store.get_override(channel_id).await?;
        if previous.is_some_and(|access| access.denies_sending()) {
            info!(
                target: SUSPENSION_TARGET,
                channel_id = %channel_id,
                actor_id = %actor_id,
                "Tried to silence a channel whose overwrite already denies sending"
            );
            self.reject(channel_id, actor_id, AuditDetail::AlreadySuspended).await;
            return Ok(SuspensionOutcome::AlreadySuspended);
        }

        let record = SuspensionRecord::new(channel_id, actor_id, previous, length, self.clock.now());
        let record_id = record.id;
        let expires_at = record.expires_at;

        self.store
            .set_override(channel_id, Some(AccessOverride::silenced(previous)))
            .await?;
        self.records.insert(channel_id, record);

        if let Some(due_at) = expires_at {
            let restore = ScheduledRestore {
                record_id,
                actor_id,
                attempt: 0,
            };
            if let Err(e) = self.scheduler.schedule(channel_id, due_at, restore) {
                error!(
                    target: SUSPENSION_TARGET,
                    channel_id = %channel_id,
                    error = %e,
                    "Could not schedule unsilence, reverting channel"
                );
                self.records.remove(&channel_id);
                self.revert(channel_id, previous).await;
                return Err(e);
            }
        }

        info!(
            target: SUSPENSION_TARGET,
            channel_id = %channel_id,
            actor_id = %actor_id,
            length = %length,
            expires_at = ?expires_at,
            "Channel silenced"
        );
        self.notify(AuditEvent::new(
            actor_id,
            channel_id,
            AuditAction::Suspended,
            length.into(),
        ))
        .await;

        Ok(SuspensionOutcome::Applied { expires_at })
    }

    /// Unsilence a channel, cancelling its automatic restore if one is pending
    ///
    /// # Errors
    /// Returns store errors if the previous overwrite cannot be written back;
    /// the channel then stays silenced.
    pub async fn restore(
        &self,
        channel_id: ChannelId,
        actor_id: UserId,
    ) -> SuspensionResult<RestorationOutcome> {
        self.restore_inner(channel_id, actor_id, None).await
    }

    /// Shared restore path. `scheduled` is set when called from the scheduler
    /// and must match the current record, so a stale firing never restores a
    /// newer suspension.
    async fn restore_inner(
        &self,
        channel_id: ChannelId,
        actor_id: UserId,
        scheduled: Option<ScheduledRestore>,
    ) -> SuspensionResult<RestorationOutcome> {
        let _transition = self.begin(channel_id).await;

        let current = self
            .records
            .get(&channel_id)
            .map(|record| (record.id, record.previous));
        let target = match (current, scheduled) {
            (Some((_, previous)), None) => previous,
            (Some((record_id, previous)), Some(restore)) if restore.record_id == record_id => {
                previous
            }
            (_, Some(_)) => {
                debug!(
                    target: SUSPENSION_TARGET,
                    channel_id = %channel_id,
                    "Ignoring scheduled unsilence for a suspension that no longer exists"
                );
                return Ok(RestorationOutcome::NotSuspended);
            }
            (None, None) => return self.restore_unrecorded(channel_id, actor_id).await,
        };

        if let Err(e) = self.store.set_override(channel_id, target).await {
            if let Some(restore) = scheduled {
                self.retry_later(channel_id, restore);
            }
            return Err(e);
        }

        self.records.remove(&channel_id);
        self.scheduler.cancel(&channel_id);

        info!(
            target: SUSPENSION_TARGET,
            channel_id = %channel_id,
            actor_id = %actor_id,
            automatic = scheduled.is_some(),
            "Channel unsilenced"
        );
        self.notify(AuditEvent::new(
            actor_id,
            channel_id,
            AuditAction::Restored,
            AuditDetail::Empty,
        ))
        .await;

        Ok(RestorationOutcome::Applied)
    }

    /// Manual restore of a channel without a record
    ///
    /// A channel whose guest overwrite denies sending counts as silenced, the
    /// same rule `suspend` applies. This covers channels silenced before a
    /// restart or by hand; only the denial is lifted.
    async fn restore_unrecorded(
        &self,
        channel_id: ChannelId,
        actor_id: UserId,
    ) -> SuspensionResult<RestorationOutcome> {
        let Some(current) = self
            .store
            .get_override(channel_id)
            .await?
            .filter(AccessOverride::denies_sending)
        else {
            info!(
                target: SUSPENSION_TARGET,
                channel_id = %channel_id,
                actor_id = %actor_id,
                "Tried to unsilence a channel that is not silenced"
            );
            self.reject(channel_id, actor_id, AuditDetail::NotFound).await;
            return Ok(RestorationOutcome::NotSuspended);
        };

        self.store
            .set_override(channel_id, Some(current.unsilenced()))
            .await?;

        info!(
            target: SUSPENSION_TARGET,
            channel_id = %channel_id,
            actor_id = %actor_id,
            "Channel unsilenced without a record"
        );
        self.notify(AuditEvent::new(
            actor_id,
            channel_id,
            AuditAction::Restored,
            AuditDetail::Empty,
        ))
        .await;

        Ok(RestorationOutcome::Applied)
    }

    /// Re-arm a scheduled restore whose store write failed, backing off
    /// exponentially until [`MAX_RESTORE_RETRIES`]
    fn retry_later(&self, channel_id: ChannelId, failed: ScheduledRestore) {
        if failed.attempt >= MAX_RESTORE_RETRIES {
            error!(
                target: SUSPENSION_TARGET,
                channel_id = %channel_id,
                attempts = failed.attempt + 1,
                "Giving up on automatic unsilence; channel stays silenced until unsilenced by hand"
            );
            return;
        }

        let delay = Duration::minutes(RESTORE_RETRY_MINUTES << failed.attempt);
        let due_at = self.clock.now() + delay;
        let restore = ScheduledRestore {
            attempt: failed.attempt + 1,
            ..failed
        };
        match self.scheduler.schedule(channel_id, due_at, restore) {
            Ok(()) => warn!(
                target: SUSPENSION_TARGET,
                channel_id = %channel_id,
                attempt = restore.attempt,
                retry_at = %due_at,
                "Automatic unsilence failed, retrying later"
            ),
            Err(e) => error!(
                target: SUSPENSION_TARGET,
                channel_id = %channel_id,
                error = %e,
                "Automatic unsilence failed and could not be retried; channel stays silenced"
            ),
        }
    }

    /// Best-effort write of the pre-suspension overwrite after a failed suspend
    async fn revert(&self, channel_id: ChannelId, previous: Option<AccessOverride>) {
        if let Err(e) = self.store.set_override(channel_id, previous).await {
            error!(
                target: SUSPENSION_TARGET,
                channel_id = %channel_id,
                error = %e,
                "Failed to revert channel overwrite; manual cleanup needed"
            );
        }
    }

    /// Drop a channel's record and pending restore without touching the store
    ///
    /// Used when the channel itself is gone.
    pub async fn forget(&self, channel_id: ChannelId) -> bool {
        let _transition = self.begin(channel_id).await;

        self.scheduler.cancel(&channel_id);
        let forgotten = self.records.remove(&channel_id).is_some();

        if forgotten {
            info!(target: SUSPENSION_TARGET, channel_id = %channel_id, "Forgot silenced channel");
        }
        forgotten
    }

    async fn reject(&self, channel_id: ChannelId, actor_id: UserId, detail: AuditDetail) {
        self.notify(AuditEvent::new(actor_id, channel_id, AuditAction::Rejected, detail))
            .await;
    }

    async fn notify(&self, event: AuditEvent) {
        if let Err(e) = self.sink.notify(event).await {
            warn!(target: SUSPENSION_TARGET, error = %e, "Failed to deliver moderation log entry");
        }
    }

    #[must_use]
    pub fn is_suspended(&self, channel_id: ChannelId) -> bool {
        self.records.contains_key(&channel_id)
    }

    #[must_use]
    pub fn record(&self, channel_id: ChannelId) -> Option<SuspensionRecord> {
        self.records.get(&channel_id).map(|entry| entry.value().clone())
    }

    /// All silenced channels, oldest first
    #[must_use]
    pub fn suspended(&self) -> Vec<SuspensionRecord> {
        let mut records: Vec<SuspensionRecord> =
            self.records.iter().map(|entry| entry.value().clone()).collect();
        records.sort_by_key(|record| record.suspended_at);
        records
    }

    /// When the automatic restore for a channel is due
    #[must_use]
    pub fn scheduled_restore(&self, channel_id: ChannelId) -> Option<DateTime<Utc>> {
        self.scheduler.due_at(&channel_id)
    }

    /// Cancel every pending automatic restore
    ///
    /// Silenced channels stay silenced; records are not persisted.
    pub async fn shutdown(&self) {
        info!(
            target: SUSPENSION_TARGET,
            silenced = self.records.len(),
            pending = self.scheduler.len(),
            "Shutting down suspension controller"
        );
        self.scheduler.shutdown().await;
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::suspension::clock::TokioClock;
    use crate::suspension::notify::MockNotificationSink;
    use crate::suspension::store::memory::MemoryAccessStore;
    use poise::serenity_prelude::Permissions;
    use std::sync::Mutex as StdMutex;
    use std::sync::atomic::Ordering;

    const CHANNEL: ChannelId = ChannelId::new(100);
    const ACTOR: UserId = UserId::new(200);

    #[derive(Default)]
    struct RecordingSink {
        events: StdMutex<Vec<AuditEvent>>,
    }

    impl RecordingSink {
        fn actions(&self) -> Vec<AuditAction> {
            self.events.lock().unwrap().iter().map(|e| e.action).collect()
        }
    }

    #[async_trait::async_trait]
    impl NotificationSink for RecordingSink {
        async fn notify(&self, event: AuditEvent) -> SuspensionResult<()> {
            self.events.lock().unwrap().push(event);
            Ok(())
        }
    }

    struct Fixture {
        controller: Arc<SuspensionController>,
        store: Arc<MemoryAccessStore>,
        sink: Arc<RecordingSink>,
    }

    fn fixture_with(store: MemoryAccessStore) -> Fixture {
        let store = Arc::new(store);
        let sink = Arc::new(RecordingSink::default());
        let controller = SuspensionController::new(
            store.clone(),
            sink.clone(),
            Arc::new(TokioClock::new()),
        );
        Fixture {
            controller,
            store,
            sink,
        }
    }

    fn fixture() -> Fixture {
        fixture_with(MemoryAccessStore::default())
    }

    fn minutes(n: u64) -> std::time::Duration {
        std::time::Duration::from_secs(n * 60)
    }

    #[tokio::test(start_paused = true)]
    async fn test_suspend_then_restore_round_trips_missing_override() {
        let f = fixture();

        let outcome = f
            .controller
            .suspend(CHANNEL, ACTOR, SuspensionLength::Minutes(10))
            .await
            .unwrap();
        assert!(matches!(outcome, SuspensionOutcome::Applied { expires_at: Some(_) }));
        assert!(f.store.current(CHANNEL).unwrap().denies_sending());
        assert!(f.controller.is_suspended(CHANNEL));

        let outcome = f.controller.restore(CHANNEL, ACTOR).await.unwrap();
        assert_eq!(outcome, RestorationOutcome::Applied);
        assert_eq!(f.store.current(CHANNEL), None);
        assert!(!f.controller.is_suspended(CHANNEL));
        assert!(f.controller.scheduled_restore(CHANNEL).is_none());
    }

    #[tokio::test(start_paused = true)]
    async fn test_round_trip_preserves_prior_restriction() {
        let previous = AccessOverride::new(
            Permissions::SEND_MESSAGES | Permissions::ATTACH_FILES,
            Permissions::ADD_REACTIONS,
        );
        let f = fixture_with(MemoryAccessStore::with_override(CHANNEL, previous));

        f.controller
            .suspend(CHANNEL, ACTOR, SuspensionLength::Minutes(10))
            .await
            .unwrap();
        let silenced = f.store.current(CHANNEL).unwrap();
        assert!(silenced.denies_sending());
        assert!(silenced.deny.contains(Permissions::ADD_REACTIONS));

        f.controller.restore(CHANNEL, ACTOR).await.unwrap();
        assert_eq!(f.store.current(CHANNEL), Some(previous));
    }

    #[tokio::test(start_paused = true)]
    async fn test_second_suspend_is_rejected_and_keeps_expiry() {
        let f = fixture();

        f.controller
            .suspend(CHANNEL, ACTOR, SuspensionLength::Minutes(10))
            .await
            .unwrap();
        let expiry = f.controller.record(CHANNEL).unwrap().expires_at;
        let due = f.controller.scheduled_restore(CHANNEL);

        tokio::time::sleep(minutes(2)).await;
        let outcome = f
            .controller
            .suspend(CHANNEL, ACTOR, SuspensionLength::Minutes(30))
            .await
            .unwrap();

        assert_eq!(outcome, SuspensionOutcome::AlreadySuspended);
        assert_eq!(f.controller.record(CHANNEL).unwrap().expires_at, expiry);
        assert_eq!(f.controller.scheduled_restore(CHANNEL), due);
        assert_eq!(f.store.writes.load(Ordering::SeqCst), 1);
        assert_eq!(
            f.sink.actions(),
            vec![AuditAction::Suspended, AuditAction::Rejected]
        );
    }

    #[tokio::test(start_paused = true)]
    async fn test_early_restore_prevents_automatic_restore() {
        let f = fixture();

        f.controller
            .suspend(CHANNEL, ACTOR, SuspensionLength::Minutes(10))
            .await
            .unwrap();
        tokio::time::sleep(minutes(5)).await;
        f.controller.restore(CHANNEL, ACTOR).await.unwrap();

        tokio::time::sleep(minutes(20)).await;

        assert_eq!(f.store.writes.load(Ordering::SeqCst), 2);
        assert_eq!(
            f.sink.actions(),
            vec![AuditAction::Suspended, AuditAction::Restored]
        );
    }

    #[tokio::test(start_paused = true)]
    async fn test_automatic_restore_matches_manual_restore() {
        let f = fixture();

        f.controller
            .suspend(CHANNEL, ACTOR, SuspensionLength::Minutes(10))
            .await
            .unwrap();

        tokio::time::sleep(minutes(9)).await;
        assert!(f.store.current(CHANNEL).unwrap().denies_sending());

        tokio::time::sleep(minutes(2)).await;
        assert_eq!(f.store.current(CHANNEL), None);
        assert!(!f.controller.is_suspended(CHANNEL));
        assert!(f.controller.scheduled_restore(CHANNEL).is_none());

        let events = f.sink.events.lock().unwrap().clone();
        assert_eq!(
            events.last(),
            Some(&AuditEvent::new(
                ACTOR,
                CHANNEL,
                AuditAction::Restored,
                AuditDetail::Empty
            ))
        );

        tokio::time::sleep(minutes(30)).await;
        assert_eq!(f.sink.events.lock().unwrap().len(), 2);
    }

    #[tokio::test(start_paused = true)]
    async fn test_indefinite_suspension_has_no_task() {
        let f = fixture();

        let outcome = f
            .controller
            .suspend(CHANNEL, ACTOR, SuspensionLength::Indefinite)
            .await
            .unwrap();
        assert_eq!(outcome, SuspensionOutcome::Applied { expires_at: None });
        assert!(f.controller.scheduled_restore(CHANNEL).is_none());

        tokio::time::sleep(minutes(60 * 24)).await;
        assert!(f.controller.is_suspended(CHANNEL));

        let outcome = f.controller.restore(CHANNEL, ACTOR).await.unwrap();
        assert_eq!(outcome, RestorationOutcome::Applied);
        assert_eq!(f.store.current(CHANNEL), None);
    }

    #[tokio::test(start_paused = true)]
    async fn test_restore_unsuspended_channel() {
        let f = fixture();

        let outcome = f.controller.restore(CHANNEL, ACTOR).await.unwrap();
        assert_eq!(outcome, RestorationOutcome::NotSuspended);
        assert_eq!(f.store.writes.load(Ordering::SeqCst), 0);

        let events = f.sink.events.lock().unwrap().clone();
        assert_eq!(events.len(), 1);
        assert_eq!(events[0].detail, AuditDetail::NotFound);
    }

    #[tokio::test(start_paused = true)]
    async fn test_zero_minutes_is_invalid() {
        let f = fixture();

        let result = f
            .controller
            .suspend(CHANNEL, ACTOR, SuspensionLength::Minutes(0))
            .await;
        assert!(matches!(result, Err(SuspensionError::InvalidDuration(_))));
        assert_eq!(f.store.writes.load(Ordering::SeqCst), 0);
        assert!(f.sink.actions().is_empty());
    }

    #[tokio::test(start_paused = true)]
    async fn test_channel_already_denying_is_already_suspended() {
        let denied = AccessOverride::new(Permissions::empty(), Permissions::SEND_MESSAGES);
        let f = fixture_with(MemoryAccessStore::with_override(CHANNEL, denied));

        let outcome = f
            .controller
            .suspend(CHANNEL, ACTOR, SuspensionLength::Minutes(5))
            .await
            .unwrap();
        assert_eq!(outcome, SuspensionOutcome::AlreadySuspended);
        assert!(!f.controller.is_suspended(CHANNEL));
        assert_eq!(f.store.writes.load(Ordering::SeqCst), 0);
    }

    #[tokio::test(start_paused = true)]
    async fn test_scheduling_failure_reverts_channel() {
        let f = fixture();
        f.controller.shutdown().await;

        let result = f
            .controller
            .suspend(CHANNEL, ACTOR, SuspensionLength::Minutes(5))
            .await;

        assert!(matches!(result, Err(SuspensionError::SchedulingFailure(_))));
        assert_eq!(f.store.current(CHANNEL), None);
        assert!(!f.controller.is_suspended(CHANNEL));
        assert!(f.sink.actions().is_empty());
    }

    #[tokio::test(start_paused = true)]
    async fn test_store_failure_leaves_channel_free() {
        let f = fixture();
        f.store.fail_writes.store(true, Ordering::SeqCst);

        let result = f
            .controller
            .suspend(CHANNEL, ACTOR, SuspensionLength::Minutes(5))
            .await;

        assert!(matches!(result, Err(SuspensionError::AccessStore(_))));
        assert!(!f.controller.is_suspended(CHANNEL));
        assert!(f.controller.scheduled_restore(CHANNEL).is_none());
    }

    #[tokio::test(start_paused = true)]
    async fn test_failed_automatic_restore_is_retried() {
        let f = fixture();

        f.controller
            .suspend(CHANNEL, ACTOR, SuspensionLength::Minutes(10))
            .await
            .unwrap();
        f.store.fail_writes.store(true, Ordering::SeqCst);

        tokio::time::sleep(minutes(10) + std::time::Duration::from_secs(5)).await;
        assert!(f.controller.is_suspended(CHANNEL));
        assert!(f.controller.scheduled_restore(CHANNEL).is_some());

        f.store.fail_writes.store(false, Ordering::SeqCst);
        tokio::time::sleep(minutes(2)).await;
        assert!(!f.controller.is_suspended(CHANNEL));
        assert_eq!(f.store.current(CHANNEL), None);
    }

    #[tokio::test(start_paused = true)]
    async fn test_failing_automatic_restore_gives_up() {
        let f = fixture();

        f.controller
            .suspend(CHANNEL, ACTOR, SuspensionLength::Minutes(10))
            .await
            .unwrap();
        f.store.fail_writes.store(true, Ordering::SeqCst);

        // Fires at 10, then retries at 11, 13, 17, 25 and 41 minutes.
        tokio::time::sleep(minutes(26)).await;
        assert!(f.controller.scheduled_restore(CHANNEL).is_some());

        tokio::time::sleep(minutes(20)).await;
        assert!(f.controller.scheduled_restore(CHANNEL).is_none());
        assert!(f.controller.is_suspended(CHANNEL));

        tokio::time::sleep(minutes(120)).await;
        assert!(f.controller.scheduled_restore(CHANNEL).is_none());

        f.store.fail_writes.store(false, Ordering::SeqCst);
        let outcome = f.controller.restore(CHANNEL, ACTOR).await.unwrap();
        assert_eq!(outcome, RestorationOutcome::Applied);
        assert_eq!(f.store.current(CHANNEL), None);
    }

    #[tokio::test(start_paused = true)]
    async fn test_channel_silenced_before_restart_can_be_unsilenced() {
        let store = Arc::new(MemoryAccessStore::with_override(
            CHANNEL,
            AccessOverride::new(Permissions::ATTACH_FILES, Permissions::empty()),
        ));

        let before = SuspensionController::new(
            store.clone(),
            Arc::new(RecordingSink::default()),
            Arc::new(TokioClock::new()),
        );
        before
            .suspend(CHANNEL, ACTOR, SuspensionLength::Minutes(10))
            .await
            .unwrap();
        before.shutdown().await;

        let sink = Arc::new(RecordingSink::default());
        let after =
            SuspensionController::new(store.clone(), sink.clone(), Arc::new(TokioClock::new()));

        let outcome = after
            .suspend(CHANNEL, ACTOR, SuspensionLength::Minutes(10))
            .await
            .unwrap();
        assert_eq!(outcome, SuspensionOutcome::AlreadySuspended);

        let outcome = after.restore(CHANNEL, ACTOR).await.unwrap();
        assert_eq!(outcome, RestorationOutcome::Applied);

        tokio::time::sleep(minutes(60)).await;
        let current = store.current(CHANNEL).unwrap();
        assert!(!current.denies_sending());
        assert_eq!(current.allow, Permissions::ATTACH_FILES);
        assert_eq!(
            sink.actions(),
            vec![AuditAction::Rejected, AuditAction::Restored]
        );

        let outcome = after.restore(CHANNEL, ACTOR).await.unwrap();
        assert_eq!(outcome, RestorationOutcome::NotSuspended);
    }

    #[tokio::test(start_paused = true)]
    async fn test_channel_locks_are_pruned() {
        let f = fixture();

        f.controller
            .suspend(CHANNEL, ACTOR, SuspensionLength::Minutes(10))
            .await
            .unwrap();
        assert!(f.controller.channel_locks.is_empty());

        f.controller.restore(CHANNEL, ACTOR).await.unwrap();
        f.controller
            .suspend(ChannelId::new(101), ACTOR, SuspensionLength::Minutes(1))
            .await
            .unwrap();
        tokio::time::sleep(minutes(2)).await;
        f.controller.forget(ChannelId::new(102)).await;

        assert!(f.controller.channel_locks.is_empty());
    }

    #[tokio::test(start_paused = true)]
    async fn test_stale_scheduled_restore_is_ignored() {
        let f = fixture();

        f.controller
            .suspend(CHANNEL, ACTOR, SuspensionLength::Indefinite)
            .await
            .unwrap();

        let outcome = f
            .controller
            .restore_inner(
                CHANNEL,
                ACTOR,
                Some(ScheduledRestore {
                    record_id: Uuid::new_v4(),
                    actor_id: ACTOR,
                    attempt: 0,
                }),
            )
            .await
            .unwrap();
        assert_eq!(outcome, RestorationOutcome::NotSuspended);
        assert!(f.controller.is_suspended(CHANNEL));
        assert_eq!(f.sink.actions(), vec![AuditAction::Suspended]);
    }

    #[tokio::test(start_paused = true)]
    async fn test_concurrent_suspends_apply_once() {
        let f = fixture();

        let (first, second) = tokio::join!(
            f.controller
                .suspend(CHANNEL, ACTOR, SuspensionLength::Minutes(10)),
            f.controller
                .suspend(CHANNEL, UserId::new(201), SuspensionLength::Minutes(10)),
        );
        let outcomes = [first.unwrap(), second.unwrap()];

        let applied = outcomes
            .iter()
            .filter(|o| matches!(o, SuspensionOutcome::Applied { .. }))
            .count();
        assert_eq!(applied, 1);
        assert!(outcomes.contains(&SuspensionOutcome::AlreadySuspended));
        assert_eq!(f.store.writes.load(Ordering::SeqCst), 1);
    }

    #[tokio::test(start_paused = true)]
    async fn test_forget_drops_record_and_task() {
        let f = fixture();

        f.controller
            .suspend(CHANNEL, ACTOR, SuspensionLength::Minutes(10))
            .await
            .unwrap();
        assert!(f.controller.forget(CHANNEL).await);
        assert!(!f.controller.forget(CHANNEL).await);

        tokio::time::sleep(minutes(20)).await;
        assert_eq!(f.store.writes.load(Ordering::SeqCst), 1);
        assert!(f.controller.suspended().is_empty());
    }

    #[tokio::test(start_paused = true)]
    async fn test_sink_failure_does_not_roll_back() {
        let store = Arc::new(MemoryAccessStore::default());
        let mut sink = MockNotificationSink::new();
        sink.expect_notify()
            .times(1)
            .returning(|_| Err(SuspensionError::Notification("mod log offline".to_string())));

        let controller =
            SuspensionController::new(store.clone(), Arc::new(sink), Arc::new(TokioClock::new()));

        let outcome = controller
            .suspend(CHANNEL, ACTOR, SuspensionLength::Indefinite)
            .await
            .unwrap();
        assert_eq!(outcome, SuspensionOutcome::Applied { expires_at: None });
        assert!(store.current(CHANNEL).unwrap().denies_sending());
    }

    #[tokio::test(start_paused = true)]
    async fn test_suspended_lists_oldest_first() {
        let f = fixture();
        let other = ChannelId::new(101);

        f.controller
            .suspend(other, ACTOR, SuspensionLength::Indefinite)
            .await
            .unwrap();
        tokio::time::sleep(minutes(1)).await;
        f.controller
            .suspend(CHANNEL, ACTOR, SuspensionLength::Minutes(3))
            .await
            .unwrap();

        let channels: Vec<ChannelId> = f
            .controller
            .suspended()
            .iter()
            .map(|record| record.channel_id)
            .collect();
        assert_eq!(channels, vec![other, CHANNEL]);
    }
}
