//! Per-session reminder loop.
//!
//! One task per connected user selects over the periodic timer and the
//! user's realtime mood-entry feed, so both producers funnel into the same
//! serialized pass. Dropping the session aborts the task, which clears the
//! interval and unsubscribes from the feed.
//!
//! All of a user's sockets share one session through [`ReminderRegistry`].

use std::collections::HashMap;
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use std::time::Duration;
use tokio::sync::broadcast;
use tokio::task::JoinHandle;
use uuid::Uuid;

use crate::models::user::UserRole;
use crate::notify::{Notification, NotificationDispatcher};
use crate::schedule::{MoodScheduleManager, ScheduleSnapshot};
use crate::store::remote::{MoodEntryChange, MoodEntrySubscription};

pub struct ReminderSession {
    user_id: Uuid,
    task: Option<JoinHandle<()>>,
}

impl ReminderSession {
    pub fn start(
        manager: Arc<MoodScheduleManager>,
        dispatcher: Arc<dyn NotificationDispatcher>,
        ws_tx: Option<broadcast::Sender<String>>,
        user_id: Uuid,
        role: UserRole,
        period: Duration,
    ) -> Self {
        let task = tokio::spawn(run_session(manager, dispatcher, ws_tx, user_id, role, period));
        tracing::debug!(user_id = %user_id, role = %role, "Reminder session started");
        Self {
            user_id,
            task: Some(task),
        }
    }

    pub fn shutdown(mut self) {
        self.stop();
    }

    fn stop(&mut self) {
        if let Some(task) = self.task.take() {
            task.abort();
            tracing::debug!(user_id = %self.user_id, "Reminder session stopped");
        }
    }
}

impl Drop for ReminderSession {
    fn drop(&mut self) {
        self.stop();
    }
}

struct SharedSession {
    session: ReminderSession,
    connections: usize,
}

/// Reference-counted reminder sessions, at most one per user.
#[derive(Clone, Default)]
pub struct ReminderRegistry {
    sessions: Arc<Mutex<HashMap<Uuid, SharedSession>>>,
}

/// Keeps the user's session alive; the last lease dropped stops it.
pub struct ReminderLease {
    registry: ReminderRegistry,
    user_id: Uuid,
}

impl ReminderRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Join the user's running session, or start it for the first connection.
    pub fn acquire(
        &self,
        manager: Arc<MoodScheduleManager>,
        dispatcher: Arc<dyn NotificationDispatcher>,
        ws_tx: Option<broadcast::Sender<String>>,
        user_id: Uuid,
        role: UserRole,
        period: Duration,
    ) -> ReminderLease {
        let mut sessions = self.lock();
        let shared = sessions.entry(user_id).or_insert_with(|| SharedSession {
            session: ReminderSession::start(manager, dispatcher, ws_tx, user_id, role, period),
            connections: 0,
        });
        shared.connections += 1;
        tracing::debug!(user_id = %user_id, connections = shared.connections, "Reminder session acquired");

        ReminderLease {
            registry: self.clone(),
            user_id,
        }
    }

    pub fn active_sessions(&self) -> usize {
        self.lock().len()
    }

    fn release(&self, user_id: Uuid) {
        let mut sessions = self.lock();
        let Some(shared) = sessions.get_mut(&user_id) else {
            return;
        };
        shared.connections = shared.connections.saturating_sub(1);
        if shared.connections == 0 {
            if let Some(shared) = sessions.remove(&user_id) {
                shared.session.shutdown();
            }
        }
    }

    fn lock(&self) -> MutexGuard<'_, HashMap<Uuid, SharedSession>> {
        self.sessions.lock().unwrap_or_else(PoisonError::into_inner)
    }
}

impl Drop for ReminderLease {
    fn drop(&mut self) {
        self.registry.release(self.user_id);
    }
}

async fn run_session(
    manager: Arc<MoodScheduleManager>,
    dispatcher: Arc<dyn NotificationDispatcher>,
    ws_tx: Option<broadcast::Sender<String>>,
    user_id: Uuid,
    role: UserRole,
    period: Duration,
) {
    let mut feed = match manager.remote().subscribe(user_id).await {
        Ok(subscription) => Some(subscription),
        Err(e) => {
            tracing::warn!(user_id = %user_id, error = %e, "Realtime mood feed unavailable; timer only");
            None
        }
    };

    // First tick fires immediately: check as soon as the session opens.
    let mut ticker = tokio::time::interval(period);
    ticker.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Delay);

    loop {
        tokio::select! {
            _ = ticker.tick() => {
                let snapshot = manager.run_pass(user_id, role).await;
                publish_progress(ws_tx.as_ref(), user_id, &snapshot);
                announce_all_done(dispatcher.as_ref(), user_id, &snapshot);
                remind(dispatcher.as_ref(), user_id, &snapshot);
            }
            change = next_change(&mut feed) => match change {
                Some(change) => {
                    tracing::debug!(user_id = %user_id, entry_id = %change.entry_id, "Realtime mood entry change");
                    let snapshot = manager.run_pass(user_id, role).await;
                    publish_progress(ws_tx.as_ref(), user_id, &snapshot);
                    announce_all_done(dispatcher.as_ref(), user_id, &snapshot);
                }
                None => {
                    tracing::warn!(user_id = %user_id, "Realtime mood feed closed; timer only");
                    feed = None;
                }
            },
        }
    }
}

async fn next_change(feed: &mut Option<MoodEntrySubscription>) -> Option<MoodEntryChange> {
    match feed {
        Some(subscription) => subscription.recv().await,
        None => std::future::pending().await,
    }
}

/// Notify the earliest due slot, if any.
pub fn remind(dispatcher: &dyn NotificationDispatcher, user_id: Uuid, snapshot: &ScheduleSnapshot) {
    match snapshot.due.as_ref() {
        Some(due) => {
            tracing::info!(
                user_id = %user_id,
                slot = %due.slot.slot_key,
                pending = due.pending.len(),
                "Mood check-in due"
            );
            dispatcher.notify(Notification::mood_reminder(user_id, due));
        }
        None if snapshot.schedule.is_all_done() => {
            tracing::debug!(user_id = %user_id, "All mood check-ins completed for today");
        }
        None => {}
    }
}

/// Celebrate the day's last check-in when `snapshot` is the pass that saw it.
pub fn announce_all_done(dispatcher: &dyn NotificationDispatcher, user_id: Uuid, snapshot: &ScheduleSnapshot) {
    if snapshot.all_done {
        let total = snapshot.schedule.progress().total;
        tracing::info!(user_id = %user_id, total, "All mood check-ins completed");
        dispatcher.notify(Notification::all_check_ins_done(user_id, total));
    }
}

/// Push the current progress to the user's open sockets.
pub fn publish_progress(
    ws_tx: Option<&broadcast::Sender<String>>,
    user_id: Uuid,
    snapshot: &ScheduleSnapshot,
) {
    let Some(tx) = ws_tx else {
        return;
    };

    let progress = snapshot.schedule.progress();
    let msg = serde_json::json!({
        "type": "mood_progress",
        "user_id": user_id,
        "date": snapshot.schedule.date,
        "completed": progress.completed,
        "total": progress.total,
        "due_slot": snapshot.due.as_ref().map(|d| d.slot.slot_key),
        "pending": snapshot.due.as_ref().map_or(0, |d| d.pending.len()),
        "remote_synced": snapshot.remote_synced,
    });
    let _ = tx.send(msg.to_string());
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::mood_entry::{MoodKind, NewMoodEntry};
    use crate::notify::RecordingDispatcher;
    use crate::schedule::clock::FixedClock;
    use crate::schedule::ScheduleConfig;
    use crate::store::local::MemoryScheduleStore;
    use crate::store::memory::MemoryMoodEntryStore;
    use crate::store::remote::MoodEntryStore;
    use chrono::{NaiveDate, NaiveTime, TimeZone, Utc};
    use serde_json::Value;

    const LONG: Duration = Duration::from_secs(3600);

    fn june_first() -> NaiveDate {
        NaiveDate::from_ymd_opt(2024, 6, 1).unwrap()
    }

    fn setup() -> (Arc<MoodScheduleManager>, MemoryMoodEntryStore, Arc<RecordingDispatcher>) {
        let remote = MemoryMoodEntryStore::new();
        let clock = FixedClock::new(Utc.from_utc_datetime(&june_first().and_hms_opt(9, 0, 0).unwrap()));
        let manager = Arc::new(MoodScheduleManager::new(
            Arc::new(MemoryScheduleStore::new()),
            Arc::new(remote.clone()),
            Arc::new(clock),
            ScheduleConfig::default(),
        ));
        (manager, remote, Arc::new(RecordingDispatcher::default()))
    }

    async fn eventually<F: Fn() -> bool>(check: F) -> bool {
        for _ in 0..100 {
            if check() {
                return true;
            }
            tokio::time::sleep(Duration::from_millis(10)).await;
        }
        false
    }

    #[tokio::test]
    async fn test_first_tick_reminds_earliest_due_slot() {
        let (manager, _remote, dispatcher) = setup();
        let user = Uuid::new_v4();
        let _session = ReminderSession::start(manager, dispatcher.clone(), None, user, UserRole::Student, LONG);

        assert!(eventually(|| dispatcher.count_of("mood_reminder") == 1).await);
        let sent = dispatcher.sent();
        assert_eq!(sent[0].user_id, user);
        assert_eq!(sent[0].data["schedule_key"], "slot_1");
        assert_eq!(sent[0].data["pending"], 1);
    }

    #[tokio::test]
    async fn test_timer_keeps_reminding_until_completed() {
        let (manager, _remote, dispatcher) = setup();
        let _session = ReminderSession::start(
            manager,
            dispatcher.clone(),
            None,
            Uuid::new_v4(),
            UserRole::Student,
            Duration::from_millis(20),
        );

        assert!(eventually(|| dispatcher.count_of("mood_reminder") >= 3).await);
    }

    #[tokio::test]
    async fn test_realtime_change_reconciles_without_reminding() {
        let (manager, remote, dispatcher) = setup();
        let user = Uuid::new_v4();
        let (ws_tx, mut ws_rx) = broadcast::channel(16);
        let _session = ReminderSession::start(manager, dispatcher.clone(), Some(ws_tx), user, UserRole::Student, LONG);

        let first: Value = serde_json::from_str(&ws_rx.recv().await.unwrap()).unwrap();
        assert_eq!(first["completed"], 0);
        assert!(eventually(|| remote.subscriber_count() == 1).await);

        remote
            .insert(NewMoodEntry {
                user_id: user,
                user_role: UserRole::Student,
                entry_date: june_first(),
                entry_time: NaiveTime::from_hms_opt(9, 1, 0).unwrap(),
                mood: MoodKind::Happy,
                scheduled_label: "Morning (8-11 AM)".into(),
                schedule_key: Some("slot_1".into()),
                notes: None,
            })
            .await
            .unwrap();

        let update = tokio::time::timeout(Duration::from_secs(1), ws_rx.recv())
            .await
            .unwrap()
            .unwrap();
        let update: Value = serde_json::from_str(&update).unwrap();
        assert_eq!(update["type"], "mood_progress");
        assert_eq!(update["completed"], 1);
        assert!(update["due_slot"].is_null());
        assert_eq!(dispatcher.count_of("mood_reminder"), 1);
    }

    #[tokio::test]
    async fn test_realtime_change_that_completes_the_day_announces_once() {
        let (manager, remote, dispatcher) = setup();
        let user = Uuid::new_v4();
        for n in 1..=5 {
            manager.complete_slot(user, june_first(), &format!("slot_{n}")).await;
        }
        let _session = ReminderSession::start(manager.clone(), dispatcher.clone(), None, user, UserRole::Student, LONG);
        assert!(eventually(|| remote.subscriber_count() == 1).await);

        remote
            .insert(NewMoodEntry {
                user_id: user,
                user_role: UserRole::Student,
                entry_date: june_first(),
                entry_time: NaiveTime::from_hms_opt(9, 2, 0).unwrap(),
                mood: MoodKind::Good,
                scheduled_label: "Night (7-9 PM)".into(),
                schedule_key: Some("slot_6".into()),
                notes: None,
            })
            .await
            .unwrap();

        assert!(eventually(|| dispatcher.count_of("mood_all_done") == 1).await);
        let (_, completion) = manager.complete_slot(user, june_first(), "slot_6").await;
        assert!(!completion.all_done);
        tokio::time::sleep(Duration::from_millis(50)).await;
        assert_eq!(dispatcher.count_of("mood_all_done"), 1);
    }

    #[tokio::test]
    async fn test_sockets_of_one_user_share_a_session() {
        let (manager, remote, dispatcher) = setup();
        let registry = ReminderRegistry::new();
        let user = Uuid::new_v4();
        let acquire = |user_id| {
            registry.acquire(
                manager.clone(),
                dispatcher.clone(),
                None,
                user_id,
                UserRole::Student,
                LONG,
            )
        };

        let first = acquire(user);
        let second = acquire(user);
        assert_eq!(registry.active_sessions(), 1);

        assert!(eventually(|| dispatcher.count_of("mood_reminder") == 1).await);
        tokio::time::sleep(Duration::from_millis(50)).await;
        assert_eq!(dispatcher.count_of("mood_reminder"), 1);

        let other = acquire(Uuid::new_v4());
        assert_eq!(registry.active_sessions(), 2);
        drop(other);

        drop(first);
        assert_eq!(registry.active_sessions(), 1);
        assert!(eventually(|| remote.subscriber_count() == 1).await);

        drop(second);
        assert_eq!(registry.active_sessions(), 0);
        assert!(eventually(|| remote.subscriber_count() == 0).await);
    }

    #[tokio::test]
    async fn test_remote_outage_still_reminds_from_local_state() {
        let (manager, remote, dispatcher) = setup();
        remote.set_offline(true);
        let _session = ReminderSession::start(manager, dispatcher.clone(), None, Uuid::new_v4(), UserRole::Student, LONG);

        assert!(eventually(|| dispatcher.count_of("mood_reminder") == 1).await);
    }

    #[tokio::test]
    async fn test_drop_tears_down_timer_and_subscription() {
        let (manager, remote, dispatcher) = setup();
        let session = ReminderSession::start(
            manager,
            dispatcher.clone(),
            None,
            Uuid::new_v4(),
            UserRole::Student,
            Duration::from_millis(20),
        );
        assert!(eventually(|| remote.subscriber_count() == 1).await);

        session.shutdown();
        assert!(eventually(|| remote.subscriber_count() == 0).await);

        let settled = dispatcher.count_of("mood_reminder");
        tokio::time::sleep(Duration::from_millis(100)).await;
        assert_eq!(dispatcher.count_of("mood_reminder"), settled);
    }
}
