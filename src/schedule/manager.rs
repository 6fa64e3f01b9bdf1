//! Mood Schedule Manager: owns the per-user, per-day schedule record and is
//! the single writer of it.
//!
//! Every pass for a user runs under that user's single-flight lock, so the
//! periodic timer, realtime notifications, and HTTP requests never interleave
//! their read-modify-write of the same record.

use chrono::{DateTime, FixedOffset, NaiveDate, NaiveDateTime, Offset, Utc};
use std::collections::HashMap;
use std::sync::Arc;
use tokio::sync::{Mutex, OwnedMutexGuard};
use uuid::Uuid;

use super::clock::Clock;
use super::daily::{Completion, DailySchedule, DueSlots};
use super::slots::{MissedSlotPolicy, SlotDefinition, SlotKey};
use crate::config::Config;
use crate::models::user::UserRole;
use crate::store::local::{schedule_key, ScheduleStore};
use crate::store::remote::MoodEntryStore;

/// Role-parameterized behavior of the shared schedule algorithm.
#[derive(Debug, Clone)]
pub struct ScheduleConfig {
    pub utc_offset: FixedOffset,
    pub student_policy: MissedSlotPolicy,
    pub expert_policy: MissedSlotPolicy,
    pub peer_policy: MissedSlotPolicy,
    pub welcome_check_in: bool,
}

impl Default for ScheduleConfig {
    fn default() -> Self {
        Self {
            utc_offset: Utc.fix(),
            student_policy: MissedSlotPolicy::Persistent,
            expert_policy: MissedSlotPolicy::Persistent,
            peer_policy: MissedSlotPolicy::Persistent,
            welcome_check_in: true,
        }
    }
}

impl ScheduleConfig {
    pub fn from_config(config: &Config) -> Self {
        Self {
            utc_offset: config.schedule_utc_offset,
            student_policy: config.student_missed_slot_policy,
            expert_policy: config.expert_missed_slot_policy,
            peer_policy: config.peer_missed_slot_policy,
            welcome_check_in: config.welcome_check_in_enabled,
        }
    }

    pub fn policy_for(&self, role: UserRole) -> MissedSlotPolicy {
        match role {
            UserRole::Student => self.student_policy,
            UserRole::Expert => self.expert_policy,
            UserRole::Peer => self.peer_policy,
        }
    }
}

/// Outcome of merging remote entries into the local schedule.
#[derive(Debug, Clone)]
pub struct Reconciliation {
    pub schedule: DailySchedule,
    /// `false` when the remote query failed and local state was kept as is.
    pub remote_synced: bool,
    pub newly_completed: Vec<SlotKey>,
    /// True when this merge completed the last remaining slot.
    pub all_done: bool,
    /// Number of remote entries dated today, when the remote answered.
    pub entries_today: Option<usize>,
}

/// Everything a caller needs to decide what to show right now.
#[derive(Debug, Clone)]
pub struct ScheduleSnapshot {
    pub schedule: DailySchedule,
    pub now: NaiveDateTime,
    pub due: Option<DueSlots>,
    pub next_slot: Option<SlotDefinition>,
    pub remote_synced: bool,
    pub welcome_due: bool,
    /// This pass observed the day's last slot complete. Fires on one pass only.
    pub all_done: bool,
}

pub struct MoodScheduleManager {
    local: Arc<dyn ScheduleStore>,
    remote: Arc<dyn MoodEntryStore>,
    clock: Arc<dyn Clock>,
    config: ScheduleConfig,
    in_flight: Mutex<HashMap<Uuid, Arc<Mutex<()>>>>,
}

impl MoodScheduleManager {
    pub fn new(
        local: Arc<dyn ScheduleStore>,
        remote: Arc<dyn MoodEntryStore>,
        clock: Arc<dyn Clock>,
        config: ScheduleConfig,
    ) -> Self {
        Self {
            local,
            remote,
            clock,
            config,
            in_flight: Mutex::new(HashMap::new()),
        }
    }

    pub fn remote(&self) -> &Arc<dyn MoodEntryStore> {
        &self.remote
    }

    pub fn config(&self) -> &ScheduleConfig {
        &self.config
    }

    pub fn utc_now(&self) -> DateTime<Utc> {
        self.clock.now()
    }

    /// Current local wall-clock time.
    pub fn local_now(&self) -> NaiveDateTime {
        self.clock
            .now()
            .with_timezone(&self.config.utc_offset)
            .naive_local()
    }

    pub fn today(&self) -> NaiveDate {
        self.local_now().date()
    }

    /// Today's schedule for `user_id`, created and persisted on first use.
    /// Idempotent: an existing record is returned untouched.
    pub async fn ensure_daily_schedule(&self, user_id: Uuid, today: NaiveDate) -> DailySchedule {
        if let Some(existing) = self.load(user_id, today).await {
            return existing;
        }

        let schedule = DailySchedule::new(user_id, today);
        tracing::debug!(user_id = %user_id, date = %today, "Created daily mood schedule");
        self.persist(&schedule).await;
        schedule
    }

    /// Union today's remote schedule keys into the local completion set.
    /// A remote failure skips the pass and keeps the last known local state.
    pub async fn reconcile_with_remote(&self, user_id: Uuid, today: NaiveDate) -> Reconciliation {
        let mut schedule = self.ensure_daily_schedule(user_id, today).await;

        let entries = match self.remote.entries_for_day(user_id, today).await {
            Ok(entries) => entries,
            Err(e) => {
                tracing::warn!(
                    user_id = %user_id,
                    date = %today,
                    error = %e,
                    "Skipping mood reconciliation; remote unavailable"
                );
                return Reconciliation {
                    schedule,
                    remote_synced: false,
                    newly_completed: Vec::new(),
                    all_done: false,
                    entries_today: None,
                };
            }
        };

        let newly_completed =
            schedule.merge_completed(entries.iter().filter_map(|e| e.schedule_key.as_deref()));
        let all_done = !newly_completed.is_empty() && schedule.is_all_done();
        schedule.last_checked_at = Some(self.clock.now());
        self.persist(&schedule).await;

        if !newly_completed.is_empty() {
            tracing::info!(
                user_id = %user_id,
                added = newly_completed.len(),
                completed = schedule.completed_slot_keys.len(),
                "Reconciled mood check-ins from remote"
            );
        }

        Reconciliation {
            schedule,
            remote_synced: true,
            newly_completed,
            all_done,
            entries_today: Some(entries.len()),
        }
    }

    /// Earliest due slot under the policy configured for `role`.
    pub fn find_due_slot(
        &self,
        schedule: &DailySchedule,
        now: NaiveDateTime,
        role: UserRole,
    ) -> Option<DueSlots> {
        schedule.find_due_slot(now, self.config.policy_for(role))
    }

    /// Mark `raw_key` done on `schedule` and persist when it changed anything.
    pub async fn record_completion(&self, schedule: &mut DailySchedule, raw_key: &str) -> Completion {
        let completion = schedule.mark_completed(raw_key);
        if completion.newly_completed {
            self.persist(schedule).await;
            tracing::info!(
                user_id = %schedule.user_id,
                slot = %raw_key,
                completed = completion.completed_count,
                "Mood check-in slot completed"
            );
        } else {
            tracing::debug!(
                user_id = %schedule.user_id,
                slot = %raw_key,
                "Completion ignored; slot unknown or already done"
            );
        }
        completion
    }

    /// Serialized entry point shared by the periodic timer, realtime
    /// notifications, and request handlers: reconcile, then evaluate.
    pub async fn run_pass(&self, user_id: Uuid, role: UserRole) -> ScheduleSnapshot {
        let _guard = self.lock_user(user_id).await;

        let now = self.local_now();
        let reconciliation = self.reconcile_with_remote(user_id, now.date()).await;
        let schedule = reconciliation.schedule;

        ScheduleSnapshot {
            due: self.find_due_slot(&schedule, now, role),
            next_slot: schedule.next_upcoming_slot(now).cloned(),
            remote_synced: reconciliation.remote_synced,
            welcome_due: self.config.welcome_check_in && reconciliation.entries_today == Some(0),
            all_done: reconciliation.all_done,
            now,
            schedule,
        }
    }

    /// Record a check-in against today's schedule under the user's lock.
    pub async fn complete_slot(&self, user_id: Uuid, date: NaiveDate, raw_key: &str) -> (DailySchedule, Completion) {
        let _guard = self.lock_user(user_id).await;

        let mut schedule = self.ensure_daily_schedule(user_id, date).await;
        let completion = self.record_completion(&mut schedule, raw_key).await;
        (schedule, completion)
    }

    /// Whether `raw_key` is already completed on the user's schedule for `date`.
    pub async fn is_slot_completed(&self, user_id: Uuid, date: NaiveDate, raw_key: &str) -> bool {
        let _guard = self.lock_user(user_id).await;

        let schedule = self.ensure_daily_schedule(user_id, date).await;
        SlotKey::parse(raw_key).is_some_and(|key| schedule.is_completed(key))
    }

    async fn lock_user(&self, user_id: Uuid) -> OwnedMutexGuard<()> {
        let lock = {
            let mut locks = self.in_flight.lock().await;
            locks.retain(|id, lock| *id == user_id || Arc::strong_count(lock) > 1);
            locks.entry(user_id).or_default().clone()
        };
        lock.lock_owned().await
    }

    async fn load(&self, user_id: Uuid, date: NaiveDate) -> Option<DailySchedule> {
        let key = schedule_key(user_id, date);
        let raw = match self.local.get(&key).await {
            Ok(Some(raw)) => raw,
            Ok(None) => return None,
            Err(e) => {
                tracing::warn!(key = %key, error = %e, "Schedule read failed; regenerating");
                return None;
            }
        };

        match serde_json::from_str::<DailySchedule>(&raw) {
            Ok(schedule) if schedule.is_well_formed(user_id, date) => Some(schedule),
            Ok(_) => {
                tracing::warn!(key = %key, "Stored schedule does not match its key; regenerating");
                None
            }
            Err(e) => {
                tracing::warn!(key = %key, error = %e, "Stored schedule is corrupt; regenerating");
                None
            }
        }
    }

    async fn persist(&self, schedule: &DailySchedule) {
        let key = schedule_key(schedule.user_id, schedule.date);
        let raw = match serde_json::to_string(schedule) {
            Ok(raw) => raw,
            Err(e) => {
                tracing::error!(key = %key, error = %e, "Failed to serialize schedule");
                return;
            }
        };

        if let Err(e) = self.local.set(&key, raw).await {
            tracing::error!(key = %key, error = %e, "Failed to persist schedule");
        }
    }
}
