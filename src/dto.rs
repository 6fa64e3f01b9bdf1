//! # Mood check-in API: Request/Response DTOs
//!
//! Conventions:
//! - `*Request` / `*Query` → deserialized from client JSON body or query params
//! - `*Response` → serialized to client JSON
//! - Validation is expressed via `validator` derive macros

use chrono::{DateTime, NaiveDate, NaiveDateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;
use validator::Validate;

use crate::models::mood_entry::MoodEntry;
use crate::schedule::{
    MissedSlotPolicy, Progress, ScheduleSnapshot, SlotDefinition, SlotKey, SlotState,
};

/// Default history window when no range is requested.
pub const DEFAULT_HISTORY_DAYS: i64 = 30;

// ============================================================================
// Mood entries
// ============================================================================

/// POST /api/mood-entries
#[derive(Debug, Deserialize, Validate)]
pub struct CreateMoodEntryRequest {
    /// One of the fixed palette emojis.
    #[validate(length(min = 1, max = 16, message = "Mood emoji is required"))]
    pub emoji: String,

    /// Slot being answered (`slot_1`..`slot_6`), `welcome`, or absent for an
    /// unscheduled check-in.
    #[validate(length(max = 32, message = "Schedule key too long"))]
    pub schedule_key: Option<String>,

    #[validate(length(max = 100, message = "Label must be at most 100 characters"))]
    pub scheduled_label: Option<String>,

    #[validate(length(max = 5000, message = "Notes must be at most 5000 characters"))]
    pub notes: Option<String>,
}

#[derive(Debug, Serialize)]
pub struct CreateMoodEntryResponse {
    pub entry: MoodEntry,
    pub progress: Progress,
    /// The entry's slot was open before this request and is completed now.
    pub slot_completed: bool,
    /// The entry's slot was the day's last open one.
    pub all_done: bool,
    /// Next pending reminder, surfaced right after a non-final completion.
    pub next_due: Option<SlotDefinition>,
}

impl CreateMoodEntryResponse {
    pub fn new(
        entry: MoodEntry,
        progress: Progress,
        slot_completed: bool,
        next_due: Option<SlotDefinition>,
    ) -> Self {
        Self {
            entry,
            slot_completed,
            all_done: slot_completed && progress.completed == progress.total,
            progress,
            next_due,
        }
    }
}

/// GET /api/mood-entries
#[derive(Debug, Deserialize)]
pub struct MoodEntryQuery {
    pub start_date: Option<NaiveDate>,
    pub end_date: Option<NaiveDate>,
}

impl MoodEntryQuery {
    /// Inclusive range, defaulting to the last 30 days ending `today`.
    pub fn resolve(&self, today: NaiveDate) -> (NaiveDate, NaiveDate) {
        let end = self.end_date.unwrap_or(today);
        let start = self
            .start_date
            .unwrap_or_else(|| end - chrono::Duration::days(DEFAULT_HISTORY_DAYS));
        (start, end)
    }
}

/// GET /api/mood-entries/export
#[derive(Debug, Serialize)]
pub struct ExportResponse {
    pub user_id: Uuid,
    pub export_date: DateTime<Utc>,
    pub total_entries: usize,
    pub first_entry: Option<NaiveDate>,
    pub last_entry: Option<NaiveDate>,
    pub entries: Vec<MoodEntry>,
}

impl ExportResponse {
    /// `entries` must be ordered oldest first.
    pub fn new(user_id: Uuid, export_date: DateTime<Utc>, entries: Vec<MoodEntry>) -> Self {
        Self {
            user_id,
            export_date,
            total_entries: entries.len(),
            first_entry: entries.first().map(|e| e.entry_date),
            last_entry: entries.last().map(|e| e.entry_date),
            entries,
        }
    }
}

// ============================================================================
// Schedule
// ============================================================================

#[derive(Debug, Serialize)]
pub struct SlotStatus {
    pub slot_key: SlotKey,
    pub label: String,
    pub start_time: NaiveDateTime,
    pub end_time: NaiveDateTime,
    pub state: SlotState,
}

/// GET /api/mood-schedule/today, POST /api/mood-schedule/check
#[derive(Debug, Serialize)]
pub struct TodayScheduleResponse {
    pub date: NaiveDate,
    pub now: NaiveDateTime,
    pub progress: Progress,
    pub all_done: bool,
    pub slots: Vec<SlotStatus>,
    pub due_slot: Option<SlotDefinition>,
    pub pending: Vec<SlotDefinition>,
    pub next_slot: Option<SlotDefinition>,
    pub welcome_due: bool,
    pub remote_synced: bool,
    pub last_checked_at: Option<DateTime<Utc>>,
}

impl TodayScheduleResponse {
    pub fn from_snapshot(snapshot: ScheduleSnapshot, policy: MissedSlotPolicy) -> Self {
        let schedule = snapshot.schedule;
        let slots = schedule
            .slots
            .iter()
            .map(|slot| SlotStatus {
                slot_key: slot.slot_key,
                label: slot.label.clone(),
                start_time: slot.start_time,
                end_time: slot.end_time,
                state: schedule.slot_state(slot, snapshot.now, policy),
            })
            .collect();
        let (due_slot, pending) = match snapshot.due {
            Some(due) => (Some(due.slot), due.pending),
            None => (None, Vec::new()),
        };

        Self {
            date: schedule.date,
            now: snapshot.now,
            progress: schedule.progress(),
            all_done: schedule.is_all_done(),
            slots,
            due_slot,
            pending,
            next_slot: snapshot.next_slot,
            welcome_due: snapshot.welcome_due,
            remote_synced: snapshot.remote_synced,
            last_checked_at: schedule.last_checked_at,
        }
    }
}
