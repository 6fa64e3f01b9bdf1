use chrono::{DateTime, NaiveDate, NaiveTime, Utc};
use serde::{Deserialize, Serialize};
use sqlx::FromRow;
use uuid::Uuid;

use super::user::UserRole;

/// Label stored on entries logged outside any reminder.
pub const UNSCHEDULED_LABEL: &str = "Unscheduled";

/// Schedule key and label of the first-check-in-of-the-day prompt. It names
/// no slot, so it never counts toward progress.
pub const WELCOME_KEY: &str = "welcome";
pub const WELCOME_LABEL: &str = "Welcome Check-in";

/// One logged check-in. Append-only.
#[derive(Debug, Clone, Serialize, Deserialize, FromRow, PartialEq)]
pub struct MoodEntry {
    pub id: Uuid,
    pub user_id: Uuid,
    pub user_role: UserRole,
    pub entry_date: NaiveDate,
    pub entry_time: NaiveTime,
    pub mood_emoji: String,
    pub mood_label: String,
    pub scheduled_label: String,
    pub schedule_key: Option<String>,
    pub notes: Option<String>,
    pub created_at: DateTime<Utc>,
}

/// Insert payload for the remote store.
#[derive(Debug, Clone)]
pub struct NewMoodEntry {
    pub user_id: Uuid,
    pub user_role: UserRole,
    pub entry_date: NaiveDate,
    pub entry_time: NaiveTime,
    pub mood: MoodKind,
    pub scheduled_label: String,
    pub schedule_key: Option<String>,
    pub notes: Option<String>,
}

/// The fixed emoji palette offered when logging a mood.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum MoodKind {
    Happy,
    Good,
    Neutral,
    Sad,
    Angry,
}

impl MoodKind {
    pub const ALL: [MoodKind; 5] = [
        MoodKind::Happy,
        MoodKind::Good,
        MoodKind::Neutral,
        MoodKind::Sad,
        MoodKind::Angry,
    ];

    pub fn emoji(self) -> &'static str {
        match self {
            MoodKind::Happy => "😄",
            MoodKind::Good => "🙂",
            MoodKind::Neutral => "😐",
            MoodKind::Sad => "😔",
            MoodKind::Angry => "😡",
        }
    }

    pub fn label(self) -> &'static str {
        match self {
            MoodKind::Happy => "Happy",
            MoodKind::Good => "Good",
            MoodKind::Neutral => "Neutral",
            MoodKind::Sad => "Sad",
            MoodKind::Angry => "Angry",
        }
    }

    pub fn from_emoji(emoji: &str) -> Option<Self> {
        Self::ALL.into_iter().find(|kind| kind.emoji() == emoji)
    }
}
