use chrono::{Duration, NaiveDate, NaiveDateTime, NaiveTime};
use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;

/// Number of fixed check-in slots per day.
pub const SLOTS_PER_DAY: usize = 6;

/// (start hour, end hour, label) for slot_1..slot_6.
const SLOT_TABLE: [(u32, u32, &str); SLOTS_PER_DAY] = [
    (8, 11, "Morning (8-11 AM)"),
    (11, 13, "Late Morning (11 AM-1 PM)"),
    (13, 15, "Afternoon (1-3 PM)"),
    (15, 17, "Late Afternoon (3-5 PM)"),
    (17, 19, "Evening (5-7 PM)"),
    (19, 21, "Night (7-9 PM)"),
];

/// Stable identifier of a daily slot, serialized as `slot_1`..`slot_6`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct SlotKey(u8);

impl SlotKey {
    pub const ALL: [SlotKey; SLOTS_PER_DAY] = [
        SlotKey(1),
        SlotKey(2),
        SlotKey(3),
        SlotKey(4),
        SlotKey(5),
        SlotKey(6),
    ];

    /// Parse a schedule key coming from a mood entry. Anything that is not
    /// one of the six slots (including `"welcome"` and `""`) yields `None`.
    pub fn parse(raw: &str) -> Option<Self> {
        let n: u8 = raw.strip_prefix("slot_")?.parse().ok()?;
        (1..=SLOTS_PER_DAY as u8).contains(&n).then_some(SlotKey(n))
    }

    /// 1-based position in the day.
    pub fn ordinal(self) -> u8 {
        self.0
    }

    pub fn label(self) -> &'static str {
        SLOT_TABLE[usize::from(self.0) - 1].2
    }
}

impl fmt::Display for SlotKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "slot_{}", self.0)
    }
}

impl FromStr for SlotKey {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        SlotKey::parse(s).ok_or_else(|| format!("unknown slot key: {s}"))
    }
}

impl Serialize for SlotKey {
    fn serialize<S: serde::Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.collect_str(self)
    }
}

impl<'de> Deserialize<'de> for SlotKey {
    fn deserialize<D: serde::Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
        let raw = String::deserialize(deserializer)?;
        raw.parse().map_err(serde::de::Error::custom)
    }
}

/// One fixed reminder window on a given date, in local wall-clock time.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SlotDefinition {
    pub slot_key: SlotKey,
    pub label: String,
    pub start_time: NaiveDateTime,
    pub end_time: NaiveDateTime,
}

/// What happens to a due slot once its window has closed.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum MissedSlotPolicy {
    /// Stays due until completed or the date rolls over.
    #[default]
    Persistent,
    /// Silently expires once `end_time` passes.
    WindowExpiry,
}

impl FromStr for MissedSlotPolicy {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "persistent" => Ok(Self::Persistent),
            "window_expiry" | "window" => Ok(Self::WindowExpiry),
            other => Err(format!("unknown missed slot policy: {other}")),
        }
    }
}

/// Per-slot, per-day lifecycle.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum SlotState {
    Pending,
    Due,
    Completed,
    Expired,
}

/// Midnight at the start of `date`.
pub fn midnight_of(date: NaiveDate) -> NaiveDateTime {
    date.and_time(NaiveTime::MIN)
}

/// The six fixed slots anchored at `reference_midnight`.
///
/// Pure and deterministic: the same midnight always yields the same keys and
/// boundaries, so a regenerated schedule still lines up with schedule keys
/// already recorded remotely.
pub fn generate_slot_definitions(reference_midnight: NaiveDateTime) -> Vec<SlotDefinition> {
    SLOT_TABLE
        .iter()
        .zip(SlotKey::ALL)
        .map(|(&(start, end, label), slot_key)| SlotDefinition {
            slot_key,
            label: label.to_string(),
            start_time: reference_midnight + Duration::hours(i64::from(start)),
            end_time: reference_midnight + Duration::hours(i64::from(end)),
        })
        .collect()
}
