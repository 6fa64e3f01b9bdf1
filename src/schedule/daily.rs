use chrono::{DateTime, NaiveDate, NaiveDateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::BTreeSet;
use uuid::Uuid;

use super::slots::{
    generate_slot_definitions, midnight_of, MissedSlotPolicy, SlotDefinition, SlotKey, SlotState,
    SLOTS_PER_DAY,
};

/// Per-user, per-date slot definitions and completion state.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct DailySchedule {
    pub user_id: Uuid,
    pub date: NaiveDate,
    pub slots: Vec<SlotDefinition>,
    #[serde(default)]
    pub completed_slot_keys: BTreeSet<SlotKey>,
    #[serde(default)]
    pub last_checked_at: Option<DateTime<Utc>>,
}

/// Result of marking one slot as done.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub struct Completion {
    pub newly_completed: bool,
    pub completed_count: usize,
    /// True only on the call that completed the last remaining slot.
    pub all_done: bool,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub struct Progress {
    pub completed: usize,
    pub total: usize,
}

/// The slot to prompt for now plus every due, incomplete slot in order.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct DueSlots {
    pub slot: SlotDefinition,
    pub pending: Vec<SlotDefinition>,
}

impl DailySchedule {
    /// Fresh schedule for `date` with nothing completed.
    pub fn new(user_id: Uuid, date: NaiveDate) -> Self {
        Self {
            user_id,
            date,
            slots: generate_slot_definitions(midnight_of(date)),
            completed_slot_keys: BTreeSet::new(),
            last_checked_at: None,
        }
    }

    /// Whether a record loaded from storage actually belongs to `(user_id, date)`
    /// and has a usable shape.
    pub fn is_well_formed(&self, user_id: Uuid, date: NaiveDate) -> bool {
        self.user_id == user_id
            && self.date == date
            && self.slots.len() == SLOTS_PER_DAY
            && self.completed_slot_keys.iter().all(|key| self.defines(*key))
    }

    pub fn defines(&self, key: SlotKey) -> bool {
        self.slots.iter().any(|slot| slot.slot_key == key)
    }

    pub fn is_completed(&self, key: SlotKey) -> bool {
        self.completed_slot_keys.contains(&key)
    }

    pub fn progress(&self) -> Progress {
        Progress {
            completed: self.completed_slot_keys.len(),
            total: self.slots.len(),
        }
    }

    pub fn is_all_done(&self) -> bool {
        !self.slots.is_empty() && self.completed_slot_keys.len() == self.slots.len()
    }

    /// Mark `raw_key` completed. Unknown keys and already-completed slots are
    /// no-ops.
    pub fn mark_completed(&mut self, raw_key: &str) -> Completion {
        let newly_completed = match SlotKey::parse(raw_key) {
            Some(key) if self.defines(key) => self.completed_slot_keys.insert(key),
            _ => false,
        };

        Completion {
            newly_completed,
            completed_count: self.completed_slot_keys.len(),
            all_done: newly_completed && self.is_all_done(),
        }
    }

    /// Union remote-confirmed keys into the completion set. Returns the keys
    /// that were not already present, in slot order.
    pub fn merge_completed<'a, I>(&mut self, raw_keys: I) -> Vec<SlotKey>
    where
        I: IntoIterator<Item = &'a str>,
    {
        let slots = &self.slots;
        let completed = &mut self.completed_slot_keys;
        let mut added: Vec<SlotKey> = raw_keys
            .into_iter()
            .filter_map(SlotKey::parse)
            .filter(|key| slots.iter().any(|slot| slot.slot_key == *key))
            .filter(|key| completed.insert(*key))
            .collect();
        added.sort();
        added
    }

    pub fn slot_state(
        &self,
        slot: &SlotDefinition,
        now: NaiveDateTime,
        policy: MissedSlotPolicy,
    ) -> SlotState {
        if self.is_completed(slot.slot_key) {
            SlotState::Completed
        } else if now < slot.start_time {
            SlotState::Pending
        } else if policy == MissedSlotPolicy::WindowExpiry && now >= slot.end_time {
            SlotState::Expired
        } else {
            SlotState::Due
        }
    }

    /// Earliest due, incomplete slot and the full pending queue, or `None`
    /// when nothing is due yet or everything is done.
    pub fn find_due_slot(&self, now: NaiveDateTime, policy: MissedSlotPolicy) -> Option<DueSlots> {
        let mut pending: Vec<SlotDefinition> = self
            .slots
            .iter()
            .filter(|slot| self.slot_state(slot, now, policy) == SlotState::Due)
            .cloned()
            .collect();
        pending.sort_by_key(|slot| (slot.start_time, slot.slot_key));

        let slot = pending.first()?.clone();
        Some(DueSlots { slot, pending })
    }

    /// First incomplete slot that starts strictly after `now`.
    pub fn next_upcoming_slot(&self, now: NaiveDateTime) -> Option<&SlotDefinition> {
        self.slots
            .iter()
            .filter(|slot| slot.start_time > now && !self.is_completed(slot.slot_key))
            .min_by_key(|slot| (slot.start_time, slot.slot_key))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::NaiveTime;

    fn june_first() -> NaiveDate {
        NaiveDate::from_ymd_opt(2024, 6, 1).unwrap()
    }

    fn at(h: u32, m: u32) -> NaiveDateTime {
        june_first().and_time(NaiveTime::from_hms_opt(h, m, 0).unwrap())
    }

    fn schedule() -> DailySchedule {
        DailySchedule::new(Uuid::nil(), june_first())
    }

    #[test]
    fn test_only_first_slot_due_at_nine() {
        let s = schedule();
        let due = s.find_due_slot(at(9, 0), MissedSlotPolicy::Persistent).unwrap();
        assert_eq!(due.slot.slot_key.to_string(), "slot_1");
        assert_eq!(due.pending.len(), 1);

        for slot in &s.slots[1..] {
            assert_eq!(
                s.slot_state(slot, at(9, 0), MissedSlotPolicy::Persistent),
                SlotState::Pending
            );
        }
    }

    #[test]
    fn test_nothing_due_before_first_slot() {
        assert!(schedule()
            .find_due_slot(at(7, 59), MissedSlotPolicy::Persistent)
            .is_none());
    }

    #[test]
    fn test_earliest_overdue_slot_wins() {
        let mut s = schedule();
        s.mark_completed("slot_1");
        let due = s.find_due_slot(at(18, 30), MissedSlotPolicy::Persistent).unwrap();
        assert_eq!(due.slot.slot_key.to_string(), "slot_2");
        let queue: Vec<String> = due.pending.iter().map(|p| p.slot_key.to_string()).collect();
        assert_eq!(queue, ["slot_2", "slot_3", "slot_4", "slot_5"]);
    }

    #[test]
    fn test_due_slot_is_never_completed() {
        let mut s = schedule();
        s.mark_completed("slot_2");
        s.mark_completed("slot_4");
        for hour in 0..24 {
            if let Some(due) = s.find_due_slot(at(hour, 0), MissedSlotPolicy::Persistent) {
                assert!(!s.is_completed(due.slot.slot_key));
                assert!(due.pending.iter().all(|p| !s.is_completed(p.slot_key)));
            }
        }
    }

    #[test]
    fn test_persistent_slot_stays_due_until_midnight() {
        let due = schedule()
            .find_due_slot(at(23, 59), MissedSlotPolicy::Persistent)
            .unwrap();
        assert_eq!(due.slot.slot_key.to_string(), "slot_1");
        assert_eq!(due.pending.len(), SLOTS_PER_DAY);
    }

    #[test]
    fn test_window_expiry_drops_closed_slots() {
        let s = schedule();
        let due = s
            .find_due_slot(at(12, 0), MissedSlotPolicy::WindowExpiry)
            .unwrap();
        assert_eq!(due.slot.slot_key.to_string(), "slot_2");
        assert_eq!(due.pending.len(), 1);
        assert_eq!(
            s.slot_state(&s.slots[0], at(12, 0), MissedSlotPolicy::WindowExpiry),
            SlotState::Expired
        );
        assert!(s
            .find_due_slot(at(21, 0), MissedSlotPolicy::WindowExpiry)
            .is_none());
    }

    #[test]
    fn test_duplicate_completion_is_noop() {
        let mut s = schedule();
        let first = s.mark_completed("slot_1");
        assert!(first.newly_completed);
        assert_eq!(first.completed_count, 1);

        let second = s.mark_completed("slot_1");
        assert!(!second.newly_completed);
        assert_eq!(second.completed_count, 1);
    }

    #[test]
    fn test_unknown_key_does_not_touch_completion() {
        let mut s = schedule();
        s.mark_completed("slot_1");
        let before = s.completed_slot_keys.clone();

        for raw in ["welcome", "slot_7", "", "SLOT_1"] {
            let outcome = s.mark_completed(raw);
            assert!(!outcome.newly_completed);
        }
        assert_eq!(s.completed_slot_keys, before);
    }

    #[test]
    fn test_all_done_fires_once_on_last_slot() {
        let mut s = schedule();
        let mut signals = 0;
        for key in SlotKey::ALL {
            if s.mark_completed(&key.to_string()).all_done {
                signals += 1;
            }
        }
        assert_eq!(signals, 1);
        assert!(!s.mark_completed("slot_6").all_done);
        assert!(s.find_due_slot(at(22, 0), MissedSlotPolicy::Persistent).is_none());
        assert_eq!(s.progress(), Progress { completed: 6, total: 6 });
    }

    #[test]
    fn test_merge_completed_is_a_union() {
        let mut s = schedule();
        s.mark_completed("slot_1");
        let added = s.merge_completed(["slot_3", "slot_1", "welcome", "slot_3"]);
        assert_eq!(added, vec![SlotKey::ALL[2]]);
        let keys: Vec<String> = s.completed_slot_keys.iter().map(|k| k.to_string()).collect();
        assert_eq!(keys, ["slot_1", "slot_3"]);
    }

    #[test]
    fn test_next_upcoming_slot_skips_completed() {
        let mut s = schedule();
        assert_eq!(
            s.next_upcoming_slot(at(9, 0)).map(|slot| slot.slot_key.to_string()),
            Some("slot_2".to_string())
        );
        s.mark_completed("slot_2");
        assert_eq!(
            s.next_upcoming_slot(at(9, 0)).map(|slot| slot.slot_key.to_string()),
            Some("slot_3".to_string())
        );
        assert!(s.next_upcoming_slot(at(19, 0)).is_none());
    }

    #[test]
    fn test_well_formed_rejects_foreign_records() {
        let s = schedule();
        assert!(s.is_well_formed(Uuid::nil(), june_first()));
        assert!(!s.is_well_formed(Uuid::new_v4(), june_first()));
        assert!(!s.is_well_formed(Uuid::nil(), june_first().succ_opt().unwrap()));

        let mut truncated = schedule();
        truncated.slots.pop();
        assert!(!truncated.is_well_formed(Uuid::nil(), june_first()));
    }
}
