//! In-process mood-entry store for tests, with a switchable outage.

use async_trait::async_trait;
use chrono::{NaiveDate, Utc};
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::Arc;
use tokio::sync::{broadcast, mpsc, Mutex, OwnedMutexGuard};
use uuid::Uuid;

use super::remote::{MoodEntryChange, MoodEntryStore, MoodEntrySubscription};
use crate::error::{StoreError, StoreResult};
use crate::models::mood_entry::{MoodEntry, NewMoodEntry};

#[derive(Clone)]
pub struct MemoryMoodEntryStore {
    entries: Arc<Mutex<Vec<MoodEntry>>>,
    changes: broadcast::Sender<MoodEntryChange>,
    offline: Arc<AtomicBool>,
    day_queries: Arc<AtomicUsize>,
    insert_gate: Arc<Mutex<()>>,
}

impl Default for MemoryMoodEntryStore {
    fn default() -> Self {
        let (changes, _) = broadcast::channel(64);
        Self {
            entries: Arc::new(Mutex::new(Vec::new())),
            changes,
            offline: Arc::new(AtomicBool::new(false)),
            day_queries: Arc::new(AtomicUsize::new(0)),
            insert_gate: Arc::new(Mutex::new(())),
        }
    }
}

impl MemoryMoodEntryStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Simulate the remote being unreachable.
    pub fn set_offline(&self, offline: bool) {
        self.offline.store(offline, Ordering::SeqCst);
    }

    /// How many `entries_for_day` queries have been served.
    pub fn day_queries(&self) -> usize {
        self.day_queries.load(Ordering::SeqCst)
    }

    /// Inserts store and broadcast their row, then wait for the guard to drop
    /// before returning.
    pub async fn hold_inserts(&self) -> OwnedMutexGuard<()> {
        self.insert_gate.clone().lock_owned().await
    }

    /// Live realtime subscriptions.
    pub fn subscriber_count(&self) -> usize {
        self.changes.receiver_count()
    }

    fn check_online(&self) -> StoreResult<()> {
        if self.offline.load(Ordering::SeqCst) {
            return Err(StoreError::Unavailable("simulated outage".into()));
        }
        Ok(())
    }
}

#[async_trait]
impl MoodEntryStore for MemoryMoodEntryStore {
    async fn entries_for_day(&self, user_id: Uuid, date: NaiveDate) -> StoreResult<Vec<MoodEntry>> {
        self.check_online()?;
        self.day_queries.fetch_add(1, Ordering::SeqCst);
        let entries = self.entries.lock().await;
        Ok(entries
            .iter()
            .filter(|e| e.user_id == user_id && e.entry_date == date)
            .cloned()
            .collect())
    }

    async fn list_entries(
        &self,
        user_id: Uuid,
        range: Option<(NaiveDate, NaiveDate)>,
    ) -> StoreResult<Vec<MoodEntry>> {
        self.check_online()?;
        let entries = self.entries.lock().await;
        let mut matching: Vec<MoodEntry> = entries
            .iter()
            .filter(|e| e.user_id == user_id)
            .filter(|e| match range {
                Some((start, end)) => e.entry_date >= start && e.entry_date <= end,
                None => true,
            })
            .cloned()
            .collect();
        matching.sort_by_key(|e| (e.entry_date, e.entry_time));
        Ok(matching)
    }

    async fn insert(&self, entry: NewMoodEntry) -> StoreResult<MoodEntry> {
        self.check_online()?;
        let row = MoodEntry {
            id: Uuid::new_v4(),
            user_id: entry.user_id,
            user_role: entry.user_role,
            entry_date: entry.entry_date,
            entry_time: entry.entry_time,
            mood_emoji: entry.mood.emoji().to_string(),
            mood_label: entry.mood.label().to_string(),
            scheduled_label: entry.scheduled_label,
            schedule_key: entry.schedule_key,
            notes: entry.notes,
            created_at: Utc::now(),
        };
        self.entries.lock().await.push(row.clone());
        let _ = self.changes.send(MoodEntryChange::from(&row));
        drop(self.insert_gate.lock().await);
        Ok(row)
    }

    async fn subscribe(&self, user_id: Uuid) -> StoreResult<MoodEntrySubscription> {
        self.check_online()?;
        let mut feed = self.changes.subscribe();
        let (tx, rx) = mpsc::channel(16);
        let forwarder = tokio::spawn(async move {
            while let Ok(change) = feed.recv().await {
                if change.user_id == user_id && tx.send(change).await.is_err() {
                    break;
                }
            }
        });
        Ok(MoodEntrySubscription::new(rx, forwarder))
    }

    async fn ping(&self) -> StoreResult<()> {
        self.check_online()
    }
}
