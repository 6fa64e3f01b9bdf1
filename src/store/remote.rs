//! Remote mood-entry store: query, append, and a realtime change feed.

use async_trait::async_trait;
use chrono::NaiveDate;
use serde::{Deserialize, Serialize};
use sqlx::postgres::PgListener;
use sqlx::PgPool;
use std::time::Duration;
use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use uuid::Uuid;

use crate::error::StoreResult;
use crate::models::mood_entry::{MoodEntry, NewMoodEntry};

/// Postgres NOTIFY channel fed by the `mood_entries` insert trigger.
pub const CHANGE_CHANNEL: &str = "mood_entries_changes";

const SUBSCRIPTION_BUFFER: usize = 32;
const LISTENER_RETRY: Duration = Duration::from_secs(5);

/// Payload pushed for every inserted mood entry.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct MoodEntryChange {
    pub user_id: Uuid,
    pub entry_id: Uuid,
    pub entry_date: NaiveDate,
    pub schedule_key: Option<String>,
}

impl From<&MoodEntry> for MoodEntryChange {
    fn from(entry: &MoodEntry) -> Self {
        Self {
            user_id: entry.user_id,
            entry_id: entry.id,
            entry_date: entry.entry_date,
            schedule_key: entry.schedule_key.clone(),
        }
    }
}

/// Live feed of one user's mood-entry changes. Dropping it unsubscribes.
pub struct MoodEntrySubscription {
    rx: mpsc::Receiver<MoodEntryChange>,
    forwarder: Option<JoinHandle<()>>,
}

impl MoodEntrySubscription {
    pub fn new(rx: mpsc::Receiver<MoodEntryChange>, forwarder: JoinHandle<()>) -> Self {
        Self {
            rx,
            forwarder: Some(forwarder),
        }
    }

    /// Next change, or `None` once the feed has closed.
    pub async fn recv(&mut self) -> Option<MoodEntryChange> {
        self.rx.recv().await
    }
}

impl Drop for MoodEntrySubscription {
    fn drop(&mut self) {
        if let Some(forwarder) = self.forwarder.take() {
            forwarder.abort();
        }
    }
}

#[async_trait]
pub trait MoodEntryStore: Send + Sync {
    /// All entries of `user_id` dated `date`.
    async fn entries_for_day(&self, user_id: Uuid, date: NaiveDate) -> StoreResult<Vec<MoodEntry>>;

    /// Entries in `[start, end]`, or every entry when no range is given,
    /// oldest first.
    async fn list_entries(
        &self,
        user_id: Uuid,
        range: Option<(NaiveDate, NaiveDate)>,
    ) -> StoreResult<Vec<MoodEntry>>;

    async fn insert(&self, entry: NewMoodEntry) -> StoreResult<MoodEntry>;

    async fn subscribe(&self, user_id: Uuid) -> StoreResult<MoodEntrySubscription>;

    async fn ping(&self) -> StoreResult<()>;
}

#[derive(Clone)]
pub struct PgMoodEntryStore {
    db: PgPool,
}

impl PgMoodEntryStore {
    pub fn new(db: PgPool) -> Self {
        Self { db }
    }
}

#[async_trait]
impl MoodEntryStore for PgMoodEntryStore {
    async fn entries_for_day(&self, user_id: Uuid, date: NaiveDate) -> StoreResult<Vec<MoodEntry>> {
        let entries = sqlx::query_as::<_, MoodEntry>(
            r#"
            SELECT * FROM mood_entries
            WHERE user_id = $1 AND entry_date = $2
            ORDER BY entry_time ASC
            "#,
        )
        .bind(user_id)
        .bind(date)
        .fetch_all(&self.db)
        .await?;

        Ok(entries)
    }

    async fn list_entries(
        &self,
        user_id: Uuid,
        range: Option<(NaiveDate, NaiveDate)>,
    ) -> StoreResult<Vec<MoodEntry>> {
        let entries = match range {
            Some((start, end)) => {
                sqlx::query_as::<_, MoodEntry>(
                    r#"
                    SELECT * FROM mood_entries
                    WHERE user_id = $1 AND entry_date BETWEEN $2 AND $3
                    ORDER BY entry_date ASC, entry_time ASC
                    "#,
                )
                .bind(user_id)
                .bind(start)
                .bind(end)
                .fetch_all(&self.db)
                .await?
            }
            None => {
                sqlx::query_as::<_, MoodEntry>(
                    r#"
                    SELECT * FROM mood_entries
                    WHERE user_id = $1
                    ORDER BY entry_date ASC, entry_time ASC
                    "#,
                )
                .bind(user_id)
                .fetch_all(&self.db)
                .await?
            }
        };

        Ok(entries)
    }

    async fn insert(&self, entry: NewMoodEntry) -> StoreResult<MoodEntry> {
        let row = sqlx::query_as::<_, MoodEntry>(
            r#"
            INSERT INTO mood_entries (
                id, user_id, user_role, entry_date, entry_time,
                mood_emoji, mood_label, scheduled_label, schedule_key, notes
            )
            VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9, $10)
            RETURNING *
            "#,
        )
        .bind(Uuid::new_v4())
        .bind(entry.user_id)
        .bind(entry.user_role)
        .bind(entry.entry_date)
        .bind(entry.entry_time)
        .bind(entry.mood.emoji())
        .bind(entry.mood.label())
        .bind(&entry.scheduled_label)
        .bind(&entry.schedule_key)
        .bind(&entry.notes)
        .fetch_one(&self.db)
        .await?;

        Ok(row)
    }

    async fn subscribe(&self, user_id: Uuid) -> StoreResult<MoodEntrySubscription> {
        let mut listener = PgListener::connect_with(&self.db).await?;
        listener.listen(CHANGE_CHANNEL).await?;

        let (tx, rx) = mpsc::channel(SUBSCRIPTION_BUFFER);
        let forwarder = tokio::spawn(async move {
            while !tx.is_closed() {
                let notification = match listener.recv().await {
                    Ok(n) => n,
                    Err(e) => {
                        tracing::warn!(user_id = %user_id, error = %e, "Mood entry listener error");
                        tokio::time::sleep(LISTENER_RETRY).await;
                        continue;
                    }
                };

                let change = match serde_json::from_str::<MoodEntryChange>(notification.payload()) {
                    Ok(change) => change,
                    Err(e) => {
                        tracing::warn!(error = %e, "Malformed mood entry notification");
                        continue;
                    }
                };

                if change.user_id == user_id && tx.send(change).await.is_err() {
                    break;
                }
            }
            tracing::debug!(user_id = %user_id, "Mood entry listener stopped");
        });

        Ok(MoodEntrySubscription::new(rx, forwarder))
    }

    async fn ping(&self) -> StoreResult<()> {
        sqlx::query_scalar::<_, i32>("SELECT 1")
            .fetch_one(&self.db)
            .await?;
        Ok(())
    }
}
