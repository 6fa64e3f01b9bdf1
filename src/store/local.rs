//! Local key-value persistence for per-user, per-day schedules.
//!
//! Values are opaque strings (the schedule's JSON) and every write replaces
//! the whole record.

use async_trait::async_trait;
use chrono::NaiveDate;
use std::collections::HashMap;
use std::path::PathBuf;
use std::sync::Arc;
use tokio::sync::RwLock;
use uuid::Uuid;

use crate::error::StoreResult;

#[async_trait]
pub trait ScheduleStore: Send + Sync {
    async fn get(&self, key: &str) -> StoreResult<Option<String>>;

    async fn set(&self, key: &str, value: String) -> StoreResult<()>;
}

/// Storage key for the schedule of `user_id` on `date`.
pub fn schedule_key(user_id: Uuid, date: NaiveDate) -> String {
    format!("mood_schedule_{}_{}", user_id, date.format("%Y-%m-%d"))
}

/// Everything before the trailing `_{date}` of a [`schedule_key`].
fn key_owner(key: &str) -> &str {
    key.rsplit_once('_').map_or(key, |(owner, _)| owner)
}

/// Process-local store. Holds the most recently written day per user, so a
/// long-running service keeps one record per active user.
#[derive(Clone, Default)]
pub struct MemoryScheduleStore {
    entries: Arc<RwLock<HashMap<String, String>>>,
}

impl MemoryScheduleStore {
    pub fn new() -> Self {
        Self::default()
    }
}

#[async_trait]
impl ScheduleStore for MemoryScheduleStore {
    async fn get(&self, key: &str) -> StoreResult<Option<String>> {
        Ok(self.entries.read().await.get(key).cloned())
    }

    async fn set(&self, key: &str, value: String) -> StoreResult<()> {
        let owner = key_owner(key);
        let mut entries = self.entries.write().await;
        entries.retain(|existing, _| existing == key || key_owner(existing) != owner);
        entries.insert(key.to_string(), value);
        Ok(())
    }
}

/// One JSON file per key under `dir`.
#[derive(Debug, Clone)]
pub struct FileScheduleStore {
    dir: PathBuf,
}

impl FileScheduleStore {
    pub fn new(dir: impl Into<PathBuf>) -> Self {
        Self { dir: dir.into() }
    }

    fn path_for(&self, key: &str) -> PathBuf {
        let file_name: String = key
            .chars()
            .map(|c| if c.is_ascii_alphanumeric() || c == '_' || c == '-' { c } else { '_' })
            .collect();
        self.dir.join(format!("{file_name}.json"))
    }
}

#[async_trait]
impl ScheduleStore for FileScheduleStore {
    async fn get(&self, key: &str) -> StoreResult<Option<String>> {
        match tokio::fs::read_to_string(self.path_for(key)).await {
            Ok(contents) => Ok(Some(contents)),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(None),
            Err(e) => Err(e.into()),
        }
    }

    async fn set(&self, key: &str, value: String) -> StoreResult<()> {
        tokio::fs::create_dir_all(&self.dir).await?;

        // Write-then-rename so readers never observe a half-written record.
        let path = self.path_for(key);
        let tmp = path.with_extension("json.tmp");
        tokio::fs::write(&tmp, value).await?;
        tokio::fs::rename(&tmp, &path).await?;
        Ok(())
    }
}
