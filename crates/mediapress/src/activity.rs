use chrono::{DateTime, Duration, Utc};
use log::{debug, info};
use serde::{Deserialize, Serialize};
use tokio::sync::Mutex;
use uuid::Uuid;
use crate::error::StoreError;
use crate::store::JsonStore;

const ACTIVITY_KEY: &str = "activity";

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Severity {
    Info,
    Success,
    Warning,
    Error,
}

/// One structured event in the activity log
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ActivityEntry {
    pub id: String,
    #[serde(rename = "type")]
    pub kind: String,
    pub message: String,
    pub timestamp: DateTime<Utc>,
    pub severity: Severity,
    #[serde(default)]
    pub user_id: Option<String>,
    #[serde(default)]
    pub meta: serde_json::Value,
}

impl ActivityEntry {
    pub fn new(kind: impl Into<String>, message: impl Into<String>, severity: Severity) -> Self {
        Self {
            id: Uuid::new_v4().to_string(),
            kind: kind.into(),
            message: message.into(),
            timestamp: Utc::now(),
            severity,
            user_id: None,
            meta: serde_json::Value::Null,
        }
    }

    pub fn with_user(mut self, user_id: Option<String>) -> Self {
        self.user_id = user_id;
        self
    }

    pub fn with_meta(mut self, meta: serde_json::Value) -> Self {
        self.meta = meta;
        self
    }

    pub fn at(mut self, timestamp: DateTime<Utc>) -> Self {
        self.timestamp = timestamp;
        self
    }
}

/// Append-only activity log, bounded by age-based pruning
#[derive(Debug)]
pub struct ActivityRecorder {
    store: JsonStore,
    entries: Mutex<Vec<ActivityEntry>>,
}

impl ActivityRecorder {
    pub async fn open(store: JsonStore) -> Result<Self, StoreError> {
        let entries: Vec<ActivityEntry> = store.load(ACTIVITY_KEY).await?;
        debug!("Loaded {} activity entries", entries.len());
        Ok(Self {
            store,
            entries: Mutex::new(entries),
        })
    }

    pub async fn append(&self, entry: ActivityEntry) -> Result<(), StoreError> {
        let mut entries = self.entries.lock().await;
        entries.push(entry);
        self.store.save(ACTIVITY_KEY, &*entries).await
    }

    /// Newest first
    pub async fn recent(&self, limit: usize) -> Vec<ActivityEntry> {
        let mut entries = self.entries.lock().await.clone();
        entries.sort_by(|a, b| b.timestamp.cmp(&a.timestamp));
        entries.truncate(limit);
        entries
    }

    pub async fn len(&self) -> usize {
        self.entries.lock().await.len()
    }

    pub async fn is_empty(&self) -> bool {
        self.entries.lock().await.is_empty()
    }

    pub async fn prune_older_than(&self, days: u32) -> Result<usize, StoreError> {
        self.prune_at(days, Utc::now()).await
    }

    /// Drop entries older than `days` before `now`; nothing is written when
    /// nothing is removed
    pub async fn prune_at(&self, days: u32, now: DateTime<Utc>) -> Result<usize, StoreError> {
        let cutoff = now - Duration::days(days as i64);
        let mut entries = self.entries.lock().await;
        let before = entries.len();
        entries.retain(|e| e.timestamp >= cutoff);

        let removed = before - entries.len();
        if removed > 0 {
            self.store.save(ACTIVITY_KEY, &*entries).await?;
            info!("Pruned {} activity entries older than {}", removed, cutoff);
        }
        Ok(removed)
    }
}
