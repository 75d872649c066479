use std::collections::BTreeMap;
use chrono::{DateTime, Duration, NaiveDate, Utc};
use log::{debug, info};
use serde::{Deserialize, Serialize};
use tokio::sync::Mutex;
use crate::error::StoreError;
use crate::job::FileKind;
use crate::store::JsonStore;

const METRICS_KEY: &str = "metrics";
const DAY_FORMAT: &str = "%Y-%m-%d";

/// Counters for a single UTC day
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct DayBucket {
    pub files: u64,
    pub bytes: u64,
    pub converted: u64,
    pub compressed: u64,
}

impl DayBucket {
    fn add(&mut self, file: &ProcessedFile) {
        self.files += 1;
        self.bytes += file.size_bytes;
        if file.converted {
            self.converted += 1;
        } else {
            self.compressed += 1;
        }
    }

    fn merge(&mut self, other: &DayBucket) {
        self.files += other.files;
        self.bytes += other.bytes;
        self.converted += other.converted;
        self.compressed += other.compressed;
    }
}

/// Persisted processing counters
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct MetricsRecord {
    pub lifetime_files: u64,
    pub lifetime_bytes: u64,
    pub lifetime_converted: u64,
    pub lifetime_compressed: u64,
    /// Files processed per kind name
    pub lifetime_by_kind: BTreeMap<String, u64>,
    /// Keyed by UTC day, `YYYY-MM-DD`
    pub by_day: BTreeMap<String, DayBucket>,
}

/// One completed job as the metrics see it
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ProcessedFile {
    /// Size of the original input
    pub size_bytes: u64,
    pub kind: FileKind,
    pub converted: bool,
}

/// Lifetime and per-day counters backed by the JSON store.
///
/// The in-memory record is authoritative; every change is written through.
/// All mutations are serialized by one async mutex.
#[derive(Debug)]
pub struct MetricsStore {
    store: JsonStore,
    record: Mutex<MetricsRecord>,
}

impl MetricsStore {
    pub async fn open(store: JsonStore) -> Result<Self, StoreError> {
        let record: MetricsRecord = store.load(METRICS_KEY).await?;
        debug!(
            "Loaded metrics: {} files, {} day buckets",
            record.lifetime_files,
            record.by_day.len()
        );
        Ok(Self {
            store,
            record: Mutex::new(record),
        })
    }

    pub async fn record_file_processed(&self, file: ProcessedFile) -> Result<MetricsRecord, StoreError> {
        self.record_at(file, Utc::now()).await
    }

    /// Count `file` against the day of `now`. The in-memory counters are
    /// updated even when persisting fails.
    pub async fn record_at(&self, file: ProcessedFile, now: DateTime<Utc>) -> Result<MetricsRecord, StoreError> {
        let mut record = self.record.lock().await;
        record.lifetime_files += 1;
        record.lifetime_bytes += file.size_bytes;
        if file.converted {
            record.lifetime_converted += 1;
        } else {
            record.lifetime_compressed += 1;
        }
        *record.lifetime_by_kind.entry(file.kind.as_str().to_string()).or_insert(0) += 1;
        record.by_day.entry(day_key(&now)).or_default().add(&file);

        self.store.save(METRICS_KEY, &*record).await?;
        Ok(record.clone())
    }

    pub async fn snapshot(&self) -> MetricsRecord {
        self.record.lock().await.clone()
    }

    pub async fn prune_older_than(&self, days: u32) -> Result<usize, StoreError> {
        self.prune_at(days, Utc::now()).await
    }

    /// Drop day buckets older than `days` before `now`. Lifetime counters are
    /// untouched. Returns the number of buckets removed; nothing is written when
    /// there is nothing to remove.
    pub async fn prune_at(&self, days: u32, now: DateTime<Utc>) -> Result<usize, StoreError> {
        let cutoff = now.date_naive() - Duration::days(days as i64);
        let mut record = self.record.lock().await;
        let before = record.by_day.len();

        record.by_day.retain(|key, _| match parse_day(key) {
            Some(day) => day >= cutoff,
            None => false,
        });

        let removed = before - record.by_day.len();
        if removed > 0 {
            self.store.save(METRICS_KEY, &*record).await?;
            info!("Pruned {} metrics day bucket(s) before {}", removed, cutoff);
        }
        Ok(removed)
    }

    /// Totals over the last `days` days, today included
    pub async fn window_totals(&self, days: u32, now: DateTime<Utc>) -> DayBucket {
        let today = now.date_naive();
        let start = today - Duration::days(days.saturating_sub(1) as i64);
        let record = self.record.lock().await;

        let mut total = DayBucket::default();
        for (key, bucket) in &record.by_day {
            if let Some(day) = parse_day(key) {
                if day >= start && day <= today {
                    total.merge(bucket);
                }
            }
        }
        total
    }

    /// Zero the lifetime counters; day buckets are kept
    pub async fn reset_lifetime(&self) -> Result<MetricsRecord, StoreError> {
        let mut record = self.record.lock().await;
        record.lifetime_files = 0;
        record.lifetime_bytes = 0;
        record.lifetime_converted = 0;
        record.lifetime_compressed = 0;
        record.lifetime_by_kind.clear();
        self.store.save(METRICS_KEY, &*record).await?;
        info!("Lifetime metrics reset");
        Ok(record.clone())
    }
}

pub fn day_key(at: &DateTime<Utc>) -> String {
    at.format(DAY_FORMAT).to_string()
}

fn parse_day(key: &str) -> Option<NaiveDate> {
    NaiveDate::parse_from_str(key, DAY_FORMAT).ok()
}
