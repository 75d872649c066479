use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::{Duration as StdDuration, SystemTime};
use chrono::{DateTime, Duration, Local, TimeZone};
use log::{debug, info, warn};
use serde::{Deserialize, Serialize};
use walkdir::WalkDir;
use crate::activity::ActivityRecorder;
use crate::events::{EventSink, PressEvent};
use crate::metrics::MetricsStore;

const SECS_PER_DAY: u64 = 24 * 60 * 60;

/// How long uploads and history are kept
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct RetentionPolicy {
    pub auto_delete_days: u32,
}

impl Default for RetentionPolicy {
    fn default() -> Self {
        Self { auto_delete_days: 7 }
    }
}

/// Files removed by an uploads sweep
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct SweepReport {
    pub deleted_count: usize,
    pub deleted_names: Vec<String>,
}

/// Records removed by a data sweep
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct DataSweepReport {
    pub metrics_days_pruned: usize,
    pub activity_entries_pruned: usize,
}

/// Deletes aged uploads and prunes old history.
///
/// Every step is best-effort: a file or store that cannot be cleaned is logged
/// and skipped, and the rest of the sweep carries on.
pub struct RetentionSweeper {
    uploads_dir: PathBuf,
    policy: RetentionPolicy,
    metrics: Arc<MetricsStore>,
    activity: Arc<ActivityRecorder>,
    events: Arc<dyn EventSink>,
}

impl RetentionSweeper {
    pub fn new(
        uploads_dir: impl Into<PathBuf>,
        policy: RetentionPolicy,
        metrics: Arc<MetricsStore>,
        activity: Arc<ActivityRecorder>,
        events: Arc<dyn EventSink>,
    ) -> Self {
        Self {
            uploads_dir: uploads_dir.into(),
            policy,
            metrics,
            activity,
            events,
        }
    }

    pub fn policy(&self) -> RetentionPolicy {
        self.policy
    }

    pub async fn sweep_uploads(&self, max_age_days: u32) -> SweepReport {
        self.sweep_uploads_at(max_age_days, SystemTime::now()).await
    }

    /// Delete regular files directly under the uploads directory whose mtime
    /// is more than `max_age_days` before `now`
    pub async fn sweep_uploads_at(&self, max_age_days: u32, now: SystemTime) -> SweepReport {
        let max_age = StdDuration::from_secs(max_age_days as u64 * SECS_PER_DAY);
        let mut report = SweepReport::default();

        let dir = self.uploads_dir.clone();
        let expired = match tokio::task::spawn_blocking(move || expired_uploads(&dir, max_age, now)).await {
            Ok(expired) => expired,
            Err(e) => {
                warn!("Uploads scan failed: {}", e);
                return report;
            }
        };

        for (path, name) in expired {
            match tokio::fs::remove_file(&path).await {
                Ok(()) => {
                    debug!("Deleted expired upload {}", name);
                    report.deleted_names.push(name);
                }
                Err(e) => warn!("Failed to delete expired upload {}: {}", path.display(), e),
            }
        }

        report.deleted_count = report.deleted_names.len();
        if report.deleted_count > 0 {
            info!("Deleted {} upload(s) older than {} day(s)", report.deleted_count, max_age_days);
            self.events.emit(PressEvent::FilesUpdated {
                names: report.deleted_names.clone(),
            });
        }
        report
    }

    /// Prune metrics day buckets and activity entries older than `max_age_days`
    pub async fn sweep_data(&self, max_age_days: u32) -> DataSweepReport {
        let mut report = DataSweepReport::default();

        match self.metrics.prune_older_than(max_age_days).await {
            Ok(n) => report.metrics_days_pruned = n,
            Err(e) => warn!("Metrics prune failed: {}", e),
        }
        match self.activity.prune_older_than(max_age_days).await {
            Ok(n) => report.activity_entries_pruned = n,
            Err(e) => warn!("Activity prune failed: {}", e),
        }

        if report.metrics_days_pruned > 0 || report.activity_entries_pruned > 0 {
            self.events.emit(PressEvent::StatsMetricsUpdated {
                metrics: self.metrics.snapshot().await,
            });
        }
        report
    }

    /// One full pass under the configured policy
    pub async fn run_all(&self) -> (SweepReport, DataSweepReport) {
        let days = self.policy.auto_delete_days;
        info!("Retention sweep starting (auto_delete_days={})", days);
        let uploads = self.sweep_uploads(days).await;
        let data = self.sweep_data(days).await;
        info!(
            "Retention sweep done: {} upload(s), {} day bucket(s), {} activity entries removed",
            uploads.deleted_count, data.metrics_days_pruned, data.activity_entries_pruned
        );
        (uploads, data)
    }

    /// Sweep once now, then every day at `hour` local time. Never returns.
    pub async fn run_schedule(&self, hour: u32) {
        loop {
            self.run_all().await;

            let now = Local::now();
            let next = next_run_after(&now, hour);
            let wait = (next - now).to_std().unwrap_or(StdDuration::from_secs(SECS_PER_DAY));
            info!("Next retention sweep at {}", next);
            tokio::time::sleep(wait).await;
        }
    }
}

/// Top-level regular files in `dir` older than `max_age`, with their names.
/// Files with an mtime in the future are never expired.
fn expired_uploads(dir: &Path, max_age: StdDuration, now: SystemTime) -> Vec<(PathBuf, String)> {
    let mut expired = Vec::new();
    if !dir.exists() {
        debug!("Uploads directory {} does not exist, nothing to sweep", dir.display());
        return expired;
    }

    for entry in WalkDir::new(dir).min_depth(1).max_depth(1).follow_links(false) {
        let entry = match entry {
            Ok(e) => e,
            Err(e) => {
                warn!("Error reading upload entry: {}", e);
                continue;
            }
        };
        if !entry.file_type().is_file() {
            continue;
        }

        let modified = match entry.metadata().map_err(std::io::Error::from).and_then(|m| m.modified()) {
            Ok(t) => t,
            Err(e) => {
                warn!("Cannot read mtime of {}: {}", entry.path().display(), e);
                continue;
            }
        };
        match now.duration_since(modified) {
            Ok(age) if age > max_age => {
                let name = entry.file_name().to_string_lossy().to_string();
                expired.push((entry.into_path(), name));
            }
            _ => {}
        }
    }
    expired
}

/// First `hour:00` strictly after `now` in `now`'s time zone.
///
/// Hours above 23 are clamped. When the wall-clock time does not exist (a DST
/// gap) the run happens one day after `now` instead.
pub fn next_run_after<Tz: TimeZone>(now: &DateTime<Tz>, hour: u32) -> DateTime<Tz> {
    let hour = hour.min(23);
    let tz = now.timezone();
    let today = now.date_naive();

    for day in [today, today + Duration::days(1)] {
        let candidate = day
            .and_hms_opt(hour, 0, 0)
            .and_then(|naive| tz.from_local_datetime(&naive).earliest());
        if let Some(candidate) = candidate {
            if candidate > *now {
                return candidate;
            }
        }
    }
    now.clone() + Duration::days(1)
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::fs::File;
    use chrono::{Timelike, Utc};
    use crate::activity::{ActivityEntry, Severity};
    use crate::events::BroadcastSink;
    use crate::metrics::ProcessedFile;
    use crate::job::FileKind;
    use crate::store::JsonStore;

    async fn sweeper(root: &std::path::Path, events: Arc<dyn EventSink>) -> RetentionSweeper {
        let store = JsonStore::new(root.join("data"));
        let metrics = Arc::new(MetricsStore::open(store.clone()).await.unwrap());
        let activity = Arc::new(ActivityRecorder::open(store).await.unwrap());
        RetentionSweeper::new(root.join("uploads"), RetentionPolicy::default(), metrics, activity, events)
    }

    fn touch(path: &std::path::Path, age_days: u64, now: SystemTime) {
        let file = File::create(path).unwrap();
        file.set_modified(now - StdDuration::from_secs(age_days * SECS_PER_DAY)).unwrap();
    }

    #[tokio::test]
    async fn test_sweep_uploads_by_age() {
        let dir = tempfile::tempdir().unwrap();
        let uploads = dir.path().join("uploads");
        std::fs::create_dir_all(uploads.join("nested")).unwrap();

        let now = SystemTime::now();
        touch(&uploads.join("old.jpg"), 8, now);
        touch(&uploads.join("recent.jpg"), 6, now);
        touch(&uploads.join("nested").join("deep.jpg"), 30, now);

        let sink = Arc::new(BroadcastSink::new(8));
        let mut rx = sink.subscribe();
        let sweeper = sweeper(dir.path(), sink).await;

        let report = sweeper.sweep_uploads_at(7, now).await;
        assert_eq!(report.deleted_count, 1);
        assert_eq!(report.deleted_names, vec!["old.jpg".to_string()]);
        assert!(uploads.join("recent.jpg").exists());
        // only the top level is swept
        assert!(uploads.join("nested").join("deep.jpg").exists());
        assert_eq!(rx.recv().await.unwrap().name(), "files_updated");

        // second run finds nothing
        let again = sweeper.sweep_uploads_at(7, now).await;
        assert_eq!(again.deleted_count, 0);
    }

    #[tokio::test]
    async fn test_missing_uploads_dir_is_empty_sweep() {
        let dir = tempfile::tempdir().unwrap();
        let sweeper = sweeper(dir.path(), Arc::new(crate::events::NoopSink)).await;
        assert_eq!(sweeper.sweep_uploads(7).await, SweepReport::default());
    }

    #[tokio::test]
    async fn test_sweep_data_is_idempotent() {
        let dir = tempfile::tempdir().unwrap();
        let sweeper = sweeper(dir.path(), Arc::new(crate::events::NoopSink)).await;
        let long_ago = Utc::now() - Duration::days(30);
        sweeper
            .metrics
            .record_at(ProcessedFile { size_bytes: 10, kind: FileKind::Pdf, converted: false }, long_ago)
            .await
            .unwrap();
        sweeper
            .metrics
            .record_file_processed(ProcessedFile { size_bytes: 10, kind: FileKind::Pdf, converted: false })
            .await
            .unwrap();

        let first = sweeper.sweep_data(7).await;
        assert_eq!(first.metrics_days_pruned, 1);
        let second = sweeper.sweep_data(7).await;
        assert_eq!(second, DataSweepReport::default());
        assert_eq!(sweeper.metrics.snapshot().await.lifetime_files, 2);
    }

    #[tokio::test]
    async fn test_activity_only_prune_notifies() {
        let dir = tempfile::tempdir().unwrap();
        let sink = Arc::new(BroadcastSink::new(8));
        let mut rx = sink.subscribe();
        let sweeper = sweeper(dir.path(), sink).await;
        sweeper
            .activity
            .append(ActivityEntry::new("compression", "old", Severity::Info).at(Utc::now() - Duration::days(30)))
            .await
            .unwrap();

        let report = sweeper.sweep_data(sweeper.policy().auto_delete_days).await;
        assert_eq!(report.metrics_days_pruned, 0);
        assert_eq!(report.activity_entries_pruned, 1);
        assert!(sweeper.activity.is_empty().await);
        assert_eq!(rx.recv().await.unwrap().name(), "stats_metrics_updated");
    }

    #[test]
    fn test_next_run_same_day() {
        let now = Utc.with_ymd_and_hms(2024, 4, 10, 1, 30, 0).unwrap();
        let next = next_run_after(&now, 3);
        assert_eq!(next, Utc.with_ymd_and_hms(2024, 4, 10, 3, 0, 0).unwrap());
    }

    #[test]
    fn test_next_run_rolls_to_tomorrow() {
        let now = Utc.with_ymd_and_hms(2024, 4, 10, 3, 0, 0).unwrap();
        let next = next_run_after(&now, 3);
        assert_eq!(next, Utc.with_ymd_and_hms(2024, 4, 11, 3, 0, 0).unwrap());

        let late = Utc.with_ymd_and_hms(2024, 12, 31, 23, 59, 0).unwrap();
        assert_eq!(next_run_after(&late, 3), Utc.with_ymd_and_hms(2025, 1, 1, 3, 0, 0).unwrap());
    }

    #[test]
    fn test_next_run_clamps_hour() {
        let now = Utc.with_ymd_and_hms(2024, 4, 10, 1, 0, 0).unwrap();
        assert_eq!(next_run_after(&now, 99).hour(), 23);
    }
}
