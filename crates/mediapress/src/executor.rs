use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Instant;
use log::{debug, error, info, warn};
use serde_json::json;
use crate::activity::{ActivityEntry, ActivityRecorder, Severity};
use crate::candidates::{CandidateEncoder, EncodeJob, OutputPlan};
use crate::config::PressConfig;
use crate::error::{JobError, StoreError};
use crate::events::{EventSink, NoopSink, PressEvent};
use crate::job::{normalize_extension, savings_percent, Candidate, JobMode, JobRequest, JobResult, JobState};
use crate::limiter::ConcurrencyLimiter;
use crate::memory::MemorySnapshot;
use crate::metrics::{MetricsStore, ProcessedFile};
use crate::preset::PresetResolver;
use crate::selector::{cleanup, refresh_candidates, remove_with_retry, select_best, select_smallest, Selection};
use crate::store::JsonStore;
use crate::tools::Toolchain;

/// Runs jobs end to end: admit, resolve, encode, select, clean up, record.
///
/// Cheap to share behind an `Arc`; every job borrows the same limiter,
/// stores and event sink.
pub struct JobExecutor {
    config: PressConfig,
    limiter: Arc<ConcurrencyLimiter>,
    resolver: PresetResolver,
    encoder: CandidateEncoder,
    metrics: Arc<MetricsStore>,
    activity: Arc<ActivityRecorder>,
    events: Arc<dyn EventSink>,
}

impl JobExecutor {
    pub fn new(config: &PressConfig, toolchain: Toolchain, metrics: Arc<MetricsStore>, activity: Arc<ActivityRecorder>) -> Self {
        Self {
            config: config.clone(),
            limiter: Arc::new(ConcurrencyLimiter::new(config.max_concurrent)),
            resolver: PresetResolver::from_config(config),
            encoder: CandidateEncoder::new(toolchain, config.pdf_light_max_bytes),
            metrics,
            activity,
            events: Arc::new(NoopSink),
        }
    }

    /// Executor with native tools and stores under the configured data directory
    pub async fn open(config: &PressConfig, events: Arc<dyn EventSink>) -> Result<Self, StoreError> {
        let store = JsonStore::new(&config.data_dir);
        let metrics = Arc::new(MetricsStore::open(store.clone()).await?);
        let activity = Arc::new(ActivityRecorder::open(store).await?);
        Ok(Self::new(config, Toolchain::from_config(config), metrics, activity).with_events(events))
    }

    pub fn with_events(mut self, events: Arc<dyn EventSink>) -> Self {
        self.events = events;
        self
    }

    pub fn limiter(&self) -> &Arc<ConcurrencyLimiter> {
        &self.limiter
    }

    pub fn metrics(&self) -> &Arc<MetricsStore> {
        &self.metrics
    }

    pub fn activity(&self) -> &Arc<ActivityRecorder> {
        &self.activity
    }

    pub fn events(&self) -> &Arc<dyn EventSink> {
        &self.events
    }

    pub async fn execute(&self, request: JobRequest) -> Result<JobResult, JobError> {
        let started = Instant::now();
        let id = request.id.clone();
        info!(
            "Job {}: {} ({} .{} -> .{}) {}",
            id,
            JobState::Queued,
            request.kind,
            request.original_extension,
            request.output_extension(),
            request.input_path.display()
        );

        let original_size = match self.admit_check(&request).await {
            Ok(size) => size,
            Err(e) => {
                warn!("Job {}: rejected: {}", id, e);
                return Err(e);
            }
        };

        let outcome = self
            .limiter
            .run(|| self.run_admitted(&request, original_size, started))
            .await
            .map_err(|e| JobError::Processing(e.to_string()))
            .and_then(|r| r);

        match &outcome {
            Ok(result) => info!(
                "Job {}: {} in {} ms: {} -> {} bytes ({:.2}% saved, {})",
                id,
                JobState::Completed,
                result.elapsed_ms,
                result.original_size_bytes,
                result.final_size_bytes,
                result.savings_percent,
                if result.delivered_original { "original kept".to_string() } else { result.format_tag.clone() }
            ),
            Err(e) => error!("Job {}: {}: {}", id, JobState::Failed, e),
        }
        outcome
    }

    /// Everything that can reject a job before it takes a slot; returns the input size
    async fn admit_check(&self, request: &JobRequest) -> Result<u64, JobError> {
        if !request.kind.accepts_extension(&request.original_extension) {
            return Err(JobError::UnsupportedFormat(format!(
                ".{} cannot be processed as {}",
                request.original_extension, request.kind
            )));
        }
        if let JobMode::Convert { target_extension } = &request.mode {
            let target = normalize_extension(target_extension);
            if !request.kind.conversion_targets().contains(&target.as_str()) {
                return Err(JobError::UnsupportedFormat(format!(
                    "{} cannot be converted to .{}",
                    request.kind, target
                )));
            }
        }

        let meta = tokio::fs::metadata(&request.input_path)
            .await
            .map_err(|e| JobError::Processing(format!("cannot read input {}: {}", request.input_path.display(), e)))?;
        if !meta.is_file() {
            return Err(JobError::Processing(format!(
                "input {} is not a regular file",
                request.input_path.display()
            )));
        }

        let ceiling = self.config.max_bytes_for(request.kind);
        if meta.len() > ceiling {
            return Err(JobError::UnsupportedFormat(format!(
                "{} bytes exceeds the {} limit of {} bytes",
                meta.len(),
                request.kind,
                ceiling
            )));
        }
        Ok(meta.len())
    }

    async fn run_admitted(&self, request: &JobRequest, original_size: u64, started: Instant) -> Result<JobResult, JobError> {
        let id = request.id.as_str();
        transition(id, JobState::Admitted);
        let memory_before = MemorySnapshot::capture();

        let preset = self
            .resolver
            .effective(request.requested_preset.as_deref(), request.preset_header.as_deref());
        let params = self.resolver.resolve(request.kind, preset);
        let plan = OutputPlan {
            dir: self.config.uploads_dir.clone(),
            stem: output_stem(&request.input_path),
            extension: request.output_extension(),
            conversion: request.mode.is_conversion(),
        };

        transition(id, JobState::Encoding);
        info!("Job {}: preset {} for {} bytes of {}", id, preset, original_size, request.kind);
        let candidates = self
            .encoder
            .produce_candidates(&EncodeJob {
                job_id: id,
                input: &request.input_path,
                original_size,
                kind: request.kind,
                preset,
                params: &params,
                plan: &plan,
            })
            .await;

        transition(id, JobState::Selecting);
        let candidates = refresh_candidates(candidates).await;
        let Selection { chosen, losers } = choose(id, candidates, original_size, plan.conversion).await;

        if chosen.is_none() && plan.conversion {
            cleanup(id, &losers).await;
            return Err(JobError::Processing(format!(
                "no usable .{} output was produced",
                plan.extension
            )));
        }

        transition(id, JobState::Cleaning);
        let leftovers = cleanup(id, &losers).await;
        if leftovers > 0 {
            warn!("Job {}: {} candidate(s) could not be removed", id, leftovers);
        }

        let delivered_original = chosen.is_none();
        let (output_path, final_size, format_tag) = match chosen {
            Some(c) => {
                if request.input_owned {
                    if let Err(e) = remove_with_retry(&request.input_path).await {
                        warn!("Job {}: failed to remove original {}: {}", id, request.input_path.display(), e);
                    }
                }
                (c.path, c.size_bytes, c.format_tag)
            }
            None => {
                info!("Job {}: no candidate beat the original, delivering it unchanged", id);
                (request.input_path.clone(), original_size, request.original_extension.clone())
            }
        };

        transition(id, JobState::Recording);
        let savings = savings_percent(original_size, final_size);
        let download_relative_path = relative_download_path(&self.config.uploads_dir, &output_path);
        let converted = plan.conversion;

        let metrics = match self
            .metrics
            .record_file_processed(ProcessedFile {
                size_bytes: original_size,
                kind: request.kind,
                converted,
            })
            .await
        {
            Ok(snapshot) => snapshot,
            Err(e) => {
                warn!("Job {}: failed to persist metrics: {}", id, e);
                self.metrics.snapshot().await
            }
        };

        let source_name = request
            .input_path
            .file_name()
            .map(|n| n.to_string_lossy().to_string())
            .unwrap_or_else(|| id.to_string());
        let message = if converted {
            format!("Converted {} to .{} ({} -> {} bytes)", source_name, plan.extension, original_size, final_size)
        } else {
            format!("Compressed {} ({} -> {} bytes, {:.2}% saved)", source_name, original_size, final_size, savings)
        };
        let entry = ActivityEntry::new(if converted { "conversion" } else { "compression" }, message, Severity::Success)
            .with_user(request.user_id.clone())
            .with_meta(json!({
                "jobId": id,
                "kind": request.kind,
                "preset": preset,
                "originalSize": original_size,
                "finalSize": final_size,
                "savingsPercent": format!("{:.2}", savings),
                "format": format_tag,
                "deliveredOriginal": delivered_original,
            }));
        if let Err(e) = self.activity.append(entry.clone()).await {
            warn!("Job {}: failed to persist activity: {}", id, e);
        }

        self.events.emit(PressEvent::FilesUpdated {
            names: vec![download_relative_path.clone()],
        });
        self.events.emit(PressEvent::StatsMetricsUpdated { metrics });
        self.events.emit(PressEvent::Activity { entry });

        let memory_after = MemorySnapshot::capture();
        debug!(
            "Job {}: memory used {} -> {} bytes ({:+})",
            id,
            memory_before.used_bytes,
            memory_after.used_bytes,
            memory_after.delta_from(&memory_before)
        );

        Ok(JobResult {
            job_id: id.to_string(),
            kind: request.kind,
            preset,
            original_size_bytes: original_size,
            final_size_bytes: final_size,
            savings_percent: savings,
            output_path,
            download_relative_path,
            format_tag,
            delivered_original,
            elapsed_ms: started.elapsed().as_millis() as u64,
            memory_before,
            memory_after,
        })
    }
}

fn transition(id: &str, state: JobState) {
    info!("Job {}: {}", id, state);
}

/// The chosen output with its size as it is on disk now
/// Select a winner and re-stat it before committing. A winner that vanished
/// or grew past the original is dropped and the rest are selected again.
async fn choose(id: &str, mut candidates: Vec<Candidate>, original_size: u64, conversion: bool) -> Selection {
    let mut dropped = Vec::new();
    loop {
        let Selection { chosen, mut losers } = if conversion {
            select_smallest(candidates)
        } else {
            select_best(candidates, original_size)
        };
        let Some(c) = chosen else {
            losers.append(&mut dropped);
            return Selection { chosen: None, losers };
        };
        match confirm(&c).await {
            Some(confirmed) if conversion || confirmed.size_bytes < original_size => {
                losers.append(&mut dropped);
                return Selection { chosen: Some(confirmed), losers };
            }
            Some(grown) => {
                warn!("Job {}: chosen output {} is now {} bytes, reselecting", id, grown.path.display(), grown.size_bytes);
                dropped.push(grown);
            }
            None => warn!("Job {}: chosen output {} vanished, reselecting", id, c.path.display()),
        }
        candidates = losers;
    }
}

async fn confirm(candidate: &Candidate) -> Option<Candidate> {
    match tokio::fs::metadata(&candidate.path).await {
        Ok(meta) if meta.is_file() => Some(Candidate {
            size_bytes: meta.len(),
            ..candidate.clone()
        }),
        _ => None,
    }
}

fn output_stem(input: &Path) -> String {
    input
        .file_stem()
        .map(|s| s.to_string_lossy().to_string())
        .filter(|s| !s.is_empty())
        .unwrap_or_else(|| "file".to_string())
}

/// Path of `output` relative to the uploads directory, `/`-separated.
/// Files outside it are addressed by name.
fn relative_download_path(uploads_dir: &Path, output: &Path) -> String {
    let rel: PathBuf = match output.strip_prefix(uploads_dir) {
        Ok(rel) => rel.to_path_buf(),
        Err(_) => output.file_name().map(PathBuf::from).unwrap_or_default(),
    };
    rel.components()
        .map(|c| c.as_os_str().to_string_lossy().to_string())
        .collect::<Vec<_>>()
        .join("/")
}
