use std::path::{Path, PathBuf};
use std::sync::Arc;
use log::{debug, info, warn};
use crate::job::{savings_percent, unique_output_path, Candidate, FileKind};
use crate::preset::{EncodeParams, PdfParams, SpeedPreset, VideoParams};
use crate::selector::remove_with_retry;
use crate::tools::{EncodePass, Encoder, ImageTarget, Toolchain};

/// Where a job's outputs go and what they are called
#[derive(Debug, Clone)]
pub struct OutputPlan {
    pub dir: PathBuf,
    pub stem: String,
    /// Extension of the job's primary output
    pub extension: String,
    /// The caller asked for a specific format
    pub conversion: bool,
}

/// Everything one job needs to produce candidates
#[derive(Debug, Clone)]
pub struct EncodeJob<'a> {
    pub job_id: &'a str,
    pub input: &'a Path,
    pub original_size: u64,
    pub kind: FileKind,
    pub preset: SpeedPreset,
    pub params: &'a EncodeParams,
    pub plan: &'a OutputPlan,
}

/// Runs the encode strategies for a job and collects whatever they produce.
///
/// A failed strategy yields no candidate and never fails the job; partial
/// outputs of failed passes are removed immediately.
#[derive(Debug, Clone)]
pub struct CandidateEncoder {
    toolchain: Toolchain,
    /// Inputs above this size skip the structural PDF pass
    pdf_light_max_bytes: u64,
}

impl CandidateEncoder {
    pub fn new(toolchain: Toolchain, pdf_light_max_bytes: u64) -> Self {
        Self {
            toolchain,
            pdf_light_max_bytes,
        }
    }

    pub async fn produce_candidates(&self, job: &EncodeJob<'_>) -> Vec<Candidate> {
        let encoder = Arc::clone(self.toolchain.for_kind(job.kind));
        let candidates = match job.params {
            EncodeParams::Image(params) => {
                let mut out = Vec::new();
                for target in plan_image_targets(job.plan, job.preset) {
                    let pass = EncodePass::Image { target, params: params.clone() };
                    out.extend(self.run_pass(&encoder, job, &pass).await);
                }
                out
            }
            EncodeParams::Video(params) => self.video_candidates(&encoder, job, params).await,
            EncodeParams::Audio(params) => {
                let pass = EncodePass::Audio {
                    params: params.clone(),
                    container: job.plan.extension.clone(),
                };
                self.run_pass(&encoder, job, &pass).await.into_iter().collect()
            }
            EncodeParams::Pdf(params) => self.pdf_candidates(&encoder, job, params).await,
        };

        info!("Job {}: {} candidate(s) produced", job.job_id, candidates.len());
        candidates
    }

    async fn video_candidates(&self, encoder: &Arc<dyn Encoder>, job: &EncodeJob<'_>, params: &VideoParams) -> Vec<Candidate> {
        let first = EncodePass::Video {
            params: params.clone(),
            container: job.plan.extension.clone(),
        };
        let mut out: Vec<Candidate> = self.run_pass(encoder, job, &first).await.into_iter().collect();

        let needs_retry = match out.first() {
            None => true,
            Some(c) => !job.plan.conversion && c.size_bytes >= job.original_size,
        };
        if needs_retry {
            let retry_params = params.aggressive();
            info!(
                "Job {}: first video pass did not shrink, retrying with {} crf {}",
                job.job_id, retry_params.preset, retry_params.crf
            );
            let retry = EncodePass::Video {
                params: retry_params,
                container: job.plan.extension.clone(),
            };
            out.extend(self.run_pass(encoder, job, &retry).await);
        }
        out
    }

    async fn pdf_candidates(&self, encoder: &Arc<dyn Encoder>, job: &EncodeJob<'_>, params: &PdfParams) -> Vec<Candidate> {
        let mut out = Vec::new();

        if job.original_size <= self.pdf_light_max_bytes {
            out.extend(self.run_pass(encoder, job, &EncodePass::PdfLight).await);
        } else {
            debug!(
                "Job {}: {} bytes exceeds structural pass limit, skipping",
                job.job_id, job.original_size
            );
        }

        let heavy_passes = params.heavy.iter().chain(params.fallback.iter());
        for gs in heavy_passes {
            let best = best_savings(&out, job.original_size);
            if best >= params.heavy_threshold_percent {
                debug!(
                    "Job {}: {:.2}% saved meets {:.0}% threshold",
                    job.job_id, best, params.heavy_threshold_percent
                );
                break;
            }
            out.extend(self.run_pass(encoder, job, &EncodePass::PdfHeavy(gs.clone())).await);
        }
        out
    }

    /// Run one pass into a fresh output path. None when the pass produced nothing usable.
    async fn run_pass(&self, encoder: &Arc<dyn Encoder>, job: &EncodeJob<'_>, pass: &EncodePass) -> Option<Candidate> {
        let output = unique_output_path(&job.plan.dir, &job.plan.stem, &pass.output_extension());
        debug!("Job {}: running {} via {}", job.job_id, pass.label(), encoder.name());

        if let Err(e) = encoder.encode(job.input, &output, pass).await {
            warn!("Job {}: {} failed: {}", job.job_id, pass.label(), e);
            discard(job.job_id, &output).await;
            return None;
        }

        match tokio::fs::metadata(&output).await {
            Ok(meta) if meta.is_file() && meta.len() > 0 => {
                debug!("Job {}: {} -> {} bytes", job.job_id, pass.label(), meta.len());
                Some(Candidate {
                    path: output,
                    size_bytes: meta.len(),
                    format_tag: pass.format_tag(),
                })
            }
            Ok(_) => {
                warn!("Job {}: {} wrote an empty output", job.job_id, pass.label());
                discard(job.job_id, &output).await;
                None
            }
            Err(e) => {
                warn!("Job {}: {} output unreadable: {}", job.job_id, pass.label(), e);
                None
            }
        }
    }
}

/// Image formats to try, primary first
pub fn plan_image_targets(plan: &OutputPlan, preset: SpeedPreset) -> Vec<ImageTarget> {
    let primary = match ImageTarget::from_extension(&plan.extension) {
        Some(t) => t,
        None => return Vec::new(),
    };
    if plan.conversion {
        return vec![primary];
    }
    if preset.is_quality() {
        let mut targets = vec![primary];
        targets.extend(ImageTarget::ALL.iter().copied().filter(|t| *t != primary));
        return targets;
    }
    vec![primary, primary.alternate()]
}

fn best_savings(candidates: &[Candidate], original_size: u64) -> f64 {
    candidates
        .iter()
        .map(|c| savings_percent(original_size, c.size_bytes))
        .fold(0.0, f64::max)
}

async fn discard(job_id: &str, path: &Path) {
    if let Err(e) = remove_with_retry(path).await {
        warn!("Job {}: failed to remove partial output {}: {}", job_id, path.display(), e);
    }
}

#[cfg(test)]
pub(crate) mod tests {
    use super::*;
    use std::collections::HashMap;
    use std::sync::Mutex;
    use async_trait::async_trait;
    use crate::error::ToolError;
    use crate::preset::PresetResolver;

    /// Writes outputs of a scripted size per format tag; missing tags fail
    pub(crate) struct FakeEncoder {
        sizes: HashMap<String, Vec<usize>>,
        pub(crate) calls: Mutex<Vec<String>>,
    }

    impl FakeEncoder {
        pub(crate) fn new(sizes: &[(&str, &[usize])]) -> Self {
            Self {
                sizes: sizes.iter().map(|(k, v)| (k.to_string(), v.to_vec())).collect(),
                calls: Mutex::new(Vec::new()),
            }
        }

        pub(crate) fn calls(&self) -> Vec<String> {
            self.calls.lock().unwrap().clone()
        }
    }

    #[async_trait]
    impl Encoder for FakeEncoder {
        fn name(&self) -> &str {
            "fake"
        }

        async fn encode(&self, _input: &Path, output: &Path, pass: &EncodePass) -> Result<(), ToolError> {
            let tag = pass.format_tag();
            let attempt = {
                let mut calls = self.calls.lock().unwrap();
                let attempt = calls.iter().filter(|c| **c == tag).count();
                calls.push(tag.clone());
                attempt
            };
            let size = self
                .sizes
                .get(&tag)
                .and_then(|sizes| sizes.get(attempt).or(sizes.last()))
                .copied();
            match size {
                Some(size) => {
                    tokio::fs::write(output, vec![0u8; size]).await?;
                    Ok(())
                }
                None => {
                    // leave a partial file behind like a crashed tool would
                    tokio::fs::write(output, b"partial").await?;
                    Err(ToolError::Codec(format!("no scripted output for {}", tag)))
                }
            }
        }
    }

    fn plan(dir: &Path, ext: &str, conversion: bool) -> OutputPlan {
        OutputPlan {
            dir: dir.to_path_buf(),
            stem: "clip".to_string(),
            extension: ext.to_string(),
            conversion,
        }
    }

    async fn produce(
        fake: Arc<FakeEncoder>,
        dir: &Path,
        kind: FileKind,
        preset: SpeedPreset,
        ext: &str,
        original_size: u64,
        light_max: u64,
    ) -> Vec<Candidate> {
        let encoder = CandidateEncoder::new(Toolchain::uniform(fake), light_max);
        let params = PresetResolver::new("fast", 2).resolve(kind, preset);
        let plan = plan(dir, ext, false);
        let input = dir.join(format!("input.{}", ext));
        let job = EncodeJob {
            job_id: "t",
            input: &input,
            original_size,
            kind,
            preset,
            params: &params,
            plan: &plan,
        };
        encoder.produce_candidates(&job).await
    }

    fn dir_entries(dir: &Path) -> usize {
        std::fs::read_dir(dir).unwrap().count()
    }

    #[test]
    fn test_image_target_planning() {
        let p = plan(Path::new("/tmp"), "jpg", false);
        assert_eq!(plan_image_targets(&p, SpeedPreset::Fast), vec![ImageTarget::Jpeg, ImageTarget::Webp]);
        assert_eq!(plan_image_targets(&p, SpeedPreset::Quality).len(), 3);
        assert_eq!(plan_image_targets(&p, SpeedPreset::Quality)[0], ImageTarget::Jpeg);

        let webp = plan(Path::new("/tmp"), "webp", false);
        assert_eq!(plan_image_targets(&webp, SpeedPreset::Turbo), vec![ImageTarget::Webp, ImageTarget::Png]);

        let convert = plan(Path::new("/tmp"), "png", true);
        assert_eq!(plan_image_targets(&convert, SpeedPreset::Quality), vec![ImageTarget::Png]);
    }

    #[tokio::test]
    async fn test_image_primary_and_alternate() {
        let dir = tempfile::tempdir().unwrap();
        let fake = Arc::new(FakeEncoder::new(&[("jpeg", &[600]), ("webp", &[500])]));
        let out = produce(Arc::clone(&fake), dir.path(), FileKind::Image, SpeedPreset::Fast, "jpg", 1000, 0).await;

        assert_eq!(fake.calls(), vec!["jpeg", "webp"]);
        assert_eq!(out.len(), 2);
        assert!(out.iter().all(|c| c.path.exists()));
    }

    #[tokio::test]
    async fn test_failed_pass_leaves_nothing_behind() {
        let dir = tempfile::tempdir().unwrap();
        let fake = Arc::new(FakeEncoder::new(&[("jpeg", &[600])]));
        let out = produce(fake, dir.path(), FileKind::Image, SpeedPreset::Fast, "jpg", 1000, 0).await;

        assert_eq!(out.len(), 1);
        assert_eq!(dir_entries(dir.path()), 1);
    }

    #[tokio::test]
    async fn test_video_retries_when_not_smaller() {
        let dir = tempfile::tempdir().unwrap();
        let fake = Arc::new(FakeEncoder::new(&[("mp4", &[1200, 800])]));
        let out = produce(Arc::clone(&fake), dir.path(), FileKind::Video, SpeedPreset::Fast, "mp4", 1000, 0).await;

        assert_eq!(fake.calls().len(), 2);
        let sizes: Vec<u64> = out.iter().map(|c| c.size_bytes).collect();
        assert_eq!(sizes, vec![1200, 800]);
    }

    #[tokio::test]
    async fn test_video_single_pass_when_smaller() {
        let dir = tempfile::tempdir().unwrap();
        let fake = Arc::new(FakeEncoder::new(&[("mp4", &[700])]));
        let out = produce(Arc::clone(&fake), dir.path(), FileKind::Video, SpeedPreset::Balanced, "mp4", 1000, 0).await;
        assert_eq!(fake.calls().len(), 1);
        assert_eq!(out.len(), 1);
    }

    #[tokio::test]
    async fn test_pdf_light_pass_good_enough() {
        let dir = tempfile::tempdir().unwrap();
        let fake = Arc::new(FakeEncoder::new(&[("pdf", &[700]), ("pdf-gs", &[400])]));
        let out = produce(Arc::clone(&fake), dir.path(), FileKind::Pdf, SpeedPreset::Fast, "pdf", 1000, u64::MAX).await;

        // 30% from the light pass beats the 10% threshold
        assert_eq!(fake.calls(), vec!["pdf"]);
        assert_eq!(out.len(), 1);
    }

    #[tokio::test]
    async fn test_pdf_heavy_pass_when_light_misses() {
        let dir = tempfile::tempdir().unwrap();
        let fake = Arc::new(FakeEncoder::new(&[("pdf", &[950]), ("pdf-gs", &[400])]));
        let out = produce(Arc::clone(&fake), dir.path(), FileKind::Pdf, SpeedPreset::Balanced, "pdf", 1000, u64::MAX).await;

        assert_eq!(fake.calls(), vec!["pdf", "pdf-gs"]);
        assert_eq!(out.len(), 2);
    }

    #[tokio::test]
    async fn test_pdf_light_skipped_for_large_inputs() {
        let dir = tempfile::tempdir().unwrap();
        let fake = Arc::new(FakeEncoder::new(&[("pdf", &[700]), ("pdf-gs", &[400])]));
        produce(Arc::clone(&fake), dir.path(), FileKind::Pdf, SpeedPreset::Fast, "pdf", 1000, 500).await;
        assert_eq!(fake.calls(), vec!["pdf-gs"]);
    }

    #[tokio::test]
    async fn test_pdf_quality_fallback() {
        let dir = tempfile::tempdir().unwrap();
        let fake = Arc::new(FakeEncoder::new(&[("pdf", &[950]), ("pdf-gs", &[900, 600])]));
        let out = produce(Arc::clone(&fake), dir.path(), FileKind::Pdf, SpeedPreset::Quality, "pdf", 1000, u64::MAX).await;

        assert_eq!(fake.calls(), vec!["pdf", "pdf-gs", "pdf-gs"]);
        assert_eq!(out.len(), 3);
    }

    #[tokio::test]
    async fn test_pdf_turbo_never_runs_ghostscript() {
        let dir = tempfile::tempdir().unwrap();
        let fake = Arc::new(FakeEncoder::new(&[("pdf", &[990]), ("pdf-gs", &[100])]));
        produce(Arc::clone(&fake), dir.path(), FileKind::Pdf, SpeedPreset::Turbo, "pdf", 1000, u64::MAX).await;
        assert_eq!(fake.calls(), vec!["pdf"]);
    }
}
