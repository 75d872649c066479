use std::fmt;
use std::path::{Path, PathBuf};
use chrono::Utc;
use serde::{Deserialize, Serialize};
use uuid::Uuid;
use crate::memory::MemorySnapshot;
use crate::preset::SpeedPreset;

const IMAGE_EXTENSIONS: &[&str] = &["jpg", "jpeg", "png", "webp", "bmp", "tif", "tiff"];
const VIDEO_EXTENSIONS: &[&str] = &["mp4", "m4v", "mov", "mkv", "webm", "avi"];
const AUDIO_EXTENSIONS: &[&str] = &["mp3", "aac", "m4a", "ogg", "opus", "wav", "flac"];

const IMAGE_TARGETS: &[&str] = &["jpg", "jpeg", "png", "webp"];
const VIDEO_TARGETS: &[&str] = &["mp4", "webm", "mkv"];
const AUDIO_TARGETS: &[&str] = &["mp3", "aac", "m4a", "ogg", "opus"];

/// Broad media category of an upload
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum FileKind {
    Image,
    Video,
    Audio,
    Pdf,
}

impl FileKind {
    pub const ALL: [FileKind; 4] = [FileKind::Image, FileKind::Video, FileKind::Audio, FileKind::Pdf];

    pub fn as_str(&self) -> &'static str {
        match self {
            FileKind::Image => "image",
            FileKind::Video => "video",
            FileKind::Audio => "audio",
            FileKind::Pdf => "pdf",
        }
    }

    /// Parse a kind hint: a bare kind name or a MIME type ("image/png", "application/pdf")
    pub fn parse(hint: &str) -> Option<Self> {
        let hint = hint.trim().to_lowercase();
        let major = hint.split('/').next().unwrap_or("");
        match major {
            "image" => Some(FileKind::Image),
            "video" => Some(FileKind::Video),
            "audio" => Some(FileKind::Audio),
            "pdf" => Some(FileKind::Pdf),
            "application" if hint.ends_with("/pdf") => Some(FileKind::Pdf),
            _ => None,
        }
    }

    /// Infer the kind from a file extension (with or without the leading dot)
    pub fn from_extension(ext: &str) -> Option<Self> {
        let ext = normalize_extension(ext);
        if IMAGE_EXTENSIONS.contains(&ext.as_str()) {
            Some(FileKind::Image)
        } else if VIDEO_EXTENSIONS.contains(&ext.as_str()) {
            Some(FileKind::Video)
        } else if AUDIO_EXTENSIONS.contains(&ext.as_str()) {
            Some(FileKind::Audio)
        } else if ext == "pdf" {
            Some(FileKind::Pdf)
        } else {
            None
        }
    }

    /// Whether an input extension can be processed as this kind
    pub fn accepts_extension(&self, ext: &str) -> bool {
        Self::from_extension(ext) == Some(*self)
    }

    /// Extensions a `convert` job of this kind may target
    pub fn conversion_targets(&self) -> &'static [&'static str] {
        match self {
            FileKind::Image => IMAGE_TARGETS,
            FileKind::Video => VIDEO_TARGETS,
            FileKind::Audio => AUDIO_TARGETS,
            FileKind::Pdf => &[],
        }
    }

    /// Output extension of a `compress` job for the given source extension
    pub fn compress_extension(&self, source_ext: &str) -> String {
        let ext = normalize_extension(source_ext);
        match self {
            FileKind::Image => match ext.as_str() {
                "bmp" | "tif" | "tiff" => "png".to_string(),
                _ => ext,
            },
            FileKind::Video => match ext.as_str() {
                "avi" => "mp4".to_string(),
                _ => ext,
            },
            // lossless sources have no bitrate to target, so they land in mp3
            FileKind::Audio => match ext.as_str() {
                "wav" | "flac" => "mp3".to_string(),
                _ => ext,
            },
            FileKind::Pdf => "pdf".to_string(),
        }
    }
}

impl fmt::Display for FileKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

pub fn normalize_extension(ext: &str) -> String {
    ext.trim().trim_start_matches('.').to_lowercase()
}

/// What the caller wants done with the upload
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum JobMode {
    Compress,
    Convert { target_extension: String },
}

impl JobMode {
    pub fn is_conversion(&self) -> bool {
        matches!(self, JobMode::Convert { .. })
    }
}

/// One unit of work handed over by the HTTP layer
#[derive(Debug, Clone)]
pub struct JobRequest {
    pub id: String,
    pub input_path: PathBuf,
    pub kind: FileKind,
    pub original_extension: String,
    pub mode: JobMode,
    /// Explicit per-request preset parameter
    pub requested_preset: Option<String>,
    /// Preset carried in a request header
    pub preset_header: Option<String>,
    /// Size declared by the upload; the executor re-stats the file regardless
    pub size_bytes: u64,
    pub user_id: Option<String>,
    /// The input is an upload owned by the job and may be removed once a candidate wins
    pub input_owned: bool,
}

impl JobRequest {
    /// Build a request, inferring the kind from the hint or the extension
    pub fn new(input_path: impl Into<PathBuf>, kind_hint: Option<&str>, original_extension: &str) -> Option<Self> {
        let input_path = input_path.into();
        let kind = kind_hint
            .and_then(FileKind::parse)
            .or_else(|| FileKind::from_extension(original_extension))?;

        Some(Self {
            id: Uuid::new_v4().to_string(),
            input_path,
            kind,
            original_extension: normalize_extension(original_extension),
            mode: JobMode::Compress,
            requested_preset: None,
            preset_header: None,
            size_bytes: 0,
            user_id: None,
            input_owned: false,
        })
    }

    /// Request for a file the upload layer wrote into the working directory
    pub fn upload(input_path: impl Into<PathBuf>, kind_hint: Option<&str>, original_extension: &str, size_bytes: u64) -> Option<Self> {
        let mut request = Self::new(input_path, kind_hint, original_extension)?;
        request.size_bytes = size_bytes;
        request.input_owned = true;
        Some(request)
    }

    pub fn with_preset(mut self, preset: Option<&str>) -> Self {
        self.requested_preset = preset.map(str::to_string);
        self
    }

    pub fn with_preset_header(mut self, header: Option<&str>) -> Self {
        self.preset_header = header.map(str::to_string);
        self
    }

    pub fn with_mode(mut self, mode: JobMode) -> Self {
        self.mode = mode;
        self
    }

    pub fn with_user(mut self, user_id: impl Into<String>) -> Self {
        self.user_id = Some(user_id.into());
        self
    }

    /// Output extension this job produces
    pub fn output_extension(&self) -> String {
        match &self.mode {
            JobMode::Compress => self.kind.compress_extension(&self.original_extension),
            JobMode::Convert { target_extension } => normalize_extension(target_extension),
        }
    }
}

/// Lifecycle of a job inside the executor
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum JobState {
    Queued,
    Admitted,
    Encoding,
    Selecting,
    Cleaning,
    Recording,
    Completed,
    Failed,
}

impl fmt::Display for JobState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            JobState::Queued => "queued",
            JobState::Admitted => "admitted",
            JobState::Encoding => "encoding",
            JobState::Selecting => "selecting",
            JobState::Cleaning => "cleaning",
            JobState::Recording => "recording",
            JobState::Completed => "completed",
            JobState::Failed => "failed",
        };
        f.write_str(s)
    }
}

/// One encode output competing to become the deliverable
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Candidate {
    pub path: PathBuf,
    pub size_bytes: u64,
    pub format_tag: String,
}

/// Outcome of a completed job
#[derive(Debug, Clone, Serialize)]
pub struct JobResult {
    pub job_id: String,
    pub kind: FileKind,
    pub preset: SpeedPreset,
    pub original_size_bytes: u64,
    pub final_size_bytes: u64,
    pub savings_percent: f64,
    pub output_path: PathBuf,
    pub download_relative_path: String,
    pub format_tag: String,
    /// True when no candidate won and the input is delivered untouched
    pub delivered_original: bool,
    pub elapsed_ms: u64,
    pub memory_before: MemorySnapshot,
    pub memory_after: MemorySnapshot,
}

/// Payload returned to the HTTP layer
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct JobResponse {
    pub success: bool,
    pub original_size: u64,
    pub compressed_size: u64,
    pub savings_percent: String,
    pub download_relative_path: String,
}

impl JobResult {
    pub fn to_response(&self) -> JobResponse {
        JobResponse {
            success: true,
            original_size: self.original_size_bytes,
            compressed_size: self.final_size_bytes,
            savings_percent: format!("{:.2}", self.savings_percent),
            download_relative_path: self.download_relative_path.clone(),
        }
    }
}

/// Percentage saved going from `original` to `final_size`, rounded to 2 decimals.
/// Never negative; 0 when the original is empty.
pub fn savings_percent(original: u64, final_size: u64) -> f64 {
    if original == 0 || final_size >= original {
        return 0.0;
    }
    let pct = (original - final_size) as f64 / original as f64 * 100.0;
    (pct * 100.0).round() / 100.0
}

/// Collision-resistant output path: `<stem>-<unix_millis>-<random8>.<ext>`
pub fn unique_output_path(dir: &Path, stem: &str, ext: &str) -> PathBuf {
    let clean: String = stem
        .chars()
        .map(|c| if c.is_ascii_alphanumeric() || c == '-' || c == '_' { c } else { '_' })
        .take(48)
        .collect();
    let clean = if clean.is_empty() { "file".to_string() } else { clean };
    let suffix = Uuid::new_v4().simple().to_string();
    let name = format!(
        "{}-{}-{}.{}",
        clean,
        Utc::now().timestamp_millis(),
        &suffix[..8],
        normalize_extension(ext)
    );
    dir.join(name)
}

#[cfg(test)]
mod tests {
    use super::*;
    use proptest::prelude::*;
    use std::collections::HashSet;

    #[test]
    fn test_kind_parsing() {
        assert_eq!(FileKind::parse("image"), Some(FileKind::Image));
        assert_eq!(FileKind::parse("Video/MP4"), Some(FileKind::Video));
        assert_eq!(FileKind::parse("application/pdf"), Some(FileKind::Pdf));
        assert_eq!(FileKind::parse("application/zip"), None);
        assert_eq!(FileKind::from_extension(".JPG"), Some(FileKind::Image));
        assert_eq!(FileKind::from_extension("flac"), Some(FileKind::Audio));
        assert_eq!(FileKind::from_extension("docx"), None);
    }

    #[test]
    fn test_request_kind_inference() {
        let by_hint = JobRequest::new("/tmp/a.bin", Some("audio/mpeg"), "bin").unwrap();
        assert_eq!(by_hint.kind, FileKind::Audio);

        let by_ext = JobRequest::new("/tmp/a.pdf", None, ".PDF").unwrap();
        assert_eq!(by_ext.kind, FileKind::Pdf);
        assert_eq!(by_ext.original_extension, "pdf");
        assert!(!by_ext.input_owned);

        assert!(JobRequest::new("/tmp/a.xyz", None, "xyz").is_none());
    }

    #[test]
    fn test_output_extension() {
        let wav = JobRequest::new("/tmp/a.wav", None, "wav").unwrap();
        assert_eq!(wav.output_extension(), "mp3");

        let png = JobRequest::new("/tmp/a.png", None, "png")
            .unwrap()
            .with_mode(JobMode::Convert { target_extension: ".WEBP".to_string() });
        assert_eq!(png.output_extension(), "webp");
    }

    #[test]
    fn test_savings_percent_values() {
        assert_eq!(savings_percent(10_000_000, 6_000_000), 40.0);
        assert_eq!(savings_percent(1000, 1000), 0.0);
        assert_eq!(savings_percent(1000, 1500), 0.0);
        assert_eq!(savings_percent(0, 0), 0.0);
        assert_eq!(savings_percent(3, 1), 66.67);
    }

    #[test]
    fn test_response_formatting() {
        let result = JobResult {
            job_id: "j".to_string(),
            kind: FileKind::Image,
            preset: SpeedPreset::Fast,
            original_size_bytes: 1000,
            final_size_bytes: 600,
            savings_percent: savings_percent(1000, 600),
            output_path: PathBuf::from("/uploads/a.jpg"),
            download_relative_path: "a.jpg".to_string(),
            format_tag: "jpeg".to_string(),
            delivered_original: false,
            elapsed_ms: 5,
            memory_before: MemorySnapshot::default(),
            memory_after: MemorySnapshot::default(),
        };
        let response = result.to_response();
        assert_eq!(response.savings_percent, "40.00");

        let json = serde_json::to_value(&response).unwrap();
        assert_eq!(json["compressedSize"], 600);
        assert_eq!(json["downloadRelativePath"], "a.jpg");
    }

    #[test]
    fn test_unique_output_paths_do_not_collide() {
        let dir = Path::new("/uploads");
        let names: HashSet<_> = (0..500)
            .map(|_| unique_output_path(dir, "holiday photo", "jpg"))
            .collect();
        assert_eq!(names.len(), 500);

        let one = unique_output_path(dir, "../../etc/passwd", ".JPG");
        assert_eq!(one.parent(), Some(dir));
        assert_eq!(one.extension().and_then(|e| e.to_str()), Some("jpg"));
    }

    proptest! {
        /// Savings stays within [0, 100) and is zero whenever nothing shrank
        #[test]
        fn test_savings_bounds(original in 0u64..10_000_000_000, final_size in 0u64..10_000_000_000) {
            let pct = savings_percent(original, final_size);
            prop_assert!(pct >= 0.0);
            prop_assert!(pct <= 100.0);
            if final_size >= original {
                prop_assert_eq!(pct, 0.0);
            }
        }
    }
}
