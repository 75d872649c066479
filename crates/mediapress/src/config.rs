use std::path::{Path, PathBuf};
use std::str::FromStr;
use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};
use crate::job::FileKind;
use crate::retention::RetentionPolicy;

/// Configuration for the media compression pipeline
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct PressConfig {
    /// Shared working directory for uploads and job outputs
    pub uploads_dir: PathBuf,
    /// Directory holding persisted metrics and activity objects
    pub data_dir: PathBuf,
    /// Maximum number of jobs allowed in the encoding stages at once
    pub max_concurrent: usize,
    /// Preset used when a request names none (turbo, fast, balanced, quality)
    pub default_preset: String,
    /// Age in days after which uploads and history are purged
    pub auto_delete_days: u32,
    /// Wall-clock hour (0-23) of the daily retention sweep
    pub sweep_hour: u32,
    /// Pixel count above which images are downscaled before encoding
    pub max_image_pixels: u64,
    /// Per-kind upload ceilings in bytes
    pub max_bytes_image: u64,
    pub max_bytes_video: u64,
    pub max_bytes_audio: u64,
    pub max_bytes_pdf: u64,
    /// PDFs above this size skip the lightweight structural resave
    pub pdf_light_max_bytes: u64,
    /// Thread cap handed to ffmpeg, independent of preset and job concurrency
    pub ffmpeg_threads: u32,
    /// Kill an external tool after this many seconds (None = wait forever)
    pub tool_timeout_secs: Option<u64>,
    pub ffmpeg_bin: PathBuf,
    pub qpdf_bin: PathBuf,
    pub ghostscript_bin: PathBuf,
}

impl Default for PressConfig {
    fn default() -> Self {
        Self::default_config()
    }
}

impl PressConfig {
    /// Create a default configuration with sensible values
    pub fn default_config() -> Self {
        Self {
            uploads_dir: PathBuf::from("/var/lib/mediapress/uploads"),
            data_dir: PathBuf::from("/var/lib/mediapress/data"),
            max_concurrent: 2,
            default_preset: "fast".to_string(),
            auto_delete_days: 7,
            sweep_hour: 3,
            max_image_pixels: 40_000_000,
            max_bytes_image: 50 * 1024 * 1024,       // 50MB
            max_bytes_video: 2 * 1024 * 1024 * 1024, // 2GB
            max_bytes_audio: 200 * 1024 * 1024,      // 200MB
            max_bytes_pdf: 200 * 1024 * 1024,        // 200MB
            pdf_light_max_bytes: 100 * 1024 * 1024,  // 100MB
            ffmpeg_threads: 2,
            tool_timeout_secs: Some(1800),
            ffmpeg_bin: PathBuf::from("ffmpeg"),
            qpdf_bin: PathBuf::from("qpdf"),
            ghostscript_bin: PathBuf::from("gs"),
        }
    }

    /// Load configuration from a file, or return defaults if path is None or file doesn't exist
    pub fn load_config(path: Option<&Path>) -> Result<Self> {
        let mut config = Self::default_config();

        if let Some(config_path) = path {
            if config_path.exists() {
                let content = std::fs::read_to_string(config_path)
                    .with_context(|| format!("Failed to read config file: {}", config_path.display()))?;

                // TOML by extension, JSON otherwise
                if config_path.extension().and_then(|s| s.to_str()) == Some("toml") {
                    config = toml::from_str(&content)
                        .with_context(|| format!("Failed to parse TOML config: {}", config_path.display()))?;
                } else {
                    config = serde_json::from_str(&content)
                        .with_context(|| format!("Failed to parse JSON config: {}", config_path.display()))?;
                }
            }
        }

        // 0 disables the timeout
        if config.tool_timeout_secs == Some(0) {
            config.tool_timeout_secs = None;
        }

        Ok(config)
    }

    /// Apply `MEDIAPRESS_*` environment overrides on top of the loaded values
    pub fn apply_env(mut self) -> Result<Self> {
        self.apply_vars(|name| std::env::var(name).ok())?;
        Ok(self)
    }

    fn apply_vars<F>(&mut self, get: F) -> Result<()>
    where
        F: Fn(&str) -> Option<String>,
    {
        if let Some(v) = get("MEDIAPRESS_UPLOADS_DIR") {
            self.uploads_dir = PathBuf::from(v);
        }
        if let Some(v) = get("MEDIAPRESS_DATA_DIR") {
            self.data_dir = PathBuf::from(v);
        }
        if let Some(v) = get("MEDIAPRESS_DEFAULT_PRESET") {
            self.default_preset = v;
        }
        if let Some(v) = get("MEDIAPRESS_FFMPEG_BIN") {
            self.ffmpeg_bin = PathBuf::from(v);
        }
        if let Some(v) = get("MEDIAPRESS_QPDF_BIN") {
            self.qpdf_bin = PathBuf::from(v);
        }
        if let Some(v) = get("MEDIAPRESS_GHOSTSCRIPT_BIN") {
            self.ghostscript_bin = PathBuf::from(v);
        }
        parse_var(&get, "MEDIAPRESS_MAX_CONCURRENT", &mut self.max_concurrent)?;
        parse_var(&get, "MEDIAPRESS_AUTO_DELETE_DAYS", &mut self.auto_delete_days)?;
        parse_var(&get, "MEDIAPRESS_SWEEP_HOUR", &mut self.sweep_hour)?;
        parse_var(&get, "MEDIAPRESS_MAX_IMAGE_PIXELS", &mut self.max_image_pixels)?;
        parse_var(&get, "MEDIAPRESS_MAX_BYTES_IMAGE", &mut self.max_bytes_image)?;
        parse_var(&get, "MEDIAPRESS_MAX_BYTES_VIDEO", &mut self.max_bytes_video)?;
        parse_var(&get, "MEDIAPRESS_MAX_BYTES_AUDIO", &mut self.max_bytes_audio)?;
        parse_var(&get, "MEDIAPRESS_MAX_BYTES_PDF", &mut self.max_bytes_pdf)?;
        parse_var(&get, "MEDIAPRESS_PDF_LIGHT_MAX_BYTES", &mut self.pdf_light_max_bytes)?;
        parse_var(&get, "MEDIAPRESS_FFMPEG_THREADS", &mut self.ffmpeg_threads)?;

        if let Some(v) = get("MEDIAPRESS_TOOL_TIMEOUT_SECS") {
            let secs: u64 = v
                .trim()
                .parse()
                .with_context(|| format!("Invalid MEDIAPRESS_TOOL_TIMEOUT_SECS: {}", v))?;
            // 0 disables the timeout
            self.tool_timeout_secs = if secs == 0 { None } else { Some(secs) };
        }

        Ok(())
    }

    /// Upload ceiling for a file kind
    pub fn max_bytes_for(&self, kind: FileKind) -> u64 {
        match kind {
            FileKind::Image => self.max_bytes_image,
            FileKind::Video => self.max_bytes_video,
            FileKind::Audio => self.max_bytes_audio,
            FileKind::Pdf => self.max_bytes_pdf,
        }
    }

    pub fn retention_policy(&self) -> RetentionPolicy {
        RetentionPolicy {
            auto_delete_days: self.auto_delete_days,
        }
    }
}

fn parse_var<F, T>(get: &F, name: &str, slot: &mut T) -> Result<()>
where
    F: Fn(&str) -> Option<String>,
    T: FromStr,
    T::Err: std::error::Error + Send + Sync + 'static,
{
    if let Some(raw) = get(name) {
        *slot = raw
            .trim()
            .parse()
            .with_context(|| format!("Invalid value for {}: {}", name, raw))?;
    }
    Ok(())
}
