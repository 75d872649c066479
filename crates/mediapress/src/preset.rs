use std::fmt;
use log::debug;
use serde::{Deserialize, Serialize};
use crate::config::PressConfig;
use crate::job::FileKind;

/// x264 presets from fastest to slowest
const X264_PRESETS: &[&str] = &["ultrafast", "superfast", "veryfast", "faster", "fast", "medium", "slow", "slower"];

/// Highest CRF x264 accepts
const MAX_CRF: u8 = 51;

/// A named point on the speed/quality curve
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum SpeedPreset {
    Turbo,
    Fast,
    Balanced,
    Quality,
}

impl SpeedPreset {
    pub const ALL: [SpeedPreset; 4] = [SpeedPreset::Turbo, SpeedPreset::Fast, SpeedPreset::Balanced, SpeedPreset::Quality];

    /// Parse a preset name; "ultrafast" is an alias for turbo
    pub fn parse(s: &str) -> Option<Self> {
        match s.trim().to_lowercase().as_str() {
            "turbo" | "ultrafast" => Some(SpeedPreset::Turbo),
            "fast" => Some(SpeedPreset::Fast),
            "balanced" => Some(SpeedPreset::Balanced),
            "quality" => Some(SpeedPreset::Quality),
            _ => None,
        }
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            SpeedPreset::Turbo => "turbo",
            SpeedPreset::Fast => "fast",
            SpeedPreset::Balanced => "balanced",
            SpeedPreset::Quality => "quality",
        }
    }

    /// Whether the multi-strategy path runs
    pub fn is_quality(&self) -> bool {
        matches!(self, SpeedPreset::Quality)
    }
}

impl fmt::Display for SpeedPreset {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// PNG deflate effort
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum PngCompression {
    Fast,
    Default,
    Best,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ImageParams {
    /// 1-100, higher keeps more detail
    pub jpeg_quality: u8,
    pub png_compression: PngCompression,
    /// Per-row adaptive PNG filtering (slower, usually smaller)
    pub adaptive_filter: bool,
    /// Lossy WebP quality, 1-100
    pub webp_quality: u8,
    /// libwebp method, 0 (fastest) to 6 (smallest)
    pub webp_effort: u8,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct VideoParams {
    /// x264 preset name
    pub preset: String,
    /// Constant rate factor; lower = higher quality, larger file
    pub crf: u8,
    /// Fixed global cap, independent of preset
    pub threads: u32,
}

impl VideoParams {
    /// Retry parameters: one preset step faster and CRF +4
    pub fn aggressive(&self) -> VideoParams {
        let idx = X264_PRESETS
            .iter()
            .position(|p| *p == self.preset)
            .unwrap_or(0);
        VideoParams {
            preset: X264_PRESETS[idx.saturating_sub(1)].to_string(),
            crf: self.crf.saturating_add(4).min(MAX_CRF),
            threads: self.threads,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct AudioParams {
    pub bitrate_kbps: u32,
}

impl AudioParams {
    /// ffmpeg-style bitrate string, e.g. "128k"
    pub fn bitrate(&self) -> String {
        format!("{}k", self.bitrate_kbps)
    }
}

/// One Ghostscript recompression attempt
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct GhostscriptPass {
    /// -dPDFSETTINGS profile
    pub profile: String,
    /// Target resolution for downsampled colour and grey images
    pub image_dpi: u32,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PdfParams {
    /// Savings (percent) below which the heavy pass is attempted
    pub heavy_threshold_percent: f64,
    /// None skips the heavy pass entirely
    pub heavy: Option<GhostscriptPass>,
    /// Still more aggressive attempt when `heavy` misses the threshold
    pub fallback: Option<GhostscriptPass>,
}

/// Concrete encoder parameters for one job
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "lowercase")]
pub enum EncodeParams {
    Image(ImageParams),
    Video(VideoParams),
    Audio(AudioParams),
    Pdf(PdfParams),
}

/// Maps a requested preset to per-kind encoder parameters.
///
/// Pure: the same inputs always give the same parameters.
#[derive(Debug, Clone)]
pub struct PresetResolver {
    default_preset: SpeedPreset,
    ffmpeg_threads: u32,
}

impl PresetResolver {
    /// An unrecognised default falls back to `fast`
    pub fn new(default_preset: &str, ffmpeg_threads: u32) -> Self {
        Self {
            default_preset: SpeedPreset::parse(default_preset).unwrap_or(SpeedPreset::Fast),
            ffmpeg_threads: ffmpeg_threads.max(1),
        }
    }

    pub fn from_config(cfg: &PressConfig) -> Self {
        Self::new(&cfg.default_preset, cfg.ffmpeg_threads)
    }

    pub fn default_preset(&self) -> SpeedPreset {
        self.default_preset
    }

    /// Effective preset for one request: parameter, then header, then server default.
    /// Values that do not parse are skipped.
    pub fn effective(&self, param: Option<&str>, header: Option<&str>) -> SpeedPreset {
        param
            .and_then(SpeedPreset::parse)
            .or_else(|| header.and_then(SpeedPreset::parse))
            .unwrap_or(self.default_preset)
    }

    pub fn resolve(&self, kind: FileKind, preset: SpeedPreset) -> EncodeParams {
        let params = match kind {
            FileKind::Image => EncodeParams::Image(image_params(preset)),
            FileKind::Video => EncodeParams::Video(self.video_params(preset)),
            FileKind::Audio => EncodeParams::Audio(audio_params(preset)),
            FileKind::Pdf => EncodeParams::Pdf(pdf_params(preset)),
        };
        debug!("Resolved {} preset {} -> {:?}", kind, preset, params);
        params
    }

    fn video_params(&self, preset: SpeedPreset) -> VideoParams {
        let (name, crf) = match preset {
            SpeedPreset::Turbo => ("ultrafast", 30),
            SpeedPreset::Fast => ("veryfast", 28),
            SpeedPreset::Balanced => ("medium", 25),
            SpeedPreset::Quality => ("slow", 22),
        };
        VideoParams {
            preset: name.to_string(),
            crf,
            threads: self.ffmpeg_threads,
        }
    }
}

fn image_params(preset: SpeedPreset) -> ImageParams {
    match preset {
        SpeedPreset::Turbo => ImageParams {
            jpeg_quality: 70,
            png_compression: PngCompression::Fast,
            adaptive_filter: false,
            webp_quality: 70,
            webp_effort: 1,
        },
        SpeedPreset::Fast => ImageParams {
            jpeg_quality: 75,
            png_compression: PngCompression::Fast,
            adaptive_filter: true,
            webp_quality: 75,
            webp_effort: 2,
        },
        SpeedPreset::Balanced => ImageParams {
            jpeg_quality: 80,
            png_compression: PngCompression::Default,
            adaptive_filter: true,
            webp_quality: 80,
            webp_effort: 4,
        },
        SpeedPreset::Quality => ImageParams {
            jpeg_quality: 85,
            png_compression: PngCompression::Best,
            adaptive_filter: true,
            webp_quality: 85,
            webp_effort: 6,
        },
    }
}

fn audio_params(preset: SpeedPreset) -> AudioParams {
    let bitrate_kbps = match preset {
        SpeedPreset::Turbo => 96,
        SpeedPreset::Fast => 128,
        SpeedPreset::Balanced => 160,
        SpeedPreset::Quality => 192,
    };
    AudioParams { bitrate_kbps }
}

fn pdf_params(preset: SpeedPreset) -> PdfParams {
    let gs = |profile: &str, image_dpi: u32| GhostscriptPass {
        profile: profile.to_string(),
        image_dpi,
    };
    match preset {
        // turbo never runs Ghostscript
        SpeedPreset::Turbo => PdfParams {
            heavy_threshold_percent: 0.0,
            heavy: None,
            fallback: None,
        },
        SpeedPreset::Fast => PdfParams {
            heavy_threshold_percent: 10.0,
            heavy: Some(gs("/ebook", 120)),
            fallback: None,
        },
        SpeedPreset::Balanced => PdfParams {
            heavy_threshold_percent: 15.0,
            heavy: Some(gs("/ebook", 150)),
            fallback: None,
        },
        SpeedPreset::Quality => PdfParams {
            heavy_threshold_percent: 20.0,
            heavy: Some(gs("/printer", 200)),
            fallback: Some(gs("/ebook", 150)),
        },
    }
}
