//! External codec invocations.
//!
//! Every native dependency sits behind [`Encoder`], one implementation per
//! concern, so the selection, cleanup and metrics logic can be driven with
//! fakes in tests.

pub mod ffmpeg;
pub mod pdf;
pub mod process;
pub mod raster;

use std::path::Path;
use std::sync::Arc;
use async_trait::async_trait;
use crate::config::PressConfig;
use crate::error::ToolError;
use crate::job::{normalize_extension, FileKind};
use crate::preset::{AudioParams, GhostscriptPass, ImageParams, VideoParams};

pub use ffmpeg::FfmpegEncoder;
pub use pdf::PdfEncoder;
pub use raster::RasterEncoder;

/// Raster formats the image codec can write
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ImageTarget {
    Jpeg,
    Png,
    Webp,
}

impl ImageTarget {
    pub const ALL: [ImageTarget; 3] = [ImageTarget::Jpeg, ImageTarget::Png, ImageTarget::Webp];

    pub fn from_extension(ext: &str) -> Option<Self> {
        match normalize_extension(ext).as_str() {
            "jpg" | "jpeg" => Some(ImageTarget::Jpeg),
            "png" => Some(ImageTarget::Png),
            "webp" => Some(ImageTarget::Webp),
            _ => None,
        }
    }

    pub fn extension(&self) -> &'static str {
        match self {
            ImageTarget::Jpeg => "jpg",
            ImageTarget::Png => "png",
            ImageTarget::Webp => "webp",
        }
    }

    pub fn tag(&self) -> &'static str {
        match self {
            ImageTarget::Jpeg => "jpeg",
            ImageTarget::Png => "png",
            ImageTarget::Webp => "webp",
        }
    }

    /// Format tried by the auxiliary pass of a fast compress job
    pub fn alternate(&self) -> ImageTarget {
        match self {
            ImageTarget::Jpeg => ImageTarget::Webp,
            ImageTarget::Png => ImageTarget::Webp,
            ImageTarget::Webp => ImageTarget::Png,
        }
    }
}

/// One concrete encode attempt
#[derive(Debug, Clone, PartialEq)]
pub enum EncodePass {
    Image { target: ImageTarget, params: ImageParams },
    Video { params: VideoParams, container: String },
    Audio { params: AudioParams, container: String },
    /// Structural resave: object streams + recompressed flate streams
    PdfLight,
    /// Ghostscript re-render with image downsampling
    PdfHeavy(GhostscriptPass),
}

impl EncodePass {
    /// Extension of the file this pass writes
    pub fn output_extension(&self) -> String {
        match self {
            EncodePass::Image { target, .. } => target.extension().to_string(),
            EncodePass::Video { container, .. } | EncodePass::Audio { container, .. } => normalize_extension(container),
            EncodePass::PdfLight | EncodePass::PdfHeavy(_) => "pdf".to_string(),
        }
    }

    /// Short tag recorded on the candidate
    pub fn format_tag(&self) -> String {
        match self {
            EncodePass::Image { target, .. } => target.tag().to_string(),
            EncodePass::Video { container, .. } | EncodePass::Audio { container, .. } => normalize_extension(container),
            EncodePass::PdfLight => "pdf".to_string(),
            EncodePass::PdfHeavy(_) => "pdf-gs".to_string(),
        }
    }

    /// Human-readable description for logs
    pub fn label(&self) -> String {
        match self {
            EncodePass::Image { target, params } => format!("image->{} (q{})", target.tag(), params.jpeg_quality),
            EncodePass::Video { params, container } => {
                format!("video->{} ({} crf {})", container, params.preset, params.crf)
            }
            EncodePass::Audio { params, container } => format!("audio->{} ({})", container, params.bitrate()),
            EncodePass::PdfLight => "pdf structural resave".to_string(),
            EncodePass::PdfHeavy(gs) => format!("pdf ghostscript {} @{}dpi", gs.profile, gs.image_dpi),
        }
    }
}

/// Capability to turn an input file into an output file for a given pass
#[async_trait]
pub trait Encoder: Send + Sync {
    fn name(&self) -> &str;

    /// Write `output` from `input`. On error the output may be partial or absent.
    async fn encode(&self, input: &Path, output: &Path, pass: &EncodePass) -> Result<(), ToolError>;
}

/// The encoder used for each file kind
#[derive(Clone)]
pub struct Toolchain {
    pub image: Arc<dyn Encoder>,
    pub video: Arc<dyn Encoder>,
    pub audio: Arc<dyn Encoder>,
    pub pdf: Arc<dyn Encoder>,
}

impl Toolchain {
    /// Native tools as configured: the image crate, ffmpeg, qpdf + Ghostscript
    pub fn from_config(cfg: &PressConfig) -> Self {
        let ffmpeg: Arc<dyn Encoder> = Arc::new(FfmpegEncoder::new(cfg.ffmpeg_bin.clone(), cfg.tool_timeout_secs));
        Self {
            image: Arc::new(RasterEncoder::new(cfg.max_image_pixels)),
            video: Arc::clone(&ffmpeg),
            audio: ffmpeg,
            pdf: Arc::new(PdfEncoder::new(
                cfg.qpdf_bin.clone(),
                cfg.ghostscript_bin.clone(),
                cfg.tool_timeout_secs,
            )),
        }
    }

    /// Route every kind through the same encoder
    pub fn uniform(encoder: Arc<dyn Encoder>) -> Self {
        Self {
            image: Arc::clone(&encoder),
            video: Arc::clone(&encoder),
            audio: Arc::clone(&encoder),
            pdf: encoder,
        }
    }

    pub fn for_kind(&self, kind: FileKind) -> &Arc<dyn Encoder> {
        match kind {
            FileKind::Image => &self.image,
            FileKind::Video => &self.video,
            FileKind::Audio => &self.audio,
            FileKind::Pdf => &self.pdf,
        }
    }
}

impl std::fmt::Debug for Toolchain {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Toolchain")
            .field("image", &self.image.name())
            .field("video", &self.video.name())
            .field("audio", &self.audio.name())
            .field("pdf", &self.pdf.name())
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::preset::PngCompression;

    #[test]
    fn test_image_targets() {
        assert_eq!(ImageTarget::from_extension(".JPEG"), Some(ImageTarget::Jpeg));
        assert_eq!(ImageTarget::from_extension("bmp"), None);
        assert_eq!(ImageTarget::Png.alternate(), ImageTarget::Webp);
        assert_eq!(ImageTarget::Webp.alternate(), ImageTarget::Png);
    }

    #[test]
    fn test_pass_extensions_and_tags() {
        let params = ImageParams {
            jpeg_quality: 80,
            png_compression: PngCompression::Default,
            adaptive_filter: true,
            webp_quality: 80,
            webp_effort: 4,
        };
        let pass = EncodePass::Image { target: ImageTarget::Jpeg, params };
        assert_eq!(pass.output_extension(), "jpg");
        assert_eq!(pass.format_tag(), "jpeg");

        let heavy = EncodePass::PdfHeavy(GhostscriptPass { profile: "/ebook".to_string(), image_dpi: 150 });
        assert_eq!(heavy.output_extension(), "pdf");
        assert_eq!(heavy.format_tag(), "pdf-gs");
        assert!(heavy.label().contains("150dpi"));
    }

    #[test]
    fn test_toolchain_routing() {
        let chain = Toolchain::from_config(&PressConfig::default());
        assert_eq!(chain.for_kind(FileKind::Image).name(), "image");
        assert_eq!(chain.for_kind(FileKind::Video).name(), "ffmpeg");
        assert_eq!(chain.for_kind(FileKind::Audio).name(), "ffmpeg");
        assert_eq!(chain.for_kind(FileKind::Pdf).name(), "pdf");
    }
}
