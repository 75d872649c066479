use std::fs::File;
use std::io::BufWriter;
use std::path::{Path, PathBuf};
use async_trait::async_trait;
use image::codecs::jpeg::JpegEncoder;
use image::codecs::png::{CompressionType, FilterType as PngFilter, PngEncoder};
use image::imageops::FilterType;
use image::{DynamicImage, ExtendedColorType, ImageEncoder, ImageReader};
use log::debug;
use crate::error::ToolError;
use crate::preset::{ImageParams, PngCompression};
use super::{EncodePass, Encoder, ImageTarget};

/// In-process raster encoder built on the `image` crate.
///
/// Decoding and encoding are CPU-bound and run on the blocking pool.
#[derive(Debug, Clone)]
pub struct RasterEncoder {
    /// Images above this pixel count are downscaled before encoding
    max_pixels: u64,
}

impl RasterEncoder {
    pub fn new(max_pixels: u64) -> Self {
        Self { max_pixels: max_pixels.max(1) }
    }
}

#[async_trait]
impl Encoder for RasterEncoder {
    fn name(&self) -> &str {
        "image"
    }

    async fn encode(&self, input: &Path, output: &Path, pass: &EncodePass) -> Result<(), ToolError> {
        let (target, params) = match pass {
            EncodePass::Image { target, params } => (*target, params.clone()),
            other => return Err(ToolError::UnsupportedPass(other.label())),
        };
        let input: PathBuf = input.to_path_buf();
        let output: PathBuf = output.to_path_buf();
        let max_pixels = self.max_pixels;

        tokio::task::spawn_blocking(move || encode_file(&input, &output, target, &params, max_pixels))
            .await
            .map_err(|e| ToolError::Codec(format!("image worker failed: {}", e)))?
    }
}

fn encode_file(input: &Path, output: &Path, target: ImageTarget, params: &ImageParams, max_pixels: u64) -> Result<(), ToolError> {
    let img = ImageReader::open(input)?
        .with_guessed_format()?
        .decode()
        .map_err(|e| ToolError::Codec(format!("decode {}: {}", input.display(), e)))?;

    let img = match fit_within_pixels(img.width(), img.height(), max_pixels) {
        Some((w, h)) => {
            debug!("Downscaling {}x{} -> {}x{}", img.width(), img.height(), w, h);
            img.resize_exact(w, h, FilterType::Lanczos3)
        }
        None => img,
    };

    let file = File::create(output)?;
    let mut writer = BufWriter::new(file);
    match target {
        ImageTarget::Jpeg => write_jpeg(&mut writer, &img, params.jpeg_quality)?,
        ImageTarget::Png => write_png(&mut writer, &img, params)?,
        ImageTarget::Webp => write_webp(&mut writer, &img, params)?,
    }
    std::io::Write::flush(&mut writer)?;
    Ok(())
}

fn write_jpeg<W: std::io::Write>(writer: &mut W, img: &DynamicImage, quality: u8) -> Result<(), ToolError> {
    // JPEG would silently flatten transparency
    if img.color().has_alpha() {
        return Err(ToolError::Codec("jpeg cannot carry an alpha channel".to_string()));
    }
    let rgb = img.to_rgb8();
    JpegEncoder::new_with_quality(writer, quality.clamp(1, 100))
        .write_image(rgb.as_raw(), rgb.width(), rgb.height(), ExtendedColorType::Rgb8)
        .map_err(|e| ToolError::Codec(format!("jpeg encode: {}", e)))
}

fn write_png<W: std::io::Write>(writer: &mut W, img: &DynamicImage, params: &ImageParams) -> Result<(), ToolError> {
    let compression = match params.png_compression {
        PngCompression::Fast => CompressionType::Fast,
        PngCompression::Default => CompressionType::Default,
        PngCompression::Best => CompressionType::Best,
    };
    let filter = if params.adaptive_filter { PngFilter::Adaptive } else { PngFilter::NoFilter };
    let encoder = PngEncoder::new_with_quality(writer, compression, filter);
    write_8bit(encoder, img).map_err(|e| ToolError::Codec(format!("png encode: {}", e)))
}

/// Lossy WebP through libwebp; `webp_effort` maps to the encoder method
fn write_webp<W: std::io::Write>(writer: &mut W, img: &DynamicImage, params: &ImageParams) -> Result<(), ToolError> {
    let mut config = webp::WebPConfig::new().map_err(|_| ToolError::Codec("webp config init failed".to_string()))?;
    config.lossless = 0;
    config.quality = params.webp_quality.clamp(1, 100) as f32;
    config.method = params.webp_effort.min(6) as i32;

    let encoded = if img.color().has_alpha() {
        let rgba = img.to_rgba8();
        webp::Encoder::from_rgba(rgba.as_raw(), rgba.width(), rgba.height()).encode_advanced(&config)
    } else {
        let rgb = img.to_rgb8();
        webp::Encoder::from_rgb(rgb.as_raw(), rgb.width(), rgb.height()).encode_advanced(&config)
    }
    .map_err(|e| ToolError::Codec(format!("webp encode: {:?}", e)))?;

    writer.write_all(&encoded)?;
    Ok(())
}

/// Encode as 8-bit RGB or RGBA depending on whether the source has alpha
fn write_8bit<E: ImageEncoder>(encoder: E, img: &DynamicImage) -> image::ImageResult<()> {
    if img.color().has_alpha() {
        let rgba = img.to_rgba8();
        encoder.write_image(rgba.as_raw(), rgba.width(), rgba.height(), ExtendedColorType::Rgba8)
    } else {
        let rgb = img.to_rgb8();
        encoder.write_image(rgb.as_raw(), rgb.width(), rgb.height(), ExtendedColorType::Rgb8)
    }
}

/// Dimensions that fit within `max_pixels` keeping the aspect ratio.
/// None when the image already fits; images are never upscaled.
pub fn fit_within_pixels(width: u32, height: u32, max_pixels: u64) -> Option<(u32, u32)> {
    let pixels = width as u64 * height as u64;
    if pixels <= max_pixels || pixels == 0 {
        return None;
    }
    let scale = (max_pixels as f64 / pixels as f64).sqrt();
    let w = ((width as f64 * scale).floor() as u32).max(1);
    let h = ((height as f64 * scale).floor() as u32).max(1);
    Some((w, h))
}

#[cfg(test)]
mod tests {
    use super::*;
    use image::{Rgb, RgbImage, Rgba, RgbaImage};
    use proptest::prelude::*;

    fn params() -> ImageParams {
        ImageParams {
            jpeg_quality: 75,
            png_compression: PngCompression::Fast,
            adaptive_filter: true,
            webp_quality: 75,
            webp_effort: 2,
        }
    }

    fn gradient(w: u32, h: u32) -> RgbImage {
        RgbImage::from_fn(w, h, |x, y| Rgb([(x % 256) as u8, (y % 256) as u8, ((x + y) % 256) as u8]))
    }

    #[tokio::test]
    async fn test_encodes_every_target() {
        let dir = tempfile::tempdir().unwrap();
        let input = dir.path().join("in.png");
        gradient(64, 48).save(&input).unwrap();

        let encoder = RasterEncoder::new(40_000_000);
        for target in ImageTarget::ALL {
            let output = dir.path().join(format!("out.{}", target.extension()));
            let pass = EncodePass::Image { target, params: params() };
            encoder.encode(&input, &output, &pass).await.unwrap();

            let decoded = image::open(&output).unwrap();
            assert_eq!((decoded.width(), decoded.height()), (64, 48));
        }
    }

    #[tokio::test]
    async fn test_webp_quality_changes_output() {
        let dir = tempfile::tempdir().unwrap();
        let input = dir.path().join("in.png");
        gradient(256, 256).save(&input).unwrap();

        let encoder = RasterEncoder::new(40_000_000);
        let mut sizes = Vec::new();
        for (quality, effort) in [(30, 1), (95, 6)] {
            let output = dir.path().join(format!("q{}.webp", quality));
            let params = ImageParams { webp_quality: quality, webp_effort: effort, ..params() };
            let pass = EncodePass::Image { target: ImageTarget::Webp, params };
            encoder.encode(&input, &output, &pass).await.unwrap();
            sizes.push(std::fs::metadata(&output).unwrap().len());
        }
        assert!(sizes[0] < sizes[1], "low quality webp should be smaller: {:?}", sizes);
    }

    #[tokio::test]
    async fn test_jpeg_refuses_alpha() {
        let dir = tempfile::tempdir().unwrap();
        let input = dir.path().join("in.png");
        RgbaImage::from_pixel(8, 8, Rgba([10, 20, 30, 128])).save(&input).unwrap();

        let encoder = RasterEncoder::new(40_000_000);
        let pass = EncodePass::Image { target: ImageTarget::Jpeg, params: params() };
        let result = encoder.encode(&input, &dir.path().join("out.jpg"), &pass).await;
        assert!(matches!(result, Err(ToolError::Codec(_))));
    }

    #[tokio::test]
    async fn test_large_images_are_downscaled() {
        let dir = tempfile::tempdir().unwrap();
        let input = dir.path().join("in.png");
        gradient(200, 100).save(&input).unwrap();

        let encoder = RasterEncoder::new(5_000);
        let output = dir.path().join("out.png");
        let pass = EncodePass::Image { target: ImageTarget::Png, params: params() };
        encoder.encode(&input, &output, &pass).await.unwrap();

        let decoded = image::open(&output).unwrap();
        assert!(decoded.width() as u64 * decoded.height() as u64 <= 5_000);
        assert_eq!(decoded.width(), decoded.height() * 2);
    }

    #[tokio::test]
    async fn test_garbage_input_is_codec_error() {
        let dir = tempfile::tempdir().unwrap();
        let input = dir.path().join("in.png");
        std::fs::write(&input, b"definitely not an image").unwrap();

        let encoder = RasterEncoder::new(40_000_000);
        let pass = EncodePass::Image { target: ImageTarget::Png, params: params() };
        let result = encoder.encode(&input, &dir.path().join("out.png"), &pass).await;
        assert!(result.is_err());
    }

    #[test]
    fn test_fit_within_pixels() {
        assert_eq!(fit_within_pixels(100, 100, 10_000), None);
        assert_eq!(fit_within_pixels(200, 100, 5_000), Some((100, 50)));
        assert_eq!(fit_within_pixels(0, 100, 1), None);
    }

    proptest! {
        /// Downscaled dimensions always fit and never exceed the source
        #[test]
        fn test_fit_bounds(w in 1u32..20_000, h in 1u32..20_000, max in 1u64..100_000_000) {
            match fit_within_pixels(w, h, max) {
                None => prop_assert!(w as u64 * h as u64 <= max),
                Some((nw, nh)) => {
                    prop_assert!(nw <= w && nh <= h);
                    prop_assert!(nw >= 1 && nh >= 1);
                    // the 1px floor may overshoot for extreme aspect ratios
                    if nw > 1 && nh > 1 {
                        prop_assert!(nw as u64 * nh as u64 <= max);
                    }
                }
            }
        }
    }
}
