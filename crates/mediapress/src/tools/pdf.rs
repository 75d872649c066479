use std::path::{Path, PathBuf};
use async_trait::async_trait;
use crate::error::ToolError;
use crate::preset::GhostscriptPass;
use super::process::run_tool;
use super::{EncodePass, Encoder};

/// qpdf exits 3 when it succeeded with warnings
const QPDF_WARNINGS_EXIT: i32 = 3;

/// PDF optimizer: qpdf for the structural pass, Ghostscript for the re-render
#[derive(Debug, Clone)]
pub struct PdfEncoder {
    qpdf_bin: PathBuf,
    ghostscript_bin: PathBuf,
    timeout_secs: Option<u64>,
}

impl PdfEncoder {
    pub fn new(qpdf_bin: PathBuf, ghostscript_bin: PathBuf, timeout_secs: Option<u64>) -> Self {
        Self {
            qpdf_bin,
            ghostscript_bin,
            timeout_secs,
        }
    }
}

#[async_trait]
impl Encoder for PdfEncoder {
    fn name(&self) -> &str {
        "pdf"
    }

    async fn encode(&self, input: &Path, output: &Path, pass: &EncodePass) -> Result<(), ToolError> {
        match pass {
            EncodePass::PdfLight => {
                let args = build_qpdf_args(input, output);
                run_tool(&self.qpdf_bin, &args, self.timeout_secs, &[QPDF_WARNINGS_EXIT]).await?;
            }
            EncodePass::PdfHeavy(gs) => {
                let args = build_ghostscript_args(input, output, gs);
                run_tool(&self.ghostscript_bin, &args, self.timeout_secs, &[]).await?;
            }
            other => return Err(ToolError::UnsupportedPass(other.label())),
        }
        Ok(())
    }
}

/// Lossless resave: pack objects into streams and recompress flate data
pub fn build_qpdf_args(input: &Path, output: &Path) -> Vec<String> {
    vec![
        "--object-streams=generate".to_string(),
        "--recompress-flate".to_string(),
        "--compression-level=9".to_string(),
        input.to_string_lossy().to_string(),
        output.to_string_lossy().to_string(),
    ]
}

/// Lossy re-render through pdfwrite with image downsampling
pub fn build_ghostscript_args(input: &Path, output: &Path, pass: &GhostscriptPass) -> Vec<String> {
    let dpi = pass.image_dpi.to_string();
    vec![
        "-sDEVICE=pdfwrite".to_string(),
        "-dCompatibilityLevel=1.5".to_string(),
        format!("-dPDFSETTINGS={}", pass.profile),
        "-dNOPAUSE".to_string(),
        "-dQUIET".to_string(),
        "-dBATCH".to_string(),
        "-dSAFER".to_string(),
        "-dDetectDuplicateImages=true".to_string(),
        "-dDownsampleColorImages=true".to_string(),
        format!("-dColorImageResolution={}", dpi),
        "-dDownsampleGrayImages=true".to_string(),
        format!("-dGrayImageResolution={}", dpi),
        "-dDownsampleMonoImages=true".to_string(),
        // line art stays sharp at twice the photo resolution
        format!("-dMonoImageResolution={}", pass.image_dpi.saturating_mul(2)),
        format!("-sOutputFile={}", output.to_string_lossy()),
        input.to_string_lossy().to_string(),
    ]
}
