use std::path::{Path, PathBuf};
use async_trait::async_trait;
use log::debug;
use crate::error::ToolError;
use crate::preset::{AudioParams, VideoParams};
use super::process::run_tool;
use super::{EncodePass, Encoder};

/// ffmpeg-backed encoder for video and audio passes
#[derive(Debug, Clone)]
pub struct FfmpegEncoder {
    ffmpeg_bin: PathBuf,
    timeout_secs: Option<u64>,
}

impl FfmpegEncoder {
    pub fn new(ffmpeg_bin: PathBuf, timeout_secs: Option<u64>) -> Self {
        Self { ffmpeg_bin, timeout_secs }
    }
}

#[async_trait]
impl Encoder for FfmpegEncoder {
    fn name(&self) -> &str {
        "ffmpeg"
    }

    async fn encode(&self, input: &Path, output: &Path, pass: &EncodePass) -> Result<(), ToolError> {
        let args = match pass {
            EncodePass::Video { params, container } => build_video_args(input, output, params, container),
            EncodePass::Audio { params, container } => build_audio_args(input, output, params, container),
            other => return Err(ToolError::UnsupportedPass(other.label())),
        };
        debug!("ffmpeg {} -> {}", pass.label(), output.display());
        run_tool(&self.ffmpeg_bin, &args, self.timeout_secs, &[]).await?;
        Ok(())
    }
}

/// Video codec pair for a container: (video, audio)
fn video_codecs(container: &str) -> (&'static str, &'static str) {
    match container {
        "webm" => ("libvpx-vp9", "libopus"),
        _ => ("libx264", "aac"),
    }
}

/// Audio codec for an output container
fn audio_codec(container: &str) -> &'static str {
    match container {
        "mp3" => "libmp3lame",
        "ogg" => "libvorbis",
        "opus" => "libopus",
        _ => "aac",
    }
}

/// Build the ffmpeg argument vector for a video pass
pub fn build_video_args(input: &Path, output: &Path, params: &VideoParams, container: &str) -> Vec<String> {
    let mut args = vec![
        "-hide_banner".to_string(),
        "-y".to_string(),
        "-i".to_string(),
        input.to_string_lossy().to_string(),
    ];

    // First video stream plus any audio; subtitles and data tracks are dropped
    args.push("-map".to_string());
    args.push("0:v:0".to_string());
    args.push("-map".to_string());
    args.push("0:a?".to_string());

    let (vcodec, acodec) = video_codecs(container);
    args.push("-c:v".to_string());
    args.push(vcodec.to_string());

    if vcodec == "libx264" {
        args.push("-preset".to_string());
        args.push(params.preset.clone());
        args.push("-crf".to_string());
        args.push(params.crf.to_string());
        args.push("-pix_fmt".to_string());
        args.push("yuv420p".to_string());
    } else {
        // VP9 constant quality mode needs a zero target bitrate
        args.push("-crf".to_string());
        args.push(vp9_crf(params.crf).to_string());
        args.push("-b:v".to_string());
        args.push("0".to_string());
        args.push("-deadline".to_string());
        args.push("good".to_string());
        args.push("-cpu-used".to_string());
        args.push(vp9_cpu_used(&params.preset).to_string());
    }

    args.push("-threads".to_string());
    args.push(params.threads.to_string());

    args.push("-c:a".to_string());
    args.push(acodec.to_string());
    args.push("-b:a".to_string());
    args.push("128k".to_string());

    if container == "mp4" || container == "m4v" || container == "mov" {
        args.push("-movflags".to_string());
        args.push("+faststart".to_string());
    }

    args.push(output.to_string_lossy().to_string());
    args
}

/// Build the ffmpeg argument vector for an audio pass
pub fn build_audio_args(input: &Path, output: &Path, params: &AudioParams, container: &str) -> Vec<String> {
    let mut args = vec![
        "-hide_banner".to_string(),
        "-y".to_string(),
        "-i".to_string(),
        input.to_string_lossy().to_string(),
        // strip cover art and other video streams
        "-vn".to_string(),
        "-map".to_string(),
        "0:a:0".to_string(),
        "-c:a".to_string(),
        audio_codec(container).to_string(),
        "-b:a".to_string(),
        params.bitrate(),
    ];

    if container == "m4a" || container == "aac" {
        args.push("-movflags".to_string());
        args.push("+faststart".to_string());
    }
    // raw .aac has no container of its own
    if container == "aac" {
        args.push("-f".to_string());
        args.push("adts".to_string());
    }

    args.push(output.to_string_lossy().to_string());
    args
}

/// x264 and VP9 CRF scales differ (0-51 vs 0-63)
fn vp9_crf(x264_crf: u8) -> u8 {
    ((x264_crf as u32 * 63 + 25) / 51).min(63) as u8
}

fn vp9_cpu_used(x264_preset: &str) -> u8 {
    match x264_preset {
        "ultrafast" | "superfast" => 8,
        "veryfast" | "faster" => 6,
        "fast" | "medium" => 4,
        _ => 2,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn video(preset: &str, crf: u8) -> VideoParams {
        VideoParams { preset: preset.to_string(), crf, threads: 2 }
    }

    fn arg_after<'a>(args: &'a [String], flag: &str) -> Option<&'a str> {
        args.iter()
            .position(|a| a == flag)
            .and_then(|i| args.get(i + 1))
            .map(String::as_str)
    }

    #[test]
    fn test_x264_args() {
        let args = build_video_args(Path::new("/in/a.mov"), Path::new("/out/a.mp4"), &video("veryfast", 28), "mp4");
        assert_eq!(arg_after(&args, "-c:v"), Some("libx264"));
        assert_eq!(arg_after(&args, "-preset"), Some("veryfast"));
        assert_eq!(arg_after(&args, "-crf"), Some("28"));
        assert_eq!(arg_after(&args, "-threads"), Some("2"));
        assert!(args.contains(&"+faststart".to_string()));
        assert_eq!(args.last().map(String::as_str), Some("/out/a.mp4"));
    }

    #[test]
    fn test_webm_uses_vp9() {
        let args = build_video_args(Path::new("a.mp4"), Path::new("a.webm"), &video("slow", 22), "webm");
        assert_eq!(arg_after(&args, "-c:v"), Some("libvpx-vp9"));
        assert_eq!(arg_after(&args, "-c:a"), Some("libopus"));
        assert_eq!(arg_after(&args, "-b:v"), Some("0"));
        assert!(arg_after(&args, "-preset").is_none());
        assert!(!args.contains(&"+faststart".to_string()));
    }

    #[test]
    fn test_audio_codec_by_container() {
        let params = AudioParams { bitrate_kbps: 160 };
        let mp3 = build_audio_args(Path::new("a.wav"), Path::new("a.mp3"), &params, "mp3");
        assert_eq!(arg_after(&mp3, "-c:a"), Some("libmp3lame"));
        assert_eq!(arg_after(&mp3, "-b:a"), Some("160k"));
        assert!(mp3.contains(&"-vn".to_string()));

        let ogg = build_audio_args(Path::new("a.wav"), Path::new("a.ogg"), &params, "ogg");
        assert_eq!(arg_after(&ogg, "-c:a"), Some("libvorbis"));

        let aac = build_audio_args(Path::new("a.wav"), Path::new("a.aac"), &params, "aac");
        assert_eq!(arg_after(&aac, "-f"), Some("adts"));
    }

    #[test]
    fn test_vp9_mapping() {
        assert_eq!(vp9_crf(0), 0);
        assert_eq!(vp9_crf(51), 63);
        assert!(vp9_crf(22) < vp9_crf(30));
        assert!(vp9_cpu_used("ultrafast") > vp9_cpu_used("slow"));
    }

    #[tokio::test]
    async fn test_rejects_image_pass() {
        let encoder = FfmpegEncoder::new(PathBuf::from("ffmpeg"), None);
        let result = encoder.encode(Path::new("a.pdf"), Path::new("b.pdf"), &EncodePass::PdfLight).await;
        assert!(matches!(result, Err(ToolError::UnsupportedPass(_))));
    }
}
