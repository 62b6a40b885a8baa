use std::path::{Path, PathBuf};
use std::process::Stdio;

use async_trait::async_trait;
use thiserror::Error;
use tokio::process::Command;

use super::QualityPreset;

#[derive(Debug, Error)]
pub enum TranscodeError {
    #[error("Failed to launch {tool}: {source}")]
    Spawn {
        tool: String,
        #[source]
        source: std::io::Error,
    },
    #[error("{tool} exited with {status}: {stderr}")]
    Failed {
        tool: String,
        status: String,
        stderr: String,
    },
    #[error("Could not determine media duration: {0}")]
    Probe(String),
    #[error("Encoder produced no output at {0}")]
    MissingOutput(PathBuf),
}

/// Media operations the pipeline needs. Outputs are written to caller-owned
/// paths; implementations must not leave files anywhere else.
#[async_trait]
pub trait Transcoder: Send + Sync {
    async fn probe_duration(&self, input: &Path) -> Result<f64, TranscodeError>;

    async fn encode_variant(
        &self,
        input: &Path,
        output: &Path,
        preset: &QualityPreset,
    ) -> Result<(), TranscodeError>;

    /// Grab one frame at `at_seconds`, scaled and cropped to fill the canvas, as JPEG.
    async fn extract_frame(
        &self,
        input: &Path,
        output: &Path,
        at_seconds: f64,
        width: u32,
        height: u32,
    ) -> Result<(), TranscodeError>;
}

/// Drives the `ffmpeg` and `ffprobe` binaries.
pub struct FfmpegTranscoder {
    ffmpeg: String,
    ffprobe: String,
}

impl FfmpegTranscoder {
    pub fn new(ffmpeg: &str, ffprobe: &str) -> Self {
        Self {
            ffmpeg: ffmpeg.to_string(),
            ffprobe: ffprobe.to_string(),
        }
    }

    async fn run(&self, tool: &str, cmd: &mut Command) -> Result<Vec<u8>, TranscodeError> {
        // The child is killed if this future is dropped mid-encode.
        let output = cmd
            .stdin(Stdio::null())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .kill_on_drop(true)
            .output()
            .await
            .map_err(|source| TranscodeError::Spawn {
                tool: tool.to_string(),
                source,
            })?;

        if !output.status.success() {
            let stderr = String::from_utf8_lossy(&output.stderr);
            let tail: String = stderr
                .lines()
                .rev()
                .take(5)
                .collect::<Vec<_>>()
                .into_iter()
                .rev()
                .collect::<Vec<_>>()
                .join("\n");
            return Err(TranscodeError::Failed {
                tool: tool.to_string(),
                status: output.status.to_string(),
                stderr: tail,
            });
        }

        Ok(output.stdout)
    }
}

fn ensure_output(output: &Path) -> Result<(), TranscodeError> {
    match std::fs::metadata(output) {
        Ok(meta) if meta.len() > 0 => Ok(()),
        _ => Err(TranscodeError::MissingOutput(output.to_path_buf())),
    }
}

#[async_trait]
impl Transcoder for FfmpegTranscoder {
    async fn probe_duration(&self, input: &Path) -> Result<f64, TranscodeError> {
        let stdout = self
            .run(
                "ffprobe",
                Command::new(&self.ffprobe)
                    .args(["-v", "error", "-show_entries", "format=duration"])
                    .args(["-of", "default=noprint_wrappers=1:nokey=1"])
                    .arg(input),
            )
            .await?;

        let text = String::from_utf8_lossy(&stdout);
        text.trim()
            .parse::<f64>()
            .ok()
            .filter(|d| d.is_finite() && *d >= 0.0)
            .ok_or_else(|| TranscodeError::Probe(format!("unexpected ffprobe output '{}'", text.trim())))
    }

    async fn encode_variant(
        &self,
        input: &Path,
        output: &Path,
        preset: &QualityPreset,
    ) -> Result<(), TranscodeError> {
        let (w, h) = (preset.width, preset.height);
        let filter = format!(
            "scale={w}:{h}:force_original_aspect_ratio=decrease,pad={w}:{h}:(ow-iw)/2:(oh-ih)/2"
        );
        let video_bitrate = format!("{}k", preset.video_bitrate_kbps);
        let buffer = format!("{}k", preset.video_bitrate_kbps * 2);

        self.run(
            "ffmpeg",
            Command::new(&self.ffmpeg)
                .args(["-y", "-hide_banner", "-loglevel", "error", "-i"])
                .arg(input)
                .args(["-vf", &filter])
                .args(["-c:v", "libx264", "-preset", "medium"])
                .args(["-b:v", &video_bitrate, "-maxrate", &video_bitrate, "-bufsize", &buffer])
                .args(["-r", &preset.frame_rate.to_string()])
                .args(["-c:a", "aac", "-b:a", &format!("{}k", preset.audio_bitrate_kbps)])
                .args(["-movflags", "+faststart", "-f", "mp4"])
                .arg(output),
        )
        .await?;

        ensure_output(output)
    }

    async fn extract_frame(
        &self,
        input: &Path,
        output: &Path,
        at_seconds: f64,
        width: u32,
        height: u32,
    ) -> Result<(), TranscodeError> {
        let filter = format!(
            "scale={width}:{height}:force_original_aspect_ratio=increase,crop={width}:{height}"
        );

        self.run(
            "ffmpeg",
            Command::new(&self.ffmpeg)
                .args(["-y", "-hide_banner", "-loglevel", "error"])
                .args(["-ss", &format!("{at_seconds:.3}"), "-i"])
                .arg(input)
                .args(["-frames:v", "1", "-vf", &filter, "-q:v", "3", "-f", "image2"])
                .arg(output),
        )
        .await?;

        ensure_output(output)
    }
}
