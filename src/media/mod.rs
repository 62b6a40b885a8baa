//! Quality ladder and the transcoding pipeline.

mod pipeline;
mod transcoder;

pub use pipeline::{PipelineError, ThumbnailSettings, TranscodingPipeline};
pub use transcoder::{FfmpegTranscoder, TranscodeError, Transcoder};

use serde::{Deserialize, Serialize};

/// Rendition quality, ordered from lowest to highest.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub enum Quality {
    #[serde(rename = "480p")]
    Q480,
    #[serde(rename = "720p")]
    Q720,
    #[serde(rename = "1080p")]
    Q1080,
    #[serde(rename = "4k")]
    Q4k,
}

/// Encoder settings for one quality.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct QualityPreset {
    pub width: u32,
    pub height: u32,
    pub video_bitrate_kbps: u32,
    pub audio_bitrate_kbps: u32,
    pub frame_rate: u32,
}

impl Quality {
    pub const ALL: [Quality; 4] = [Quality::Q480, Quality::Q720, Quality::Q1080, Quality::Q4k];
    pub const MIN: Quality = Quality::Q480;
    pub const MAX: Quality = Quality::Q4k;

    pub fn as_str(self) -> &'static str {
        match self {
            Quality::Q480 => "480p",
            Quality::Q720 => "720p",
            Quality::Q1080 => "1080p",
            Quality::Q4k => "4k",
        }
    }

    pub fn parse(s: &str) -> Option<Self> {
        match s.trim().to_lowercase().as_str() {
            "480p" | "480" => Some(Quality::Q480),
            "720p" | "720" => Some(Quality::Q720),
            "1080p" | "1080" => Some(Quality::Q1080),
            "4k" | "2160p" | "2160" => Some(Quality::Q4k),
            _ => None,
        }
    }

    pub fn preset(self) -> QualityPreset {
        match self {
            Quality::Q480 => QualityPreset {
                width: 854,
                height: 480,
                video_bitrate_kbps: 1000,
                audio_bitrate_kbps: 96,
                frame_rate: 30,
            },
            Quality::Q720 => QualityPreset {
                width: 1280,
                height: 720,
                video_bitrate_kbps: 2500,
                audio_bitrate_kbps: 128,
                frame_rate: 30,
            },
            Quality::Q1080 => QualityPreset {
                width: 1920,
                height: 1080,
                video_bitrate_kbps: 5000,
                audio_bitrate_kbps: 192,
                frame_rate: 30,
            },
            Quality::Q4k => QualityPreset {
                width: 3840,
                height: 2160,
                video_bitrate_kbps: 15000,
                audio_bitrate_kbps: 256,
                frame_rate: 30,
            },
        }
    }
}

impl std::fmt::Display for Quality {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}
