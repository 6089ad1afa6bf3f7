//! Application settings
//!
//! Settings are read from an optional JSON file. Every field has a default,
//! so a partial file only overrides what it names.

use crate::utils::error::{AppError, AppResult};
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use std::time::Duration;

/// Top-level settings
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct Settings {
    /// FFmpeg executable used for recording and export
    pub ffmpeg_path: PathBuf,

    /// FFprobe executable used to inspect source assets
    pub ffprobe_path: PathBuf,

    pub recording: RecordingDefaults,

    pub export: ExportDefaults,
}

impl Default for Settings {
    fn default() -> Self {
        Self {
            ffmpeg_path: PathBuf::from("ffmpeg"),
            ffprobe_path: PathBuf::from("ffprobe"),
            recording: RecordingDefaults::default(),
            export: ExportDefaults::default(),
        }
    }
}

/// Defaults applied to new recordings
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct RecordingDefaults {
    /// Target bitrate in bits per second
    pub bitrate: u32,

    /// Nominal output frame rate
    pub frame_rate: u32,

    /// Frames the encoder may hold in flight before the session starts
    /// dropping
    pub encoder_queue_depth: usize,

    /// x264 preset
    pub preset: String,
}

impl Default for RecordingDefaults {
    fn default() -> Self {
        Self {
            bitrate: 6_000_000,
            frame_rate: 30,
            encoder_queue_depth: 4,
            preset: "veryfast".to_string(),
        }
    }
}

/// Defaults applied to export jobs
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct ExportDefaults {
    /// How often export progress is polled and reported
    pub poll_interval_ms: u64,

    /// AAC bitrate for the trimmed audio track
    pub audio_bitrate: String,

    /// x264 preset
    pub preset: String,
}

impl Default for ExportDefaults {
    fn default() -> Self {
        Self {
            poll_interval_ms: 100,
            audio_bitrate: "192k".to_string(),
            preset: "medium".to_string(),
        }
    }
}

impl ExportDefaults {
    pub fn poll_interval(&self) -> Duration {
        Duration::from_millis(self.poll_interval_ms.max(1))
    }
}

impl Settings {
    /// Load settings from a JSON file
    pub fn load(path: &Path) -> AppResult<Self> {
        if !path.exists() {
            return Err(AppError::Config(format!(
                "Settings file not found: {}",
                path.display()
            )));
        }
        let content = std::fs::read_to_string(path)?;
        let settings: Settings = serde_json::from_str(&content)?;
        tracing::debug!("Loaded settings from {:?}", path);
        Ok(settings)
    }

    /// Load from `path` when given, defaults otherwise
    pub fn load_or_default(path: Option<&Path>) -> AppResult<Self> {
        match path {
            Some(path) => Self::load(path),
            None => Ok(Self::default()),
        }
    }
}
