//! Export types and configuration
//!
//! Job description, target presets, progress reporting and errors for the
//! trim-and-transcode export.

use super::transform::{Orientation, Size};
use super::trim::TrimRange;
use crate::capture::traits::Resolution;
use serde::{Deserialize, Serialize};
use std::path::PathBuf;
use thiserror::Error;
use uuid::Uuid;

/// Target geometry
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", tag = "type")]
pub enum ExportResolution {
    AppPreviewPortrait,
    AppPreviewLandscape,
    Hd1080Portrait,
    Hd1080Landscape,
    IpadPortrait,
    Display67,
    Custom { width: u32, height: u32 },
}

impl ExportResolution {
    pub const PRESETS: [ExportResolution; 6] = [
        ExportResolution::AppPreviewPortrait,
        ExportResolution::AppPreviewLandscape,
        ExportResolution::Hd1080Portrait,
        ExportResolution::Hd1080Landscape,
        ExportResolution::IpadPortrait,
        ExportResolution::Display67,
    ];

    pub fn resolution(&self) -> Resolution {
        match *self {
            ExportResolution::AppPreviewPortrait => Resolution::new(886, 1920),
            ExportResolution::AppPreviewLandscape => Resolution::new(1920, 886),
            ExportResolution::Hd1080Portrait => Resolution::new(1080, 1920),
            ExportResolution::Hd1080Landscape => Resolution::new(1920, 1080),
            ExportResolution::IpadPortrait => Resolution::new(1200, 1600),
            ExportResolution::Display67 => Resolution::new(1290, 2796),
            ExportResolution::Custom { width, height } => Resolution::new(width, height),
        }
    }

    pub fn size(&self) -> Size {
        let res = self.resolution();
        Size::new(res.width as f64, res.height as f64)
    }

    /// Short name used on the command line
    pub fn name(&self) -> &'static str {
        match self {
            ExportResolution::AppPreviewPortrait => "app-preview-portrait",
            ExportResolution::AppPreviewLandscape => "app-preview-landscape",
            ExportResolution::Hd1080Portrait => "1080p-portrait",
            ExportResolution::Hd1080Landscape => "1080p-landscape",
            ExportResolution::IpadPortrait => "ipad-portrait",
            ExportResolution::Display67 => "display-6.7",
            ExportResolution::Custom { .. } => "custom",
        }
    }

    /// H.264 in yuv420p needs positive, even dimensions
    pub fn validate(&self) -> Result<(), ExportError> {
        let res = self.resolution();
        if !res.is_valid() || res.width % 2 != 0 || res.height % 2 != 0 {
            return Err(ExportError::InvalidConfig(format!(
                "Target size {} must be positive and even",
                res
            )));
        }
        Ok(())
    }
}

impl std::str::FromStr for ExportResolution {
    type Err = String;

    /// A preset name or `WIDTHxHEIGHT`
    fn from_str(s: &str) -> Result<Self, Self::Err> {
        if let Some(preset) = Self::PRESETS.iter().find(|p| p.name() == s) {
            return Ok(*preset);
        }
        let res: Resolution = s.parse().map_err(|_| {
            let names: Vec<_> = Self::PRESETS.iter().map(|p| p.name()).collect();
            format!("Unknown size '{}'; use WIDTHxHEIGHT or one of {}", s, names.join(", "))
        })?;
        Ok(ExportResolution::Custom {
            width: res.width,
            height: res.height,
        })
    }
}

/// Target frame rate
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
pub enum ExportFrameRate {
    Fps24,
    #[default]
    Fps30,
    Fps60,
}

impl ExportFrameRate {
    pub fn fps(&self) -> u32 {
        match self {
            ExportFrameRate::Fps24 => 24,
            ExportFrameRate::Fps30 => 30,
            ExportFrameRate::Fps60 => 60,
        }
    }
}

impl TryFrom<u32> for ExportFrameRate {
    type Error = String;

    fn try_from(fps: u32) -> Result<Self, Self::Error> {
        match fps {
            24 => Ok(ExportFrameRate::Fps24),
            30 => Ok(ExportFrameRate::Fps30),
            60 => Ok(ExportFrameRate::Fps60),
            other => Err(format!("Unsupported frame rate {}; use 24, 30 or 60", other)),
        }
    }
}

/// Target video bitrate
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
pub enum ExportBitrate {
    Mbps6,
    #[default]
    Mbps10,
    Mbps12,
    Mbps20,
}

impl ExportBitrate {
    pub fn mbps(&self) -> u32 {
        match self {
            ExportBitrate::Mbps6 => 6,
            ExportBitrate::Mbps10 => 10,
            ExportBitrate::Mbps12 => 12,
            ExportBitrate::Mbps20 => 20,
        }
    }

    pub fn bits_per_second(&self) -> u64 {
        self.mbps() as u64 * 1_000_000
    }
}

impl TryFrom<u32> for ExportBitrate {
    type Error = String;

    fn try_from(mbps: u32) -> Result<Self, Self::Error> {
        match mbps {
            6 => Ok(ExportBitrate::Mbps6),
            10 => Ok(ExportBitrate::Mbps10),
            12 => Ok(ExportBitrate::Mbps12),
            20 => Ok(ExportBitrate::Mbps20),
            other => Err(format!("Unsupported bitrate {} Mbps; use 6, 10, 12 or 20", other)),
        }
    }
}

/// One trim-and-transcode request
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ExportJob {
    pub id: Uuid,
    pub source: PathBuf,
    pub output: PathBuf,
    /// Requested window; re-clamped to the probed duration before encoding
    pub trim: TrimRange,
    pub resolution: ExportResolution,
    pub frame_rate: ExportFrameRate,
    pub bitrate: ExportBitrate,
}

impl ExportJob {
    pub fn new(source: impl Into<PathBuf>, output: impl Into<PathBuf>, trim: TrimRange) -> Self {
        Self {
            id: Uuid::new_v4(),
            source: source.into(),
            output: output.into(),
            trim,
            resolution: ExportResolution::Hd1080Portrait,
            frame_rate: ExportFrameRate::default(),
            bitrate: ExportBitrate::default(),
        }
    }
}

/// What the probe learned about a source asset
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct AssetInfo {
    /// Container duration in seconds
    pub duration: f64,
    pub video: Option<VideoTrackInfo>,
    pub has_audio: bool,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct VideoTrackInfo {
    /// Stored size, before orientation
    pub width: u32,
    pub height: u32,
    pub orientation: Orientation,
    pub frame_rate: f64,
    pub codec: String,
}

impl VideoTrackInfo {
    pub fn natural_size(&self) -> Size {
        Size::new(self.width as f64, self.height as f64)
    }
}

/// Export progress stages
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", tag = "type")]
pub enum ExportStage {
    /// Probing the source and planning the render
    Preparing,
    /// Transcoding
    Encoding,
    /// Moving the finished file into place
    Finalizing,
    /// Export completed successfully
    Complete,
    /// Export failed with error
    Error { message: String },
}

/// Export progress information
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ExportProgress {
    pub job_id: Uuid,
    /// Fraction complete, 0.0 to 1.0
    pub fraction: f64,
    pub stage: ExportStage,
}

impl ExportProgress {
    pub fn preparing(job_id: Uuid) -> Self {
        Self {
            job_id,
            fraction: 0.0,
            stage: ExportStage::Preparing,
        }
    }

    pub fn encoding(job_id: Uuid, fraction: f64) -> Self {
        let fraction = if fraction.is_finite() {
            fraction.clamp(0.0, 1.0)
        } else {
            0.0
        };
        Self {
            job_id,
            fraction,
            stage: ExportStage::Encoding,
        }
    }

    pub fn finalizing(job_id: Uuid) -> Self {
        Self {
            job_id,
            fraction: 1.0,
            stage: ExportStage::Finalizing,
        }
    }

    pub fn complete(job_id: Uuid) -> Self {
        Self {
            job_id,
            fraction: 1.0,
            stage: ExportStage::Complete,
        }
    }

    pub fn error(job_id: Uuid, message: String) -> Self {
        Self {
            job_id,
            fraction: 0.0,
            stage: ExportStage::Error { message },
        }
    }
}

/// Successful export
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ExportOutcome {
    pub job_id: Uuid,
    pub output: PathBuf,
    /// Window actually encoded, after clamping to the source
    pub trim: TrimRange,
    pub resolution: Resolution,
    pub included_audio: bool,
}

/// Export errors
#[derive(Error, Debug)]
pub enum ExportError {
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("FFmpeg error: {0}")]
    Ffmpeg(String),

    #[error("Source has no video track: {0}")]
    NoVideoTrack(String),

    #[error("Invalid configuration: {0}")]
    InvalidConfig(String),

    #[error("An export is already running")]
    AlreadyRunning,

    #[error("Export cancelled")]
    Cancelled,

    #[error("Encoding error: {0}")]
    Encoding(String),
}
