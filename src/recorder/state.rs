//! Recording state management
//!
//! Observable state, outputs and errors of a recording session.

use super::encoder::EncoderError;
use crate::capture::traits::Resolution;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::path::PathBuf;
use thiserror::Error;

/// Current state of a recording session
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
#[serde(rename_all = "snake_case")]
pub enum RecordingState {
    /// Never started
    #[default]
    Idle,
    /// Started, waiting for a frame with usable geometry
    PendingFirstFrame,
    /// Encoder created and accepting frames
    Writing,
    /// Input closed, container being finalized
    Finalizing,
    /// Stopped
    Finished,
    /// Encoder could not be created or broke; only `start` leaves this state
    Failed,
}

/// Per-session frame accounting
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct FrameStats {
    /// Frames handed to the encoder
    pub encoded: u64,

    /// Frames dropped while geometry was still unknown
    pub dropped_no_geometry: u64,

    /// Frames dropped because the encoder was not ready
    pub dropped_backpressure: u64,

    /// Frames dropped because their geometry changed mid-recording
    pub dropped_mismatch: u64,
}

impl FrameStats {
    pub fn dropped(&self) -> u64 {
        self.dropped_no_geometry + self.dropped_backpressure + self.dropped_mismatch
    }
}

/// Result of stopping a recording
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RecordingOutput {
    /// Output location, absent when there was nothing to stop
    pub path: Option<PathBuf>,

    /// Whether the container was finalized. A session stopped before its
    /// first usable frame reports its destination unfinalized.
    pub finalized: bool,

    /// Geometry the encoder was created with
    pub resolution: Option<Resolution>,

    /// Time between the first and last encoded frame, in milliseconds
    pub duration_ms: f64,

    pub frames: FrameStats,

    /// Wall-clock time the session was started
    pub started_at: Option<DateTime<Utc>>,
}

/// Recording errors
#[derive(Error, Debug)]
pub enum RecordingError {
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("Encoder error: {0}")]
    Encoder(#[from] EncoderError),

    #[error("Recording failed: {0}")]
    Failed(String),

    #[error("Recording is already being finalized")]
    AlreadyFinalizing,
}

pub type RecordingResult<T> = Result<T, RecordingError>;
