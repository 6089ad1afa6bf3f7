//! Encoder abstraction for recording sessions
//!
//! A recording session never knows the frame geometry up front, so encoders
//! are produced on demand by an [`EncoderFactory`] once the first usable
//! frame arrives.

use crate::capture::frame::{Frame, PixelFormat};
use crate::capture::traits::Resolution;
use async_trait::async_trait;
use std::path::PathBuf;
use std::time::Duration;
use thiserror::Error;

/// Everything an encoder needs to be created
#[derive(Debug, Clone)]
pub struct EncoderSettings {
    /// Output container path
    pub destination: PathBuf,

    /// Exact frame geometry observed on the first accepted frame
    pub resolution: Resolution,

    /// Raw pixel format of incoming frames
    pub pixel_format: PixelFormat,

    /// Target bitrate in bits per second
    pub bitrate: u32,

    /// Nominal output frame rate
    pub frame_rate: u32,
}

/// Encoder errors
#[derive(Error, Debug)]
pub enum EncoderError {
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("Failed to start encoder: {0}")]
    Spawn(String),

    #[error("Failed to write frame: {0}")]
    Write(String),

    #[error("Failed to finalize output: {0}")]
    Finalize(String),
}

/// A lazily created, exclusively owned video encoder
#[async_trait]
pub trait VideoEncoder: Send {
    /// Whether the encoder can take another frame right now
    fn is_ready_for_more(&self) -> bool;

    /// Open the output session. All later frame times are relative to
    /// `anchor`, which becomes time zero in the output.
    fn begin_session(&mut self, anchor: Duration);

    /// Encode `frame` at `at`, measured from the session anchor
    fn append(&mut self, frame: &Frame, at: Duration) -> Result<(), EncoderError>;

    /// Number of frames handed to the encoder so far
    fn frames_written(&self) -> u64;

    /// Mark the input finished and wait for the container to be finalized
    async fn finish(&mut self) -> Result<PathBuf, EncoderError>;
}

/// Creates encoders bound to a concrete geometry
pub trait EncoderFactory: Send + Sync {
    fn create(&self, settings: &EncoderSettings) -> Result<Box<dyn VideoEncoder>, EncoderError>;
}
