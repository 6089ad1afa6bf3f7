//! Trim and export
//!
//! Re-encodes a window of a recorded clip to a target geometry, frame rate
//! and bitrate. The picture is scaled to cover the target and centre-cropped;
//! it is never letterboxed.

pub mod engine;
pub mod ffmpeg;
pub mod transform;
pub mod trim;
pub mod types;

pub use engine::{ExportCanceller, ExportEngine};
pub use ffmpeg::{FfmpegBackend, ProgressCell, RenderPlan, TranscodeBackend};
pub use transform::{fill_transform, AffineTransform, FillTransform, Orientation, Size};
pub use trim::{TrimRange, MIN_TRIM_GAP};
pub use types::*;
