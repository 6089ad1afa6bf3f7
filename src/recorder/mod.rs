//! Recording module
//!
//! A [`RecordingSession`] turns a stream of frames into one finalized
//! movie file:
//! - encoders are created lazily from the first frame's real geometry
//! - the output timeline starts at the first accepted frame
//! - frames the encoder cannot take are dropped, never queued

pub mod encoder;
pub mod ffmpeg;
pub mod session;
pub mod state;

#[cfg(test)]
pub(crate) mod testing;

pub use encoder::{EncoderError, EncoderFactory, EncoderSettings, VideoEncoder};
pub use ffmpeg::FfmpegEncoderFactory;
pub use session::RecordingSession;
pub use state::{FrameStats, RecordingError, RecordingOutput, RecordingState};
