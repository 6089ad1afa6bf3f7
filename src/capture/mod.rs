//! Frame capture
//!
//! Capture devices push timestamped frames from their own threads into a
//! [`CaptureSession`], which forwards them to the active recorder.

pub mod frame;
pub mod pattern;
pub mod session;
pub mod traits;

#[cfg(feature = "camera")]
pub mod webcam;

pub use frame::{Frame, PixelFormat, PixelLayout};
pub use pattern::{PatternConfig, TestPatternDevice};
pub use session::{CaptureError, CaptureSession, FrameSink};
pub use traits::{CaptureDevice, DeviceInfo, Resolution};
