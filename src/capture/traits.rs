//! Capture trait definitions
//!
//! Platform-agnostic description of a capture device and the values it
//! reports about itself.

use super::session::{CaptureError, FrameSink};
use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;

/// Video resolution
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct Resolution {
    pub width: u32,
    pub height: u32,
}

impl Resolution {
    pub const fn new(width: u32, height: u32) -> Self {
        Self { width, height }
    }

    /// Both dimensions are positive
    pub fn is_valid(&self) -> bool {
        self.width > 0 && self.height > 0
    }
}

impl fmt::Display for Resolution {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}x{}", self.width, self.height)
    }
}

impl FromStr for Resolution {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let (w, h) = s
            .split_once(|c| c == 'x' || c == 'X')
            .ok_or_else(|| format!("Expected WIDTHxHEIGHT, got '{}'", s))?;
        let width = w
            .trim()
            .parse()
            .map_err(|_| format!("Invalid width in '{}'", s))?;
        let height = h
            .trim()
            .parse()
            .map_err(|_| format!("Invalid height in '{}'", s))?;
        Ok(Self { width, height })
    }
}

/// Information about a capture device
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct DeviceInfo {
    /// Unique device ID
    pub id: String,

    /// Device name
    pub name: String,

    /// Geometry the device claims before streaming, if any.
    ///
    /// Informational only; recordings take their geometry from frame data.
    pub reported_resolution: Option<Resolution>,
}

/// A source of timestamped frames.
///
/// All methods are called from the capture session's control queue. Frames
/// are pushed into the bound [`FrameSink`] from the device's own delivery
/// thread once streaming starts.
pub trait CaptureDevice: Send {
    /// Describe the device
    fn info(&self) -> DeviceInfo;

    /// Bind the device input. Failure leaves the device unusable.
    fn bind_input(&mut self) -> Result<(), CaptureError>;

    /// Bind the output so frames are delivered to `sink`
    fn bind_output(&mut self, sink: FrameSink) -> Result<(), CaptureError>;

    /// Begin delivering frames
    fn start_streaming(&mut self) -> Result<(), CaptureError>;

    /// Stop delivering frames. Must not return while frames are still being
    /// delivered.
    fn stop_streaming(&mut self) -> Result<(), CaptureError>;
}
