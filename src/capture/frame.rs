//! Captured video frames
//!
//! A frame is an opaque payload plus a presentation timestamp. Its pixel
//! geometry is only known once a device attaches a layout to the payload,
//! which some devices do not do until they are actively streaming.

use super::traits::Resolution;
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use std::time::Duration;

/// Raw pixel formats a capture device can hand us
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum PixelFormat {
    Bgra,
    Rgba,
    Rgb24,
    Yuyv422,
    Nv12,
}

impl PixelFormat {
    /// Name of this format as understood by FFmpeg's `-pixel_format`
    pub fn ffmpeg_name(&self) -> &'static str {
        match self {
            PixelFormat::Bgra => "bgra",
            PixelFormat::Rgba => "rgba",
            PixelFormat::Rgb24 => "rgb24",
            PixelFormat::Yuyv422 => "yuyv422",
            PixelFormat::Nv12 => "nv12",
        }
    }

    /// Number of bytes one frame of `resolution` occupies in this format
    pub fn frame_size(&self, resolution: Resolution) -> usize {
        let pixels = resolution.width as usize * resolution.height as usize;
        match self {
            PixelFormat::Bgra | PixelFormat::Rgba => pixels * 4,
            PixelFormat::Rgb24 => pixels * 3,
            PixelFormat::Yuyv422 => pixels * 2,
            PixelFormat::Nv12 => pixels * 3 / 2,
        }
    }
}

/// Geometry and format attached to a frame payload
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct PixelLayout {
    pub resolution: Resolution,
    pub format: PixelFormat,
}

impl PixelLayout {
    pub fn new(width: u32, height: u32, format: PixelFormat) -> Self {
        Self {
            resolution: Resolution::new(width, height),
            format,
        }
    }
}

/// One timestamped unit of raw video from a capture device.
///
/// The payload is reference counted so the delivery thread can hand the
/// frame off without copying.
#[derive(Debug, Clone)]
pub struct Frame {
    pts: Duration,
    layout: Option<PixelLayout>,
    data: Arc<[u8]>,
}

impl Frame {
    pub fn new(pts: Duration, layout: Option<PixelLayout>, data: impl Into<Arc<[u8]>>) -> Self {
        Self {
            pts,
            layout,
            data: data.into(),
        }
    }

    /// Presentation timestamp on the device clock
    pub fn pts(&self) -> Duration {
        self.pts
    }

    pub fn data(&self) -> &[u8] {
        &self.data
    }

    /// Shared handle to the payload
    pub fn payload(&self) -> Arc<[u8]> {
        Arc::clone(&self.data)
    }

    pub fn layout(&self) -> Option<PixelLayout> {
        self.layout
    }

    /// True pixel geometry of this frame.
    ///
    /// Returns `None` when the payload carries no layout, reports a zero
    /// dimension, or is shorter than its layout implies.
    pub fn resolution(&self) -> Option<Resolution> {
        let layout = self.layout?;
        if !layout.resolution.is_valid() {
            return None;
        }
        if self.data.len() < layout.format.frame_size(layout.resolution) {
            return None;
        }
        Some(layout.resolution)
    }
}
