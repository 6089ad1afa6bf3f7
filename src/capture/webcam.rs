//! Camera capture using nokhwa
//!
//! The camera is opened on its own delivery thread. Its negotiated format is
//! only known after the stream opens, so every frame carries the layout read
//! back from the live stream rather than what was requested.

use super::frame::{Frame, PixelFormat, PixelLayout};
use super::session::{CaptureError, FrameSink};
use super::traits::{CaptureDevice, DeviceInfo};
use nokhwa::pixel_format::{RgbAFormat, RgbFormat};
use nokhwa::utils::{ApiBackend, CameraIndex, FrameFormat, RequestedFormat, RequestedFormatType};
use nokhwa::Camera;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::thread::JoinHandle;
use std::time::{Duration, Instant};

/// Consecutive failed reads before the stream is given up
const MAX_READ_FAILURES: u32 = 50;

/// Pause after a failed read
const READ_RETRY_DELAY: Duration = Duration::from_millis(20);

/// Enumerate attached cameras
pub fn list_cameras() -> Vec<DeviceInfo> {
    match nokhwa::query(ApiBackend::Auto) {
        Ok(cameras) => cameras
            .into_iter()
            .map(|info| DeviceInfo {
                id: index_to_id(info.index()),
                name: info.human_name().to_string(),
                reported_resolution: None,
            })
            .collect(),
        Err(e) => {
            tracing::warn!("Failed to enumerate cameras: {:?}", e);
            Vec::new()
        }
    }
}

fn index_to_id(index: &CameraIndex) -> String {
    match index {
        CameraIndex::Index(i) => i.to_string(),
        CameraIndex::String(s) => s.clone(),
    }
}

/// Map a negotiated camera format to a raw layout we can encode directly.
/// MJPEG has no raw layout and is decoded to RGB on the delivery thread.
fn raw_format(format: FrameFormat) -> Option<PixelFormat> {
    match format {
        FrameFormat::YUYV => Some(PixelFormat::Yuyv422),
        FrameFormat::NV12 => Some(PixelFormat::Nv12),
        FrameFormat::RAWRGB => Some(PixelFormat::Rgb24),
        _ => None,
    }
}

/// A camera as a frame source
pub struct CameraDevice {
    index: CameraIndex,
    name: String,
    sink: Option<FrameSink>,
    running: Arc<AtomicBool>,
    thread: Option<JoinHandle<()>>,
}

impl CameraDevice {
    /// `device_id` is an index or a backend-specific identifier; `None`
    /// selects the first camera.
    pub fn new(device_id: Option<&str>) -> Self {
        let index = match device_id {
            Some(id) => match id.parse::<u32>() {
                Ok(i) => CameraIndex::Index(i),
                Err(_) => CameraIndex::String(id.to_string()),
            },
            None => CameraIndex::Index(0),
        };
        Self {
            name: index_to_id(&index),
            index,
            sink: None,
            running: Arc::new(AtomicBool::new(false)),
            thread: None,
        }
    }
}

impl CaptureDevice for CameraDevice {
    fn info(&self) -> DeviceInfo {
        DeviceInfo {
            id: index_to_id(&self.index),
            name: self.name.clone(),
            reported_resolution: None,
        }
    }

    fn bind_input(&mut self) -> Result<(), CaptureError> {
        let id = index_to_id(&self.index);
        let camera = list_cameras()
            .into_iter()
            .find(|c| c.id == id)
            .ok_or_else(|| CaptureError::DeviceNotFound(format!("No camera with id {}", id)))?;
        self.name = camera.name;
        Ok(())
    }

    fn bind_output(&mut self, sink: FrameSink) -> Result<(), CaptureError> {
        self.sink = Some(sink);
        Ok(())
    }

    fn start_streaming(&mut self) -> Result<(), CaptureError> {
        if self.running.load(Ordering::SeqCst) {
            return Ok(());
        }
        // Reap a thread whose stream ended on its own
        if let Some(handle) = self.thread.take() {
            let _ = handle.join();
        }
        let sink = self
            .sink
            .clone()
            .ok_or_else(|| CaptureError::Configuration("Output not bound".to_string()))?;

        self.running.store(true, Ordering::SeqCst);
        let running = self.running.clone();
        let index = self.index.clone();

        let handle = std::thread::Builder::new()
            .name("camera-delivery".to_string())
            .spawn(move || {
                if let Err(e) = stream_camera(index, &sink, &running) {
                    tracing::error!("Camera capture failed: {}", e);
                }
                if running.swap(false, Ordering::SeqCst) {
                    sink.stream_ended();
                }
            })
            .map_err(|e| CaptureError::Device(format!("Failed to spawn camera thread: {}", e)))?;
        self.thread = Some(handle);
        Ok(())
    }

    fn stop_streaming(&mut self) -> Result<(), CaptureError> {
        self.running.store(false, Ordering::SeqCst);
        if let Some(handle) = self.thread.take() {
            handle
                .join()
                .map_err(|_| CaptureError::Device("Camera thread panicked".to_string()))?;
        }
        tracing::info!("Camera capture stopped");
        Ok(())
    }
}

impl Drop for CameraDevice {
    fn drop(&mut self) {
        let _ = self.stop_streaming();
    }
}

fn stream_camera(
    index: CameraIndex,
    sink: &FrameSink,
    running: &AtomicBool,
) -> Result<(), CaptureError> {
    let format = RequestedFormat::new::<RgbAFormat>(RequestedFormatType::AbsoluteHighestResolution);
    let mut camera = Camera::new(index.clone(), format)
        .map_err(|e| CaptureError::Device(format!("Failed to open camera {:?}: {:?}", index, e)))?;
    camera
        .open_stream()
        .map_err(|e| CaptureError::Device(format!("Failed to open camera stream: {:?}", e)))?;

    let camera_format = camera.camera_format();
    let width = camera_format.resolution().width();
    let height = camera_format.resolution().height();
    let raw = raw_format(camera_format.format());
    tracing::info!(
        "Camera opened: {}x{} @ {}fps, format={:?}",
        width,
        height,
        camera_format.frame_rate(),
        camera_format.format()
    );

    let clock = Instant::now();
    let mut delivered: u64 = 0;
    let mut failures: u32 = 0;

    while running.load(Ordering::SeqCst) {
        let buffer = match camera.frame() {
            Ok(buffer) => {
                failures = 0;
                buffer
            }
            Err(e) => {
                failures += 1;
                tracing::debug!("Failed to capture frame ({}): {:?}", failures, e);
                if failures >= MAX_READ_FAILURES {
                    let _ = camera.stop_stream();
                    return Err(CaptureError::Device(format!(
                        "Camera stopped producing frames: {:?}",
                        e
                    )));
                }
                std::thread::sleep(READ_RETRY_DELAY);
                continue;
            }
        };
        let pts = clock.elapsed();

        let frame = match raw {
            Some(format) => Frame::new(
                pts,
                Some(PixelLayout::new(width, height, format)),
                buffer.buffer().to_vec(),
            ),
            None => match buffer.decode_image::<RgbFormat>() {
                Ok(image) => {
                    let (w, h) = image.dimensions();
                    Frame::new(
                        pts,
                        Some(PixelLayout::new(w, h, PixelFormat::Rgb24)),
                        image.into_raw(),
                    )
                }
                Err(e) => {
                    tracing::debug!("Failed to decode camera frame: {:?}", e);
                    Frame::new(pts, None, buffer.buffer().to_vec())
                }
            },
        };
        sink.deliver(frame);
        delivered += 1;
    }

    if let Err(e) = camera.stop_stream() {
        tracing::warn!("Error stopping camera stream: {:?}", e);
    }
    tracing::info!(
        "Camera delivered {} frames in {:.2}s",
        delivered,
        clock.elapsed().as_secs_f64()
    );
    Ok(())
}
