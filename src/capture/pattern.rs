//! Synthetic capture device
//!
//! Produces a moving colour-bar pattern on its own thread. The first few
//! frames can be emitted without a pixel layout, the way real devices
//! stream before their geometry is settled.

use super::frame::{Frame, PixelFormat, PixelLayout};
use super::session::{CaptureError, FrameSink};
use super::traits::{CaptureDevice, DeviceInfo, Resolution};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::thread::JoinHandle;
use std::time::{Duration, Instant};

const BARS: [[u8; 4]; 8] = [
    [255, 255, 255, 255],
    [0, 255, 255, 255],
    [255, 255, 0, 255],
    [0, 255, 0, 255],
    [255, 0, 255, 255],
    [0, 0, 255, 255],
    [255, 0, 0, 255],
    [0, 0, 0, 255],
];

/// Test pattern parameters
#[derive(Debug, Clone)]
pub struct PatternConfig {
    /// Geometry the frames actually carry
    pub resolution: Resolution,

    /// Frames per second
    pub fps: u32,

    /// Leading frames emitted without a layout
    pub warmup_frames: u32,

    /// What the device claims before streaming
    pub reported_resolution: Option<Resolution>,

    /// Device clock value of the first frame
    pub clock_origin: Duration,
}

impl Default for PatternConfig {
    fn default() -> Self {
        Self {
            resolution: Resolution::new(1280, 720),
            fps: 30,
            warmup_frames: 3,
            reported_resolution: None,
            clock_origin: Duration::from_secs(5),
        }
    }
}

/// Capture device backed by a generated BGRA pattern
pub struct TestPatternDevice {
    config: PatternConfig,
    sink: Option<FrameSink>,
    running: Arc<AtomicBool>,
    thread: Option<JoinHandle<()>>,
}

impl TestPatternDevice {
    pub fn new(config: PatternConfig) -> Self {
        Self {
            config,
            sink: None,
            running: Arc::new(AtomicBool::new(false)),
            thread: None,
        }
    }
}

impl CaptureDevice for TestPatternDevice {
    fn info(&self) -> DeviceInfo {
        DeviceInfo {
            id: "test-pattern".to_string(),
            name: "Test Pattern".to_string(),
            reported_resolution: self.config.reported_resolution,
        }
    }

    fn bind_input(&mut self) -> Result<(), CaptureError> {
        if self.config.fps == 0 {
            return Err(CaptureError::Configuration(
                "Test pattern needs a positive frame rate".to_string(),
            ));
        }
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
        let sink = self
            .sink
            .clone()
            .ok_or_else(|| CaptureError::Configuration("Output not bound".to_string()))?;

        self.running.store(true, Ordering::SeqCst);
        let running = self.running.clone();
        let config = self.config.clone();

        let handle = std::thread::Builder::new()
            .name("pattern-delivery".to_string())
            .spawn(move || deliver_frames(config, sink, running))
            .map_err(|e| CaptureError::Device(format!("Failed to spawn delivery thread: {}", e)))?;
        self.thread = Some(handle);

        tracing::info!(
            "Test pattern streaming {} @ {}fps",
            self.config.resolution,
            self.config.fps
        );
        Ok(())
    }

    fn stop_streaming(&mut self) -> Result<(), CaptureError> {
        self.running.store(false, Ordering::SeqCst);
        if let Some(handle) = self.thread.take() {
            handle
                .join()
                .map_err(|_| CaptureError::Device("Delivery thread panicked".to_string()))?;
        }
        Ok(())
    }
}

impl Drop for TestPatternDevice {
    fn drop(&mut self) {
        let _ = self.stop_streaming();
    }
}

fn deliver_frames(config: PatternConfig, sink: FrameSink, running: Arc<AtomicBool>) {
    let interval = Duration::from_secs_f64(1.0 / config.fps as f64);
    let started = Instant::now();
    let mut index: u64 = 0;

    while running.load(Ordering::SeqCst) {
        let pts = config.clock_origin + started.elapsed();
        let frame = if index < config.warmup_frames as u64 {
            Frame::new(pts, None, Vec::new())
        } else {
            let layout = PixelLayout::new(
                config.resolution.width,
                config.resolution.height,
                PixelFormat::Bgra,
            );
            Frame::new(pts, Some(layout), render_bars(config.resolution, index))
        };
        sink.deliver(frame);
        index += 1;

        let next = interval * index as u32;
        if let Some(wait) = next.checked_sub(started.elapsed()) {
            std::thread::sleep(wait);
        }
    }

    tracing::debug!("Test pattern delivered {} frames", index);
}

/// Colour bars scrolled one bar-width per second
fn render_bars(resolution: Resolution, index: u64) -> Vec<u8> {
    let width = resolution.width as usize;
    let height = resolution.height as usize;
    let bar_width = (width / BARS.len()).max(1);
    let shift = (index as usize * bar_width / 30) % width.max(1);

    let mut row = Vec::with_capacity(width * 4);
    for x in 0..width {
        let bar = ((x + shift) / bar_width) % BARS.len();
        row.extend_from_slice(&BARS[bar]);
    }

    let mut data = Vec::with_capacity(row.len() * height);
    for _ in 0..height {
        data.extend_from_slice(&row);
    }
    data
}
