//! Recording command handlers

use crate::capture::{CaptureDevice, CaptureSession, DeviceInfo, PatternConfig, Resolution, TestPatternDevice};
use crate::config::Settings;
use crate::recorder::{EncoderFactory, FfmpegEncoderFactory, RecordingOutput, RecordingSession};
use crate::utils::error::AppResult;
use std::future::Future;
use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;

/// Where frames come from
#[derive(Debug, Clone)]
pub enum DeviceChoice {
    /// Synthetic colour bars
    Pattern(PatternConfig),
    /// A camera by index or identifier
    #[cfg(feature = "camera")]
    Camera(Option<String>),
}

impl DeviceChoice {
    fn open(&self) -> Box<dyn CaptureDevice> {
        match self {
            DeviceChoice::Pattern(config) => Box::new(TestPatternDevice::new(config.clone())),
            #[cfg(feature = "camera")]
            DeviceChoice::Camera(id) => Box::new(crate::capture::webcam::CameraDevice::new(id.as_deref())),
        }
    }
}

/// Parameters for one recording
#[derive(Debug, Clone)]
pub struct RecordOptions {
    pub output: PathBuf,
    pub bitrate: u32,
    pub frame_rate: u32,
    /// Stop on its own after this long
    pub duration: Option<Duration>,
    pub device: DeviceChoice,
}

/// Devices that can be recorded from
pub fn list_devices() -> Vec<DeviceInfo> {
    #[allow(unused_mut)]
    let mut devices = vec![TestPatternDevice::new(PatternConfig::default()).info()];
    #[cfg(feature = "camera")]
    devices.extend(crate::capture::webcam::list_cameras());
    devices
}

/// Record with the FFmpeg encoder until `stop` resolves or the duration
/// elapses
pub async fn record(
    settings: &Settings,
    options: RecordOptions,
    stop: impl Future<Output = ()>,
) -> AppResult<RecordingOutput> {
    let factory = Arc::new(FfmpegEncoderFactory::new(
        settings.ffmpeg_path.clone(),
        &settings.recording,
    ));
    record_with_factory(factory, options, stop).await
}

pub async fn record_with_factory(
    factory: Arc<dyn EncoderFactory>,
    options: RecordOptions,
    stop: impl Future<Output = ()>,
) -> AppResult<RecordingOutput> {
    let session = CaptureSession::new();
    let info = session.configure(options.device.open()).await?;
    tracing::info!(
        "Recording from '{}' to {:?} at {} bps",
        info.name,
        options.output,
        options.bitrate
    );

    let recorder = Arc::new(RecordingSession::new(factory, options.frame_rate));
    session
        .start_recording(&options.output, options.bitrate, recorder)
        .await?;
    session.start_session().await?;

    match options.duration {
        Some(duration) => {
            tokio::select! {
                _ = tokio::time::sleep(duration) => {}
                _ = stop => tracing::info!("Recording interrupted"),
            }
        }
        None => stop.await,
    }

    let stopped = session.stop_session().await;
    let output = session.stop_recording().await?;
    if let Err(e) = stopped {
        tracing::warn!("Capture device did not stop cleanly: {}", e);
    }
    Ok(output)
}

/// Default test pattern for `record` when no size is given
pub fn pattern(resolution: Option<Resolution>, fps: u32, warmup_frames: u32) -> DeviceChoice {
    let defaults = PatternConfig::default();
    DeviceChoice::Pattern(PatternConfig {
        resolution: resolution.unwrap_or(defaults.resolution),
        fps,
        warmup_frames,
        ..defaults
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::recorder::testing::MockEncoderFactory;

    #[tokio::test]
    async fn test_record_pattern_for_fixed_duration() {
        let dir = tempfile::tempdir().unwrap();
        let factory = Arc::new(MockEncoderFactory::default());
        let options = RecordOptions {
            output: dir.path().join("nested").join("take.mp4"),
            bitrate: 6_000_000,
            frame_rate: 50,
            duration: Some(Duration::from_millis(200)),
            device: pattern(Some(Resolution::new(16, 16)), 50, 2),
        };

        let output = record_with_factory(factory.clone(), options, std::future::pending())
            .await
            .unwrap();

        assert!(output.finalized);
        assert_eq!(output.path, Some(dir.path().join("nested").join("take.mp4")));
        assert_eq!(output.resolution, Some(Resolution::new(16, 16)));
        assert_eq!(output.frames.dropped_no_geometry, 2);
        assert!(output.frames.encoded > 0);
        assert_eq!(factory.created().len(), 1);
    }

    #[tokio::test]
    async fn test_record_stops_on_signal() {
        let dir = tempfile::tempdir().unwrap();
        let factory = Arc::new(MockEncoderFactory::default());
        let options = RecordOptions {
            output: dir.path().join("take.mp4"),
            bitrate: 6_000_000,
            frame_rate: 30,
            duration: None,
            device: pattern(Some(Resolution::new(8, 8)), 100, 0),
        };

        let stop = tokio::time::sleep(Duration::from_millis(100));
        let output = record_with_factory(factory, options, stop).await.unwrap();
        assert!(output.path.is_some());
    }

    #[test]
    fn test_list_devices_includes_pattern() {
        assert!(list_devices().iter().any(|d| d.id == "test-pattern"));
    }
}
