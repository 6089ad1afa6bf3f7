//! Recording session state machine
//!
//! The session binds to nothing until real frames arrive. The first frame
//! carrying usable geometry creates the encoder, anchors the output
//! timeline and moves the session to `Writing`. Everything goes through one
//! mutex, so frames from the delivery thread and control calls from the
//! capture session never interleave inside a transition.

use super::encoder::{EncoderFactory, EncoderSettings, VideoEncoder};
use super::state::{FrameStats, RecordingError, RecordingOutput, RecordingResult, RecordingState};
use crate::capture::frame::Frame;
use crate::capture::traits::Resolution;
use chrono::{DateTime, Utc};
use parking_lot::Mutex;
use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;

/// Encoder plus the timeline it was opened on
struct ActiveEncoder {
    encoder: Box<dyn VideoEncoder>,
    anchor: Duration,
    last_pts: Duration,
}

/// The encoder only exists inside `Writing`.
enum Stage {
    Idle,
    PendingFirstFrame,
    Writing(ActiveEncoder),
    Finalizing,
    Finished,
    Failed(String),
}

impl Stage {
    fn state(&self) -> RecordingState {
        match self {
            Stage::Idle => RecordingState::Idle,
            Stage::PendingFirstFrame => RecordingState::PendingFirstFrame,
            Stage::Writing(_) => RecordingState::Writing,
            Stage::Finalizing => RecordingState::Finalizing,
            Stage::Finished => RecordingState::Finished,
            Stage::Failed(_) => RecordingState::Failed,
        }
    }
}

struct Inner {
    stage: Stage,
    /// Bumped on every start so a late finalize cannot clobber a newer session
    generation: u64,
    destination: Option<PathBuf>,
    bitrate: u32,
    detected: Option<Resolution>,
    anchor: Option<Duration>,
    stats: FrameStats,
    started_at: Option<DateTime<Utc>>,
}

impl Inner {
    fn output(&self, path: Option<PathBuf>, finalized: bool, duration: Duration) -> RecordingOutput {
        RecordingOutput {
            path,
            finalized,
            resolution: self.detected,
            duration_ms: duration.as_secs_f64() * 1000.0,
            frames: self.stats,
            started_at: self.started_at,
        }
    }
}

/// A single recording with a lazily created encoder
pub struct RecordingSession {
    inner: Mutex<Inner>,
    factory: Arc<dyn EncoderFactory>,
    frame_rate: u32,
}

impl RecordingSession {
    pub fn new(factory: Arc<dyn EncoderFactory>, frame_rate: u32) -> Self {
        Self {
            inner: Mutex::new(Inner {
                stage: Stage::Idle,
                generation: 0,
                destination: None,
                bitrate: 0,
                detected: None,
                anchor: None,
                stats: FrameStats::default(),
                started_at: None,
            }),
            factory,
            frame_rate,
        }
    }

    /// Current state
    pub fn state(&self) -> RecordingState {
        self.inner.lock().stage.state()
    }

    /// Geometry observed on the first accepted frame
    pub fn detected_resolution(&self) -> Option<Resolution> {
        self.inner.lock().detected
    }

    /// Device timestamp that maps to time zero in the output
    pub fn anchor(&self) -> Option<Duration> {
        self.inner.lock().anchor
    }

    pub fn stats(&self) -> FrameStats {
        self.inner.lock().stats
    }

    /// Start (or restart) the session towards `destination`.
    ///
    /// No encoder is created here; the first usable frame does that.
    pub async fn start(&self, destination: impl Into<PathBuf>, bitrate: u32) -> RecordingResult<()> {
        let destination = destination.into();

        if self.state() == RecordingState::Writing {
            tracing::info!("Restarting recording; stopping the current one first");
            if let Err(e) = self.stop().await {
                tracing::warn!("Implicit stop before restart failed: {}", e);
            }
        }

        if let Some(parent) = destination.parent() {
            if !parent.as_os_str().is_empty() {
                std::fs::create_dir_all(parent)?;
            }
        }

        let mut inner = self.inner.lock();
        inner.generation += 1;
        inner.stage = Stage::PendingFirstFrame;
        inner.destination = Some(destination);
        inner.bitrate = bitrate;
        inner.detected = None;
        inner.anchor = None;
        inner.stats = FrameStats::default();
        inner.started_at = Some(Utc::now());

        tracing::info!(
            "Recording started (bitrate {}), waiting for first frame: {:?}",
            bitrate,
            inner.destination
        );
        Ok(())
    }

    /// Feed one frame. Never blocks on the encoder and never fails; frames
    /// that cannot be used are dropped and counted.
    pub fn append(&self, frame: Frame) {
        let mut inner = self.inner.lock();
        let inner = &mut *inner;

        match &mut inner.stage {
            Stage::PendingFirstFrame => {
                let Some(resolution) = frame.resolution() else {
                    inner.stats.dropped_no_geometry += 1;
                    tracing::debug!("Dropping frame at {:?}: geometry not known yet", frame.pts());
                    return;
                };
                let Some(layout) = frame.layout() else {
                    return;
                };
                let Some(destination) = inner.destination.clone() else {
                    return;
                };

                let settings = EncoderSettings {
                    destination,
                    resolution,
                    pixel_format: layout.format,
                    bitrate: inner.bitrate,
                    frame_rate: self.frame_rate,
                };
                let mut encoder = match self.factory.create(&settings) {
                    Ok(encoder) => encoder,
                    Err(e) => {
                        tracing::error!("Failed to create encoder for {}: {}", resolution, e);
                        inner.stage = Stage::Failed(e.to_string());
                        return;
                    }
                };

                let anchor = frame.pts();
                encoder.begin_session(anchor);
                if let Err(e) = encoder.append(&frame, Duration::ZERO) {
                    tracing::error!("Encoder rejected the first frame: {}", e);
                    inner.stage = Stage::Failed(e.to_string());
                    return;
                }

                tracing::info!(
                    "First frame {} ({:?}) anchors the recording at {:?}",
                    resolution,
                    layout.format,
                    anchor
                );
                inner.detected = Some(resolution);
                inner.anchor = Some(anchor);
                inner.stats.encoded += 1;
                inner.stage = Stage::Writing(ActiveEncoder {
                    encoder,
                    anchor,
                    last_pts: anchor,
                });
            }
            Stage::Writing(active) => {
                if frame.resolution() != inner.detected {
                    inner.stats.dropped_mismatch += 1;
                    tracing::debug!(
                        "Dropping frame at {:?}: geometry {:?} differs from {:?}",
                        frame.pts(),
                        frame.resolution(),
                        inner.detected
                    );
                    return;
                }
                if !active.encoder.is_ready_for_more() {
                    inner.stats.dropped_backpressure += 1;
                    tracing::debug!("Dropping frame at {:?}: encoder busy", frame.pts());
                    return;
                }

                let at = frame.pts().saturating_sub(active.anchor);
                match active.encoder.append(&frame, at) {
                    Ok(()) => {
                        inner.stats.encoded += 1;
                        active.last_pts = active.last_pts.max(frame.pts());
                    }
                    Err(e) => {
                        tracing::error!("Encoder failed while writing: {}", e);
                        inner.stage = Stage::Failed(e.to_string());
                    }
                }
            }
            _ => {}
        }
    }

    /// Stop the session, waiting for the container to be finalized if
    /// anything was written.
    pub async fn stop(&self) -> RecordingResult<RecordingOutput> {
        // Snapshot before finalizing; a racing `start` resets the live counters
        let (mut active, generation, mut report) = {
            let mut inner = self.inner.lock();
            match std::mem::replace(&mut inner.stage, Stage::Finalizing) {
                Stage::Writing(active) => {
                    let duration = active.last_pts.saturating_sub(active.anchor);
                    let report = inner.output(None, true, duration);
                    (active, inner.generation, report)
                }
                Stage::PendingFirstFrame => {
                    inner.stage = Stage::Finished;
                    tracing::info!(
                        "Recording stopped before any usable frame ({} dropped)",
                        inner.stats.dropped_no_geometry
                    );
                    let path = inner.destination.clone();
                    return Ok(inner.output(path, false, Duration::ZERO));
                }
                Stage::Idle => {
                    inner.stage = Stage::Idle;
                    return Ok(RecordingOutput::default());
                }
                Stage::Finished => {
                    inner.stage = Stage::Finished;
                    return Ok(RecordingOutput::default());
                }
                Stage::Finalizing => return Err(RecordingError::AlreadyFinalizing),
                Stage::Failed(reason) => {
                    inner.stage = Stage::Failed(reason.clone());
                    return Err(RecordingError::Failed(reason));
                }
            }
        };

        let result = active.encoder.finish().await;
        let written = active.encoder.frames_written();

        let mut inner = self.inner.lock();
        let current = inner.generation == generation;
        let stats = report.frames;
        if stats.dropped_backpressure > 0 {
            tracing::warn!(
                "Recording lost {} of {} frames to encoder back-pressure",
                stats.dropped_backpressure,
                stats.encoded + stats.dropped_backpressure
            );
        }

        match result {
            Ok(path) => {
                if current {
                    inner.stage = Stage::Finished;
                }
                tracing::info!(
                    "Recording finalized: {} ({} frames accepted, {} queued to the encoder, {:.3}s)",
                    path.display(),
                    stats.encoded,
                    written,
                    report.duration_ms / 1000.0
                );
                report.path = Some(path);
                Ok(report)
            }
            Err(e) => {
                tracing::error!("Failed to finalize recording: {}", e);
                if current {
                    inner.stage = Stage::Failed(e.to_string());
                }
                Err(RecordingError::Encoder(e))
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::capture::frame::{PixelFormat, PixelLayout};
    use crate::recorder::testing::{MockEncoderFactory, MockEncoderLog};

    fn frame(secs: f64, width: u32, height: u32) -> Frame {
        let layout = PixelLayout::new(width, height, PixelFormat::Bgra);
        let size = if width > 0 && height > 0 {
            PixelFormat::Bgra.frame_size(layout.resolution)
        } else {
            16
        };
        Frame::new(Duration::from_secs_f64(secs), Some(layout), vec![0u8; size])
    }

    fn bare_frame(secs: f64) -> Frame {
        Frame::new(Duration::from_secs_f64(secs), None, vec![0u8; 16])
    }

    fn session(factory: &Arc<MockEncoderFactory>) -> RecordingSession {
        RecordingSession::new(factory.clone(), 30)
    }

    #[tokio::test]
    async fn test_start_does_not_create_encoder() {
        let dir = tempfile::tempdir().unwrap();
        let factory = Arc::new(MockEncoderFactory::default());
        let session = session(&factory);

        session.start(dir.path().join("out.mp4"), 6_000_000).await.unwrap();

        assert_eq!(session.state(), RecordingState::PendingFirstFrame);
        assert_eq!(factory.created().len(), 0);
    }

    #[tokio::test]
    async fn test_first_valid_frame_creates_encoder_once() {
        let dir = tempfile::tempdir().unwrap();
        let factory = Arc::new(MockEncoderFactory::default());
        let session = session(&factory);
        session.start(dir.path().join("out.mp4"), 6_000_000).await.unwrap();

        session.append(frame(1.0, 640, 480));
        session.append(frame(1.1, 640, 480));
        session.append(frame(1.2, 640, 480));

        assert_eq!(session.state(), RecordingState::Writing);
        let created = factory.created();
        assert_eq!(created.len(), 1);
        assert_eq!(created[0].resolution, Resolution::new(640, 480));
        assert_eq!(created[0].bitrate, 6_000_000);
        assert_eq!(session.detected_resolution(), Some(Resolution::new(640, 480)));
    }

    #[tokio::test]
    async fn test_frames_without_geometry_are_dropped() {
        let dir = tempfile::tempdir().unwrap();
        let factory = Arc::new(MockEncoderFactory::default());
        let session = session(&factory);
        session.start(dir.path().join("out.mp4"), 6_000_000).await.unwrap();

        session.append(bare_frame(0.0));
        session.append(frame(0.1, 0, 0));
        session.append(frame(0.2, 1920, 0));

        assert_eq!(session.state(), RecordingState::PendingFirstFrame);
        assert_eq!(factory.created().len(), 0);
        assert_eq!(session.stats().dropped_no_geometry, 3);
    }

    #[tokio::test]
    async fn test_output_timeline_is_anchored_to_first_frame() {
        let dir = tempfile::tempdir().unwrap();
        let factory = Arc::new(MockEncoderFactory::default());
        let session = session(&factory);
        session.start(dir.path().join("out.mp4"), 6_000_000).await.unwrap();

        session.append(bare_frame(4.9));
        session.append(frame(5.0, 1920, 1080));
        session.append(frame(5.033, 1920, 1080));
        session.append(frame(5.066, 1920, 1080));

        let log: MockEncoderLog = factory.log(0);
        assert_eq!(log.anchor, Some(Duration::from_secs_f64(5.0)));
        assert_eq!(log.times[0], Duration::ZERO);
        assert!((log.times[1].as_secs_f64() - 0.033).abs() < 1e-6);
        assert!((log.times[2].as_secs_f64() - 0.066).abs() < 1e-6);
        assert_eq!(session.anchor(), Some(Duration::from_secs_f64(5.0)));
    }

    #[tokio::test]
    async fn test_end_to_end_three_frames() {
        let dir = tempfile::tempdir().unwrap();
        let factory = Arc::new(MockEncoderFactory::default());
        let session = session(&factory);
        let destination = dir.path().join("clip.mp4");
        session.start(&destination, 6_000_000).await.unwrap();

        for t in [5.0, 5.033, 5.066] {
            session.append(frame(t, 1920, 1080));
        }
        let output = session.stop().await.unwrap();

        assert_eq!(output.path.as_deref(), Some(destination.as_path()));
        assert!(output.finalized);
        assert!((output.duration_ms - 66.0).abs() < 0.01);
        assert_eq!(output.frames.encoded, 3);
        assert_eq!(output.resolution, Some(Resolution::new(1920, 1080)));
        assert_eq!(factory.log(0).times[0], Duration::ZERO);
        assert_eq!(session.state(), RecordingState::Finished);
        assert!(destination.exists());
    }

    #[tokio::test]
    async fn test_stop_before_first_frame_is_clean() {
        let dir = tempfile::tempdir().unwrap();
        let factory = Arc::new(MockEncoderFactory::default());
        let session = session(&factory);
        let destination = dir.path().join("out.mp4");
        session.start(&destination, 6_000_000).await.unwrap();
        session.append(bare_frame(0.0));

        let output = session.stop().await.unwrap();

        assert!(!output.finalized);
        assert_eq!(output.path, Some(destination));
        assert_eq!(session.state(), RecordingState::Finished);
        assert_eq!(factory.created().len(), 0);
    }

    #[tokio::test]
    async fn test_stop_reports_location_once() {
        let dir = tempfile::tempdir().unwrap();
        let factory = Arc::new(MockEncoderFactory::default());
        let session = session(&factory);
        session.start(dir.path().join("out.mp4"), 6_000_000).await.unwrap();
        session.append(frame(0.0, 64, 64));

        let first = session.stop().await.unwrap();
        let second = session.stop().await.unwrap();

        assert!(first.path.is_some());
        assert!(second.path.is_none());
    }

    #[tokio::test]
    async fn test_stop_without_start_is_empty() {
        let factory = Arc::new(MockEncoderFactory::default());
        let session = session(&factory);
        let output = session.stop().await.unwrap();
        assert!(output.path.is_none());
        assert_eq!(session.state(), RecordingState::Idle);
    }

    #[tokio::test]
    async fn test_encoder_creation_failure_is_absorbing() {
        let dir = tempfile::tempdir().unwrap();
        let factory = Arc::new(MockEncoderFactory::failing());
        let session = session(&factory);
        session.start(dir.path().join("out.mp4"), 6_000_000).await.unwrap();

        session.append(frame(0.0, 64, 64));
        assert_eq!(session.state(), RecordingState::Failed);

        session.append(frame(0.1, 64, 64));
        assert_eq!(session.state(), RecordingState::Failed);
        assert!(matches!(session.stop().await, Err(RecordingError::Failed(_))));
    }

    #[tokio::test]
    async fn test_backpressure_drops_frames() {
        let dir = tempfile::tempdir().unwrap();
        let factory = Arc::new(MockEncoderFactory::default());
        let session = session(&factory);
        session.start(dir.path().join("out.mp4"), 6_000_000).await.unwrap();
        session.append(frame(0.0, 64, 64));

        factory.set_ready(false);
        session.append(frame(0.033, 64, 64));
        session.append(frame(0.066, 64, 64));
        factory.set_ready(true);
        session.append(frame(0.1, 64, 64));

        assert_eq!(session.state(), RecordingState::Writing);
        let stats = session.stats();
        assert_eq!(stats.encoded, 2);
        assert_eq!(stats.dropped_backpressure, 2);
        assert_eq!(factory.log(0).times.len(), 2);
    }

    #[tokio::test]
    async fn test_geometry_change_is_dropped() {
        let dir = tempfile::tempdir().unwrap();
        let factory = Arc::new(MockEncoderFactory::default());
        let session = session(&factory);
        session.start(dir.path().join("out.mp4"), 6_000_000).await.unwrap();

        session.append(frame(0.0, 64, 64));
        session.append(frame(0.1, 32, 32));

        assert_eq!(session.stats().dropped_mismatch, 1);
        assert_eq!(session.stats().encoded, 1);
    }

    #[tokio::test]
    async fn test_restart_while_writing_finalizes_previous() {
        let dir = tempfile::tempdir().unwrap();
        let factory = Arc::new(MockEncoderFactory::default());
        let session = session(&factory);
        session.start(dir.path().join("a.mp4"), 6_000_000).await.unwrap();
        session.append(frame(0.0, 64, 64));

        session.start(dir.path().join("b.mp4"), 6_000_000).await.unwrap();

        assert_eq!(session.state(), RecordingState::PendingFirstFrame);
        assert!(factory.log(0).finished);
        assert_eq!(session.detected_resolution(), None);
        assert!(dir.path().join("a.mp4").exists());
    }

    #[tokio::test]
    async fn test_finalize_reports_its_own_recording_when_restarted() {
        let dir = tempfile::tempdir().unwrap();
        let factory = Arc::new(MockEncoderFactory::default());
        factory.set_finish_delay(Duration::from_millis(50));
        let session = session(&factory);
        session.start(dir.path().join("a.mp4"), 6_000_000).await.unwrap();
        session.append(frame(1.0, 4, 4));
        session.append(frame(1.5, 4, 4));

        let (stopped, restarted) = tokio::join!(
            session.stop(),
            session.start(dir.path().join("b.mp4"), 6_000_000)
        );
        restarted.unwrap();
        let output = stopped.unwrap();

        assert_eq!(output.path, Some(dir.path().join("a.mp4")));
        assert_eq!(output.frames.encoded, 2);
        assert_eq!(output.resolution, Some(Resolution::new(4, 4)));
        assert!((output.duration_ms - 500.0).abs() < 1e-6);
        assert_eq!(session.state(), RecordingState::PendingFirstFrame);
        assert_eq!(session.stats().encoded, 0);
    }

    #[tokio::test]
    async fn test_frames_ignored_after_stop() {
        let dir = tempfile::tempdir().unwrap();
        let factory = Arc::new(MockEncoderFactory::default());
        let session = session(&factory);
        session.start(dir.path().join("out.mp4"), 6_000_000).await.unwrap();
        session.append(frame(0.0, 64, 64));
        session.stop().await.unwrap();

        session.append(frame(0.1, 64, 64));
        assert_eq!(factory.log(0).times.len(), 1);
        assert_eq!(factory.created().len(), 1);
    }

    #[tokio::test]
    async fn test_finalize_failure_is_surfaced() {
        let dir = tempfile::tempdir().unwrap();
        let factory = Arc::new(MockEncoderFactory::default());
        factory.fail_finish(true);
        let session = session(&factory);
        session.start(dir.path().join("out.mp4"), 6_000_000).await.unwrap();
        session.append(frame(0.0, 64, 64));

        assert!(matches!(session.stop().await, Err(RecordingError::Encoder(_))));
        assert_eq!(session.state(), RecordingState::Failed);
    }
}
