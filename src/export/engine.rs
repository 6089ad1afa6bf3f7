//! Export engine
//!
//! Runs one trim-and-transcode job at a time. Progress is polled on a fixed
//! interval from the same task that drives the encode, so nothing outlives
//! the job: when the encode finishes, fails or is cancelled, polling stops
//! with it.

use super::ffmpeg::{ProgressCell, RenderPlan, TranscodeBackend};
use super::transform::fill_transform;
use super::types::{ExportError, ExportJob, ExportOutcome, ExportProgress};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tokio::time::MissedTickBehavior;
use uuid::Uuid;

/// Clears the busy flag however the export ends
struct BusyGuard<'a>(&'a AtomicBool);

impl Drop for BusyGuard<'_> {
    fn drop(&mut self) {
        self.0.store(false, Ordering::SeqCst);
    }
}

/// Cloneable handle that cancels whatever export is running
#[derive(Debug, Clone)]
pub struct ExportCanceller(Arc<AtomicBool>);

impl ExportCanceller {
    pub fn cancel(&self) {
        self.0.store(true, Ordering::SeqCst);
    }
}

pub struct ExportEngine {
    backend: Arc<dyn TranscodeBackend>,
    poll_interval: Duration,
    cancel_flag: Arc<AtomicBool>,
    is_exporting: AtomicBool,
}

impl ExportEngine {
    pub fn new(backend: Arc<dyn TranscodeBackend>, poll_interval: Duration) -> Self {
        Self {
            backend,
            poll_interval,
            cancel_flag: Arc::new(AtomicBool::new(false)),
            is_exporting: AtomicBool::new(false),
        }
    }

    pub fn is_exporting(&self) -> bool {
        self.is_exporting.load(Ordering::SeqCst)
    }

    /// Request cancellation of the running export
    pub fn cancel(&self) {
        if self.is_exporting() {
            tracing::info!("Export cancellation requested");
        }
        self.cancel_flag.store(true, Ordering::SeqCst);
    }

    pub fn canceller(&self) -> ExportCanceller {
        ExportCanceller(self.cancel_flag.clone())
    }

    /// Run `job`, reporting progress through `on_progress`.
    ///
    /// Rejected with [`ExportError::AlreadyRunning`] while another export is
    /// in flight on this engine. On any failure the job's output path is
    /// left as it was.
    pub async fn export<F>(&self, job: &ExportJob, mut on_progress: F) -> Result<ExportOutcome, ExportError>
    where
        F: FnMut(ExportProgress) + Send,
    {
        if self
            .is_exporting
            .compare_exchange(false, true, Ordering::SeqCst, Ordering::SeqCst)
            .is_err()
        {
            return Err(ExportError::AlreadyRunning);
        }
        let _busy = BusyGuard(&self.is_exporting);
        self.cancel_flag.store(false, Ordering::SeqCst);

        tracing::info!(
            "Starting export {}: {:?} -> {:?}",
            job.id,
            job.source,
            job.output
        );

        match self.run(job, &mut on_progress).await {
            Ok(outcome) => {
                tracing::info!("Export {} complete: {:?}", job.id, outcome.output);
                on_progress(ExportProgress::complete(job.id));
                Ok(outcome)
            }
            Err(e) => {
                match &e {
                    ExportError::Cancelled => tracing::info!("Export {} cancelled", job.id),
                    e => tracing::error!("Export {} failed: {}", job.id, e),
                }
                on_progress(ExportProgress::error(job.id, e.to_string()));
                Err(e)
            }
        }
    }

    async fn run<F>(&self, job: &ExportJob, on_progress: &mut F) -> Result<ExportOutcome, ExportError>
    where
        F: FnMut(ExportProgress) + Send,
    {
        on_progress(ExportProgress::preparing(job.id));
        job.resolution.validate()?;

        let info = self.backend.probe(&job.source).await?;
        let video = info
            .video
            .as_ref()
            .ok_or_else(|| ExportError::NoVideoTrack(job.source.display().to_string()))?;

        let trim = job.trim.clamped_to(info.duration);
        if trim.length() <= 0.0 {
            return Err(ExportError::InvalidConfig(format!(
                "Source {} has no duration to export",
                job.source.display()
            )));
        }

        let target = job.resolution.resolution();
        let fill = fill_transform(video.natural_size(), video.orientation, job.resolution.size())
            .ok_or_else(|| {
                ExportError::InvalidConfig(format!(
                    "Cannot map {}x{} onto {}",
                    video.width, video.height, target
                ))
            })?;
        tracing::debug!(
            "Export {}: trim {:.3}..{:.3} of {:.3}s, {:?} scale {:.4}, offset ({:.1}, {:.1})",
            job.id,
            trim.start(),
            trim.end(),
            info.duration,
            video.orientation,
            fill.scale,
            fill.tx,
            fill.ty
        );

        let parent = match job.output.parent() {
            Some(p) if !p.as_os_str().is_empty() => p.to_path_buf(),
            _ => std::env::current_dir()?,
        };
        std::fs::create_dir_all(&parent)?;
        let staging = tempfile::Builder::new()
            .prefix(".clipcast-")
            .suffix(".mp4")
            .tempfile_in(&parent)?;

        let mut plan = RenderPlan {
            source: job.source.clone(),
            staging: staging.path().to_path_buf(),
            start: trim.start(),
            duration: trim.length(),
            target,
            fill,
            frame_rate: job.frame_rate.fps(),
            bitrate: job.bitrate.bits_per_second(),
            include_audio: info.has_audio,
        };

        let mut result = self.drive(&plan, job.id, on_progress).await;
        if plan.include_audio && matches!(result, Err(ExportError::Encoding(_) | ExportError::Ffmpeg(_))) {
            if let Err(e) = &result {
                tracing::warn!("Export {} failed with audio ({}); retrying video only", job.id, e);
            }
            plan.include_audio = false;
            result = self.drive(&plan, job.id, on_progress).await;
        }
        result?;

        on_progress(ExportProgress::finalizing(job.id));
        staging.persist(&job.output).map_err(|e| ExportError::Io(e.error))?;

        Ok(ExportOutcome {
            job_id: job.id,
            output: job.output.clone(),
            trim,
            resolution: target,
            included_audio: plan.include_audio,
        })
    }

    /// Run the encode, reporting progress each tick until it finishes or the
    /// cancel flag is seen
    async fn drive<F>(&self, plan: &RenderPlan, job_id: Uuid, on_progress: &mut F) -> Result<(), ExportError>
    where
        F: FnMut(ExportProgress) + Send,
    {
        let progress = ProgressCell::new();
        let transcode = self.backend.transcode(plan, &progress);
        tokio::pin!(transcode);

        let mut ticker = tokio::time::interval(self.poll_interval);
        ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);

        loop {
            tokio::select! {
                result = &mut transcode => return result,
                _ = ticker.tick() => {
                    if self.cancel_flag.load(Ordering::SeqCst) {
                        return Err(ExportError::Cancelled);
                    }
                    on_progress(ExportProgress::encoding(job_id, progress.get()));
                }
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::export::transform::Orientation;
    use crate::export::trim::TrimRange;
    use crate::export::types::{AssetInfo, ExportResolution, ExportStage, VideoTrackInfo};
    use async_trait::async_trait;
    use parking_lot::Mutex;
    use std::path::Path;

    struct MockBackend {
        info: AssetInfo,
        steps: u32,
        step: Duration,
        fail: bool,
        fail_with_audio: bool,
        plans: Mutex<Vec<RenderPlan>>,
    }

    impl MockBackend {
        fn new(info: AssetInfo) -> Self {
            Self {
                info,
                steps: 5,
                step: Duration::from_millis(5),
                fail: false,
                fail_with_audio: false,
                plans: Mutex::new(Vec::new()),
            }
        }
    }

    #[async_trait]
    impl TranscodeBackend for MockBackend {
        async fn probe(&self, _source: &Path) -> Result<AssetInfo, ExportError> {
            Ok(self.info.clone())
        }

        async fn transcode(&self, plan: &RenderPlan, progress: &ProgressCell) -> Result<(), ExportError> {
            self.plans.lock().push(plan.clone());
            std::fs::write(&plan.staging, b"partial")?;
            for i in 1..=self.steps {
                tokio::time::sleep(self.step).await;
                progress.set(i as f64 / self.steps as f64);
            }
            if self.fail || (self.fail_with_audio && plan.include_audio) {
                return Err(ExportError::Encoding("mock encoder failed".to_string()));
            }
            std::fs::write(&plan.staging, b"exported")?;
            Ok(())
        }
    }

    fn video_info(duration: f64, has_audio: bool) -> AssetInfo {
        AssetInfo {
            duration,
            video: Some(VideoTrackInfo {
                width: 1080,
                height: 1920,
                orientation: Orientation::Up,
                frame_rate: 30.0,
                codec: "h264".to_string(),
            }),
            has_audio,
        }
    }

    fn engine(backend: MockBackend) -> (Arc<ExportEngine>, Arc<MockBackend>) {
        let backend = Arc::new(backend);
        let engine = Arc::new(ExportEngine::new(backend.clone(), Duration::from_millis(5)));
        (engine, backend)
    }

    fn job(dir: &Path, trim: TrimRange) -> ExportJob {
        let mut job = ExportJob::new(dir.join("source.mp4"), dir.join("out").join("clip.mp4"), trim);
        job.resolution = ExportResolution::Display67;
        job
    }

    fn entries(dir: &Path) -> usize {
        std::fs::read_dir(dir).map(|d| d.count()).unwrap_or(0)
    }

    #[tokio::test]
    async fn test_successful_export_promotes_output() {
        let dir = tempfile::tempdir().unwrap();
        let (engine, backend) = engine(MockBackend::new(video_info(10.0, false)));
        let job = job(dir.path(), TrimRange::with_bounds(2.0, 100.0, 100.0));

        let mut events = Vec::new();
        let outcome = engine.export(&job, |p| events.push(p)).await.unwrap();

        assert_eq!(std::fs::read(&job.output).unwrap(), b"exported");
        assert_eq!(entries(&dir.path().join("out")), 1);
        assert_eq!(outcome.trim.start(), 2.0);
        assert_eq!(outcome.trim.end(), 10.0);
        assert!(!outcome.included_audio);

        let plan = backend.plans.lock()[0].clone();
        assert_eq!(plan.start, 2.0);
        assert_eq!(plan.duration, 8.0);
        assert_eq!(plan.target.width, 1290);
        assert_eq!(plan.frame_rate, 30);
        assert!((plan.fill.tx - -141.375).abs() < 1e-6);

        assert!(events.iter().all(|p| (0.0..=1.0).contains(&p.fraction)));
        assert_eq!(events.first().unwrap().stage, ExportStage::Preparing);
        assert_eq!(events.last().unwrap().stage, ExportStage::Complete);
        assert!(!engine.is_exporting());
    }

    #[tokio::test]
    async fn test_missing_video_track_fails() {
        let dir = tempfile::tempdir().unwrap();
        let info = AssetInfo {
            duration: 5.0,
            video: None,
            has_audio: true,
        };
        let (engine, backend) = engine(MockBackend::new(info));
        let job = job(dir.path(), TrimRange::new(5.0));

        let result = engine.export(&job, |_| {}).await;

        assert!(matches!(result, Err(ExportError::NoVideoTrack(_))));
        assert!(backend.plans.lock().is_empty());
        assert!(!job.output.exists());
    }

    #[tokio::test]
    async fn test_failure_leaves_previous_output() {
        let dir = tempfile::tempdir().unwrap();
        let mut backend = MockBackend::new(video_info(5.0, false));
        backend.fail = true;
        let (engine, _) = engine(backend);
        let job = job(dir.path(), TrimRange::new(5.0));
        std::fs::create_dir_all(job.output.parent().unwrap()).unwrap();
        std::fs::write(&job.output, b"previous").unwrap();

        let mut last = None;
        let result = engine.export(&job, |p| last = Some(p)).await;

        assert!(matches!(result, Err(ExportError::Encoding(_))));
        assert_eq!(std::fs::read(&job.output).unwrap(), b"previous");
        assert_eq!(entries(&dir.path().join("out")), 1);
        assert!(matches!(last.unwrap().stage, ExportStage::Error { .. }));
    }

    #[tokio::test]
    async fn test_audio_failure_falls_back_to_video_only() {
        let dir = tempfile::tempdir().unwrap();
        let mut backend = MockBackend::new(video_info(5.0, true));
        backend.fail_with_audio = true;
        let (engine, backend) = engine(backend);
        let job = job(dir.path(), TrimRange::new(5.0));

        let outcome = engine.export(&job, |_| {}).await.unwrap();

        assert!(!outcome.included_audio);
        let plans = backend.plans.lock();
        assert_eq!(plans.len(), 2);
        assert!(plans[0].include_audio);
        assert!(!plans[1].include_audio);
    }

    #[tokio::test]
    async fn test_concurrent_export_is_rejected() {
        let dir = tempfile::tempdir().unwrap();
        let mut backend = MockBackend::new(video_info(5.0, false));
        backend.steps = 20;
        let (engine, _) = engine(backend);
        let job = job(dir.path(), TrimRange::new(5.0));

        let running = {
            let engine = engine.clone();
            let job = job.clone();
            tokio::spawn(async move { engine.export(&job, |_| {}).await })
        };
        while !engine.is_exporting() {
            tokio::time::sleep(Duration::from_millis(1)).await;
        }

        let second = engine.export(&job, |_| {}).await;
        assert!(matches!(second, Err(ExportError::AlreadyRunning)));

        running.await.unwrap().unwrap();
        assert!(!engine.is_exporting());
        engine.export(&job, |_| {}).await.unwrap();
    }

    #[tokio::test]
    async fn test_cancel_stops_export() {
        let dir = tempfile::tempdir().unwrap();
        let mut backend = MockBackend::new(video_info(5.0, false));
        backend.steps = 200;
        let (engine, _) = engine(backend);
        let job = job(dir.path(), TrimRange::new(5.0));

        let running = {
            let engine = engine.clone();
            let job = job.clone();
            tokio::spawn(async move { engine.export(&job, |_| {}).await })
        };
        while !engine.is_exporting() {
            tokio::time::sleep(Duration::from_millis(1)).await;
        }
        tokio::time::sleep(Duration::from_millis(20)).await;
        engine.canceller().cancel();

        let result = running.await.unwrap();
        assert!(matches!(result, Err(ExportError::Cancelled)));
        assert!(!job.output.exists());
        assert_eq!(entries(&dir.path().join("out")), 0);
        assert!(!engine.is_exporting());
    }

    #[tokio::test]
    async fn test_invalid_custom_size_rejected() {
        let dir = tempfile::tempdir().unwrap();
        let (engine, _) = engine(MockBackend::new(video_info(5.0, false)));
        let mut job = job(dir.path(), TrimRange::new(5.0));
        job.resolution = ExportResolution::Custom {
            width: 1081,
            height: 1920,
        };

        let result = engine.export(&job, |_| {}).await;
        assert!(matches!(result, Err(ExportError::InvalidConfig(_))));
    }
}
