//! Export command handlers

use crate::config::Settings;
use crate::export::{
    AssetInfo, ExportBitrate, ExportEngine, ExportFrameRate, ExportJob, ExportOutcome,
    ExportProgress, ExportResolution, FfmpegBackend, TranscodeBackend, TrimRange,
};
use crate::utils::error::AppResult;
use std::future::Future;
use std::path::{Path, PathBuf};
use std::sync::Arc;

/// Parameters for one export
#[derive(Debug, Clone)]
pub struct ExportOptions {
    pub source: PathBuf,
    pub output: PathBuf,
    /// Trim start in seconds
    pub start: f64,
    /// Trim end in seconds; the end of the source when absent
    pub end: Option<f64>,
    pub resolution: ExportResolution,
    pub frame_rate: ExportFrameRate,
    pub bitrate: ExportBitrate,
}

/// Inspect a source asset
pub async fn probe(settings: &Settings, source: &Path) -> AppResult<AssetInfo> {
    let backend = FfmpegBackend::new(settings);
    Ok(backend.probe(source).await?)
}

/// Trim and re-encode with FFmpeg. The export is cancelled if `cancel`
/// resolves first.
pub async fn export<F>(
    settings: &Settings,
    options: ExportOptions,
    on_progress: F,
    cancel: impl Future<Output = ()>,
) -> AppResult<ExportOutcome>
where
    F: FnMut(ExportProgress) + Send,
{
    let backend: Arc<dyn TranscodeBackend> = Arc::new(FfmpegBackend::new(settings));
    let engine = ExportEngine::new(backend, settings.export.poll_interval());
    export_with_engine(&engine, options, on_progress, cancel).await
}

pub async fn export_with_engine<F>(
    engine: &ExportEngine,
    options: ExportOptions,
    on_progress: F,
    cancel: impl Future<Output = ()>,
) -> AppResult<ExportOutcome>
where
    F: FnMut(ExportProgress) + Send,
{
    let job = ExportJob {
        trim: requested_trim(options.start, options.end),
        resolution: options.resolution,
        frame_rate: options.frame_rate,
        bitrate: options.bitrate,
        ..ExportJob::new(options.source, options.output, TrimRange::new(0.0))
    };

    let canceller = engine.canceller();
    let export = engine.export(&job, on_progress);
    tokio::pin!(export);

    let outcome = tokio::select! {
        result = &mut export => result,
        _ = cancel => {
            canceller.cancel();
            export.await
        }
    }?;
    Ok(outcome)
}

/// Trim window before the source duration is known. The engine clamps it to
/// the probed duration.
fn requested_trim(start: f64, end: Option<f64>) -> TrimRange {
    TrimRange::with_bounds(start, end.unwrap_or(f64::MAX), f64::MAX)
}
