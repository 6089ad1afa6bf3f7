//! FFmpeg-backed recording encoder
//!
//! Raw frames are piped to an `ffmpeg` child process over stdin. A writer
//! thread owns the process and drains a bounded queue, which is what gives
//! the session its "ready for more" back-pressure signal. A second thread
//! drains stderr so a chatty FFmpeg can never stall on a full pipe.

use super::encoder::{EncoderError, EncoderFactory, EncoderSettings, VideoEncoder};
use crate::capture::frame::Frame;
use crate::config::RecordingDefaults;
use async_trait::async_trait;
use std::io::{Read, Write};
use std::path::{Path, PathBuf};
use std::process::{Child, ChildStderr, Command, Stdio};
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::mpsc::{self, Receiver, SyncSender, TrySendError};
use std::sync::Arc;
use std::thread::JoinHandle;
use std::time::Duration;
use tokio::sync::oneshot;

/// Gaps longer than this are not back-filled with repeated frames
const MAX_REPEAT: u64 = 300;

/// Factory producing [`FfmpegEncoder`]s
#[derive(Debug, Clone)]
pub struct FfmpegEncoderFactory {
    ffmpeg: PathBuf,
    preset: String,
    queue_depth: usize,
}

impl FfmpegEncoderFactory {
    pub fn new(ffmpeg: impl Into<PathBuf>, defaults: &RecordingDefaults) -> Self {
        Self {
            ffmpeg: ffmpeg.into(),
            preset: defaults.preset.clone(),
            queue_depth: defaults.encoder_queue_depth.max(1),
        }
    }
}

impl EncoderFactory for FfmpegEncoderFactory {
    fn create(&self, settings: &EncoderSettings) -> Result<Box<dyn VideoEncoder>, EncoderError> {
        let encoder = FfmpegEncoder::spawn(&self.ffmpeg, &self.preset, self.queue_depth, settings)?;
        Ok(Box::new(encoder))
    }
}

/// One frame payload written `repeat` times in a row
struct WriteRequest {
    payload: Arc<[u8]>,
    repeat: u64,
}

/// H.264/MP4 encoder driven through an FFmpeg child process
pub struct FfmpegEncoder {
    queue: Option<SyncSender<WriteRequest>>,
    done: Option<oneshot::Receiver<Result<(), EncoderError>>>,
    pending: Arc<AtomicUsize>,
    queue_depth: usize,
    destination: PathBuf,
    frame_rate: u32,
    frame_size: usize,
    /// First output slot not yet written; `None` before the first frame
    next_slot: Option<u64>,
    frames_written: u64,
}

impl FfmpegEncoder {
    fn spawn(
        ffmpeg: &Path,
        preset: &str,
        queue_depth: usize,
        settings: &EncoderSettings,
    ) -> Result<Self, EncoderError> {
        if let Some(parent) = settings.destination.parent() {
            if !parent.as_os_str().is_empty() {
                std::fs::create_dir_all(parent)?;
            }
        }

        let args = encoder_args(settings, preset);
        tracing::info!("Starting FFmpeg encoder: {:?}", args);

        let mut process = Command::new(ffmpeg)
            .args(&args)
            .stdin(Stdio::piped())
            .stdout(Stdio::null())
            .stderr(Stdio::piped())
            .spawn()
            .map_err(|e| EncoderError::Spawn(format!("{}: {}", ffmpeg.display(), e)))?;

        if process.stdin.is_none() {
            let _ = process.kill();
            return Err(EncoderError::Spawn("Failed to capture FFmpeg stdin".to_string()));
        }
        let stderr = match process.stderr.take() {
            Some(stderr) => stderr,
            None => {
                let _ = process.kill();
                return Err(EncoderError::Spawn("Failed to capture FFmpeg stderr".to_string()));
            }
        };
        let errors = std::thread::Builder::new()
            .name("ffmpeg-stderr".to_string())
            .spawn(move || collect_stderr(stderr))?;

        let frame_size = settings.pixel_format.frame_size(settings.resolution);
        let (queue_tx, queue_rx) = mpsc::sync_channel(queue_depth);
        let (done_tx, done_rx) = oneshot::channel();
        let pending = Arc::new(AtomicUsize::new(0));

        let writer_pending = pending.clone();
        std::thread::Builder::new()
            .name("ffmpeg-writer".to_string())
            .spawn(move || {
                let result = drain_queue(process, errors, queue_rx, frame_size, writer_pending);
                let _ = done_tx.send(result);
            })?;

        Ok(Self {
            queue: Some(queue_tx),
            done: Some(done_rx),
            pending,
            queue_depth,
            destination: settings.destination.clone(),
            frame_rate: settings.frame_rate.max(1),
            frame_size,
            next_slot: None,
            frames_written: 0,
        })
    }

    /// Output frame slot for a time measured from the session anchor
    fn slot_for(&self, at: Duration) -> u64 {
        (at.as_secs_f64() * self.frame_rate as f64).round() as u64
    }
}

#[async_trait]
impl VideoEncoder for FfmpegEncoder {
    fn is_ready_for_more(&self) -> bool {
        self.queue.is_some() && self.pending.load(Ordering::Acquire) < self.queue_depth
    }

    fn begin_session(&mut self, anchor: Duration) {
        tracing::debug!("FFmpeg encoder session anchored at {:?}", anchor);
        self.next_slot = None;
    }

    fn append(&mut self, frame: &Frame, at: Duration) -> Result<(), EncoderError> {
        let queue = self
            .queue
            .as_ref()
            .ok_or_else(|| EncoderError::Write("Encoder already finished".to_string()))?;

        if frame.data().len() < self.frame_size {
            return Err(EncoderError::Write(format!(
                "Frame payload is {} bytes, expected {}",
                frame.data().len(),
                self.frame_size
            )));
        }

        let slot = self.slot_for(at);
        let Some(repeat) = repeat_count(slot, self.next_slot) else {
            return Ok(());
        };

        self.pending.fetch_add(1, Ordering::AcqRel);
        match queue.try_send(WriteRequest {
            payload: frame.payload(),
            repeat,
        }) {
            Ok(()) => {
                self.next_slot = Some(match self.next_slot {
                    None => 1,
                    Some(_) => slot + 1,
                });
                self.frames_written += 1;
                Ok(())
            }
            Err(TrySendError::Full(_)) => {
                self.pending.fetch_sub(1, Ordering::AcqRel);
                Err(EncoderError::Write("Encoder queue is full".to_string()))
            }
            Err(TrySendError::Disconnected(_)) => {
                self.pending.fetch_sub(1, Ordering::AcqRel);
                Err(EncoderError::Write("FFmpeg writer has exited".to_string()))
            }
        }
    }

    fn frames_written(&self) -> u64 {
        self.frames_written
    }

    async fn finish(&mut self) -> Result<PathBuf, EncoderError> {
        // Dropping the sender ends the writer loop, which closes stdin.
        drop(self.queue.take());

        let done = self
            .done
            .take()
            .ok_or_else(|| EncoderError::Finalize("Encoder already finished".to_string()))?;

        done.await
            .map_err(|_| EncoderError::Finalize("FFmpeg writer exited without reporting".to_string()))??;

        if !self.destination.exists() {
            return Err(EncoderError::Finalize(format!(
                "FFmpeg produced no file at {}",
                self.destination.display()
            )));
        }

        tracing::info!(
            "FFmpeg encoder finished: {} frames, output: {}",
            self.frames_written,
            self.destination.display()
        );
        Ok(self.destination.clone())
    }
}

/// How many times a frame landing in output `slot` is written.
///
/// Output is constant frame rate: the first frame always takes slot 0, a
/// frame landing in an already written slot is coalesced (`None`), and a gap
/// repeats the frame until it is filled, up to [`MAX_REPEAT`] copies.
fn repeat_count(slot: u64, next_slot: Option<u64>) -> Option<u64> {
    match next_slot {
        None => Some(1),
        Some(next) if slot < next => None,
        Some(next) => Some((slot - next + 1).min(MAX_REPEAT)),
    }
}

fn collect_stderr(mut stderr: ChildStderr) -> String {
    let mut bytes = Vec::new();
    if let Err(e) = stderr.read_to_end(&mut bytes) {
        tracing::debug!("Failed to read FFmpeg stderr: {}", e);
    }
    String::from_utf8_lossy(&bytes).into_owned()
}

/// Writer thread body: feed queued frames to FFmpeg, then wait for it to exit
fn drain_queue(
    mut process: Child,
    errors: JoinHandle<String>,
    queue: Receiver<WriteRequest>,
    frame_size: usize,
    pending: Arc<AtomicUsize>,
) -> Result<(), EncoderError> {
    let mut write_error = None;

    if let Some(mut stdin) = process.stdin.take() {
        while let Ok(request) = queue.recv() {
            if write_error.is_none() {
                let bytes = &request.payload[..frame_size];
                for _ in 0..request.repeat {
                    if let Err(e) = stdin.write_all(bytes) {
                        tracing::error!("Failed to write frame to FFmpeg: {}", e);
                        write_error = Some(e);
                        break;
                    }
                }
            }
            pending.fetch_sub(1, Ordering::AcqRel);
        }
        // stdin dropped here, signalling EOF
    }

    let status = process
        .wait()
        .map_err(|e| EncoderError::Finalize(format!("Failed to wait for FFmpeg: {}", e)))?;
    let stderr = errors.join().unwrap_or_default();

    if !status.success() {
        return Err(EncoderError::Finalize(format!(
            "FFmpeg exited with {}: {}",
            status,
            stderr.trim()
        )));
    }

    match write_error {
        Some(e) => Err(EncoderError::Finalize(format!("Frame pipe broke: {}", e))),
        None => Ok(()),
    }
}

/// FFmpeg arguments for a rawvideo-in, H.264/MP4-out recording
fn encoder_args(settings: &EncoderSettings, preset: &str) -> Vec<String> {
    let fps = settings.frame_rate.max(1);
    vec![
        "-y".to_string(),
        "-hide_banner".to_string(),
        "-nostats".to_string(),
        "-loglevel".to_string(),
        "error".to_string(),
        "-f".to_string(),
        "rawvideo".to_string(),
        "-pixel_format".to_string(),
        settings.pixel_format.ffmpeg_name().to_string(),
        "-video_size".to_string(),
        settings.resolution.to_string(),
        "-framerate".to_string(),
        fps.to_string(),
        "-i".to_string(),
        "-".to_string(),
        "-c:v".to_string(),
        "libx264".to_string(),
        "-preset".to_string(),
        preset.to_string(),
        "-pix_fmt".to_string(),
        "yuv420p".to_string(),
        "-b:v".to_string(),
        settings.bitrate.to_string(),
        "-g".to_string(),
        (fps * 2).to_string(),
        "-movflags".to_string(),
        "+faststart".to_string(),
        settings.destination.to_string_lossy().to_string(),
    ]
}
