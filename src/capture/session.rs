//! Capture session
//!
//! Owns the device binding. Device configuration and run-state changes are
//! serialized through a single control task; callers talk to it over an mpsc
//! queue and wait on a oneshot reply. Recorder hand-over goes through the
//! same queue, so a stop can never overtake the start it follows. Frames
//! bypass the queue entirely and go from the device's delivery thread
//! straight into the active recorder.

use super::frame::Frame;
use super::traits::{CaptureDevice, DeviceInfo, Resolution};
use crate::recorder::{RecordingError, RecordingOutput, RecordingSession};
use parking_lot::RwLock;
use std::path::PathBuf;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::Arc;
use thiserror::Error;
use tokio::sync::{mpsc, oneshot};

/// Capture errors
#[derive(Error, Debug)]
pub enum CaptureError {
    #[error("Device not found: {0}")]
    DeviceNotFound(String),

    #[error("Configuration error: {0}")]
    Configuration(String),

    #[error("No capture device configured")]
    NotConfigured,

    #[error("Device error: {0}")]
    Device(String),

    #[error("Capture control task has stopped")]
    ControlClosed,

    #[error(transparent)]
    Recording(#[from] RecordingError),
}

type ActiveRecorder = Arc<RwLock<Option<Arc<RecordingSession>>>>;

/// Delivery endpoint handed to a device.
///
/// Cheap to clone; every clone forwards into whatever recorder is active at
/// the moment a frame arrives.
#[derive(Clone)]
pub struct FrameSink {
    target: ActiveRecorder,
    delivered: Arc<AtomicU64>,
    running: Arc<AtomicBool>,
}

impl FrameSink {
    /// Forward one frame. Called on the device's delivery thread.
    pub fn deliver(&self, frame: Frame) {
        self.delivered.fetch_add(1, Ordering::Relaxed);
        // Clone out so the lock is not held while the recorder encodes
        let recorder = self.target.read().clone();
        if let Some(recorder) = recorder {
            recorder.append(frame);
        }
    }

    /// Frames delivered since the sink was created
    pub fn delivered(&self) -> u64 {
        self.delivered.load(Ordering::Relaxed)
    }

    /// Called by a device whose stream ended on its own. The session is
    /// marked stopped so a later `start_session` restarts the device.
    pub fn stream_ended(&self) {
        if self.running.swap(false, Ordering::SeqCst) {
            tracing::warn!("Capture stream ended unexpectedly");
        }
    }
}

enum ControlRequest {
    Configure {
        device: Box<dyn CaptureDevice>,
        reply: oneshot::Sender<Result<DeviceInfo, CaptureError>>,
    },
    Start {
        reply: oneshot::Sender<Result<(), CaptureError>>,
    },
    Stop {
        reply: oneshot::Sender<Result<(), CaptureError>>,
    },
    StartRecording {
        destination: PathBuf,
        bitrate: u32,
        recorder: Arc<RecordingSession>,
        reply: oneshot::Sender<Result<(), CaptureError>>,
    },
    StopRecording {
        reply: oneshot::Sender<Result<RecordingOutput, CaptureError>>,
    },
}

/// Device binding plus the recorder currently receiving its frames
pub struct CaptureSession {
    control: mpsc::Sender<ControlRequest>,
    sink: FrameSink,
    detected: Arc<RwLock<Option<Resolution>>>,
}

impl CaptureSession {
    /// Create a session and spawn its control task.
    ///
    /// Must be called from within a tokio runtime.
    pub fn new() -> Self {
        let (control, requests) = mpsc::channel(16);
        let sink = FrameSink {
            target: Arc::new(RwLock::new(None)),
            delivered: Arc::new(AtomicU64::new(0)),
            running: Arc::new(AtomicBool::new(false)),
        };
        let detected = Arc::new(RwLock::new(None));

        tokio::spawn(control_loop(requests, sink.clone(), detected.clone()));

        Self {
            control,
            sink,
            detected,
        }
    }

    async fn request<T>(
        &self,
        make: impl FnOnce(oneshot::Sender<Result<T, CaptureError>>) -> ControlRequest,
    ) -> Result<T, CaptureError> {
        let (reply, response) = oneshot::channel();
        self.control
            .send(make(reply))
            .await
            .map_err(|_| CaptureError::ControlClosed)?;
        response.await.map_err(|_| CaptureError::ControlClosed)?
    }

    /// Bind `device`, replacing (and stopping) any previous one.
    ///
    /// The session is left stopped; call [`start_session`](Self::start_session)
    /// to begin streaming.
    pub async fn configure(&self, device: Box<dyn CaptureDevice>) -> Result<DeviceInfo, CaptureError> {
        self.request(|reply| ControlRequest::Configure { device, reply })
            .await
    }

    /// Start streaming. No-op if already running.
    pub async fn start_session(&self) -> Result<(), CaptureError> {
        self.request(|reply| ControlRequest::Start { reply }).await
    }

    /// Stop streaming. No-op if not running.
    pub async fn stop_session(&self) -> Result<(), CaptureError> {
        self.request(|reply| ControlRequest::Stop { reply }).await
    }

    pub fn is_running(&self) -> bool {
        self.sink.running.load(Ordering::SeqCst)
    }

    /// Geometry the device reported when it was configured. Informational.
    pub fn detected_resolution(&self) -> Option<Resolution> {
        *self.detected.read()
    }

    /// Frames delivered by the device so far
    pub fn frames_delivered(&self) -> u64 {
        self.sink.delivered()
    }

    /// Start `recorder` and route delivered frames into it.
    ///
    /// A previously active recorder is stopped first.
    pub async fn start_recording(
        &self,
        destination: impl Into<PathBuf>,
        bitrate: u32,
        recorder: Arc<RecordingSession>,
    ) -> Result<(), CaptureError> {
        let destination = destination.into();
        self.request(|reply| ControlRequest::StartRecording {
            destination,
            bitrate,
            recorder,
            reply,
        })
        .await
    }

    /// Detach the active recorder and finalize it
    pub async fn stop_recording(&self) -> Result<RecordingOutput, CaptureError> {
        self.request(|reply| ControlRequest::StopRecording { reply })
            .await
    }
}

impl Default for CaptureSession {
    fn default() -> Self {
        Self::new()
    }
}

/// The control queue. Owns the device for its whole lifetime; the device is
/// stopped when every `CaptureSession` handle is gone.
async fn control_loop(
    mut requests: mpsc::Receiver<ControlRequest>,
    sink: FrameSink,
    detected: Arc<RwLock<Option<Resolution>>>,
) {
    let running = sink.running.clone();
    let mut device: Option<Box<dyn CaptureDevice>> = None;

    while let Some(request) = requests.recv().await {
        match request {
            ControlRequest::Configure {
                device: mut next,
                reply,
            } => {
                if let Some(mut previous) = device.take() {
                    if running.swap(false, Ordering::SeqCst) {
                        if let Err(e) = previous.stop_streaming() {
                            tracing::warn!("Failed to stop previous device: {}", e);
                        }
                    }
                }
                *detected.write() = None;

                let result = bind(next.as_mut(), sink.clone()).map(|info| {
                    *detected.write() = info.reported_resolution.filter(Resolution::is_valid);
                    device = Some(next);
                    info
                });
                match &result {
                    Ok(info) => tracing::info!(
                        "Configured capture device '{}' (reported {:?})",
                        info.name,
                        info.reported_resolution
                    ),
                    Err(e) => tracing::error!("Failed to configure capture device: {}", e),
                }
                let _ = reply.send(result);
            }
            ControlRequest::Start { reply } => {
                let result = match device.as_mut() {
                    None => Err(CaptureError::NotConfigured),
                    Some(_) if running.load(Ordering::SeqCst) => Ok(()),
                    Some(device) => device.start_streaming().map(|()| {
                        running.store(true, Ordering::SeqCst);
                        tracing::info!("Capture session started");
                    }),
                };
                let _ = reply.send(result);
            }
            ControlRequest::Stop { reply } => {
                let result = match device.as_mut() {
                    Some(device) if running.load(Ordering::SeqCst) => {
                        running.store(false, Ordering::SeqCst);
                        tracing::info!("Capture session stopped");
                        device.stop_streaming()
                    }
                    _ => Ok(()),
                };
                let _ = reply.send(result);
            }
            ControlRequest::StartRecording {
                destination,
                bitrate,
                recorder,
                reply,
            } => {
                let result = attach_recorder(&sink, destination, bitrate, recorder).await;
                let _ = reply.send(result);
            }
            ControlRequest::StopRecording { reply } => {
                let _ = reply.send(detach_recorder(&sink).await);
            }
        }
    }

    if let Some(mut device) = device {
        if running.swap(false, Ordering::SeqCst) {
            let _ = device.stop_streaming();
        }
    }
    tracing::debug!("Capture control task exited");
}

/// Stop whatever recorder is active, then start `recorder` and route frames
/// into it
async fn attach_recorder(
    sink: &FrameSink,
    destination: PathBuf,
    bitrate: u32,
    recorder: Arc<RecordingSession>,
) -> Result<(), CaptureError> {
    let previous = sink.target.write().take();
    if let Some(previous) = previous {
        tracing::info!("Stopping previously active recording");
        if let Err(e) = previous.stop().await {
            tracing::warn!("Previous recording did not stop cleanly: {}", e);
        }
    }

    recorder.start(destination, bitrate).await?;
    *sink.target.write() = Some(recorder);
    Ok(())
}

async fn detach_recorder(sink: &FrameSink) -> Result<RecordingOutput, CaptureError> {
    let recorder = sink.target.write().take();
    match recorder {
        Some(recorder) => Ok(recorder.stop().await?),
        None => {
            tracing::debug!("stop_recording called with no active recorder");
            Ok(RecordingOutput::default())
        }
    }
}

fn bind(device: &mut dyn CaptureDevice, sink: FrameSink) -> Result<DeviceInfo, CaptureError> {
    device.bind_input()?;
    device.bind_output(sink)?;
    Ok(device.info())
}
