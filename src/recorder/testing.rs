//! In-memory encoder used by recorder and capture tests

use super::encoder::{EncoderError, EncoderFactory, EncoderSettings, VideoEncoder};
use crate::capture::frame::Frame;
use async_trait::async_trait;
use parking_lot::Mutex;
use std::path::PathBuf;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;

/// What one mock encoder saw
#[derive(Debug, Clone, Default)]
pub struct MockEncoderLog {
    pub anchor: Option<Duration>,
    pub times: Vec<Duration>,
    pub finished: bool,
}

#[derive(Default)]
struct Shared {
    ready: AtomicBool,
    fail_create: AtomicBool,
    fail_finish: AtomicBool,
    finish_delay: Mutex<Option<Duration>>,
    created: Mutex<Vec<EncoderSettings>>,
    logs: Mutex<Vec<Arc<Mutex<MockEncoderLog>>>>,
}

/// Factory whose encoders record every call instead of encoding
pub struct MockEncoderFactory {
    shared: Arc<Shared>,
}

impl Default for MockEncoderFactory {
    fn default() -> Self {
        let shared = Shared::default();
        shared.ready.store(true, Ordering::SeqCst);
        Self {
            shared: Arc::new(shared),
        }
    }
}

impl MockEncoderFactory {
    /// A factory that refuses to create encoders
    pub fn failing() -> Self {
        let factory = Self::default();
        factory.shared.fail_create.store(true, Ordering::SeqCst);
        factory
    }

    pub fn set_ready(&self, ready: bool) {
        self.shared.ready.store(ready, Ordering::SeqCst);
    }

    pub fn fail_finish(&self, fail: bool) {
        self.shared.fail_finish.store(fail, Ordering::SeqCst);
    }

    /// Make every `finish` take at least `delay`
    pub fn set_finish_delay(&self, delay: Duration) {
        *self.shared.finish_delay.lock() = Some(delay);
    }

    /// Settings of every encoder created so far
    pub fn created(&self) -> Vec<EncoderSettings> {
        self.shared.created.lock().clone()
    }

    /// Call log of the `index`th encoder
    pub fn log(&self, index: usize) -> MockEncoderLog {
        self.shared.logs.lock()[index].lock().clone()
    }
}

impl EncoderFactory for MockEncoderFactory {
    fn create(&self, settings: &EncoderSettings) -> Result<Box<dyn VideoEncoder>, EncoderError> {
        if self.shared.fail_create.load(Ordering::SeqCst) {
            return Err(EncoderError::Spawn("mock encoder unavailable".to_string()));
        }
        let log = Arc::new(Mutex::new(MockEncoderLog::default()));
        self.shared.created.lock().push(settings.clone());
        self.shared.logs.lock().push(log.clone());
        Ok(Box::new(MockEncoder {
            shared: self.shared.clone(),
            log,
            destination: settings.destination.clone(),
        }))
    }
}

struct MockEncoder {
    shared: Arc<Shared>,
    log: Arc<Mutex<MockEncoderLog>>,
    destination: PathBuf,
}

#[async_trait]
impl VideoEncoder for MockEncoder {
    fn is_ready_for_more(&self) -> bool {
        self.shared.ready.load(Ordering::SeqCst)
    }

    fn begin_session(&mut self, anchor: Duration) {
        self.log.lock().anchor = Some(anchor);
    }

    fn append(&mut self, _frame: &Frame, at: Duration) -> Result<(), EncoderError> {
        self.log.lock().times.push(at);
        Ok(())
    }

    fn frames_written(&self) -> u64 {
        self.log.lock().times.len() as u64
    }

    async fn finish(&mut self) -> Result<PathBuf, EncoderError> {
        let delay = *self.shared.finish_delay.lock();
        if let Some(delay) = delay {
            tokio::time::sleep(delay).await;
        }
        self.log.lock().finished = true;
        if self.shared.fail_finish.load(Ordering::SeqCst) {
            return Err(EncoderError::Finalize("mock finalize failure".to_string()));
        }
        std::fs::write(&self.destination, b"mock")?;
        Ok(self.destination.clone())
    }
}
