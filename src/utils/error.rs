//! Error types and handling
//!
//! Each subsystem owns its error enum; `AppError` is what the command layer
//! returns.

use crate::capture::session::CaptureError;
use crate::export::types::ExportError;
use crate::recorder::state::RecordingError;
use serde::{Deserialize, Serialize};
use thiserror::Error;

/// Application-wide error type
#[derive(Error, Debug)]
pub enum AppError {
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    #[error("Configuration error: {0}")]
    Config(String),

    #[error("Capture error: {0}")]
    Capture(#[from] CaptureError),

    #[error("Recording error: {0}")]
    Recording(#[from] RecordingError),

    #[error("Export error: {0}")]
    Export(#[from] ExportError),
}

/// Machine-readable error, printed with `--json`
#[derive(Debug, Serialize, Deserialize)]
pub struct ErrorResponse {
    pub code: String,
    pub message: String,
}

impl From<AppError> for ErrorResponse {
    fn from(error: AppError) -> Self {
        let code = match &error {
            AppError::Io(_) => "IO_ERROR",
            AppError::Serialization(_) => "SERIALIZATION_ERROR",
            AppError::Config(_) => "CONFIG_ERROR",
            AppError::Capture(_) => "CAPTURE_ERROR",
            AppError::Recording(_) => "RECORDING_ERROR",
            AppError::Export(ExportError::Cancelled) => "EXPORT_CANCELLED",
            AppError::Export(ExportError::AlreadyRunning) => "EXPORT_BUSY",
            AppError::Export(_) => "EXPORT_ERROR",
        };

        ErrorResponse {
            code: code.to_string(),
            message: error.to_string(),
        }
    }
}

/// Result type alias using AppError
pub type AppResult<T> = Result<T, AppError>;
