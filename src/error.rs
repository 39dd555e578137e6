//! Request-path error taxonomy
//!
//! Every failure that can happen while answering `POST /ocr/` is one of these
//! kinds. The `Display` text is what clients see in the `error` field.

use thiserror::Error;

/// Failure kinds surfaced to the error classifier
#[derive(Debug, Error)]
pub enum OcrError {
    /// Neither the accelerator nor the CPU engine could be constructed
    #[error("PaddleOCR service is not available")]
    Initialization,

    /// Engine output matched neither the legacy nor the structured shape
    #[error("Unsupported OCR result format: {0}")]
    UnsupportedFormat(String),

    /// The inference call itself failed (bad image, decode error, OOM, ...)
    #[error("OCR processing failed: {reason}")]
    Engine { reason: String },

    /// The temporary upload could not be written or read
    #[error("Failed to save file: {0}")]
    Io(#[from] std::io::Error),

    /// The request did not carry a usable image upload
    #[error("{0}")]
    InvalidUpload(String),
}

impl OcrError {
    /// Shorthand for an engine failure
    pub fn engine(reason: impl Into<String>) -> Self {
        Self::Engine {
            reason: reason.into(),
        }
    }
}
