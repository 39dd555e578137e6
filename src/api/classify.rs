//! Error classification
//!
//! The only place an [`OcrError`] becomes a wire response. Every failure maps
//! to a category and a well-formed `success: false` body; only malformed
//! uploads leave with a 4xx status.

use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use axum::Json;
use tracing::{error, warn};

use crate::error::OcrError;
use crate::shared::OcrResponse;
use crate::vision::EngineReadiness;

/// Failure category, one per error kind
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StatusCategory {
    /// Missing or unacceptable upload
    BadRequest,
    /// No engine could be constructed at startup
    ServiceUnavailable,
    /// The engine answered in a shape we cannot read
    UnprocessableResult,
    /// The inference call failed
    EngineFailure,
    /// The upload could not be stored
    StorageFailure,
}

impl StatusCategory {
    pub fn http_status(&self) -> StatusCode {
        match self {
            StatusCategory::BadRequest => StatusCode::BAD_REQUEST,
            _ => StatusCode::OK,
        }
    }
}

/// A failure ready to send
#[derive(Debug)]
pub struct Classified {
    pub category: StatusCategory,
    pub response: OcrResponse,
}

impl IntoResponse for Classified {
    fn into_response(self) -> Response {
        (self.category.http_status(), Json(self.response)).into_response()
    }
}

/// Map an error to its category and failure response
pub fn classify(err: &OcrError, readiness: &EngineReadiness) -> Classified {
    let category = match err {
        OcrError::InvalidUpload(_) => StatusCategory::BadRequest,
        OcrError::Initialization => StatusCategory::ServiceUnavailable,
        OcrError::UnsupportedFormat(_) => StatusCategory::UnprocessableResult,
        OcrError::Engine { .. } => StatusCategory::EngineFailure,
        OcrError::Io(_) => StatusCategory::StorageFailure,
    };

    match category {
        StatusCategory::BadRequest | StatusCategory::ServiceUnavailable => warn!("Rejected OCR request: {}", err),
        _ => error!("OCR request failed: {}", err),
    }

    Classified {
        category,
        response: OcrResponse::failure(readiness.device_label(), err.to_string()),
    }
}
