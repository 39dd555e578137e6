//! Canonical wire schema
//!
//! Whatever shape the engine produced, clients only ever see these types.

use serde::Serialize;

use crate::vision::device::EngineReadiness;

/// Decimal places kept on `TextRegion::confidence`
pub const CONFIDENCE_DECIMALS: i32 = 3;

/// Integer pixel coordinate, serialized as `[x, y]`
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub struct Point(pub i64, pub i64);

/// One detected line of text
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct TextRegion {
    text: String,
    confidence: f64,
    bounding_box: [Point; 4],
}

impl TextRegion {
    /// Create a region; confidence is rounded to 3 decimals and clamped to `[0, 1]`
    pub fn new(text: impl Into<String>, confidence: f64, bounding_box: [Point; 4]) -> Self {
        Self {
            text: text.into(),
            confidence: round_confidence(confidence),
            bounding_box,
        }
    }

    /// Recognized text
    pub fn text(&self) -> &str {
        &self.text
    }

    /// Recognition confidence (0.0 - 1.0)
    pub fn confidence(&self) -> f64 {
        self.confidence
    }

    /// Quadrilateral in engine order
    pub fn bounding_box(&self) -> &[Point; 4] {
        &self.bounding_box
    }
}

/// Round half away from zero to `CONFIDENCE_DECIMALS`, then clamp into `[0, 1]`.
///
/// Non-finite input maps to `0.0`.
pub fn round_confidence(value: f64) -> f64 {
    if !value.is_finite() {
        return 0.0;
    }
    let scale = 10f64.powi(CONFIDENCE_DECIMALS);
    ((value * scale).round() / scale).clamp(0.0, 1.0)
}

/// Response body of `POST /ocr/`
///
/// Built fresh per request through [`OcrResponse::success`] or
/// [`OcrResponse::failure`]; `total_text_regions` always equals `results.len()`.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct OcrResponse {
    device: String,
    results: Vec<TextRegion>,
    total_text_regions: usize,
    success: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    error: Option<String>,
}

impl OcrResponse {
    pub fn success(device: impl Into<String>, results: Vec<TextRegion>) -> Self {
        Self {
            device: device.into(),
            total_text_regions: results.len(),
            results,
            success: true,
            error: None,
        }
    }

    pub fn failure(device: impl Into<String>, error: impl Into<String>) -> Self {
        Self {
            device: device.into(),
            results: Vec::new(),
            total_text_regions: 0,
            success: false,
            error: Some(error.into()),
        }
    }

    pub fn device(&self) -> &str {
        &self.device
    }

    pub fn results(&self) -> &[TextRegion] {
        &self.results
    }

    pub fn total_text_regions(&self) -> usize {
        self.total_text_regions
    }

    pub fn is_success(&self) -> bool {
        self.success
    }

    pub fn error(&self) -> Option<&str> {
        self.error.as_deref()
    }
}

/// Overall service status reported by `/health`
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum HealthStatus {
    Healthy,
    Degraded,
}

/// Response body of `GET /health`
#[derive(Debug, Clone, Serialize)]
pub struct HealthReport {
    pub status: HealthStatus,
    pub service: &'static str,
    pub version: &'static str,
    pub paddleocr_initialized: bool,
    pub current_device: String,
    pub using_gpu: bool,
    /// Whether this build can bind a CUDA device at all
    pub cuda_available: bool,
    pub ocr_ready: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub message: Option<&'static str>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
}

impl HealthReport {
    pub const SERVICE_NAME: &'static str = "PaddleOCR Invoice API";

    /// Build the report from the startup readiness record
    pub fn from_readiness(readiness: &EngineReadiness) -> Self {
        let initialized = readiness.initialized();
        Self {
            status: if initialized {
                HealthStatus::Healthy
            } else {
                HealthStatus::Degraded
            },
            service: Self::SERVICE_NAME,
            version: env!("CARGO_PKG_VERSION"),
            paddleocr_initialized: initialized,
            current_device: readiness.device_label(),
            using_gpu: readiness.using_gpu(),
            cuda_available: cfg!(feature = "cuda"),
            ocr_ready: initialized,
            message: initialized.then_some("All systems operational"),
            error: (!initialized)
                .then(|| "PaddleOCR not initialized - OCR functionality unavailable".to_string()),
        }
    }

    pub fn is_healthy(&self) -> bool {
        self.status == HealthStatus::Healthy
    }
}
