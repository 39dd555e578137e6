//! Engine abstraction and the shared adapter
//!
//! Backends implement [`OcrEngine`]; [`EngineFactory`] constructs one on a
//! given [`Device`]. The [`EngineAdapter`] owns the single constructed engine
//! and serializes every call into it.

use std::path::Path;

use parking_lot::Mutex;
use tracing::debug;

use super::device::{Device, EngineReadiness};
use super::raw::RawResult;
use crate::error::OcrError;

/// An OCR backend bound to one device
pub trait OcrEngine: Send {
    /// Run detection and recognition on a locally readable image
    fn ocr(&mut self, image_path: &Path) -> Result<RawResult, OcrError>;
}

/// Constructs engines for the device selector
pub trait EngineFactory: Send {
    /// Build an engine bound to `device`
    fn build(&self, device: Device) -> anyhow::Result<Box<dyn OcrEngine>>;
}

/// Single shared engine handle gated by readiness
pub struct EngineAdapter {
    readiness: EngineReadiness,
    engine: Option<Mutex<Box<dyn OcrEngine>>>,
}

impl EngineAdapter {
    /// Adapter over an engine constructed on `device`
    pub fn ready(device: Device, engine: Box<dyn OcrEngine>) -> Self {
        Self {
            readiness: EngineReadiness::ready(device),
            engine: Some(Mutex::new(engine)),
        }
    }

    /// Adapter with no engine; every call fails with [`OcrError::Initialization`]
    pub fn unavailable() -> Self {
        Self {
            readiness: EngineReadiness::unavailable(),
            engine: None,
        }
    }

    pub fn readiness(&self) -> &EngineReadiness {
        &self.readiness
    }

    /// One inference attempt; concurrent callers queue on the engine lock.
    ///
    /// This blocks, so call it from a blocking worker.
    pub fn recognize(&self, image_path: &Path) -> Result<RawResult, OcrError> {
        let Some(engine) = &self.engine else {
            return Err(OcrError::Initialization);
        };

        let mut engine = engine.lock();
        debug!("Running OCR on {:?} ({})", image_path, self.readiness.device_label());
        engine.ocr(image_path)
    }
}
