//! Vision/OCR Layer
//!
//! Turns an uploaded image into canonical text regions. Supports two engine
//! backends:
//! - PaddleOCR via ONNX Runtime (in-process)
//! - an external PaddleOCR program bridged over stdout JSON

pub mod bridge;
pub mod detection;
pub mod device;
pub mod engine;
pub mod models;
pub mod normalize;
pub mod orientation;
pub mod paddle;
pub mod preprocess;
pub mod raw;
pub mod recognition;

#[cfg(test)]
pub mod testing;

use anyhow::Result;
use tracing::info;

use crate::config::{EngineBackend, EngineConfig};

pub use device::{Device, DeviceSelector, EngineReadiness};
pub use engine::{EngineAdapter, EngineFactory};
pub use normalize::normalize;
pub use raw::RawResult;

/// Prepare the configured backend's factory, fetching models if needed
pub async fn prepare_factory(config: &EngineConfig) -> Result<Box<dyn EngineFactory>> {
    match config.backend {
        EngineBackend::Paddle => {
            let manager = models::ModelManager::with_dir(config.resolve_models_dir()?)?;
            info!("Using PaddleOCR models from {:?}", manager.models_dir());

            let paths = manager.ensure_all_models(config.use_angle_cls).await?;
            Ok(Box::new(paddle::PaddleFactory::new(paths, config)))
        }
        EngineBackend::Command => {
            info!("Using external OCR program {:?}", config.command.program);
            Ok(Box::new(bridge::CommandFactory::new(config.command.clone())))
        }
    }
}
