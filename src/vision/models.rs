//! Model management for ONNX Runtime
//!
//! Handles downloading, caching, and loading of PaddleOCR models.

use std::path::{Path, PathBuf};

use anyhow::{Context, Result};
use futures_util::StreamExt;
use ndarray::{Array4, ArrayD};
use ort::session::builder::{GraphOptimizationLevel, SessionBuilder};
use ort::session::Session;
use ort::value::Tensor;
use tokio::io::AsyncWriteExt;
use tracing::{debug, info, warn};

use super::device::Device;
use crate::error::OcrError;

/// Set to skip all network access when models are missing
const OFFLINE_ENV: &str = "INVOICE_OCR_OFFLINE";

/// Model identifier for PaddleOCR components
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ModelType {
    /// Text detection model (DBNet)
    Detection,
    /// Text recognition model (CRNN)
    Recognition,
    /// Character dictionary for recognition
    Dictionary,
    /// Text line orientation classifier (optional)
    Classifier,
}

impl ModelType {
    /// Get the filename for this model type
    pub fn filename(&self) -> &'static str {
        match self {
            ModelType::Detection => "det.onnx",
            ModelType::Recognition => "rec.onnx",
            ModelType::Dictionary => "dict.txt",
            ModelType::Classifier => "cls.onnx",
        }
    }

    /// Download URL, from Hugging Face (monkt/paddleocr-onnx)
    ///
    /// The classifier has no published export there; place `cls.onnx` in the
    /// models directory by hand to enable it.
    pub fn download_url(&self) -> Option<&'static str> {
        match self {
            ModelType::Detection => {
                Some("https://huggingface.co/monkt/paddleocr-onnx/resolve/main/detection/v3/det.onnx")
            }
            ModelType::Recognition => {
                Some("https://huggingface.co/monkt/paddleocr-onnx/resolve/main/languages/english/rec.onnx")
            }
            ModelType::Dictionary => {
                Some("https://huggingface.co/monkt/paddleocr-onnx/resolve/main/languages/english/dict.txt")
            }
            ModelType::Classifier => None,
        }
    }

    /// Plausible file size in bytes; anything outside is treated as a broken download
    pub fn expected_size_range(&self) -> (u64, u64) {
        match self {
            ModelType::Detection => (1_000_000, 200_000_000),
            ModelType::Recognition => (1_000_000, 200_000_000),
            ModelType::Dictionary => (100, 2_000_000),
            ModelType::Classifier => (100_000, 50_000_000),
        }
    }

    /// Display name for progress reporting
    pub fn display_name(&self) -> &'static str {
        match self {
            ModelType::Detection => "Text Detection",
            ModelType::Recognition => "Text Recognition",
            ModelType::Dictionary => "Character Dictionary",
            ModelType::Classifier => "Text Line Orientation",
        }
    }
}

/// Resolved model files for one engine
#[derive(Debug, Clone)]
pub struct ModelPaths {
    pub detection: PathBuf,
    pub recognition: PathBuf,
    pub dictionary: PathBuf,
    pub classifier: Option<PathBuf>,
}

/// Model manager for downloading and caching ONNX models
pub struct ModelManager {
    models_dir: PathBuf,
}

impl ModelManager {
    /// Create model manager over `models_dir`, creating it if needed
    pub fn with_dir(models_dir: PathBuf) -> Result<Self> {
        std::fs::create_dir_all(&models_dir)
            .with_context(|| format!("Failed to create models directory: {:?}", models_dir))?;
        Ok(Self { models_dir })
    }

    /// Get the models directory path
    pub fn models_dir(&self) -> &Path {
        &self.models_dir
    }

    /// Get the path to a specific model file
    pub fn model_path(&self, model_type: ModelType) -> PathBuf {
        self.models_dir.join(model_type.filename())
    }

    /// Check if a model is present with a plausible size
    pub fn is_model_available(&self, model_type: ModelType) -> bool {
        match std::fs::metadata(self.model_path(model_type)) {
            Ok(metadata) => {
                let (min, max) = model_type.expected_size_range();
                (min..=max).contains(&metadata.len())
            }
            Err(_) => false,
        }
    }

    /// Download a model if not already available
    /// Returns the path to the model file
    pub async fn ensure_model(&self, model_type: ModelType) -> Result<PathBuf> {
        let path = self.model_path(model_type);

        if self.is_model_available(model_type) {
            info!("Model {:?} already available at {:?}", model_type, path);
            return Ok(path);
        }

        let Some(url) = model_type.download_url() else {
            anyhow::bail!(
                "{} model not found at {:?} and has no download source",
                model_type.display_name(),
                path
            );
        };

        if std::env::var_os(OFFLINE_ENV).is_some() {
            anyhow::bail!(
                "Offline mode: cannot download models. Please download manually from {} and place at {:?}",
                url,
                path
            );
        }

        info!("Downloading {} model from {}", model_type.display_name(), url);
        download_file(url, &path).await?;

        if !self.is_model_available(model_type) {
            let size = std::fs::metadata(&path).map(|m| m.len()).unwrap_or(0);
            std::fs::remove_file(&path).ok();
            anyhow::bail!(
                "Downloaded {} model has implausible size of {} bytes",
                model_type.display_name(),
                size
            );
        }

        info!("Successfully downloaded {} model", model_type.display_name());
        Ok(path)
    }

    /// Resolve every model, downloading the required ones
    pub async fn ensure_all_models(&self, with_classifier: bool) -> Result<ModelPaths> {
        let detection = self.ensure_model(ModelType::Detection).await?;
        let recognition = self.ensure_model(ModelType::Recognition).await?;
        let dictionary = self.ensure_model(ModelType::Dictionary).await?;

        let classifier = if with_classifier {
            // Classifier is optional
            match self.ensure_model(ModelType::Classifier).await {
                Ok(path) => Some(path),
                Err(e) => {
                    warn!("Orientation classifier unavailable, continuing without it: {:#}", e);
                    None
                }
            }
        } else {
            None
        };

        Ok(ModelPaths {
            detection,
            recognition,
            dictionary,
            classifier,
        })
    }
}

/// Stream `url` into `<path>.tmp`, then move it into place
async fn download_file(url: &str, path: &Path) -> Result<()> {
    let client = reqwest::Client::builder()
        .timeout(std::time::Duration::from_secs(300))
        .build()
        .context("Failed to create HTTP client")?;

    let response = client
        .get(url)
        .send()
        .await
        .context("Failed to send download request")?;

    if !response.status().is_success() {
        anyhow::bail!("Download failed with status {}: {}", response.status(), url);
    }

    let total_size = response.content_length();
    debug!("Download size: {:?} bytes", total_size);

    let temp_path = path.with_extension("tmp");
    let mut file = tokio::fs::File::create(&temp_path)
        .await
        .context("Failed to create temp file")?;

    let mut downloaded: u64 = 0;
    let mut stream = response.bytes_stream();

    while let Some(chunk) = stream.next().await {
        let chunk = chunk.context("Error reading download stream")?;
        file.write_all(&chunk)
            .await
            .context("Failed to write to temp file")?;
        downloaded += chunk.len() as u64;
    }

    file.flush().await.context("Failed to flush temp file")?;
    drop(file);
    debug!("Downloaded {} bytes from {}", downloaded, url);

    tokio::fs::rename(&temp_path, path)
        .await
        .context("Failed to move downloaded file to final location")?;

    Ok(())
}

/// Load an ONNX model bound to `device`
pub fn build_session(model_path: &Path, device: Device, intra_threads: usize) -> Result<Session> {
    debug!("Loading ONNX model from {:?} on {}", model_path, device);

    let session = configure_builder(device, intra_threads)
        .with_context(|| format!("Failed to configure ONNX Runtime for {}", device))?
        .commit_from_file(model_path)
        .with_context(|| format!("Failed to load ONNX model {:?}", model_path))?;

    Ok(session)
}

fn configure_builder(device: Device, intra_threads: usize) -> ort::Result<SessionBuilder> {
    let builder = Session::builder()?
        .with_optimization_level(GraphOptimizationLevel::Level3)?
        .with_intra_threads(intra_threads.max(1))?;

    with_device(builder, device)
}

#[cfg(feature = "cuda")]
fn with_device(builder: SessionBuilder, device: Device) -> ort::Result<SessionBuilder> {
    use ort::execution_providers::CUDAExecutionProvider;

    match device {
        Device::Gpu(id) => {
            // a missing CUDA runtime surfaces as a construction error
            let provider = CUDAExecutionProvider::default()
                .with_device_id(id)
                .build()
                .error_on_failure();
            let builder = builder.with_execution_providers([provider])?;
            info!("CUDA acceleration enabled on device {}", id);
            Ok(builder)
        }
        Device::Cpu => Ok(builder),
    }
}

#[cfg(not(feature = "cuda"))]
fn with_device(builder: SessionBuilder, device: Device) -> ort::Result<SessionBuilder> {
    match device {
        Device::Gpu(id) => Err(ort::Error::new(format!(
            "GPU {} requested but this build has no CUDA support (rebuild with the `cuda` feature)",
            id
        ))),
        Device::Cpu => Ok(builder),
    }
}

/// Run a single-input, single-output model and copy out the first output
pub fn run_session(session: &mut Session, input: Array4<f32>, stage: &str) -> Result<ArrayD<f32>, OcrError> {
    let tensor = Tensor::from_array(input).map_err(|e| OcrError::engine(format!("{} input: {}", stage, e)))?;

    let outputs = session
        .run(ort::inputs![tensor])
        .map_err(|e| OcrError::engine(format!("{} inference failed: {}", stage, e)))?;

    let output = outputs[0]
        .try_extract_array::<f32>()
        .map_err(|e| OcrError::engine(format!("{} output: {}", stage, e)))?
        .to_owned();
    Ok(output)
}
