//! Application Configuration
//!
//! Service settings stored in TOML format. Every field has a default, so a
//! partial file (or none at all) is valid.

use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};

/// Application settings
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct AppConfig {
    /// HTTP listener settings
    pub server: ServerConfig,
    /// OCR engine settings
    pub engine: EngineConfig,
    /// Upload handling settings
    pub upload: UploadConfig,
}

/// HTTP listener settings
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct ServerConfig {
    /// Socket address to listen on
    pub bind: String,
    /// Largest accepted request body in MiB
    pub max_upload_mb: usize,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            bind: "0.0.0.0:8000".to_string(),
            max_upload_mb: 20,
        }
    }
}

impl ServerConfig {
    pub fn max_upload_bytes(&self) -> usize {
        self.max_upload_mb.saturating_mul(1024 * 1024)
    }
}

/// Which engine implementation to construct
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, clap::ValueEnum)]
#[serde(rename_all = "lowercase")]
pub enum EngineBackend {
    /// In-process PaddleOCR ONNX models
    Paddle,
    /// External PaddleOCR program speaking JSON on stdout
    Command,
}

/// OCR engine settings
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct EngineConfig {
    pub backend: EngineBackend,
    /// Try the GPU before the CPU
    pub use_gpu: bool,
    /// CUDA device ordinal
    pub gpu_device_id: i32,
    /// Model directory; defaults to `<data_dir>/models`
    pub models_dir: Option<PathBuf>,
    /// ONNX Runtime intra-op threads
    pub intra_threads: usize,
    /// Correct upside-down text lines when a classifier model is present
    pub use_angle_cls: bool,
    /// Longest side of the detection input
    pub det_limit_side: u32,
    /// Minimum mean probability of a detected box
    pub box_thresh: f32,
    /// Box growth factor
    pub unclip_ratio: f32,
    /// External program settings for the `command` backend
    pub command: CommandConfig,
}

impl Default for EngineConfig {
    fn default() -> Self {
        Self {
            backend: EngineBackend::Paddle,
            use_gpu: true,
            gpu_device_id: 0,
            models_dir: None,
            intra_threads: 4,
            use_angle_cls: true,
            det_limit_side: 960,
            box_thresh: 0.6,
            unclip_ratio: 1.5,
            command: CommandConfig::default(),
        }
    }
}

impl EngineConfig {
    /// Accelerator ordinal to try first, if any
    pub fn accelerator(&self) -> Option<i32> {
        self.use_gpu.then_some(self.gpu_device_id)
    }

    /// Configured model directory, or the per-user default
    pub fn resolve_models_dir(&self) -> Result<PathBuf> {
        match &self.models_dir {
            Some(dir) => Ok(dir.clone()),
            None => Ok(crate::storage::get_data_dir()?.join("models")),
        }
    }
}

/// External program settings
///
/// `{device}` in any argument becomes `gpu:N` or `cpu`; `{image}` becomes the
/// uploaded file's path.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct CommandConfig {
    pub program: String,
    pub args: Vec<String>,
    /// Run once at construction; empty means the GPU is never tried and the
    /// CPU engine only checks that the program spawns
    pub check_args: Vec<String>,
}

impl Default for CommandConfig {
    fn default() -> Self {
        Self {
            program: "paddleocr".to_string(),
            args: vec![
                "ocr".to_string(),
                "-i".to_string(),
                "{image}".to_string(),
                "--device".to_string(),
                "{device}".to_string(),
            ],
            check_args: Vec::new(),
        }
    }
}

/// Upload handling settings
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct UploadConfig {
    /// Directory for scoped upload files; defaults to the system temp dir
    pub temp_dir: Option<PathBuf>,
    /// Accepted file extensions, without the dot
    pub allowed_extensions: Vec<String>,
}

impl Default for UploadConfig {
    fn default() -> Self {
        Self {
            temp_dir: None,
            allowed_extensions: ["jpg", "jpeg", "png", "bmp", "tiff", "webp"]
                .iter()
                .map(|s| s.to_string())
                .collect(),
        }
    }
}

/// Load configuration from file
pub fn load_config(path: &Path) -> Result<AppConfig> {
    let content = std::fs::read_to_string(path)
        .with_context(|| format!("Failed to read config file {:?}", path))?;
    let config: AppConfig =
        toml::from_str(&content).with_context(|| format!("Invalid config file {:?}", path))?;
    Ok(config)
}

/// Save configuration to file
pub fn save_config(config: &AppConfig, path: &Path) -> Result<()> {
    let content = toml::to_string_pretty(config)?;
    std::fs::write(path, content)?;
    Ok(())
}
