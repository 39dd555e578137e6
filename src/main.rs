//! Invoice OCR API - PaddleOCR text recognition over HTTP
//!
//! Builds the OCR engine once at startup (GPU first, CPU fallback) and serves
//! normalized text regions for uploaded invoice images.

mod api;
mod config;
mod error;
mod shared;
mod storage;
mod vision;

use std::path::{Path, PathBuf};

use anyhow::{Context, Result};
use clap::Parser;
use tokio::net::TcpListener;
use tracing::{error, info, warn};
use tracing_subscriber::{EnvFilter, FmtSubscriber};

use crate::config::{AppConfig, EngineBackend};
use crate::shared::AppState;
use crate::vision::{DeviceSelector, EngineAdapter};

/// Invoice OCR API - PaddleOCR over HTTP
#[derive(Parser, Debug)]
#[command(name = "invoice-ocr-api")]
#[command(about = "Extract text regions from invoice images with PaddleOCR")]
struct Args {
    /// Configuration file (defaults to config.toml in the user config dir)
    #[arg(short, long)]
    config: Option<PathBuf>,

    /// Address to listen on, overriding the configuration
    #[arg(short, long)]
    bind: Option<String>,

    /// Never try the GPU
    #[arg(long)]
    cpu_only: bool,

    /// Directory holding the PaddleOCR models
    #[arg(long)]
    models_dir: Option<PathBuf>,

    /// OCR backend
    #[arg(long, value_enum)]
    backend: Option<EngineBackend>,

    /// Write the effective configuration to the config file and exit
    #[arg(long)]
    write_config: bool,
}

#[tokio::main]
async fn main() -> Result<()> {
    // Initialize logging
    let subscriber = FmtSubscriber::builder()
        .with_env_filter(EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")))
        .finish();
    tracing::subscriber::set_global_default(subscriber)?;

    let args = Args::parse();

    info!("Invoice OCR API v{} starting...", env!("CARGO_PKG_VERSION"));

    let mut config = load_or_create_config(args.config.as_deref())?;
    if let Some(bind) = args.bind {
        config.server.bind = bind;
    }
    if args.cpu_only {
        config.engine.use_gpu = false;
    }
    if let Some(models_dir) = args.models_dir {
        config.engine.models_dir = Some(models_dir);
    }
    if let Some(backend) = args.backend {
        config.engine.backend = backend;
    }

    if args.write_config {
        let path = match args.config {
            Some(path) => path,
            None => storage::get_config_dir()?.join("config.toml"),
        };
        config::save_config(&config, &path)?;
        info!("Wrote configuration to {:?}", path);
        return Ok(());
    }

    let adapter = initialize_engine(&config).await;
    if !adapter.readiness().initialized() {
        warn!("Starting in degraded mode: OCR requests will fail until restart");
    }

    let bind = config.server.bind.clone();
    let app = api::router(AppState::new(config, adapter));

    let listener = TcpListener::bind(&bind)
        .await
        .with_context(|| format!("Failed to bind {}", bind))?;
    info!("Listening on http://{}", listener.local_addr()?);

    axum::serve(listener, app)
        .with_graceful_shutdown(shutdown_signal())
        .await?;

    info!("Invoice OCR API shutdown complete");

    Ok(())
}

/// Load configuration from an explicit path, the user config dir, or defaults
fn load_or_create_config(explicit: Option<&Path>) -> Result<AppConfig> {
    if let Some(path) = explicit {
        let config = config::load_config(path)?;
        info!("Loaded configuration from {:?}", path);
        return Ok(config);
    }

    if let Ok(config_dir) = storage::get_config_dir() {
        let config_path = config_dir.join("config.toml");
        if config_path.exists() {
            match config::load_config(&config_path) {
                Ok(config) => {
                    info!("Loaded configuration from {:?}", config_path);
                    return Ok(config);
                }
                Err(e) => warn!("Ignoring unreadable configuration: {:#}", e),
            }
        }
    }

    info!("Using default configuration");
    Ok(AppConfig::default())
}

/// Run device selection once; any failure leaves the service degraded
async fn initialize_engine(config: &AppConfig) -> EngineAdapter {
    let factory = match vision::prepare_factory(&config.engine).await {
        Ok(factory) => factory,
        Err(e) => {
            error!("Failed to prepare OCR engine: {:#}", e);
            return EngineAdapter::unavailable();
        }
    };

    let accelerator = config.engine.accelerator();
    let selection =
        tokio::task::spawn_blocking(move || DeviceSelector::new(factory, accelerator).initialize()).await;

    match selection {
        Ok((readiness, adapter)) => {
            if let Some(device) = readiness.device() {
                info!("OCR engine ready on {}", device);
            }
            adapter
        }
        Err(e) => {
            error!("Engine initialization panicked: {}", e);
            EngineAdapter::unavailable()
        }
    }
}

async fn shutdown_signal() {
    if let Err(e) = tokio::signal::ctrl_c().await {
        error!("Failed to listen for shutdown signal: {}", e);
        std::future::pending::<()>().await;
    }
    info!("Shutdown requested");
}
