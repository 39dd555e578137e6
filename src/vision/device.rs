//! Compute device selection
//!
//! Builds the OCR engine once at startup, trying the accelerator first and
//! the CPU second. The outcome is recorded in an [`EngineReadiness`] that is
//! never written again.

use std::fmt;

use tracing::{error, info, warn};

use super::engine::{EngineAdapter, EngineFactory, OcrEngine};

/// Compute device backing the engine
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Device {
    /// CUDA device by ordinal
    Gpu(i32),
    /// General-purpose processor
    Cpu,
}

impl Device {
    pub fn is_gpu(&self) -> bool {
        matches!(self, Device::Gpu(_))
    }
}

impl fmt::Display for Device {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Device::Gpu(id) => write!(f, "gpu:{}", id),
            Device::Cpu => write!(f, "cpu"),
        }
    }
}

/// Which device backs the engine, and whether the engine is usable at all
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct EngineReadiness {
    device: Option<Device>,
}

impl EngineReadiness {
    /// Engine constructed on `device`
    pub fn ready(device: Device) -> Self {
        Self {
            device: Some(device),
        }
    }

    /// Both construction attempts failed
    pub fn unavailable() -> Self {
        Self { device: None }
    }

    pub fn initialized(&self) -> bool {
        self.device.is_some()
    }

    pub fn device(&self) -> Option<Device> {
        self.device
    }

    /// `gpu:N`, `cpu`, or `unknown` when not initialized
    pub fn device_label(&self) -> String {
        self.device
            .map(|d| d.to_string())
            .unwrap_or_else(|| "unknown".to_string())
    }

    pub fn using_gpu(&self) -> bool {
        self.device.is_some_and(|d| d.is_gpu())
    }
}

/// Selector progress; `Ready` and `Failed` are terminal
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SelectorState {
    Uninitialized,
    AttemptingAccelerator(i32),
    AttemptingGeneral,
    Ready(Device),
    Failed,
}

impl SelectorState {
    pub fn is_terminal(&self) -> bool {
        matches!(self, SelectorState::Ready(_) | SelectorState::Failed)
    }
}

/// GPU→CPU fallback state machine
pub struct DeviceSelector {
    factory: Box<dyn EngineFactory>,
    accelerator: Option<i32>,
    state: SelectorState,
    engine: Option<Box<dyn OcrEngine>>,
}

impl DeviceSelector {
    /// `accelerator` is the CUDA ordinal to try first, or `None` to go straight to CPU
    pub fn new(factory: Box<dyn EngineFactory>, accelerator: Option<i32>) -> Self {
        Self {
            factory,
            accelerator,
            state: SelectorState::Uninitialized,
            engine: None,
        }
    }

    pub fn state(&self) -> SelectorState {
        self.state
    }

    /// Advance one transition and return the new state
    pub fn step(&mut self) -> SelectorState {
        self.state = match self.state {
            SelectorState::Uninitialized => match self.accelerator {
                Some(id) => SelectorState::AttemptingAccelerator(id),
                None => {
                    info!("GPU disabled by configuration, skipping accelerator");
                    SelectorState::AttemptingGeneral
                }
            },
            SelectorState::AttemptingAccelerator(id) => {
                let device = Device::Gpu(id);
                info!("Attempting GPU initialization on {}...", device);
                match self.factory.build(device) {
                    Ok(engine) => {
                        self.engine = Some(engine);
                        info!("PaddleOCR initialized successfully with GPU ({})", device);
                        SelectorState::Ready(device)
                    }
                    Err(e) => {
                        warn!("GPU initialization failed: {:#}", e);
                        info!("Attempting CPU fallback...");
                        SelectorState::AttemptingGeneral
                    }
                }
            }
            SelectorState::AttemptingGeneral => match self.factory.build(Device::Cpu) {
                Ok(engine) => {
                    self.engine = Some(engine);
                    info!("PaddleOCR initialized successfully with CPU");
                    SelectorState::Ready(Device::Cpu)
                }
                Err(e) => {
                    error!("CPU initialization also failed: {:#}", e);
                    error!("PaddleOCR service is NOT available");
                    SelectorState::Failed
                }
            },
            terminal => terminal,
        };
        self.state
    }

    /// Run to a terminal state and hand the engine to an adapter
    pub fn initialize(mut self) -> (EngineReadiness, EngineAdapter) {
        while !self.state.is_terminal() {
            self.step();
        }

        match (self.state, self.engine.take()) {
            (SelectorState::Ready(device), Some(engine)) => {
                let adapter = EngineAdapter::ready(device, engine);
                (*adapter.readiness(), adapter)
            }
            _ => {
                let adapter = EngineAdapter::unavailable();
                (*adapter.readiness(), adapter)
            }
        }
    }
}
