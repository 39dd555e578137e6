//! Per-process state shared by request handlers

use std::sync::Arc;

use crate::config::AppConfig;
use crate::vision::{EngineAdapter, EngineReadiness};

/// Configuration plus the one engine adapter, cloned into every handler
#[derive(Clone)]
pub struct AppState {
    pub config: Arc<AppConfig>,
    pub adapter: Arc<EngineAdapter>,
}

impl AppState {
    pub fn new(config: AppConfig, adapter: EngineAdapter) -> Self {
        Self {
            config: Arc::new(config),
            adapter: Arc::new(adapter),
        }
    }

    /// Written once at startup, read-only afterwards
    pub fn readiness(&self) -> &EngineReadiness {
        self.adapter.readiness()
    }
}
