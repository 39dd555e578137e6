//! Shared state and wire messages
//!
//! This module holds the per-process state handed to every request handler
//! and the JSON shapes returned at the HTTP boundary.

pub mod messages;
pub mod state;

pub use messages::{HealthReport, OcrResponse, TextRegion};
pub use state::AppState;
