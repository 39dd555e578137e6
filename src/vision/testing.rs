//! Fake engines for tests

use std::path::Path;
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Duration;

use parking_lot::Mutex;

use super::device::Device;
use super::engine::{EngineFactory, OcrEngine};
use super::raw::RawResult;
use crate::error::OcrError;

/// Engine returning a canned result
#[derive(Clone)]
pub struct FakeEngine {
    outcome: Result<RawResult, String>,
    calls: Arc<AtomicUsize>,
    in_flight: Arc<AtomicBool>,
    overlapped: Arc<AtomicBool>,
    hold: Option<Duration>,
}

impl FakeEngine {
    pub fn returning(raw: RawResult) -> Self {
        Self {
            outcome: Ok(raw),
            calls: Arc::new(AtomicUsize::new(0)),
            in_flight: Arc::new(AtomicBool::new(false)),
            overlapped: Arc::new(AtomicBool::new(false)),
            hold: None,
        }
    }

    pub fn empty() -> Self {
        Self::returning(RawResult::empty())
    }

    pub fn failing(reason: &str) -> Self {
        Self {
            outcome: Err(reason.to_string()),
            ..Self::empty()
        }
    }

    /// Hold each call briefly and record whether two calls ever overlapped
    pub fn with_overlap_check(mut self) -> Self {
        self.hold = Some(Duration::from_millis(5));
        self
    }

    pub fn calls(&self) -> Arc<AtomicUsize> {
        Arc::clone(&self.calls)
    }

    pub fn overlapped(&self) -> Arc<AtomicBool> {
        Arc::clone(&self.overlapped)
    }
}

impl OcrEngine for FakeEngine {
    fn ocr(&mut self, _image_path: &Path) -> Result<RawResult, OcrError> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        if self.in_flight.swap(true, Ordering::SeqCst) {
            self.overlapped.store(true, Ordering::SeqCst);
        }
        if let Some(hold) = self.hold {
            std::thread::sleep(hold);
        }
        self.in_flight.store(false, Ordering::SeqCst);

        self.outcome.clone().map_err(OcrError::engine)
    }
}

/// Factory that fails on selected devices
pub struct FakeFactory {
    engine: FakeEngine,
    failing: Vec<Device>,
    attempts: Arc<Mutex<Vec<Device>>>,
}

impl FakeFactory {
    pub fn new(engine: FakeEngine) -> Self {
        Self {
            engine,
            failing: Vec::new(),
            attempts: Arc::new(Mutex::new(Vec::new())),
        }
    }

    pub fn failing_on(mut self, device: Device) -> Self {
        self.failing.push(device);
        self
    }

    /// Devices requested so far, in order
    pub fn attempts(&self) -> Arc<Mutex<Vec<Device>>> {
        Arc::clone(&self.attempts)
    }
}

impl EngineFactory for FakeFactory {
    fn build(&self, device: Device) -> anyhow::Result<Box<dyn OcrEngine>> {
        self.attempts.lock().push(device);
        if self.failing.contains(&device) {
            anyhow::bail!("no usable {} in this environment", device);
        }
        Ok(Box::new(self.engine.clone()))
    }
}
