//! In-process PaddleOCR pipeline
//!
//! Detection, optional orientation correction and recognition over ONNX
//! Runtime sessions, producing one structured page per image.

use std::path::Path;

use anyhow::{Context, Result};
use tracing::{debug, info};

use super::detection::{DetectorConfig, TextDetector};
use super::device::Device;
use super::engine::{EngineFactory, OcrEngine};
use super::models::{build_session, ModelPaths};
use super::orientation::TextLineClassifier;
use super::preprocess::{crop_box, PreprocessConfig};
use super::raw::{RawResult, StructuredPage};
use super::recognition::{load_dictionary, TextRecognizer};
use crate::config::EngineConfig;
use crate::error::OcrError;

/// Builds [`PaddleEngine`]s from resolved model files
pub struct PaddleFactory {
    models: ModelPaths,
    intra_threads: usize,
    detector: DetectorConfig,
    preprocess: PreprocessConfig,
}

impl PaddleFactory {
    pub fn new(models: ModelPaths, config: &EngineConfig) -> Self {
        let models = ModelPaths {
            classifier: models.classifier.filter(|_| config.use_angle_cls),
            ..models
        };

        Self {
            models,
            intra_threads: config.intra_threads,
            detector: DetectorConfig {
                box_thresh: config.box_thresh,
                unclip_ratio: config.unclip_ratio,
                ..DetectorConfig::default()
            },
            preprocess: PreprocessConfig {
                det_limit_side: config.det_limit_side,
                ..PreprocessConfig::default()
            },
        }
    }
}

impl EngineFactory for PaddleFactory {
    fn build(&self, device: Device) -> Result<Box<dyn OcrEngine>> {
        let charset = load_dictionary(&self.models.dictionary)?;

        let detector = build_session(&self.models.detection, device, self.intra_threads)
            .context("Failed to load detection model")?;
        let recognizer = build_session(&self.models.recognition, device, self.intra_threads)
            .context("Failed to load recognition model")?;
        let classifier = match &self.models.classifier {
            Some(path) => Some(
                build_session(path, device, self.intra_threads)
                    .context("Failed to load orientation model")?,
            ),
            None => None,
        };

        info!(
            "PaddleOCR pipeline ready on {} (orientation correction {})",
            device,
            if classifier.is_some() { "on" } else { "off" }
        );

        Ok(Box::new(PaddleEngine {
            detector: TextDetector::new(detector, self.detector.clone(), self.preprocess.clone()),
            classifier: classifier.map(|s| TextLineClassifier::new(s, self.preprocess.clone())),
            recognizer: TextRecognizer::new(recognizer, charset, self.preprocess.clone()),
        }))
    }
}

/// Detection + recognition over one device
pub struct PaddleEngine {
    detector: TextDetector,
    classifier: Option<TextLineClassifier>,
    recognizer: TextRecognizer,
}

impl OcrEngine for PaddleEngine {
    fn ocr(&mut self, image_path: &Path) -> Result<RawResult, OcrError> {
        let image = image::open(image_path)
            .map_err(|e| OcrError::engine(format!("could not decode image: {}", e)))?
            .to_rgb8();

        let boxes = self.detector.detect(&image)?;
        if boxes.is_empty() {
            debug!("No text detected");
            return Ok(RawResult::StructuredArrays(vec![StructuredPage::from_detections(
                Vec::new(),
                Vec::new(),
                Vec::new(),
            )]));
        }

        let mut lines: Vec<_> = boxes.iter().map(|b| crop_box(&image, &b.points)).collect();
        if let Some(classifier) = self.classifier.as_mut() {
            classifier.correct(&mut lines)?;
        }

        let recognized = self.recognizer.recognize(&lines)?;

        let mut texts = Vec::with_capacity(boxes.len());
        let mut polys = Vec::with_capacity(boxes.len());
        let mut scores = Vec::with_capacity(boxes.len());
        for (text_box, line) in boxes.into_iter().zip(recognized) {
            texts.push(line.text);
            polys.push(text_box.points);
            scores.push(line.score);
        }

        Ok(RawResult::StructuredArrays(vec![StructuredPage::from_detections(
            texts, polys, scores,
        )]))
    }
}
