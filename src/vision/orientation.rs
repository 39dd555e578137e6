//! Text line orientation
//!
//! Optional 0°/180° classifier applied to detected lines before recognition.

use image::imageops;
use image::RgbImage;
use ndarray::Ix2;
use ort::session::Session;
use tracing::debug;

use super::models::run_session;
use super::preprocess::{classifier_batch, PreprocessConfig};
use crate::error::OcrError;

/// Lines classified per session run
const BATCH_SIZE: usize = 6;

/// Minimum confidence before a line is flipped
pub const ROTATE_THRESHOLD: f32 = 0.9;

/// Two-class (0°, 180°) text line classifier
pub struct TextLineClassifier {
    session: Session,
    preprocess: PreprocessConfig,
}

impl TextLineClassifier {
    pub fn new(session: Session, preprocess: PreprocessConfig) -> Self {
        Self {
            session,
            preprocess,
        }
    }

    /// Rotate lines predicted upside down, in place
    pub fn correct(&mut self, lines: &mut [RgbImage]) -> Result<(), OcrError> {
        let mut flipped = 0usize;

        for chunk in lines.chunks_mut(BATCH_SIZE) {
            let input = classifier_batch(chunk, &self.preprocess);
            let output = run_session(&mut self.session, input, "orientation")?
                .into_dimensionality::<Ix2>()
                .map_err(|e| OcrError::engine(format!("orientation output: {}", e)))?;

            for (line, probs) in chunk.iter_mut().zip(output.outer_iter()) {
                if is_upside_down(&probs.to_vec()) {
                    imageops::rotate180_in_place(line);
                    flipped += 1;
                }
            }
        }

        if flipped > 0 {
            debug!("Rotated {} upside-down text lines", flipped);
        }
        Ok(())
    }
}

/// Class 1 is 180°; flip only when it wins with high confidence
pub fn is_upside_down(probs: &[f32]) -> bool {
    match probs {
        [upright, flipped, ..] => flipped > upright && *flipped > ROTATE_THRESHOLD,
        _ => false,
    }
}
