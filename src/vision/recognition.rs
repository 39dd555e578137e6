//! Text recognition
//!
//! CRNN-style recognition with greedy CTC decoding. Index 0 of the model's
//! class axis is the CTC blank; class `i` maps to dictionary entry `i - 1`,
//! and the class after the dictionary is a space.

use std::path::Path;

use anyhow::{Context, Result};
use image::RgbImage;
use ndarray::{ArrayView2, Ix3};
use ort::session::Session;
use tracing::{debug, info};

use super::models::run_session;
use super::preprocess::{recognition_batch, PreprocessConfig};
use crate::error::OcrError;

/// Lines recognized per session run
const BATCH_SIZE: usize = 6;

/// Recognized line
#[derive(Debug, Clone, PartialEq)]
pub struct Recognition {
    pub text: String,
    /// Mean probability of the emitted characters
    pub score: f32,
}

/// Load a character dictionary, one entry per line
pub fn load_dictionary(path: &Path) -> Result<Vec<String>> {
    let content = std::fs::read_to_string(path)
        .with_context(|| format!("Failed to read recognition dictionary: {:?}", path))?;

    let charset: Vec<String> = content
        .lines()
        .map(|line| line.trim_end_matches('\r').to_string())
        .collect();
    if charset.iter().all(String::is_empty) {
        anyhow::bail!("Recognition dictionary is empty: {:?}", path);
    }

    Ok(charset)
}

/// CTC text recognizer
pub struct TextRecognizer {
    session: Session,
    charset: Vec<String>,
    preprocess: PreprocessConfig,
}

impl TextRecognizer {
    pub fn new(session: Session, charset: Vec<String>, preprocess: PreprocessConfig) -> Self {
        info!("Loaded recognition dictionary with {} characters", charset.len());
        Self {
            session,
            charset,
            preprocess,
        }
    }

    /// Recognize text lines in order
    pub fn recognize(&mut self, lines: &[RgbImage]) -> Result<Vec<Recognition>, OcrError> {
        let mut results = Vec::with_capacity(lines.len());

        for chunk in lines.chunks(BATCH_SIZE) {
            let input = recognition_batch(chunk, &self.preprocess);
            let output = run_session(&mut self.session, input, "recognition")?
                .into_dimensionality::<Ix3>()
                .map_err(|e| OcrError::engine(format!("recognition output: {}", e)))?;
            if output.dim().0 != chunk.len() {
                return Err(OcrError::engine(format!(
                    "recognition returned {} lines for a batch of {}",
                    output.dim().0,
                    chunk.len()
                )));
            }

            for probs in output.outer_iter() {
                results.push(ctc_decode(probs, &self.charset));
            }
        }

        debug!("Recognized {} text lines", results.len());
        Ok(results)
    }
}

/// Greedy CTC decoding over a `[steps, classes]` probability matrix
pub fn ctc_decode(probs: ArrayView2<f32>, charset: &[String]) -> Recognition {
    let mut text = String::new();
    let mut score_sum = 0.0f32;
    let mut emitted = 0usize;
    let mut previous: Option<usize> = None;

    for step in probs.rows() {
        let (best, best_prob) = step
            .iter()
            .copied()
            .enumerate()
            .fold((0, f32::NEG_INFINITY), |acc, (i, p)| if p > acc.1 { (i, p) } else { acc });

        // blanks separate repeats; consecutive identical classes collapse
        if best != 0 && Some(best) != previous {
            let symbol = match charset.get(best - 1) {
                Some(symbol) => Some(symbol.as_str()),
                None if best - 1 == charset.len() => Some(" "),
                None => None,
            };
            if let Some(symbol) = symbol {
                text.push_str(symbol);
                score_sum += best_prob;
                emitted += 1;
            }
        }
        previous = Some(best);
    }

    let score = if emitted > 0 { score_sum / emitted as f32 } else { 0.0 };
    Recognition { text, score }
}

#[cfg(test)]
mod tests {
    use super::*;
    use ndarray::Array2;
    use std::io::Write;
    use tempfile::NamedTempFile;

    fn charset() -> Vec<String> {
        ["A", "B", "C"].iter().map(|s| s.to_string()).collect()
    }

    /// One-hot-ish rows: `(class, probability)` per step
    fn probs(steps: &[(usize, f32)], classes: usize) -> Array2<f32> {
        let mut probs = Array2::<f32>::zeros((steps.len(), classes));
        for (t, &(class, p)) in steps.iter().enumerate() {
            probs[[t, class]] = p;
        }
        probs
    }

    #[test]
    fn test_ctc_collapses_repeats() {
        let probs = probs(&[(1, 0.9), (1, 0.8), (2, 0.7), (2, 0.6)], 5);

        let result = ctc_decode(probs.view(), &charset());
        assert_eq!(result.text, "AB");
        // only the first step of each run counts
        assert!((result.score - 0.8).abs() < 1e-6);
    }

    #[test]
    fn test_ctc_blank_separates_repeats() {
        let probs = probs(&[(1, 0.9), (0, 0.99), (1, 0.7), (3, 0.5)], 5);

        let result = ctc_decode(probs.view(), &charset());
        assert_eq!(result.text, "AAC");
        assert!((result.score - 0.7).abs() < 1e-6);
    }

    #[test]
    fn test_ctc_trailing_class_is_space() {
        let probs = probs(&[(1, 0.9), (4, 0.9), (2, 0.9)], 5);

        assert_eq!(ctc_decode(probs.view(), &charset()).text, "A B");
    }

    #[test]
    fn test_ctc_all_blank() {
        let probs = probs(&[(0, 0.9), (0, 0.9)], 5);

        let result = ctc_decode(probs.view(), &charset());
        assert_eq!(result.text, "");
        assert_eq!(result.score, 0.0);
    }

    #[test]
    fn test_load_dictionary() {
        let mut file = NamedTempFile::new().unwrap();
        write!(file, "0\r\n1\n$\n").unwrap();

        let charset = load_dictionary(file.path()).unwrap();
        assert_eq!(charset, vec!["0", "1", "$"]);
    }

    #[test]
    fn test_empty_dictionary_is_error() {
        let file = NamedTempFile::new().unwrap();
        assert!(load_dictionary(file.path()).is_err());
    }

    #[test]
    fn test_missing_dictionary_is_error() {
        assert!(load_dictionary(Path::new("/nonexistent/ppocr_keys.txt")).is_err());
    }
}
