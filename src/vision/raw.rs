//! Raw engine output
//!
//! PaddleOCR has produced two incompatible result shapes over its releases:
//!
//! - legacy `ocr()` output: a list of pages, each a list of
//!   `[polygon, [text, score]]` lines;
//! - structured `predict()` output: per page, parallel `rec_texts`,
//!   `rec_polys` and `rec_scores` arrays.
//!
//! Entries are kept as loose JSON values here; the normalizer decides which of
//! them are usable.

use serde_json::{Map, Value};

use crate::error::OcrError;

/// Engine output before normalization
#[derive(Debug, Clone, PartialEq)]
pub enum RawResult {
    /// One entry per page; `None` for pages the engine returned as null
    LegacyLines(Vec<Option<Vec<Value>>>),
    /// One entry per page
    StructuredArrays(Vec<StructuredPage>),
}

/// Parallel arrays of one page of structured output
#[derive(Debug, Clone, Default, PartialEq)]
pub struct StructuredPage {
    pub rec_texts: Option<Vec<Value>>,
    pub rec_polys: Option<Vec<Value>>,
    pub rec_scores: Option<Vec<Value>>,
}

impl StructuredPage {
    /// Page built from in-process detections
    pub fn from_detections(texts: Vec<String>, polys: Vec<[[f32; 2]; 4]>, scores: Vec<f32>) -> Self {
        Self {
            rec_texts: Some(texts.into_iter().map(Value::from).collect()),
            rec_polys: Some(
                polys
                    .into_iter()
                    .map(|poly| {
                        Value::Array(
                            poly.iter()
                                .map(|p| Value::from(vec![f64::from(p[0]), f64::from(p[1])]))
                                .collect(),
                        )
                    })
                    .collect(),
            ),
            rec_scores: Some(scores.into_iter().map(|s| Value::from(f64::from(s))).collect()),
        }
    }

    /// Whether any of the three arrays is present
    pub fn has_fields(&self) -> bool {
        self.rec_texts.is_some() || self.rec_polys.is_some() || self.rec_scores.is_some()
    }

    fn from_object(mut map: Map<String, Value>) -> Result<Self, OcrError> {
        // PaddleOCR 3.x `save_to_json` nests the page under "res"
        if !has_rec_keys(&map) {
            if let Some(Value::Object(inner)) = map.remove("res") {
                map = inner;
            }
        }

        Ok(Self {
            rec_texts: take_array(&mut map, "rec_texts")?,
            rec_polys: take_array(&mut map, "rec_polys")?,
            rec_scores: take_array(&mut map, "rec_scores")?,
        })
    }
}

impl RawResult {
    /// No text found
    pub fn empty() -> Self {
        RawResult::LegacyLines(Vec::new())
    }

    /// Decide the variant from the structure of a JSON value
    pub fn from_value(value: Value) -> Result<Self, OcrError> {
        match value {
            Value::Null => Ok(Self::empty()),
            Value::Object(map) => Ok(RawResult::StructuredArrays(vec![StructuredPage::from_object(map)?])),
            Value::Array(pages) => Self::from_pages(pages),
            other => Err(OcrError::UnsupportedFormat(format!(
                "expected a list of pages or a result object, got {}",
                kind(&other)
            ))),
        }
    }

    /// Parse engine stdout
    pub fn from_json(text: &str) -> Result<Self, OcrError> {
        let value: Value = serde_json::from_str(text)
            .map_err(|e| OcrError::UnsupportedFormat(format!("engine output is not JSON: {}", e)))?;
        Self::from_value(value)
    }

    fn from_pages(pages: Vec<Value>) -> Result<Self, OcrError> {
        // the first non-null page decides the shape of the whole result
        let legacy = match pages.iter().find(|p| !p.is_null()) {
            None => return Ok(RawResult::LegacyLines(vec![None; pages.len()])),
            Some(Value::Array(_)) => true,
            Some(Value::Object(_)) => false,
            Some(other) => {
                return Err(OcrError::UnsupportedFormat(format!(
                    "pages must be lists or objects, got {}",
                    kind(other)
                )))
            }
        };

        if legacy {
            pages
                .into_iter()
                .enumerate()
                .map(|(idx, page)| match page {
                    Value::Null => Ok(None),
                    Value::Array(lines) => Ok(Some(lines)),
                    other => Err(mixed_pages(idx, &other)),
                })
                .collect::<Result<Vec<_>, _>>()
                .map(RawResult::LegacyLines)
        } else {
            pages
                .into_iter()
                .enumerate()
                .filter(|(_, page)| !page.is_null())
                .map(|(idx, page)| match page {
                    Value::Object(map) => StructuredPage::from_object(map),
                    other => Err(mixed_pages(idx, &other)),
                })
                .collect::<Result<Vec<_>, _>>()
                .map(RawResult::StructuredArrays)
        }
    }
}

fn has_rec_keys(map: &Map<String, Value>) -> bool {
    ["rec_texts", "rec_polys", "rec_scores"]
        .iter()
        .any(|key| map.contains_key(*key))
}

fn take_array(map: &mut Map<String, Value>, key: &str) -> Result<Option<Vec<Value>>, OcrError> {
    match map.remove(key) {
        None | Some(Value::Null) => Ok(None),
        Some(Value::Array(items)) => Ok(Some(items)),
        Some(other) => Err(OcrError::UnsupportedFormat(format!(
            "{} must be a list, got {}",
            key,
            kind(&other)
        ))),
    }
}

fn mixed_pages(idx: usize, page: &Value) -> OcrError {
    OcrError::UnsupportedFormat(format!("page {} is a {} in a result of another shape", idx, kind(page)))
}

fn kind(value: &Value) -> &'static str {
    match value {
        Value::Null => "null",
        Value::Bool(_) => "boolean",
        Value::Number(_) => "number",
        Value::String(_) => "string",
        Value::Array(_) => "list",
        Value::Object(_) => "object",
    }
}
