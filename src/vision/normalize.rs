//! Result normalization
//!
//! Converts either [`RawResult`] shape into canonical [`TextRegion`]s.
//! Individual malformed entries are dropped and reported as
//! [`PartialParseError`]s; only a result with no recognizable fields at all
//! fails the request.

use serde_json::Value;
use thiserror::Error;
use tracing::{debug, warn};

use super::raw::{RawResult, StructuredPage};
use crate::error::OcrError;
use crate::shared::messages::{Point, TextRegion};

/// An entry dropped during normalization; never fatal
#[derive(Debug, Clone, PartialEq, Error)]
#[error("page {page}, entry {index}: {reason}")]
pub struct PartialParseError {
    pub page: usize,
    pub index: usize,
    pub reason: String,
}

/// Canonical regions plus the entries that had to be skipped
#[derive(Debug, Clone, Default, PartialEq)]
pub struct Normalized {
    pub regions: Vec<TextRegion>,
    pub skipped: Vec<PartialParseError>,
}

impl Normalized {
    fn push(&mut self, page: usize, index: usize, entry: Result<Option<TextRegion>, String>) {
        match entry {
            Ok(Some(region)) => self.regions.push(region),
            // blank text
            Ok(None) => {}
            Err(reason) => {
                let skipped = PartialParseError { page, index, reason };
                debug!("Skipping OCR entry: {}", skipped);
                self.skipped.push(skipped);
            }
        }
    }
}

/// Normalize engine output into canonical regions
pub fn normalize(raw: &RawResult) -> Result<Normalized, OcrError> {
    let normalized = match raw {
        RawResult::LegacyLines(pages) => normalize_legacy(pages)?,
        RawResult::StructuredArrays(pages) => normalize_structured(pages)?,
    };

    if !normalized.skipped.is_empty() {
        warn!(
            "Skipped {} malformed OCR entries, kept {}",
            normalized.skipped.len(),
            normalized.regions.len()
        );
    }
    Ok(normalized)
}

fn normalize_legacy(pages: &[Option<Vec<Value>>]) -> Result<Normalized, OcrError> {
    let mut lines = pages.iter().flatten().flatten().peekable();
    if lines.peek().is_some() && !lines.any(Value::is_array) {
        return Err(OcrError::UnsupportedFormat(
            "legacy result has no [polygon, [text, confidence]] lines".to_string(),
        ));
    }

    let mut out = Normalized::default();

    for (page_idx, page) in pages.iter().enumerate() {
        let Some(lines) = page else {
            continue;
        };
        for (idx, line) in lines.iter().enumerate() {
            out.push(page_idx, idx, legacy_line(line));
        }
    }

    Ok(out)
}

/// `[polygon, [text, confidence]]`; extra trailing elements are ignored
fn legacy_line(line: &Value) -> Result<Option<TextRegion>, String> {
    let parts = match line {
        Value::Array(parts) if parts.len() > 1 => parts,
        Value::Array(_) => return Err("line has fewer than 2 elements".to_string()),
        _ => return Err("line is not a list".to_string()),
    };

    let (text, confidence) = match &parts[1] {
        Value::Array(info) if info.len() > 1 => (&info[0], &info[1]),
        _ => return Err("line has no (text, confidence) pair".to_string()),
    };

    region_from_parts(text, &parts[0], confidence)
}

fn normalize_structured(pages: &[StructuredPage]) -> Result<Normalized, OcrError> {
    if !pages.is_empty() && !pages.iter().any(StructuredPage::has_fields) {
        return Err(OcrError::UnsupportedFormat(
            "result has none of rec_texts, rec_polys, rec_scores".to_string(),
        ));
    }

    let mut out = Normalized::default();

    for (page_idx, page) in pages.iter().enumerate() {
        let texts = page.rec_texts.as_deref().unwrap_or_default();
        let polys = page.rec_polys.as_deref().unwrap_or_default();
        let scores = page.rec_scores.as_deref().unwrap_or_default();

        // unmatched trailing entries are ignored
        for (idx, ((text, poly), score)) in texts.iter().zip(polys).zip(scores).enumerate() {
            out.push(page_idx, idx, region_from_parts(text, poly, score));
        }
    }

    Ok(out)
}

/// Build a region, or `None` if the text is blank
fn region_from_parts(text: &Value, polygon: &Value, confidence: &Value) -> Result<Option<TextRegion>, String> {
    let text = coerce_text(text)?;
    let bounding_box = coerce_polygon(polygon)?;
    let confidence = coerce_confidence(confidence)?;

    if text.trim().is_empty() {
        return Ok(None);
    }
    Ok(Some(TextRegion::new(text, confidence, bounding_box)))
}

fn coerce_text(value: &Value) -> Result<String, String> {
    match value {
        Value::String(s) => Ok(s.clone()),
        Value::Number(n) => Ok(n.to_string()),
        Value::Null => Ok(String::new()),
        _ => Err("text is not a string".to_string()),
    }
}

/// Exactly four `[x, y]` points, truncated toward zero
fn coerce_polygon(value: &Value) -> Result<[Point; 4], String> {
    let points = match value {
        Value::Array(points) if points.len() == 4 => points,
        Value::Array(points) => return Err(format!("polygon has {} points, expected 4", points.len())),
        _ => return Err("polygon is not a list".to_string()),
    };

    let mut out = [Point(0, 0); 4];
    for (slot, point) in out.iter_mut().zip(points) {
        *slot = coerce_point(point)?;
    }
    Ok(out)
}

fn coerce_point(value: &Value) -> Result<Point, String> {
    let coords = match value {
        Value::Array(coords) if coords.len() >= 2 => coords,
        _ => return Err("point is not an [x, y] pair".to_string()),
    };
    Ok(Point(coerce_coord(&coords[0])?, coerce_coord(&coords[1])?))
}

fn coerce_coord(value: &Value) -> Result<i64, String> {
    match value.as_f64() {
        Some(v) if v.is_finite() => Ok(v.trunc() as i64),
        _ => Err(format!("coordinate {} is not a finite number", value)),
    }
}

fn coerce_confidence(value: &Value) -> Result<f64, String> {
    let confidence = match value {
        Value::Null => return Ok(0.0),
        Value::Number(n) => n.as_f64(),
        Value::String(s) => s.trim().parse::<f64>().ok(),
        _ => None,
    };

    match confidence {
        Some(c) if c.is_finite() => Ok(c),
        _ => Err(format!("confidence {} is not a finite number", value)),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn poly(offset: i64) -> Value {
        json!([[offset, 0], [offset + 10, 0], [offset + 10, 5], [offset, 5]])
    }

    fn structured(texts: Value, polys: Value, scores: Value) -> RawResult {
        RawResult::from_value(json!([{
            "rec_texts": texts,
            "rec_polys": polys,
            "rec_scores": scores
        }]))
        .unwrap()
    }

    #[test]
    fn test_legacy_skips_line_without_text_pair() {
        let raw = RawResult::LegacyLines(vec![Some(vec![
            json!([poly(0), null]),
            json!([poly(20), ["OK", 0.91]]),
        ])]);

        let normalized = normalize(&raw).unwrap();
        assert_eq!(normalized.regions.len(), 1);
        assert_eq!(normalized.regions[0].text(), "OK");
        assert_eq!(normalized.regions[0].confidence(), 0.91);
        assert_eq!(normalized.skipped.len(), 1);
        assert_eq!(normalized.skipped[0].index, 0);
    }

    #[test]
    fn test_legacy_line_validity() {
        let raw = RawResult::LegacyLines(vec![Some(vec![
            json!("not a line"),
            json!([poly(0)]),
            json!([poly(0), ["only text"]]),
            json!([poly(0), ["extra", 0.5], "ignored"]),
        ])]);

        let normalized = normalize(&raw).unwrap();
        assert_eq!(normalized.regions.len(), 1);
        assert_eq!(normalized.regions[0].text(), "extra");
        assert_eq!(normalized.skipped.len(), 3);
    }

    #[test]
    fn test_legacy_without_any_line_is_unsupported() {
        for value in [json!([[1, 2, 3]]), json!([["Invoice"]]), json!([null, [{"text": "x"}]])] {
            let raw = RawResult::from_value(value.clone()).unwrap();
            assert!(
                matches!(normalize(&raw), Err(OcrError::UnsupportedFormat(_))),
                "{} should be unsupported",
                value
            );
        }
    }

    #[test]
    fn test_legacy_malformed_line_is_still_skipped() {
        let raw = RawResult::from_value(json!([[[poly(0), null]]])).unwrap();

        let normalized = normalize(&raw).unwrap();
        assert!(normalized.regions.is_empty());
        assert_eq!(normalized.skipped.len(), 1);
    }

    #[test]
    fn test_legacy_multiple_pages() {
        let raw = RawResult::LegacyLines(vec![
            Some(vec![json!([poly(0), ["first", 0.8]])]),
            None,
            Some(vec![json!([poly(0), ["second", 0.7]])]),
        ]);

        let normalized = normalize(&raw).unwrap();
        let texts: Vec<_> = normalized.regions.iter().map(|r| r.text()).collect();
        assert_eq!(texts, vec!["first", "second"]);
    }

    #[test]
    fn test_structured_zips_to_shortest() {
        let raw = structured(
            json!(["A", "B", "C"]),
            json!([poly(1), poly(2)]),
            json!([0.9, 0.8, 0.7]),
        );

        let normalized = normalize(&raw).unwrap();
        assert_eq!(normalized.regions.len(), 2);
        assert_eq!(normalized.regions[0].text(), "A");
        assert_eq!(normalized.regions[0].bounding_box()[0], Point(1, 0));
        assert_eq!(normalized.regions[0].confidence(), 0.9);
        assert_eq!(normalized.regions[1].text(), "B");
        assert_eq!(normalized.regions[1].bounding_box()[0], Point(2, 0));
        assert_eq!(normalized.regions[1].confidence(), 0.8);
        // trailing unmatched entries are not parse errors
        assert!(normalized.skipped.is_empty());
    }

    #[test]
    fn test_structured_missing_array_yields_nothing() {
        let raw = RawResult::from_value(json!({"rec_texts": ["A"], "rec_scores": [0.9]})).unwrap();

        let normalized = normalize(&raw).unwrap();
        assert!(normalized.regions.is_empty());
        assert!(normalized.skipped.is_empty());
    }

    #[test]
    fn test_structured_without_fields_is_unsupported() {
        let raw = RawResult::from_value(json!([{"input_path": "a.png"}])).unwrap();

        let result = normalize(&raw);
        assert!(matches!(result, Err(OcrError::UnsupportedFormat(_))));
    }

    #[test]
    fn test_empty_result_is_success() {
        assert!(normalize(&RawResult::empty()).unwrap().regions.is_empty());

        let raw = structured(json!([]), json!([]), json!([]));
        let normalized = normalize(&raw).unwrap();
        assert!(normalized.regions.is_empty());
        assert!(normalized.skipped.is_empty());
    }

    #[test]
    fn test_coordinates_are_truncated() {
        let raw = structured(
            json!(["Invoice"]),
            json!([[[100.9, 50.2], [300.99, 50.5], [300.1, 80.7], [-1.9, 80.0]]]),
            json!([0.98765]),
        );

        let normalized = normalize(&raw).unwrap();
        let region = &normalized.regions[0];
        assert_eq!(
            region.bounding_box(),
            &[Point(100, 50), Point(300, 50), Point(300, 80), Point(-1, 80)]
        );
        assert_eq!(region.confidence(), 0.988);
    }

    #[test]
    fn test_bad_entries_are_skipped_not_fatal() {
        let raw = structured(
            json!(["bad-poly", "bad-score", "bad-text", "good"]),
            json!([[[0, 0], [1, 1], [2, 2]], poly(0), poly(0), poly(0)]),
            json!([0.5, "high", 0.5, "0.75"]),
        );
        let raw = match raw {
            RawResult::StructuredArrays(mut pages) => {
                pages[0].rec_texts.as_mut().unwrap()[2] = json!({"text": "nested"});
                RawResult::StructuredArrays(pages)
            }
            other => other,
        };

        let normalized = normalize(&raw).unwrap();
        assert_eq!(normalized.regions.len(), 1);
        assert_eq!(normalized.regions[0].text(), "good");
        assert_eq!(normalized.regions[0].confidence(), 0.75);
        let skipped: Vec<_> = normalized.skipped.iter().map(|s| s.index).collect();
        assert_eq!(skipped, vec![0, 1, 2]);
    }

    #[test]
    fn test_blank_text_is_filtered() {
        let raw = structured(json!(["", "   ", "text"]), json!([poly(0), poly(1), poly(2)]), json!([0.9, 0.9, 0.9]));

        let normalized = normalize(&raw).unwrap();
        assert_eq!(normalized.regions.len(), 1);
        assert!(normalized.skipped.is_empty());
    }

    #[test]
    fn test_null_confidence_is_zero() {
        let raw = RawResult::LegacyLines(vec![Some(vec![json!([poly(0), ["text", null]])])]);

        let normalized = normalize(&raw).unwrap();
        assert_eq!(normalized.regions[0].confidence(), 0.0);
    }

    #[test]
    fn test_numeric_text_is_stringified() {
        let raw = RawResult::LegacyLines(vec![Some(vec![json!([poly(0), [12345, 0.6]])])]);

        let normalized = normalize(&raw).unwrap();
        assert_eq!(normalized.regions[0].text(), "12345");
    }

    #[test]
    fn test_every_region_is_well_formed() {
        let raw = structured(
            json!(["a", "b", "c", "d"]),
            json!([poly(0), poly(1), poly(2), poly(3)]),
            json!([1.5, -0.3, 0.4999, 0.0005]),
        );

        let normalized = normalize(&raw).unwrap();
        assert_eq!(normalized.regions.len(), 4);
        for region in &normalized.regions {
            assert!((0.0..=1.0).contains(&region.confidence()));
            assert_eq!(region.bounding_box().len(), 4);
        }
    }
}
