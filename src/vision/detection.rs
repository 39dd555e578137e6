//! Text detection
//!
//! DB (Differentiable Binarization) post-processing over the detection model's
//! probability map. Contours of the thresholded map become rotated boxes,
//! which are scored, grown and mapped back onto the source image.

use std::cmp::Ordering;

use image::{GrayImage, Luma, RgbImage};
use imageproc::contours::{find_contours, BorderType};
use imageproc::geometry::min_area_rect;
use ndarray::{Array2, ArrayView2};
use ort::session::Session;
use tracing::debug;

use super::models::run_session;
use super::preprocess::{preprocess_for_detection, PreprocessConfig};
use crate::error::OcrError;

/// Boxes whose tops are within this many pixels are treated as one line
const SAME_LINE_TOLERANCE: f32 = 10.0;

/// DB post-processing parameters
#[derive(Debug, Clone)]
pub struct DetectorConfig {
    /// Binarization threshold on the probability map
    pub thresh: f32,
    /// Minimum mean probability inside a box
    pub box_thresh: f32,
    /// Box growth factor
    pub unclip_ratio: f32,
    /// Shortest side a box may have, in map pixels
    pub min_side: f32,
    /// Upper bound on contours examined per image
    pub max_candidates: usize,
}

impl Default for DetectorConfig {
    fn default() -> Self {
        Self {
            thresh: 0.3,
            box_thresh: 0.6,
            unclip_ratio: 1.5,
            min_side: 3.0,
            max_candidates: 1000,
        }
    }
}

/// A detected text box in source image coordinates
#[derive(Debug, Clone, PartialEq)]
pub struct TextBox {
    /// Top-left first, clockwise
    pub points: [[f32; 2]; 4],
    pub score: f32,
}

/// DB text detector
pub struct TextDetector {
    session: Session,
    config: DetectorConfig,
    preprocess: PreprocessConfig,
}

impl TextDetector {
    pub fn new(session: Session, config: DetectorConfig, preprocess: PreprocessConfig) -> Self {
        Self {
            session,
            config,
            preprocess,
        }
    }

    /// Detect text boxes, sorted in reading order
    pub fn detect(&mut self, image: &RgbImage) -> Result<Vec<TextBox>, OcrError> {
        let input = preprocess_for_detection(image, &self.preprocess);
        let output = run_session(&mut self.session, input.tensor, "detection")?;

        let (h, w) = match *output.shape() {
            [_, _, h, w] | [_, h, w] => (h, w),
            ref other => {
                return Err(OcrError::engine(format!(
                    "unexpected detection output shape {:?}",
                    other
                )))
            }
        };
        let prob: Array2<f32> = output
            .into_shape_with_order((h, w))
            .map_err(|e| OcrError::engine(format!("detection output: {}", e)))?;

        let boxes = boxes_from_probability(prob.view(), &self.config, image.width(), image.height());
        debug!("Detected {} text boxes in {}x{} image", boxes.len(), image.width(), image.height());
        Ok(boxes)
    }
}

/// Extract boxes from a probability map and scale them to `dest_w` x `dest_h`
pub fn boxes_from_probability(
    prob: ArrayView2<f32>,
    config: &DetectorConfig,
    dest_w: u32,
    dest_h: u32,
) -> Vec<TextBox> {
    let (h, w) = prob.dim();
    let bitmap = GrayImage::from_fn(w as u32, h as u32, |x, y| {
        if prob[[y as usize, x as usize]] > config.thresh {
            Luma([255])
        } else {
            Luma([0])
        }
    });

    let scale_x = dest_w as f32 / w.max(1) as f32;
    let scale_y = dest_h as f32 / h.max(1) as f32;

    let mut boxes: Vec<TextBox> = find_contours::<i32>(&bitmap)
        .into_iter()
        .filter(|contour| contour.border_type == BorderType::Outer && contour.points.len() >= 4)
        .take(config.max_candidates)
        .filter_map(|contour| {
            let rect = min_area_rect(&contour.points).map(|p| [p.x as f32, p.y as f32]);
            if short_side(&rect) < config.min_side {
                return None;
            }

            let score = box_score(prob, &rect);
            if score < config.box_thresh {
                return None;
            }

            let grown = unclip(&rect, config.unclip_ratio);
            if short_side(&grown) < config.min_side + 2.0 {
                return None;
            }

            let scaled = grown.map(|[x, y]| {
                [
                    (x * scale_x).round().clamp(0.0, dest_w as f32),
                    (y * scale_y).round().clamp(0.0, dest_h as f32),
                ]
            });
            Some(TextBox {
                points: order_points(scaled),
                score,
            })
        })
        .collect();

    sort_reading_order(&mut boxes);
    boxes
}

fn distance(a: [f32; 2], b: [f32; 2]) -> f32 {
    ((a[0] - b[0]).powi(2) + (a[1] - b[1]).powi(2)).sqrt()
}

/// Shorter side of a rectangle given as consecutive corners
fn short_side(rect: &[[f32; 2]; 4]) -> f32 {
    distance(rect[0], rect[1]).min(distance(rect[1], rect[2]))
}

/// Mean probability of the map pixels inside the quadrilateral
fn box_score(prob: ArrayView2<f32>, quad: &[[f32; 2]; 4]) -> f32 {
    let (h, w) = prob.dim();
    if h == 0 || w == 0 {
        return 0.0;
    }
    let min_x = quad.iter().map(|p| p[0]).fold(f32::INFINITY, f32::min).floor().max(0.0) as usize;
    let max_x = (quad.iter().map(|p| p[0]).fold(f32::NEG_INFINITY, f32::max).ceil().max(0.0) as usize).min(w - 1);
    let min_y = quad.iter().map(|p| p[1]).fold(f32::INFINITY, f32::min).floor().max(0.0) as usize;
    let max_y = (quad.iter().map(|p| p[1]).fold(f32::NEG_INFINITY, f32::max).ceil().max(0.0) as usize).min(h - 1);

    let mut sum = 0.0f32;
    let mut count = 0usize;
    for y in min_y..=max_y {
        for x in min_x..=max_x {
            if contains(quad, [x as f32, y as f32]) {
                sum += prob[[y, x]];
                count += 1;
            }
        }
    }

    if count == 0 {
        0.0
    } else {
        sum / count as f32
    }
}

/// Point-in-convex-quadrilateral, boundary inclusive
fn contains(quad: &[[f32; 2]; 4], p: [f32; 2]) -> bool {
    let mut sign = 0.0f32;
    for i in 0..4 {
        let a = quad[i];
        let b = quad[(i + 1) % 4];
        let cross = (b[0] - a[0]) * (p[1] - a[1]) - (b[1] - a[1]) * (p[0] - a[0]);
        if cross.abs() <= f32::EPSILON {
            continue;
        }
        if sign == 0.0 {
            sign = cross.signum();
        } else if cross.signum() != sign {
            return false;
        }
    }
    true
}

/// Grow a rectangle outward by `area * ratio / perimeter` on every side
pub fn unclip(rect: &[[f32; 2]; 4], ratio: f32) -> [[f32; 2]; 4] {
    let side_u = distance(rect[0], rect[1]);
    let side_v = distance(rect[1], rect[2]);
    if side_u <= f32::EPSILON || side_v <= f32::EPSILON {
        return *rect;
    }

    let delta = side_u * side_v * ratio / (2.0 * (side_u + side_v));

    let cx = rect.iter().map(|p| p[0]).sum::<f32>() / 4.0;
    let cy = rect.iter().map(|p| p[1]).sum::<f32>() / 4.0;
    let u = [(rect[1][0] - rect[0][0]) / side_u, (rect[1][1] - rect[0][1]) / side_u];
    let v = [(rect[2][0] - rect[1][0]) / side_v, (rect[2][1] - rect[1][1]) / side_v];
    let a = side_u / 2.0 + delta;
    let b = side_v / 2.0 + delta;

    let corner = |su: f32, sv: f32| [cx + su * a * u[0] + sv * b * v[0], cy + su * a * u[1] + sv * b * v[1]];
    [corner(-1.0, -1.0), corner(1.0, -1.0), corner(1.0, 1.0), corner(-1.0, 1.0)]
}

/// Order corners as top-left, top-right, bottom-right, bottom-left
pub fn order_points(mut points: [[f32; 2]; 4]) -> [[f32; 2]; 4] {
    points.sort_by(|a, b| a[0].partial_cmp(&b[0]).unwrap_or(Ordering::Equal));

    // two leftmost points, then two rightmost; split each pair by y
    let (top_left, bottom_left) = if points[1][1] > points[0][1] {
        (points[0], points[1])
    } else {
        (points[1], points[0])
    };
    let (top_right, bottom_right) = if points[3][1] > points[2][1] {
        (points[2], points[3])
    } else {
        (points[3], points[2])
    };

    [top_left, top_right, bottom_right, bottom_left]
}

/// Top-to-bottom, then left-to-right within a line
pub fn sort_reading_order(boxes: &mut [TextBox]) {
    boxes.sort_by(|a, b| {
        let (a, b) = (a.points[0], b.points[0]);
        a[1].partial_cmp(&b[1])
            .unwrap_or(Ordering::Equal)
            .then(a[0].partial_cmp(&b[0]).unwrap_or(Ordering::Equal))
    });

    // boxes on the same visual line may start a few pixels apart vertically
    for i in 0..boxes.len().saturating_sub(1) {
        for j in (0..=i).rev() {
            let (upper, lower) = (boxes[j].points[0], boxes[j + 1].points[0]);
            if (lower[1] - upper[1]).abs() < SAME_LINE_TOLERANCE && lower[0] < upper[0] {
                boxes.swap(j, j + 1);
            } else {
                break;
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn text_box(x: f32, y: f32) -> TextBox {
        TextBox {
            points: [[x, y], [x + 20.0, y], [x + 20.0, y + 8.0], [x, y + 8.0]],
            score: 0.9,
        }
    }

    #[test]
    fn test_order_points_starts_top_left_clockwise() {
        let shuffled = [[10.0, 20.0], [0.0, 0.0], [10.0, 0.0], [0.0, 20.0]];

        assert_eq!(
            order_points(shuffled),
            [[0.0, 0.0], [10.0, 0.0], [10.0, 20.0], [0.0, 20.0]]
        );
    }

    #[test]
    fn test_unclip_grows_every_side() {
        let rect = [[0.0, 0.0], [10.0, 0.0], [10.0, 4.0], [0.0, 4.0]];

        let grown = order_points(unclip(&rect, 1.5));

        // delta = 40 * 1.5 / 28
        let delta = 60.0 / 28.0;
        let expected = [
            [-delta, -delta],
            [10.0 + delta, -delta],
            [10.0 + delta, 4.0 + delta],
            [-delta, 4.0 + delta],
        ];
        for (got, want) in grown.iter().zip(expected.iter()) {
            assert!((got[0] - want[0]).abs() < 1e-4, "{:?} != {:?}", got, want);
            assert!((got[1] - want[1]).abs() < 1e-4, "{:?} != {:?}", got, want);
        }
    }

    #[test]
    fn test_box_score_is_mean_inside_box() {
        let mut prob = Array2::<f32>::zeros((10, 10));
        for y in 2..=4 {
            for x in 2..=6 {
                prob[[y, x]] = 0.8;
            }
        }
        let rect = [[2.0, 2.0], [6.0, 2.0], [6.0, 4.0], [2.0, 4.0]];

        assert!((box_score(prob.view(), &rect) - 0.8).abs() < 1e-6);
    }

    #[test]
    fn test_reading_order() {
        let mut boxes = vec![
            text_box(100.0, 52.0),
            text_box(10.0, 10.0),
            text_box(5.0, 55.0),
            text_box(80.0, 12.0),
        ];

        sort_reading_order(&mut boxes);

        let origins: Vec<_> = boxes.iter().map(|b| b.points[0]).collect();
        assert_eq!(
            origins,
            vec![[10.0, 10.0], [80.0, 12.0], [5.0, 55.0], [100.0, 52.0]]
        );
    }

    #[test]
    fn test_boxes_from_probability() {
        let mut prob = Array2::<f32>::zeros((32, 64));
        // two text blobs on separate lines
        for y in 4..12 {
            for x in 8..40 {
                prob[[y, x]] = 0.9;
            }
        }
        for y in 20..28 {
            for x in 4..30 {
                prob[[y, x]] = 0.95;
            }
        }
        // speck below the minimum size
        prob[[30, 60]] = 0.99;

        let boxes = boxes_from_probability(prob.view(), &DetectorConfig::default(), 128, 64);

        assert_eq!(boxes.len(), 2);
        assert!(boxes[0].points[0][1] < boxes[1].points[0][1]);
        assert!((boxes[0].score - 0.9).abs() < 0.05);
        // scaled to the 2x destination and grown past each blob's corner
        let blob_origins = [[16.0, 8.0], [8.0, 40.0]];
        for (b, origin) in boxes.iter().zip(blob_origins) {
            assert!(b.points[0][0] < origin[0] && b.points[0][1] < origin[1]);
            assert!(b.points.iter().all(|p| p[0] <= 128.0 && p[1] <= 64.0));
            assert!(b.points[2][0] > b.points[0][0] && b.points[2][1] > b.points[0][1]);
        }
    }

    #[test]
    fn test_empty_map_yields_no_boxes() {
        let prob = Array2::<f32>::zeros((16, 16));
        assert!(boxes_from_probability(prob.view(), &DetectorConfig::default(), 16, 16).is_empty());
    }
}
