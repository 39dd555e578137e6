//! Image preprocessing for OCR models
//!
//! Handles image resizing, normalization, and tensor conversion for PaddleOCR models.

use image::imageops::{self, FilterType};
use image::RgbImage;
use ndarray::{s, Array3, Array4};

/// Preprocessing configuration
#[derive(Debug, Clone)]
pub struct PreprocessConfig {
    /// Longest side of the detection input
    pub det_limit_side: u32,
    /// Height of recognition input lines
    pub rec_height: u32,
    /// Maximum width of recognition input lines
    pub rec_max_width: u32,
    /// Orientation classifier input height
    pub cls_height: u32,
    /// Orientation classifier input width; lines are padded to it
    pub cls_width: u32,
    /// Mean values for normalization, in tensor channel order
    pub mean: [f32; 3],
    /// Std values for normalization, in tensor channel order
    pub std: [f32; 3],
}

impl Default for PreprocessConfig {
    fn default() -> Self {
        Self {
            det_limit_side: 960,
            rec_height: 48,
            rec_max_width: 320,
            cls_height: 48,
            cls_width: 192,
            // (pixel / 255.0 - 0.5) / 0.5 maps [0, 255] -> [-1, 1]
            mean: [0.5, 0.5, 0.5],
            std: [0.5, 0.5, 0.5],
        }
    }
}

/// Detection tensor plus the size it was resized to
pub struct DetectionInput {
    pub tensor: Array4<f32>,
    pub width: u32,
    pub height: u32,
}

/// Detection input size: longest side capped at `limit`, both sides multiples of 32
pub fn detection_size(width: u32, height: u32, limit: u32) -> (u32, u32) {
    let longest = width.max(height).max(1) as f32;
    let ratio = if longest > limit as f32 {
        limit as f32 / longest
    } else {
        1.0
    };

    let round_32 = |side: u32| {
        let scaled = (side as f32 * ratio).round() as u32;
        ((scaled + 16) / 32 * 32).max(32)
    };
    (round_32(width), round_32(height))
}

/// Convert an RGB image to a normalized CHW array in BGR channel order
pub fn to_chw(image: &RgbImage, mean: &[f32; 3], std: &[f32; 3]) -> Array3<f32> {
    let (w, h) = (image.width() as usize, image.height() as usize);
    let mut tensor = Array3::<f32>::zeros((3, h, w));

    for (x, y, pixel) in image.enumerate_pixels() {
        let (x, y) = (x as usize, y as usize);
        // PP-OCR models are trained on BGR input
        for (c, value) in [pixel[2], pixel[1], pixel[0]].into_iter().enumerate() {
            tensor[[c, y, x]] = (value as f32 / 255.0 - mean[c]) / std[c];
        }
    }

    tensor
}

/// Full preprocessing pipeline for detection
pub fn preprocess_for_detection(image: &RgbImage, config: &PreprocessConfig) -> DetectionInput {
    let (width, height) = detection_size(image.width(), image.height(), config.det_limit_side);
    let resized = imageops::resize(image, width, height, FilterType::Triangle);

    let tensor = to_chw(&resized, &config.mean, &config.std).insert_axis(ndarray::Axis(0));

    DetectionInput {
        tensor,
        width,
        height,
    }
}

/// Resize a text line to a fixed height, keeping aspect ratio up to `max_width`
pub fn resize_for_recognition(image: &RgbImage, target_height: u32, max_width: u32) -> RgbImage {
    let (w, h) = (image.width().max(1), image.height().max(1));
    let scaled = (w as f32 * target_height as f32 / h as f32).ceil() as u32;
    let new_w = scaled.clamp(1, max_width);

    imageops::resize(image, new_w, target_height, FilterType::Triangle)
}

/// Stack text lines into one recognition batch, padded to the widest line
pub fn recognition_batch(lines: &[RgbImage], config: &PreprocessConfig) -> Array4<f32> {
    line_batch(lines, config.rec_height, config.rec_max_width, false, config)
}

/// Stack text lines into one classifier batch at the classifier's fixed width
pub fn classifier_batch(lines: &[RgbImage], config: &PreprocessConfig) -> Array4<f32> {
    line_batch(lines, config.cls_height, config.cls_width, true, config)
}

fn line_batch(
    lines: &[RgbImage],
    height: u32,
    max_width: u32,
    fixed_width: bool,
    config: &PreprocessConfig,
) -> Array4<f32> {
    let resized: Vec<RgbImage> = lines
        .iter()
        .map(|line| resize_for_recognition(line, height, max_width))
        .collect();

    let width = if fixed_width {
        max_width
    } else {
        resized.iter().map(RgbImage::width).max().unwrap_or(1)
    };

    // zero after normalization is mid-gray padding
    let mut batch = Array4::<f32>::zeros((resized.len(), 3, height as usize, width as usize));
    for (i, line) in resized.iter().enumerate() {
        let tensor = to_chw(line, &config.mean, &config.std);
        let line_w = line.width() as usize;
        batch.slice_mut(s![i, .., .., ..line_w]).assign(&tensor);
    }

    batch
}

/// Crop the axis-aligned bounds of a box, clamped to the image
pub fn crop_box(image: &RgbImage, points: &[[f32; 2]; 4]) -> RgbImage {
    let min_x = points.iter().map(|p| p[0]).fold(f32::INFINITY, f32::min);
    let min_y = points.iter().map(|p| p[1]).fold(f32::INFINITY, f32::min);
    let max_x = points.iter().map(|p| p[0]).fold(f32::NEG_INFINITY, f32::max);
    let max_y = points.iter().map(|p| p[1]).fold(f32::NEG_INFINITY, f32::max);

    let img_w = image.width().max(1);
    let img_h = image.height().max(1);

    let x1 = (min_x.max(0.0) as u32).min(img_w - 1);
    let y1 = (min_y.max(0.0) as u32).min(img_h - 1);
    let x2 = (max_x.max(0.0).ceil() as u32).clamp(x1 + 1, img_w);
    let y2 = (max_y.max(0.0).ceil() as u32).clamp(y1 + 1, img_h);

    imageops::crop_imm(image, x1, y1, x2 - x1, y2 - y1).to_image()
}
