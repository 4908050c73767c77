use std::collections::HashMap;

use image::{Rgb, RgbImage};
use rand::rngs::StdRng;
use rand::{Rng, SeedableRng};

use crate::detect::{BoundingBox, Detection};
use crate::pipeline::font::{self, GLYPH_HEIGHT};

const PALETTE_SEED: u64 = 42;
const BOX_THICKNESS: i64 = 2;
const LABEL_SCALE: u32 = 1;
const LABEL_BASELINE_OFFSET: i32 = 5;

pub const DEFAULT_BOX_COLOR: Rgb<u8> = Rgb([0, 255, 0]);
pub const FPS_COLOR: Rgb<u8> = Rgb([0, 255, 100]);
/// Baseline-left anchor of the FPS text.
pub const FPS_ORIGIN: (i32, i32) = (7, 36);
pub const FPS_SCALE: u32 = 2;

/// Draws detection boxes and the FPS overlay onto frames.
#[derive(Debug, Clone, Default)]
pub struct Annotator {
    palette: HashMap<String, Rgb<u8>>,
}

impl Annotator {
    /// Build a palette with one stable pseudo-random color per class name.
    pub fn with_labels(labels: &[String]) -> Self {
        let mut rng = StdRng::seed_from_u64(PALETTE_SEED);
        let palette = labels
            .iter()
            .map(|label| {
                let color = Rgb([rng.gen_range(0..255), rng.gen_range(0..255), rng.gen_range(0..255)]);
                (label.clone(), color)
            })
            .collect();
        Self { palette }
    }

    pub fn color_for(&self, label: &str) -> Rgb<u8> {
        self.palette.get(label).copied().unwrap_or(DEFAULT_BOX_COLOR)
    }

    pub fn draw_detections(&self, image: &mut RgbImage, detections: &[Detection]) {
        for detection in detections {
            let color = self.color_for(&detection.label);
            draw_box(image, &detection.bbox, color);
            let text = format!("{}: {:.4}", detection.label, detection.confidence);
            let top = detection
                .bbox
                .y
                .saturating_sub(LABEL_BASELINE_OFFSET + GLYPH_HEIGHT as i32)
                .max(0);
            font::draw_text(image, detection.bbox.x, top, &text, LABEL_SCALE, color);
        }
    }

    pub fn draw_fps(&self, image: &mut RgbImage, label: &str) {
        let (x, baseline) = FPS_ORIGIN;
        let top = baseline - (GLYPH_HEIGHT * FPS_SCALE) as i32;
        font::draw_text(image, x, top, label, FPS_SCALE, FPS_COLOR);
    }
}

/// Outline `bbox` (corners inclusive), growing the stroke inward.
///
/// Edges are walked only over the part of the box that lies inside the image,
/// so the cost is bounded by the frame size whatever the box coordinates are.
fn draw_box(image: &mut RgbImage, bbox: &BoundingBox, color: Rgb<u8>) {
    let (width, height) = (i64::from(image.width()), i64::from(image.height()));
    if width == 0 || height == 0 {
        return;
    }
    let (left, top) = (i64::from(bbox.x), i64::from(bbox.y));
    let (right, bottom) = (left + i64::from(bbox.w), top + i64::from(bbox.h));
    let (span_left, span_right) = (left.max(0), right.min(width - 1));
    let (span_top, span_bottom) = (top.max(0), bottom.min(height - 1));
    for t in 0..BOX_THICKNESS {
        for x in span_left..=span_right {
            put_clipped(image, x, top + t, color);
            put_clipped(image, x, bottom - t, color);
        }
        for y in span_top..=span_bottom {
            put_clipped(image, left + t, y, color);
            put_clipped(image, right - t, y, color);
        }
    }
}

fn put_clipped(image: &mut RgbImage, x: i64, y: i64, color: Rgb<u8>) {
    if x >= 0 && y >= 0 && x < i64::from(image.width()) && y < i64::from(image.height()) {
        image.put_pixel(x as u32, y as u32, color);
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn box_edges_are_drawn_in_default_green() {
        let mut img = RgbImage::new(80, 80);
        let det = Detection::new(BoundingBox::new(10, 10, 20, 20), "test", 0.9);
        Annotator::default().draw_detections(&mut img, &[det]);
        for (x, y) in [(10, 15), (11, 15), (30, 15), (29, 15), (20, 10), (20, 30)] {
            assert_eq!(*img.get_pixel(x, y), DEFAULT_BOX_COLOR, "pixel ({x},{y})");
        }
        assert_eq!(*img.get_pixel(20, 20), Rgb([0, 0, 0]));
    }

    #[test]
    fn boxes_partly_outside_the_frame_are_clipped() {
        let mut img = RgbImage::new(16, 16);
        let det = Detection::new(BoundingBox::new(-5, -5, 40, 40), "person", 0.7);
        Annotator::default().draw_detections(&mut img, &[det]);
        assert_eq!(*img.get_pixel(0, 0), Rgb([0, 0, 0]));
    }

    #[test]
    fn boxes_at_the_coordinate_limits_stay_in_bounds() {
        let mut img = RgbImage::new(32, 32);
        let dets = [
            Detection::new(BoundingBox::new(i32::MAX - 5, 10, 20, 20), "edge", 0.9),
            Detection::new(BoundingBox::new(i32::MIN, i32::MIN, i32::MAX, i32::MAX), "edge", 0.9),
            Detection::new(BoundingBox::new(4, 4, i32::MAX, i32::MAX), "edge", 0.9),
        ];
        Annotator::default().draw_detections(&mut img, &dets);
        assert_eq!(*img.get_pixel(4, 10), DEFAULT_BOX_COLOR);
        assert_eq!(*img.get_pixel(10, 4), DEFAULT_BOX_COLOR);
    }

    #[test]
    fn palette_is_stable_per_label() {
        let labels = vec!["person".to_string(), "car".to_string()];
        let a = Annotator::with_labels(&labels);
        let b = Annotator::with_labels(&labels);
        assert_eq!(a.color_for("car"), b.color_for("car"));
        assert_eq!(a.color_for("unknown"), DEFAULT_BOX_COLOR);
    }

    #[test]
    fn fps_text_sits_above_its_baseline() {
        let mut img = RgbImage::new(80, 80);
        Annotator::default().draw_fps(&mut img, "FPS 30");
        let lit: Vec<u32> = img
            .enumerate_pixels()
            .filter(|(_, _, p)| **p == FPS_COLOR)
            .map(|(_, y, _)| y)
            .collect();
        assert!(!lit.is_empty());
        assert!(lit.iter().all(|&y| (22..36).contains(&y)));
    }
}
