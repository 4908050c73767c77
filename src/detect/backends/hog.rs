//! Sliding-window HOG person detector.
//!
//! Classic Dalal-Triggs layout: 64x128 window, 8x8 cells, 9 unsigned orientation
//! bins, 2x2-cell blocks with a one-cell stride and L2-Hys normalization, giving a
//! 3780-element descriptor scored by a linear classifier.
//!
//! The image is scanned over a pyramid. Each level is the source shrunk by
//! `scale^k`, padded by `padding` (edge replicated) and walked with `window_stride`.
//! Window scores are squashed through a logistic so they can be compared against
//! the shared confidence threshold.

use std::path::Path;

use anyhow::{anyhow, Context, Result};
use image::imageops::{self, FilterType};
use image::{GrayImage, Luma, RgbImage};
use serde::Deserialize;

use crate::detect::backend::DetectorBackend;
use crate::detect::nms::non_max_suppression;
use crate::detect::result::{BoundingBox, Detection, DetectionConfig, DetectionResult};

pub const WINDOW_WIDTH: u32 = 64;
pub const WINDOW_HEIGHT: u32 = 128;
pub const DESCRIPTOR_LEN: usize = WINDOW_BLOCKS_X * WINDOW_BLOCKS_Y * BLOCK_LEN;

const CELL: usize = 8;
const BINS: usize = 9;
const BLOCK_LEN: usize = 4 * BINS;
const WINDOW_CELLS_X: usize = WINDOW_WIDTH as usize / CELL;
const WINDOW_CELLS_Y: usize = WINDOW_HEIGHT as usize / CELL;
const WINDOW_BLOCKS_X: usize = WINDOW_CELLS_X - 1;
const WINDOW_BLOCKS_Y: usize = WINDOW_CELLS_Y - 1;
const MAX_PYRAMID_LEVELS: usize = 64;
const L2_HYS_CLIP: f32 = 0.2;
const PERSON_LABEL: &str = "person";

/// Linear classifier over HOG descriptors.
#[derive(Clone, Debug, Deserialize)]
pub struct LinearClassifier {
    pub weights: Vec<f32>,
    pub bias: f32,
}

impl LinearClassifier {
    pub fn new(weights: Vec<f32>, bias: f32) -> Result<Self> {
        let classifier = Self { weights, bias };
        classifier.validate()?;
        Ok(classifier)
    }

    /// Load `{"weights": [...], "bias": f32}` from a JSON file.
    pub fn load(path: &Path) -> Result<Self> {
        let raw = std::fs::read_to_string(path)
            .with_context(|| format!("read HOG classifier {}", path.display()))?;
        let classifier: Self = serde_json::from_str(&raw)
            .with_context(|| format!("parse HOG classifier {}", path.display()))?;
        classifier.validate()?;
        Ok(classifier)
    }

    fn validate(&self) -> Result<()> {
        if self.weights.len() != DESCRIPTOR_LEN {
            return Err(anyhow!(
                "HOG classifier has {} weights, expected {}",
                self.weights.len(),
                DESCRIPTOR_LEN
            ));
        }
        Ok(())
    }
}

/// Scan parameters, fixed at construction.
#[derive(Clone, Copy, Debug, PartialEq)]
pub struct RegionParams {
    /// Window step in pixels (x, y). Must be a multiple of the 8px cell size.
    pub window_stride: (u32, u32),
    /// Border added around each pyramid level (x, y).
    pub padding: (u32, u32),
    /// Pyramid scale factor between levels. Must be > 1.
    pub scale: f32,
}

impl Default for RegionParams {
    fn default() -> Self {
        Self {
            window_stride: (8, 8),
            padding: (8, 8),
            scale: 1.05,
        }
    }
}

impl RegionParams {
    pub fn validate(&self) -> Result<()> {
        let (sx, sy) = self.window_stride;
        if sx == 0 || sy == 0 || sx as usize % CELL != 0 || sy as usize % CELL != 0 {
            return Err(anyhow!(
                "window stride {}x{} must be a non-zero multiple of {}",
                sx,
                sy,
                CELL
            ));
        }
        if !(self.scale > 1.0) || !self.scale.is_finite() {
            return Err(anyhow!("pyramid scale must be greater than 1.0"));
        }
        Ok(())
    }
}

/// Classical region (pedestrian) detector.
pub struct RegionDetector {
    classifier: LinearClassifier,
    params: RegionParams,
}

impl RegionDetector {
    pub fn new(classifier: LinearClassifier, params: RegionParams) -> Result<Self> {
        classifier.validate()?;
        params.validate()?;
        Ok(Self { classifier, params })
    }

    pub fn params(&self) -> RegionParams {
        self.params
    }

    fn scan_level(
        &self,
        padded: &GrayImage,
        level_scale: f32,
        config: &DetectionConfig,
        out: &mut Vec<Detection>,
    ) {
        let blocks = BlockGrid::compute(padded);
        if blocks.cells_x < WINDOW_CELLS_X || blocks.cells_y < WINDOW_CELLS_Y {
            return;
        }
        let step_x = self.params.window_stride.0 as usize / CELL;
        let step_y = self.params.window_stride.1 as usize / CELL;
        let (pad_x, pad_y) = self.params.padding;

        for cy in (0..=blocks.cells_y - WINDOW_CELLS_Y).step_by(step_y) {
            for cx in (0..=blocks.cells_x - WINDOW_CELLS_X).step_by(step_x) {
                let score = self.score_window(&blocks, cx, cy);
                let confidence = logistic(score);
                if confidence <= config.confidence_threshold {
                    continue;
                }
                let x = (cx * CELL) as f32 - pad_x as f32;
                let y = (cy * CELL) as f32 - pad_y as f32;
                let bbox = BoundingBox::new(
                    (x * level_scale).round() as i32,
                    (y * level_scale).round() as i32,
                    (WINDOW_WIDTH as f32 * level_scale).round() as i32,
                    (WINDOW_HEIGHT as f32 * level_scale).round() as i32,
                );
                out.push(Detection::new(bbox, PERSON_LABEL, confidence));
            }
        }
    }

    fn score_window(&self, blocks: &BlockGrid, cx: usize, cy: usize) -> f32 {
        let mut score = self.classifier.bias;
        let mut offset = 0;
        for by in 0..WINDOW_BLOCKS_Y {
            for bx in 0..WINDOW_BLOCKS_X {
                let block = blocks.block(cx + bx, cy + by);
                let weights = &self.classifier.weights[offset..offset + BLOCK_LEN];
                score += weights.iter().zip(block).map(|(w, v)| w * v).sum::<f32>();
                offset += BLOCK_LEN;
            }
        }
        score
    }
}

impl DetectorBackend for RegionDetector {
    fn name(&self) -> &'static str {
        "hog"
    }

    fn detect(&mut self, frame: &RgbImage, config: &DetectionConfig) -> Result<DetectionResult> {
        let gray = imageops::grayscale(frame);
        let (width, height) = gray.dimensions();
        let (pad_x, pad_y) = self.params.padding;

        let mut candidates = Vec::new();
        let mut level_scale = 1.0f32;
        for _ in 0..MAX_PYRAMID_LEVELS {
            let level_w = (width as f32 / level_scale) as u32;
            let level_h = (height as f32 / level_scale) as u32;
            if level_w < WINDOW_WIDTH || level_h < WINDOW_HEIGHT {
                break;
            }
            let level = if level_w == width && level_h == height {
                gray.clone()
            } else {
                imageops::resize(&gray, level_w, level_h, FilterType::Triangle)
            };
            let padded = pad_replicate(&level, pad_x, pad_y);
            self.scan_level(&padded, level_scale, config, &mut candidates);
            level_scale *= self.params.scale;
        }

        log::debug!("hog: {} candidate windows before suppression", candidates.len());
        Ok(non_max_suppression(candidates, config.overlap_threshold).into())
    }
}

/// HOG descriptor of a single 64x128 window.
pub fn window_descriptor(window: &GrayImage) -> Result<Vec<f32>> {
    if window.dimensions() != (WINDOW_WIDTH, WINDOW_HEIGHT) {
        return Err(anyhow!(
            "window is {}x{}, expected {}x{}",
            window.width(),
            window.height(),
            WINDOW_WIDTH,
            WINDOW_HEIGHT
        ));
    }
    let blocks = BlockGrid::compute(window);
    let mut descriptor = Vec::with_capacity(DESCRIPTOR_LEN);
    for by in 0..WINDOW_BLOCKS_Y {
        for bx in 0..WINDOW_BLOCKS_X {
            descriptor.extend_from_slice(blocks.block(bx, by));
        }
    }
    Ok(descriptor)
}

/// Normalized 2x2-cell blocks for a whole image, one block per cell corner.
struct BlockGrid {
    cells_x: usize,
    cells_y: usize,
    blocks_x: usize,
    data: Vec<f32>,
}

impl BlockGrid {
    fn compute(image: &GrayImage) -> Self {
        let cells = cell_histograms(image);
        let cells_x = image.width() as usize / CELL;
        let cells_y = image.height() as usize / CELL;
        let blocks_x = cells_x.saturating_sub(1);
        let blocks_y = cells_y.saturating_sub(1);

        let mut data = Vec::with_capacity(blocks_x * blocks_y * BLOCK_LEN);
        let mut block = [0f32; BLOCK_LEN];
        for by in 0..blocks_y {
            for bx in 0..blocks_x {
                for (i, (dx, dy)) in [(0, 0), (1, 0), (0, 1), (1, 1)].into_iter().enumerate() {
                    let cell = (by + dy) * cells_x + (bx + dx);
                    block[i * BINS..(i + 1) * BINS]
                        .copy_from_slice(&cells[cell * BINS..(cell + 1) * BINS]);
                }
                l2_hys(&mut block);
                data.extend_from_slice(&block);
            }
        }

        Self {
            cells_x,
            cells_y,
            blocks_x,
            data,
        }
    }

    fn block(&self, bx: usize, by: usize) -> &[f32] {
        let start = (by * self.blocks_x + bx) * BLOCK_LEN;
        &self.data[start..start + BLOCK_LEN]
    }
}

/// Orientation histograms per 8x8 cell, bilinear between neighbouring bins.
fn cell_histograms(image: &GrayImage) -> Vec<f32> {
    let width = image.width() as usize;
    let height = image.height() as usize;
    let cells_x = width / CELL;
    let cells_y = height / CELL;
    let mut cells = vec![0f32; cells_x * cells_y * BINS];
    let bin_width = 180.0 / BINS as f32;

    let px = |x: usize, y: usize| f32::from(image.get_pixel(x as u32, y as u32)[0]);
    for y in 0..cells_y * CELL {
        for x in 0..cells_x * CELL {
            let dx = px((x + 1).min(width - 1), y) - px(x.saturating_sub(1), y);
            let dy = px(x, (y + 1).min(height - 1)) - px(x, y.saturating_sub(1));
            let magnitude = (dx * dx + dy * dy).sqrt();
            if magnitude == 0.0 {
                continue;
            }
            let mut angle = dy.atan2(dx).to_degrees();
            if angle < 0.0 {
                angle += 180.0;
            }
            if angle >= 180.0 {
                angle -= 180.0;
            }

            let position = angle / bin_width - 0.5;
            let lower = position.floor();
            let frac = position - lower;
            let lower_bin = (lower as i32).rem_euclid(BINS as i32) as usize;
            let upper_bin = (lower_bin + 1) % BINS;

            let cell = (y / CELL) * cells_x + (x / CELL);
            cells[cell * BINS + lower_bin] += magnitude * (1.0 - frac);
            cells[cell * BINS + upper_bin] += magnitude * frac;
        }
    }
    cells
}

fn l2_hys(block: &mut [f32]) {
    normalize(block);
    for value in block.iter_mut() {
        *value = value.min(L2_HYS_CLIP);
    }
    normalize(block);
}

fn normalize(block: &mut [f32]) {
    let norm = (block.iter().map(|v| v * v).sum::<f32>() + 1e-6).sqrt();
    for value in block.iter_mut() {
        *value /= norm;
    }
}

fn pad_replicate(image: &GrayImage, pad_x: u32, pad_y: u32) -> GrayImage {
    if pad_x == 0 && pad_y == 0 {
        return image.clone();
    }
    let (width, height) = image.dimensions();
    GrayImage::from_fn(width + 2 * pad_x, height + 2 * pad_y, |x, y| {
        let sx = x.saturating_sub(pad_x).min(width - 1);
        let sy = y.saturating_sub(pad_y).min(height - 1);
        Luma([image.get_pixel(sx, sy)[0]])
    })
}

fn logistic(score: f32) -> f32 {
    1.0 / (1.0 + (-score).exp())
}
