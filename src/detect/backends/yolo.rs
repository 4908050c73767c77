//! YOLO-family neural detector.
//!
//! The forward pass is delegated to an `InferenceModel` (tract ONNX in production,
//! see `backend-tract`). This module owns everything around it: preprocessing,
//! decoding prediction rows, rescaling to the source frame and suppression.

use std::path::Path;

use anyhow::{anyhow, Context, Result};
use image::imageops::{self, FilterType};
use image::RgbImage;

use crate::detect::backend::DetectorBackend;
use crate::detect::nms::non_max_suppression;
use crate::detect::result::{BoundingBox, Detection, DetectionConfig, DetectionResult};

/// A raw output tensor, row-major.
#[derive(Clone, Debug, PartialEq)]
pub struct Prediction {
    pub shape: Vec<usize>,
    pub data: Vec<f32>,
}

/// A loaded network that maps an NCHW float image to prediction tensors.
pub trait InferenceModel: Send {
    /// Fixed model input resolution (width, height).
    fn input_size(&self) -> (u32, u32);

    /// Run one forward pass on a `1x3xHxW` tensor with values in [0, 1].
    fn forward(&mut self, input: Vec<f32>) -> Result<Vec<Prediction>>;
}

/// How prediction rows are laid out.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct OutputLayout {
    /// Index of the first class score in a row. 5 for darknet/v5 (objectness at 4),
    /// 4 for anchor-free heads.
    pub score_offset: usize,
    /// Box coordinates are fractions of the model input instead of pixels.
    pub normalized_boxes: bool,
    /// Tensor is `[1, attrs, rows]` instead of `[1, rows, attrs]`.
    pub transposed: bool,
}

impl OutputLayout {
    pub const DARKNET: OutputLayout = OutputLayout {
        score_offset: 5,
        normalized_boxes: true,
        transposed: false,
    };

    pub const ANCHOR_FREE: OutputLayout = OutputLayout {
        score_offset: 4,
        normalized_boxes: false,
        transposed: true,
    };
}

impl Default for OutputLayout {
    fn default() -> Self {
        Self::DARKNET
    }
}

/// Pretrained multi-class detector.
pub struct NeuralDetector {
    model: Box<dyn InferenceModel>,
    labels: Vec<String>,
    layout: OutputLayout,
}

impl NeuralDetector {
    pub fn new(model: Box<dyn InferenceModel>, labels: Vec<String>, layout: OutputLayout) -> Self {
        Self {
            model,
            labels,
            layout,
        }
    }

    fn label_for(&self, class_id: usize) -> String {
        self.labels
            .get(class_id)
            .cloned()
            .unwrap_or_else(|| format!("class{class_id}"))
    }
}

impl DetectorBackend for NeuralDetector {
    fn name(&self) -> &'static str {
        "yolo"
    }

    fn labels(&self) -> &[String] {
        &self.labels
    }

    fn detect(&mut self, frame: &RgbImage, config: &DetectionConfig) -> Result<DetectionResult> {
        if frame.width() == 0 || frame.height() == 0 {
            return Err(anyhow!("cannot run detection on an empty frame"));
        }
        let (model_w, model_h) = self.model.input_size();
        let input = build_input(frame, model_w, model_h);
        let outputs = self.model.forward(input).context("forward pass failed")?;

        let scale = FrameScale {
            x: frame.width() as f32 / model_w as f32,
            y: frame.height() as f32 / model_h as f32,
            model_w: model_w as f32,
            model_h: model_h as f32,
            frame_w: frame.width(),
            frame_h: frame.height(),
        };
        let mut candidates = Vec::new();
        for output in &outputs {
            for (class_id, confidence, bbox) in
                decode_rows(output, self.layout, scale, config.confidence_threshold)?
            {
                candidates.push(Detection::new(bbox, self.label_for(class_id), confidence));
            }
        }
        Ok(non_max_suppression(candidates, config.overlap_threshold).into())
    }

    fn warm_up(&mut self) -> Result<()> {
        let (w, h) = self.model.input_size();
        self.model
            .forward(vec![0.0; 3 * w as usize * h as usize])
            .map(|_| ())
    }
}

/// Ratio between the source frame and the model input.
#[derive(Clone, Copy, Debug)]
pub struct FrameScale {
    pub x: f32,
    pub y: f32,
    pub model_w: f32,
    pub model_h: f32,
    /// Source frame size; decoded boxes are clipped to it.
    pub frame_w: u32,
    pub frame_h: u32,
}

/// Resize to the model resolution and pack as NCHW floats in [0, 1].
pub fn build_input(frame: &RgbImage, model_w: u32, model_h: u32) -> Vec<f32> {
    let resized;
    let source = if frame.dimensions() == (model_w, model_h) {
        frame
    } else {
        resized = imageops::resize(frame, model_w, model_h, FilterType::Triangle);
        &resized
    };

    let plane = model_w as usize * model_h as usize;
    let mut input = vec![0f32; 3 * plane];
    for (i, pixel) in source.pixels().enumerate() {
        for channel in 0..3 {
            input[channel * plane + i] = f32::from(pixel[channel]) / 255.0;
        }
    }
    input
}

/// Decode prediction rows into `(class, confidence, box)` triples above the threshold.
///
/// Boxes come out in source-frame pixels, top-left origin.
pub fn decode_rows(
    output: &Prediction,
    layout: OutputLayout,
    scale: FrameScale,
    confidence_threshold: f32,
) -> Result<Vec<(usize, f32, BoundingBox)>> {
    let (rows, attrs) = match output.shape.as_slice() {
        [rows, attrs] | [1, rows, attrs] => (*rows, *attrs),
        other => return Err(anyhow!("unsupported prediction shape {:?}", other)),
    };
    let (rows, attrs) = if layout.transposed {
        (attrs, rows)
    } else {
        (rows, attrs)
    };
    if rows * attrs != output.data.len() {
        return Err(anyhow!(
            "prediction tensor holds {} values, shape says {}",
            output.data.len(),
            rows * attrs
        ));
    }
    if attrs <= layout.score_offset {
        return Err(anyhow!(
            "prediction rows have {} attributes, need more than {}",
            attrs,
            layout.score_offset
        ));
    }

    let value = |row: usize, attr: usize| -> f32 {
        if layout.transposed {
            output.data[attr * rows + row]
        } else {
            output.data[row * attrs + attr]
        }
    };

    let mut decoded = Vec::new();
    for row in 0..rows {
        let mut class_id = 0;
        let mut confidence = f32::NEG_INFINITY;
        for attr in layout.score_offset..attrs {
            let score = value(row, attr);
            if score > confidence {
                confidence = score;
                class_id = attr - layout.score_offset;
            }
        }
        if !confidence.is_finite() || confidence <= confidence_threshold {
            continue;
        }

        let (mut cx, mut cy, mut w, mut h) =
            (value(row, 0), value(row, 1), value(row, 2), value(row, 3));
        if ![cx, cy, w, h].iter().all(|v| v.is_finite()) || w <= 0.0 || h <= 0.0 {
            continue;
        }
        if layout.normalized_boxes {
            cx *= scale.model_w;
            cy *= scale.model_h;
            w *= scale.model_w;
            h *= scale.model_h;
        }
        let bbox = BoundingBox::from_center(cx * scale.x, cy * scale.y, w * scale.x, h * scale.y);
        let Some(bbox) = bbox.clipped(scale.frame_w, scale.frame_h) else {
            continue;
        };
        decoded.push((class_id, confidence.min(1.0), bbox));
    }
    Ok(decoded)
}

/// Read newline-separated class names (e.g. `coco.names`).
pub fn load_labels(path: &Path) -> Result<Vec<String>> {
    let raw = std::fs::read_to_string(path)
        .with_context(|| format!("read labels file {}", path.display()))?;
    Ok(raw
        .trim()
        .lines()
        .map(|line| line.trim().to_string())
        .collect())
}

#[cfg(test)]
mod tests {
    use super::*;

    /// Replays canned predictions regardless of input.
    struct CannedModel {
        size: (u32, u32),
        outputs: Vec<Prediction>,
        seen_input_len: Option<usize>,
    }

    impl InferenceModel for CannedModel {
        fn input_size(&self) -> (u32, u32) {
            self.size
        }

        fn forward(&mut self, input: Vec<f32>) -> Result<Vec<Prediction>> {
            self.seen_input_len = Some(input.len());
            Ok(self.outputs.clone())
        }
    }

    struct BrokenModel;

    impl InferenceModel for BrokenModel {
        fn input_size(&self) -> (u32, u32) {
            (416, 416)
        }

        fn forward(&mut self, _input: Vec<f32>) -> Result<Vec<Prediction>> {
            Err(anyhow!("backend exploded"))
        }
    }

    fn darknet_rows(rows: &[[f32; 8]]) -> Prediction {
        Prediction {
            shape: vec![1, rows.len(), 8],
            data: rows.iter().flatten().copied().collect(),
        }
    }

    fn labels() -> Vec<String> {
        vec!["person".into(), "bicycle".into(), "car".into()]
    }

    #[test]
    fn build_input_is_nchw_unit_range() {
        let frame = RgbImage::from_pixel(4, 2, image::Rgb([255, 0, 51]));
        let input = build_input(&frame, 4, 2);
        assert_eq!(input.len(), 3 * 8);
        assert!(input[..8].iter().all(|v| (*v - 1.0).abs() < 1e-6));
        assert!(input[8..16].iter().all(|v| *v == 0.0));
        assert!(input[16..].iter().all(|v| (*v - 0.2).abs() < 1e-6));
    }

    #[test]
    fn decode_rescales_and_converts_center_to_corner() -> Result<()> {
        // Model is 416x416, frame is 832x208: x doubles, y halves.
        let output = Prediction {
            shape: vec![1, 1, 7],
            data: vec![100.0, 100.0, 40.0, 20.0, 0.9, 0.1, 0.8],
        };
        let layout = OutputLayout {
            score_offset: 5,
            normalized_boxes: false,
            transposed: false,
        };
        let scale = FrameScale {
            x: 2.0,
            y: 0.5,
            model_w: 416.0,
            model_h: 416.0,
            frame_w: 832,
            frame_h: 208,
        };
        let rows = decode_rows(&output, layout, scale, 0.5)?;
        assert_eq!(rows.len(), 1);
        let (class_id, confidence, bbox) = rows[0];
        assert_eq!(class_id, 1);
        assert!((confidence - 0.8).abs() < 1e-6);
        assert_eq!(bbox, BoundingBox::new(160, 45, 80, 10));
        Ok(())
    }

    #[test]
    fn decode_handles_transposed_tensors() -> Result<()> {
        // Two rows, attrs = 4 box + 2 classes, stored attribute-major.
        let output = Prediction {
            shape: vec![1, 6, 2],
            data: vec![
                10.0, 50.0, // cx
                10.0, 50.0, // cy
                4.0, 8.0, // w
                4.0, 8.0, // h
                0.2, 0.1, // class 0
                0.9, 0.7, // class 1
            ],
        };
        let scale = FrameScale {
            x: 1.0,
            y: 1.0,
            model_w: 64.0,
            model_h: 64.0,
            frame_w: 64,
            frame_h: 64,
        };
        let rows = decode_rows(&output, OutputLayout::ANCHOR_FREE, scale, 0.5)?;
        assert_eq!(rows.len(), 2);
        assert_eq!(rows[0].2, BoundingBox::new(8, 8, 4, 4));
        assert_eq!(rows[1].2, BoundingBox::new(46, 46, 8, 8));
        Ok(())
    }

    #[test]
    fn decode_drops_non_finite_and_empty_boxes_and_clips_the_rest() -> Result<()> {
        // Rows: [cx, cy, w, h, class 0], pixel coordinates on a 64x64 frame.
        let output = Prediction {
            shape: vec![1, 6, 5],
            data: vec![
                f32::NAN, 10.0, 4.0, 4.0, 0.9,
                10.0, f32::INFINITY, 4.0, 4.0, 0.9,
                10.0, 10.0, f32::NEG_INFINITY, 4.0, 0.9,
                10.0, 10.0, 0.0, 4.0, 0.9,
                1.0e30, 1.0e30, 8.0, 8.0, 0.9,
                60.0, 2.0, 20.0, 10.0, 0.9,
            ],
        };
        let layout = OutputLayout {
            score_offset: 4,
            normalized_boxes: false,
            transposed: false,
        };
        let scale = FrameScale {
            x: 1.0,
            y: 1.0,
            model_w: 64.0,
            model_h: 64.0,
            frame_w: 64,
            frame_h: 64,
        };
        let rows = decode_rows(&output, layout, scale, 0.5)?;
        assert_eq!(rows.len(), 1);
        assert_eq!(rows[0].2, BoundingBox::new(50, 0, 14, 7));
        Ok(())
    }

    #[test]
    fn decode_rejects_mismatched_shapes() {
        let output = Prediction {
            shape: vec![1, 2, 8],
            data: vec![0.0; 7],
        };
        let scale = FrameScale {
            x: 1.0,
            y: 1.0,
            model_w: 1.0,
            model_h: 1.0,
            frame_w: 1,
            frame_h: 1,
        };
        assert!(decode_rows(&output, OutputLayout::DARKNET, scale, 0.5).is_err());
    }

    #[test]
    fn neural_detector_filters_and_suppresses() -> Result<()> {
        // Normalized darknet rows: [cx, cy, w, h, obj, person, bicycle, car].
        let output = darknet_rows(&[
            [0.5, 0.5, 0.2, 0.2, 0.9, 0.95, 0.0, 0.0],
            [0.51, 0.5, 0.2, 0.2, 0.9, 0.90, 0.0, 0.0],
            [0.1, 0.1, 0.1, 0.1, 0.9, 0.0, 0.0, 0.75],
            [0.8, 0.8, 0.1, 0.1, 0.9, 0.3, 0.2, 0.1],
        ]);
        let mut detector = NeuralDetector::new(
            Box::new(CannedModel {
                size: (416, 416),
                outputs: vec![output],
                seen_input_len: None,
            }),
            labels(),
            OutputLayout::DARKNET,
        );
        let config = DetectionConfig::default();
        let frame = RgbImage::new(640, 480);
        let result = detector.detect(&frame, &config)?;

        assert_eq!(result.len(), 2);
        assert_eq!(result.detections[0].label, "person");
        assert!((result.detections[0].confidence - 0.95).abs() < 1e-6);
        assert_eq!(result.detections[1].label, "car");
        // 0.5 * 416 * (640 / 416) = 320 centre, 128 wide.
        assert_eq!(result.detections[0].bbox, BoundingBox::new(256, 192, 128, 96));
        for (i, a) in result.detections.iter().enumerate() {
            assert!(a.confidence >= config.confidence_threshold);
            for b in result.detections.iter().skip(i + 1) {
                if a.label == b.label {
                    assert!(a.bbox.iou(&b.bbox) <= config.overlap_threshold);
                }
            }
        }
        Ok(())
    }

    #[test]
    fn neural_detector_without_survivors_is_empty() -> Result<()> {
        let output = darknet_rows(&[[0.5, 0.5, 0.2, 0.2, 0.9, 0.1, 0.2, 0.3]]);
        let mut detector = NeuralDetector::new(
            Box::new(CannedModel {
                size: (416, 416),
                outputs: vec![output],
                seen_input_len: None,
            }),
            labels(),
            OutputLayout::DARKNET,
        );
        let result = detector.detect(&RgbImage::new(64, 64), &DetectionConfig::default())?;
        assert!(result.is_empty());
        Ok(())
    }

    #[test]
    fn unknown_class_ids_get_a_placeholder_label() -> Result<()> {
        let output = Prediction {
            shape: vec![1, 1, 9],
            data: vec![0.5, 0.5, 0.2, 0.2, 0.9, 0.0, 0.0, 0.0, 0.8],
        };
        let mut detector = NeuralDetector::new(
            Box::new(CannedModel {
                size: (32, 32),
                outputs: vec![output],
                seen_input_len: None,
            }),
            labels(),
            OutputLayout::DARKNET,
        );
        let result = detector.detect(&RgbImage::new(32, 32), &DetectionConfig::default())?;
        assert_eq!(result.detections[0].label, "class3");
        Ok(())
    }

    #[test]
    fn backend_errors_surface_to_the_engine() {
        let mut detector = NeuralDetector::new(Box::new(BrokenModel), labels(), OutputLayout::DARKNET);
        assert!(detector
            .detect(&RgbImage::new(32, 32), &DetectionConfig::default())
            .is_err());
    }

    #[test]
    fn load_labels_reads_one_name_per_line() -> Result<()> {
        let dir = tempfile::tempdir()?;
        let path = dir.path().join("coco.names");
        std::fs::write(&path, "person\nbicycle\ncar\n")?;
        assert_eq!(load_labels(&path)?, labels());
        Ok(())
    }
}
