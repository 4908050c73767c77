#![cfg(feature = "backend-tract")]

use std::path::Path;

use anyhow::{anyhow, Context, Result};
use tract_onnx::prelude::*;

use crate::detect::backends::yolo::{InferenceModel, Prediction};

/// Tract-based ONNX model for the neural detector.
///
/// Loads a local model file once; no network I/O, nothing written to disk.
pub struct TractModel {
    model: SimplePlan<TypedFact, Box<dyn TypedOp>>,
    width: u32,
    height: u32,
}

impl TractModel {
    /// Load an ONNX model from disk and prepare it for inference.
    pub fn new<P: AsRef<Path>>(model_path: P, width: u32, height: u32) -> Result<Self> {
        let model_path = model_path.as_ref();
        let model = tract_onnx::onnx()
            .model_for_path(model_path)
            .with_context(|| format!("failed to load ONNX model from {}", model_path.display()))?
            .with_input_fact(
                0,
                InferenceFact::dt_shape(
                    f32::datum_type(),
                    tvec!(1, 3, height as usize, width as usize),
                ),
            )
            .context("failed to set input fact")?
            .into_optimized()
            .context("failed to optimize ONNX model")?
            .into_runnable()
            .context("failed to build runnable ONNX model")?;

        log::info!(
            "loaded ONNX model {} ({}x{} input)",
            model_path.display(),
            width,
            height
        );
        Ok(Self {
            model,
            width,
            height,
        })
    }
}

impl InferenceModel for TractModel {
    fn input_size(&self) -> (u32, u32) {
        (self.width, self.height)
    }

    fn forward(&mut self, input: Vec<f32>) -> Result<Vec<Prediction>> {
        let shape = (1, 3, self.height as usize, self.width as usize);
        let input = tract_ndarray::Array4::from_shape_vec(shape, input)
            .map_err(|err| anyhow!("input tensor shape mismatch: {}", err))?;
        let outputs = self
            .model
            .run(tvec!(input.into_tensor().into()))
            .context("ONNX inference failed")?;

        outputs
            .iter()
            .map(|output| {
                let view = output
                    .to_array_view::<f32>()
                    .context("model output tensor was not f32")?;
                Ok(Prediction {
                    shape: view.shape().to_vec(),
                    data: view.iter().copied().collect(),
                })
            })
            .collect()
    }
}
