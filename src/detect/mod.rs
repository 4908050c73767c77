mod backend;
pub mod backends;
mod engine;
mod nms;
mod result;

pub use backend::DetectorBackend;
pub use backends::{
    DisabledBackend, FixedBackend, InferenceModel, LinearClassifier, NeuralDetector,
    OutputLayout, Prediction, RegionDetector, RegionParams,
};
pub use engine::DetectorEngine;
pub use nms::non_max_suppression;
pub use result::{BoundingBox, Detection, DetectionConfig, DetectionResult};
