pub mod disabled;
pub mod fixed;
pub mod hog;
pub mod yolo;

#[cfg(feature = "backend-tract")]
pub mod tract;

pub use disabled::DisabledBackend;
pub use fixed::FixedBackend;
pub use hog::{LinearClassifier, RegionDetector, RegionParams};
pub use yolo::{InferenceModel, NeuralDetector, OutputLayout, Prediction};

#[cfg(feature = "backend-tract")]
pub use tract::TractModel;
