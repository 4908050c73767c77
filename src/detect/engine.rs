use std::panic::{self, AssertUnwindSafe};

use anyhow::{anyhow, Result};
use image::RgbImage;

use crate::config::{DetectorKind, DetectorSettings};
use crate::detect::backend::DetectorBackend;
use crate::detect::backends::{
    DisabledBackend, FixedBackend, LinearClassifier, RegionDetector, RegionParams,
};
use crate::detect::result::{DetectionConfig, DetectionResult};

/// The detection capability the pipeline calls into.
///
/// Wraps one backend plus the thresholds it runs with. Whatever the backend
/// does wrong (error or panic), `detect` returns an empty result so a bad
/// frame or a broken model never stops the pipeline.
pub struct DetectorEngine {
    backend: Box<dyn DetectorBackend>,
    config: DetectionConfig,
    failures: u64,
}

impl DetectorEngine {
    pub fn new<B: DetectorBackend + 'static>(backend: B, config: DetectionConfig) -> Self {
        Self {
            backend: Box::new(backend),
            config,
            failures: 0,
        }
    }

    pub fn disabled() -> Self {
        Self::new(DisabledBackend, DetectionConfig::default())
    }

    /// Build the engine selected by configuration.
    pub fn from_settings(settings: &DetectorSettings) -> Result<Self> {
        let config = DetectionConfig {
            confidence_threshold: settings.confidence_threshold,
            overlap_threshold: settings.overlap_threshold,
        };
        let engine = match settings.kind {
            DetectorKind::Disabled => Self::new(DisabledBackend, config),
            DetectorKind::Fixed => Self::new(FixedBackend::new(settings.fixed.clone()), config),
            DetectorKind::Hog => {
                let path = settings
                    .hog_weights_path
                    .as_deref()
                    .ok_or_else(|| anyhow!("hog detector requires detector.hog_weights_path"))?;
                let classifier = LinearClassifier::load(path)?;
                let params = RegionParams {
                    window_stride: settings.window_stride,
                    padding: settings.padding,
                    scale: settings.scale,
                };
                Self::new(RegionDetector::new(classifier, params)?, config)
            }
            DetectorKind::Yolo => Self::neural(settings, config)?,
        };
        log::info!(
            "detector engine: {} (confidence > {}, overlap <= {})",
            engine.name(),
            config.confidence_threshold,
            config.overlap_threshold
        );
        Ok(engine)
    }

    #[cfg(feature = "backend-tract")]
    fn neural(settings: &DetectorSettings, config: DetectionConfig) -> Result<Self> {
        use crate::detect::backends::yolo::load_labels;
        use crate::detect::backends::{NeuralDetector, TractModel};

        let model = TractModel::new(&settings.model_path, settings.input_width, settings.input_height)?;
        let labels = load_labels(&settings.labels_path)?;
        let detector = NeuralDetector::new(Box::new(model), labels, settings.output_layout());
        Ok(Self::new(detector, config))
    }

    #[cfg(not(feature = "backend-tract"))]
    fn neural(_settings: &DetectorSettings, _config: DetectionConfig) -> Result<Self> {
        Err(anyhow!("yolo detector requires the backend-tract feature"))
    }

    pub fn name(&self) -> &'static str {
        self.backend.name()
    }

    pub fn labels(&self) -> &[String] {
        self.backend.labels()
    }

    pub fn config(&self) -> DetectionConfig {
        self.config
    }

    /// Number of detection passes that failed and were absorbed.
    pub fn failures(&self) -> u64 {
        self.failures
    }

    pub fn warm_up(&mut self) {
        if let Err(err) = self.backend.warm_up() {
            log::warn!("detector {} warm-up failed: {:#}", self.backend.name(), err);
        }
    }

    /// Run detection, converting any failure into an empty result.
    pub fn detect(&mut self, frame: &RgbImage) -> DetectionResult {
        let config = self.config;
        let backend = &mut self.backend;
        let outcome = panic::catch_unwind(AssertUnwindSafe(|| backend.detect(frame, &config)));
        match outcome {
            Ok(Ok(result)) => result,
            Ok(Err(err)) => {
                self.failures += 1;
                log::warn!("detector {} failed: {:#}", self.backend.name(), err);
                DetectionResult::empty()
            }
            Err(_) => {
                self.failures += 1;
                log::warn!("detector {} panicked; frame left unannotated", self.backend.name());
                DetectionResult::empty()
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::detect::result::{BoundingBox, Detection};

    struct FailingBackend;

    impl DetectorBackend for FailingBackend {
        fn name(&self) -> &'static str {
            "failing"
        }

        fn detect(&mut self, _frame: &RgbImage, _config: &DetectionConfig) -> Result<DetectionResult> {
            Err(anyhow!("malformed frame"))
        }
    }

    struct PanickingBackend;

    impl DetectorBackend for PanickingBackend {
        fn name(&self) -> &'static str {
            "panicking"
        }

        fn detect(&mut self, _frame: &RgbImage, _config: &DetectionConfig) -> Result<DetectionResult> {
            panic!("index out of bounds in backend");
        }
    }

    #[test]
    fn disabled_engine_returns_nothing() {
        let mut engine = DetectorEngine::disabled();
        assert!(engine.detect(&RgbImage::new(8, 8)).is_empty());
        assert_eq!(engine.name(), "disabled");
    }

    #[test]
    fn backend_errors_become_empty_results() {
        let mut engine = DetectorEngine::new(FailingBackend, DetectionConfig::default());
        assert!(engine.detect(&RgbImage::new(8, 8)).is_empty());
        assert_eq!(engine.failures(), 1);
    }

    #[test]
    fn backend_panics_become_empty_results() {
        let mut engine = DetectorEngine::new(PanickingBackend, DetectionConfig::default());
        assert!(engine.detect(&RgbImage::new(8, 8)).is_empty());
        assert!(engine.detect(&RgbImage::new(8, 8)).is_empty());
        assert_eq!(engine.failures(), 2);
    }

    #[test]
    fn settings_build_fixed_engine() -> Result<()> {
        let settings = DetectorSettings {
            kind: DetectorKind::Fixed,
            fixed: vec![Detection::new(BoundingBox::new(1, 2, 3, 4), "test", 0.9)],
            ..DetectorSettings::default()
        };
        let mut engine = DetectorEngine::from_settings(&settings)?;
        assert_eq!(engine.name(), "fixed");
        assert_eq!(engine.detect(&RgbImage::new(8, 8)).len(), 1);
        Ok(())
    }

    #[test]
    fn hog_requires_weights_path() {
        let settings = DetectorSettings {
            kind: DetectorKind::Hog,
            ..DetectorSettings::default()
        };
        assert!(DetectorEngine::from_settings(&settings).is_err());
    }
}
