use anyhow::{anyhow, Result};
use serde::Deserialize;
use std::path::{Path, PathBuf};
use std::time::Duration;

use crate::detect::{Detection, OutputLayout};
use crate::pipeline::EncodedFormat;

const DEFAULT_CAMERA_DEVICE: &str = "/dev/video0";
const DEFAULT_CAMERA_WIDTH: u32 = 640;
const DEFAULT_CAMERA_HEIGHT: u32 = 480;
const DEFAULT_CAMERA_FPS: u32 = 15;
const DEFAULT_RESIZE_PERCENT: u32 = 80;
const DEFAULT_JPEG_QUALITY: u8 = 85;
const DEFAULT_SOFT_DEADLINE_MS: u64 = 250;
const DEFAULT_CONFIDENCE: f32 = 0.5;
const DEFAULT_OVERLAP: f32 = 0.3;
const DEFAULT_MODEL_PATH: &str = "yolov3-tiny.onnx";
const DEFAULT_LABELS_PATH: &str = "coco.names";
const DEFAULT_MODEL_INPUT: u32 = 416;
const DEFAULT_HOG_STRIDE: (u32, u32) = (8, 8);
const DEFAULT_HOG_PADDING: (u32, u32) = (8, 8);
const DEFAULT_HOG_SCALE: f32 = 1.05;
const DEFAULT_API_ADDR: &str = "127.0.0.1:5500";
const DEFAULT_STREAM_WRITE_TIMEOUT_MS: u64 = 2_000;
const DEFAULT_SNAPSHOT_DIR: &str = "snaps";
const DEFAULT_QUEUE_DEPTH: usize = 8;

#[derive(Debug, Deserialize, Default)]
struct RoverConfigFile {
    camera: Option<CameraConfigFile>,
    pipeline: Option<PipelineConfigFile>,
    detector: Option<DetectorConfigFile>,
    api: Option<ApiConfigFile>,
    snapshots: Option<SnapshotConfigFile>,
    stream: Option<StreamConfigFile>,
}

#[derive(Debug, Deserialize, Default)]
struct CameraConfigFile {
    device: Option<String>,
    width: Option<u32>,
    height: Option<u32>,
    target_fps: Option<u32>,
}

#[derive(Debug, Deserialize, Default)]
struct PipelineConfigFile {
    resize_percent: Option<u32>,
    format: Option<EncodedFormat>,
    jpeg_quality: Option<u8>,
    soft_deadline_ms: Option<u64>,
}

#[derive(Debug, Deserialize, Default)]
struct DetectorConfigFile {
    kind: Option<DetectorKind>,
    enabled_at_start: Option<bool>,
    confidence_threshold: Option<f32>,
    overlap_threshold: Option<f32>,
    model_path: Option<PathBuf>,
    labels_path: Option<PathBuf>,
    input_width: Option<u32>,
    input_height: Option<u32>,
    score_offset: Option<usize>,
    normalized_boxes: Option<bool>,
    transposed: Option<bool>,
    hog_weights_path: Option<PathBuf>,
    window_stride: Option<(u32, u32)>,
    padding: Option<(u32, u32)>,
    scale: Option<f32>,
    fixed: Option<Vec<Detection>>,
}

#[derive(Debug, Deserialize, Default)]
struct ApiConfigFile {
    addr: Option<String>,
    token_path: Option<PathBuf>,
    stream_write_timeout_ms: Option<u64>,
}

#[derive(Debug, Deserialize, Default)]
struct SnapshotConfigFile {
    dir: Option<PathBuf>,
}

#[derive(Debug, Deserialize, Default)]
struct StreamConfigFile {
    queue_depth: Option<usize>,
}

/// Which detector backend the engine is built with.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Deserialize, clap::ValueEnum)]
#[serde(rename_all = "lowercase")]
pub enum DetectorKind {
    #[default]
    Disabled,
    Hog,
    Yolo,
    Fixed,
}

impl std::str::FromStr for DetectorKind {
    type Err = anyhow::Error;

    fn from_str(value: &str) -> Result<Self> {
        match value.trim().to_lowercase().as_str() {
            "disabled" | "none" => Ok(Self::Disabled),
            "hog" => Ok(Self::Hog),
            "yolo" => Ok(Self::Yolo),
            "fixed" => Ok(Self::Fixed),
            other => Err(anyhow!(
                "unknown detector '{}'; expected disabled, hog, yolo or fixed",
                other
            )),
        }
    }
}

#[derive(Debug, Clone)]
pub struct RoverConfig {
    pub camera: CameraSettings,
    pub pipeline: PipelineSettings,
    pub detector: DetectorSettings,
    pub api: ApiSettings,
    pub snapshot_dir: PathBuf,
    pub stream_queue_depth: usize,
}

#[derive(Debug, Clone)]
pub struct CameraSettings {
    /// `/dev/videoN`, `http(s)://` MJPEG URL, or `stub://<pattern>`.
    pub device: String,
    pub width: u32,
    pub height: u32,
    pub target_fps: u32,
}

impl Default for CameraSettings {
    fn default() -> Self {
        Self {
            device: DEFAULT_CAMERA_DEVICE.to_string(),
            width: DEFAULT_CAMERA_WIDTH,
            height: DEFAULT_CAMERA_HEIGHT,
            target_fps: DEFAULT_CAMERA_FPS,
        }
    }
}

#[derive(Debug, Clone)]
pub struct PipelineSettings {
    pub resize_percent: u32,
    pub format: EncodedFormat,
    pub jpeg_quality: u8,
    pub soft_deadline: Duration,
}

impl Default for PipelineSettings {
    fn default() -> Self {
        Self {
            resize_percent: DEFAULT_RESIZE_PERCENT,
            format: EncodedFormat::Png,
            jpeg_quality: DEFAULT_JPEG_QUALITY,
            soft_deadline: Duration::from_millis(DEFAULT_SOFT_DEADLINE_MS),
        }
    }
}

#[derive(Debug, Clone)]
pub struct DetectorSettings {
    pub kind: DetectorKind,
    /// Initial value of the runtime detection toggle.
    pub enabled_at_start: bool,
    pub confidence_threshold: f32,
    pub overlap_threshold: f32,
    pub model_path: PathBuf,
    pub labels_path: PathBuf,
    pub input_width: u32,
    pub input_height: u32,
    pub score_offset: usize,
    pub normalized_boxes: bool,
    pub transposed: bool,
    pub hog_weights_path: Option<PathBuf>,
    pub window_stride: (u32, u32),
    pub padding: (u32, u32),
    pub scale: f32,
    pub fixed: Vec<Detection>,
}

impl Default for DetectorSettings {
    fn default() -> Self {
        let layout = OutputLayout::DARKNET;
        Self {
            kind: DetectorKind::Disabled,
            enabled_at_start: false,
            confidence_threshold: DEFAULT_CONFIDENCE,
            overlap_threshold: DEFAULT_OVERLAP,
            model_path: PathBuf::from(DEFAULT_MODEL_PATH),
            labels_path: PathBuf::from(DEFAULT_LABELS_PATH),
            input_width: DEFAULT_MODEL_INPUT,
            input_height: DEFAULT_MODEL_INPUT,
            score_offset: layout.score_offset,
            normalized_boxes: layout.normalized_boxes,
            transposed: layout.transposed,
            hog_weights_path: None,
            window_stride: DEFAULT_HOG_STRIDE,
            padding: DEFAULT_HOG_PADDING,
            scale: DEFAULT_HOG_SCALE,
            fixed: Vec::new(),
        }
    }
}

impl DetectorSettings {
    pub fn output_layout(&self) -> OutputLayout {
        OutputLayout {
            score_offset: self.score_offset,
            normalized_boxes: self.normalized_boxes,
            transposed: self.transposed,
        }
    }
}

#[derive(Debug, Clone)]
pub struct ApiSettings {
    pub addr: String,
    pub token_path: Option<PathBuf>,
    pub stream_write_timeout: Duration,
}

impl Default for ApiSettings {
    fn default() -> Self {
        Self {
            addr: DEFAULT_API_ADDR.to_string(),
            token_path: None,
            stream_write_timeout: Duration::from_millis(DEFAULT_STREAM_WRITE_TIMEOUT_MS),
        }
    }
}

impl RoverConfig {
    /// Load from `$ROVER_CONFIG` (if set), then apply environment overrides.
    pub fn load() -> Result<Self> {
        let config_path = std::env::var("ROVER_CONFIG").ok().map(PathBuf::from);
        Self::load_from(config_path.as_deref())
    }

    /// Load from an explicit file (or defaults), then apply environment overrides.
    pub fn load_from(path: Option<&Path>) -> Result<Self> {
        let file_cfg = match path {
            Some(path) => Some(read_config_file(path)?),
            None => None,
        };
        let mut cfg = Self::from_file(file_cfg.unwrap_or_default());
        cfg.apply_env()?;
        cfg.validate()?;
        Ok(cfg)
    }

    fn from_file(file: RoverConfigFile) -> Self {
        let camera_file = file.camera.unwrap_or_default();
        let camera_default = CameraSettings::default();
        let camera = CameraSettings {
            device: camera_file.device.unwrap_or(camera_default.device),
            width: camera_file.width.unwrap_or(camera_default.width),
            height: camera_file.height.unwrap_or(camera_default.height),
            target_fps: camera_file.target_fps.unwrap_or(camera_default.target_fps),
        };

        let pipeline_file = file.pipeline.unwrap_or_default();
        let pipeline_default = PipelineSettings::default();
        let pipeline = PipelineSettings {
            resize_percent: pipeline_file
                .resize_percent
                .unwrap_or(pipeline_default.resize_percent),
            format: pipeline_file.format.unwrap_or(pipeline_default.format),
            jpeg_quality: pipeline_file
                .jpeg_quality
                .unwrap_or(pipeline_default.jpeg_quality),
            soft_deadline: pipeline_file
                .soft_deadline_ms
                .map(Duration::from_millis)
                .unwrap_or(pipeline_default.soft_deadline),
        };

        let det = file.detector.unwrap_or_default();
        let det_default = DetectorSettings::default();
        let detector = DetectorSettings {
            kind: det.kind.unwrap_or(det_default.kind),
            enabled_at_start: det.enabled_at_start.unwrap_or(det_default.enabled_at_start),
            confidence_threshold: det
                .confidence_threshold
                .unwrap_or(det_default.confidence_threshold),
            overlap_threshold: det
                .overlap_threshold
                .unwrap_or(det_default.overlap_threshold),
            model_path: det.model_path.unwrap_or(det_default.model_path),
            labels_path: det.labels_path.unwrap_or(det_default.labels_path),
            input_width: det.input_width.unwrap_or(det_default.input_width),
            input_height: det.input_height.unwrap_or(det_default.input_height),
            score_offset: det.score_offset.unwrap_or(det_default.score_offset),
            normalized_boxes: det.normalized_boxes.unwrap_or(det_default.normalized_boxes),
            transposed: det.transposed.unwrap_or(det_default.transposed),
            hog_weights_path: det.hog_weights_path.or(det_default.hog_weights_path),
            window_stride: det.window_stride.unwrap_or(det_default.window_stride),
            padding: det.padding.unwrap_or(det_default.padding),
            scale: det.scale.unwrap_or(det_default.scale),
            fixed: det.fixed.unwrap_or(det_default.fixed),
        };

        let api_file = file.api.unwrap_or_default();
        let api_default = ApiSettings::default();
        let api = ApiSettings {
            addr: api_file.addr.unwrap_or(api_default.addr),
            token_path: api_file.token_path.or(api_default.token_path),
            stream_write_timeout: api_file
                .stream_write_timeout_ms
                .map(Duration::from_millis)
                .unwrap_or(api_default.stream_write_timeout),
        };

        Self {
            camera,
            pipeline,
            detector,
            api,
            snapshot_dir: file
                .snapshots
                .and_then(|snapshots| snapshots.dir)
                .unwrap_or_else(|| PathBuf::from(DEFAULT_SNAPSHOT_DIR)),
            stream_queue_depth: file
                .stream
                .and_then(|stream| stream.queue_depth)
                .unwrap_or(DEFAULT_QUEUE_DEPTH),
        }
    }

    fn apply_env(&mut self) -> Result<()> {
        if let Some(addr) = non_empty_env("ROVER_API_ADDR") {
            self.api.addr = addr;
        }
        if let Some(path) = non_empty_env("ROVER_API_TOKEN_PATH") {
            self.api.token_path = Some(PathBuf::from(path));
        }
        if let Some(device) = non_empty_env("ROVER_CAMERA_DEVICE") {
            self.camera.device = device;
        }
        if let Some(dir) = non_empty_env("ROVER_SNAPSHOT_DIR") {
            self.snapshot_dir = PathBuf::from(dir);
        }
        if let Some(kind) = non_empty_env("ROVER_DETECTOR") {
            self.detector.kind = kind.parse()?;
        }
        if let Some(percent) = non_empty_env("ROVER_RESIZE_PERCENT") {
            self.pipeline.resize_percent = percent
                .parse()
                .map_err(|_| anyhow!("ROVER_RESIZE_PERCENT must be an integer percentage"))?;
        }
        Ok(())
    }

    pub fn validate(&self) -> Result<()> {
        if !(1..=100).contains(&self.pipeline.resize_percent) {
            return Err(anyhow!("resize_percent must be between 1 and 100"));
        }
        if !(1..=100).contains(&self.pipeline.jpeg_quality) {
            return Err(anyhow!("jpeg_quality must be between 1 and 100"));
        }
        for (name, value) in [
            ("confidence_threshold", self.detector.confidence_threshold),
            ("overlap_threshold", self.detector.overlap_threshold),
        ] {
            if !(0.0..=1.0).contains(&value) {
                return Err(anyhow!("{} must be within [0, 1]", name));
            }
        }
        if self.detector.input_width == 0 || self.detector.input_height == 0 {
            return Err(anyhow!("detector input size must be non-zero"));
        }
        if self.stream_queue_depth == 0 {
            return Err(anyhow!("stream queue_depth must be greater than zero"));
        }
        if self.camera.width == 0 || self.camera.height == 0 {
            return Err(anyhow!("camera dimensions must be non-zero"));
        }
        Ok(())
    }
}

fn non_empty_env(key: &str) -> Option<String> {
    std::env::var(key)
        .ok()
        .filter(|value| !value.trim().is_empty())
}

fn read_config_file(path: &Path) -> Result<RoverConfigFile> {
    let raw = std::fs::read_to_string(path)
        .map_err(|e| anyhow!("failed to read config file {}: {}", path.display(), e))?;
    let cfg = serde_json::from_str(&raw)
        .map_err(|e| anyhow!("invalid config file {}: {}", path.display(), e))?;
    Ok(cfg)
}
