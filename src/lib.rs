//! Rover vision pipeline
//!
//! Captures frames from a camera, optionally runs an object/pedestrian
//! detector over them, overlays diagnostics, and serves the result as a live
//! multipart stream with snapshot and detection-toggle controls.
//!
//! # Flow
//!
//! One producer thread owns the camera and the detector:
//!
//! `FrameSource` → `FrameProcessor` (resize, detect, annotate, FPS, encode)
//! → `PipelineState` (latest frame) + `StreamHub` (per-viewer queues)
//!
//! Request threads read shared state through `ControlSurface` and never
//! block the producer.
//!
//! # Module Structure
//!
//! - `ingest`: frame sources (synthetic, V4L2, MJPEG over HTTP)
//! - `detect`: detector backends behind `DetectorEngine`
//! - `pipeline`: per-frame processing and the producer loop
//! - `stream`: multipart fan-out to viewers
//! - `control`: detection toggle, snapshots, status
//! - `api`: HTTP surface with capability-token auth
//! - `config`: `RoverConfig` loading and validation

pub mod api;
pub mod config;
pub mod control;
pub mod detect;
pub mod error;
pub mod frame;
pub mod ingest;
pub mod pipeline;
pub mod stream;

pub use api::{ApiHandle, ApiServer};
pub use config::{DetectorKind, RoverConfig};
pub use control::{ControlSurface, SnapshotStore, Status};
pub use detect::{BoundingBox, Detection, DetectionConfig, DetectionResult, DetectorEngine};
pub use error::{FrameUnavailable, SkipReason, SnapshotError, SubscriberDisconnected};
pub use frame::{Frame, ProcessedFrame};
pub use ingest::{open_source, FrameSource, SyntheticSource};
pub use pipeline::{
    EncodedFormat, FrameProcessor, PassOutcome, PipelineHandle, PipelineRunner, PipelineState,
};
pub use stream::{StreamHub, Subscription};
