//! Per-frame processing: resize, detect, overlay, encode, publish.

mod annotate;
mod encode;
pub mod font;
mod fps;
mod processor;
mod runner;
mod state;

pub use annotate::{Annotator, DEFAULT_BOX_COLOR, FPS_COLOR, FPS_ORIGIN};
pub use encode::{EncodedFormat, FrameEncoder};
pub use fps::{fps_label, FpsMeter};
pub use processor::{resize_percent, FrameProcessor, PassOutcome};
pub use runner::{PipelineHandle, PipelineRunner, PipelineStats, PipelineStatsSnapshot};
pub use state::PipelineState;
