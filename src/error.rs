//! Failure taxonomy for the frame pipeline.
//!
//! Every failure inside a single pass is contained within that pass. The only
//! fatal error is failing to open the camera at startup, which surfaces as an
//! `anyhow::Error` from `FrameSource::connect`.

use thiserror::Error;

/// The camera did not deliver a frame this cycle.
///
/// Transient: the pipeline skips the cycle and tries again.
#[derive(Debug, Error)]
#[error("frame unavailable: {reason}")]
pub struct FrameUnavailable {
    pub reason: String,
}

impl FrameUnavailable {
    pub fn new(reason: impl Into<String>) -> Self {
        Self {
            reason: reason.into(),
        }
    }
}

impl From<anyhow::Error> for FrameUnavailable {
    fn from(err: anyhow::Error) -> Self {
        Self::new(format!("{err:#}"))
    }
}

/// Why a pipeline pass did not publish a frame.
#[derive(Debug, Error)]
pub enum SkipReason {
    #[error(transparent)]
    FrameUnavailable(#[from] FrameUnavailable),

    #[error("resize failed: {0}")]
    ResizeFailure(String),

    #[error("annotation failed: {0}")]
    AnnotateFailure(String),

    #[error("encode failed: {0}")]
    EncodeFailure(String),
}

impl SkipReason {
    /// Transient skips are expected while a camera warms up or hiccups.
    pub fn is_transient(&self) -> bool {
        matches!(self, SkipReason::FrameUnavailable(_))
    }
}

/// Failure reported to the snapshot caller.
#[derive(Debug, Error)]
pub enum SnapshotError {
    #[error("no frame available yet")]
    NoFrameAvailable,

    #[error("failed to write snapshot {path}: {source}")]
    Write {
        path: String,
        #[source]
        source: std::io::Error,
    },
}

/// A subscriber could not accept another chunk.
#[derive(Debug, Error)]
pub enum SubscriberDisconnected {
    #[error("subscriber {0} hung up")]
    HungUp(u64),

    #[error("subscriber {0} stalled with a full queue")]
    Stalled(u64),
}
