//! Runtime control: detection toggle, snapshots, status.

use std::fs::{self, OpenOptions};
use std::io::{self, Write};
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;

use anyhow::{Context, Result};
use serde::Serialize;

use crate::error::SnapshotError;
use crate::pipeline::PipelineState;
use crate::stream::StreamHub;

const SNAPSHOT_PREFIX: &str = "image";

/// Writes snapshots as `image<N>.<ext>` with increasing `N`.
#[derive(Debug)]
pub struct SnapshotStore {
    dir: PathBuf,
    last_index: AtomicU64,
}

impl SnapshotStore {
    /// Create the directory if needed and resume numbering after the highest
    /// existing index.
    pub fn open(dir: impl Into<PathBuf>) -> Result<Self> {
        let dir = dir.into();
        fs::create_dir_all(&dir)
            .with_context(|| format!("create snapshot dir {}", dir.display()))?;
        let last_index = highest_index(&dir)
            .with_context(|| format!("scan snapshot dir {}", dir.display()))?;
        log::info!(
            "snapshots: {} (next index {})",
            dir.display(),
            last_index + 1
        );
        Ok(Self {
            dir,
            last_index: AtomicU64::new(last_index),
        })
    }

    pub fn dir(&self) -> &Path {
        &self.dir
    }

    /// Persist `bytes` under the next free name. Never overwrites.
    pub fn save(&self, bytes: &[u8], extension: &str) -> Result<PathBuf, SnapshotError> {
        loop {
            let index = self.last_index.fetch_add(1, Ordering::SeqCst) + 1;
            let path = self
                .dir
                .join(format!("{SNAPSHOT_PREFIX}{index}.{extension}"));
            match OpenOptions::new().write(true).create_new(true).open(&path) {
                Ok(mut file) => {
                    file.write_all(bytes)
                        .and_then(|_| file.sync_all())
                        .map_err(|source| SnapshotError::Write {
                            path: path.display().to_string(),
                            source,
                        })?;
                    return Ok(path);
                }
                Err(err) if err.kind() == io::ErrorKind::AlreadyExists => continue,
                Err(source) => {
                    return Err(SnapshotError::Write {
                        path: path.display().to_string(),
                        source,
                    })
                }
            }
        }
    }
}

fn highest_index(dir: &Path) -> io::Result<u64> {
    let mut highest = 0;
    for entry in fs::read_dir(dir)? {
        let name = entry?.file_name();
        let Some(name) = name.to_str() else { continue };
        let index = name
            .strip_prefix(SNAPSHOT_PREFIX)
            .and_then(|rest| rest.split('.').next())
            .and_then(|digits| digits.parse::<u64>().ok());
        if let Some(index) = index {
            highest = highest.max(index);
        }
    }
    Ok(highest)
}

#[derive(Debug, Clone, Serialize, PartialEq, Eq)]
pub struct Status {
    pub detection: bool,
    pub frames: u64,
    pub subscribers: usize,
    pub latest_sequence: Option<u64>,
}

/// Operations exposed to remote operators.
#[derive(Clone)]
pub struct ControlSurface {
    state: Arc<PipelineState>,
    hub: Arc<StreamHub>,
    snapshots: Arc<SnapshotStore>,
}

impl ControlSurface {
    pub fn new(state: Arc<PipelineState>, hub: Arc<StreamHub>, snapshots: Arc<SnapshotStore>) -> Self {
        Self {
            state,
            hub,
            snapshots,
        }
    }

    pub fn state(&self) -> &Arc<PipelineState> {
        &self.state
    }

    pub fn hub(&self) -> &Arc<StreamHub> {
        &self.hub
    }

    /// Takes effect from the next pipeline pass. Returns the stored value.
    pub fn set_detection_enabled(&self, enabled: bool) -> bool {
        self.state.set_detection_enabled(enabled);
        log::info!("detection {}", if enabled { "enabled" } else { "disabled" });
        enabled
    }

    /// Save the latest published frame exactly as it was streamed.
    pub fn capture_snapshot(&self) -> Result<PathBuf, SnapshotError> {
        let frame = self
            .state
            .latest_frame()
            .ok_or(SnapshotError::NoFrameAvailable)?;
        let path = self
            .snapshots
            .save(frame.bytes(), frame.format.extension())?;
        log::info!("snapshot of frame {} saved to {}", frame.sequence, path.display());
        Ok(path)
    }

    pub fn status(&self) -> Status {
        Status {
            detection: self.state.detection_enabled(),
            frames: self.state.frame_counter(),
            subscribers: self.hub.subscriber_count(),
            latest_sequence: self.state.latest_frame().map(|frame| frame.sequence),
        }
    }
}
