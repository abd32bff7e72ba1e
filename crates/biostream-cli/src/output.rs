//! Frame files on disk

use std::path::{Path, PathBuf};

use anyhow::{Context as _, Result};
use tracing::trace;

use biostream_core::TaggedFrame;

/// Writes each frame to `frame_NNNNNN.jpg` under one directory
pub struct FrameWriter {
    dir: PathBuf,
    written: u64,
    bytes: u64,
}

impl FrameWriter {
    pub async fn create(dir: &Path) -> Result<Self> {
        tokio::fs::create_dir_all(dir)
            .await
            .with_context(|| format!("failed to create {}", dir.display()))?;
        Ok(Self {
            dir: dir.to_path_buf(),
            written: 0,
            bytes: 0,
        })
    }

    pub fn path_for(&self, sequence: u64) -> PathBuf {
        self.dir.join(format!("frame_{sequence:06}.jpg"))
    }

    pub async fn write(&mut self, frame: &TaggedFrame) -> Result<()> {
        let path = self.path_for(frame.sequence);
        tokio::fs::write(&path, frame.frame.as_bytes())
            .await
            .with_context(|| format!("failed to write {}", path.display()))?;
        self.written += 1;
        self.bytes += frame.frame.len() as u64;
        trace!(
            sequence = frame.sequence,
            captured_at = %frame.captured_at.format("%H:%M:%S%.3f"),
            path = %path.display(),
            "Frame written"
        );
        Ok(())
    }

    pub fn written(&self) -> u64 {
        self.written
    }

    pub fn bytes(&self) -> u64 {
        self.bytes
    }
}
