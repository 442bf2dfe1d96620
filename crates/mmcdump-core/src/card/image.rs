//! Output image writer.
//!
//! Cluster `n` lives at byte offset `n * CLUSTER_SIZE`. The file is never
//! truncated, so resumed runs fill the same image in place.

use std::fs::{File, OpenOptions};
use std::io::{self, Seek, SeekFrom, Write};
use std::path::Path;

use tracing::debug;

use super::CLUSTER_SIZE;

/// Destination of dumped clusters.
pub trait ImageSink {
    /// Write one cluster at its fixed offset.
    fn write_cluster(&mut self, cluster: u32, data: &[u8; CLUSTER_SIZE]) -> io::Result<()>;

    /// Make every written cluster durable.
    fn sync(&mut self) -> io::Result<()>;
}

#[derive(Debug)]
pub struct ClusterImage {
    file: File,
    position: u64,
}

impl ClusterImage {
    /// Open (or create) the image at `path` without truncating it.
    pub fn open(path: &Path) -> io::Result<Self> {
        let file = OpenOptions::new()
            .write(true)
            .create(true)
            .truncate(false)
            .open(path)?;
        debug!(path = %path.display(), "Opened dump image");
        Ok(Self { file, position: 0 })
    }

    pub fn offset_of(cluster: u32) -> u64 {
        u64::from(cluster) * CLUSTER_SIZE as u64
    }
}

impl ImageSink for ClusterImage {
    fn write_cluster(&mut self, cluster: u32, data: &[u8; CLUSTER_SIZE]) -> io::Result<()> {
        let offset = Self::offset_of(cluster);
        if offset != self.position {
            self.file.seek(SeekFrom::Start(offset))?;
        }
        self.file.write_all(data)?;
        self.position = offset + CLUSTER_SIZE as u64;
        Ok(())
    }

    fn sync(&mut self) -> io::Result<()> {
        self.file.sync_data()
    }
}
