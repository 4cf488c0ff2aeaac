//! Stream-backed disk access

use std::io::{Read, Seek, SeekFrom, Write};

use crate::error::Result;
use crate::traits::DiskAccess;

/// [`DiskAccess`] adapter over any readable, writable, seekable stream.
///
/// Wraps files, in-memory cursors, or anything else implementing the std
/// I/O traits, and carries the sector geometry the stream itself cannot
/// express.
#[derive(Debug)]
pub struct StreamDisk<S> {
    stream: S,
    log_sector_size: u8,
    total_sectors: Option<u64>,
}

impl<S: Read + Write + Seek> StreamDisk<S> {
    /// Create a disk over `stream`.
    ///
    /// `log_sector_size` is the base-2 logarithm of the logical sector
    /// size (9 for 512-byte sectors). `total_sectors` is `None` when the
    /// size of the underlying device is unknown.
    pub fn new(stream: S, log_sector_size: u8, total_sectors: Option<u64>) -> Self {
        Self {
            stream,
            log_sector_size,
            total_sectors,
        }
    }

    /// Consume the disk and return the underlying stream
    pub fn into_inner(self) -> S {
        self.stream
    }
}

impl<S: Read + Write + Seek> DiskAccess for StreamDisk<S> {
    fn read_at(&mut self, offset: u64, buf: &mut [u8]) -> Result<()> {
        self.stream.seek(SeekFrom::Start(offset))?;
        self.stream.read_exact(buf)?;
        Ok(())
    }

    fn write_at(&mut self, offset: u64, data: &[u8]) -> Result<()> {
        self.stream.seek(SeekFrom::Start(offset))?;
        self.stream.write_all(data)?;
        Ok(())
    }

    fn log_sector_size(&self) -> u8 {
        self.log_sector_size
    }

    fn total_sectors(&self) -> Option<u64> {
        self.total_sectors
    }
}
