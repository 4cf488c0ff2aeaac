//! Core traits for partguard

use crate::error::Result;

/// Byte-addressed access to a block device.
///
/// Offsets are absolute byte positions from the start of the disk. The
/// sector geometry is exposed separately so callers can translate logical
/// block addresses themselves.
pub trait DiskAccess {
    /// Read exactly `buf.len()` bytes starting at `offset`
    fn read_at(&mut self, offset: u64, buf: &mut [u8]) -> Result<()>;

    /// Write all of `data` starting at `offset`
    fn write_at(&mut self, offset: u64, data: &[u8]) -> Result<()>;

    /// Base-2 logarithm of the logical sector size (9 for 512-byte sectors)
    fn log_sector_size(&self) -> u8;

    /// Total number of logical sectors, or `None` if the driver cannot
    /// report a size
    fn total_sectors(&self) -> Option<u64>;
}

/// Where a partition's table entry lives on its parent disk.
#[derive(Debug, Clone)]
pub struct PartitionHandle {
    /// Partition map scheme that produced this handle (e.g. "gpt")
    pub scheme: String,

    /// Sector of the parent disk containing this partition's table entry
    pub offset: u64,

    /// Byte offset of the entry within that sector
    pub index: u64,
}

/// A device handle: the underlying whole-disk access plus, when the device
/// is a partition, the location of its table entry.
pub trait Device {
    /// The whole-disk view backing this device
    fn disk(&mut self) -> &mut dyn DiskAccess;

    /// The partition handle, or `None` when this device is a whole disk
    fn partition(&self) -> Option<&PartitionHandle>;
}
