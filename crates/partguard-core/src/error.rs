//! Partguard error types

use thiserror::Error;

/// The main error type for partition-table operations
#[derive(Error, Debug)]
pub enum Error {
    /// I/O error while reading or writing the disk
    #[error("Disk I/O error: {0}")]
    Io(#[from] std::io::Error),

    /// Structurally invalid partition table: bad magic, CRC, sizes, layout
    #[error("Bad partition table: {0}")]
    BadPartitionTable(String),

    /// A location is impossible for the disk, e.g. the backup table lies
    /// beyond the last sector
    #[error("Out of range: {0}")]
    OutOfRange(String),

    /// An allocation request cannot be satisfied or sized
    #[error("Out of memory: {0}")]
    OutOfMemory(String),

    /// Internal state-machine violation; indicates a defect in the engine
    /// or its caller, not in the on-disk data
    #[error("Internal error: {0}")]
    Bug(String),

    /// The operation is valid but not supported by this implementation
    #[error("Not implemented: {0}")]
    NotImplemented(String),

    /// A caller-supplied argument does not fit the operation
    #[error("Bad argument: {0}")]
    BadArgument(String),
}

/// Result type alias for partition-table operations
pub type Result<T> = std::result::Result<T, Error>;

impl Error {
    /// Create a bad partition table error
    pub fn bad_partition_table(msg: impl Into<String>) -> Self {
        Error::BadPartitionTable(msg.into())
    }

    /// Create an out of range error
    pub fn out_of_range(msg: impl Into<String>) -> Self {
        Error::OutOfRange(msg.into())
    }

    /// Create an out of memory error
    pub fn out_of_memory(msg: impl Into<String>) -> Self {
        Error::OutOfMemory(msg.into())
    }

    /// Create an internal error
    pub fn bug(msg: impl Into<String>) -> Self {
        Error::Bug(msg.into())
    }

    /// Create a not implemented error
    pub fn not_implemented(msg: impl Into<String>) -> Self {
        Error::NotImplemented(msg.into())
    }

    /// Create a bad argument error
    pub fn bad_argument(msg: impl Into<String>) -> Self {
        Error::BadArgument(msg.into())
    }
}
