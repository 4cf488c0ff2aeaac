//! # Partguard Core
//!
//! Core traits and error handling for the partguard partition-table engine.
//!
//! This crate provides the foundational abstractions for working with
//! block-addressable storage:
//! - **DiskAccess**: byte-addressed read/write on a block device
//! - **Device**: a disk plus an optional partition handle
//! - **StreamDisk**: a [`DiskAccess`] adapter over any seekable stream
//!
//! ## Example
//!
//! ```rust,no_run
//! use partguard_core::{DiskAccess, StreamDisk};
//! use std::fs::OpenOptions;
//!
//! let file = OpenOptions::new().read(true).write(true).open("disk.img").unwrap();
//! // 512-byte sectors, unknown total size.
//! let mut disk = StreamDisk::new(file, 9, None);
//! let mut sector0 = [0u8; 512];
//! disk.read_at(0, &mut sector0).unwrap();
//! ```

pub mod disk;
pub mod error;
pub mod traits;

// Re-export commonly used items
pub use disk::StreamDisk;
pub use error::{Error, Result};
pub use traits::{Device, DiskAccess, PartitionHandle};
