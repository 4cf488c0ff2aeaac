//! # Partguard Tables
//!
//! GPT metadata engine: read, validate, repair, and write GUID Partition
//! Tables on block-addressable storage.
//!
//! GPT keeps two copies of its metadata: a primary header plus entry array
//! near the start of the disk and a backup pair near the end, fronted by a
//! protective legacy MBR at sector 0. This crate loads both copies with
//! CRC verification, cross-checks them field by field, reconstructs a
//! missing copy from the surviving one, and commits updates backup-first
//! so an interrupted write never leaves both copies corrupt.
//!
//! ## Example
//!
//! ```rust,no_run
//! use partguard_core::StreamDisk;
//! use partguard_tables::GptState;
//! use std::fs::OpenOptions;
//!
//! let file = OpenOptions::new().read(true).write(true).open("disk.img").unwrap();
//! let mut disk = StreamDisk::new(file, 9, None);
//!
//! let mut state = GptState::read(&mut disk).unwrap();
//! println!("disk GUID: {}", state.preferred_header().unwrap().disk_guid);
//!
//! // Rebuild a missing copy, then commit both.
//! state.repair(&mut disk).unwrap();
//! state.write(&mut disk).unwrap();
//! ```

pub mod device;
pub mod gpt;
pub mod mbr;

pub use device::{device_partentry, disk_uuid, part_label, part_uuid};
pub use gpt::types::{GptEntry, GptGuid, GptHeader, GptStatus};
pub use gpt::{header_check, headers_equal, GptState};
pub use mbr::Mbr;
