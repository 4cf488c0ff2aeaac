//! Legacy MBR (Master Boot Record) handling
//!
//! GPT disks carry a legacy partition table at sector 0 whose only job is
//! to mark the whole disk as in use, so tools that predate GPT do not
//! treat it as unpartitioned. This module decodes that sector and decides
//! whether it is such a "protective" MBR.

pub mod types;

use partguard_core::{Error, Result};
use types::MbrPartitionType;

/// One 16-byte slot in the legacy partition table.
#[derive(Debug, Clone, Copy, Default)]
pub struct MbrPartitionEntry {
    /// Status byte (0x80 = bootable)
    pub status: u8,
    /// CHS address of the first sector, raw 3-byte form
    pub chs_start: [u8; 3],
    /// Partition type byte
    pub part_type: u8,
    /// CHS address of the last sector, raw 3-byte form
    pub chs_end: [u8; 3],
    /// First sector (LBA)
    pub lba_start: u32,
    /// Sector count
    pub lba_len: u32,
}

impl MbrPartitionEntry {
    fn from_bytes(bytes: &[u8]) -> Self {
        Self {
            status: bytes[0],
            chs_start: [bytes[1], bytes[2], bytes[3]],
            part_type: bytes[4],
            chs_end: [bytes[5], bytes[6], bytes[7]],
            lba_start: u32::from_le_bytes([bytes[8], bytes[9], bytes[10], bytes[11]]),
            lba_len: u32::from_le_bytes([bytes[12], bytes[13], bytes[14], bytes[15]]),
        }
    }

    /// Human-readable name of this entry's partition type
    pub fn type_name(&self) -> &'static str {
        MbrPartitionType::from_byte(self.part_type).name()
    }
}

/// In-memory image of sector 0.
///
/// # Structure
///
/// ```text
/// Offset  Size  Field
/// ------  ----  -----
/// 0x000   440   Bootstrap code
/// 0x1B8   4     Disk signature
/// 0x1BC   2     Reserved
/// 0x1BE   64    Partition entries 1-4 (16 bytes each)
/// 0x1FE   2     Boot signature (0xAA55)
/// ```
#[derive(Debug, Clone, Default)]
pub struct Mbr {
    /// The four primary partition entries
    pub entries: [MbrPartitionEntry; 4],
    /// Disk signature at offset 0x1B8
    pub disk_signature: u32,
    /// Boot signature at offset 0x1FE; 0xAA55 when the table is valid
    pub boot_signature: u16,
}

impl Mbr {
    /// Size of the MBR in bytes (always 512, regardless of sector size)
    pub const SECTOR_SIZE: usize = 512;

    /// The boot signature that must be present at offset 0x1FE
    pub const BOOT_SIGNATURE: u16 = 0xAA55;

    /// Offset of the first partition entry
    pub const PARTITION_TABLE_OFFSET: usize = 0x1BE;

    /// Offset of the disk signature
    pub const DISK_SIGNATURE_OFFSET: usize = 0x1B8;

    /// Offset of the boot signature
    pub const BOOT_SIGNATURE_OFFSET: usize = 0x1FE;

    /// Size of each partition entry
    pub const PARTITION_ENTRY_SIZE: usize = 16;

    /// Decode sector 0. Decoding never fails; whether the result is a
    /// usable protective MBR is judged separately by [`Mbr::pmbr_check`].
    pub fn from_bytes(bytes: &[u8; Self::SECTOR_SIZE]) -> Self {
        let mut entries = [MbrPartitionEntry::default(); 4];
        for (i, entry) in entries.iter_mut().enumerate() {
            let offset = Self::PARTITION_TABLE_OFFSET + i * Self::PARTITION_ENTRY_SIZE;
            *entry = MbrPartitionEntry::from_bytes(&bytes[offset..offset + Self::PARTITION_ENTRY_SIZE]);
        }

        let disk_signature = u32::from_le_bytes([
            bytes[Self::DISK_SIGNATURE_OFFSET],
            bytes[Self::DISK_SIGNATURE_OFFSET + 1],
            bytes[Self::DISK_SIGNATURE_OFFSET + 2],
            bytes[Self::DISK_SIGNATURE_OFFSET + 3],
        ]);
        let boot_signature = u16::from_le_bytes([
            bytes[Self::BOOT_SIGNATURE_OFFSET],
            bytes[Self::BOOT_SIGNATURE_OFFSET + 1],
        ]);

        Self {
            entries,
            disk_signature,
            boot_signature,
        }
    }

    /// Verify this is a protective MBR and not a normal one: the boot
    /// signature must match and at least one primary entry must carry the
    /// GPT protective type (0xEE).
    ///
    /// # Errors
    ///
    /// Returns [`Error::BadPartitionTable`] when the signature is wrong or
    /// no protective entry is present.
    pub fn pmbr_check(&self) -> Result<()> {
        if self.boot_signature != Self::BOOT_SIGNATURE {
            return Err(Error::bad_partition_table("invalid MBR signature"));
        }

        let protective = MbrPartitionType::GptProtective.to_byte();
        if self.entries.iter().any(|e| e.part_type == protective) {
            Ok(())
        } else {
            Err(Error::bad_partition_table("invalid protective MBR"))
        }
    }

    /// Whether [`Mbr::pmbr_check`] passes
    pub fn is_protective(&self) -> bool {
        self.pmbr_check().is_ok()
    }
}
