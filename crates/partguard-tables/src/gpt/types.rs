//! GPT on-disk types and structures

use std::fmt;
use std::str::FromStr;

use partguard_core::{Error, Result};

/// A GUID as stored in GPT structures.
///
/// The on-disk layout is mixed-endian: the first three groups (u32, u16,
/// u16) are little-endian, the trailing eight bytes are raw. The string
/// form renders the first three groups from their decoded values and the
/// rest byte by byte, so the same 16 bytes always produce the same
/// canonical `xxxxxxxx-xxxx-xxxx-xxxx-xxxxxxxxxxxx` text.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct GptGuid([u8; 16]);

impl GptGuid {
    /// The all-zero GUID, marking unused partition entries
    pub const ZERO: Self = Self([0; 16]);

    /// EFI System Partition
    pub const EFI_SYSTEM: Self = Self([
        0x28, 0x73, 0x2a, 0xc1, 0x1f, 0xf8, 0xd2, 0x11,
        0xba, 0x4b, 0x00, 0xa0, 0xc9, 0x3e, 0xc9, 0x3b,
    ]);

    /// BIOS boot partition
    pub const BIOS_BOOT: Self = Self([
        0x48, 0x61, 0x68, 0x21, 0x49, 0x64, 0x6f, 0x6e,
        0x74, 0x4e, 0x65, 0x65, 0x64, 0x45, 0x46, 0x49,
    ]);

    /// Microsoft Basic Data (FAT, NTFS, exFAT)
    pub const MICROSOFT_BASIC_DATA: Self = Self([
        0xa2, 0xa0, 0xd0, 0xeb, 0xe5, 0xb9, 0x33, 0x44,
        0x87, 0xc0, 0x68, 0xb6, 0xb7, 0x26, 0x99, 0xc7,
    ]);

    /// Linux filesystem
    pub const LINUX_FILESYSTEM: Self = Self([
        0xaf, 0x3d, 0xc6, 0x0f, 0x83, 0x84, 0x72, 0x47,
        0x8e, 0x79, 0x3d, 0x69, 0xd8, 0x47, 0x7d, 0xe4,
    ]);

    /// Linux swap
    pub const LINUX_SWAP: Self = Self([
        0x6d, 0xfd, 0x57, 0x06, 0xab, 0xa4, 0xc4, 0x43,
        0x84, 0xe5, 0x09, 0x33, 0xc8, 0x4b, 0x4f, 0x4f,
    ]);

    /// Construct from the 16 on-disk bytes
    pub const fn from_bytes(bytes: [u8; 16]) -> Self {
        Self(bytes)
    }

    /// The 16 on-disk bytes
    pub const fn as_bytes(&self) -> &[u8; 16] {
        &self.0
    }

    fn data1(&self) -> u32 {
        u32::from_le_bytes([self.0[0], self.0[1], self.0[2], self.0[3]])
    }

    fn data2(&self) -> u16 {
        u16::from_le_bytes([self.0[4], self.0[5]])
    }

    fn data3(&self) -> u16 {
        u16::from_le_bytes([self.0[6], self.0[7]])
    }

    /// Human-readable name when this is a well-known partition type GUID
    pub fn type_name(&self) -> &'static str {
        match *self {
            Self::ZERO => "Unused",
            Self::EFI_SYSTEM => "EFI System",
            Self::BIOS_BOOT => "BIOS boot",
            Self::MICROSOFT_BASIC_DATA => "Microsoft Basic Data",
            Self::LINUX_FILESYSTEM => "Linux filesystem",
            Self::LINUX_SWAP => "Linux swap",
            _ => "Unknown",
        }
    }
}

impl Default for GptGuid {
    fn default() -> Self {
        Self::ZERO
    }
}

impl fmt::Display for GptGuid {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "{:08x}-{:04x}-{:04x}-{:02x}{:02x}-{:02x}{:02x}{:02x}{:02x}{:02x}{:02x}",
            self.data1(),
            self.data2(),
            self.data3(),
            self.0[8],
            self.0[9],
            self.0[10],
            self.0[11],
            self.0[12],
            self.0[13],
            self.0[14],
            self.0[15],
        )
    }
}

impl FromStr for GptGuid {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self> {
        if !s.bytes().all(|b| b.is_ascii_hexdigit() || b == b'-') {
            return Err(Error::bad_argument(format!("malformed GUID string: {s:?}")));
        }

        let groups: Vec<&str> = s.split('-').collect();
        let lens: Vec<usize> = groups.iter().map(|g| g.len()).collect();
        if lens != [8, 4, 4, 4, 12] {
            return Err(Error::bad_argument(format!("malformed GUID string: {s:?}")));
        }

        let malformed = |_| Error::bad_argument(format!("malformed GUID string: {s:?}"));
        let data1 = u32::from_str_radix(groups[0], 16).map_err(malformed)?;
        let data2 = u16::from_str_radix(groups[1], 16).map_err(malformed)?;
        let data3 = u16::from_str_radix(groups[2], 16).map_err(malformed)?;

        let mut bytes = [0u8; 16];
        bytes[0..4].copy_from_slice(&data1.to_le_bytes());
        bytes[4..6].copy_from_slice(&data2.to_le_bytes());
        bytes[6..8].copy_from_slice(&data3.to_le_bytes());

        let tail = format!("{}{}", groups[3], groups[4]);
        for (i, chunk) in tail.as_bytes().chunks(2).enumerate() {
            let pair = std::str::from_utf8(chunk).map_err(|_| {
                Error::bad_argument(format!("malformed GUID string: {s:?}"))
            })?;
            bytes[8 + i] = u8::from_str_radix(pair, 16).map_err(malformed)?;
        }

        Ok(Self(bytes))
    }
}

/// GPT header as kept in memory, fields in host byte order.
///
/// The on-disk encoding is exactly 92 bytes, all integers little-endian;
/// [`GptHeader::from_bytes`] and [`GptHeader::to_bytes`] convert between
/// the two forms.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct GptHeader {
    /// Fixed signature, "EFI PART"
    pub magic: [u8; 8],
    /// Format revision, 0x00010000
    pub version: u32,
    /// Declared header size in bytes
    pub header_size: u32,
    /// CRC32 of the first `header_size` bytes, computed with this field
    /// zeroed
    pub crc32: u32,
    /// Reserved, zero on disk
    pub reserved: u32,
    /// Sector containing this header
    pub header_lba: u64,
    /// Sector of the other copy's header
    pub alternate_lba: u64,
    /// First sector usable for partition content
    pub first_usable: u64,
    /// Last sector usable for partition content
    pub last_usable: u64,
    /// GUID identifying the disk
    pub disk_guid: GptGuid,
    /// First sector of the entries array
    pub entries_lba: u64,
    /// Number of slots in the entries array
    pub max_entries: u32,
    /// Size of one entry in bytes
    pub entry_size: u32,
    /// CRC32 of the entries array
    pub entries_crc32: u32,
}

impl GptHeader {
    /// Header signature
    pub const MAGIC: &'static [u8; 8] = b"EFI PART";

    /// Supported header version
    pub const VERSION: u32 = 0x0001_0000;

    /// Size of the native header struct on disk
    pub const NATIVE_SIZE: usize = 92;

    /// Minimum size of the entries array in bytes, regardless of how
    /// large the individual entries are
    pub const DEFAULT_ENTRIES_SIZE: u64 = 16384;

    /// Decode a header from its on-disk form.
    ///
    /// Only the field layout is interpreted here; signature, version, and
    /// CRC are judged by the header validator.
    ///
    /// # Errors
    ///
    /// Returns [`Error::BadArgument`] when fewer than 92 bytes are given.
    pub fn from_bytes(bytes: &[u8]) -> Result<Self> {
        if bytes.len() < Self::NATIVE_SIZE {
            return Err(Error::bad_argument("GPT header needs at least 92 bytes"));
        }

        let mut magic = [0u8; 8];
        magic.copy_from_slice(&bytes[0..8]);

        let mut disk_guid = [0u8; 16];
        disk_guid.copy_from_slice(&bytes[56..72]);

        Ok(Self {
            magic,
            version: le_u32(&bytes[8..12]),
            header_size: le_u32(&bytes[12..16]),
            crc32: le_u32(&bytes[16..20]),
            reserved: le_u32(&bytes[20..24]),
            header_lba: le_u64(&bytes[24..32]),
            alternate_lba: le_u64(&bytes[32..40]),
            first_usable: le_u64(&bytes[40..48]),
            last_usable: le_u64(&bytes[48..56]),
            disk_guid: GptGuid::from_bytes(disk_guid),
            entries_lba: le_u64(&bytes[72..80]),
            max_entries: le_u32(&bytes[80..84]),
            entry_size: le_u32(&bytes[84..88]),
            entries_crc32: le_u32(&bytes[88..92]),
        })
    }

    /// Encode the header into its 92-byte on-disk form
    pub fn to_bytes(&self) -> [u8; Self::NATIVE_SIZE] {
        let mut bytes = [0u8; Self::NATIVE_SIZE];
        bytes[0..8].copy_from_slice(&self.magic);
        bytes[8..12].copy_from_slice(&self.version.to_le_bytes());
        bytes[12..16].copy_from_slice(&self.header_size.to_le_bytes());
        bytes[16..20].copy_from_slice(&self.crc32.to_le_bytes());
        bytes[20..24].copy_from_slice(&self.reserved.to_le_bytes());
        bytes[24..32].copy_from_slice(&self.header_lba.to_le_bytes());
        bytes[32..40].copy_from_slice(&self.alternate_lba.to_le_bytes());
        bytes[40..48].copy_from_slice(&self.first_usable.to_le_bytes());
        bytes[48..56].copy_from_slice(&self.last_usable.to_le_bytes());
        bytes[56..72].copy_from_slice(self.disk_guid.as_bytes());
        bytes[72..80].copy_from_slice(&self.entries_lba.to_le_bytes());
        bytes[80..84].copy_from_slice(&self.max_entries.to_le_bytes());
        bytes[84..88].copy_from_slice(&self.entry_size.to_le_bytes());
        bytes[88..92].copy_from_slice(&self.entries_crc32.to_le_bytes());
        bytes
    }

    /// CRC32 of this header with the `crc32` field zeroed.
    ///
    /// The checksum covers the declared `header_size` bytes. Bytes past
    /// the 92-byte struct are reserved and must be zero on disk, so the
    /// buffer is zero-padded up to that size. The padding target is
    /// clamped to the 92..=4096 range; headers declaring sizes outside it
    /// are rejected by the size check no matter what this returns.
    pub fn compute_crc32(&self) -> u32 {
        let len = (self.header_size as usize).clamp(Self::NATIVE_SIZE, 4096);
        let mut buf = vec![0u8; len];

        let mut copy = *self;
        copy.crc32 = 0;
        buf[..Self::NATIVE_SIZE].copy_from_slice(&copy.to_bytes());

        crc32fast::hash(&buf)
    }

    /// Total size of the entries array in bytes.
    ///
    /// Widening to u64 before multiplying keeps the product exact for any
    /// pair of 32-bit operands.
    pub fn entries_bytes(&self) -> u64 {
        u64::from(self.max_entries) * u64::from(self.entry_size)
    }

    /// Number of sectors the entries array occupies, rounded up
    pub fn entries_sectors(&self, log_sector_size: u8) -> u64 {
        self.entries_bytes().div_ceil(1u64 << log_sector_size)
    }
}

/// One partition entry.
///
/// On disk an entry occupies the header's `entry_size` bytes (at least
/// 128); everything past the first 128 bytes is reserved.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct GptEntry {
    /// Partition type GUID; all-zero marks the slot unused
    pub type_guid: GptGuid,
    /// GUID unique to this partition
    pub unique_guid: GptGuid,
    /// First sector (inclusive)
    pub first_lba: u64,
    /// Last sector (inclusive)
    pub last_lba: u64,
    /// Attribute flags
    pub attributes: u64,
    /// Partition name, 36 UTF-16 code units, NUL-padded
    pub name_units: [u16; 36],
}

impl GptEntry {
    /// Size of the defined portion of an entry
    pub const BASE_SIZE: usize = 128;

    /// Decode an entry from its on-disk form.
    ///
    /// # Errors
    ///
    /// Returns [`Error::BadArgument`] when fewer than 128 bytes are given.
    pub fn from_bytes(bytes: &[u8]) -> Result<Self> {
        if bytes.len() < Self::BASE_SIZE {
            return Err(Error::bad_argument("GPT entry needs at least 128 bytes"));
        }

        let mut type_guid = [0u8; 16];
        type_guid.copy_from_slice(&bytes[0..16]);
        let mut unique_guid = [0u8; 16];
        unique_guid.copy_from_slice(&bytes[16..32]);

        let mut name_units = [0u16; 36];
        for (i, unit) in name_units.iter_mut().enumerate() {
            *unit = u16::from_le_bytes([bytes[56 + i * 2], bytes[56 + i * 2 + 1]]);
        }

        Ok(Self {
            type_guid: GptGuid::from_bytes(type_guid),
            unique_guid: GptGuid::from_bytes(unique_guid),
            first_lba: le_u64(&bytes[32..40]),
            last_lba: le_u64(&bytes[40..48]),
            attributes: le_u64(&bytes[48..56]),
            name_units,
        })
    }

    /// Whether this slot is unused (all-zero type GUID)
    pub fn is_unused(&self) -> bool {
        self.type_guid == GptGuid::ZERO
    }

    /// Length of the partition in sectors
    pub fn sectors(&self) -> u64 {
        if self.last_lba >= self.first_lba {
            self.last_lba - self.first_lba + 1
        } else {
            0
        }
    }

    /// The partition name, decoded up to the first NUL
    pub fn name(&self) -> String {
        let len = self
            .name_units
            .iter()
            .position(|&u| u == 0)
            .unwrap_or(self.name_units.len());
        String::from_utf16_lossy(&self.name_units[..len])
    }
}

impl fmt::Display for GptEntry {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let label = self.name();
        if label.is_empty() {
            write!(
                f,
                "{} [{}..{}]",
                self.type_guid.type_name(),
                self.first_lba,
                self.last_lba
            )
        } else {
            write!(
                f,
                "{} ({}) [{}..{}]",
                self.type_guid.type_name(),
                label,
                self.first_lba,
                self.last_lba
            )
        }
    }
}

bitflags::bitflags! {
    /// Which of the on-disk GPT artifacts are currently known good.
    ///
    /// The header and entries bits are tracked independently per side:
    /// an entries array can check out even when its owning header fails
    /// the layout checks, and vice versa.
    #[derive(Debug, Clone, Copy, PartialEq, Eq)]
    pub struct GptStatus: u8 {
        /// Sector 0 holds a protective MBR
        const PROTECTIVE_MBR = 0x01;
        /// The primary header passed validation
        const PRIMARY_HEADER_VALID = 0x02;
        /// The primary entries array matched its CRC
        const PRIMARY_ENTRIES_VALID = 0x04;
        /// The backup header passed validation
        const BACKUP_HEADER_VALID = 0x08;
        /// The backup entries array matched its CRC
        const BACKUP_ENTRIES_VALID = 0x10;
    }
}

fn le_u32(bytes: &[u8]) -> u32 {
    u32::from_le_bytes([bytes[0], bytes[1], bytes[2], bytes[3]])
}

fn le_u64(bytes: &[u8]) -> u64 {
    u64::from_le_bytes([
        bytes[0], bytes[1], bytes[2], bytes[3], bytes[4], bytes[5], bytes[6], bytes[7],
    ])
}
