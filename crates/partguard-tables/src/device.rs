//! Partition-level helpers
//!
//! Lookups that answer questions about one partition device: its label,
//! its unique GUID, and the GUID of the disk that carries it. The entry
//! is read straight from the parent disk using the location recorded in
//! the device's [`PartitionHandle`], without loading the whole table.

use partguard_core::{Device, Error, Result};

use crate::gpt::types::GptEntry;
use crate::gpt::{sector_to_byte, GptState};

/// The partition map scheme these helpers understand
const GPT_SCHEME: &str = "gpt";

/// Read the partition table entry backing `device` from its parent disk.
///
/// # Errors
///
/// [`Error::Bug`] when the device is not a partition, or
/// [`Error::BadArgument`] when its partition map is not GPT.
pub fn device_partentry(device: &mut dyn Device) -> Result<GptEntry> {
    let (offset, index) = {
        let part = device
            .partition()
            .ok_or_else(|| Error::bug("not a partition"))?;
        if part.scheme != GPT_SCHEME {
            return Err(Error::bad_argument("not a GPT partition"));
        }
        (part.offset, part.index)
    };

    let disk = device.disk();
    let addr = sector_to_byte(disk.log_sector_size(), offset)?
        .checked_add(index)
        .ok_or_else(|| {
            Error::out_of_range(format!("entry offset {index:#x} overflows byte addressing"))
        })?;

    let mut raw = [0u8; GptEntry::BASE_SIZE];
    disk.read_at(addr, &mut raw)?;
    GptEntry::from_bytes(&raw)
}

/// The partition's name, decoded from its 36 UTF-16LE code units up to
/// the first NUL.
pub fn part_label(device: &mut dyn Device) -> Result<String> {
    let entry = device_partentry(device)?;
    Ok(entry.name())
}

/// The partition's unique GUID in canonical string form
pub fn part_uuid(device: &mut dyn Device) -> Result<String> {
    let entry = device_partentry(device)?;
    Ok(entry.unique_guid.to_string())
}

/// The disk GUID in canonical string form.
///
/// Loads the GPT from the device's disk and reads the GUID from the
/// preferred header, so this works as long as either copy is intact.
pub fn disk_uuid(device: &mut dyn Device) -> Result<String> {
    let state = GptState::read(device.disk())?;
    Ok(state.preferred_header()?.disk_guid.to_string())
}

#[cfg(test)]
mod tests {
    use super::*;
    use partguard_core::{DiskAccess, PartitionHandle, StreamDisk};
    use std::io::Cursor;

    use crate::gpt::types::{GptGuid, GptHeader};

    struct ImageDevice {
        disk: StreamDisk<Cursor<Vec<u8>>>,
        partition: Option<PartitionHandle>,
    }

    impl Device for ImageDevice {
        fn disk(&mut self) -> &mut dyn DiskAccess {
            &mut self.disk
        }

        fn partition(&self) -> Option<&PartitionHandle> {
            self.partition.as_ref()
        }
    }

    /// 2 MiB image: protective MBR, primary at 1 with entries at 2,
    /// backup at 4095 with entries at 4063, one named partition in
    /// slot 0.
    fn build_disk() -> Vec<u8> {
        let total: u64 = 4096;
        let mut image = vec![0u8; total as usize * 512];

        image[0x1BE + 4] = 0xEE;
        image[0x1FE] = 0x55;
        image[0x1FF] = 0xAA;

        let mut entries = vec![0u8; 128 * 128];
        entries[0..16].copy_from_slice(GptGuid::LINUX_FILESYSTEM.as_bytes());
        entries[16..32].copy_from_slice(&[0x07; 16]);
        entries[32..40].copy_from_slice(&100u64.to_le_bytes());
        entries[40..48].copy_from_slice(&199u64.to_le_bytes());
        for (i, unit) in "Boot Data".encode_utf16().enumerate() {
            entries[56 + i * 2..56 + i * 2 + 2].copy_from_slice(&unit.to_le_bytes());
        }
        let crc = crc32fast::hash(&entries);

        for (header_lba, alternate_lba, entries_lba) in
            [(1u64, total - 1, 2u64), (total - 1, 1, total - 33)]
        {
            let mut header = GptHeader {
                magic: *GptHeader::MAGIC,
                version: GptHeader::VERSION,
                header_size: 92,
                crc32: 0,
                reserved: 0,
                header_lba,
                alternate_lba,
                first_usable: 34,
                last_usable: total - 34,
                disk_guid: GptGuid::from_bytes([0x42; 16]),
                entries_lba,
                max_entries: 128,
                entry_size: 128,
                entries_crc32: crc,
            };
            header.crc32 = header.compute_crc32();

            let offset = header_lba as usize * 512;
            image[offset..offset + 92].copy_from_slice(&header.to_bytes());
            let offset = entries_lba as usize * 512;
            image[offset..offset + entries.len()].copy_from_slice(&entries);
        }

        image
    }

    fn partition_device(scheme: &str) -> ImageDevice {
        ImageDevice {
            disk: StreamDisk::new(Cursor::new(build_disk()), 9, Some(4096)),
            partition: Some(PartitionHandle {
                scheme: scheme.to_string(),
                offset: 2,
                index: 0,
            }),
        }
    }

    #[test]
    fn test_part_label() {
        let mut device = partition_device("gpt");
        assert_eq!(part_label(&mut device).unwrap(), "Boot Data");
    }

    #[test]
    fn test_part_uuid() {
        let mut device = partition_device("gpt");
        assert_eq!(
            part_uuid(&mut device).unwrap(),
            "07070707-0707-0707-0707-070707070707"
        );
    }

    #[test]
    fn test_disk_uuid() {
        let mut device = partition_device("gpt");
        assert_eq!(
            disk_uuid(&mut device).unwrap(),
            "42424242-4242-4242-4242-424242424242"
        );
    }

    #[test]
    fn test_second_entry_in_table() {
        let mut device = partition_device("gpt");
        // Slot 1 sits 128 bytes into the entries sector and is unused.
        device.partition.as_mut().unwrap().index = 128;

        let entry = device_partentry(&mut device).unwrap();
        assert!(entry.is_unused());
    }

    #[test]
    fn test_whole_disk_is_not_a_partition() {
        let mut device = ImageDevice {
            disk: StreamDisk::new(Cursor::new(build_disk()), 9, Some(4096)),
            partition: None,
        };

        let err = device_partentry(&mut device).unwrap_err();
        assert!(matches!(err, Error::Bug(_)));
    }

    #[test]
    fn test_non_gpt_partition_rejected() {
        let mut device = partition_device("msdos");
        let err = device_partentry(&mut device).unwrap_err();
        assert!(matches!(err, Error::BadArgument(_)));
        assert!(err.to_string().contains("not a GPT partition"));
    }
}
