//! GPT (GUID Partition Table) engine: load, cross-check, repair, write
//!
//! # Structure
//!
//! ```text
//! LBA 0:        Protective MBR
//! LBA 1:        Primary GPT header
//! LBA 2..:      Primary partition entries array
//! ...           Usable disk space
//! Last usable+1 Backup partition entries array (typically)
//! Last LBA:     Backup GPT header
//! ```
//!
//! The two copies of the metadata are tracked independently. Loading
//! validates each side on its own, then cross-checks them; repair
//! reconstructs a missing side from the surviving one; writing commits
//! the backup before the primary so an interrupted update always leaves
//! the primary as the last-known-good source.

pub mod types;

use partguard_core::{DiskAccess, Error, Result};

use crate::mbr::Mbr;
use types::{GptEntry, GptHeader, GptStatus};

const OUT_OF_SYNC: &str = "backup GPT out of sync";

/// Disks whose 512-byte-normalized sector count exceeds this are treated
/// as size-unknown; some drivers report placeholder maxima.
const MAX_REASONABLE_SECTORS: u64 = 1 << 51;

/// The GPT metadata of one disk: both headers, one entries array, and a
/// record of which of the four on-disk artifacts are currently valid.
///
/// Obtained from [`GptState::read`]. The entries buffer is owned by the
/// state and shared by both headers; after a successful load it is the
/// array belonging to whichever side validated.
#[derive(Debug, Clone)]
pub struct GptState {
    log_sector_size: u8,
    pmbr: Mbr,
    primary: GptHeader,
    backup: GptHeader,
    entries: Vec<u8>,
    status: GptStatus,
}

/// Stateless structural checks on a single header.
///
/// Verifies, in order: the signature, the version, the CRC over the
/// declared header size (with the CRC field zeroed), the header size
/// bounds (92 up to one logical sector), the entry size shape
/// (128·2^k), the minimum entries-table size, and the usable-range
/// ordering. Placement relative to the rest of the disk is judged by
/// the per-side layout checks, not here.
///
/// # Errors
///
/// Returns [`Error::BadPartitionTable`] naming the first check that
/// failed.
pub fn header_check(header: &GptHeader, log_sector_size: u8) -> Result<()> {
    if header.magic != *GptHeader::MAGIC {
        return Err(Error::bad_partition_table("invalid GPT signature"));
    }

    if header.version != GptHeader::VERSION {
        return Err(Error::bad_partition_table("unknown GPT version"));
    }

    if header.crc32 != header.compute_crc32() {
        return Err(Error::bad_partition_table("invalid GPT header crc32"));
    }

    // "Must be greater than or equal to 92 and must be less than or
    // equal to the logical block size."
    let size = header.header_size;
    if size < GptHeader::NATIVE_SIZE as u32 || u64::from(size) > (1u64 << log_sector_size) {
        return Err(Error::bad_partition_table("invalid GPT header size"));
    }

    // "A value of 128*(2^n) where n is an integer greater than or equal
    // to zero (e.g., 128, 256, 512, etc.)."
    let size = header.entry_size;
    if size < 128 || size % 128 != 0 || !(size / 128).is_power_of_two() {
        return Err(Error::bad_partition_table("invalid GPT entry size"));
    }

    // The minimum table size is specified in bytes, regardless of how
    // large the individual entries are.
    if header.entries_bytes() < GptHeader::DEFAULT_ENTRIES_SIZE {
        return Err(Error::bad_partition_table("invalid GPT entry table size"));
    }

    if header.first_usable > header.last_usable {
        return Err(Error::bad_partition_table("invalid usable sectors"));
    }

    Ok(())
}

/// Whether two individually-validated headers describe the same table.
///
/// Field-by-field rather than a byte compare: the CRC, the header
/// location, and the entries location legitimately differ between the
/// copies.
pub fn headers_equal(primary: &GptHeader, backup: &GptHeader) -> bool {
    primary.header_size == backup.header_size
        && primary.header_lba == backup.alternate_lba
        && primary.alternate_lba == backup.header_lba
        && primary.first_usable == backup.first_usable
        && primary.last_usable == backup.last_usable
        && primary.max_entries == backup.max_entries
        && primary.entry_size == backup.entry_size
        && primary.entries_crc32 == backup.entries_crc32
        && primary.disk_guid == backup.disk_guid
}

/// Byte address of a sector, overflow-checked
pub(crate) fn sector_to_byte(log_sector_size: u8, sector: u64) -> Result<u64> {
    sector.checked_mul(1u64 << log_sector_size).ok_or_else(|| {
        Error::out_of_range(format!("sector {sector:#x} overflows byte addressing"))
    })
}

fn size_to_sectors(log_sector_size: u8, size: u64) -> u64 {
    size.div_ceil(1u64 << log_sector_size)
}

/// The disk's sector count, if known and believable.
///
/// Counts that normalize to more than 2^51 512-byte blocks are treated
/// as unknown.
fn checked_total_sectors(disk: &dyn DiskAccess) -> Option<u64> {
    let total = disk.total_sectors().filter(|&t| t > 0)?;
    let shift = disk.log_sector_size().saturating_sub(9);
    let normalized = total.checked_mul(1u64 << shift)?;
    (normalized <= MAX_REASONABLE_SECTORS).then_some(total)
}

fn is_out_of_sync(err: &Error) -> bool {
    matches!(err, Error::BadPartitionTable(msg) if msg == OUT_OF_SYNC)
}

/// Read the entries array described by `header` and verify its CRC.
fn read_entries(
    disk: &mut dyn DiskAccess,
    header: &GptHeader,
    log_sector_size: u8,
) -> Result<Vec<u8>> {
    let entries_bytes = header.entries_bytes();

    // The header validator already enforced this; a violation here means
    // an unvalidated header slipped through.
    if entries_bytes < GptHeader::DEFAULT_ENTRIES_SIZE {
        return Err(Error::bug("invalid GPT entries table size"));
    }

    let len = usize::try_from(entries_bytes)
        .map_err(|_| Error::out_of_memory("GPT entries table too large"))?;
    let mut entries = vec![0u8; len];

    let count = header.max_entries;
    let sector = header.entries_lba;
    tracing::debug!(count, sector, "reading GPT entries");

    let addr = sector_to_byte(log_sector_size, sector)?;
    disk.read_at(addr, &mut entries)?;

    if crc32fast::hash(&entries) != header.entries_crc32 {
        return Err(Error::bad_partition_table("invalid GPT entry crc32"));
    }

    Ok(entries)
}

impl GptState {
    /// Load the GPT metadata from `disk`.
    ///
    /// Sector 0 is checked for a protective MBR first; a normal MBR is
    /// not fatal and only leaves the status bit clear. Both metadata
    /// copies are then read and validated independently. The load
    /// succeeds when at least one side is fully valid; when both fail,
    /// the primary's error is reported.
    ///
    /// The one cross-check failure that is never suppressed is two
    /// individually-valid copies that disagree: that is reported as
    /// "backup GPT out of sync" even though the primary alone would be
    /// usable, so the caller can decide which side wins.
    ///
    /// # Errors
    ///
    /// [`Error::BadPartitionTable`] for structural problems,
    /// [`Error::OutOfRange`] when the backup cannot be located, or the
    /// underlying I/O error.
    pub fn read(disk: &mut dyn DiskAccess) -> Result<Self> {
        let mut sector0 = [0u8; Mbr::SECTOR_SIZE];
        disk.read_at(0, &mut sector0)?;

        let mut state = GptState {
            log_sector_size: disk.log_sector_size(),
            pmbr: Mbr::from_bytes(&sector0),
            primary: GptHeader::default(),
            backup: GptHeader::default(),
            entries: Vec::new(),
            status: GptStatus::empty(),
        };

        match state.pmbr.pmbr_check() {
            Ok(()) => state.status |= GptStatus::PROTECTIVE_MBR,
            Err(err) => tracing::debug!(%err, "sector 0 is not a protective MBR"),
        }

        let primary_err = state.read_primary(disk).err();
        if let Some(err) = &primary_err {
            tracing::debug!(%err, "primary GPT rejected");
        }

        let backup_err = match state.read_backup(disk) {
            Ok(()) => None,
            Err(err) if is_out_of_sync(&err) => return Err(err),
            Err(err) => {
                tracing::debug!(%err, "backup GPT rejected");
                Some(err)
            }
        };

        if state.primary_valid() || state.backup_valid() {
            Ok(state)
        } else {
            match (primary_err, backup_err) {
                (Some(err), _) => Err(err),
                (None, Some(err)) => Err(err),
                (None, None) => Err(Error::bug("GPT load failed without an error")),
            }
        }
    }

    fn read_primary(&mut self, disk: &mut dyn DiskAccess) -> Result<()> {
        tracing::debug!("reading primary GPT from sector 0x1");

        let addr = sector_to_byte(self.log_sector_size, 1)?;
        let mut raw = [0u8; GptHeader::NATIVE_SIZE];
        disk.read_at(addr, &mut raw)?;
        self.primary = GptHeader::from_bytes(&raw)?;

        self.check_primary()?;
        self.status |= GptStatus::PRIMARY_HEADER_VALID;

        self.entries = read_entries(disk, &self.primary, self.log_sector_size)?;
        self.status |= GptStatus::PRIMARY_ENTRIES_VALID;

        Ok(())
    }

    fn read_backup(&mut self, disk: &mut dyn DiskAccess) -> Result<()> {
        let total = checked_total_sectors(disk);

        let sector = if self.status.contains(GptStatus::PRIMARY_HEADER_VALID) {
            let sector = self.primary.alternate_lba;
            if let Some(total) = total {
                if sector >= total {
                    return Err(Error::out_of_range(format!(
                        "backup GPT located at {:#x}, beyond last disk sector at {:#x}",
                        sector,
                        total - 1
                    )));
                }
            }
            sector
        } else if let Some(total) = total {
            total - 1
        } else {
            return Err(Error::out_of_range(
                "size of disk unknown, cannot locate backup GPT",
            ));
        };

        tracing::debug!(sector, "reading backup GPT");

        let addr = sector_to_byte(self.log_sector_size, sector)?;
        let mut raw = [0u8; GptHeader::NATIVE_SIZE];
        disk.read_at(addr, &mut raw)?;
        self.backup = GptHeader::from_bytes(&raw)?;

        self.check_backup()?;

        // The backup must think it is located where we found it.
        if self.backup.header_lba != sector {
            return Err(Error::bad_partition_table("invalid backup GPT LBA"));
        }

        self.status |= GptStatus::BACKUP_HEADER_VALID;

        let entries = read_entries(disk, &self.backup, self.log_sector_size)?;
        if self.status.contains(GptStatus::PRIMARY_ENTRIES_VALID) {
            if entries != self.entries {
                return Err(Error::bad_partition_table(OUT_OF_SYNC));
            }
        } else {
            self.entries = entries;
        }

        self.status |= GptStatus::BACKUP_ENTRIES_VALID;

        Ok(())
    }

    /// Layout checks specific to the primary copy: the header sits at
    /// sector 1, the entries array lies strictly between it and the
    /// usable range, and the backup lies past the usable range.
    fn check_primary(&self) -> Result<()> {
        let header = &self.primary;
        let header_lba = header.header_lba;
        let alternate_lba = header.alternate_lba;
        let entries_lba = header.entries_lba;
        let entries_sectors = header.entries_sectors(self.log_sector_size);
        let first_usable = header.first_usable;
        let last_usable = header.last_usable;

        tracing::debug!(
            header_lba,
            alternate_lba,
            entries_lba,
            entries_sectors,
            first_usable,
            last_usable,
            "primary GPT layout"
        );

        header_check(header, self.log_sector_size)?;

        if header_lba != 1 {
            return Err(Error::bad_partition_table("invalid primary GPT LBA"));
        }

        let entries_end = entries_lba
            .checked_add(entries_sectors)
            .ok_or_else(|| Error::bad_partition_table("invalid entries location"))?;
        if entries_lba <= 1 || entries_end > first_usable {
            return Err(Error::bad_partition_table("invalid entries location"));
        }

        if alternate_lba <= last_usable {
            return Err(Error::bad_partition_table("invalid backup GPT LBA"));
        }

        Ok(())
    }

    /// Layout checks specific to the backup copy, plus the equivalence
    /// check against an already-valid primary.
    fn check_backup(&self) -> Result<()> {
        let header = &self.backup;
        let header_lba = header.header_lba;
        let alternate_lba = header.alternate_lba;
        let entries_lba = header.entries_lba;
        let entries_sectors = header.entries_sectors(self.log_sector_size);
        let first_usable = header.first_usable;
        let last_usable = header.last_usable;

        tracing::debug!(
            header_lba,
            alternate_lba,
            entries_lba,
            entries_sectors,
            first_usable,
            last_usable,
            "backup GPT layout"
        );

        header_check(header, self.log_sector_size)?;

        if alternate_lba != 1 {
            return Err(Error::bad_partition_table("invalid primary GPT LBA"));
        }

        let entries_end = entries_lba
            .checked_add(entries_sectors)
            .ok_or_else(|| Error::bad_partition_table("invalid entries location"))?;
        if entries_lba <= last_usable || entries_end > header_lba {
            return Err(Error::bad_partition_table("invalid entries location"));
        }

        if header_lba <= last_usable {
            return Err(Error::bad_partition_table("invalid backup GPT LBA"));
        }

        // If both copies validate individually but differ, the primary
        // is preferred by repair; loading reports the disagreement.
        if self.status.contains(GptStatus::PRIMARY_HEADER_VALID)
            && !headers_equal(&self.primary, &self.backup)
        {
            return Err(Error::bad_partition_table(OUT_OF_SYNC));
        }

        Ok(())
    }

    /// The current validity flags
    pub fn status(&self) -> GptStatus {
        self.status
    }

    /// Base-2 logarithm of the sector size the metadata was read with
    pub fn log_sector_size(&self) -> u8 {
        self.log_sector_size
    }

    /// The legacy MBR found at sector 0
    pub fn pmbr(&self) -> &Mbr {
        &self.pmbr
    }

    /// The primary header; meaningful when `PRIMARY_HEADER_VALID` is set
    pub fn primary_header(&self) -> &GptHeader {
        &self.primary
    }

    /// The backup header; meaningful when `BACKUP_HEADER_VALID` is set
    pub fn backup_header(&self) -> &GptHeader {
        &self.backup
    }

    /// The raw entries array
    pub fn entries(&self) -> &[u8] {
        &self.entries
    }

    /// Whether the primary header and entries are both valid
    pub fn primary_valid(&self) -> bool {
        self.status
            .contains(GptStatus::PRIMARY_HEADER_VALID | GptStatus::PRIMARY_ENTRIES_VALID)
    }

    /// Whether the backup header and entries are both valid
    pub fn backup_valid(&self) -> bool {
        self.status
            .contains(GptStatus::BACKUP_HEADER_VALID | GptStatus::BACKUP_ENTRIES_VALID)
    }

    /// Whether all four artifacts are valid
    pub fn both_valid(&self) -> bool {
        self.primary_valid() && self.backup_valid()
    }

    /// The header to trust right now: the primary when valid, else the
    /// backup.
    ///
    /// # Errors
    ///
    /// Returns [`Error::Bug`] when neither header is valid.
    pub fn preferred_header(&self) -> Result<&GptHeader> {
        if self.status.contains(GptStatus::PRIMARY_HEADER_VALID) {
            Ok(&self.primary)
        } else if self.status.contains(GptStatus::BACKUP_HEADER_VALID) {
            Ok(&self.backup)
        } else {
            Err(Error::bug("no valid GPT header"))
        }
    }

    /// Raw view of entry `n`, bounds-checked against the preferred
    /// header's slot count. `None` when out of range or no header is
    /// valid.
    pub fn get_partentry(&self, n: u32) -> Option<&[u8]> {
        let header = self.preferred_header().ok()?;
        if n >= header.max_entries {
            return None;
        }

        let size = header.entry_size as usize;
        let offset = size.checked_mul(n as usize)?;
        self.entries.get(offset..offset.checked_add(size)?)
    }

    /// Entry `n`, decoded
    pub fn partition_entry(&self, n: u32) -> Option<GptEntry> {
        GptEntry::from_bytes(self.get_partentry(n)?).ok()
    }

    /// Reconstruct whichever side is missing from the surviving one.
    ///
    /// A no-op when both sides are already valid. When only the primary
    /// is valid, the backup is rebuilt from it; if the disk is known to
    /// have grown past the recorded backup location, the backup is
    /// relocated to the last sector. When only the backup is valid, the
    /// primary is rebuilt with its entries at the canonical sector 2.
    /// Finishes by running [`GptState::recompute`], so on success all
    /// four validity bits are set. Nothing is written to disk until
    /// [`GptState::write`].
    ///
    /// # Errors
    ///
    /// [`Error::Bug`] when neither side is valid, [`Error::NotImplemented`]
    /// when the state's sector size disagrees with the disk's.
    pub fn repair(&mut self, disk: &mut dyn DiskAccess) -> Result<()> {
        // Nothing to do.
        if self.both_valid() {
            return Ok(());
        }

        tracing::debug!("repairing GPT");

        if disk.log_sector_size() != self.log_sector_size {
            return Err(Error::not_implemented(
                "GPT sector size must match disk sector size",
            ));
        }

        if self.primary_valid() {
            tracing::debug!("primary GPT is valid");

            // Relocate the backup to the end of the disk if it has grown.
            let mut backup_header = self.primary.alternate_lba;
            if let Some(total) = checked_total_sectors(disk) {
                if total - 1 > backup_header {
                    backup_header = total - 1;
                    tracing::debug!(sector = backup_header, "backup GPT header relocated");
                    self.primary.alternate_lba = backup_header;
                }
            }

            self.backup = self.primary;
            self.backup.header_lba = self.primary.alternate_lba;
            self.backup.alternate_lba = self.primary.header_lba;
            let entries_sectors = size_to_sectors(self.log_sector_size, self.entries.len() as u64);
            self.backup.entries_lba = backup_header.checked_sub(entries_sectors).ok_or_else(|| {
                Error::out_of_range(format!(
                    "backup GPT header at {backup_header:#x} leaves no room for entries"
                ))
            })?;
        } else if self.backup_valid() {
            tracing::debug!("backup GPT is valid");

            self.primary = self.backup;
            self.primary.header_lba = self.backup.alternate_lba;
            self.primary.alternate_lba = self.backup.header_lba;
            self.primary.entries_lba = 2;
        } else {
            return Err(Error::bug("no valid GPT"));
        }

        self.recompute()?;

        tracing::debug!("GPT repair successful");

        Ok(())
    }

    /// Refresh both headers' derived fields and revalidate everything.
    ///
    /// Clears all four validity bits, normalizes both header sizes to
    /// the native struct size, recomputes the shared entries CRC and
    /// each header's own CRC, then re-runs the layout checks on both
    /// sides, reinstating the bits as they pass.
    ///
    /// # Errors
    ///
    /// A regenerated header failing validation is a defect in the caller
    /// that edited the state, reported as [`Error::Bug`].
    pub fn recompute(&mut self) -> Result<()> {
        self.status -= GptStatus::PRIMARY_HEADER_VALID
            | GptStatus::PRIMARY_ENTRIES_VALID
            | GptStatus::BACKUP_HEADER_VALID
            | GptStatus::BACKUP_ENTRIES_VALID;

        // Headers larger than the native struct cannot be regenerated.
        self.primary.header_size = GptHeader::NATIVE_SIZE as u32;
        self.backup.header_size = GptHeader::NATIVE_SIZE as u32;

        let crc = crc32fast::hash(&self.entries);
        self.primary.entries_crc32 = crc;
        self.backup.entries_crc32 = crc;

        // The header CRC covers the entries CRC field, so this must come
        // last.
        self.primary.crc32 = self.primary.compute_crc32();
        self.backup.crc32 = self.backup.compute_crc32();

        if let Err(err) = self.check_primary() {
            tracing::debug!(%err, "regenerated primary GPT header failed validation");
            return Err(Error::bug("generated invalid GPT primary header"));
        }
        self.status |= GptStatus::PRIMARY_HEADER_VALID | GptStatus::PRIMARY_ENTRIES_VALID;

        if let Err(err) = self.check_backup() {
            tracing::debug!(%err, "regenerated backup GPT header failed validation");
            return Err(Error::bug("generated invalid GPT backup header"));
        }
        self.status |= GptStatus::BACKUP_HEADER_VALID | GptStatus::BACKUP_ENTRIES_VALID;

        Ok(())
    }

    /// Commit both copies to disk, backup first.
    ///
    /// If writing the backup fails the update is abandoned with the
    /// primary untouched; on the next load the primary alone still
    /// carries the table, and repair can regenerate the backup. When the
    /// recorded backup location lies beyond the known end of the disk
    /// the backup is skipped with a warning and only the primary is
    /// written.
    ///
    /// The protective MBR is never rewritten here.
    ///
    /// # Errors
    ///
    /// [`Error::Bug`] unless all four validity bits are set (run
    /// [`GptState::recompute`] after editing), [`Error::NotImplemented`]
    /// for non-native header sizes, or the underlying I/O error.
    pub fn write(&self, disk: &mut dyn DiskAccess) -> Result<()> {
        if !self.both_valid() {
            return Err(Error::bug("cannot write invalid GPT data"));
        }

        let backup_header = self.backup.header_lba;
        match checked_total_sectors(disk) {
            Some(total) if backup_header >= total => {
                tracing::warn!(
                    backup_lba = backup_header,
                    last_sector = total - 1,
                    "backup GPT lies beyond the end of the disk; writing primary only, \
                     the backup must be repaired once the disk is resized"
                );
            }
            _ => {
                tracing::debug!("writing backup GPT");
                self.write_table(disk, &self.backup)?;
            }
        }

        tracing::debug!("writing primary GPT");
        self.write_table(disk, &self.primary)?;

        Ok(())
    }

    fn write_table(&self, disk: &mut dyn DiskAccess, header: &GptHeader) -> Result<()> {
        if header.header_size as usize != GptHeader::NATIVE_SIZE {
            return Err(Error::not_implemented(format!(
                "header size is {}, must be {}",
                header.header_size,
                GptHeader::NATIVE_SIZE
            )));
        }

        let addr = sector_to_byte(self.log_sector_size, header.header_lba)?;
        if addr == 0 {
            return Err(Error::bug("refusing to write GPT header to address 0x0"));
        }
        disk.write_at(addr, &header.to_bytes())?;

        let addr = sector_to_byte(self.log_sector_size, header.entries_lba)?;
        if addr < 2u64 << self.log_sector_size {
            return Err(Error::bug(format!(
                "refusing to write GPT entries to address {addr:#x}"
            )));
        }
        disk.write_at(addr, &self.entries)?;

        Ok(())
    }
}
