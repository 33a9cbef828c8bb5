//! GUID partition table manager
//!
//! ```text
//!   LBA 0        protective MBR
//!   LBA 1        primary header
//!   LBA 2..=33   primary partition array
//!   LBA 34..     partitions (first usable .. last usable)
//!   last-32..-1  backup partition array
//!   last         backup header
//! ```
//!
//! Partitions live in a sparse vector indexed by slot. A deleted partition
//! leaves a hole so that every later partition keeps the number the kernel
//! already knows it by.

pub mod guid;
pub mod header;
pub mod kernel;
pub mod partition;
pub mod pmbr;

use log::{debug, info, warn};
use uuid::Uuid;

use crate::codec;
use crate::disk::device::BlockDevice;
use crate::disk::lba::{LogicalBlockAddresser, Range};
use crate::error::{Error, Result};

pub use header::Header;
pub use kernel::Change;
pub use partition::{attributes, Partition};

use header::{ARRAY_BLOCKS, PRIMARY_ARRAY_LBA};

/// Lifecycle of an in-memory table relative to the disk
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TableState {
    /// Freshly created, nothing but the PMBR on disk yet
    New,
    /// Matches the disk
    Clean,
    /// Modified since the last write
    Dirty,
    /// Loaded from the backup; the primary must be rewritten
    Corrupt,
}

/// Parameters of a partition to add
#[derive(Debug, Clone)]
pub struct NewPartition<'a> {
    /// Requested size in bytes, rounded up to whole logical blocks
    pub size: u64,
    pub type_guid: Uuid,
    pub name: &'a str,
    pub attributes: u64,
    /// Extend to the last usable LBA, ignoring `size`
    pub max: bool,
}

pub struct PartitionTable<'d> {
    device: &'d mut BlockDevice,
    header: Header,
    partitions: Vec<Option<Partition>>,
    state: TableState,
}

impl<'d> PartitionTable<'d> {
    /// Fresh table sized to the device. Writes the protective MBR right away;
    /// the GPT itself is written by [`write`](Self::write).
    pub fn new(device: &'d mut BlockDevice) -> Result<Self> {
        let header = Header::new(device.size()?, &device.addresser())?;
        let mbr = pmbr::build(header.backup_lba);
        device.write_at(pmbr::ENTRY_OFFSET as u64, &mbr[pmbr::ENTRY_OFFSET..])?;
        info!(
            "{}: new GPT, disk GUID {}, usable LBAs {}..={}",
            device.path().display(),
            header.disk_guid,
            header.first_usable_lba,
            header.last_usable_lba
        );
        Ok(Self::with_header(device, header))
    }

    pub(crate) fn with_header(device: &'d mut BlockDevice, header: Header) -> Self {
        Self {
            device,
            header,
            partitions: Vec::new(),
            state: TableState::New,
        }
    }

    /// Load the table, falling back to the backup header when the primary is damaged
    pub fn read(device: &'d mut BlockDevice) -> Result<Self> {
        match read_primary(device) {
            Ok((header, partitions)) => Ok(Self {
                device,
                header,
                partitions,
                state: TableState::Clean,
            }),
            Err(err) if err.is_corruption() => {
                warn!(
                    "{}: primary GPT unusable ({}), trying backup",
                    device.path().display(),
                    err
                );
                match read_backup(device) {
                    Ok((header, partitions)) => {
                        info!("{}: recovered GPT from backup header", device.path().display());
                        Ok(Self {
                            device,
                            header,
                            partitions,
                            state: TableState::Corrupt,
                        })
                    }
                    Err(backup_err) => {
                        debug!("backup GPT unusable: {}", backup_err);
                        Err(err)
                    }
                }
            }
            Err(err) => Err(err),
        }
    }

    pub fn header(&self) -> &Header {
        &self.header
    }

    pub fn state(&self) -> TableState {
        self.state
    }

    pub fn device(&self) -> &BlockDevice {
        &*self.device
    }

    /// Slots including holes
    pub fn slots(&self) -> &[Option<Partition>] {
        &self.partitions
    }

    /// Populated partitions in slot order
    pub fn partitions(&self) -> impl Iterator<Item = &Partition> {
        self.partitions.iter().flatten()
    }

    pub fn partition(&self, number: u32) -> Option<&Partition> {
        let index = (number as usize).checked_sub(1)?;
        self.partitions.get(index)?.as_ref()
    }

    pub fn find_by_name(&self, name: &str) -> Option<&Partition> {
        self.partitions().find(|p| p.name == name)
    }

    /// Partition ending highest on disk. Slot numbers need not follow disk
    /// order in tables written by other tools.
    pub fn last_on_disk(&self) -> Option<&Partition> {
        self.partitions().max_by_key(|p| p.last_lba)
    }

    /// Append a partition after the one ending highest on disk
    pub fn add(&mut self, request: NewPartition<'_>) -> Result<Partition> {
        partition::validate_name(request.name)?;

        if self.partitions.len() >= self.header.entry_count as usize {
            return Err(Error::TableFull);
        }

        let lba = self.device.addresser();
        let first_lba = self
            .last_on_disk()
            .map(|p| p.last_lba + 1)
            .unwrap_or(self.header.first_usable_lba);
        let available =
            (self.header.last_usable_lba + 1).saturating_sub(first_lba) * lba.logical_block_size;

        let last_lba = if request.max {
            if first_lba > self.header.last_usable_lba {
                return Err(Error::OutOfSpace {
                    requested: lba.logical_block_size,
                    available,
                });
            }
            self.header.last_usable_lba
        } else {
            let blocks = lba.blocks_for(request.size);
            if blocks == 0 {
                return Err(Error::InvalidSize(request.size));
            }
            let last = first_lba + blocks - 1;
            if last > self.header.last_usable_lba {
                return Err(Error::OutOfSpace {
                    requested: request.size,
                    available,
                });
            }
            last
        };
        self.check_overlap(0, first_lba, last_lba)?;

        let partition = Partition {
            number: self.partitions.len() as u32 + 1,
            type_guid: request.type_guid,
            id: Uuid::new_v4(),
            first_lba,
            last_lba,
            attributes: request.attributes,
            name: request.name.to_string(),
        };

        kernel::inform(&*self.device, Change::Add, &partition)?;
        info!(
            "{}: added partition {} {:?} at LBAs {}..={}",
            self.device.path().display(),
            partition.number,
            partition.name,
            partition.first_lba,
            partition.last_lba
        );

        self.partitions.push(Some(partition.clone()));
        self.touch();
        Ok(partition)
    }

    /// Move the end of the partition ending highest on disk, by default to
    /// the last usable LBA
    pub fn resize(&mut self, number: u32, new_last_lba: Option<u64>) -> Result<Partition> {
        let last_number = self.last_on_disk().map(|p| p.number);
        let last_usable = self.header.last_usable_lba;
        let partition = self
            .partition(number)
            .ok_or(Error::PartitionNotFound(number))?;

        if last_number != Some(number) {
            return Err(Error::UnsupportedResize(number));
        }

        let lbs = self.device.addresser().logical_block_size;
        let new_last = new_last_lba.unwrap_or(last_usable);
        if new_last < partition.first_lba {
            return Err(Error::InvalidSize(0));
        }
        if new_last > last_usable {
            return Err(Error::OutOfSpace {
                requested: (new_last - partition.first_lba + 1) * lbs,
                available: (last_usable + 1).saturating_sub(partition.first_lba) * lbs,
            });
        }

        let resized = Partition {
            last_lba: new_last,
            ..partition.clone()
        };
        self.check_overlap(number, resized.first_lba, resized.last_lba)?;

        // Kernel first: a refused change leaves the table as it was
        kernel::inform(&*self.device, Change::Resize, &resized)?;
        info!(
            "{}: resized partition {} to end at LBA {}",
            self.device.path().display(),
            number,
            new_last
        );
        self.partitions[number as usize - 1] = Some(resized.clone());
        self.touch();
        Ok(resized)
    }

    /// Turn a slot into a hole. Later partitions keep their numbers.
    pub fn delete(&mut self, number: u32) -> Result<()> {
        let removed = self
            .partition(number)
            .cloned()
            .ok_or(Error::PartitionNotFound(number))?;

        kernel::inform(&*self.device, Change::Delete, &removed)?;
        self.partitions[number as usize - 1] = None;
        info!("{}: deleted partition {}", self.device.path().display(), number);
        self.touch();
        Ok(())
    }

    /// Recompute the backup location for the current device size. Does not write.
    pub fn repair(&mut self) -> Result<()> {
        let size = self.device.size()?;
        let mut header = self.header.clone();
        header.resize_to(size, &self.device.addresser())?;
        if let Some(p) = self.partitions().find(|p| p.last_lba > header.last_usable_lba) {
            return Err(Error::GptInvalid(format!(
                "partition {} ends beyond the last usable LBA {}",
                p.number, header.last_usable_lba
            )));
        }
        if header.backup_lba != self.header.backup_lba {
            info!(
                "{}: backup header moved from LBA {} to {}",
                self.device.path().display(),
                self.header.backup_lba,
                header.backup_lba
            );
        }
        self.header = header;
        self.touch();
        Ok(())
    }

    /// Write primary and backup copies, then fsync
    pub fn write(&mut self) -> Result<()> {
        let lba = self.device.addresser();
        let array = self.serialize_partitions()?;
        let entries = &array[..self.header.array_len()];

        let mut primary = lba.make(ARRAY_BLOCKS + 1);
        lba.copy(&mut primary, &self.header.to_block(true, entries, lba)?, Range::new(0, 1))?;
        lba.copy(&mut primary, &array, Range::new(1, ARRAY_BLOCKS + 1))?;

        let mut secondary = lba.make(ARRAY_BLOCKS + 1);
        lba.copy(&mut secondary, &array, Range::new(0, ARRAY_BLOCKS))?;
        lba.copy(
            &mut secondary,
            &self.header.to_block(false, entries, lba)?,
            Range::new(ARRAY_BLOCKS, ARRAY_BLOCKS + 1),
        )?;

        self.device.write_lba(self.header.current_lba, &primary)?;
        self.device.write_lba(self.header.backup_array_lba(), &secondary)?;
        self.device.sync()?;

        debug!(
            "{}: wrote primary at LBA {} and backup at LBA {}",
            self.device.path().display(),
            self.header.current_lba,
            self.header.backup_array_lba()
        );
        self.state = TableState::Clean;
        Ok(())
    }

    /// Give back the header, ending the borrow of the device
    pub(crate) fn into_header(self) -> Header {
        self.header
    }

    /// Fail if `first..=last` shares a block with any partition other than `number`
    fn check_overlap(&self, number: u32, first: u64, last: u64) -> Result<()> {
        match self
            .partitions()
            .find(|p| p.number != number && p.first_lba <= last && first <= p.last_lba)
        {
            Some(p) => Err(Error::GptInvalid(format!(
                "LBAs {}..={} overlap partition {} at {}..={}",
                first, last, p.number, p.first_lba, p.last_lba
            ))),
            None => Ok(()),
        }
    }

    fn touch(&mut self) {
        if self.state == TableState::Clean {
            self.state = TableState::Dirty;
        }
    }

    fn serialize_partitions(&self) -> Result<Vec<u8>> {
        let mut array = self.device.addresser().make(ARRAY_BLOCKS);
        let entry_size = self.header.entry_size as usize;
        for (index, slot) in self.partitions.iter().enumerate() {
            if let Some(p) = slot {
                codec::serialize(p, &mut array, index * entry_size, &())?;
            }
        }
        Ok(array)
    }
}

fn read_primary(device: &mut BlockDevice) -> Result<(Header, Vec<Option<Partition>>)> {
    let lba = device.addresser();
    // LBA 0 through the end of the primary array
    let table = device.read_range(Range::new(0, ARRAY_BLOCKS + 1))?;
    let header = Header::from_table(&table, 0, 1, lba)?;
    if header.current_lba != 1 || header.array_start_lba != PRIMARY_ARRAY_LBA {
        return Err(Error::GptInvalid(format!(
            "primary header claims LBA {} with array at LBA {}",
            header.current_lba, header.array_start_lba
        )));
    }
    let partitions = decode_partitions(&header, &table, header.array_start_lba, lba)?;
    Ok((header, partitions))
}

fn read_backup(device: &mut BlockDevice) -> Result<(Header, Vec<Option<Partition>>)> {
    let lba = device.addresser();
    let last = (device.size()? / lba.logical_block_size)
        .checked_sub(1)
        .ok_or_else(|| Error::GptInvalid("empty device".into()))?;
    let start = last
        .checked_sub(ARRAY_BLOCKS)
        .ok_or_else(|| Error::GptInvalid("device too small for a backup table".into()))?;

    let table = device.read_range(Range::new(start, last))?;
    let header = Header::from_table(&table, start, last, lba)?;
    if header.current_lba != last {
        return Err(Error::GptInvalid(format!(
            "backup header at LBA {} claims LBA {}",
            last, header.current_lba
        )));
    }
    let offset = header
        .array_start_lba
        .checked_sub(start)
        .ok_or_else(|| Error::GptInvalid("backup array precedes the backup table".into()))?;
    let partitions = decode_partitions(&header, &table, offset, lba)?;
    Ok((header.into_primary(), partitions))
}

/// Decode every slot of the array found `array_offset` blocks into `table`.
/// Unused entries and entries below the first usable LBA become holes. An
/// entry that is inverted, ends past the last usable LBA or overlaps another
/// makes the array invalid.
fn decode_partitions(
    header: &Header,
    table: &[u8],
    array_offset: u64,
    lba: LogicalBlockAddresser,
) -> Result<Vec<Option<Partition>>> {
    if header.array_len() as u64 > ARRAY_BLOCKS * lba.logical_block_size {
        return Err(Error::GptInvalid(format!(
            "partition array of {} bytes does not fit {} blocks",
            header.array_len(),
            ARRAY_BLOCKS
        )));
    }

    let start = lba.offset(array_offset) as usize;
    let array = table
        .get(start..start + header.array_len())
        .ok_or_else(|| Error::GptInvalid("partition array lies outside the table".into()))?;

    let entry_size = header.entry_size as usize;
    let mut partitions = Vec::with_capacity(header.entry_count as usize);
    for index in 0..header.entry_count as usize {
        let p = Partition::decode(array, index * entry_size, index as u32 + 1)?;
        if p.type_guid.is_nil() || p.first_lba < header.first_usable_lba {
            partitions.push(None);
            continue;
        }
        if p.first_lba > p.last_lba || p.last_lba > header.last_usable_lba {
            return Err(Error::GptInvalid(format!(
                "partition {} spans LBAs {}..={} outside {}..={}",
                p.number, p.first_lba, p.last_lba, header.first_usable_lba, header.last_usable_lba
            )));
        }
        if let Some(other) = partitions
            .iter()
            .flatten()
            .find(|o: &&Partition| o.first_lba <= p.last_lba && p.first_lba <= o.last_lba)
        {
            return Err(Error::GptInvalid(format!(
                "partitions {} and {} overlap",
                other.number, p.number
            )));
        }
        partitions.push(Some(p));
    }
    while matches!(partitions.last(), Some(None)) {
        partitions.pop();
    }
    Ok(partitions)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::disk::device::DeviceKind;

    fn data(name: &str) -> NewPartition<'_> {
        NewPartition {
            size: 1 << 20,
            type_guid: guid::LINUX_FILESYSTEM,
            name,
            attributes: 0,
            max: false,
        }
    }

    // ==================== Kernel refusal ====================

    // A regular file passed off as a block device rejects BLKPG with ENOTTY
    #[test]
    fn test_refused_change_leaves_table_untouched() {
        let image = tempfile::NamedTempFile::new().unwrap();
        image.as_file().set_len(16 << 20).unwrap();
        {
            let mut device = BlockDevice::open(image.path(), true).unwrap();
            let mut table = device.partition_table().unwrap();
            table.add(data("ONE")).unwrap();
            table.add(data("TWO")).unwrap();
            table.write().unwrap();
        }

        let mut device = BlockDevice::open(image.path(), false)
            .unwrap()
            .with_kind(DeviceKind::Block);
        let mut table = device.partition_table().unwrap();
        let before = table.slots().to_vec();

        assert!(matches!(table.resize(2, None), Err(Error::Ioctl { .. })));
        assert!(matches!(table.delete(1), Err(Error::Ioctl { .. })));
        assert!(matches!(table.add(data("THREE")), Err(Error::Ioctl { .. })));

        assert_eq!(table.slots(), &before[..]);
        assert_eq!(table.state(), TableState::Clean);
    }
}
