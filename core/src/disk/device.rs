//! Block device handle
//!
//! Owns the file descriptor of a device node (or of a disk image, for tests)
//! together with its block sizes. Whole-LBA access goes through
//! [`gpt_disk_io::BlockIo`], byte-granular access through `FileExt`.

use std::fmt;
use std::fs::{File, OpenOptions};
use std::io::{self, Write};
use std::os::unix::fs::{FileExt, FileTypeExt};
use std::path::{Path, PathBuf};

use gpt_disk_io::BlockIo;
use gpt_disk_types::{BlockSize, Lba};
use log::{debug, info};

use super::ioctl;
use super::lba::{LogicalBlockAddresser, Range};
use crate::error::{Error, Result};
use crate::gpt::header::Header;
use crate::gpt::{pmbr, PartitionTable};

/// Chunk size used when zeroing a device
const ZERO_CHUNK: usize = 1 << 20;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DeviceKind {
    /// Kernel block device node
    Block,
    /// Regular file used as a disk image
    Regular,
}

pub struct BlockDevice {
    path: PathBuf,
    file: File,
    kind: DeviceKind,
    lba: LogicalBlockAddresser,
    /// Header of a table created by `open(.., true)` and not handed out yet
    fresh: Option<Header>,
}

impl fmt::Debug for BlockDevice {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("BlockDevice")
            .field("path", &self.path)
            .field("kind", &self.kind)
            .field("lba", &self.lba)
            .finish()
    }
}

impl BlockDevice {
    /// Open a device read-write.
    ///
    /// With `new_gpt` a fresh table is created and the protective MBR written
    /// immediately. Otherwise the protective MBR must already be present.
    pub fn open(path: impl AsRef<Path>, new_gpt: bool) -> Result<Self> {
        let mut device = Self::open_raw(path.as_ref())?;

        if new_gpt {
            let header = PartitionTable::new(&mut device)?.into_header();
            device.fresh = Some(header);
        } else {
            let mut lba0 = [0u8; 512];
            device.read_at(0, &mut lba0)?;
            if !pmbr::is_protective(&lba0) {
                return Err(Error::NoPartitionTable(device.path.clone()));
            }
        }

        Ok(device)
    }

    /// Open without looking at the partition table, e.g. for probing or zeroing
    pub fn open_raw(path: &Path) -> Result<Self> {
        let file = OpenOptions::new()
            .read(true)
            .write(true)
            .open(path)
            .map_err(|e| Error::io(path, e))?;
        Self::from_file(path, file)
    }

    /// Open read-only; used by discovery, which must never write
    pub fn open_read_only(path: &Path) -> Result<Self> {
        let file = File::open(path).map_err(|e| Error::io(path, e))?;
        Self::from_file(path, file)
    }

    fn from_file(path: &Path, file: File) -> Result<Self> {
        let metadata = file.metadata().map_err(|e| Error::io(path, e))?;
        let kind = if metadata.file_type().is_block_device() {
            DeviceKind::Block
        } else {
            DeviceKind::Regular
        };
        let lba = LogicalBlockAddresser::new(&file)?;
        debug!(
            "{}: opened {:?} device, logical {} / physical {} byte blocks",
            path.display(),
            kind,
            lba.logical_block_size,
            lba.physical_block_size
        );
        Ok(Self {
            path: path.to_path_buf(),
            file,
            kind,
            lba,
            fresh: None,
        })
    }

    /// Override the block sizes. Disk images report none of their own, so
    /// this is how an image of a 4K-sector drive is handled.
    pub fn with_addresser(mut self, lba: LogicalBlockAddresser) -> Self {
        self.lba = lba;
        self
    }

    /// Treat the node as another kind of device
    #[cfg(test)]
    pub(crate) fn with_kind(mut self, kind: DeviceKind) -> Self {
        self.kind = kind;
        self
    }

    /// The partition table: the fresh one if this device was opened with
    /// `new_gpt`, otherwise whatever is on disk.
    pub fn partition_table(&mut self) -> Result<PartitionTable<'_>> {
        match self.fresh.take() {
            Some(header) => Ok(PartitionTable::with_header(self, header)),
            None => PartitionTable::read(self),
        }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    pub fn file(&self) -> &File {
        &self.file
    }

    pub fn kind(&self) -> DeviceKind {
        self.kind
    }

    pub fn is_regular_file(&self) -> bool {
        self.kind == DeviceKind::Regular
    }

    pub fn addresser(&self) -> LogicalBlockAddresser {
        self.lba
    }

    /// Size in bytes (BLKGETSIZE64 for block devices)
    pub fn size(&self) -> Result<u64> {
        self.byte_size().map_err(|e| Error::io(&self.path, e))
    }

    fn byte_size(&self) -> io::Result<u64> {
        match self.kind {
            DeviceKind::Block => ioctl::device_size(&self.file).map_err(|err| match err {
                Error::Ioctl { errno, .. } => io::Error::from(errno),
                other => io::Error::new(io::ErrorKind::Other, other.to_string()),
            }),
            DeviceKind::Regular => Ok(self.file.metadata()?.len()),
        }
    }

    pub fn read_at(&self, offset: u64, buf: &mut [u8]) -> Result<()> {
        self.file
            .read_exact_at(buf, offset)
            .map_err(|e| Error::io(&self.path, e))
    }

    pub fn write_at(&self, offset: u64, buf: &[u8]) -> Result<()> {
        self.file
            .write_all_at(buf, offset)
            .map_err(|e| Error::io(&self.path, e))
    }

    /// Read blocks `range.start..=range.end`
    pub fn read_range(&mut self, range: Range) -> Result<Vec<u8>> {
        let mut buf = self.lba.make(range.end + 1 - range.start);
        self.read_blocks(Lba(range.start), &mut buf)
            .map_err(|e| Error::io(&self.path, e))?;
        Ok(buf)
    }

    /// Write whole blocks starting at `start`
    pub fn write_lba(&mut self, start: u64, data: &[u8]) -> Result<()> {
        self.write_blocks(Lba(start), data)
            .map_err(|e| Error::io(&self.path, e))
    }

    /// fsync
    pub fn sync(&self) -> Result<()> {
        self.file.sync_all().map_err(|e| Error::io(&self.path, e))
    }

    /// Ask the kernel to re-read the partition table (BLKRRPART)
    pub fn reread_partition_table(&self) -> Result<()> {
        if self.is_regular_file() {
            return Ok(());
        }
        info!("{}: re-reading partition table", self.path.display());
        ioctl::reread_partition_table(&self.file)
    }

    /// Drop the kernel's buffer cache for the device (BLKFLSBUF)
    pub fn flush_buffers(&self) -> Result<()> {
        if self.is_regular_file() {
            return Ok(());
        }
        ioctl::flush_buffers(&self.file)
    }

    /// Overwrite the whole device with zeros
    pub fn zero(&mut self) -> Result<()> {
        let size = self.size()?;
        info!("{}: zeroing {} bytes", self.path.display(), size);

        let chunk = vec![0u8; ZERO_CHUNK];
        let mut offset = 0u64;
        while offset < size {
            let len = (size - offset).min(ZERO_CHUNK as u64) as usize;
            self.write_at(offset, &chunk[..len])?;
            offset += len as u64;
        }
        self.file.flush().map_err(|e| Error::io(&self.path, e))?;
        self.sync()?;
        self.flush_buffers()
    }

    /// Device node of partition `number`
    pub fn partition_node(&self, number: u32) -> PathBuf {
        partition_node(&self.path, number)
    }
}

impl BlockIo for BlockDevice {
    type Error = io::Error;

    fn block_size(&self) -> BlockSize {
        BlockSize::new(self.lba.logical_block_size as u32).unwrap_or(BlockSize::BS_512)
    }

    fn num_blocks(&mut self) -> std::result::Result<u64, Self::Error> {
        Ok(self.byte_size()? / self.lba.logical_block_size)
    }

    fn read_blocks(&mut self, start_lba: Lba, dst: &mut [u8]) -> std::result::Result<(), Self::Error> {
        self.file
            .read_exact_at(dst, start_lba.0 * self.lba.logical_block_size)
    }

    fn write_blocks(&mut self, start_lba: Lba, src: &[u8]) -> std::result::Result<(), Self::Error> {
        if src.len() as u64 % self.lba.logical_block_size != 0 {
            return Err(io::Error::new(
                io::ErrorKind::InvalidInput,
                "write is not a whole number of blocks",
            ));
        }
        self.file
            .write_all_at(src, start_lba.0 * self.lba.logical_block_size)
    }

    fn flush(&mut self) -> std::result::Result<(), Self::Error> {
        self.file.sync_data()
    }
}

/// Partition node naming: devices whose name ends in a digit (`nvme0n1`,
/// `loop0`, `mmcblk0`) get a `p` separator.
pub fn partition_node(device: &Path, number: u32) -> PathBuf {
    let name = device.as_os_str().to_string_lossy();
    if name.ends_with(|c: char| c.is_ascii_digit()) {
        PathBuf::from(format!("{}p{}", name, number))
    } else {
        PathBuf::from(format!("{}{}", name, number))
    }
}
