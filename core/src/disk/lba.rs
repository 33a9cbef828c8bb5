//! Logical block addressing
//!
//! Every on-disk structure of the partition table is addressed in logical
//! blocks. The addresser remembers the two block sizes the kernel reports for
//! a device and converts between LBAs and byte buffers.

use std::fs::File;

use super::ioctl;
use crate::error::{Error, Result};

/// Block size assumed for regular files (disk images)
pub const DEFAULT_BLOCK_SIZE: u64 = 512;

/// Inclusive pair of logical block addresses.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Range {
    pub start: u64,
    pub end: u64,
}

impl Range {
    pub const fn new(start: u64, end: u64) -> Self {
        Self { start, end }
    }
}

/// Physical and logical block sizes of one opened device
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct LogicalBlockAddresser {
    pub physical_block_size: u64,
    pub logical_block_size: u64,
}

impl LogicalBlockAddresser {
    /// Query BLKPBSZGET and BLKSSZGET. Regular files fall back to 512 bytes.
    pub fn new(file: &File) -> Result<Self> {
        let sizes = ioctl::physical_block_size(file)
            .and_then(|pbs| ioctl::logical_block_size(file).map(|lbs| (pbs, lbs)));

        match sizes {
            Ok((physical, logical)) => Self::with_sizes(physical, logical),
            Err(err) => {
                let regular = file
                    .metadata()
                    .map(|m| m.file_type().is_file())
                    .unwrap_or(false);
                if regular {
                    Ok(Self::default())
                } else {
                    Err(err)
                }
            }
        }
    }

    /// Build an addresser from known sizes; both must be powers of two >= 512
    pub fn with_sizes(physical_block_size: u64, logical_block_size: u64) -> Result<Self> {
        for size in [physical_block_size, logical_block_size] {
            if size < 512 || !size.is_power_of_two() {
                return Err(Error::Codec(format!("invalid block size {}", size)));
            }
        }
        Ok(Self {
            physical_block_size,
            logical_block_size,
        })
    }

    /// Zeroed buffer of `blocks` logical blocks
    pub fn make(&self, blocks: u64) -> Vec<u8> {
        vec![0u8; (blocks * self.logical_block_size) as usize]
    }

    /// Copy `src` into `dst` at blocks `range.start..range.end` (end exclusive).
    ///
    /// `src` must cover the destination blocks exactly.
    pub fn copy(&self, dst: &mut [u8], src: &[u8], range: Range) -> Result<usize> {
        let lbs = self.logical_block_size as usize;
        let start = lbs * range.start as usize;
        let end = lbs * range.end as usize;
        if end < start || src.len() != end - start {
            return Err(Error::Codec(format!(
                "cannot copy {} bytes into blocks {}..{}",
                src.len(),
                range.start,
                range.end
            )));
        }
        if dst.len() < end {
            return Err(Error::Codec(format!(
                "destination of {} bytes is shorter than {}",
                dst.len(),
                end
            )));
        }
        dst[start..end].copy_from_slice(src);
        Ok(src.len())
    }

    /// Borrow blocks `range.start..=range.end` of `src`
    pub fn slice<'a>(&self, src: &'a [u8], range: Range) -> Result<&'a [u8]> {
        let lbs = self.logical_block_size as usize;
        let start = lbs * range.start as usize;
        let end = lbs * (range.end as usize + 1);
        if end < start || src.len() < end {
            return Err(Error::Codec(format!(
                "buffer of {} bytes does not contain blocks {}..={}",
                src.len(),
                range.start,
                range.end
            )));
        }
        Ok(&src[start..end])
    }

    /// Byte offset of an LBA
    pub fn offset(&self, lba: u64) -> u64 {
        lba * self.logical_block_size
    }

    /// Number of whole logical blocks needed to hold `bytes`
    pub fn blocks_for(&self, bytes: u64) -> u64 {
        bytes.div_ceil(self.logical_block_size)
    }
}

impl Default for LogicalBlockAddresser {
    fn default() -> Self {
        Self {
            physical_block_size: DEFAULT_BLOCK_SIZE,
            logical_block_size: DEFAULT_BLOCK_SIZE,
        }
    }
}
