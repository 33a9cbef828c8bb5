//! Common test utilities: disk images backed by sparse temporary files

#![allow(dead_code)]

use std::fs;
use std::os::unix::fs::FileExt;
use std::path::Path;

use cairn_core::gpt::{guid, NewPartition};

pub const MIB: u64 = 1 << 20;

/// Sparse regular file standing in for a block device
pub struct DiskImage {
    file: tempfile::NamedTempFile,
}

impl DiskImage {
    pub fn new(size: u64) -> Self {
        let file = tempfile::NamedTempFile::new().expect("create image");
        file.as_file().set_len(size).expect("size image");
        Self { file }
    }

    pub fn path(&self) -> &Path {
        self.file.path()
    }

    pub fn grow(&self, size: u64) {
        self.file.as_file().set_len(size).expect("grow image");
    }

    pub fn bytes(&self) -> Vec<u8> {
        fs::read(self.path()).expect("read image")
    }

    pub fn read(&self, offset: u64, len: usize) -> Vec<u8> {
        let mut buf = vec![0u8; len];
        self.file.as_file().read_exact_at(&mut buf, offset).expect("read image");
        buf
    }

    pub fn write(&self, offset: u64, data: &[u8]) {
        self.file.as_file().write_all_at(data, offset).expect("write image");
    }

    /// One logical block
    pub fn lba(&self, lba: u64, block_size: u64) -> Vec<u8> {
        self.read(lba * block_size, block_size as usize)
    }
}

pub fn data_partition(name: &str, size: u64) -> NewPartition<'_> {
    NewPartition {
        size,
        type_guid: guid::LINUX_FILESYSTEM,
        name,
        attributes: 0,
        max: false,
    }
}

/// CRC32 of the 92-byte header with its own CRC field zeroed
pub fn header_crc(block: &[u8]) -> u32 {
    let mut header = block[..92].to_vec();
    header[16..20].fill(0);
    crc::crc32::checksum_ieee(&header)
}

pub fn stored_crc(block: &[u8], offset: usize) -> u32 {
    u32::from_le_bytes([
        block[offset],
        block[offset + 1],
        block[offset + 2],
        block[offset + 3],
    ])
}

pub fn u64_at(block: &[u8], offset: usize) -> u64 {
    let mut raw = [0u8; 8];
    raw.copy_from_slice(&block[offset..offset + 8]);
    u64::from_le_bytes(raw)
}

/// Rewrite the LBA range of array entries in both the primary and backup
/// tables, then fix both CRCs, the way a foreign partitioning tool would
/// leave them. Each entry is `(slot index, first_lba, last_lba)`.
pub fn patch_entries(image: &DiskImage, entries: &[(usize, u64, u64)]) {
    const BS: u64 = 512;
    let backup_lba = u64_at(&image.lba(1, BS), 32);

    for header_lba in [1, backup_lba] {
        let mut header = image.lba(header_lba, BS);
        let array_lba = u64_at(&header, 72);
        let count = stored_crc(&header, 80) as usize;
        let size = stored_crc(&header, 84) as usize;

        let mut array = image.read(array_lba * BS, count * size);
        for &(index, first, last) in entries {
            let entry = index * size;
            array[entry + 32..entry + 40].copy_from_slice(&first.to_le_bytes());
            array[entry + 40..entry + 48].copy_from_slice(&last.to_le_bytes());
        }
        image.write(array_lba * BS, &array);

        header[88..92].copy_from_slice(&crc::crc32::checksum_ieee(&array).to_le_bytes());
        let crc = header_crc(&header);
        header[16..20].copy_from_slice(&crc.to_le_bytes());
        image.write(header_lba * BS, &header[..92]);
    }
}

/// 16 MiB image holding two 1 MiB partitions, written and closed
pub fn two_partition_image() -> DiskImage {
    let image = DiskImage::new(16 * MIB);
    let mut device = cairn_core::disk::BlockDevice::open(image.path(), true).expect("open");
    let mut table = device.partition_table().expect("table");
    table.add(data_partition("ONE", MIB)).expect("add");
    table.add(data_partition("TWO", MIB)).expect("add");
    table.write().expect("write");
    image
}
