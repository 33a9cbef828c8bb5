// FAT32 boot sector (BIOS parameter block)

pub const OFFSET: u64 = 0;
pub const SIZE: usize = 512;

/// Extended BPB of FAT32: volume label then the filesystem type string
pub const LABEL_OFFSET: usize = 0x47;
pub const LABEL_LEN: usize = 11;
pub const FS_TYPE_OFFSET: usize = 0x52;
pub const FS_TYPE_LEN: usize = 8;

pub const MAGIC: &str = "FAT32";

/// Volume label if `sector` is a FAT32 boot sector
pub fn parse(sector: &[u8]) -> Option<String> {
    let fs_type = sector.get(FS_TYPE_OFFSET..FS_TYPE_OFFSET + FS_TYPE_LEN)?;
    if super::trim_label(fs_type) != MAGIC {
        return None;
    }
    let label = sector.get(LABEL_OFFSET..LABEL_OFFSET + LABEL_LEN)?;
    Some(super::trim_label(label))
}
