// XFS superblock
//
// All superblock fields are big-endian.

pub const OFFSET: u64 = 0;
pub const SIZE: usize = 512;

/// "XFSB"
pub const MAGIC: u32 = 0x5846_5342;

/// offset 108: sb_fname, 12 bytes, NUL padded
pub const LABEL_OFFSET: usize = 108;
pub const LABEL_LEN: usize = 12;

/// Volume label if `sb` is an XFS superblock
pub fn parse(sb: &[u8]) -> Option<String> {
    let magic = u32::from_be_bytes(sb.get(..4)?.try_into().ok()?);
    if magic != MAGIC {
        return None;
    }
    let label = sb.get(LABEL_OFFSET..LABEL_OFFSET + LABEL_LEN)?;
    Some(super::trim_label(label))
}
