// ISO 9660 primary volume descriptor

/// Volume descriptors start at sector 16 (2048-byte sectors)
pub const OFFSET: u64 = 16 * 2048;
pub const SIZE: usize = 2048;

/// Standard identifier following the type byte
pub const MAGIC: &[u8; 5] = b"CD001";
pub const MAGIC_OFFSET: usize = 1;

/// Volume identifier, d-characters padded with spaces
pub const LABEL_OFFSET: usize = 40;
pub const LABEL_LEN: usize = 32;

/// Volume label if `sector` is an ISO 9660 volume descriptor
pub fn parse(sector: &[u8]) -> Option<String> {
    if sector.get(MAGIC_OFFSET..MAGIC_OFFSET + MAGIC.len())? != MAGIC {
        return None;
    }
    let label = sector.get(LABEL_OFFSET..LABEL_OFFSET + LABEL_LEN)?;
    Some(super::trim_label(label))
}
