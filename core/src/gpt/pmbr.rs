// Protective MBR at LBA 0

pub const ENTRY_OFFSET: usize = 446;
pub const OS_TYPE_OFFSET: usize = 450;
pub const SIGNATURE_OFFSET: usize = 510;

/// Partition type marking a GPT disk
pub const PROTECTIVE_TYPE: u8 = 0xEE;
/// Bytes 0..440 hold legacy boot code and are left alone
pub const BOOT_CODE_LEN: usize = 440;

/// 512-byte protective MBR covering LBAs 1..=backup_lba
pub fn build(backup_lba: u64) -> [u8; 512] {
    let mut mbr = [0u8; 512];
    mbr[SIGNATURE_OFFSET..].copy_from_slice(&[0x55, 0xAA]);

    let entry = &mut mbr[ENTRY_OFFSET..ENTRY_OFFSET + 16];
    entry[0] = 0x00;
    entry[4] = PROTECTIVE_TYPE;
    entry[8..12].copy_from_slice(&1u32.to_le_bytes());
    let length = u32::try_from(backup_lba).unwrap_or(u32::MAX);
    entry[12..16].copy_from_slice(&length.to_le_bytes());

    mbr
}

/// True when the first partition entry of LBA 0 is of type 0xEE
pub fn is_protective(lba0: &[u8]) -> bool {
    lba0.get(OS_TYPE_OFFSET) == Some(&PROTECTIVE_TYPE)
}
