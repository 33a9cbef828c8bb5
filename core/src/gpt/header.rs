//! GPT header codec
//!
//! The header occupies the first 92 bytes of its logical block; the rest of
//! the block is zero. Both checksums are declared last in the field list: the
//! array CRC reads the partition array handed in through the options, and the
//! header CRC reads the 92 bytes already written with its own four bytes
//! zeroed.
//!
//! In memory a header is always kept in the primary perspective
//! (`current_lba == 1`). The secondary copy is produced at serialization time.

use crc::crc32;
use uuid::Uuid;

use super::guid;
use crate::codec::{self, read_array, read_u32_le, read_u64_le, Field, Serializable};
use crate::disk::lba::LogicalBlockAddresser;
use crate::error::{CrcKind, Error, Result};

pub const SIGNATURE: &[u8; 8] = b"EFI PART";
pub const REVISION: u32 = 0x0001_0000;
pub const HEADER_SIZE: u32 = 92;

pub const DEFAULT_ENTRY_COUNT: u32 = 128;
pub const DEFAULT_ENTRY_SIZE: u32 = 128;

/// LBA 0 is the PMBR, LBA 1 the header, LBAs 2..=33 the array
pub const FIRST_USABLE_LBA: u64 = 34;
pub const PRIMARY_ARRAY_LBA: u64 = 2;
/// Blocks reserved for the partition array at each end of the disk
pub const ARRAY_BLOCKS: u64 = 32;

/// GPT header, primary perspective
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Header {
    pub current_lba: u64,
    pub backup_lba: u64,
    pub first_usable_lba: u64,
    pub last_usable_lba: u64,
    pub disk_guid: Uuid,
    pub array_start_lba: u64,
    pub entry_count: u32,
    pub entry_size: u32,
}

/// Options threaded through the field callbacks
pub struct HeaderOptions<'a> {
    /// Serialize the primary (true) or secondary (false) copy
    pub primary: bool,
    /// Serialized partition array, exactly `entry_count * entry_size` bytes
    pub array: &'a [u8],
    /// Blocks read around the header; the array CRC is verified against them
    pub table: &'a [u8],
    /// LBA of the first byte of `table`
    pub table_start_lba: u64,
    pub lba: LogicalBlockAddresser,
}

impl<'a> HeaderOptions<'a> {
    pub fn write(primary: bool, array: &'a [u8], lba: LogicalBlockAddresser) -> Self {
        Self {
            primary,
            array,
            table: &[],
            table_start_lba: 0,
            lba,
        }
    }

    pub fn read(table: &'a [u8], table_start_lba: u64, lba: LogicalBlockAddresser) -> Self {
        Self {
            primary: true,
            array: &[],
            table,
            table_start_lba,
            lba,
        }
    }
}

impl Header {
    /// Fresh header for a device of `size` bytes with a random disk GUID
    pub fn new(size: u64, lba: &LogicalBlockAddresser) -> Result<Self> {
        let mut header = Self {
            current_lba: 1,
            backup_lba: 0,
            first_usable_lba: FIRST_USABLE_LBA,
            last_usable_lba: 0,
            disk_guid: Uuid::new_v4(),
            array_start_lba: PRIMARY_ARRAY_LBA,
            entry_count: DEFAULT_ENTRY_COUNT,
            entry_size: DEFAULT_ENTRY_SIZE,
        };
        header.resize_to(size, lba)?;
        Ok(header)
    }

    /// Recompute `backup_lba` and `last_usable_lba` for a device of `size` bytes
    pub fn resize_to(&mut self, size: u64, lba: &LogicalBlockAddresser) -> Result<()> {
        let blocks = size / lba.logical_block_size;
        let reserved = self.first_usable_lba + ARRAY_BLOCKS + 1;
        if blocks <= reserved {
            return Err(Error::GptInvalid(format!(
                "device of {} blocks is too small for a partition table",
                blocks
            )));
        }
        self.backup_lba = blocks - 1;
        self.last_usable_lba = self.backup_lba - (ARRAY_BLOCKS + 1);
        Ok(())
    }

    /// Size of the partition array in bytes
    pub fn array_len(&self) -> usize {
        self.entry_count as usize * self.entry_size as usize
    }

    /// First LBA of the backup partition array
    pub fn backup_array_lba(&self) -> u64 {
        self.last_usable_lba + 1
    }

    /// Serialize one copy into a buffer of one logical block
    pub fn to_block(&self, primary: bool, array: &[u8], lba: LogicalBlockAddresser) -> Result<Vec<u8>> {
        let mut block = lba.make(1);
        codec::serialize(self, &mut block, 0, &HeaderOptions::write(primary, array, lba))?;
        Ok(block)
    }

    /// Deserialize a header found at `header_lba` inside `table`
    pub fn from_table(
        table: &[u8],
        table_start_lba: u64,
        header_lba: u64,
        lba: LogicalBlockAddresser,
    ) -> Result<Self> {
        let base = lba.offset(header_lba.checked_sub(table_start_lba).ok_or_else(|| {
            Error::Codec(format!("header LBA {} precedes table", header_lba))
        })?) as usize;

        let mut header = Self::empty();
        codec::deserialize(
            &mut header,
            table,
            base,
            &HeaderOptions::read(table, table_start_lba, lba),
        )?;
        Ok(header)
    }

    /// Turn a header read from the backup location into the primary perspective
    pub fn into_primary(mut self) -> Self {
        if self.current_lba != 1 {
            self.backup_lba = self.current_lba;
            self.current_lba = 1;
            self.array_start_lba = PRIMARY_ARRAY_LBA;
        }
        self
    }

    fn empty() -> Self {
        Self {
            current_lba: 0,
            backup_lba: 0,
            first_usable_lba: 0,
            last_usable_lba: 0,
            disk_guid: Uuid::nil(),
            array_start_lba: 0,
            entry_count: 0,
            entry_size: 0,
        }
    }
}

/// CRC32 over the first 92 bytes with the checksum field zeroed
fn header_crc(whole: &[u8]) -> Result<u32> {
    let mut bytes = whole
        .get(..HEADER_SIZE as usize)
        .ok_or_else(|| Error::Codec("header shorter than 92 bytes".into()))?
        .to_vec();
    bytes[16..20].fill(0);
    Ok(crc32::checksum_ieee(&bytes))
}

impl<'a> Serializable<HeaderOptions<'a>> for Header {
    fn fields() -> Vec<Field<Self, HeaderOptions<'a>>> {
        vec![
            Field::new(0, 8, ser_signature, de_signature),
            Field::new(8, 4, ser_revision, de_revision),
            Field::new(12, 4, ser_size, de_size),
            Field::new(20, 4, ser_reserved, de_reserved),
            Field::new(24, 8, ser_current_lba, de_current_lba),
            Field::new(32, 8, ser_backup_lba, de_backup_lba),
            Field::new(40, 8, ser_first_usable, de_first_usable),
            Field::new(48, 8, ser_last_usable, de_last_usable),
            Field::new(56, 16, ser_disk_guid, de_disk_guid),
            Field::new(72, 8, ser_array_start, de_array_start),
            Field::new(80, 4, ser_entry_count, de_entry_count),
            Field::new(84, 4, ser_entry_size, de_entry_size),
            Field::new(88, 4, ser_array_crc, de_array_crc),
            Field::new(92, 420, ser_padding, de_padding),
            // must stay last
            Field::new(16, 4, ser_header_crc, de_header_crc),
        ]
    }
}

// ==================== Field callbacks ====================

fn ser_signature(_: &Header, _: &[u8], _: &HeaderOptions<'_>) -> Result<Vec<u8>> {
    Ok(SIGNATURE.to_vec())
}

fn de_signature(_: &mut Header, b: &[u8], _: &[u8], _: &HeaderOptions<'_>) -> Result<()> {
    if b != SIGNATURE {
        return Err(Error::GptInvalid(format!("bad signature {:02x?}", b)));
    }
    Ok(())
}

fn ser_revision(_: &Header, _: &[u8], _: &HeaderOptions<'_>) -> Result<Vec<u8>> {
    Ok(REVISION.to_le_bytes().to_vec())
}

fn de_revision(_: &mut Header, b: &[u8], _: &[u8], _: &HeaderOptions<'_>) -> Result<()> {
    let revision = read_u32_le(b)?;
    if revision != REVISION {
        return Err(Error::GptInvalid(format!("unsupported revision {:#010x}", revision)));
    }
    Ok(())
}

fn ser_size(_: &Header, _: &[u8], _: &HeaderOptions<'_>) -> Result<Vec<u8>> {
    Ok(HEADER_SIZE.to_le_bytes().to_vec())
}

fn de_size(_: &mut Header, b: &[u8], _: &[u8], _: &HeaderOptions<'_>) -> Result<()> {
    let size = read_u32_le(b)?;
    if size != HEADER_SIZE {
        return Err(Error::GptInvalid(format!("header size {} is not 92", size)));
    }
    Ok(())
}

fn ser_reserved(_: &Header, _: &[u8], _: &HeaderOptions<'_>) -> Result<Vec<u8>> {
    Ok(vec![0; 4])
}

fn de_reserved(_: &mut Header, b: &[u8], _: &[u8], _: &HeaderOptions<'_>) -> Result<()> {
    if read_u32_le(b)? != 0 {
        return Err(Error::GptInvalid("reserved field is not zero".into()));
    }
    Ok(())
}

fn ser_current_lba(h: &Header, _: &[u8], o: &HeaderOptions<'_>) -> Result<Vec<u8>> {
    let lba = if o.primary { h.current_lba } else { h.backup_lba };
    Ok(lba.to_le_bytes().to_vec())
}

fn de_current_lba(h: &mut Header, b: &[u8], _: &[u8], _: &HeaderOptions<'_>) -> Result<()> {
    h.current_lba = read_u64_le(b)?;
    Ok(())
}

fn ser_backup_lba(h: &Header, _: &[u8], o: &HeaderOptions<'_>) -> Result<Vec<u8>> {
    let lba = if o.primary { h.backup_lba } else { h.current_lba };
    Ok(lba.to_le_bytes().to_vec())
}

fn de_backup_lba(h: &mut Header, b: &[u8], _: &[u8], _: &HeaderOptions<'_>) -> Result<()> {
    h.backup_lba = read_u64_le(b)?;
    Ok(())
}

fn ser_first_usable(h: &Header, _: &[u8], _: &HeaderOptions<'_>) -> Result<Vec<u8>> {
    Ok(h.first_usable_lba.to_le_bytes().to_vec())
}

fn de_first_usable(h: &mut Header, b: &[u8], _: &[u8], _: &HeaderOptions<'_>) -> Result<()> {
    h.first_usable_lba = read_u64_le(b)?;
    Ok(())
}

fn ser_last_usable(h: &Header, _: &[u8], _: &HeaderOptions<'_>) -> Result<Vec<u8>> {
    Ok(h.last_usable_lba.to_le_bytes().to_vec())
}

fn de_last_usable(h: &mut Header, b: &[u8], _: &[u8], _: &HeaderOptions<'_>) -> Result<()> {
    h.last_usable_lba = read_u64_le(b)?;
    Ok(())
}

fn ser_disk_guid(h: &Header, _: &[u8], _: &HeaderOptions<'_>) -> Result<Vec<u8>> {
    Ok(guid::to_disk(&h.disk_guid).to_vec())
}

fn de_disk_guid(h: &mut Header, b: &[u8], _: &[u8], _: &HeaderOptions<'_>) -> Result<()> {
    h.disk_guid = guid::from_disk(read_array(b)?);
    Ok(())
}

fn ser_array_start(h: &Header, _: &[u8], o: &HeaderOptions<'_>) -> Result<Vec<u8>> {
    let lba = if o.primary {
        h.array_start_lba
    } else {
        h.backup_array_lba()
    };
    Ok(lba.to_le_bytes().to_vec())
}

fn de_array_start(h: &mut Header, b: &[u8], _: &[u8], _: &HeaderOptions<'_>) -> Result<()> {
    h.array_start_lba = read_u64_le(b)?;
    Ok(())
}

fn ser_entry_count(h: &Header, _: &[u8], _: &HeaderOptions<'_>) -> Result<Vec<u8>> {
    Ok(h.entry_count.to_le_bytes().to_vec())
}

fn de_entry_count(h: &mut Header, b: &[u8], _: &[u8], _: &HeaderOptions<'_>) -> Result<()> {
    h.entry_count = read_u32_le(b)?;
    Ok(())
}

fn ser_entry_size(h: &Header, _: &[u8], _: &HeaderOptions<'_>) -> Result<Vec<u8>> {
    Ok(h.entry_size.to_le_bytes().to_vec())
}

fn de_entry_size(h: &mut Header, b: &[u8], _: &[u8], _: &HeaderOptions<'_>) -> Result<()> {
    let size = read_u32_le(b)?;
    if size == 0 || size % 128 != 0 {
        return Err(Error::GptInvalid(format!(
            "partition entry size {} is not a multiple of 128",
            size
        )));
    }
    h.entry_size = size;
    Ok(())
}

fn ser_array_crc(h: &Header, _: &[u8], o: &HeaderOptions<'_>) -> Result<Vec<u8>> {
    if o.array.len() != h.array_len() {
        return Err(Error::Codec(format!(
            "partition array is {} bytes, header describes {}",
            o.array.len(),
            h.array_len()
        )));
    }
    Ok(crc32::checksum_ieee(o.array).to_le_bytes().to_vec())
}

fn de_array_crc(h: &mut Header, b: &[u8], _: &[u8], o: &HeaderOptions<'_>) -> Result<()> {
    let stored = read_u32_le(b)?;
    let start = h
        .array_start_lba
        .checked_sub(o.table_start_lba)
        .map(|blocks| o.lba.offset(blocks) as usize)
        .ok_or_else(|| Error::GptInvalid("partition array precedes the table".into()))?;
    let array = o
        .table
        .get(start..start + h.array_len())
        .ok_or_else(|| Error::GptInvalid("partition array lies outside the table".into()))?;
    if crc32::checksum_ieee(array) != stored {
        return Err(Error::GptCrcMismatch(CrcKind::Array));
    }
    Ok(())
}

fn ser_padding(_: &Header, _: &[u8], _: &HeaderOptions<'_>) -> Result<Vec<u8>> {
    Ok(vec![0; 420])
}

fn de_padding(_: &mut Header, _: &[u8], _: &[u8], _: &HeaderOptions<'_>) -> Result<()> {
    Ok(())
}

fn ser_header_crc(_: &Header, whole: &[u8], _: &HeaderOptions<'_>) -> Result<Vec<u8>> {
    Ok(header_crc(whole)?.to_le_bytes().to_vec())
}

fn de_header_crc(_: &mut Header, b: &[u8], whole: &[u8], _: &HeaderOptions<'_>) -> Result<()> {
    if read_u32_le(b)? != header_crc(whole)? {
        return Err(Error::GptCrcMismatch(CrcKind::Header));
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    fn lba() -> LogicalBlockAddresser {
        LogicalBlockAddresser::default()
    }

    fn fixed_header() -> Header {
        Header {
            current_lba: 1,
            backup_lba: 1000,
            first_usable_lba: 34,
            last_usable_lba: 967,
            disk_guid: Uuid::nil(),
            array_start_lba: 2,
            entry_count: 128,
            entry_size: 128,
        }
    }

    /// LBAs 0..=33 with the header at LBA 1 and an empty array
    fn primary_table(header: &Header) -> Vec<u8> {
        let array = vec![0u8; header.array_len()];
        let mut table = lba().make(34);
        let block = header.to_block(true, &array, lba()).unwrap();
        table[512..1024].copy_from_slice(&block);
        table
    }

    // ==================== Checksums ====================

    #[test]
    fn test_known_checksums() {
        let header = fixed_header();
        let array = vec![0u8; 16384];

        let primary = header.to_block(true, &array, lba()).unwrap();
        assert_eq!(read_u32_le(&primary[88..92]).unwrap(), 0xab54_d286);
        assert_eq!(read_u32_le(&primary[16..20]).unwrap(), 0x779b_0e49);

        let secondary = header.to_block(false, &array, lba()).unwrap();
        assert_eq!(read_u64_le(&secondary[24..32]).unwrap(), 1000);
        assert_eq!(read_u64_le(&secondary[32..40]).unwrap(), 1);
        assert_eq!(read_u64_le(&secondary[72..80]).unwrap(), 968);
        assert_eq!(read_u32_le(&secondary[16..20]).unwrap(), 0x0df1_8aaf);
    }

    #[test]
    fn test_header_crc_covers_92_bytes() {
        let block = fixed_header()
            .to_block(true, &vec![0u8; 16384], lba())
            .unwrap();
        let mut prefix = block[..92].to_vec();
        prefix[16..20].fill(0);
        assert_eq!(
            crc32::checksum_ieee(&prefix),
            read_u32_le(&block[16..20]).unwrap()
        );
        assert!(block[92..].iter().all(|&b| b == 0));
    }

    #[test]
    fn test_serialization_is_deterministic() {
        let header = fixed_header();
        let array = vec![0u8; 16384];
        assert_eq!(
            header.to_block(true, &array, lba()).unwrap(),
            header.to_block(true, &array, lba()).unwrap()
        );
    }

    #[test]
    fn test_array_length_must_match() {
        let header = fixed_header();
        assert!(matches!(
            header.to_block(true, &vec![0u8; 512], lba()),
            Err(Error::Codec(_))
        ));
    }

    // ==================== Round trip ====================

    #[test]
    fn test_round_trip_primary() {
        let mut header = fixed_header();
        header.disk_guid = Uuid::new_v4();
        let table = primary_table(&header);

        let back = Header::from_table(&table, 0, 1, lba()).unwrap();
        assert_eq!(back, header);
    }

    #[test]
    fn test_secondary_reads_back_into_primary_perspective() {
        let header = fixed_header();
        let array = vec![0u8; header.array_len()];
        // LBAs 968..=1000: array then header
        let mut table = lba().make(33);
        table[..16384].copy_from_slice(&array);
        table[32 * 512..].copy_from_slice(&header.to_block(false, &array, lba()).unwrap());

        let back = Header::from_table(&table, 968, 1000, lba()).unwrap();
        assert_eq!(back.current_lba, 1000);
        assert_eq!(back.backup_lba, 1);
        assert_eq!(back.array_start_lba, 968);
        assert_eq!(back.into_primary(), header);
    }

    #[test]
    fn test_fresh_header_geometry() {
        let header = Header::new(3_000_000_000, &lba()).unwrap();
        assert_eq!(header.current_lba, 1);
        assert_eq!(header.backup_lba, 5_859_374);
        assert_eq!(header.first_usable_lba, 34);
        assert_eq!(header.last_usable_lba, 5_859_341);
        assert_eq!(header.array_start_lba, 2);
        assert!(
            header.last_usable_lba
                >= header.first_usable_lba + header.array_len() as u64 / 512
        );

        let big = LogicalBlockAddresser::with_sizes(4096, 4096).unwrap();
        let header = Header::new(1 << 30, &big).unwrap();
        assert_eq!(header.backup_lba, 262_143);
        assert_eq!(header.first_usable_lba, 34);
        assert_eq!(header.last_usable_lba, 262_110);

        assert!(Header::new(60 * 512, &lba()).is_err());
    }

    // ==================== Validation ====================

    #[test]
    fn test_bad_signature() {
        let mut table = primary_table(&fixed_header());
        table[512] = b'X';
        assert!(matches!(
            Header::from_table(&table, 0, 1, lba()),
            Err(Error::GptInvalid(_))
        ));
    }

    #[test]
    fn test_header_crc_mismatch() {
        let mut table = primary_table(&fixed_header());
        // last usable LBA
        table[512 + 48] ^= 0x01;
        assert!(matches!(
            Header::from_table(&table, 0, 1, lba()),
            Err(Error::GptCrcMismatch(CrcKind::Header))
        ));
    }

    #[test]
    fn test_array_crc_mismatch() {
        let mut table = primary_table(&fixed_header());
        table[1024 + 40] = 0xFF;
        assert!(matches!(
            Header::from_table(&table, 0, 1, lba()),
            Err(Error::GptCrcMismatch(CrcKind::Array))
        ));
    }

    #[test]
    fn test_entry_size_must_be_multiple_of_128() {
        let mut header = fixed_header();
        header.entry_size = 100;
        let array = vec![0u8; header.array_len()];
        let mut table = lba().make(34);
        table[512..1024].copy_from_slice(&header.to_block(true, &array, lba()).unwrap());

        assert!(matches!(
            Header::from_table(&table, 0, 1, lba()),
            Err(Error::GptInvalid(_))
        ));
    }
}
