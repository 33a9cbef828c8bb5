// GPT partition entry codec

use uuid::Uuid;

use super::guid;
use crate::codec::{self, read_array, read_u64_le, Field, Serializable};
use crate::error::{Error, Result};

/// Size of one entry as written by this crate
pub const ENTRY_SIZE: usize = 128;
/// Name field holds at most 36 UTF-16 code units
pub const MAX_NAME_UNITS: usize = 36;

/// Attribute flag bits
pub mod attributes {
    pub const SYSTEM_PARTITION: u64 = 1 << 0;
    pub const HIDE_FROM_EFI: u64 = 1 << 1;
    pub const LEGACY_BIOS_BOOTABLE: u64 = 1 << 2;
    pub const READ_ONLY: u64 = 1 << 60;
    pub const HIDDEN: u64 = 1 << 62;
    pub const NO_AUTOMOUNT: u64 = 1 << 63;
}

/// One populated partition entry
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Partition {
    /// 1-based slot index, as the kernel numbers partitions
    pub number: u32,
    pub type_guid: Uuid,
    pub id: Uuid,
    pub first_lba: u64,
    /// Inclusive
    pub last_lba: u64,
    pub attributes: u64,
    pub name: String,
}

impl Partition {
    /// Length in logical blocks; 0 for an inverted range
    pub fn length_lba(&self) -> u64 {
        self.last_lba
            .checked_sub(self.first_lba)
            .map_or(0, |blocks| blocks + 1)
    }

    pub fn has_attribute(&self, bit: u64) -> bool {
        self.attributes & bit != 0
    }

    /// Serialize into a 128-byte entry
    pub fn encode(&self) -> Result<[u8; ENTRY_SIZE]> {
        let mut entry = [0u8; ENTRY_SIZE];
        codec::serialize(self, &mut entry, 0, &())?;
        Ok(entry)
    }

    /// Deserialize the entry at `offset` of an array
    pub fn decode(array: &[u8], offset: usize, number: u32) -> Result<Self> {
        let mut partition = Self {
            number,
            type_guid: Uuid::nil(),
            id: Uuid::nil(),
            first_lba: 0,
            last_lba: 0,
            attributes: 0,
            name: String::new(),
        };
        codec::deserialize(&mut partition, array, offset, &())?;
        Ok(partition)
    }
}

/// Reject names that do not fit the 72-byte field
pub fn validate_name(name: &str) -> Result<()> {
    if name.encode_utf16().count() > MAX_NAME_UNITS {
        return Err(Error::InvalidName(name.to_string()));
    }
    Ok(())
}

impl Serializable<()> for Partition {
    fn fields() -> Vec<Field<Self, ()>> {
        vec![
            Field::new(0, 16, ser_type, de_type),
            Field::new(16, 16, ser_id, de_id),
            Field::new(32, 8, ser_first_lba, de_first_lba),
            Field::new(40, 8, ser_last_lba, de_last_lba),
            Field::new(48, 8, ser_attributes, de_attributes),
            Field::new(56, 72, ser_name, de_name),
        ]
    }
}

fn ser_type(p: &Partition, _: &[u8], _: &()) -> Result<Vec<u8>> {
    Ok(guid::to_disk(&p.type_guid).to_vec())
}

fn de_type(p: &mut Partition, b: &[u8], _: &[u8], _: &()) -> Result<()> {
    p.type_guid = guid::from_disk(read_array(b)?);
    Ok(())
}

fn ser_id(p: &Partition, _: &[u8], _: &()) -> Result<Vec<u8>> {
    Ok(guid::to_disk(&p.id).to_vec())
}

fn de_id(p: &mut Partition, b: &[u8], _: &[u8], _: &()) -> Result<()> {
    p.id = guid::from_disk(read_array(b)?);
    Ok(())
}

fn ser_first_lba(p: &Partition, _: &[u8], _: &()) -> Result<Vec<u8>> {
    Ok(p.first_lba.to_le_bytes().to_vec())
}

fn de_first_lba(p: &mut Partition, b: &[u8], _: &[u8], _: &()) -> Result<()> {
    p.first_lba = read_u64_le(b)?;
    Ok(())
}

fn ser_last_lba(p: &Partition, _: &[u8], _: &()) -> Result<Vec<u8>> {
    Ok(p.last_lba.to_le_bytes().to_vec())
}

fn de_last_lba(p: &mut Partition, b: &[u8], _: &[u8], _: &()) -> Result<()> {
    p.last_lba = read_u64_le(b)?;
    Ok(())
}

fn ser_attributes(p: &Partition, _: &[u8], _: &()) -> Result<Vec<u8>> {
    Ok(p.attributes.to_le_bytes().to_vec())
}

fn de_attributes(p: &mut Partition, b: &[u8], _: &[u8], _: &()) -> Result<()> {
    p.attributes = read_u64_le(b)?;
    Ok(())
}

fn ser_name(p: &Partition, _: &[u8], _: &()) -> Result<Vec<u8>> {
    validate_name(&p.name)?;
    let mut bytes: Vec<u8> = p.name.encode_utf16().flat_map(u16::to_le_bytes).collect();
    bytes.resize(72, 0);
    Ok(bytes)
}

fn de_name(p: &mut Partition, b: &[u8], _: &[u8], _: &()) -> Result<()> {
    let units: Vec<u16> = b
        .chunks_exact(2)
        .map(|pair| u16::from_le_bytes([pair[0], pair[1]]))
        .take_while(|&unit| unit != 0)
        .collect();
    p.name = String::from_utf16_lossy(&units);
    Ok(())
}
