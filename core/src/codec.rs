//! Declarative field codec
//!
//! On-disk structures describe themselves as an ordered list of fields. Each
//! field knows its offset and length inside the structure and carries one
//! callback per direction. Callbacks see the whole structure buffer, not just
//! their own bytes, so a checksum field declared after the fields it covers
//! can compute over bytes that were already written.
//!
//! ```text
//!   buf: [ base ... | field 0 | field 1 | ... | crc field ]
//!                     ^ written in declaration order ^ last
//! ```

use crate::error::{Error, Result};

/// Produces the bytes of one field. Receives the structure buffer (starting at
/// the structure's base offset) as written so far.
pub type SerializeFn<T, O> = fn(&T, &[u8], &O) -> Result<Vec<u8>>;

/// Consumes the bytes of one field. Receives the field bytes and the whole
/// structure buffer.
pub type DeserializeFn<T, O> = fn(&mut T, &[u8], &[u8], &O) -> Result<()>;

/// One fixed-position field of a structure
pub struct Field<T, O> {
    pub offset: usize,
    pub length: usize,
    pub serialize: SerializeFn<T, O>,
    pub deserialize: DeserializeFn<T, O>,
}

impl<T, O> Field<T, O> {
    pub const fn new(
        offset: usize,
        length: usize,
        serialize: SerializeFn<T, O>,
        deserialize: DeserializeFn<T, O>,
    ) -> Self {
        Self {
            offset,
            length,
            serialize,
            deserialize,
        }
    }

    fn bounds(&self, base: usize, len: usize) -> Result<(usize, usize)> {
        let start = base + self.offset;
        let end = start + self.length;
        if end > len {
            return Err(Error::Codec(format!(
                "field at offset {} with length {} exceeds buffer of {} bytes",
                start, self.length, len
            )));
        }
        Ok((start, end))
    }
}

/// A structure with a fixed field layout. Checksum fields must come last.
pub trait Serializable<O>: Sized {
    fn fields() -> Vec<Field<Self, O>>;
}

/// Write `value` into `buf` starting at `base`
pub fn serialize<T, O>(value: &T, buf: &mut [u8], base: usize, opts: &O) -> Result<()>
where
    T: Serializable<O>,
{
    for field in T::fields() {
        let (start, end) = field.bounds(base, buf.len())?;
        let bytes = (field.serialize)(value, &buf[base..], opts)?;
        if bytes.len() != field.length {
            return Err(Error::Codec(format!(
                "field at offset {} produced {} bytes, expected {}",
                field.offset,
                bytes.len(),
                field.length
            )));
        }
        buf[start..end].copy_from_slice(&bytes);
    }
    Ok(())
}

/// Read `value` from `buf` starting at `base`
pub fn deserialize<T, O>(value: &mut T, buf: &[u8], base: usize, opts: &O) -> Result<()>
where
    T: Serializable<O>,
{
    for field in T::fields() {
        let (start, end) = field.bounds(base, buf.len())?;
        (field.deserialize)(value, &buf[start..end], &buf[base..], opts)?;
    }
    Ok(())
}

// Little-endian helpers shared by the field callbacks

pub fn read_u32_le(bytes: &[u8]) -> Result<u32> {
    bytes
        .get(..4)
        .and_then(|b| b.try_into().ok())
        .map(u32::from_le_bytes)
        .ok_or_else(|| Error::Codec(format!("expected 4 bytes, got {}", bytes.len())))
}

pub fn read_u64_le(bytes: &[u8]) -> Result<u64> {
    bytes
        .get(..8)
        .and_then(|b| b.try_into().ok())
        .map(u64::from_le_bytes)
        .ok_or_else(|| Error::Codec(format!("expected 8 bytes, got {}", bytes.len())))
}

pub fn read_array<const N: usize>(bytes: &[u8]) -> Result<[u8; N]> {
    bytes
        .get(..N)
        .and_then(|b| b.try_into().ok())
        .ok_or_else(|| Error::Codec(format!("expected {} bytes, got {}", N, bytes.len())))
}
