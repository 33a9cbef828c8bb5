// GUID byte order helpers and well-known partition types
//
// In memory every GUID is a `Uuid` in canonical big-endian order. GPT stores
// the first three groups little-endian, so every 16-byte GUID field on disk
// goes through `to_disk`/`from_disk`.

use uuid::Uuid;

use crate::error::{Error, Result};

/// EFI System Partition
pub const EFI_SYSTEM: Uuid = Uuid::from_u128(0xC12A7328_F81F_11D2_BA4B_00A0C93EC93B);

/// Linux root partition (x86-64)
pub const LINUX_ROOT_X86_64: Uuid = Uuid::from_u128(0x4F68BCE3_E8CD_4DB1_96E7_FBCAF984B709);

/// Linux filesystem data, used for the ephemeral and extra data partitions
pub const LINUX_FILESYSTEM: Uuid = Uuid::from_u128(0x0FC63DAF_8483_4772_8E79_3D69D8477DE4);

/// Swap the 4-2-2 leading groups between canonical and GPT byte order.
/// The operation is its own inverse.
pub fn middle_endian(b: [u8; 16]) -> [u8; 16] {
    [
        b[3], b[2], b[1], b[0], // time-low
        b[5], b[4], // time-mid
        b[7], b[6], // time-high-and-version
        b[8], b[9], b[10], b[11], b[12], b[13], b[14], b[15],
    ]
}

/// On-disk bytes of a GUID
pub fn to_disk(guid: &Uuid) -> [u8; 16] {
    middle_endian(*guid.as_bytes())
}

/// GUID from on-disk bytes
pub fn from_disk(bytes: [u8; 16]) -> Uuid {
    Uuid::from_bytes(middle_endian(bytes))
}

/// Parse a textual GUID such as `C12A7328-F81F-11D2-BA4B-00A0C93EC93B`
pub fn parse(text: &str) -> Result<Uuid> {
    Uuid::parse_str(text).map_err(|_| Error::InvalidGuid(text.to_string()))
}

/// Human readable name of a known partition type
pub fn type_name(guid: &Uuid) -> &'static str {
    if *guid == EFI_SYSTEM {
        "EFI System"
    } else if *guid == LINUX_ROOT_X86_64 {
        "Linux root (x86-64)"
    } else if *guid == LINUX_FILESYSTEM {
        "Linux filesystem"
    } else if guid.is_nil() {
        "Unused"
    } else {
        "Unknown"
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_middle_endian_swaps_leading_groups() {
        let canonical = [
            0x0f, 0xc6, 0x3d, 0xaf, 0x84, 0x83, 0x47, 0x72, 0x8e, 0x79, 0x3d, 0x69, 0xd8, 0x47,
            0x7d, 0xe4,
        ];
        let disk = [
            0xaf, 0x3d, 0xc6, 0x0f, 0x83, 0x84, 0x72, 0x47, 0x8e, 0x79, 0x3d, 0x69, 0xd8, 0x47,
            0x7d, 0xe4,
        ];

        assert_eq!(middle_endian(canonical), disk);
        assert_eq!(middle_endian(disk), canonical);
    }

    #[test]
    fn test_middle_endian_is_involution() {
        let mut b = [0u8; 16];
        for (i, byte) in b.iter_mut().enumerate() {
            *byte = (i as u8).wrapping_mul(37).wrapping_add(11);
        }
        assert_eq!(middle_endian(middle_endian(b)), b);
    }

    #[test]
    fn test_known_types_on_disk() {
        // Bytes as written by gdisk and the kernel's GPT parser
        assert_eq!(
            to_disk(&EFI_SYSTEM),
            [
                0x28, 0x73, 0x2a, 0xc1, 0x1f, 0xf8, 0xd2, 0x11, 0xba, 0x4b, 0x00, 0xa0, 0xc9,
                0x3e, 0xc9, 0x3b
            ]
        );
        assert_eq!(
            to_disk(&LINUX_FILESYSTEM),
            [
                0xaf, 0x3d, 0xc6, 0x0f, 0x83, 0x84, 0x72, 0x47, 0x8e, 0x79, 0x3d, 0x69, 0xd8,
                0x47, 0x7d, 0xe4
            ]
        );
        assert_eq!(from_disk(to_disk(&LINUX_ROOT_X86_64)), LINUX_ROOT_X86_64);
    }

    #[test]
    fn test_parse() {
        assert_eq!(
            parse("c12a7328-f81f-11d2-ba4b-00a0c93ec93b").unwrap(),
            EFI_SYSTEM
        );
        assert!(matches!(parse("not-a-guid"), Err(Error::InvalidGuid(_))));
        assert_eq!(type_name(&Uuid::nil()), "Unused");
    }
}
