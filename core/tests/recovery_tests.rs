//! Backup header recovery

mod common;

use cairn_core::disk::BlockDevice;
use cairn_core::gpt::TableState;
use common::{data_partition, DiskImage, MIB};

fn installed_image() -> DiskImage {
    let image = DiskImage::new(16 * MIB);
    let mut device = BlockDevice::open(image.path(), true).unwrap();
    let mut table = device.partition_table().unwrap();
    table.add(data_partition("ESP", 2 * MIB)).unwrap();
    table.add(data_partition("ROOT-A", 4 * MIB)).unwrap();
    table.add(data_partition("EPHEMERAL", 4 * MIB)).unwrap();
    table.write().unwrap();
    image
}

#[test]
fn test_zeroed_primary_header_is_restored() {
    let image = installed_image();
    let pristine = image.bytes();

    image.write(512, &[0u8; 512]);

    let mut device = BlockDevice::open(image.path(), false).unwrap();
    let mut table = device.partition_table().unwrap();
    assert_eq!(table.state(), TableState::Corrupt);
    assert_eq!(table.header().current_lba, 1);
    assert_eq!(table.partition(2).unwrap().name, "ROOT-A");

    table.write().unwrap();
    assert_eq!(table.state(), TableState::Clean);
    assert_eq!(image.bytes(), pristine);
}

#[test]
fn test_damaged_primary_array_is_restored() {
    let image = installed_image();
    let pristine = image.bytes();

    // flip a byte inside the first entry's name
    let mut entry = image.read(2 * 512, 128);
    entry[60] ^= 0xFF;
    image.write(2 * 512, &entry);

    let mut device = BlockDevice::open(image.path(), false).unwrap();
    let mut table = device.partition_table().unwrap();
    assert_eq!(table.state(), TableState::Corrupt);
    assert_eq!(table.partition(1).unwrap().name, "ESP");

    table.write().unwrap();
    assert_eq!(image.bytes(), pristine);
}

#[test]
fn test_both_headers_damaged() {
    let image = installed_image();
    image.write(512, &[0u8; 512]);
    image.write(16 * MIB - 512, &[0u8; 512]);

    let mut device = BlockDevice::open(image.path(), false).unwrap();
    let err = device.partition_table().err().unwrap();
    assert!(err.is_corruption());
}
