// In-place growth of the ephemeral partition after the disk got bigger

use std::path::Path;

use cairn_core::disk::BlockDevice;
use cairn_core::fs::System;
use cairn_core::gpt::Partition;
use cairn_core::Error as CoreError;
use log::info;

use crate::error::Result;

/// Move the backup GPT to the end of the (grown) device, extend the partition
/// ending highest on disk over the new space and grow the XFS filesystem
/// mounted at `mount_point` to match.
pub fn grow_ephemeral(system: &dyn System, device: &Path, mount_point: &Path) -> Result<Partition> {
    let mut bd = BlockDevice::open(device, false)?;
    let grown = {
        let mut table = bd.partition_table()?;
        table.repair()?;
        let last = table
            .last_on_disk()
            .map(|p| p.number)
            .ok_or(CoreError::PartitionNotFound(0))?;
        let grown = table.resize(last, None)?;
        table.write()?;
        grown
    };

    info!(
        "{}: partition {} now ends at LBA {}",
        device.display(),
        grown.number,
        grown.last_lba
    );
    system.grow(mount_point)?;
    Ok(grown)
}
