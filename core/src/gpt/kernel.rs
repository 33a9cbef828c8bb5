// Keep the kernel's partition view in sync with the table (BLKPG)

use std::thread::sleep;
use std::time::{Duration, Instant};

use libc::c_int;
use log::{debug, warn};
use nix::errno::Errno;

use super::partition::Partition;
use crate::disk::device::BlockDevice;
use crate::disk::ioctl::{self, BlkpgPartition};
use crate::disk::lba::LogicalBlockAddresser;
use crate::error::{Error, Result};

/// Constant backoff between EBUSY retries
pub const RETRY_INTERVAL: Duration = Duration::from_millis(500);
/// Total time spent retrying before giving up
pub const RETRY_BUDGET: Duration = Duration::from_secs(10);

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Change {
    Add,
    Resize,
    Delete,
}

impl Change {
    fn op(self) -> c_int {
        match self {
            Self::Add => ioctl::BLKPG_ADD_PARTITION,
            Self::Resize => ioctl::BLKPG_RESIZE_PARTITION,
            Self::Delete => ioctl::BLKPG_DEL_PARTITION,
        }
    }

    pub fn name(self) -> &'static str {
        match self {
            Self::Add => "BLKPG_ADD_PARTITION",
            Self::Resize => "BLKPG_RESIZE_PARTITION",
            Self::Delete => "BLKPG_DEL_PARTITION",
        }
    }
}

/// Tell the kernel about one partition change, then fsync the device.
///
/// Disk images have no kernel partition view, so regular files are skipped.
pub fn inform(device: &BlockDevice, change: Change, partition: &Partition) -> Result<()> {
    if device.is_regular_file() {
        debug!(
            "{}: skipping {} for partition {} on a regular file",
            device.path().display(),
            change.name(),
            partition.number
        );
        return Ok(());
    }

    let mut arg = request(&device.addresser(), partition);

    retry_busy(change.name(), partition.number, RETRY_BUDGET, RETRY_INTERVAL, || {
        ioctl::blkpg(device.file(), change.op(), &mut arg)
    })?;

    device.sync()
}

/// BLKPG argument for `partition`, in bytes of the logical block size
pub fn request(lba: &LogicalBlockAddresser, partition: &Partition) -> BlkpgPartition {
    BlkpgPartition::new(
        partition.number,
        lba.offset(partition.first_lba),
        lba.offset(partition.length_lba()),
    )
}

/// Run `f` until it stops returning EBUSY or the budget is spent
pub fn retry_busy<F>(
    name: &'static str,
    partition: u32,
    budget: Duration,
    interval: Duration,
    mut f: F,
) -> Result<()>
where
    F: FnMut() -> std::result::Result<(), Errno>,
{
    let started = Instant::now();
    loop {
        match f() {
            Ok(()) => return Ok(()),
            Err(Errno::EBUSY) => {
                if started.elapsed() + interval > budget {
                    return Err(Error::KernelBusy {
                        op: name,
                        partition,
                    });
                }
                warn!("{} on partition {} returned EBUSY, retrying", name, partition);
                sleep(interval);
            }
            Err(errno) => return Err(Error::Ioctl { name, errno }),
        }
    }
}
