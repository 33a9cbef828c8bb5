// Block device ioctls used by the disk layer

use std::fs::File;
use std::os::unix::io::AsRawFd;

use libc::{c_int, c_uint, c_void};
use nix::errno::Errno;

use crate::error::{Error, Result};

pub const BLKPG_ADD_PARTITION: c_int = 1;
pub const BLKPG_DEL_PARTITION: c_int = 2;
pub const BLKPG_RESIZE_PARTITION: c_int = 3;

const BLKPG_DEVNAMELTH: usize = 64;
const BLKPG_VOLNAMELTH: usize = 64;

/// `struct blkpg_ioctl_arg` from linux/blkpg.h
#[repr(C)]
pub struct BlkpgIoctlArg {
    pub op: c_int,
    pub flags: c_int,
    pub datalen: c_int,
    pub data: *mut c_void,
}

/// `struct blkpg_partition` from linux/blkpg.h. Offsets are in bytes.
#[repr(C)]
pub struct BlkpgPartition {
    pub start: i64,
    pub length: i64,
    pub pno: c_int,
    pub devname: [u8; BLKPG_DEVNAMELTH],
    pub volname: [u8; BLKPG_VOLNAMELTH],
}

impl BlkpgPartition {
    pub fn new(pno: u32, start: u64, length: u64) -> Self {
        Self {
            start: start as i64,
            length: length as i64,
            pno: pno as c_int,
            devname: [0; BLKPG_DEVNAMELTH],
            volname: [0; BLKPG_VOLNAMELTH],
        }
    }
}

// raw wrappers generated by nix
mod raw {
    use super::BlkpgIoctlArg;
    use libc::{c_int, c_uint};
    use nix::{ioctl_none, ioctl_read, ioctl_read_bad, ioctl_write_ptr_bad, request_code_none};

    ioctl_none!(blkrrpart, 0x12, 95);
    ioctl_none!(blkflsbuf, 0x12, 97);
    ioctl_read_bad!(blksszget, request_code_none!(0x12, 104), c_int);
    ioctl_write_ptr_bad!(blkpg, request_code_none!(0x12, 105), BlkpgIoctlArg);
    ioctl_read!(blkgetsize64, 0x12, 114, u64);
    ioctl_read_bad!(blkpbszget, request_code_none!(0x12, 123), c_uint);
}

/// Physical block size (BLKPBSZGET)
pub fn physical_block_size(file: &File) -> Result<u64> {
    let mut size: c_uint = 0;
    unsafe { raw::blkpbszget(file.as_raw_fd(), &mut size) }.map_err(|errno| Error::Ioctl {
        name: "BLKPBSZGET",
        errno,
    })?;
    Ok(u64::from(size))
}

/// Logical block size (BLKSSZGET)
pub fn logical_block_size(file: &File) -> Result<u64> {
    let mut size: c_int = 0;
    unsafe { raw::blksszget(file.as_raw_fd(), &mut size) }.map_err(|errno| Error::Ioctl {
        name: "BLKSSZGET",
        errno,
    })?;
    u64::try_from(size).map_err(|_| Error::Ioctl {
        name: "BLKSSZGET",
        errno: Errno::EINVAL,
    })
}

/// Device size in bytes (BLKGETSIZE64)
pub fn device_size(file: &File) -> Result<u64> {
    let mut size: u64 = 0;
    unsafe { raw::blkgetsize64(file.as_raw_fd(), &mut size) }.map_err(|errno| Error::Ioctl {
        name: "BLKGETSIZE64",
        errno,
    })?;
    Ok(size)
}

/// Ask the kernel to re-read the whole partition table (BLKRRPART)
pub fn reread_partition_table(file: &File) -> Result<()> {
    unsafe { raw::blkrrpart(file.as_raw_fd()) }.map_err(|errno| Error::Ioctl {
        name: "BLKRRPART",
        errno,
    })?;
    Ok(())
}

/// Drop the kernel's buffer cache for the device (BLKFLSBUF)
pub fn flush_buffers(file: &File) -> Result<()> {
    unsafe { raw::blkflsbuf(file.as_raw_fd()) }.map_err(|errno| Error::Ioctl {
        name: "BLKFLSBUF",
        errno,
    })?;
    Ok(())
}

/// Issue one BLKPG request. The raw errno is returned so callers can retry on EBUSY.
pub fn blkpg(file: &File, op: c_int, partition: &mut BlkpgPartition) -> std::result::Result<(), Errno> {
    let arg = BlkpgIoctlArg {
        op,
        flags: 0,
        datalen: std::mem::size_of::<BlkpgPartition>() as c_int,
        data: partition as *mut BlkpgPartition as *mut c_void,
    };
    unsafe { raw::blkpg(file.as_raw_fd(), &arg) }?;
    Ok(())
}
