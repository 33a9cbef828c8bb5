//! Host filesystem operations
//!
//! Formatting, growing, mounting and bootloader installation all leave the
//! process. [`System`] is the seam the installer and updater drive them
//! through; [`Linux`] is the real thing.

pub mod mount;
pub mod tools;

use std::fmt;
use std::path::Path;

use crate::error::Result;

/// Filesystems the installer creates
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FsType {
    Xfs,
    Vfat,
}

impl FsType {
    /// Name as passed to mount(2)
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Xfs => "xfs",
            Self::Vfat => "vfat",
        }
    }
}

impl fmt::Display for FsType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Side effects on the host
pub trait System {
    /// Create a filesystem on `node`
    fn format(&self, node: &Path, fs: FsType, label: Option<&str>, force: bool) -> Result<()>;

    /// Grow the mounted XFS filesystem at `mount_point` to fill its partition
    fn grow(&self, mount_point: &Path) -> Result<()>;

    fn mount(&self, node: &Path, target: &Path, fs: FsType) -> Result<()>;

    fn unmount(&self, target: &Path) -> Result<()>;

    /// Install the extlinux boot loader into `dir`
    fn install_extlinux(&self, dir: &Path) -> Result<()>;

    fn sync(&self) -> Result<()>;
}

/// The running Linux host
#[derive(Debug, Clone, Copy, Default)]
pub struct Linux;

impl System for Linux {
    fn format(&self, node: &Path, fs: FsType, label: Option<&str>, force: bool) -> Result<()> {
        match fs {
            FsType::Xfs => tools::mkfs_xfs(node, label, force),
            FsType::Vfat => tools::mkfs_vfat(node, label.unwrap_or("NO NAME")),
        }
    }

    fn grow(&self, mount_point: &Path) -> Result<()> {
        tools::xfs_growfs(mount_point)
    }

    fn mount(&self, node: &Path, target: &Path, fs: FsType) -> Result<()> {
        mount::mount(node, target, fs.as_str())
    }

    fn unmount(&self, target: &Path) -> Result<()> {
        mount::unmount(target)
    }

    fn install_extlinux(&self, dir: &Path) -> Result<()> {
        tools::extlinux_install(dir)
    }

    fn sync(&self) -> Result<()> {
        mount::sync();
        Ok(())
    }
}
