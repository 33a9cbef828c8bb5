// Mount helpers over nix::mount

use std::fs;
use std::io;
use std::path::{Path, PathBuf};

use log::info;
use nix::mount::{self, MntFlags, MsFlags};

use crate::error::{Error, Result};

/// Mount `source` read-write with `noatime`, creating `target` first
pub fn mount(source: &Path, target: &Path, fstype: &str) -> Result<()> {
    fs::create_dir_all(target).map_err(|e| Error::io(target, e))?;
    info!("mounting {} ({}) at {}", source.display(), fstype, target.display());
    mount::mount(
        Some(source),
        target,
        Some(fstype),
        MsFlags::MS_NOATIME,
        None::<&str>,
    )
    .map_err(|errno| Error::io(target, io::Error::from(errno)))
}

pub fn unmount(target: &Path) -> Result<()> {
    info!("unmounting {}", target.display());
    mount::umount2(target, MntFlags::empty())
        .map_err(|errno| Error::io(target, io::Error::from(errno)))
}

pub const PROC_MOUNTS: &str = "/proc/self/mounts";

/// Whether `node` is the source of any mount listed in `mounts` (a file in
/// `/proc/self/mounts` format). Symlinks such as `/dev/disk/by-label/*` are
/// resolved on both sides. A missing table lists nothing.
pub fn is_mounted(mounts: &Path, node: &Path) -> Result<bool> {
    let table = match fs::read_to_string(mounts) {
        Ok(table) => table,
        Err(e) if e.kind() == io::ErrorKind::NotFound => return Ok(false),
        Err(e) => return Err(Error::io(mounts, e)),
    };

    let node = resolve(node);
    Ok(table
        .lines()
        .filter_map(|line| line.split_whitespace().next())
        .filter(|source| source.starts_with('/'))
        .any(|source| resolve(Path::new(source)) == node))
}

fn resolve(path: &Path) -> PathBuf {
    fs::canonicalize(path).unwrap_or_else(|_| path.to_path_buf())
}

/// Flush every filesystem
pub fn sync() {
    nix::unistd::sync();
}
