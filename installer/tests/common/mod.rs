//! Common test utilities: a fake host with a `/dev` directory of disk
//! images and a recording `System`

#![allow(dead_code)]

use std::cell::RefCell;
use std::fs::{self, File, OpenOptions};
use std::io::Write;
use std::os::unix::fs::FileExt;
use std::path::{Path, PathBuf};

use cairn_core::fs::{FsType, System};

pub const MIB: u64 = 1 << 20;
pub const GIB: u64 = 1 << 30;

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Call {
    Format {
        node: PathBuf,
        fs: FsType,
        label: Option<String>,
    },
    Grow(PathBuf),
    Mount(PathBuf, PathBuf),
    Unmount(PathBuf),
    Extlinux(PathBuf),
    Sync,
}

/// Records every call. Formatting writes a superblock into the partition
/// node (creating it) so later probes see the label.
#[derive(Default)]
pub struct FakeSystem {
    pub calls: RefCell<Vec<Call>>,
}

impl FakeSystem {
    pub fn calls(&self) -> Vec<Call> {
        self.calls.borrow().clone()
    }

    pub fn formatted(&self) -> Vec<(PathBuf, Option<String>)> {
        self.calls()
            .into_iter()
            .filter_map(|c| match c {
                Call::Format { node, label, .. } => Some((node, label)),
                _ => None,
            })
            .collect()
    }
}

impl System for FakeSystem {
    fn format(&self, node: &Path, fs: FsType, label: Option<&str>, _force: bool) -> cairn_core::Result<()> {
        let file = OpenOptions::new()
            .create(true)
            .write(true)
            .truncate(false)
            .open(node)
            .map_err(|e| cairn_core::Error::io(node, e))?;
        file.set_len(MIB).map_err(|e| cairn_core::Error::io(node, e))?;
        let sb = superblock(fs, label.unwrap_or(""));
        file.write_all_at(&sb, 0).map_err(|e| cairn_core::Error::io(node, e))?;

        self.calls.borrow_mut().push(Call::Format {
            node: node.to_path_buf(),
            fs,
            label: label.map(str::to_string),
        });
        Ok(())
    }

    fn grow(&self, mount_point: &Path) -> cairn_core::Result<()> {
        self.calls.borrow_mut().push(Call::Grow(mount_point.to_path_buf()));
        Ok(())
    }

    fn mount(&self, node: &Path, target: &Path, _fs: FsType) -> cairn_core::Result<()> {
        fs::create_dir_all(target).map_err(|e| cairn_core::Error::io(target, e))?;
        self.calls
            .borrow_mut()
            .push(Call::Mount(node.to_path_buf(), target.to_path_buf()));
        Ok(())
    }

    fn unmount(&self, target: &Path) -> cairn_core::Result<()> {
        self.calls.borrow_mut().push(Call::Unmount(target.to_path_buf()));
        Ok(())
    }

    fn install_extlinux(&self, dir: &Path) -> cairn_core::Result<()> {
        self.calls.borrow_mut().push(Call::Extlinux(dir.to_path_buf()));
        Ok(())
    }

    fn sync(&self) -> cairn_core::Result<()> {
        self.calls.borrow_mut().push(Call::Sync);
        Ok(())
    }
}

pub fn superblock(fs: FsType, label: &str) -> Vec<u8> {
    let mut sb = vec![0u8; 512];
    match fs {
        FsType::Xfs => {
            sb[..4].copy_from_slice(b"XFSB");
            sb[108..108 + label.len().min(12)].copy_from_slice(&label.as_bytes()[..label.len().min(12)]);
        }
        FsType::Vfat => {
            let mut name = [b' '; 11];
            name[..label.len().min(11)].copy_from_slice(&label.as_bytes()[..label.len().min(11)]);
            sb[0x47..0x52].copy_from_slice(&name);
            sb[0x52..0x5A].copy_from_slice(b"FAT32   ");
        }
    }
    sb
}

/// Temporary directory laid out as `sys/block`, `dev`, `mnt` and `srv`
pub struct Host {
    pub root: tempfile::TempDir,
}

impl Host {
    pub fn new() -> Self {
        let root = tempfile::tempdir().expect("tempdir");
        for dir in ["sys/block", "dev", "mnt", "srv"] {
            fs::create_dir_all(root.path().join(dir)).expect("host dir");
        }
        Self { root }
    }

    pub fn sys_block(&self) -> PathBuf {
        self.root.path().join("sys/block")
    }

    pub fn dev(&self) -> PathBuf {
        self.root.path().join("dev")
    }

    /// Mount root handed to the installer
    pub fn mnt(&self) -> PathBuf {
        self.root.path().join("mnt")
    }

    pub fn srv(&self, name: &str) -> PathBuf {
        self.root.path().join("srv").join(name)
    }

    /// Sparse disk image registered under `sys/block`
    pub fn disk(&self, name: &str, size: u64) -> PathBuf {
        fs::create_dir_all(self.sys_block().join(name)).expect("sysfs entry");
        let path = self.dev().join(name);
        File::create(&path)
            .and_then(|f| f.set_len(size))
            .expect("disk image");
        path
    }

    pub fn file(&self, name: &str, data: &[u8]) -> PathBuf {
        let path = self.srv(name);
        fs::write(&path, data).expect("asset");
        path
    }

    /// Gzipped tarball holding `etc/os-release` with `content`
    pub fn rootfs(&self, name: &str, content: &str) -> PathBuf {
        let mut builder = tar::Builder::new(Vec::new());
        let mut header = tar::Header::new_gnu();
        header.set_size(content.len() as u64);
        header.set_mode(0o644);
        header.set_cksum();
        builder
            .append_data(&mut header, "etc/os-release", content.as_bytes())
            .expect("tar entry");
        let tar = builder.into_inner().expect("tar");

        let mut gz = flate2::write::GzEncoder::new(Vec::new(), flate2::Compression::fast());
        gz.write_all(&tar).expect("gzip");
        self.file(name, &gz.finish().expect("gzip"))
    }

    /// 440-byte boot stub
    pub fn boot_stub(&self) -> PathBuf {
        self.file("gptmbr.bin", &[0xFA; 440])
    }
}
