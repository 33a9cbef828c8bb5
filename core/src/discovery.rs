//! Block device discovery
//!
//! Walks the kernel's block device directory, reads each device's GPT and
//! probes every partition node for a filesystem. Devices without a usable
//! table (ISO boot media, for one) are probed as a whole.

use std::fs;
use std::path::{Path, PathBuf};

use log::{debug, warn};
use regex::Regex;

use crate::disk::device::{partition_node, BlockDevice};
use crate::error::{Error, Result};
use crate::gpt::{pmbr, PartitionTable};
use crate::probe::{self, Superblock};

pub const SYS_BLOCK: &str = "/sys/block";
pub const DEV_DIR: &str = "/dev";

/// One probed node: either a GPT partition or a whole device
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ProbedDevice {
    /// Whole-device node, e.g. `/dev/sda`
    pub device: PathBuf,
    /// Node that was probed, e.g. `/dev/sda2`, or the device itself
    pub node: PathBuf,
    /// 1-based GPT partition number, `None` for a whole device
    pub partition: Option<u32>,
    /// GPT partition name, if any
    pub partition_name: Option<String>,
    pub superblock: Option<Superblock>,
}

impl ProbedDevice {
    pub fn label(&self) -> Option<&str> {
        self.superblock.as_ref().map(|sb| sb.label.as_str())
    }
}

#[derive(Debug, Clone)]
pub struct Discovery {
    sys_block: PathBuf,
    dev_dir: PathBuf,
}

impl Default for Discovery {
    fn default() -> Self {
        Self::new(SYS_BLOCK, DEV_DIR)
    }
}

impl Discovery {
    pub fn new(sys_block: impl Into<PathBuf>, dev_dir: impl Into<PathBuf>) -> Self {
        Self {
            sys_block: sys_block.into(),
            dev_dir: dev_dir.into(),
        }
    }

    /// Probe every block device the kernel lists
    pub fn enumerate(&self) -> Result<Vec<ProbedDevice>> {
        let entries = fs::read_dir(&self.sys_block).map_err(|e| Error::io(&self.sys_block, e))?;
        let mut names = Vec::new();
        for entry in entries {
            let entry = entry.map_err(|e| Error::io(&self.sys_block, e))?;
            names.push(entry.file_name());
        }
        names.sort();

        let mut found = Vec::new();
        for name in names {
            let device = self.dev_dir.join(&name);
            match probe_device(&device) {
                Ok(mut probed) => found.append(&mut probed),
                Err(err) => warn!("{}: skipping: {}", device.display(), err),
            }
        }
        Ok(found)
    }

    /// First node whose filesystem label matches, falling back to the GPT
    /// partition name for partitions that carry no filesystem yet.
    pub fn find_by_label(&self, label: &str) -> Result<ProbedDevice> {
        let devices = self.enumerate()?;
        if let Some(found) = devices.iter().find(|d| d.label() == Some(label)) {
            return Ok(found.clone());
        }
        devices
            .into_iter()
            .find(|d| d.partition_name.as_deref() == Some(label))
            .ok_or_else(|| Error::UnknownPartitionLabel(label.to_string()))
    }
}

/// Probe one device: its partitions if it has a readable GPT, otherwise the
/// device itself.
pub fn probe_device(device: &Path) -> Result<Vec<ProbedDevice>> {
    let mut handle = BlockDevice::open_read_only(device)?;

    let mut lba0 = [0u8; 512];
    let has_pmbr = handle.read_at(0, &mut lba0).is_ok() && pmbr::is_protective(&lba0);

    if has_pmbr {
        match PartitionTable::read(&mut handle) {
            Ok(table) => return Ok(probe_partitions(device, &table)),
            Err(err) => warn!(
                "{}: unreadable partition table ({}), probing whole device",
                device.display(),
                err
            ),
        }
    }

    let superblock = probe::probe(handle.file(), device)?;
    debug!("{}: whole device probe: {:?}", device.display(), superblock);
    Ok(vec![ProbedDevice {
        device: device.to_path_buf(),
        node: device.to_path_buf(),
        partition: None,
        partition_name: None,
        superblock,
    }])
}

fn probe_partitions(device: &Path, table: &PartitionTable<'_>) -> Vec<ProbedDevice> {
    table
        .partitions()
        .map(|p| {
            let node = partition_node(device, p.number);
            let superblock = if node.exists() {
                probe::probe_path(&node).unwrap_or_else(|err| {
                    warn!("{}: probe failed: {}", node.display(), err);
                    None
                })
            } else {
                warn!("{}: partition node missing", node.display());
                None
            };
            ProbedDevice {
                device: device.to_path_buf(),
                node,
                partition: Some(p.number),
                partition_name: Some(p.name.clone()).filter(|n| !n.is_empty()),
                superblock,
            }
        })
        .collect()
}

/// Partition number from a partition node name (`sda3` → 3, `nvme0n1p2` → 2)
pub fn partition_number(node: &Path) -> Option<u32> {
    let re = Regex::new(r"p?(\d+)$").ok()?;
    let name = node.file_name()?.to_str()?;
    re.captures(name)?.get(1)?.as_str().parse().ok()
}
