//! Install targets: one partition each, with its filesystem and assets

use std::path::{Path, PathBuf};

use cairn_core::fs::{FsType, System};
use cairn_core::gpt::{attributes, guid, NewPartition};
use uuid::Uuid;

use crate::asset::Asset;
use crate::error::Result;
use crate::request::{BootSection, EphemeralSection, ExtraPartition, RootSection};

/// Partition and filesystem labels
pub mod labels {
    pub const BOOT: &str = "ESP";
    pub const ROOT_A: &str = "ROOT-A";
    pub const ROOT_B: &str = "ROOT-B";
    pub const EPHEMERAL: &str = "EPHEMERAL";
}

/// Directory on the boot partition holding the first kernel and initramfs
pub const DEFAULT_BOOT_DIR: &str = "default";
pub const KERNEL_NAME: &str = "vmlinuz";
pub const INITRAMFS_NAME: &str = "initramfs.xz";

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Target {
    pub device: PathBuf,
    /// GPT name and filesystem label; extra partitions have none
    pub label: Option<String>,
    pub fs: FsType,
    pub type_guid: Uuid,
    pub attributes: u64,
    /// Bytes; 0 extends to the last usable LBA
    pub size: u64,
    pub mount_point: Option<PathBuf>,
    pub force: bool,
    pub assets: Vec<Asset>,
}

impl Target {
    pub fn boot(section: &BootSection, force: bool) -> Result<Self> {
        let mut assets = vec![
            Asset::parse(&section.kernel, Some(&boot_file(DEFAULT_BOOT_DIR, KERNEL_NAME)))?,
            Asset::parse(
                &section.initramfs,
                Some(&boot_file(DEFAULT_BOOT_DIR, INITRAMFS_NAME)),
            )?,
        ];
        for spec in &section.assets {
            assets.push(Asset::from_spec(spec)?);
        }

        Ok(Self {
            device: section.device.clone(),
            label: Some(labels::BOOT.to_string()),
            fs: FsType::Vfat,
            type_guid: guid::EFI_SYSTEM,
            attributes: attributes::LEGACY_BIOS_BOOTABLE,
            size: section.size,
            mount_point: Some(section.mount_point.clone()),
            force,
            assets,
        })
    }

    /// Slot A carries the rootfs; slot B starts out empty
    pub fn root(section: &RootSection, label: &str, force: bool) -> Result<Self> {
        let mut assets = Vec::new();
        if label == labels::ROOT_A {
            if let Some(rootfs) = &section.rootfs {
                assets.push(Asset::parse(rootfs, None)?);
            }
            for spec in &section.assets {
                assets.push(Asset::from_spec(spec)?);
            }
        }

        Ok(Self {
            device: section.device.clone(),
            label: Some(label.to_string()),
            fs: FsType::Xfs,
            type_guid: guid::LINUX_ROOT_X86_64,
            attributes: 0,
            size: section.size,
            mount_point: (label == labels::ROOT_A).then(|| section.mount_point.clone()),
            force,
            assets,
        })
    }

    pub fn ephemeral(section: &EphemeralSection, force: bool) -> Result<Self> {
        let assets = section
            .assets
            .iter()
            .map(Asset::from_spec)
            .collect::<Result<Vec<_>>>()?;

        Ok(Self {
            device: section.device.clone(),
            label: Some(labels::EPHEMERAL.to_string()),
            fs: FsType::Xfs,
            type_guid: guid::LINUX_FILESYSTEM,
            attributes: 0,
            size: section.size,
            mount_point: Some(section.mount_point.clone()),
            force,
            assets,
        })
    }

    pub fn extra(device: &Path, partition: &ExtraPartition, force: bool) -> Self {
        Self {
            device: device.to_path_buf(),
            label: None,
            fs: FsType::Xfs,
            type_guid: guid::LINUX_FILESYSTEM,
            attributes: 0,
            size: partition.size,
            mount_point: partition.mount_point.clone(),
            force,
            assets: Vec::new(),
        }
    }

    pub fn label(&self) -> &str {
        self.label.as_deref().unwrap_or("")
    }

    pub fn new_partition(&self) -> NewPartition<'_> {
        NewPartition {
            size: self.size,
            type_guid: self.type_guid,
            name: self.label(),
            attributes: self.attributes,
            max: self.size == 0,
        }
    }

    pub fn format(&self, system: &dyn System, node: &Path) -> cairn_core::Result<()> {
        system.format(node, self.fs, self.label.as_deref(), self.force)
    }
}

/// `/<dir>/<name>` on the boot partition
pub fn boot_file(dir: &str, name: &str) -> String {
    format!("/{}/{}", dir, name)
}
