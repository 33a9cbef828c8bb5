//! A/B upgrade
//!
//! Installs a new root filesystem, kernel and initramfs into the slot that is
//! not running, then points the boot loader at it. The running slot's
//! partition and its files on the boot partition are never written.

use std::path::{Path, PathBuf};
use std::time::Duration;

use cairn_core::cmdline::{Cmdline, PROC_CMDLINE};
use cairn_core::discovery::Discovery;
use cairn_core::fs::mount::{is_mounted, PROC_MOUNTS};
use cairn_core::fs::{FsType, System};
use cairn_installer::asset::{Asset, Fetcher};
use cairn_installer::extlinux::{self, ExtlinuxConfig, Label};
use cairn_installer::target::{boot_file, labels, INITRAMFS_NAME, KERNEL_NAME};
use cairn_installer::SLOT_PARAM;
use log::info;

use crate::error::{Error, Result};
use crate::slot::Slot;

#[derive(Debug, Clone)]
pub struct UpgradeOptions {
    pub cmdline_path: PathBuf,
    pub slot_param: String,
    pub boot_label: String,
    pub boot_mount: PathBuf,
    /// Temporary mount point of the slot being installed
    pub root_mount: PathBuf,
    /// Mount table consulted before the new slot is formatted
    pub mounts_path: PathBuf,
    pub fetch_timeout: Duration,
    pub force: bool,
}

impl Default for UpgradeOptions {
    fn default() -> Self {
        Self {
            cmdline_path: PathBuf::from(PROC_CMDLINE),
            slot_param: SLOT_PARAM.to_string(),
            boot_label: labels::BOOT.to_string(),
            boot_mount: PathBuf::from("/boot"),
            root_mount: PathBuf::from("/var/mnt/upgrade"),
            mounts_path: PathBuf::from(PROC_MOUNTS),
            fetch_timeout: Duration::from_secs(300),
            force: true,
        }
    }
}

/// Sources of the new system image
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct UpgradeRequest {
    pub rootfs: String,
    pub kernel: String,
    pub initramfs: String,
}

pub struct Upgrader<'a> {
    system: &'a dyn System,
    discovery: Discovery,
    options: UpgradeOptions,
    fetcher: Fetcher,
}

impl<'a> Upgrader<'a> {
    pub fn new(system: &'a dyn System, discovery: Discovery, options: UpgradeOptions) -> Result<Self> {
        let fetcher = Fetcher::new(options.fetch_timeout)?;
        Ok(Self {
            system,
            discovery,
            options,
            fetcher,
        })
    }

    pub fn options(&self) -> &UpgradeOptions {
        &self.options
    }

    /// Slot named on the running kernel's command line
    pub fn current_slot(&self) -> Result<Slot> {
        let cmdline = Cmdline::read(&self.options.cmdline_path)?;
        Slot::from_cmdline(&cmdline, &self.options.slot_param)
    }

    /// Install `request` into the inactive slot and make it the default boot
    /// entry. Returns the slot that boots next; rebooting is left to the
    /// caller.
    pub fn upgrade(&self, request: &UpgradeRequest) -> Result<Slot> {
        let current = self.current_slot()?;
        let next = current.other();
        info!("upgrading: running slot {}, installing into slot {}", current, next);

        // Parse every source up front so a typo fails before anything is
        // formatted.
        let rootfs = Asset::parse(&request.rootfs, None)?;
        let kernel = Asset::parse(&request.kernel, Some(&boot_file(next.name(), KERNEL_NAME)))?;
        let initramfs = Asset::parse(
            &request.initramfs,
            Some(&boot_file(next.name(), INITRAMFS_NAME)),
        )?;

        self.install_root(current, next, &rootfs)?;

        let boot = self.discovery.find_by_label(&self.options.boot_label)?;
        let mount = &self.options.boot_mount;
        self.system.mount(&boot.node, mount, FsType::Vfat)?;
        let result = self.install_boot(current, next, mount, &[kernel, initramfs]);
        let unmounted = self.system.unmount(mount);
        result?;
        unmounted?;

        info!("slot {} installed; it boots next", next);
        Ok(next)
    }

    fn install_root(&self, current: Slot, slot: Slot, rootfs: &Asset) -> Result<()> {
        let target = self.discovery.find_by_label(slot.label())?;
        self.check_not_running(current, slot, &target.node)?;
        info!(
            "{}: formatting slot {} as {}",
            target.node.display(),
            slot,
            FsType::Xfs
        );
        self.system
            .format(&target.node, FsType::Xfs, Some(slot.label()), self.options.force)?;

        let mount = &self.options.root_mount;
        self.system.mount(&target.node, mount, FsType::Xfs)?;
        let placed = self.fetcher.place(rootfs, mount);
        let unmounted = self.system.unmount(mount);
        placed?;
        unmounted?;
        Ok(())
    }

    /// Refuse `node` if it is the running slot's partition or mounted anywhere
    fn check_not_running(&self, current: Slot, slot: Slot, node: &Path) -> Result<()> {
        let running = self
            .discovery
            .find_by_label(current.label())
            .map(|found| found.node)
            .ok();
        if running.as_deref() == Some(node) || is_mounted(&self.options.mounts_path, node)? {
            return Err(Error::SlotInUse {
                slot,
                node: node.to_path_buf(),
            });
        }
        Ok(())
    }

    fn install_boot(&self, current: Slot, next: Slot, boot: &Path, assets: &[Asset]) -> Result<()> {
        for asset in assets {
            self.fetcher.place(asset, boot)?;
        }

        let previous = extlinux::read_config(boot)?;
        let config = next_config(previous.as_ref(), current, next, &self.options.slot_param);
        extlinux::write_config(boot, &config)?;
        self.system.sync()?;
        Ok(())
    }
}

/// Entry booting `slot` from its own directory on the boot partition
fn slot_label(slot: Slot, base: &str, param: &str) -> Label {
    let initrd = boot_file(slot.name(), INITRAMFS_NAME);
    let mut append = Cmdline::parse(base);
    append.set(param, slot.name());
    append.set("initrd", initrd.clone());
    Label {
        name: slot.name().to_string(),
        kernel: boot_file(slot.name(), KERNEL_NAME),
        initrd,
        append: append.to_string(),
    }
}

/// Two-entry configuration defaulting to `next` and keeping the running
/// slot's entry as the fallback. The running entry is the label named after
/// the slot, else the previous default label, else one pointing at the slot's
/// own directory.
pub fn next_config(
    previous: Option<&ExtlinuxConfig>,
    current: Slot,
    next: Slot,
    param: &str,
) -> ExtlinuxConfig {
    let running = previous.and_then(|c| c.label(current.name()).or_else(|| c.default_label()));
    let fallback = match running {
        Some(label) => Label {
            name: current.name().to_string(),
            ..label.clone()
        },
        None => slot_label(current, "", param),
    };

    ExtlinuxConfig {
        default: next.name().to_string(),
        labels: vec![slot_label(next, &fallback.append, param), fallback],
    }
}
