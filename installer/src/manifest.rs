//! Install manifest
//!
//! Groups the targets of an install request by device. Executing a manifest
//! gives each device a fresh GPT holding its targets in declared order, then
//! formats every partition, mounts it and places its assets.

use std::collections::BTreeMap;
use std::path::{Path, PathBuf};
use std::time::Duration;

use cairn_core::disk::BlockDevice;
use cairn_core::fs::System;
use log::info;

use crate::asset::{under, Fetcher};
use crate::error::Result;
use crate::request::InstallRequest;
use crate::target::{labels, Target};

/// Where the installer runs: the host, an asset fetcher and the directory
/// target mount points are resolved against.
pub struct Context<'a> {
    pub system: &'a dyn System,
    pub fetcher: Fetcher,
    pub mount_root: PathBuf,
}

impl<'a> Context<'a> {
    pub fn new(system: &'a dyn System, fetch_timeout: Duration) -> Result<Self> {
        Ok(Self {
            system,
            fetcher: Fetcher::new(fetch_timeout)?,
            mount_root: PathBuf::from("/"),
        })
    }

    /// Resolve target mount points below `root` instead of `/`
    pub fn with_mount_root(mut self, root: impl Into<PathBuf>) -> Self {
        self.mount_root = root.into();
        self
    }

    pub fn mount_path(&self, mount_point: &Path) -> PathBuf {
        under(&self.mount_root, &mount_point.to_string_lossy())
    }
}

/// A partition created by [`Manifest::execute`]
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Installed {
    pub target: Target,
    pub number: u32,
    pub node: PathBuf,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Manifest {
    pub wipe: bool,
    pub targets: BTreeMap<PathBuf, Vec<Target>>,
}

impl Manifest {
    pub fn from_request(request: &InstallRequest) -> Result<Self> {
        let mut manifest = Self {
            wipe: request.wipe,
            targets: BTreeMap::new(),
        };

        if let Some(boot) = &request.boot {
            manifest.push(Target::boot(boot, request.force)?);
        }
        if let Some(root) = &request.root {
            manifest.push(Target::root(root, labels::ROOT_A, request.force)?);
            if root.ab {
                manifest.push(Target::root(root, labels::ROOT_B, request.force)?);
            }
        }
        manifest.push(Target::ephemeral(&request.ephemeral, request.force)?);

        for extra in &request.extra_devices {
            for partition in &extra.partitions {
                manifest.push(Target::extra(&extra.device, partition, request.force));
            }
        }
        Ok(manifest)
    }

    fn push(&mut self, target: Target) {
        self.targets
            .entry(target.device.clone())
            .or_default()
            .push(target);
    }

    /// The target carrying the boot loader, if the request has one
    pub fn boot_target(&self) -> Option<&Target> {
        self.targets
            .values()
            .flatten()
            .find(|t| t.label() == labels::BOOT)
    }

    /// Partition, format and populate every device
    pub fn execute(&self, ctx: &Context<'_>) -> Result<Vec<Installed>> {
        let mut installed = Vec::new();
        for (device, targets) in &self.targets {
            let created = self.partition(device, targets)?;
            for entry in &created {
                populate(ctx, entry)?;
            }
            installed.extend(created);
        }
        Ok(installed)
    }

    fn partition(&self, device: &Path, targets: &[Target]) -> Result<Vec<Installed>> {
        if self.wipe {
            BlockDevice::open_raw(device)?.zero()?;
        }

        let mut bd = BlockDevice::open(device, true)?;
        let mut numbers = Vec::with_capacity(targets.len());
        {
            let mut table = bd.partition_table()?;
            for target in targets {
                numbers.push(table.add(target.new_partition())?.number);
            }
            table.write()?;
        }
        bd.reread_partition_table()?;

        Ok(targets
            .iter()
            .zip(numbers)
            .map(|(target, number)| Installed {
                target: target.clone(),
                number,
                node: bd.partition_node(number),
            })
            .collect())
    }
}

fn populate(ctx: &Context<'_>, entry: &Installed) -> Result<()> {
    let target = &entry.target;
    info!(
        "{}: formatting partition {} {:?} as {}",
        entry.node.display(),
        entry.number,
        target.label(),
        target.fs
    );
    target.format(ctx.system, &entry.node)?;

    let Some(mount_point) = &target.mount_point else {
        return Ok(());
    };
    if target.assets.is_empty() {
        return Ok(());
    }

    let path = ctx.mount_path(mount_point);
    ctx.system.mount(&entry.node, &path, target.fs)?;
    let placed = place_all(ctx, target, &path);
    let unmounted = ctx.system.unmount(&path);
    placed?;
    unmounted?;
    Ok(())
}

fn place_all(ctx: &Context<'_>, target: &Target, path: &Path) -> Result<()> {
    for asset in &target.assets {
        ctx.fetcher.place(asset, path)?;
    }
    Ok(())
}
