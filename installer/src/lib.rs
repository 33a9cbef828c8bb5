//! Cairn Installer
//!
//! Turns an install request into partitioned, formatted and populated disks
//! with an extlinux boot loader on the boot partition.

pub mod asset;
pub mod error;
pub mod extlinux;
pub mod grow;
pub mod manifest;
pub mod request;
pub mod target;

use std::time::Duration;

use cairn_core::cmdline::Cmdline;
use log::info;

pub use error::{Error, Result};
pub use grow::grow_ephemeral;
pub use manifest::{Context, Installed, Manifest};
pub use request::InstallRequest;

use extlinux::{ExtlinuxConfig, Label};
use target::{boot_file, labels, DEFAULT_BOOT_DIR, INITRAMFS_NAME, KERNEL_NAME};

/// Kernel parameter naming the active root slot
pub const SLOT_PARAM: &str = "root";
/// Slot booted after a fresh install
pub const FIRST_SLOT: &str = "A";
/// Label of the single entry a fresh install boots
pub const DEFAULT_LABEL: &str = "default";

/// Run a complete install. The boot loader goes in last, so the
/// `installed` marker only exists once every partition is populated.
pub fn install(ctx: &Context<'_>, request: &InstallRequest) -> Result<Vec<Installed>> {
    let manifest = Manifest::from_request(request)?;
    let installed = manifest.execute(ctx)?;

    if let (Some(boot), Some(entry)) = (
        request.boot.as_ref(),
        installed.iter().find(|i| i.target.label() == labels::BOOT),
    ) {
        let mount = ctx.mount_path(&boot.mount_point);
        ctx.system.mount(&entry.node, &mount, entry.target.fs)?;
        let result = extlinux::install(
            ctx.system,
            &entry.target.device,
            &request.boot_stub,
            &mount,
            &initial_config(&boot.cmdline),
        );
        let unmounted = ctx.system.unmount(&mount);
        result?;
        unmounted?;
    }

    ctx.system.sync()?;
    info!("install complete: {} partitions", installed.len());
    Ok(installed)
}

/// Context for the real host with the request's fetch timeout
pub fn host_context<'a>(
    system: &'a dyn cairn_core::fs::System,
    request: &InstallRequest,
) -> Result<Context<'a>> {
    Context::new(system, Duration::from_secs(request.fetch_timeout))
}

/// Boot configuration written by a fresh install: one `default` entry
/// booting slot A from `/default`.
pub fn initial_config(base_cmdline: &str) -> ExtlinuxConfig {
    let initrd = boot_file(DEFAULT_BOOT_DIR, INITRAMFS_NAME);
    let mut append = Cmdline::parse(base_cmdline);
    append.set(SLOT_PARAM, FIRST_SLOT);
    append.set("initrd", initrd.clone());

    ExtlinuxConfig {
        default: DEFAULT_LABEL.to_string(),
        labels: vec![Label {
            name: DEFAULT_LABEL.to_string(),
            kernel: boot_file(DEFAULT_BOOT_DIR, KERNEL_NAME),
            initrd,
            append: append.to_string(),
        }],
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_initial_config() {
        let config = initial_config("console=ttyS0 root=X");
        assert_eq!(config.default, "default");
        assert_eq!(config.labels.len(), 1);
        let label = &config.labels[0];
        assert_eq!(label.kernel, "/default/vmlinuz");
        assert_eq!(label.initrd, "/default/initramfs.xz");
        assert_eq!(label.append, "console=ttyS0 root=A initrd=/default/initramfs.xz");
    }
}
