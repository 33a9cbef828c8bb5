//! extlinux boot loader setup
//!
//! The configuration is a `DEFAULT` line followed by one block per label:
//!
//! ```text
//! DEFAULT A
//!
//! LABEL A
//!   KERNEL /A/vmlinuz
//!   INITRD /A/initramfs.xz
//!   APPEND console=ttyS0 root=A initrd=/A/initramfs.xz
//! ```

use std::fmt;
use std::fs::{self, OpenOptions};
use std::io::Write;
use std::os::unix::fs::{OpenOptionsExt, PermissionsExt};
use std::path::{Path, PathBuf};

use cairn_core::disk::BlockDevice;
use cairn_core::fs::System;
use cairn_core::gpt::pmbr;
use log::info;

use crate::error::{Error, Result};

pub const CONFIG_DIR: &str = "extlinux";
pub const CONFIG_FILE: &str = "extlinux.conf";
/// Touched once everything is in place
pub const INSTALLED_MARKER: &str = "installed";

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Label {
    pub name: String,
    pub kernel: String,
    pub initrd: String,
    pub append: String,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ExtlinuxConfig {
    pub default: String,
    pub labels: Vec<Label>,
}

impl ExtlinuxConfig {
    pub fn label(&self, name: &str) -> Option<&Label> {
        self.labels.iter().find(|l| l.name == name)
    }

    pub fn default_label(&self) -> Option<&Label> {
        self.label(&self.default)
    }

    /// Read back a configuration written by [`render`](Self::render).
    /// Directives other than the four emitted ones are ignored.
    pub fn parse(text: &str) -> Self {
        let mut config = Self {
            default: String::new(),
            labels: Vec::new(),
        };

        for line in text.lines() {
            let line = line.trim();
            let (keyword, value) = match line.split_once(char::is_whitespace) {
                Some((keyword, value)) => (keyword, value.trim()),
                None => (line, ""),
            };
            match keyword.to_ascii_uppercase().as_str() {
                "DEFAULT" => config.default = value.to_string(),
                "LABEL" => config.labels.push(Label {
                    name: value.to_string(),
                    kernel: String::new(),
                    initrd: String::new(),
                    append: String::new(),
                }),
                keyword => {
                    let Some(label) = config.labels.last_mut() else {
                        continue;
                    };
                    match keyword {
                        "KERNEL" | "LINUX" => label.kernel = value.to_string(),
                        "INITRD" => label.initrd = value.to_string(),
                        "APPEND" => label.append = value.to_string(),
                        _ => {}
                    }
                }
            }
        }
        config
    }

    pub fn render(&self) -> String {
        self.to_string()
    }
}

impl fmt::Display for ExtlinuxConfig {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        writeln!(f, "DEFAULT {}", self.default)?;
        for label in &self.labels {
            writeln!(f)?;
            writeln!(f, "LABEL {}", label.name)?;
            writeln!(f, "  KERNEL {}", label.kernel)?;
            writeln!(f, "  INITRD {}", label.initrd)?;
            writeln!(f, "  APPEND {}", label.append)?;
        }
        Ok(())
    }
}

pub fn config_path(boot: &Path) -> PathBuf {
    boot.join(CONFIG_DIR).join(CONFIG_FILE)
}

/// Load `<boot>/extlinux/extlinux.conf`, if there is one
pub fn read_config(boot: &Path) -> Result<Option<ExtlinuxConfig>> {
    let path = config_path(boot);
    match fs::read_to_string(&path) {
        Ok(text) => Ok(Some(ExtlinuxConfig::parse(&text))),
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(None),
        Err(e) => Err(Error::io(path, e)),
    }
}

/// Replace `<boot>/extlinux/extlinux.conf` (mode 0600) through a rename, so a
/// crash leaves either the old or the new file.
pub fn write_config(boot: &Path, config: &ExtlinuxConfig) -> Result<PathBuf> {
    let dir = boot.join(CONFIG_DIR);
    fs::create_dir_all(&dir).map_err(|e| Error::io(&dir, e))?;

    let path = dir.join(CONFIG_FILE);
    let staging = dir.join(format!("{}.new", CONFIG_FILE));
    {
        let mut file = OpenOptions::new()
            .write(true)
            .create(true)
            .truncate(true)
            .mode(0o600)
            .open(&staging)
            .map_err(|e| Error::io(&staging, e))?;
        file.set_permissions(fs::Permissions::from_mode(0o600))
            .map_err(|e| Error::io(&staging, e))?;
        file.write_all(config.render().as_bytes())
            .map_err(|e| Error::io(&staging, e))?;
        file.sync_all().map_err(|e| Error::io(&staging, e))?;
    }
    fs::rename(&staging, &path).map_err(|e| Error::io(&path, e))?;

    info!("wrote {} (default {})", path.display(), config.default);
    Ok(path)
}

/// Write the 440-byte MBR boot code to the start of `device`. The protective
/// MBR partition entries at 446 and up are not touched.
pub fn write_boot_stub(device: &Path, stub: &Path) -> Result<()> {
    let code = fs::read(stub).map_err(|e| Error::io(stub, e))?;
    if code.len() != pmbr::BOOT_CODE_LEN {
        return Err(Error::InvalidBootStub {
            path: stub.to_path_buf(),
            len: code.len(),
        });
    }

    info!("{}: writing boot code from {}", device.display(), stub.display());
    let device = BlockDevice::open_raw(device)?;
    device.write_at(0, &code)?;
    device.sync()?;
    Ok(())
}

/// Full boot loader installation on a mounted boot partition of `device`
pub fn install(
    system: &dyn System,
    device: &Path,
    stub: &Path,
    boot: &Path,
    config: &ExtlinuxConfig,
) -> Result<()> {
    write_boot_stub(device, stub)?;
    write_config(boot, config)?;
    system.install_extlinux(&boot.join(CONFIG_DIR))?;

    let marker = boot.join(INSTALLED_MARKER);
    OpenOptions::new()
        .write(true)
        .create(true)
        .truncate(false)
        .open(&marker)
        .map_err(|e| Error::io(&marker, e))?;
    info!("{}: boot loader installed", boot.display());
    Ok(())
}
