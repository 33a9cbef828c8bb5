//! Install request document
//!
//! ```yaml
//! wipe: false
//! force: true
//! boot:
//!   device: /dev/sda
//!   size: 536870912
//!   kernel: https://example.com/vmlinuz
//!   initramfs: https://example.com/initramfs.xz
//!   cmdline: console=ttyS0
//! root:
//!   device: /dev/sda
//!   size: 2147483648
//!   rootfs: https://example.com/rootfs.tar.gz
//! ephemeral:
//!   device: /dev/sda
//!   size: 0
//!   assets:
//!     - source: "dir:/lib/kubelet"
//! ```

use std::fs;
use std::path::{Path, PathBuf};

use serde::Deserialize;

use crate::error::{Error, Result};

pub const DEFAULT_FETCH_TIMEOUT: u64 = 300;
pub const DEFAULT_BOOT_STUB: &str = "/usr/share/syslinux/gptmbr.bin";
pub const DEFAULT_BOOT_MOUNT: &str = "/boot";
pub const DEFAULT_ROOT_MOUNT: &str = "/var/mnt/root";
pub const DEFAULT_EPHEMERAL_MOUNT: &str = "/var";

#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct InstallRequest {
    /// Zero every target device before partitioning
    #[serde(default)]
    pub wipe: bool,
    /// Pass `-f` to mkfs
    #[serde(default)]
    pub force: bool,
    #[serde(default)]
    pub boot: Option<BootSection>,
    #[serde(default)]
    pub root: Option<RootSection>,
    pub ephemeral: EphemeralSection,
    #[serde(default)]
    pub extra_devices: Vec<ExtraDevice>,
    /// Seconds allowed for each asset download
    #[serde(default = "default_fetch_timeout")]
    pub fetch_timeout: u64,
    /// 440-byte MBR boot code written in front of the protective MBR entry
    #[serde(default = "default_boot_stub")]
    pub boot_stub: PathBuf,
}

#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct BootSection {
    pub device: PathBuf,
    pub size: u64,
    pub kernel: String,
    pub initramfs: String,
    #[serde(default = "default_boot_mount")]
    pub mount_point: PathBuf,
    /// Base kernel command line; the root slot and initrd are appended
    #[serde(default)]
    pub cmdline: String,
    #[serde(default)]
    pub assets: Vec<AssetSpec>,
}

#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct RootSection {
    pub device: PathBuf,
    pub size: u64,
    #[serde(default)]
    pub rootfs: Option<String>,
    #[serde(default = "default_root_mount")]
    pub mount_point: PathBuf,
    /// Also create an empty ROOT-B slot of the same size
    #[serde(default)]
    pub ab: bool,
    #[serde(default)]
    pub assets: Vec<AssetSpec>,
}

#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct EphemeralSection {
    pub device: PathBuf,
    /// 0 takes the rest of the disk
    #[serde(default)]
    pub size: u64,
    #[serde(default = "default_ephemeral_mount")]
    pub mount_point: PathBuf,
    #[serde(default)]
    pub assets: Vec<AssetSpec>,
}

#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct ExtraDevice {
    pub device: PathBuf,
    pub partitions: Vec<ExtraPartition>,
}

#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct ExtraPartition {
    #[serde(default)]
    pub size: u64,
    #[serde(default)]
    pub mount_point: Option<PathBuf>,
}

#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct AssetSpec {
    pub source: String,
    #[serde(default)]
    pub destination: Option<String>,
}

fn default_fetch_timeout() -> u64 {
    DEFAULT_FETCH_TIMEOUT
}

fn default_boot_stub() -> PathBuf {
    PathBuf::from(DEFAULT_BOOT_STUB)
}

fn default_boot_mount() -> PathBuf {
    PathBuf::from(DEFAULT_BOOT_MOUNT)
}

fn default_root_mount() -> PathBuf {
    PathBuf::from(DEFAULT_ROOT_MOUNT)
}

fn default_ephemeral_mount() -> PathBuf {
    PathBuf::from(DEFAULT_EPHEMERAL_MOUNT)
}

impl InstallRequest {
    pub fn from_yaml(text: &str) -> Result<Self> {
        let request: Self = serde_yaml::from_str(text)?;
        request.validate()?;
        Ok(request)
    }

    pub fn load(path: &Path) -> Result<Self> {
        let text = fs::read_to_string(path).map_err(|e| Error::io(path, e))?;
        Self::from_yaml(&text)
    }

    fn validate(&self) -> Result<()> {
        if self.fetch_timeout == 0 {
            return Err(Error::InvalidRequest(
                "fetch_timeout must be at least one second".into(),
            ));
        }
        if let Some(root) = &self.root {
            if root.ab && root.size == 0 {
                return Err(Error::InvalidRequest(
                    "an A/B root layout needs an explicit root size".into(),
                ));
            }
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const FULL: &str = r#"
wipe: true
force: true
boot:
  device: /dev/sda
  size: 536870912
  kernel: https://example.com/vmlinuz
  initramfs: https://example.com/initramfs.xz
  cmdline: console=ttyS0
root:
  device: /dev/sda
  size: 2147483648
  rootfs: https://example.com/rootfs.tar.gz
  ab: true
ephemeral:
  device: /dev/sda
  size: 0
  assets:
    - source: "dir:/lib/kubelet"
    - source: "link:/etc/kubernetes:/var/etc/kubernetes"
extra_devices:
  - device: /dev/sdb
    partitions:
      - size: 0
        mount_point: /var/mnt/extra
fetch_timeout: 60
"#;

    #[test]
    fn test_parse_full_request() {
        let request = InstallRequest::from_yaml(FULL).unwrap();
        assert!(request.wipe);
        let boot = request.boot.as_ref().unwrap();
        assert_eq!(boot.device, Path::new("/dev/sda"));
        assert_eq!(boot.mount_point, Path::new("/boot"));
        assert_eq!(boot.cmdline, "console=ttyS0");
        assert!(request.root.as_ref().unwrap().ab);
        assert_eq!(request.ephemeral.assets.len(), 2);
        assert_eq!(request.ephemeral.mount_point, Path::new("/var"));
        assert_eq!(request.extra_devices[0].partitions[0].size, 0);
        assert_eq!(request.fetch_timeout, 60);
        assert_eq!(request.boot_stub, Path::new(DEFAULT_BOOT_STUB));
    }

    #[test]
    fn test_minimal_request_defaults() {
        let request = InstallRequest::from_yaml("ephemeral: { device: /dev/vda }").unwrap();
        assert!(!request.wipe);
        assert!(request.boot.is_none());
        assert!(request.root.is_none());
        assert_eq!(request.ephemeral.size, 0);
        assert_eq!(request.fetch_timeout, DEFAULT_FETCH_TIMEOUT);
    }

    #[test]
    fn test_rejects_bad_documents() {
        assert!(matches!(
            InstallRequest::from_yaml("wipe: true"),
            Err(Error::Config(_))
        ));
        assert!(matches!(
            InstallRequest::from_yaml("ephemeral: { device: /dev/vda }\nbogus: 1"),
            Err(Error::Config(_))
        ));
        assert!(matches!(
            InstallRequest::from_yaml("ephemeral: { device: /dev/vda }\nfetch_timeout: 0"),
            Err(Error::InvalidRequest(_))
        ));
        assert!(matches!(
            InstallRequest::from_yaml(
                "ephemeral: { device: /dev/vda }\nroot: { device: /dev/vda, size: 0, ab: true }"
            ),
            Err(Error::InvalidRequest(_))
        ));
    }
}
