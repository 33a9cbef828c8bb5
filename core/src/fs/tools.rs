//! Filesystem tool wrappers
//!
//! Every tool runs to completion with its output captured. A non-zero exit
//! becomes [`Error::SubprocessFailed`] carrying the tail of stderr.

use std::ffi::OsString;
use std::path::Path;
use std::process::{Command, Output};

use log::{debug, info};

use crate::error::{Error, Result};

/// Keep at most this much stderr in an error
const STDERR_TAIL: usize = 2048;

/// `mkfs.xfs -n ftype=1 [-f] [-L <label>] <device>`
///
/// `ftype=1` is required for overlayfs on top of XFS.
pub fn mkfs_xfs(device: &Path, label: Option<&str>, force: bool) -> Result<()> {
    info!("{}: creating xfs filesystem (label {:?})", device.display(), label);
    run("mkfs.xfs", &mkfs_xfs_args(device, label, force))
}

/// `mkfs.vfat -F 32 -n <label> <device>`
pub fn mkfs_vfat(device: &Path, label: &str) -> Result<()> {
    info!("{}: creating vfat filesystem (label {:?})", device.display(), label);
    run("mkfs.vfat", &mkfs_vfat_args(device, label))
}

/// `xfs_growfs -d <mount_point>`; the filesystem must be mounted
pub fn xfs_growfs(mount_point: &Path) -> Result<()> {
    info!("{}: growing xfs filesystem", mount_point.display());
    run(
        "xfs_growfs",
        &[OsString::from("-d"), mount_point.as_os_str().to_owned()],
    )
}

/// `extlinux --install <dir>`
pub fn extlinux_install(dir: &Path) -> Result<()> {
    info!("{}: installing extlinux", dir.display());
    run(
        "extlinux",
        &[OsString::from("--install"), dir.as_os_str().to_owned()],
    )
}

fn mkfs_xfs_args(device: &Path, label: Option<&str>, force: bool) -> Vec<OsString> {
    let mut args: Vec<OsString> = vec!["-n".into(), "ftype=1".into()];
    if force {
        args.push("-f".into());
    }
    if let Some(label) = label {
        args.push("-L".into());
        args.push(label.into());
    }
    args.push(device.into());
    args
}

fn mkfs_vfat_args(device: &Path, label: &str) -> Vec<OsString> {
    vec!["-F".into(), "32".into(), "-n".into(), label.into(), device.into()]
}

pub(crate) fn run(program: &str, args: &[OsString]) -> Result<()> {
    let command = command_line(program, args);
    debug!("running {}", command);

    let output = Command::new(program)
        .args(args)
        .output()
        .map_err(|e| Error::io(program, e))?;

    if !output.status.success() {
        return Err(output_failed(command, &output));
    }
    Ok(())
}

fn command_line(program: &str, args: &[OsString]) -> String {
    let mut line = program.to_string();
    for arg in args {
        line.push(' ');
        line.push_str(&arg.to_string_lossy());
    }
    line
}

fn output_failed(command: String, output: &Output) -> Error {
    let stderr = String::from_utf8_lossy(&output.stderr);
    let stderr = stderr.trim();
    let mut start = stderr.len().saturating_sub(STDERR_TAIL);
    while !stderr.is_char_boundary(start) {
        start += 1;
    }
    Error::SubprocessFailed {
        command,
        code: output.status.code(),
        stderr: stderr[start..].to_string(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn strings(args: Vec<OsString>) -> Vec<String> {
        args.into_iter().map(|a| a.to_string_lossy().into_owned()).collect()
    }

    // ==================== Argument forms ====================

    #[test]
    fn test_mkfs_xfs_args() {
        let dev = Path::new("/dev/sda3");
        assert_eq!(
            strings(mkfs_xfs_args(dev, None, false)),
            ["-n", "ftype=1", "/dev/sda3"]
        );
        assert_eq!(
            strings(mkfs_xfs_args(dev, Some("EPHEMERAL"), true)),
            ["-n", "ftype=1", "-f", "-L", "EPHEMERAL", "/dev/sda3"]
        );
    }

    #[test]
    fn test_mkfs_vfat_args() {
        assert_eq!(
            strings(mkfs_vfat_args(Path::new("/dev/sda1"), "ESP")),
            ["-F", "32", "-n", "ESP", "/dev/sda1"]
        );
    }

    // ==================== Process handling ====================

    #[test]
    fn test_run_success() {
        run("true", &[]).unwrap();
    }

    #[test]
    fn test_run_failure_keeps_code_and_stderr() {
        let args = [
            OsString::from("-c"),
            OsString::from("echo broken superblock >&2; exit 3"),
        ];
        let err = run("sh", &args).unwrap_err();
        match err {
            Error::SubprocessFailed {
                command,
                code,
                stderr,
            } => {
                assert!(command.starts_with("sh -c"));
                assert_eq!(code, Some(3));
                assert_eq!(stderr, "broken superblock");
            }
            other => panic!("unexpected error: {other}"),
        }
    }

    #[test]
    fn test_missing_program_is_io_error() {
        assert!(matches!(
            run("cairn-no-such-tool", &[]),
            Err(Error::Io { .. })
        ));
    }
}
