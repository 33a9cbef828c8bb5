//! Filesystem superblock probes
//!
//! Each known filesystem declares where its superblock lives, how large it is
//! and how to recognise it. Probing reads each candidate in turn and returns
//! the first match. A device that is too short for a candidate simply does
//! not match; only real I/O failures are errors.

pub mod iso9660;
pub mod vfat;
pub mod xfs;

use std::fmt;
use std::fs::File;
use std::io;
use std::os::unix::fs::FileExt;
use std::path::Path;

use log::debug;

use crate::error::{Error, Result};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Filesystem {
    Iso9660,
    Vfat,
    Xfs,
}

impl fmt::Display for Filesystem {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            Self::Iso9660 => "iso9660",
            Self::Vfat => "vfat",
            Self::Xfs => "xfs",
        })
    }
}

/// What a probe found
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Superblock {
    pub filesystem: Filesystem,
    pub label: String,
}

struct Prober {
    filesystem: Filesystem,
    offset: u64,
    size: usize,
    parse: fn(&[u8]) -> Option<String>,
}

const PROBERS: [Prober; 3] = [
    Prober {
        filesystem: Filesystem::Iso9660,
        offset: iso9660::OFFSET,
        size: iso9660::SIZE,
        parse: iso9660::parse,
    },
    Prober {
        filesystem: Filesystem::Vfat,
        offset: vfat::OFFSET,
        size: vfat::SIZE,
        parse: vfat::parse,
    },
    Prober {
        filesystem: Filesystem::Xfs,
        offset: xfs::OFFSET,
        size: xfs::SIZE,
        parse: xfs::parse,
    },
];

/// Probe the device or image at `path`
pub fn probe_path(path: &Path) -> Result<Option<Superblock>> {
    let file = File::open(path).map_err(|e| Error::io(path, e))?;
    probe(&file, path)
}

/// Probe an open file; `path` is only used for error reporting
pub fn probe(file: &File, path: &Path) -> Result<Option<Superblock>> {
    for prober in &PROBERS {
        let mut buf = vec![0u8; prober.size];
        match file.read_exact_at(&mut buf, prober.offset) {
            Ok(()) => {}
            Err(e) if e.kind() == io::ErrorKind::UnexpectedEof => continue,
            Err(e) => return Err(Error::io(path, e)),
        }
        if let Some(label) = (prober.parse)(&buf) {
            debug!(
                "{}: found {} superblock, label {:?}",
                path.display(),
                prober.filesystem,
                label
            );
            return Ok(Some(Superblock {
                filesystem: prober.filesystem,
                label,
            }));
        }
    }
    Ok(None)
}

/// Strip the space and NUL padding of a fixed-width label field
pub(crate) fn trim_label(raw: &[u8]) -> String {
    String::from_utf8_lossy(raw)
        .trim_end_matches(|c| c == ' ' || c == '\0')
        .to_string()
}
