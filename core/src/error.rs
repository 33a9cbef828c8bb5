//! Error types for disk, partition table and filesystem operations.

use std::fmt;
use std::io;
use std::path::PathBuf;

use nix::errno::Errno;

/// Which of the two GPT checksums failed to verify.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CrcKind {
    /// CRC32 over the 92-byte header
    Header,
    /// CRC32 over the partition entry array
    Array,
}

impl fmt::Display for CrcKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Header => f.write_str("header"),
            Self::Array => f.write_str("partition array"),
        }
    }
}

/// Errors surfaced by the partitioning core
#[derive(Debug, thiserror::Error)]
pub enum Error {
    /// Open, read, write or stat failed on a file or device node
    #[error("I/O error on {}: {source}", path.display())]
    Io {
        path: PathBuf,
        #[source]
        source: io::Error,
    },

    /// A named ioctl returned an error
    #[error("ioctl {name} failed: {errno}")]
    Ioctl { name: &'static str, errno: Errno },

    /// BLKPG kept returning EBUSY for the whole retry budget
    #[error("kernel busy while performing {op} on partition {partition}")]
    KernelBusy { op: &'static str, partition: u32 },

    /// A literal GPT field did not have its mandated value
    #[error("invalid GPT: {0}")]
    GptInvalid(String),

    /// A GPT checksum did not match
    #[error("GPT {0} CRC32 mismatch")]
    GptCrcMismatch(CrcKind),

    /// Partition would not fit below the last usable LBA
    #[error("requested partition size {requested} bytes, available is {available} bytes")]
    OutOfSpace { requested: u64, available: u64 },

    /// Lookup by filesystem or partition label found nothing
    #[error("no device with label {0:?}")]
    UnknownPartitionLabel(String),

    /// External tool exited non-zero
    #[error("{command} failed (exit code {code:?}): {stderr}")]
    SubprocessFailed {
        command: String,
        code: Option<i32>,
        stderr: String,
    },

    /// Partition name longer than 36 UTF-16 code units
    #[error("partition name {0:?} exceeds 36 UTF-16 code units")]
    InvalidName(String),

    /// Field serialization or buffer arithmetic failed
    #[error("codec error: {0}")]
    Codec(String),

    /// The protective MBR is missing, so there is no GPT to load
    #[error("{} has no GUID partition table", .0.display())]
    NoPartitionTable(PathBuf),

    /// No populated partition has this number
    #[error("partition {0} not found")]
    PartitionNotFound(u32),

    /// Partition size rounds to zero blocks or ends before it starts
    #[error("invalid partition size {0}")]
    InvalidSize(u64),

    /// Only the last partition can grow
    #[error("partition {0} is not the last partition and cannot be resized")]
    UnsupportedResize(u32),

    /// Every entry slot is in use
    #[error("partition entry array is full")]
    TableFull,

    /// Textual GUID could not be parsed
    #[error("invalid GUID {0:?}")]
    InvalidGuid(String),
}

pub type Result<T> = std::result::Result<T, Error>;

impl Error {
    /// Wrap an `io::Error` with the path it happened on
    pub fn io(path: impl Into<PathBuf>, source: io::Error) -> Self {
        Self::Io {
            path: path.into(),
            source,
        }
    }

    /// True for failures that reading the backup header can recover from
    pub fn is_corruption(&self) -> bool {
        matches!(self, Self::GptInvalid(_) | Self::GptCrcMismatch(_))
    }
}
