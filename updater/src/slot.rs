//! A/B root slots

use std::fmt;

use cairn_core::cmdline::Cmdline;
use cairn_installer::target::labels;

use crate::error::{Error, Result};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Slot {
    A,
    B,
}

impl Slot {
    pub fn other(self) -> Self {
        match self {
            Self::A => Self::B,
            Self::B => Self::A,
        }
    }

    /// Name used on the kernel command line, as the extlinux label and as
    /// the boot partition directory
    pub fn name(self) -> &'static str {
        match self {
            Self::A => "A",
            Self::B => "B",
        }
    }

    /// Partition and filesystem label
    pub fn label(self) -> &'static str {
        match self {
            Self::A => labels::ROOT_A,
            Self::B => labels::ROOT_B,
        }
    }

    pub fn parse(value: &str) -> Result<Self> {
        match value {
            "A" => Ok(Self::A),
            "B" => Ok(Self::B),
            other => Err(Error::UnknownSlot(other.to_string())),
        }
    }

    /// Slot named by `param` on the command line; slot A when absent
    pub fn from_cmdline(cmdline: &Cmdline, param: &str) -> Result<Self> {
        match cmdline.get(param) {
            Some(value) => Self::parse(value),
            None => Ok(Self::A),
        }
    }
}

impl fmt::Display for Slot {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())
    }
}
