//! Cairn Core Library
//!
//! Block devices, GUID partition tables, superblock probes and the host
//! filesystem tooling the installer and updater are built on.
//! Linux userland only.

#![allow(clippy::new_without_default)]

pub mod cmdline;
pub mod codec;
pub mod discovery;
pub mod disk;
pub mod error;
pub mod fs;
pub mod gpt;
pub mod probe;

pub use error::{Error, Result};
