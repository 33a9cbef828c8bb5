//! Cairn Updater
//!
//! A/B root slot upgrades on an installed disk.

pub mod error;
pub mod slot;
pub mod upgrade;

pub use error::{Error, Result};
pub use slot::Slot;
pub use upgrade::{UpgradeOptions, UpgradeRequest, Upgrader};
