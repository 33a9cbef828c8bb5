//! Upgrade errors

use std::path::PathBuf;

use crate::slot::Slot;

#[derive(Debug, thiserror::Error)]
pub enum Error {
    #[error(transparent)]
    Core(#[from] cairn_core::Error),

    #[error(transparent)]
    Install(#[from] cairn_installer::Error),

    /// The slot picked for installation is the one the system runs from
    #[error("slot {slot} on {} is in use", node.display())]
    SlotInUse { slot: Slot, node: PathBuf },

    /// The root slot kernel parameter names neither A nor B
    #[error("unknown root slot {0:?}")]
    UnknownSlot(String),
}

pub type Result<T> = std::result::Result<T, Error>;
