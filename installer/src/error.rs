//! Installer errors

use std::io;
use std::path::PathBuf;

#[derive(Debug, thiserror::Error)]
pub enum Error {
    #[error(transparent)]
    Core(#[from] cairn_core::Error),

    /// The server answered with something other than 200
    #[error("fetching {url} failed with HTTP status {status}")]
    AssetFetch { url: String, status: u16 },

    /// Transport failure talking to an asset server
    #[error("HTTP transport error: {0}")]
    Http(#[from] reqwest::Error),

    #[error("I/O error on {}: {source}", path.display())]
    Io {
        path: PathBuf,
        #[source]
        source: io::Error,
    },

    #[error("invalid install request: {0}")]
    Config(#[from] serde_yaml::Error),

    /// The request parsed but describes an impossible layout
    #[error("invalid install request: {0}")]
    InvalidRequest(String),

    /// Asset source with an unsupported scheme or malformed directive
    #[error("invalid asset source {0:?}")]
    InvalidAsset(String),

    #[error("boot stub {} is {len} bytes, expected 440", path.display())]
    InvalidBootStub { path: PathBuf, len: usize },
}

pub type Result<T> = std::result::Result<T, Error>;

impl Error {
    pub fn io(path: impl Into<PathBuf>, source: io::Error) -> Self {
        Self::Io {
            path: path.into(),
            source,
        }
    }
}
