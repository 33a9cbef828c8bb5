//! Asset sources and their placement under a mount point
//!
//! A source is an `http(s)://` URL, a `file://` URL or absolute path, or one
//! of two directives: `dir:<path>` creates a directory and
//! `link:<name>:<target>` creates a symlink. Tarballs (`.tar`, `.tar.gz`,
//! `.tgz`) are unpacked instead of copied.

use std::fs::{self, DirBuilder, File};
use std::io::{self, Read};
use std::os::unix::fs::{symlink, DirBuilderExt, PermissionsExt};
use std::path::{Path, PathBuf};
use std::time::Duration;

use flate2::read::GzDecoder;
use log::{debug, info};
use reqwest::blocking::Client;
use reqwest::StatusCode;
use tar::Archive;

use crate::error::{Error, Result};
use crate::request::AssetSpec;

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Source {
    Url(String),
    Path(PathBuf),
    Dir(String),
    Link { name: String, target: String },
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Asset {
    pub source: Source,
    /// Path relative to the mount point; defaults to the source's basename
    pub destination: Option<String>,
}

impl Asset {
    pub fn parse(source: &str, destination: Option<&str>) -> Result<Self> {
        let invalid = || Error::InvalidAsset(source.to_string());

        let source = if source.starts_with("http://") || source.starts_with("https://") {
            Source::Url(source.to_string())
        } else if let Some(path) = source.strip_prefix("file://") {
            if !path.starts_with('/') {
                return Err(invalid());
            }
            Source::Path(PathBuf::from(path))
        } else if let Some(path) = source.strip_prefix("dir:") {
            if path.is_empty() {
                return Err(invalid());
            }
            Source::Dir(path.to_string())
        } else if let Some(rest) = source.strip_prefix("link:") {
            match rest.split_once(':') {
                Some((name, target)) if !name.is_empty() && !target.is_empty() => Source::Link {
                    name: name.to_string(),
                    target: target.to_string(),
                },
                _ => return Err(invalid()),
            }
        } else if source.starts_with('/') {
            Source::Path(PathBuf::from(source))
        } else {
            return Err(invalid());
        };

        Ok(Self {
            source,
            destination: destination.map(str::to_string),
        })
    }

    pub fn from_spec(spec: &AssetSpec) -> Result<Self> {
        Self::parse(&spec.source, spec.destination.as_deref())
    }

    /// Source as written, for logging
    pub fn describe(&self) -> String {
        match &self.source {
            Source::Url(url) => url.clone(),
            Source::Path(path) => path.display().to_string(),
            Source::Dir(path) => format!("dir:{}", path),
            Source::Link { name, target } => format!("link:{}:{}", name, target),
        }
    }

    /// Source path without any URL query or fragment
    fn name(&self) -> String {
        let full = self.describe();
        match full.split(['?', '#']).next() {
            Some(name) => name.to_string(),
            None => full,
        }
    }

    fn is_archive(&self) -> bool {
        if !matches!(self.source, Source::Url(_) | Source::Path(_)) {
            return false;
        }
        let name = self.name();
        name.ends_with(".tar") || name.ends_with(".tar.gz") || name.ends_with(".tgz")
    }

    fn is_gzip(&self) -> bool {
        let name = self.name();
        name.ends_with(".gz") || name.ends_with(".tgz")
    }

    fn basename(&self) -> String {
        let name = self.name();
        name.rsplit('/').next().unwrap_or_default().to_string()
    }
}

/// Resolve `path` below `root`, ignoring a leading slash
pub fn under(root: &Path, path: &str) -> PathBuf {
    root.join(path.trim_start_matches('/'))
}

/// Places assets, downloading them when needed
pub struct Fetcher {
    client: Client,
}

impl Fetcher {
    pub fn new(timeout: Duration) -> Result<Self> {
        let client = Client::builder().timeout(timeout).build()?;
        Ok(Self { client })
    }

    /// Write one asset below `root`
    pub fn place(&self, asset: &Asset, root: &Path) -> Result<()> {
        match &asset.source {
            Source::Dir(path) => make_dir(&under(root, path)),
            Source::Link { name, target } => make_link(&under(root, name), target),
            Source::Url(url) => {
                info!("downloading {}", url);
                let response = self.client.get(url).send()?;
                if response.status() != StatusCode::OK {
                    return Err(Error::AssetFetch {
                        url: url.clone(),
                        status: response.status().as_u16(),
                    });
                }
                store(asset, response, root)
            }
            Source::Path(path) => {
                info!("copying {}", path.display());
                let file = File::open(path).map_err(|e| Error::io(path, e))?;
                store(asset, file, root)
            }
        }
    }
}

fn store<R: Read>(asset: &Asset, mut reader: R, root: &Path) -> Result<()> {
    if asset.is_archive() {
        let dest = under(root, asset.destination.as_deref().unwrap_or("/"));
        info!("extracting {} to {}", asset.describe(), dest.display());
        fs::create_dir_all(&dest).map_err(|e| Error::io(&dest, e))?;
        return if asset.is_gzip() {
            unpack(GzDecoder::new(reader), &dest)
        } else {
            unpack(reader, &dest)
        };
    }

    let dest = match &asset.destination {
        Some(destination) => under(root, destination),
        None => under(root, &asset.basename()),
    };
    if let Some(parent) = dest.parent() {
        fs::create_dir_all(parent).map_err(|e| Error::io(parent, e))?;
    }
    let mut file = File::create(&dest).map_err(|e| Error::io(&dest, e))?;
    let written = io::copy(&mut reader, &mut file).map_err(|e| Error::io(&dest, e))?;
    file.sync_all().map_err(|e| Error::io(&dest, e))?;
    debug!("wrote {} bytes to {}", written, dest.display());
    Ok(())
}

fn unpack<R: Read>(reader: R, dest: &Path) -> Result<()> {
    let mut archive = Archive::new(reader);
    archive.set_overwrite(true);
    archive.set_preserve_permissions(true);
    archive.unpack(dest).map_err(|e| Error::io(dest, e))
}

fn make_dir(path: &Path) -> Result<()> {
    info!("creating directory {}", path.display());
    DirBuilder::new()
        .recursive(true)
        .mode(0o755)
        .create(path)
        .map_err(|e| Error::io(path, e))?;
    // umask may have narrowed the mode
    fs::set_permissions(path, fs::Permissions::from_mode(0o755)).map_err(|e| Error::io(path, e))
}

fn make_link(link: &Path, target: &str) -> Result<()> {
    info!("linking {} -> {}", link.display(), target);
    if let Some(parent) = link.parent() {
        fs::create_dir_all(parent).map_err(|e| Error::io(parent, e))?;
    }
    match symlink(target, link) {
        Err(e) if e.kind() == io::ErrorKind::AlreadyExists => Ok(()),
        other => other.map_err(|e| Error::io(link, e)),
    }
}
