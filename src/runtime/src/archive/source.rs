//! Byte sources for appliance archives.
//!
//! A location string is either a filesystem path or an `http(s)://` URL.
//! Local paths are opened directly; URLs go through an injected
//! [`RemoteFetch`] transport.

use std::fs::File;
use std::io::{self, Read};
use std::path::{Path, PathBuf};
use std::sync::Arc;

use async_trait::async_trait;
use ova_import_core::error::{ImportError, Result};

/// A readable, owned byte stream.
pub type ByteStream = Box<dyn Read + Send>;

/// Where an archive lives.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Location {
    Local(PathBuf),
    Remote(String),
}

impl Location {
    /// Classify a location string. The scheme check is a case-sensitive
    /// prefix match; anything that is not `http://` or `https://` is a path.
    pub fn parse(location: &str) -> Self {
        if location.starts_with("http://") || location.starts_with("https://") {
            Self::Remote(location.to_string())
        } else {
            Self::Local(PathBuf::from(location))
        }
    }

    pub fn is_remote(&self) -> bool {
        matches!(self, Self::Remote(_))
    }
}

impl std::fmt::Display for Location {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Local(path) => write!(f, "{}", path.display()),
            Self::Remote(url) => f.write_str(url),
        }
    }
}

/// Transport used to fetch remote archives.
///
/// The returned reader may block on network I/O, so it must only be
/// consumed from a blocking context (e.g. `tokio::task::spawn_blocking`).
#[async_trait]
pub trait RemoteFetch: Send + Sync {
    /// Open `url` for reading. Returns the stream and its byte length.
    async fn fetch(&self, url: &str) -> Result<(ByteStream, u64)>;
}

/// Resolves locations into readable streams with a known length.
#[derive(Clone, Default)]
pub struct ByteSource {
    fetcher: Option<Arc<dyn RemoteFetch>>,
}

impl ByteSource {
    /// A source that only understands local paths.
    pub fn local_only() -> Self {
        Self { fetcher: None }
    }

    /// A source that fetches remote locations through `fetcher`.
    pub fn with_fetcher(fetcher: Arc<dyn RemoteFetch>) -> Self {
        Self {
            fetcher: Some(fetcher),
        }
    }

    pub fn supports_remote(&self) -> bool {
        self.fetcher.is_some()
    }

    /// Open `location`, returning the stream and its length.
    pub async fn resolve(&self, location: &Location) -> Result<(ByteStream, u64)> {
        match location {
            Location::Local(path) => open_local(path),
            Location::Remote(url) => {
                let fetcher = self.fetcher.as_ref().ok_or_else(|| {
                    ImportError::Unsupported(format!(
                        "remote location {url} requested but no remote transport is configured"
                    ))
                })?;
                tracing::debug!(url = %url, "Fetching remote archive");
                fetcher.fetch(url).await
            }
        }
    }
}

fn open_local(path: &Path) -> Result<(ByteStream, u64)> {
    let file = File::open(path).map_err(|e| local_error(path, e))?;
    let size = file.metadata().map_err(|e| local_error(path, e))?.len();

    tracing::debug!(path = %path.display(), size, "Opened local archive");
    Ok((Box::new(file), size))
}

fn local_error(path: &Path, err: io::Error) -> ImportError {
    match err.kind() {
        io::ErrorKind::NotFound => ImportError::not_found("file", path.display().to_string()),
        io::ErrorKind::PermissionDenied => {
            ImportError::PermissionDenied(format!("{}: {}", path.display(), err))
        }
        _ => ImportError::Transport(format!("Failed to open {}: {}", path.display(), err)),
    }
}
