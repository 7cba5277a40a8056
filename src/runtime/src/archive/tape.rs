//! Tar container access.
//!
//! Every lookup re-resolves the container and scans member headers in
//! storage order. No index is kept between calls, so memory stays bounded
//! regardless of how many members the container holds.

use std::io::{self, Read};
use std::path::Path;

use glob::Pattern;
use ova_import_core::error::{ImportError, Result};
use serde::Serialize;

use super::source::{ByteSource, ByteStream, Location};

/// Name and size of a container member.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct MemberInfo {
    pub name: String,
    pub size: u64,
}

/// Upper bound on the buffer reserved up front when reading a member fully.
const READ_RESERVE_LIMIT: u64 = 1024 * 1024;

/// A single open member of a tar container.
///
/// Reads yield exactly the member's bytes. A container that ends before
/// the declared size fails with `UnexpectedEof` rather than a short read.
/// The entry owns the container handle; dropping the entry releases it.
pub struct ArchiveEntry {
    name: String,
    size: u64,
    remaining: u64,
    reader: ByteStream,
}

impl ArchiveEntry {
    /// Base name of the member.
    pub fn name(&self) -> &str {
        &self.name
    }

    /// Size of the member in bytes.
    pub fn size(&self) -> u64 {
        self.size
    }
}

impl Read for ArchiveEntry {
    fn read(&mut self, buf: &mut [u8]) -> io::Result<usize> {
        if self.remaining == 0 || buf.is_empty() {
            return Ok(0);
        }

        let max = usize::try_from(self.remaining).map_or(buf.len(), |r| r.min(buf.len()));
        let n = self.reader.read(&mut buf[..max])?;
        if n == 0 {
            return Err(io::Error::new(
                io::ErrorKind::UnexpectedEof,
                format!(
                    "member {} ends {} bytes short of its declared size {}",
                    self.name, self.remaining, self.size
                ),
            ));
        }
        self.remaining -= n as u64;
        Ok(n)
    }
}

impl std::fmt::Debug for ArchiveEntry {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ArchiveEntry")
            .field("name", &self.name)
            .field("size", &self.size)
            .finish()
    }
}

/// A tar container (e.g. an `.ova` file) at a local or remote location.
#[derive(Clone)]
pub struct TapeArchive {
    location: Location,
    source: ByteSource,
}

impl TapeArchive {
    pub fn new(location: &str, source: ByteSource) -> Self {
        Self {
            location: Location::parse(location),
            source,
        }
    }

    pub fn location(&self) -> &Location {
        &self.location
    }

    /// Open the first member whose base name matches the shell glob
    /// `pattern` (`*`, `?`, `[...]`).
    pub async fn open(&self, pattern: &str) -> Result<ArchiveEntry> {
        let matcher = Pattern::new(pattern).map_err(|e| ImportError::InvalidPattern {
            pattern: pattern.to_string(),
            message: e.to_string(),
        })?;

        let (reader, length) = self.source.resolve(&self.location).await?;
        let location = self.location.to_string();
        let pattern = pattern.to_string();

        let entry = tokio::task::spawn_blocking(move || {
            scan_for_member(reader, length, &matcher, &location)?.ok_or_else(|| {
                ImportError::not_found("archive member", format!("{} in {}", pattern, location))
            })
        })
        .await
        .map_err(|e| ImportError::Transport(format!("Archive scan task failed: {}", e)))??;

        tracing::debug!(
            archive = %self.location,
            member = %entry.name,
            size = entry.size,
            "Opened archive member"
        );
        Ok(entry)
    }

    /// Open the first member matching `pattern` and read it fully.
    pub async fn read_member(&self, pattern: &str) -> Result<(String, Vec<u8>)> {
        let mut entry = self.open(pattern).await?;
        let location = self.location.to_string();

        tokio::task::spawn_blocking(move || {
            let reserve = usize::try_from(entry.size.min(READ_RESERVE_LIMIT)).unwrap_or(0);
            let mut content = Vec::with_capacity(reserve);
            entry
                .read_to_end(&mut content)
                .map_err(|e| scan_error(&location, e))?;
            Ok((entry.name, content))
        })
        .await
        .map_err(|e| ImportError::Transport(format!("Archive read task failed: {}", e)))?
    }

    /// List all regular members in storage order.
    pub async fn list(&self) -> Result<Vec<MemberInfo>> {
        let (reader, length) = self.source.resolve(&self.location).await?;
        let location = self.location.to_string();

        tokio::task::spawn_blocking(move || list_members(reader, length, &location))
            .await
            .map_err(|e| ImportError::Transport(format!("Archive scan task failed: {}", e)))?
    }
}

/// Scan headers until one matches. On a match the container reader is
/// left positioned at the member's data and handed to the entry.
fn scan_for_member(
    reader: ByteStream,
    length: u64,
    matcher: &Pattern,
    location: &str,
) -> Result<Option<ArchiveEntry>> {
    let mut archive = tar::Archive::new(reader);
    let mut found: Option<(String, u64)> = None;

    {
        let entries = archive.entries().map_err(|e| scan_error(location, e))?;
        for entry in entries {
            let entry = entry.map_err(|e| scan_error(location, e))?;
            if entry.header().entry_type().is_dir() {
                continue;
            }

            let path = entry.path().map_err(|e| scan_error(location, e))?;
            let Some(name) = base_name(&path) else {
                continue;
            };

            if matcher.matches(&name) {
                check_bounds(&entry, &name, length, location)?;
                found = Some((name, entry.size()));
                break;
            }
        }
    }

    Ok(found.map(|(name, size)| ArchiveEntry {
        name,
        size,
        remaining: size,
        reader: archive.into_inner(),
    }))
}

fn list_members(reader: ByteStream, length: u64, location: &str) -> Result<Vec<MemberInfo>> {
    let mut archive = tar::Archive::new(reader);
    let mut members = Vec::new();

    for entry in archive.entries().map_err(|e| scan_error(location, e))? {
        let entry = entry.map_err(|e| scan_error(location, e))?;
        if entry.header().entry_type().is_dir() {
            continue;
        }
        let path = entry.path().map_err(|e| scan_error(location, e))?;
        if let Some(name) = base_name(&path) {
            check_bounds(&entry, &name, length, location)?;
            members.push(MemberInfo {
                name,
                size: entry.size(),
            });
        }
    }

    Ok(members)
}

/// Reject a member whose declared data runs past the end of the container.
fn check_bounds<R: Read>(
    entry: &tar::Entry<'_, R>,
    name: &str,
    length: u64,
    location: &str,
) -> Result<()> {
    let end = entry.raw_file_position().checked_add(entry.size());
    match end {
        Some(end) if end <= length => Ok(()),
        _ => Err(ImportError::CorruptArchive {
            location: location.to_string(),
            message: format!(
                "member {} declares {} bytes, past the end of a {} byte container",
                name,
                entry.size(),
                length
            ),
        }),
    }
}

fn base_name(path: &Path) -> Option<String> {
    path.file_name().map(|n| n.to_string_lossy().into_owned())
}

/// Classify an I/O error raised while walking the container. Connection
/// failures come from the remote transport; everything else means the
/// container itself is unreadable.
fn scan_error(location: &str, err: io::Error) -> ImportError {
    match err.kind() {
        io::ErrorKind::ConnectionAborted
        | io::ErrorKind::ConnectionReset
        | io::ErrorKind::TimedOut
        | io::ErrorKind::BrokenPipe => {
            ImportError::Transport(format!("Reading {}: {}", location, err))
        }
        _ => ImportError::CorruptArchive {
            location: location.to_string(),
            message: err.to_string(),
        },
    }
}
