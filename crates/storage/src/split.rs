//! File splitter
//!
//! Cuts a file into `<path>.part001`, `<path>.part002`, ... each at most
//! `max_part_bytes` long. Concatenating the parts in numeric order
//! reproduces the original byte for byte.
//!
//! # Crash Safety
//!
//! 1. Each part is written completely and fsynced before the next one starts
//! 2. The original is removed only after the last part is on disk
//! 3. If any part fails, the parts written so far are removed and the
//!    original is left untouched
//!
//! A failure to remove the original is logged and ignored: the parts alone
//! are enough to reassemble it.

use std::fs::{File, OpenOptions};
use std::io::{self, BufReader, Read, Write};
use std::path::{Path, PathBuf};

use pgvault_core::{METADATA_FILE_NAME, PART_MARKER};
use tracing::{debug, info, warn};
use walkdir::WalkDir;

/// Path of part `number` of `original`
pub fn part_path(original: &Path, number: u32) -> PathBuf {
    let mut name = original.as_os_str().to_os_string();
    name.push(format!("{}{:03}", PART_MARKER, number));
    PathBuf::from(name)
}

/// Splits files into bounded-size parts
#[derive(Debug, Clone)]
pub struct FileSplitter {
    max_part_bytes: u64,
}

impl FileSplitter {
    /// Create a splitter producing parts of at most `max_part_bytes`
    ///
    /// A zero size is treated as one byte.
    pub fn new(max_part_bytes: u64) -> Self {
        FileSplitter {
            max_part_bytes: max_part_bytes.max(1),
        }
    }

    /// Create a splitter from a size in MiB
    pub fn from_mb(mb: u64) -> Self {
        Self::new(mb.saturating_mul(1 << 20))
    }

    /// Maximum bytes per part
    pub fn max_part_bytes(&self) -> u64 {
        self.max_part_bytes
    }

    /// Split one file into parts and remove the original
    ///
    /// An empty file produces no parts and is left in place.
    pub fn split_file(&self, path: &Path) -> Result<SplitInfo, SplitError> {
        let file = File::open(path).map_err(|source| SplitError::Read {
            path: path.to_path_buf(),
            source,
        })?;
        let mut reader = BufReader::new(file);
        let mut info = SplitInfo {
            original: path.to_path_buf(),
            parts: Vec::new(),
            bytes: 0,
        };

        loop {
            let number = info.parts.len() as u32 + 1;
            let part = part_path(path, number);
            match self.write_part(&mut reader, &part) {
                Ok(0) => break,
                Ok(written) => {
                    debug!(target: "pgvault::split", part = %part.display(), bytes = written, "Wrote part");
                    info.bytes += written;
                    info.parts.push(part);
                    if written < self.max_part_bytes {
                        break;
                    }
                }
                Err(e) => {
                    for written_part in &info.parts {
                        let _ = std::fs::remove_file(written_part);
                    }
                    return Err(e);
                }
            }
        }

        if info.parts.is_empty() {
            debug!(target: "pgvault::split", path = %path.display(), "Empty file, nothing to split");
            return Ok(info);
        }

        drop(reader);
        if let Err(e) = std::fs::remove_file(path) {
            warn!(
                target: "pgvault::split",
                path = %path.display(),
                error = %e,
                "Failed to remove original file after split"
            );
        }

        info!(
            target: "pgvault::split",
            path = %path.display(),
            parts = info.parts.len(),
            bytes = info.bytes,
            "Split file"
        );
        Ok(info)
    }

    /// Copy up to `max_part_bytes` from `reader` into a new part file
    ///
    /// Returns the number of bytes written. Nothing is created at EOF.
    fn write_part(&self, reader: &mut impl Read, part: &Path) -> Result<u64, SplitError> {
        let mut chunk = reader.by_ref().take(self.max_part_bytes);
        let mut first = [0u8; 8192];
        let n = read_some(&mut chunk, &mut first).map_err(|source| SplitError::Read {
            path: part.to_path_buf(),
            source,
        })?;
        if n == 0 {
            return Ok(0);
        }

        let write_err = |source| SplitError::WritePart {
            path: part.to_path_buf(),
            source,
        };
        let mut out = OpenOptions::new()
            .write(true)
            .create(true)
            .truncate(true)
            .open(part)
            .map_err(write_err)?;
        out.write_all(&first[..n]).map_err(write_err)?;
        let rest = io::copy(&mut chunk, &mut out).map_err(write_err)?;
        out.sync_all().map_err(write_err)?;
        Ok(n as u64 + rest)
    }

    /// Split every regular file under `root` larger than the threshold
    ///
    /// Skips the metadata document and files that already carry the part
    /// marker. A failure on one file is logged and the walk continues.
    /// Returns the originals that were split.
    pub fn split_large_files(&self, root: &Path) -> Result<Vec<SplitInfo>, SplitError> {
        let mut candidates = Vec::new();
        for entry in WalkDir::new(root).sort_by_file_name() {
            let entry = entry.map_err(|source| SplitError::Walk {
                path: root.to_path_buf(),
                source,
            })?;
            if !entry.file_type().is_file() {
                continue;
            }
            let name = entry.file_name().to_string_lossy();
            if name.contains(PART_MARKER) || name == METADATA_FILE_NAME {
                continue;
            }
            let len = entry
                .metadata()
                .map_err(|source| SplitError::Walk {
                    path: entry.path().to_path_buf(),
                    source,
                })?
                .len();
            if len > self.max_part_bytes {
                candidates.push((entry.into_path(), len));
            }
        }

        let mut split = Vec::with_capacity(candidates.len());
        for (path, len) in candidates {
            info!(
                target: "pgvault::split",
                path = %path.display(),
                size_mb = %format!("{:.2}", len as f64 / (1u64 << 20) as f64),
                "Splitting large file"
            );
            match self.split_file(&path) {
                Ok(info) => split.push(info),
                Err(e) => warn!(
                    target: "pgvault::split",
                    path = %path.display(),
                    error = %e,
                    "Failed to split file"
                ),
            }
        }
        Ok(split)
    }
}

/// Read until `buf` has data or EOF, retrying on interruption
fn read_some(reader: &mut impl Read, buf: &mut [u8]) -> io::Result<usize> {
    loop {
        match reader.read(buf) {
            Err(e) if e.kind() == io::ErrorKind::Interrupted => continue,
            other => return other,
        }
    }
}

/// Result of splitting one file
#[derive(Debug, Clone)]
pub struct SplitInfo {
    /// File that was split
    pub original: PathBuf,
    /// Parts in ascending order
    pub parts: Vec<PathBuf>,
    /// Total bytes written across parts
    pub bytes: u64,
}

/// Split errors
#[derive(Debug, thiserror::Error)]
pub enum SplitError {
    /// Source could not be read
    #[error("failed to read {}: {source}", .path.display())]
    Read {
        /// Path being read
        path: PathBuf,
        /// Underlying error
        source: io::Error,
    },

    /// Part could not be written
    #[error("failed to write part {}: {source}", .path.display())]
    WritePart {
        /// Part path
        path: PathBuf,
        /// Underlying error
        source: io::Error,
    },

    /// Directory walk failed
    #[error("failed to walk {}: {source}", .path.display())]
    Walk {
        /// Path being walked
        path: PathBuf,
        /// Underlying error
        source: walkdir::Error,
    },
}
