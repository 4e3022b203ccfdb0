//! File assembler
//!
//! Reverses the splitter: walks a directory tree, groups `<name>.partNNN`
//! files by the original they came from and concatenates each group in
//! ascending part number.
//!
//! # Ordering
//!
//! Parts sort by the number after the last `.part` marker. A suffix that is
//! not a number sorts as 0 and keeps its walk order among other zeros.
//!
//! # Failure Semantics
//!
//! Parts are removed only after the whole concatenation has been written and
//! fsynced. A failure mid-stream leaves every part in place so the assembly
//! can be retried; the next attempt truncates the partial destination.

use std::collections::BTreeMap;
use std::fs::{File, OpenOptions};
use std::io;
use std::path::{Path, PathBuf};

use pgvault_core::PART_MARKER;
use tracing::{debug, info, warn};
use walkdir::WalkDir;

/// Numeric suffix of a part file name, 0 when absent or malformed
pub fn part_number(path: &Path) -> u32 {
    let Some(name) = path.file_name().map(|n| n.to_string_lossy()) else {
        return 0;
    };
    match name.rfind(PART_MARKER) {
        Some(idx) => name[idx + PART_MARKER.len()..].parse().unwrap_or(0),
        None => 0,
    }
}

/// Original path a part file belongs to, if the name carries the marker
fn part_origin(path: &Path) -> Option<PathBuf> {
    let name = path.file_name()?.to_string_lossy();
    let idx = name.rfind(PART_MARKER)?;
    Some(path.with_file_name(&name[..idx]))
}

/// Reassembles split files
#[derive(Debug, Clone, Default)]
pub struct FileAssembler;

impl FileAssembler {
    /// Create an assembler
    pub fn new() -> Self {
        FileAssembler
    }

    /// Assemble every split file under `root`
    ///
    /// A tree without parts is a successful no-op.
    pub fn assemble_files(&self, root: &Path) -> Result<AssembleInfo, AssembleError> {
        info!(target: "pgvault::assemble", root = %root.display(), "Assembling split files");

        let mut groups: BTreeMap<PathBuf, Vec<PathBuf>> = BTreeMap::new();
        for entry in WalkDir::new(root).sort_by_file_name() {
            let entry = entry.map_err(|source| AssembleError::Walk {
                path: root.to_path_buf(),
                source,
            })?;
            if entry.file_type().is_dir() {
                continue;
            }
            if let Some(original) = part_origin(entry.path()) {
                groups.entry(original).or_default().push(entry.into_path());
            }
        }

        let mut info = AssembleInfo::default();
        if groups.is_empty() {
            debug!(target: "pgvault::assemble", root = %root.display(), "No split files found");
            return Ok(info);
        }

        for (original, parts) in groups {
            info.parts_consumed += parts.len();
            info.bytes += self.assemble_one(&original, parts)?;
            info.files.push(original);
        }
        Ok(info)
    }

    /// Concatenate `parts` into `original` and remove the parts
    ///
    /// Returns the number of bytes written.
    pub fn assemble_one(&self, original: &Path, mut parts: Vec<PathBuf>) -> Result<u64, AssembleError> {
        info!(
            target: "pgvault::assemble",
            path = %original.display(),
            parts = parts.len(),
            "Assembling file"
        );
        parts.sort_by_key(|p| part_number(p));

        let write_err = |source| AssembleError::Write {
            path: original.to_path_buf(),
            source,
        };
        let mut out = OpenOptions::new()
            .write(true)
            .create(true)
            .truncate(true)
            .open(original)
            .map_err(write_err)?;

        let mut total = 0u64;
        for part in &parts {
            let mut input = File::open(part).map_err(|source| AssembleError::ReadPart {
                path: part.clone(),
                source,
            })?;
            total += io::copy(&mut input, &mut out).map_err(write_err)?;
        }
        out.sync_all().map_err(write_err)?;
        drop(out);

        for part in &parts {
            if let Err(e) = std::fs::remove_file(part) {
                warn!(
                    target: "pgvault::assemble",
                    part = %part.display(),
                    error = %e,
                    "Failed to remove part"
                );
            }
        }

        debug!(target: "pgvault::assemble", path = %original.display(), bytes = total, "Assembled and cleaned up");
        Ok(total)
    }
}

/// Result of assembling a directory tree
#[derive(Debug, Clone, Default)]
pub struct AssembleInfo {
    /// Originals that were reassembled
    pub files: Vec<PathBuf>,
    /// Part files consumed
    pub parts_consumed: usize,
    /// Bytes written across all originals
    pub bytes: u64,
}

/// Assembly errors
#[derive(Debug, thiserror::Error)]
pub enum AssembleError {
    /// Directory walk failed
    #[error("failed to walk {}: {source}", .path.display())]
    Walk {
        /// Root being walked
        path: PathBuf,
        /// Underlying error
        source: walkdir::Error,
    },

    /// A part could not be opened
    #[error("failed to read part {}: {source}", .path.display())]
    ReadPart {
        /// Part path
        path: PathBuf,
        /// Underlying error
        source: io::Error,
    },

    /// The destination could not be written
    #[error("failed to assemble {}: {source}", .path.display())]
    Write {
        /// Destination path
        path: PathBuf,
        /// Underlying error
        source: io::Error,
    },
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::tempdir;

    #[test]
    fn test_part_number() {
        assert_eq!(part_number(Path::new("/x/foo.part001")), 1);
        assert_eq!(part_number(Path::new("/x/foo.part010")), 10);
        assert_eq!(part_number(Path::new("/x/foo.partial.part002")), 2);
        assert_eq!(part_number(Path::new("/x/foo.partXYZ")), 0);
        assert_eq!(part_number(Path::new("/x/foo")), 0);
    }

    #[test]
    fn test_part_origin_uses_last_marker() {
        assert_eq!(
            part_origin(Path::new("/x/a.part.b.part003")),
            Some(PathBuf::from("/x/a.part.b"))
        );
        assert_eq!(part_origin(Path::new("/x/plain.dat")), None);
    }

    #[test]
    fn test_assembles_in_numeric_order() {
        let dir = tempdir().unwrap();
        let base = dir.path().join("foo");
        // Written out of order on purpose
        std::fs::write(dir.path().join("foo.part010"), b"C").unwrap();
        std::fs::write(dir.path().join("foo.part002"), b"B").unwrap();
        std::fs::write(dir.path().join("foo.part001"), b"A").unwrap();

        let info = FileAssembler::new().assemble_files(dir.path()).unwrap();
        assert_eq!(info.files, vec![base.clone()]);
        assert_eq!(info.parts_consumed, 3);
        assert_eq!(std::fs::read(&base).unwrap(), b"ABC");
        assert!(!dir.path().join("foo.part001").exists());
        assert!(!dir.path().join("foo.part010").exists());
    }

    #[test]
    fn test_malformed_suffix_sorts_first() {
        let dir = tempdir().unwrap();
        std::fs::write(dir.path().join("f.part002"), b"2").unwrap();
        std::fs::write(dir.path().join("f.partbad"), b"?").unwrap();
        std::fs::write(dir.path().join("f.part001"), b"1").unwrap();

        FileAssembler::new().assemble_files(dir.path()).unwrap();
        assert_eq!(std::fs::read(dir.path().join("f")).unwrap(), b"?12");
    }

    #[test]
    fn test_no_parts_is_noop() {
        let dir = tempdir().unwrap();
        std::fs::write(dir.path().join("whole.dat"), b"data").unwrap();

        let info = FileAssembler::new().assemble_files(dir.path()).unwrap();
        assert!(info.files.is_empty());
        assert_eq!(std::fs::read(dir.path().join("whole.dat")).unwrap(), b"data");
    }

    #[test]
    fn test_groups_per_directory() {
        let dir = tempdir().unwrap();
        let sub = dir.path().join("wal");
        std::fs::create_dir_all(&sub).unwrap();
        std::fs::write(dir.path().join("a.part001"), b"top").unwrap();
        std::fs::write(sub.join("a.part001"), b"nested").unwrap();

        let info = FileAssembler::new().assemble_files(dir.path()).unwrap();
        assert_eq!(info.files.len(), 2);
        assert_eq!(std::fs::read(dir.path().join("a")).unwrap(), b"top");
        assert_eq!(std::fs::read(sub.join("a")).unwrap(), b"nested");
    }

    #[test]
    fn test_missing_part_keeps_remaining_parts() {
        let dir = tempdir().unwrap();
        let first = dir.path().join("g.part001");
        std::fs::write(&first, b"one").unwrap();
        let ghost = dir.path().join("g.part002");

        let result =
            FileAssembler::new().assemble_one(&dir.path().join("g"), vec![first.clone(), ghost]);
        assert!(matches!(result, Err(AssembleError::ReadPart { .. })));
        assert!(first.exists());
    }
}
