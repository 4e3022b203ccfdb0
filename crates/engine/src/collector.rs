//! Incremental WAL collection
//!
//! An incremental backup is the set of WAL segments written since the parent
//! backup, copied out of the shared archive into `<backup>/wal/`, plus a
//! schema snapshot for reference.
//!
//! # Algorithm
//!
//! 1. Ensure `<backup>/wal/` exists (fatal if not) and the archive exists
//! 2. Ask `pg_waldump` which segments cover `start..end`
//! 3. Copy the listed segments; on listing failure copy every segment-named
//!    file in the archive instead
//! 4. Save `schema.sql` and `extensions.sql` (best effort)
//!
//! Individual segments that are missing or fail to copy are skipped.

use std::path::{Path, PathBuf};
use std::sync::Arc;

use pgvault_core::{WalPosition, WAL_SUBDIR};
use pgvault_storage::copy_file;
use tracing::{debug, info, warn};

use crate::command::CommandRunner;
use crate::tools::PgTools;

/// Length of a WAL segment file name
pub const WAL_SEGMENT_NAME_LEN: usize = 24;

/// Schema snapshot file written into incremental backups
pub const SCHEMA_FILE_NAME: &str = "schema.sql";

/// Extension script written into incremental backups
pub const EXTENSIONS_FILE_NAME: &str = "extensions.sql";

/// True for names shaped like a WAL segment on timeline 0 or 1
pub fn is_wal_segment_name(name: &str) -> bool {
    name.len() == WAL_SEGMENT_NAME_LEN && (name.starts_with("0000") || name.starts_with("0001"))
}

/// Segment names from `pg_waldump` output
///
/// Takes the first field of each line, strips a `.partial` suffix and drops
/// timeline history files.
pub fn parse_wal_listing(stdout: &str) -> Vec<String> {
    stdout
        .lines()
        .filter_map(|line| line.split_whitespace().next())
        .map(|field| match field.find(".partial") {
            Some(idx) => &field[..idx],
            None => field,
        })
        .filter(|name| !name.is_empty() && !name.contains(".history"))
        .map(str::to_string)
        .collect()
}

/// Copies WAL segments from the archive into backups
#[derive(Clone)]
pub struct IncrementalCollector {
    archive_dir: PathBuf,
    tools: PgTools,
    runner: Arc<dyn CommandRunner>,
}

impl IncrementalCollector {
    /// Collector reading from `archive_dir`
    pub fn new(archive_dir: impl Into<PathBuf>, tools: PgTools, runner: Arc<dyn CommandRunner>) -> Self {
        IncrementalCollector {
            archive_dir: archive_dir.into(),
            tools,
            runner,
        }
    }

    /// The WAL archive directory
    pub fn archive_dir(&self) -> &Path {
        &self.archive_dir
    }

    /// Segments in the archive covering `start..end`
    pub fn resolve_wal_range(&self, start: &WalPosition, end: &WalPosition) -> Result<Vec<String>, CollectError> {
        let inv = self.tools.wal_listing(&self.archive_dir, start, end);
        let out = self.runner.run(&inv).map_err(|e| CollectError::Listing {
            reason: e.to_string(),
        })?;
        if !out.success() {
            return Err(CollectError::Listing {
                reason: out.failure_reason(),
            });
        }
        let files = parse_wal_listing(&out.stdout_lossy());
        debug!(target: "pgvault::wal", start = %start, end = %end, segments = files.len(), "Resolved WAL range");
        Ok(files)
    }

    /// Copy named segments from the archive into `dest_wal_dir`
    ///
    /// Returns the number copied. Missing or unreadable segments are skipped.
    pub fn copy_wal_files(&self, files: &[String], dest_wal_dir: &Path) -> usize {
        let mut copied = 0;
        for name in files {
            let src = self.archive_dir.join(name);
            if !src.exists() {
                debug!(target: "pgvault::wal", segment = %name, "WAL segment not in archive, skipping");
                continue;
            }
            match copy_file(&src, &dest_wal_dir.join(name)) {
                Ok(_) => copied += 1,
                Err(e) => warn!(
                    target: "pgvault::wal",
                    segment = %name,
                    error = %e,
                    "Failed to copy WAL segment"
                ),
            }
        }
        info!(target: "pgvault::wal", copied, requested = files.len(), "Copied WAL segments");
        copied
    }

    /// Copy every segment-named file in the archive into `dest_wal_dir`
    ///
    /// A missing archive copies nothing.
    pub fn copy_all_wal_files(&self, dest_wal_dir: &Path) -> Result<usize, CollectError> {
        if !self.archive_dir.exists() {
            debug!(target: "pgvault::wal", archive = %self.archive_dir.display(), "WAL archive does not exist");
            return Ok(0);
        }
        let read_err = |source| CollectError::ReadArchive {
            path: self.archive_dir.clone(),
            source,
        };

        let mut copied = 0;
        for entry in std::fs::read_dir(&self.archive_dir).map_err(read_err)? {
            let entry = entry.map_err(read_err)?;
            if entry.file_type().map(|t| t.is_dir()).unwrap_or(true) {
                continue;
            }
            let name = entry.file_name().to_string_lossy().into_owned();
            if !is_wal_segment_name(&name) {
                continue;
            }
            match copy_file(&entry.path(), &dest_wal_dir.join(&name)) {
                Ok(_) => copied += 1,
                Err(e) => warn!(
                    target: "pgvault::wal",
                    segment = %name,
                    error = %e,
                    "Failed to copy WAL segment"
                ),
            }
        }
        info!(target: "pgvault::wal", copied, "Copied all archived WAL segments");
        Ok(copied)
    }

    /// Collect the WAL for `start..end` into `backup_dir`
    pub fn collect(&self, start: &WalPosition, end: &WalPosition, backup_dir: &Path) -> Result<CollectInfo, CollectError> {
        let wal_dir = backup_dir.join(WAL_SUBDIR);
        std::fs::create_dir_all(&wal_dir).map_err(|source| CollectError::CreateDir {
            path: wal_dir.clone(),
            source,
        })?;
        if let Err(e) = std::fs::create_dir_all(&self.archive_dir) {
            warn!(
                target: "pgvault::wal",
                archive = %self.archive_dir.display(),
                error = %e,
                "Failed to create WAL archive directory"
            );
        }

        let info = match self.resolve_wal_range(start, end) {
            Ok(files) => CollectInfo {
                segments: self.copy_wal_files(&files, &wal_dir),
                copied_whole_archive: false,
            },
            Err(e) => {
                warn!(
                    target: "pgvault::wal",
                    error = %e,
                    "Could not resolve WAL range, copying the whole archive"
                );
                CollectInfo {
                    segments: self.copy_all_wal_files(&wal_dir)?,
                    copied_whole_archive: true,
                }
            }
        };
        Ok(info)
    }

    /// Save the schema and extension scripts into `backup_dir`
    ///
    /// Failures are logged only; an incremental backup is valid without them.
    pub fn save_schema_snapshot(&self, backup_dir: &Path) -> SchemaSnapshot {
        let mut snapshot = SchemaSnapshot::default();

        let schema_file = backup_dir.join(SCHEMA_FILE_NAME);
        match self.runner.run(&self.tools.dump_schema(&schema_file)) {
            Ok(out) if out.success() => snapshot.schema = Some(schema_file),
            Ok(out) => {
                warn!(target: "pgvault::backup", reason = %out.failure_reason(), "Schema dump failed");
                return snapshot;
            }
            Err(e) => {
                warn!(target: "pgvault::backup", error = %e, "Schema dump failed");
                return snapshot;
            }
        }

        let extensions_file = backup_dir.join(EXTENSIONS_FILE_NAME);
        match self.runner.run(&self.tools.extension_script(&extensions_file)) {
            Ok(out) if out.success() => snapshot.extensions = Some(extensions_file),
            Ok(out) => debug!(target: "pgvault::backup", reason = %out.failure_reason(), "Extension script failed"),
            Err(e) => debug!(target: "pgvault::backup", error = %e, "Extension script failed"),
        }
        snapshot
    }
}

/// Outcome of [`IncrementalCollector::collect`]
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct CollectInfo {
    /// Segments copied into the backup
    pub segments: usize,
    /// True when the range listing failed and the whole archive was copied
    pub copied_whole_archive: bool,
}

/// Files written by [`IncrementalCollector::save_schema_snapshot`]
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct SchemaSnapshot {
    /// Schema dump, if written
    pub schema: Option<PathBuf>,
    /// Extension script, if written
    pub extensions: Option<PathBuf>,
}

/// WAL collection errors
#[derive(Debug, thiserror::Error)]
pub enum CollectError {
    /// The backup's WAL directory could not be created
    #[error("failed to create WAL directory {}: {source}", .path.display())]
    CreateDir {
        /// Directory path
        path: PathBuf,
        /// Underlying error
        source: std::io::Error,
    },

    /// `pg_waldump` could not list the range
    #[error("failed to list WAL range: {reason}")]
    Listing {
        /// Tool failure description
        reason: String,
    },

    /// The archive could not be listed
    #[error("failed to read WAL archive {}: {source}", .path.display())]
    ReadArchive {
        /// Archive path
        path: PathBuf,
        /// Underlying error
        source: std::io::Error,
    },
}
