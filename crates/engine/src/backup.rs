//! Backup orchestration
//!
//! Produces one backup directory per run under the configured output root.
//!
//! # Algorithm
//!
//! 1. Decide the kind: incremental only when incremental mode is on and the
//!    most recent backup records a WAL end position
//! 2. Create `<root>/<kind>_<YYYYMMDD_HHMMSS>`; an existing directory is an error
//! 3. Full: `pg_dump` the database, then record the WAL position
//! 4. Incremental: read the current WAL position, copy WAL for
//!    `parent.wal_end..current` and save a schema snapshot
//! 5. Write `backup_metadata.json`
//! 6. Split files above the size threshold
//! 7. Sweep backups outside the retention window
//!
//! # Fallback
//!
//! Any failure on the incremental path turns the run into a full backup.
//! The partial `wal/` directory is removed and the directory is renamed to
//! `full_<stamp>` before dumping, so the name always matches the metadata.
//!
//! # Failure Semantics
//!
//! Only directory creation and the full dump are fatal. Metadata, split and
//! sweep failures are logged and the run still succeeds.

use std::fmt;
use std::path::{Path, PathBuf};
use std::sync::Arc;

use chrono::{DateTime, Utc};
use pgvault_core::{
    BackupConfig, BackupMetadata, BackupName, BackupType, Config, ConnectionConfig, ToolConfig,
    WalPosition, WAL_SUBDIR,
};
use pgvault_storage::{dir_stats, find_latest_backup, FileSplitter, RetentionSweeper};
use tracing::{debug, error, info, warn};

use crate::collector::IncrementalCollector;
use crate::command::{CommandError, CommandRunner};
use crate::tools::PgTools;
use crate::wal_position::WalPositionTracker;

/// Result of one backup run
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct BackupReport {
    /// Backup directory, after any fallback rename
    pub dir: PathBuf,
    /// Metadata recorded for the backup
    pub metadata: BackupMetadata,
    /// Files split into parts
    pub split_files: usize,
    /// Old backups removed by the retention sweep
    pub swept: usize,
}

/// Creates full and incremental backups
pub struct BackupOrchestrator {
    config: BackupConfig,
    tools: PgTools,
    runner: Arc<dyn CommandRunner>,
    tracker: WalPositionTracker,
    collector: IncrementalCollector,
    splitter: Option<FileSplitter>,
    sweeper: RetentionSweeper,
    incremental: bool,
    last_backup_dir: Option<PathBuf>,
    last_wal_position: Option<WalPosition>,
}

impl BackupOrchestrator {
    /// Orchestrator for `postgres` writing per `config`
    pub fn new(
        postgres: ConnectionConfig,
        config: BackupConfig,
        tool_config: ToolConfig,
        runner: Arc<dyn CommandRunner>,
    ) -> Self {
        let tools = PgTools::new(postgres, tool_config);
        BackupOrchestrator {
            tracker: WalPositionTracker::new(tools.clone(), runner.clone()),
            collector: IncrementalCollector::new(config.wal_archive_dir(), tools.clone(), runner.clone()),
            splitter: config.split_threshold_bytes().map(FileSplitter::new),
            sweeper: RetentionSweeper::new(config.output_dir.clone(), config.retention_days),
            incremental: false,
            last_backup_dir: None,
            last_wal_position: None,
            config,
            tools,
            runner,
        }
    }

    /// Orchestrator built from a root configuration document
    pub fn from_config(config: &Config, runner: Arc<dyn CommandRunner>) -> Self {
        Self::new(
            config.postgres.clone(),
            config.backup.clone(),
            config.tools.clone(),
            runner,
        )
    }

    /// Enable or disable incremental mode
    pub fn set_incremental_mode(&mut self, enabled: bool) {
        self.incremental = enabled;
    }

    /// True when incremental mode is on
    pub fn is_incremental(&self) -> bool {
        self.incremental
    }

    /// Backup settings
    pub fn config(&self) -> &BackupConfig {
        &self.config
    }

    /// Directory of the most recent backup seen or created
    pub fn last_backup_dir(&self) -> Option<&Path> {
        self.last_backup_dir.as_deref()
    }

    /// WAL end position of the most recent backup seen or created
    pub fn last_wal_position(&self) -> Option<&WalPosition> {
        self.last_wal_position.as_ref()
    }

    /// Refresh the cached parent from disk
    ///
    /// Returns true when the most recent backup records a WAL end position
    /// and can therefore parent an incremental backup.
    pub fn find_last_backup(&mut self) -> bool {
        let latest = match find_latest_backup(&self.config.output_dir) {
            Ok(Some(entry)) => entry,
            Ok(None) => {
                debug!(target: "pgvault::backup", "No previous backup found");
                return false;
            }
            Err(e) => {
                debug!(
                    target: "pgvault::backup",
                    root = %self.config.output_dir.display(),
                    error = %e,
                    "Cannot list backup directory"
                );
                return false;
            }
        };

        info!(target: "pgvault::backup", dir = %latest.path.display(), "Found last backup");
        self.last_backup_dir = Some(latest.path.clone());
        self.last_wal_position = None;

        match BackupMetadata::load(&latest.path) {
            Ok(metadata) => match metadata.wal_end {
                Some(position) => {
                    info!(target: "pgvault::backup", wal_position = %position, "Last backup WAL position");
                    self.last_wal_position = Some(position);
                    true
                }
                None => {
                    debug!(target: "pgvault::backup", dir = %latest.path.display(), "Last backup has no WAL end position");
                    false
                }
            },
            Err(e) => {
                debug!(target: "pgvault::backup", error = %e, "Cannot read last backup metadata");
                false
            }
        }
    }

    /// Run one backup stamped with the current time
    pub fn create_backup(&mut self) -> Result<BackupReport, BackupError> {
        self.create_backup_at(Utc::now())
    }

    /// Run one backup stamped with `started`
    pub fn create_backup_at(&mut self, started: DateTime<Utc>) -> Result<BackupReport, BackupError> {
        let backup_type = if self.incremental && self.find_last_backup() {
            BackupType::Incremental
        } else {
            BackupType::Full
        };

        let name = BackupName::at(backup_type, &started);
        std::fs::create_dir_all(&self.config.output_dir).map_err(|source| BackupError::CreateDir {
            path: self.config.output_dir.clone(),
            source,
        })?;
        // A second run within the same second must not reuse the directory
        let dir = self.config.output_dir.join(name.to_string());
        std::fs::create_dir(&dir).map_err(|source| BackupError::CreateDir {
            path: dir.clone(),
            source,
        })?;
        info!(target: "pgvault::backup", backup_type = %backup_type, dir = %dir.display(), "Creating backup");

        let (dir, metadata) = match backup_type {
            BackupType::Full => {
                let metadata = self.create_full_backup(&dir, started)?;
                (dir, metadata)
            }
            BackupType::Incremental => self.create_incremental_backup(dir, &name, started)?,
        };

        if let Err(e) = metadata.save(&dir) {
            warn!(target: "pgvault::backup", dir = %dir.display(), error = %e, "Failed to save backup metadata");
        }
        let split_files = self.split_large_files(&dir);
        let swept = self.sweep_old_backups();

        self.last_backup_dir = Some(dir.clone());
        self.last_wal_position = metadata.wal_end.clone();

        info!(
            target: "pgvault::backup",
            backup_type = %metadata.backup_type,
            dir = %dir.display(),
            size = metadata.size,
            files = metadata.file_count,
            "Backup completed"
        );
        Ok(BackupReport {
            dir,
            metadata,
            split_files,
            swept,
        })
    }

    fn create_full_backup(&self, dir: &Path, started: DateTime<Utc>) -> Result<BackupMetadata, BackupError> {
        info!(target: "pgvault::backup", dir = %dir.display(), jobs = self.config.jobs, "Starting full dump");
        let out = self
            .runner
            .run(&self.tools.dump_directory(dir, self.config.jobs))?;
        if !out.success() {
            return Err(BackupError::DumpFailed {
                status: out.status_description(),
                stderr: out.stderr_lossy(),
            });
        }

        let mut metadata = with_dir_stats(BackupMetadata::full(started), dir);
        match self.tracker.current_position() {
            Ok(position) => metadata.wal_end = position.non_empty(),
            Err(e) => warn!(target: "pgvault::backup", error = %e, "Failed to read WAL position after full dump"),
        }
        Ok(metadata)
    }

    fn create_incremental_backup(
        &self,
        dir: PathBuf,
        name: &BackupName,
        started: DateTime<Utc>,
    ) -> Result<(PathBuf, BackupMetadata), BackupError> {
        let current = match self.tracker.current_position() {
            Ok(position) if !position.is_empty() => position,
            Ok(_) => return self.fall_back_to_full(dir, name, started, "server reported an empty WAL position"),
            Err(e) => return self.fall_back_to_full(dir, name, started, e),
        };
        let Some(start) = self.last_wal_position.clone() else {
            return self.fall_back_to_full(dir, name, started, "no parent WAL position");
        };
        let Some(parent) = self
            .last_backup_dir
            .as_deref()
            .and_then(Path::file_name)
            .map(|n| n.to_string_lossy().into_owned())
        else {
            return self.fall_back_to_full(dir, name, started, "no parent backup");
        };

        info!(
            target: "pgvault::backup",
            parent = %parent,
            wal_start = %start,
            wal_end = %current,
            "Collecting WAL since parent"
        );
        let collected = match self.collector.collect(&start, &current, &dir) {
            Ok(info) => info,
            Err(e) => return self.fall_back_to_full(dir, name, started, e),
        };
        debug!(
            target: "pgvault::backup",
            segments = collected.segments,
            whole_archive = collected.copied_whole_archive,
            "WAL collected"
        );
        self.collector.save_schema_snapshot(&dir);

        let metadata = with_dir_stats(BackupMetadata::incremental(started, parent, start, current), &dir);
        Ok((dir, metadata))
    }

    fn fall_back_to_full(
        &self,
        dir: PathBuf,
        name: &BackupName,
        started: DateTime<Utc>,
        reason: impl fmt::Display,
    ) -> Result<(PathBuf, BackupMetadata), BackupError> {
        warn!(target: "pgvault::backup", reason = %reason, "Incremental backup not possible, falling back to full backup");

        let wal_dir = dir.join(WAL_SUBDIR);
        if wal_dir.exists() {
            if let Err(e) = std::fs::remove_dir_all(&wal_dir) {
                warn!(target: "pgvault::backup", dir = %wal_dir.display(), error = %e, "Failed to remove partial WAL directory");
            }
        }

        let full_dir = dir.with_file_name(name.with_type(BackupType::Full).to_string());
        let dir = match std::fs::rename(&dir, &full_dir) {
            Ok(()) => full_dir,
            Err(e) => {
                warn!(
                    target: "pgvault::backup",
                    from = %dir.display(),
                    to = %full_dir.display(),
                    error = %e,
                    "Failed to rename backup directory, dumping in place"
                );
                dir
            }
        };

        let metadata = self.create_full_backup(&dir, started)?;
        Ok((dir, metadata))
    }

    fn split_large_files(&self, dir: &Path) -> usize {
        let Some(splitter) = &self.splitter else {
            return 0;
        };
        match splitter.split_large_files(dir) {
            Ok(split) => split.len(),
            Err(e) => {
                warn!(target: "pgvault::backup", dir = %dir.display(), error = %e, "Failed to split large files");
                0
            }
        }
    }

    fn sweep_old_backups(&self) -> usize {
        match self.sweeper.sweep() {
            Ok(info) => info.removed.len(),
            Err(e) => {
                error!(target: "pgvault::backup", error = %e, "Retention sweep failed");
                0
            }
        }
    }
}

fn with_dir_stats(metadata: BackupMetadata, dir: &Path) -> BackupMetadata {
    match dir_stats(dir) {
        Ok(stats) => metadata.with_stats(stats.size, stats.file_count),
        Err(e) => {
            warn!(target: "pgvault::backup", dir = %dir.display(), error = %e, "Failed to compute backup size");
            metadata
        }
    }
}

/// Backup errors
#[derive(Debug, thiserror::Error)]
pub enum BackupError {
    /// The backup directory could not be created
    #[error("failed to create backup directory {}: {source}", .path.display())]
    CreateDir {
        /// Directory path
        path: PathBuf,
        /// Underlying error
        source: std::io::Error,
    },

    /// `pg_dump` exited unsuccessfully
    #[error("pg_dump failed ({status}): {stderr}")]
    DumpFailed {
        /// Exit status description
        status: String,
        /// Captured stderr
        stderr: String,
    },

    /// A tool could not be started
    #[error(transparent)]
    Command(#[from] CommandError),
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::command::CommandOutput;
    use crate::testing::{is_directory_dump, ScriptedRunner};
    use chrono::TimeZone;
    use tempfile::tempdir;

    fn orchestrator(root: &Path, runner: Arc<ScriptedRunner>) -> BackupOrchestrator {
        BackupOrchestrator::new(
            ConnectionConfig::default(),
            BackupConfig::new(root),
            ToolConfig::default(),
            runner,
        )
    }

    fn at(hour: u32) -> DateTime<Utc> {
        Utc.with_ymd_and_hms(2024, 3, 1, hour, 0, 0).unwrap()
    }

    #[test]
    fn test_full_backup_records_wal_end() {
        let dir = tempdir().unwrap();
        let runner = Arc::new(ScriptedRunner::healthy("0/3000060"));

        let report = orchestrator(dir.path(), runner).create_backup_at(at(1)).unwrap();
        assert_eq!(report.metadata.backup_type, BackupType::Full);
        assert_eq!(report.metadata.wal_end, Some(WalPosition::new("0/3000060")));
        assert_eq!(report.metadata.file_count, 2);
        assert!(BackupMetadata::path_in(&report.dir).exists());
    }

    #[test]
    fn test_dump_failure_is_fatal() {
        let dir = tempdir().unwrap();
        let runner = Arc::new(ScriptedRunner::new());
        runner.on(is_directory_dump, |_| Ok(CommandOutput::failed(1, "connection refused")));

        let err = orchestrator(dir.path(), runner).create_backup_at(at(1)).unwrap_err();
        match err {
            BackupError::DumpFailed { stderr, .. } => assert!(stderr.contains("refused")),
            other => panic!("unexpected error: {other}"),
        }
    }

    #[test]
    fn test_wal_position_failure_leaves_wal_end_unset() {
        let dir = tempdir().unwrap();
        let runner = Arc::new(ScriptedRunner::new());
        runner.fail_wal_position();

        let report = orchestrator(dir.path(), runner).create_backup_at(at(1)).unwrap();
        assert_eq!(report.metadata.backup_type, BackupType::Full);
        assert_eq!(report.metadata.wal_end, None);
    }

    #[test]
    fn test_same_second_collision_is_fatal() {
        let dir = tempdir().unwrap();
        let runner = Arc::new(ScriptedRunner::healthy("0/3000060"));
        let mut orch = orchestrator(dir.path(), runner.clone());

        let first = orch.create_backup_at(at(1)).unwrap();
        let err = orch.create_backup_at(at(1)).unwrap_err();
        match err {
            BackupError::CreateDir { path, source } => {
                assert_eq!(path, first.dir);
                assert_eq!(source.kind(), std::io::ErrorKind::AlreadyExists);
            }
            other => panic!("unexpected error: {other}"),
        }
        assert_eq!(BackupMetadata::load(&first.dir).unwrap(), first.metadata);
        assert_eq!(runner.calls_to("pg_dump").len(), 1);
    }

    #[test]
    fn test_find_last_backup_needs_wal_end() {
        let dir = tempdir().unwrap();
        let full = dir.path().join("full_20240101_000000");
        std::fs::create_dir_all(&full).unwrap();
        BackupMetadata::full(at(0)).save(&full).unwrap();

        let mut orch = orchestrator(dir.path(), Arc::new(ScriptedRunner::new()));
        assert!(!orch.find_last_backup());
        assert_eq!(orch.last_backup_dir(), Some(full.as_path()));
        assert!(orch.last_wal_position().is_none());
    }

    #[test]
    fn test_split_threshold_applies() {
        let dir = tempdir().unwrap();
        let runner = Arc::new(ScriptedRunner::new());
        runner.on(is_directory_dump, |inv| {
            crate::testing::write_dump_directory(inv, (1 << 20) + 10)?;
            Ok(CommandOutput::ok(""))
        });
        let config = BackupConfig::new(dir.path()).with_split_size_mb(1);
        let mut orch = BackupOrchestrator::new(ConnectionConfig::default(), config, ToolConfig::default(), runner);

        let report = orch.create_backup_at(at(1)).unwrap();
        assert_eq!(report.split_files, 1);
        assert!(report.dir.join("3001.dat.gz.part001").exists());
        assert!(report.dir.join("3001.dat.gz.part002").exists());
        assert!(!report.dir.join("3001.dat.gz").exists());
    }
}
