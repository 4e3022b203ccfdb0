//! Restore orchestration
//!
//! Restores a backup by applying its whole chain in order: the full backup
//! first through `pg_restore`, then each incremental backup's WAL.
//!
//! # Algorithm
//!
//! 1. Locate the backup directory (`latest` or a path)
//! 2. Load its metadata and resolve the chain back to a full backup
//! 3. For every link, oldest first:
//!    - Reassemble split files
//!    - Full: optionally drop and recreate the database, then `pg_restore`
//!    - Incremental: stage `wal/` into the configured WAL destination
//! 4. Stop at the first failing step
//!
//! # Point-in-time Recovery
//!
//! Staged WAL is not replayed here. Replay requires configuring the target
//! server's recovery settings, which is left to the operator.

use std::fmt;
use std::path::{Path, PathBuf};
use std::sync::Arc;

use pgvault_core::{BackupMetadata, BackupType, MetadataError, RestoreConfig, ToolConfig, WAL_SUBDIR};
use pgvault_storage::{copy_file, AssembleError, FileAssembler};
use tracing::{info, warn};

use crate::chain::{BackupChain, ChainError, ChainLink, ChainResolver};
use crate::command::{CommandError, CommandRunner, Invocation};
use crate::tools::PgTools;

/// What a restore step did
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum StepAction {
    /// The full backup was loaded with `pg_restore`
    Restored,
    /// WAL segments were copied to the destination
    WalStaged {
        /// Segments copied
        files: usize,
        /// Destination directory
        destination: PathBuf,
    },
    /// WAL is present but no destination is configured
    WalAvailable {
        /// The backup's WAL directory
        dir: PathBuf,
    },
    /// The incremental backup carries no WAL directory
    NoWal,
}

/// One executed restore step
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct StepReport {
    /// Position in the chain, starting at 1
    pub step: usize,
    /// Backup directory
    pub dir: PathBuf,
    /// Backup kind
    pub backup_type: BackupType,
    /// Files reassembled before the step ran
    pub files_assembled: usize,
    /// Outcome
    pub action: StepAction,
}

/// Result of a restore run
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RestoreReport {
    /// Backup that was asked for
    pub target: PathBuf,
    /// Steps in the order they ran
    pub steps: Vec<StepReport>,
}

/// Applies backup chains to a target database
pub struct RestoreOrchestrator {
    config: RestoreConfig,
    tools: PgTools,
    runner: Arc<dyn CommandRunner>,
    resolver: ChainResolver,
    assembler: FileAssembler,
}

impl RestoreOrchestrator {
    /// Orchestrator for `config`, running tools through `runner`
    pub fn new(config: RestoreConfig, tools: ToolConfig, runner: Arc<dyn CommandRunner>) -> Self {
        RestoreOrchestrator {
            tools: PgTools::new(config.target.clone(), tools),
            resolver: ChainResolver::new(config.backup_root.clone()),
            assembler: FileAssembler::new(),
            config,
            runner,
        }
    }

    /// Restore settings
    pub fn config(&self) -> &RestoreConfig {
        &self.config
    }

    /// Resolve `identifier` into the chain that would be applied
    pub fn plan(&self, identifier: &str) -> Result<BackupChain, RestoreError> {
        let dir = self
            .resolver
            .locate_backup_dir(identifier)
            .map_err(RestoreError::Locate)?;
        let metadata = BackupMetadata::load(&dir).map_err(|source| RestoreError::Metadata {
            dir: dir.clone(),
            source,
        })?;
        self.resolver
            .build_backup_chain(&dir, metadata)
            .map_err(RestoreError::Chain)
    }

    /// Restore `identifier` (`latest` or a backup path)
    pub fn restore(&self, identifier: &str) -> Result<RestoreReport, RestoreError> {
        let chain = self.plan(identifier)?;
        let target = chain
            .target()
            .map(|link| link.dir.clone())
            .unwrap_or_default();
        info!(
            target: "pgvault::restore",
            backup = %target.display(),
            steps = chain.len(),
            "Starting restore"
        );

        let mut steps = Vec::with_capacity(chain.len());
        for (idx, link) in chain.iter().enumerate() {
            let step = idx + 1;
            info!(
                target: "pgvault::restore",
                step,
                total = chain.len(),
                backup_type = %link.backup_type(),
                dir = %link.dir.display(),
                "Restoring backup"
            );
            let report = self.apply_link(step, link).map_err(|source| RestoreError::Step {
                step,
                backup_type: link.backup_type(),
                dir: link.dir.clone(),
                source,
            })?;
            steps.push(report);
        }

        info!(target: "pgvault::restore", backup = %target.display(), "Restore completed");
        Ok(RestoreReport { target, steps })
    }

    fn apply_link(&self, step: usize, link: &ChainLink) -> Result<StepReport, StepError> {
        let assembled = self.assembler.assemble_files(&link.dir)?;
        let action = match link.backup_type() {
            BackupType::Full => {
                self.restore_full_backup(&link.dir)?;
                StepAction::Restored
            }
            BackupType::Incremental => self.apply_incremental_backup(&link.dir)?,
        };
        Ok(StepReport {
            step,
            dir: link.dir.clone(),
            backup_type: link.backup_type(),
            files_assembled: assembled.files.len(),
            action,
        })
    }

    /// Load a full backup into the target database
    pub fn restore_full_backup(&self, dir: &Path) -> Result<(), StepError> {
        if self.config.drop_database {
            self.drop_and_create_database()?;
        }

        let out = self
            .runner
            .run(&self.tools.restore_directory(dir, self.config.jobs))?;
        if !out.success() {
            return Err(StepError::RestoreFailed {
                status: out.status_description(),
                stderr: out.stderr_lossy(),
            });
        }
        info!(target: "pgvault::restore", dir = %dir.display(), "Full backup restored");
        Ok(())
    }

    /// Drop and recreate the target database
    pub fn drop_and_create_database(&self) -> Result<(), StepError> {
        self.admin(self.tools.drop_database())?;
        self.admin(self.tools.create_database())?;
        info!(
            target: "pgvault::restore",
            database = %self.config.target.database,
            "Recreated target database"
        );
        Ok(())
    }

    fn admin(&self, invocation: Invocation) -> Result<(), StepError> {
        let out = self.runner.run(&invocation)?;
        if out.success() {
            return Ok(());
        }
        Err(StepError::DatabaseAdmin {
            statement: invocation.arg_after("-c").unwrap_or_default().to_string(),
            output: out.combined_lossy(),
        })
    }

    /// Make an incremental backup's WAL available for recovery
    pub fn apply_incremental_backup(&self, dir: &Path) -> Result<StepAction, StepError> {
        let wal_dir = dir.join(WAL_SUBDIR);
        if !wal_dir.is_dir() {
            warn!(target: "pgvault::restore", dir = %dir.display(), "No WAL directory in incremental backup");
            return Ok(StepAction::NoWal);
        }

        match &self.config.wal_destination_dir {
            Some(destination) => {
                let files = stage_wal_files(&wal_dir, destination)?;
                info!(
                    target: "pgvault::restore",
                    files,
                    destination = %destination.display(),
                    "Staged WAL for point-in-time recovery"
                );
                Ok(StepAction::WalStaged {
                    files,
                    destination: destination.clone(),
                })
            }
            None => {
                info!(
                    target: "pgvault::restore",
                    wal_dir = %wal_dir.display(),
                    "WAL files available; configure restore_command for point-in-time recovery"
                );
                Ok(StepAction::WalAvailable { dir: wal_dir })
            }
        }
    }
}

/// Copy every file in `wal_dir` into `destination`
///
/// Files that fail to copy are logged and skipped.
pub fn stage_wal_files(wal_dir: &Path, destination: &Path) -> Result<usize, StepError> {
    std::fs::create_dir_all(destination).map_err(|source| StepError::WalStage {
        path: destination.to_path_buf(),
        source,
    })?;
    let read_err = |source| StepError::WalStage {
        path: wal_dir.to_path_buf(),
        source,
    };

    let mut staged = 0;
    for entry in std::fs::read_dir(wal_dir).map_err(read_err)? {
        let entry = entry.map_err(read_err)?;
        if entry.file_type().map(|t| t.is_dir()).unwrap_or(true) {
            continue;
        }
        let dst = destination.join(entry.file_name());
        match copy_file(&entry.path(), &dst) {
            Ok(_) => staged += 1,
            Err(e) => warn!(
                target: "pgvault::restore",
                file = %entry.path().display(),
                error = %e,
                "Failed to stage WAL file"
            ),
        }
    }
    Ok(staged)
}

/// Failure of a single restore step
#[derive(Debug, thiserror::Error)]
pub enum StepError {
    /// Split files could not be reassembled
    #[error(transparent)]
    Assemble(#[from] AssembleError),

    /// DROP or CREATE DATABASE failed
    #[error("{statement} failed: {output}")]
    DatabaseAdmin {
        /// SQL statement
        statement: String,
        /// Combined tool output
        output: String,
    },

    /// `pg_restore` exited unsuccessfully
    #[error("pg_restore failed ({status}): {stderr}")]
    RestoreFailed {
        /// Exit status description
        status: String,
        /// Captured stderr
        stderr: String,
    },

    /// The WAL destination could not be prepared or the WAL read
    #[error("failed to stage WAL at {}: {source}", .path.display())]
    WalStage {
        /// Path involved
        path: PathBuf,
        /// Underlying error
        source: std::io::Error,
    },

    /// A tool could not be started
    #[error(transparent)]
    Command(#[from] CommandError),
}

/// Restore errors
#[derive(Debug, thiserror::Error)]
pub enum RestoreError {
    /// The identifier did not resolve to a backup
    #[error("failed to locate backup: {0}")]
    Locate(#[source] ChainError),

    /// The target backup's metadata could not be loaded
    #[error("failed to load metadata for {}: {source}", .dir.display())]
    Metadata {
        /// Backup directory
        dir: PathBuf,
        /// Underlying error
        source: MetadataError,
    },

    /// The chain could not be resolved
    #[error("failed to build backup chain: {0}")]
    Chain(#[source] ChainError),

    /// A step in the chain failed
    #[error("step {step} ({backup_type} backup {}) failed: {source}", DisplayName(.dir))]
    Step {
        /// Position in the chain, starting at 1
        step: usize,
        /// Backup kind
        backup_type: BackupType,
        /// Backup directory
        dir: PathBuf,
        /// Underlying error
        source: StepError,
    },
}

struct DisplayName<'a>(&'a Path);

impl fmt::Display for DisplayName<'_> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self.0.file_name() {
            Some(name) => write!(f, "{}", name.to_string_lossy()),
            None => write!(f, "{}", self.0.display()),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::command::CommandOutput;
    use crate::testing::{program, sql_contains, ScriptedRunner};
    use chrono::Utc;
    use pgvault_core::WalPosition;
    use tempfile::tempdir;

    fn orchestrator(root: &Path, runner: Arc<ScriptedRunner>) -> RestoreOrchestrator {
        RestoreOrchestrator::new(RestoreConfig::new(root), ToolConfig::default(), runner)
    }

    fn write_full(root: &Path, name: &str) -> PathBuf {
        let dir = root.join(name);
        std::fs::create_dir_all(&dir).unwrap();
        std::fs::write(dir.join("toc.dat"), b"PGDMP").unwrap();
        BackupMetadata::full(Utc::now()).save(&dir).unwrap();
        dir
    }

    #[test]
    fn test_full_restore_drops_then_restores() {
        let dir = tempdir().unwrap();
        let full = write_full(dir.path(), "full_20240101_000000");
        let runner = Arc::new(ScriptedRunner::new());

        let report = orchestrator(dir.path(), runner.clone()).restore("latest").unwrap();
        assert_eq!(report.target, full);
        assert_eq!(report.steps.len(), 1);
        assert_eq!(report.steps[0].action, StepAction::Restored);

        let calls = runner.calls();
        assert_eq!(calls.len(), 3);
        assert!(calls[0].arg_after("-c").unwrap().starts_with("DROP DATABASE"));
        assert!(calls[1].arg_after("-c").unwrap().starts_with("CREATE DATABASE"));
        assert_eq!(calls[2].program(), "pg_restore");
    }

    #[test]
    fn test_skip_drop_when_disabled() {
        let dir = tempdir().unwrap();
        write_full(dir.path(), "full_20240101_000000");
        let runner = Arc::new(ScriptedRunner::new());
        let config = RestoreConfig::new(dir.path()).with_drop_database(false);

        RestoreOrchestrator::new(config, ToolConfig::default(), runner.clone())
            .restore("full_20240101_000000")
            .unwrap();
        assert!(runner.calls_to("psql").is_empty());
    }

    #[test]
    fn test_admin_failure_carries_output() {
        let dir = tempdir().unwrap();
        write_full(dir.path(), "full_20240101_000000");
        let runner = Arc::new(ScriptedRunner::new());
        runner.on(sql_contains("DROP DATABASE"), |_| {
            Ok(CommandOutput::failed(1, "database is being accessed by other users"))
        });

        let err = orchestrator(dir.path(), runner.clone()).restore("latest").unwrap_err();
        match err {
            RestoreError::Step {
                step: 1,
                source: StepError::DatabaseAdmin { output, .. },
                ..
            } => assert!(output.contains("other users")),
            other => panic!("unexpected error: {other}"),
        }
        assert!(runner.calls_to("pg_restore").is_empty());
    }

    #[test]
    fn test_pg_restore_failure_is_step_error() {
        let dir = tempdir().unwrap();
        write_full(dir.path(), "full_20240101_000000");
        let runner = Arc::new(ScriptedRunner::new());
        runner.on(program("pg_restore"), |_| Ok(CommandOutput::failed(1, "bad archive")));

        let err = orchestrator(dir.path(), runner).restore("latest").unwrap_err();
        assert!(matches!(
            err,
            RestoreError::Step {
                source: StepError::RestoreFailed { .. },
                ..
            }
        ));
        assert!(err.to_string().contains("full_20240101_000000"));
    }

    #[test]
    fn test_full_backup_parts_are_assembled_first() {
        let dir = tempdir().unwrap();
        let full = write_full(dir.path(), "full_20240101_000000");
        std::fs::write(full.join("3001.dat.gz.part001"), b"ab").unwrap();
        std::fs::write(full.join("3001.dat.gz.part002"), b"cd").unwrap();

        let report = orchestrator(dir.path(), Arc::new(ScriptedRunner::new()))
            .restore("latest")
            .unwrap();
        assert_eq!(report.steps[0].files_assembled, 1);
        assert_eq!(std::fs::read(full.join("3001.dat.gz")).unwrap(), b"abcd");
    }

    #[test]
    fn test_stage_wal_files() {
        let dir = tempdir().unwrap();
        let wal = dir.path().join("wal");
        std::fs::create_dir_all(wal.join("nested")).unwrap();
        std::fs::write(wal.join("000000010000000000000001"), b"a").unwrap();
        std::fs::write(wal.join("000000010000000000000002"), b"b").unwrap();

        let dest = dir.path().join("pg_wal_restore");
        assert_eq!(stage_wal_files(&wal, &dest).unwrap(), 2);
        assert_eq!(std::fs::read(dest.join("000000010000000000000002")).unwrap(), b"b");
    }

    #[test]
    fn test_incremental_without_destination_reports_wal_dir() {
        let dir = tempdir().unwrap();
        let inc = dir.path().join("incremental_20240102_000000");
        std::fs::create_dir_all(inc.join("wal")).unwrap();

        let action = orchestrator(dir.path(), Arc::new(ScriptedRunner::new()))
            .apply_incremental_backup(&inc)
            .unwrap();
        assert_eq!(action, StepAction::WalAvailable { dir: inc.join("wal") });

        let bare = dir.path().join("incremental_20240103_000000");
        std::fs::create_dir_all(&bare).unwrap();
        let action = orchestrator(dir.path(), Arc::new(ScriptedRunner::new()))
            .apply_incremental_backup(&bare)
            .unwrap();
        assert_eq!(action, StepAction::NoWal);
    }

    #[test]
    fn test_missing_metadata_is_reported() {
        let dir = tempdir().unwrap();
        std::fs::create_dir_all(dir.path().join("full_20240101_000000")).unwrap();

        let err = orchestrator(dir.path(), Arc::new(ScriptedRunner::new()))
            .restore("latest")
            .unwrap_err();
        assert!(matches!(err, RestoreError::Metadata { .. }));
    }

    #[test]
    fn test_plan_walks_to_full() {
        let dir = tempdir().unwrap();
        write_full(dir.path(), "full_20240101_000000");
        let inc = dir.path().join("incremental_20240102_000000");
        std::fs::create_dir_all(&inc).unwrap();
        BackupMetadata::incremental(
            Utc::now(),
            "full_20240101_000000",
            WalPosition::new("0/1"),
            WalPosition::new("0/2"),
        )
        .save(&inc)
        .unwrap();

        let chain = orchestrator(dir.path(), Arc::new(ScriptedRunner::new()))
            .plan("incremental_20240102_000000")
            .unwrap();
        assert_eq!(chain.len(), 2);
        assert_eq!(chain.base().unwrap().backup_type(), BackupType::Full);
    }
}
