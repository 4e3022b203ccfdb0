//! pgvault - full and incremental PostgreSQL backups
//!
//! pgvault takes directory-format dumps with `pg_dump`, chains incremental
//! backups through archived WAL, splits oversized files for transport and
//! restores a whole chain in order.
//!
//! # Quick Start
//!
//! ```ignore
//! use std::sync::Arc;
//! use pgvault::{BackupOrchestrator, Config, SystemRunner};
//!
//! let config = Config::from_file("pgvault.toml".as_ref())?;
//! let mut backups = BackupOrchestrator::from_config(&config, Arc::new(SystemRunner));
//! backups.set_incremental_mode(true);
//! let report = backups.create_backup()?;
//! ```
//!
//! # Architecture
//!
//! - `pgvault-core`: backup names, metadata documents, configuration
//! - `pgvault-storage`: split/assemble, verbatim copies, layout, retention
//! - `pgvault-engine`: tool invocations, backup and restore orchestration

pub use pgvault_core::*;
pub use pgvault_engine::{
    backup, chain, collector, command, logging, restore, testing, tools, wal_position,
};
pub use pgvault_engine::{
    BackupError, BackupOrchestrator, BackupReport, BackupChain, ChainError, ChainLink,
    ChainResolver, CommandError, CommandOutput, CommandRunner, Invocation, RestoreError,
    RestoreOrchestrator, RestoreReport, StepAction, StepError, StepReport, SystemRunner,
    LATEST,
};
pub use pgvault_storage::{
    copy_file, dir_stats, find_latest_backup, list_backups, BackupEntry, FileAssembler,
    FileSplitter, RetentionSweeper,
};
