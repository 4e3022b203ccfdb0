//! Backup and restore orchestration for pgvault
//!
//! This crate drives the external PostgreSQL tools:
//! - Backup: full dumps, incremental WAL collection, fallback to full
//! - Restore: chain resolution and ordered replay of a backup chain
//! - Command execution behind the [`CommandRunner`] seam
//!
//! Filesystem mechanics (splitting, assembly, retention) live in
//! `pgvault-storage`; shared types and configuration in `pgvault-core`.

#![warn(missing_docs)]
#![warn(clippy::all)]

pub mod backup;
pub mod chain;
pub mod collector;
pub mod command;
pub mod logging;
pub mod restore;
pub mod testing;
pub mod tools;
pub mod wal_position;

pub use backup::{BackupError, BackupOrchestrator, BackupReport};
pub use chain::{BackupChain, ChainError, ChainLink, ChainResolver, LATEST};
pub use collector::{is_wal_segment_name, parse_wal_listing, CollectError, CollectInfo, IncrementalCollector, SchemaSnapshot};
pub use command::{CommandError, CommandOutput, CommandRunner, Invocation, SystemRunner};
pub use restore::{stage_wal_files, RestoreError, RestoreOrchestrator, RestoreReport, StepAction, StepError, StepReport};
pub use tools::PgTools;
pub use wal_position::{WalPositionError, WalPositionTracker};
