//! Core types for pgvault
//!
//! This crate defines the foundational types shared by the storage and
//! engine layers:
//! - BackupType: Full or Incremental
//! - BackupName: `<type>_<YYYYMMDD_HHMMSS>` directory names
//! - WalPosition: Opaque WAL position token
//! - BackupMetadata: The `backup_metadata.json` document
//! - Config: Connection, backup, restore, logging and tool settings

#![warn(missing_docs)]
#![warn(clippy::all)]

pub mod config;
pub mod metadata;
pub mod types;

pub use config::{
    BackupConfig, Config, ConfigError, ConnectionConfig, LoggingConfig, RestoreConfig, ToolConfig,
    CONFIG_FILE_NAME,
};
pub use metadata::{BackupMetadata, MetadataError, METADATA_FILE_NAME};
pub use types::{BackupName, BackupNameError, BackupType, WalPosition, PART_MARKER, WAL_SUBDIR};
