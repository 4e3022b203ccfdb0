//! Backup metadata document
//!
//! Every backup directory holds exactly one `backup_metadata.json`, written
//! once at the end of the run and never rewritten in place:
//!
//! ```text
//! {
//!   "type": "incremental",
//!   "timestamp": "2024-01-02T00:00:00Z",
//!   "parent_backup": "full_20240101_000000",
//!   "wal_start": "0/3000060",
//!   "wal_end": "0/5000028",
//!   "size": 16777216,
//!   "file_count": 3
//! }
//! ```
//!
//! Empty `parent_backup`, `wal_start` and `wal_end` are omitted on write and
//! read back as `None`.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Deserializer, Serialize};
use std::io;
use std::path::{Path, PathBuf};

use crate::types::{BackupType, WalPosition};

/// File name of the metadata document inside a backup directory
pub const METADATA_FILE_NAME: &str = "backup_metadata.json";

/// Persisted description of one backup
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct BackupMetadata {
    /// Full or incremental
    #[serde(rename = "type")]
    pub backup_type: BackupType,
    /// When the backup run started
    pub timestamp: DateTime<Utc>,
    /// Directory name of the parent backup (incremental only)
    #[serde(
        rename = "parent_backup",
        default,
        skip_serializing_if = "Option::is_none",
        deserialize_with = "empty_as_none"
    )]
    pub parent: Option<String>,
    /// WAL position the incremental range starts at
    #[serde(
        default,
        skip_serializing_if = "Option::is_none",
        deserialize_with = "empty_as_none"
    )]
    pub wal_start: Option<WalPosition>,
    /// WAL position at the end of the backup
    #[serde(
        default,
        skip_serializing_if = "Option::is_none",
        deserialize_with = "empty_as_none"
    )]
    pub wal_end: Option<WalPosition>,
    /// Total bytes of all regular files in the directory
    #[serde(default)]
    pub size: u64,
    /// Number of regular files in the directory
    #[serde(default)]
    pub file_count: u64,
}

impl BackupMetadata {
    /// Metadata for a full backup with no WAL position yet
    pub fn full(timestamp: DateTime<Utc>) -> Self {
        BackupMetadata {
            backup_type: BackupType::Full,
            timestamp,
            parent: None,
            wal_start: None,
            wal_end: None,
            size: 0,
            file_count: 0,
        }
    }

    /// Metadata for an incremental backup covering `wal_start..wal_end`
    pub fn incremental(
        timestamp: DateTime<Utc>,
        parent: impl Into<String>,
        wal_start: WalPosition,
        wal_end: WalPosition,
    ) -> Self {
        BackupMetadata {
            backup_type: BackupType::Incremental,
            timestamp,
            parent: Some(parent.into()),
            wal_start: Some(wal_start),
            wal_end: Some(wal_end),
            size: 0,
            file_count: 0,
        }
    }

    /// Record directory statistics
    pub fn with_stats(mut self, size: u64, file_count: u64) -> Self {
        self.size = size;
        self.file_count = file_count;
        self
    }

    /// Check that an incremental record names its parent and WAL range
    ///
    /// Full records are always valid.
    pub fn validate(&self) -> Result<(), MetadataError> {
        if self.backup_type.is_full() {
            return Ok(());
        }
        if self.parent.is_none() {
            return Err(MetadataError::Invalid("incremental backup without parent".into()));
        }
        if self.wal_start.is_none() || self.wal_end.is_none() {
            return Err(MetadataError::Invalid(
                "incremental backup without WAL range".into(),
            ));
        }
        Ok(())
    }

    /// Path of the metadata document inside `dir`
    pub fn path_in(dir: &Path) -> PathBuf {
        dir.join(METADATA_FILE_NAME)
    }

    /// Load the metadata document from a backup directory
    pub fn load(dir: &Path) -> Result<Self, MetadataError> {
        let path = Self::path_in(dir);
        let data = std::fs::read(&path).map_err(|source| MetadataError::Read {
            path: path.clone(),
            source,
        })?;
        serde_json::from_slice(&data).map_err(|source| MetadataError::Parse { path, source })
    }

    /// Write the metadata document into a backup directory
    ///
    /// Uses `create_new` so an existing document is never overwritten.
    pub fn save(&self, dir: &Path) -> Result<PathBuf, MetadataError> {
        use std::io::Write;

        let path = Self::path_in(dir);
        let data = serde_json::to_vec_pretty(self).map_err(|source| MetadataError::Parse {
            path: path.clone(),
            source,
        })?;

        let write = || -> io::Result<()> {
            let mut file = std::fs::OpenOptions::new()
                .write(true)
                .create_new(true)
                .open(&path)?;
            file.write_all(&data)?;
            file.sync_all()
        };
        write().map_err(|source| MetadataError::Write {
            path: path.clone(),
            source,
        })?;
        Ok(path)
    }
}

fn empty_as_none<'de, D, T>(deserializer: D) -> Result<Option<T>, D::Error>
where
    D: Deserializer<'de>,
    T: From<String>,
{
    let raw: Option<String> = Option::deserialize(deserializer)?;
    Ok(raw
        .map(|s| s.trim().to_string())
        .filter(|s| !s.is_empty())
        .map(T::from))
}

/// Metadata load/save errors
#[derive(Debug, thiserror::Error)]
pub enum MetadataError {
    /// Document could not be read
    #[error("failed to read metadata {}: {source}", .path.display())]
    Read {
        /// Document path
        path: PathBuf,
        /// Underlying error
        source: io::Error,
    },

    /// Document could not be written
    #[error("failed to write metadata {}: {source}", .path.display())]
    Write {
        /// Document path
        path: PathBuf,
        /// Underlying error
        source: io::Error,
    },

    /// Document is not valid JSON for this schema
    #[error("malformed metadata {}: {source}", .path.display())]
    Parse {
        /// Document path
        path: PathBuf,
        /// Underlying error
        source: serde_json::Error,
    },

    /// Record violates the incremental invariants
    #[error("invalid metadata: {0}")]
    Invalid(String),
}

impl MetadataError {
    /// True when the document does not exist
    pub fn is_not_found(&self) -> bool {
        matches!(self, MetadataError::Read { source, .. } if source.kind() == io::ErrorKind::NotFound)
    }
}
