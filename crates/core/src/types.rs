//! Core types for pgvault
//!
//! This module defines the foundational types:
//! - BackupType: Discriminates full dumps from WAL-based incrementals
//! - BackupName: Directory name of a backup (`<type>_<YYYYMMDD_HHMMSS>`)
//! - WalPosition: Opaque position token in the database's WAL stream

use chrono::{DateTime, Local, TimeZone};
use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;

/// Marker that identifies a split part file (`<original>.partNNN`)
pub const PART_MARKER: &str = ".part";

/// Subdirectory of an incremental backup holding copied WAL segments
pub const WAL_SUBDIR: &str = "wal";

/// Timestamp layout embedded in backup directory names
pub const NAME_TIMESTAMP_FORMAT: &str = "%Y%m%d_%H%M%S";

/// Kind of backup stored in a backup directory
///
/// Chain walking branches on this exhaustively: a `Full` backup terminates
/// a chain, an `Incremental` backup must name its parent.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum BackupType {
    /// Complete directory-format dump of the database
    Full,
    /// WAL segments covering the range since the parent backup
    Incremental,
}

impl BackupType {
    /// All backup types, in naming-convention order
    pub const ALL: [BackupType; 2] = [BackupType::Full, BackupType::Incremental];

    /// Lowercase name used in metadata and directory names
    pub fn as_str(&self) -> &'static str {
        match self {
            BackupType::Full => "full",
            BackupType::Incremental => "incremental",
        }
    }

    /// Directory name prefix (`full_` or `incremental_`)
    pub fn dir_prefix(&self) -> &'static str {
        match self {
            BackupType::Full => "full_",
            BackupType::Incremental => "incremental_",
        }
    }

    /// Check if this is a full backup
    pub fn is_full(&self) -> bool {
        matches!(self, BackupType::Full)
    }
}

impl fmt::Display for BackupType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for BackupType {
    type Err = BackupNameError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "full" => Ok(BackupType::Full),
            "incremental" => Ok(BackupType::Incremental),
            other => Err(BackupNameError::UnknownType(other.to_string())),
        }
    }
}

/// Name of a backup directory: `<type>_<stamp>`
///
/// Only the prefix is significant when scanning a backup root; the stamp is
/// kept verbatim so that names written by other tools still round-trip.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct BackupName {
    backup_type: BackupType,
    stamp: String,
}

impl BackupName {
    /// Build the name for a backup started at `time`
    pub fn at<Tz: TimeZone>(backup_type: BackupType, time: &DateTime<Tz>) -> Self {
        let stamp = time
            .with_timezone(&Local)
            .format(NAME_TIMESTAMP_FORMAT)
            .to_string();
        BackupName { backup_type, stamp }
    }

    /// Parse a directory name
    ///
    /// # Errors
    /// Returns an error if the name lacks a `full_`/`incremental_` prefix or
    /// has nothing after it.
    pub fn parse(name: &str) -> Result<Self, BackupNameError> {
        for backup_type in BackupType::ALL {
            if let Some(stamp) = name.strip_prefix(backup_type.dir_prefix()) {
                if stamp.is_empty() {
                    return Err(BackupNameError::MissingTimestamp(name.to_string()));
                }
                return Ok(BackupName {
                    backup_type,
                    stamp: stamp.to_string(),
                });
            }
        }
        Err(BackupNameError::UnknownPrefix(name.to_string()))
    }

    /// Check whether a directory name follows the backup naming convention
    pub fn matches(name: &str) -> bool {
        BackupType::ALL
            .iter()
            .any(|t| name.starts_with(t.dir_prefix()))
    }

    /// Backup type encoded in the name
    pub fn backup_type(&self) -> BackupType {
        self.backup_type
    }

    /// Timestamp portion of the name
    pub fn stamp(&self) -> &str {
        &self.stamp
    }

    /// Same stamp under a different type
    pub fn with_type(&self, backup_type: BackupType) -> Self {
        BackupName {
            backup_type,
            stamp: self.stamp.clone(),
        }
    }
}

impl fmt::Display for BackupName {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}{}", self.backup_type.dir_prefix(), self.stamp)
    }
}

impl FromStr for BackupName {
    type Err = BackupNameError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        BackupName::parse(s)
    }
}

/// Errors parsing backup names and types
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum BackupNameError {
    /// Name does not start with a known prefix
    #[error("not a backup directory name: {0}")]
    UnknownPrefix(String),

    /// Name has a prefix but no timestamp
    #[error("backup directory name has no timestamp: {0}")]
    MissingTimestamp(String),

    /// Unknown backup type string
    #[error("unknown backup type: {0}")]
    UnknownType(String),
}

/// Opaque, totally ordered position in the WAL stream
///
/// The ordering semantics belong to the database and its WAL-dump tool;
/// this type stores and passes the token through without parsing it.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
#[serde(transparent)]
pub struct WalPosition(String);

impl WalPosition {
    /// Wrap a position token, trimming surrounding whitespace
    pub fn new(token: impl AsRef<str>) -> Self {
        WalPosition(token.as_ref().trim().to_string())
    }

    /// The raw token
    pub fn as_str(&self) -> &str {
        &self.0
    }

    /// True when no position is known
    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }

    /// `Some(self)` when a position is known
    pub fn non_empty(self) -> Option<Self> {
        if self.is_empty() {
            None
        } else {
            Some(self)
        }
    }
}

impl fmt::Display for WalPosition {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl From<String> for WalPosition {
    fn from(s: String) -> Self {
        WalPosition::new(s)
    }
}

impl From<&str> for WalPosition {
    fn from(s: &str) -> Self {
        WalPosition::new(s)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Utc;

    #[test]
    fn test_backup_type_serde_lowercase() {
        let json = serde_json::to_string(&BackupType::Incremental).unwrap();
        assert_eq!(json, "\"incremental\"");
        let parsed: BackupType = serde_json::from_str("\"full\"").unwrap();
        assert_eq!(parsed, BackupType::Full);
    }

    #[test]
    fn test_backup_type_from_str() {
        assert_eq!("full".parse::<BackupType>().unwrap(), BackupType::Full);
        assert!(matches!(
            "differential".parse::<BackupType>(),
            Err(BackupNameError::UnknownType(_))
        ));
    }

    #[test]
    fn test_name_round_trip() {
        let name = BackupName::parse("incremental_20240102_000000").unwrap();
        assert_eq!(name.backup_type(), BackupType::Incremental);
        assert_eq!(name.stamp(), "20240102_000000");
        assert_eq!(name.to_string(), "incremental_20240102_000000");
    }

    #[test]
    fn test_name_with_type_keeps_stamp() {
        let name = BackupName::parse("incremental_20240102_000000").unwrap();
        assert_eq!(
            name.with_type(BackupType::Full).to_string(),
            "full_20240102_000000"
        );
    }

    #[test]
    fn test_name_at_uses_timestamp_layout() {
        let time = Local.with_ymd_and_hms(2024, 1, 1, 13, 5, 9).unwrap();
        let name = BackupName::at(BackupType::Full, &time);
        assert_eq!(name.to_string(), "full_20240101_130509");

        let utc = Utc::now();
        let stamp = BackupName::at(BackupType::Full, &utc).stamp().to_string();
        assert_eq!(stamp.len(), 15);
        assert_eq!(&stamp[8..9], "_");
    }

    #[test]
    fn test_name_rejects_foreign_directories() {
        assert!(matches!(
            BackupName::parse("wal_archive"),
            Err(BackupNameError::UnknownPrefix(_))
        ));
        assert!(matches!(
            BackupName::parse("full_"),
            Err(BackupNameError::MissingTimestamp(_))
        ));
        assert!(BackupName::matches("full_20240101_000000"));
        assert!(!BackupName::matches("fullish"));
    }

    #[test]
    fn test_wal_position_trims() {
        let pos = WalPosition::new(" 0/3000060\n");
        assert_eq!(pos.as_str(), "0/3000060");
        assert!(WalPosition::new("  \n").non_empty().is_none());
    }
}
