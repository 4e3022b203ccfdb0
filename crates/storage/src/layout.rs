//! Backup root layout
//!
//! A backup root is a flat directory of backup directories plus the shared
//! WAL archive:
//!
//! ```text
//! /var/backups/postgres/
//! ├── full_20240101_000000/
//! │   ├── toc.dat
//! │   ├── 3001.dat.gz.part001
//! │   └── backup_metadata.json
//! ├── incremental_20240102_000000/
//! │   ├── wal/
//! │   ├── schema.sql
//! │   ├── extensions.sql
//! │   └── backup_metadata.json
//! └── wal_archive/
//! ```
//!
//! Only directories named `full_*` or `incremental_*` are backups; anything
//! else in the root is ignored.

use std::path::{Path, PathBuf};
use std::time::SystemTime;

use pgvault_core::BackupName;
use walkdir::WalkDir;

/// A backup directory found in the root
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct BackupEntry {
    /// Parsed directory name
    pub name: BackupName,
    /// Full path of the directory
    pub path: PathBuf,
    /// Directory modification time
    pub modified: SystemTime,
}

/// List every backup directory under `root`, oldest first
///
/// Entries whose metadata cannot be read are skipped. Ties in modification
/// time are broken by name.
pub fn list_backups(root: &Path) -> std::io::Result<Vec<BackupEntry>> {
    let mut entries = Vec::new();

    for entry in std::fs::read_dir(root)? {
        let entry = entry?;
        let Ok(file_type) = entry.file_type() else {
            continue;
        };
        if !file_type.is_dir() {
            continue;
        }
        let file_name = entry.file_name();
        let Ok(name) = BackupName::parse(&file_name.to_string_lossy()) else {
            continue;
        };
        let Ok(modified) = entry.metadata().and_then(|m| m.modified()) else {
            continue;
        };
        entries.push(BackupEntry {
            name,
            path: entry.path(),
            modified,
        });
    }

    entries.sort_by(|a, b| {
        a.modified
            .cmp(&b.modified)
            .then_with(|| a.name.to_string().cmp(&b.name.to_string()))
    });
    Ok(entries)
}

/// Most recently modified backup directory under `root`
pub fn find_latest_backup(root: &Path) -> std::io::Result<Option<BackupEntry>> {
    Ok(list_backups(root)?.pop())
}

/// Size and file count of a directory tree
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct DirStats {
    /// Total bytes of regular files
    pub size: u64,
    /// Number of regular files
    pub file_count: u64,
}

/// Walk `dir` and total up its regular files
pub fn dir_stats(dir: &Path) -> Result<DirStats, walkdir::Error> {
    let mut stats = DirStats::default();
    for entry in WalkDir::new(dir) {
        let entry = entry?;
        if entry.file_type().is_file() {
            stats.size += entry.metadata()?.len();
            stats.file_count += 1;
        }
    }
    Ok(stats)
}

#[cfg(test)]
mod tests {
    use super::*;
    use pgvault_core::BackupType;
    use std::fs::File;
    use std::time::Duration;
    use tempfile::tempdir;

    fn make_dir(root: &Path, name: &str, age_secs: u64) -> PathBuf {
        let path = root.join(name);
        std::fs::create_dir_all(&path).unwrap();
        let mtime = SystemTime::now() - Duration::from_secs(age_secs);
        File::open(&path).unwrap().set_modified(mtime).unwrap();
        path
    }

    #[test]
    fn test_list_ignores_foreign_entries() {
        let dir = tempdir().unwrap();
        make_dir(dir.path(), "full_20240101_000000", 100);
        make_dir(dir.path(), "wal_archive", 10);
        make_dir(dir.path(), "scratch", 10);
        std::fs::write(dir.path().join("full_20240109_000000"), b"not a dir").unwrap();

        let entries = list_backups(dir.path()).unwrap();
        assert_eq!(entries.len(), 1);
        assert_eq!(entries[0].name.backup_type(), BackupType::Full);
    }

    #[test]
    fn test_latest_is_most_recently_modified() {
        let dir = tempdir().unwrap();
        // Name order and mtime order disagree on purpose
        make_dir(dir.path(), "full_20240105_000000", 500);
        let newest = make_dir(dir.path(), "incremental_20240101_000000", 5);
        make_dir(dir.path(), "full_20240101_000000", 50);

        let latest = find_latest_backup(dir.path()).unwrap().unwrap();
        assert_eq!(latest.path, newest);
    }

    #[test]
    fn test_latest_on_empty_root() {
        let dir = tempdir().unwrap();
        assert!(find_latest_backup(dir.path()).unwrap().is_none());
    }

    #[test]
    fn test_list_missing_root_errors() {
        let dir = tempdir().unwrap();
        assert!(list_backups(&dir.path().join("missing")).is_err());
    }

    #[test]
    fn test_dir_stats_counts_nested_files() {
        let dir = tempdir().unwrap();
        std::fs::create_dir_all(dir.path().join("wal")).unwrap();
        std::fs::write(dir.path().join("a"), [0u8; 10]).unwrap();
        std::fs::write(dir.path().join("wal/b"), [0u8; 5]).unwrap();

        let stats = dir_stats(dir.path()).unwrap();
        assert_eq!(stats, DirStats { size: 15, file_count: 2 });
    }
}
