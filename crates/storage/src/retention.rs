//! Retention sweep
//!
//! Removes backup directories that fell out of the retention window.
//!
//! # Algorithm
//!
//! 1. Compute the cutoff: `now - retention_days`
//! 2. List backup directories in the root (`full_*`, `incremental_*`)
//! 3. Remove every directory whose modification time is before the cutoff
//!
//! # Safety
//!
//! - Never touches entries outside the naming convention (e.g. the WAL archive)
//! - A directory that fails to delete is logged and skipped
//! - A non-positive retention disables the sweep entirely
//! - A window too large to represent saturates and keeps everything

use std::path::{Path, PathBuf};
use std::time::{Duration, SystemTime};

use tracing::{debug, info, warn};

use crate::layout::list_backups;

const SECONDS_PER_DAY: u64 = 24 * 60 * 60;

/// Deletes backups older than a retention window
#[derive(Debug, Clone)]
pub struct RetentionSweeper {
    root: PathBuf,
    retention: Option<Duration>,
}

impl RetentionSweeper {
    /// Create a sweeper over `root` keeping `retention_days` of backups
    pub fn new(root: impl Into<PathBuf>, retention_days: i64) -> Self {
        let retention = u64::try_from(retention_days)
            .ok()
            .filter(|days| *days > 0)
            .map(|days| Duration::from_secs(days.saturating_mul(SECONDS_PER_DAY)));
        RetentionSweeper {
            root: root.into(),
            retention,
        }
    }

    /// The backup root being swept
    pub fn root(&self) -> &Path {
        &self.root
    }

    /// True when a retention window is configured
    pub fn is_enabled(&self) -> bool {
        self.retention.is_some()
    }

    /// Sweep against the current time
    pub fn sweep(&self) -> Result<SweepInfo, SweepError> {
        self.sweep_at(SystemTime::now())
    }

    /// Sweep against an explicit `now`
    pub fn sweep_at(&self, now: SystemTime) -> Result<SweepInfo, SweepError> {
        let mut info = SweepInfo::default();
        let Some(retention) = self.retention else {
            debug!(target: "pgvault::retention", "Retention disabled, skipping sweep");
            return Ok(info);
        };
        let cutoff = now.checked_sub(retention).unwrap_or(SystemTime::UNIX_EPOCH);

        let backups = list_backups(&self.root).map_err(|source| SweepError::ReadDir {
            path: self.root.clone(),
            source,
        })?;

        for backup in backups {
            if backup.modified >= cutoff {
                info.retained += 1;
                continue;
            }
            info!(target: "pgvault::retention", path = %backup.path.display(), "Removing old backup");
            match std::fs::remove_dir_all(&backup.path) {
                Ok(()) => info.removed.push(backup.path),
                Err(e) => {
                    warn!(
                        target: "pgvault::retention",
                        path = %backup.path.display(),
                        error = %e,
                        "Failed to remove old backup"
                    );
                    info.failed += 1;
                }
            }
        }

        Ok(info)
    }
}

/// Result of one sweep
#[derive(Debug, Clone, Default)]
pub struct SweepInfo {
    /// Directories removed
    pub removed: Vec<PathBuf>,
    /// Directories inside the window
    pub retained: usize,
    /// Directories that could not be removed
    pub failed: usize,
}

/// Sweep errors
#[derive(Debug, thiserror::Error)]
pub enum SweepError {
    /// The backup root could not be listed
    #[error("failed to read backup directory {}: {source}", .path.display())]
    ReadDir {
        /// Backup root
        path: PathBuf,
        /// Underlying error
        source: std::io::Error,
    },
}
