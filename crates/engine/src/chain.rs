//! Backup chain resolution
//!
//! An incremental backup is only restorable on top of its ancestors. The
//! chain is found by walking `parent_backup` links from the target until a
//! full backup is reached, then reversed so the full backup comes first.
//!
//! # Invariants
//!
//! - The first link is always a full backup
//! - Every later link is an incremental whose parent is the previous link
//! - A parent link that revisits a directory is rejected rather than looped
//! - A parent is a single directory name inside the backup root

use std::collections::HashSet;
use std::path::{Component, Path, PathBuf};

use pgvault_core::{BackupMetadata, BackupType, MetadataError};
use pgvault_storage::find_latest_backup;
use tracing::debug;

/// Identifier that selects the most recent backup
pub const LATEST: &str = "latest";

/// One backup in a restore chain
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ChainLink {
    /// Backup directory
    pub dir: PathBuf,
    /// Its metadata
    pub metadata: BackupMetadata,
}

impl ChainLink {
    /// Directory name of the backup
    pub fn name(&self) -> String {
        self.dir
            .file_name()
            .map(|n| n.to_string_lossy().into_owned())
            .unwrap_or_default()
    }

    /// Backup kind
    pub fn backup_type(&self) -> BackupType {
        self.metadata.backup_type
    }
}

/// Backups to apply in order, full backup first
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct BackupChain {
    links: Vec<ChainLink>,
}

impl BackupChain {
    /// All links, oldest first
    pub fn links(&self) -> &[ChainLink] {
        &self.links
    }

    /// Number of backups in the chain
    pub fn len(&self) -> usize {
        self.links.len()
    }

    /// Always false for a resolved chain
    pub fn is_empty(&self) -> bool {
        self.links.is_empty()
    }

    /// The full backup the chain starts from
    pub fn base(&self) -> Option<&ChainLink> {
        self.links.first()
    }

    /// The backup that was asked for
    pub fn target(&self) -> Option<&ChainLink> {
        self.links.last()
    }

    /// Iterate links, oldest first
    pub fn iter(&self) -> std::slice::Iter<'_, ChainLink> {
        self.links.iter()
    }
}

impl IntoIterator for BackupChain {
    type Item = ChainLink;
    type IntoIter = std::vec::IntoIter<ChainLink>;

    fn into_iter(self) -> Self::IntoIter {
        self.links.into_iter()
    }
}

/// Resolves identifiers and chains inside a backup root
#[derive(Debug, Clone)]
pub struct ChainResolver {
    backup_root: PathBuf,
}

impl ChainResolver {
    /// Resolver over `backup_root`
    pub fn new(backup_root: impl Into<PathBuf>) -> Self {
        ChainResolver {
            backup_root: backup_root.into(),
        }
    }

    /// The backup root
    pub fn backup_root(&self) -> &Path {
        &self.backup_root
    }

    /// Turn a user identifier into a backup directory
    ///
    /// `"latest"` picks the most recently modified backup. Anything else is
    /// a path, taken relative to the backup root unless absolute, and must
    /// be an existing directory.
    pub fn locate_backup_dir(&self, identifier: &str) -> Result<PathBuf, ChainError> {
        if identifier == LATEST {
            let latest = find_latest_backup(&self.backup_root).map_err(|source| ChainError::ReadRoot {
                root: self.backup_root.clone(),
                source,
            })?;
            return latest
                .map(|entry| entry.path)
                .ok_or_else(|| ChainError::NoBackups {
                    root: self.backup_root.clone(),
                });
        }

        let path = Path::new(identifier);
        let path = if path.is_absolute() {
            path.to_path_buf()
        } else {
            self.backup_root.join(path)
        };
        match std::fs::metadata(&path) {
            Ok(meta) if meta.is_dir() => Ok(path),
            Ok(_) => Err(ChainError::NotADirectory { path }),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => Err(ChainError::NotFound { path }),
            Err(source) => Err(ChainError::Stat { path, source }),
        }
    }

    /// Walk parent links from `dir` back to a full backup
    pub fn build_backup_chain(&self, dir: &Path, metadata: BackupMetadata) -> Result<BackupChain, ChainError> {
        let mut links = Vec::new();
        let mut visited = HashSet::new();
        let mut dir = dir.to_path_buf();
        let mut metadata = metadata;

        loop {
            if !visited.insert(dir.clone()) {
                return Err(ChainError::Cycle { dir });
            }
            let parent = match metadata.backup_type {
                BackupType::Full => None,
                BackupType::Incremental => match metadata.parent.as_deref() {
                    Some(parent) if !parent.is_empty() => Some(self.parent_dir(&dir, parent)?),
                    _ => return Err(ChainError::NoParent { dir }),
                },
            };
            links.push(ChainLink { dir, metadata });

            let Some(parent_dir) = parent else {
                break;
            };
            metadata = BackupMetadata::load(&parent_dir).map_err(|source| ChainError::ParentMetadata {
                parent: parent_dir.clone(),
                source,
            })?;
            dir = parent_dir;
        }

        links.reverse();
        debug!(target: "pgvault::restore", links = links.len(), "Resolved backup chain");
        Ok(BackupChain { links })
    }

    fn parent_dir(&self, dir: &Path, parent: &str) -> Result<PathBuf, ChainError> {
        let mut components = Path::new(parent).components();
        match (components.next(), components.next()) {
            (Some(Component::Normal(name)), None) => Ok(self.backup_root.join(name)),
            _ => Err(ChainError::InvalidParent {
                dir: dir.to_path_buf(),
                parent: parent.to_string(),
            }),
        }
    }
}

/// Chain resolution errors
#[derive(Debug, thiserror::Error)]
pub enum ChainError {
    /// `latest` was requested but the root holds no backups
    #[error("no backups found in {}", .root.display())]
    NoBackups {
        /// Backup root
        root: PathBuf,
    },

    /// The backup root could not be listed
    #[error("failed to read backup directory {}: {source}", .root.display())]
    ReadRoot {
        /// Backup root
        root: PathBuf,
        /// Underlying error
        source: std::io::Error,
    },

    /// The named backup does not exist
    #[error("backup not found: {}", .path.display())]
    NotFound {
        /// Resolved path
        path: PathBuf,
    },

    /// The named backup is not a directory
    #[error("backup path is not a directory: {}", .path.display())]
    NotADirectory {
        /// Resolved path
        path: PathBuf,
    },

    /// The named backup could not be inspected
    #[error("failed to stat {}: {source}", .path.display())]
    Stat {
        /// Resolved path
        path: PathBuf,
        /// Underlying error
        source: std::io::Error,
    },

    /// An incremental backup names no parent
    #[error("incremental backup has no parent: {}", .dir.display())]
    NoParent {
        /// Backup directory
        dir: PathBuf,
    },

    /// A parent name that would leave the backup root
    #[error("invalid parent backup {parent:?} in {}", .dir.display())]
    InvalidParent {
        /// Backup directory
        dir: PathBuf,
        /// Recorded parent name
        parent: String,
    },

    /// A parent's metadata could not be loaded
    #[error("failed to load parent metadata {}: {source}", .parent.display())]
    ParentMetadata {
        /// Parent directory
        parent: PathBuf,
        /// Underlying error
        source: MetadataError,
    },

    /// Parent links loop back on themselves
    #[error("backup chain loops at {}", .dir.display())]
    Cycle {
        /// First directory visited twice
        dir: PathBuf,
    },
}
