//! Filesystem layer for pgvault
//!
//! This crate handles everything that touches backup directories on disk:
//!
//! - Split: Cut oversized files into `<name>.partNNN` parts
//! - Assemble: Concatenate parts back into the original file
//! - Copy: Verbatim, fsynced file copies
//! - Layout: Scan a backup root, find the latest backup, measure a directory
//! - Retention: Sweep backup directories older than the retention window

#![warn(missing_docs)]
#![warn(clippy::all)]

pub mod assemble;
pub mod copy;
pub mod layout;
pub mod retention;
pub mod split;

pub use assemble::{part_number, AssembleError, AssembleInfo, FileAssembler};
pub use copy::copy_file;
pub use layout::{dir_stats, find_latest_backup, list_backups, BackupEntry, DirStats};
pub use retention::{RetentionSweeper, SweepError, SweepInfo};
pub use split::{part_path, FileSplitter, SplitError, SplitInfo};
