//! WAL position tracking
//!
//! Reads the server's current WAL insert position. Servers before version 10
//! only know the `xlog` spelling, so a failed query is retried with it.

use std::sync::Arc;

use pgvault_core::WalPosition;
use tracing::debug;

use crate::command::{CommandError, CommandOutput, CommandRunner};
use crate::tools::{PgTools, CURRENT_WAL_LSN_QUERY, LEGACY_WAL_LOCATION_QUERY};

/// Queries the server for its WAL position
#[derive(Clone)]
pub struct WalPositionTracker {
    tools: PgTools,
    runner: Arc<dyn CommandRunner>,
}

impl WalPositionTracker {
    /// Tracker issuing queries through `runner`
    pub fn new(tools: PgTools, runner: Arc<dyn CommandRunner>) -> Self {
        WalPositionTracker { tools, runner }
    }

    /// Current WAL position, whitespace trimmed
    ///
    /// The result may be empty if the server printed nothing.
    pub fn current_position(&self) -> Result<WalPosition, WalPositionError> {
        let current = match self.query(CURRENT_WAL_LSN_QUERY) {
            Ok(position) => return Ok(position),
            Err(reason) => reason,
        };
        debug!(
            target: "pgvault::wal",
            reason = %current,
            "pg_current_wal_lsn failed, trying legacy function"
        );

        self.query(LEGACY_WAL_LOCATION_QUERY)
            .map_err(|legacy| WalPositionError::QueryFailed { current, legacy })
    }

    fn query(&self, sql: &str) -> Result<WalPosition, String> {
        let result: Result<CommandOutput, CommandError> =
            self.runner.run(&self.tools.scalar_query(sql));
        match result {
            Ok(out) if out.success() => Ok(WalPosition::new(out.stdout_lossy())),
            Ok(out) => Err(out.failure_reason()),
            Err(e) => Err(e.to_string()),
        }
    }
}

/// WAL position errors
#[derive(Debug, thiserror::Error)]
pub enum WalPositionError {
    /// Both the current and the legacy query failed
    #[error("failed to read WAL position: {current}; legacy query: {legacy}")]
    QueryFailed {
        /// Failure of the current-name query
        current: String,
        /// Failure of the legacy-name query
        legacy: String,
    },
}
