//! Database tool invocations
//!
//! Builds the exact command lines used against the server. Connection
//! parameters go on the command line; the password travels in `PGPASSWORD`.

use std::path::Path;

use pgvault_core::{ConnectionConfig, ToolConfig, WalPosition};

use crate::command::Invocation;

/// Query for the current WAL insert position
pub const CURRENT_WAL_LSN_QUERY: &str = "SELECT pg_current_wal_lsn();";

/// Pre-10 spelling of [`CURRENT_WAL_LSN_QUERY`]
pub const LEGACY_WAL_LOCATION_QUERY: &str = "SELECT pg_current_xlog_location();";

/// Query producing one `CREATE EXTENSION` line per installed extension
pub const EXTENSIONS_QUERY: &str = "SELECT 'CREATE EXTENSION IF NOT EXISTS \"' || extname || '\";' FROM pg_extension;";

/// Upper bound on records printed by a WAL listing
pub const WAL_LISTING_LIMIT: u32 = 1000;

/// Maintenance database used for DROP/CREATE DATABASE
pub const ADMIN_DATABASE: &str = "postgres";

/// Quote an identifier for use in SQL text
pub fn quote_ident(ident: &str) -> String {
    format!("\"{}\"", ident.replace('"', "\"\""))
}

/// Command line builder for one server and tool set
#[derive(Debug, Clone)]
pub struct PgTools {
    conn: ConnectionConfig,
    tools: ToolConfig,
}

impl PgTools {
    /// Builder for `conn` using the executables named in `tools`
    pub fn new(conn: ConnectionConfig, tools: ToolConfig) -> Self {
        PgTools { conn, tools }
    }

    /// Connection the commands target
    pub fn connection(&self) -> &ConnectionConfig {
        &self.conn
    }

    fn connect(&self, program: &str, database: &str) -> Invocation {
        let mut inv = Invocation::new(program)
            .arg("-h")
            .arg(self.conn.host.as_str())
            .arg("-p")
            .arg(self.conn.port.to_string())
            .arg("-U")
            .arg(self.conn.user.as_str())
            .arg("-d")
            .arg(database);
        if !self.conn.password.is_empty() {
            inv = inv.env("PGPASSWORD", self.conn.password.as_str());
        }
        if !self.conn.ssl_mode.is_empty() {
            inv = inv.env("PGSSLMODE", self.conn.ssl_mode.as_str());
        }
        inv
    }

    /// Directory-format dump of the whole database into `out_dir`
    pub fn dump_directory(&self, out_dir: &Path, jobs: u32) -> Invocation {
        self.connect(&self.tools.pg_dump, &self.conn.database)
            .args(["-F", "d", "-f"])
            .arg(out_dir.display().to_string())
            .arg("-j")
            .arg(jobs.to_string())
            .arg("-v")
    }

    /// Schema-only plain SQL dump into `out_file`
    pub fn dump_schema(&self, out_file: &Path) -> Invocation {
        self.connect(&self.tools.pg_dump, &self.conn.database)
            .args(["-s", "-f"])
            .arg(out_file.display().to_string())
    }

    /// Write the extension creation script to `out_file`
    pub fn extension_script(&self, out_file: &Path) -> Invocation {
        self.connect(&self.tools.psql, &self.conn.database)
            .args(["-t", "-c", EXTENSIONS_QUERY, "-o"])
            .arg(out_file.display().to_string())
    }

    /// Single-value query printed without headers
    pub fn scalar_query(&self, sql: &str) -> Invocation {
        self.connect(&self.tools.psql, &self.conn.database)
            .args(["-t", "-c", sql])
    }

    /// SQL statement against the maintenance database
    pub fn admin_statement(&self, sql: &str) -> Invocation {
        self.connect(&self.tools.psql, ADMIN_DATABASE).args(["-c", sql])
    }

    /// `DROP DATABASE IF EXISTS` for the configured database
    pub fn drop_database(&self) -> Invocation {
        self.admin_statement(&format!(
            "DROP DATABASE IF EXISTS {};",
            quote_ident(&self.conn.database)
        ))
    }

    /// `CREATE DATABASE` for the configured database
    pub fn create_database(&self) -> Invocation {
        self.admin_statement(&format!("CREATE DATABASE {};", quote_ident(&self.conn.database)))
    }

    /// Parallel restore of a directory-format dump
    pub fn restore_directory(&self, dump_dir: &Path, jobs: u32) -> Invocation {
        self.connect(&self.tools.pg_restore, &self.conn.database)
            .args(["-F", "d", "-j"])
            .arg(jobs.to_string())
            .arg("-v")
            .arg(dump_dir.display().to_string())
    }

    /// List WAL records in `archive_dir` between two positions
    pub fn wal_listing(&self, archive_dir: &Path, start: &WalPosition, end: &WalPosition) -> Invocation {
        Invocation::new(self.tools.pg_waldump.as_str())
            .arg("--path")
            .arg(archive_dir.display().to_string())
            .arg("--start")
            .arg(start.as_str())
            .arg("--end")
            .arg(end.as_str())
            .arg("--quiet")
            .arg("-n")
            .arg(WAL_LISTING_LIMIT.to_string())
    }
}
