//! Configuration via `pgvault.toml`
//!
//! One file carries the database connection, backup output settings,
//! restore settings, logging level and tool names. Every section has
//! defaults, so an empty file is a valid configuration.
//!
//! ```toml
//! [postgres]
//! host = "db.internal"
//! database = "app"
//!
//! [backup]
//! output_dir = "/var/backups/postgres"
//! split_size_mb = 1024
//! retention_days = 7
//!
//! [restore]
//! drop_database = false
//! wal_destination_dir = "/var/lib/postgresql/wal_restore"
//! ```

use serde::{Deserialize, Serialize};
use std::fmt;
use std::path::{Path, PathBuf};

/// Conventional config file name
pub const CONFIG_FILE_NAME: &str = "pgvault.toml";

/// Default degree of parallelism handed to the dump/restore tools
pub const DEFAULT_JOBS: u32 = 4;

/// Name of the shared WAL archive directory under the output root
pub const WAL_ARCHIVE_DIR_NAME: &str = "wal_archive";

const LOG_LEVELS: [&str; 5] = ["trace", "debug", "info", "warn", "error"];

/// Database connection parameters
///
/// The password is handed to tools via `PGPASSWORD` and never printed.
#[derive(Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct ConnectionConfig {
    /// Server host
    pub host: String,
    /// Server port
    pub port: u16,
    /// Role to connect as
    pub user: String,
    /// Role password
    pub password: String,
    /// Database name
    pub database: String,
    /// libpq sslmode
    pub ssl_mode: String,
}

impl Default for ConnectionConfig {
    fn default() -> Self {
        ConnectionConfig {
            host: "localhost".to_string(),
            port: 5432,
            user: "postgres".to_string(),
            password: String::new(),
            database: "postgres".to_string(),
            ssl_mode: "disable".to_string(),
        }
    }
}

impl fmt::Debug for ConnectionConfig {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ConnectionConfig")
            .field("host", &self.host)
            .field("port", &self.port)
            .field("user", &self.user)
            .field("password", &"<redacted>")
            .field("database", &self.database)
            .field("ssl_mode", &self.ssl_mode)
            .finish()
    }
}

impl ConnectionConfig {
    /// Set host and port
    pub fn with_host(mut self, host: impl Into<String>, port: u16) -> Self {
        self.host = host.into();
        self.port = port;
        self
    }

    /// Set user and password
    pub fn with_credentials(mut self, user: impl Into<String>, password: impl Into<String>) -> Self {
        self.user = user.into();
        self.password = password.into();
        self
    }

    /// Set database name
    pub fn with_database(mut self, database: impl Into<String>) -> Self {
        self.database = database.into();
        self
    }

    /// Validate connection settings
    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.host.is_empty() {
            return Err(ConfigError::Invalid("postgres host is empty".into()));
        }
        if self.port == 0 {
            return Err(ConfigError::Invalid("postgres port must be non-zero".into()));
        }
        if self.database.is_empty() {
            return Err(ConfigError::Invalid("database name is empty".into()));
        }
        Ok(())
    }
}

/// Backup run settings
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct BackupConfig {
    /// Root directory holding backup directories
    pub output_dir: PathBuf,
    /// Split files larger than this many MiB (0 disables splitting)
    pub split_size_mb: u64,
    /// Remove backups older than this many days (<= 0 disables the sweep)
    pub retention_days: i64,
    /// Parallel jobs for the dump tool
    pub jobs: u32,
    /// Free space required by the external preflight check
    pub min_free_space_gb: u64,
    /// Shared WAL archive; defaults to `<output_dir>/wal_archive`
    #[serde(skip_serializing_if = "Option::is_none")]
    pub wal_archive_dir: Option<PathBuf>,
}

impl Default for BackupConfig {
    fn default() -> Self {
        BackupConfig {
            output_dir: PathBuf::from("/var/backups/postgres"),
            split_size_mb: 0,
            retention_days: 0,
            jobs: DEFAULT_JOBS,
            min_free_space_gb: 0,
            wal_archive_dir: None,
        }
    }
}

impl BackupConfig {
    /// Config writing into `output_dir` with all other settings defaulted
    pub fn new(output_dir: impl Into<PathBuf>) -> Self {
        BackupConfig {
            output_dir: output_dir.into(),
            ..Default::default()
        }
    }

    /// Set split threshold in MiB
    pub fn with_split_size_mb(mut self, mb: u64) -> Self {
        self.split_size_mb = mb;
        self
    }

    /// Set retention window in days
    pub fn with_retention_days(mut self, days: i64) -> Self {
        self.retention_days = days;
        self
    }

    /// Set dump parallelism
    pub fn with_jobs(mut self, jobs: u32) -> Self {
        self.jobs = jobs;
        self
    }

    /// Set the shared WAL archive directory
    pub fn with_wal_archive_dir(mut self, dir: impl Into<PathBuf>) -> Self {
        self.wal_archive_dir = Some(dir.into());
        self
    }

    /// Split threshold in bytes, `None` when splitting is disabled
    pub fn split_threshold_bytes(&self) -> Option<u64> {
        match self.split_size_mb {
            0 => None,
            mb => Some(mb.saturating_mul(1 << 20)),
        }
    }

    /// Resolved WAL archive directory
    pub fn wal_archive_dir(&self) -> PathBuf {
        self.wal_archive_dir
            .clone()
            .unwrap_or_else(|| self.output_dir.join(WAL_ARCHIVE_DIR_NAME))
    }

    /// Validate backup settings
    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.output_dir.as_os_str().is_empty() {
            return Err(ConfigError::Invalid("backup output_dir is empty".into()));
        }
        if self.jobs == 0 {
            return Err(ConfigError::Invalid("backup jobs must be at least 1".into()));
        }
        Ok(())
    }
}

/// Restore run settings
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct RestoreConfig {
    /// Database to restore into
    pub target: ConnectionConfig,
    /// Root directory holding backup directories
    pub backup_root: PathBuf,
    /// Drop and recreate the target before restoring a full backup
    pub drop_database: bool,
    /// Parallel jobs for the restore tool
    pub jobs: u32,
    /// Where incremental WAL is staged for point-in-time recovery
    #[serde(skip_serializing_if = "Option::is_none")]
    pub wal_destination_dir: Option<PathBuf>,
}

impl Default for RestoreConfig {
    fn default() -> Self {
        RestoreConfig {
            target: ConnectionConfig::default(),
            backup_root: PathBuf::from("/var/backups/postgres"),
            drop_database: true,
            jobs: DEFAULT_JOBS,
            wal_destination_dir: None,
        }
    }
}

impl RestoreConfig {
    /// Config reading from `backup_root` with all other settings defaulted
    pub fn new(backup_root: impl Into<PathBuf>) -> Self {
        RestoreConfig {
            backup_root: backup_root.into(),
            ..Default::default()
        }
    }

    /// Set the target connection
    pub fn with_target(mut self, target: ConnectionConfig) -> Self {
        self.target = target;
        self
    }

    /// Enable or disable drop-before-restore
    pub fn with_drop_database(mut self, drop: bool) -> Self {
        self.drop_database = drop;
        self
    }

    /// Set restore parallelism
    pub fn with_jobs(mut self, jobs: u32) -> Self {
        self.jobs = jobs;
        self
    }

    /// Stage incremental WAL into `dir`
    pub fn with_wal_destination(mut self, dir: impl Into<PathBuf>) -> Self {
        self.wal_destination_dir = Some(dir.into());
        self
    }

    /// Validate restore settings
    pub fn validate(&self) -> Result<(), ConfigError> {
        self.target.validate()?;
        if self.backup_root.as_os_str().is_empty() {
            return Err(ConfigError::Invalid("restore backup_root is empty".into()));
        }
        if self.jobs == 0 {
            return Err(ConfigError::Invalid("restore jobs must be at least 1".into()));
        }
        Ok(())
    }
}

/// Logging settings
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct LoggingConfig {
    /// One of trace, debug, info, warn, error
    pub level: String,
}

impl Default for LoggingConfig {
    fn default() -> Self {
        LoggingConfig {
            level: "info".to_string(),
        }
    }
}

impl LoggingConfig {
    /// Validate the level name
    pub fn validate(&self) -> Result<(), ConfigError> {
        let level = self.level.to_ascii_lowercase();
        if LOG_LEVELS.contains(&level.as_str()) {
            Ok(())
        } else {
            Err(ConfigError::Invalid(format!(
                "unknown log level '{}', expected one of {}",
                self.level,
                LOG_LEVELS.join(", ")
            )))
        }
    }
}

/// Executable names for the external database tools
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct ToolConfig {
    /// Dump tool
    pub pg_dump: String,
    /// Restore tool
    pub pg_restore: String,
    /// SQL client
    pub psql: String,
    /// WAL inspection tool
    pub pg_waldump: String,
}

impl Default for ToolConfig {
    fn default() -> Self {
        ToolConfig {
            pg_dump: "pg_dump".to_string(),
            pg_restore: "pg_restore".to_string(),
            psql: "psql".to_string(),
            pg_waldump: "pg_waldump".to_string(),
        }
    }
}

/// Root configuration document
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct Config {
    /// Source database for backups
    pub postgres: ConnectionConfig,
    /// Backup settings
    pub backup: BackupConfig,
    /// Restore settings
    pub restore: RestoreConfig,
    /// Logging settings
    pub logging: LoggingConfig,
    /// Tool executables
    pub tools: ToolConfig,
}

impl Config {
    /// Parse configuration from TOML text
    pub fn from_toml_str(content: &str) -> Result<Self, ConfigError> {
        let config: Config = toml::from_str(content)?;
        config.validate()?;
        Ok(config)
    }

    /// Read and parse configuration from a file
    pub fn from_file(path: &Path) -> Result<Self, ConfigError> {
        let content = std::fs::read_to_string(path).map_err(|source| ConfigError::Read {
            path: path.to_path_buf(),
            source,
        })?;
        Self::from_toml_str(&content)
    }

    /// Validate every section
    pub fn validate(&self) -> Result<(), ConfigError> {
        self.postgres.validate()?;
        self.backup.validate()?;
        self.restore.validate()?;
        self.logging.validate()?;
        Ok(())
    }
}

/// Configuration errors
#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    /// Config file could not be read
    #[error("failed to read config file '{}': {source}", .path.display())]
    Read {
        /// File path
        path: PathBuf,
        /// Underlying error
        source: std::io::Error,
    },

    /// Config file is not valid TOML for this schema
    #[error("failed to parse config: {0}")]
    Parse(#[from] toml::de::Error),

    /// A setting is out of range
    #[error("invalid config: {0}")]
    Invalid(String),
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    #[test]
    fn test_default_config_is_valid() {
        let config = Config::default();
        assert!(config.validate().is_ok());
        assert_eq!(config.backup.jobs, 4);
        assert!(config.restore.drop_database);
        assert_eq!(config.restore.wal_destination_dir, None);
        assert_eq!(config.postgres.port, 5432);
    }

    #[test]
    fn test_empty_toml_uses_defaults() {
        let config = Config::from_toml_str("").unwrap();
        assert_eq!(config, Config::default());
    }

    #[test]
    fn test_partial_toml() {
        let config = Config::from_toml_str(
            r#"
            [postgres]
            host = "db.internal"
            database = "app"

            [backup]
            output_dir = "/srv/backups"
            split_size_mb = 2
            retention_days = 7

            [restore]
            drop_database = false
            wal_destination_dir = "/srv/wal"
            "#,
        )
        .unwrap();

        assert_eq!(config.postgres.host, "db.internal");
        assert_eq!(config.postgres.port, 5432);
        assert_eq!(config.backup.split_threshold_bytes(), Some(2 * 1024 * 1024));
        assert_eq!(config.backup.retention_days, 7);
        assert_eq!(
            config.backup.wal_archive_dir(),
            PathBuf::from("/srv/backups/wal_archive")
        );
        assert!(!config.restore.drop_database);
        assert_eq!(
            config.restore.wal_destination_dir,
            Some(PathBuf::from("/srv/wal"))
        );
    }

    #[test]
    fn test_split_disabled_at_zero() {
        assert_eq!(BackupConfig::new("/tmp/x").split_threshold_bytes(), None);
    }

    #[test]
    fn test_rejects_zero_jobs() {
        let result = Config::from_toml_str("[backup]\njobs = 0\n");
        assert!(matches!(result, Err(ConfigError::Invalid(_))));
    }

    #[test]
    fn test_rejects_unknown_log_level() {
        let result = Config::from_toml_str("[logging]\nlevel = \"chatty\"\n");
        assert!(matches!(result, Err(ConfigError::Invalid(msg)) if msg.contains("chatty")));
    }

    #[test]
    fn test_rejects_malformed_toml() {
        let result = Config::from_toml_str("[backup\n");
        assert!(matches!(result, Err(ConfigError::Parse(_))));
    }

    #[test]
    fn test_from_file() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join(CONFIG_FILE_NAME);
        std::fs::write(&path, "[logging]\nlevel = \"debug\"\n").unwrap();
        let config = Config::from_file(&path).unwrap();
        assert_eq!(config.logging.level, "debug");

        let missing = Config::from_file(&dir.path().join("missing.toml"));
        assert!(matches!(missing, Err(ConfigError::Read { .. })));
    }

    #[test]
    fn test_password_is_redacted() {
        let conn = ConnectionConfig::default().with_credentials("app", "s3cret");
        let debug = format!("{:?}", conn);
        assert!(!debug.contains("s3cret"));
        assert!(debug.contains("<redacted>"));
    }
}
