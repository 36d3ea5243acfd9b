use std::path::PathBuf;
use std::time::Duration;

use serde::{Deserialize, Serialize};

use crate::error::{MigrationError, Result};

/// Migration engine configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct MigratorConfig {
    /// Maximum number of migrations applied in one transaction.
    #[serde(default = "default_batch_size")]
    pub batch_size: usize,

    /// Overall deadline for one run or rollback call, in seconds.
    #[serde(default = "default_timeout")]
    pub timeout_secs: u64,

    /// Attempts per migration before the batch is aborted.
    #[serde(default = "default_retry_attempts")]
    pub retry_attempts: u32,

    /// Backoff unit between attempts, in milliseconds. Attempt `n` waits `n` units.
    ///
    /// The batch transaction stays open while waiting.
    #[serde(default = "default_retry_backoff")]
    pub retry_backoff_ms: u64,

    /// Name of the applied-records table, optionally schema-qualified.
    #[serde(default = "default_table_name")]
    pub table_name: String,

    /// Create the migrations directory when it is missing.
    #[serde(default = "default_true")]
    pub auto_create_dir: bool,

    /// Directory holding migration files.
    #[serde(default = "default_migrations_dir")]
    pub migrations_dir: PathBuf,
}

impl Default for MigratorConfig {
    fn default() -> Self {
        Self {
            batch_size: default_batch_size(),
            timeout_secs: default_timeout(),
            retry_attempts: default_retry_attempts(),
            retry_backoff_ms: default_retry_backoff(),
            table_name: default_table_name(),
            auto_create_dir: true,
            migrations_dir: default_migrations_dir(),
        }
    }
}

impl MigratorConfig {
    pub fn timeout(&self) -> Duration {
        Duration::from_secs(self.timeout_secs)
    }

    pub fn retry_backoff(&self) -> Duration {
        Duration::from_millis(self.retry_backoff_ms)
    }

    /// Check the values the engine relies on.
    ///
    /// The table name ends up interpolated into SQL, so it must be a plain
    /// identifier.
    pub fn validate(&self) -> Result<()> {
        if self.batch_size == 0 {
            return Err(MigrationError::Config(
                "migrations.batch_size must be at least 1".into(),
            ));
        }
        if self.retry_attempts == 0 {
            return Err(MigrationError::Config(
                "migrations.retry_attempts must be at least 1".into(),
            ));
        }
        if self.timeout_secs == 0 {
            return Err(MigrationError::Config(
                "migrations.timeout_secs must be greater than 0".into(),
            ));
        }
        if !is_valid_table_name(&self.table_name) {
            return Err(MigrationError::Config(format!(
                "migrations.table_name '{}' is not a valid identifier",
                self.table_name
            )));
        }
        Ok(())
    }
}

/// `table` or `schema.table`, each part `[A-Za-z_][A-Za-z0-9_]*`.
pub fn is_valid_table_name(name: &str) -> bool {
    let parts: Vec<&str> = name.split('.').collect();
    if parts.len() > 2 {
        return false;
    }
    parts.iter().all(|part| {
        let mut chars = part.chars();
        match chars.next() {
            Some(c) if c.is_ascii_alphabetic() || c == '_' => {
                chars.all(|c| c.is_ascii_alphanumeric() || c == '_')
            }
            _ => false,
        }
    })
}

fn default_batch_size() -> usize {
    10
}

fn default_timeout() -> u64 {
    5 * 60
}

fn default_retry_attempts() -> u32 {
    3
}

fn default_retry_backoff() -> u64 {
    1000
}

fn default_table_name() -> String {
    "migrations".to_string()
}

fn default_true() -> bool {
    true
}

fn default_migrations_dir() -> PathBuf {
    PathBuf::from("migrations")
}
