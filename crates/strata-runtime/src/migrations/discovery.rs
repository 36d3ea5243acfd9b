//! Migration discovery.
//!
//! Turns a directory of `<YYYYMMDDHHMMSS>_<identifier>.<ext>` files into an
//! ordered list of registered migrations. Files that do not follow the naming
//! convention are ignored so unrelated files can live in the same directory.

use std::path::{Path, PathBuf};
use std::sync::{Arc, LazyLock};

use chrono::NaiveDateTime;
use regex::Regex;
use tracing::{debug, info};

use strata_core::config::MigratorConfig;
use strata_core::migration::Migration;
use strata_core::registry::MigrationRegistry;
use strata_core::{MigrationError, Result};

use super::sql::SqlMigration;

/// Timestamp layout used in migration file names.
pub const TIMESTAMP_FORMAT: &str = "%Y%m%d%H%M%S";

static FILE_STEM_PATTERN: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"^(\d{14})_([a-z0-9_]+)$").expect("migration file pattern is valid")
});

/// Parsed parts of a migration file name.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct MigrationFileName {
    pub timestamp: NaiveDateTime,
    pub identifier: String,
    /// `<timestamp>_<identifier>`, the name migrations are registered under.
    pub name: String,
}

/// Parse a file name such as `20230101000000_init.sql`.
///
/// Returns `None` when the stem does not match the convention or the
/// timestamp is not a real date.
pub fn parse_migration_filename(filename: &str) -> Option<MigrationFileName> {
    let stem = Path::new(filename).file_stem()?.to_str()?;
    let caps = FILE_STEM_PATTERN.captures(stem)?;
    let timestamp = NaiveDateTime::parse_from_str(&caps[1], TIMESTAMP_FORMAT).ok()?;

    Some(MigrationFileName {
        timestamp,
        identifier: caps[2].to_string(),
        name: stem.to_string(),
    })
}

/// Discovers migrations in a directory and resolves them against a registry.
pub struct MigrationDiscovery {
    dir: PathBuf,
    registry: Arc<MigrationRegistry>,
    auto_create_dir: bool,
}

impl MigrationDiscovery {
    pub fn new(dir: impl Into<PathBuf>, registry: Arc<MigrationRegistry>) -> Self {
        Self {
            dir: dir.into(),
            registry,
            auto_create_dir: true,
        }
    }

    pub fn from_config(config: &MigratorConfig, registry: Arc<MigrationRegistry>) -> Self {
        Self::new(config.migrations_dir.clone(), registry).with_auto_create_dir(config.auto_create_dir)
    }

    pub fn with_auto_create_dir(mut self, auto_create_dir: bool) -> Self {
        self.auto_create_dir = auto_create_dir;
        self
    }

    pub fn dir(&self) -> &Path {
        &self.dir
    }

    /// Registered migrations found in the directory, oldest first.
    ///
    /// Files whose name is not registered are skipped.
    pub fn discover(&self) -> Result<Vec<Arc<dyn Migration>>> {
        let files = self.scan(None)?;
        let total = files.len();

        let migrations: Vec<Arc<dyn Migration>> = files
            .into_iter()
            .filter_map(|(file, _)| self.registry.get(&file.name).ok())
            .collect();

        debug!(
            dir = %self.dir.display(),
            files = total,
            resolved = migrations.len(),
            "Discovered migrations"
        );
        Ok(migrations)
    }

    /// Load every `*.sql` migration file into the registry.
    ///
    /// All files are read and checked against the registry first; on any
    /// error nothing is registered. Returns how many were registered.
    pub fn register_sql_migrations(&self) -> Result<usize> {
        let files = self.scan(Some("sql"))?;

        let migrations = files
            .iter()
            .map(|(_, path)| SqlMigration::from_file(path))
            .collect::<Result<Vec<_>>>()?;
        if let Some(taken) = migrations.iter().find(|m| self.registry.has(m.name())) {
            return Err(MigrationError::AlreadyExists(taken.name().to_string()));
        }

        let count = migrations.len();
        for migration in migrations {
            self.registry.register(migration)?;
        }

        info!(dir = %self.dir.display(), count, "Loaded SQL migrations");
        Ok(count)
    }

    /// Check that `filename` follows the convention and exists in the directory.
    pub fn validate_migration_file(&self, filename: &str) -> Result<MigrationFileName> {
        let parsed = parse_migration_filename(filename)
            .ok_or_else(|| MigrationError::InvalidName(filename.to_string()))?;

        if !self.dir.join(filename).is_file() {
            return Err(MigrationError::NotFound(filename.to_string()));
        }
        Ok(parsed)
    }

    /// Conforming files, sorted by timestamp then name, one entry per name.
    fn scan(&self, extension: Option<&str>) -> Result<Vec<(MigrationFileName, PathBuf)>> {
        if self.auto_create_dir {
            std::fs::create_dir_all(&self.dir)
                .map_err(MigrationError::io("create migrations directory"))?;
        }

        let entries =
            std::fs::read_dir(&self.dir).map_err(MigrationError::io("read migrations directory"))?;

        let mut files = Vec::new();
        for entry in entries {
            let entry = entry.map_err(MigrationError::io("read migrations directory"))?;
            let path = entry.path();
            if !path.is_file() {
                continue;
            }
            if let Some(ext) = extension {
                if path.extension().and_then(|e| e.to_str()) != Some(ext) {
                    continue;
                }
            }

            let Some(filename) = path.file_name().and_then(|n| n.to_str()) else {
                continue;
            };
            match parse_migration_filename(filename) {
                Some(parsed) => files.push((parsed, path)),
                None => debug!(file = %filename, "Skipping non-migration file"),
            }
        }

        files.sort_by(|(a, a_path), (b, b_path)| {
            a.timestamp
                .cmp(&b.timestamp)
                .then_with(|| a.name.cmp(&b.name))
                .then_with(|| a_path.cmp(b_path))
        });
        files.dedup_by(|(a, _), (b, _)| a.name == b.name);

        Ok(files)
    }
}
