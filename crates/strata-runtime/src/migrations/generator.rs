use std::io::Write;
use std::path::PathBuf;

use chrono::{DateTime, Utc};
use tracing::info;

use strata_core::config::MigratorConfig;
use strata_core::{MigrationError, Result};

use super::discovery::TIMESTAMP_FORMAT;

/// Creates new, empty SQL migration files.
pub struct MigrationGenerator {
    /// Output directory for migrations.
    output_dir: PathBuf,
    auto_create_dir: bool,
}

/// A migration file written by the generator.
#[derive(Debug, Clone)]
pub struct GeneratedMigration {
    /// Full migration name, `<timestamp>_<identifier>`.
    pub name: String,
    pub created_at: DateTime<Utc>,
    pub path: PathBuf,
}

impl MigrationGenerator {
    pub fn new(output_dir: impl Into<PathBuf>) -> Self {
        Self {
            output_dir: output_dir.into(),
            auto_create_dir: true,
        }
    }

    pub fn from_config(config: &MigratorConfig) -> Self {
        Self {
            output_dir: config.migrations_dir.clone(),
            auto_create_dir: config.auto_create_dir,
        }
    }

    /// Write a new migration stamped with the current time.
    pub fn generate(&self, name: &str) -> Result<GeneratedMigration> {
        self.generate_at(name, Utc::now())
    }

    /// Write a new migration stamped with `now`.
    ///
    /// Fails with `InvalidName` unless `name` is non-empty ASCII letters,
    /// digits and underscores, and with `AlreadyExists` if the file is
    /// already there.
    pub fn generate_at(&self, name: &str, now: DateTime<Utc>) -> Result<GeneratedMigration> {
        validate_name(name)?;

        let full_name = format!("{}_{}", now.format(TIMESTAMP_FORMAT), name.to_lowercase());

        if self.auto_create_dir {
            std::fs::create_dir_all(&self.output_dir)
                .map_err(MigrationError::io("create migrations directory"))?;
        }

        let path = self.output_dir.join(format!("{}.sql", full_name));
        let mut file = match std::fs::OpenOptions::new()
            .write(true)
            .create_new(true)
            .open(&path)
        {
            Ok(file) => file,
            Err(e) if e.kind() == std::io::ErrorKind::AlreadyExists => {
                return Err(MigrationError::AlreadyExists(full_name));
            }
            Err(e) => return Err(MigrationError::io("create migration file")(e)),
        };

        let content = format!(
            "-- Migration: {}\n-- Created at: {}\n\n-- @up\n\n\n-- @down\n\n",
            full_name,
            now.format("%Y-%m-%d %H:%M:%S UTC")
        );
        file.write_all(content.as_bytes())
            .map_err(MigrationError::io("create migration file"))?;

        info!(migration = %full_name, path = %path.display(), "Created migration");

        Ok(GeneratedMigration {
            name: full_name,
            created_at: now,
            path,
        })
    }
}

fn validate_name(name: &str) -> Result<()> {
    if name.is_empty() {
        return Err(MigrationError::InvalidName(
            "migration name cannot be empty".into(),
        ));
    }
    if !name.chars().all(|c| c.is_ascii_alphanumeric() || c == '_') {
        return Err(MigrationError::InvalidName(format!(
            "'{}' may only contain letters, digits and underscores",
            name
        )));
    }
    Ok(())
}
