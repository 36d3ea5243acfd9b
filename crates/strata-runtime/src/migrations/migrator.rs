//! Migration orchestration.
//!
//! Migrations run in the order given, in contiguous batches of at most
//! `batch_size`, one transaction per batch. Each unit is retried in place
//! under a savepoint; a unit that exhausts its attempts rolls back the whole
//! batch. Batches committed earlier in the same run stay committed.
//!
//! Retries happen while the batch transaction is open, so the connection and
//! any locks taken by earlier statements are held through the backoff. Keep
//! `retry_backoff_ms` small for migrations that touch hot tables.

use std::collections::{HashMap, HashSet};
use std::sync::Arc;
use std::time::Instant;

use chrono::{DateTime, Utc};
use serde::Serialize;
use tracing::{debug, info, warn};

use strata_core::config::MigratorConfig;
use strata_core::migration::{Migration, MigrationRecord};
use strata_core::registry::MigrationRegistry;
use strata_core::{MigrationError, Result};

use crate::store::{MigrationStore, StoreTransaction};

const ATTEMPT_SAVEPOINT: &str = "strata_attempt";

#[derive(Debug, Clone, Copy)]
enum Direction {
    Up,
    Down,
}

impl Direction {
    fn failure(self, name: &str, attempts: u32, source: MigrationError) -> MigrationError {
        let name = name.to_string();
        let source = Box::new(source);
        match self {
            Direction::Up => MigrationError::ApplyFailure {
                name,
                attempts,
                source,
            },
            Direction::Down => MigrationError::RollbackFailure {
                name,
                attempts,
                source,
            },
        }
    }
}

/// Outcome of a successful run.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct RunSummary {
    /// Migrations applied by this run, in order.
    pub applied: Vec<String>,
    /// Migrations that already had a record.
    pub skipped: Vec<String>,
}

/// Applied and pending migrations at a point in time.
#[derive(Debug, Clone, Default, Serialize)]
pub struct MigrationStatus {
    pub applied: Vec<AppliedMigration>,
    pub pending: Vec<String>,
}

/// An applied migration as reported by [`Migrator::status`].
#[derive(Debug, Clone, Serialize)]
pub struct AppliedMigration {
    pub name: String,
    pub applied_at: DateTime<Utc>,
    /// `None` when the migration is not among the available ones.
    pub reversible: Option<bool>,
}

/// Applies and reverts migrations against a [`MigrationStore`].
pub struct Migrator {
    store: Arc<dyn MigrationStore>,
    config: MigratorConfig,
}

impl Migrator {
    pub fn new(store: Arc<dyn MigrationStore>, config: MigratorConfig) -> Self {
        Self { store, config }
    }

    pub fn with_defaults(store: Arc<dyn MigrationStore>) -> Self {
        Self::new(store, MigratorConfig::default())
    }

    pub fn config(&self) -> &MigratorConfig {
        &self.config
    }

    /// Apply every migration in `migrations` that has no record yet.
    pub async fn run_migrations(&self, migrations: &[Arc<dyn Migration>]) -> Result<RunSummary> {
        let deadline = self.config.timeout();
        tokio::time::timeout(deadline, self.run_inner(migrations))
            .await
            .map_err(|_| MigrationError::Timeout {
                op: "run migrations",
                after: deadline,
            })?
    }

    async fn run_inner(&self, migrations: &[Arc<dyn Migration>]) -> Result<RunSummary> {
        self.config.validate()?;
        self.store.ensure_table(&self.config.table_name).await?;

        let batch_size = self.config.batch_size.max(1);
        let mut summary = RunSummary::default();

        for (index, batch) in migrations.chunks(batch_size).enumerate() {
            debug!(batch = index + 1, size = batch.len(), "Starting migration batch");

            let mut tx = self.store.begin().await?;
            match self.apply_batch(tx.as_mut(), batch, &mut summary).await {
                Ok(()) => tx.commit().await?,
                Err(e) => {
                    if let Err(rollback_err) = tx.rollback().await {
                        warn!(batch = index + 1, error = %rollback_err, "Failed to roll back batch");
                    }
                    return Err(e);
                }
            }
        }

        info!(
            applied = summary.applied.len(),
            skipped = summary.skipped.len(),
            "Migrations complete"
        );
        Ok(summary)
    }

    async fn apply_batch(
        &self,
        tx: &mut dyn StoreTransaction,
        batch: &[Arc<dyn Migration>],
        summary: &mut RunSummary,
    ) -> Result<()> {
        let table = self.config.table_name.as_str();
        let mut applied = Vec::new();
        let mut skipped = Vec::new();

        for migration in batch {
            let name = migration.name();
            if tx.find_record(table, name).await?.is_some() {
                debug!(migration = %name, "Already applied, skipping");
                skipped.push(name.to_string());
                continue;
            }

            info!(migration = %name, "Applying migration");
            let started = Instant::now();
            self.attempt(tx, migration.as_ref(), Direction::Up).await?;
            tx.insert_record(table, &MigrationRecord::applied_now(name))
                .await?;
            info!(
                migration = %name,
                elapsed_ms = started.elapsed().as_millis() as u64,
                "Migration applied"
            );
            applied.push(name.to_string());
        }

        // Only report once the whole batch went through.
        summary.applied.extend(applied);
        summary.skipped.extend(skipped);
        Ok(())
    }

    /// Run one direction of `migration`, retrying under a savepoint.
    async fn attempt(
        &self,
        tx: &mut dyn StoreTransaction,
        migration: &dyn Migration,
        direction: Direction,
    ) -> Result<()> {
        let max_attempts = self.config.retry_attempts.max(1);
        let mut attempt = 0;

        loop {
            attempt += 1;
            tx.savepoint(ATTEMPT_SAVEPOINT).await?;

            let result = match direction {
                Direction::Up => migration.up(tx.connection()).await,
                Direction::Down => migration.down(tx.connection()).await,
            };

            match result {
                Ok(()) => {
                    tx.release_savepoint(ATTEMPT_SAVEPOINT).await?;
                    return Ok(());
                }
                Err(e) => {
                    tx.rollback_to_savepoint(ATTEMPT_SAVEPOINT).await?;
                    tx.release_savepoint(ATTEMPT_SAVEPOINT).await?;

                    if attempt >= max_attempts {
                        return Err(direction.failure(migration.name(), attempt, e));
                    }

                    let backoff = self.config.retry_backoff() * attempt;
                    warn!(
                        migration = %migration.name(),
                        attempt,
                        max_attempts,
                        backoff_ms = backoff.as_millis() as u64,
                        error = %e,
                        "Migration attempt failed, retrying"
                    );
                    tokio::time::sleep(backoff).await;
                }
            }
        }
    }

    /// Revert an applied migration and delete its record.
    pub async fn rollback_migration(&self, migration: &dyn Migration) -> Result<()> {
        let deadline = self.config.timeout();
        tokio::time::timeout(deadline, self.rollback_inner(migration))
            .await
            .map_err(|_| MigrationError::Timeout {
                op: "rollback migration",
                after: deadline,
            })?
    }

    async fn rollback_inner(&self, migration: &dyn Migration) -> Result<()> {
        let name = migration.name();
        self.config.validate()?;
        self.store.ensure_table(&self.config.table_name).await?;

        let mut tx = self.store.begin().await?;
        match self.revert(tx.as_mut(), migration).await {
            Ok(()) => {
                tx.commit().await?;
                info!(migration = %name, "Migration rolled back");
                Ok(())
            }
            Err(e) => {
                if let Err(rollback_err) = tx.rollback().await {
                    warn!(migration = %name, error = %rollback_err, "Failed to roll back transaction");
                }
                Err(e)
            }
        }
    }

    async fn revert(&self, tx: &mut dyn StoreTransaction, migration: &dyn Migration) -> Result<()> {
        let table = self.config.table_name.as_str();
        let name = migration.name();

        if tx.find_record(table, name).await?.is_none() {
            return Err(MigrationError::NotFound(name.to_string()));
        }
        if !migration.is_reversible() {
            return Err(MigrationError::Irreversible(name.to_string()));
        }

        info!(migration = %name, "Rolling back migration");
        self.attempt(tx, migration, Direction::Down).await?;
        tx.delete_record(table, name).await?;
        Ok(())
    }

    /// Roll back the `count` most recently applied migrations, newest first.
    ///
    /// Each rollback commits on its own and gets its own deadline, as does
    /// the initial scan of applied records. Returns the names rolled back.
    pub async fn rollback_last(
        &self,
        registry: &MigrationRegistry,
        count: usize,
    ) -> Result<Vec<String>> {
        let deadline = self.config.timeout();
        let applied = tokio::time::timeout(deadline, self.get_applied_migrations())
            .await
            .map_err(|_| MigrationError::Timeout {
                op: "get applied migrations",
                after: deadline,
            })??;
        let mut rolled_back = Vec::new();

        for record in applied.iter().rev().take(count) {
            let migration = registry.get(&record.name)?;
            self.rollback_migration(migration.as_ref()).await?;
            rolled_back.push(record.name.clone());
        }

        Ok(rolled_back)
    }

    /// All applied-migration records, oldest first.
    pub async fn get_applied_migrations(&self) -> Result<Vec<MigrationRecord>> {
        self.config.validate()?;
        self.store.ensure_table(&self.config.table_name).await?;
        self.store.records(&self.config.table_name).await
    }

    /// Migrations from `available` without a record, in the order given.
    pub async fn get_pending_migrations(
        &self,
        available: &[Arc<dyn Migration>],
    ) -> Result<Vec<Arc<dyn Migration>>> {
        let applied: HashSet<String> = self
            .get_applied_migrations()
            .await?
            .into_iter()
            .map(|record| record.name)
            .collect();

        Ok(available
            .iter()
            .filter(|m| !applied.contains(m.name()))
            .cloned()
            .collect())
    }

    /// Applied and pending migrations relative to `available`.
    pub async fn status(&self, available: &[Arc<dyn Migration>]) -> Result<MigrationStatus> {
        let records = self.get_applied_migrations().await?;
        let by_name: HashMap<&str, &Arc<dyn Migration>> =
            available.iter().map(|m| (m.name(), m)).collect();

        let applied_names: HashSet<&str> = records.iter().map(|r| r.name.as_str()).collect();
        let pending = available
            .iter()
            .filter(|m| !applied_names.contains(m.name()))
            .map(|m| m.name().to_string())
            .collect();

        let applied = records
            .iter()
            .map(|record| AppliedMigration {
                name: record.name.clone(),
                applied_at: record.applied_at,
                reversible: by_name
                    .get(record.name.as_str())
                    .map(|m| m.is_reversible()),
            })
            .collect();

        Ok(MigrationStatus { applied, pending })
    }
}
