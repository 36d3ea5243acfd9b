use std::collections::HashMap;
use std::sync::{Arc, PoisonError, RwLock};

use tracing::debug;

use crate::error::{MigrationError, Result};
use crate::migration::Migration;

/// Catalog of executable migrations keyed by name.
///
/// Built once and shared (usually behind an `Arc`) with discovery and the
/// CLI. Lookups take a read lock; registration and `clear` take the write lock.
#[derive(Default)]
pub struct MigrationRegistry {
    migrations: RwLock<HashMap<String, Arc<dyn Migration>>>,
}

impl MigrationRegistry {
    /// Create a new empty registry.
    pub fn new() -> Self {
        Self::default()
    }

    /// Register a migration.
    pub fn register<M: Migration + 'static>(&self, migration: M) -> Result<()> {
        self.register_arc(Arc::new(migration))
    }

    /// Register an already shared migration.
    pub fn register_arc(&self, migration: Arc<dyn Migration>) -> Result<()> {
        let name = migration.name().to_string();
        if name.is_empty() {
            return Err(MigrationError::InvalidName(
                "migration name cannot be empty".into(),
            ));
        }

        let mut migrations = self
            .migrations
            .write()
            .unwrap_or_else(PoisonError::into_inner);
        if migrations.contains_key(&name) {
            return Err(MigrationError::AlreadyExists(name));
        }

        debug!(migration = %name, "Registered migration");
        migrations.insert(name, migration);
        Ok(())
    }

    /// Get a migration by name.
    pub fn get(&self, name: &str) -> Result<Arc<dyn Migration>> {
        self.migrations
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .get(name)
            .cloned()
            .ok_or_else(|| MigrationError::NotFound(name.to_string()))
    }

    /// All registered migrations, ascending by name.
    pub fn list(&self) -> Vec<Arc<dyn Migration>> {
        let migrations = self
            .migrations
            .read()
            .unwrap_or_else(PoisonError::into_inner);
        let mut all: Vec<_> = migrations.values().cloned().collect();
        all.sort_by(|a, b| a.name().cmp(b.name()));
        all
    }

    /// Check if a migration exists.
    pub fn has(&self, name: &str) -> bool {
        self.migrations
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .contains_key(name)
    }

    /// Get the number of registered migrations.
    pub fn count(&self) -> usize {
        self.migrations
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .len()
    }

    /// Remove every migration. Intended for test isolation.
    pub fn clear(&self) {
        self.migrations
            .write()
            .unwrap_or_else(PoisonError::into_inner)
            .clear();
    }
}
