//! Migration execution for strata.
//!
//! [`Migrator`] applies migrations through a [`MigrationStore`]. Use
//! [`PgStore`] against PostgreSQL, or [`MemoryStore`] to exercise migrations
//! without a database.

pub mod db;
pub mod migrations;
pub mod store;

pub use db::Database;
pub use migrations::{
    AppliedMigration, GeneratedMigration, MigrationDiscovery, MigrationGenerator, MigrationStatus,
    Migrator, RunSummary, SqlMigration,
};
pub use store::{MemoryStore, MigrationStore, PgStore, StoreTransaction};
