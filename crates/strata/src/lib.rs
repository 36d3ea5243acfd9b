//! strata - ordered, reversible schema migrations.
//!
//! Register migrations in a [`MigrationRegistry`], order them with
//! [`MigrationDiscovery`], and apply them with a [`Migrator`].

#[doc(hidden)]
pub use strata_core;
#[doc(hidden)]
pub use strata_runtime;

pub use strata_core::{
    BoxFuture, ErrorKind, Migration, MigrationError, MigrationRecord, MigrationRegistry,
    MigratorConfig, Result, StoreConnection, StrataConfig,
};
pub use strata_runtime::{
    Database, MemoryStore, MigrationDiscovery, MigrationGenerator, MigrationStatus,
    MigrationStore, Migrator, PgStore, RunSummary, SqlMigration,
};
