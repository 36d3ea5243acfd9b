pub mod discovery;
mod generator;
mod migrator;
mod sql;

pub use discovery::{parse_migration_filename, MigrationDiscovery, MigrationFileName};
pub use generator::{GeneratedMigration, MigrationGenerator};
pub use migrator::{AppliedMigration, MigrationStatus, Migrator, RunSummary};
pub use sql::SqlMigration;
