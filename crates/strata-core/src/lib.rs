pub mod config;
pub mod error;
pub mod migration;
pub mod registry;

pub use config::{DatabaseConfig, LoggingConfig, MigratorConfig, StrataConfig};
pub use error::{ErrorKind, MigrationError, Result};
pub use migration::{BoxFuture, Migration, MigrationRecord, StoreConnection};
pub use registry::MigrationRegistry;
