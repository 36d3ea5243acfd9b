mod record;
mod script;
mod traits;

pub use record::MigrationRecord;
pub use script::split_sql_statements;
pub use traits::{BoxFuture, Migration, StoreConnection};
