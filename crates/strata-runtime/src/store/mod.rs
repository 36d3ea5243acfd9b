//! Transactional storage behind the migrator.
//!
//! The migrator only ever holds one [`StoreTransaction`] at a time. Dropping a
//! transaction without committing discards its writes, which is what happens
//! when a run exceeds its deadline.

mod memory;
mod postgres;

pub use memory::MemoryStore;
pub use postgres::PgStore;

use strata_core::migration::{BoxFuture, MigrationRecord, StoreConnection};
use strata_core::Result;

/// A store that can persist applied-migration records.
pub trait MigrationStore: Send + Sync {
    /// Create the applied-records table if it does not exist.
    fn ensure_table<'a>(&'a self, table: &'a str) -> BoxFuture<'a, Result<()>>;

    /// Open a transaction.
    fn begin(&self) -> BoxFuture<'_, Result<Box<dyn StoreTransaction>>>;

    /// All records, ascending by `applied_at` then `id`.
    fn records<'a>(&'a self, table: &'a str) -> BoxFuture<'a, Result<Vec<MigrationRecord>>>;
}

/// An open transaction. Migrations see it through [`StoreConnection`].
pub trait StoreTransaction: StoreConnection {
    /// This transaction as the handle passed to migration units.
    fn connection(&mut self) -> &mut dyn StoreConnection;

    fn find_record<'a>(
        &'a mut self,
        table: &'a str,
        name: &'a str,
    ) -> BoxFuture<'a, Result<Option<MigrationRecord>>>;

    fn insert_record<'a>(
        &'a mut self,
        table: &'a str,
        record: &'a MigrationRecord,
    ) -> BoxFuture<'a, Result<()>>;

    /// Delete a record by name. Returns whether a row was removed.
    fn delete_record<'a>(&'a mut self, table: &'a str, name: &'a str) -> BoxFuture<'a, Result<bool>>;

    fn savepoint<'a>(&'a mut self, name: &'a str) -> BoxFuture<'a, Result<()>>;

    /// Undo everything since the savepoint. The savepoint stays defined.
    fn rollback_to_savepoint<'a>(&'a mut self, name: &'a str) -> BoxFuture<'a, Result<()>>;

    fn release_savepoint<'a>(&'a mut self, name: &'a str) -> BoxFuture<'a, Result<()>>;

    fn commit(self: Box<Self>) -> BoxFuture<'static, Result<()>>;

    fn rollback(self: Box<Self>) -> BoxFuture<'static, Result<()>>;
}
