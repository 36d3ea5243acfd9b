use std::collections::HashMap;
use std::sync::{Arc, Mutex, PoisonError};

use serde_json::Value;

use strata_core::migration::{BoxFuture, MigrationRecord, StoreConnection};
use strata_core::{MigrationError, Result};

use super::{MigrationStore, StoreTransaction};

#[derive(Debug, Clone, Default)]
struct MemoryState {
    tables: HashMap<String, Vec<MigrationRecord>>,
    statements: Vec<String>,
    next_id: i64,
}

/// In-process transactional store.
///
/// A transaction works on a copy of the committed state and replaces it on
/// commit. Statements are not interpreted, only logged, so migrations can be
/// exercised without a database. Queries are not supported.
#[derive(Clone, Default)]
pub struct MemoryStore {
    state: Arc<Mutex<MemoryState>>,
}

impl MemoryStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Committed records of `table`, in insertion order.
    pub fn committed_records(&self, table: &str) -> Vec<MigrationRecord> {
        self.lock().tables.get(table).cloned().unwrap_or_default()
    }

    /// Committed statements, in execution order.
    pub fn statements(&self) -> Vec<String> {
        self.lock().statements.clone()
    }

    pub fn has_table(&self, table: &str) -> bool {
        self.lock().tables.contains_key(table)
    }

    fn lock(&self) -> std::sync::MutexGuard<'_, MemoryState> {
        self.state.lock().unwrap_or_else(PoisonError::into_inner)
    }
}

impl MigrationStore for MemoryStore {
    fn ensure_table<'a>(&'a self, table: &'a str) -> BoxFuture<'a, Result<()>> {
        Box::pin(async move {
            self.lock().tables.entry(table.to_string()).or_default();
            Ok(())
        })
    }

    fn begin(&self) -> BoxFuture<'_, Result<Box<dyn StoreTransaction>>> {
        Box::pin(async move {
            let working = self.lock().clone();
            Ok(Box::new(MemoryTransaction {
                shared: Arc::clone(&self.state),
                working,
                savepoints: Vec::new(),
            }) as Box<dyn StoreTransaction>)
        })
    }

    fn records<'a>(&'a self, table: &'a str) -> BoxFuture<'a, Result<Vec<MigrationRecord>>> {
        Box::pin(async move {
            let state = self.lock();
            let mut records = state
                .tables
                .get(table)
                .cloned()
                .ok_or_else(|| missing_table("get applied migrations", table))?;
            records.sort_by(|a, b| a.applied_at.cmp(&b.applied_at).then(a.id.cmp(&b.id)));
            Ok(records)
        })
    }
}

fn missing_table(op: &'static str, table: &str) -> MigrationError {
    MigrationError::store(op, format!("relation \"{}\" does not exist", table))
}

/// Transaction over a [`MemoryStore`]. Dropping it discards its writes.
pub struct MemoryTransaction {
    shared: Arc<Mutex<MemoryState>>,
    working: MemoryState,
    savepoints: Vec<(String, MemoryState)>,
}

impl MemoryTransaction {
    fn table_mut(&mut self, op: &'static str, table: &str) -> Result<&mut Vec<MigrationRecord>> {
        self.working
            .tables
            .get_mut(table)
            .ok_or_else(|| missing_table(op, table))
    }

    fn savepoint_index(&self, op: &'static str, name: &str) -> Result<usize> {
        self.savepoints
            .iter()
            .rposition(|(n, _)| n == name)
            .ok_or_else(|| MigrationError::store(op, format!("savepoint \"{}\" does not exist", name)))
    }
}

impl StoreConnection for MemoryTransaction {
    fn execute<'a>(&'a mut self, sql: &'a str) -> BoxFuture<'a, Result<u64>> {
        Box::pin(async move {
            self.working.statements.push(sql.trim().to_string());
            Ok(0)
        })
    }

    fn query<'a>(&'a mut self, _sql: &'a str) -> BoxFuture<'a, Result<Vec<Value>>> {
        Box::pin(async move {
            Err(MigrationError::store(
                "query rows",
                "the in-memory store does not evaluate queries",
            ))
        })
    }
}

impl StoreTransaction for MemoryTransaction {
    fn connection(&mut self) -> &mut dyn StoreConnection {
        self
    }

    fn find_record<'a>(
        &'a mut self,
        table: &'a str,
        name: &'a str,
    ) -> BoxFuture<'a, Result<Option<MigrationRecord>>> {
        Box::pin(async move {
            let records = self.table_mut("find migration record", table)?;
            Ok(records.iter().find(|r| r.name == name).cloned())
        })
    }

    fn insert_record<'a>(
        &'a mut self,
        table: &'a str,
        record: &'a MigrationRecord,
    ) -> BoxFuture<'a, Result<()>> {
        Box::pin(async move {
            let id = self.working.next_id + 1;
            let records = self.table_mut("record migration", table)?;
            if records.iter().any(|r| r.name == record.name) {
                return Err(MigrationError::store(
                    "record migration",
                    format!("duplicate key value violates unique constraint on \"{}\"", record.name),
                ));
            }
            records.push(MigrationRecord {
                id,
                ..record.clone()
            });
            self.working.next_id = id;
            Ok(())
        })
    }

    fn delete_record<'a>(&'a mut self, table: &'a str, name: &'a str) -> BoxFuture<'a, Result<bool>> {
        Box::pin(async move {
            let records = self.table_mut("delete migration record", table)?;
            let before = records.len();
            records.retain(|r| r.name != name);
            Ok(records.len() < before)
        })
    }

    fn savepoint<'a>(&'a mut self, name: &'a str) -> BoxFuture<'a, Result<()>> {
        Box::pin(async move {
            self.savepoints
                .push((name.to_string(), self.working.clone()));
            Ok(())
        })
    }

    fn rollback_to_savepoint<'a>(&'a mut self, name: &'a str) -> BoxFuture<'a, Result<()>> {
        Box::pin(async move {
            let index = self.savepoint_index("rollback to savepoint", name)?;
            self.savepoints.truncate(index + 1);
            self.working = self.savepoints[index].1.clone();
            Ok(())
        })
    }

    fn release_savepoint<'a>(&'a mut self, name: &'a str) -> BoxFuture<'a, Result<()>> {
        Box::pin(async move {
            let index = self.savepoint_index("release savepoint", name)?;
            self.savepoints.truncate(index);
            Ok(())
        })
    }

    fn commit(self: Box<Self>) -> BoxFuture<'static, Result<()>> {
        let MemoryTransaction {
            shared, working, ..
        } = *self;
        Box::pin(async move {
            *shared.lock().unwrap_or_else(PoisonError::into_inner) = working;
            Ok(())
        })
    }

    fn rollback(self: Box<Self>) -> BoxFuture<'static, Result<()>> {
        Box::pin(async move { Ok(()) })
    }
}
