use serde_json::Value;
use sqlx::postgres::{PgPool, PgRow};
use sqlx::{Postgres, Row, Transaction};
use tracing::debug;

use strata_core::migration::{BoxFuture, MigrationRecord, StoreConnection};
use strata_core::{MigrationError, Result};

use super::{MigrationStore, StoreTransaction};

/// PostgreSQL-backed store.
///
/// Table names are interpolated into SQL; they are expected to have passed
/// `MigratorConfig::validate`.
#[derive(Clone)]
pub struct PgStore {
    pool: PgPool,
}

impl PgStore {
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }

    pub fn pool(&self) -> &PgPool {
        &self.pool
    }
}

impl MigrationStore for PgStore {
    fn ensure_table<'a>(&'a self, table: &'a str) -> BoxFuture<'a, Result<()>> {
        Box::pin(async move {
            let sql = format!(
                r#"
                CREATE TABLE IF NOT EXISTS {} (
                    id BIGSERIAL PRIMARY KEY,
                    name VARCHAR(255) UNIQUE NOT NULL,
                    applied_at TIMESTAMPTZ NOT NULL DEFAULT NOW()
                )
                "#,
                table
            );
            sqlx::query(&sql)
                .execute(&self.pool)
                .await
                .map_err(MigrationError::sql("create migrations table"))?;
            debug!(table, "Migrations table ready");
            Ok(())
        })
    }

    fn begin(&self) -> BoxFuture<'_, Result<Box<dyn StoreTransaction>>> {
        Box::pin(async move {
            let tx = self
                .pool
                .begin()
                .await
                .map_err(MigrationError::sql("begin transaction"))?;
            Ok(Box::new(PgTransaction { tx }) as Box<dyn StoreTransaction>)
        })
    }

    fn records<'a>(&'a self, table: &'a str) -> BoxFuture<'a, Result<Vec<MigrationRecord>>> {
        Box::pin(async move {
            let sql = format!(
                "SELECT id, name, applied_at FROM {} ORDER BY applied_at ASC, id ASC",
                table
            );
            let rows = sqlx::query(&sql)
                .fetch_all(&self.pool)
                .await
                .map_err(MigrationError::sql("get applied migrations"))?;

            rows.iter()
                .map(|row| record_from_row(row, "get applied migrations"))
                .collect()
        })
    }
}

fn record_from_row(row: &PgRow, op: &'static str) -> Result<MigrationRecord> {
    Ok(MigrationRecord {
        id: row.try_get("id").map_err(MigrationError::sql(op))?,
        name: row.try_get("name").map_err(MigrationError::sql(op))?,
        applied_at: row.try_get("applied_at").map_err(MigrationError::sql(op))?,
    })
}

/// A transaction on a pooled Postgres connection.
///
/// sqlx rolls the transaction back if this is dropped before `commit`.
pub struct PgTransaction {
    tx: Transaction<'static, Postgres>,
}

impl StoreConnection for PgTransaction {
    fn execute<'a>(&'a mut self, sql: &'a str) -> BoxFuture<'a, Result<u64>> {
        Box::pin(async move {
            let result = sqlx::query(sql)
                .execute(&mut *self.tx)
                .await
                .map_err(MigrationError::sql("execute statement"))?;
            Ok(result.rows_affected())
        })
    }

    fn query<'a>(&'a mut self, sql: &'a str) -> BoxFuture<'a, Result<Vec<Value>>> {
        Box::pin(async move {
            let wrapped = format!(
                "SELECT to_jsonb(q) FROM ({}) AS q",
                sql.trim().trim_end_matches(';')
            );
            sqlx::query_scalar::<_, Value>(&wrapped)
                .fetch_all(&mut *self.tx)
                .await
                .map_err(MigrationError::sql("query rows"))
        })
    }
}

impl StoreTransaction for PgTransaction {
    fn connection(&mut self) -> &mut dyn StoreConnection {
        self
    }

    fn find_record<'a>(
        &'a mut self,
        table: &'a str,
        name: &'a str,
    ) -> BoxFuture<'a, Result<Option<MigrationRecord>>> {
        Box::pin(async move {
            let sql = format!("SELECT id, name, applied_at FROM {} WHERE name = $1", table);
            let row = sqlx::query(&sql)
                .bind(name)
                .fetch_optional(&mut *self.tx)
                .await
                .map_err(MigrationError::sql("find migration record"))?;

            row.map(|row| record_from_row(&row, "find migration record"))
                .transpose()
        })
    }

    fn insert_record<'a>(
        &'a mut self,
        table: &'a str,
        record: &'a MigrationRecord,
    ) -> BoxFuture<'a, Result<()>> {
        Box::pin(async move {
            let sql = format!("INSERT INTO {} (name, applied_at) VALUES ($1, $2)", table);
            sqlx::query(&sql)
                .bind(record.name.as_str())
                .bind(record.applied_at)
                .execute(&mut *self.tx)
                .await
                .map_err(MigrationError::sql("record migration"))?;
            Ok(())
        })
    }

    fn delete_record<'a>(&'a mut self, table: &'a str, name: &'a str) -> BoxFuture<'a, Result<bool>> {
        Box::pin(async move {
            let sql = format!("DELETE FROM {} WHERE name = $1", table);
            let result = sqlx::query(&sql)
                .bind(name)
                .execute(&mut *self.tx)
                .await
                .map_err(MigrationError::sql("delete migration record"))?;
            Ok(result.rows_affected() > 0)
        })
    }

    fn savepoint<'a>(&'a mut self, name: &'a str) -> BoxFuture<'a, Result<()>> {
        Box::pin(async move {
            sqlx::query(&format!("SAVEPOINT \"{}\"", name))
                .execute(&mut *self.tx)
                .await
                .map_err(MigrationError::sql("create savepoint"))?;
            Ok(())
        })
    }

    fn rollback_to_savepoint<'a>(&'a mut self, name: &'a str) -> BoxFuture<'a, Result<()>> {
        Box::pin(async move {
            sqlx::query(&format!("ROLLBACK TO SAVEPOINT \"{}\"", name))
                .execute(&mut *self.tx)
                .await
                .map_err(MigrationError::sql("rollback to savepoint"))?;
            Ok(())
        })
    }

    fn release_savepoint<'a>(&'a mut self, name: &'a str) -> BoxFuture<'a, Result<()>> {
        Box::pin(async move {
            sqlx::query(&format!("RELEASE SAVEPOINT \"{}\"", name))
                .execute(&mut *self.tx)
                .await
                .map_err(MigrationError::sql("release savepoint"))?;
            Ok(())
        })
    }

    fn commit(self: Box<Self>) -> BoxFuture<'static, Result<()>> {
        let PgTransaction { tx } = *self;
        Box::pin(async move {
            tx.commit()
                .await
                .map_err(MigrationError::sql("commit transaction"))
        })
    }

    fn rollback(self: Box<Self>) -> BoxFuture<'static, Result<()>> {
        let PgTransaction { tx } = *self;
        Box::pin(async move {
            tx.rollback()
                .await
                .map_err(MigrationError::sql("rollback transaction"))
        })
    }
}
