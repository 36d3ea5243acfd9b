use std::future::Future;
use std::pin::Pin;

use serde_json::Value;

use super::script::split_sql_statements;
use crate::error::Result;

/// Boxed future returned by the async trait methods in this crate.
pub type BoxFuture<'a, T> = Pin<Box<dyn Future<Output = T> + Send + 'a>>;

/// Handle through which a migration talks to the store.
///
/// Every handle a migration receives is scoped to an open transaction, so
/// statements issued here commit or roll back with the surrounding batch.
pub trait StoreConnection: Send {
    /// Execute one statement, returning the number of affected rows.
    fn execute<'a>(&'a mut self, sql: &'a str) -> BoxFuture<'a, Result<u64>>;

    /// Run a query and return every row as a JSON object keyed by column name.
    fn query<'a>(&'a mut self, sql: &'a str) -> BoxFuture<'a, Result<Vec<Value>>>;

    /// First row of a query, if any.
    fn query_one<'a>(&'a mut self, sql: &'a str) -> BoxFuture<'a, Result<Option<Value>>> {
        Box::pin(async move { Ok(self.query(sql).await?.into_iter().next()) })
    }

    /// Execute a multi-statement script one statement at a time.
    fn execute_script<'a>(&'a mut self, script: &'a str) -> BoxFuture<'a, Result<u64>> {
        Box::pin(async move {
            let mut affected = 0;
            for statement in split_sql_statements(script) {
                affected += self.execute(&statement).await?;
            }
            Ok(affected)
        })
    }
}

/// A forward/reverse unit of schema change.
///
/// `up` and `down` may run more than once for a single application when an
/// attempt fails, so both must be idempotent or check before acting. Failed
/// attempts are rolled back to a savepoint before the next one starts.
pub trait Migration: Send + Sync {
    /// Unique name of the form `<YYYYMMDDHHMMSS>_<identifier>`.
    fn name(&self) -> &str;

    /// Apply the forward change.
    fn up<'a>(&'a self, conn: &'a mut dyn StoreConnection) -> BoxFuture<'a, Result<()>>;

    /// Reverse the forward change.
    fn down<'a>(&'a self, conn: &'a mut dyn StoreConnection) -> BoxFuture<'a, Result<()>>;

    /// Whether `down` can undo this migration.
    fn is_reversible(&self) -> bool {
        true
    }
}

impl std::fmt::Debug for dyn Migration {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Migration")
            .field("name", &self.name())
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[derive(Default)]
    struct Recording {
        executed: Vec<String>,
    }

    impl StoreConnection for Recording {
        fn execute<'a>(&'a mut self, sql: &'a str) -> BoxFuture<'a, Result<u64>> {
            Box::pin(async move {
                self.executed.push(sql.to_string());
                Ok(1)
            })
        }

        fn query<'a>(&'a mut self, _sql: &'a str) -> BoxFuture<'a, Result<Vec<Value>>> {
            Box::pin(async move { Ok(vec![json!({"n": 1}), json!({"n": 2})]) })
        }
    }

    #[tokio::test]
    async fn test_execute_script_runs_each_statement() {
        let mut conn = Recording::default();
        let affected = conn
            .execute_script("CREATE TABLE a (id INT);\n-- note\nCREATE TABLE b (id INT);")
            .await
            .unwrap();

        assert_eq!(affected, 2);
        assert_eq!(conn.executed.len(), 2);
        assert_eq!(conn.executed[1], "-- note\nCREATE TABLE b (id INT)");
    }

    #[test]
    fn test_query_one_returns_first_row() {
        let mut conn = Recording::default();
        let row = tokio_test::block_on(conn.query_one("SELECT n FROM t")).unwrap();
        assert_eq!(row, Some(json!({"n": 1})));
    }
}
