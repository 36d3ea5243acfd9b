use std::time::Duration;

use sqlx::postgres::{PgPool, PgPoolOptions};
use sqlx::Executor;
use tracing::debug;

use strata_core::config::{is_valid_table_name, DatabaseConfig};
use strata_core::{MigrationError, Result};

use crate::store::PgStore;

/// Connection pool for the target database.
#[derive(Clone)]
pub struct Database {
    pool: PgPool,
    config: DatabaseConfig,
}

impl Database {
    /// Connect using `config`.
    ///
    /// When `schema` is set, every pooled connection gets it first on its
    /// `search_path`, so unqualified names in migrations resolve there.
    pub async fn from_config(config: &DatabaseConfig) -> Result<Self> {
        let schema = match config.schema.as_deref() {
            Some(schema) if !is_valid_schema_name(schema) => {
                return Err(MigrationError::Config(format!(
                    "invalid database schema '{}'",
                    schema
                )));
            }
            other => other.map(str::to_string),
        };

        let pool = PgPoolOptions::new()
            .max_connections(config.pool_size.max(1))
            .acquire_timeout(Duration::from_secs(config.pool_timeout_secs))
            .after_connect(move |conn, _meta| {
                let schema = schema.clone();
                Box::pin(async move {
                    if let Some(schema) = schema {
                        conn.execute(format!("SET search_path TO \"{}\", public", schema).as_str())
                            .await?;
                    }
                    Ok(())
                })
            })
            .connect(&config.url)
            .await
            .map_err(MigrationError::sql("connect to database"))?;

        debug!(pool_size = config.pool_size, "Connected to database");

        Ok(Self {
            pool,
            config: config.clone(),
        })
    }

    pub fn pool(&self) -> &PgPool {
        &self.pool
    }

    pub fn config(&self) -> &DatabaseConfig {
        &self.config
    }

    /// A migration store sharing this pool.
    pub fn store(&self) -> PgStore {
        PgStore::new(self.pool.clone())
    }

    /// Check database connectivity.
    pub async fn health_check(&self) -> Result<()> {
        sqlx::query("SELECT 1")
            .execute(&self.pool)
            .await
            .map_err(MigrationError::sql("health check"))?;
        Ok(())
    }

    pub async fn close(&self) {
        self.pool.close().await;
    }
}

fn is_valid_schema_name(schema: &str) -> bool {
    !schema.contains('.') && is_valid_table_name(schema)
}
