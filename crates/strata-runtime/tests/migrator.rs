//! End-to-end migrator behavior against the in-memory store.

use std::sync::atomic::{AtomicU32, Ordering};
use std::sync::Arc;
use std::time::Duration;

use tokio_test::{assert_err, assert_ok};

use strata_core::migration::{BoxFuture, Migration, StoreConnection};
use strata_core::{ErrorKind, MigrationError, MigrationRegistry, MigratorConfig, Result};
use strata_runtime::{MemoryStore, MigrationDiscovery, Migrator, SqlMigration};

const TABLE: &str = "migrations";

/// Executes one statement, then fails every time.
struct Broken {
    name: &'static str,
    calls: AtomicU32,
}

impl Broken {
    fn new(name: &'static str) -> Arc<Self> {
        Arc::new(Self {
            name,
            calls: AtomicU32::new(0),
        })
    }
}

impl Migration for Broken {
    fn name(&self) -> &str {
        self.name
    }

    fn up<'a>(&'a self, conn: &'a mut dyn StoreConnection) -> BoxFuture<'a, Result<()>> {
        Box::pin(async move {
            self.calls.fetch_add(1, Ordering::SeqCst);
            conn.execute("CREATE TABLE half_done (id INT)").await?;
            Err(MigrationError::unit("column does not exist"))
        })
    }

    fn down<'a>(&'a self, _conn: &'a mut dyn StoreConnection) -> BoxFuture<'a, Result<()>> {
        Box::pin(async move { Err(MigrationError::unit("cannot undo")) })
    }
}

/// Never finishes within the deadline.
struct Stalled;

impl Migration for Stalled {
    fn name(&self) -> &str {
        "20230101000000_stalled"
    }

    fn up<'a>(&'a self, conn: &'a mut dyn StoreConnection) -> BoxFuture<'a, Result<()>> {
        Box::pin(async move {
            conn.execute("CREATE TABLE stalled (id INT)").await?;
            tokio::time::sleep(Duration::from_secs(3600)).await;
            Ok(())
        })
    }

    fn down<'a>(&'a self, _conn: &'a mut dyn StoreConnection) -> BoxFuture<'a, Result<()>> {
        Box::pin(async move { Ok(()) })
    }
}

fn reversible(name: &str, up: &str, down: &str) -> Arc<dyn Migration> {
    Arc::new(SqlMigration::new(name, up).with_down(down))
}

fn fast_config() -> MigratorConfig {
    MigratorConfig {
        retry_backoff_ms: 1,
        ..MigratorConfig::default()
    }
}

fn record_names(store: &MemoryStore) -> Vec<String> {
    store
        .committed_records(TABLE)
        .into_iter()
        .map(|r| r.name)
        .collect()
}

#[tokio::test]
async fn applies_pending_migrations_in_order() {
    let store = MemoryStore::new();
    let migrator = Migrator::new(Arc::new(store.clone()), fast_config());
    let migrations = vec![
        reversible(
            "20230101000000_init",
            "CREATE TABLE users (id INT);",
            "DROP TABLE users;",
        ),
        reversible(
            "20230102000000_addcol",
            "ALTER TABLE users ADD COLUMN email TEXT;",
            "ALTER TABLE users DROP COLUMN email;",
        ),
    ];

    let summary = assert_ok!(migrator.run_migrations(&migrations).await);
    assert_eq!(
        summary.applied,
        vec!["20230101000000_init", "20230102000000_addcol"]
    );
    assert_eq!(
        record_names(&store),
        vec!["20230101000000_init", "20230102000000_addcol"]
    );
    assert_eq!(
        store.statements(),
        vec![
            "CREATE TABLE users (id INT)",
            "ALTER TABLE users ADD COLUMN email TEXT",
        ]
    );

    let records = store.committed_records(TABLE);
    assert!(records.iter().all(|r| r.applied_at.timestamp() > 0));
    assert!(records[0].applied_at <= records[1].applied_at);

    let pending = assert_ok!(migrator.get_pending_migrations(&migrations).await);
    assert!(pending.is_empty());
}

#[tokio::test]
async fn pending_keeps_the_order_of_available() {
    let migrator = Migrator::new(Arc::new(MemoryStore::new()), fast_config());
    let a = reversible("20230101000000_a", "CREATE TABLE a (id INT);", "DROP TABLE a;");
    let b = reversible("20230102000000_b", "CREATE TABLE b (id INT);", "DROP TABLE b;");
    let c = reversible("20230103000000_c", "CREATE TABLE c (id INT);", "DROP TABLE c;");

    assert_ok!(migrator.run_migrations(&[b.clone()]).await);

    let pending = assert_ok!(migrator.get_pending_migrations(&[c, b, a]).await);
    let names: Vec<&str> = pending.iter().map(|m| m.name()).collect();
    assert_eq!(names, vec!["20230103000000_c", "20230101000000_a"]);
}

#[tokio::test]
async fn second_run_is_a_no_op() {
    let store = MemoryStore::new();
    let migrator = Migrator::new(Arc::new(store.clone()), fast_config());
    let migrations = vec![reversible(
        "20230101000000_init",
        "CREATE TABLE users (id INT);",
        "DROP TABLE users;",
    )];

    assert_ok!(migrator.run_migrations(&migrations).await);
    let first = store.committed_records(TABLE);

    let summary = assert_ok!(migrator.run_migrations(&migrations).await);
    assert!(summary.applied.is_empty());
    assert_eq!(summary.skipped, vec!["20230101000000_init"]);

    let second = store.committed_records(TABLE);
    assert_eq!(first.len(), second.len());
    assert_eq!(first[0].applied_at, second[0].applied_at);
    assert_eq!(store.statements().len(), 1);
}

#[tokio::test]
async fn empty_input_creates_table_and_succeeds() {
    let store = MemoryStore::new();
    let migrator = Migrator::new(Arc::new(store.clone()), fast_config());

    let summary = assert_ok!(migrator.run_migrations(&[]).await);
    assert!(summary.applied.is_empty());
    assert!(store.has_table(TABLE));
    assert!(assert_ok!(migrator.get_applied_migrations().await).is_empty());
}

#[tokio::test]
async fn failing_unit_rolls_back_its_whole_batch() {
    let store = MemoryStore::new();
    let migrator = Migrator::new(Arc::new(store.clone()), fast_config());
    let broken = Broken::new("20230102000000_broken");
    let migrations: Vec<Arc<dyn Migration>> = vec![
        reversible("20230101000000_a", "CREATE TABLE a (id INT);", "DROP TABLE a;"),
        broken.clone() as Arc<dyn Migration>,
        reversible("20230103000000_c", "CREATE TABLE c (id INT);", "DROP TABLE c;"),
    ];

    let err = assert_err!(migrator.run_migrations(&migrations).await);
    assert_eq!(err.kind(), ErrorKind::ApplyFailure);
    assert!(err.to_string().contains("20230102000000_broken"));
    assert!(err.to_string().contains("3 attempt(s)"));

    assert_eq!(broken.calls.load(Ordering::SeqCst), 3);
    assert!(record_names(&store).is_empty());
    assert!(store.statements().is_empty());
}

#[tokio::test]
async fn earlier_batches_stay_committed() {
    let store = MemoryStore::new();
    let migrator = Migrator::new(
        Arc::new(store.clone()),
        MigratorConfig {
            batch_size: 1,
            retry_attempts: 1,
            ..fast_config()
        },
    );
    let migrations: Vec<Arc<dyn Migration>> = vec![
        reversible("20230101000000_a", "CREATE TABLE a (id INT);", "DROP TABLE a;"),
        Broken::new("20230102000000_broken") as Arc<dyn Migration>,
        reversible("20230103000000_c", "CREATE TABLE c (id INT);", "DROP TABLE c;"),
    ];

    assert_err!(migrator.run_migrations(&migrations).await);
    assert_eq!(record_names(&store), vec!["20230101000000_a"]);
    assert_eq!(store.statements(), vec!["CREATE TABLE a (id INT)"]);
}

#[tokio::test(start_paused = true)]
async fn run_times_out_and_commits_nothing() {
    let store = MemoryStore::new();
    let migrator = Migrator::new(
        Arc::new(store.clone()),
        MigratorConfig {
            timeout_secs: 1,
            ..fast_config()
        },
    );

    let err = assert_err!(migrator.run_migrations(&[Arc::new(Stalled) as Arc<dyn Migration>]).await);
    assert_eq!(err.kind(), ErrorKind::Timeout);
    assert!(record_names(&store).is_empty());
    assert!(store.statements().is_empty());
}

#[tokio::test]
async fn rollback_reverts_and_deletes_record() {
    let store = MemoryStore::new();
    let migrator = Migrator::new(Arc::new(store.clone()), fast_config());
    let init = reversible("20230101000000_init", "CREATE TABLE users (id INT);", "DROP TABLE users;");
    let addcol = reversible(
        "20230102000000_addcol",
        "ALTER TABLE users ADD COLUMN email TEXT;",
        "ALTER TABLE users DROP COLUMN email;",
    );

    assert_ok!(migrator.run_migrations(&[init.clone(), addcol.clone()]).await);
    assert_ok!(migrator.rollback_migration(addcol.as_ref()).await);

    assert_eq!(record_names(&store), vec!["20230101000000_init"]);
    assert_eq!(
        store.statements().last().map(String::as_str),
        Some("ALTER TABLE users DROP COLUMN email")
    );

    let pending = assert_ok!(migrator.get_pending_migrations(&[init, addcol]).await);
    assert_eq!(pending.len(), 1);
    assert_eq!(pending[0].name(), "20230102000000_addcol");
}

#[tokio::test]
async fn rollback_of_unapplied_migration_is_not_found() {
    let store = MemoryStore::new();
    let migrator = Migrator::new(Arc::new(store.clone()), fast_config());
    let init = reversible("20230101000000_init", "CREATE TABLE users (id INT);", "DROP TABLE users;");
    let never = reversible("20230102000000_never", "SELECT 1;", "SELECT 2;");

    assert_ok!(migrator.run_migrations(&[init]).await);
    let before = store.committed_records(TABLE);

    let err = assert_err!(migrator.rollback_migration(never.as_ref()).await);
    assert_eq!(err.kind(), ErrorKind::NotFound);
    assert_eq!(store.committed_records(TABLE), before);
    assert_eq!(store.statements(), vec!["CREATE TABLE users (id INT)"]);
}

#[tokio::test]
async fn rollback_of_unapplied_irreversible_migration_is_not_found() {
    let store = MemoryStore::new();
    let migrator = Migrator::new(Arc::new(store.clone()), fast_config());
    let seed = SqlMigration::new("20230101000000_seed", "SELECT 1;");

    let err = assert_err!(migrator.rollback_migration(&seed).await);
    assert_eq!(err.kind(), ErrorKind::NotFound);
    assert!(store.committed_records(TABLE).is_empty());
}

#[tokio::test]
async fn applied_irreversible_migration_is_refused_and_kept() {
    let store = MemoryStore::new();
    let migrator = Migrator::new(Arc::new(store.clone()), fast_config());
    let seed: Arc<dyn Migration> = Arc::new(SqlMigration::new("20230101000000_seed", "INSERT INTO t VALUES (1);"));

    assert_ok!(migrator.run_migrations(&[seed.clone()]).await);
    let err = assert_err!(migrator.rollback_migration(seed.as_ref()).await);

    assert_eq!(err.kind(), ErrorKind::RollbackFailure);
    assert_eq!(record_names(&store), vec!["20230101000000_seed"]);
}

#[tokio::test]
async fn failed_down_keeps_record() {
    let store = MemoryStore::new();
    let migrator = Migrator::new(Arc::new(store.clone()), fast_config());
    let broken = Broken::new("20230101000000_broken");

    // Record it as applied through a migration with the same name.
    let stand_in = reversible("20230101000000_broken", "SELECT 1;", "SELECT 1;");
    assert_ok!(migrator.run_migrations(&[stand_in]).await);

    let err = assert_err!(migrator.rollback_migration(broken.as_ref()).await);
    assert_eq!(err.kind(), ErrorKind::RollbackFailure);
    assert_eq!(record_names(&store), vec!["20230101000000_broken"]);
}

#[tokio::test]
async fn custom_table_name_is_used() {
    let store = MemoryStore::new();
    let migrator = Migrator::new(
        Arc::new(store.clone()),
        MigratorConfig {
            table_name: "schema_history".to_string(),
            ..fast_config()
        },
    );

    assert_ok!(
        migrator
            .run_migrations(&[reversible("20230101000000_a", "SELECT 1;", "SELECT 1;")])
            .await
    );
    assert_eq!(store.committed_records("schema_history").len(), 1);
    assert!(!store.has_table(TABLE));
}

#[tokio::test]
async fn discovered_sql_files_run_end_to_end() {
    let dir = tempfile::TempDir::new().unwrap();
    std::fs::write(
        dir.path().join("20230101000000_init.sql"),
        "-- @up\nCREATE TABLE users (id INT);\n-- @down\nDROP TABLE users;\n",
    )
    .unwrap();
    std::fs::write(
        dir.path().join("20230102000000_addcol.sql"),
        "-- @up\nALTER TABLE users ADD COLUMN email TEXT;\n-- @down\nALTER TABLE users DROP COLUMN email;\n",
    )
    .unwrap();

    let registry = Arc::new(MigrationRegistry::new());
    let discovery = MigrationDiscovery::new(dir.path(), Arc::clone(&registry));
    assert_eq!(assert_ok!(discovery.register_sql_migrations()), 2);
    let migrations = assert_ok!(discovery.discover());

    let store = MemoryStore::new();
    let migrator = Migrator::new(Arc::new(store.clone()), fast_config());
    assert_ok!(migrator.run_migrations(&migrations).await);
    assert_eq!(
        record_names(&store),
        vec!["20230101000000_init", "20230102000000_addcol"]
    );

    let rolled_back = assert_ok!(migrator.rollback_last(&registry, 1).await);
    assert_eq!(rolled_back, vec!["20230102000000_addcol"]);
    assert_eq!(record_names(&store), vec!["20230101000000_init"]);
}
