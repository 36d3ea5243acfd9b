use std::sync::Arc;

use anyhow::Result;
use clap::Parser;
use console::style;
use tracing::info;

use strata_core::config::StrataConfig;
use strata_core::migration::Migration;
use strata_core::registry::MigrationRegistry;
use strata_runtime::{Database, MigrationDiscovery, Migrator};

/// Roll back the last N migrations.
#[derive(Parser)]
pub struct RollbackCommand {
    /// Number of migrations to roll back.
    #[arg(default_value = "1")]
    pub count: usize,
}

/// Everything a command needs to talk to the database and the migrations.
struct Session {
    db: Database,
    migrator: Migrator,
    registry: Arc<MigrationRegistry>,
    available: Vec<Arc<dyn Migration>>,
}

impl Session {
    async fn open(config: &StrataConfig) -> Result<Self> {
        let registry = Arc::new(MigrationRegistry::new());
        let discovery = MigrationDiscovery::from_config(&config.migrations, Arc::clone(&registry));
        discovery.register_sql_migrations()?;
        let available = discovery.discover()?;

        let db = Database::from_config(&config.database).await?;
        let migrator = Migrator::new(Arc::new(db.store()), config.migrations.clone());

        info!(
            dir = %discovery.dir().display(),
            available = available.len(),
            "Loaded migrations"
        );

        Ok(Self {
            db,
            migrator,
            registry,
            available,
        })
    }
}

fn header(title: &str) {
    println!();
    println!("  {} {}", style("STRATA").bold().cyan(), title);
    println!();
}

pub async fn run(config: &StrataConfig) -> Result<()> {
    let session = Session::open(config).await?;
    header("Migrations");

    if session.available.is_empty() {
        println!(
            "  {} No migrations found in {}",
            style("ℹ").blue(),
            config.migrations.migrations_dir.display()
        );
        session.db.close().await;
        return Ok(());
    }

    println!("  {} Running pending migrations...", style("→").dim());
    let result = session.migrator.run_migrations(&session.available).await;
    session.db.close().await;
    let summary = result?;

    for name in &summary.applied {
        println!("  {} Applied: {}", style("✓").green(), name);
    }
    println!(
        "  {} {} applied, {} already up to date",
        style("✓").green(),
        summary.applied.len(),
        summary.skipped.len()
    );
    println!();
    Ok(())
}

impl RollbackCommand {
    pub async fn execute(&self, config: &StrataConfig) -> Result<()> {
        header("Migrations");

        if self.count == 0 {
            println!("  {} Nothing to roll back (count=0)", style("ℹ").blue());
            return Ok(());
        }

        let session = Session::open(config).await?;
        println!(
            "  {} Rolling back {} migration(s)...",
            style("→").dim(),
            self.count
        );

        let result = session
            .migrator
            .rollback_last(&session.registry, self.count)
            .await;
        session.db.close().await;
        let rolled_back = result?;

        if rolled_back.is_empty() {
            println!("  {} No migrations to roll back", style("ℹ").blue());
        } else {
            for name in &rolled_back {
                println!("  {} Rolled back: {}", style("✓").green(), name);
            }
        }
        println!();
        Ok(())
    }
}

pub async fn status(config: &StrataConfig) -> Result<()> {
    let session = Session::open(config).await?;
    let result = session.migrator.status(&session.available).await;
    session.db.close().await;
    let status = result?;

    header("Migration Status");

    if status.applied.is_empty() && status.pending.is_empty() {
        println!("  {} No migrations found", style("ℹ").blue());
        return Ok(());
    }

    if !status.applied.is_empty() {
        println!("  {} Applied:", style("✓").green());
        for m in &status.applied {
            let marker = match m.reversible {
                Some(true) => style("↓").green().to_string(),
                Some(false) => style("-").dim().to_string(),
                None => style("?").red().to_string(),
            };
            println!(
                "    {} {} {} ({})",
                marker,
                style(&m.name).cyan(),
                style("at").dim(),
                m.applied_at.format("%Y-%m-%d %H:%M:%S")
            );
        }
    }

    if !status.pending.is_empty() {
        if !status.applied.is_empty() {
            println!();
        }
        println!("  {} Pending:", style("○").yellow());
        for name in &status.pending {
            println!("    {} {}", style("→").dim(), style(name).yellow());
        }
    }

    println!();
    println!(
        "  {} {} applied, {} pending",
        style("ℹ").blue(),
        status.applied.len(),
        status.pending.len()
    );
    println!(
        "  {} = reversible, {} = irreversible, {} = no migration file",
        style("↓").green(),
        style("-").dim(),
        style("?").red()
    );
    println!();
    Ok(())
}
