mod create;
mod migrate;

pub use create::CreateCommand;
pub use migrate::RollbackCommand;

use std::path::{Path, PathBuf};

use anyhow::{Context, Result};
use clap::{Parser, Subcommand};
use tracing_subscriber::EnvFilter;

use strata_core::config::{LoggingConfig, StrataConfig};

/// strata - ordered, reversible schema migrations
#[derive(Parser)]
#[command(name = "strata")]
#[command(author, version, about, long_about = None)]
pub struct Cli {
    #[command(subcommand)]
    pub command: Commands,

    /// Configuration file path.
    #[arg(short, long, default_value = "strata.toml", global = true)]
    pub config: PathBuf,

    /// Migrations directory, overriding `migrations.migrations_dir`.
    #[arg(short, long, global = true)]
    pub migrations_dir: Option<PathBuf>,
}

/// CLI commands.
#[derive(Subcommand)]
pub enum Commands {
    /// Create a new, empty SQL migration.
    Create(CreateCommand),

    /// Apply all pending migrations.
    Migrate,

    /// Roll back the most recently applied migrations.
    Rollback(RollbackCommand),

    /// Show applied and pending migrations.
    Status,
}

impl Cli {
    /// Execute the CLI command.
    pub async fn execute(self) -> Result<()> {
        dotenvy::dotenv().ok();

        match self.command {
            Commands::Create(ref cmd) => {
                // Creating a file needs no database, so the config is optional.
                let config = if self.config.exists() {
                    Some(self.load_config()?)
                } else {
                    None
                };
                init_tracing(
                    config
                        .as_ref()
                        .map(|c| c.logging.clone())
                        .unwrap_or_default(),
                );
                let mut migrations = config.map(|c| c.migrations).unwrap_or_default();
                if let Some(dir) = &self.migrations_dir {
                    migrations.migrations_dir = dir.clone();
                }
                cmd.execute(&migrations)
            }
            Commands::Migrate => {
                let config = self.load_required_config()?;
                init_tracing(config.logging.clone());
                migrate::run(&config).await
            }
            Commands::Rollback(ref cmd) => {
                let config = self.load_required_config()?;
                init_tracing(config.logging.clone());
                cmd.execute(&config).await
            }
            Commands::Status => {
                let config = self.load_required_config()?;
                init_tracing(config.logging.clone());
                migrate::status(&config).await
            }
        }
    }

    fn load_required_config(&self) -> Result<StrataConfig> {
        if !self.config.exists() {
            anyhow::bail!(
                "Configuration file not found: {}\nCreate one with a [database] url.",
                self.config.display()
            );
        }
        self.load_config()
    }

    fn load_config(&self) -> Result<StrataConfig> {
        let mut config = load_config_file(&self.config)?;
        if let Some(dir) = &self.migrations_dir {
            config.migrations.migrations_dir = dir.clone();
        }
        Ok(config)
    }
}

fn load_config_file(path: &Path) -> Result<StrataConfig> {
    StrataConfig::from_file(path)
        .with_context(|| format!("Failed to load {}", path.display()))
}

/// Install the global subscriber. `RUST_LOG` wins over the configured level.
fn init_tracing(logging: LoggingConfig) {
    let filter = EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| EnvFilter::new(&logging.level));
    let builder = tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(std::io::stderr);

    if logging.json_format {
        builder.json().init();
    } else {
        builder.init();
    }
}
