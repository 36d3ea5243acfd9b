use anyhow::Result;
use clap::Parser;
use console::style;

use strata_core::config::MigratorConfig;
use strata_runtime::MigrationGenerator;

/// Create a new migration file.
#[derive(Parser)]
pub struct CreateCommand {
    /// Migration name (letters, digits and underscores).
    pub name: String,
}

impl CreateCommand {
    pub fn execute(&self, config: &MigratorConfig) -> Result<()> {
        let generated = MigrationGenerator::from_config(config).generate(&self.name)?;

        println!();
        println!(
            "  {} Created migration: {}",
            style("✓").green(),
            style(&generated.name).cyan()
        );
        println!("    {}", style(generated.path.display()).dim());
        println!();
        Ok(())
    }
}
