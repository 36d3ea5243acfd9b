use std::path::Path;

use strata_core::migration::{BoxFuture, Migration, StoreConnection};
use strata_core::{MigrationError, Result};

const UP_MARKER: &str = "-- @up";
const DOWN_MARKER: &str = "-- @down";

/// A migration declared as SQL text.
///
/// File layout:
///
/// ```sql
/// -- @up
/// CREATE TABLE users (id BIGSERIAL PRIMARY KEY);
///
/// -- @down
/// DROP TABLE users;
/// ```
///
/// Text before any marker belongs to `up`. Without a `-- @down` marker the
/// migration is irreversible.
#[derive(Debug, Clone)]
pub struct SqlMigration {
    name: String,
    up: String,
    down: Option<String>,
}

impl SqlMigration {
    pub fn new(name: impl Into<String>, up: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            up: up.into(),
            down: None,
        }
    }

    pub fn with_down(mut self, down: impl Into<String>) -> Self {
        self.down = Some(down.into());
        self
    }

    /// Split file content into its up and down sections.
    pub fn parse(name: impl Into<String>, content: &str) -> Self {
        let mut up = String::new();
        let mut down: Option<String> = None;

        for line in content.lines() {
            let marker = line.trim().to_ascii_lowercase();
            if marker == UP_MARKER {
                continue;
            }
            if marker == DOWN_MARKER {
                down.get_or_insert_with(String::new);
                continue;
            }

            let section = match down.as_mut() {
                Some(down) => down,
                None => &mut up,
            };
            section.push_str(line);
            section.push('\n');
        }

        Self {
            name: name.into(),
            up,
            down,
        }
    }

    /// Load a migration file. The name is the file stem.
    pub fn from_file(path: &Path) -> Result<Self> {
        let name = path
            .file_stem()
            .and_then(|s| s.to_str())
            .ok_or_else(|| MigrationError::InvalidName(path.display().to_string()))?;
        let content =
            std::fs::read_to_string(path).map_err(MigrationError::io("read migration file"))?;
        Ok(Self::parse(name, &content))
    }

    pub fn up_sql(&self) -> &str {
        &self.up
    }

    pub fn down_sql(&self) -> Option<&str> {
        self.down.as_deref()
    }
}

impl Migration for SqlMigration {
    fn name(&self) -> &str {
        &self.name
    }

    fn up<'a>(&'a self, conn: &'a mut dyn StoreConnection) -> BoxFuture<'a, Result<()>> {
        Box::pin(async move {
            conn.execute_script(&self.up).await?;
            Ok(())
        })
    }

    fn down<'a>(&'a self, conn: &'a mut dyn StoreConnection) -> BoxFuture<'a, Result<()>> {
        Box::pin(async move {
            let down = self
                .down
                .as_deref()
                .ok_or_else(|| MigrationError::Irreversible(self.name.clone()))?;
            conn.execute_script(down).await?;
            Ok(())
        })
    }

    fn is_reversible(&self) -> bool {
        self.down.is_some()
    }
}
