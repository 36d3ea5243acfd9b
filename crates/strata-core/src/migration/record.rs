use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// A row of the applied-records table: proof that a migration was applied.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct MigrationRecord {
    /// Store-assigned sequence, breaks ties between equal `applied_at` values.
    pub id: i64,
    pub name: String,
    pub applied_at: DateTime<Utc>,
}

impl MigrationRecord {
    /// A record for a migration applied now. The id is assigned on insert.
    pub fn applied_now(name: impl Into<String>) -> Self {
        Self {
            id: 0,
            name: name.into(),
            applied_at: Utc::now(),
        }
    }
}
