//! Migration artefacts

use crate::schema::SchemaDiff;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// A named, timestamped up/down script pair.
///
/// `id` is `<epoch-ms>_<slug>` and `checksum` is a truncated SHA-256 of `up`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Migration {
    pub id: String,
    pub name: String,
    pub timestamp: DateTime<Utc>,
    pub up: String,
    pub down: String,
    pub checksum: String,
}

impl Migration {
    pub fn has_rollback(&self) -> bool {
        !crate::sql::lexer::strip_comments(&self.down).trim().is_empty()
    }
}

/// Output of [`MigrationGenerator::generate`](super::MigrationGenerator::generate)
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct GeneratedMigration {
    pub migration: Migration,
    pub diff: SchemaDiff,
    pub warnings: Vec<String>,
    pub is_destructive: bool,
    pub affected_tables: Vec<String>,
}

/// Reversibility report for a migration
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RollbackValidation {
    pub is_valid: bool,
    pub errors: Vec<String>,
    pub warnings: Vec<String>,
}
