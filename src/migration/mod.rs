//! Migration synthesis
//!
//! Converts schema diffs into up/down SQL with a deterministic checksum and
//! a reversibility report.

pub mod generator;
pub mod models;

pub use generator::{checksum, migration_id, slugify, MigrationGenerator};
pub use models::{GeneratedMigration, Migration, RollbackValidation};
