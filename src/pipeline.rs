//! Migration pipeline
//!
//! Runs the whole flow for one schema change: diff and synthesize, validate
//! both scripts, test in a sandbox, then hand the result to review. Every
//! intermediate artefact ends up in the [`PipelineReport`].

use crate::audit::{AuditAction, AuditEntry, AuditLog};
use crate::config::PipelineConfig;
use crate::error::ReviewError;
use crate::migration::{GeneratedMigration, MigrationGenerator, RollbackValidation};
use crate::review::{PendingReview, ProposedOperation, ReviewOrchestrator, ReviewStatus};
use crate::schema::Schema;
use crate::simulation::{MigrationTestResult, RegressionResult, SandboxExecutionEngine, TestQuery};
use crate::sql::{SqlValidator, ValidationResult};
use serde::{Deserialize, Serialize};
use serde_json::json;
use std::sync::Arc;
use tracing::{info, warn};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum PipelineOutcome {
    /// Current and target already match
    NoChanges,
    /// The migration failed in the sandbox and was not sent to review
    Blocked,
    AutoApproved,
    AwaitingReview,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PipelineReport {
    pub outcome: PipelineOutcome,
    pub generated: GeneratedMigration,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub up_validation: Option<ValidationResult>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub down_validation: Option<ValidationResult>,
    pub rollback: RollbackValidation,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub migration_test: Option<MigrationTestResult>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub regression: Option<RegressionResult>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub review: Option<PendingReview>,
}

/// The five stages wired together
pub struct MigrationPipeline {
    validator: SqlValidator,
    generator: MigrationGenerator,
    sandbox: Arc<SandboxExecutionEngine>,
    reviews: Arc<ReviewOrchestrator>,
    audit: Arc<dyn AuditLog>,
}

impl MigrationPipeline {
    pub fn new(config: &PipelineConfig, audit: Arc<dyn AuditLog>) -> Self {
        Self {
            validator: SqlValidator::new(config.validator.clone()),
            generator: MigrationGenerator::default(),
            sandbox: Arc::new(SandboxExecutionEngine::new(config.sandbox.clone())),
            reviews: Arc::new(ReviewOrchestrator::new(config.review.clone(), Arc::clone(&audit))),
            audit,
        }
    }

    pub fn validator(&self) -> &SqlValidator {
        &self.validator
    }

    pub fn generator(&self) -> &MigrationGenerator {
        &self.generator
    }

    pub fn sandbox(&self) -> &Arc<SandboxExecutionEngine> {
        &self.sandbox
    }

    pub fn reviews(&self) -> &Arc<ReviewOrchestrator> {
        &self.reviews
    }

    pub fn audit(&self) -> &Arc<dyn AuditLog> {
        &self.audit
    }

    /// Take `current` to `target` through every stage
    pub async fn run(
        &self,
        current: &Schema,
        target: &Schema,
        name: Option<&str>,
        queries: &[TestQuery],
    ) -> Result<PipelineReport, ReviewError> {
        let generated = self.generator.generate(current, target, name);
        let migration = &generated.migration;
        let rollback = MigrationGenerator::validate_rollback(migration);

        self.audit.log(
            AuditEntry::new(AuditAction::MigrationGenerated, "migration", &migration.id).with_details(json!({
                "checksum": migration.checksum,
                "isDestructive": generated.is_destructive,
                "affectedTables": generated.affected_tables,
            })),
        );

        if generated.diff.is_empty() {
            info!("🟰 Migration {} has no changes", migration.id);
            return Ok(PipelineReport {
                outcome: PipelineOutcome::NoChanges,
                generated,
                up_validation: None,
                down_validation: None,
                rollback,
                migration_test: None,
                regression: None,
                review: None,
            });
        }

        let up_validation = self.validator.validate(&migration.up);
        let down_validation = migration
            .has_rollback()
            .then(|| self.validator.validate(&migration.down));

        let migration_test = self.sandbox.test_migration(migration).await;
        let regression = if queries.is_empty() {
            None
        } else {
            Some(self.sandbox.test_regression(migration, queries).await)
        };

        self.audit.log(
            AuditEntry::new(AuditAction::MigrationTested, "migration", &migration.id).with_details(json!({
                "success": migration_test.success,
                "phase": migration_test.phase,
                "rollbackTested": migration_test.rollback_tested,
                "regressionPassed": regression.as_ref().map(|r| r.success),
            })),
        );

        let blocked = !migration_test.success || regression.as_ref().is_some_and(|r| !r.success);
        if blocked {
            warn!("🚫 Migration {} blocked before review", migration.id);
            return Ok(PipelineReport {
                outcome: PipelineOutcome::Blocked,
                generated,
                up_validation: Some(up_validation),
                down_validation,
                rollback,
                migration_test: Some(migration_test),
                regression,
                review: None,
            });
        }

        let operation = ProposedOperation::from_generated(&generated);
        let review = self.reviews.request_review(operation, Some(up_validation.clone()))?;
        let outcome = match review.status {
            ReviewStatus::Approved => PipelineOutcome::AutoApproved,
            _ => PipelineOutcome::AwaitingReview,
        };
        info!("🚦 Migration {} -> {:?}", generated.migration.id, outcome);

        Ok(PipelineReport {
            outcome,
            generated,
            up_validation: Some(up_validation),
            down_validation,
            rollback,
            migration_test: Some(migration_test),
            regression,
            review: Some(review),
        })
    }

    /// Stop background timers in the sandbox and review registries
    pub fn dispose(&self) {
        self.sandbox.dispose();
        self.reviews.dispose();
    }
}
