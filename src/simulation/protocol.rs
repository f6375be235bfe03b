//! Migration and regression test protocols
//!
//! Written against [`SqlExecutor`] so they run unchanged on the simulator or
//! on a real-engine backend. `down` and every regression query run in the
//! sandbox that `up` created, strictly after it and in caller order.

use crate::migration::Migration;
use crate::simulation::executor::{ExecutionError, SandboxResult, SqlExecutor};
use serde::{Deserialize, Serialize};
use tracing::{info, warn};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum TestPhase {
    Up,
    Down,
    Complete,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct MigrationTestResult {
    /// True whenever `up` applied; a failed rollback only adds a warning
    pub success: bool,
    pub phase: TestPhase,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub sandbox_id: Option<String>,
    pub up_result: SandboxResult,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub down_result: Option<SandboxResult>,
    pub rollback_tested: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<ExecutionError>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub warning: Option<String>,
}

/// Caller-supplied regression fixture
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct TestQuery {
    pub name: String,
    pub sql: String,
    #[serde(default)]
    pub critical: bool,
}

impl TestQuery {
    pub fn new(name: impl Into<String>, sql: impl Into<String>, critical: bool) -> Self {
        Self {
            name: name.into(),
            sql: sql.into(),
            critical,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum FailureSeverity {
    Critical,
    Warning,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct QueryFailure {
    pub name: String,
    pub sql: String,
    pub severity: FailureSeverity,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<ExecutionError>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RegressionResult {
    /// False only when a critical query failed or the migration did not apply
    pub success: bool,
    pub migration_failed: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub migration_error: Option<ExecutionError>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub sandbox_id: Option<String>,
    pub queries_run: usize,
    pub passed: usize,
    pub failures: Vec<QueryFailure>,
}

impl RegressionResult {
    pub fn critical_failures(&self) -> usize {
        self.failures
            .iter()
            .filter(|f| f.severity == FailureSeverity::Critical)
            .count()
    }
}

/// Apply `up`, then `down` in the same sandbox
pub async fn test_migration<E>(executor: &E, migration: &Migration) -> MigrationTestResult
where
    E: SqlExecutor + ?Sized,
{
    let up_result = executor.execute(&migration.up).await;
    let sandbox_id = up_result.sandbox_id.clone();

    if !up_result.success {
        warn!("❌ Migration {} failed during up", migration.id);
        return MigrationTestResult {
            success: false,
            phase: TestPhase::Up,
            sandbox_id,
            error: up_result.error.clone(),
            up_result,
            down_result: None,
            rollback_tested: false,
            warning: None,
        };
    }

    let rollback_sandbox = if migration.has_rollback() {
        sandbox_id.clone()
    } else {
        None
    };
    let Some(id) = rollback_sandbox else {
        info!("✅ Migration {} applied, no rollback to test", migration.id);
        return MigrationTestResult {
            success: true,
            phase: TestPhase::Complete,
            sandbox_id,
            up_result,
            down_result: None,
            rollback_tested: false,
            error: None,
            warning: None,
        };
    };

    let down_result = executor.execute_in(&id, &migration.down).await;
    if !down_result.success {
        warn!("⚠️ Migration {} applied but its rollback failed", migration.id);
        return MigrationTestResult {
            success: true,
            phase: TestPhase::Down,
            sandbox_id,
            up_result,
            error: down_result.error.clone(),
            down_result: Some(down_result),
            rollback_tested: true,
            warning: Some("Migration is not reversible: rollback failed".to_string()),
        };
    }

    info!("✅ Migration {} applied and rolled back", migration.id);
    MigrationTestResult {
        success: true,
        phase: TestPhase::Complete,
        sandbox_id,
        up_result,
        down_result: Some(down_result),
        rollback_tested: true,
        error: None,
        warning: None,
    }
}

/// Apply `up`, then run each query sequentially in the same sandbox
pub async fn test_regression<E>(
    executor: &E,
    migration: &Migration,
    queries: &[TestQuery],
) -> RegressionResult
where
    E: SqlExecutor + ?Sized,
{
    let up_result = executor.execute(&migration.up).await;
    let sandbox_id = up_result.sandbox_id.clone();

    let id = match sandbox_id.clone() {
        Some(id) if up_result.success => id,
        _ => {
            warn!("❌ Regression run aborted: migration {} did not apply", migration.id);
            return RegressionResult {
                success: false,
                migration_failed: true,
                migration_error: up_result.error,
                sandbox_id,
                queries_run: 0,
                passed: 0,
                failures: Vec::new(),
            };
        }
    };

    let mut failures = Vec::new();
    for query in queries {
        let result = executor.execute_in(&id, &query.sql).await;
        if !result.success {
            failures.push(QueryFailure {
                name: query.name.clone(),
                sql: query.sql.clone(),
                severity: if query.critical {
                    FailureSeverity::Critical
                } else {
                    FailureSeverity::Warning
                },
                error: result.error,
            });
        }
    }

    let report = RegressionResult {
        success: !failures.iter().any(|f| f.severity == FailureSeverity::Critical),
        migration_failed: false,
        migration_error: None,
        sandbox_id,
        queries_run: queries.len(),
        passed: queries.len() - failures.len(),
        failures,
    };
    info!(
        "🔁 Regression for {}: {}/{} passed, {} critical failure(s)",
        migration.id,
        report.passed,
        report.queries_run,
        report.critical_failures()
    );
    report
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::migration::MigrationGenerator;
    use crate::schema::{Column, Schema, Table};
    use crate::simulation::executor::{ExecutionErrorCode, StatementKind, StatementOutcome};
    use crate::simulation::{SandboxExecutionEngine, SandboxOptions};
    use async_trait::async_trait;
    use chrono::Utc;
    use parking_lot::Mutex;
    use pretty_assertions::assert_eq;

    fn engine() -> SandboxExecutionEngine {
        SandboxExecutionEngine::new(SandboxOptions {
            cleanup_delay: None,
            ..Default::default()
        })
    }

    fn migration(up: &str, down: &str) -> Migration {
        Migration {
            id: "1_test".to_string(),
            name: "test".to_string(),
            timestamp: Utc::now(),
            up: up.to_string(),
            down: down.to_string(),
            checksum: crate::migration::checksum(up),
        }
    }

    #[tokio::test(start_paused = true)]
    async fn test_dangerous_up_fails_in_up_phase() {
        let engine = engine();
        let result = engine
            .test_migration(&migration("DROP DATABASE production;", "SELECT 1;"))
            .await;
        assert!(!result.success);
        assert_eq!(result.phase, TestPhase::Up);
        assert_eq!(
            result.error.map(|e| e.code),
            Some(ExecutionErrorCode::DangerousOperation)
        );
        assert!(result.down_result.is_none());
        engine.dispose();
    }

    #[tokio::test(start_paused = true)]
    async fn test_generated_migration_round_trips() {
        let engine = engine();
        let target = Schema::new().with_table(
            Table::new("users")
                .with_column(Column::new("id", "uuid").primary_key())
                .with_column(Column::new("email", "text").unique().not_null()),
        );
        let generated = MigrationGenerator::default().generate(&Schema::new(), &target, None);

        let result = engine.test_migration(&generated.migration).await;
        assert!(result.success);
        assert_eq!(result.phase, TestPhase::Complete);
        assert!(result.rollback_tested);
        assert_eq!(
            result.down_result.as_ref().and_then(|r| r.sandbox_id.clone()),
            result.sandbox_id
        );
        engine.dispose();
    }

    #[tokio::test(start_paused = true)]
    async fn test_failed_down_keeps_success_with_warning() {
        let engine = engine();
        let result = engine
            .test_migration(&migration("CREATE TABLE t (id int);", "DROP TABLE t (;"))
            .await;
        assert!(result.success);
        assert_eq!(result.phase, TestPhase::Down);
        assert!(result.warning.unwrap().contains("not reversible"));
        engine.dispose();
    }

    #[tokio::test(start_paused = true)]
    async fn test_empty_down_is_vacuous_success() {
        let engine = engine();
        let result = engine
            .test_migration(&migration("CREATE TABLE t (id int);", "-- irreversible"))
            .await;
        assert!(result.success);
        assert_eq!(result.phase, TestPhase::Complete);
        assert!(!result.rollback_tested);
        engine.dispose();
    }

    #[tokio::test(start_paused = true)]
    async fn test_regression_severity_split() {
        let engine = engine();
        let queries = vec![
            TestQuery::new("lookup", "SELECT id FROM t WHERE id = 1", true),
            TestQuery::new("broken critical", "SELECT (id FROM t", true),
            TestQuery::new("broken optional", "SELECT pg_cancel_backend(1)", false),
        ];
        let result = engine
            .test_regression(&migration("CREATE TABLE t (id int);", ""), &queries)
            .await;

        assert!(!result.success);
        assert!(!result.migration_failed);
        assert_eq!(result.failures.len(), 2);
        assert_eq!(result.failures[0].severity, FailureSeverity::Critical);
        assert_eq!(result.failures[1].severity, FailureSeverity::Warning);
        assert_eq!(result.passed, 1);
        engine.dispose();
    }

    #[tokio::test(start_paused = true)]
    async fn test_regression_warnings_alone_pass() {
        let engine = engine();
        let queries = vec![TestQuery::new("optional", "SELECT (", false)];
        let result = engine
            .test_regression(&migration("CREATE TABLE t (id int);", ""), &queries)
            .await;
        assert!(result.success);
        assert_eq!(result.failures.len(), 1);
        engine.dispose();
    }

    #[tokio::test(start_paused = true)]
    async fn test_regression_with_failed_migration() {
        let engine = engine();
        let queries = vec![TestQuery::new("q", "SELECT 1", true)];
        let result = engine
            .test_regression(&migration("ALTER SYSTEM SET fsync = off;", ""), &queries)
            .await;
        assert!(result.migration_failed);
        assert!(!result.success);
        assert!(result.failures.is_empty());
        engine.dispose();
    }

    /// Records call order to check sequencing
    struct RecordingExecutor {
        calls: Mutex<Vec<String>>,
    }

    #[async_trait]
    impl SqlExecutor for RecordingExecutor {
        async fn execute(&self, sql: &str) -> SandboxResult {
            self.calls.lock().push(format!("new:{sql}"));
            SandboxResult {
                sandbox_id: Some("s1".to_string()),
                success: true,
                statements: vec![StatementOutcome {
                    index: 0,
                    kind: StatementKind::Other,
                    sql: sql.to_string(),
                    rows_affected: 0,
                }],
                ..Default::default()
            }
        }

        async fn execute_in(&self, sandbox_id: &str, sql: &str) -> SandboxResult {
            self.calls.lock().push(format!("{sandbox_id}:{sql}"));
            SandboxResult {
                sandbox_id: Some(sandbox_id.to_string()),
                success: true,
                ..Default::default()
            }
        }
    }

    #[tokio::test]
    async fn test_protocol_runs_in_order_on_any_executor() {
        let executor = RecordingExecutor {
            calls: Mutex::new(Vec::new()),
        };
        let queries = vec![
            TestQuery::new("a", "SELECT 1", true),
            TestQuery::new("b", "SELECT 2", false),
        ];
        test_regression(&executor, &migration("UP", ""), &queries).await;
        test_migration(&executor, &migration("UP", "DOWN")).await;

        assert_eq!(
            *executor.calls.lock(),
            vec!["new:UP", "s1:SELECT 1", "s1:SELECT 2", "new:UP", "s1:DOWN"]
        );
    }
}
