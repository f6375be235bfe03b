//! Sandbox Execution Engine
//!
//! Deterministic stand-in for a database: SQL is validated, rewritten into a
//! per-sandbox namespace, split into statements and each statement's effect
//! is estimated. Sandboxes live in a TTL registry and are additionally
//! reclaimed shortly after each `execute()`.

use crate::migration::Migration;
use crate::simulation::executor::{
    ExecutionError, ExecutionErrorCode, SandboxResult, SqlExecutor, StatementKind,
    StatementOutcome,
};
use crate::simulation::protocol::{self, MigrationTestResult, RegressionResult, TestQuery};
use crate::simulation::rewrite::{rewrite_for_sandbox, sandbox_schema_name};
use crate::sql::lexer::{self, Region};
use crate::sql::{SqlValidator, ValidationError, ValidatorOptions};
use crate::ttl::{TtlCache, TtlOptions};
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use once_cell::sync::Lazy;
use parking_lot::Mutex;
use regex::Regex;
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::sync::Arc;
use std::time::{Duration, Instant};
use tokio::runtime::Handle;
use tokio::task::JoinHandle;
use tracing::{debug, info, warn};
use uuid::Uuid;

/// Estimate used for UPDATE and DELETE, which the simulator cannot count
pub const DEFAULT_ROW_ESTIMATE: u64 = 1;

/// A live sandbox namespace
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SandboxContext {
    pub sandbox_id: String,
    pub schema_name: String,
    pub created_at: DateTime<Utc>,
    pub is_active: bool,
}

#[derive(Debug, Clone)]
pub struct SandboxOptions {
    /// Lifetime of an untouched sandbox
    pub ttl: Duration,
    pub cleanup_interval: Duration,
    /// Reclaim a sandbox this long after `execute()`; `None` leaves it to the TTL
    pub cleanup_delay: Option<Duration>,
    pub max_sandboxes: usize,
    pub schema_prefix: String,
    pub validator: ValidatorOptions,
}

impl Default for SandboxOptions {
    fn default() -> Self {
        Self {
            ttl: Duration::from_secs(30 * 60),
            cleanup_interval: Duration::from_secs(60),
            cleanup_delay: Some(Duration::from_secs(5)),
            max_sandboxes: 100,
            schema_prefix: "_sandbox_".to_string(),
            validator: ValidatorOptions::default(),
        }
    }
}

static ADD_COLUMN_CLAUSE: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"(?i)\bADD\s+(?:COLUMN\s+)?").expect("add column regex"));
static NOT_NULL: Lazy<Regex> = Lazy::new(|| Regex::new(r"(?i)\bNOT\s+NULL\b").expect("not null regex"));
static DEFAULT_KW: Lazy<Regex> = Lazy::new(|| Regex::new(r"(?i)\bDEFAULT\b").expect("default regex"));
static VALUES_KW: Lazy<Regex> = Lazy::new(|| Regex::new(r"(?i)\bVALUES\b").expect("values regex"));
static CONSTRAINT_KW: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"(?i)^(?:CONSTRAINT|PRIMARY|UNIQUE|FOREIGN|CHECK|EXCLUDE)\b").expect("constraint regex"));

/// Classify a single statement by its leading keywords
pub fn classify(statement: &str) -> StatementKind {
    let words: Vec<String> = statement
        .split_whitespace()
        .take(6)
        .map(|w| w.trim_matches('(').to_ascii_uppercase())
        .collect();
    let first = words.first().map(String::as_str).unwrap_or("");

    match first {
        "CREATE" => {
            let rest: Vec<&str> = words[1..]
                .iter()
                .map(String::as_str)
                .filter(|w| !matches!(*w, "UNIQUE" | "TEMP" | "TEMPORARY" | "UNLOGGED" | "OR" | "REPLACE"))
                .collect();
            match rest.first().copied() {
                Some("TABLE") => StatementKind::CreateTable,
                Some("INDEX") => StatementKind::CreateIndex,
                _ => StatementKind::Create,
            }
        }
        "ALTER" if words.get(1).map(String::as_str) == Some("TABLE") => StatementKind::AlterTable,
        "DROP" => StatementKind::Drop,
        "INSERT" => StatementKind::Insert,
        "UPDATE" => StatementKind::Update,
        "DELETE" => StatementKind::Delete,
        "SELECT" | "WITH" => StatementKind::Select,
        "SET" => StatementKind::Set,
        _ => StatementKind::Other,
    }
}

/// Simulated row count for a statement; approximate by nature
pub fn estimate_rows(kind: StatementKind, statement: &str) -> u64 {
    match kind {
        StatementKind::CreateTable
        | StatementKind::AlterTable
        | StatementKind::CreateIndex
        | StatementKind::Create
        | StatementKind::Drop
        | StatementKind::Set
        | StatementKind::Select
        | StatementKind::Other => 0,
        StatementKind::Insert => count_value_tuples(statement).unwrap_or(DEFAULT_ROW_ESTIMATE),
        StatementKind::Update | StatementKind::Delete => DEFAULT_ROW_ESTIMATE,
    }
}

/// Number of top-level tuples after `VALUES`; `None` for `INSERT ... SELECT`
fn count_value_tuples(statement: &str) -> Option<u64> {
    let code = lexer::code_view(statement);
    let start = VALUES_KW.find(&code)?.end();

    let mut depth: usize = 0;
    let mut tuples = 0;
    for (_, ch, region) in lexer::scan(&code[start..]) {
        if region != Region::Code {
            continue;
        }
        match ch {
            '(' => {
                if depth == 0 {
                    tuples += 1;
                }
                depth += 1;
            }
            ')' => depth = depth.saturating_sub(1),
            // ON CONFLICT, RETURNING and friends end the list
            c if depth == 0 && c.is_alphabetic() => break,
            _ => {}
        }
    }
    Some(tuples)
}

/// `ADD COLUMN ... NOT NULL` with no `DEFAULT` fails on a populated table
fn adds_required_column(statement: &str) -> bool {
    let code = lexer::code_view(statement);
    ADD_COLUMN_CLAUSE.find_iter(&code).any(|found| {
        let clause = lexer::split_top_level(&code[found.end()..], ',')
            .into_iter()
            .next()
            .unwrap_or("");
        !CONSTRAINT_KW.is_match(clause) && NOT_NULL.is_match(clause) && !DEFAULT_KW.is_match(clause)
    })
}

/// Simulated, TTL-bound sandbox executor
pub struct SandboxExecutionEngine {
    validator: SqlValidator,
    registry: TtlCache<String, SandboxContext>,
    pending_cleanups: Arc<Mutex<HashMap<String, JoinHandle<()>>>>,
    options: SandboxOptions,
}

impl SandboxExecutionEngine {
    pub fn new(options: SandboxOptions) -> Self {
        let registry = TtlCache::with_on_expire(
            TtlOptions {
                ttl: options.ttl,
                cleanup_interval: options.cleanup_interval,
                max_entries: None,
                touch_on_access: true,
            },
            Arc::new(|sandbox_id: String, context: SandboxContext| {
                warn!(
                    "⏰ Sandbox {} ({}) expired after inactivity",
                    sandbox_id, context.schema_name
                );
            }),
        );
        registry.start_auto_cleanup();

        Self {
            validator: SqlValidator::new(options.validator.clone()),
            registry,
            pending_cleanups: Arc::new(Mutex::new(HashMap::new())),
            options,
        }
    }

    pub fn options(&self) -> &SandboxOptions {
        &self.options
    }

    /// Active sandbox by id; reading renews its TTL
    pub fn get_sandbox(&self, sandbox_id: &str) -> Option<SandboxContext> {
        self.registry.get(&sandbox_id.to_string())
    }

    pub fn active_count(&self) -> usize {
        self.registry.len()
    }

    pub fn active_sandboxes(&self) -> Vec<SandboxContext> {
        self.registry.values()
    }

    /// Remove one sandbox now; false if it was already gone
    pub fn cleanup(&self, sandbox_id: &str) -> bool {
        if let Some(handle) = self.pending_cleanups.lock().remove(sandbox_id) {
            handle.abort();
        }
        let removed = self.registry.remove(&sandbox_id.to_string()).is_some();
        if removed {
            info!("🧹 Sandbox {} cleaned up", sandbox_id);
        }
        removed
    }

    /// Remove every sandbox; safe to call repeatedly
    pub fn cleanup_all(&self) -> usize {
        for (_, handle) in self.pending_cleanups.lock().drain() {
            handle.abort();
        }
        let removed = self.registry.clear().len();
        if removed > 0 {
            info!("🧹 Cleaned up {} sandbox(es)", removed);
        }
        removed
    }

    /// Stop every timer and drop all sandboxes
    pub fn dispose(&self) {
        self.cleanup_all();
        self.registry.stop_auto_cleanup();
    }

    pub async fn test_migration(&self, migration: &Migration) -> MigrationTestResult {
        protocol::test_migration(self, migration).await
    }

    pub async fn test_regression(&self, migration: &Migration, queries: &[TestQuery]) -> RegressionResult {
        protocol::test_regression(self, migration, queries).await
    }

    fn create_sandbox(&self) -> Result<SandboxContext, ExecutionError> {
        if self.registry.len() >= self.options.max_sandboxes {
            return Err(ExecutionError::new(
                ExecutionErrorCode::SandboxLimitReached,
                format!("Sandbox limit of {} reached", self.options.max_sandboxes),
            ));
        }

        let sandbox_id = Uuid::new_v4().simple().to_string()[..12].to_string();
        let context = SandboxContext {
            schema_name: sandbox_schema_name(&self.options.schema_prefix, &sandbox_id),
            sandbox_id: sandbox_id.clone(),
            created_at: Utc::now(),
            is_active: true,
        };
        self.registry.insert(sandbox_id, context.clone());
        info!("🧪 Created sandbox {}", context.schema_name);
        Ok(context)
    }

    fn schedule_cleanup(&self, sandbox_id: &str) {
        let Some(delay) = self.options.cleanup_delay else {
            return;
        };
        let Ok(runtime) = Handle::try_current() else {
            return;
        };

        let registry = self.registry.clone();
        let pending = Arc::clone(&self.pending_cleanups);
        let id = sandbox_id.to_string();
        let handle = runtime.spawn(async move {
            tokio::time::sleep(delay).await;
            pending.lock().remove(&id);
            if registry.remove(&id).is_some() {
                debug!("Sandbox {} reclaimed after delayed cleanup", id);
            }
        });

        if let Some(previous) = self.pending_cleanups.lock().insert(sandbox_id.to_string(), handle) {
            previous.abort();
        }
    }

    /// Attach the first statement that fails on its own with the same code
    fn execution_error(&self, sql: &str, error: &ValidationError) -> ExecutionError {
        let failure = ExecutionError::from(error);
        if failure.detail.is_some() {
            return failure;
        }
        let offending = lexer::split_statements(sql)
            .into_iter()
            .find(|statement| self.validator.validate(statement).has_code(error.code));
        match offending {
            Some(statement) => failure.with_detail(statement),
            None => failure,
        }
    }

    /// Validate, rewrite and simulate `sql` inside `context`
    fn run(&self, context: &SandboxContext, sql: &str) -> SandboxResult {
        let started = Instant::now();
        let validation = self.validator.validate(sql);
        let mut warnings: Vec<String> = validation.warnings.iter().map(|w| w.message.clone()).collect();

        if let Some(error) = validation.primary_error() {
            warn!(
                "🚫 Sandbox {} rejected SQL: {}",
                context.sandbox_id, error.message
            );
            return SandboxResult {
                warnings,
                execution_time_ms: started.elapsed().as_millis() as u64,
                ..SandboxResult::failed(
                    Some(context.sandbox_id.clone()),
                    self.execution_error(sql, error),
                )
            };
        }

        let rewritten = rewrite_for_sandbox(sql, &context.schema_name);
        let mut statements = Vec::new();
        for (index, statement) in lexer::split_statements(&rewritten).into_iter().enumerate() {
            let kind = classify(statement);
            let rows_affected = estimate_rows(kind, statement);

            if kind == StatementKind::Drop {
                warnings.push(format!("Statement {} drops an object", index + 1));
            }
            if kind == StatementKind::AlterTable && adds_required_column(statement) {
                warnings.push(format!(
                    "Statement {} adds a NOT NULL column without DEFAULT; this fails on a populated table",
                    index + 1
                ));
            }

            debug!(
                "Sandbox {} statement {}: {:?}, ~{} row(s)",
                context.sandbox_id,
                index + 1,
                kind,
                rows_affected
            );
            statements.push(StatementOutcome {
                index,
                kind,
                sql: statement.to_string(),
                rows_affected,
            });
        }

        SandboxResult {
            sandbox_id: Some(context.sandbox_id.clone()),
            success: true,
            rows_affected: statements.iter().map(|s| s.rows_affected).sum(),
            statements,
            warnings,
            error: None,
            execution_time_ms: started.elapsed().as_millis() as u64,
        }
    }
}

impl Default for SandboxExecutionEngine {
    fn default() -> Self {
        Self::new(SandboxOptions::default())
    }
}

impl Drop for SandboxExecutionEngine {
    fn drop(&mut self) {
        for (_, handle) in self.pending_cleanups.lock().drain() {
            handle.abort();
        }
        self.registry.stop_auto_cleanup();
    }
}

#[async_trait]
impl SqlExecutor for SandboxExecutionEngine {
    async fn execute(&self, sql: &str) -> SandboxResult {
        let context = match self.create_sandbox() {
            Ok(context) => context,
            Err(error) => return SandboxResult::failed(None, error),
        };
        let result = self.run(&context, sql);
        self.schedule_cleanup(&context.sandbox_id);
        result
    }

    async fn execute_in(&self, sandbox_id: &str, sql: &str) -> SandboxResult {
        match self.get_sandbox(sandbox_id) {
            Some(context) => self.run(&context, sql),
            None => SandboxResult::failed(
                Some(sandbox_id.to_string()),
                ExecutionError::new(
                    ExecutionErrorCode::SandboxNotFound,
                    format!("Sandbox {} not found or expired", sandbox_id),
                ),
            ),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;

    fn engine() -> SandboxExecutionEngine {
        SandboxExecutionEngine::new(SandboxOptions {
            cleanup_delay: None,
            ..Default::default()
        })
    }

    #[test]
    fn test_classify() {
        assert_eq!(classify("CREATE TABLE t (id int)"), StatementKind::CreateTable);
        assert_eq!(classify("create unique index i on t (a)"), StatementKind::CreateIndex);
        assert_eq!(classify("CREATE OR REPLACE FUNCTION f() ..."), StatementKind::Create);
        assert_eq!(classify("ALTER TABLE t ADD COLUMN a int"), StatementKind::AlterTable);
        assert_eq!(classify("DROP TABLE t"), StatementKind::Drop);
        assert_eq!(classify("WITH x AS (SELECT 1) SELECT * FROM x"), StatementKind::Select);
        assert_eq!(classify("SET search_path TO s, public"), StatementKind::Set);
        assert_eq!(classify("VACUUM t"), StatementKind::Other);
    }

    #[test]
    fn test_row_estimates() {
        let insert = "INSERT INTO t (a, b) VALUES (1, 'x'), (2, '(y)'), (3, f(4)) ON CONFLICT (a) DO NOTHING";
        assert_eq!(estimate_rows(StatementKind::Insert, insert), 3);
        assert_eq!(
            estimate_rows(StatementKind::Insert, "INSERT INTO t SELECT * FROM s"),
            DEFAULT_ROW_ESTIMATE
        );
        assert_eq!(estimate_rows(StatementKind::Update, "UPDATE t SET a = 1"), 1);
        assert_eq!(estimate_rows(StatementKind::Drop, "DROP TABLE t"), 0);
        assert_eq!(estimate_rows(StatementKind::CreateTable, "CREATE TABLE t (a int)"), 0);
    }

    #[test]
    fn test_required_column_detection() {
        assert!(adds_required_column("ALTER TABLE t ADD COLUMN a int NOT NULL"));
        assert!(!adds_required_column("ALTER TABLE t ADD COLUMN a int NOT NULL DEFAULT 0"));
        assert!(!adds_required_column("ALTER TABLE t ADD COLUMN a int"));
        assert!(!adds_required_column("ALTER TABLE t ADD CONSTRAINT c CHECK (a IS NOT NULL)"));
    }

    #[tokio::test(start_paused = true)]
    async fn test_execute_creates_sandbox_and_rewrites() {
        let engine = engine();
        let result = engine
            .execute("CREATE TABLE public.items (id int); INSERT INTO public.items (id) VALUES (1), (2);")
            .await;

        assert!(result.success);
        assert_eq!(result.rows_affected, 2);
        let sandbox_id = result.sandbox_id.clone().unwrap();
        let context = engine.get_sandbox(&sandbox_id).unwrap();
        assert!(context.is_active);
        assert!(context.schema_name.starts_with("_sandbox_"));

        assert_eq!(result.statements[0].kind, StatementKind::Set);
        assert!(result.statements[1]
            .sql
            .contains(&format!("{}.items", context.schema_name)));
        engine.dispose();
    }

    #[tokio::test(start_paused = true)]
    async fn test_dangerous_sql_is_rejected() {
        let engine = engine();
        let result = engine.execute("DROP DATABASE production;").await;
        assert!(!result.success);
        assert_eq!(
            result.error.map(|e| e.code),
            Some(ExecutionErrorCode::DangerousOperation)
        );
        engine.dispose();
    }

    #[tokio::test(start_paused = true)]
    async fn test_warnings_for_drop_and_required_column() {
        let engine = engine();
        let result = engine
            .execute("ALTER TABLE users ADD COLUMN tier text NOT NULL; DROP TABLE sessions;")
            .await;
        assert!(result.success);
        assert_eq!(result.warnings.len(), 2);
        engine.dispose();
    }

    #[tokio::test(start_paused = true)]
    async fn test_untouched_sandbox_expires() {
        let engine = SandboxExecutionEngine::new(SandboxOptions {
            ttl: Duration::from_secs(10),
            cleanup_interval: Duration::from_secs(1),
            cleanup_delay: None,
            ..Default::default()
        });
        let id = engine.execute("SELECT 1").await.sandbox_id.unwrap();
        assert_eq!(engine.active_count(), 1);

        tokio::time::sleep(Duration::from_secs(12)).await;
        assert_eq!(engine.active_count(), 0);
        assert!(engine.get_sandbox(&id).is_none());
        engine.dispose();
    }

    #[tokio::test(start_paused = true)]
    async fn test_accessed_sandbox_stays_active() {
        let engine = SandboxExecutionEngine::new(SandboxOptions {
            ttl: Duration::from_secs(10),
            cleanup_interval: Duration::from_secs(1),
            cleanup_delay: None,
            ..Default::default()
        });
        let id = engine.execute("SELECT 1").await.sandbox_id.unwrap();

        for _ in 0..3 {
            tokio::time::sleep(Duration::from_secs(8)).await;
            assert!(engine.get_sandbox(&id).is_some());
        }
        engine.dispose();
    }

    #[tokio::test(start_paused = true)]
    async fn test_delayed_cleanup_reclaims_sandbox() {
        let engine = SandboxExecutionEngine::new(SandboxOptions {
            cleanup_delay: Some(Duration::from_secs(5)),
            ..Default::default()
        });
        let id = engine.execute("SELECT 1").await.sandbox_id.unwrap();
        assert!(engine.get_sandbox(&id).is_some());

        tokio::time::sleep(Duration::from_secs(6)).await;
        assert!(engine.get_sandbox(&id).is_none());
        engine.dispose();
    }

    #[tokio::test(start_paused = true)]
    async fn test_cleanup_and_cleanup_all() {
        let engine = engine();
        let first = engine.execute("SELECT 1").await.sandbox_id.unwrap();
        engine.execute("SELECT 2").await;
        engine.execute("SELECT 3").await;

        assert!(engine.cleanup(&first));
        assert!(!engine.cleanup(&first));
        assert_eq!(engine.cleanup_all(), 2);
        assert_eq!(engine.cleanup_all(), 0);
        assert_eq!(engine.active_count(), 0);
    }

    #[tokio::test(start_paused = true)]
    async fn test_sandbox_limit() {
        let engine = SandboxExecutionEngine::new(SandboxOptions {
            max_sandboxes: 1,
            cleanup_delay: None,
            ..Default::default()
        });
        assert!(engine.execute("SELECT 1").await.success);

        let result = engine.execute("SELECT 2").await;
        assert_eq!(
            result.error.map(|e| e.code),
            Some(ExecutionErrorCode::SandboxLimitReached)
        );
        engine.dispose();
    }

    #[tokio::test(start_paused = true)]
    async fn test_rejection_names_offending_statement() {
        let engine = engine();
        let result = engine
            .execute("SELECT id FROM users;\nTRUNCATE users;\nSELECT 2;")
            .await;

        let error = result.error.unwrap();
        assert_eq!(error.code, ExecutionErrorCode::ForbiddenKeyword);
        assert_eq!(error.detail.as_deref(), Some("TRUNCATE users"));
        engine.dispose();
    }

    #[tokio::test(start_paused = true)]
    async fn test_execute_in_unknown_sandbox() {
        let engine = engine();
        let result = engine.execute_in("missing", "SELECT 1").await;
        assert_eq!(
            result.error.map(|e| e.code),
            Some(ExecutionErrorCode::SandboxNotFound)
        );
    }
}
