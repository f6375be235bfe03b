//! Executor interface and execution result types
//!
//! The sandbox simulator implements [`SqlExecutor`]; a backend that talks to
//! a real engine implements the same trait and gets the migration and
//! regression protocols for free.

use crate::sql::{ValidationCode, ValidationError};
use async_trait::async_trait;
use serde::{Deserialize, Serialize};

/// Closed set of execution failure codes
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum ExecutionErrorCode {
    DangerousOperation,
    ForbiddenKeyword,
    SyntaxError,
    SqlTooLarge,
    EmptyQuery,
    SandboxNotFound,
    SandboxLimitReached,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ExecutionError {
    pub code: ExecutionErrorCode,
    pub message: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub detail: Option<String>,
}

impl ExecutionError {
    pub fn new(code: ExecutionErrorCode, message: impl Into<String>) -> Self {
        Self {
            code,
            message: message.into(),
            detail: None,
        }
    }

    pub fn with_detail(mut self, detail: impl Into<String>) -> Self {
        self.detail = Some(detail.into());
        self
    }
}

impl From<&ValidationError> for ExecutionError {
    fn from(error: &ValidationError) -> Self {
        let code = match error.code {
            ValidationCode::DangerousOperation => ExecutionErrorCode::DangerousOperation,
            ValidationCode::ForbiddenKeyword => ExecutionErrorCode::ForbiddenKeyword,
            ValidationCode::SqlTooLarge => ExecutionErrorCode::SqlTooLarge,
            ValidationCode::EmptyQuery => ExecutionErrorCode::EmptyQuery,
            ValidationCode::SyntaxError
            | ValidationCode::ReservedKeyword
            | ValidationCode::IdentifierTooLong => ExecutionErrorCode::SyntaxError,
        };
        Self {
            code,
            message: error.message.clone(),
            detail: error.detail.clone(),
        }
    }
}

/// Statement classes the simulator distinguishes
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum StatementKind {
    CreateTable,
    AlterTable,
    CreateIndex,
    Create,
    Drop,
    Insert,
    Update,
    Delete,
    Select,
    Set,
    Other,
}

/// Per-statement simulation outcome
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct StatementOutcome {
    pub index: usize,
    pub kind: StatementKind,
    pub sql: String,
    pub rows_affected: u64,
}

/// Result of running SQL in a sandbox
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SandboxResult {
    #[serde(skip_serializing_if = "Option::is_none")]
    pub sandbox_id: Option<String>,
    pub success: bool,
    pub statements: Vec<StatementOutcome>,
    pub rows_affected: u64,
    pub warnings: Vec<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<ExecutionError>,
    pub execution_time_ms: u64,
}

impl SandboxResult {
    pub fn failed(sandbox_id: Option<String>, error: ExecutionError) -> Self {
        Self {
            sandbox_id,
            success: false,
            error: Some(error),
            ..Default::default()
        }
    }
}

/// Something that can run SQL in an isolated namespace
#[async_trait]
pub trait SqlExecutor: Send + Sync {
    /// Run `sql` in a newly allocated sandbox
    async fn execute(&self, sql: &str) -> SandboxResult;

    /// Run `sql` in an existing sandbox, seeing what earlier calls applied
    async fn execute_in(&self, sandbox_id: &str, sql: &str) -> SandboxResult;
}
