//! Sandbox simulation
//!
//! Runs SQL against an isolated, simulated namespace and drives the
//! migration and regression test protocols.

pub mod executor;
pub mod protocol;
pub mod rewrite;
pub mod sandbox;

pub use executor::{
    ExecutionError, ExecutionErrorCode, SandboxResult, SqlExecutor, StatementKind, StatementOutcome,
};
pub use protocol::{
    test_migration, test_regression, FailureSeverity, MigrationTestResult, QueryFailure,
    RegressionResult, TestPhase, TestQuery,
};
pub use rewrite::{rewrite_for_sandbox, sandbox_schema_name};
pub use sandbox::{SandboxContext, SandboxExecutionEngine, SandboxOptions};
