//! Sandbox route handlers
//!
//! Every request gets its own sandbox; ids come back in the results so
//! callers can tear them down early.

use crate::error::{not_found_error, validation_error, ApiResult};
use crate::migration::Migration;
use crate::routes::SuccessResponse;
use crate::simulation::{MigrationTestResult, RegressionResult, SandboxResult, SqlExecutor, TestQuery};
use crate::state::SharedState;
use axum::{
    extract::{Path, State},
    Json,
};
use serde::{Deserialize, Serialize};
use tracing::info;
use validator::Validate;

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ExecuteRequest {
    pub sql: String,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct TestMigrationRequest {
    pub migration: Migration,
}

#[derive(Debug, Deserialize, Validate)]
#[serde(rename_all = "camelCase")]
pub struct TestRegressionRequest {
    pub migration: Migration,
    #[validate(length(min = 1, message = "At least one test query is required"))]
    pub queries: Vec<TestQuery>,
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct CleanupResponse {
    pub removed: usize,
}

pub async fn execute_sql(
    State(state): State<SharedState>,
    Json(payload): Json<ExecuteRequest>,
) -> ApiResult<Json<SuccessResponse<SandboxResult>>> {
    let result = state.pipeline.sandbox().execute(&payload.sql).await;
    let message = if result.success {
        "SQL executed in sandbox."
    } else {
        "SQL rejected by sandbox."
    };
    Ok(Json(SuccessResponse::with_data(message, result)))
}

pub async fn test_migration(
    State(state): State<SharedState>,
    Json(payload): Json<TestMigrationRequest>,
) -> ApiResult<Json<SuccessResponse<MigrationTestResult>>> {
    let result = state.pipeline.sandbox().test_migration(&payload.migration).await;
    Ok(Json(SuccessResponse::with_data("Migration tested.", result)))
}

pub async fn test_regression(
    State(state): State<SharedState>,
    Json(payload): Json<TestRegressionRequest>,
) -> ApiResult<Json<SuccessResponse<RegressionResult>>> {
    payload.validate().map_err(|e| validation_error(e.to_string()))?;

    let result = state
        .pipeline
        .sandbox()
        .test_regression(&payload.migration, &payload.queries)
        .await;
    info!(
        "Regression run for {}: {}/{} passed",
        payload.migration.id, result.passed, result.queries_run
    );
    Ok(Json(SuccessResponse::with_data("Regression suite finished.", result)))
}

pub async fn cleanup_sandbox(
    State(state): State<SharedState>,
    Path(sandbox_id): Path<String>,
) -> ApiResult<Json<SuccessResponse<CleanupResponse>>> {
    if !state.pipeline.sandbox().cleanup(&sandbox_id) {
        return Err(not_found_error(format!("Sandbox {} not found", sandbox_id)));
    }
    Ok(Json(SuccessResponse::with_data(
        format!("Sandbox {} removed.", sandbox_id),
        CleanupResponse { removed: 1 },
    )))
}

pub async fn cleanup_all(
    State(state): State<SharedState>,
) -> ApiResult<Json<SuccessResponse<CleanupResponse>>> {
    let removed = state.pipeline.sandbox().cleanup_all();
    Ok(Json(SuccessResponse::with_data(
        "Sandboxes removed.",
        CleanupResponse { removed },
    )))
}
