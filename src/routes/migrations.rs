//! Migration synthesis route handlers

use crate::error::{validation_error, ApiResult};
use crate::migration::{GeneratedMigration, Migration, MigrationGenerator, RollbackValidation};
use crate::routes::SuccessResponse;
use crate::schema::Schema;
use crate::state::SharedState;
use axum::{extract::State, Json};
use serde::{Deserialize, Serialize};
use tracing::info;
use validator::Validate;

#[derive(Debug, Deserialize, Validate)]
#[serde(rename_all = "camelCase")]
pub struct GenerateMigrationRequest {
    pub current: Schema,
    pub target: Schema,
    #[validate(length(min = 1, max = 128, message = "Migration name must be between 1 and 128 characters"))]
    pub name: Option<String>,
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct GenerateMigrationResponse {
    #[serde(flatten)]
    pub generated: GeneratedMigration,
    pub rollback: RollbackValidation,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ValidateRollbackRequest {
    pub migration: Migration,
}

/// Diff two schemas and synthesize the up/down pair
pub async fn generate_migration(
    State(state): State<SharedState>,
    Json(payload): Json<GenerateMigrationRequest>,
) -> ApiResult<Json<SuccessResponse<GenerateMigrationResponse>>> {
    payload.validate().map_err(|e| validation_error(e.to_string()))?;

    let generated = state
        .pipeline
        .generator()
        .generate(&payload.current, &payload.target, payload.name.as_deref());
    let rollback = MigrationGenerator::validate_rollback(&generated.migration);

    info!(
        "Generated migration {} touching {} table(s)",
        generated.migration.id,
        generated.affected_tables.len()
    );

    Ok(Json(SuccessResponse::with_data(
        "Migration generated.",
        GenerateMigrationResponse { generated, rollback },
    )))
}

/// Check that a migration's down script is a sound rollback
pub async fn validate_rollback(
    Json(payload): Json<ValidateRollbackRequest>,
) -> ApiResult<Json<SuccessResponse<RollbackValidation>>> {
    let result = MigrationGenerator::validate_rollback(&payload.migration);
    Ok(Json(SuccessResponse::with_data("Rollback validated.", result)))
}
