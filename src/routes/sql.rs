//! SQL analysis route handlers

use crate::error::ApiResult;
use crate::routes::SuccessResponse;
use crate::sql::ValidationResult;
use crate::state::SharedState;
use axum::{extract::State, Json};
use serde::{Deserialize, Serialize};
use tracing::debug;

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SqlRequest {
    pub sql: String,
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct SanitizeResponse {
    pub sql: String,
}

/// Run the safety validator over a SQL string
pub async fn validate_sql(
    State(state): State<SharedState>,
    Json(payload): Json<SqlRequest>,
) -> ApiResult<Json<SuccessResponse<ValidationResult>>> {
    debug!("Validating {} bytes of SQL", payload.sql.len());
    let result = state.pipeline.validator().validate(&payload.sql);

    let message = if result.is_valid {
        "SQL passed validation."
    } else {
        "SQL failed validation."
    };
    Ok(Json(SuccessResponse::with_data(message, result)))
}

/// Strip comments and collapse whitespace
pub async fn sanitize_sql(
    State(state): State<SharedState>,
    Json(payload): Json<SqlRequest>,
) -> ApiResult<Json<SuccessResponse<SanitizeResponse>>> {
    let sql = state.pipeline.validator().sanitize(&payload.sql);
    Ok(Json(SuccessResponse::with_data(
        "SQL sanitized.",
        SanitizeResponse { sql },
    )))
}
