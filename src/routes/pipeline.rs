//! End-to-end pipeline route

use crate::error::{validation_error, ApiResult};
use crate::pipeline::PipelineReport;
use crate::routes::SuccessResponse;
use crate::schema::Schema;
use crate::simulation::TestQuery;
use crate::state::SharedState;
use axum::{extract::State, Json};
use serde::Deserialize;
use tracing::info;
use validator::Validate;

#[derive(Debug, Deserialize, Validate)]
#[serde(rename_all = "camelCase")]
pub struct RunPipelineRequest {
    pub current: Schema,
    pub target: Schema,
    #[validate(length(min = 1, max = 128, message = "Migration name must be between 1 and 128 characters"))]
    pub name: Option<String>,
    #[serde(default)]
    pub queries: Vec<TestQuery>,
}

pub async fn run_pipeline(
    State(state): State<SharedState>,
    Json(payload): Json<RunPipelineRequest>,
) -> ApiResult<Json<SuccessResponse<PipelineReport>>> {
    payload.validate().map_err(|e| validation_error(e.to_string()))?;

    let report = state
        .pipeline
        .run(
            &payload.current,
            &payload.target,
            payload.name.as_deref(),
            &payload.queries,
        )
        .await?;
    info!(
        "Pipeline finished for {}: {:?}",
        report.generated.migration.id, report.outcome
    );

    Ok(Json(SuccessResponse::with_data("Pipeline finished.", report)))
}
