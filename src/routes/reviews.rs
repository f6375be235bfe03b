//! Review workflow route handlers

use crate::error::{not_found_error, validation_error, ApiResult};
use crate::review::{DecisionOptions, PendingReview, ProposedOperation, ReviewDecision};
use crate::routes::SuccessResponse;
use crate::sql::ValidationResult;
use crate::state::SharedState;
use axum::{
    extract::{Path, State},
    http::StatusCode,
    Json,
};
use serde::Deserialize;
use validator::Validate;

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CreateReviewRequest {
    pub operation: ProposedOperation,
    #[serde(default)]
    pub validation: Option<ValidationResult>,
}

#[derive(Debug, Deserialize, Validate)]
#[serde(rename_all = "camelCase")]
pub struct DecisionRequest {
    pub decision: ReviewDecision,
    #[validate(length(max = 2000, message = "Reason is too long"))]
    pub reason: Option<String>,
    pub modifications: Option<String>,
    #[validate(length(min = 1, max = 255, message = "Reviewer must be between 1 and 255 characters"))]
    pub reviewed_by: Option<String>,
}

pub async fn request_review(
    State(state): State<SharedState>,
    Json(payload): Json<CreateReviewRequest>,
) -> ApiResult<(StatusCode, Json<SuccessResponse<PendingReview>>)> {
    let review = state
        .pipeline
        .reviews()
        .request_review(payload.operation, payload.validation)?;

    let message = if review.request.auto_approved {
        "Operation auto-approved."
    } else {
        "Review requested."
    };
    Ok((
        StatusCode::CREATED,
        Json(SuccessResponse::with_data(message, review)),
    ))
}

pub async fn list_pending(
    State(state): State<SharedState>,
) -> ApiResult<Json<SuccessResponse<Vec<PendingReview>>>> {
    let pending = state.pipeline.reviews().list_pending();
    Ok(Json(SuccessResponse::with_data(
        format!("{} review(s) pending.", pending.len()),
        pending,
    )))
}

pub async fn get_review(
    State(state): State<SharedState>,
    Path(review_id): Path<String>,
) -> ApiResult<Json<SuccessResponse<PendingReview>>> {
    let review = state
        .pipeline
        .reviews()
        .get_review(&review_id)
        .ok_or_else(|| not_found_error(format!("Review {} not found", review_id)))?;
    Ok(Json(SuccessResponse::with_data("Review fetched.", review)))
}

pub async fn submit_decision(
    State(state): State<SharedState>,
    Path(review_id): Path<String>,
    Json(payload): Json<DecisionRequest>,
) -> ApiResult<Json<SuccessResponse<PendingReview>>> {
    payload.validate().map_err(|e| validation_error(e.to_string()))?;

    let review = state.pipeline.reviews().submit_decision(
        &review_id,
        payload.decision,
        DecisionOptions {
            reason: payload.reason,
            modifications: payload.modifications,
            reviewed_by: payload.reviewed_by,
        },
    )?;
    Ok(Json(SuccessResponse::with_data(
        format!("Review {}.", review.status),
        review,
    )))
}
