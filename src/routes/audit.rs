//! Audit history route handlers

use crate::audit::{AuditEntry, AuditFilter, AuditLog};
use crate::error::{validation_error, ApiResult};
use crate::routes::SuccessResponse;
use crate::state::SharedState;
use axum::{
    extract::{Query, State},
    Json,
};

const MAX_LIMIT: usize = 1000;

pub async fn get_history(
    State(state): State<SharedState>,
    Query(mut filter): Query<AuditFilter>,
) -> ApiResult<Json<SuccessResponse<Vec<AuditEntry>>>> {
    match filter.limit {
        Some(0) => return Err(validation_error("limit must be at least 1")),
        Some(limit) if limit > MAX_LIMIT => {
            return Err(validation_error(format!("limit must be at most {}", MAX_LIMIT)))
        }
        Some(_) => {}
        None => filter.limit = Some(100),
    }

    let entries = state.audit.history(&filter);
    Ok(Json(SuccessResponse::with_data(
        format!("{} audit entr(ies).", entries.len()),
        entries,
    )))
}
