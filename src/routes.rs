//! Route definitions and router setup
//!
//! Configures all API routes and middleware.

mod audit;
mod migrations;
mod pipeline;
mod reviews;
mod sandbox;
mod sql;

use crate::config::Settings;
use crate::state::SharedState;
use axum::{
    http::{header, Method},
    routing::{delete, get, post},
    Router,
};
use serde::Serialize;
use std::time::Duration;
use tower::ServiceBuilder;
use tower_http::{
    compression::CompressionLayer,
    cors::{Any, CorsLayer},
    request_id::MakeRequestUuid,
    trace::{DefaultMakeSpan, DefaultOnRequest, DefaultOnResponse, TraceLayer},
    ServiceBuilderExt,
};
use tracing::Level;

/// Generic success response
#[derive(Serialize)]
pub struct SuccessResponse<T: Serialize> {
    pub success: bool,
    pub message: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub data: Option<T>,
}

impl<T: Serialize> SuccessResponse<T> {
    pub fn with_data(message: impl Into<String>, data: T) -> Self {
        Self {
            success: true,
            message: message.into(),
            data: Some(data),
        }
    }
}

/// Create the application router with all routes and middleware
pub fn create_router(state: SharedState, settings: &Settings) -> Router {
    // Build CORS layer
    let cors = build_cors_layer(settings);

    // Build tracing/logging layer
    let trace_layer = TraceLayer::new_for_http()
        .make_span_with(DefaultMakeSpan::new().level(Level::INFO))
        .on_request(DefaultOnRequest::new().level(Level::INFO))
        .on_response(DefaultOnResponse::new().level(Level::INFO));

    // Build middleware stack
    let middleware = ServiceBuilder::new()
        .set_x_request_id(MakeRequestUuid)
        .layer(trace_layer)
        .layer(CompressionLayer::new())
        .layer(cors)
        .propagate_x_request_id();

    Router::new()
        // Health check
        .route("/health", get(health_check))

        // SQL analysis
        .route("/api/sql/validate", post(sql::validate_sql))
        .route("/api/sql/sanitize", post(sql::sanitize_sql))

        // Migration synthesis
        .route("/api/migrations/generate", post(migrations::generate_migration))
        .route("/api/migrations/validate-rollback", post(migrations::validate_rollback))

        // Sandbox
        .route("/api/sandbox", delete(sandbox::cleanup_all))
        .route("/api/sandbox/execute", post(sandbox::execute_sql))
        .route("/api/sandbox/test-migration", post(sandbox::test_migration))
        .route("/api/sandbox/test-regression", post(sandbox::test_regression))
        .route("/api/sandbox/{id}", delete(sandbox::cleanup_sandbox))

        // Review workflow
        .route("/api/reviews", post(reviews::request_review).get(reviews::list_pending))
        .route("/api/reviews/{id}", get(reviews::get_review))
        .route("/api/reviews/{id}/decision", post(reviews::submit_decision))

        // Audit
        .route("/api/audit", get(audit::get_history))

        // Whole pipeline
        .route("/api/pipeline/run", post(pipeline::run_pipeline))

        // Apply middleware and state
        .layer(middleware)
        .with_state(state)
}

/// Build CORS layer from settings
fn build_cors_layer(settings: &Settings) -> CorsLayer {
    let origins: Vec<_> = settings
        .cors
        .allowed_origins
        .iter()
        .filter_map(|s| s.parse().ok())
        .collect();

    let layer = if origins.is_empty() {
        CorsLayer::new().allow_origin(Any)
    } else {
        CorsLayer::new().allow_origin(origins)
    };

    layer
        .allow_methods([Method::GET, Method::POST, Method::DELETE, Method::OPTIONS])
        .allow_headers([header::CONTENT_TYPE, header::ACCEPT])
        .max_age(Duration::from_secs(3600))
}

/// Health check endpoint
async fn health_check() -> axum::Json<serde_json::Value> {
    axum::Json(serde_json::json!({
        "success": true,
        "message": "Server is running fine.",
        "timestamp": chrono::Utc::now().to_rfc3339(),
        "version": env!("CARGO_PKG_VERSION")
    }))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::state::AppState;
    use axum::body::{to_bytes, Body};
    use axum::http::{Request, StatusCode};
    use pretty_assertions::assert_eq;
    use serde_json::{json, Value};
    use std::sync::Arc;
    use tower::ServiceExt;

    fn app() -> Router {
        let settings = Settings::default();
        let state = Arc::new(AppState::new(settings.clone()));
        create_router(state, &settings)
    }

    async fn send(app: &Router, method: Method, uri: &str, body: Option<Value>) -> (StatusCode, Value) {
        let builder = Request::builder().method(method).uri(uri);
        let request = match body {
            Some(body) => builder
                .header(header::CONTENT_TYPE, "application/json")
                .body(Body::from(body.to_string()))
                .unwrap(),
            None => builder.body(Body::empty()).unwrap(),
        };

        let response = app.clone().oneshot(request).await.unwrap();
        let status = response.status();
        let bytes = to_bytes(response.into_body(), usize::MAX).await.unwrap();
        (status, serde_json::from_slice(&bytes).unwrap())
    }

    fn destructive_operation() -> Value {
        json!({
            "operationType": "delete",
            "description": "drop old_data",
            "affectedElements": ["old_data"],
            "isDestructive": true,
            "modifiesStructure": true
        })
    }

    #[tokio::test]
    async fn test_health() {
        let (status, body) = send(&app(), Method::GET, "/health", None).await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(body["success"], json!(true));
    }

    #[tokio::test]
    async fn test_validate_rejects_drop_database() {
        let (status, body) = send(
            &app(),
            Method::POST,
            "/api/sql/validate",
            Some(json!({ "sql": "drop database production;" })),
        )
        .await;

        assert_eq!(status, StatusCode::OK);
        assert_eq!(body["data"]["isValid"], json!(false));
        assert_eq!(body["data"]["errors"][0]["code"], json!("DANGEROUS_OPERATION"));
    }

    #[tokio::test]
    async fn test_review_lifecycle() {
        let app = app();
        let (status, body) = send(
            &app,
            Method::POST,
            "/api/reviews",
            Some(json!({ "operation": destructive_operation() })),
        )
        .await;
        assert_eq!(status, StatusCode::CREATED);
        assert_eq!(body["data"]["status"], json!("pending"));
        assert_eq!(body["data"]["request"]["riskLevel"], json!("critical"));

        let id = body["data"]["request"]["id"].as_str().unwrap().to_string();
        let uri = format!("/api/reviews/{}/decision", id);
        let decision = json!({ "decision": "reject", "reason": "keep the data", "reviewedBy": "dba" });

        let (status, body) = send(&app, Method::POST, &uri, Some(decision.clone())).await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(body["data"]["status"], json!("rejected"));

        let (status, body) = send(&app, Method::POST, &uri, Some(decision)).await;
        assert_eq!(status, StatusCode::CONFLICT);
        assert_eq!(body["code"], json!("CONFLICT"));

        let (_, body) = send(&app, Method::GET, "/api/audit?action=review_rejected", None).await;
        assert_eq!(body["data"].as_array().map(Vec::len), Some(1));
    }

    #[tokio::test]
    async fn test_unknown_ids_are_not_found() {
        let app = app();
        let (status, body) = send(
            &app,
            Method::POST,
            "/api/reviews/missing/decision",
            Some(json!({ "decision": "approve" })),
        )
        .await;
        assert_eq!(status, StatusCode::NOT_FOUND);
        assert_eq!(body["code"], json!("NOT_FOUND"));

        let (status, _) = send(&app, Method::DELETE, "/api/sandbox/nope", None).await;
        assert_eq!(status, StatusCode::NOT_FOUND);
    }

    #[tokio::test]
    async fn test_pipeline_run_auto_approves_new_table() {
        let request = json!({
            "current": {},
            "target": {
                "tables": [{
                    "name": "users",
                    "columns": [
                        { "name": "id", "dataType": "uuid", "isPrimaryKey": true, "nullable": false },
                        { "name": "email", "dataType": "text", "isUnique": true, "nullable": false }
                    ]
                }]
            },
            "name": "create users"
        });

        let (status, body) = send(&app(), Method::POST, "/api/pipeline/run", Some(request)).await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(body["data"]["outcome"], json!("auto_approved"));
        assert_eq!(body["data"]["generated"]["isDestructive"], json!(false));
    }

    #[tokio::test]
    async fn test_regression_requires_queries() {
        let request = json!({
            "migration": {
                "id": "1_x",
                "name": "x",
                "timestamp": "2026-01-01T00:00:00Z",
                "up": "CREATE TABLE t (id int);",
                "down": "DROP TABLE t;",
                "checksum": "0000000000000000"
            },
            "queries": []
        });
        let (status, body) = send(&app(), Method::POST, "/api/sandbox/test-regression", Some(request)).await;
        assert_eq!(status, StatusCode::BAD_REQUEST);
        assert_eq!(body["code"], json!("VALIDATION_ERROR"));
    }
}
