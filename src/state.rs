//! Application state management
//!
//! Contains shared state accessible across all handlers.

use crate::audit::InMemoryAuditLog;
use crate::config::Settings;
use crate::pipeline::MigrationPipeline;
use std::sync::Arc;

/// Application state shared across all handlers
pub struct AppState {
    pub settings: Settings,

    /// Validator, generator, sandbox engine and review orchestrator
    pub pipeline: MigrationPipeline,

    /// Concrete handle on the audit sink the pipeline writes to
    pub audit: Arc<InMemoryAuditLog>,
}

impl AppState {
    pub fn new(settings: Settings) -> Self {
        let audit = Arc::new(InMemoryAuditLog::new());
        let pipeline = MigrationPipeline::new(&settings.pipeline, audit.clone());

        Self {
            settings,
            pipeline,
            audit,
        }
    }
}

/// Type alias for shared state
pub type SharedState = Arc<AppState>;
