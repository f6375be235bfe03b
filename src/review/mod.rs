//! Review workflow
//!
//! Risk-scored sign-off for migrations before they leave the pipeline.

pub mod models;
pub mod orchestrator;
pub mod risk;

pub use models::{
    DecisionOptions, DecisionRecord, OperationType, PendingReview, ProposedOperation,
    ReviewDecision, ReviewOptions, ReviewRequest, ReviewStats, ReviewStatus, RiskLevel,
};
pub use orchestrator::{ReviewOrchestrator, AUTO_APPROVER};
pub use risk::RiskEngine;
