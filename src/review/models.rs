//! Review data models

use crate::migration::GeneratedMigration;
use crate::schema::SchemaDiff;
use crate::sql::ValidationResult;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::time::Duration;

// =============================================================================
// OPERATIONS
// =============================================================================

#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum RiskLevel {
    Low,
    Medium,
    High,
    Critical,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum OperationType {
    Create,
    Update,
    Delete,
    Alter,
}

/// The change a reviewer is asked to sign off on
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ProposedOperation {
    pub operation_type: OperationType,
    pub description: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub sql: Option<String>,
    #[serde(default)]
    pub affected_elements: Vec<String>,
    #[serde(default)]
    pub is_destructive: bool,
    #[serde(default)]
    pub modifies_structure: bool,
    #[serde(default)]
    pub is_additive: bool,
}

impl ProposedOperation {
    /// Describe a generated migration for review.
    ///
    /// A migration that only adds objects is additive. One that alters or
    /// drops existing objects modifies structure.
    pub fn from_generated(generated: &GeneratedMigration) -> Self {
        let diff = &generated.diff;
        let is_additive = !diff.is_empty() && only_additions(diff);
        let modifies_structure = !diff.is_empty() && !is_additive;

        let operation_type = if generated.is_destructive {
            OperationType::Delete
        } else if is_additive {
            OperationType::Create
        } else {
            OperationType::Alter
        };

        Self {
            operation_type,
            description: format!(
                "Apply migration '{}' ({} change(s))",
                generated.migration.name,
                diff.change_count()
            ),
            sql: Some(generated.migration.up.clone()),
            affected_elements: generated.affected_tables.clone(),
            is_destructive: generated.is_destructive,
            modifies_structure,
            is_additive,
        }
    }
}

fn only_additions(diff: &SchemaDiff) -> bool {
    diff.removed_tables.is_empty()
        && diff.removed_policies.is_empty()
        && diff.modified_policies.is_empty()
        && diff.removed_functions.is_empty()
        && diff.modified_functions.is_empty()
        && diff.removed_triggers.is_empty()
        && diff.modified_triggers.is_empty()
        && diff.removed_enums.is_empty()
        && diff.modified_enums.is_empty()
        && diff.modified_tables.iter().all(|t| {
            t.removed_columns.is_empty()
                && t.modified_columns.is_empty()
                && t.removed_indexes.is_empty()
                && t.removed_constraints.is_empty()
        })
}

// =============================================================================
// REQUESTS & DECISIONS
// =============================================================================

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ReviewDecision {
    Approve,
    Reject,
    Modify,
}

impl ReviewDecision {
    pub fn resulting_status(self) -> ReviewStatus {
        match self {
            ReviewDecision::Approve => ReviewStatus::Approved,
            ReviewDecision::Reject => ReviewStatus::Rejected,
            ReviewDecision::Modify => ReviewStatus::Modified,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ReviewStatus {
    Pending,
    Approved,
    Rejected,
    Modified,
    Expired,
}

impl std::fmt::Display for ReviewStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let label = match self {
            ReviewStatus::Pending => "pending",
            ReviewStatus::Approved => "approved",
            ReviewStatus::Rejected => "rejected",
            ReviewStatus::Modified => "modified",
            ReviewStatus::Expired => "expired",
        };
        f.write_str(label)
    }
}

/// A scored request for human (or automatic) sign-off
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ReviewRequest {
    pub id: String,
    pub operation: ProposedOperation,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub validation: Option<ValidationResult>,
    pub risk_level: RiskLevel,
    /// 0-100
    pub confidence: u8,
    pub suggested_action: ReviewDecision,
    pub auto_approved: bool,
    pub created_at: DateTime<Utc>,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct DecisionOptions {
    pub reason: Option<String>,
    pub modifications: Option<String>,
    pub reviewed_by: Option<String>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct DecisionRecord {
    pub decision: ReviewDecision,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub reason: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub modifications: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub reviewed_by: Option<String>,
    pub decided_at: DateTime<Utc>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PendingReview {
    pub request: ReviewRequest,
    pub created_at: DateTime<Utc>,
    /// `None` once auto-approved
    #[serde(skip_serializing_if = "Option::is_none")]
    pub expires_at: Option<DateTime<Utc>>,
    pub status: ReviewStatus,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub decision: Option<DecisionRecord>,
}

impl PendingReview {
    pub fn id(&self) -> &str {
        &self.request.id
    }

    pub fn is_pending(&self) -> bool {
        self.status == ReviewStatus::Pending
    }
}

// =============================================================================
// OPTIONS & STATS
// =============================================================================

#[derive(Debug, Clone)]
pub struct ReviewOptions {
    pub auto_approve_threshold: u8,
    /// Lower bound of the "modify" band for low and medium risk
    pub modify_threshold: u8,
    pub ttl: Duration,
    pub cleanup_interval: Duration,
    pub max_pending: usize,
}

impl Default for ReviewOptions {
    fn default() -> Self {
        Self {
            auto_approve_threshold: 85,
            modify_threshold: 70,
            ttl: Duration::from_secs(24 * 60 * 60),
            cleanup_interval: Duration::from_secs(60),
            max_pending: 1000,
        }
    }
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ReviewStats {
    pub total: usize,
    pub pending: usize,
    pub approved: usize,
    pub rejected: usize,
    pub modified: usize,
    pub expired: usize,
    pub auto_approved: usize,
}
