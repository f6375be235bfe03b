//! Risk scoring for review requests
//!
//! Everything here is pure: an operation plus an optional validation result
//! in, a risk level, a confidence score and a suggested action out.

use crate::review::models::{OperationType, ProposedOperation, ReviewDecision, RiskLevel};
use crate::sql::ValidationResult;

const ERROR_PENALTY: i32 = 10;
const WARNING_PENALTY: i32 = 5;
const WIDE_IMPACT_PENALTY: i32 = 10;
const WIDE_IMPACT_ELEMENTS: usize = 5;
const DESTRUCTIVE_PENALTY: i32 = 20;
const STRUCTURAL_PENALTY: i32 = 10;

/// Risk assessment over a proposed operation
pub struct RiskEngine;

impl RiskEngine {
    /// First matching rule wins: destructive, structural delete, structural,
    /// additive, otherwise medium.
    pub fn assess(op: &ProposedOperation) -> RiskLevel {
        if op.is_destructive {
            RiskLevel::Critical
        } else if op.operation_type == OperationType::Delete && op.modifies_structure {
            RiskLevel::High
        } else if op.modifies_structure {
            RiskLevel::Medium
        } else if op.is_additive {
            RiskLevel::Low
        } else {
            RiskLevel::Medium
        }
    }

    /// 0-100, starting from 100 and losing points per issue
    pub fn confidence(op: &ProposedOperation, validation: Option<&ValidationResult>) -> u8 {
        let mut score: i32 = 100;

        if let Some(result) = validation {
            score -= ERROR_PENALTY * result.errors.len() as i32;
            score -= WARNING_PENALTY * result.warnings.len() as i32;
        }
        if op.affected_elements.len() > WIDE_IMPACT_ELEMENTS {
            score -= WIDE_IMPACT_PENALTY;
        }
        if op.is_destructive {
            score -= DESTRUCTIVE_PENALTY;
        }
        if op.modifies_structure {
            score -= STRUCTURAL_PENALTY;
        }

        score.clamp(0, 100) as u8
    }

    /// High and critical risk always need a human
    pub fn can_auto_approve(risk: RiskLevel, confidence: u8, threshold: u8) -> bool {
        match risk {
            RiskLevel::Critical | RiskLevel::High => false,
            RiskLevel::Medium | RiskLevel::Low => confidence >= threshold,
        }
    }

    pub fn suggest_action(
        risk: RiskLevel,
        confidence: u8,
        approve_threshold: u8,
        modify_threshold: u8,
    ) -> ReviewDecision {
        match risk {
            RiskLevel::Critical if confidence >= 90 => ReviewDecision::Approve,
            RiskLevel::Critical => ReviewDecision::Reject,
            RiskLevel::High if confidence >= 80 => ReviewDecision::Approve,
            RiskLevel::High => ReviewDecision::Modify,
            RiskLevel::Medium | RiskLevel::Low => {
                if confidence >= approve_threshold {
                    ReviewDecision::Approve
                } else if confidence >= modify_threshold {
                    ReviewDecision::Modify
                } else {
                    ReviewDecision::Reject
                }
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::sql::{ValidationCode, ValidationError, ValidationWarning, Severity, WarningCode};
    use pretty_assertions::assert_eq;

    fn op(operation_type: OperationType) -> ProposedOperation {
        ProposedOperation {
            operation_type,
            description: "test".to_string(),
            sql: None,
            affected_elements: vec!["users".to_string()],
            is_destructive: false,
            modifies_structure: false,
            is_additive: false,
        }
    }

    #[test]
    fn test_risk_precedence() {
        let mut o = op(OperationType::Delete);
        o.is_destructive = true;
        o.modifies_structure = true;
        o.is_additive = true;
        assert_eq!(RiskEngine::assess(&o), RiskLevel::Critical);

        o.is_destructive = false;
        assert_eq!(RiskEngine::assess(&o), RiskLevel::High);

        o.operation_type = OperationType::Alter;
        assert_eq!(RiskEngine::assess(&o), RiskLevel::Medium);

        o.modifies_structure = false;
        assert_eq!(RiskEngine::assess(&o), RiskLevel::Low);

        o.is_additive = false;
        assert_eq!(RiskEngine::assess(&o), RiskLevel::Medium);
    }

    #[test]
    fn test_confidence_penalties() {
        let mut o = op(OperationType::Alter);
        assert_eq!(RiskEngine::confidence(&o, None), 100);

        o.modifies_structure = true;
        o.affected_elements = (0..6).map(|i| format!("t{}", i)).collect();
        assert_eq!(RiskEngine::confidence(&o, None), 80);

        let validation = ValidationResult {
            is_valid: false,
            errors: vec![ValidationError {
                code: ValidationCode::SyntaxError,
                message: "unbalanced".to_string(),
                severity: Severity::Error,
                detail: None,
            }],
            warnings: vec![ValidationWarning {
                code: WarningCode::SelectStar,
                message: "select star".to_string(),
                suggestion: None,
            }],
        };
        assert_eq!(RiskEngine::confidence(&o, Some(&validation)), 65);

        o.is_destructive = true;
        assert_eq!(RiskEngine::confidence(&o, Some(&validation)), 45);
    }

    #[test]
    fn test_confidence_clamps_at_zero() {
        let mut o = op(OperationType::Delete);
        o.is_destructive = true;
        o.modifies_structure = true;
        let validation = ValidationResult {
            is_valid: false,
            errors: (0..12)
                .map(|_| ValidationError {
                    code: ValidationCode::DangerousOperation,
                    message: "drop".to_string(),
                    severity: Severity::Critical,
                    detail: None,
                })
                .collect(),
            warnings: vec![],
        };
        assert_eq!(RiskEngine::confidence(&o, Some(&validation)), 0);
    }

    #[test]
    fn test_auto_approval() {
        assert!(!RiskEngine::can_auto_approve(RiskLevel::Critical, 100, 85));
        assert!(!RiskEngine::can_auto_approve(RiskLevel::High, 100, 85));
        assert!(RiskEngine::can_auto_approve(RiskLevel::Medium, 85, 85));
        assert!(!RiskEngine::can_auto_approve(RiskLevel::Low, 84, 85));
    }

    #[test]
    fn test_suggested_action() {
        assert_eq!(RiskEngine::suggest_action(RiskLevel::Critical, 90, 85, 70), ReviewDecision::Approve);
        assert_eq!(RiskEngine::suggest_action(RiskLevel::Critical, 89, 85, 70), ReviewDecision::Reject);
        assert_eq!(RiskEngine::suggest_action(RiskLevel::High, 80, 85, 70), ReviewDecision::Approve);
        assert_eq!(RiskEngine::suggest_action(RiskLevel::High, 10, 85, 70), ReviewDecision::Modify);
        assert_eq!(RiskEngine::suggest_action(RiskLevel::Medium, 85, 85, 70), ReviewDecision::Approve);
        assert_eq!(RiskEngine::suggest_action(RiskLevel::Low, 70, 85, 70), ReviewDecision::Modify);
        assert_eq!(RiskEngine::suggest_action(RiskLevel::Low, 69, 85, 70), ReviewDecision::Reject);
    }
}
