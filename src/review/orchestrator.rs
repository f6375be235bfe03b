//! Review Orchestrator
//!
//! Scores proposed operations, auto-approves the safe ones and holds the
//! rest as pending reviews until someone decides or their deadline passes.
//! Expiry is a status change only; records are removed by
//! [`ReviewOrchestrator::cleanup_completed`].

use crate::audit::{AuditAction, AuditEntry, AuditLog};
use crate::error::ReviewError;
use crate::review::models::{
    DecisionOptions, DecisionRecord, PendingReview, ProposedOperation, ReviewDecision,
    ReviewOptions, ReviewRequest, ReviewStats, ReviewStatus,
};
use crate::review::risk::RiskEngine;
use crate::sql::ValidationResult;
use crate::ttl::{ExpireCallback, TtlCache, TtlOptions};
use chrono::{DateTime, Utc};
use parking_lot::RwLock;
use serde_json::json;
use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;
use tracing::{info, warn};
use uuid::Uuid;

pub const AUTO_APPROVER: &str = "system:auto-approve";

type ReviewMap = Arc<RwLock<HashMap<String, PendingReview>>>;

pub struct ReviewOrchestrator {
    reviews: ReviewMap,
    /// One entry per pending review; expiry flips the review to expired
    deadlines: TtlCache<String, ()>,
    audit: Arc<dyn AuditLog>,
    options: ReviewOptions,
}

impl ReviewOrchestrator {
    pub fn new(options: ReviewOptions, audit: Arc<dyn AuditLog>) -> Self {
        let reviews: ReviewMap = Arc::new(RwLock::new(HashMap::new()));

        let on_expire: ExpireCallback<String, ()> = {
            let reviews = Arc::clone(&reviews);
            let audit = Arc::clone(&audit);
            Arc::new(move |id: String, _: ()| expire_review(&reviews, audit.as_ref(), &id))
        };

        let deadlines = TtlCache::with_on_expire(
            TtlOptions {
                ttl: options.ttl,
                cleanup_interval: options.cleanup_interval,
                max_entries: None,
                touch_on_access: false,
            },
            on_expire,
        );
        deadlines.start_auto_cleanup();

        Self {
            reviews,
            deadlines,
            audit,
            options,
        }
    }

    pub fn options(&self) -> &ReviewOptions {
        &self.options
    }

    /// Score an operation and either auto-approve it or hold it for review
    pub fn request_review(
        &self,
        operation: ProposedOperation,
        validation: Option<ValidationResult>,
    ) -> Result<PendingReview, ReviewError> {
        let risk_level = RiskEngine::assess(&operation);
        let confidence = RiskEngine::confidence(&operation, validation.as_ref());
        let auto_approved = RiskEngine::can_auto_approve(
            risk_level,
            confidence,
            self.options.auto_approve_threshold,
        );
        let suggested_action = RiskEngine::suggest_action(
            risk_level,
            confidence,
            self.options.auto_approve_threshold,
            self.options.modify_threshold,
        );

        if !auto_approved {
            self.deadlines.purge_expired();
            let pending = self.count_pending();
            if pending >= self.options.max_pending {
                warn!("⚠️ Review queue full ({} pending)", pending);
                return Err(ReviewError::CapacityExceeded(self.options.max_pending));
            }
        }

        let now = Utc::now();
        let request = ReviewRequest {
            id: Uuid::new_v4().to_string(),
            operation,
            validation,
            risk_level,
            confidence,
            suggested_action,
            auto_approved,
            created_at: now,
        };

        let review = if auto_approved {
            PendingReview {
                created_at: now,
                expires_at: None,
                status: ReviewStatus::Approved,
                decision: Some(DecisionRecord {
                    decision: ReviewDecision::Approve,
                    reason: Some(format!(
                        "Auto-approved with confidence {} (threshold {})",
                        confidence, self.options.auto_approve_threshold
                    )),
                    modifications: None,
                    reviewed_by: Some(AUTO_APPROVER.to_string()),
                    decided_at: now,
                }),
                request,
            }
        } else {
            PendingReview {
                created_at: now,
                expires_at: chrono::Duration::from_std(self.options.ttl)
                    .ok()
                    .and_then(|ttl| now.checked_add_signed(ttl)),
                status: ReviewStatus::Pending,
                decision: None,
                request,
            }
        };

        let id = review.id().to_string();
        self.reviews.write().insert(id.clone(), review.clone());
        if !auto_approved {
            self.deadlines.insert(id.clone(), ());
        }

        let details = json!({
            "riskLevel": risk_level,
            "confidence": confidence,
            "suggestedAction": suggested_action,
        });
        self.audit.log(
            AuditEntry::new(AuditAction::ReviewRequested, "review", &id).with_details(details),
        );
        if auto_approved {
            self.audit.log(AuditEntry::new(AuditAction::ReviewAutoApproved, "review", &id).by(AUTO_APPROVER));
            info!("✅ Review {} auto-approved ({:?}, confidence {})", id, risk_level, confidence);
        } else {
            info!(
                "📝 Review {} pending ({:?}, confidence {}, suggest {:?})",
                id, risk_level, confidence, suggested_action
            );
        }

        Ok(review)
    }

    /// Record a decision on a pending review
    pub fn submit_decision(
        &self,
        review_id: &str,
        decision: ReviewDecision,
        options: DecisionOptions,
    ) -> Result<PendingReview, ReviewError> {
        let key = review_id.to_string();
        // Surfaces an overdue deadline before the status check
        self.deadlines.contains_key(&key);

        let updated = {
            let mut reviews = self.reviews.write();
            let review = reviews
                .get_mut(review_id)
                .ok_or_else(|| ReviewError::NotFound(review_id.to_string()))?;
            if !review.is_pending() {
                return Err(ReviewError::NotPending {
                    id: review_id.to_string(),
                    status: review.status,
                });
            }

            review.status = decision.resulting_status();
            review.decision = Some(DecisionRecord {
                decision,
                reason: options.reason,
                modifications: options.modifications,
                reviewed_by: options.reviewed_by,
                decided_at: Utc::now(),
            });
            review.clone()
        };
        self.deadlines.remove(&key);

        let action = match decision {
            ReviewDecision::Approve => AuditAction::ReviewApproved,
            ReviewDecision::Reject => AuditAction::ReviewRejected,
            ReviewDecision::Modify => AuditAction::ReviewModified,
        };
        let mut entry = AuditEntry::new(action, "review", review_id);
        if let Some(record) = &updated.decision {
            if let Some(reviewer) = &record.reviewed_by {
                entry = entry.by(reviewer.clone());
            }
            entry = entry.with_details(json!({
                "reason": record.reason,
                "modifications": record.modifications,
            }));
        }
        self.audit.log(entry);

        info!("🧑‍⚖️ Review {} {}", review_id, updated.status);
        Ok(updated)
    }

    pub fn get_review(&self, review_id: &str) -> Option<PendingReview> {
        self.deadlines.contains_key(&review_id.to_string());
        self.reviews.read().get(review_id).cloned()
    }

    /// Pending reviews, oldest first
    pub fn list_pending(&self) -> Vec<PendingReview> {
        self.deadlines.purge_expired();
        let mut pending: Vec<PendingReview> = self
            .reviews
            .read()
            .values()
            .filter(|r| r.is_pending())
            .cloned()
            .collect();
        pending.sort_by_key(|r| r.created_at);
        pending
    }

    pub fn stats(&self) -> ReviewStats {
        let reviews = self.reviews.read();
        let mut stats = ReviewStats {
            total: reviews.len(),
            ..Default::default()
        };
        for review in reviews.values() {
            match review.status {
                ReviewStatus::Pending => stats.pending += 1,
                ReviewStatus::Approved => stats.approved += 1,
                ReviewStatus::Rejected => stats.rejected += 1,
                ReviewStatus::Modified => stats.modified += 1,
                ReviewStatus::Expired => stats.expired += 1,
            }
            if review.request.auto_approved {
                stats.auto_approved += 1;
            }
        }
        stats
    }

    /// Drop decided or expired reviews that completed at least `older_than` ago
    pub fn cleanup_completed(&self, older_than: Duration) -> usize {
        let Ok(age) = chrono::Duration::from_std(older_than) else {
            return 0;
        };
        let cutoff = Utc::now() - age;

        let mut reviews = self.reviews.write();
        let before = reviews.len();
        reviews.retain(|_, r| r.is_pending() || completed_at(r) > cutoff);
        let removed = before - reviews.len();
        if removed > 0 {
            info!("🧹 Removed {} completed review(s)", removed);
        }
        removed
    }

    /// Stop the expiry sweep and forget every review
    pub fn dispose(&self) {
        self.deadlines.dispose();
        self.reviews.write().clear();
    }

    fn count_pending(&self) -> usize {
        self.reviews.read().values().filter(|r| r.is_pending()).count()
    }
}

impl Drop for ReviewOrchestrator {
    fn drop(&mut self) {
        self.deadlines.stop_auto_cleanup();
    }
}

fn completed_at(review: &PendingReview) -> DateTime<Utc> {
    review
        .decision
        .as_ref()
        .map(|d| d.decided_at)
        .or(review.expires_at)
        .unwrap_or(review.created_at)
}

/// Pending → expired; any other state is left alone
fn expire_review(reviews: &RwLock<HashMap<String, PendingReview>>, audit: &dyn AuditLog, id: &str) {
    let expired = {
        let mut reviews = reviews.write();
        match reviews.get_mut(id) {
            Some(review) if review.is_pending() => {
                review.status = ReviewStatus::Expired;
                true
            }
            _ => false,
        }
    };

    if expired {
        warn!("⏰ Review {} expired without a decision", id);
        audit.log(AuditEntry::new(AuditAction::ReviewExpired, "review", id));
    }
}
