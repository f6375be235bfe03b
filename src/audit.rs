//! Audit trail
//!
//! The pipeline only ever writes entries and reads them back through a
//! filter; storage is up to the implementation.

use chrono::{DateTime, Utc};
use parking_lot::RwLock;
use serde::{Deserialize, Serialize};
use uuid::Uuid;

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct AuditEntry {
    pub id: Uuid,
    pub timestamp: DateTime<Utc>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub actor: Option<String>,
    pub action: AuditAction,
    pub resource_type: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub resource_id: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub details: Option<serde_json::Value>,
}

impl AuditEntry {
    pub fn new(action: AuditAction, resource_type: impl Into<String>, resource_id: impl Into<String>) -> Self {
        Self {
            id: Uuid::new_v4(),
            timestamp: Utc::now(),
            actor: None,
            action,
            resource_type: resource_type.into(),
            resource_id: Some(resource_id.into()),
            details: None,
        }
    }

    pub fn by(mut self, actor: impl Into<String>) -> Self {
        self.actor = Some(actor.into());
        self
    }

    pub fn with_details(mut self, details: serde_json::Value) -> Self {
        self.details = Some(details);
        self
    }
}

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum AuditAction {
    // Migration actions
    MigrationGenerated,
    MigrationTested,

    // Review actions
    ReviewRequested,
    ReviewAutoApproved,
    ReviewApproved,
    ReviewRejected,
    ReviewModified,
    ReviewExpired,
}

/// Filter for [`AuditLog::history`]; unset fields match everything
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct AuditFilter {
    pub action: Option<AuditAction>,
    pub resource_type: Option<String>,
    pub resource_id: Option<String>,
    pub actor: Option<String>,
    pub limit: Option<usize>,
}

impl AuditFilter {
    fn matches(&self, entry: &AuditEntry) -> bool {
        self.action.map_or(true, |a| entry.action == a)
            && self
                .resource_type
                .as_deref()
                .map_or(true, |t| entry.resource_type == t)
            && self
                .resource_id
                .as_deref()
                .map_or(true, |id| entry.resource_id.as_deref() == Some(id))
            && self
                .actor
                .as_deref()
                .map_or(true, |a| entry.actor.as_deref() == Some(a))
    }
}

/// Audit sink
pub trait AuditLog: Send + Sync {
    fn log(&self, entry: AuditEntry);

    /// Matching entries, most recent first
    fn history(&self, filter: &AuditFilter) -> Vec<AuditEntry>;
}

/// Bounded in-memory audit log
pub struct InMemoryAuditLog {
    entries: RwLock<Vec<AuditEntry>>,
    capacity: usize,
}

impl InMemoryAuditLog {
    pub const DEFAULT_CAPACITY: usize = 10_000;

    pub fn new() -> Self {
        Self::with_capacity(Self::DEFAULT_CAPACITY)
    }

    /// Oldest entries are dropped beyond `capacity`
    pub fn with_capacity(capacity: usize) -> Self {
        Self {
            entries: RwLock::new(Vec::new()),
            capacity: capacity.max(1),
        }
    }

    pub fn len(&self) -> usize {
        self.entries.read().len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.read().is_empty()
    }
}

impl Default for InMemoryAuditLog {
    fn default() -> Self {
        Self::new()
    }
}

impl AuditLog for InMemoryAuditLog {
    fn log(&self, entry: AuditEntry) {
        let mut entries = self.entries.write();
        if entries.len() >= self.capacity {
            let overflow = entries.len() + 1 - self.capacity;
            entries.drain(..overflow);
        }
        entries.push(entry);
    }

    fn history(&self, filter: &AuditFilter) -> Vec<AuditEntry> {
        let entries = self.entries.read();
        entries
            .iter()
            .rev()
            .filter(|e| filter.matches(e))
            .take(filter.limit.unwrap_or(usize::MAX))
            .cloned()
            .collect()
    }
}
