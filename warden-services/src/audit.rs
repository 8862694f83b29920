//! Append-only audit trail.
//!
//! Records are totally ordered by `(created_at, id)` where `id` is a
//! store-assigned monotonic insertion counter. Records are never modified
//! after insertion.

use std::sync::RwLock;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::{ServiceError, ServiceResult};

/// Outcome attached to an audit record.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum AuditOutcome {
    /// The action completed.
    Success,
    /// The action ran and failed.
    Failure,
    /// A policy rule blocked the action.
    Blocked,
    /// A permission or approval gate denied the action.
    Denied,
}

impl AuditOutcome {
    /// Returns the canonical wire label.
    #[must_use]
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::Success => "success",
            Self::Failure => "failure",
            Self::Blocked => "blocked",
            Self::Denied => "denied",
        }
    }
}

/// A record not yet assigned its insertion id.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct NewAuditRecord {
    /// Identifier of the acting agent (or `admin` / `system` labels).
    pub actor_id: String,
    /// Dotted action string, e.g. `tool.invoked`.
    pub action: String,
    /// Type of the resource acted on.
    pub resource_type: String,
    /// Identifier of the resource acted on, when one exists.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub resource_id: Option<String>,
    /// Structured details.
    #[serde(default)]
    pub details: Value,
    /// Outcome of the action.
    pub outcome: AuditOutcome,
    /// Set on records produced by the governance loop itself so they are
    /// never re-evaluated against policies.
    #[serde(default, skip_serializing_if = "std::ops::Not::not")]
    pub skip_policy_check: bool,
}

impl NewAuditRecord {
    /// Creates a record with empty details.
    #[must_use]
    pub fn new(
        actor_id: impl Into<String>,
        action: impl Into<String>,
        resource_type: impl Into<String>,
        outcome: AuditOutcome,
    ) -> Self {
        Self {
            actor_id: actor_id.into(),
            action: action.into(),
            resource_type: resource_type.into(),
            resource_id: None,
            details: Value::Null,
            outcome,
            skip_policy_check: false,
        }
    }

    /// Sets the resource identifier.
    #[must_use]
    pub fn with_resource_id(mut self, resource_id: impl Into<String>) -> Self {
        self.resource_id = Some(resource_id.into());
        self
    }

    /// Sets structured details.
    #[must_use]
    pub fn with_details(mut self, details: Value) -> Self {
        self.details = details;
        self
    }

    /// Marks the record as exempt from governance evaluation.
    #[must_use]
    pub const fn skip_policy_check(mut self) -> Self {
        self.skip_policy_check = true;
        self
    }
}

/// A persisted audit record.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct AuditRecord {
    /// Monotonic insertion id assigned by the store.
    pub id: u64,
    /// Insertion timestamp.
    pub created_at: DateTime<Utc>,
    /// Identifier of the acting agent.
    pub actor_id: String,
    /// Dotted action string.
    pub action: String,
    /// Type of the resource acted on.
    pub resource_type: String,
    /// Identifier of the resource acted on.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub resource_id: Option<String>,
    /// Structured details.
    #[serde(default)]
    pub details: Value,
    /// Outcome of the action.
    pub outcome: AuditOutcome,
    /// Governance-loop exemption flag.
    #[serde(default, skip_serializing_if = "std::ops::Not::not")]
    pub skip_policy_check: bool,
}

/// Filter for audit queries. All populated fields must match.
#[derive(Debug, Clone, Default)]
pub struct AuditQuery {
    /// Restrict to one actor.
    pub actor_id: Option<String>,
    /// Exact action match.
    pub action: Option<String>,
    /// Action prefix match (e.g. `tool.`).
    pub action_prefix: Option<String>,
    /// Restrict to one resource type.
    pub resource_type: Option<String>,
    /// Restrict to one outcome.
    pub outcome: Option<AuditOutcome>,
    /// Lower time bound, inclusive.
    pub since: Option<DateTime<Utc>>,
    /// Upper time bound, inclusive.
    pub until: Option<DateTime<Utc>>,
    /// Maximum records returned, newest last; zero means unbounded.
    pub limit: usize,
}

impl AuditQuery {
    fn matches(&self, record: &AuditRecord) -> bool {
        if let Some(actor) = &self.actor_id {
            if &record.actor_id != actor {
                return false;
            }
        }
        if let Some(action) = &self.action {
            if &record.action != action {
                return false;
            }
        }
        if let Some(prefix) = &self.action_prefix {
            if !record.action.starts_with(prefix.as_str()) {
                return false;
            }
        }
        if let Some(resource_type) = &self.resource_type {
            if &record.resource_type != resource_type {
                return false;
            }
        }
        if let Some(outcome) = self.outcome {
            if record.outcome != outcome {
                return false;
            }
        }
        if let Some(since) = self.since {
            if record.created_at < since {
                return false;
            }
        }
        if let Some(until) = self.until {
            if record.created_at > until {
                return false;
            }
        }
        true
    }
}

/// Append-only store for audit records.
#[async_trait]
pub trait AuditStore: Send + Sync {
    /// Appends a record, assigning its insertion id and timestamp.
    async fn append(&self, record: NewAuditRecord) -> ServiceResult<AuditRecord>;

    /// Returns matching records in insertion order.
    async fn query(&self, query: &AuditQuery) -> ServiceResult<Vec<AuditRecord>>;

    /// Counts matching records without materializing them.
    async fn count(&self, query: &AuditQuery) -> ServiceResult<u64>;
}

/// In-memory reference implementation of [`AuditStore`].
#[derive(Debug, Default)]
pub struct InMemoryAuditStore {
    inner: RwLock<AuditLog>,
}

#[derive(Debug, Default)]
struct AuditLog {
    records: Vec<AuditRecord>,
    next_id: u64,
}

impl InMemoryAuditStore {
    /// Creates an empty store.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }
}

#[async_trait]
impl AuditStore for InMemoryAuditStore {
    async fn append(&self, record: NewAuditRecord) -> ServiceResult<AuditRecord> {
        let mut log = self
            .inner
            .write()
            .map_err(|_| ServiceError::backend("audit log poisoned"))?;
        log.next_id += 1;
        let record = AuditRecord {
            id: log.next_id,
            created_at: Utc::now(),
            actor_id: record.actor_id,
            action: record.action,
            resource_type: record.resource_type,
            resource_id: record.resource_id,
            details: record.details,
            outcome: record.outcome,
            skip_policy_check: record.skip_policy_check,
        };
        log.records.push(record.clone());
        Ok(record)
    }

    async fn query(&self, query: &AuditQuery) -> ServiceResult<Vec<AuditRecord>> {
        let log = self
            .inner
            .read()
            .map_err(|_| ServiceError::backend("audit log poisoned"))?;
        let mut matched: Vec<AuditRecord> = log
            .records
            .iter()
            .filter(|record| query.matches(record))
            .cloned()
            .collect();
        if query.limit > 0 && matched.len() > query.limit {
            matched.drain(..matched.len() - query.limit);
        }
        Ok(matched)
    }

    async fn count(&self, query: &AuditQuery) -> ServiceResult<u64> {
        let log = self
            .inner
            .read()
            .map_err(|_| ServiceError::backend("audit log poisoned"))?;
        Ok(log
            .records
            .iter()
            .filter(|record| query.matches(record))
            .count() as u64)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn record(actor: &str, action: &str, outcome: AuditOutcome) -> NewAuditRecord {
        NewAuditRecord::new(actor, action, "task", outcome)
    }

    #[tokio::test]
    async fn append_assigns_monotonic_ids() {
        let store = InMemoryAuditStore::new();
        let first = store
            .append(record("a", "tool.invoked", AuditOutcome::Success))
            .await
            .unwrap();
        let second = store
            .append(record("a", "tool.invoked", AuditOutcome::Success))
            .await
            .unwrap();
        assert!(second.id > first.id);
        assert!(second.created_at >= first.created_at);
    }

    #[tokio::test]
    async fn query_filters_and_orders() {
        let store = InMemoryAuditStore::new();
        store
            .append(record("a", "tool.invoked", AuditOutcome::Success))
            .await
            .unwrap();
        store
            .append(record("b", "tool.invoked", AuditOutcome::Failure))
            .await
            .unwrap();
        store
            .append(record("a", "llm.request", AuditOutcome::Success))
            .await
            .unwrap();

        let hits = store
            .query(&AuditQuery {
                actor_id: Some("a".into()),
                ..AuditQuery::default()
            })
            .await
            .unwrap();
        assert_eq!(hits.len(), 2);
        assert!(hits[0].id < hits[1].id);

        let count = store
            .count(&AuditQuery {
                action_prefix: Some("tool.".into()),
                ..AuditQuery::default()
            })
            .await
            .unwrap();
        assert_eq!(count, 2);
    }

    #[tokio::test]
    async fn limit_keeps_newest() {
        let store = InMemoryAuditStore::new();
        for i in 0..5 {
            store
                .append(record("a", &format!("act.{i}"), AuditOutcome::Success))
                .await
                .unwrap();
        }
        let hits = store
            .query(&AuditQuery {
                limit: 2,
                ..AuditQuery::default()
            })
            .await
            .unwrap();
        assert_eq!(hits.len(), 2);
        assert_eq!(hits[1].action, "act.4");
    }
}
