//! Governance policies evaluated against audit records.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;
use warden_services::{AuditOutcome, AuditRecord};

use crate::records::SanctionKind;

/// Whether a policy participates in evaluation.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum PolicyStatus {
    /// Evaluated by the loop.
    Active,
    /// Skipped by the loop.
    Disabled,
}

/// Sanction attached to a governance rule, applied on violation.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct SanctionSpec {
    /// Severity tier to apply.
    #[serde(rename = "type")]
    pub kind: SanctionKind,
}

impl SanctionSpec {
    /// Creates a spec for the supplied tier.
    #[must_use]
    pub const fn new(kind: SanctionKind) -> Self {
        Self { kind }
    }
}

/// One rule within a governance policy.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum GovernanceRule {
    /// Any matching record is a violation.
    #[serde(rename_all = "camelCase")]
    Deny {
        /// Audit action the rule targets, e.g. `tool.invoked`.
        action: String,
        /// When set, the record's resource type must match.
        #[serde(default, skip_serializing_if = "Option::is_none")]
        resource_type: Option<String>,
        /// When set, the record's outcome must match.
        #[serde(default, skip_serializing_if = "Option::is_none")]
        outcome: Option<AuditOutcome>,
        /// Sanction applied on violation.
        #[serde(default, skip_serializing_if = "Option::is_none")]
        sanction: Option<SanctionSpec>,
    },
    /// A violation once the actor exceeds `max_count` matching records
    /// within the trailing window.
    #[serde(rename_all = "camelCase")]
    RateLimit {
        /// Audit action the rule targets.
        action: String,
        /// Trailing window length in seconds.
        window_seconds: u64,
        /// Maximum matching records tolerated within the window.
        max_count: u64,
        /// When set, the record's resource type must match.
        #[serde(default, skip_serializing_if = "Option::is_none")]
        resource_type: Option<String>,
        /// When set, the record's outcome must match.
        #[serde(default, skip_serializing_if = "Option::is_none")]
        outcome: Option<AuditOutcome>,
        /// Sanction applied on violation.
        #[serde(default, skip_serializing_if = "Option::is_none")]
        sanction: Option<SanctionSpec>,
    },
}

impl GovernanceRule {
    /// Returns the sanction tier this rule applies on violation, if any.
    #[must_use]
    pub const fn sanction(&self) -> Option<SanctionKind> {
        match self {
            Self::Deny { sanction, .. } | Self::RateLimit { sanction, .. } => {
                match sanction {
                    Some(spec) => Some(spec.kind),
                    None => None,
                }
            }
        }
    }

    /// Returns `true` when the record matches the rule's filters.
    #[must_use]
    pub fn matches(&self, record: &AuditRecord) -> bool {
        let (action, resource_type, outcome) = match self {
            Self::Deny {
                action,
                resource_type,
                outcome,
                ..
            }
            | Self::RateLimit {
                action,
                resource_type,
                outcome,
                ..
            } => (action, resource_type, outcome),
        };
        if &record.action != action {
            return false;
        }
        if let Some(resource_type) = resource_type {
            if &record.resource_type != resource_type {
                return false;
            }
        }
        if let Some(outcome) = outcome {
            if &record.outcome != outcome {
                return false;
            }
        }
        true
    }
}

/// A named set of governance rules.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct GovernancePolicy {
    /// Policy identifier.
    pub id: Uuid,
    /// Policy name.
    pub name: String,
    /// Optional description.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub description: Option<String>,
    /// Whether the loop evaluates the policy.
    pub status: PolicyStatus,
    /// The rules.
    pub rules: Vec<GovernanceRule>,
    /// Creation timestamp.
    pub created_at: DateTime<Utc>,
}

impl GovernancePolicy {
    /// Creates an active policy.
    #[must_use]
    pub fn new(name: impl Into<String>, rules: Vec<GovernanceRule>) -> Self {
        Self {
            id: Uuid::new_v4(),
            name: name.into(),
            description: None,
            status: PolicyStatus::Active,
            rules,
            created_at: Utc::now(),
        }
    }

    /// Sets the description.
    #[must_use]
    pub fn with_description(mut self, description: impl Into<String>) -> Self {
        self.description = Some(description.into());
        self
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::Value;

    fn record(action: &str, outcome: AuditOutcome) -> AuditRecord {
        AuditRecord {
            id: 1,
            created_at: Utc::now(),
            actor_id: "actor".into(),
            action: action.into(),
            resource_type: "tool".into(),
            resource_id: None,
            details: Value::Null,
            outcome,
            skip_policy_check: false,
        }
    }

    #[test]
    fn deny_rule_matching() {
        let rule = GovernanceRule::Deny {
            action: "tool.invoked".into(),
            resource_type: None,
            outcome: Some(AuditOutcome::Failure),
            sanction: Some(SanctionSpec::new(SanctionKind::Warn)),
        };
        assert!(rule.matches(&record("tool.invoked", AuditOutcome::Failure)));
        assert!(!rule.matches(&record("tool.invoked", AuditOutcome::Success)));
        assert!(!rule.matches(&record("llm.request", AuditOutcome::Failure)));
        assert_eq!(rule.sanction(), Some(SanctionKind::Warn));
    }

    #[test]
    fn rate_limit_rule_serde_uses_type_tag() {
        let rule = GovernanceRule::RateLimit {
            action: "tool.invoked".into(),
            window_seconds: 10,
            max_count: 2,
            resource_type: None,
            outcome: None,
            sanction: Some(SanctionSpec::new(SanctionKind::Quarantine)),
        };
        let json = serde_json::to_value(&rule).unwrap();
        assert_eq!(json["type"], "rate_limit");
        assert_eq!(json["window_seconds"], Value::Null);
        assert_eq!(json["windowSeconds"], 10);
    }
}
