//! Moderation case, sanction, and appeal records.

use std::str::FromStr;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use uuid::Uuid;
use warden_primitives::AgentId;

use crate::GovernanceError;

/// Sanction severity tiers.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SanctionKind {
    /// Recorded warning, still gates dispatch until resolved.
    Warn,
    /// Reduced service expectations.
    Throttle,
    /// Isolated from other agents.
    Quarantine,
    /// Permanently refused.
    Ban,
}

impl SanctionKind {
    /// Returns the canonical wire label.
    #[must_use]
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::Warn => "warn",
            Self::Throttle => "throttle",
            Self::Quarantine => "quarantine",
            Self::Ban => "ban",
        }
    }
}

impl FromStr for SanctionKind {
    type Err = GovernanceError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "warn" => Ok(Self::Warn),
            "throttle" => Ok(Self::Throttle),
            "quarantine" => Ok(Self::Quarantine),
            "ban" => Ok(Self::Ban),
            _ => Err(GovernanceError::Invalid("unknown sanction type")),
        }
    }
}

/// Whether a sanction currently gates dispatch.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SanctionStatus {
    /// Gating dispatch.
    Active,
    /// Lifted.
    Resolved,
}

/// A sanction applied to an agent.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Sanction {
    /// Sanction identifier.
    pub id: Uuid,
    /// Sanctioned agent.
    pub subject: AgentId,
    /// Severity tier.
    pub kind: SanctionKind,
    /// Human-readable details.
    pub details: String,
    /// Whether the sanction gates dispatch.
    pub status: SanctionStatus,
    /// Moderation case the sanction belongs to.
    pub case_id: Uuid,
    /// Creation timestamp.
    pub created_at: DateTime<Utc>,
    /// Resolution timestamp.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub resolved_at: Option<DateTime<Utc>>,
}

/// Lifecycle of a moderation case.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum CaseStatus {
    /// Under review; new violations fold into it.
    Open,
    /// Closed with a resolution.
    Resolved,
    /// Closed without action.
    Dismissed,
}

/// A moderation case opened by the governance loop or an admin.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ModerationCase {
    /// Case identifier.
    pub id: Uuid,
    /// Agent under review.
    pub subject: AgentId,
    /// Policy that triggered the case, when loop-opened.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub policy_id: Option<Uuid>,
    /// Case lifecycle status.
    pub status: CaseStatus,
    /// Why the case was opened.
    pub reason: String,
    /// Evidence payloads accumulated across violations.
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub evidence: Vec<Value>,
    /// Resolution text, set on close.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub resolution: Option<String>,
    /// Creation timestamp.
    pub created_at: DateTime<Utc>,
    /// Last update timestamp.
    pub updated_at: DateTime<Utc>,
}

/// Lifecycle of an appeal.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum AppealStatus {
    /// Awaiting an admin decision.
    Open,
    /// Decided in the subject's favour; linked sanctions lifted.
    Resolved,
    /// Decided against the subject.
    Dismissed,
}

/// An appeal raised against a moderation case.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Appeal {
    /// Appeal identifier.
    pub id: Uuid,
    /// Appealed case.
    pub case_id: Uuid,
    /// Agent the case concerns.
    pub subject: AgentId,
    /// Who raised the appeal (agent id or admin label).
    pub opened_by: String,
    /// Grounds for the appeal.
    pub reason: String,
    /// Appeal lifecycle status.
    pub status: AppealStatus,
    /// Decision text, set on close.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub resolution: Option<String>,
    /// Creation timestamp.
    pub created_at: DateTime<Utc>,
    /// Decision timestamp.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub resolved_at: Option<DateTime<Utc>>,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn sanction_kind_round_trips() {
        for kind in [
            SanctionKind::Warn,
            SanctionKind::Throttle,
            SanctionKind::Quarantine,
            SanctionKind::Ban,
        ] {
            assert_eq!(kind.as_str().parse::<SanctionKind>().unwrap(), kind);
        }
        assert!("exile".parse::<SanctionKind>().is_err());
    }
}
