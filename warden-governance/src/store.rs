//! Governance persistence interface and in-memory reference
//! implementation.

use std::sync::RwLock;

use async_trait::async_trait;
use chrono::Utc;
use serde_json::Value;
use uuid::Uuid;
use warden_primitives::AgentId;
use warden_services::ServiceError;

use crate::policy::{GovernancePolicy, PolicyStatus};
use crate::records::{
    Appeal, AppealStatus, CaseStatus, ModerationCase, Sanction, SanctionKind, SanctionStatus,
};
use crate::{GovernanceError, GovernanceResult};

/// Store backing policies, cases, sanctions, and appeals.
///
/// Mutations that must not partially apply (opening a case and linking
/// its sanction) run under one lock acquisition in the reference
/// implementation; SQL-backed implementations use a transaction.
#[async_trait]
pub trait GovernanceStore: Send + Sync {
    /// Persists a policy.
    async fn create_policy(&self, policy: GovernancePolicy) -> GovernanceResult<GovernancePolicy>;

    /// Lists all policies.
    async fn list_policies(&self) -> GovernanceResult<Vec<GovernancePolicy>>;

    /// Sets a policy's status. Idempotent.
    async fn set_policy_status(&self, id: Uuid, status: PolicyStatus) -> GovernanceResult<()>;

    /// Returns the active policies.
    async fn active_policies(&self) -> GovernanceResult<Vec<GovernancePolicy>>;

    /// Opens a case for `(subject, policy_id)` or returns the already
    /// open one, appending the new evidence either way.
    async fn open_or_reuse_case(
        &self,
        subject: AgentId,
        policy_id: Option<Uuid>,
        reason: &str,
        evidence: Value,
    ) -> GovernanceResult<ModerationCase>;

    /// Lists cases, optionally restricted to one subject.
    async fn list_cases(&self, subject: Option<AgentId>) -> GovernanceResult<Vec<ModerationCase>>;

    /// Returns one case.
    async fn get_case(&self, id: Uuid) -> GovernanceResult<ModerationCase>;

    /// Closes a case with a resolution, resolving its active sanctions.
    async fn resolve_case(&self, id: Uuid, resolution: &str) -> GovernanceResult<ModerationCase>;

    /// Applies a sanction under a case; at most one active sanction per
    /// `(case, kind)` exists at a time.
    async fn upsert_sanction(
        &self,
        case_id: Uuid,
        subject: AgentId,
        kind: SanctionKind,
        details: &str,
    ) -> GovernanceResult<Sanction>;

    /// Lists sanctions, optionally restricted to one subject.
    async fn list_sanctions(&self, subject: Option<AgentId>) -> GovernanceResult<Vec<Sanction>>;

    /// Returns the active sanctions gating one agent.
    async fn active_sanctions(&self, subject: AgentId) -> GovernanceResult<Vec<Sanction>>;

    /// Lifts one sanction.
    async fn lift_sanction(&self, id: Uuid) -> GovernanceResult<Sanction>;

    /// Opens an appeal against a case.
    async fn open_appeal(
        &self,
        case_id: Uuid,
        opened_by: &str,
        reason: &str,
    ) -> GovernanceResult<Appeal>;

    /// Lists appeals, optionally restricted to one subject.
    async fn list_appeals(&self, subject: Option<AgentId>) -> GovernanceResult<Vec<Appeal>>;

    /// Decides an appeal. Resolving in the subject's favour lifts the
    /// case's active sanctions.
    async fn resolve_appeal(
        &self,
        id: Uuid,
        status: AppealStatus,
        resolution: &str,
    ) -> GovernanceResult<Appeal>;
}

/// In-memory reference implementation of [`GovernanceStore`].
#[derive(Debug, Default)]
pub struct InMemoryGovernanceStore {
    inner: RwLock<GovernanceState>,
}

#[derive(Debug, Default)]
struct GovernanceState {
    policies: Vec<GovernancePolicy>,
    cases: Vec<ModerationCase>,
    sanctions: Vec<Sanction>,
    appeals: Vec<Appeal>,
}

impl InMemoryGovernanceStore {
    /// Creates an empty store.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }
}

fn poisoned() -> GovernanceError {
    GovernanceError::Service(ServiceError::backend("governance store poisoned"))
}

#[async_trait]
impl GovernanceStore for InMemoryGovernanceStore {
    async fn create_policy(&self, policy: GovernancePolicy) -> GovernanceResult<GovernancePolicy> {
        let mut state = self.inner.write().map_err(|_| poisoned())?;
        if state.policies.iter().any(|p| p.name == policy.name) {
            return Err(GovernanceError::Service(ServiceError::conflict(format!(
                "policy `{}` exists",
                policy.name
            ))));
        }
        state.policies.push(policy.clone());
        Ok(policy)
    }

    async fn list_policies(&self) -> GovernanceResult<Vec<GovernancePolicy>> {
        let state = self.inner.read().map_err(|_| poisoned())?;
        Ok(state.policies.clone())
    }

    async fn set_policy_status(&self, id: Uuid, status: PolicyStatus) -> GovernanceResult<()> {
        let mut state = self.inner.write().map_err(|_| poisoned())?;
        let policy = state
            .policies
            .iter_mut()
            .find(|p| p.id == id)
            .ok_or(GovernanceError::NotFound { what: "policy" })?;
        policy.status = status;
        Ok(())
    }

    async fn active_policies(&self) -> GovernanceResult<Vec<GovernancePolicy>> {
        let state = self.inner.read().map_err(|_| poisoned())?;
        Ok(state
            .policies
            .iter()
            .filter(|p| p.status == PolicyStatus::Active)
            .cloned()
            .collect())
    }

    async fn open_or_reuse_case(
        &self,
        subject: AgentId,
        policy_id: Option<Uuid>,
        reason: &str,
        evidence: Value,
    ) -> GovernanceResult<ModerationCase> {
        let mut state = self.inner.write().map_err(|_| poisoned())?;
        if let Some(case) = state
            .cases
            .iter_mut()
            .find(|c| c.subject == subject && c.policy_id == policy_id && c.status == CaseStatus::Open)
        {
            case.evidence.push(evidence);
            case.updated_at = Utc::now();
            return Ok(case.clone());
        }

        let now = Utc::now();
        let case = ModerationCase {
            id: Uuid::new_v4(),
            subject,
            policy_id,
            status: CaseStatus::Open,
            reason: reason.to_owned(),
            evidence: vec![evidence],
            resolution: None,
            created_at: now,
            updated_at: now,
        };
        state.cases.push(case.clone());
        Ok(case)
    }

    async fn list_cases(&self, subject: Option<AgentId>) -> GovernanceResult<Vec<ModerationCase>> {
        let state = self.inner.read().map_err(|_| poisoned())?;
        Ok(state
            .cases
            .iter()
            .filter(|c| subject.is_none_or(|s| c.subject == s))
            .cloned()
            .collect())
    }

    async fn get_case(&self, id: Uuid) -> GovernanceResult<ModerationCase> {
        let state = self.inner.read().map_err(|_| poisoned())?;
        state
            .cases
            .iter()
            .find(|c| c.id == id)
            .cloned()
            .ok_or(GovernanceError::NotFound { what: "case" })
    }

    async fn resolve_case(&self, id: Uuid, resolution: &str) -> GovernanceResult<ModerationCase> {
        let mut state = self.inner.write().map_err(|_| poisoned())?;
        let now = Utc::now();
        for sanction in state
            .sanctions
            .iter_mut()
            .filter(|s| s.case_id == id && s.status == SanctionStatus::Active)
        {
            sanction.status = SanctionStatus::Resolved;
            sanction.resolved_at = Some(now);
        }
        let case = state
            .cases
            .iter_mut()
            .find(|c| c.id == id)
            .ok_or(GovernanceError::NotFound { what: "case" })?;
        case.status = CaseStatus::Resolved;
        case.resolution = Some(resolution.to_owned());
        case.updated_at = now;
        Ok(case.clone())
    }

    async fn upsert_sanction(
        &self,
        case_id: Uuid,
        subject: AgentId,
        kind: SanctionKind,
        details: &str,
    ) -> GovernanceResult<Sanction> {
        let mut state = self.inner.write().map_err(|_| poisoned())?;
        if !state.cases.iter().any(|c| c.id == case_id) {
            return Err(GovernanceError::NotFound { what: "case" });
        }
        if let Some(existing) = state
            .sanctions
            .iter()
            .find(|s| s.case_id == case_id && s.kind == kind && s.status == SanctionStatus::Active)
        {
            return Ok(existing.clone());
        }

        let sanction = Sanction {
            id: Uuid::new_v4(),
            subject,
            kind,
            details: details.to_owned(),
            status: SanctionStatus::Active,
            case_id,
            created_at: Utc::now(),
            resolved_at: None,
        };
        state.sanctions.push(sanction.clone());
        Ok(sanction)
    }

    async fn list_sanctions(&self, subject: Option<AgentId>) -> GovernanceResult<Vec<Sanction>> {
        let state = self.inner.read().map_err(|_| poisoned())?;
        Ok(state
            .sanctions
            .iter()
            .filter(|s| subject.is_none_or(|id| s.subject == id))
            .cloned()
            .collect())
    }

    async fn active_sanctions(&self, subject: AgentId) -> GovernanceResult<Vec<Sanction>> {
        let state = self.inner.read().map_err(|_| poisoned())?;
        Ok(state
            .sanctions
            .iter()
            .filter(|s| s.subject == subject && s.status == SanctionStatus::Active)
            .cloned()
            .collect())
    }

    async fn lift_sanction(&self, id: Uuid) -> GovernanceResult<Sanction> {
        let mut state = self.inner.write().map_err(|_| poisoned())?;
        let sanction = state
            .sanctions
            .iter_mut()
            .find(|s| s.id == id)
            .ok_or(GovernanceError::NotFound { what: "sanction" })?;
        sanction.status = SanctionStatus::Resolved;
        sanction.resolved_at = Some(Utc::now());
        Ok(sanction.clone())
    }

    async fn open_appeal(
        &self,
        case_id: Uuid,
        opened_by: &str,
        reason: &str,
    ) -> GovernanceResult<Appeal> {
        let mut state = self.inner.write().map_err(|_| poisoned())?;
        let subject = state
            .cases
            .iter()
            .find(|c| c.id == case_id)
            .map(|c| c.subject)
            .ok_or(GovernanceError::NotFound { what: "case" })?;
        if state
            .appeals
            .iter()
            .any(|a| a.case_id == case_id && a.status == AppealStatus::Open)
        {
            return Err(GovernanceError::Service(ServiceError::conflict(
                "an appeal is already open for this case",
            )));
        }

        let appeal = Appeal {
            id: Uuid::new_v4(),
            case_id,
            subject,
            opened_by: opened_by.to_owned(),
            reason: reason.to_owned(),
            status: AppealStatus::Open,
            resolution: None,
            created_at: Utc::now(),
            resolved_at: None,
        };
        state.appeals.push(appeal.clone());
        Ok(appeal)
    }

    async fn list_appeals(&self, subject: Option<AgentId>) -> GovernanceResult<Vec<Appeal>> {
        let state = self.inner.read().map_err(|_| poisoned())?;
        Ok(state
            .appeals
            .iter()
            .filter(|a| subject.is_none_or(|id| a.subject == id))
            .cloned()
            .collect())
    }

    async fn resolve_appeal(
        &self,
        id: Uuid,
        status: AppealStatus,
        resolution: &str,
    ) -> GovernanceResult<Appeal> {
        if status == AppealStatus::Open {
            return Err(GovernanceError::Invalid(
                "appeal resolution must close the appeal",
            ));
        }
        let mut state = self.inner.write().map_err(|_| poisoned())?;
        let now = Utc::now();

        let (case_id, appeal) = {
            let appeal = state
                .appeals
                .iter_mut()
                .find(|a| a.id == id)
                .ok_or(GovernanceError::NotFound { what: "appeal" })?;
            appeal.status = status;
            appeal.resolution = Some(resolution.to_owned());
            appeal.resolved_at = Some(now);
            (appeal.case_id, appeal.clone())
        };

        if status == AppealStatus::Resolved {
            for sanction in state
                .sanctions
                .iter_mut()
                .filter(|s| s.case_id == case_id && s.status == SanctionStatus::Active)
            {
                sanction.status = SanctionStatus::Resolved;
                sanction.resolved_at = Some(now);
            }
            if let Some(case) = state.cases.iter_mut().find(|c| c.id == case_id) {
                case.status = CaseStatus::Resolved;
                case.resolution = Some(format!("appeal upheld: {resolution}"));
                case.updated_at = now;
            }
        }

        Ok(appeal)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[tokio::test]
    async fn case_reuse_appends_evidence() {
        let store = InMemoryGovernanceStore::new();
        let subject = AgentId::random();
        let policy_id = Some(Uuid::new_v4());

        let first = store
            .open_or_reuse_case(subject, policy_id, "violations", json!({"n": 1}))
            .await
            .unwrap();
        let second = store
            .open_or_reuse_case(subject, policy_id, "violations", json!({"n": 2}))
            .await
            .unwrap();
        assert_eq!(first.id, second.id);
        assert_eq!(second.evidence.len(), 2);
    }

    #[tokio::test]
    async fn sanction_upsert_is_unique_per_case_and_kind() {
        let store = InMemoryGovernanceStore::new();
        let subject = AgentId::random();
        let case = store
            .open_or_reuse_case(subject, None, "test", Value::Null)
            .await
            .unwrap();

        let a = store
            .upsert_sanction(case.id, subject, SanctionKind::Throttle, "first")
            .await
            .unwrap();
        let b = store
            .upsert_sanction(case.id, subject, SanctionKind::Throttle, "second")
            .await
            .unwrap();
        assert_eq!(a.id, b.id);

        let other = store
            .upsert_sanction(case.id, subject, SanctionKind::Ban, "different kind")
            .await
            .unwrap();
        assert_ne!(a.id, other.id);
        assert_eq!(store.active_sanctions(subject).await.unwrap().len(), 2);
    }

    #[tokio::test]
    async fn resolved_appeal_lifts_sanctions() {
        let store = InMemoryGovernanceStore::new();
        let subject = AgentId::random();
        let case = store
            .open_or_reuse_case(subject, None, "test", Value::Null)
            .await
            .unwrap();
        store
            .upsert_sanction(case.id, subject, SanctionKind::Quarantine, "auto")
            .await
            .unwrap();

        let appeal = store.open_appeal(case.id, "admin", "mistake").await.unwrap();
        // A second open appeal for the same case conflicts.
        assert!(store.open_appeal(case.id, "admin", "again").await.is_err());

        store
            .resolve_appeal(appeal.id, AppealStatus::Resolved, "confirmed mistake")
            .await
            .unwrap();
        assert!(store.active_sanctions(subject).await.unwrap().is_empty());
        let case = store.get_case(case.id).await.unwrap();
        assert_eq!(case.status, CaseStatus::Resolved);
    }

    #[tokio::test]
    async fn policy_status_toggle_is_idempotent() {
        let store = InMemoryGovernanceStore::new();
        let policy = store
            .create_policy(GovernancePolicy::new("p", vec![]))
            .await
            .unwrap();
        store
            .set_policy_status(policy.id, PolicyStatus::Disabled)
            .await
            .unwrap();
        store
            .set_policy_status(policy.id, PolicyStatus::Disabled)
            .await
            .unwrap();
        assert!(store.active_policies().await.unwrap().is_empty());
    }
}
