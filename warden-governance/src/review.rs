//! Audit-driven policy review loop.

use std::str::FromStr;
use std::sync::Arc;

use chrono::{Duration, Utc};
use serde_json::json;
use tracing::{debug, warn};
use warden_primitives::AgentId;
use warden_services::{
    AuditOutcome, AuditQuery, AuditRecord, AuditStore, EventBus, GatewayEvent, NewAuditRecord,
};

use crate::policy::GovernanceRule;
use crate::store::GovernanceStore;
use crate::GovernanceResult;

/// Action prefixes owned by the governance machinery itself. Records with
/// these prefixes are never evaluated, which breaks the audit/governance
/// cycle without locks.
pub const SKIP_PREFIXES: [&str; 9] = [
    "policy.",
    "moderation.",
    "sanction.",
    "appeal.",
    "audit.",
    "permission.",
    "approval.",
    "rate_limit.",
    "budget.",
];

/// Evaluates persisted audit records against the active policies.
pub struct GovernanceLoop {
    store: Arc<dyn GovernanceStore>,
    audit: Arc<dyn AuditStore>,
    bus: Arc<dyn EventBus>,
}

impl std::fmt::Debug for GovernanceLoop {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("GovernanceLoop").finish_non_exhaustive()
    }
}

impl GovernanceLoop {
    /// Creates the loop over the supplied stores and bus.
    #[must_use]
    pub fn new(
        store: Arc<dyn GovernanceStore>,
        audit: Arc<dyn AuditStore>,
        bus: Arc<dyn EventBus>,
    ) -> Self {
        Self { store, audit, bus }
    }

    /// Returns `true` when the record is exempt from evaluation.
    #[must_use]
    pub fn skips(record: &AuditRecord) -> bool {
        record.skip_policy_check
            || SKIP_PREFIXES
                .iter()
                .any(|prefix| record.action.starts_with(prefix))
    }

    /// Evaluates one persisted record against the active policies,
    /// opening cases and applying sanctions on violation.
    ///
    /// # Errors
    ///
    /// Propagates store failures. Evaluation itself never fails a task:
    /// callers run the loop after the triggering task has completed.
    pub async fn review(&self, record: &AuditRecord) -> GovernanceResult<()> {
        if Self::skips(record) {
            return Ok(());
        }
        // Governance targets hosted agents; admin and system actors pass.
        let Ok(subject) = AgentId::from_str(&record.actor_id) else {
            return Ok(());
        };

        for policy in self.store.active_policies().await? {
            for rule in &policy.rules {
                if !rule.matches(record) {
                    continue;
                }
                let violated = match rule {
                    GovernanceRule::Deny { .. } => true,
                    GovernanceRule::RateLimit {
                        action,
                        window_seconds,
                        max_count,
                        resource_type,
                        outcome,
                        ..
                    } => {
                        let since = Utc::now() - Duration::seconds(*window_seconds as i64);
                        let count = self
                            .audit
                            .count(&AuditQuery {
                                actor_id: Some(record.actor_id.clone()),
                                action: Some(action.clone()),
                                resource_type: resource_type.clone(),
                                outcome: *outcome,
                                since: Some(since),
                                ..AuditQuery::default()
                            })
                            .await?;
                        count > *max_count
                    }
                };
                if !violated {
                    continue;
                }

                warn!(
                    subject = %subject,
                    policy = %policy.name,
                    action = %record.action,
                    "governance policy violated"
                );
                self.apply_violation(subject, &policy.name, policy.id, rule, record)
                    .await?;
            }
        }
        Ok(())
    }

    async fn apply_violation(
        &self,
        subject: AgentId,
        policy_name: &str,
        policy_id: uuid::Uuid,
        rule: &GovernanceRule,
        record: &AuditRecord,
    ) -> GovernanceResult<()> {
        let evidence = json!({
            "auditId": record.id,
            "action": record.action,
            "outcome": record.outcome.as_str(),
            "resourceType": record.resource_type,
            "resourceId": record.resource_id,
        });
        let case = self
            .store
            .open_or_reuse_case(
                subject,
                Some(policy_id),
                &format!("violation of policy `{policy_name}`"),
                evidence,
            )
            .await?;

        self.audit
            .append(
                NewAuditRecord::new(
                    subject.to_string(),
                    "policy.violation",
                    "moderation_case",
                    AuditOutcome::Blocked,
                )
                .with_resource_id(case.id.to_string())
                .with_details(json!({
                    "policy": policy_name,
                    "triggeringAction": record.action,
                }))
                .skip_policy_check(),
            )
            .await?;
        self.bus.publish(GatewayEvent::new(
            "alerts",
            "policy.violation",
            json!({
                "agentId": subject.to_string(),
                "policy": policy_name,
                "caseId": case.id.to_string(),
            }),
        ));

        if let Some(kind) = rule.sanction() {
            let sanction = self
                .store
                .upsert_sanction(
                    case.id,
                    subject,
                    kind,
                    &format!("auto-applied for policy `{policy_name}`"),
                )
                .await?;
            debug!(subject = %subject, kind = kind.as_str(), "sanction upserted");
            self.audit
                .append(
                    NewAuditRecord::new(
                        subject.to_string(),
                        "sanction.apply.auto",
                        "sanction",
                        AuditOutcome::Success,
                    )
                    .with_resource_id(sanction.id.to_string())
                    .with_details(json!({
                        "kind": kind.as_str(),
                        "caseId": case.id.to_string(),
                    }))
                    .skip_policy_check(),
                )
                .await?;
            self.bus.publish(GatewayEvent::new(
                "alerts",
                "sanction.applied",
                json!({
                    "agentId": subject.to_string(),
                    "kind": kind.as_str(),
                    "caseId": case.id.to_string(),
                }),
            ));
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::policy::{GovernancePolicy, SanctionSpec};
    use crate::records::SanctionKind;
    use crate::store::InMemoryGovernanceStore;
    use warden_services::{BroadcastBus, InMemoryAuditStore};

    fn setup() -> (Arc<InMemoryGovernanceStore>, Arc<InMemoryAuditStore>, GovernanceLoop) {
        let store = Arc::new(InMemoryGovernanceStore::new());
        let audit = Arc::new(InMemoryAuditStore::new());
        let bus = Arc::new(BroadcastBus::default());
        let review = GovernanceLoop::new(store.clone(), audit.clone(), bus);
        (store, audit, review)
    }

    async fn persisted(audit: &InMemoryAuditStore, actor: &str, action: &str) -> AuditRecord {
        audit
            .append(NewAuditRecord::new(
                actor,
                action,
                "tool",
                AuditOutcome::Success,
            ))
            .await
            .unwrap()
    }

    #[tokio::test]
    async fn rate_limit_rule_sanctions_after_threshold() {
        let (store, audit, review) = setup();
        store
            .create_policy(GovernancePolicy::new(
                "tool-burst",
                vec![GovernanceRule::RateLimit {
                    action: "tool.invoked".into(),
                    window_seconds: 10,
                    max_count: 2,
                    resource_type: None,
                    outcome: None,
                    sanction: Some(SanctionSpec::new(SanctionKind::Quarantine)),
                }],
            ))
            .await
            .unwrap();

        let subject = AgentId::random();
        for _ in 0..2 {
            let record = persisted(&audit, &subject.to_string(), "tool.invoked").await;
            review.review(&record).await.unwrap();
            assert!(store.active_sanctions(subject).await.unwrap().is_empty());
        }

        let third = persisted(&audit, &subject.to_string(), "tool.invoked").await;
        review.review(&third).await.unwrap();
        let sanctions = store.active_sanctions(subject).await.unwrap();
        assert_eq!(sanctions.len(), 1);
        assert_eq!(sanctions[0].kind, SanctionKind::Quarantine);

        // Derivative records carry the skip flag.
        let derivative = audit
            .query(&AuditQuery {
                action: Some("sanction.apply.auto".into()),
                ..AuditQuery::default()
            })
            .await
            .unwrap();
        assert_eq!(derivative.len(), 1);
        assert!(derivative[0].skip_policy_check);
    }

    #[tokio::test]
    async fn derivative_records_are_never_reevaluated() {
        let (store, audit, review) = setup();
        store
            .create_policy(GovernancePolicy::new(
                "deny-everything",
                vec![GovernanceRule::Deny {
                    action: "policy.violation".into(),
                    resource_type: None,
                    outcome: None,
                    sanction: Some(SanctionSpec::new(SanctionKind::Ban)),
                }],
            ))
            .await
            .unwrap();

        let subject = AgentId::random();
        let record = audit
            .append(
                NewAuditRecord::new(
                    subject.to_string(),
                    "policy.violation",
                    "moderation_case",
                    AuditOutcome::Blocked,
                )
                .skip_policy_check(),
            )
            .await
            .unwrap();
        review.review(&record).await.unwrap();
        assert!(store.active_sanctions(subject).await.unwrap().is_empty());

        // Even without the flag, the prefix skip applies.
        let unflagged = persisted(&audit, &subject.to_string(), "policy.violation").await;
        review.review(&unflagged).await.unwrap();
        assert!(store.active_sanctions(subject).await.unwrap().is_empty());
    }

    #[tokio::test]
    async fn deny_rule_reuses_open_case() {
        let (store, audit, review) = setup();
        store
            .create_policy(GovernancePolicy::new(
                "no-shell",
                vec![GovernanceRule::Deny {
                    action: "shell.executed".into(),
                    resource_type: None,
                    outcome: None,
                    sanction: None,
                }],
            ))
            .await
            .unwrap();

        let subject = AgentId::random();
        for _ in 0..3 {
            let record = persisted(&audit, &subject.to_string(), "shell.executed").await;
            review.review(&record).await.unwrap();
        }
        let cases = store.list_cases(Some(subject)).await.unwrap();
        assert_eq!(cases.len(), 1);
        assert_eq!(cases[0].evidence.len(), 3);
    }

    #[tokio::test]
    async fn non_agent_actors_pass() {
        let (store, audit, review) = setup();
        store
            .create_policy(GovernancePolicy::new(
                "deny-admin",
                vec![GovernanceRule::Deny {
                    action: "tool.invoked".into(),
                    resource_type: None,
                    outcome: None,
                    sanction: Some(SanctionSpec::new(SanctionKind::Ban)),
                }],
            ))
            .await
            .unwrap();

        let record = persisted(&audit, "admin", "tool.invoked").await;
        review.review(&record).await.unwrap();
        assert!(store.list_cases(None).await.unwrap().is_empty());
    }
}
