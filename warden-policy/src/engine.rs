//! Priority-ordered rule evaluation with a bounded audit ring.

use std::collections::VecDeque;
use std::sync::{Mutex, RwLock};

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use tracing::debug;

use crate::rules::{AccessRequest, PolicyDecision, PolicyRule, RuleKind};
use crate::{PolicyError, PolicyResult};

const DEFAULT_AUDIT_CAPACITY: usize = 1000;

/// Construction parameters for a [`PolicySet`].
#[derive(Debug, Clone, Default)]
pub struct PolicySetConfig {
    /// Decision applied when no rule matches.
    pub default_decision: Option<PolicyDecision>,
    /// Home-directory hint used to expand `~` patterns.
    pub home_dir: Option<String>,
    /// Refuses permissive defaults when enabled.
    pub production_hardening: bool,
    /// Audit ring capacity; zero uses the default.
    pub audit_capacity: usize,
}

/// Outcome of one policy evaluation.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Evaluation {
    /// The decision reached.
    pub decision: PolicyDecision,
    /// The rule that decided, when one matched.
    pub rule_id: Option<String>,
}

/// One entry in the engine's bounded audit ring.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PolicyAuditEntry {
    /// When the evaluation ran.
    pub evaluated_at: DateTime<Utc>,
    /// Human-readable label of the evaluated request.
    pub request: String,
    /// Kind of the evaluated request.
    pub kind: RuleKind,
    /// The decision reached.
    pub decision: PolicyDecision,
    /// The rule that decided, when one matched.
    pub rule_id: Option<String>,
}

/// Rule store evaluating file, network, shell, and secret requests.
#[derive(Debug)]
pub struct PolicySet {
    rules: RwLock<Vec<PolicyRule>>,
    default_decision: PolicyDecision,
    home_dir: Option<String>,
    audit: Mutex<VecDeque<PolicyAuditEntry>>,
    audit_capacity: usize,
}

impl PolicySet {
    /// Constructs a policy set from the supplied configuration.
    ///
    /// # Errors
    ///
    /// Returns [`PolicyError::PermissiveDefault`] when production hardening
    /// is enabled and the default decision is not [`PolicyDecision::Block`].
    pub fn new(config: PolicySetConfig) -> PolicyResult<Self> {
        let default_decision = config.default_decision.unwrap_or(PolicyDecision::Block);
        if config.production_hardening && default_decision != PolicyDecision::Block {
            return Err(PolicyError::PermissiveDefault);
        }
        let audit_capacity = if config.audit_capacity == 0 {
            DEFAULT_AUDIT_CAPACITY
        } else {
            config.audit_capacity
        };
        Ok(Self {
            rules: RwLock::new(Vec::new()),
            default_decision,
            home_dir: config.home_dir,
            audit: Mutex::new(VecDeque::with_capacity(audit_capacity.min(64))),
            audit_capacity,
        })
    }

    /// Returns the decision applied when no rule matches.
    #[must_use]
    pub const fn default_decision(&self) -> PolicyDecision {
        self.default_decision
    }

    /// Adds a rule to the set.
    ///
    /// # Panics
    ///
    /// Panics if the internal rule store lock has been poisoned.
    pub fn add_rule(&self, rule: PolicyRule) {
        let mut guard = self.rules.write().expect("policy rules poisoned");
        guard.push(rule);
    }

    /// Enables or disables the rule with the supplied id. Idempotent.
    ///
    /// Returns `true` when a rule with that id exists.
    ///
    /// # Panics
    ///
    /// Panics if the internal rule store lock has been poisoned.
    pub fn set_rule_status(&self, rule_id: &str, enabled: bool) -> bool {
        let mut guard = self.rules.write().expect("policy rules poisoned");
        let mut found = false;
        for rule in guard.iter_mut().filter(|r| r.id() == rule_id) {
            rule.set_enabled(enabled);
            found = true;
        }
        found
    }

    /// Lists the rules of one kind, or all rules when `kind` is `None`.
    ///
    /// # Panics
    ///
    /// Panics if the internal rule store lock has been poisoned.
    #[must_use]
    pub fn rules(&self, kind: Option<RuleKind>) -> Vec<PolicyRule> {
        let guard = self.rules.read().expect("policy rules poisoned");
        guard
            .iter()
            .filter(|rule| kind.is_none_or(|k| rule.kind() == k))
            .cloned()
            .collect()
    }

    /// Evaluates a request against the enabled rules of its kind.
    ///
    /// Rules are consulted in descending priority order (stable for equal
    /// priorities); the first match decides. Every evaluation is recorded
    /// in the audit ring.
    ///
    /// # Errors
    ///
    /// Propagates pattern compilation or pattern-count errors.
    ///
    /// # Panics
    ///
    /// Panics if an internal lock has been poisoned.
    pub fn evaluate(&self, request: &AccessRequest) -> PolicyResult<Evaluation> {
        let kind = request.kind();
        let mut candidates: Vec<PolicyRule> = {
            let guard = self.rules.read().expect("policy rules poisoned");
            guard
                .iter()
                .filter(|rule| rule.enabled() && rule.kind() == kind)
                .cloned()
                .collect()
        };
        candidates.sort_by_key(|rule| std::cmp::Reverse(rule.priority()));

        let home = self.home_dir.as_deref();
        let mut outcome = Evaluation {
            decision: self.default_decision,
            rule_id: None,
        };
        for rule in &candidates {
            if rule.matches(request, home)? {
                outcome = Evaluation {
                    decision: rule.decision(),
                    rule_id: Some(rule.id().to_owned()),
                };
                break;
            }
        }

        debug!(
            request = %request.label(),
            decision = outcome.decision.as_str(),
            rule = outcome.rule_id.as_deref().unwrap_or("<default>"),
            "policy evaluated"
        );
        self.record_audit(request, &outcome);
        Ok(outcome)
    }

    /// Returns a snapshot of the audit ring, oldest first.
    ///
    /// # Panics
    ///
    /// Panics if the audit lock has been poisoned.
    #[must_use]
    pub fn audit_entries(&self) -> Vec<PolicyAuditEntry> {
        let guard = self.audit.lock().expect("policy audit poisoned");
        guard.iter().cloned().collect()
    }

    fn record_audit(&self, request: &AccessRequest, outcome: &Evaluation) {
        let mut guard = self.audit.lock().expect("policy audit poisoned");
        if guard.len() == self.audit_capacity {
            guard.pop_front();
        }
        guard.push_back(PolicyAuditEntry {
            evaluated_at: Utc::now(),
            request: request.label(),
            kind: request.kind(),
            decision: outcome.decision,
            rule_id: outcome.rule_id.clone(),
        });
    }
}
