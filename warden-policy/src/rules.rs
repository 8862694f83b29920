//! Rule, matcher, and request contracts for policy evaluation.

use serde::{Deserialize, Serialize};

use crate::pattern::match_any;
use crate::PolicyResult;

/// Verdict attached to a rule or used as a set default.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum PolicyDecision {
    /// Action proceeds without intervention.
    Allow,
    /// Action is rejected outright.
    Block,
    /// Action requires explicit approval before proceeding.
    Approve,
}

impl PolicyDecision {
    /// Returns the canonical wire label for the decision.
    #[must_use]
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::Allow => "allow",
            Self::Block => "block",
            Self::Approve => "approve",
        }
    }
}

/// The four resource kinds governed by policy rules.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum RuleKind {
    /// Filesystem access.
    File,
    /// Outbound network access.
    Network,
    /// Shell command execution.
    Shell,
    /// Secret material access.
    Secret,
}

/// Filesystem operations a file rule may be scoped to.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum FileOperation {
    /// Read file contents.
    Read,
    /// Create or modify a file.
    Write,
    /// Remove a file.
    Delete,
    /// Enumerate a directory.
    List,
}

/// A concrete access request submitted for evaluation.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum AccessRequest {
    /// Filesystem access to `path`.
    File {
        /// Target path.
        path: String,
        /// Operation being performed.
        operation: FileOperation,
    },
    /// Outbound network access to `host`.
    Network {
        /// Target host name.
        host: String,
        /// Optional target port.
        #[serde(default, skip_serializing_if = "Option::is_none")]
        port: Option<u16>,
        /// Optional protocol label (e.g. `https`).
        #[serde(default, skip_serializing_if = "Option::is_none")]
        protocol: Option<String>,
    },
    /// Shell command execution.
    Shell {
        /// Command binary or builtin name.
        command: String,
        /// Arguments passed to the command.
        #[serde(default, skip_serializing_if = "Vec::is_empty")]
        args: Vec<String>,
    },
    /// Access to the named secret.
    Secret {
        /// Secret name.
        name: String,
    },
}

impl AccessRequest {
    /// Returns the rule kind governing this request.
    #[must_use]
    pub const fn kind(&self) -> RuleKind {
        match self {
            Self::File { .. } => RuleKind::File,
            Self::Network { .. } => RuleKind::Network,
            Self::Shell { .. } => RuleKind::Shell,
            Self::Secret { .. } => RuleKind::Secret,
        }
    }

    /// Returns a concise, human-readable label for audit entries.
    #[must_use]
    pub fn label(&self) -> String {
        match self {
            Self::File { path, operation } => format!("file {operation:?} `{path}`"),
            Self::Network { host, port, .. } => match port {
                Some(port) => format!("network `{host}:{port}`"),
                None => format!("network `{host}`"),
            },
            Self::Shell { command, .. } => format!("shell `{command}`"),
            Self::Secret { name } => format!("secret `{name}`"),
        }
    }
}

/// Matcher fields for one rule kind.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum RuleMatcher {
    /// Matches filesystem requests.
    File {
        /// Path globs; any match qualifies.
        path_patterns: Vec<String>,
        /// Operations the rule is scoped to; empty means all operations.
        #[serde(default, skip_serializing_if = "Vec::is_empty")]
        operations: Vec<FileOperation>,
    },
    /// Matches network requests.
    Network {
        /// Host globs; any match qualifies.
        host_patterns: Vec<String>,
        /// When non-empty, the request port must appear here.
        #[serde(default, skip_serializing_if = "Vec::is_empty")]
        ports: Vec<u16>,
        /// When non-empty, the request protocol must appear here.
        #[serde(default, skip_serializing_if = "Vec::is_empty")]
        protocols: Vec<String>,
    },
    /// Matches shell requests.
    Shell {
        /// Command globs, tested against the bare command and the full
        /// command line.
        command_patterns: Vec<String>,
    },
    /// Matches secret requests.
    Secret {
        /// Secret-name globs; any match qualifies.
        name_patterns: Vec<String>,
    },
}

impl RuleMatcher {
    /// Returns the rule kind this matcher applies to.
    #[must_use]
    pub const fn kind(&self) -> RuleKind {
        match self {
            Self::File { .. } => RuleKind::File,
            Self::Network { .. } => RuleKind::Network,
            Self::Shell { .. } => RuleKind::Shell,
            Self::Secret { .. } => RuleKind::Secret,
        }
    }

    pub(crate) fn matches(
        &self,
        request: &AccessRequest,
        home: Option<&str>,
    ) -> PolicyResult<bool> {
        match (self, request) {
            (
                Self::File {
                    path_patterns,
                    operations,
                },
                AccessRequest::File { path, operation },
            ) => {
                if !operations.is_empty() && !operations.contains(operation) {
                    return Ok(false);
                }
                match_any(path, path_patterns, home)
            }
            (
                Self::Network {
                    host_patterns,
                    ports,
                    protocols,
                },
                AccessRequest::Network {
                    host,
                    port,
                    protocol,
                },
            ) => {
                if !ports.is_empty() {
                    let Some(port) = port else { return Ok(false) };
                    if !ports.contains(port) {
                        return Ok(false);
                    }
                }
                if !protocols.is_empty() {
                    let Some(protocol) = protocol else {
                        return Ok(false);
                    };
                    if !protocols.iter().any(|p| p.eq_ignore_ascii_case(protocol)) {
                        return Ok(false);
                    }
                }
                match_any(host, host_patterns, home)
            }
            (
                Self::Shell { command_patterns },
                AccessRequest::Shell { command, args },
            ) => {
                if match_any(command, command_patterns, home)? {
                    return Ok(true);
                }
                if args.is_empty() {
                    return Ok(false);
                }
                let full = format!("{command} {}", args.join(" "));
                match_any(&full, command_patterns, home)
            }
            (Self::Secret { name_patterns }, AccessRequest::Secret { name }) => {
                match_any(name, name_patterns, home)
            }
            _ => Ok(false),
        }
    }
}

/// A single prioritized policy rule.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PolicyRule {
    id: String,
    priority: i32,
    enabled: bool,
    decision: PolicyDecision,
    matcher: RuleMatcher,
}

impl PolicyRule {
    /// Creates an enabled rule with the supplied matcher and decision.
    ///
    /// # Errors
    ///
    /// Returns [`crate::PolicyError::InvalidRule`] when the id is empty.
    pub fn new(
        id: impl Into<String>,
        priority: i32,
        matcher: RuleMatcher,
        decision: PolicyDecision,
    ) -> PolicyResult<Self> {
        let id = id.into();
        if id.trim().is_empty() {
            return Err(crate::PolicyError::InvalidRule("rule id cannot be empty"));
        }
        Ok(Self {
            id,
            priority,
            enabled: true,
            decision,
            matcher,
        })
    }

    /// Returns the rule identifier.
    #[must_use]
    pub fn id(&self) -> &str {
        &self.id
    }

    /// Returns the rule priority; higher evaluates first.
    #[must_use]
    pub const fn priority(&self) -> i32 {
        self.priority
    }

    /// Returns whether the rule participates in evaluation.
    #[must_use]
    pub const fn enabled(&self) -> bool {
        self.enabled
    }

    /// Enables or disables the rule.
    pub fn set_enabled(&mut self, enabled: bool) {
        self.enabled = enabled;
    }

    /// Returns the decision attached to the rule.
    #[must_use]
    pub const fn decision(&self) -> PolicyDecision {
        self.decision
    }

    /// Returns the rule kind.
    #[must_use]
    pub const fn kind(&self) -> RuleKind {
        self.matcher.kind()
    }

    pub(crate) fn matches(
        &self,
        request: &AccessRequest,
        home: Option<&str>,
    ) -> PolicyResult<bool> {
        self.matcher.matches(request, home)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn file_matcher_honors_operations() {
        let matcher = RuleMatcher::File {
            path_patterns: vec!["/workspace/**".into()],
            operations: vec![FileOperation::Read],
        };
        let read = AccessRequest::File {
            path: "/workspace/a.txt".into(),
            operation: FileOperation::Read,
        };
        let write = AccessRequest::File {
            path: "/workspace/a.txt".into(),
            operation: FileOperation::Write,
        };
        assert!(matcher.matches(&read, None).unwrap());
        assert!(!matcher.matches(&write, None).unwrap());
    }

    #[test]
    fn network_matcher_requires_listed_port() {
        let matcher = RuleMatcher::Network {
            host_patterns: vec!["*.example.com".into()],
            ports: vec![443],
            protocols: vec![],
        };
        let https = AccessRequest::Network {
            host: "api.example.com".into(),
            port: Some(443),
            protocol: Some("https".into()),
        };
        let odd_port = AccessRequest::Network {
            host: "api.example.com".into(),
            port: Some(8443),
            protocol: None,
        };
        let portless = AccessRequest::Network {
            host: "api.example.com".into(),
            port: None,
            protocol: None,
        };
        assert!(matcher.matches(&https, None).unwrap());
        assert!(!matcher.matches(&odd_port, None).unwrap());
        assert!(!matcher.matches(&portless, None).unwrap());
    }

    #[test]
    fn shell_matcher_covers_full_command_line() {
        let matcher = RuleMatcher::Shell {
            command_patterns: vec!["git status*".into()],
        };
        let matching = AccessRequest::Shell {
            command: "git".into(),
            args: vec!["status".into()],
        };
        let other = AccessRequest::Shell {
            command: "git".into(),
            args: vec!["push".into()],
        };
        assert!(matcher.matches(&matching, None).unwrap());
        assert!(!matcher.matches(&other, None).unwrap());
    }

    #[test]
    fn kind_mismatch_never_matches() {
        let matcher = RuleMatcher::Secret {
            name_patterns: vec!["*".into()],
        };
        let request = AccessRequest::Shell {
            command: "ls".into(),
            args: vec![],
        };
        assert!(!matcher.matches(&request, None).unwrap());
    }
}
