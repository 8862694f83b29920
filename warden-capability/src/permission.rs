//! Permission descriptors carried by capability tokens.

use std::collections::BTreeSet;

use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};

use crate::{CapabilityError, CapabilityResult};

const MAX_CATEGORY_LEN: usize = 32;
const MAX_ACTION_LEN: usize = 48;

fn validate_label(label: &str, what: &str, max: usize) -> CapabilityResult<()> {
    if label.is_empty() || label.len() > max {
        return Err(CapabilityError::InvalidPermission {
            reason: format!("{what} must be 1..={max} characters"),
        });
    }
    if !label
        .chars()
        .all(|c| matches!(c, 'a'..='z' | '0'..='9' | '_' | '-'))
    {
        return Err(CapabilityError::InvalidPermission {
            reason: format!("{what} must contain lowercase alphanumeric, dash, or underscore"),
        });
    }
    Ok(())
}

/// A single grant of actions within a capability category, optionally
/// scoped to a resource glob.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct Permission {
    category: String,
    actions: BTreeSet<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    resource: Option<String>,
    #[serde(default, skip_serializing_if = "Map::is_empty")]
    constraints: Map<String, Value>,
}

impl Permission {
    /// Creates a permission after validating category and action labels.
    ///
    /// # Errors
    ///
    /// Returns [`CapabilityError::InvalidPermission`] when the category or
    /// any action fails validation, or no actions were supplied.
    pub fn new<I, S>(category: impl Into<String>, actions: I) -> CapabilityResult<Self>
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        let category = category.into();
        validate_label(&category, "category", MAX_CATEGORY_LEN)?;

        let mut validated = BTreeSet::new();
        for action in actions {
            let action = action.into();
            validate_label(&action, "action", MAX_ACTION_LEN)?;
            validated.insert(action);
        }
        if validated.is_empty() {
            return Err(CapabilityError::InvalidPermission {
                reason: "at least one action must be specified".into(),
            });
        }

        Ok(Self {
            category,
            actions: validated,
            resource: None,
            constraints: Map::new(),
        })
    }

    /// Scopes the permission to a resource glob.
    #[must_use]
    pub fn with_resource(mut self, resource: impl Into<String>) -> Self {
        self.resource = Some(resource.into());
        self
    }

    /// Attaches a constraint entry.
    #[must_use]
    pub fn with_constraint(mut self, key: impl Into<String>, value: Value) -> Self {
        self.constraints.insert(key.into(), value);
        self
    }

    /// Returns the capability category.
    #[must_use]
    pub fn category(&self) -> &str {
        &self.category
    }

    /// Returns the granted actions.
    #[must_use]
    pub fn actions(&self) -> &BTreeSet<String> {
        &self.actions
    }

    /// Returns the optional resource glob.
    #[must_use]
    pub fn resource(&self) -> Option<&str> {
        self.resource.as_deref()
    }

    /// Returns attached constraints.
    #[must_use]
    pub fn constraints(&self) -> &Map<String, Value> {
        &self.constraints
    }

    /// Returns `true` when this permission covers `(category, action)` and,
    /// if a resource glob is present, the glob matches `resource`.
    ///
    /// A permission without a resource glob covers any resource; a request
    /// without a resource is covered regardless of the glob.
    ///
    /// # Errors
    ///
    /// Propagates glob compilation failures.
    pub fn covers(
        &self,
        category: &str,
        action: &str,
        resource: Option<&str>,
    ) -> CapabilityResult<bool> {
        if self.category != category || !self.actions.contains(action) {
            return Ok(false);
        }
        match (&self.resource, resource) {
            (None, _) | (Some(_), None) => Ok(true),
            (Some(glob), Some(resource)) => {
                Ok(warden_policy::match_pattern(resource, glob, None)?)
            }
        }
    }

    /// Stable serialization fragment folded into the token signature.
    pub(crate) fn canonical(&self) -> String {
        let actions: Vec<&str> = self.actions.iter().map(String::as_str).collect();
        format!(
            "{}:{}:{}",
            self.category,
            actions.join(","),
            self.resource.as_deref().unwrap_or("*")
        )
    }
}

/// A parsed `category.action` or `category.action[resource]` requirement
/// string, as declared by tool definitions.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct RequiredPermission {
    /// Capability category.
    pub category: String,
    /// Required action within the category.
    pub action: String,
    /// Optional concrete resource the requirement applies to.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub resource: Option<String>,
}

impl RequiredPermission {
    /// Parses a requirement string.
    ///
    /// # Errors
    ///
    /// Returns [`CapabilityError::InvalidPermissionString`] when the input
    /// is not of the form `category.action` or `category.action[resource]`.
    pub fn parse(input: &str) -> CapabilityResult<Self> {
        let (head, resource) = match input.split_once('[') {
            Some((head, rest)) => {
                let resource = rest.strip_suffix(']').ok_or(
                    CapabilityError::InvalidPermissionString {
                        input: input.to_owned(),
                        reason: "unterminated resource bracket",
                    },
                )?;
                (head, Some(resource.to_owned()))
            }
            None => (input, None),
        };

        let (category, action) =
            head.split_once('.')
                .ok_or(CapabilityError::InvalidPermissionString {
                    input: input.to_owned(),
                    reason: "expected `category.action`",
                })?;
        if category.is_empty() || action.is_empty() {
            return Err(CapabilityError::InvalidPermissionString {
                input: input.to_owned(),
                reason: "category and action cannot be empty",
            });
        }

        Ok(Self {
            category: category.to_owned(),
            action: action.to_owned(),
            resource,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn covers_matching_action_and_resource() {
        let permission = Permission::new("filesystem", ["read"])
            .unwrap()
            .with_resource("/workspace/**");
        assert!(permission
            .covers("filesystem", "read", Some("/workspace/a.txt"))
            .unwrap());
        assert!(!permission
            .covers("filesystem", "read", Some("/etc/passwd"))
            .unwrap());
        assert!(!permission.covers("filesystem", "write", None).unwrap());
        assert!(!permission.covers("network", "read", None).unwrap());
    }

    #[test]
    fn unscoped_permission_covers_any_resource() {
        let permission = Permission::new("llm", ["execute"]).unwrap();
        assert!(permission.covers("llm", "execute", None).unwrap());
        assert!(permission.covers("llm", "execute", Some("anything")).unwrap());
    }

    #[test]
    fn rejects_invalid_labels() {
        assert!(Permission::new("LLM", ["execute"]).is_err());
        assert!(Permission::new("llm", ["no spaces"]).is_err());
        assert!(Permission::new("llm", Vec::<String>::new()).is_err());
    }

    #[test]
    fn parses_requirement_strings() {
        let plain = RequiredPermission::parse("llm.execute").unwrap();
        assert_eq!(plain.category, "llm");
        assert_eq!(plain.action, "execute");
        assert!(plain.resource.is_none());

        let scoped = RequiredPermission::parse("filesystem.read[/workspace/**]").unwrap();
        assert_eq!(scoped.resource.as_deref(), Some("/workspace/**"));

        assert!(RequiredPermission::parse("nodot").is_err());
        assert!(RequiredPermission::parse("a.b[unterminated").is_err());
    }

    #[test]
    fn canonical_is_order_stable() {
        let a = Permission::new("tools", ["invoke", "list"]).unwrap();
        let b = Permission::new("tools", ["list", "invoke"]).unwrap();
        assert_eq!(a.canonical(), b.canonical());
    }
}
