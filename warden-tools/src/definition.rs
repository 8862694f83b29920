//! Tool metadata and handler contracts.

use std::future::Future;
use std::pin::Pin;
use std::sync::Arc;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};
use warden_capability::RequiredPermission;
use warden_policy::AccessRequest;

use crate::{ToolError, ToolResult};

/// Caller-visible result of a tool invocation.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ToolOutcome {
    /// Whether the invocation succeeded.
    pub success: bool,
    /// Tool output on success.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub content: Option<Value>,
    /// Error message on failure.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
    /// Implementation-defined metadata.
    #[serde(default, skip_serializing_if = "Map::is_empty")]
    pub metadata: Map<String, Value>,
    /// Wall-clock execution time.
    pub execution_time_ms: u64,
}

impl ToolOutcome {
    pub(crate) fn success(content: Value, execution_time_ms: u64) -> Self {
        Self {
            success: true,
            content: Some(content),
            error: None,
            metadata: Map::new(),
            execution_time_ms,
        }
    }

    pub(crate) fn failure(error: impl Into<String>, execution_time_ms: u64) -> Self {
        Self {
            success: false,
            content: None,
            error: Some(error.into()),
            metadata: Map::new(),
            execution_time_ms,
        }
    }
}

/// Trait implemented by tool handlers.
#[async_trait]
pub trait ToolHandler: Send + Sync {
    /// Invokes the tool with JSON arguments, returning JSON output.
    async fn invoke(&self, args: Value) -> ToolResult<Value>;
}

/// Boxed future produced by closure-based tool handlers.
pub type HandlerFuture = Pin<Box<dyn Future<Output = ToolResult<Value>> + Send>>;

#[async_trait]
impl<F> ToolHandler for F
where
    F: Send + Sync + Fn(Value) -> HandlerFuture,
{
    async fn invoke(&self, args: Value) -> ToolResult<Value> {
        (self)(args).await
    }
}

/// A registered tool: metadata, declared permissions, and handler.
#[derive(Clone)]
pub struct ToolDefinition {
    id: String,
    name: String,
    description: String,
    category: String,
    tags: Vec<String>,
    required_permissions: Vec<RequiredPermission>,
    requires_confirmation: bool,
    resource_extractor: Option<fn(&Value) -> Option<AccessRequest>>,
    handler: Arc<dyn ToolHandler>,
}

impl std::fmt::Debug for ToolDefinition {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ToolDefinition")
            .field("id", &self.id)
            .field("category", &self.category)
            .field("requires_confirmation", &self.requires_confirmation)
            .finish_non_exhaustive()
    }
}

impl ToolDefinition {
    /// Creates a definition after validating id and name.
    ///
    /// # Errors
    ///
    /// Returns [`ToolError::InvalidDefinition`] when the id or name is
    /// blank.
    pub fn new(
        id: impl Into<String>,
        name: impl Into<String>,
        handler: Arc<dyn ToolHandler>,
    ) -> ToolResult<Self> {
        let id = id.into();
        if id.trim().is_empty() {
            return Err(ToolError::InvalidDefinition {
                reason: "tool id cannot be empty".into(),
            });
        }
        let name = name.into();
        if name.trim().is_empty() {
            return Err(ToolError::InvalidDefinition {
                reason: "tool name cannot be empty".into(),
            });
        }
        Ok(Self {
            id,
            name,
            description: String::new(),
            category: "general".into(),
            tags: Vec::new(),
            required_permissions: Vec::new(),
            requires_confirmation: false,
            resource_extractor: None,
            handler,
        })
    }

    /// Sets the human-readable description.
    #[must_use]
    pub fn with_description(mut self, description: impl Into<String>) -> Self {
        self.description = description.into();
        self
    }

    /// Sets the category label.
    #[must_use]
    pub fn with_category(mut self, category: impl Into<String>) -> Self {
        self.category = category.into();
        self
    }

    /// Replaces the tag list.
    #[must_use]
    pub fn with_tags<I, S>(mut self, tags: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.tags = tags.into_iter().map(Into::into).collect();
        self
    }

    /// Declares required permissions from `category.action[resource]`
    /// strings.
    ///
    /// # Errors
    ///
    /// Returns a parse error for malformed strings.
    pub fn with_required_permissions<I, S>(mut self, permissions: I) -> ToolResult<Self>
    where
        I: IntoIterator<Item = S>,
        S: AsRef<str>,
    {
        let mut parsed = Vec::new();
        for permission in permissions {
            parsed.push(RequiredPermission::parse(permission.as_ref()).map_err(|err| {
                ToolError::InvalidDefinition {
                    reason: err.to_string(),
                }
            })?);
        }
        self.required_permissions = parsed;
        Ok(self)
    }

    /// Marks the tool as requiring explicit approval on every invocation.
    #[must_use]
    pub const fn with_confirmation(mut self) -> Self {
        self.requires_confirmation = true;
        self
    }

    /// Attaches a structural resource extractor consulted by the policy
    /// gate (file path, URL host, shell command).
    #[must_use]
    pub fn with_resource_extractor(
        mut self,
        extractor: fn(&Value) -> Option<AccessRequest>,
    ) -> Self {
        self.resource_extractor = Some(extractor);
        self
    }

    /// Returns the tool identifier.
    #[must_use]
    pub fn id(&self) -> &str {
        &self.id
    }

    /// Returns the human-readable name.
    #[must_use]
    pub fn name(&self) -> &str {
        &self.name
    }

    /// Returns the description.
    #[must_use]
    pub fn description(&self) -> &str {
        &self.description
    }

    /// Returns the category label.
    #[must_use]
    pub fn category(&self) -> &str {
        &self.category
    }

    /// Returns the tags.
    #[must_use]
    pub fn tags(&self) -> &[String] {
        &self.tags
    }

    /// Returns the declared permission requirements.
    #[must_use]
    pub fn required_permissions(&self) -> &[RequiredPermission] {
        &self.required_permissions
    }

    /// Returns whether every invocation needs explicit approval.
    #[must_use]
    pub const fn requires_confirmation(&self) -> bool {
        self.requires_confirmation
    }

    /// Extracts the structural resource for the given arguments.
    #[must_use]
    pub fn extract_resource(&self, args: &Value) -> Option<AccessRequest> {
        self.resource_extractor.and_then(|extract| extract(args))
    }

    pub(crate) fn handler(&self) -> Arc<dyn ToolHandler> {
        Arc::clone(&self.handler)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn echo_handler() -> Arc<dyn ToolHandler> {
        Arc::new(|args: Value| -> HandlerFuture { Box::pin(async move { Ok(args) }) })
    }

    #[test]
    fn definition_validates_labels() {
        assert!(ToolDefinition::new("", "Echo", echo_handler()).is_err());
        assert!(ToolDefinition::new("builtin:echo", " ", echo_handler()).is_err());
        let definition = ToolDefinition::new("builtin:echo", "Echo", echo_handler()).unwrap();
        assert_eq!(definition.id(), "builtin:echo");
        assert!(!definition.requires_confirmation());
    }

    #[test]
    fn permission_strings_are_parsed() {
        let definition = ToolDefinition::new("builtin:file_read", "Read file", echo_handler())
            .unwrap()
            .with_required_permissions(["filesystem.read"])
            .unwrap();
        assert_eq!(definition.required_permissions().len(), 1);
        assert_eq!(definition.required_permissions()[0].category, "filesystem");

        let err = ToolDefinition::new("t", "T", echo_handler())
            .unwrap()
            .with_required_permissions(["notdotted"])
            .expect_err("malformed permission");
        assert!(matches!(err, ToolError::InvalidDefinition { .. }));
    }

    #[tokio::test]
    async fn handler_round_trip() {
        let definition = ToolDefinition::new("builtin:echo", "Echo", echo_handler()).unwrap();
        let output = definition.handler().invoke(json!({"x": 1})).await.unwrap();
        assert_eq!(output, json!({"x": 1}));
    }
}
