//! Tool lookup, gating, and capped execution.

use std::collections::HashMap;
use std::sync::{Arc, RwLock};
use std::time::{Duration, Instant};

use async_trait::async_trait;
use serde_json::Value;
use tracing::{debug, warn};
use warden_capability::CapabilityStore;
use warden_policy::{PolicyDecision, PolicySet};
use warden_primitives::{AgentId, AgentManifest};

use crate::definition::{ToolDefinition, ToolOutcome};
use crate::{ToolError, ToolResult};

const MCP_PREFIX: &str = "mcp:";

/// Transport to external tool servers hosting `mcp:`-prefixed tools.
#[async_trait]
pub trait ToolServerTransport: Send + Sync {
    /// Invokes `tool` on `server` with JSON arguments.
    async fn invoke(&self, server: &str, tool: &str, args: Value) -> ToolResult<Value>;
}

/// Execution caps applied to every invocation.
#[derive(Debug, Clone, Copy)]
pub struct InvokeCaps {
    /// Wall-clock ceiling for handler execution.
    pub timeout: Duration,
    /// Ceiling on the serialized output size.
    pub max_output_bytes: usize,
}

impl Default for InvokeCaps {
    fn default() -> Self {
        Self {
            timeout: Duration::from_secs(30),
            max_output_bytes: 1024 * 1024,
        }
    }
}

/// One invocation request.
#[derive(Debug, Clone)]
pub struct InvokeRequest {
    /// Identifier of the tool to invoke.
    pub tool_id: String,
    /// JSON arguments.
    pub args: Value,
}

/// Caller identity and gate hooks for an invocation.
pub struct InvokeContext<'a> {
    /// The calling agent.
    pub agent_id: AgentId,
    /// The caller's manifest (tool and tool-server allow-lists).
    pub manifest: &'a AgentManifest,
    /// Capability store consulted for required permissions.
    pub capabilities: &'a CapabilityStore,
    /// Policy set consulted for structural resources, when configured.
    pub policy: Option<&'a PolicySet>,
}

fn structural_resource_str(resource: Option<&warden_policy::AccessRequest>) -> Option<&str> {
    match resource? {
        warden_policy::AccessRequest::File { path, .. } => Some(path),
        warden_policy::AccessRequest::Network { host, .. } => Some(host),
        warden_policy::AccessRequest::Shell { command, .. } => Some(command),
        warden_policy::AccessRequest::Secret { name } => Some(name),
    }
}

/// Registry storing tool definitions keyed by id.
pub struct ToolRegistry {
    tools: RwLock<HashMap<String, ToolDefinition>>,
    transport: Option<Arc<dyn ToolServerTransport>>,
    caps: InvokeCaps,
}

impl std::fmt::Debug for ToolRegistry {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let tools = self.tools.read().expect("tool registry poisoned");
        let ids: Vec<&String> = tools.keys().collect();
        f.debug_struct("ToolRegistry")
            .field("registered", &ids)
            .field("transport", &self.transport.is_some())
            .finish()
    }
}

impl Default for ToolRegistry {
    fn default() -> Self {
        Self::new(InvokeCaps::default())
    }
}

impl ToolRegistry {
    /// Creates an empty registry with the supplied execution caps.
    #[must_use]
    pub fn new(caps: InvokeCaps) -> Self {
        Self {
            tools: RwLock::new(HashMap::new()),
            transport: None,
            caps,
        }
    }

    /// Attaches the transport used for `mcp:` tool ids.
    #[must_use]
    pub fn with_transport(mut self, transport: Arc<dyn ToolServerTransport>) -> Self {
        self.transport = Some(transport);
        self
    }

    /// Registers a tool definition.
    ///
    /// # Errors
    ///
    /// Returns [`ToolError::DuplicateTool`] when the id is already present.
    ///
    /// # Panics
    ///
    /// Panics if the registry lock has been poisoned.
    pub fn register(&self, definition: ToolDefinition) -> ToolResult<()> {
        let mut tools = self.tools.write().expect("tool registry poisoned");
        let id = definition.id().to_owned();
        if tools.contains_key(&id) {
            return Err(ToolError::DuplicateTool { id });
        }
        tools.insert(id, definition);
        Ok(())
    }

    /// Returns the definition for `id`.
    ///
    /// # Panics
    ///
    /// Panics if the registry lock has been poisoned.
    #[must_use]
    pub fn get(&self, id: &str) -> Option<ToolDefinition> {
        let tools = self.tools.read().expect("tool registry poisoned");
        tools.get(id).cloned()
    }

    /// Lists definitions the caller's manifest allows, sorted by id.
    ///
    /// # Panics
    ///
    /// Panics if the registry lock has been poisoned.
    #[must_use]
    pub fn list_for(&self, manifest: &AgentManifest) -> Vec<ToolDefinition> {
        let tools = self.tools.read().expect("tool registry poisoned");
        let mut listed: Vec<ToolDefinition> = tools
            .values()
            .filter(|definition| manifest.allows_tool(definition.id()))
            .cloned()
            .collect();
        listed.sort_by(|a, b| a.id().cmp(b.id()));
        listed
    }

    /// Invokes a tool through the full gate sequence: lookup, allow-list,
    /// capability coverage, policy consult, capped execution.
    ///
    /// Gate failures surface as errors; handler failures surface as a
    /// failed [`ToolOutcome`].
    ///
    /// # Errors
    ///
    /// Returns the corresponding [`ToolError`] for each failed gate.
    pub async fn invoke(
        &self,
        request: InvokeRequest,
        ctx: &InvokeContext<'_>,
    ) -> ToolResult<ToolOutcome> {
        if let Some(rest) = request.tool_id.strip_prefix(MCP_PREFIX) {
            return self.invoke_external(&request.tool_id, rest, request.args, ctx).await;
        }

        let definition = self.get(&request.tool_id).ok_or_else(|| ToolError::UnknownTool {
            id: request.tool_id.clone(),
        })?;
        if !ctx.manifest.allows_tool(definition.id()) {
            return Err(ToolError::NotAllowed {
                id: definition.id().to_owned(),
            });
        }

        let structural = definition.extract_resource(&request.args);
        for requirement in definition.required_permissions() {
            // A requirement without its own resource is checked against the
            // structural resource of this invocation, so a capability
            // scoped to a path glob cannot be satisfied by an argument
            // outside it.
            let resource = requirement
                .resource
                .as_deref()
                .or_else(|| structural_resource_str(structural.as_ref()));
            let covered = ctx
                .capabilities
                .check(ctx.agent_id, &requirement.category, &requirement.action, resource)
                .map_err(|err| ToolError::execution(err.to_string()))?;
            if !covered {
                return Err(ToolError::PermissionDenied {
                    permission: format!("{}.{}", requirement.category, requirement.action),
                });
            }
        }

        if let (Some(policy), Some(resource)) = (ctx.policy, structural) {
            let evaluation = policy
                .evaluate(&resource)
                .map_err(|err| ToolError::execution(err.to_string()))?;
            if evaluation.decision != PolicyDecision::Allow {
                warn!(
                    agent_id = %ctx.agent_id,
                    tool = definition.id(),
                    resource = %resource.label(),
                    "policy refused tool resource"
                );
                return Err(ToolError::PolicyBlocked {
                    resource: resource.label(),
                });
            }
        }

        self.execute(&definition, request.args).await
    }

    async fn execute(&self, definition: &ToolDefinition, args: Value) -> ToolResult<ToolOutcome> {
        let started = Instant::now();
        let handler = definition.handler();
        let result = tokio::time::timeout(self.caps.timeout, handler.invoke(args)).await;
        let elapsed_ms = started.elapsed().as_millis() as u64;

        let output = match result {
            Err(_) => {
                return Err(ToolError::Timeout {
                    id: definition.id().to_owned(),
                    timeout_ms: self.caps.timeout.as_millis() as u64,
                })
            }
            Ok(Err(err)) => {
                debug!(tool = definition.id(), error = %err, "tool handler failed");
                return Ok(ToolOutcome::failure(err.to_string(), elapsed_ms));
            }
            Ok(Ok(output)) => output,
        };

        let serialized_len = serde_json::to_vec(&output).map(|b| b.len()).unwrap_or(0);
        if serialized_len > self.caps.max_output_bytes {
            return Ok(ToolOutcome::failure(
                format!(
                    "output of {serialized_len} bytes exceeds cap of {} bytes",
                    self.caps.max_output_bytes
                ),
                elapsed_ms,
            ));
        }

        Ok(ToolOutcome::success(output, elapsed_ms))
    }

    async fn invoke_external(
        &self,
        full_id: &str,
        rest: &str,
        args: Value,
        ctx: &InvokeContext<'_>,
    ) -> ToolResult<ToolOutcome> {
        let (server, tool) = rest.split_once(':').ok_or_else(|| ToolError::UnknownTool {
            id: full_id.to_owned(),
        })?;
        if !ctx.manifest.allows_tool_server(server) {
            return Err(ToolError::NotAllowed {
                id: full_id.to_owned(),
            });
        }
        let transport = self.transport.as_ref().ok_or_else(|| ToolError::UnknownTool {
            id: full_id.to_owned(),
        })?;

        let started = Instant::now();
        let result =
            tokio::time::timeout(self.caps.timeout, transport.invoke(server, tool, args)).await;
        let elapsed_ms = started.elapsed().as_millis() as u64;
        match result {
            Err(_) => Err(ToolError::Timeout {
                id: full_id.to_owned(),
                timeout_ms: self.caps.timeout.as_millis() as u64,
            }),
            Ok(Err(err)) => Ok(ToolOutcome::failure(err.to_string(), elapsed_ms)),
            Ok(Ok(output)) => Ok(ToolOutcome::success(output, elapsed_ms)),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::definition::HandlerFuture;
    use serde_json::json;
    use warden_capability::{GrantRequest, Permission};
    use warden_primitives::TrustLevel;

    fn echo_definition() -> ToolDefinition {
        let handler = Arc::new(|args: Value| -> HandlerFuture { Box::pin(async move { Ok(args) }) });
        ToolDefinition::new("builtin:echo", "Echo", handler)
            .unwrap()
            .with_required_permissions(["tools.invoke"])
            .unwrap()
    }

    fn manifest(tools: &[&str]) -> AgentManifest {
        AgentManifest::builder("caller")
            .name("Caller")
            .unwrap()
            .version("1.0")
            .unwrap()
            .allowed_tools(tools.iter().copied())
            .allowed_tool_servers(["search"])
            .trust_level(TrustLevel::SemiAutonomous)
            .build()
            .unwrap()
    }

    fn capabilities(agent: AgentId) -> CapabilityStore {
        let store = CapabilityStore::new(b"secret".to_vec());
        store
            .grant(GrantRequest {
                owner: agent,
                permissions: vec![Permission::new("tools", ["invoke"]).unwrap()],
                purpose: "test".into(),
                duration_ms: 60_000,
                delegatable: false,
            })
            .unwrap();
        store
    }

    #[tokio::test]
    async fn invoke_happy_path() {
        let registry = ToolRegistry::default();
        registry.register(echo_definition()).unwrap();
        let agent = AgentId::random();
        let manifest = manifest(&["builtin:echo"]);
        let capabilities = capabilities(agent);
        let ctx = InvokeContext {
            agent_id: agent,
            manifest: &manifest,
            capabilities: &capabilities,
            policy: None,
        };

        let outcome = registry
            .invoke(
                InvokeRequest {
                    tool_id: "builtin:echo".into(),
                    args: json!({"msg": "hi"}),
                },
                &ctx,
            )
            .await
            .unwrap();
        assert!(outcome.success);
        assert_eq!(outcome.content, Some(json!({"msg": "hi"})));
    }

    #[tokio::test]
    async fn invoke_requires_allow_list() {
        let registry = ToolRegistry::default();
        registry.register(echo_definition()).unwrap();
        let agent = AgentId::random();
        let manifest = manifest(&[]);
        let capabilities = capabilities(agent);
        let ctx = InvokeContext {
            agent_id: agent,
            manifest: &manifest,
            capabilities: &capabilities,
            policy: None,
        };

        let err = registry
            .invoke(
                InvokeRequest {
                    tool_id: "builtin:echo".into(),
                    args: Value::Null,
                },
                &ctx,
            )
            .await
            .expect_err("not allow-listed");
        assert!(matches!(err, ToolError::NotAllowed { .. }));
    }

    #[tokio::test]
    async fn invoke_requires_capability() {
        let registry = ToolRegistry::default();
        registry.register(echo_definition()).unwrap();
        let agent = AgentId::random();
        let manifest = manifest(&["builtin:echo"]);
        // No grants in this store.
        let capabilities = CapabilityStore::new(b"secret".to_vec());
        let ctx = InvokeContext {
            agent_id: agent,
            manifest: &manifest,
            capabilities: &capabilities,
            policy: None,
        };

        let err = registry
            .invoke(
                InvokeRequest {
                    tool_id: "builtin:echo".into(),
                    args: Value::Null,
                },
                &ctx,
            )
            .await
            .expect_err("no capability");
        assert!(matches!(err, ToolError::PermissionDenied { .. }));
    }

    #[tokio::test]
    async fn unknown_tool_errors() {
        let registry = ToolRegistry::default();
        let agent = AgentId::random();
        let manifest = manifest(&["builtin:missing"]);
        let capabilities = capabilities(agent);
        let ctx = InvokeContext {
            agent_id: agent,
            manifest: &manifest,
            capabilities: &capabilities,
            policy: None,
        };

        let err = registry
            .invoke(
                InvokeRequest {
                    tool_id: "builtin:missing".into(),
                    args: Value::Null,
                },
                &ctx,
            )
            .await
            .expect_err("unknown tool");
        assert!(matches!(err, ToolError::UnknownTool { .. }));
    }

    #[tokio::test]
    async fn external_tools_require_server_allow_list() {
        struct EchoTransport;

        #[async_trait]
        impl ToolServerTransport for EchoTransport {
            async fn invoke(&self, server: &str, tool: &str, args: Value) -> ToolResult<Value> {
                Ok(json!({"server": server, "tool": tool, "args": args}))
            }
        }

        let registry = ToolRegistry::default().with_transport(Arc::new(EchoTransport));
        let agent = AgentId::random();
        let manifest = manifest(&[]);
        let capabilities = capabilities(agent);
        let ctx = InvokeContext {
            agent_id: agent,
            manifest: &manifest,
            capabilities: &capabilities,
            policy: None,
        };

        let outcome = registry
            .invoke(
                InvokeRequest {
                    tool_id: "mcp:search:web".into(),
                    args: json!({"q": "rust"}),
                },
                &ctx,
            )
            .await
            .unwrap();
        assert!(outcome.success);

        let err = registry
            .invoke(
                InvokeRequest {
                    tool_id: "mcp:other:web".into(),
                    args: Value::Null,
                },
                &ctx,
            )
            .await
            .expect_err("server not allowed");
        assert!(matches!(err, ToolError::NotAllowed { .. }));
    }

    #[tokio::test]
    async fn slow_handler_times_out() {
        let handler = Arc::new(|_args: Value| -> HandlerFuture {
            Box::pin(async move {
                tokio::time::sleep(Duration::from_millis(100)).await;
                Ok(Value::Null)
            })
        });
        let registry = ToolRegistry::new(InvokeCaps {
            timeout: Duration::from_millis(10),
            max_output_bytes: 1024,
        });
        registry
            .register(ToolDefinition::new("builtin:slow", "Slow", handler).unwrap())
            .unwrap();

        let agent = AgentId::random();
        let manifest = manifest(&["builtin:slow"]);
        let capabilities = capabilities(agent);
        let ctx = InvokeContext {
            agent_id: agent,
            manifest: &manifest,
            capabilities: &capabilities,
            policy: None,
        };

        let err = registry
            .invoke(
                InvokeRequest {
                    tool_id: "builtin:slow".into(),
                    args: Value::Null,
                },
                &ctx,
            )
            .await
            .expect_err("should time out");
        assert!(matches!(err, ToolError::Timeout { .. }));
    }
}
