//! Agent identity, authorization, and skill metadata.

use std::collections::{BTreeMap, BTreeSet};

use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::{AgentLimits, Error, TrustLevel};

const MAX_NAME_LEN: usize = 96;
const MAX_EXTERNAL_ID_LEN: usize = 64;
const MAX_SKILL_ID_LEN: usize = 64;

/// Describes an A2A skill an agent advertises to peers.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SkillDescriptor {
    id: String,
    name: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    input_schema: Option<Value>,
}

impl SkillDescriptor {
    /// Creates a skill descriptor after validating the identifier.
    ///
    /// # Errors
    ///
    /// Returns [`Error::InvalidSkill`] when the identifier is empty, too
    /// long, or the name is blank.
    pub fn new(id: impl Into<String>, name: impl Into<String>) -> crate::Result<Self> {
        let id = id.into();
        if id.is_empty() || id.len() > MAX_SKILL_ID_LEN {
            return Err(Error::InvalidSkill {
                id,
                reason: format!("identifier must be 1..={MAX_SKILL_ID_LEN} characters"),
            });
        }
        let name = name.into();
        if name.trim().is_empty() {
            return Err(Error::InvalidSkill {
                id,
                reason: "name cannot be empty".into(),
            });
        }
        Ok(Self {
            id,
            name,
            input_schema: None,
        })
    }

    /// Attaches a JSON-Schema document that inbound payloads must satisfy.
    #[must_use]
    pub fn with_input_schema(mut self, schema: Value) -> Self {
        self.input_schema = Some(schema);
        self
    }

    /// Returns the skill identifier.
    #[must_use]
    pub fn id(&self) -> &str {
        &self.id
    }

    /// Returns the human-readable skill name.
    #[must_use]
    pub fn name(&self) -> &str {
        &self.name
    }

    /// Returns the optional input schema.
    #[must_use]
    pub fn input_schema(&self) -> Option<&Value> {
        self.input_schema.as_ref()
    }
}

/// Identity, model selection, and authorization declared for an agent.
///
/// The manifest is supplied at spawn time and is immutable for the life of
/// the agent; mutable accounting state lives in the kernel registry.
#[derive(Clone, Debug, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct AgentManifest {
    external_id: String,
    name: String,
    version: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    preferred_model: Option<String>,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    allowed_tools: Vec<String>,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    allowed_tool_servers: Vec<String>,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    skills: Vec<SkillDescriptor>,
    #[serde(default, skip_serializing_if = "BTreeSet::is_empty")]
    allowed_skill_ids: BTreeSet<String>,
    #[serde(default)]
    trust_level: TrustLevel,
    /// Capability categories and the actions permitted within each.
    #[serde(default, skip_serializing_if = "BTreeMap::is_empty")]
    allowed_capabilities: BTreeMap<String, BTreeSet<String>>,
    #[serde(default)]
    limits: AgentLimits,
}

impl AgentManifest {
    /// Starts building an [`AgentManifest`].
    #[must_use]
    pub fn builder(external_id: impl Into<String>) -> AgentManifestBuilder {
        AgentManifestBuilder {
            external_id: external_id.into(),
            name: None,
            version: None,
            preferred_model: None,
            allowed_tools: Vec::new(),
            allowed_tool_servers: Vec::new(),
            skills: Vec::new(),
            allowed_skill_ids: BTreeSet::new(),
            trust_level: TrustLevel::default(),
            allowed_capabilities: BTreeMap::new(),
            limits: AgentLimits::default(),
        }
    }

    /// Returns the human-assigned external identifier.
    #[must_use]
    pub fn external_id(&self) -> &str {
        &self.external_id
    }

    /// Returns the display name.
    #[must_use]
    pub fn name(&self) -> &str {
        &self.name
    }

    /// Returns the manifest version string.
    #[must_use]
    pub fn version(&self) -> &str {
        &self.version
    }

    /// Returns the preferred model name, if declared.
    #[must_use]
    pub fn preferred_model(&self) -> Option<&str> {
        self.preferred_model.as_deref()
    }

    /// Returns the allow-list of tool identifiers.
    #[must_use]
    pub fn allowed_tools(&self) -> &[String] {
        &self.allowed_tools
    }

    /// Returns the allow-list of external tool-server names.
    #[must_use]
    pub fn allowed_tool_servers(&self) -> &[String] {
        &self.allowed_tool_servers
    }

    /// Returns the advertised A2A skills.
    #[must_use]
    pub fn skills(&self) -> &[SkillDescriptor] {
        &self.skills
    }

    /// Looks up a declared skill by identifier.
    #[must_use]
    pub fn skill(&self, id: &str) -> Option<&SkillDescriptor> {
        self.skills.iter().find(|s| s.id() == id)
    }

    /// Returns the skill ids this agent may invoke on peers.
    #[must_use]
    pub fn allowed_skill_ids(&self) -> &BTreeSet<String> {
        &self.allowed_skill_ids
    }

    /// Returns the declared trust tier.
    #[must_use]
    pub fn trust_level(&self) -> TrustLevel {
        self.trust_level
    }

    /// Returns the capability categories and actions the agent may be
    /// granted tokens for.
    #[must_use]
    pub fn allowed_capabilities(&self) -> &BTreeMap<String, BTreeSet<String>> {
        &self.allowed_capabilities
    }

    /// Returns the declared resource limits.
    #[must_use]
    pub fn limits(&self) -> AgentLimits {
        self.limits
    }

    /// Returns `true` when the manifest's tool allow-list contains `tool_id`.
    #[must_use]
    pub fn allows_tool(&self, tool_id: &str) -> bool {
        self.allowed_tools.iter().any(|t| t == tool_id)
    }

    /// Returns `true` when the manifest allows the named external tool server.
    #[must_use]
    pub fn allows_tool_server(&self, server: &str) -> bool {
        self.allowed_tool_servers.iter().any(|s| s == server)
    }
}

/// Builder for [`AgentManifest`].
#[derive(Debug)]
pub struct AgentManifestBuilder {
    external_id: String,
    name: Option<String>,
    version: Option<String>,
    preferred_model: Option<String>,
    allowed_tools: Vec<String>,
    allowed_tool_servers: Vec<String>,
    skills: Vec<SkillDescriptor>,
    allowed_skill_ids: BTreeSet<String>,
    trust_level: TrustLevel,
    allowed_capabilities: BTreeMap<String, BTreeSet<String>>,
    limits: AgentLimits,
}

impl AgentManifestBuilder {
    /// Sets the display name.
    ///
    /// # Errors
    ///
    /// Returns [`Error::InvalidManifest`] when the name is empty or too long.
    pub fn name(mut self, name: impl Into<String>) -> crate::Result<Self> {
        let name = name.into();
        if name.trim().is_empty() {
            return Err(Error::InvalidManifest {
                reason: "name cannot be empty".into(),
            });
        }
        if name.len() > MAX_NAME_LEN {
            return Err(Error::InvalidManifest {
                reason: format!("name length must be <= {MAX_NAME_LEN}"),
            });
        }
        self.name = Some(name);
        Ok(self)
    }

    /// Sets the manifest version string.
    ///
    /// # Errors
    ///
    /// Returns [`Error::InvalidManifest`] when the version string is empty.
    pub fn version(mut self, version: impl Into<String>) -> crate::Result<Self> {
        let version = version.into();
        if version.trim().is_empty() {
            return Err(Error::InvalidManifest {
                reason: "version cannot be empty".into(),
            });
        }
        self.version = Some(version);
        Ok(self)
    }

    /// Sets the preferred model name.
    #[must_use]
    pub fn preferred_model(mut self, model: impl Into<String>) -> Self {
        self.preferred_model = Some(model.into());
        self
    }

    /// Replaces the tool allow-list.
    #[must_use]
    pub fn allowed_tools<I, S>(mut self, tools: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.allowed_tools = tools.into_iter().map(Into::into).collect();
        self
    }

    /// Replaces the external tool-server allow-list.
    #[must_use]
    pub fn allowed_tool_servers<I, S>(mut self, servers: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.allowed_tool_servers = servers.into_iter().map(Into::into).collect();
        self
    }

    /// Adds an advertised A2A skill.
    #[must_use]
    pub fn add_skill(mut self, skill: SkillDescriptor) -> Self {
        self.skills.push(skill);
        self
    }

    /// Replaces the set of skill ids the agent may invoke on peers.
    #[must_use]
    pub fn allowed_skill_ids<I, S>(mut self, ids: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.allowed_skill_ids = ids.into_iter().map(Into::into).collect();
        self
    }

    /// Sets the trust tier.
    #[must_use]
    pub fn trust_level(mut self, level: TrustLevel) -> Self {
        self.trust_level = level;
        self
    }

    /// Grants a capability category with the supplied action set.
    #[must_use]
    pub fn allow_capability<I, S>(mut self, category: impl Into<String>, actions: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.allowed_capabilities
            .entry(category.into())
            .or_default()
            .extend(actions.into_iter().map(Into::into));
        self
    }

    /// Replaces the resource limits.
    #[must_use]
    pub fn limits(mut self, limits: AgentLimits) -> Self {
        self.limits = limits;
        self
    }

    /// Consumes the builder and produces the manifest.
    ///
    /// # Errors
    ///
    /// Returns [`Error::InvalidManifest`] if mandatory fields are missing,
    /// the external id fails validation, or declared skill ids collide.
    pub fn build(self) -> crate::Result<AgentManifest> {
        if self.external_id.is_empty() || self.external_id.len() > MAX_EXTERNAL_ID_LEN {
            return Err(Error::InvalidManifest {
                reason: format!("external id must be 1..={MAX_EXTERNAL_ID_LEN} characters"),
            });
        }

        let name = self.name.ok_or_else(|| Error::InvalidManifest {
            reason: "name must be provided".into(),
        })?;
        let version = self.version.ok_or_else(|| Error::InvalidManifest {
            reason: "version must be provided".into(),
        })?;

        let mut seen = BTreeSet::new();
        for skill in &self.skills {
            if !seen.insert(skill.id().to_owned()) {
                return Err(Error::InvalidManifest {
                    reason: format!("duplicate skill id `{}`", skill.id()),
                });
            }
        }

        Ok(AgentManifest {
            external_id: self.external_id,
            name,
            version,
            preferred_model: self.preferred_model,
            allowed_tools: self.allowed_tools,
            allowed_tool_servers: self.allowed_tool_servers,
            skills: self.skills,
            allowed_skill_ids: self.allowed_skill_ids,
            trust_level: self.trust_level,
            allowed_capabilities: self.allowed_capabilities,
            limits: self.limits,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn manifest() -> AgentManifest {
        AgentManifest::builder("worker-1")
            .name("Worker")
            .unwrap()
            .version("1.0.0")
            .unwrap()
            .preferred_model("sonnet-small")
            .allowed_tools(["builtin:echo"])
            .add_skill(
                SkillDescriptor::new("echo", "Echo")
                    .unwrap()
                    .with_input_schema(json!({"type": "object"})),
            )
            .trust_level(TrustLevel::SemiAutonomous)
            .allow_capability("llm", ["execute"])
            .build()
            .unwrap()
    }

    #[test]
    fn build_manifest_success() {
        let m = manifest();
        assert_eq!(m.external_id(), "worker-1");
        assert!(m.allows_tool("builtin:echo"));
        assert!(!m.allows_tool("builtin:shell_exec"));
        assert!(m.skill("echo").is_some());
        assert!(m.allowed_capabilities().contains_key("llm"));
    }

    #[test]
    fn duplicate_skills_rejected() {
        let err = AgentManifest::builder("dup")
            .name("Dup")
            .unwrap()
            .version("1.0")
            .unwrap()
            .add_skill(SkillDescriptor::new("s", "One").unwrap())
            .add_skill(SkillDescriptor::new("s", "Two").unwrap())
            .build()
            .expect_err("should fail");
        assert!(matches!(err, Error::InvalidManifest { .. }));
    }

    #[test]
    fn blank_name_rejected() {
        let err = AgentManifest::builder("x")
            .name("  ")
            .expect_err("blank name");
        assert!(matches!(err, Error::InvalidManifest { .. }));
    }
}
