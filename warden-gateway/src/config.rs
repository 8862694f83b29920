//! Gateway configuration.

use serde::Deserialize;
use warden_kernel::HealthThresholds;
use warden_primitives::AgentLimits;

/// An allow-list that is either a wildcard or an explicit set.
#[derive(Debug, Clone, Deserialize, Default)]
#[serde(untagged)]
pub enum ListSetting {
    /// Everything is allowed.
    #[default]
    #[serde(skip)]
    Unset,
    /// Explicit entries; the string `"*"` means allow-all.
    Entries(Vec<String>),
}

impl ListSetting {
    /// Returns `true` when the setting allows everything.
    #[must_use]
    pub fn is_wildcard(&self) -> bool {
        match self {
            Self::Unset => false,
            Self::Entries(entries) => entries.iter().any(|e| e == "*"),
        }
    }

    /// Returns the explicit entries, empty for unset or wildcard lists.
    #[must_use]
    pub fn entries(&self) -> &[String] {
        match self {
            Self::Unset => &[],
            Self::Entries(entries) => {
                if self.is_wildcard() {
                    &[]
                } else {
                    entries
                }
            }
        }
    }

    /// Returns `true` when the list was configured at all.
    #[must_use]
    pub const fn is_configured(&self) -> bool {
        matches!(self, Self::Entries(_))
    }
}

/// Top-level gateway configuration.
#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct GatewayConfig {
    /// Shared secret clients present in the `auth` frame.
    pub auth_token: String,
    /// HMAC secret for capability token signatures.
    pub capability_secret: String,
    /// Cluster node identifier; unset disables cluster fan-out.
    pub node_id: Option<String>,
    /// Rejects permissive policy defaults and missing secrets.
    pub production_hardening: bool,
    /// Fail initialization when the persistent store is unreachable.
    pub requires_persistent_store: bool,
    /// Fail initialization when the vector store is unreachable.
    pub require_vector_store: bool,
    /// Encrypt memory payloads; disables vector search.
    pub memory_encryption: bool,
    /// Paths agents may touch through built-in file tools.
    pub allowed_paths: ListSetting,
    /// Hosts agents may reach through network tools.
    pub allowed_domains: ListSetting,
    /// Commands agents may run through the shell tool.
    pub allowed_commands: ListSetting,
    /// Default per-agent memory cap in MiB.
    pub memory_limit_mb: u64,
    /// Default limits applied to manifests that do not declare their own.
    pub default_limits: AgentLimits,
    /// Health monitor thresholds.
    pub health: HealthThresholds,
    /// Maximum inbound frame size in bytes.
    pub max_frame_bytes: usize,
    /// Per-connection inbound message budget per second.
    pub messages_per_second: u32,
    /// Seconds a terminal A2A task is retained.
    pub a2a_task_ttl_secs: u64,
    /// Listen address for the combined WS/HTTP surface.
    pub listen_addr: String,
}

impl Default for GatewayConfig {
    fn default() -> Self {
        Self {
            auth_token: String::new(),
            capability_secret: String::new(),
            node_id: None,
            production_hardening: false,
            requires_persistent_store: false,
            require_vector_store: false,
            memory_encryption: false,
            allowed_paths: ListSetting::Unset,
            allowed_domains: ListSetting::Unset,
            allowed_commands: ListSetting::Unset,
            memory_limit_mb: 512,
            default_limits: AgentLimits::default(),
            health: HealthThresholds::default(),
            max_frame_bytes: 256 * 1024,
            messages_per_second: 50,
            a2a_task_ttl_secs: 900,
            listen_addr: "127.0.0.1:8787".into(),
        }
    }
}

impl GatewayConfig {
    /// Loads overrides from `WARDEN_*` environment variables.
    #[must_use]
    pub fn from_env() -> Self {
        let mut config = Self::default();
        if let Ok(token) = std::env::var("WARDEN_AUTH_TOKEN") {
            config.auth_token = token;
        }
        if let Ok(secret) = std::env::var("WARDEN_CAPABILITY_SECRET") {
            config.capability_secret = secret;
        }
        if let Ok(node) = std::env::var("WARDEN_NODE_ID") {
            config.node_id = Some(node);
        }
        if let Ok(value) = std::env::var("WARDEN_PRODUCTION") {
            config.production_hardening = value == "1" || value.eq_ignore_ascii_case("true");
        }
        if let Ok(addr) = std::env::var("WARDEN_LISTEN_ADDR") {
            config.listen_addr = addr;
        }
        if let Ok(paths) = std::env::var("WARDEN_ALLOWED_PATHS") {
            config.allowed_paths =
                ListSetting::Entries(paths.split(',').map(str::to_owned).collect());
        }
        if let Ok(domains) = std::env::var("WARDEN_ALLOWED_DOMAINS") {
            config.allowed_domains =
                ListSetting::Entries(domains.split(',').map(str::to_owned).collect());
        }
        if let Ok(commands) = std::env::var("WARDEN_ALLOWED_COMMANDS") {
            config.allowed_commands =
                ListSetting::Entries(commands.split(',').map(str::to_owned).collect());
        }
        config
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn wildcard_detection() {
        let wildcard = ListSetting::Entries(vec!["*".into()]);
        assert!(wildcard.is_wildcard());
        assert!(wildcard.entries().is_empty());

        let explicit = ListSetting::Entries(vec!["/workspace/**".into()]);
        assert!(!explicit.is_wildcard());
        assert_eq!(explicit.entries().len(), 1);

        assert!(!ListSetting::Unset.is_configured());
    }
}
