//! In-memory capability store with revocation tracking.

use std::collections::{HashMap, HashSet};
use std::sync::RwLock;

use chrono::{DateTime, Duration, Utc};
use tracing::{debug, info};
use warden_primitives::{AgentId, TokenId};

use crate::{CapabilityError, CapabilityResult, CapabilityToken, Permission};

const DEFAULT_MAX_DURATION_MS: i64 = 24 * 60 * 60 * 1000;

/// Parameters for issuing a token.
#[derive(Debug, Clone)]
pub struct GrantRequest {
    /// Agent the grant is issued to.
    pub owner: AgentId,
    /// Permissions carried by the token.
    pub permissions: Vec<Permission>,
    /// Free-form purpose recorded with the token.
    pub purpose: String,
    /// Requested validity in milliseconds; clamped to the store maximum.
    pub duration_ms: i64,
    /// Whether the owner may delegate the grant.
    pub delegatable: bool,
}

/// Issues, verifies, lists, and revokes capability tokens.
///
/// Reads dominate (every dispatcher gate consults the store), so state
/// lives behind a read/write lock with short critical sections.
pub struct CapabilityStore {
    secret: Vec<u8>,
    max_duration_ms: i64,
    inner: RwLock<StoreState>,
}

#[derive(Default)]
struct StoreState {
    tokens: HashMap<TokenId, CapabilityToken>,
    by_owner: HashMap<AgentId, HashSet<TokenId>>,
    revoked: HashSet<TokenId>,
}

impl std::fmt::Debug for CapabilityStore {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let state = self.inner.read().expect("capability store poisoned");
        f.debug_struct("CapabilityStore")
            .field("tokens", &state.tokens.len())
            .field("revoked", &state.revoked.len())
            .finish_non_exhaustive()
    }
}

impl CapabilityStore {
    /// Creates a store signing with the supplied shared secret.
    #[must_use]
    pub fn new(secret: impl Into<Vec<u8>>) -> Self {
        Self {
            secret: secret.into(),
            max_duration_ms: DEFAULT_MAX_DURATION_MS,
            inner: RwLock::new(StoreState::default()),
        }
    }

    /// Overrides the maximum token validity window.
    #[must_use]
    pub fn with_max_duration_ms(mut self, max_duration_ms: i64) -> Self {
        self.max_duration_ms = max_duration_ms.max(1);
        self
    }

    /// Issues a signed token and records it in the per-agent index.
    ///
    /// The requested duration is clamped to the store maximum.
    ///
    /// # Errors
    ///
    /// Returns [`CapabilityError::InvalidPermission`] when the request
    /// carries no permissions.
    ///
    /// # Panics
    ///
    /// Panics if the store lock has been poisoned.
    pub fn grant(&self, request: GrantRequest) -> CapabilityResult<CapabilityToken> {
        if request.permissions.is_empty() {
            return Err(CapabilityError::InvalidPermission {
                reason: "grant must carry at least one permission".into(),
            });
        }

        let now = Utc::now();
        let duration_ms = request.duration_ms.clamp(1, self.max_duration_ms);
        let expires_at = now + Duration::milliseconds(duration_ms);
        let token = CapabilityToken::issue(
            request.owner,
            request.permissions,
            request.purpose,
            now,
            expires_at,
            request.delegatable,
            &self.secret,
        );

        let mut state = self.inner.write().expect("capability store poisoned");
        state
            .by_owner
            .entry(request.owner)
            .or_default()
            .insert(token.id());
        state.tokens.insert(token.id(), token.clone());
        info!(owner = %request.owner, token = %token.id(), "capability granted");
        Ok(token)
    }

    /// Returns `true` iff some live token owned by `agent_id` covers
    /// `(category, action, resource)`.
    ///
    /// A token is live when its signature verifies, it has not expired,
    /// and it is not in the revocation set.
    ///
    /// # Errors
    ///
    /// Propagates resource glob compilation failures.
    ///
    /// # Panics
    ///
    /// Panics if the store lock has been poisoned.
    pub fn check(
        &self,
        agent_id: AgentId,
        category: &str,
        action: &str,
        resource: Option<&str>,
    ) -> CapabilityResult<bool> {
        let now = Utc::now();
        let state = self.inner.read().expect("capability store poisoned");
        let Some(owned) = state.by_owner.get(&agent_id) else {
            return Ok(false);
        };

        for token_id in owned {
            if state.revoked.contains(token_id) {
                continue;
            }
            let Some(token) = state.tokens.get(token_id) else {
                continue;
            };
            if token.expired_at(now) || !token.verify(&self.secret) {
                continue;
            }
            for permission in token.permissions() {
                if permission.covers(category, action, resource)? {
                    return Ok(true);
                }
            }
        }

        debug!(agent_id = %agent_id, category, action, "capability check missed");
        Ok(false)
    }

    /// Lists the live (non-revoked) tokens owned by `agent_id`.
    ///
    /// # Panics
    ///
    /// Panics if the store lock has been poisoned.
    #[must_use]
    pub fn list_tokens(&self, agent_id: AgentId) -> Vec<CapabilityToken> {
        let state = self.inner.read().expect("capability store poisoned");
        state
            .by_owner
            .get(&agent_id)
            .map(|owned| {
                owned
                    .iter()
                    .filter(|id| !state.revoked.contains(id))
                    .filter_map(|id| state.tokens.get(id).cloned())
                    .collect()
            })
            .unwrap_or_default()
    }

    /// Revokes a single token.
    ///
    /// # Errors
    ///
    /// Returns [`CapabilityError::UnknownToken`] when the token id was
    /// never issued.
    ///
    /// # Panics
    ///
    /// Panics if the store lock has been poisoned.
    pub fn revoke(&self, token_id: TokenId) -> CapabilityResult<()> {
        let mut state = self.inner.write().expect("capability store poisoned");
        if !state.tokens.contains_key(&token_id) {
            return Err(CapabilityError::UnknownToken);
        }
        state.revoked.insert(token_id);
        info!(token = %token_id, "capability revoked");
        Ok(())
    }

    /// Revokes every token owned by `agent_id`, returning the count.
    ///
    /// # Panics
    ///
    /// Panics if the store lock has been poisoned.
    pub fn revoke_all(&self, agent_id: AgentId) -> usize {
        let mut state = self.inner.write().expect("capability store poisoned");
        let owned: Vec<TokenId> = state
            .by_owner
            .get(&agent_id)
            .map(|set| set.iter().copied().collect())
            .unwrap_or_default();
        let mut revoked = 0;
        for token_id in owned {
            if state.revoked.insert(token_id) {
                revoked += 1;
            }
        }
        if revoked > 0 {
            info!(agent_id = %agent_id, revoked, "capabilities revoked");
        }
        revoked
    }

    /// Drops expired tokens and their revocation entries.
    ///
    /// # Panics
    ///
    /// Panics if the store lock has been poisoned.
    pub fn sweep_expired(&self) -> usize {
        let now = Utc::now();
        let mut state = self.inner.write().expect("capability store poisoned");
        let expired: Vec<TokenId> = state
            .tokens
            .values()
            .filter(|token| token.expired_at(now))
            .map(CapabilityToken::id)
            .collect();
        for token_id in &expired {
            if let Some(token) = state.tokens.remove(token_id) {
                if let Some(owned) = state.by_owner.get_mut(&token.owner()) {
                    owned.remove(token_id);
                }
            }
            state.revoked.remove(token_id);
        }
        expired.len()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn store() -> CapabilityStore {
        CapabilityStore::new(b"test-secret".to_vec())
    }

    fn grant(store: &CapabilityStore, owner: AgentId, resource: Option<&str>) -> CapabilityToken {
        let mut permission = Permission::new("filesystem", ["read"]).unwrap();
        if let Some(resource) = resource {
            permission = permission.with_resource(resource);
        }
        store
            .grant(GrantRequest {
                owner,
                permissions: vec![permission],
                purpose: "test".into(),
                duration_ms: 60_000,
                delegatable: false,
            })
            .unwrap()
    }

    #[test]
    fn grant_then_check() {
        let store = store();
        let owner = AgentId::random();
        grant(&store, owner, Some("/workspace/**"));

        assert!(store
            .check(owner, "filesystem", "read", Some("/workspace/a.txt"))
            .unwrap());
        assert!(!store
            .check(owner, "filesystem", "read", Some("/etc/passwd"))
            .unwrap());
        assert!(!store.check(owner, "filesystem", "write", None).unwrap());
        assert!(!store
            .check(AgentId::random(), "filesystem", "read", None)
            .unwrap());
    }

    #[test]
    fn grant_revoke_check() {
        let store = store();
        let owner = AgentId::random();
        let token = grant(&store, owner, None);

        assert!(store.check(owner, "filesystem", "read", None).unwrap());
        store.revoke(token.id()).unwrap();
        assert!(!store.check(owner, "filesystem", "read", None).unwrap());
        assert!(store.list_tokens(owner).is_empty());
    }

    #[test]
    fn revoke_all_clears_owner() {
        let store = store();
        let owner = AgentId::random();
        grant(&store, owner, None);
        grant(&store, owner, Some("/workspace/**"));

        assert_eq!(store.revoke_all(owner), 2);
        assert!(!store.check(owner, "filesystem", "read", None).unwrap());
        // Second call finds nothing new.
        assert_eq!(store.revoke_all(owner), 0);
    }

    #[test]
    fn revoke_unknown_token_errors() {
        let store = store();
        let err = store.revoke(TokenId::random()).expect_err("unknown token");
        assert!(matches!(err, CapabilityError::UnknownToken));
    }

    #[test]
    fn duration_is_clamped() {
        let store = CapabilityStore::new(b"s".to_vec()).with_max_duration_ms(1000);
        let owner = AgentId::random();
        let token = store
            .grant(GrantRequest {
                owner,
                permissions: vec![Permission::new("llm", ["execute"]).unwrap()],
                purpose: "clamp".into(),
                duration_ms: 10_000_000,
                delegatable: false,
            })
            .unwrap();
        let lifetime = token.expires_at() - token.issued_at();
        assert!(lifetime <= Duration::milliseconds(1000));
    }

    #[test]
    fn sweep_drops_expired_tokens() {
        let store = CapabilityStore::new(b"s".to_vec()).with_max_duration_ms(1);
        let owner = AgentId::random();
        let token = store
            .grant(GrantRequest {
                owner,
                permissions: vec![Permission::new("llm", ["execute"]).unwrap()],
                purpose: "expire".into(),
                duration_ms: 1,
                delegatable: false,
            })
            .unwrap();
        std::thread::sleep(std::time::Duration::from_millis(5));
        assert!(!store.check(owner, "llm", "execute", None).unwrap());
        assert_eq!(store.sweep_expired(), 1);
        assert!(store.list_tokens(owner).is_empty());
        let _ = token;
    }
}
