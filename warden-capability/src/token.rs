//! Signed capability token representation.

use chrono::{DateTime, Utc};
use hmac::{Hmac, Mac};
use serde::{Deserialize, Serialize};
use sha2::Sha256;
use subtle::ConstantTimeEq;
use warden_primitives::{AgentId, TokenId};

use crate::Permission;

type HmacSha256 = Hmac<Sha256>;

/// A signed, time-bounded grant of permissions to an agent.
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct CapabilityToken {
    id: TokenId,
    owner: AgentId,
    permissions: Vec<Permission>,
    purpose: String,
    issued_at: DateTime<Utc>,
    expires_at: DateTime<Utc>,
    delegatable: bool,
    signature: String,
}

impl CapabilityToken {
    pub(crate) fn issue(
        owner: AgentId,
        permissions: Vec<Permission>,
        purpose: String,
        issued_at: DateTime<Utc>,
        expires_at: DateTime<Utc>,
        delegatable: bool,
        secret: &[u8],
    ) -> Self {
        let id = TokenId::random();
        let signature = sign(
            secret,
            &canonical(id, owner, &permissions, &purpose, issued_at, expires_at, delegatable),
        );
        Self {
            id,
            owner,
            permissions,
            purpose,
            issued_at,
            expires_at,
            delegatable,
            signature,
        }
    }

    /// Returns the token identifier.
    #[must_use]
    pub const fn id(&self) -> TokenId {
        self.id
    }

    /// Returns the owning agent.
    #[must_use]
    pub const fn owner(&self) -> AgentId {
        self.owner
    }

    /// Returns the granted permissions.
    #[must_use]
    pub fn permissions(&self) -> &[Permission] {
        &self.permissions
    }

    /// Returns the purpose string supplied at grant time.
    #[must_use]
    pub fn purpose(&self) -> &str {
        &self.purpose
    }

    /// Returns the issuance timestamp.
    #[must_use]
    pub const fn issued_at(&self) -> DateTime<Utc> {
        self.issued_at
    }

    /// Returns the expiry timestamp.
    #[must_use]
    pub const fn expires_at(&self) -> DateTime<Utc> {
        self.expires_at
    }

    /// Returns whether the owner may delegate this grant.
    #[must_use]
    pub const fn delegatable(&self) -> bool {
        self.delegatable
    }

    /// Returns `true` when the token has expired at `now`.
    #[must_use]
    pub fn expired_at(&self, now: DateTime<Utc>) -> bool {
        now >= self.expires_at
    }

    /// Recomputes the signature and compares it in constant time.
    #[must_use]
    pub fn verify(&self, secret: &[u8]) -> bool {
        let expected = sign(
            secret,
            &canonical(
                self.id,
                self.owner,
                &self.permissions,
                &self.purpose,
                self.issued_at,
                self.expires_at,
                self.delegatable,
            ),
        );
        expected.as_bytes().ct_eq(self.signature.as_bytes()).into()
    }
}

fn canonical(
    id: TokenId,
    owner: AgentId,
    permissions: &[Permission],
    purpose: &str,
    issued_at: DateTime<Utc>,
    expires_at: DateTime<Utc>,
    delegatable: bool,
) -> String {
    let mut fragments: Vec<String> = permissions.iter().map(Permission::canonical).collect();
    fragments.sort();
    format!(
        "{id}|{owner}|{purpose}|{}|{}|{delegatable}|{}",
        issued_at.timestamp_millis(),
        expires_at.timestamp_millis(),
        fragments.join(";"),
    )
}

fn sign(secret: &[u8], canonical: &str) -> String {
    let mut mac = HmacSha256::new_from_slice(secret).expect("hmac accepts any key length");
    mac.update(canonical.as_bytes());
    hex::encode(mac.finalize().into_bytes())
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Duration;

    fn token(secret: &[u8]) -> CapabilityToken {
        let now = Utc::now();
        CapabilityToken::issue(
            AgentId::random(),
            vec![Permission::new("llm", ["execute"]).unwrap()],
            "unit test".into(),
            now,
            now + Duration::minutes(5),
            false,
            secret,
        )
    }

    #[test]
    fn verify_accepts_untampered_token() {
        let secret = b"super-secret";
        let token = token(secret);
        assert!(token.verify(secret));
    }

    #[test]
    fn verify_rejects_wrong_secret() {
        let token = token(b"super-secret");
        assert!(!token.verify(b"other-secret"));
    }

    #[test]
    fn verify_rejects_tampered_fields() {
        let secret = b"super-secret";
        let mut token = token(secret);
        token.expires_at = token.expires_at + Duration::hours(24);
        assert!(!token.verify(secret));
    }

    #[test]
    fn expiry_is_inclusive_of_deadline() {
        let secret = b"s";
        let token = token(secret);
        assert!(!token.expired_at(token.issued_at()));
        assert!(token.expired_at(token.expires_at()));
    }
}
