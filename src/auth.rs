//! Principals, roles, and the token-verification seam.
//!
//! Token issuance lives outside this crate: an external issuer hands clients
//! an opaque bearer token, and a [`TokenVerifier`] resolves it to a
//! [`Principal`] carrying the user id and role claim. Authorization policy is
//! centralized here: workflows call `require_admin` at the service boundary,
//! and the return-request storage atomic calls `require_owner` against the
//! borrow it inspects. Nothing compares roles or user ids ad hoc.

use std::collections::HashMap;

use async_trait::async_trait;
use parking_lot::RwLock;
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::error::{Error, Result};

/// Unique identifier for a user, as claimed by the token issuer.
pub type UserId = Uuid;

/// Role claim attached to a verified token.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Role {
    Student,
    Admin,
}

/// A verified caller: user id plus role claim.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Principal {
    pub user_id: UserId,
    pub role: Role,
}

impl Principal {
    pub fn is_admin(&self) -> bool {
        self.role == Role::Admin
    }

    pub fn require_admin(&self) -> Result<()> {
        if self.is_admin() {
            Ok(())
        } else {
            Err(Error::NotAdmin)
        }
    }

    pub fn require_owner(&self, owner: UserId) -> Result<()> {
        if self.user_id == owner {
            Ok(())
        } else {
            Err(Error::NotOwner)
        }
    }
}

/// Seam to the external token issuer.
///
/// Tokens are opaque to this crate; a verifier resolves them to a principal
/// or rejects them. Production deployments plug in a client for their issuer;
/// the in-process [`StaticTokenVerifier`] serves the demo binary and tests.
#[async_trait]
pub trait TokenVerifier: Send + Sync {
    async fn verify(&self, token: &str) -> Option<Principal>;
}

/// Verifier backed by a fixed token table.
#[derive(Default)]
pub struct StaticTokenVerifier {
    tokens: RwLock<HashMap<String, Principal>>,
}

impl StaticTokenVerifier {
    pub fn new() -> Self {
        Self::default()
    }

    /// Register a token for a principal, replacing any previous entry.
    pub fn insert(&self, token: impl Into<String>, principal: Principal) {
        self.tokens.write().insert(token.into(), principal);
    }
}

#[async_trait]
impl TokenVerifier for StaticTokenVerifier {
    async fn verify(&self, token: &str) -> Option<Principal> {
        self.tokens.read().get(token).copied()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn student() -> Principal {
        Principal {
            user_id: Uuid::new_v4(),
            role: Role::Student,
        }
    }

    #[test]
    fn admin_gate() {
        let admin = Principal {
            user_id: Uuid::new_v4(),
            role: Role::Admin,
        };
        assert!(admin.require_admin().is_ok());
        assert!(matches!(student().require_admin(), Err(Error::NotAdmin)));
    }

    #[test]
    fn ownership_gate() {
        let p = student();
        assert!(p.require_owner(p.user_id).is_ok());
        assert!(matches!(
            p.require_owner(Uuid::new_v4()),
            Err(Error::NotOwner)
        ));
    }

    #[tokio::test]
    async fn static_verifier_resolves_known_tokens() {
        let verifier = StaticTokenVerifier::new();
        let p = student();
        verifier.insert("alice-token", p);

        assert_eq!(verifier.verify("alice-token").await, Some(p));
        assert_eq!(verifier.verify("unknown").await, None);
    }
}
