//! Bearer-token resolution with constant-time comparison.
//!
//! Tokens are never stored in configuration; only their SHA-256 digests
//! are. Comparison hashes the presented token and compares digests, which
//! normalizes lengths so `ct_eq` always compares 32 bytes.

use sha2::{Digest, Sha256};
use subtle::ConstantTimeEq;

use crate::config::AuthConfig;
use crate::error::{Error, Result};

/// Identity resolved from a presented token.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ResolvedIdentity {
    pub role: String,
    pub user_id: Option<String>,
}

/// Constant-time comparison of a raw token against a hex-encoded SHA-256
/// digest.
pub fn token_matches_digest(token: &str, digest_hex: &str) -> bool {
    let Ok(expected) = hex::decode(digest_hex) else {
        return false;
    };
    if expected.len() != 32 {
        return false;
    }
    let actual = Sha256::digest(token.as_bytes());
    actual.as_slice().ct_eq(expected.as_slice()).into()
}

/// Hex-encoded SHA-256 digest of a token, for config generation and tests.
pub fn digest_hex(token: &str) -> String {
    hex::encode(Sha256::digest(token.as_bytes()))
}

/// Resolves bearer tokens to roles using the configured token table.
pub struct TokenAuthenticator {
    cfg: AuthConfig,
    default_role: String,
}

impl TokenAuthenticator {
    pub fn new(cfg: AuthConfig, default_role: impl Into<String>) -> Self {
        Self {
            cfg,
            default_role: default_role.into(),
        }
    }

    /// Whether client authentication is enforced at all. With no tokens
    /// configured the platform runs in open dev mode.
    pub fn enforced(&self) -> bool {
        !self.cfg.tokens.is_empty()
    }

    /// Resolve a presented token to an identity.
    ///
    /// * Dev mode (no tokens configured): any caller gets the default role.
    /// * Enforced mode: the token must match a configured digest.
    pub fn resolve(&self, token: Option<&str>) -> Result<ResolvedIdentity> {
        if !self.enforced() {
            return Ok(ResolvedIdentity {
                role: self.default_role.clone(),
                user_id: None,
            });
        }

        let token = token.ok_or_else(|| Error::Unauthorized("missing bearer token".into()))?;
        for entry in &self.cfg.tokens {
            if token_matches_digest(token, &entry.sha256) {
                return Ok(ResolvedIdentity {
                    role: entry.role.clone(),
                    user_id: entry.user.clone(),
                });
            }
        }
        Err(Error::Unauthorized("unknown bearer token".into()))
    }

    /// Check a presented token against the admin digest. With no admin
    /// digest configured, admin endpoints are open (dev mode).
    pub fn check_admin(&self, token: Option<&str>) -> Result<()> {
        let Some(expected) = &self.cfg.admin_token_sha256 else {
            return Ok(());
        };
        match token {
            Some(t) if token_matches_digest(t, expected) => Ok(()),
            _ => Err(Error::Unauthorized("invalid admin token".into())),
        }
    }
}
