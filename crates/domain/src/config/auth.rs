use serde::{Deserialize, Serialize};

/// Bearer-token table. Tokens appear only as SHA-256 digests; resolving a
/// presented token is constant-time (see `crate::auth`).
#[derive(Debug, Clone, Serialize, Deserialize, Default)]
pub struct AuthConfig {
    /// Client API tokens. Empty = open dev mode.
    #[serde(default)]
    pub tokens: Vec<ApiTokenEntry>,
    /// Digest guarding the admin endpoints. Absent = open dev mode.
    #[serde(default)]
    pub admin_token_sha256: Option<String>,
}

/// One accepted API token and the identity it resolves to.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ApiTokenEntry {
    /// Role granted to callers presenting this token.
    pub role: String,
    /// Optional stable user id for audit and rate-limit scoping.
    #[serde(default)]
    pub user: Option<String>,
    /// Hex-encoded SHA-256 of the token.
    pub sha256: String,
}
