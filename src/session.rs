//! Authenticated session handed over by the auth provider.

use std::fmt;

/// Signed-in user and the access token used for backend calls.
#[derive(Clone, PartialEq, Eq)]
pub struct Session {
    /// Auth provider user id.
    pub user_id: String,

    /// Bearer token for the backend.
    pub access_token: String,
}

impl Session {
    /// Create a session.
    pub fn new(user_id: impl Into<String>, access_token: impl Into<String>) -> Self {
        Self {
            user_id: user_id.into(),
            access_token: access_token.into(),
        }
    }

    /// Both the user id and the token are present.
    pub fn is_complete(&self) -> bool {
        !self.user_id.is_empty() && !self.access_token.is_empty()
    }

    /// Short, non-reversible token identifier for logs.
    pub fn token_fingerprint(&self) -> String {
        token_fingerprint(&self.access_token)
    }
}

// Tokens never reach logs; Debug prints the fingerprint instead.
impl fmt::Debug for Session {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Session")
            .field("user_id", &self.user_id)
            .field("access_token", &self.token_fingerprint())
            .finish()
    }
}

/// First 12 hex chars of the token's SHA-256.
pub fn token_fingerprint(token: &str) -> String {
    use sha2::{Digest, Sha256};
    let hash = Sha256::digest(token.as_bytes());
    let mut hex = hex::encode(hash);
    hex.truncate(12);
    hex
}
