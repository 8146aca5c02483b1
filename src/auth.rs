use sha2::{Digest, Sha256};
use uuid::Uuid;

/// Generate a fresh bearer token (UUID v4, hex without dashes = 32 chars).
///
/// The token is shown once at issue time; only its hash is persisted in
/// `api_tokens`, so a leaked database does not leak credentials.
pub fn generate_token() -> String {
    Uuid::new_v4().to_string().replace('-', "")
}

/// SHA-256 hex digest of a bearer token, as stored in `api_tokens.token_hash`.
pub fn hash_token(token: &str) -> String {
    let mut hasher = Sha256::new();
    hasher.update(token.as_bytes());
    hex::encode(hasher.finalize())
}

/// Extract the token from an `Authorization: Bearer <token>` header value.
pub fn bearer_token(header_value: &str) -> Option<&str> {
    header_value.strip_prefix("Bearer ").filter(|t| !t.is_empty())
}
