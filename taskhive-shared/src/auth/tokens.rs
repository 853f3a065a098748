//! One-time tokens for email verification and password reset
//!
//! Tokens are 32 random bytes, hex-encoded (64 characters), and are sent to
//! the user by email. Only the SHA-256 hex digest is stored, so a database
//! leak does not expose usable links. Refresh tokens are stored the same way.

use chrono::{DateTime, Duration, Utc};
use rand::RngCore;
use sha2::{Digest, Sha256};

/// Number of random bytes in a one-time token
const TOKEN_BYTES: usize = 32;

/// How long verification and reset links stay valid
pub const ONE_TIME_TOKEN_TTL_MINUTES: i64 = 60;

/// A generated one-time token
#[derive(Debug, Clone)]
pub struct OneTimeToken {
    /// Plaintext token to send to the user; never persisted
    pub token: String,

    /// SHA-256 hex digest to persist
    pub hash: String,

    pub expires_at: DateTime<Utc>,
}

/// Generates a token valid for [`ONE_TIME_TOKEN_TTL_MINUTES`]
pub fn generate_token() -> OneTimeToken {
    let mut bytes = [0u8; TOKEN_BYTES];
    rand::thread_rng().fill_bytes(&mut bytes);

    let token = hex::encode(bytes);
    let hash = hash_token(&token);

    OneTimeToken {
        token,
        hash,
        expires_at: Utc::now() + Duration::minutes(ONE_TIME_TOKEN_TTL_MINUTES),
    }
}

/// Hex-encoded SHA-256 digest of a token
pub fn hash_token(token: &str) -> String {
    let mut hasher = Sha256::new();
    hasher.update(token.as_bytes());
    hex::encode(hasher.finalize())
}

/// Compares a presented token with a stored digest in constant time
pub fn token_matches(token: &str, stored_hash: &str) -> bool {
    let computed = hash_token(token);
    let (a, b) = (computed.as_bytes(), stored_hash.as_bytes());

    if a.len() != b.len() {
        return false;
    }

    a.iter().zip(b).fold(0u8, |acc, (x, y)| acc | (x ^ y)) == 0
}
