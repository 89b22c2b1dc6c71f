//! Access token issuance.
//!
//! Sharing tokens are ephemeral (one per share grant); private tokens are persistent and owned by
//! exactly one file. Both are 256-bit, hex-encoded and URL-safe.

use ring::digest;
use ring::rand::{SecureRandom, SystemRandom};
use thiserror::Error;

const TOKEN_BYTES: usize = 32;

#[derive(Debug, Error)]
pub enum TokenError {
    #[error("System randomness source failed")]
    Rng,
}

#[derive(Clone)]
pub struct TokenIssuer {
    rng: SystemRandom,
}

impl Default for TokenIssuer {
    fn default() -> Self {
        Self::new()
    }
}

impl TokenIssuer {
    pub fn new() -> Self {
        Self {
            rng: SystemRandom::new(),
        }
    }

    /// A fresh sharing token: hex of 32 random bytes.
    pub fn new_share_token(&self) -> Result<String, TokenError> {
        Ok(hex::encode(self.random_bytes()?))
    }

    /// A fresh private download token. The seed (typically the owner id) is mixed into the
    /// digest for auditability; the entropy comes entirely from the random bytes.
    pub fn new_private_token(&self, seed: &str) -> Result<String, TokenError> {
        let random = self.random_bytes()?;

        let mut ctx = digest::Context::new(&digest::SHA256);
        ctx.update(seed.as_bytes());
        ctx.update(&random);
        Ok(hex::encode(ctx.finish().as_ref()))
    }

    fn random_bytes(&self) -> Result<[u8; TOKEN_BYTES], TokenError> {
        let mut buf = [0u8; TOKEN_BYTES];
        self.rng.fill(&mut buf).map_err(|_| TokenError::Rng)?;
        Ok(buf)
    }
}

/// Shortened token for log fields. Never log a full token.
pub fn redact(token: &str) -> &str {
    let end = token
        .char_indices()
        .nth(8)
        .map(|(i, _)| i)
        .unwrap_or(token.len());
    &token[..end]
}
