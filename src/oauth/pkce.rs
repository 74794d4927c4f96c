//! PKCE (RFC 7636) verifier and challenge generation

use base64::{Engine as _, engine::general_purpose::URL_SAFE_NO_PAD};
use rand::{Rng, distr::Alphanumeric};
use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};

/// Shortest verifier RFC 7636 allows
pub const MIN_VERIFIER_LEN: usize = 43;
/// Longest verifier RFC 7636 allows
pub const MAX_VERIFIER_LEN: usize = 128;

/// How the code verifier is produced
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
#[serde(rename_all = "snake_case")]
pub enum VerifierStyle {
    /// Letters and digits, configurable length (what the desktop client sends)
    #[default]
    Alphanumeric,
    /// 32 random bytes, base64url encoded (43 characters)
    RandomBytes,
}

/// A code verifier and its S256 challenge.
///
/// Regenerate for every authorization attempt; never persist.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PkcePair {
    /// Secret sent with the token exchange
    pub verifier: String,
    /// `base64url_nopad(sha256(verifier))`, sent with the authorization request
    pub challenge: String,
}

impl PkcePair {
    /// Generate a fresh pair.
    ///
    /// `length` only applies to [`VerifierStyle::Alphanumeric`] and is clamped
    /// to the RFC 7636 range.
    #[must_use]
    pub fn generate(style: VerifierStyle, length: usize) -> Self {
        let verifier = match style {
            VerifierStyle::Alphanumeric => {
                let len = length.clamp(MIN_VERIFIER_LEN, MAX_VERIFIER_LEN);
                rand::rng()
                    .sample_iter(&Alphanumeric)
                    .take(len)
                    .map(char::from)
                    .collect()
            }
            VerifierStyle::RandomBytes => {
                let bytes: [u8; 32] = rand::rng().random();
                URL_SAFE_NO_PAD.encode(bytes)
            }
        };
        Self::from_verifier(verifier)
    }

    /// Rebuild the pair for a verifier produced earlier
    #[must_use]
    pub fn from_verifier(verifier: impl Into<String>) -> Self {
        let verifier = verifier.into();
        let challenge = challenge_for(&verifier);
        Self {
            verifier,
            challenge,
        }
    }

    /// Challenge method advertised alongside the challenge
    #[must_use]
    pub fn method(&self) -> &'static str {
        "S256"
    }
}

/// S256 challenge for a verifier
#[must_use]
pub fn challenge_for(verifier: &str) -> String {
    let digest = Sha256::digest(verifier.as_bytes());
    URL_SAFE_NO_PAD.encode(digest)
}
