//! Error types for kiro-auth

use std::io;
use std::time::Duration;

use thiserror::Error;

/// Result type alias for kiro-auth
pub type Result<T> = std::result::Result<T, Error>;

/// kiro-auth errors
#[derive(Error, Debug)]
pub enum Error {
    /// Configuration error
    #[error("Configuration error: {0}")]
    Config(String),

    /// Callback receiver could not bind its listener
    #[error("Failed to bind callback receiver on {addr}: {reason}")]
    CallbackBind {
        /// Address we tried to bind
        addr: String,
        /// Underlying failure
        reason: String,
    },

    /// No callback arrived before the deadline
    #[error("No OAuth callback received within {0:?}")]
    CallbackTimeout(Duration),

    /// The provider redirected back with an OAuth error
    #[error("Authorization failed: {error} - {description}")]
    Authorization {
        /// OAuth error code (e.g. `access_denied`)
        error: String,
        /// Human-readable description, if the provider sent one
        description: String,
    },

    /// Callback state did not match the one we issued
    #[error("State mismatch - callback does not belong to this authorization attempt")]
    StateMismatch,

    /// Account id not present in the store
    #[error("Account not found: {0}")]
    AccountNotFound(String),

    /// Account store error
    #[error("Account store error: {0}")]
    Store(String),

    /// IO error
    #[error("IO error: {0}")]
    Io(#[from] io::Error),

    /// JSON error
    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),

    /// HTTP error
    #[error("HTTP error: {0}")]
    Http(#[from] reqwest::Error),

    /// Internal error
    #[error("Internal error: {0}")]
    Internal(String),
}

impl Error {
    /// Whether the operator can recover by pasting the code by hand
    #[must_use]
    pub fn allows_manual_fallback(&self) -> bool {
        matches!(self, Self::CallbackTimeout(_) | Self::CallbackBind { .. })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn timeout_and_bind_allow_manual_fallback() {
        assert!(Error::CallbackTimeout(Duration::from_secs(1)).allows_manual_fallback());
        assert!(
            Error::CallbackBind {
                addr: "127.0.0.1:3128".to_string(),
                reason: "in use".to_string(),
            }
            .allows_manual_fallback()
        );
        assert!(!Error::StateMismatch.allows_manual_fallback());
    }

    #[test]
    fn authorization_error_display() {
        let err = Error::Authorization {
            error: "access_denied".to_string(),
            description: "User cancelled".to_string(),
        };
        assert_eq!(
            err.to_string(),
            "Authorization failed: access_denied - User cancelled"
        );
    }
}
