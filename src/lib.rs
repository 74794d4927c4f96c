//! kiro-auth Library
//!
//! Sign-in tooling for Kiro accounts in the DroidGravity desktop manager.
//!
//! # Features
//!
//! - **PKCE**: RFC 7636 verifier/challenge pairs
//! - **Authorization URLs**: Cognito hosted UI and Kiro portal styles
//! - **Callback Receiver**: one-shot localhost listener with timeout
//! - **Token-Exchange Probe**: tries candidate endpoints and classifies each answer
//! - **Account Store**: the manager's `accounts.json` index plus per-account records
//! - **Log Scanner**: finds Kiro sign-in activity in the manager's logs

#![forbid(unsafe_code)]
#![warn(missing_docs)]

pub mod accounts;
pub mod cli;
pub mod config;
pub mod error;
pub mod logscan;
pub mod oauth;

pub use error::{Error, Result};

use tracing_subscriber::{EnvFilter, fmt, layer::SubscriberExt, util::SubscriberInitExt};

/// Setup tracing/logging. Output goes to stderr.
pub fn setup_tracing(level: &str, format: Option<&str>) -> Result<()> {
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(level));

    let subscriber = tracing_subscriber::registry().with(filter);

    match format {
        Some("json") => {
            subscriber
                .with(fmt::layer().json().with_writer(std::io::stderr))
                .try_init()
                .map_err(|e| Error::Internal(format!("Failed to install subscriber: {e}")))?;
        }
        _ => {
            subscriber
                .with(fmt::layer().with_writer(std::io::stderr))
                .try_init()
                .map_err(|e| Error::Internal(format!("Failed to install subscriber: {e}")))?;
        }
    }

    Ok(())
}
