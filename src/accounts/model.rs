//! Account record and index shapes

use std::fmt;

use chrono::Utc;
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};
use uuid::Uuid;

use crate::oauth::TokenSet;

/// Index format version written by this crate
pub const INDEX_VERSION: &str = "2.0";

/// Lifetime assumed when a token response omits `expires_in`
pub const DEFAULT_EXPIRES_IN: i64 = 3600;

/// Seconds before expiry at which a token counts as expired
const EXPIRY_SKEW_SECS: i64 = 60;

/// External service an account is linked to
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, Default)]
#[serde(rename_all = "lowercase")]
pub enum Provider {
    /// Records written before the provider field existed
    #[default]
    Gemini,
    /// Kiro
    Kiro,
}

impl fmt::Display for Provider {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Gemini => write!(f, "gemini"),
            Self::Kiro => write!(f, "kiro"),
        }
    }
}

/// Token material of one account
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TokenData {
    /// Access token
    pub access_token: String,
    /// Refresh token
    pub refresh_token: String,
    /// Lifetime in seconds at issue time
    pub expires_in: i64,
    /// Unix seconds at which the access token expires
    pub expiry_timestamp: i64,
    /// Token type
    #[serde(default = "default_token_type")]
    pub token_type: String,
    /// Email the token was issued for
    #[serde(default)]
    pub email: Option<String>,
}

fn default_token_type() -> String {
    "Bearer".to_string()
}

impl TokenData {
    /// Build token data issued now
    #[must_use]
    pub fn issued_now(tokens: &TokenSet, email: Option<String>) -> Self {
        let expires_in = tokens.expires_in.unwrap_or(DEFAULT_EXPIRES_IN);
        Self {
            access_token: tokens.access_token.clone(),
            refresh_token: tokens.refresh_token.clone().unwrap_or_default(),
            expires_in,
            expiry_timestamp: now() + expires_in,
            token_type: tokens.token_type.clone().unwrap_or_else(default_token_type),
            email,
        }
    }
}

/// One linked account, stored as `accounts/<id>.json`
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Account {
    /// Globally unique id, assigned at creation
    pub id: String,
    /// Best-effort email
    pub email: String,
    /// Display name
    #[serde(default)]
    pub name: Option<String>,
    /// Linked service
    #[serde(default)]
    pub provider: Provider,
    /// Kiro profile ARN
    #[serde(default)]
    pub kiro_profile_arn: Option<String>,
    /// Kiro user id. The OAuth flow leaves it unset; manual entry falls back
    /// to `manual-<uuid>` (see [`Account::with_manual_user_id`]).
    #[serde(default)]
    pub kiro_user_id: Option<String>,
    /// Exactly one token record per account
    pub token: TokenData,
    /// Disabled accounts are skipped by consumers
    #[serde(default)]
    pub disabled: bool,
    /// Why the account was disabled
    #[serde(default)]
    pub disabled_reason: Option<String>,
    /// When the account was disabled (unix seconds)
    #[serde(default)]
    pub disabled_at: Option<i64>,
    /// Creation time (unix seconds)
    pub created_at: i64,
    /// Last use (unix seconds)
    pub last_used: i64,
    /// Number of times the account was used
    #[serde(default)]
    pub usage_count: u64,
    /// Fields owned by the desktop manager (quota, device profile, proxy
    /// settings). Carried through load and save untouched.
    #[serde(flatten)]
    pub extra: Map<String, Value>,
}

impl Account {
    /// Synthesize a new account from freshly acquired tokens.
    ///
    /// Email falls back to the id token's claim, then to a generated label.
    #[must_use]
    pub fn from_tokens(provider: Provider, tokens: &TokenSet, email: Option<String>) -> Self {
        let id = Uuid::new_v4().to_string();
        let email = email
            .or_else(|| tokens.email())
            .unwrap_or_else(fallback_email);
        let created = now();

        let kiro_profile_arn = match provider {
            Provider::Kiro => tokens.profile_arn.clone(),
            Provider::Gemini => None,
        };

        Self {
            id,
            token: TokenData::issued_now(tokens, Some(email.clone())),
            email,
            name: None,
            provider,
            kiro_profile_arn,
            kiro_user_id: None,
            disabled: false,
            disabled_reason: None,
            disabled_at: None,
            created_at: created,
            last_used: created,
            usage_count: 0,
            extra: Map::new(),
        }
    }

    /// Set the Kiro user id for a hand-entered account, generating
    /// `manual-<uuid>` when none was given
    #[must_use]
    pub fn with_manual_user_id(mut self, user_id: Option<String>) -> Self {
        self.kiro_user_id =
            Some(user_id.unwrap_or_else(|| format!("manual-{}", Uuid::new_v4())));
        self
    }

    /// Lightweight index entry for this account
    #[must_use]
    pub fn summary(&self) -> AccountSummary {
        AccountSummary {
            id: self.id.clone(),
            email: self.email.clone(),
            name: self.name.clone(),
            created_at: self.created_at,
            last_used: self.last_used,
        }
    }

    /// Bump the usage counter
    pub fn record_usage(&mut self) {
        self.usage_count += 1;
        self.last_used = now();
    }

    /// Disable the account. Reactivation is up to the consumer.
    pub fn disable(&mut self, reason: impl Into<String>) {
        self.disabled = true;
        self.disabled_reason = Some(reason.into());
        self.disabled_at = Some(now());
    }

    /// Replace token material after a refresh.
    ///
    /// Keeps the old refresh token when the response omits one.
    pub fn apply_refresh(&mut self, tokens: &TokenSet) {
        let mut fresh = TokenData::issued_now(tokens, self.token.email.clone());
        if fresh.refresh_token.is_empty() {
            fresh.refresh_token = std::mem::take(&mut self.token.refresh_token);
        }
        self.token = fresh;
        if tokens.profile_arn.is_some() {
            self.kiro_profile_arn.clone_from(&tokens.profile_arn);
        }
    }

    /// Whether the access token is expired (with a 60 second buffer)
    #[must_use]
    pub fn is_token_expired(&self) -> bool {
        now() + EXPIRY_SKEW_SECS >= self.token.expiry_timestamp
    }
}

/// Index entry mirroring one account file
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct AccountSummary {
    /// Account id
    pub id: String,
    /// Account email
    pub email: String,
    /// Display name
    #[serde(default)]
    pub name: Option<String>,
    /// Creation time
    pub created_at: i64,
    /// Last use
    pub last_used: i64,
}

/// The `accounts.json` index
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct AccountIndex {
    /// Format version
    pub version: String,
    /// Ordered summaries
    #[serde(default)]
    pub accounts: Vec<AccountSummary>,
    /// Account currently selected by the desktop manager
    #[serde(default)]
    pub current_account_id: Option<String>,
}

impl Default for AccountIndex {
    fn default() -> Self {
        Self {
            version: INDEX_VERSION.to_string(),
            accounts: Vec::new(),
            current_account_id: None,
        }
    }
}

impl AccountIndex {
    /// Whether an id is indexed
    #[must_use]
    pub fn contains(&self, id: &str) -> bool {
        self.accounts.iter().any(|a| a.id == id)
    }
}

/// Entry of an export bundle
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ExportEntry {
    /// Account email
    pub email: String,
    /// Refresh token
    pub refresh_token: String,
    /// Linked service
    pub provider: Provider,
}

/// Portable list of refresh tokens
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize, Default)]
pub struct ExportBundle {
    /// Exported accounts
    pub accounts: Vec<ExportEntry>,
}

fn fallback_email() -> String {
    let id = Uuid::new_v4().simple().to_string();
    format!("kiro-user-{}", &id[..8])
}

fn now() -> i64 {
    Utc::now().timestamp()
}
