//! Configuration management

use std::{env, path::Path, path::PathBuf, time::Duration};

use figment::{
    Figment,
    providers::{Env, Format, Yaml},
};
use regex::Regex;
use serde::{Deserialize, Serialize};

use crate::oauth::{AuthorizationRequest, AuthorizeStyle, ProbeCandidate, VerifierStyle};
use crate::{Error, Result};

/// Application identifier the desktop manager uses for its data and log folders
pub const APP_IDENTIFIER: &str = "com.droidgravity.manager";

/// Main configuration
#[derive(Debug, Clone, Serialize, Deserialize, Default)]
#[serde(default)]
pub struct Config {
    /// Environment files to load before processing config.
    /// Paths support ~ expansion. Loaded in order, later files override earlier.
    pub env_files: Vec<String>,
    /// Sign-in provider parameters
    pub provider: ProviderConfig,
    /// Local callback receiver
    pub callback: CallbackConfig,
    /// Token-exchange probe
    pub exchange: ExchangeConfig,
    /// Account store location
    pub store: StoreConfig,
    /// Log scanner
    pub logs: LogsConfig,
}

/// Static client parameters used to build the authorization URL
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct ProviderConfig {
    /// Which sign-in page to target
    pub style: AuthorizeStyle,
    /// OAuth2 authorize endpoint (used by the `cognito` style)
    pub authorize_endpoint: String,
    /// Portal sign-in page (used by the `portal` style)
    pub portal_signin_url: String,
    /// OAuth client identifier
    pub client_id: String,
    /// Redirect target; defaults to the callback receiver's own URL
    pub redirect_uri: Option<String>,
    /// Requested scopes
    pub scopes: Vec<String>,
    /// Identity provider hint (e.g. `Google`)
    pub identity_provider: Option<String>,
    /// How PKCE verifiers are generated
    pub verifier: VerifierStyle,
    /// Verifier length for the alphanumeric style
    pub verifier_length: usize,
}

impl Default for ProviderConfig {
    fn default() -> Self {
        Self {
            style: AuthorizeStyle::Cognito,
            authorize_endpoint:
                "https://kiro-prod-us-east-1.auth.us-east-1.amazoncognito.com/oauth2/authorize"
                    .to_string(),
            portal_signin_url: "https://app.kiro.dev/signin".to_string(),
            client_id: "59bd15eh40ee7pc20h0bkcu7id".to_string(),
            redirect_uri: None,
            scopes: vec!["email".to_string(), "openid".to_string()],
            identity_provider: Some("Google".to_string()),
            verifier: VerifierStyle::Alphanumeric,
            verifier_length: 128,
        }
    }
}

/// Callback receiver configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct CallbackConfig {
    /// Host to bind to
    pub host: String,
    /// Port to listen on (the provider only redirects to the registered port)
    pub port: u16,
    /// Path advertised in the redirect URI. The receiver answers on every path.
    pub path: String,
    /// How long to wait for the browser redirect
    #[serde(with = "humantime_serde")]
    pub timeout: Duration,
}

impl Default for CallbackConfig {
    fn default() -> Self {
        Self {
            host: "127.0.0.1".to_string(),
            port: 3128,
            path: "/oauth/callback".to_string(),
            timeout: Duration::from_secs(300),
        }
    }
}

/// Token-exchange probe configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct ExchangeConfig {
    /// Per-request timeout
    #[serde(with = "humantime_serde")]
    pub timeout: Duration,
    /// Client secret obtained out of band.
    /// Supports a literal value or `env:VAR_NAME`.
    pub client_secret: Option<String>,
    /// User agent sent with every probe request
    pub user_agent: String,
    /// Candidates tried in order until one yields a token
    pub candidates: Vec<ProbeCandidate>,
}

impl Default for ExchangeConfig {
    fn default() -> Self {
        Self {
            timeout: Duration::from_secs(10),
            client_secret: None,
            user_agent: concat!("kiro-auth/", env!("CARGO_PKG_VERSION")).to_string(),
            candidates: ProbeCandidate::defaults(),
        }
    }
}

impl ExchangeConfig {
    /// Resolve the client secret (expand `env:` references)
    #[must_use]
    pub fn resolve_client_secret(&self) -> Option<String> {
        self.client_secret.as_ref().and_then(|secret| {
            if let Some(var_name) = secret.strip_prefix("env:") {
                env::var(var_name).ok()
            } else if secret.is_empty() {
                None
            } else {
                Some(secret.clone())
            }
        })
    }
}

/// Account store configuration
#[derive(Debug, Clone, Serialize, Deserialize, Default)]
#[serde(default)]
pub struct StoreConfig {
    /// Data directory holding `accounts.json` and `accounts/`.
    /// Defaults to the platform data dir of the desktop manager.
    pub data_dir: Option<String>,
}

/// Log scanner configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct LogsConfig {
    /// Directories to scan; empty means the platform defaults
    pub directories: Vec<String>,
    /// Case-insensitive keywords selecting relevant lines
    pub keywords: Vec<String>,
    /// File extensions to read
    pub extensions: Vec<String>,
    /// Number of trailing entries to print per file
    pub tail: usize,
}

impl Default for LogsConfig {
    fn default() -> Self {
        Self {
            directories: Vec::new(),
            keywords: [
                "kiro",
                "manual_kiro_token_input",
                "complete_kiro_oauth_login",
                "submit_kiro_oauth_code",
                "prepare_kiro_oauth_url",
                "kiro-account-added",
                "kiro oauth",
                "kiro api",
            ]
            .iter()
            .map(ToString::to_string)
            .collect(),
            extensions: vec!["log".to_string(), "txt".to_string()],
            tail: 20,
        }
    }
}

impl Config {
    /// Load configuration from an optional YAML file plus `KIRO_AUTH_*` env vars
    pub fn load(path: Option<&Path>) -> Result<Self> {
        let mut figment = Figment::new();

        if let Some(p) = path {
            if !p.exists() {
                return Err(Error::Config(format!(
                    "Config file not found: {}",
                    p.display()
                )));
            }
            figment = figment.merge(Yaml::file(p));
        }

        figment = figment.merge(Env::prefixed("KIRO_AUTH_").split("__"));

        let mut config: Self = figment
            .extract()
            .map_err(|e| Error::Config(e.to_string()))?;

        config.load_env_files();
        config.expand_env_vars()?;
        config.validate()?;

        Ok(config)
    }

    /// Load environment files into the process environment.
    /// Files that don't exist are silently skipped.
    fn load_env_files(&self) {
        for path_str in &self.env_files {
            let expanded = expand_home(path_str);
            let path = Path::new(&expanded);
            if path.exists() {
                match dotenvy::from_path(path) {
                    Ok(()) => tracing::info!("Loaded env file: {expanded}"),
                    Err(e) => tracing::warn!("Failed to load env file {expanded}: {e}"),
                }
            } else {
                tracing::debug!("Env file not found (skipped): {expanded}");
            }
        }
    }

    /// Expand ${VAR} and ${VAR:-default} in path-like values
    fn expand_env_vars(&mut self) -> Result<()> {
        let re = env_pattern()?;

        if let Some(dir) = self.store.data_dir.as_mut() {
            *dir = expand_home(&expand_string(&re, dir));
        }
        for dir in &mut self.logs.directories {
            *dir = expand_home(&expand_string(&re, dir));
        }
        if let Some(uri) = self.provider.redirect_uri.as_mut() {
            *uri = expand_string(&re, uri);
        }

        Ok(())
    }

    fn validate(&self) -> Result<()> {
        if self.provider.client_id.is_empty() {
            return Err(Error::Config("provider.client_id must not be empty".into()));
        }
        if !self.callback.path.starts_with('/') {
            return Err(Error::Config(format!(
                "callback.path must start with '/': {}",
                self.callback.path
            )));
        }
        if self.exchange.candidates.is_empty() {
            tracing::warn!("No token-exchange candidates configured");
        }
        Ok(())
    }

    /// Redirect URI sent to the provider
    #[must_use]
    pub fn redirect_uri(&self) -> String {
        self.provider.redirect_uri.clone().unwrap_or_else(|| {
            format!(
                "http://localhost:{}{}",
                self.callback.port, self.callback.path
            )
        })
    }

    /// Authorization request for the given style with fresh state and challenge
    #[must_use]
    pub fn authorization_request(
        &self,
        style: AuthorizeStyle,
        state: String,
        code_challenge: String,
    ) -> AuthorizationRequest {
        let endpoint = match style {
            AuthorizeStyle::Cognito => self.provider.authorize_endpoint.clone(),
            AuthorizeStyle::Portal => self.provider.portal_signin_url.clone(),
        };
        AuthorizationRequest {
            style,
            endpoint,
            client_id: self.provider.client_id.clone(),
            redirect_uri: self.redirect_uri(),
            scopes: self.provider.scopes.clone(),
            identity_provider: self.provider.identity_provider.clone(),
            state,
            code_challenge,
        }
    }

    /// Address the callback receiver binds to
    #[must_use]
    pub fn callback_addr(&self) -> String {
        format!("{}:{}", self.callback.host, self.callback.port)
    }

    /// Root directory of the account store
    pub fn store_root(&self) -> Result<PathBuf> {
        if let Some(dir) = &self.store.data_dir {
            return Ok(PathBuf::from(dir));
        }
        dirs::data_dir()
            .map(|d| d.join(APP_IDENTIFIER))
            .ok_or_else(|| Error::Config("Cannot determine platform data directory".to_string()))
    }
}

/// Compile the `${VAR}` / `${VAR:-default}` pattern
pub(crate) fn env_pattern() -> Result<Regex> {
    Regex::new(r"\$\{([A-Za-z_][A-Za-z0-9_]*)(?::-([^}]*))?\}")
        .map_err(|e| Error::Internal(format!("Invalid env pattern: {e}")))
}

/// Expand environment variables in a string
pub(crate) fn expand_string(re: &Regex, value: &str) -> String {
    re.replace_all(value, |caps: &regex::Captures| {
        let var_name = &caps[1];
        let default = caps.get(2).map_or("", |m| m.as_str());
        env::var(var_name).unwrap_or_else(|_| default.to_string())
    })
    .into_owned()
}

fn expand_home(path: &str) -> String {
    if path.starts_with('~') {
        if let Some(home) = dirs::home_dir() {
            return path.replacen('~', &home.display().to_string(), 1);
        }
    }
    path.to_string()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn defaults_match_desktop_client() {
        let config = Config::default();
        assert_eq!(config.callback.port, 3128);
        assert_eq!(config.callback.timeout, Duration::from_secs(300));
        assert_eq!(config.exchange.timeout, Duration::from_secs(10));
        assert_eq!(config.provider.verifier_length, 128);
        assert_eq!(config.provider.scopes, vec!["email", "openid"]);
        assert!(!config.exchange.candidates.is_empty());
    }

    #[test]
    fn redirect_uri_defaults_to_callback_receiver() {
        let config = Config::default();
        assert_eq!(config.redirect_uri(), "http://localhost:3128/oauth/callback");

        let mut custom = Config::default();
        custom.provider.redirect_uri = Some("http://localhost:3128".to_string());
        assert_eq!(custom.redirect_uri(), "http://localhost:3128");
    }

    #[test]
    fn authorization_request_picks_endpoint_by_style() {
        let config = Config::default();
        let cognito =
            config.authorization_request(AuthorizeStyle::Cognito, "s".into(), "c".into());
        assert!(cognito.endpoint.ends_with("/oauth2/authorize"));
        assert_eq!(cognito.redirect_uri, "http://localhost:3128/oauth/callback");

        let portal = config.authorization_request(AuthorizeStyle::Portal, "s".into(), "c".into());
        assert_eq!(portal.endpoint, "https://app.kiro.dev/signin");
        assert_eq!(config.callback_addr(), "127.0.0.1:3128");
    }

    #[test]
    fn expand_string_uses_default_when_unset() {
        let re = env_pattern().unwrap();
        let out = expand_string(&re, "${KIRO_AUTH_TEST_SURELY_UNSET:-/tmp/kiro}/data");
        assert_eq!(out, "/tmp/kiro/data");
    }

    #[test]
    fn literal_client_secret_resolves() {
        let exchange = ExchangeConfig {
            client_secret: Some("s3cret".to_string()),
            ..ExchangeConfig::default()
        };
        assert_eq!(exchange.resolve_client_secret().as_deref(), Some("s3cret"));
    }

    #[test]
    fn empty_or_missing_env_secret_is_none() {
        let empty = ExchangeConfig {
            client_secret: Some(String::new()),
            ..ExchangeConfig::default()
        };
        assert!(empty.resolve_client_secret().is_none());

        let missing = ExchangeConfig {
            client_secret: Some("env:KIRO_AUTH_TEST_SECRET_SURELY_UNSET".to_string()),
            ..ExchangeConfig::default()
        };
        assert!(missing.resolve_client_secret().is_none());
    }

    #[test]
    fn load_yaml_file() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("kiro.yaml");
        std::fs::write(
            &path,
            "callback:\n  port: 4000\n  timeout: 30s\nstore:\n  data_dir: /tmp/kiro-store\n",
        )
        .unwrap();

        let config = Config::load(Some(&path)).unwrap();
        assert_eq!(config.callback.port, 4000);
        assert_eq!(config.callback.timeout, Duration::from_secs(30));
        assert_eq!(config.store_root().unwrap(), PathBuf::from("/tmp/kiro-store"));
        assert_eq!(config.redirect_uri(), "http://localhost:4000/oauth/callback");
    }

    #[test]
    fn missing_config_file_is_an_error() {
        let err = Config::load(Some(Path::new("/nonexistent/kiro.yaml"))).unwrap_err();
        assert!(matches!(err, Error::Config(_)));
    }
}
