//! Authorization URL construction

use base64::{Engine as _, engine::general_purpose::URL_SAFE_NO_PAD};
use rand::Rng;
use serde::{Deserialize, Serialize};
use url::Url;

use crate::{Error, Result};

/// Which sign-in page the URL targets
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
#[serde(rename_all = "lowercase")]
pub enum AuthorizeStyle {
    /// Standard OAuth2 authorize endpoint of the hosted user pool
    #[default]
    Cognito,
    /// The web portal sign-in page the IDE opens
    Portal,
}

impl std::fmt::Display for AuthorizeStyle {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Cognito => write!(f, "cognito"),
            Self::Portal => write!(f, "portal"),
        }
    }
}

impl std::str::FromStr for AuthorizeStyle {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self> {
        match s.to_ascii_lowercase().as_str() {
            "cognito" => Ok(Self::Cognito),
            "portal" => Ok(Self::Portal),
            other => Err(Error::Config(format!("Unknown authorize style: {other}"))),
        }
    }
}

/// Everything needed to compose one authorization URL
#[derive(Debug, Clone)]
pub struct AuthorizationRequest {
    /// Target page
    pub style: AuthorizeStyle,
    /// Endpoint the query is appended to
    pub endpoint: String,
    /// OAuth client identifier
    pub client_id: String,
    /// Where the provider redirects after consent
    pub redirect_uri: String,
    /// Requested scopes
    pub scopes: Vec<String>,
    /// Identity provider hint
    pub identity_provider: Option<String>,
    /// Anti-CSRF state
    pub state: String,
    /// PKCE S256 challenge
    pub code_challenge: String,
}

impl AuthorizationRequest {
    /// Compose the fully query-encoded URL.
    ///
    /// Only the endpoint is validated; every other value is encoded as given.
    pub fn build(&self) -> Result<Url> {
        let mut url = Url::parse(&self.endpoint)
            .map_err(|e| Error::Config(format!("Invalid authorize endpoint {}: {e}", self.endpoint)))?;

        {
            let mut params = url.query_pairs_mut();
            match self.style {
                AuthorizeStyle::Cognito => {
                    params.append_pair("client_id", &self.client_id);
                    params.append_pair("response_type", "code");
                    if !self.scopes.is_empty() {
                        params.append_pair("scope", &self.scopes.join(" "));
                    }
                    params.append_pair("redirect_uri", &self.redirect_uri);
                    params.append_pair("state", &self.state);
                    params.append_pair("code_challenge", &self.code_challenge);
                    params.append_pair("code_challenge_method", "S256");
                    if let Some(idp) = &self.identity_provider {
                        params.append_pair("identity_provider", idp);
                    }
                }
                AuthorizeStyle::Portal => {
                    params.append_pair("state", &self.state);
                    params.append_pair("code_challenge", &self.code_challenge);
                    params.append_pair("code_challenge_method", "S256");
                    params.append_pair("redirect_uri", &self.redirect_uri);
                    params.append_pair("redirect_from", "KiroIDE");
                }
            }
        }

        Ok(url)
    }
}

/// Generate a random state parameter
#[must_use]
pub fn generate_state() -> String {
    let state_bytes: [u8; 32] = rand::rng().random();
    URL_SAFE_NO_PAD.encode(state_bytes)
}

#[cfg(test)]
mod tests {
    use std::collections::HashMap;

    use pretty_assertions::assert_eq;

    use super::*;

    fn request(style: AuthorizeStyle, endpoint: &str) -> AuthorizationRequest {
        AuthorizationRequest {
            style,
            endpoint: endpoint.to_string(),
            client_id: "client-123".to_string(),
            redirect_uri: "http://localhost:3128/oauth/callback".to_string(),
            scopes: vec!["email".to_string(), "openid".to_string()],
            identity_provider: Some("Google".to_string()),
            state: "state-xyz".to_string(),
            code_challenge: "challenge-abc".to_string(),
        }
    }

    fn query(url: &Url) -> HashMap<String, String> {
        url.query_pairs()
            .map(|(k, v)| (k.into_owned(), v.into_owned()))
            .collect()
    }

    #[test]
    fn cognito_url_carries_client_scopes_and_s256() {
        let url = request(AuthorizeStyle::Cognito, "https://auth.example.com/oauth2/authorize")
            .build()
            .unwrap();
        let q = query(&url);

        assert_eq!(url.path(), "/oauth2/authorize");
        assert_eq!(q["client_id"], "client-123");
        assert_eq!(q["scope"], "email openid");
        assert_eq!(q["code_challenge_method"], "S256");
        assert_eq!(q["code_challenge"], "challenge-abc");
        assert_eq!(q["redirect_uri"], "http://localhost:3128/oauth/callback");
        assert_eq!(q["identity_provider"], "Google");
        assert_eq!(q["response_type"], "code");
        assert_eq!(url.query_pairs().filter(|(k, _)| k == "client_id").count(), 1);
    }

    #[test]
    fn cognito_url_omits_unset_hint_and_scopes() {
        let mut req = request(AuthorizeStyle::Cognito, "https://auth.example.com/oauth2/authorize");
        req.identity_provider = None;
        req.scopes.clear();
        let q = query(&req.build().unwrap());
        assert!(!q.contains_key("identity_provider"));
        assert!(!q.contains_key("scope"));
    }

    #[test]
    fn portal_url_matches_ide_format() {
        let url = request(AuthorizeStyle::Portal, "https://app.example.dev/signin")
            .build()
            .unwrap();
        let q = query(&url);
        assert_eq!(q["redirect_from"], "KiroIDE");
        assert_eq!(q["state"], "state-xyz");
        assert_eq!(q["code_challenge_method"], "S256");
        assert!(!q.contains_key("client_id"));
        // redirect_uri must be percent-encoded inside the query
        assert!(url.as_str().contains("redirect_uri=http%3A%2F%2Flocalhost%3A3128"));
    }

    #[test]
    fn invalid_endpoint_is_config_error() {
        let err = request(AuthorizeStyle::Cognito, "not a url").build().unwrap_err();
        assert!(matches!(err, Error::Config(_)));
    }

    #[test]
    fn style_parses_case_insensitively() {
        assert_eq!("Portal".parse::<AuthorizeStyle>().unwrap(), AuthorizeStyle::Portal);
        assert!("device".parse::<AuthorizeStyle>().is_err());
    }

    #[test]
    fn state_is_unique_and_url_safe() {
        let a = generate_state();
        let b = generate_state();
        assert_ne!(a, b);
        assert_eq!(a.len(), 43);
        assert!(!a.contains('+') && !a.contains('/') && !a.contains('='));
    }
}
