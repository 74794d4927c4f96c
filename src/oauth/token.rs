//! Token endpoint responses

use base64::{Engine as _, engine::general_purpose::URL_SAFE_NO_PAD};
use serde::{Deserialize, Serialize};

/// Tokens returned by a successful exchange.
///
/// Accepts OAuth snake_case as well as the portal's camelCase field names.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TokenSet {
    /// Access token
    #[serde(alias = "accessToken")]
    pub access_token: String,

    /// Refresh token
    #[serde(default, alias = "refreshToken")]
    pub refresh_token: Option<String>,

    /// Lifetime in seconds
    #[serde(default, alias = "expiresIn")]
    pub expires_in: Option<i64>,

    /// Token type (usually "Bearer")
    #[serde(default, alias = "tokenType")]
    pub token_type: Option<String>,

    /// OpenID Connect id token
    #[serde(default, alias = "idToken")]
    pub id_token: Option<String>,

    /// Provider profile ARN
    #[serde(default, alias = "profileArn")]
    pub profile_arn: Option<String>,
}

impl TokenSet {
    /// Token material entered by hand
    #[must_use]
    pub fn manual(access_token: String, refresh_token: String, expires_in: i64) -> Self {
        Self {
            access_token,
            refresh_token: Some(refresh_token),
            expires_in: Some(expires_in),
            token_type: None,
            id_token: None,
            profile_arn: None,
        }
    }

    /// `email` claim of the id token, if any.
    ///
    /// The signature is not verified; the value is only used as a display label.
    #[must_use]
    pub fn email(&self) -> Option<String> {
        self.id_token.as_deref().and_then(email_from_id_token)
    }
}

/// Read the `email` claim from a JWT payload without verifying it
#[must_use]
pub fn email_from_id_token(jwt: &str) -> Option<String> {
    let payload = jwt.split('.').nth(1)?;
    let bytes = URL_SAFE_NO_PAD.decode(payload.trim_end_matches('=')).ok()?;
    let claims: serde_json::Value = serde_json::from_slice(&bytes).ok()?;
    claims
        .get("email")
        .and_then(serde_json::Value::as_str)
        .map(ToString::to_string)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parses_portal_camel_case() {
        let tokens: TokenSet = serde_json::from_str(
            r#"{"accessToken":"AT","refreshToken":"RT","expiresIn":3600,"profileArn":"arn:aws:x"}"#,
        )
        .unwrap();
        assert_eq!(tokens.access_token, "AT");
        assert_eq!(tokens.refresh_token.as_deref(), Some("RT"));
        assert_eq!(tokens.expires_in, Some(3600));
        assert_eq!(tokens.profile_arn.as_deref(), Some("arn:aws:x"));
    }

    #[test]
    fn parses_oauth_snake_case() {
        let tokens: TokenSet = serde_json::from_str(
            r#"{"access_token":"AT","token_type":"Bearer","expires_in":60,"id_token":"a.b.c"}"#,
        )
        .unwrap();
        assert_eq!(tokens.token_type.as_deref(), Some("Bearer"));
        assert!(tokens.refresh_token.is_none());
    }

    #[test]
    fn email_claim_from_id_token() {
        let payload = URL_SAFE_NO_PAD.encode(r#"{"sub":"1","email":"dev@example.com"}"#);
        let jwt = format!("eyJhbGciOiJub25lIn0.{payload}.sig");
        assert_eq!(email_from_id_token(&jwt).as_deref(), Some("dev@example.com"));

        let tokens = TokenSet {
            id_token: Some(jwt),
            ..TokenSet::manual("AT".into(), "RT".into(), 3600)
        };
        assert_eq!(tokens.email().as_deref(), Some("dev@example.com"));
    }

    #[test]
    fn garbage_id_token_has_no_email() {
        assert!(email_from_id_token("not-a-jwt").is_none());
        assert!(email_from_id_token("a.!!!.c").is_none());
    }
}
