//! Token-exchange probe
//!
//! Tries an authorization code against a list of candidate endpoints, one at
//! a time, until a response carries a token. Every response is classified so
//! the operator can tell an expired code from a missing client secret or a
//! wrong request shape.

use std::collections::BTreeMap;
use std::fmt;
use std::time::{Duration, Instant};

use regex::Regex;
use reqwest::Client;
use serde::{Deserialize, Serialize};
use tracing::{debug, info, warn};

use super::token::TokenSet;
use crate::config::{env_pattern, expand_string};
use crate::Result;

/// Sentinel the portal returns (with HTTP 200) for an unrecognised operation
pub const UNKNOWN_OPERATION_SENTINEL: &str = "UnknownOperationException";

const BODY_SNIPPET_LEN: usize = 500;

/// Request body encoding
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
#[serde(rename_all = "lowercase")]
pub enum BodyEncoding {
    /// `application/json`
    #[default]
    Json,
    /// `application/x-www-form-urlencoded`
    Form,
}

impl BodyEncoding {
    fn content_type(self) -> &'static str {
        match self {
            Self::Json => "application/json",
            Self::Form => "application/x-www-form-urlencoded",
        }
    }
}

/// Field naming used in the request body
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
#[serde(rename_all = "lowercase")]
pub enum FieldStyle {
    /// RFC 6749: `grant_type`, `client_id`, `code`, `code_verifier`, `redirect_uri`
    #[default]
    Oauth,
    /// `code`, `code_verifier`, `redirect_uri`
    Snake,
    /// `code`, `codeVerifier`, `redirectUri`
    Camel,
}

/// How the client secret (if one was supplied) is presented
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
#[serde(rename_all = "lowercase")]
pub enum ClientAuth {
    /// Never send the secret
    #[default]
    None,
    /// `client_secret` body field
    Body,
    /// HTTP Basic `client_id:client_secret`
    Basic,
}

/// One endpoint/header/body combination to try
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ProbeCandidate {
    /// Label shown in reports
    pub name: String,
    /// Endpoint to POST to
    pub url: String,
    /// Body encoding
    #[serde(default)]
    pub encoding: BodyEncoding,
    /// Field naming
    #[serde(default)]
    pub fields: FieldStyle,
    /// Client authentication
    #[serde(default)]
    pub client_auth: ClientAuth,
    /// Extra headers; values support `${VAR}` expansion
    #[serde(default)]
    pub headers: BTreeMap<String, String>,
}

impl ProbeCandidate {
    /// Known portal and Cognito token endpoints, in the order worth trying
    #[must_use]
    pub fn defaults() -> Vec<Self> {
        const PORTAL: &str = "https://app.kiro.dev/service/KiroWebPortalService";
        const COGNITO: &str = "https://kiro-prod-us-east-1.auth.us-east-1.amazoncognito.com";

        vec![
            Self {
                name: "portal-get-token".to_string(),
                url: format!("{PORTAL}/GetToken"),
                encoding: BodyEncoding::Json,
                fields: FieldStyle::Snake,
                client_auth: ClientAuth::None,
                headers: BTreeMap::new(),
            },
            Self {
                name: "portal-operation-target".to_string(),
                url: format!("{PORTAL}/operation"),
                encoding: BodyEncoding::Json,
                fields: FieldStyle::Snake,
                client_auth: ClientAuth::None,
                headers: BTreeMap::from([
                    (
                        "Content-Type".to_string(),
                        "application/x-amz-json-1.1".to_string(),
                    ),
                    (
                        "X-Amz-Target".to_string(),
                        "KiroWebPortalService.GetToken".to_string(),
                    ),
                ]),
            },
            Self {
                name: "cognito-public-client".to_string(),
                url: format!("{COGNITO}/oauth2/token"),
                encoding: BodyEncoding::Form,
                fields: FieldStyle::Oauth,
                client_auth: ClientAuth::None,
                headers: BTreeMap::new(),
            },
            Self {
                name: "cognito-basic-auth".to_string(),
                url: format!("{COGNITO}/oauth2/token"),
                encoding: BodyEncoding::Form,
                fields: FieldStyle::Oauth,
                client_auth: ClientAuth::Basic,
                headers: BTreeMap::new(),
            },
        ]
    }

    fn has_header(&self, name: &str) -> bool {
        self.headers.keys().any(|k| k.eq_ignore_ascii_case(name))
    }
}

/// The code being exchanged and the client it belongs to
#[derive(Debug, Clone)]
pub struct ExchangeRequest {
    /// Authorization code
    pub code: String,
    /// PKCE verifier of the attempt that produced the code
    pub verifier: String,
    /// Redirect URI used in the authorization request
    pub redirect_uri: String,
    /// OAuth client identifier
    pub client_id: String,
    /// Client secret, only if obtained out of band
    pub client_secret: Option<String>,
}

/// Body fields for a candidate, in send order
#[must_use]
pub fn body_fields(candidate: &ProbeCandidate, req: &ExchangeRequest) -> Vec<(String, String)> {
    let mut fields: Vec<(&str, &str)> = match candidate.fields {
        FieldStyle::Oauth => vec![
            ("grant_type", "authorization_code"),
            ("client_id", req.client_id.as_str()),
            ("code", req.code.as_str()),
            ("code_verifier", req.verifier.as_str()),
            ("redirect_uri", req.redirect_uri.as_str()),
        ],
        FieldStyle::Snake => vec![
            ("code", req.code.as_str()),
            ("code_verifier", req.verifier.as_str()),
            ("redirect_uri", req.redirect_uri.as_str()),
        ],
        FieldStyle::Camel => vec![
            ("code", req.code.as_str()),
            ("codeVerifier", req.verifier.as_str()),
            ("redirectUri", req.redirect_uri.as_str()),
        ],
    };

    if candidate.client_auth == ClientAuth::Body {
        if let Some(secret) = &req.client_secret {
            fields.push(("client_secret", secret.as_str()));
        }
    }

    fields
        .into_iter()
        .map(|(k, v)| (k.to_string(), v.to_string()))
        .collect()
}

/// Encode body fields
pub fn encode_body(encoding: BodyEncoding, fields: &[(String, String)]) -> Result<Vec<u8>> {
    match encoding {
        BodyEncoding::Json => {
            let map: serde_json::Map<String, serde_json::Value> = fields
                .iter()
                .map(|(k, v)| (k.clone(), serde_json::Value::String(v.clone())))
                .collect();
            Ok(serde_json::to_vec(&map)?)
        }
        BodyEncoding::Form => Ok(url::form_urlencoded::Serializer::new(String::new())
            .extend_pairs(fields)
            .finish()
            .into_bytes()),
    }
}

/// Classified result of one attempt
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ProbeOutcome {
    /// The response carried a token
    Tokens(TokenSet),
    /// Code expired or already consumed
    InvalidGrant {
        /// Provider description
        description: Option<String>,
    },
    /// The endpoint wants a client secret we do not have
    InvalidClient {
        /// Provider description
        description: Option<String>,
    },
    /// Endpoint does not exist
    NotFound,
    /// Endpoint exists but rejected the request shape
    UnknownOperation,
    /// Success status, JSON body, no token in it
    NoToken {
        /// HTTP status
        status: u16,
        /// Body snippet
        body: String,
    },
    /// Success status but the body is not JSON
    Undecodable {
        /// HTTP status
        status: u16,
        /// Decode failure
        reason: String,
    },
    /// Any other failure status
    Rejected {
        /// HTTP status
        status: u16,
        /// OAuth `error` (or AWS `__type`)
        error: Option<String>,
        /// Description or body snippet
        detail: String,
    },
    /// Request never produced a response
    Transport(String),
}

impl ProbeOutcome {
    /// Whether this attempt yielded tokens
    #[must_use]
    pub fn is_success(&self) -> bool {
        matches!(self, Self::Tokens(_))
    }

    /// What the operator should conclude
    #[must_use]
    pub fn hint(&self) -> &'static str {
        match self {
            Self::Tokens(_) => "token exchange succeeded",
            Self::InvalidGrant { .. } => {
                "code expired or already used; run a fresh authorization"
            }
            Self::InvalidClient { .. } => "endpoint requires a client secret",
            Self::NotFound => "endpoint does not exist",
            Self::UnknownOperation => "endpoint exists but rejects this request shape",
            Self::NoToken { .. } => "accepted but no token in the response",
            Self::Undecodable { .. } => "response is not JSON",
            Self::Rejected { .. } => "request rejected",
            Self::Transport(_) => "network failure",
        }
    }
}

impl fmt::Display for ProbeOutcome {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Tokens(_) => write!(f, "tokens"),
            Self::InvalidGrant { description } => {
                write!(f, "invalid_grant")?;
                if let Some(d) = description {
                    write!(f, " ({d})")?;
                }
                Ok(())
            }
            Self::InvalidClient { description } => {
                write!(f, "invalid_client")?;
                if let Some(d) = description {
                    write!(f, " ({d})")?;
                }
                Ok(())
            }
            Self::NotFound => write!(f, "HTTP 404"),
            Self::UnknownOperation => write!(f, "{UNKNOWN_OPERATION_SENTINEL}"),
            Self::NoToken { status, body } => write!(f, "HTTP {status} without token: {body}"),
            Self::Undecodable { status, reason } => write!(f, "HTTP {status}, undecodable: {reason}"),
            Self::Rejected {
                status,
                error,
                detail,
            } => match error {
                Some(e) => write!(f, "HTTP {status} {e}: {detail}"),
                None => write!(f, "HTTP {status}: {detail}"),
            },
            Self::Transport(e) => write!(f, "transport error: {e}"),
        }
    }
}

/// Error body shapes seen from OAuth and AWS JSON endpoints
#[derive(Debug, Default, Deserialize)]
struct ErrorBody {
    error: Option<String>,
    error_description: Option<String>,
    #[serde(rename = "__type")]
    aws_type: Option<String>,
    message: Option<String>,
}

/// Classify a response by status and body
#[must_use]
pub fn classify(status: u16, body: &str) -> ProbeOutcome {
    if body.contains(UNKNOWN_OPERATION_SENTINEL) {
        return ProbeOutcome::UnknownOperation;
    }

    if (200..300).contains(&status) {
        let value: serde_json::Value = match serde_json::from_str(body) {
            Ok(v) => v,
            Err(e) => {
                return ProbeOutcome::Undecodable {
                    status,
                    reason: e.to_string(),
                };
            }
        };
        return match serde_json::from_value::<TokenSet>(value) {
            Ok(tokens) if !tokens.access_token.is_empty() => ProbeOutcome::Tokens(tokens),
            _ => ProbeOutcome::NoToken {
                status,
                body: snippet(body),
            },
        };
    }

    if status == 404 {
        return ProbeOutcome::NotFound;
    }

    let parsed: ErrorBody = serde_json::from_str(body).unwrap_or_default();
    let description = parsed.error_description.or(parsed.message);
    match parsed.error.as_deref() {
        Some("invalid_grant") => ProbeOutcome::InvalidGrant { description },
        Some("invalid_client") => ProbeOutcome::InvalidClient { description },
        _ => ProbeOutcome::Rejected {
            status,
            error: parsed.error.or(parsed.aws_type),
            detail: description.unwrap_or_else(|| snippet(body)),
        },
    }
}

fn snippet(body: &str) -> String {
    body.chars().take(BODY_SNIPPET_LEN).collect()
}

/// One attempt in a probe run
#[derive(Debug, Clone)]
pub struct ProbeAttempt {
    /// Candidate name
    pub candidate: String,
    /// Endpoint tried
    pub url: String,
    /// Classified result
    pub outcome: ProbeOutcome,
    /// Wall time of the request
    pub elapsed: Duration,
}

/// All attempts of a probe run, in order
#[derive(Debug, Clone, Default)]
pub struct ProbeReport {
    /// Attempts made
    pub attempts: Vec<ProbeAttempt>,
}

impl ProbeReport {
    /// Tokens from the successful attempt, if any
    #[must_use]
    pub fn tokens(&self) -> Option<&TokenSet> {
        self.attempts.iter().find_map(|a| match &a.outcome {
            ProbeOutcome::Tokens(t) => Some(t),
            _ => None,
        })
    }

    /// Name of the candidate that worked
    #[must_use]
    pub fn successful_candidate(&self) -> Option<&str> {
        self.attempts
            .iter()
            .find(|a| a.outcome.is_success())
            .map(|a| a.candidate.as_str())
    }
}

/// Sends exchange candidates sequentially
pub struct TokenProber {
    client: Client,
    env_re: Regex,
}

impl TokenProber {
    /// Create a prober with a fixed per-request timeout
    pub fn new(timeout: Duration, user_agent: &str) -> Result<Self> {
        let client = Client::builder()
            .timeout(timeout)
            .user_agent(user_agent)
            .build()?;
        Self::with_client(client)
    }

    /// Create a prober around a preconfigured client
    pub fn with_client(client: Client) -> Result<Self> {
        Ok(Self {
            client,
            env_re: env_pattern()?,
        })
    }

    /// Try each candidate in order, stopping at the first token
    pub async fn run(&self, candidates: &[ProbeCandidate], req: &ExchangeRequest) -> ProbeReport {
        let mut report = ProbeReport::default();

        for candidate in candidates {
            let attempt = self.attempt(candidate, req).await;
            let done = attempt.outcome.is_success();
            report.attempts.push(attempt);
            if done {
                break;
            }
        }

        report
    }

    /// Send a single candidate request
    pub async fn attempt(&self, candidate: &ProbeCandidate, req: &ExchangeRequest) -> ProbeAttempt {
        let started = Instant::now();
        let outcome = match self.send(candidate, req).await {
            Ok((status, body)) => classify(status, &body),
            Err(e) => ProbeOutcome::Transport(e),
        };
        let elapsed = started.elapsed();

        if outcome.is_success() {
            info!(candidate = %candidate.name, ?elapsed, "Token exchange succeeded");
        } else {
            warn!(candidate = %candidate.name, outcome = %outcome, "Token exchange attempt failed");
        }

        ProbeAttempt {
            candidate: candidate.name.clone(),
            url: candidate.url.clone(),
            outcome,
            elapsed,
        }
    }

    async fn send(
        &self,
        candidate: &ProbeCandidate,
        req: &ExchangeRequest,
    ) -> std::result::Result<(u16, String), String> {
        let fields = body_fields(candidate, req);
        let body = encode_body(candidate.encoding, &fields).map_err(|e| e.to_string())?;

        let mut request = self.client.post(&candidate.url);
        if !candidate.has_header("content-type") {
            request = request.header("Content-Type", candidate.encoding.content_type());
        }
        for (name, value) in &candidate.headers {
            request = request.header(name.as_str(), expand_string(&self.env_re, value));
        }
        if candidate.client_auth == ClientAuth::Basic {
            if let Some(secret) = &req.client_secret {
                request = request.basic_auth(&req.client_id, Some(secret));
            } else {
                debug!(candidate = %candidate.name, "No client secret supplied; sending without Basic auth");
            }
        }

        debug!(candidate = %candidate.name, url = %candidate.url, "Sending exchange candidate");

        let response = request.body(body).send().await.map_err(|e| e.to_string())?;
        let status = response.status().as_u16();
        let text = response.text().await.map_err(|e| e.to_string())?;
        Ok((status, text))
    }
}
