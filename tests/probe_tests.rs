//! Token-exchange probe tests
//!
//! Runs the probe against a local fake of the token endpoints:
//! - outcome classification per candidate
//! - sequential run stops at the first token
//! - Basic client authentication and custom headers

use std::collections::BTreeMap;
use std::sync::Arc;
use std::sync::atomic::{AtomicUsize, Ordering};

use axum::{
    Json, Router,
    extract::State,
    http::{HeaderMap, StatusCode},
    routing::post,
};
use base64::{Engine as _, engine::general_purpose::STANDARD};
use pretty_assertions::assert_eq;
use serde_json::{Value, json};
use tokio::net::TcpListener;

use kiro_auth::oauth::{
    BodyEncoding, ClientAuth, ExchangeRequest, FieldStyle, ProbeCandidate, ProbeOutcome,
    TokenProber,
};

#[derive(Clone, Default)]
struct FakeState {
    never_hit: Arc<AtomicUsize>,
}

async fn invalid_grant() -> (StatusCode, Json<Value>) {
    (
        StatusCode::BAD_REQUEST,
        Json(json!({"error": "invalid_grant", "error_description": "Code expired"})),
    )
}

async fn unknown_operation() -> (StatusCode, Json<Value>) {
    (
        StatusCode::OK,
        Json(json!({"__type": "com.amazon.coral.service#UnknownOperationException"})),
    )
}

async fn portal_token(body: String) -> (StatusCode, Json<Value>) {
    let parsed: Value = serde_json::from_str(&body).unwrap_or_default();
    if parsed["code_verifier"] == "VERIFIER" && parsed["code"] == "CODE" {
        (
            StatusCode::OK,
            Json(json!({"accessToken": "AT1", "refreshToken": "RT1", "expiresIn": 3600})),
        )
    } else {
        (StatusCode::BAD_REQUEST, Json(json!({"error": "invalid_request"})))
    }
}

async fn never(State(state): State<FakeState>) -> StatusCode {
    state.never_hit.fetch_add(1, Ordering::SeqCst);
    StatusCode::OK
}

async fn basic_token(headers: HeaderMap, body: String) -> (StatusCode, Json<Value>) {
    let expected = format!("Basic {}", STANDARD.encode("client:secret"));
    let auth_ok = headers
        .get("authorization")
        .and_then(|v| v.to_str().ok())
        .is_some_and(|v| v == expected);
    let form: BTreeMap<String, String> = serde_urlencoded::from_str(&body).unwrap_or_default();

    if !auth_ok {
        return (
            StatusCode::BAD_REQUEST,
            Json(json!({"error": "invalid_client"})),
        );
    }
    if form.get("grant_type").map(String::as_str) != Some("authorization_code")
        || form.get("client_id").map(String::as_str) != Some("client")
    {
        return (StatusCode::BAD_REQUEST, Json(json!({"error": "invalid_request"})));
    }
    (
        StatusCode::OK,
        Json(json!({"access_token": "AT2", "token_type": "Bearer", "expires_in": 60})),
    )
}

async fn amz_target(headers: HeaderMap, body: String) -> (StatusCode, Json<Value>) {
    let target = headers
        .get("x-amz-target")
        .and_then(|v| v.to_str().ok())
        .unwrap_or_default();
    let content_type = headers
        .get("content-type")
        .and_then(|v| v.to_str().ok())
        .unwrap_or_default();
    let parsed: Value = serde_json::from_str(&body).unwrap_or_default();

    if target == "KiroWebPortalService.GetToken"
        && content_type == "application/x-amz-json-1.1"
        && parsed["codeVerifier"] == "VERIFIER"
    {
        (StatusCode::OK, Json(json!({"accessToken": "AT3"})))
    } else {
        unknown_operation().await
    }
}

async fn spawn_fake() -> (String, FakeState) {
    let state = FakeState::default();
    let app = Router::new()
        .route("/grant", post(invalid_grant))
        .route("/operation", post(unknown_operation))
        .route("/token", post(portal_token))
        .route("/never", post(never))
        .route("/basic", post(basic_token))
        .route("/target", post(amz_target))
        .with_state(state.clone());

    let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
    let addr = listener.local_addr().unwrap();
    tokio::spawn(async move {
        axum::serve(listener, app).await.unwrap();
    });
    (format!("http://{addr}"), state)
}

fn prober() -> TokenProber {
    let client = reqwest::Client::builder().no_proxy().build().unwrap();
    TokenProber::with_client(client).unwrap()
}

fn request(secret: Option<&str>) -> ExchangeRequest {
    ExchangeRequest {
        code: "CODE".to_string(),
        verifier: "VERIFIER".to_string(),
        redirect_uri: "http://localhost:3128".to_string(),
        client_id: "client".to_string(),
        client_secret: secret.map(ToString::to_string),
    }
}

fn candidate(name: &str, url: String, encoding: BodyEncoding, fields: FieldStyle) -> ProbeCandidate {
    ProbeCandidate {
        name: name.to_string(),
        url,
        encoding,
        fields,
        client_auth: ClientAuth::None,
        headers: BTreeMap::new(),
    }
}

/// Each failure is classified and the run stops at the first token
#[tokio::test]
async fn test_sequential_probe_stops_at_first_token() {
    let (base, state) = spawn_fake().await;
    let candidates = vec![
        candidate("missing", format!("{base}/missing"), BodyEncoding::Json, FieldStyle::Snake),
        candidate("grant", format!("{base}/grant"), BodyEncoding::Form, FieldStyle::Oauth),
        candidate("operation", format!("{base}/operation"), BodyEncoding::Json, FieldStyle::Snake),
        candidate("token", format!("{base}/token"), BodyEncoding::Json, FieldStyle::Snake),
        candidate("never", format!("{base}/never"), BodyEncoding::Json, FieldStyle::Snake),
    ];

    let report = prober().run(&candidates, &request(None)).await;

    let names: Vec<_> = report.attempts.iter().map(|a| a.candidate.as_str()).collect();
    assert_eq!(names, vec!["missing", "grant", "operation", "token"]);
    assert_eq!(report.attempts[0].outcome, ProbeOutcome::NotFound);
    assert_eq!(
        report.attempts[1].outcome,
        ProbeOutcome::InvalidGrant {
            description: Some("Code expired".to_string())
        }
    );
    assert_eq!(report.attempts[2].outcome, ProbeOutcome::UnknownOperation);
    assert_eq!(report.successful_candidate(), Some("token"));

    let tokens = report.tokens().unwrap();
    assert_eq!(tokens.access_token, "AT1");
    assert_eq!(tokens.refresh_token.as_deref(), Some("RT1"));
    assert_eq!(tokens.expires_in, Some(3600));
    assert_eq!(state.never_hit.load(Ordering::SeqCst), 0);
}

/// Basic auth is only sent when a secret was supplied
#[tokio::test]
async fn test_basic_client_auth() {
    let (base, _) = spawn_fake().await;
    let mut basic = candidate("basic", format!("{base}/basic"), BodyEncoding::Form, FieldStyle::Oauth);
    basic.client_auth = ClientAuth::Basic;
    let prober = prober();

    let without = prober.attempt(&basic, &request(None)).await;
    assert_eq!(without.outcome, ProbeOutcome::InvalidClient { description: None });

    let with = prober.attempt(&basic, &request(Some("secret"))).await;
    match with.outcome {
        ProbeOutcome::Tokens(tokens) => {
            assert_eq!(tokens.access_token, "AT2");
            assert_eq!(tokens.token_type.as_deref(), Some("Bearer"));
        }
        other => panic!("expected tokens, got {other:?}"),
    }
}

/// Candidate headers override the content type and reach the endpoint
#[tokio::test]
async fn test_custom_headers_and_camel_fields() {
    let (base, _) = spawn_fake().await;
    let mut target = candidate("target", format!("{base}/target"), BodyEncoding::Json, FieldStyle::Camel);
    target.headers = BTreeMap::from([
        (
            "Content-Type".to_string(),
            "application/x-amz-json-1.1".to_string(),
        ),
        (
            "X-Amz-Target".to_string(),
            "KiroWebPortalService.GetToken".to_string(),
        ),
    ]);

    let attempt = prober().attempt(&target, &request(None)).await;
    assert!(attempt.outcome.is_success(), "got {}", attempt.outcome);
}

/// An unreachable endpoint is a transport outcome, not an error
#[tokio::test]
async fn test_transport_failure_is_an_outcome() {
    let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
    let addr = listener.local_addr().unwrap();
    drop(listener);

    let dead = candidate("dead", format!("http://{addr}/token"), BodyEncoding::Json, FieldStyle::Snake);
    let report = prober().run(&[dead], &request(None)).await;

    assert_eq!(report.attempts.len(), 1);
    assert!(matches!(report.attempts[0].outcome, ProbeOutcome::Transport(_)));
    assert!(report.tokens().is_none());
}
