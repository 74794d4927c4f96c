//! OAuth Callback Receiver
//!
//! A single-purpose HTTP listener that captures the authorization code the
//! provider redirects back with. The handler writes into a one-shot slot
//! held by an explicit context; the caller awaits that slot with a timeout.

use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Duration;

use axum::{
    Router,
    extract::{Query, State},
    http::StatusCode,
    response::Html,
    routing::get,
};
use parking_lot::Mutex;
use serde::Deserialize;
use tokio::net::TcpListener;
use tokio::sync::oneshot;
use tokio::task::JoinHandle;
use tracing::{debug, info, warn};

use crate::{Error, Result};

/// OAuth callback query parameters
#[derive(Debug, Default, Deserialize)]
pub struct CallbackParams {
    /// Authorization code
    pub code: Option<String>,

    /// State parameter
    pub state: Option<String>,

    /// Error code
    pub error: Option<String>,

    /// Error description
    pub error_description: Option<String>,
}

/// Values captured from a successful redirect
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CallbackResult {
    /// Authorization code
    pub code: String,

    /// State parameter as received (may be absent)
    pub state: Option<String>,
}

impl CallbackResult {
    /// Parse what an operator pasted after a failed redirect.
    ///
    /// Accepts the full redirect URL, a bare query string, or the code itself.
    #[must_use]
    pub fn from_pasted(input: &str) -> Option<Self> {
        let input = input.trim();
        if input.is_empty() {
            return None;
        }
        if !input.contains("code=") {
            return Some(Self {
                code: input.to_string(),
                state: None,
            });
        }

        let query = input.split_once('?').map_or(input, |(_, q)| q);
        let query = query.split_once('#').map_or(query, |(q, _)| q);
        let mut code = None;
        let mut state = None;
        for (key, value) in url::form_urlencoded::parse(query.as_bytes()) {
            match key.as_ref() {
                "code" => code = Some(value.into_owned()),
                "state" => state = Some(value.into_owned()),
                _ => {}
            }
        }
        code.filter(|c| !c.is_empty()).map(|code| Self { code, state })
    }
}

/// Shared with the handler. Written at most once.
struct CallbackContext {
    expected_state: Option<String>,
    slot: Mutex<Option<oneshot::Sender<Result<CallbackResult>>>>,
}

impl CallbackContext {
    /// Hand the outcome to the waiting caller. Returns false if already delivered.
    fn deliver(&self, outcome: Result<CallbackResult>) -> bool {
        match self.slot.lock().take() {
            Some(tx) => {
                let _ = tx.send(outcome);
                true
            }
            None => false,
        }
    }
}

/// A running callback receiver
pub struct CallbackServer {
    local_addr: SocketAddr,
    rx: oneshot::Receiver<Result<CallbackResult>>,
    server: JoinHandle<()>,
}

impl CallbackServer {
    /// Bind the listener and start serving.
    ///
    /// When `expected_state` is set, a redirect carrying a different state is
    /// delivered as [`Error::StateMismatch`].
    pub async fn bind(addr: &str, expected_state: Option<String>) -> Result<Self> {
        let listener = TcpListener::bind(addr)
            .await
            .map_err(|e| Error::CallbackBind {
                addr: addr.to_string(),
                reason: e.to_string(),
            })?;

        let local_addr = listener.local_addr().map_err(|e| Error::CallbackBind {
            addr: addr.to_string(),
            reason: e.to_string(),
        })?;

        let (tx, rx) = oneshot::channel();
        let ctx = Arc::new(CallbackContext {
            expected_state,
            slot: Mutex::new(Some(tx)),
        });

        let app = Router::new()
            .route("/", get(handle_callback))
            .route("/{*path}", get(handle_callback))
            .with_state(ctx);

        let server = tokio::spawn(async move {
            if let Err(e) = axum::serve(listener, app).await {
                warn!(error = %e, "Callback receiver stopped with an error");
            }
        });

        info!(addr = %local_addr, "OAuth callback receiver listening");

        Ok(Self {
            local_addr,
            rx,
            server,
        })
    }

    /// Address the listener is bound to
    #[must_use]
    pub fn local_addr(&self) -> SocketAddr {
        self.local_addr
    }

    /// `http://localhost:<port><path>` for this receiver
    #[must_use]
    pub fn callback_url(&self, path: &str) -> String {
        format!("http://localhost:{}{path}", self.local_addr.port())
    }

    /// Wait for the redirect, then stop the listener.
    ///
    /// Returns [`Error::CallbackTimeout`] when nothing arrives in time.
    pub async fn wait(mut self, timeout: Duration) -> Result<CallbackResult> {
        match tokio::time::timeout(timeout, &mut self.rx).await {
            Ok(Ok(outcome)) => outcome,
            Ok(Err(_)) => Err(Error::Internal(
                "Callback channel closed unexpectedly".to_string(),
            )),
            Err(_) => {
                warn!(?timeout, "Timed out waiting for OAuth callback");
                Err(Error::CallbackTimeout(timeout))
            }
        }
    }
}

impl Drop for CallbackServer {
    fn drop(&mut self) {
        self.server.abort();
    }
}

async fn handle_callback(
    State(ctx): State<Arc<CallbackContext>>,
    Query(params): Query<CallbackParams>,
) -> (StatusCode, Html<String>) {
    debug!(
        has_code = params.code.is_some(),
        has_error = params.error.is_some(),
        "Received callback request"
    );

    if let Some(error) = params.error {
        let description = params
            .error_description
            .unwrap_or_else(|| "No description provided".to_string());
        let page = error_page(&error, &description);
        if ctx.deliver(Err(Error::Authorization { error, description })) {
            return (StatusCode::BAD_REQUEST, Html(page));
        }
        return (StatusCode::OK, Html(placeholder_page()));
    }

    let Some(code) = params.code else {
        return (StatusCode::OK, Html(placeholder_page()));
    };

    if let Some(expected) = &ctx.expected_state {
        if params.state.as_deref() != Some(expected.as_str()) {
            if ctx.deliver(Err(Error::StateMismatch)) {
                return (
                    StatusCode::BAD_REQUEST,
                    Html(error_page("state_mismatch", "Invalid state parameter")),
                );
            }
            return (StatusCode::OK, Html(placeholder_page()));
        }
    }

    let result = CallbackResult {
        code,
        state: params.state,
    };
    if ctx.deliver(Ok(result)) {
        info!("Authorization code captured");
        (StatusCode::OK, Html(success_page()))
    } else {
        (StatusCode::OK, Html(placeholder_page()))
    }
}

fn success_page() -> String {
    r#"<!DOCTYPE html>
<html>
<head><title>Authorization Successful</title></head>
<body style="font-family: sans-serif; text-align: center; padding: 50px;">
    <h1 style="color: green;">Authorization Successful</h1>
    <p>You can close this window and return to the terminal.</p>
    <script>setTimeout(() => window.close(), 2000);</script>
</body>
</html>"#
        .to_string()
}

fn error_page(error: &str, description: &str) -> String {
    format!(
        r#"<!DOCTYPE html>
<html>
<head><title>Authorization Failed</title></head>
<body style="font-family: sans-serif; text-align: center; padding: 50px;">
    <h1 style="color: red;">Authorization Failed</h1>
    <p>{}</p>
    <p style="font-family: monospace; opacity: 0.7;">Error: {}</p>
</body>
</html>"#,
        escape_html(description),
        escape_html(error)
    )
}

fn placeholder_page() -> String {
    "OAuth callback receiver running...".to_string()
}

fn escape_html(s: &str) -> String {
    let mut out = String::with_capacity(s.len());
    for c in s.chars() {
        match c {
            '<' => out.push_str("&lt;"),
            '>' => out.push_str("&gt;"),
            '&' => out.push_str("&amp;"),
            '"' => out.push_str("&quot;"),
            '\'' => out.push_str("&#39;"),
            _ => out.push(c),
        }
    }
    out
}
