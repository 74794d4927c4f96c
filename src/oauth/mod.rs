//! OAuth 2.0 / PKCE sign-in pieces
//!
//! - PKCE verifier/challenge generation (RFC 7636)
//! - Authorization URL construction
//! - One-shot local callback receiver
//! - Token-exchange probe with outcome classification

mod authorize;
mod callback;
mod pkce;
pub mod probe;
mod token;

pub use authorize::{AuthorizationRequest, AuthorizeStyle, generate_state};
pub use callback::{CallbackParams, CallbackResult, CallbackServer};
pub use pkce::{MAX_VERIFIER_LEN, MIN_VERIFIER_LEN, PkcePair, VerifierStyle, challenge_for};
pub use probe::{
    BodyEncoding, ClientAuth, ExchangeRequest, FieldStyle, ProbeAttempt, ProbeCandidate,
    ProbeOutcome, ProbeReport, TokenProber,
};
pub use token::{TokenSet, email_from_id_token};
