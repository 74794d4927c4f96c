//! Command-line interface

use std::path::PathBuf;
use std::time::Duration;

use clap::{Parser, Subcommand};
use clap_complete::Shell;

use crate::oauth::{AuthorizeStyle, VerifierStyle};

/// Kiro OAuth/PKCE sign-in toolkit for the DroidGravity manager
#[derive(Parser, Debug)]
#[command(name = "kiro-auth")]
#[command(version, about, long_about = None)]
pub struct Cli {
    /// Path to configuration file (YAML)
    #[arg(short, long, env = "KIRO_AUTH_CONFIG", global = true)]
    pub config: Option<PathBuf>,

    /// Log level (trace, debug, info, warn, error)
    #[arg(
        long,
        default_value = "info",
        env = "KIRO_AUTH_LOG_LEVEL",
        global = true
    )]
    pub log_level: String,

    /// Log format (text, json)
    #[arg(long, env = "KIRO_AUTH_LOG_FORMAT", global = true)]
    pub log_format: Option<String>,

    /// Subcommand
    #[command(subcommand)]
    pub command: Command,
}

/// Available subcommands
#[derive(Subcommand, Debug)]
pub enum Command {
    /// Generate a PKCE verifier/challenge pair
    Pkce {
        /// Derive the challenge from this verifier instead of generating one
        #[arg(long)]
        verifier: Option<String>,

        /// Verifier style (alphanumeric, random_bytes)
        #[arg(long, value_parser = parse_verifier_style)]
        style: Option<VerifierStyle>,

        /// Verifier length for the alphanumeric style (43-128)
        #[arg(long)]
        length: Option<usize>,
    },

    /// Print an authorization URL with fresh state and PKCE values
    AuthorizeUrl {
        /// Sign-in page style (cognito, portal)
        #[arg(long)]
        style: Option<AuthorizeStyle>,
    },

    /// Run the callback receiver and print the captured code
    Callback {
        /// Port to listen on
        #[arg(short, long)]
        port: Option<u16>,

        /// How long to wait (e.g. "5m", "30s")
        #[arg(long, value_parser = humantime::parse_duration)]
        timeout: Option<Duration>,

        /// Expected state; a different state is rejected
        #[arg(long)]
        state: Option<String>,
    },

    /// Full interactive sign-in: browser, callback, token exchange, store
    Login {
        /// Print the URL instead of opening a browser
        #[arg(long)]
        no_browser: bool,

        /// How long to wait for the browser redirect
        #[arg(long, value_parser = humantime::parse_duration)]
        timeout: Option<Duration>,

        /// Exchange the code but do not store the account
        #[arg(long)]
        dry_run: bool,
    },

    /// Try the token-exchange candidates with a captured code
    Exchange {
        /// Authorization code
        code: String,

        /// PKCE verifier used for the authorization request
        verifier: String,

        /// Redirect URI sent with the authorization request
        #[arg(long)]
        redirect_uri: Option<String>,

        /// Only try the candidate with this name
        #[arg(long)]
        only: Option<String>,
    },

    /// Account store management
    #[command(subcommand)]
    Accounts(AccountsCommand),

    /// Scan the desktop manager's logs for Kiro activity
    Logs {
        /// Directory to scan (repeatable; replaces the defaults)
        #[arg(long = "dir")]
        dirs: Vec<PathBuf>,

        /// Entries to show per file
        #[arg(long)]
        tail: Option<usize>,
    },

    /// Print the effective configuration as YAML
    Config,

    /// Generate shell completions
    Completions {
        /// Target shell
        shell: Shell,
    },
}

/// Account store subcommands
#[derive(Subcommand, Debug)]
pub enum AccountsCommand {
    /// List indexed accounts
    List,

    /// Show one account record
    Show {
        /// Account id
        id: String,
    },

    /// Add a Kiro account from tokens obtained elsewhere
    Add {
        /// Access token
        #[arg(long)]
        access_token: String,

        /// Refresh token
        #[arg(long)]
        refresh_token: String,

        /// Access token lifetime in seconds
        #[arg(long, default_value_t = crate::accounts::DEFAULT_EXPIRES_IN)]
        expires_in: i64,

        /// Account email
        #[arg(long)]
        email: Option<String>,

        /// Kiro profile ARN
        #[arg(long)]
        profile_arn: Option<String>,

        /// Kiro user id
        #[arg(long)]
        user_id: Option<String>,
    },

    /// Remove an account
    Remove {
        /// Account id
        id: String,
    },

    /// Make an account current
    Use {
        /// Account id
        id: String,
    },

    /// Repair drift between the index and the record files
    Reconcile,

    /// Export refresh tokens to a JSON file
    Export {
        /// Output file
        file: PathBuf,
    },
}

fn parse_verifier_style(s: &str) -> Result<VerifierStyle, String> {
    match s {
        "alphanumeric" => Ok(VerifierStyle::Alphanumeric),
        "random_bytes" | "random-bytes" => Ok(VerifierStyle::RandomBytes),
        other => Err(format!(
            "unknown verifier style '{other}' (expected alphanumeric or random_bytes)"
        )),
    }
}
