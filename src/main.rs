//! kiro-auth - Kiro OAuth/PKCE sign-in toolkit
//!
//! Drives the browser sign-in, captures the redirect, probes the token
//! endpoints and stores the resulting account where the desktop manager
//! expects it.

use std::io::{self, BufRead, Write};
use std::process::ExitCode;
use std::time::Duration;

use clap::{CommandFactory, Parser};
use tracing::{info, warn};

use kiro_auth::{
    Error, Result,
    accounts::{Account, AccountStore, ListedAccount, Provider},
    cli::{AccountsCommand, Cli, Command},
    config::Config,
    logscan::LogScanner,
    oauth::{
        AuthorizeStyle, CallbackResult, CallbackServer, ExchangeRequest, PkcePair, ProbeReport,
        TokenProber, TokenSet, VerifierStyle, generate_state,
    },
    setup_tracing,
};

/// Longest log line shown in full
const MAX_LINE_CHARS: usize = 100;

#[tokio::main]
async fn main() -> ExitCode {
    let cli = Cli::parse();

    // Setup tracing
    if let Err(e) = setup_tracing(&cli.log_level, cli.log_format.as_deref()) {
        eprintln!("Failed to setup tracing: {e}");
        return ExitCode::FAILURE;
    }

    if let Command::Completions { shell } = cli.command {
        clap_complete::generate(shell, &mut Cli::command(), "kiro-auth", &mut io::stdout());
        return ExitCode::SUCCESS;
    }

    let config = match Config::load(cli.config.as_deref()) {
        Ok(c) => c,
        Err(e) => {
            eprintln!("❌ Failed to load configuration: {e}");
            return ExitCode::FAILURE;
        }
    };

    let result = match cli.command {
        Command::Pkce {
            verifier,
            style,
            length,
        } => {
            run_pkce(&config, verifier, style, length);
            Ok(())
        }
        Command::AuthorizeUrl { style } => run_authorize_url(&config, style),
        Command::Callback {
            port,
            timeout,
            state,
        } => run_callback(&config, port, timeout, state).await,
        Command::Login {
            no_browser,
            timeout,
            dry_run,
        } => run_login(&config, no_browser, timeout, dry_run).await,
        Command::Exchange {
            code,
            verifier,
            redirect_uri,
            only,
        } => run_exchange(&config, code, verifier, redirect_uri, only.as_deref()).await,
        Command::Accounts(cmd) => run_accounts(&config, cmd),
        Command::Logs { dirs, tail } => run_logs(&config, dirs, tail),
        Command::Config => run_config(&config),
        Command::Completions { .. } => Ok(()),
    };

    match result {
        Ok(()) => ExitCode::SUCCESS,
        Err(e) => {
            eprintln!("❌ {e}");
            ExitCode::FAILURE
        }
    }
}

fn run_pkce(
    config: &Config,
    verifier: Option<String>,
    style: Option<VerifierStyle>,
    length: Option<usize>,
) {
    let pair = match verifier {
        Some(v) => PkcePair::from_verifier(v),
        None => PkcePair::generate(
            style.unwrap_or(config.provider.verifier),
            length.unwrap_or(config.provider.verifier_length),
        ),
    };
    println!("code_verifier:         {}", pair.verifier);
    println!("code_challenge:        {}", pair.challenge);
    println!("code_challenge_method: {}", pair.method());
}

fn run_authorize_url(config: &Config, style: Option<AuthorizeStyle>) -> Result<()> {
    let pkce = PkcePair::generate(config.provider.verifier, config.provider.verifier_length);
    let state = generate_state();
    let style = style.unwrap_or(config.provider.style);
    let url = config
        .authorization_request(style, state.clone(), pkce.challenge.clone())
        .build()?;

    println!("🔗 {url}\n");
    println!("state:         {state}");
    println!("code_verifier: {}", pkce.verifier);
    println!("\n💡 Keep the verifier; `kiro-auth exchange <code> <verifier>` needs it");
    Ok(())
}

async fn run_callback(
    config: &Config,
    port: Option<u16>,
    timeout: Option<Duration>,
    state: Option<String>,
) -> Result<()> {
    let addr = format!(
        "{}:{}",
        config.callback.host,
        port.unwrap_or(config.callback.port)
    );
    let timeout = timeout.unwrap_or(config.callback.timeout);

    let server = CallbackServer::bind(&addr, state).await?;
    println!(
        "👂 Waiting up to {} for a redirect to {}",
        humantime::format_duration(timeout),
        server.callback_url(&config.callback.path)
    );

    let result = server.wait(timeout).await?;
    println!("✅ Authorization code captured");
    println!("code:  {}", result.code);
    println!("state: {}", result.state.as_deref().unwrap_or("(none)"));
    Ok(())
}

async fn run_login(
    config: &Config,
    no_browser: bool,
    timeout: Option<Duration>,
    dry_run: bool,
) -> Result<()> {
    let pkce = PkcePair::generate(config.provider.verifier, config.provider.verifier_length);
    let state = generate_state();
    let redirect_uri = config.redirect_uri();
    let timeout = timeout.unwrap_or(config.callback.timeout);

    let url = config
        .authorization_request(config.provider.style, state.clone(), pkce.challenge.clone())
        .build()?;

    let server = match CallbackServer::bind(&config.callback_addr(), Some(state.clone())).await {
        Ok(server) => Some(server),
        Err(e) if e.allows_manual_fallback() => {
            warn!(error = %e, "Callback receiver unavailable, falling back to manual entry");
            eprintln!("⚠️  {e}");
            None
        }
        Err(e) => return Err(e),
    };

    println!("🔗 Sign in at:\n\n{url}\n");
    if !no_browser {
        if let Err(e) = open::that(url.as_str()) {
            warn!(error = %e, "Failed to open browser");
            println!("⚠️  Could not open a browser; open the URL above manually");
        }
    }

    let captured = match server {
        Some(server) => {
            println!(
                "👂 Waiting up to {} for the redirect...",
                humantime::format_duration(timeout)
            );
            match server.wait(timeout).await {
                Ok(result) => result,
                Err(e) if e.allows_manual_fallback() => {
                    eprintln!("⚠️  {e}");
                    prompt_for_code(&state).await?
                }
                Err(e) => return Err(e),
            }
        }
        None => prompt_for_code(&state).await?,
    };
    println!("✅ Authorization code captured");

    let request = ExchangeRequest {
        code: captured.code,
        verifier: pkce.verifier,
        redirect_uri,
        client_id: config.provider.client_id.clone(),
        client_secret: config.exchange.resolve_client_secret(),
    };
    let report = probe(config, &request, None).await?;
    print_report(&report);

    let Some(tokens) = report.tokens() else {
        return Err(Error::Internal(
            "No candidate endpoint returned tokens".to_string(),
        ));
    };

    let account = Account::from_tokens(Provider::Kiro, tokens, None);
    if dry_run {
        println!("\n🧪 Dry run - account not stored");
        print_json(&account)?;
        return Ok(());
    }

    let store = AccountStore::open(config.store_root()?)?;
    store.create(&account)?;
    println!("\n✅ Added account {} ({})", account.id, account.email);
    Ok(())
}

/// Ask the operator to paste the redirect URL or code
async fn prompt_for_code(expected_state: &str) -> Result<CallbackResult> {
    println!("📋 Paste the full redirect URL (or just the code) and press Enter:");
    let line = tokio::task::spawn_blocking(|| {
        let mut out = io::stdout();
        let _ = write!(out, "> ");
        let _ = out.flush();
        let mut line = String::new();
        io::stdin().lock().read_line(&mut line).map(|_| line)
    })
    .await
    .map_err(|e| Error::Internal(format!("Input task failed: {e}")))??;

    let pasted = CallbackResult::from_pasted(&line)
        .ok_or_else(|| Error::Internal("No authorization code entered".to_string()))?;
    if let Some(state) = &pasted.state {
        if state != expected_state {
            return Err(Error::StateMismatch);
        }
    }
    Ok(pasted)
}

async fn run_exchange(
    config: &Config,
    code: String,
    verifier: String,
    redirect_uri: Option<String>,
    only: Option<&str>,
) -> Result<()> {
    let request = ExchangeRequest {
        code,
        verifier,
        redirect_uri: redirect_uri.unwrap_or_else(|| config.redirect_uri()),
        client_id: config.provider.client_id.clone(),
        client_secret: config.exchange.resolve_client_secret(),
    };
    let report = probe(config, &request, only).await?;
    print_report(&report);

    match report.tokens() {
        Some(tokens) => {
            println!();
            print_json(tokens)
        }
        None => Err(Error::Internal(
            "No candidate endpoint returned tokens".to_string(),
        )),
    }
}

async fn probe(config: &Config, request: &ExchangeRequest, only: Option<&str>) -> Result<ProbeReport> {
    let candidates: Vec<_> = config
        .exchange
        .candidates
        .iter()
        .filter(|c| only.is_none_or(|name| c.name == name))
        .cloned()
        .collect();
    if candidates.is_empty() {
        return Err(Error::Config(match only {
            Some(name) => format!("No exchange candidate named '{name}'"),
            None => "No exchange candidates configured".to_string(),
        }));
    }

    let prober = TokenProber::new(config.exchange.timeout, &config.exchange.user_agent)?;
    info!(candidates = candidates.len(), "Probing token endpoints");
    Ok(prober.run(&candidates, request).await)
}

fn print_report(report: &ProbeReport) {
    println!("\n🔍 Token exchange attempts:");
    for attempt in &report.attempts {
        let marker = if attempt.outcome.is_success() { "✅" } else { "❌" };
        println!(
            "  {marker} {} ({} ms)\n     {}\n     {} - {}",
            attempt.candidate,
            attempt.elapsed.as_millis(),
            attempt.url,
            attempt.outcome,
            attempt.outcome.hint()
        );
    }
}

fn run_accounts(config: &Config, cmd: AccountsCommand) -> Result<()> {
    let store = AccountStore::open(config.store_root()?)?;

    match cmd {
        AccountsCommand::List => {
            let report = store.reconcile()?;
            for id in &report.dropped {
                println!("🧹 Dropped index entry without record: {id}");
            }
            for id in &report.orphans {
                println!("⚠️  Record without index entry: {id}");
            }

            let current = store.load_index()?.current_account_id;
            let listed = store.list()?;
            if listed.is_empty() {
                println!("No accounts in {}", store.root().display());
                return Ok(());
            }

            println!("Found {} account(s) in {}:\n", listed.len(), store.root().display());
            for entry in &listed {
                let marker = if current.as_deref() == Some(entry.id()) { "*" } else { " " };
                match entry {
                    ListedAccount::Loaded(account) => {
                        let mut flags = Vec::new();
                        if account.disabled {
                            flags.push("disabled");
                        }
                        if account.is_token_expired() {
                            flags.push("expired");
                        }
                        let flags = if flags.is_empty() {
                            String::new()
                        } else {
                            format!(" [{}]", flags.join(", "))
                        };
                        println!(
                            "{marker} {} {} ({}){flags}",
                            account.id, account.email, account.provider
                        );
                    }
                    ListedAccount::Missing(summary) => {
                        println!("{marker} {} {} ❌ record missing", summary.id, summary.email);
                    }
                    ListedAccount::Unreadable { summary, reason } => {
                        println!("{marker} {} {} ❌ unreadable: {reason}", summary.id, summary.email);
                    }
                }
            }
            println!(
                "\nkiro: {} indexed / {} records",
                store.count_indexed(Provider::Kiro)?,
                store.count_records(Provider::Kiro)?
            );
            Ok(())
        }
        AccountsCommand::Show { id } => print_json(&store.load(&id)?),
        AccountsCommand::Add {
            access_token,
            refresh_token,
            expires_in,
            email,
            profile_arn,
            user_id,
        } => {
            let tokens = TokenSet {
                profile_arn,
                ..TokenSet::manual(access_token, refresh_token, expires_in)
            };
            let account =
                Account::from_tokens(Provider::Kiro, &tokens, email).with_manual_user_id(user_id);
            store.create(&account)?;
            println!("✅ Added account {} ({})", account.id, account.email);
            Ok(())
        }
        AccountsCommand::Remove { id } => {
            store.delete(&id)?;
            println!("✅ Removed account {id}");
            Ok(())
        }
        AccountsCommand::Use { id } => {
            store.set_current(&id)?;
            println!("✅ Current account: {id}");
            Ok(())
        }
        AccountsCommand::Reconcile => {
            let report = store.reconcile()?;
            if report.is_clean() {
                println!("✅ Index and records are consistent");
                return Ok(());
            }
            for id in &report.dropped {
                println!("🧹 Dropped index entry without record: {id}");
            }
            for id in &report.orphans {
                println!("⚠️  Record without index entry: {id}");
            }
            for path in &report.removed_temp {
                println!("🧹 Removed temp file {}", path.display());
            }
            Ok(())
        }
        AccountsCommand::Export { file } => {
            let bundle = store.export()?;
            let content = serde_json::to_string_pretty(&bundle)?;
            std::fs::write(&file, content)?;
            println!(
                "✅ Exported {} account(s) to {}",
                bundle.accounts.len(),
                file.display()
            );
            Ok(())
        }
    }
}

fn run_logs(config: &Config, dirs: Vec<std::path::PathBuf>, tail: Option<usize>) -> Result<()> {
    let scanner = if dirs.is_empty() {
        LogScanner::from_config(&config.logs)?
    } else {
        LogScanner::new(dirs, &config.logs.keywords, &config.logs.extensions)?
    };
    let tail = tail.unwrap_or(config.logs.tail);

    let report = scanner.scan();
    if report.files.is_empty() && report.unreadable.is_empty() {
        println!("❌ No log files found. Searched:");
        for dir in scanner.directories() {
            println!("  • {}", dir.display());
        }
        return Ok(());
    }

    for file in &report.files {
        println!("\n📄 {}", file.path.display());
        if file.entries.is_empty() {
            println!("   no Kiro entries");
            continue;
        }
        println!("   {} Kiro entries", file.entries.len());
        let skip = file.entries.len().saturating_sub(tail);
        for entry in &file.entries[skip..] {
            println!(
                "  [{}] Line {}: {}",
                entry.timestamp.as_deref().unwrap_or("N/A"),
                entry.line_no,
                truncate(&entry.content, MAX_LINE_CHARS)
            );
        }
    }
    for (path, reason) in &report.unreadable {
        println!("\n❌ {}: {reason}", path.display());
    }

    println!("\n📊 {} Kiro entries", report.total_entries());
    for (operation, count) in &report.counts {
        println!("  {operation}: {count}");
    }
    Ok(())
}

fn run_config(config: &Config) -> Result<()> {
    let yaml = serde_yaml::to_string(config)
        .map_err(|e| Error::Internal(format!("Failed to serialize configuration: {e}")))?;
    print!("{yaml}");
    Ok(())
}

fn print_json<T: serde::Serialize>(value: &T) -> Result<()> {
    println!("{}", serde_json::to_string_pretty(value)?);
    Ok(())
}

fn truncate(s: &str, max: usize) -> String {
    if s.chars().count() <= max {
        s.to_string()
    } else {
        let cut: String = s.chars().take(max).collect();
        format!("{cut}...")
    }
}
