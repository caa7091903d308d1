//! tokenkeep - sign in once, stay signed in.
//!
//! This binary is the composition root: it builds exactly one `SessionStore`
//! from the configuration, hydrates it, and runs a single command against it.

use std::io::{self, Write};

use anyhow::{Context, Result};
use tokenkeep_core::{Config, Credentials, SessionStore};
use tracing::{debug, info, warn};
use tracing_subscriber::{fmt, prelude::*, EnvFilter};

/// Overrides `api_base_url` from the config file
const API_URL_ENV: &str = "TOKENKEEP_API_URL";

/// Passphrase for the encrypted_file storage backend
const PASSPHRASE_ENV: &str = "TOKENKEEP_PASSPHRASE";

const USAGE: &str = "\
Usage: tokenkeep <command>

Commands:
  login [username]   Sign in and remember the credentials
  status             Show the current session state
  whoami             Fetch the signed-in user's profile
  logout             Sign out and forget stored credentials
";

/// Initialize the tracing subscriber for logging
fn init_tracing() {
    // Use RUST_LOG env var to control log level (e.g., RUST_LOG=debug)
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("warn"));

    tracing_subscriber::registry()
        .with(fmt::layer().with_writer(io::stderr))
        .with(filter)
        .init();
}

fn load_config() -> Result<Config> {
    let mut config = Config::load()?;
    if let Ok(url) = std::env::var(API_URL_ENV) {
        debug!(url = %url, "Using API URL from environment");
        config.api_base_url = url;
    }
    Ok(config)
}

fn build_store(config: &Config) -> Result<SessionStore> {
    let passphrase = std::env::var(PASSPHRASE_ENV).ok();
    let storage = config.build_storage(passphrase.as_deref())?;
    let api = config.build_api()?;
    Ok(SessionStore::with_options(api, storage, config.store_options()))
}

#[tokio::main]
async fn main() -> Result<()> {
    // Load .env file if present (silently ignore if not found)
    let _ = dotenvy::dotenv();

    init_tracing();

    let args: Vec<String> = std::env::args().skip(1).collect();
    let Some(command) = args.first() else {
        eprint!("{}", USAGE);
        std::process::exit(2);
    };

    let mut config = load_config()?;
    let store = build_store(&config)?;

    match command.as_str() {
        "login" => login(&store, &mut config, args.get(1).cloned()).await,
        "status" => status(&store).await,
        "whoami" => whoami(&store).await,
        "logout" => logout(&store).await,
        "-h" | "--help" | "help" => {
            print!("{}", USAGE);
            Ok(())
        }
        other => {
            eprintln!("Unknown command: {}\n", other);
            eprint!("{}", USAGE);
            std::process::exit(2);
        }
    }
}

async fn login(store: &SessionStore, config: &mut Config, username: Option<String>) -> Result<()> {
    store.hydrate().await;

    let username = match username {
        Some(username) => username,
        None => prompt_username(config.last_username.as_deref())?,
    };
    if username.is_empty() {
        anyhow::bail!("Username required");
    }
    let password = rpassword::prompt_password("Password: ")?;

    println!("\nAuthenticating...");
    store
        .sign_in(Credentials::new(username.clone(), password))
        .await
        .context("Login failed")?;

    config.last_username = Some(username);
    if let Err(e) = config.save() {
        warn!(error = %e, "Failed to save config");
    }

    match store.profile().as_ref().and_then(|p| p.label()) {
        Some(label) => println!("Signed in as {}", label),
        None => println!("Signed in"),
    }
    Ok(())
}

fn prompt_username(last_username: Option<&str>) -> Result<String> {
    match last_username {
        Some(last) => print!("Username [{}]: ", last),
        None => print!("Username: "),
    }
    io::stdout().flush()?;

    let mut input = String::new();
    io::stdin().read_line(&mut input)?;
    let input = input.trim();

    Ok(match (input.is_empty(), last_username) {
        (true, Some(last)) => last.to_string(),
        _ => input.to_string(),
    })
}

async fn status(store: &SessionStore) -> Result<()> {
    store.hydrate().await;
    let state = store.state();

    if !state.is_storage_available {
        println!("Storage:   unavailable (session kept in memory only)");
    }
    match state.session {
        Some(ref session) if state.is_signed_in => {
            println!("Session:   signed in ({} token, issued {})", session.token_type, session.age_display());
        }
        _ => println!("Session:   signed out"),
    }
    if let Some(label) = state.profile.as_ref().and_then(|p| p.label()) {
        println!("Profile:   {}", label);
    }
    Ok(())
}

async fn whoami(store: &SessionStore) -> Result<()> {
    store.hydrate().await;
    match store.refresh_profile().await? {
        Some(profile) => {
            println!("{}", profile.label().unwrap_or("(no name on profile)"));
            Ok(())
        }
        None => {
            eprintln!("Not signed in. Run `tokenkeep login` first.");
            std::process::exit(1);
        }
    }
}

async fn logout(store: &SessionStore) -> Result<()> {
    store.sign_out().await;
    info!("Stored session and credentials removed");
    println!("Signed out");
    Ok(())
}
