use std::path::PathBuf;
use std::sync::Arc;

use anyhow::{anyhow, Context, Result};
use clap::{Parser, Subcommand};
use directories::ProjectDirs;
use tracing::info;
use tracing_subscriber::EnvFilter;
use zeroize::Zeroizing;

use hv_core::config::SETTINGS_FILE;
use hv_core::{CoreError, HavenSettings, MemoryHub, MemoryTransport, Mode, Session};
use hv_crypto::safety::generate_safety_number;
use hv_crypto::PublicKeyBytes;
use hv_store::{CredentialVault, KeyringBackend};

const APP_QUALIFIER: &str = "org";
const APP_ORG: &str = "haven";
const APP_NAME: &str = "haven";
const KEYRING_SERVICE: &str = "Haven";
const DEFAULT_LOG_FILTER: &str = "haven=info,hv_core=info,hv_store=info";

#[derive(Parser, Debug)]
#[command(name = "haven", author, version, about = "Haven secure messaging core", long_about = None)]
struct Cli {
    /// Override the data directory
    #[arg(long, global = true)]
    data_dir: Option<PathBuf>,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand, Debug)]
enum Commands {
    /// Set the PIN and, optionally, a duress PIN
    Init {
        /// Skip the duress PIN prompt
        #[arg(long)]
        no_duress: bool,
    },
    /// Check a PIN and open its store
    Unlock,
    /// Replace the PIN, keeping existing data
    ChangePin,
    /// Destroy real data, leaving only the decoy profile
    Panic {
        /// Do not ask for confirmation
        #[arg(long)]
        yes: bool,
    },
    /// Fill the decoy store with plausible history
    Decoy,
    /// Compute the safety number for two base64url public keys
    SafetyNumber { key_a: String, key_b: String },
    /// Show whether this device is set up
    Status,
}

#[tokio::main]
async fn main() -> Result<()> {
    init_logging();
    let cli = Cli::parse();

    if let Commands::SafetyNumber { key_a, key_b } = &cli.command {
        return safety_number_command(key_a, key_b);
    }

    let data = match cli.data_dir {
        Some(dir) => dir,
        None => default_data_dir()?,
    };
    let session = open_session(data)?;

    let result = match cli.command {
        Commands::Init { no_duress } => init_command(&session, no_duress).await,
        Commands::Unlock => unlock_command(&session).await,
        Commands::ChangePin => change_pin_command(&session).await,
        Commands::Panic { yes } => panic_command(&session, yes).await,
        Commands::Decoy => decoy_command(&session).await,
        Commands::Status => status_command(&session),
        Commands::SafetyNumber { .. } => Ok(()),
    };
    session.close().await;
    result
}

fn init_logging() {
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(DEFAULT_LOG_FILTER));
    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(std::io::stderr)
        .init();
}

fn default_data_dir() -> Result<PathBuf> {
    let dirs = ProjectDirs::from(APP_QUALIFIER, APP_ORG, APP_NAME)
        .ok_or_else(|| anyhow!("cannot determine data directory"))?;
    Ok(dirs.data_dir().to_path_buf())
}

fn open_session(data: PathBuf) -> Result<Session> {
    std::fs::create_dir_all(&data)
        .with_context(|| format!("create data dir {}", data.display()))?;
    let settings = HavenSettings::load(&data)?;
    let vault = CredentialVault::new(Arc::new(KeyringBackend::new(KEYRING_SERVICE)));
    let transport = Arc::new(MemoryTransport::connected(MemoryHub::new()));
    Ok(Session::open(&data, settings, vault, transport)?)
}

async fn init_command(session: &Session, no_duress: bool) -> Result<()> {
    if session.security().is_initialized()? {
        return Err(anyhow!("already initialized at {}", session.data_dir().display()));
    }
    let pin = prompt_pin_twice("Choose PIN", "HAVEN_PIN")?;
    let duress = if no_duress {
        None
    } else {
        let d = prompt_pin_twice("Choose duress PIN (empty to skip)", "HAVEN_DURESS_PIN")?;
        (!d.is_empty()).then_some(d)
    };
    session
        .security()
        .initialize_with_pin(&pin, duress.as_ref().map(|d| d.as_str()))
        .await?;

    if !session.data_dir().join(SETTINGS_FILE).exists() {
        session.settings().save(session.data_dir())?;
    }
    info!(event = "cli_init", data_dir = %session.data_dir().display());
    println!("initialized");
    Ok(())
}

async fn unlock_command(session: &Session) -> Result<()> {
    let pin = prompt_pin("PIN", "HAVEN_PIN")?;
    match session.unlock(&pin).await {
        Ok(_) => {
            println!("unlocked");
            Ok(())
        }
        Err(CoreError::Authentication) => {
            println!("invalid");
            Ok(())
        }
        Err(e) => Err(e.into()),
    }
}

async fn change_pin_command(session: &Session) -> Result<()> {
    let old = prompt_pin("Current PIN", "HAVEN_PIN")?;
    let new = prompt_pin_twice("New PIN", "HAVEN_NEW_PIN")?;
    session.security().change_pin(&old, &new).await?;
    println!("PIN changed");
    Ok(())
}

async fn panic_command(session: &Session, yes: bool) -> Result<()> {
    if !yes {
        let answer = prompt_line("Type WIPE to destroy all real data: ")?;
        if answer.trim() != "WIPE" {
            println!("aborted");
            return Ok(());
        }
    }
    let report = session.panic().await;
    for failure in &report.failures {
        eprintln!("step {} failed: {}", failure.step, failure.error);
    }
    if report.is_clean() {
        println!("wiped");
        Ok(())
    } else {
        Err(anyhow!("wipe finished with {} failed step(s)", report.failures.len()))
    }
}

async fn decoy_command(session: &Session) -> Result<()> {
    let pin = prompt_pin("Duress PIN", "HAVEN_DURESS_PIN")?;
    match session.unlock(&pin).await {
        Ok(Mode::Duress) => {
            let rows = session.duress().generate_decoy_data().await?;
            println!("decoy rows written: {rows}");
            Ok(())
        }
        Ok(Mode::Real) | Err(CoreError::Authentication) => {
            println!("invalid");
            Ok(())
        }
        Err(e) => Err(e.into()),
    }
}

fn status_command(session: &Session) -> Result<()> {
    println!("data dir:    {}", session.data_dir().display());
    println!(
        "initialized: {}",
        if session.security().is_initialized()? { "yes" } else { "no" }
    );
    Ok(())
}

fn safety_number_command(key_a: &str, key_b: &str) -> Result<()> {
    let a = PublicKeyBytes::from_b64(key_a).context("first key")?;
    let b = PublicKeyBytes::from_b64(key_b).context("second key")?;
    println!("{}", generate_safety_number(&a, &b));
    Ok(())
}

fn read_pin(prompt: &str) -> Result<Zeroizing<String>> {
    rpassword::prompt_password(format!("{prompt}: "))
        .map(Zeroizing::new)
        .map_err(|e| anyhow!("PIN prompt: {e}"))
}

/// `env` wins over the terminal prompt, for scripted use.
fn prompt_pin(prompt: &str, env: &str) -> Result<Zeroizing<String>> {
    if let Ok(pin) = std::env::var(env) {
        if !pin.is_empty() {
            return Ok(Zeroizing::new(pin));
        }
    }
    read_pin(prompt)
}

fn prompt_pin_twice(prompt: &str, env: &str) -> Result<Zeroizing<String>> {
    if let Ok(pin) = std::env::var(env) {
        return Ok(Zeroizing::new(pin));
    }
    let first = read_pin(prompt)?;
    let second = read_pin("Confirm")?;
    if first != second {
        return Err(anyhow!("PINs do not match"));
    }
    Ok(first)
}

fn prompt_line(prompt: &str) -> Result<String> {
    use std::io::Write;
    print!("{prompt}");
    std::io::stdout().flush()?;
    let mut line = String::new();
    std::io::stdin().read_line(&mut line)?;
    Ok(line)
}
