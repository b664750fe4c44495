mod cli;
mod config;
mod records;
mod secrets;
mod storage;

use clap::Parser;
use color_eyre::Result;
use credkeep_core::CredentialError;
use credkeep_storage::{CredentialStore, CredentialVault, KeySource};
use tracing::info;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt, EnvFilter};

use crate::cli::{Command, ConfigCommand, KeyCommand};

fn main() -> Result<()> {
    color_eyre::install()?;
    init_tracing();

    let cli = cli::Cli::parse();
    let config = config::load(cli.config.as_deref())?;
    match cli.command {
        Command::Version => print_version(),
        Command::Health => run_health_check(&config)?,
        Command::Setup => run_setup(&config)?,
        Command::Config(ConfigCommand::Init) => init_config(cli.config, &config)?,
        Command::Key(KeyCommand::Generate) => generate_key(&config)?,
        Command::Key(KeyCommand::Path) => print_key_location(&config)?,
        Command::Store(cmd) => records::handle(cmd, &config)?,
        Command::Vault(cmd) => secrets::handle(cmd, &config)?,
    }

    Ok(())
}

fn init_tracing() {
    // Respect user-provided filters, default to info. Logs go to stderr so
    // `store get` / `vault load` output stays machine-readable.
    let env_filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"));
    let fmt_layer = tracing_subscriber::fmt::layer()
        .with_target(false)
        .with_writer(std::io::stderr);
    tracing_subscriber::registry()
        .with(env_filter)
        .with(fmt_layer)
        .init();
}

fn print_version() {
    println!("credkeep {}", env!("CARGO_PKG_VERSION"));
}

fn generate_key(config: &config::Config) -> Result<()> {
    let keys = storage::key_source(config)?;
    keys.generate()?;
    println!("Key created at {}", keys.location());
    Ok(())
}

fn print_key_location(config: &config::Config) -> Result<()> {
    println!("{}", storage::key_source(config)?.location());
    Ok(())
}

/// First-run setup: make sure a key exists and the plaintext store is initialised.
fn run_setup(config: &config::Config) -> Result<()> {
    let keys = storage::key_source(config)?;
    let created = ensure_key(keys.as_ref())?;
    let store = storage::store_from_config(config)?;
    store.ensure_exists()?;
    let state = if created { "created" } else { "existing" };
    println!("Key: {} ({state})", keys.location());
    println!("Store: {}", store.path().display());
    Ok(())
}

/// Generates a key unless one is already there. Returns whether it generated.
fn ensure_key(keys: &dyn KeySource) -> Result<bool> {
    match keys.generate() {
        Ok(_) => Ok(true),
        Err(CredentialError::KeyAlreadyExists { location }) => {
            info!(%location, "key already present, keeping it");
            Ok(false)
        }
        Err(err) => Err(err.into()),
    }
}

/// Runs a quick health check of the key, the vault and the plaintext store.
fn run_health_check(config: &config::Config) -> Result<()> {
    let vault = storage::vault_from_config(config)?;
    let store = storage::store_from_config(config)?;
    let report = check_health(&vault, &store)?;
    println!("Key: ok");
    println!("Vault: ok ({} entries)", report.vault_entries);
    println!("Store: ok ({} records)", report.store_records);
    Ok(())
}

#[derive(Debug, PartialEq, Eq)]
struct HealthReport {
    vault_entries: usize,
    store_records: usize,
}

fn check_health(vault: &CredentialVault, store: &CredentialStore) -> Result<HealthReport> {
    Ok(HealthReport {
        vault_entries: vault.list_paths()?.len(),
        store_records: store.list_keys()?.len(),
    })
}

fn init_config(path: Option<std::path::PathBuf>, config: &config::Config) -> Result<()> {
    let path = match path {
        Some(path) => path,
        None => config::default_path()?,
    };
    let path = config::write_if_missing(config, &path)?;
    println!("Config initialized at {}", path.display());
    Ok(())
}
