use std::{collections::BTreeMap, io::Write};

use color_eyre::Result;
use credkeep_storage::CredentialVault;

use crate::{
    cli::VaultCommand,
    config,
    records::{parse_fields, split_pair},
    storage,
};

/// Execute a vault subcommand against the configured encrypted vault.
pub fn handle(cmd: VaultCommand, config: &config::Config) -> Result<()> {
    let vault = storage::vault_from_config(config)?;
    run(cmd, &vault, &mut std::io::stdout().lock())
}

fn run(cmd: VaultCommand, vault: &CredentialVault, out: &mut impl Write) -> Result<()> {
    match cmd {
        VaultCommand::Save {
            path,
            secrets,
            metadata,
        } => {
            let secrets = parse_secrets(&secrets)?;
            let metadata = parse_fields(&metadata)?;
            let count = secrets.len();
            vault.save_credentials(&path, secrets, Some(metadata))?;
            writeln!(out, "Saved {count} secret(s) under {path}")?;
        }
        VaultCommand::Load { path } => {
            let secrets = vault.load_credentials(&path)?;
            writeln!(out, "{}", serde_json::to_string_pretty(&secrets)?)?;
        }
        VaultCommand::List => {
            for path in vault.list_paths()? {
                writeln!(out, "{path}")?;
            }
        }
        VaultCommand::Remove { path, missing_ok } => {
            vault.remove_credentials(&path, missing_ok)?;
            writeln!(out, "Removed {path}")?;
        }
    }

    Ok(())
}

/// Secrets are always strings; no JSON interpretation.
fn parse_secrets(pairs: &[String]) -> Result<BTreeMap<String, String>> {
    pairs
        .iter()
        .map(|pair| {
            let (name, value) = split_pair(pair)?;
            Ok((name.to_string(), value.to_string()))
        })
        .collect()
}
