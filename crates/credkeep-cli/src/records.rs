use std::io::Write;

use color_eyre::{eyre::eyre, Result};
use credkeep_core::Fields;
use credkeep_storage::CredentialStore;
use serde_json::Value;

use crate::{cli::StoreCommand, config, storage};

/// Execute a store subcommand against the configured plaintext store.
pub fn handle(cmd: StoreCommand, config: &config::Config) -> Result<()> {
    let store = storage::store_from_config(config)?;
    run(cmd, &store, &mut std::io::stdout().lock())
}

fn run(cmd: StoreCommand, store: &CredentialStore, out: &mut impl Write) -> Result<()> {
    match cmd {
        StoreCommand::Init => {
            store.ensure_exists()?;
            writeln!(out, "Store ready at {}", store.path().display())?;
        }
        StoreCommand::List => {
            let keys = store.list_keys()?;
            if keys.is_empty() {
                writeln!(out, "No credentials yet. Add one with `credkeep store set <key> name=value`.")?;
            }
            for key in keys {
                writeln!(out, "{key}")?;
            }
        }
        StoreCommand::Get { key } => {
            let record = store.require(&key)?;
            writeln!(out, "{}", serde_json::to_string_pretty(&record)?)?;
        }
        StoreCommand::Set {
            key,
            fields,
            no_overwrite,
        } => {
            let fields = parse_fields(&fields)?;
            store.upsert(&key, &fields, !no_overwrite)?;
            writeln!(out, "Saved {key}")?;
        }
        StoreCommand::Patch { key, fields } => {
            let patch = parse_fields(&fields)?;
            let record = store.update_fields(&key, &patch)?;
            writeln!(out, "Updated {key} ({} fields)", record.fields.len())?;
        }
        StoreCommand::Delete { key, missing_ok } => {
            store.delete(&key, missing_ok)?;
            writeln!(out, "Deleted {key}")?;
        }
    }

    Ok(())
}

/// Parses `name=value` pairs; values that are valid JSON keep their type,
/// anything else is stored as a string.
pub fn parse_fields(pairs: &[String]) -> Result<Fields> {
    let mut fields = Fields::new();
    for pair in pairs {
        let (name, raw) = split_pair(pair)?;
        let value = serde_json::from_str(raw).unwrap_or_else(|_| Value::String(raw.to_string()));
        fields.insert(name.to_string(), value);
    }
    Ok(fields)
}

pub fn split_pair(pair: &str) -> Result<(&str, &str)> {
    match pair.split_once('=') {
        Some((name, value)) if !name.is_empty() => Ok((name, value)),
        _ => Err(eyre!("expected NAME=VALUE, got `{pair}`")),
    }
}
