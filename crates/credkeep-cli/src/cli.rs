use std::path::PathBuf;

use clap::{Parser, Subcommand};

/// CLI surface definition.
#[derive(Parser, Debug)]
#[command(
    name = "credkeep",
    about = "Local credential store and encrypted secret vault",
    version,
    propagate_version = true
)]
pub struct Cli {
    /// Config file to use instead of the platform default.
    #[arg(long, global = true, value_name = "PATH")]
    pub config: Option<PathBuf>,

    #[command(subcommand)]
    pub command: Command,
}

#[derive(Subcommand, Debug, Clone, PartialEq, Eq)]
pub enum Command {
    /// Print version and exit.
    Version,
    /// Check that the key loads, the vault decrypts and the store parses.
    Health,
    /// Generate the vault key if missing and create the plaintext store.
    Setup,
    /// Manage CLI configuration.
    #[command(subcommand)]
    Config(ConfigCommand),
    /// Manage the vault encryption key.
    #[command(subcommand)]
    Key(KeyCommand),
    /// Plaintext credential records.
    #[command(subcommand)]
    Store(StoreCommand),
    /// Encrypted secrets.
    #[command(subcommand)]
    Vault(VaultCommand),
}

#[derive(Subcommand, Debug, Clone, PartialEq, Eq)]
pub enum ConfigCommand {
    /// Create a default config file if one does not exist.
    Init,
}

#[derive(Subcommand, Debug, Clone, PartialEq, Eq)]
pub enum KeyCommand {
    /// Create a new key; refuses to replace an existing one.
    Generate,
    /// Print where the key is read from.
    Path,
}

#[derive(Subcommand, Debug, Clone, PartialEq, Eq)]
pub enum StoreCommand {
    /// Create the store file if it does not exist.
    Init,
    /// List record keys.
    List,
    /// Print a record as JSON.
    Get { key: String },
    /// Create or replace a record from `name=value` pairs (values may be JSON).
    Set {
        key: String,
        #[arg(required = true, value_name = "NAME=VALUE")]
        fields: Vec<String>,
        /// Fail instead of replacing an existing record.
        #[arg(long)]
        no_overwrite: bool,
    },
    /// Merge `name=value` pairs into an existing record.
    Patch {
        key: String,
        #[arg(required = true, value_name = "NAME=VALUE")]
        fields: Vec<String>,
    },
    /// Delete a record.
    Delete {
        key: String,
        /// Succeed when the record does not exist.
        #[arg(long)]
        missing_ok: bool,
    },
}

#[derive(Subcommand, Debug, Clone, PartialEq, Eq)]
pub enum VaultCommand {
    /// Store secrets under a path, replacing any previous entry.
    Save {
        path: String,
        #[arg(required = true, value_name = "NAME=SECRET")]
        secrets: Vec<String>,
        /// Extra metadata as `name=value`; repeatable.
        #[arg(long = "meta", value_name = "NAME=VALUE")]
        metadata: Vec<String>,
    },
    /// Print the secrets stored under a path as JSON.
    Load { path: String },
    /// List entry paths.
    List,
    /// Remove an entry.
    Remove {
        path: String,
        #[arg(long)]
        missing_ok: bool,
    },
}
