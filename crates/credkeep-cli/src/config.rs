use std::{
    fs,
    io::ErrorKind,
    path::{Path, PathBuf},
};

use color_eyre::{
    eyre::{eyre, WrapErr},
    Result,
};
use credkeep_core::CredentialError;
use credkeep_storage::atomic::write_atomically_new;
use dirs::config_dir;
use serde::{Deserialize, Serialize};
use tracing::info;

const CONFIG_DIR: &str = "credkeep";
const CONFIG_FILE: &str = "config.toml";

/// User-level configuration loaded from `~/.config/credkeep/config.toml` (platform-specific).
/// Every path may use `~` and environment variables.
#[derive(Debug, Clone, Deserialize, Serialize, Default, PartialEq, Eq)]
pub struct Config {
    /// Override for the key file (default `~/.credkeep/master.key`).
    pub key_path: Option<PathBuf>,
    /// Override for the encrypted vault (default `~/.credkeep/credentials.enc`).
    pub vault_path: Option<PathBuf>,
    /// Override for the plaintext store (default `~/.credkeep/credentials.json`).
    pub store_path: Option<PathBuf>,
    /// Where the vault key lives; defaults to a key file.
    pub key_backend: Option<KeyBackend>,
    /// Open the plaintext store read-only.
    pub read_only: Option<bool>,
}

#[derive(Debug, Clone, Copy, Deserialize, Serialize, Default, PartialEq, Eq)]
#[serde(rename_all = "lowercase")]
pub enum KeyBackend {
    #[default]
    File,
    Keyring,
}

/// Load config from `path`, or from the default path when `None`; missing means defaults.
pub fn load(path: Option<&Path>) -> Result<Config> {
    match path {
        Some(path) => load_from_path(path),
        None => load_from_path(default_path()?),
    }
}

/// Reads the TOML file at `path`. A missing or blank file yields defaults.
pub fn load_from_path(path: impl AsRef<Path>) -> Result<Config> {
    let path = path.as_ref();
    let contents = match fs::read_to_string(path) {
        Ok(contents) => contents,
        Err(err) if err.kind() == ErrorKind::NotFound => return Ok(Config::default()),
        Err(err) => return Err(CredentialError::io(path, err).into()),
    };
    if contents.trim().is_empty() {
        return Ok(Config::default());
    }
    toml::from_str(&contents).wrap_err_with(|| format!("invalid config at {}", path.display()))
}

/// `<config_dir>/credkeep/config.toml`.
pub fn default_path() -> Result<PathBuf> {
    config_dir()
        .map(|base| base.join(CONFIG_DIR).join(CONFIG_FILE))
        .ok_or_else(|| eyre!("no platform config directory for {CONFIG_FILE}"))
}

/// Writes `config` to `path` only when nothing is there yet; an existing
/// file is left exactly as the user wrote it.
pub fn write_if_missing(config: &Config, path: &Path) -> Result<PathBuf> {
    let body = toml::to_string_pretty(config)?;
    match write_atomically_new(path, body.as_bytes()) {
        Ok(()) => info!(path = %path.display(), "wrote default config"),
        Err(CredentialError::Io { source, .. }) if source.kind() == ErrorKind::AlreadyExists => {
            info!(path = %path.display(), "config already present, leaving it untouched");
        }
        Err(err) => return Err(err.into()),
    }
    Ok(path.to_path_buf())
}
