use std::path::PathBuf;

use color_eyre::Result;
use credkeep_core::paths::{default_key_path, default_store_path, default_vault_path, expand_path};
use credkeep_storage::{
    CredentialStore, CredentialVault, FileKeySource, KeySource, KeyringKeySource, StoreConfig,
};
use tracing::debug;

use crate::config::{Config, KeyBackend};

const KEYRING_SERVICE: &str = "credkeep";
const KEYRING_ACCOUNT: &str = "master-key";

/// Key source selected by config: a key file unless the keyring backend is chosen.
pub fn key_source(config: &Config) -> Result<Box<dyn KeySource>> {
    match config.key_backend.unwrap_or_default() {
        KeyBackend::File => Ok(Box::new(FileKeySource::new(key_path(config)?))),
        KeyBackend::Keyring => Ok(Box::new(KeyringKeySource::new(
            KEYRING_SERVICE,
            KEYRING_ACCOUNT,
        ))),
    }
}

pub fn key_path(config: &Config) -> Result<PathBuf> {
    let raw = match &config.key_path {
        Some(path) => path.clone(),
        None => default_key_path()?,
    };
    Ok(expand_path(raw)?)
}

/// Plaintext store at the configured (or default) path, created when missing
/// unless the store is read-only.
pub fn store_from_config(config: &Config) -> Result<CredentialStore> {
    let file_path = match &config.store_path {
        Some(path) => path.clone(),
        None => default_store_path()?,
    };
    debug!(?file_path, "initializing credential store");
    let store = CredentialStore::open(StoreConfig {
        read_only: config.read_only.unwrap_or(false),
        ..StoreConfig::new(file_path)
    })?;
    Ok(store)
}

pub fn vault_from_config(config: &Config) -> Result<CredentialVault> {
    let vault_path = match &config.vault_path {
        Some(path) => path.clone(),
        None => default_vault_path()?,
    };
    let keys = key_source(config)?;
    debug!(?vault_path, key = %keys.location(), "initializing vault");
    Ok(CredentialVault::open(vault_path, keys.as_ref())?)
}

/// Config pointing every artifact into `root`, for tests.
#[cfg(test)]
pub fn test_config(root: &std::path::Path) -> Config {
    Config {
        key_path: Some(root.join("master.key")),
        vault_path: Some(root.join("credentials.enc")),
        store_path: Some(root.join("credentials.json")),
        key_backend: Some(KeyBackend::File),
        read_only: None,
    }
}

#[cfg(test)]
mod tests {
    use credkeep_core::CredentialError;

    use super::*;

    #[test]
    fn vault_requires_generated_key() {
        let dir = tempfile::tempdir().expect("tempdir");
        let config = test_config(dir.path());

        let err = vault_from_config(&config).expect_err("no key yet");
        assert!(matches!(
            err.downcast_ref::<CredentialError>(),
            Some(CredentialError::KeyNotFound { .. })
        ));

        key_source(&config)
            .expect("key source")
            .generate()
            .expect("generate");
        let vault = vault_from_config(&config).expect("vault");
        assert_eq!(vault.path(), dir.path().join("credentials.enc"));
    }

    #[test]
    fn read_only_store_is_not_created() {
        let dir = tempfile::tempdir().expect("tempdir");
        let config = Config {
            read_only: Some(true),
            ..test_config(dir.path())
        };

        let err = store_from_config(&config).expect_err("missing read-only store");
        assert!(matches!(
            err.downcast_ref::<CredentialError>(),
            Some(CredentialError::StoreMissing { .. })
        ));
        assert!(!dir.path().join("credentials.json").exists());
    }
}
