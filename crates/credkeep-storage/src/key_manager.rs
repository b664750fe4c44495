use std::{
    fmt, fs,
    path::{Path, PathBuf},
    sync::{Arc, Mutex},
};

use base64::{engine::general_purpose, Engine as _};
use credkeep_core::{CredentialError, Result};
use rand::{rngs::OsRng, RngCore};
use tracing::{info, instrument};

use crate::atomic::write_atomically_new;

/// Length of an AES-256-GCM key.
pub const KEY_LEN: usize = 32;

/// Raw key bytes as stored. Length is not checked until a cipher is built.
#[derive(Clone, PartialEq, Eq)]
pub struct KeyMaterial {
    bytes: Vec<u8>,
}

impl KeyMaterial {
    pub fn from_bytes(bytes: impl Into<Vec<u8>>) -> Self {
        Self {
            bytes: bytes.into(),
        }
    }

    pub fn as_bytes(&self) -> &[u8] {
        &self.bytes
    }
}

impl fmt::Debug for KeyMaterial {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("KeyMaterial")
            .field("len", &self.bytes.len())
            .finish_non_exhaustive()
    }
}

/// Where vault keys live. `generate` never replaces an existing key.
pub trait KeySource {
    fn load(&self) -> Result<KeyMaterial>;
    fn generate(&self) -> Result<KeyMaterial>;
    /// Human-readable location, used in errors and logs.
    fn location(&self) -> String;
}

/// Creates a fresh key at `path`, failing with `KeyAlreadyExists` if one is there.
#[instrument(skip_all, fields(path = %path.display()))]
pub fn generate_key(path: &Path) -> Result<KeyMaterial> {
    let already_exists = || CredentialError::KeyAlreadyExists {
        location: path.display().to_string(),
    };
    if path.exists() {
        return Err(already_exists());
    }

    let material = random_key();
    match write_atomically_new(path, material.as_bytes()) {
        Ok(()) => {}
        Err(CredentialError::Io { source, .. })
            if source.kind() == std::io::ErrorKind::AlreadyExists =>
        {
            return Err(already_exists());
        }
        Err(err) => return Err(err),
    }
    restrict_permissions(path)?;
    info!("generated new encryption key");
    Ok(material)
}

/// Reads the raw key bytes at `path`.
#[instrument(skip_all, fields(path = %path.display()))]
pub fn load_key(path: &Path) -> Result<KeyMaterial> {
    match fs::read(path) {
        Ok(bytes) => Ok(KeyMaterial::from_bytes(bytes)),
        Err(err) if err.kind() == std::io::ErrorKind::NotFound => {
            Err(CredentialError::KeyNotFound {
                location: path.display().to_string(),
            })
        }
        Err(err) => Err(CredentialError::io(path, err)),
    }
}

#[cfg(unix)]
fn restrict_permissions(path: &Path) -> Result<()> {
    use std::os::unix::fs::PermissionsExt;

    fs::set_permissions(path, fs::Permissions::from_mode(0o600))
        .map_err(|e| CredentialError::io(path, e))
}

#[cfg(not(unix))]
fn restrict_permissions(_path: &Path) -> Result<()> {
    Ok(())
}

/// Key stored as a raw file on disk.
#[derive(Debug, Clone)]
pub struct FileKeySource {
    path: PathBuf,
}

impl FileKeySource {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self { path: path.into() }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }
}

impl KeySource for FileKeySource {
    fn load(&self) -> Result<KeyMaterial> {
        load_key(&self.path)
    }

    fn generate(&self) -> Result<KeyMaterial> {
        generate_key(&self.path)
    }

    fn location(&self) -> String {
        self.path.display().to_string()
    }
}

/// OS keyring-backed source. The key is stored base64-encoded as the entry's password.
#[derive(Debug, Clone)]
pub struct KeyringKeySource {
    service: String,
    account: String,
}

impl KeyringKeySource {
    pub fn new(service: impl Into<String>, account: impl Into<String>) -> Self {
        Self {
            service: service.into(),
            account: account.into(),
        }
    }

    fn entry(&self) -> Result<keyring::Entry> {
        keyring::Entry::new(&self.service, &self.account).map_err(keyring_err)
    }
}

impl KeySource for KeyringKeySource {
    fn load(&self) -> Result<KeyMaterial> {
        match self.entry()?.get_password() {
            Ok(secret) => decode_key(&secret),
            Err(keyring::Error::NoEntry) => Err(CredentialError::KeyNotFound {
                location: self.location(),
            }),
            Err(err) => Err(keyring_err(err)),
        }
    }

    fn generate(&self) -> Result<KeyMaterial> {
        let entry = self.entry()?;
        match entry.get_password() {
            Ok(_) => {
                return Err(CredentialError::KeyAlreadyExists {
                    location: self.location(),
                })
            }
            Err(keyring::Error::NoEntry) => {}
            Err(err) => return Err(keyring_err(err)),
        }

        let material = random_key();
        entry
            .set_password(&encode_key(&material))
            .map_err(keyring_err)?;
        // A fresh entry must see the key, or the backend only kept it in memory.
        match self.load() {
            Ok(stored) if stored == material => {}
            Ok(_) | Err(CredentialError::KeyNotFound { .. }) => {
                return Err(CredentialError::Keyring {
                    reason: format!("{} did not persist the generated key", self.location()),
                })
            }
            Err(err) => return Err(err),
        }
        info!(location = %self.location(), "generated new encryption key");
        Ok(material)
    }

    fn location(&self) -> String {
        format!("keyring:{}/{}", self.service, self.account)
    }
}

/// In-memory key source for tests and ephemeral sessions.
#[derive(Debug, Default, Clone)]
pub struct InMemoryKeySource {
    inner: Arc<Mutex<Option<KeyMaterial>>>,
}

impl InMemoryKeySource {
    pub fn with_key(material: KeyMaterial) -> Self {
        Self {
            inner: Arc::new(Mutex::new(Some(material))),
        }
    }
}

impl KeySource for InMemoryKeySource {
    fn load(&self) -> Result<KeyMaterial> {
        let guard = self.inner.lock().map_err(|err| CredentialError::Keyring {
            reason: format!("lock poisoned: {err}"),
        })?;
        guard.clone().ok_or_else(|| CredentialError::KeyNotFound {
            location: self.location(),
        })
    }

    fn generate(&self) -> Result<KeyMaterial> {
        let mut guard = self.inner.lock().map_err(|err| CredentialError::Keyring {
            reason: format!("lock poisoned: {err}"),
        })?;

        if guard.is_some() {
            return Err(CredentialError::KeyAlreadyExists {
                location: self.location(),
            });
        }

        let material = random_key();
        *guard = Some(material.clone());
        Ok(material)
    }

    fn location(&self) -> String {
        "memory".to_string()
    }
}

fn random_key() -> KeyMaterial {
    let mut bytes = [0u8; KEY_LEN];
    OsRng.fill_bytes(&mut bytes);
    KeyMaterial::from_bytes(bytes)
}

fn encode_key(material: &KeyMaterial) -> String {
    general_purpose::STANDARD.encode(material.as_bytes())
}

fn decode_key(secret: &str) -> Result<KeyMaterial> {
    general_purpose::STANDARD
        .decode(secret.trim())
        .map(|bytes| KeyMaterial::from_bytes(bytes))
        .map_err(|e| CredentialError::InvalidKey {
            reason: format!("keyring entry is not base64: {e}"),
        })
}

fn keyring_err(err: keyring::Error) -> CredentialError {
    CredentialError::Keyring {
        reason: err.to_string(),
    }
}
