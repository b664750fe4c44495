use std::path::PathBuf;

use thiserror::Error;

/// Errors produced by the credential store, the vault and key management.
#[derive(Debug, Error)]
pub enum CredentialError {
    /// Requested record or vault entry does not exist.
    #[error("credential not found: {key}")]
    NotFound { key: String },
    /// Insert without overwrite hit an existing record.
    #[error("credential already exists (overwrite disabled): {key}")]
    AlreadyExists { key: String },
    /// Backing document failed to parse or has the wrong shape.
    #[error("credential store is corrupt at {}: {reason}", .path.display())]
    CorruptStore { path: PathBuf, reason: String },
    /// Backing document is absent and auto-create is disabled.
    #[error("credential store does not exist: {}", .path.display())]
    StoreMissing { path: PathBuf },
    /// `generate` found a key already in place; keys are never replaced.
    #[error("encryption key already exists at {location}")]
    KeyAlreadyExists { location: String },
    #[error("encryption key not found at {location}; generate one first")]
    KeyNotFound { location: String },
    /// Key material cannot be used with the vault cipher.
    #[error("invalid encryption key: {reason}")]
    InvalidKey { reason: String },
    /// Ciphertext failed authentication: wrong key, truncation or tampering.
    #[error("vault decryption failed: {reason}")]
    DecryptionFailed { reason: String },
    /// The cipher refused to seal a vault document.
    #[error("vault encryption failed: {reason}")]
    EncryptionFailed { reason: String },
    /// Caller-supplied input was rejected before touching storage.
    #[error("validation failed: {reason}")]
    ValidationFailed { reason: String },
    /// Mutation attempted on a read-only store.
    #[error("permission denied: {} is read-only", .path.display())]
    PermissionDenied { path: PathBuf },
    #[error("keyring error: {reason}")]
    Keyring { reason: String },
    #[error("i/o error at {}: {source}", .path.display())]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },
}

impl CredentialError {
    /// Wraps an I/O failure with the path it happened on.
    pub fn io(path: impl Into<PathBuf>, source: std::io::Error) -> Self {
        Self::Io {
            path: path.into(),
            source,
        }
    }

    pub fn validation(reason: impl Into<String>) -> Self {
        Self::ValidationFailed {
            reason: reason.into(),
        }
    }
}

pub type Result<T> = std::result::Result<T, CredentialError>;
