use std::{
    collections::BTreeMap,
    fmt, fs,
    path::{Path, PathBuf},
};

use aes_gcm::{
    aead::{Aead, AeadCore, KeyInit, OsRng, Payload},
    Aes256Gcm, Nonce,
};
use credkeep_core::{
    paths::{default_key_path, default_vault_path, expand_path},
    record::rfc3339_now,
    CredentialError, Fields, Result, VaultEntry,
};
use serde_json::Value;
use tracing::{debug, instrument};

use crate::{
    atomic::write_atomically,
    key_manager::{FileKeySource, KeyMaterial, KeySource, KEY_LEN},
};

/// Leading byte of every vault file. Bound into the ciphertext as associated data.
const FORMAT_VERSION: u8 = 1;
const NONCE_LEN: usize = 12;
const TAG_LEN: usize = 16;
const HEADER_LEN: usize = 1 + NONCE_LEN;

type VaultDocument = BTreeMap<String, VaultEntry>;

/// Secret store whose whole document is a single AES-256-GCM blob:
/// `version ‖ nonce ‖ ciphertext+tag`.
///
/// Each operation decrypts the full file, and each mutation re-encrypts and
/// atomically rewrites it under a fresh nonce. Sized for a handful of
/// credential sets belonging to one user.
pub struct CredentialVault {
    path: PathBuf,
    cipher: Aes256Gcm,
}

impl fmt::Debug for CredentialVault {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("CredentialVault")
            .field("path", &self.path)
            .finish_non_exhaustive()
    }
}

impl CredentialVault {
    /// Loads the key from `keys` and binds it to the vault file at `path`.
    /// The file itself is not touched until the first operation.
    pub fn open(path: impl AsRef<Path>, keys: &dyn KeySource) -> Result<Self> {
        let path = expand_path(path)?;
        let material = keys.load()?;
        debug!(path = %path.display(), key = %keys.location(), "opening vault");
        Ok(Self {
            path,
            cipher: build_cipher(&material)?,
        })
    }

    /// Opens `~/.credkeep/credentials.enc` with the key at `~/.credkeep/master.key`.
    pub fn from_default() -> Result<Self> {
        let keys = FileKeySource::new(default_key_path()?);
        Self::open(default_vault_path()?, &keys)
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    pub fn exists(&self) -> bool {
        self.path.exists()
    }

    /// Stores `secrets` under `path`, replacing any previous entry.
    ///
    /// Metadata starts from `created_at` (kept from the previous entry, or
    /// now) and `updated_at` (now); caller-supplied `metadata` is layered on
    /// top and wins on conflicts.
    #[instrument(skip_all, fields(entry = %path))]
    pub fn save_credentials(
        &self,
        path: &str,
        secrets: BTreeMap<String, String>,
        metadata: Option<Fields>,
    ) -> Result<VaultEntry> {
        validate_entry_path(path)?;
        let mut doc = self.read_document()?;

        let now = rfc3339_now();
        let created_at = doc
            .get(path)
            .and_then(|entry| entry.metadata.get("created_at"))
            .cloned()
            .unwrap_or_else(|| Value::from(now.clone()));

        let mut merged = Fields::new();
        merged.insert("created_at".into(), created_at);
        merged.insert("updated_at".into(), Value::from(now));
        merged.extend(metadata.unwrap_or_default());

        let entry = VaultEntry {
            metadata: merged,
            secrets,
        };
        doc.insert(path.to_string(), entry.clone());
        self.write_document(&doc)?;
        debug!(entries = doc.len(), "saved vault entry");
        Ok(entry)
    }

    /// Secrets stored under `path`.
    pub fn load_credentials(&self, path: &str) -> Result<BTreeMap<String, String>> {
        Ok(self.load_entry(path)?.secrets)
    }

    /// Secrets and metadata stored under `path`.
    #[instrument(skip_all, fields(entry = %path))]
    pub fn load_entry(&self, path: &str) -> Result<VaultEntry> {
        self.read_document()?
            .remove(path)
            .ok_or_else(|| CredentialError::NotFound {
                key: path.to_string(),
            })
    }

    /// Entry paths, sorted.
    #[instrument(skip_all)]
    pub fn list_paths(&self) -> Result<Vec<String>> {
        Ok(self.read_document()?.into_keys().collect())
    }

    #[instrument(skip_all, fields(entry = %path, missing_ok = missing_ok))]
    pub fn remove_credentials(&self, path: &str, missing_ok: bool) -> Result<()> {
        let mut doc = self.read_document()?;
        if doc.remove(path).is_none() {
            if missing_ok {
                return Ok(());
            }
            return Err(CredentialError::NotFound {
                key: path.to_string(),
            });
        }
        self.write_document(&doc)?;
        debug!(entries = doc.len(), "removed vault entry");
        Ok(())
    }

    fn read_document(&self) -> Result<VaultDocument> {
        let blob = match fs::read(&self.path) {
            Ok(blob) => blob,
            Err(err) if err.kind() == std::io::ErrorKind::NotFound => {
                return Ok(VaultDocument::new())
            }
            Err(err) => return Err(CredentialError::io(&self.path, err)),
        };

        let plaintext = self.open_blob(&blob)?;
        serde_json::from_slice(&plaintext).map_err(|e| CredentialError::CorruptStore {
            path: self.path.clone(),
            reason: format!("decrypted vault is not a valid document: {e}"),
        })
    }

    fn write_document(&self, doc: &VaultDocument) -> Result<()> {
        let plaintext = serde_json::to_vec(doc)
            .map_err(|e| CredentialError::validation(format!("vault not serializable: {e}")))?;
        let blob = self.seal_blob(&plaintext)?;
        write_atomically(&self.path, &blob)
    }

    fn seal_blob(&self, plaintext: &[u8]) -> Result<Vec<u8>> {
        let nonce = Aes256Gcm::generate_nonce(&mut OsRng);
        let ciphertext = self
            .cipher
            .encrypt(
                &nonce,
                Payload {
                    msg: plaintext,
                    aad: &[FORMAT_VERSION],
                },
            )
            .map_err(encryption_failed)?;

        let mut blob = Vec::with_capacity(HEADER_LEN + ciphertext.len());
        blob.push(FORMAT_VERSION);
        blob.extend_from_slice(nonce.as_slice());
        blob.extend_from_slice(&ciphertext);
        Ok(blob)
    }

    fn open_blob(&self, blob: &[u8]) -> Result<Vec<u8>> {
        if blob.len() < HEADER_LEN + TAG_LEN {
            return Err(decryption_failed(format!(
                "vault file truncated ({} bytes)",
                blob.len()
            )));
        }
        if blob[0] != FORMAT_VERSION {
            return Err(decryption_failed(format!(
                "unsupported vault format version {}",
                blob[0]
            )));
        }

        let (header, ciphertext) = blob.split_at(HEADER_LEN);
        let nonce = Nonce::from_slice(&header[1..]);
        self.cipher
            .decrypt(
                nonce,
                Payload {
                    msg: ciphertext,
                    aad: &header[..1],
                },
            )
            .map_err(|_| decryption_failed("authentication failed: wrong key or modified ciphertext"))
    }
}

fn build_cipher(material: &KeyMaterial) -> Result<Aes256Gcm> {
    Aes256Gcm::new_from_slice(material.as_bytes()).map_err(|_| CredentialError::InvalidKey {
        reason: format!(
            "expected {KEY_LEN} bytes, got {}",
            material.as_bytes().len()
        ),
    })
}

fn validate_entry_path(path: &str) -> Result<()> {
    if path.trim().is_empty() {
        return Err(CredentialError::validation("vault entry path must not be empty"));
    }
    Ok(())
}

fn encryption_failed(err: aes_gcm::Error) -> CredentialError {
    CredentialError::EncryptionFailed {
        reason: err.to_string(),
    }
}

fn decryption_failed(reason: impl Into<String>) -> CredentialError {
    CredentialError::DecryptionFailed {
        reason: reason.into(),
    }
}

#[cfg(test)]
mod tests {
    use serde_json::json;

    use super::*;
    use crate::key_manager::{generate_key, InMemoryKeySource};

    fn secrets(pairs: &[(&str, &str)]) -> BTreeMap<String, String> {
        pairs
            .iter()
            .map(|(k, v)| (k.to_string(), v.to_string()))
            .collect()
    }

    fn keyed_source() -> InMemoryKeySource {
        let source = InMemoryKeySource::default();
        source.generate().expect("generate");
        source
    }

    #[test]
    fn round_trips_across_instances() {
        let dir = tempfile::tempdir().expect("tempdir");
        let key_path = dir.path().join("master.key");
        generate_key(&key_path).expect("generate");
        let keys = FileKeySource::new(&key_path);
        let vault_path = dir.path().join("vault/credentials.enc");

        let saved = secrets(&[("user", "u"), ("password", "p\u{e9}ss w0rd")]);
        CredentialVault::open(&vault_path, &keys)
            .expect("open")
            .save_credentials("example/db", saved.clone(), None)
            .expect("save");

        let reopened = CredentialVault::open(&vault_path, &keys).expect("reopen");
        assert_eq!(reopened.load_credentials("example/db").expect("load"), saved);
        assert_eq!(reopened.list_paths().expect("list"), vec!["example/db".to_string()]);
    }

    #[test]
    fn plaintext_is_not_on_disk() {
        let dir = tempfile::tempdir().expect("tempdir");
        let vault = CredentialVault::open(dir.path().join("v.enc"), &keyed_source()).expect("open");
        vault
            .save_credentials("svc/prod", secrets(&[("token", "hunter2-secret")]), None)
            .expect("save");

        let stored = fs::read(vault.path()).expect("read");
        assert_eq!(stored[0], FORMAT_VERSION);
        let haystack = String::from_utf8_lossy(&stored);
        assert!(!haystack.contains("hunter2-secret"));
        assert!(!haystack.contains("svc/prod"));
    }

    #[test]
    fn missing_vault_file_reads_as_empty() {
        let dir = tempfile::tempdir().expect("tempdir");
        let vault = CredentialVault::open(dir.path().join("absent.enc"), &keyed_source()).expect("open");

        assert!(!vault.exists());
        assert!(vault.list_paths().expect("list").is_empty());
        let err = vault.load_credentials("nope").expect_err("missing entry");
        assert!(matches!(err, CredentialError::NotFound { .. }));
        assert!(!vault.exists());
    }

    #[test]
    fn list_paths_is_sorted() {
        let dir = tempfile::tempdir().expect("tempdir");
        let vault = CredentialVault::open(dir.path().join("v.enc"), &keyed_source()).expect("open");
        for path in ["zz/last", "aa/first", "mm/middle"] {
            vault
                .save_credentials(path, secrets(&[("k", "v")]), None)
                .expect("save");
        }
        assert_eq!(
            vault.list_paths().expect("list"),
            vec!["aa/first", "mm/middle", "zz/last"]
        );
    }

    #[test]
    fn metadata_keeps_created_at_and_layers_caller_fields() {
        let dir = tempfile::tempdir().expect("tempdir");
        let vault = CredentialVault::open(dir.path().join("v.enc"), &keyed_source()).expect("open");

        let first = vault
            .save_credentials("db", secrets(&[("pw", "one")]), None)
            .expect("first save");
        let created_at = first.metadata["created_at"].clone();
        assert!(created_at.is_string());

        let mut extra = Fields::new();
        extra.insert("owner".into(), json!("data-team"));
        extra.insert("rotation_days".into(), json!(90));
        let second = vault
            .save_credentials("db", secrets(&[("pw", "two")]), Some(extra))
            .expect("second save");

        assert_eq!(second.metadata["created_at"], created_at);
        assert_eq!(second.metadata["owner"], json!("data-team"));
        assert_eq!(second.metadata["rotation_days"], json!(90));

        let loaded = vault.load_entry("db").expect("load entry");
        assert_eq!(loaded, second);
        assert_eq!(loaded.secrets, secrets(&[("pw", "two")]));
    }

    #[test]
    fn caller_metadata_wins_on_conflict() {
        let dir = tempfile::tempdir().expect("tempdir");
        let vault = CredentialVault::open(dir.path().join("v.enc"), &keyed_source()).expect("open");

        let mut meta = Fields::new();
        meta.insert("created_at".into(), json!("2020-01-01T00:00:00Z"));
        let entry = vault
            .save_credentials("imported", secrets(&[("k", "v")]), Some(meta))
            .expect("save");
        assert_eq!(entry.metadata["created_at"], json!("2020-01-01T00:00:00Z"));
    }

    #[test]
    fn any_bit_flip_is_detected() {
        let dir = tempfile::tempdir().expect("tempdir");
        let keys = keyed_source();
        let path = dir.path().join("v.enc");
        CredentialVault::open(&path, &keys)
            .expect("open")
            .save_credentials("svc", secrets(&[("user", "a")]), None)
            .expect("save");
        let original = fs::read(&path).expect("read");

        for index in 0..original.len() {
            for bit in [0u8, 7] {
                let mut tampered = original.clone();
                tampered[index] ^= 1 << bit;
                fs::write(&path, &tampered).expect("write tampered");

                let vault = CredentialVault::open(&path, &keys).expect("open");
                assert!(
                    matches!(vault.list_paths(), Err(CredentialError::DecryptionFailed { .. })),
                    "flip at byte {index} bit {bit} went undetected"
                );
                assert!(matches!(
                    vault.load_credentials("svc"),
                    Err(CredentialError::DecryptionFailed { .. })
                ));
            }
        }
    }

    #[test]
    fn truncated_or_empty_file_fails_decryption() {
        let dir = tempfile::tempdir().expect("tempdir");
        let keys = keyed_source();
        let path = dir.path().join("v.enc");
        let vault = CredentialVault::open(&path, &keys).expect("open");
        vault
            .save_credentials("svc", secrets(&[("user", "a")]), None)
            .expect("save");
        let original = fs::read(&path).expect("read");

        for len in [0, 1, HEADER_LEN, original.len() - 1] {
            fs::write(&path, &original[..len]).expect("truncate");
            assert!(matches!(
                vault.list_paths(),
                Err(CredentialError::DecryptionFailed { .. })
            ));
        }
    }

    #[test]
    fn wrong_key_fails_decryption_and_does_not_overwrite() {
        let dir = tempfile::tempdir().expect("tempdir");
        let path = dir.path().join("v.enc");
        CredentialVault::open(&path, &keyed_source())
            .expect("open")
            .save_credentials("svc", secrets(&[("user", "a")]), None)
            .expect("save");
        let before = fs::read(&path).expect("read");

        let other = CredentialVault::open(&path, &keyed_source()).expect("open other key");
        assert!(matches!(
            other.list_paths(),
            Err(CredentialError::DecryptionFailed { .. })
        ));
        assert!(matches!(
            other.save_credentials("new", secrets(&[("a", "b")]), None),
            Err(CredentialError::DecryptionFailed { .. })
        ));
        assert_eq!(fs::read(&path).expect("read"), before);
    }

    #[test]
    fn authentic_but_malformed_plaintext_is_corrupt() {
        let dir = tempfile::tempdir().expect("tempdir");
        let vault = CredentialVault::open(dir.path().join("v.enc"), &keyed_source()).expect("open");
        let blob = vault.seal_blob(b"[\"not\", \"a\", \"map\"]").expect("seal");
        fs::write(vault.path(), blob).expect("write");

        assert!(matches!(
            vault.list_paths(),
            Err(CredentialError::CorruptStore { .. })
        ));
    }

    #[test]
    fn cipher_failures_are_not_reported_as_bad_input() {
        let err = encryption_failed(aes_gcm::Error);
        assert!(matches!(err, CredentialError::EncryptionFailed { .. }));
        assert!(err.to_string().contains("encryption failed"));
    }

    #[test]
    fn remove_credentials_respects_missing_ok() {
        let dir = tempfile::tempdir().expect("tempdir");
        let vault = CredentialVault::open(dir.path().join("v.enc"), &keyed_source()).expect("open");
        vault
            .save_credentials("a", secrets(&[("k", "v")]), None)
            .expect("save a");
        vault
            .save_credentials("b", secrets(&[("k", "v")]), None)
            .expect("save b");

        vault.remove_credentials("a", false).expect("remove");
        vault.remove_credentials("a", true).expect("remove again");
        assert!(matches!(
            vault.remove_credentials("a", false),
            Err(CredentialError::NotFound { .. })
        ));
        assert_eq!(vault.list_paths().expect("list"), vec!["b".to_string()]);
    }

    #[test]
    fn open_propagates_missing_key() {
        let dir = tempfile::tempdir().expect("tempdir");
        let keys = FileKeySource::new(dir.path().join("absent.key"));
        let err = CredentialVault::open(dir.path().join("v.enc"), &keys).expect_err("no key");
        assert!(matches!(err, CredentialError::KeyNotFound { .. }));
    }

    #[test]
    fn open_rejects_key_of_wrong_length() {
        let dir = tempfile::tempdir().expect("tempdir");
        let keys = InMemoryKeySource::with_key(KeyMaterial::from_bytes(vec![7u8; 16]));
        let err = CredentialVault::open(dir.path().join("v.enc"), &keys).expect_err("short key");
        assert!(matches!(err, CredentialError::InvalidKey { .. }));
    }

    #[test]
    fn empty_entry_path_is_rejected_before_io() {
        let dir = tempfile::tempdir().expect("tempdir");
        let vault = CredentialVault::open(dir.path().join("v.enc"), &keyed_source()).expect("open");
        let err = vault
            .save_credentials("", secrets(&[("k", "v")]), None)
            .expect_err("empty path");
        assert!(matches!(err, CredentialError::ValidationFailed { .. }));
        assert!(!vault.exists());
    }
}
