use std::{
    collections::BTreeMap,
    fs,
    path::{Path, PathBuf},
};

use credkeep_core::{
    paths::{default_store_path, expand_path},
    record::unix_timestamp,
    CredentialError, CredentialRecord, Fields, Result,
};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use tracing::{debug, instrument};

use crate::{
    atomic::{write_atomically, write_atomically_new},
    finite::ensure_finite,
};

/// How a [`CredentialStore`] treats its backing file.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct StoreConfig {
    /// May contain `~` and environment variables; resolved once on open.
    pub file_path: PathBuf,
    /// Create the file (and parent directories) when it is missing.
    pub auto_create: bool,
    /// Reject every mutation with `PermissionDenied`.
    pub read_only: bool,
}

impl StoreConfig {
    pub fn new(file_path: impl Into<PathBuf>) -> Self {
        Self {
            file_path: file_path.into(),
            auto_create: true,
            read_only: false,
        }
    }
}

#[derive(Debug, Default, Serialize, Deserialize)]
struct StoreDocument {
    #[serde(rename = "_meta", default)]
    meta: Fields,
    #[serde(default)]
    credentials: BTreeMap<String, CredentialRecord>,
    /// Top-level keys this crate does not interpret; written back unchanged.
    #[serde(flatten)]
    extra: Fields,
}

impl StoreDocument {
    fn fresh(now: f64) -> Self {
        let mut meta = Fields::new();
        meta.insert("created_at".into(), Value::from(now));
        Self {
            meta,
            ..Self::default()
        }
    }

    fn touch(&mut self, now: f64) {
        self.meta.insert("updated_at".into(), Value::from(now));
    }
}

/// JSON-file store of credential records keyed by caller-chosen names such as
/// `"snowflake/prod"`.
///
/// Every call re-reads the file; every mutation rewrites the whole document
/// through [`write_atomically`]. Nothing is cached between calls, and
/// concurrent writers from separate processes are last-writer-wins.
#[derive(Debug, Clone)]
pub struct CredentialStore {
    path: PathBuf,
    auto_create: bool,
    read_only: bool,
}

impl CredentialStore {
    pub fn open(config: StoreConfig) -> Result<Self> {
        let store = Self {
            path: expand_path(&config.file_path)?,
            auto_create: config.auto_create,
            read_only: config.read_only,
        };
        debug!(path = %store.path.display(), read_only = store.read_only, "opening credential store");

        if store.path.exists() {
            return Ok(store);
        }
        if store.auto_create && !store.read_only {
            store.ensure_exists()?;
            return Ok(store);
        }
        Err(CredentialError::StoreMissing { path: store.path })
    }

    /// Opens `~/.credkeep/credentials.json`, creating it when missing.
    pub fn from_default() -> Result<Self> {
        Self::open(StoreConfig::new(default_store_path()?))
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    pub fn exists(&self) -> bool {
        self.path.exists()
    }

    /// Writes an empty document if the backing file is absent. Idempotent.
    #[instrument(skip_all, fields(path = %self.path.display()))]
    pub fn ensure_exists(&self) -> Result<()> {
        if self.path.exists() {
            return Ok(());
        }
        self.check_writable()?;
        if self.create_if_absent()? {
            debug!("created empty credential store");
        }
        Ok(())
    }

    /// Places an empty document at the path unless a file is already there.
    /// Returns whether this call created it.
    fn create_if_absent(&self) -> Result<bool> {
        let payload = encode_document(&StoreDocument::fresh(unix_timestamp()))?;
        match write_atomically_new(&self.path, &payload) {
            Ok(()) => Ok(true),
            Err(CredentialError::Io { source, .. })
                if source.kind() == std::io::ErrorKind::AlreadyExists =>
            {
                Ok(false)
            }
            Err(err) => Err(err),
        }
    }

    /// All record keys, sorted.
    pub fn list_keys(&self) -> Result<Vec<String>> {
        let doc = self.read_document()?;
        Ok(doc.credentials.into_keys().collect())
    }

    pub fn has(&self, key: &str) -> Result<bool> {
        Ok(self.read_document()?.credentials.contains_key(key))
    }

    /// Owned copy of the stored record, if present.
    #[instrument(skip_all, fields(key = %key))]
    pub fn get(&self, key: &str) -> Result<Option<CredentialRecord>> {
        let mut doc = self.read_document()?;
        Ok(doc.credentials.remove(key))
    }

    pub fn get_or(&self, key: &str, default: CredentialRecord) -> Result<CredentialRecord> {
        Ok(self.get(key)?.unwrap_or(default))
    }

    pub fn require(&self, key: &str) -> Result<CredentialRecord> {
        self.get(key)?.ok_or_else(|| CredentialError::NotFound {
            key: key.to_string(),
        })
    }

    /// Creates or replaces the record at `key` and returns its stored form.
    ///
    /// `fields` must serialize to a JSON object; that is checked before the
    /// file is read. An existing record keeps its `created_at`. With
    /// `overwrite` unset, an existing record is an `AlreadyExists` error and
    /// nothing is written.
    #[instrument(skip_all, fields(key = %key, overwrite = overwrite))]
    pub fn upsert<F>(&self, key: &str, fields: &F, overwrite: bool) -> Result<CredentialRecord>
    where
        F: Serialize + ?Sized,
    {
        validate_key(key)?;
        let fields = to_fields(fields, "fields")?;
        self.check_writable()?;

        let mut doc = self.read_document()?;
        let previous = doc.credentials.get(key);
        let created = previous.is_none();
        if !created && !overwrite {
            return Err(CredentialError::AlreadyExists {
                key: key.to_string(),
            });
        }

        let now = unix_timestamp();
        let record = CredentialRecord::stamped(previous, fields, now);
        doc.credentials.insert(key.to_string(), record.clone());
        doc.touch(now);
        self.write_document(&doc)?;
        debug!(created, "stored credential");
        Ok(record)
    }

    /// Shallow-merges `patch` into the existing record's fields: top-level
    /// keys in `patch` replace same-named keys, everything else is kept.
    #[instrument(skip_all, fields(key = %key))]
    pub fn update_fields<P>(&self, key: &str, patch: &P) -> Result<CredentialRecord>
    where
        P: Serialize + ?Sized,
    {
        let patch = to_fields(patch, "patch")?;
        let mut fields = self.require(key)?.fields;
        fields.extend(patch);
        self.upsert(key, &fields, true)
    }

    /// Removes the record at `key`. A missing key is `NotFound` unless
    /// `missing_ok` is set, in which case nothing is written.
    #[instrument(skip_all, fields(key = %key, missing_ok = missing_ok))]
    pub fn delete(&self, key: &str, missing_ok: bool) -> Result<()> {
        self.check_writable()?;
        let mut doc = self.read_document()?;
        if doc.credentials.remove(key).is_none() {
            if missing_ok {
                return Ok(());
            }
            return Err(CredentialError::NotFound {
                key: key.to_string(),
            });
        }
        doc.touch(unix_timestamp());
        self.write_document(&doc)?;
        debug!("deleted credential");
        Ok(())
    }

    fn check_writable(&self) -> Result<()> {
        if self.read_only {
            return Err(CredentialError::PermissionDenied {
                path: self.path.clone(),
            });
        }
        Ok(())
    }

    fn read_document(&self) -> Result<StoreDocument> {
        if !self.path.exists() {
            if self.auto_create && !self.read_only {
                self.ensure_exists()?;
            } else {
                return Err(CredentialError::StoreMissing {
                    path: self.path.clone(),
                });
            }
        }

        let raw = fs::read(&self.path).map_err(|e| CredentialError::io(&self.path, e))?;
        parse_document(&raw).map_err(|reason| CredentialError::CorruptStore {
            path: self.path.clone(),
            reason,
        })
    }

    fn write_document(&self, doc: &StoreDocument) -> Result<()> {
        write_atomically(&self.path, &encode_document(doc)?)
    }
}

/// Pretty JSON with every object's keys sorted, including flattened extras.
fn encode_document(doc: &StoreDocument) -> Result<Vec<u8>> {
    serde_json::to_value(doc)
        .and_then(|value| serde_json::to_vec_pretty(&value))
        .map_err(|e| CredentialError::validation(format!("document not serializable: {e}")))
}

fn parse_document(raw: &[u8]) -> std::result::Result<StoreDocument, String> {
    if raw.iter().all(u8::is_ascii_whitespace) {
        return Ok(StoreDocument::default());
    }

    let value: Value = serde_json::from_slice(raw).map_err(|e| format!("invalid JSON: {e}"))?;
    let Value::Object(root) = &value else {
        return Err("root must be an object".to_string());
    };
    if let Some(meta) = root.get("_meta") {
        if !meta.is_object() {
            return Err("'_meta' must be an object".to_string());
        }
    }
    if let Some(credentials) = root.get("credentials") {
        if !credentials.is_object() {
            return Err("'credentials' must be an object".to_string());
        }
    }

    serde_json::from_value(value).map_err(|e| format!("malformed record: {e}"))
}

fn to_fields<F: Serialize + ?Sized>(value: &F, what: &str) -> Result<Fields> {
    ensure_finite(value).map_err(|e| {
        CredentialError::validation(format!("{what} is not JSON-serializable: {e}"))
    })?;
    match serde_json::to_value(value) {
        Ok(Value::Object(map)) => Ok(map),
        Ok(other) => Err(CredentialError::validation(format!(
            "{what} must be a JSON object, got {}",
            json_kind(&other)
        ))),
        Err(e) => Err(CredentialError::validation(format!(
            "{what} is not JSON-serializable: {e}"
        ))),
    }
}

fn validate_key(key: &str) -> Result<()> {
    if key.trim().is_empty() {
        return Err(CredentialError::validation("credential key must not be empty"));
    }
    Ok(())
}

fn json_kind(value: &Value) -> &'static str {
    match value {
        Value::Null => "null",
        Value::Bool(_) => "a boolean",
        Value::Number(_) => "a number",
        Value::String(_) => "a string",
        Value::Array(_) => "an array",
        Value::Object(_) => "an object",
    }
}
