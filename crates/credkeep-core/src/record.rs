use std::collections::BTreeMap;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};

/// Open, caller-defined mapping. Backed by a `BTreeMap`, so keys serialize sorted.
pub type Fields = Map<String, Value>;

/// One named entry in the plaintext credential store.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct CredentialRecord {
    /// Unix seconds; set once when the record is first written.
    pub created_at: f64,
    #[serde(default)]
    pub fields: Fields,
    /// Unix seconds; refreshed on every mutation, never earlier than `created_at`.
    pub updated_at: f64,
    /// Record keys written by other tools; carried across rewrites.
    #[serde(flatten)]
    pub extra: Fields,
}

impl CredentialRecord {
    /// Builds the next stored form of a record, keeping `created_at` and any
    /// unrecognised keys from `previous` when there is one.
    pub fn stamped(previous: Option<&CredentialRecord>, fields: Fields, now: f64) -> Self {
        let created_at = previous.map_or(now, |rec| rec.created_at);
        Self {
            created_at,
            fields,
            // Wall clocks can step backwards; the ordering must still hold.
            updated_at: now.max(created_at),
            extra: previous.map(|rec| rec.extra.clone()).unwrap_or_default(),
        }
    }
}

/// One named entry in the encrypted vault.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq, Default)]
pub struct VaultEntry {
    #[serde(default)]
    pub metadata: Fields,
    pub secrets: BTreeMap<String, String>,
}

/// Current time as fractional Unix seconds (microsecond resolution).
pub fn unix_timestamp() -> f64 {
    timestamp_from(Utc::now())
}

pub fn timestamp_from(at: DateTime<Utc>) -> f64 {
    at.timestamp_micros() as f64 / 1_000_000.0
}

/// Current time as an RFC 3339 string, used for vault metadata.
pub fn rfc3339_now() -> String {
    Utc::now().to_rfc3339()
}
