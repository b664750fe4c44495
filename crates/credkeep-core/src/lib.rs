//! Core types for credkeep: the error taxonomy, record and vault-entry models,
//! and path resolution shared by the storage backends and the CLI.

pub mod error;
pub mod paths;
pub mod record;

pub use error::{CredentialError, Result};
pub use record::{CredentialRecord, Fields, VaultEntry};
