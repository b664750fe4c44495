//! File-backed credential persistence.
//!
//! A plaintext JSON record store and an AES-256-GCM encrypted vault, both
//! rewriting their whole document through an atomic temp-file-and-rename on
//! every mutation. Vault keys come from a [`key_manager::KeySource`]: a key
//! file by default, the OS keyring, or memory in tests.

pub mod atomic;
pub mod credential_store;
mod finite;
pub mod key_manager;
pub mod vault;

pub use credential_store::{CredentialStore, StoreConfig};
pub use key_manager::{FileKeySource, InMemoryKeySource, KeyMaterial, KeySource, KeyringKeySource};
pub use vault::CredentialVault;
