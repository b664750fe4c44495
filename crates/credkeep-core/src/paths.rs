//! Resolution of caller-supplied paths and the per-user default locations.
//!
//! Paths are resolved once, when a store or vault is constructed; nothing
//! here is consulted again afterwards.

use std::path::{Path, PathBuf};

use tracing::debug;

use crate::error::{CredentialError, Result};

/// Hidden directory under the user's home that holds every artifact.
pub const APP_DIR: &str = ".credkeep";
pub const KEY_FILE: &str = "master.key";
pub const VAULT_FILE: &str = "credentials.enc";
pub const STORE_FILE: &str = "credentials.json";

/// `<home>/.credkeep`.
pub fn default_root() -> Result<PathBuf> {
    let home = dirs::home_dir().ok_or_else(|| CredentialError::Io {
        path: PathBuf::from("~"),
        source: std::io::Error::new(std::io::ErrorKind::NotFound, "no home directory available"),
    })?;
    Ok(home.join(APP_DIR))
}

pub fn default_key_path() -> Result<PathBuf> {
    Ok(default_root()?.join(KEY_FILE))
}

pub fn default_vault_path() -> Result<PathBuf> {
    Ok(default_root()?.join(VAULT_FILE))
}

pub fn default_store_path() -> Result<PathBuf> {
    Ok(default_root()?.join(STORE_FILE))
}

/// Expands environment variables and a leading `~`, then makes the path absolute.
pub fn expand_path(path: impl AsRef<Path>) -> Result<PathBuf> {
    let raw = path.as_ref().to_string_lossy();
    let expanded = expand_home(&expand_vars(&raw));
    let resolved = std::path::absolute(&expanded).map_err(|e| CredentialError::io(&expanded, e))?;
    debug!(path = %resolved.display(), "resolved path");
    Ok(resolved)
}

/// Replaces `$VAR`, `${VAR}` and `%VAR%` with values from the process environment.
/// Unknown variables are left as written.
pub fn expand_vars(input: &str) -> String {
    expand_vars_with(input, |name| std::env::var(name).ok())
}

fn expand_vars_with(input: &str, lookup: impl Fn(&str) -> Option<String>) -> String {
    let mut out = String::with_capacity(input.len());
    let mut rest = input;

    while let Some(pos) = rest.find(['$', '%']) {
        out.push_str(&rest[..pos]);
        let tail = &rest[pos..];

        let (name, consumed) = match tail.as_bytes()[0] {
            b'$' if tail[1..].starts_with('{') => match tail[2..].find('}') {
                Some(end) => (&tail[2..2 + end], end + 3),
                None => ("", 0),
            },
            b'$' => {
                let len = var_name_len(&tail[1..]);
                (&tail[1..1 + len], len + 1)
            }
            _ => match tail[1..].find('%') {
                Some(end) if is_var_name(&tail[1..1 + end]) => (&tail[1..1 + end], end + 2),
                _ => ("", 0),
            },
        };

        if consumed == 0 || name.is_empty() {
            out.push_str(&tail[..1]);
            rest = &tail[1..];
            continue;
        }

        match lookup(name) {
            Some(value) => out.push_str(&value),
            None => out.push_str(&tail[..consumed]),
        }
        rest = &tail[consumed..];
    }

    out.push_str(rest);
    out
}

fn var_name_len(s: &str) -> usize {
    s.char_indices()
        .find(|&(i, c)| !(c == '_' || c.is_ascii_alphanumeric()) || (i == 0 && c.is_ascii_digit()))
        .map_or(s.len(), |(i, _)| i)
}

fn is_var_name(s: &str) -> bool {
    !s.is_empty() && var_name_len(s) == s.len()
}

fn expand_home(input: &str) -> PathBuf {
    let rest = if input == "~" {
        Some("")
    } else {
        input
            .strip_prefix("~/")
            .or_else(|| input.strip_prefix("~\\"))
    };

    match (rest, dirs::home_dir()) {
        (Some(rest), Some(home)) if rest.is_empty() => home,
        (Some(rest), Some(home)) => home.join(rest),
        _ => PathBuf::from(input),
    }
}
