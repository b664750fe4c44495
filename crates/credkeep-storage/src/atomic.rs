//! Durable whole-file replacement.
//!
//! The payload goes to a temp file next to the destination, is fsynced, and
//! is then renamed over the destination. Rename is only atomic within one
//! filesystem, so the temp file must live in the destination's directory.
//! If anything fails before the rename, dropping the `NamedTempFile` removes
//! the temp file and the destination is untouched.

use std::{
    fs,
    io::Write,
    path::{Path, PathBuf},
};

use credkeep_core::{CredentialError, Result};
use tempfile::{Builder, NamedTempFile};
use tracing::{instrument, warn};

/// Atomically replaces `path` with `payload`, creating parent directories.
#[instrument(skip_all, fields(path = %path.display(), len = payload.len()))]
pub fn write_atomically(path: &Path, payload: &[u8]) -> Result<()> {
    let (parent, tmp) = stage(path, payload)?;
    tmp.persist(path)
        .map_err(|e| CredentialError::io(path, e.error))?;
    sync_dir(&parent);
    Ok(())
}

/// Like [`write_atomically`], but fails with an `AlreadyExists` I/O error
/// instead of replacing a file that is already at `path`.
#[instrument(skip_all, fields(path = %path.display(), len = payload.len()))]
pub fn write_atomically_new(path: &Path, payload: &[u8]) -> Result<()> {
    let (parent, tmp) = stage(path, payload)?;
    tmp.persist_noclobber(path)
        .map_err(|e| CredentialError::io(path, e.error))?;
    sync_dir(&parent);
    Ok(())
}

fn stage(path: &Path, payload: &[u8]) -> Result<(PathBuf, NamedTempFile)> {
    let parent = parent_dir(path)?;
    fs::create_dir_all(&parent).map_err(|e| CredentialError::io(&parent, e))?;

    let file_name = path
        .file_name()
        .map(|n| n.to_string_lossy().into_owned())
        .unwrap_or_default();
    let mut tmp = Builder::new()
        .prefix(&format!(".{file_name}."))
        .suffix(".tmp")
        .tempfile_in(&parent)
        .map_err(|e| CredentialError::io(&parent, e))?;

    let tmp_path = tmp.path().to_path_buf();
    tmp.write_all(payload)
        .map_err(|e| CredentialError::io(&tmp_path, e))?;
    tmp.flush().map_err(|e| CredentialError::io(&tmp_path, e))?;
    tmp.as_file()
        .sync_all()
        .map_err(|e| CredentialError::io(&tmp_path, e))?;

    Ok((parent, tmp))
}

fn parent_dir(path: &Path) -> Result<PathBuf> {
    match path.parent() {
        Some(parent) if path.file_name().is_some() => {
            if parent.as_os_str().is_empty() {
                Ok(PathBuf::from("."))
            } else {
                Ok(parent.to_path_buf())
            }
        }
        _ => Err(CredentialError::validation(format!(
            "not a file path: {}",
            path.display()
        ))),
    }
}

/// Makes the rename itself durable. The new contents are already in place
/// when this runs, so a failure is only logged.
#[cfg(unix)]
fn sync_dir(dir: &Path) {
    if let Err(err) = fs::File::open(dir).and_then(|d| d.sync_all()) {
        warn!(dir = %dir.display(), "directory fsync failed: {err}");
    }
}

#[cfg(not(unix))]
fn sync_dir(_dir: &Path) {}
