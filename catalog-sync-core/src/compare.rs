//! Snapshot comparison: decides whether a freshly downloaded catalog archive
//! actually differs from the previous run's copy.
//!
//! The size probe in the driver is only a cheap pre-filter; this is the
//! authoritative comparison, SHA-256 over both files.

use sha2::{Digest, Sha256};
use std::path::Path;
use thiserror::Error;
use tracing::{debug, info};

#[derive(Debug, Error)]
pub enum CompareError {
    #[error("new snapshot file missing: {0}")]
    MissingNewFile(String),
    #[error("failed to read snapshot file: {0}")]
    Io(#[from] std::io::Error),
}

/// Whether `old` and `new` have identical content. A missing `old` file is
/// first-run semantics and reports "different"; a missing `new` file right
/// after a successful download is an error.
pub async fn files_identical(old: &Path, new: &Path) -> Result<bool, CompareError> {
    if !tokio::fs::try_exists(new).await? {
        return Err(CompareError::MissingNewFile(new.display().to_string()));
    }
    if !tokio::fs::try_exists(old).await? {
        info!(path = %old.display(), "no previous snapshot, treating as changed");
        return Ok(false);
    }

    let old_digest = hash_file(old).await?;
    let new_digest = hash_file(new).await?;
    let same = old_digest == new_digest;
    debug!(
        old = %old.display(),
        new = %new.display(),
        same,
        "compared snapshot hashes"
    );
    Ok(same)
}

async fn hash_file(path: &Path) -> Result<[u8; 32], CompareError> {
    let content = tokio::fs::read(path).await?;
    let mut hasher = Sha256::new();
    hasher.update(&content);
    Ok(hasher.finalize().into())
}
