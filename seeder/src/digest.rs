//! Content addressing: SHA-256 digests used as manifest file names.

use crate::error::DigestError;
use sha2::{Digest, Sha256};
use std::path::Path;
use tokio::fs;

/// Lowercase hex SHA-256 of `bytes`, always 64 characters.
pub fn digest(bytes: &[u8]) -> String {
    hex::encode(Sha256::digest(bytes))
}

/// Whether `name` looks like a file name produced by [`digest`].
pub fn is_digest_name(name: &str) -> bool {
    name.len() == 64 && name.bytes().all(|b| matches!(b, b'0'..=b'9' | b'a'..=b'f'))
}

/// Digest of the file at `path` without moving it.
pub async fn digest_file(path: &Path) -> Result<String, DigestError> {
    let bytes = fs::read(path).await.map_err(|source| DigestError::Read {
        path: path.to_path_buf(),
        source,
    })?;
    Ok(digest(&bytes))
}

/// Moves the file at `path` to `dest_dir/<digest>` and returns the digest.
///
/// The copy is written under a temporary name and renamed into place, so either the
/// digest-named file is complete or it does not exist. On failure the original is left
/// where it was.
pub async fn digest_and_relocate(path: &Path, dest_dir: &Path) -> Result<String, DigestError> {
    let bytes = fs::read(path).await.map_err(|source| DigestError::Read {
        path: path.to_path_buf(),
        source,
    })?;
    let digest = digest(&bytes);
    let dest = dest_dir.join(&digest);
    if dest == path {
        return Ok(digest);
    }

    let staging = dest_dir.join(format!(".{}.tmp", digest));
    if let Err(source) = write_then_rename(&staging, &dest, &bytes).await {
        let _ = fs::remove_file(&staging).await;
        return Err(DigestError::Write { path: dest, source });
    }

    if let Err(source) = fs::remove_file(path).await {
        let _ = fs::remove_file(&dest).await;
        return Err(DigestError::Remove {
            path: path.to_path_buf(),
            source,
        });
    }
    Ok(digest)
}

async fn write_then_rename(staging: &Path, dest: &Path, bytes: &[u8]) -> std::io::Result<()> {
    fs::write(staging, bytes).await?;
    fs::rename(staging, dest).await
}
