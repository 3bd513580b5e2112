use super::state::JobState;
use crate::error::EngineError;
use sha1::{Digest, Sha1};
use std::path::Path;
use tokio::fs::File;

/// Opens (or creates) the content file and pre-allocates it to `total_length`.
pub(crate) async fn open_content(path: &Path, total_length: u64) -> Result<File, EngineError> {
    let storage_err = |source| EngineError::Storage {
        path: path.to_path_buf(),
        source,
    };
    if let Some(parent) = path.parent() {
        tokio::fs::create_dir_all(parent).await.map_err(storage_err)?;
    }

    let file = tokio::fs::OpenOptions::new()
        .read(true)
        .write(true)
        .create(true)
        .truncate(false)
        .open(path)
        .await
        .map_err(storage_err)?;

    let file_len = file.metadata().await.map_err(storage_err)?.len();
    if file_len != total_length {
        file.set_len(total_length).await.map_err(storage_err)?;
    }
    Ok(file)
}

/// Hashes every piece already on disk and marks the matching ones as `Have`.
///
/// Returns how many pieces were found intact.
pub(crate) async fn verify_existing(state: &JobState) -> std::io::Result<usize> {
    let piece_count = state.metainfo.piece_count();
    let mut found = 0;

    for i in 0..piece_count {
        let Some(buf) = state.read_piece(i).await? else {
            continue;
        };
        if Sha1::digest(&buf).as_slice() == &state.metainfo.pieces[i][..] {
            state.mark_have(i, buf.len() as u64).await;
            found += 1;
        }
    }
    tracing::debug!(
        job = %state.id,
        found,
        total = piece_count,
        "verified existing data"
    );
    Ok(found)
}
