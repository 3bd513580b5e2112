use crate::error::EngineError;
use seed_core::{InfoHash, Metainfo};
use std::io;
use std::path::{Path, PathBuf};
use tokio::fs;

/// Manages the engine-owned content directory.
///
/// Every job gets its own subdirectory named after the info hash, so content survives a
/// restart and is found again by re-verification.
pub struct Storage {
    /// The root directory where content is stored.
    pub download_dir: PathBuf,
}

impl Storage {
    /// Opens `path` as the storage root, creating it if missing.
    ///
    /// Fails if the path exists but is not a directory.
    pub async fn new(path: impl Into<PathBuf>) -> io::Result<Self> {
        let download_dir = path.into();

        match fs::metadata(&download_dir).await {
            Ok(metadata) => {
                if !metadata.is_dir() {
                    return Err(io::Error::new(
                        io::ErrorKind::AlreadyExists,
                        "Path exists but is not a directory",
                    ));
                }
            }
            Err(e) if e.kind() == io::ErrorKind::NotFound => {
                fs::create_dir_all(&download_dir).await?;
            }
            Err(e) => return Err(e),
        }

        Ok(Self { download_dir })
    }

    pub fn job_dir(&self, info_hash: &InfoHash) -> PathBuf {
        self.download_dir.join(info_hash.to_hex())
    }

    /// Where the content of `metainfo` lives.
    ///
    /// Multi-file torrents are stored as one contiguous `<name>.bin` blob, which is
    /// what the piece hashes cover.
    pub fn content_path(&self, metainfo: &Metainfo) -> PathBuf {
        let name = sanitize_name(&metainfo.name);
        let file_name = if metainfo.length.is_some() {
            name
        } else {
            format!("{}.bin", name)
        };
        self.job_dir(&metainfo.info_hash).join(file_name)
    }

    /// Deletes a job's directory and everything in it. Missing directories are fine.
    pub async fn remove_job_dir(&self, info_hash: &InfoHash) -> Result<(), EngineError> {
        let dir = self.job_dir(info_hash);
        match fs::remove_dir_all(&dir).await {
            Ok(()) => Ok(()),
            Err(e) if e.kind() == io::ErrorKind::NotFound => Ok(()),
            Err(source) => Err(EngineError::Storage { path: dir, source }),
        }
    }
}

/// Reduces a torrent-supplied name to a single safe path component.
fn sanitize_name(name: &str) -> String {
    match Path::new(name).file_name().and_then(|n| n.to_str()) {
        Some(n) if n != ".." && !n.is_empty() => n.to_string(),
        _ => "content".to_string(),
    }
}
