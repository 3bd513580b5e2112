use crate::job::JobId;
use seed_core::{InfoHash, MetainfoError};
use std::path::PathBuf;
use std::time::Duration;
use thiserror::Error;

#[derive(Debug, Error)]
pub enum EngineError {
    #[error("failed to open {path}: {source}")]
    Open {
        path: PathBuf,
        source: std::io::Error,
    },

    #[error("invalid metainfo: {0}")]
    Metainfo(#[from] MetainfoError),

    #[error("job not found: {0}")]
    NotFound(JobId),

    #[error("a job for info hash {info_hash} is already registered as {id}")]
    AlreadyRegistered { info_hash: InfoHash, id: JobId },

    #[error("job {0} has not stopped yet")]
    NotStopped(JobId),

    #[error("job {id} did not stop within {timeout:?}")]
    StopTimeout { id: JobId, timeout: Duration },

    #[error("failed to listen on port {port}: {source}")]
    Listen { port: u16, source: std::io::Error },

    #[error("storage error at {path}: {source}")]
    Storage {
        path: PathBuf,
        source: std::io::Error,
    },
}

impl EngineError {
    pub fn is_not_found(&self) -> bool {
        matches!(self, EngineError::NotFound(_))
    }
}

/// Errors on a single peer connection. These never leave the engine; they end that
/// connection only.
#[derive(Debug, Error)]
pub enum PeerError {
    #[error("io: {0}")]
    Io(#[from] std::io::Error),

    #[error("timed out")]
    Timeout,

    #[error("invalid handshake")]
    InvalidHandshake,

    #[error("info hash mismatch")]
    InfoHashMismatch,

    #[error("message of {0} bytes exceeds the limit")]
    MessageTooLarge(u32),

    #[error("malformed message id {id} with {len} byte payload")]
    Malformed { id: u8, len: usize },

    #[error("piece {0} failed hash verification")]
    HashMismatch(u32),
}
