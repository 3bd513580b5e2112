use seed_engine::{EngineError, JobId};
use std::io;
use std::path::{Path, PathBuf};
use thiserror::Error;

/// Failures retrieving the manifest.
#[derive(Debug, Error)]
pub enum FetchError {
    #[error("invalid manifest URL {url}: {reason}")]
    InvalidUrl { url: String, reason: String },

    #[error("failed to build HTTP client: {0}")]
    Client(#[source] reqwest::Error),

    #[error("request to {url} failed: {source}")]
    Request {
        url: String,
        #[source]
        source: reqwest::Error,
    },

    #[error("{url} answered with HTTP {status}")]
    Status { url: String, status: u16 },

    #[error("request to {url} timed out")]
    Timeout { url: String },

    /// The body stopped short. The partial file stays at `path`.
    #[error("incomplete download {path}: wrote {written} bytes, expected {}", fmt_expected(.expected))]
    Incomplete {
        path: PathBuf,
        expected: Option<u64>,
        written: u64,
    },

    #[error("failed to write {path}: {source}")]
    Io {
        path: PathBuf,
        #[source]
        source: io::Error,
    },
}

fn fmt_expected(expected: &Option<u64>) -> String {
    match expected {
        Some(n) => n.to_string(),
        None => "more".to_string(),
    }
}

impl FetchError {
    /// The file a failed fetch left behind, if any.
    pub fn partial_file(&self) -> Option<&Path> {
        match self {
            FetchError::Incomplete { path, .. } | FetchError::Io { path, .. } => Some(path),
            _ => None,
        }
    }
}

#[derive(Debug, Error)]
pub enum DigestError {
    #[error("failed to read {path}: {source}")]
    Read {
        path: PathBuf,
        #[source]
        source: io::Error,
    },

    #[error("failed to write {path}: {source}")]
    Write {
        path: PathBuf,
        #[source]
        source: io::Error,
    },

    #[error("failed to remove {path}: {source}")]
    Remove {
        path: PathBuf,
        #[source]
        source: io::Error,
    },
}

/// Errors surfaced by the sync controller.
#[derive(Debug, Error)]
pub enum SyncError {
    #[error("failed to create data directory {path}: {source}")]
    DataDir {
        path: PathBuf,
        #[source]
        source: io::Error,
    },

    #[error(transparent)]
    Fetch(#[from] FetchError),

    #[error(transparent)]
    Digest(#[from] DigestError),

    #[error("failed to submit {path}: {source}")]
    Submit {
        path: PathBuf,
        #[source]
        source: EngineError,
    },

    #[error("failed to stop job {job}: {source}")]
    Stop {
        job: JobId,
        #[source]
        source: EngineError,
    },

    #[error("failed to remove job {job}: {source}")]
    Remove {
        job: JobId,
        #[source]
        source: EngineError,
    },

    #[error("failed to query job {job}: {source}")]
    Stats {
        job: JobId,
        #[source]
        source: EngineError,
    },

    #[error("no distribution job is active")]
    NoActiveJob,

    #[error("a refresh cycle is already running")]
    Busy,
}

impl SyncError {
    /// Whether the engine no longer knows the job involved.
    pub fn is_not_found(&self) -> bool {
        match self {
            SyncError::Stop { source, .. }
            | SyncError::Remove { source, .. }
            | SyncError::Stats { source, .. } => source.is_not_found(),
            _ => false,
        }
    }
}
