use thiserror::Error;

#[derive(Debug, Error)]
pub enum TrackerError {
    #[error("unsupported tracker scheme in {0}")]
    UnsupportedScheme(String),

    #[error("invalid tracker url {url}: {reason}")]
    InvalidUrl { url: String, reason: String },

    #[error("http announce failed: {0}")]
    Http(#[from] reqwest::Error),

    #[error("udp announce failed: {0}")]
    Io(#[from] std::io::Error),

    #[error("malformed tracker response: {0}")]
    Malformed(String),

    #[error("tracker rejected announce: {0}")]
    Failure(String),
}
