//! Embedded BitTorrent engine: keeps jobs verified, announced and seeding.
//!
//! A [`Session`] owns the peer listener and the content directory. Each submitted
//! `.torrent` becomes a job identified by a [`JobId`], driven by its own task until it is
//! stopped.

pub mod error;
pub mod job;
pub mod peer;
pub mod session;
pub mod stats;
pub mod storage;

pub use error::{EngineError, PeerError};
pub use job::JobId;
pub use session::{Session, SessionConfig};
pub use stats::{Peers, Phase, Stats};
