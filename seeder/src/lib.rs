//! Mirrors a remote torrent manifest and keeps one seeding job running for it.
//!
//! The [`controller::SyncController`] fetches the manifest, stores it under its SHA-256
//! digest and swaps the distribution job whenever the digest changes. The
//! [`scheduler::Scheduler`] drives it on two timers.

pub mod cli;
pub mod config;
pub mod controller;
pub mod digest;
pub mod distribution;
pub mod error;
pub mod fetch;
pub mod scheduler;
pub mod shutdown;
pub mod status;

pub use controller::{RefreshOutcome, SyncController, SyncState};
pub use distribution::{DistributionEngine, EngineClient, JobPhase, StatusReport};
pub use error::{DigestError, FetchError, SyncError};
pub use fetch::Fetcher;
pub use scheduler::Scheduler;
