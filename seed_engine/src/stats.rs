//! Point-in-time job statistics.

use std::fmt;
use std::time::Duration;

/// Lifecycle phase of a job.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Phase {
    /// Registered, task not yet running.
    Starting,
    /// Hashing content already on disk.
    Verifying,
    Downloading,
    Seeding,
    /// Stop requested; peers and trackers are being released.
    Stopping,
    Stopped,
}

impl fmt::Display for Phase {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            Phase::Starting => "Starting",
            Phase::Verifying => "Verifying",
            Phase::Downloading => "Downloading",
            Phase::Seeding => "Seeding",
            Phase::Stopping => "Stopping",
            Phase::Stopped => "Stopped",
        };
        f.write_str(s)
    }
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct Peers {
    pub incoming: usize,
    pub outgoing: usize,
    pub total: usize,
}

impl Peers {
    pub fn new(incoming: usize, outgoing: usize) -> Self {
        Self {
            incoming,
            outgoing,
            total: incoming + outgoing,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Stats {
    pub phase: Phase,
    pub peers: Peers,
    /// Estimated time to completion; only while downloading and once a rate is known.
    pub eta: Option<Duration>,
    /// How long the job has been seeding; only while seeding.
    pub seeded_for: Option<Duration>,
    pub bytes_total: u64,
    pub bytes_completed: u64,
    pub bytes_uploaded: u64,
    pub pieces_have: usize,
    pub pieces_total: usize,
}

/// Remaining time at the average rate observed so far.
pub(crate) fn estimate_eta(remaining: u64, transferred: u64, elapsed: Duration) -> Option<Duration> {
    if remaining == 0 {
        return Some(Duration::ZERO);
    }
    if transferred == 0 || elapsed.is_zero() {
        return None;
    }
    let rate = transferred as f64 / elapsed.as_secs_f64();
    Some(Duration::from_secs((remaining as f64 / rate).round() as u64))
}
