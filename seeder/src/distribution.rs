//! The seam between the controller and the peer-to-peer engine.

use async_trait::async_trait;
use seed_engine::{EngineError, JobId, Peers, Phase, Session};
use std::path::Path;
use std::time::Duration;

/// Phase of a job as far as status reporting cares.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum JobPhase {
    Downloading,
    Seeding,
    Stopping,
    Stopped,
    /// Any other engine phase, by name.
    Other(String),
}

impl From<Phase> for JobPhase {
    fn from(phase: Phase) -> Self {
        match phase {
            Phase::Downloading => JobPhase::Downloading,
            Phase::Seeding => JobPhase::Seeding,
            Phase::Stopping => JobPhase::Stopping,
            Phase::Stopped => JobPhase::Stopped,
            other => JobPhase::Other(other.to_string()),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct StatusReport {
    pub phase: JobPhase,
    pub peers: Peers,
    /// Set while downloading once a rate is known.
    pub eta: Option<Duration>,
    /// Set while seeding.
    pub seeded_for: Option<Duration>,
}

#[async_trait]
pub trait DistributionEngine: Send + Sync {
    /// Starts distributing the content described by the manifest at `path`.
    async fn submit(&self, path: &Path) -> Result<JobId, EngineError>;

    async fn stats(&self, job: &JobId) -> Result<StatusReport, EngineError>;

    /// Halts the job and waits for it to release its resources.
    async fn stop(&self, job: &JobId) -> Result<(), EngineError>;

    /// Forgets a stopped job and deletes its content.
    async fn remove(&self, job: &JobId) -> Result<(), EngineError>;
}

/// [`DistributionEngine`] backed by an embedded [`Session`].
pub struct EngineClient {
    session: Session,
    stop_timeout: Duration,
}

impl EngineClient {
    pub fn new(session: Session, stop_timeout: Duration) -> Self {
        Self {
            session,
            stop_timeout,
        }
    }

    pub fn session(&self) -> &Session {
        &self.session
    }
}

#[async_trait]
impl DistributionEngine for EngineClient {
    async fn submit(&self, path: &Path) -> Result<JobId, EngineError> {
        self.session.submit(path).await
    }

    async fn stats(&self, job: &JobId) -> Result<StatusReport, EngineError> {
        let stats = self.session.stats(job).await?;
        Ok(StatusReport {
            phase: stats.phase.into(),
            peers: stats.peers,
            eta: stats.eta,
            seeded_for: stats.seeded_for,
        })
    }

    async fn stop(&self, job: &JobId) -> Result<(), EngineError> {
        self.session.stop(job, self.stop_timeout).await
    }

    async fn remove(&self, job: &JobId) -> Result<(), EngineError> {
        self.session.remove(job).await
    }
}
