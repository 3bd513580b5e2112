#![allow(dead_code)]

use async_trait::async_trait;
use seed_engine::{EngineError, JobId, Peers};
use seeder::{DistributionEngine, Fetcher, JobPhase, StatusReport, SyncController};
use std::collections::HashMap;
use std::io;
use std::path::{Path, PathBuf};
use std::sync::{Arc, Mutex};
use std::time::Duration;
use wiremock::matchers::{method, path};
use wiremock::{Mock, MockServer, ResponseTemplate};

pub const MANIFEST_PATH: &str = "/SDI_Update.torrent";

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Call {
    Submit(PathBuf),
    Stop(JobId),
    Remove(JobId),
}

struct FakeJob {
    content: Vec<u8>,
    phase: JobPhase,
}

#[derive(Default)]
struct Inner {
    next_id: u32,
    jobs: HashMap<JobId, FakeJob>,
    calls: Vec<Call>,
    stats_queries: usize,
    fail_stop: bool,
    fail_remove: bool,
    failing_submits: usize,
}

/// In-memory engine that records every call and fails on request.
#[derive(Default)]
pub struct FakeEngine {
    inner: Mutex<Inner>,
}

impl FakeEngine {
    pub fn new() -> Arc<Self> {
        Arc::new(Self::default())
    }

    pub fn calls(&self) -> Vec<Call> {
        self.inner.lock().unwrap().calls.clone()
    }

    pub fn submit_count(&self) -> usize {
        self.calls()
            .iter()
            .filter(|c| matches!(c, Call::Submit(_)))
            .count()
    }

    pub fn stop_count(&self) -> usize {
        self.calls()
            .iter()
            .filter(|c| matches!(c, Call::Stop(_)))
            .count()
    }

    pub fn stats_queries(&self) -> usize {
        self.inner.lock().unwrap().stats_queries
    }

    pub fn is_registered(&self, job: &JobId) -> bool {
        self.inner.lock().unwrap().jobs.contains_key(job)
    }

    pub fn registered_count(&self) -> usize {
        self.inner.lock().unwrap().jobs.len()
    }

    /// The manifest bytes the job was submitted with.
    pub fn content_of(&self, job: &JobId) -> Option<Vec<u8>> {
        self.inner
            .lock()
            .unwrap()
            .jobs
            .get(job)
            .map(|j| j.content.clone())
    }

    pub fn phase_of(&self, job: &JobId) -> Option<JobPhase> {
        self.inner
            .lock()
            .unwrap()
            .jobs
            .get(job)
            .map(|j| j.phase.clone())
    }

    pub fn set_fail_stop(&self, fail: bool) {
        self.inner.lock().unwrap().fail_stop = fail;
    }

    pub fn set_fail_remove(&self, fail: bool) {
        self.inner.lock().unwrap().fail_remove = fail;
    }

    pub fn fail_next_submits(&self, n: usize) {
        self.inner.lock().unwrap().failing_submits = n;
    }

    /// Drops `job` as if the engine had lost it.
    pub fn forget(&self, job: &JobId) {
        self.inner.lock().unwrap().jobs.remove(job);
    }
}

#[async_trait]
impl DistributionEngine for FakeEngine {
    async fn submit(&self, path: &Path) -> Result<JobId, EngineError> {
        let mut inner = self.inner.lock().unwrap();
        inner.calls.push(Call::Submit(path.to_path_buf()));
        if inner.failing_submits > 0 {
            inner.failing_submits -= 1;
            return Err(EngineError::Open {
                path: path.to_path_buf(),
                source: io::Error::other("injected submit failure"),
            });
        }
        let content = std::fs::read(path).map_err(|source| EngineError::Open {
            path: path.to_path_buf(),
            source,
        })?;
        inner.next_id += 1;
        let id = JobId::from(format!("job-{}", inner.next_id));
        inner.jobs.insert(
            id.clone(),
            FakeJob {
                content,
                phase: JobPhase::Seeding,
            },
        );
        Ok(id)
    }

    async fn stats(&self, job: &JobId) -> Result<StatusReport, EngineError> {
        let mut inner = self.inner.lock().unwrap();
        inner.stats_queries += 1;
        let j = inner
            .jobs
            .get(job)
            .ok_or_else(|| EngineError::NotFound(job.clone()))?;
        Ok(StatusReport {
            phase: j.phase.clone(),
            peers: Peers::new(1, 2),
            eta: None,
            seeded_for: Some(Duration::from_secs(60)),
        })
    }

    async fn stop(&self, job: &JobId) -> Result<(), EngineError> {
        let mut inner = self.inner.lock().unwrap();
        inner.calls.push(Call::Stop(job.clone()));
        if inner.fail_stop {
            return Err(EngineError::StopTimeout {
                id: job.clone(),
                timeout: Duration::from_secs(1),
            });
        }
        let j = inner
            .jobs
            .get_mut(job)
            .ok_or_else(|| EngineError::NotFound(job.clone()))?;
        j.phase = JobPhase::Stopped;
        Ok(())
    }

    async fn remove(&self, job: &JobId) -> Result<(), EngineError> {
        let mut inner = self.inner.lock().unwrap();
        inner.calls.push(Call::Remove(job.clone()));
        let phase = inner
            .jobs
            .get(job)
            .map(|j| j.phase.clone())
            .ok_or_else(|| EngineError::NotFound(job.clone()))?;
        if phase != JobPhase::Stopped {
            return Err(EngineError::NotStopped(job.clone()));
        }
        if inner.fail_remove {
            return Err(EngineError::Storage {
                path: PathBuf::from("downloads"),
                source: io::Error::other("injected remove failure"),
            });
        }
        inner.jobs.remove(job);
        Ok(())
    }
}

/// Serves `body` at [`MANIFEST_PATH`], replacing whatever was mounted before.
pub async fn serve_manifest(server: &MockServer, body: &[u8]) {
    server.reset().await;
    Mock::given(method("GET"))
        .and(path(MANIFEST_PATH))
        .respond_with(ResponseTemplate::new(200).set_body_bytes(body.to_vec()))
        .mount(server)
        .await;
}

pub fn controller(server: &MockServer, data_dir: &Path, engine: Arc<FakeEngine>) -> SyncController {
    SyncController::new(
        format!("{}{}", server.uri(), MANIFEST_PATH),
        data_dir,
        Fetcher::new(Duration::from_secs(5)).unwrap(),
        engine,
    )
}

/// Names of the files currently in `dir`, sorted.
pub fn list_dir(dir: &Path) -> Vec<String> {
    let mut names: Vec<String> = std::fs::read_dir(dir)
        .unwrap()
        .map(|e| e.unwrap().file_name().to_string_lossy().into_owned())
        .collect();
    names.sort();
    names
}
