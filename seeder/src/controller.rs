//! Keeps exactly one distribution job running for the latest manifest.

use crate::digest::{digest_and_relocate, digest_file, is_digest_name};
use crate::distribution::{DistributionEngine, JobPhase};
use crate::error::SyncError;
use crate::fetch::Fetcher;
use crate::status::format_status;
use seed_engine::JobId;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use tokio::fs;
use tokio::sync::Mutex;
use tracing::{debug, error, info, warn};

/// Digest and job of the manifest currently being distributed.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct SyncState {
    /// Also the file name of the manifest under the data directory.
    pub current_digest: Option<String>,
    pub active_job: Option<JobId>,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum RefreshOutcome {
    /// Same manifest as before; the active job was left alone.
    Unchanged,
    /// Same manifest, but its job had stopped or was missing, so it was submitted again.
    Resumed { job: JobId },
    /// A new manifest replaced the old one.
    Swapped { digest: String, job: JobId },
}

pub struct SyncController {
    source_url: String,
    data_dir: PathBuf,
    fetcher: Fetcher,
    engine: Arc<dyn DistributionEngine>,
    state: Mutex<SyncState>,
    /// Held for a whole bootstrap or refresh cycle.
    cycle: Mutex<()>,
}

impl SyncController {
    pub fn new(
        source_url: impl Into<String>,
        data_dir: impl Into<PathBuf>,
        fetcher: Fetcher,
        engine: Arc<dyn DistributionEngine>,
    ) -> Self {
        Self {
            source_url: source_url.into(),
            data_dir: data_dir.into(),
            fetcher,
            engine,
            state: Mutex::new(SyncState::default()),
            cycle: Mutex::new(()),
        }
    }

    pub async fn state(&self) -> SyncState {
        self.state.lock().await.clone()
    }

    /// Creates the data directory if needed.
    pub async fn initialize(&self) -> Result<(), SyncError> {
        fs::create_dir_all(&self.data_dir)
            .await
            .map_err(|source| SyncError::DataDir {
                path: self.data_dir.clone(),
                source,
            })?;
        debug!(data_dir = %self.data_dir.display(), "data directory ready");
        Ok(())
    }

    /// Fetches the manifest, stores it under its digest and starts the first job.
    pub async fn bootstrap(&self) -> Result<(), SyncError> {
        let _cycle = self.cycle.lock().await;

        let fetched = self.fetch_manifest().await?;
        let digest = match digest_and_relocate(&fetched, &self.data_dir).await {
            Ok(digest) => digest,
            Err(e) => {
                discard(&fetched).await;
                return Err(e.into());
            }
        };
        let path = self.manifest_path(&digest);
        info!(digest = %digest, "stored manifest");

        let job = self
            .engine
            .submit(&path)
            .await
            .map_err(|source| SyncError::Submit {
                path: path.clone(),
                source,
            })?;
        info!(job = %job, digest = %digest, "distribution job started");

        *self.state.lock().await = SyncState {
            current_digest: Some(digest.clone()),
            active_job: Some(job),
        };
        self.prune_stale_manifests(&digest).await;
        Ok(())
    }

    /// Runs one fetch-compare-swap cycle.
    ///
    /// Any error leaves the previous digest and job in place. Returns
    /// [`SyncError::Busy`] without doing anything if another cycle is still running.
    pub async fn refresh(&self) -> Result<RefreshOutcome, SyncError> {
        let Ok(_cycle) = self.cycle.try_lock() else {
            return Err(SyncError::Busy);
        };

        let fetched = self.fetch_manifest().await?;
        let new_digest = match digest_file(&fetched).await {
            Ok(digest) => digest,
            Err(e) => {
                discard(&fetched).await;
                return Err(e.into());
            }
        };

        let snapshot = self.state().await;
        if snapshot.current_digest.as_deref() == Some(new_digest.as_str()) {
            discard(&fetched).await;
            if let Some(job) = &snapshot.active_job {
                if self.check_running(job).await? {
                    debug!(digest = %new_digest, "manifest unchanged");
                    return Ok(RefreshOutcome::Unchanged);
                }
            }
            return self.resume(&new_digest, snapshot.active_job.as_ref()).await;
        }
        info!(
            old = snapshot.current_digest.as_deref().unwrap_or("none"),
            new = %new_digest,
            "manifest changed"
        );

        let new_digest = match digest_and_relocate(&fetched, &self.data_dir).await {
            Ok(digest) => digest,
            Err(e) => {
                discard(&fetched).await;
                return Err(e.into());
            }
        };
        let staged = self.manifest_path(&new_digest);

        let mut state = self.state.lock().await;
        if let Some(old_job) = state.active_job.clone() {
            if let Err(e) = self.retire(&old_job).await {
                discard(&staged).await;
                return Err(e);
            }
        }

        let job = match self.engine.submit(&staged).await {
            Ok(job) => job,
            Err(source) => {
                error!(path = %staged.display(), error = %source, "failed to submit new manifest, restoring previous one");
                discard(&staged).await;
                state.active_job = match state.current_digest.clone() {
                    Some(old) => self.restore(&old).await,
                    None => None,
                };
                return Err(SyncError::Submit {
                    path: staged,
                    source,
                });
            }
        };

        let previous = std::mem::replace(
            &mut *state,
            SyncState {
                current_digest: Some(new_digest.clone()),
                active_job: Some(job.clone()),
            },
        );
        drop(state);
        info!(job = %job, digest = %new_digest, "swapped to new manifest");

        if let Some(old) = previous.current_digest {
            let old_path = self.manifest_path(&old);
            if let Err(e) = fs::remove_file(&old_path).await {
                warn!(path = %old_path.display(), error = %e, "failed to delete old manifest");
            }
        }
        Ok(RefreshOutcome::Swapped {
            digest: new_digest,
            job,
        })
    }

    /// Status line for the active job.
    ///
    /// Waits for an in-flight swap to commit rather than reading a half-updated state.
    pub async fn report_status(&self) -> Result<String, SyncError> {
        let state = self.state.lock().await;
        let job = state.active_job.clone().ok_or(SyncError::NoActiveJob)?;
        let report = self
            .engine
            .stats(&job)
            .await
            .map_err(|source| SyncError::Stats {
                job: job.clone(),
                source,
            })?;
        drop(state);

        if let JobPhase::Other(phase) = &report.phase {
            debug!(job = %job, phase = %phase, report = ?report, "job in transitional phase");
        }
        Ok(format_status(&report))
    }

    /// Stops the active job so its content is intact for the next start. The job stays
    /// registered.
    pub async fn shutdown(&self) {
        let _cycle = self.cycle.lock().await;
        let state = self.state.lock().await;
        let Some(job) = &state.active_job else {
            return;
        };
        match self.engine.stop(job).await {
            Ok(()) => info!(job = %job, "distribution job stopped"),
            Err(e) => error!(job = %job, error = %e, "failed to stop distribution job"),
        }
    }

    fn manifest_path(&self, digest: &str) -> PathBuf {
        self.data_dir.join(digest)
    }

    async fn fetch_manifest(&self) -> Result<PathBuf, SyncError> {
        match self.fetcher.fetch(&self.source_url, &self.data_dir).await {
            Ok(path) => {
                debug!(url = %self.source_url, path = %path.display(), "fetched manifest");
                Ok(path)
            }
            Err(e) => {
                if let Some(path) = e.partial_file() {
                    discard(path).await;
                }
                Err(e.into())
            }
        }
    }

    /// Stops and removes `job`. A job the engine no longer knows counts as retired.
    async fn retire(&self, job: &JobId) -> Result<(), SyncError> {
        match self.engine.stop(job).await {
            Ok(()) => debug!(job = %job, "stopped old job"),
            Err(e) if e.is_not_found() => {
                warn!(job = %job, "old job already gone");
                return Ok(());
            }
            Err(source) => {
                return Err(SyncError::Stop {
                    job: job.clone(),
                    source,
                });
            }
        }
        match self.engine.remove(job).await {
            Ok(()) => {
                debug!(job = %job, "removed old job");
                Ok(())
            }
            Err(e) if e.is_not_found() => Ok(()),
            Err(source) => Err(SyncError::Remove {
                job: job.clone(),
                source,
            }),
        }
    }

    /// Resubmits the manifest stored under `digest`, returning the new job if that worked.
    async fn restore(&self, digest: &str) -> Option<JobId> {
        let path = self.manifest_path(digest);
        match self.engine.submit(&path).await {
            Ok(job) => {
                warn!(job = %job, digest = %digest, "restored previous manifest");
                Some(job)
            }
            Err(e) => {
                error!(path = %path.display(), error = %e, "failed to restore previous manifest");
                None
            }
        }
    }

    /// Whether `job` is still distributing. A job that is stopping, stopped or unknown to
    /// the engine is not.
    async fn check_running(&self, job: &JobId) -> Result<bool, SyncError> {
        match self.engine.stats(job).await {
            Ok(report) => match report.phase {
                JobPhase::Stopping | JobPhase::Stopped => {
                    warn!(job = %job, phase = ?report.phase, "active job is no longer running");
                    Ok(false)
                }
                _ => Ok(true),
            },
            Err(e) if e.is_not_found() => {
                warn!(job = %job, "active job is unknown to the engine");
                Ok(false)
            }
            Err(source) => Err(SyncError::Stats {
                job: job.clone(),
                source,
            }),
        }
    }

    /// Submits the manifest stored under `digest` again, first retiring `stale` if given.
    ///
    /// If retiring fails, the stale job stays recorded so the next cycle retries it.
    async fn resume(
        &self,
        digest: &str,
        stale: Option<&JobId>,
    ) -> Result<RefreshOutcome, SyncError> {
        let path = self.manifest_path(digest);
        let mut state = self.state.lock().await;
        if let Some(old_job) = stale {
            self.retire(old_job).await?;
            state.active_job = None;
        }
        let job = self
            .engine
            .submit(&path)
            .await
            .map_err(|source| SyncError::Submit { path, source })?;
        info!(job = %job, digest = %digest, "resumed distribution of current manifest");
        state.active_job = Some(job.clone());
        Ok(RefreshOutcome::Resumed { job })
    }

    /// Deletes manifests left over from earlier runs.
    async fn prune_stale_manifests(&self, keep: &str) {
        let mut entries = match fs::read_dir(&self.data_dir).await {
            Ok(entries) => entries,
            Err(e) => {
                warn!(data_dir = %self.data_dir.display(), error = %e, "failed to list data directory");
                return;
            }
        };
        loop {
            let entry = match entries.next_entry().await {
                Ok(Some(entry)) => entry,
                Ok(None) => break,
                Err(e) => {
                    warn!(data_dir = %self.data_dir.display(), error = %e, "failed to read data directory entry");
                    break;
                }
            };
            let name = entry.file_name();
            let Some(name) = name.to_str() else {
                continue;
            };
            if name != keep && is_digest_name(name) {
                match fs::remove_file(entry.path()).await {
                    Ok(()) => debug!(file = name, "deleted stale manifest"),
                    Err(e) => warn!(file = name, error = %e, "failed to delete stale manifest"),
                }
            }
        }
    }
}

/// Best-effort removal of a file this cycle created.
async fn discard(path: &Path) {
    if let Err(e) = fs::remove_file(path).await {
        if e.kind() != std::io::ErrorKind::NotFound {
            warn!(path = %path.display(), error = %e, "failed to delete temporary manifest");
        }
    }
}
