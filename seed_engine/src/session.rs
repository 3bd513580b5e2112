//! A session owns the peer listener, the content directory and every registered job.

use crate::error::{EngineError, PeerError};
use crate::job::{self, JobEnv, JobId, JobState, Mailbox, open_content};
use crate::peer::{Handshake, PeerConnection};
use crate::stats::{Phase, Stats};
use crate::storage::Storage;
use rand::Rng;
use seed_core::{Metainfo, TokenBucket};
use std::collections::HashMap;
use std::net::SocketAddr;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Duration;
use tokio::net::{TcpListener, TcpStream};
use tokio::sync::{Mutex, RwLock, mpsc};
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

const PEER_ID_PREFIX: &[u8; 8] = b"-SD0100-";
/// Smallest burst the upload limiter allows, so a full block always fits.
const MIN_UPLOAD_BURST: f64 = 256.0 * 1024.0;

#[derive(Debug, Clone)]
pub struct SessionConfig {
    /// Where job content is stored, one subdirectory per info hash.
    pub download_dir: PathBuf,
    /// Port for inbound peers; 0 picks an ephemeral one.
    pub listen_port: u16,
    /// Upload cap in bytes per second shared by all jobs; 0 disables it.
    pub upload_rate: u64,
    /// Whether jobs contact their trackers.
    pub announce: bool,
    pub announce_timeout: Duration,
    pub max_peers: usize,
    pub user_agent: String,
}

impl Default for SessionConfig {
    fn default() -> Self {
        Self {
            download_dir: PathBuf::from("downloads"),
            listen_port: 6881,
            upload_rate: 0,
            announce: true,
            announce_timeout: Duration::from_secs(15),
            max_peers: 50,
            user_agent: concat!(env!("CARGO_PKG_NAME"), "/", env!("CARGO_PKG_VERSION")).to_string(),
        }
    }
}

struct JobEntry {
    state: Arc<JobState>,
    token: CancellationToken,
    /// Taken by `stop`; `None` once the task has been joined.
    handle: Option<JoinHandle<()>>,
    discovered: mpsc::Sender<SocketAddr>,
    inbound: mpsc::Sender<PeerConnection>,
}

type Jobs = Arc<RwLock<HashMap<JobId, JobEntry>>>;

pub struct Session {
    storage: Storage,
    jobs: Jobs,
    env: Arc<JobEnv>,
    listen_port: u16,
    token: CancellationToken,
}

impl Session {
    /// Creates the download directory and starts accepting peers.
    pub async fn open(config: SessionConfig) -> Result<Self, EngineError> {
        let storage =
            Storage::new(&config.download_dir)
                .await
                .map_err(|source| EngineError::Storage {
                    path: config.download_dir.clone(),
                    source,
                })?;

        let listen_err = |source| EngineError::Listen {
            port: config.listen_port,
            source,
        };
        let listener = TcpListener::bind(("0.0.0.0", config.listen_port))
            .await
            .map_err(listen_err)?;
        let listen_port = listener.local_addr().map_err(listen_err)?.port();

        let upload_limiter = (config.upload_rate > 0).then(|| {
            let rate = config.upload_rate as f64;
            Arc::new(Mutex::new(TokenBucket::new(rate.max(MIN_UPLOAD_BURST), rate)))
        });
        let env = Arc::new(JobEnv {
            peer_id: generate_peer_id(),
            listen_port,
            upload_limiter,
            user_agent: config.user_agent,
            announce_timeout: config.announce_timeout,
            announce: config.announce,
            max_peers: config.max_peers.max(1),
        });

        let jobs: Jobs = Arc::new(RwLock::new(HashMap::new()));
        let token = CancellationToken::new();
        tokio::spawn(accept_loop(
            listener,
            jobs.clone(),
            env.peer_id,
            token.clone(),
        ));
        info!(
            port = listen_port,
            download_dir = %storage.download_dir.display(),
            "session opened"
        );

        Ok(Self {
            storage,
            jobs,
            env,
            listen_port,
            token,
        })
    }

    pub fn listen_port(&self) -> u16 {
        self.listen_port
    }

    pub fn download_dir(&self) -> &Path {
        &self.storage.download_dir
    }

    /// Registers the torrent at `path` and starts its job.
    pub async fn submit(&self, path: &Path) -> Result<JobId, EngineError> {
        let raw = tokio::fs::read(path)
            .await
            .map_err(|source| EngineError::Open {
                path: path.to_path_buf(),
                source,
            })?;
        let metainfo = Arc::new(Metainfo::from_bytes(&raw)?);

        let mut jobs = self.jobs.write().await;
        if let Some(existing) = jobs
            .values()
            .find(|e| e.state.metainfo.info_hash == metainfo.info_hash)
        {
            return Err(EngineError::AlreadyRegistered {
                info_hash: metainfo.info_hash,
                id: existing.state.id.clone(),
            });
        }

        let content_path = self.storage.content_path(&metainfo);
        let file = open_content(&content_path, metainfo.total_length()).await?;
        let id = JobId::generate();
        let state = Arc::new(JobState::new(
            id.clone(),
            metainfo,
            content_path,
            file,
        ));

        let (discovered, peers) = mpsc::channel(100);
        let (inbound_tx, inbound) = mpsc::channel(16);
        let token = self.token.child_token();
        let handle = tokio::spawn(job::run(
            state.clone(),
            self.env.clone(),
            Mailbox {
                discovered: discovered.clone(),
                peers,
                inbound,
            },
            token.clone(),
        ));

        info!(
            job = %id,
            info_hash = %state.metainfo.info_hash,
            name = %state.metainfo.name,
            size = state.metainfo.total_length(),
            "job submitted"
        );
        jobs.insert(
            id.clone(),
            JobEntry {
                state,
                token,
                handle: Some(handle),
                discovered,
                inbound: inbound_tx,
            },
        );
        Ok(id)
    }

    pub async fn stats(&self, id: &JobId) -> Result<Stats, EngineError> {
        let jobs = self.jobs.read().await;
        let entry = jobs
            .get(id)
            .ok_or_else(|| EngineError::NotFound(id.clone()))?;
        Ok(entry.state.stats())
    }

    /// Cancels the job and waits up to `timeout` for its task to wind down.
    ///
    /// Stopping an already stopped job succeeds. On timeout the job keeps running its
    /// shutdown and a later `stop` call waits for it again.
    pub async fn stop(&self, id: &JobId, timeout: Duration) -> Result<(), EngineError> {
        let (handle, state) = {
            let mut jobs = self.jobs.write().await;
            let entry = jobs
                .get_mut(id)
                .ok_or_else(|| EngineError::NotFound(id.clone()))?;
            entry.token.cancel();
            (entry.handle.take(), entry.state.clone())
        };
        let Some(mut handle) = handle else {
            return Ok(());
        };

        match tokio::time::timeout(timeout, &mut handle).await {
            Ok(Ok(())) => Ok(()),
            Ok(Err(e)) => {
                warn!(job = %id, error = %e, "job task ended abnormally");
                state.set_phase(Phase::Stopped);
                Ok(())
            }
            Err(_) => {
                if let Some(entry) = self.jobs.write().await.get_mut(id) {
                    entry.handle = Some(handle);
                }
                Err(EngineError::StopTimeout {
                    id: id.clone(),
                    timeout,
                })
            }
        }
    }

    /// Forgets a stopped job and deletes its content.
    pub async fn remove(&self, id: &JobId) -> Result<(), EngineError> {
        let mut jobs = self.jobs.write().await;
        let entry = jobs
            .get(id)
            .ok_or_else(|| EngineError::NotFound(id.clone()))?;
        if entry.state.phase() != Phase::Stopped {
            return Err(EngineError::NotStopped(id.clone()));
        }
        self.storage
            .remove_job_dir(&entry.state.metainfo.info_hash)
            .await?;
        jobs.remove(id);
        info!(job = %id, "job removed");
        Ok(())
    }

    /// Queues a peer address for the job to dial, in addition to tracker results.
    pub async fn add_peer(&self, id: &JobId, addr: SocketAddr) -> Result<(), EngineError> {
        let discovered = {
            let jobs = self.jobs.read().await;
            jobs.get(id)
                .ok_or_else(|| EngineError::NotFound(id.clone()))?
                .discovered
                .clone()
        };
        if discovered.send(addr).await.is_err() {
            debug!(job = %id, %addr, "job no longer accepts peers");
        }
        Ok(())
    }

    pub async fn jobs(&self) -> Vec<JobId> {
        self.jobs.read().await.keys().cloned().collect()
    }
}

impl Drop for Session {
    fn drop(&mut self) {
        self.token.cancel();
    }
}

fn generate_peer_id() -> [u8; 20] {
    let mut id: [u8; 20] = rand::rng().random();
    id[..8].copy_from_slice(PEER_ID_PREFIX);
    id
}

async fn accept_loop(
    listener: TcpListener,
    jobs: Jobs,
    peer_id: [u8; 20],
    token: CancellationToken,
) {
    loop {
        let (stream, addr) = tokio::select! {
            _ = token.cancelled() => break,
            res = listener.accept() => match res {
                Ok(conn) => conn,
                Err(e) => {
                    warn!(error = %e, "failed to accept peer");
                    tokio::time::sleep(Duration::from_millis(100)).await;
                    continue;
                }
            },
        };
        let jobs = jobs.clone();
        tokio::spawn(async move {
            if let Err(e) = route_inbound(stream, addr, &jobs, peer_id).await {
                debug!(%addr, error = %e, "rejected inbound peer");
            }
        });
    }
}

/// Completes the handshake of an inbound peer and hands it to the job serving its
/// info hash.
async fn route_inbound(
    mut stream: TcpStream,
    addr: SocketAddr,
    jobs: &RwLock<HashMap<JobId, JobEntry>>,
    peer_id: [u8; 20],
) -> Result<(), PeerError> {
    let theirs = Handshake::read(&mut stream).await?;
    let inbound = {
        let jobs = jobs.read().await;
        jobs.values()
            .find(|e| e.state.metainfo.info_hash == theirs.info_hash && !e.token.is_cancelled())
            .map(|e| e.inbound.clone())
    };
    let Some(inbound) = inbound else {
        return Err(PeerError::InfoHashMismatch);
    };

    Handshake {
        info_hash: theirs.info_hash,
        peer_id,
    }
    .write(&mut stream)
    .await?;
    if inbound
        .send(PeerConnection::from_stream(addr, stream, theirs.peer_id))
        .await
        .is_err()
    {
        debug!(%addr, "job stopped before the peer was handed over");
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::net::{Ipv4Addr, SocketAddrV4};
    use tempfile::{TempDir, tempdir};

    const PIECE_LENGTH: u64 = 32 * 1024;

    fn content() -> Vec<u8> {
        (0..100_000u32).map(|i| (i % 251) as u8).collect()
    }

    fn config(dir: &Path) -> SessionConfig {
        SessionConfig {
            download_dir: dir.to_path_buf(),
            listen_port: 0,
            announce: false,
            ..SessionConfig::default()
        }
    }

    async fn write_torrent(dir: &TempDir, content: &[u8]) -> PathBuf {
        let raw = seed_core::create_single_file("", "pack.bin", PIECE_LENGTH, content);
        let path = dir.path().join("pack.torrent");
        tokio::fs::write(&path, raw).await.unwrap();
        path
    }

    async fn wait_for_phase(session: &Session, id: &JobId, phase: Phase) -> Stats {
        let deadline = tokio::time::Instant::now() + Duration::from_secs(10);
        loop {
            let stats = session.stats(id).await.unwrap();
            if stats.phase == phase {
                return stats;
            }
            assert!(
                tokio::time::Instant::now() < deadline,
                "job stuck in {:?}",
                stats.phase
            );
            tokio::time::sleep(Duration::from_millis(20)).await;
        }
    }

    #[tokio::test]
    async fn test_submit_without_content_starts_downloading() {
        let work = tempdir().unwrap();
        let torrent = write_torrent(&work, &content()).await;
        let session = Session::open(config(&work.path().join("dl"))).await.unwrap();

        let id = session.submit(&torrent).await.unwrap();
        let stats = wait_for_phase(&session, &id, Phase::Downloading).await;
        assert_eq!(stats.bytes_total, 100_000);
        assert_eq!(stats.pieces_total, 4);
        assert_eq!(stats.pieces_have, 0);
        assert_eq!(stats.peers.total, 0);
        assert_eq!(session.jobs().await, vec![id]);
    }

    #[tokio::test]
    async fn test_existing_content_is_verified_and_seeded() {
        let work = tempdir().unwrap();
        let data = content();
        let torrent = write_torrent(&work, &data).await;
        let session = Session::open(config(&work.path().join("dl"))).await.unwrap();

        let metainfo = seed_core::parse_metainfo(&torrent).unwrap();
        let path = session.storage.content_path(&metainfo);
        tokio::fs::create_dir_all(path.parent().unwrap()).await.unwrap();
        tokio::fs::write(&path, &data).await.unwrap();

        let id = session.submit(&torrent).await.unwrap();
        let stats = wait_for_phase(&session, &id, Phase::Seeding).await;
        assert_eq!(stats.pieces_have, 4);
        assert_eq!(stats.bytes_completed, 100_000);
        assert!(stats.seeded_for.is_some());
        assert_eq!(stats.eta, None);
    }

    #[tokio::test]
    async fn test_duplicate_submit_is_rejected() {
        let work = tempdir().unwrap();
        let torrent = write_torrent(&work, &content()).await;
        let session = Session::open(config(&work.path().join("dl"))).await.unwrap();

        let id = session.submit(&torrent).await.unwrap();
        match session.submit(&torrent).await {
            Err(EngineError::AlreadyRegistered { id: existing, .. }) => assert_eq!(existing, id),
            other => panic!("expected AlreadyRegistered, got {:?}", other),
        }
    }

    #[tokio::test]
    async fn test_submit_missing_file_fails() {
        let work = tempdir().unwrap();
        let session = Session::open(config(&work.path().join("dl"))).await.unwrap();
        let result = session.submit(&work.path().join("nope.torrent")).await;
        assert!(matches!(result, Err(EngineError::Open { .. })));
        assert!(session.jobs().await.is_empty());
    }

    #[tokio::test]
    async fn test_stop_and_remove_lifecycle() {
        let work = tempdir().unwrap();
        let torrent = write_torrent(&work, &content()).await;
        let session = Session::open(config(&work.path().join("dl"))).await.unwrap();
        let id = session.submit(&torrent).await.unwrap();
        wait_for_phase(&session, &id, Phase::Downloading).await;

        assert!(matches!(
            session.remove(&id).await,
            Err(EngineError::NotStopped(_))
        ));

        session.stop(&id, Duration::from_secs(5)).await.unwrap();
        assert_eq!(session.stats(&id).await.unwrap().phase, Phase::Stopped);
        // Stopping twice is harmless.
        session.stop(&id, Duration::from_secs(5)).await.unwrap();

        let metainfo = seed_core::parse_metainfo(&torrent).unwrap();
        let job_dir = session.storage.job_dir(&metainfo.info_hash);
        assert!(job_dir.exists());
        session.remove(&id).await.unwrap();
        assert!(!job_dir.exists());

        assert!(session.stats(&id).await.unwrap_err().is_not_found());
        assert!(session.remove(&id).await.unwrap_err().is_not_found());
        assert!(session.stop(&id, Duration::from_secs(1)).await.unwrap_err().is_not_found());

        // The info hash is free again.
        session.submit(&torrent).await.unwrap();
    }

    #[tokio::test]
    async fn test_transfer_between_sessions() {
        let work = tempdir().unwrap();
        let data = content();
        let torrent = write_torrent(&work, &data).await;

        let seed = Session::open(config(&work.path().join("seed"))).await.unwrap();
        let metainfo = seed_core::parse_metainfo(&torrent).unwrap();
        let seed_path = seed.storage.content_path(&metainfo);
        tokio::fs::create_dir_all(seed_path.parent().unwrap()).await.unwrap();
        tokio::fs::write(&seed_path, &data).await.unwrap();
        let seed_id = seed.submit(&torrent).await.unwrap();
        wait_for_phase(&seed, &seed_id, Phase::Seeding).await;

        let leech = Session::open(config(&work.path().join("leech"))).await.unwrap();
        let leech_id = leech.submit(&torrent).await.unwrap();
        wait_for_phase(&leech, &leech_id, Phase::Downloading).await;
        let seed_addr = SocketAddr::V4(SocketAddrV4::new(Ipv4Addr::LOCALHOST, seed.listen_port()));
        leech.add_peer(&leech_id, seed_addr).await.unwrap();

        let stats = wait_for_phase(&leech, &leech_id, Phase::Seeding).await;
        assert_eq!(stats.pieces_have, 4);
        assert_eq!(stats.bytes_completed, data.len() as u64);

        leech.stop(&leech_id, Duration::from_secs(5)).await.unwrap();
        let downloaded = tokio::fs::read(leech.storage.content_path(&metainfo))
            .await
            .unwrap();
        assert_eq!(downloaded, data);
        assert!(seed.stats(&seed_id).await.unwrap().bytes_uploaded >= data.len() as u64);
    }
}
