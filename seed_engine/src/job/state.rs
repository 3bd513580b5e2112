use super::JobId;
use crate::stats::{Peers, Phase, Stats, estimate_eta};
use rand::Rng;
use seed_core::Metainfo;
use sha1::{Digest, Sha1};
use std::io::{self, SeekFrom};
use std::path::PathBuf;
use std::sync::Arc;
use std::sync::atomic::{AtomicU64, AtomicUsize, Ordering};
use std::time::{Duration, Instant};
use tokio::fs::File;
use tokio::io::{AsyncReadExt, AsyncSeekExt, AsyncWriteExt};
use tokio::sync::{Mutex, watch};

/// Represents the download status of a specific piece of the torrent.
#[derive(Clone, Copy, PartialEq, Debug)]
pub enum PieceStatus {
    /// The piece has not been downloaded yet.
    Missing,
    /// The piece is currently being downloaded from a peer.
    InProgress,
    /// The piece has been successfully downloaded and verified.
    Have,
}

#[derive(Clone, Copy, Debug)]
pub(crate) struct Lifecycle {
    pub phase: Phase,
    download_started: Option<Instant>,
    seeding_since: Option<Instant>,
}

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub(crate) enum Direction {
    Incoming,
    Outgoing,
}

/// Shared state of one job, read by the session for stats and mutated by the job's
/// peer tasks.
pub struct JobState {
    pub id: JobId,
    pub metainfo: Arc<Metainfo>,
    pub content_path: PathBuf,
    file: Mutex<File>,
    piece_status: Mutex<Vec<PieceStatus>>,
    pieces_have: AtomicUsize,
    completed_bytes: AtomicU64,
    /// Bytes fetched from peers during this run; drives the ETA.
    transferred_bytes: AtomicU64,
    uploaded_bytes: AtomicU64,
    peers_incoming: AtomicUsize,
    peers_outgoing: AtomicUsize,
    lifecycle: watch::Sender<Lifecycle>,
}

impl JobState {
    pub(crate) fn new(id: JobId, metainfo: Arc<Metainfo>, content_path: PathBuf, file: File) -> Self {
        let piece_count = metainfo.piece_count();
        let (lifecycle, _) = watch::channel(Lifecycle {
            phase: Phase::Starting,
            download_started: None,
            seeding_since: None,
        });
        Self {
            id,
            metainfo,
            content_path,
            file: Mutex::new(file),
            piece_status: Mutex::new(vec![PieceStatus::Missing; piece_count]),
            pieces_have: AtomicUsize::new(0),
            completed_bytes: AtomicU64::new(0),
            transferred_bytes: AtomicU64::new(0),
            uploaded_bytes: AtomicU64::new(0),
            peers_incoming: AtomicUsize::new(0),
            peers_outgoing: AtomicUsize::new(0),
            lifecycle,
        }
    }

    pub fn phase(&self) -> Phase {
        self.lifecycle.borrow().phase
    }

    pub(crate) fn set_phase(&self, phase: Phase) {
        self.lifecycle.send_modify(|l| {
            l.phase = phase;
            let now = Instant::now();
            match phase {
                Phase::Downloading => {
                    l.download_started.get_or_insert(now);
                }
                Phase::Seeding => {
                    l.seeding_since.get_or_insert(now);
                }
                _ => {}
            }
        });
    }

    pub(crate) fn subscribe(&self) -> watch::Receiver<Lifecycle> {
        self.lifecycle.subscribe()
    }

    pub fn is_complete(&self) -> bool {
        self.pieces_have.load(Ordering::SeqCst) == self.metainfo.piece_count()
    }

    /// Bytes still missing, as reported to trackers.
    pub fn left(&self) -> u64 {
        self.metainfo
            .total_length()
            .saturating_sub(self.completed_bytes.load(Ordering::SeqCst))
    }

    pub fn completed_bytes(&self) -> u64 {
        self.completed_bytes.load(Ordering::SeqCst)
    }

    pub(crate) fn transferred_bytes(&self) -> u64 {
        self.transferred_bytes.load(Ordering::SeqCst)
    }

    pub fn uploaded_bytes(&self) -> u64 {
        self.uploaded_bytes.load(Ordering::SeqCst)
    }

    pub(crate) fn add_uploaded(&self, bytes: u64) {
        self.uploaded_bytes.fetch_add(bytes, Ordering::SeqCst);
    }

    pub fn stats(&self) -> Stats {
        let lifecycle = *self.lifecycle.borrow();
        let now = Instant::now();
        let eta = match (lifecycle.phase, lifecycle.download_started) {
            (Phase::Downloading, Some(started)) => estimate_eta(
                self.left(),
                self.transferred_bytes(),
                now.duration_since(started),
            ),
            _ => None,
        };
        let seeded_for = match (lifecycle.phase, lifecycle.seeding_since) {
            (Phase::Seeding, Some(since)) => {
                Some(Duration::from_secs(now.duration_since(since).as_secs()))
            }
            _ => None,
        };

        Stats {
            phase: lifecycle.phase,
            peers: Peers::new(
                self.peers_incoming.load(Ordering::SeqCst),
                self.peers_outgoing.load(Ordering::SeqCst),
            ),
            eta,
            seeded_for,
            bytes_total: self.metainfo.total_length(),
            bytes_completed: self.completed_bytes(),
            bytes_uploaded: self.uploaded_bytes(),
            pieces_have: self.pieces_have.load(Ordering::SeqCst),
            pieces_total: self.metainfo.piece_count(),
        }
    }

    /// Counts a live connection until the returned guard is dropped.
    pub(crate) fn track_peer(self: &Arc<Self>, direction: Direction) -> PeerGuard {
        self.peer_counter(direction).fetch_add(1, Ordering::SeqCst);
        PeerGuard {
            state: self.clone(),
            direction,
        }
    }

    fn peer_counter(&self, direction: Direction) -> &AtomicUsize {
        match direction {
            Direction::Incoming => &self.peers_incoming,
            Direction::Outgoing => &self.peers_outgoing,
        }
    }

    /// Our bitfield, or `None` if we have nothing to advertise.
    pub(crate) async fn bitfield(&self) -> Option<Vec<u8>> {
        let status = self.piece_status.lock().await;
        if !status.contains(&PieceStatus::Have) {
            return None;
        }
        let mut bitfield = vec![0u8; status.len().div_ceil(8)];
        for (i, s) in status.iter().enumerate() {
            if *s == PieceStatus::Have {
                bitfield[i / 8] |= 1 << (7 - (i % 8));
            }
        }
        Some(bitfield)
    }

    /// Picks a random missing piece the peer has and marks it in progress.
    pub(crate) async fn claim_piece(&self, peer_has: impl Fn(usize) -> bool) -> Option<usize> {
        let mut status = self.piece_status.lock().await;
        let available: Vec<usize> = status
            .iter()
            .enumerate()
            .filter(|&(i, s)| *s == PieceStatus::Missing && peer_has(i))
            .map(|(i, _)| i)
            .collect();
        if available.is_empty() {
            return None;
        }
        let i = available[rand::rng().random_range(0..available.len())];
        status[i] = PieceStatus::InProgress;
        Some(i)
    }

    pub(crate) async fn release_piece(&self, index: usize) {
        let mut status = self.piece_status.lock().await;
        if status.get(index) == Some(&PieceStatus::InProgress) {
            status[index] = PieceStatus::Missing;
        }
    }

    /// Verifies a downloaded piece and writes it to disk.
    ///
    /// Returns `Ok(false)` on a hash mismatch; the piece goes back to `Missing`.
    pub(crate) async fn store_piece(&self, index: usize, data: &[u8]) -> io::Result<bool> {
        if Sha1::digest(data).as_slice() != &self.metainfo.pieces[index][..] {
            self.release_piece(index).await;
            return Ok(false);
        }

        {
            let mut f = self.file.lock().await;
            f.seek(SeekFrom::Start(index as u64 * self.metainfo.piece_length))
                .await?;
            f.write_all(data).await?;
        }
        self.transferred_bytes
            .fetch_add(data.len() as u64, Ordering::SeqCst);
        self.mark_have(index, data.len() as u64).await;

        if self.is_complete() {
            self.flush().await?;
            self.set_phase(Phase::Seeding);
        }
        Ok(true)
    }

    pub(crate) async fn mark_have(&self, index: usize, len: u64) {
        let mut status = self.piece_status.lock().await;
        if status[index] != PieceStatus::Have {
            status[index] = PieceStatus::Have;
            self.pieces_have.fetch_add(1, Ordering::SeqCst);
            self.completed_bytes.fetch_add(len, Ordering::SeqCst);
        }
    }

    pub(crate) async fn has_piece(&self, index: usize) -> bool {
        self.piece_status.lock().await.get(index) == Some(&PieceStatus::Have)
    }

    /// Reads a block we can serve, or `None` if we don't have it or the range is invalid.
    pub(crate) async fn read_block(
        &self,
        index: usize,
        begin: u64,
        length: u64,
    ) -> io::Result<Option<Vec<u8>>> {
        if !self.has_piece(index).await || begin + length > self.metainfo.piece_size(index) {
            return Ok(None);
        }
        let mut f = self.file.lock().await;
        f.seek(SeekFrom::Start(index as u64 * self.metainfo.piece_length + begin))
            .await?;
        let mut block = vec![0u8; length as usize];
        f.read_exact(&mut block).await?;
        Ok(Some(block))
    }

    /// Reads a whole piece for verification; `None` if the file is too short.
    pub(crate) async fn read_piece(&self, index: usize) -> io::Result<Option<Vec<u8>>> {
        let len = self.metainfo.piece_size(index);
        let offset = index as u64 * self.metainfo.piece_length;
        let mut f = self.file.lock().await;
        if offset + len > f.metadata().await?.len() {
            return Ok(None);
        }
        f.seek(SeekFrom::Start(offset)).await?;
        let mut buf = vec![0u8; len as usize];
        f.read_exact(&mut buf).await?;
        Ok(Some(buf))
    }

    pub(crate) async fn flush(&self) -> io::Result<()> {
        self.file.lock().await.flush().await
    }
}

pub(crate) struct PeerGuard {
    state: Arc<JobState>,
    direction: Direction,
}

impl Drop for PeerGuard {
    fn drop(&mut self) {
        self.state
            .peer_counter(self.direction)
            .fetch_sub(1, Ordering::SeqCst);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::tempdir;

    async fn state_for(content: &[u8], piece_length: u64) -> (tempfile::TempDir, Arc<JobState>) {
        let dir = tempdir().unwrap();
        let raw = seed_core::create_single_file("", "blob", piece_length, content);
        let metainfo = Arc::new(Metainfo::from_bytes(&raw).unwrap());
        let path = dir.path().join("blob");
        let file = super::super::init::open_content(&path, metainfo.total_length())
            .await
            .unwrap();
        let state = JobState::new(JobId::from("job"), metainfo, path, file);
        (dir, Arc::new(state))
    }

    #[test]
    fn test_piece_status_equality() {
        assert_eq!(PieceStatus::Missing, PieceStatus::Missing);
        assert_ne!(PieceStatus::Missing, PieceStatus::Have);
    }

    #[tokio::test]
    async fn test_store_piece_verifies_hash_and_completes() {
        let content = b"0123456789abcdef0123".to_vec();
        let (_dir, state) = state_for(&content, 10).await;
        state.set_phase(Phase::Downloading);

        assert!(state.claim_piece(|_| true).await.is_some());
        assert!(!state.store_piece(0, b"wrong data").await.unwrap());
        assert!(!state.has_piece(0).await);

        assert!(state.store_piece(0, &content[..10]).await.unwrap());
        assert!(state.store_piece(1, &content[10..]).await.unwrap());
        assert!(state.is_complete());
        assert_eq!(state.phase(), Phase::Seeding);
        assert_eq!(state.left(), 0);

        let block = state.read_block(1, 2, 4).await.unwrap();
        assert_eq!(block.as_deref(), Some(&b"cdef"[..]));
        assert_eq!(state.read_block(1, 8, 4).await.unwrap(), None);
        assert_eq!(state.bitfield().await, Some(vec![0b1100_0000]));
    }

    #[tokio::test]
    async fn test_claim_and_release() {
        let (_dir, state) = state_for(&[1u8; 30], 10).await;
        assert_eq!(state.claim_piece(|i| i == 2).await, Some(2));
        assert_eq!(state.claim_piece(|i| i == 2).await, None);
        state.release_piece(2).await;
        assert_eq!(state.claim_piece(|i| i == 2).await, Some(2));
        assert_eq!(state.bitfield().await, None);
    }

    #[tokio::test]
    async fn test_stats_reports_peers_and_seeding_time() {
        let (_dir, state) = state_for(&[1u8; 10], 10).await;
        let guard_in = state.track_peer(Direction::Incoming);
        let _guard_out = state.track_peer(Direction::Outgoing);
        state.set_phase(Phase::Seeding);

        let stats = state.stats();
        assert_eq!(stats.phase, Phase::Seeding);
        assert_eq!(stats.peers, Peers::new(1, 1));
        assert_eq!(stats.seeded_for, Some(Duration::ZERO));
        assert_eq!(stats.eta, None);

        drop(guard_in);
        assert_eq!(state.stats().peers, Peers::new(0, 1));
    }
}
