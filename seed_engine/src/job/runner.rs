//! The task driving one job: verification, tracker announces and peer sessions.

use super::init::verify_existing;
use super::state::{Direction, JobState, Lifecycle};
use crate::error::PeerError;
use crate::peer::{MAX_BLOCK_LEN, Message, PeerConnection, bitfield_has};
use crate::stats::Phase;
use rand::Rng;
use seed_core::TokenBucket;
use std::collections::HashSet;
use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::{Mutex, OwnedSemaphorePermit, Semaphore, mpsc, watch};
use tokio::task::JoinSet;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};
use tracker::{DEFAULT_INTERVAL, TrackerEvent, TrackerRequest, get_tracker_client};

const BLOCK_LEN: usize = 16 * 1024;
const MIN_ANNOUNCE_INTERVAL: Duration = Duration::from_secs(60);
const NUMWANT: u32 = 50;

/// Session-wide settings every job runs with.
pub(crate) struct JobEnv {
    pub peer_id: [u8; 20],
    /// Port advertised to trackers.
    pub listen_port: u16,
    /// Shared across all jobs of a session; `None` means unthrottled.
    pub upload_limiter: Option<Arc<Mutex<TokenBucket>>>,
    pub user_agent: String,
    pub announce_timeout: Duration,
    pub announce: bool,
    pub max_peers: usize,
}

/// Channels feeding peers into a running job.
pub(crate) struct Mailbox {
    /// Handed to the announcer; the session keeps another clone for manually added peers.
    pub discovered: mpsc::Sender<SocketAddr>,
    pub peers: mpsc::Receiver<SocketAddr>,
    /// Peers that connected to us and already completed the handshake.
    pub inbound: mpsc::Receiver<PeerConnection>,
}

/// Runs a job until `token` is cancelled, leaving it in `Phase::Stopped`.
pub(crate) async fn run(
    state: Arc<JobState>,
    env: Arc<JobEnv>,
    mailbox: Mailbox,
    token: CancellationToken,
) {
    let Mailbox {
        discovered,
        peers: mut peer_rx,
        mut inbound,
    } = mailbox;

    state.set_phase(Phase::Verifying);
    if let Err(e) = verify_existing(&state).await {
        warn!(job = %state.id, error = %e, "failed to verify existing content");
    }
    state.set_phase(if state.is_complete() {
        Phase::Seeding
    } else {
        Phase::Downloading
    });
    info!(
        job = %state.id,
        name = %state.metainfo.name,
        info_hash = %state.metainfo.info_hash,
        phase = %state.phase(),
        "job started"
    );

    let announcer = env.announce.then(|| {
        tokio::spawn(announce_loop(
            state.clone(),
            env.clone(),
            discovered,
            token.clone(),
        ))
    });

    let semaphore = Arc::new(Semaphore::new(env.max_peers));
    let mut connected: HashSet<SocketAddr> = HashSet::new();
    let mut peers: JoinSet<Option<SocketAddr>> = JoinSet::new();

    loop {
        tokio::select! {
            _ = token.cancelled() => break,
            Some(addr) = peer_rx.recv() => {
                if connected.contains(&addr) {
                    continue;
                }
                let Ok(permit) = semaphore.clone().try_acquire_owned() else {
                    debug!(job = %state.id, %addr, "peer limit reached");
                    continue;
                };
                connected.insert(addr);
                peers.spawn(outgoing_peer(
                    state.clone(),
                    env.clone(),
                    addr,
                    permit,
                    token.child_token(),
                ));
            }
            Some(peer) = inbound.recv() => {
                let Ok(permit) = semaphore.clone().try_acquire_owned() else {
                    debug!(job = %state.id, addr = %peer.addr, "peer limit reached, dropping inbound");
                    continue;
                };
                let (state, env, token) = (state.clone(), env.clone(), token.child_token());
                peers.spawn(async move {
                    let _permit = permit;
                    let addr = peer.addr;
                    if let Err(e) = drive_peer(state, env, peer, Direction::Incoming, token).await {
                        debug!(%addr, error = %e, "inbound peer closed");
                    }
                    None
                });
            }
            Some(res) = peers.join_next() => {
                if let Ok(Some(addr)) = res {
                    connected.remove(&addr);
                }
            }
        }
    }

    state.set_phase(Phase::Stopping);
    peers.shutdown().await;
    if let Some(announcer) = announcer {
        if let Err(e) = announcer.await {
            warn!(job = %state.id, error = %e, "announce task failed");
        }
    }
    if let Err(e) = state.flush().await {
        warn!(job = %state.id, error = %e, "failed to flush content");
    }
    state.set_phase(Phase::Stopped);
    info!(job = %state.id, "job stopped");
}

/// Dials a tracker-supplied peer. Yields the address back so the caller may dial it again
/// later; `None` when the peer turned out to be ourselves and should stay excluded.
async fn outgoing_peer(
    state: Arc<JobState>,
    env: Arc<JobEnv>,
    addr: SocketAddr,
    permit: OwnedSemaphorePermit,
    token: CancellationToken,
) -> Option<SocketAddr> {
    let _permit = permit;
    let connected = tokio::select! {
        _ = token.cancelled() => return Some(addr),
        res = PeerConnection::connect(addr, &state.metainfo.info_hash, &env.peer_id) => res,
    };
    match connected {
        Ok(peer) if peer.peer_id == env.peer_id => {
            debug!(%addr, "connected to ourselves");
            return None;
        }
        Ok(peer) => {
            debug!(job = %state.id, %addr, "connected to peer");
            if let Err(e) = drive_peer(state, env, peer, Direction::Outgoing, token).await {
                debug!(%addr, error = %e, "peer closed");
            }
        }
        Err(e) => debug!(%addr, error = %e, "failed to connect"),
    }
    Some(addr)
}

struct PendingPiece {
    index: usize,
    data: Vec<u8>,
    received: usize,
    blocks: usize,
}

async fn drive_peer(
    state: Arc<JobState>,
    env: Arc<JobEnv>,
    mut peer: PeerConnection,
    direction: Direction,
    token: CancellationToken,
) -> Result<(), PeerError> {
    let _guard = state.track_peer(direction);
    let mut pending = None;
    let result = exchange(&state, &env, &mut peer, &mut pending, &token).await;
    if let Some(piece) = pending {
        state.release_piece(piece.index).await;
    }
    result
}

async fn exchange(
    state: &Arc<JobState>,
    env: &JobEnv,
    peer: &mut PeerConnection,
    pending: &mut Option<PendingPiece>,
    token: &CancellationToken,
) -> Result<(), PeerError> {
    if let Some(bits) = state.bitfield().await {
        peer.send_message(Message::Bitfield(bits)).await?;
    }
    if !state.is_complete() {
        peer.send_message(Message::Interested).await?;
    }

    loop {
        let msg = tokio::select! {
            _ = token.cancelled() => return Ok(()),
            msg = peer.read_message() => msg?,
        };

        match msg {
            Message::Interested if peer.am_choking => {
                peer.send_message(Message::Unchoke).await?;
            }
            Message::NotInterested if !peer.am_choking => {
                peer.send_message(Message::Choke).await?;
            }
            Message::Request {
                index,
                begin,
                length,
            } => {
                if peer.am_choking || length > MAX_BLOCK_LEN {
                    continue;
                }
                throttle(env, length).await;
                let block = state
                    .read_block(index as usize, begin as u64, length as u64)
                    .await?;
                if let Some(block) = block {
                    peer.send_message(Message::Piece {
                        index,
                        begin,
                        block,
                    })
                    .await?;
                    state.add_uploaded(length as u64);
                }
            }
            Message::Piece {
                index,
                begin,
                block,
            } => {
                let Some(piece) = pending.as_mut().filter(|p| p.index == index as usize) else {
                    continue;
                };
                let begin = begin as usize;
                if begin + block.len() > piece.data.len() {
                    continue;
                }
                piece.data[begin..begin + block.len()].copy_from_slice(&block);
                piece.received += 1;
                if piece.received < piece.blocks {
                    continue;
                }
                if let Some(piece) = pending.take() {
                    if !state.store_piece(piece.index, &piece.data).await? {
                        return Err(PeerError::HashMismatch(index));
                    }
                    debug!(job = %state.id, piece = index, addr = %peer.addr, "piece verified");
                    peer.send_message(Message::Have(index)).await?;
                    if state.is_complete() {
                        peer.send_message(Message::NotInterested).await?;
                    }
                }
            }
            Message::Choke => {
                if let Some(piece) = pending.take() {
                    state.release_piece(piece.index).await;
                }
            }
            _ => {}
        }

        if !state.is_complete() && !peer.peer_choking && pending.is_none() {
            request_next_piece(state, peer, pending).await?;
        }
    }
}

/// Claims a piece this peer has and requests all of its blocks.
async fn request_next_piece(
    state: &JobState,
    peer: &mut PeerConnection,
    pending: &mut Option<PendingPiece>,
) -> Result<(), PeerError> {
    let Some(index) = state
        .claim_piece(|i| bitfield_has(&peer.bitfield, i))
        .await
    else {
        return Ok(());
    };
    let len = state.metainfo.piece_size(index) as usize;
    let blocks = len.div_ceil(BLOCK_LEN);
    *pending = Some(PendingPiece {
        index,
        data: vec![0u8; len],
        received: 0,
        blocks,
    });

    for b in 0..blocks {
        let begin = b * BLOCK_LEN;
        peer.send_message(Message::Request {
            index: index as u32,
            begin: begin as u32,
            length: BLOCK_LEN.min(len - begin) as u32,
        })
        .await?;
    }
    Ok(())
}

/// Waits until the shared upload budget covers `amount` bytes.
async fn throttle(env: &JobEnv, amount: u32) {
    let Some(limiter) = &env.upload_limiter else {
        return;
    };
    loop {
        let wait = {
            let mut bucket = limiter.lock().await;
            if bucket.consume(amount as f64) {
                return;
            }
            bucket.delay_for(amount as f64)
        };
        tokio::time::sleep(wait.max(Duration::from_millis(10))).await;
    }
}

async fn announce_loop(
    state: Arc<JobState>,
    env: Arc<JobEnv>,
    peer_tx: mpsc::Sender<SocketAddr>,
    token: CancellationToken,
) {
    let trackers = state.metainfo.trackers();
    if trackers.is_empty() {
        debug!(job = %state.id, "no trackers to announce to");
        return;
    }
    let key: u32 = rand::rng().random();
    let mut lifecycle = state.subscribe();
    let mut completed_sent = state.is_complete();
    let mut event = Some(TrackerEvent::Started);

    loop {
        let interval = announce_all(&state, &env, &trackers, event, key, &peer_tx).await;
        event = None;
        tokio::select! {
            _ = token.cancelled() => break,
            _ = tokio::time::sleep(interval) => {}
            seeding = wait_for_seeding(&mut lifecycle), if !completed_sent => {
                completed_sent = true;
                if seeding {
                    event = Some(TrackerEvent::Completed);
                }
            }
        }
    }

    announce_all(
        &state,
        &env,
        &trackers,
        Some(TrackerEvent::Stopped),
        key,
        &peer_tx,
    )
    .await;
}

async fn wait_for_seeding(lifecycle: &mut watch::Receiver<Lifecycle>) -> bool {
    lifecycle
        .wait_for(|l| l.phase == Phase::Seeding)
        .await
        .is_ok()
}

/// Announces to every tracker in turn and forwards the returned peers.
///
/// Returns the shortest interval any tracker asked for.
async fn announce_all(
    state: &JobState,
    env: &JobEnv,
    trackers: &[String],
    event: Option<TrackerEvent>,
    key: u32,
    peer_tx: &mpsc::Sender<SocketAddr>,
) -> Duration {
    let request = TrackerRequest {
        info_hash: state.metainfo.info_hash,
        peer_id: env.peer_id,
        port: env.listen_port,
        uploaded: state.uploaded_bytes(),
        downloaded: state.transferred_bytes(),
        left: state.left(),
        event,
        numwant: match event {
            Some(TrackerEvent::Stopped) => Some(0),
            _ => Some(NUMWANT),
        },
        key,
    };

    let mut interval: Option<Duration> = None;
    for url in trackers {
        let (url_owned, req, user_agent, timeout) = (
            url.clone(),
            request.clone(),
            env.user_agent.clone(),
            env.announce_timeout,
        );
        let res = tokio::task::spawn_blocking(move || {
            get_tracker_client(&url_owned, &user_agent, timeout)?.announce(&req)
        })
        .await;

        match res {
            Ok(Ok(response)) => {
                debug!(
                    job = %state.id,
                    tracker = %url,
                    peers = response.peers.len(),
                    seeders = ?response.complete,
                    leechers = ?response.incomplete,
                    "announced"
                );
                interval = Some(interval.map_or(response.interval, |i| i.min(response.interval)));
                for peer in response.peers {
                    let _ = peer_tx.try_send(SocketAddr::V4(peer));
                }
            }
            Ok(Err(e)) => debug!(job = %state.id, tracker = %url, error = %e, "announce failed"),
            Err(e) => warn!(job = %state.id, tracker = %url, error = %e, "announce task failed"),
        }
    }
    interval
        .unwrap_or(DEFAULT_INTERVAL)
        .max(MIN_ANNOUNCE_INTERVAL)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn env_with_limit(rate: f64) -> JobEnv {
        JobEnv {
            peer_id: [0; 20],
            listen_port: 0,
            upload_limiter: Some(Arc::new(Mutex::new(TokenBucket::new(rate, rate)))),
            user_agent: "test".to_string(),
            announce_timeout: Duration::from_secs(1),
            announce: false,
            max_peers: 1,
        }
    }

    #[tokio::test]
    async fn test_throttle_waits_for_tokens() {
        let env = env_with_limit(1000.0);
        throttle(&env, 1000).await;

        // The bucket is drained; 500 more bytes take about half a second.
        let started = std::time::Instant::now();
        throttle(&env, 500).await;
        assert!(started.elapsed() >= Duration::from_millis(400));
    }

    #[tokio::test]
    async fn test_throttle_unlimited_returns_immediately() {
        let mut env = env_with_limit(1.0);
        env.upload_limiter = None;
        throttle(&env, MAX_BLOCK_LEN).await;
    }
}
