//! Tracker announce clients.
//!
//! Both clients are blocking; async callers run them on `spawn_blocking`.

use std::net::SocketAddrV4;
use std::time::Duration;

pub mod error;
pub mod http;
pub mod udp;

pub use error::TrackerError;
use http::HttpTracker;
use seed_core::InfoHash;
use udp::UdpTracker;

/// Used when a tracker does not tell us how often to re-announce.
pub const DEFAULT_INTERVAL: Duration = Duration::from_secs(30 * 60);

#[derive(Debug, Clone)]
pub struct TrackerRequest {
    pub info_hash: InfoHash,
    pub peer_id: [u8; 20],
    pub port: u16,
    pub uploaded: u64,
    pub downloaded: u64,
    pub left: u64,
    pub event: Option<TrackerEvent>,
    pub numwant: Option<u32>,
    pub key: u32,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TrackerEvent {
    Started,
    Stopped,
    Completed,
}

impl TrackerEvent {
    pub fn as_str(&self) -> &'static str {
        match self {
            TrackerEvent::Started => "started",
            TrackerEvent::Stopped => "stopped",
            TrackerEvent::Completed => "completed",
        }
    }
}

#[derive(Debug, Clone)]
pub struct TrackerResponse {
    pub interval: Duration,
    pub peers: Vec<SocketAddrV4>,
    pub complete: Option<u32>,   // seeders
    pub incomplete: Option<u32>, // leechers
}

pub trait TrackerClient: Send {
    fn announce(&self, request: &TrackerRequest) -> Result<TrackerResponse, TrackerError>;
}

/// Picks the client matching the URL scheme.
///
/// `user_agent` is sent with HTTP announces; `timeout` bounds every network wait.
pub fn get_tracker_client(
    url: &str,
    user_agent: &str,
    timeout: Duration,
) -> Result<Box<dyn TrackerClient>, TrackerError> {
    if url.starts_with("http://") || url.starts_with("https://") {
        Ok(Box::new(HttpTracker::new(url, user_agent, timeout)?))
    } else if url.starts_with("udp://") {
        Ok(Box::new(UdpTracker::new(url, timeout)))
    } else {
        Err(TrackerError::UnsupportedScheme(url.to_string()))
    }
}

/// Decodes the 6-byte compact peer format (IPv4 address + port, big endian).
pub fn parse_compact_peers(bytes: &[u8]) -> Vec<SocketAddrV4> {
    bytes
        .chunks_exact(6)
        .map(|chunk| {
            let ip = std::net::Ipv4Addr::new(chunk[0], chunk[1], chunk[2], chunk[3]);
            let port = u16::from_be_bytes([chunk[4], chunk[5]]);
            SocketAddrV4::new(ip, port)
        })
        .collect()
}
