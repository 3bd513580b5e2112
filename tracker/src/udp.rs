//! UDP Tracker Client implementation (BEP 15).

use super::{TrackerClient, TrackerError, TrackerEvent, TrackerRequest, TrackerResponse};
use byteorder::{BigEndian, ReadBytesExt, WriteBytesExt};
use rand::Rng;
use std::io::{Cursor, Write};
use std::net::UdpSocket;
use std::time::Duration;

const PROTOCOL_ID: u64 = 0x41727101980;
const ACTION_CONNECT: u32 = 0;
const ACTION_ANNOUNCE: u32 = 1;
const ACTION_ERROR: u32 = 3;

/// Client for communicating with UDP trackers.
pub struct UdpTracker {
    url: String,
    timeout: Duration,
}

impl UdpTracker {
    pub fn new(url: &str, timeout: Duration) -> Self {
        Self {
            url: url.to_string(),
            timeout,
        }
    }

    fn socket_addr(&self) -> Result<String, TrackerError> {
        let invalid = |reason: &str| TrackerError::InvalidUrl {
            url: self.url.clone(),
            reason: reason.to_string(),
        };
        let parsed = url::Url::parse(&self.url).map_err(|e| invalid(&e.to_string()))?;
        let host = parsed.host_str().ok_or_else(|| invalid("missing host"))?;
        let port = parsed.port().ok_or_else(|| invalid("missing port"))?;
        Ok(format!("{}:{}", host, port))
    }
}

impl TrackerClient for UdpTracker {
    /// Connects, then announces with the returned connection id.
    fn announce(&self, request: &TrackerRequest) -> Result<TrackerResponse, TrackerError> {
        let socket = UdpSocket::bind("0.0.0.0:0")?;
        socket.set_read_timeout(Some(self.timeout))?;
        socket.connect(self.socket_addr()?)?;

        let mut rng = rand::rng();

        let transaction_id: u32 = rng.random();
        socket.send(&connect_request(transaction_id)?)?;
        let mut buf = [0u8; 16];
        let amt = socket.recv(&mut buf)?;
        let connection_id = parse_connect_response(&buf[..amt], transaction_id)?;

        let transaction_id: u32 = rng.random();
        socket.send(&announce_request(connection_id, transaction_id, request)?)?;
        let mut buf = [0u8; 4096];
        let amt = socket.recv(&mut buf)?;
        parse_announce_response(&buf[..amt], transaction_id)
    }
}

pub(crate) fn connect_request(transaction_id: u32) -> std::io::Result<Vec<u8>> {
    let mut req = Vec::with_capacity(16);
    req.write_u64::<BigEndian>(PROTOCOL_ID)?;
    req.write_u32::<BigEndian>(ACTION_CONNECT)?;
    req.write_u32::<BigEndian>(transaction_id)?;
    Ok(req)
}

pub(crate) fn parse_connect_response(buf: &[u8], transaction_id: u32) -> Result<u64, TrackerError> {
    if buf.len() < 16 {
        return Err(TrackerError::Malformed(format!(
            "connect response of {} bytes",
            buf.len()
        )));
    }
    let mut rdr = Cursor::new(buf);
    let action = rdr.read_u32::<BigEndian>()?;
    check_transaction(rdr.read_u32::<BigEndian>()?, transaction_id)?;
    if action != ACTION_CONNECT {
        return Err(TrackerError::Malformed(format!(
            "expected action {}, got {}",
            ACTION_CONNECT, action
        )));
    }
    Ok(rdr.read_u64::<BigEndian>()?)
}

pub(crate) fn announce_request(
    connection_id: u64,
    transaction_id: u32,
    request: &TrackerRequest,
) -> std::io::Result<Vec<u8>> {
    let mut req = Vec::with_capacity(98);
    req.write_u64::<BigEndian>(connection_id)?;
    req.write_u32::<BigEndian>(ACTION_ANNOUNCE)?;
    req.write_u32::<BigEndian>(transaction_id)?;
    req.write_all(request.info_hash.as_bytes())?;
    req.write_all(&request.peer_id)?;
    req.write_u64::<BigEndian>(request.downloaded)?;
    req.write_u64::<BigEndian>(request.left)?;
    req.write_u64::<BigEndian>(request.uploaded)?;

    let event_id = match request.event {
        None => 0,
        Some(TrackerEvent::Completed) => 1,
        Some(TrackerEvent::Started) => 2,
        Some(TrackerEvent::Stopped) => 3,
    };
    req.write_u32::<BigEndian>(event_id)?;
    req.write_u32::<BigEndian>(0)?; // IP address (0 default)
    req.write_u32::<BigEndian>(request.key)?;
    let num_want = request.numwant.map(|n| n as i32).unwrap_or(-1);
    req.write_i32::<BigEndian>(num_want)?;
    req.write_u16::<BigEndian>(request.port)?;
    Ok(req)
}

pub(crate) fn parse_announce_response(
    buf: &[u8],
    transaction_id: u32,
) -> Result<TrackerResponse, TrackerError> {
    if buf.len() < 8 {
        return Err(TrackerError::Malformed(format!(
            "announce response of {} bytes",
            buf.len()
        )));
    }
    let mut rdr = Cursor::new(buf);
    let action = rdr.read_u32::<BigEndian>()?;
    check_transaction(rdr.read_u32::<BigEndian>()?, transaction_id)?;

    if action == ACTION_ERROR {
        return Err(TrackerError::Failure(
            String::from_utf8_lossy(&buf[8..]).into_owned(),
        ));
    }
    if action != ACTION_ANNOUNCE || buf.len() < 20 {
        return Err(TrackerError::Malformed(format!(
            "unexpected announce reply (action {}, {} bytes)",
            action,
            buf.len()
        )));
    }

    let interval = rdr.read_u32::<BigEndian>()?;
    let leechers = rdr.read_u32::<BigEndian>()?;
    let seeders = rdr.read_u32::<BigEndian>()?;

    Ok(TrackerResponse {
        interval: Duration::from_secs(interval.max(1) as u64),
        peers: super::parse_compact_peers(&buf[20..]),
        complete: Some(seeders),
        incomplete: Some(leechers),
    })
}

fn check_transaction(got: u32, expected: u32) -> Result<(), TrackerError> {
    if got != expected {
        return Err(TrackerError::Malformed(format!(
            "transaction id mismatch ({} != {})",
            got, expected
        )));
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use seed_core::InfoHash;

    fn request() -> TrackerRequest {
        TrackerRequest {
            info_hash: InfoHash([1; 20]),
            peer_id: [2; 20],
            port: 6881,
            uploaded: 3,
            downloaded: 4,
            left: 5,
            event: Some(TrackerEvent::Started),
            numwant: None,
            key: 9,
        }
    }

    #[test]
    fn test_connect_round() {
        let req = connect_request(42).unwrap();
        assert_eq!(req.len(), 16);
        assert_eq!(&req[..8], &PROTOCOL_ID.to_be_bytes());

        let mut reply = Vec::new();
        reply.extend_from_slice(&0u32.to_be_bytes());
        reply.extend_from_slice(&42u32.to_be_bytes());
        reply.extend_from_slice(&0xdead_beefu64.to_be_bytes());
        assert_eq!(parse_connect_response(&reply, 42).unwrap(), 0xdead_beef);
        assert!(parse_connect_response(&reply, 43).is_err());
        assert!(parse_connect_response(&reply[..10], 42).is_err());
    }

    #[test]
    fn test_announce_request_layout() {
        let req = announce_request(7, 8, &request()).unwrap();
        assert_eq!(req.len(), 98);
        assert_eq!(&req[16..36], &[1u8; 20]);
        assert_eq!(&req[80..84], &2u32.to_be_bytes()); // started
        assert_eq!(&req[92..96], &(-1i32).to_be_bytes());
        assert_eq!(&req[96..98], &6881u16.to_be_bytes());
    }

    #[test]
    fn test_parse_announce_response() {
        let mut reply = Vec::new();
        for word in [1u32, 8, 1800, 4, 12] {
            reply.extend_from_slice(&word.to_be_bytes());
        }
        reply.extend_from_slice(&[10, 0, 0, 5, 0x1a, 0xe1]);
        let res = parse_announce_response(&reply, 8).unwrap();
        assert_eq!(res.interval, Duration::from_secs(1800));
        assert_eq!(res.incomplete, Some(4));
        assert_eq!(res.complete, Some(12));
        assert_eq!(res.peers, vec!["10.0.0.5:6881".parse().unwrap()]);
    }

    #[test]
    fn test_parse_announce_error_action() {
        let mut reply = Vec::new();
        reply.extend_from_slice(&3u32.to_be_bytes());
        reply.extend_from_slice(&8u32.to_be_bytes());
        reply.extend_from_slice(b"torrent not registered");
        let err = parse_announce_response(&reply, 8).unwrap_err();
        assert!(matches!(err, TrackerError::Failure(ref m) if m == "torrent not registered"));
    }
}
