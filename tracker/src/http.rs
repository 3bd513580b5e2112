//! HTTP Tracker Client implementation.

use super::{
    DEFAULT_INTERVAL, TrackerClient, TrackerError, TrackerRequest, TrackerResponse,
    parse_compact_peers,
};
use seed_core::bencoding::{Bencode, decode};
use std::net::{Ipv4Addr, SocketAddrV4};
use std::time::Duration;

/// Client for communicating with HTTP/HTTPS trackers.
pub struct HttpTracker {
    url: String,
    client: reqwest::blocking::Client,
}

impl HttpTracker {
    pub fn new(url: &str, user_agent: &str, timeout: Duration) -> Result<Self, TrackerError> {
        let client = reqwest::blocking::Client::builder()
            .user_agent(user_agent)
            .timeout(timeout)
            .build()?;
        Ok(Self {
            url: url.to_string(),
            client,
        })
    }

    /// Full announce URL for `request`.
    ///
    /// The info hash and peer id are raw bytes and must be percent-encoded by hand.
    pub fn announce_url(&self, request: &TrackerRequest) -> String {
        let info_hash_encoded =
            form_urlencoded::byte_serialize(request.info_hash.as_bytes()).collect::<String>();
        let peer_id_encoded = form_urlencoded::byte_serialize(&request.peer_id).collect::<String>();

        let mut params = form_urlencoded::Serializer::new(String::new());
        params
            .append_pair("port", &request.port.to_string())
            .append_pair("uploaded", &request.uploaded.to_string())
            .append_pair("downloaded", &request.downloaded.to_string())
            .append_pair("left", &request.left.to_string())
            .append_pair("compact", "1")
            .append_pair("key", &request.key.to_string());

        if let Some(event) = request.event {
            params.append_pair("event", event.as_str());
        }
        if let Some(numwant) = request.numwant {
            params.append_pair("numwant", &numwant.to_string());
        }

        let separator = if self.url.contains('?') { "&" } else { "?" };
        format!(
            "{}{separator}info_hash={}&peer_id={}&{}",
            self.url,
            info_hash_encoded,
            peer_id_encoded,
            params.finish()
        )
    }
}

impl TrackerClient for HttpTracker {
    fn announce(&self, request: &TrackerRequest) -> Result<TrackerResponse, TrackerError> {
        let response = self
            .client
            .get(self.announce_url(request))
            .send()?
            .error_for_status()?;
        let bytes = response.bytes()?;

        let mut pos = 0;
        let root = decode(&bytes, &mut pos).map_err(|e| TrackerError::Malformed(e.to_string()))?;
        parse_http_response(&root)
    }
}

pub(crate) fn parse_http_response(root: &Bencode) -> Result<TrackerResponse, TrackerError> {
    if !matches!(root, Bencode::Dict(_)) {
        return Err(TrackerError::Malformed("response is not a dictionary".into()));
    }
    if let Some(reason) = root.get(b"failure reason").and_then(Bencode::as_str_lossy) {
        return Err(TrackerError::Failure(reason));
    }

    let interval = root
        .get(b"interval")
        .and_then(Bencode::as_int)
        .filter(|&secs| secs > 0)
        .map(|secs| Duration::from_secs(secs as u64))
        .unwrap_or(DEFAULT_INTERVAL);

    let complete = root.get(b"complete").and_then(Bencode::as_int).map(|i| i as u32);
    let incomplete = root.get(b"incomplete").and_then(Bencode::as_int).map(|i| i as u32);

    let peers = match root.get(b"peers") {
        Some(Bencode::Bytes(b)) => parse_compact_peers(b),
        Some(Bencode::List(list)) => list.iter().filter_map(parse_peer_dict).collect(),
        _ => Vec::new(),
    };

    Ok(TrackerResponse {
        interval,
        peers,
        complete,
        incomplete,
    })
}

fn parse_peer_dict(item: &Bencode) -> Option<SocketAddrV4> {
    let ip: Ipv4Addr = item.get(b"ip")?.as_str_lossy()?.parse().ok()?;
    let port = u16::try_from(item.get(b"port")?.as_int()?).ok()?;
    Some(SocketAddrV4::new(ip, port))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::TrackerEvent;
    use seed_core::InfoHash;

    fn decode_all(input: &[u8]) -> Bencode {
        let mut pos = 0;
        decode(input, &mut pos).unwrap()
    }

    #[test]
    fn test_parse_compact_response() {
        let mut body = b"d8:completei3e10:incompletei1e8:intervali900e5:peers6:".to_vec();
        body.extend_from_slice(&[127, 0, 0, 1, 0x1a, 0xe1]);
        body.push(b'e');
        let res = parse_http_response(&decode_all(&body)).unwrap();
        assert_eq!(res.interval, Duration::from_secs(900));
        assert_eq!(res.complete, Some(3));
        assert_eq!(res.incomplete, Some(1));
        assert_eq!(res.peers, vec!["127.0.0.1:6881".parse().unwrap()]);
    }

    #[test]
    fn test_parse_dictionary_peers() {
        let body = b"d8:intervali60e5:peersld2:ip8:10.0.0.24:porti51413eed2:ip4:nope4:porti1eeee";
        let res = parse_http_response(&decode_all(body)).unwrap();
        assert_eq!(res.peers, vec!["10.0.0.2:51413".parse().unwrap()]);
    }

    #[test]
    fn test_parse_failure_reason() {
        let body = b"d14:failure reason12:unregisterede";
        let err = parse_http_response(&decode_all(body)).unwrap_err();
        assert!(matches!(err, TrackerError::Failure(ref r) if r == "unregistered"));
    }

    #[test]
    fn test_missing_interval_uses_default() {
        let res = parse_http_response(&decode_all(b"de")).unwrap();
        assert_eq!(res.interval, DEFAULT_INTERVAL);
        assert!(res.peers.is_empty());
    }

    #[test]
    fn test_announce_url_encodes_binary_fields() {
        let tracker =
            HttpTracker::new("http://t.example/announce", "ua/1", Duration::from_secs(5)).unwrap();
        let request = TrackerRequest {
            info_hash: InfoHash([0xff; 20]),
            peer_id: *b"-MS0001-abcdefghijkl",
            port: 6881,
            uploaded: 10,
            downloaded: 0,
            left: 0,
            event: Some(TrackerEvent::Completed),
            numwant: Some(50),
            key: 7,
        };
        let url = tracker.announce_url(&request);
        assert!(url.starts_with("http://t.example/announce?info_hash=%FF%FF"));
        assert!(url.contains("peer_id=-MS0001-abcdefghijkl"));
        assert!(url.contains("event=completed"));
        assert!(url.contains("left=0"));
        assert!(url.contains("numwant=50"));
    }
}
