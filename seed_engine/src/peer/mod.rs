//! Peer wire protocol: handshake, message framing and per-connection state.

use crate::error::PeerError;
use seed_core::InfoHash;
use std::net::SocketAddr;
use std::time::Duration;
use tokio::io::{AsyncReadExt, AsyncWriteExt};
use tokio::net::TcpStream;

const PROTOCOL: &[u8; 19] = b"BitTorrent protocol";
pub const HANDSHAKE_LEN: usize = 68;
/// Largest block a peer may request from us.
pub const MAX_BLOCK_LEN: u32 = 128 * 1024;
/// Frames above this are treated as a protocol violation (bitfields of huge torrents fit).
const MAX_FRAME_LEN: u32 = 1 << 21;
const CONNECT_TIMEOUT: Duration = Duration::from_secs(5);
const READ_TIMEOUT: Duration = Duration::from_secs(120);

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Message {
    KeepAlive,
    Choke,
    Unchoke,
    Interested,
    NotInterested,
    Have(u32),
    Bitfield(Vec<u8>),
    Request {
        index: u32,
        begin: u32,
        length: u32,
    },
    Piece {
        index: u32,
        begin: u32,
        block: Vec<u8>,
    },
    Cancel {
        index: u32,
        begin: u32,
        length: u32,
    },
    Extended {
        id: u8,
        payload: Vec<u8>,
    },
}

impl Message {
    /// Length-prefixed wire form.
    pub fn encode(&self) -> Vec<u8> {
        let mut body = Vec::new();
        match self {
            Message::KeepAlive => {}
            Message::Choke => body.push(0),
            Message::Unchoke => body.push(1),
            Message::Interested => body.push(2),
            Message::NotInterested => body.push(3),
            Message::Have(index) => {
                body.push(4);
                body.extend_from_slice(&index.to_be_bytes());
            }
            Message::Bitfield(bits) => {
                body.push(5);
                body.extend_from_slice(bits);
            }
            Message::Request {
                index,
                begin,
                length,
            } => {
                body.push(6);
                body.extend_from_slice(&index.to_be_bytes());
                body.extend_from_slice(&begin.to_be_bytes());
                body.extend_from_slice(&length.to_be_bytes());
            }
            Message::Piece {
                index,
                begin,
                block,
            } => {
                body.push(7);
                body.extend_from_slice(&index.to_be_bytes());
                body.extend_from_slice(&begin.to_be_bytes());
                body.extend_from_slice(block);
            }
            Message::Cancel {
                index,
                begin,
                length,
            } => {
                body.push(8);
                body.extend_from_slice(&index.to_be_bytes());
                body.extend_from_slice(&begin.to_be_bytes());
                body.extend_from_slice(&length.to_be_bytes());
            }
            Message::Extended { id, payload } => {
                body.push(20);
                body.push(*id);
                body.extend_from_slice(payload);
            }
        }
        let mut frame = Vec::with_capacity(4 + body.len());
        frame.extend_from_slice(&(body.len() as u32).to_be_bytes());
        frame.extend_from_slice(&body);
        frame
    }

    /// Parses a frame body (everything after the length prefix). `None` for unknown ids.
    pub fn decode(body: &[u8]) -> Result<Option<Self>, PeerError> {
        let Some((&id, payload)) = body.split_first() else {
            return Ok(Some(Message::KeepAlive));
        };
        let malformed = || PeerError::Malformed {
            id,
            len: payload.len(),
        };
        let word = |i: usize| -> Result<u32, PeerError> {
            payload
                .get(i * 4..i * 4 + 4)
                .map(|b| u32::from_be_bytes([b[0], b[1], b[2], b[3]]))
                .ok_or_else(malformed)
        };

        let msg = match id {
            0 => Message::Choke,
            1 => Message::Unchoke,
            2 => Message::Interested,
            3 => Message::NotInterested,
            4 => Message::Have(word(0)?),
            5 => Message::Bitfield(payload.to_vec()),
            6 | 8 if payload.len() == 12 => {
                let (index, begin, length) = (word(0)?, word(1)?, word(2)?);
                if id == 6 {
                    Message::Request {
                        index,
                        begin,
                        length,
                    }
                } else {
                    Message::Cancel {
                        index,
                        begin,
                        length,
                    }
                }
            }
            7 if payload.len() >= 8 => Message::Piece {
                index: word(0)?,
                begin: word(1)?,
                block: payload[8..].to_vec(),
            },
            20 if !payload.is_empty() => Message::Extended {
                id: payload[0],
                payload: payload[1..].to_vec(),
            },
            6 | 7 | 8 | 20 => return Err(malformed()),
            _ => return Ok(None),
        };
        Ok(Some(msg))
    }
}

/// The fixed 68-byte opening exchange.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Handshake {
    pub info_hash: InfoHash,
    pub peer_id: [u8; 20],
}

impl Handshake {
    pub fn encode(&self) -> [u8; HANDSHAKE_LEN] {
        let mut buf = [0u8; HANDSHAKE_LEN];
        buf[0] = PROTOCOL.len() as u8;
        buf[1..20].copy_from_slice(PROTOCOL);
        // bytes 20..28 are reserved flags; we advertise no extensions
        buf[28..48].copy_from_slice(self.info_hash.as_bytes());
        buf[48..68].copy_from_slice(&self.peer_id);
        buf
    }

    pub fn decode(buf: &[u8; HANDSHAKE_LEN]) -> Result<Self, PeerError> {
        if buf[0] as usize != PROTOCOL.len() || &buf[1..20] != PROTOCOL {
            return Err(PeerError::InvalidHandshake);
        }
        let mut info_hash = [0u8; 20];
        info_hash.copy_from_slice(&buf[28..48]);
        let mut peer_id = [0u8; 20];
        peer_id.copy_from_slice(&buf[48..68]);
        Ok(Self {
            info_hash: InfoHash(info_hash),
            peer_id,
        })
    }

    pub async fn read(stream: &mut TcpStream) -> Result<Self, PeerError> {
        let mut buf = [0u8; HANDSHAKE_LEN];
        tokio::time::timeout(CONNECT_TIMEOUT, stream.read_exact(&mut buf))
            .await
            .map_err(|_| PeerError::Timeout)??;
        Self::decode(&buf)
    }

    pub async fn write(&self, stream: &mut TcpStream) -> Result<(), PeerError> {
        stream.write_all(&self.encode()).await?;
        Ok(())
    }
}

pub struct PeerConnection {
    pub addr: SocketAddr,
    stream: TcpStream,
    pub peer_id: [u8; 20],
    pub peer_choking: bool,
    pub peer_interested: bool,
    pub am_choking: bool,
    pub bitfield: Vec<u8>,
}

impl PeerConnection {
    /// Wraps a stream whose handshake has already been exchanged.
    pub fn from_stream(addr: SocketAddr, stream: TcpStream, peer_id: [u8; 20]) -> Self {
        Self {
            addr,
            stream,
            peer_id,
            peer_choking: true,
            peer_interested: false,
            am_choking: true,
            bitfield: Vec::new(),
        }
    }

    /// Dials `addr` and performs the outgoing handshake.
    pub async fn connect(
        addr: SocketAddr,
        info_hash: &InfoHash,
        client_id: &[u8; 20],
    ) -> Result<Self, PeerError> {
        let mut stream = tokio::time::timeout(CONNECT_TIMEOUT, TcpStream::connect(addr))
            .await
            .map_err(|_| PeerError::Timeout)??;

        Handshake {
            info_hash: *info_hash,
            peer_id: *client_id,
        }
        .write(&mut stream)
        .await?;

        let reply = Handshake::read(&mut stream).await?;
        if reply.info_hash != *info_hash {
            return Err(PeerError::InfoHashMismatch);
        }
        Ok(Self::from_stream(addr, stream, reply.peer_id))
    }

    pub fn has_piece(&self, index: u32) -> bool {
        bitfield_has(&self.bitfield, index as usize)
    }

    pub async fn send_message(&mut self, msg: Message) -> Result<(), PeerError> {
        match &msg {
            Message::Choke => self.am_choking = true,
            Message::Unchoke => self.am_choking = false,
            _ => {}
        }
        self.stream.write_all(&msg.encode()).await?;
        Ok(())
    }

    /// Reads the next known message, updating choke/interest and bitfield state.
    pub async fn read_message(&mut self) -> Result<Message, PeerError> {
        loop {
            let body = tokio::time::timeout(READ_TIMEOUT, self.read_frame())
                .await
                .map_err(|_| PeerError::Timeout)??;
            let Some(msg) = Message::decode(&body)? else {
                continue;
            };
            match &msg {
                Message::Choke => self.peer_choking = true,
                Message::Unchoke => self.peer_choking = false,
                Message::Interested => self.peer_interested = true,
                Message::NotInterested => self.peer_interested = false,
                Message::Have(index) => bitfield_set(&mut self.bitfield, *index as usize),
                Message::Bitfield(bits) => self.bitfield = bits.clone(),
                _ => {}
            }
            return Ok(msg);
        }
    }

    async fn read_frame(&mut self) -> Result<Vec<u8>, PeerError> {
        let len = self.stream.read_u32().await?;
        if len > MAX_FRAME_LEN {
            return Err(PeerError::MessageTooLarge(len));
        }
        let mut body = vec![0u8; len as usize];
        self.stream.read_exact(&mut body).await?;
        Ok(body)
    }
}

/// Bit `index` of a big-endian piece bitfield.
pub fn bitfield_has(bitfield: &[u8], index: usize) -> bool {
    bitfield
        .get(index / 8)
        .is_some_and(|byte| (byte >> (7 - (index % 8))) & 1 == 1)
}

pub fn bitfield_set(bitfield: &mut Vec<u8>, index: usize) {
    let byte_index = index / 8;
    if byte_index >= bitfield.len() {
        bitfield.resize(byte_index + 1, 0);
    }
    bitfield[byte_index] |= 1 << (7 - (index % 8));
}
