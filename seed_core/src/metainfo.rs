//! `.torrent` metainfo parsing.

use crate::bencoding::{Bencode, BencodeError, InfoHash, decode, find_info_slice};
use sha1::{Digest, Sha1};
use std::collections::BTreeMap;
use std::path::{Path, PathBuf};
use thiserror::Error;

#[derive(Debug, Error)]
pub enum MetainfoError {
    #[error("failed to read metainfo file {path}: {source}")]
    Io {
        path: PathBuf,
        source: std::io::Error,
    },

    #[error("malformed bencode: {0}")]
    Bencode(#[from] BencodeError),

    #[error("metainfo is missing `{0}`")]
    Missing(&'static str),

    #[error("pieces field length {0} is not a multiple of 20")]
    InvalidPieces(usize),

    #[error("piece length must be positive, got {0}")]
    InvalidPieceLength(i64),
}

/// Information about a single file in a multi-file torrent.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FileInfo {
    pub length: u64,
    pub path: Vec<String>,
}

/// Represents the metadata of a torrent.
#[derive(Debug, Clone)]
pub struct Metainfo {
    /// The URL of the tracker.
    pub announce: String,
    /// Optional list of backup trackers (tier-based).
    pub announce_list: Option<Vec<Vec<String>>>,
    /// The SHA-1 hash of the info dictionary.
    pub info_hash: InfoHash,
    /// The length of a single piece in bytes.
    pub piece_length: u64,
    /// The list of SHA-1 hashes for each piece.
    pub pieces: Vec<[u8; 20]>,
    /// The name of the file or directory.
    pub name: String,
    /// Total length of the file (single-file mode).
    pub length: Option<u64>,
    /// List of files (multi-file mode).
    pub files: Option<Vec<FileInfo>>,
}

impl Metainfo {
    /// Parses a torrent from a byte slice.
    pub fn from_bytes(buf: &[u8]) -> Result<Self, MetainfoError> {
        let mut pos = 0;
        let root = decode(buf, &mut pos)?;
        if !matches!(root, Bencode::Dict(_)) {
            return Err(BencodeError::NotADict.into());
        }
        let info_hash = InfoHash::of(find_info_slice(buf)?);

        let announce = root
            .get(b"announce")
            .and_then(Bencode::as_str_lossy)
            .unwrap_or_default();
        let announce_list = parse_announce_list(root.get(b"announce-list"));

        let info = match root.get(b"info") {
            Some(info @ Bencode::Dict(_)) => info,
            _ => return Err(MetainfoError::Missing("info")),
        };

        let name = info
            .get(b"name")
            .and_then(Bencode::as_str_lossy)
            .ok_or(MetainfoError::Missing("name"))?;

        let piece_length = info
            .get(b"piece length")
            .and_then(Bencode::as_int)
            .ok_or(MetainfoError::Missing("piece length"))?;
        if piece_length <= 0 {
            return Err(MetainfoError::InvalidPieceLength(piece_length));
        }

        let pieces_bytes = info
            .get(b"pieces")
            .and_then(Bencode::as_bytes)
            .ok_or(MetainfoError::Missing("pieces"))?;
        if pieces_bytes.len() % 20 != 0 {
            return Err(MetainfoError::InvalidPieces(pieces_bytes.len()));
        }
        let pieces = pieces_bytes
            .chunks_exact(20)
            .map(|chunk| {
                let mut hash = [0u8; 20];
                hash.copy_from_slice(chunk);
                hash
            })
            .collect();

        let length = info
            .get(b"length")
            .and_then(Bencode::as_int)
            .map(|i| i.max(0) as u64);
        let files = match info.get(b"files") {
            Some(Bencode::List(list)) => Some(list.iter().filter_map(parse_file_entry).collect()),
            _ => None,
        };

        if length.is_none() && files.is_none() {
            return Err(MetainfoError::Missing("length or files"));
        }

        Ok(Self {
            announce,
            announce_list,
            info_hash,
            piece_length: piece_length as u64,
            pieces,
            name,
            length,
            files,
        })
    }

    /// Total size of the described content in bytes.
    pub fn total_length(&self) -> u64 {
        match (&self.length, &self.files) {
            (Some(len), _) => *len,
            (None, Some(files)) => files.iter().map(|f| f.length).sum(),
            (None, None) => 0,
        }
    }

    pub fn piece_count(&self) -> usize {
        self.pieces.len()
    }

    /// Size of piece `index`; the last piece may be shorter than `piece_length`.
    pub fn piece_size(&self, index: usize) -> u64 {
        let count = self.pieces.len();
        if count == 0 || index >= count {
            return 0;
        }
        if index == count - 1 {
            let rem = self.total_length() % self.piece_length;
            if rem == 0 { self.piece_length } else { rem }
        } else {
            self.piece_length
        }
    }

    /// Every tracker URL, primary announce first, without duplicates.
    pub fn trackers(&self) -> Vec<String> {
        let mut urls = Vec::new();
        if !self.announce.is_empty() {
            urls.push(self.announce.clone());
        }
        for tier in self.announce_list.iter().flatten() {
            for url in tier {
                if !urls.contains(url) {
                    urls.push(url.clone());
                }
            }
        }
        urls
    }
}

/// Parses a `.torrent` file from the disk.
pub fn parse_metainfo(path: &Path) -> Result<Metainfo, MetainfoError> {
    let buf = std::fs::read(path).map_err(|source| MetainfoError::Io {
        path: path.to_path_buf(),
        source,
    })?;
    Metainfo::from_bytes(&buf)
}

/// Builds the bencoded metainfo for a single file held in memory.
pub fn create_single_file(announce: &str, name: &str, piece_length: u64, content: &[u8]) -> Vec<u8> {
    let mut pieces = Vec::new();
    for chunk in content.chunks(piece_length.max(1) as usize) {
        pieces.extend_from_slice(&Sha1::digest(chunk));
    }

    let mut info = BTreeMap::new();
    info.insert(b"length".to_vec(), Bencode::Int(content.len() as i64));
    info.insert(b"name".to_vec(), Bencode::Bytes(name.as_bytes().to_vec()));
    info.insert(b"piece length".to_vec(), Bencode::Int(piece_length as i64));
    info.insert(b"pieces".to_vec(), Bencode::Bytes(pieces));

    let mut root = BTreeMap::new();
    root.insert(b"announce".to_vec(), Bencode::Bytes(announce.as_bytes().to_vec()));
    root.insert(b"info".to_vec(), Bencode::Dict(info));
    Bencode::Dict(root).encode()
}

fn parse_announce_list(value: Option<&Bencode>) -> Option<Vec<Vec<String>>> {
    let Some(Bencode::List(list)) = value else {
        return None;
    };
    let tiers: Vec<Vec<String>> = list
        .iter()
        .filter_map(|tier| match tier {
            Bencode::List(urls) => {
                let urls: Vec<String> = urls.iter().filter_map(Bencode::as_str_lossy).collect();
                (!urls.is_empty()).then_some(urls)
            }
            _ => None,
        })
        .collect();
    if tiers.is_empty() { None } else { Some(tiers) }
}

fn parse_file_entry(entry: &Bencode) -> Option<FileInfo> {
    let length = entry.get(b"length")?.as_int()?.max(0) as u64;
    let path = match entry.get(b"path")? {
        Bencode::List(parts) => parts.iter().filter_map(Bencode::as_str_lossy).collect(),
        _ => return None,
    };
    Some(FileInfo { length, path })
}
