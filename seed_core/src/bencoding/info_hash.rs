use sha1::{Digest, Sha1};
use std::fmt;

/// SHA-1 of the raw bencoded `info` dictionary; identifies a swarm.
#[derive(Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct InfoHash(pub [u8; 20]);

impl InfoHash {
    pub fn of(info_bytes: &[u8]) -> Self {
        let mut hash = [0u8; 20];
        hash.copy_from_slice(&Sha1::digest(info_bytes));
        Self(hash)
    }

    pub fn as_bytes(&self) -> &[u8; 20] {
        &self.0
    }

    pub fn to_hex(&self) -> String {
        hex::encode(self.0)
    }
}

impl fmt::Display for InfoHash {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.to_hex())
    }
}

impl fmt::Debug for InfoHash {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "InfoHash({})", self.to_hex())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_info_hash_hex() {
        let hash = InfoHash::of(b"d3:bar3:baze");
        assert_eq!(hash.to_hex().len(), 40);
        assert_eq!(hash, InfoHash::of(b"d3:bar3:baze"));
        assert_ne!(hash, InfoHash::of(b"d3:bar3:bat"));
        assert_eq!(format!("{}", hash), hash.to_hex());
    }
}
