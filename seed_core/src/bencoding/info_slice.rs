//! Locates the raw bytes of the `info` value inside a metainfo dictionary.
//!
//! The info hash must be computed over the exact bytes found in the file, so the
//! value is sliced out of the input rather than re-encoded.

use super::decoder::decode;
use super::{Bencode, BencodeError};

/// Returns the slice of `input` holding the value of the top-level `info` key.
pub fn find_info_slice(input: &[u8]) -> Result<&[u8], BencodeError> {
    if input.first() != Some(&b'd') {
        return Err(BencodeError::NotADict);
    }
    let mut pos = 1;

    while pos < input.len() && input[pos] != b'e' {
        let key_pos = pos;
        let key = match decode(input, &mut pos)? {
            Bencode::Bytes(b) => b,
            _ => return Err(BencodeError::NonStringKey(key_pos)),
        };

        let value_start = pos;
        decode(input, &mut pos)?;
        if key == b"info" {
            return Ok(&input[value_start..pos]);
        }
    }

    Err(BencodeError::InfoNotFound)
}
