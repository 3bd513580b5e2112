use thiserror::Error;

/// Errors produced while decoding bencoded input.
#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum BencodeError {
    #[error("unexpected end of input while parsing {0}")]
    UnexpectedEof(&'static str),

    #[error("invalid integer at position {0}")]
    InvalidInt(usize),

    #[error("invalid string length at position {0}")]
    InvalidLength(usize),

    #[error("dictionary key at position {0} is not a byte string")]
    NonStringKey(usize),

    #[error("invalid bencode byte '{byte}' at position {pos}")]
    UnexpectedByte { byte: char, pos: usize },

    #[error("nesting exceeds {0} levels")]
    TooDeep(usize),

    #[error("input is not a dictionary")]
    NotADict,

    #[error("info dictionary not found")]
    InfoNotFound,
}
