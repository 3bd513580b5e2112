//! Core library for the manifest seeder.
//!
//! This library provides data structures and functions for parsing `.torrent` files
//! and handling bencoded data, plus the token bucket used to pace uploads.

pub mod bencoding;
pub mod metainfo;
pub mod rate_limit;

pub use bencoding::{Bencode, BencodeError, InfoHash};
pub use metainfo::{FileInfo, Metainfo, MetainfoError, create_single_file, parse_metainfo};
pub use rate_limit::TokenBucket;
