pub mod bencode;
pub mod decoder;
pub mod error;
pub mod info_hash;
pub mod info_slice;

pub use bencode::Bencode;
pub use decoder::decode;
pub use error::BencodeError;
pub use info_hash::InfoHash;
pub use info_slice::find_info_slice;
