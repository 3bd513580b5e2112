use super::bencode::Bencode;
use super::error::BencodeError;
use std::collections::BTreeMap;

/// Lists and dictionaries nested deeper than this are rejected.
const MAX_DEPTH: usize = 64;

/// Decodes one bencode value starting at `*pos`, advancing `pos` past it.
pub fn decode(input: &[u8], pos: &mut usize) -> Result<Bencode, BencodeError> {
    decode_at_depth(input, pos, 0)
}

fn decode_at_depth(input: &[u8], pos: &mut usize, depth: usize) -> Result<Bencode, BencodeError> {
    if depth > MAX_DEPTH {
        return Err(BencodeError::TooDeep(MAX_DEPTH));
    }
    let Some(&byte) = input.get(*pos) else {
        return Err(BencodeError::UnexpectedEof("value"));
    };

    match byte {
        b'i' => {
            *pos += 1;
            let start = *pos;
            let end = find_byte(input, start, b'e').ok_or(BencodeError::UnexpectedEof("integer"))?;
            let num = std::str::from_utf8(&input[start..end])
                .ok()
                .and_then(|s| s.parse::<i64>().ok())
                .ok_or(BencodeError::InvalidInt(start))?;
            *pos = end + 1;
            Ok(Bencode::Int(num))
        }

        b'l' => {
            *pos += 1;
            let mut list = Vec::new();
            loop {
                match input.get(*pos) {
                    None => return Err(BencodeError::UnexpectedEof("list")),
                    Some(b'e') => break,
                    Some(_) => list.push(decode_at_depth(input, pos, depth + 1)?),
                }
            }
            *pos += 1;
            Ok(Bencode::List(list))
        }

        b'd' => {
            *pos += 1;
            let mut dict = BTreeMap::new();
            loop {
                match input.get(*pos) {
                    None => return Err(BencodeError::UnexpectedEof("dict")),
                    Some(b'e') => break,
                    Some(_) => {
                        let key_pos = *pos;
                        let key = match decode_at_depth(input, pos, depth + 1)? {
                            Bencode::Bytes(b) => b,
                            _ => return Err(BencodeError::NonStringKey(key_pos)),
                        };
                        let val = decode_at_depth(input, pos, depth + 1)?;
                        dict.insert(key, val);
                    }
                }
            }
            *pos += 1;
            Ok(Bencode::Dict(dict))
        }

        b'0'..=b'9' => {
            let start = *pos;
            let colon =
                find_byte(input, start, b':').ok_or(BencodeError::UnexpectedEof("string length"))?;
            let len = std::str::from_utf8(&input[start..colon])
                .ok()
                .and_then(|s| s.parse::<usize>().ok())
                .ok_or(BencodeError::InvalidLength(start))?;
            let body = colon + 1;
            let end = body
                .checked_add(len)
                .filter(|&end| end <= input.len())
                .ok_or(BencodeError::UnexpectedEof("string"))?;
            *pos = end;
            Ok(Bencode::Bytes(input[body..end].to_vec()))
        }

        c => Err(BencodeError::UnexpectedByte {
            byte: c as char,
            pos: *pos,
        }),
    }
}

fn find_byte(input: &[u8], from: usize, needle: u8) -> Option<usize> {
    input[from..]
        .iter()
        .position(|&b| b == needle)
        .map(|offset| from + offset)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn decode_all(input: &[u8]) -> Result<Bencode, BencodeError> {
        let mut pos = 0;
        decode(input, &mut pos)
    }

    #[test]
    fn test_decode_scalars() {
        assert_eq!(decode_all(b"i-42e"), Ok(Bencode::Int(-42)));
        assert_eq!(decode_all(b"4:spam"), Ok(Bencode::Bytes(b"spam".to_vec())));
        assert_eq!(decode_all(b"0:"), Ok(Bencode::Bytes(Vec::new())));
    }

    #[test]
    fn test_decode_advances_position() {
        let input = b"i1ei2e";
        let mut pos = 0;
        assert_eq!(decode(input, &mut pos), Ok(Bencode::Int(1)));
        assert_eq!(pos, 3);
        assert_eq!(decode(input, &mut pos), Ok(Bencode::Int(2)));
        assert_eq!(pos, input.len());
    }

    #[test]
    fn test_decode_dict_and_reencode() {
        let input = b"d3:cow3:moo4:spaml1:a1:bee";
        let value = decode_all(input).unwrap();
        assert_eq!(
            value.get(b"cow").and_then(Bencode::as_bytes),
            Some(&b"moo"[..])
        );
        assert_eq!(value.encode(), input.to_vec());
    }

    #[test]
    fn test_decode_errors() {
        assert_eq!(decode_all(b""), Err(BencodeError::UnexpectedEof("value")));
        assert_eq!(decode_all(b"i12"), Err(BencodeError::UnexpectedEof("integer")));
        assert_eq!(decode_all(b"ixe"), Err(BencodeError::InvalidInt(1)));
        assert_eq!(decode_all(b"10:short"), Err(BencodeError::UnexpectedEof("string")));
        assert_eq!(decode_all(b"di1e1:ae"), Err(BencodeError::NonStringKey(1)));
        assert_eq!(decode_all(b"l1:a"), Err(BencodeError::UnexpectedEof("list")));
        assert!(matches!(
            decode_all(b"x"),
            Err(BencodeError::UnexpectedByte { byte: 'x', pos: 0 })
        ));
    }

    #[test]
    fn test_decode_rejects_deep_nesting() {
        let mut input = vec![b'l'; MAX_DEPTH + 2];
        input.extend(vec![b'e'; MAX_DEPTH + 2]);
        assert_eq!(decode_all(&input), Err(BencodeError::TooDeep(MAX_DEPTH)));
    }
}
