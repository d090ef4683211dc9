//! Binary response envelope and form-encoded request parameters.
//!
//! A response is an 8-byte little-endian `i64` status followed by the payload.
//! Only status `0` carries a payload.

use std::collections::BTreeMap;

use crate::{
    common::{VtfsError, VtfsResult},
    models::Listing,
    operation::Reply,
};

pub const STATUS_LEN: usize = 8;

pub fn encode_status(status: i64, payload: &[u8]) -> Vec<u8> {
    let mut out = Vec::with_capacity(STATUS_LEN + payload.len());
    out.extend_from_slice(&status.to_le_bytes());
    out.extend_from_slice(payload);
    out
}

pub fn encode_response(result: &VtfsResult<Reply>) -> Vec<u8> {
    match result {
        Ok(reply) => encode_status(0, &payload(reply)),
        Err(e) => encode_status(e.status(), &[]),
    }
}

/// Splits an envelope into status and payload.
pub fn decode_response(bytes: &[u8]) -> VtfsResult<(i64, &[u8])> {
    if bytes.len() < STATUS_LEN {
        return Err(VtfsError::BadRequest(format!(
            "envelope needs {} status bytes, got {}",
            STATUS_LEN,
            bytes.len()
        )));
    }
    let (head, payload) = bytes.split_at(STATUS_LEN);
    let mut raw = [0u8; STATUS_LEN];
    raw.copy_from_slice(head);
    Ok((i64::from_le_bytes(raw), payload))
}

fn payload(reply: &Reply) -> Vec<u8> {
    match reply {
        Reply::Listing(Listing::HardLinks(names)) => {
            let mut out = String::new();
            for name in names {
                out.push_str(name);
                out.push('\n');
            }
            out.into_bytes()
        }
        Reply::Listing(Listing::Directory(entries)) => {
            let mut out = String::new();
            for e in entries {
                out.push_str(&format!("{}\t{}\t{}\n", e.name, e.ino, e.mode));
            }
            out.into_bytes()
        }
        Reply::Ino(n) | Reply::Count(n) => n.to_string().into_bytes(),
        Reply::Bytes(data) => data.clone(),
        Reply::Empty => Vec::new(),
    }
}

fn hex_digit(b: u8) -> Option<u8> {
    match b {
        b'0'..=b'9' => Some(b - b'0'),
        b'a'..=b'f' => Some(b - b'a' + 10),
        b'A'..=b'F' => Some(b - b'A' + 10),
        _ => None,
    }
}

/// Decodes one form-encoded component: `+` is a space and `%XX` is a byte.
pub fn percent_decode(raw: &str) -> VtfsResult<Vec<u8>> {
    let bytes = raw.as_bytes();
    let mut out = Vec::with_capacity(bytes.len());
    let mut i = 0;
    while i < bytes.len() {
        match bytes[i] {
            b'+' => {
                out.push(b' ');
                i += 1;
            }
            b'%' => {
                let hi = bytes.get(i + 1).copied().and_then(hex_digit);
                let lo = bytes.get(i + 2).copied().and_then(hex_digit);
                match (hi, lo) {
                    (Some(hi), Some(lo)) => out.push((hi << 4) | lo),
                    _ => {
                        return Err(VtfsError::BadRequest(format!(
                            "malformed escape at byte {}",
                            i
                        )))
                    }
                }
                i += 3;
            }
            b => {
                out.push(b);
                i += 1;
            }
        }
    }
    Ok(out)
}

/// Decoded request parameters. A repeated key keeps its last value.
#[derive(Debug, Default, Clone, PartialEq, Eq)]
pub struct Query {
    params: BTreeMap<String, Vec<u8>>,
}

impl Query {
    pub fn parse(query: &str) -> VtfsResult<Self> {
        let query = query.strip_prefix('?').unwrap_or(query);
        let mut params = BTreeMap::new();
        for pair in query.split('&').filter(|p| !p.is_empty()) {
            let (key, value) = pair.split_once('=').unwrap_or((pair, ""));
            let key = String::from_utf8(percent_decode(key)?)
                .map_err(|_| VtfsError::BadRequest("parameter name is not utf-8".into()))?;
            params.insert(key, percent_decode(value)?);
        }
        Ok(Self { params })
    }

    pub fn bytes(&self, key: &str) -> VtfsResult<&[u8]> {
        self.params
            .get(key)
            .map(Vec::as_slice)
            .ok_or_else(|| VtfsError::BadRequest(format!("missing parameter {}", key)))
    }

    pub fn string(&self, key: &str) -> VtfsResult<String> {
        String::from_utf8(self.bytes(key)?.to_vec())
            .map_err(|_| VtfsError::BadRequest(format!("parameter {} is not utf-8", key)))
    }

    pub fn number<T: std::str::FromStr>(&self, key: &str) -> VtfsResult<T> {
        self.string(key)?
            .trim()
            .parse()
            .map_err(|_| VtfsError::BadRequest(format!("parameter {} is not a number", key)))
    }

    pub fn optional_number<T: std::str::FromStr>(&self, key: &str) -> VtfsResult<Option<T>> {
        if self.params.contains_key(key) {
            self.number(key).map(Some)
        } else {
            Ok(None)
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::DirEntry;

    #[test]
    fn envelope_layout() {
        let out = encode_status(-500, &[]);
        assert_eq!(out, (-500i64).to_le_bytes().to_vec());

        let out = encode_response(&Ok(Reply::Count(15)));
        assert_eq!(&out[..8], &[0u8; 8]);
        assert_eq!(&out[8..], b"15");

        let out = encode_response(&Err(VtfsError::NotEmpty));
        assert_eq!(decode_response(&out).unwrap(), (4, &[][..]));
    }

    #[test]
    fn listing_payloads() {
        let dir = Reply::Listing(Listing::Directory(vec![
            DirEntry { name: "a".into(), ino: 1001, mode: 0o100644 },
            DirEntry { name: "b".into(), ino: 1002, mode: 0o040755 },
        ]));
        let out = encode_response(&Ok(dir));
        assert_eq!(&out[8..], b"a\t1001\t33188\nb\t1002\t16877\n");

        let links = Reply::Listing(Listing::HardLinks(vec!["x".into(), "y".into()]));
        assert_eq!(&encode_response(&Ok(links))[8..], b"x\ny\n");
    }

    #[test]
    fn short_envelope_is_rejected() {
        assert!(matches!(
            decode_response(&[0, 0, 0]),
            Err(VtfsError::BadRequest(_))
        ));
    }

    #[test]
    fn percent_decoding() {
        assert_eq!(percent_decode("a+b%20c").unwrap(), b"a b c");
        assert_eq!(percent_decode("%00%ff%2B").unwrap(), vec![0, 0xff, b'+']);
        // Decoded exactly once.
        assert_eq!(percent_decode("%2541").unwrap(), b"%41");
        assert!(percent_decode("%4").is_err());
        assert!(percent_decode("%zz").is_err());
    }

    #[test]
    fn query_accessors() {
        let q = Query::parse("?token=t%21&file_ino=1001&data=hi%0A&flag").unwrap();
        assert_eq!(q.string("token").unwrap(), "t!");
        assert_eq!(q.number::<u64>("file_ino").unwrap(), 1001);
        assert_eq!(q.bytes("data").unwrap(), b"hi\n");
        assert_eq!(q.bytes("flag").unwrap(), b"");
        assert_eq!(q.optional_number::<u64>("dir_ino").unwrap(), None);
        assert!(matches!(q.number::<u32>("token"), Err(VtfsError::BadRequest(_))));
        assert!(matches!(q.string("missing"), Err(VtfsError::BadRequest(_))));
    }

    #[test]
    fn non_utf8_string_parameter() {
        let q = Query::parse("name=%ff").unwrap();
        assert!(matches!(q.string("name"), Err(VtfsError::BadRequest(_))));
    }
}
