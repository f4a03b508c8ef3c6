//! The serialization codec is an external collaborator: NDS consumes
//! `encode`/`decode`/`verify`, it does not own their format. This
//! module defines the trait NDS is written against, plus one concrete
//! implementation (`ChecksummedCodec`) so the crate is runnable on its
//! own without a production codec plugged in.

use crate::error::NdsError;

/// An opaque structured value as held in memory. NDS treats the bytes as
/// opaque; only the codec understands their structure.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Value(pub Vec<u8>);

impl Value {
    pub fn as_bytes(&self) -> &[u8] {
        &self.0
    }
}

impl From<Vec<u8>> for Value {
    fn from(bytes: Vec<u8>) -> Value {
        Value(bytes)
    }
}

impl From<&[u8]> for Value {
    fn from(bytes: &[u8]) -> Value {
        Value(bytes.to_vec())
    }
}

/// `encode`/`decode`/`verify` as described in the external interfaces
/// section: encode yields a self-describing, checksum-trailed byte
/// string; decode recovers a value from it; verify checks the checksum
/// without paying for a full decode.
pub trait Codec: Send + Sync {
    fn encode(&self, value: &Value) -> Vec<u8>;
    fn decode(&self, bytes: &[u8]) -> Result<Value, NdsError>;
    fn verify(&self, bytes: &[u8]) -> bool;
}

/// A minimal codec: the raw value bytes followed by a trailing IEEE
/// CRC32 of those bytes. Not meant to compete with a production
/// serialization format -- it exists so this crate has something real to
/// encode/decode/verify against.
#[derive(Debug, Default, Clone, Copy)]
pub struct ChecksummedCodec;

const CHECKSUM_LEN: usize = 4;

impl Codec for ChecksummedCodec {
    fn encode(&self, value: &Value) -> Vec<u8> {
        let mut out = Vec::with_capacity(value.0.len() + CHECKSUM_LEN);
        out.extend_from_slice(&value.0);
        out.extend_from_slice(&crc32(&value.0).to_le_bytes());
        out
    }

    fn decode(&self, bytes: &[u8]) -> Result<Value, NdsError> {
        if !self.verify(bytes) {
            return Err(NdsError::Corrupt(format!(
                "checksum mismatch over {} bytes",
                bytes.len()
            )));
        }
        let payload_len = bytes.len() - CHECKSUM_LEN;
        Ok(Value(bytes[..payload_len].to_vec()))
    }

    fn verify(&self, bytes: &[u8]) -> bool {
        if bytes.len() < CHECKSUM_LEN {
            return false;
        }
        let payload_len = bytes.len() - CHECKSUM_LEN;
        let (payload, trailer) = bytes.split_at(payload_len);
        let want = u32::from_le_bytes([trailer[0], trailer[1], trailer[2], trailer[3]]);
        crc32(payload) == want
    }
}

/// Table-based IEEE CRC32, computed once at first use.
fn crc32(bytes: &[u8]) -> u32 {
    static TABLE: std::sync::OnceLock<[u32; 256]> = std::sync::OnceLock::new();
    let table = TABLE.get_or_init(build_crc32_table);
    let mut crc: u32 = 0xFFFF_FFFF;
    for &b in bytes {
        let idx = ((crc ^ b as u32) & 0xFF) as usize;
        crc = (crc >> 8) ^ table[idx];
    }
    !crc
}

fn build_crc32_table() -> [u32; 256] {
    let mut table = [0u32; 256];
    for (i, slot) in table.iter_mut().enumerate() {
        let mut c = i as u32;
        for _ in 0..8 {
            c = if c & 1 != 0 {
                0xEDB8_8320 ^ (c >> 1)
            } else {
                c >> 1
            };
        }
        *slot = c;
    }
    table
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn round_trips() {
        let codec = ChecksummedCodec::default();
        let value = Value(b"hello world".to_vec());
        let encoded = codec.encode(&value);
        assert!(codec.verify(&encoded));
        let decoded = codec.decode(&encoded).unwrap();
        assert_eq!(decoded, value);
    }

    #[test]
    fn detects_corruption() {
        let codec = ChecksummedCodec::default();
        let mut encoded = codec.encode(&Value(b"hello world".to_vec()));
        let last = encoded.len() - 1;
        encoded[last] ^= 0xFF;
        assert!(!codec.verify(&encoded));
        assert!(codec.decode(&encoded).is_err());
    }

    #[test]
    fn rejects_short_input() {
        let codec = ChecksummedCodec::default();
        assert!(!codec.verify(b"ab"));
    }
}
