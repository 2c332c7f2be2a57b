//! The on-wire/on-disk frame envelope (§4.A, §6):
//!
//! ```text
//! 0x1E | hlen(1 byte) | header_pb | 0x1F | message_pb
//! ```
//!
//! `header_pb` carries an optional HMAC so a producer can authenticate the
//! record; `message_pb` is [`crate::Message::encode`]'s canonical bytes.

use crate::proto::FrameHeaderProto;
use hmac::{Hmac, Mac};
use md5::Md5;
use prost::Message as _;
use sha1::Sha1;
use std::collections::HashMap;
use thiserror::Error;

pub const RECORD_SEPARATOR: u8 = 0x1E;
pub const UNIT_SEPARATOR: u8 = 0x1F;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum HashFunction {
    Md5,
    Sha1,
}

/// The small header preceding every framed message.
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub struct FrameHeader {
    pub message_length: u32,
    pub hmac_hash_function: Option<HashFunction>,
    pub hmac_signer: Option<String>,
    pub hmac_key_version: u32,
    pub hmac: Vec<u8>,
}

impl FrameHeader {
    fn encode(&self) -> Vec<u8> {
        let hmac_hash_function = self.hmac_hash_function.map(|h| match h {
            HashFunction::Md5 => 0,
            HashFunction::Sha1 => 1,
        });
        FrameHeaderProto {
            message_length: self.message_length,
            hmac_hash_function,
            hmac_signer: self.hmac_signer.clone(),
            hmac_key_version: self.hmac_key_version,
            hmac: self.hmac.clone(),
        }
        .encode_to_vec()
    }

    fn decode(bytes: &[u8]) -> Result<Self, FrameError> {
        let p = FrameHeaderProto::decode(bytes)?;
        let hmac_hash_function = match p.hmac_hash_function {
            Some(0) => Some(HashFunction::Md5),
            Some(1) => Some(HashFunction::Sha1),
            Some(other) => return Err(FrameError::UnknownHashFunction(other)),
            None => None,
        };
        Ok(FrameHeader {
            message_length: p.message_length,
            hmac_hash_function,
            hmac_signer: p.hmac_signer,
            hmac_key_version: p.hmac_key_version,
            hmac: p.hmac,
        })
    }
}

#[derive(Debug, Error)]
pub enum FrameError {
    #[error("frame header is malformed: {0}")]
    Malformed(#[from] prost::DecodeError),
    #[error("frame missing unit separator after header")]
    MissingUnitSeparator,
    #[error("unknown hmac hash function tag {0}")]
    UnknownHashFunction(i32),
    #[error("hmac verification failed for signer {signer}")]
    HmacMismatch { signer: String },
    #[error("no key registered for signer {signer} key_version {key_version}")]
    UnknownSigner { signer: String, key_version: u32 },
}

/// Maps `(signer, key_version)` to the shared HMAC key, per §4.A.
#[derive(Debug, Clone, Default)]
pub struct Keyring {
    keys: HashMap<(String, u32), Vec<u8>>,
}

impl Keyring {
    pub fn new() -> Self {
        Keyring::default()
    }

    pub fn insert(&mut self, signer: impl Into<String>, key_version: u32, key: Vec<u8>) {
        self.keys.insert((signer.into(), key_version), key);
    }

    pub fn get(&self, signer: &str, key_version: u32) -> Option<&[u8]> {
        self.keys
            .get(&(signer.to_owned(), key_version))
            .map(Vec::as_slice)
    }
}

/// Encode a message into the frame envelope, optionally signing it with
/// an HMAC computed over the serialized message bytes only (§4.A).
pub fn encode_frame(
    message_bytes: &[u8],
    signer: Option<(&str, u32, &[u8], HashFunction)>,
) -> Vec<u8> {
    let header = match signer {
        Some((signer, key_version, key, hash_fn)) => {
            let mac = compute_hmac(hash_fn, key, message_bytes);
            FrameHeader {
                message_length: message_bytes.len() as u32,
                hmac_hash_function: Some(hash_fn),
                hmac_signer: Some(signer.to_owned()),
                hmac_key_version: key_version,
                hmac: mac,
            }
        }
        None => FrameHeader {
            message_length: message_bytes.len() as u32,
            ..Default::default()
        },
    };

    let header_bytes = header.encode();
    let mut out = Vec::with_capacity(3 + header_bytes.len() + message_bytes.len());
    out.push(RECORD_SEPARATOR);
    out.push(header_bytes.len() as u8);
    out.extend_from_slice(&header_bytes);
    out.push(UNIT_SEPARATOR);
    out.extend_from_slice(message_bytes);
    out
}

/// The result of successfully parsing one frame out of a buffer.
pub struct DecodedFrame {
    pub header: FrameHeader,
    /// Byte offset of `message_bytes` within the original buffer, and its length.
    pub message_range: (usize, usize),
    pub consumed: usize,
}

/// Parse one frame starting at `buf[0]`, which must be [`RECORD_SEPARATOR`].
///
/// Returns `Ok(None)` if `buf` does not yet contain a complete frame
/// (caller should wait for more bytes). Does not verify any HMAC — use
/// [`verify_hmac`] after locating the message bytes.
pub fn decode_frame(buf: &[u8]) -> Result<Option<DecodedFrame>, FrameError> {
    if buf.is_empty() || buf[0] != RECORD_SEPARATOR {
        return Ok(None);
    }
    if buf.len() < 2 {
        return Ok(None);
    }
    let hlen = buf[1] as usize;
    let header_start = 2;
    let header_end = header_start + hlen;
    if buf.len() < header_end + 1 {
        return Ok(None);
    }
    let header = FrameHeader::decode(&buf[header_start..header_end])?;
    if buf[header_end] != UNIT_SEPARATOR {
        return Err(FrameError::MissingUnitSeparator);
    }
    let message_start = header_end + 1;
    let message_end = message_start + header.message_length as usize;
    if buf.len() < message_end {
        return Ok(None);
    }

    Ok(Some(DecodedFrame {
        message_range: (message_start, header.message_length as usize),
        consumed: message_end,
        header,
    }))
}

/// Find the next [`RECORD_SEPARATOR`] at or after `from`, for resync after
/// a malformed frame (§4.A, §8 scenario S3).
pub fn find_next_record_separator(buf: &[u8], from: usize) -> Option<usize> {
    buf[from..]
        .iter()
        .position(|&b| b == RECORD_SEPARATOR)
        .map(|p| p + from)
}

/// Verify `message_bytes` against `header`'s HMAC using `keyring`.
///
/// Returns `Ok(())` if the header carries no signer (unsigned frames are
/// accepted as-is) or the HMAC matches. A caller that gets
/// `Err(FrameError::HmacMismatch)` must discard the message without
/// surfacing an error downstream (§4.A).
pub fn verify_hmac(
    header: &FrameHeader,
    message_bytes: &[u8],
    keyring: &Keyring,
) -> Result<(), FrameError> {
    let Some(signer) = header.hmac_signer.as_deref() else {
        return Ok(());
    };
    let Some(hash_fn) = header.hmac_hash_function else {
        return Ok(());
    };
    let key = keyring
        .get(signer, header.hmac_key_version)
        .ok_or_else(|| FrameError::UnknownSigner {
            signer: signer.to_owned(),
            key_version: header.hmac_key_version,
        })?;
    let expected = compute_hmac(hash_fn, key, message_bytes);
    if expected == header.hmac {
        Ok(())
    } else {
        Err(FrameError::HmacMismatch {
            signer: signer.to_owned(),
        })
    }
}

fn compute_hmac(hash_fn: HashFunction, key: &[u8], message: &[u8]) -> Vec<u8> {
    match hash_fn {
        HashFunction::Md5 => {
            let mut mac = Hmac::<Md5>::new_from_slice(key).expect("hmac accepts any key length");
            mac.update(message);
            mac.finalize().into_bytes().to_vec()
        }
        HashFunction::Sha1 => {
            let mut mac = Hmac::<Sha1>::new_from_slice(key).expect("hmac accepts any key length");
            mac.update(message);
            mac.finalize().into_bytes().to_vec()
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::Message;

    #[test]
    fn round_trips_unsigned_frame() {
        let msg = Message::new([1u8; 16], 42, "t").encode();
        let frame = encode_frame(&msg, None);
        let decoded = decode_frame(&frame).unwrap().unwrap();
        assert_eq!(decoded.consumed, frame.len());
        let (start, len) = decoded.message_range;
        assert_eq!(&frame[start..start + len], msg.as_slice());
    }

    #[test]
    fn signed_frame_verifies_with_correct_key() {
        let msg = Message::new([2u8; 16], 7, "t").encode();
        let frame = encode_frame(&msg, Some(("signer-a", 1, b"secret", HashFunction::Sha1)));
        let decoded = decode_frame(&frame).unwrap().unwrap();
        let mut keyring = Keyring::new();
        keyring.insert("signer-a", 1, b"secret".to_vec());
        let (start, len) = decoded.message_range;
        verify_hmac(&decoded.header, &frame[start..start + len], &keyring).unwrap();
    }

    #[test]
    fn signed_frame_fails_with_wrong_key() {
        let msg = Message::new([2u8; 16], 7, "t").encode();
        let frame = encode_frame(&msg, Some(("signer-a", 1, b"secret", HashFunction::Sha1)));
        let decoded = decode_frame(&frame).unwrap().unwrap();
        let mut keyring = Keyring::new();
        keyring.insert("signer-a", 1, b"wrong-key".to_vec());
        let (start, len) = decoded.message_range;
        let err = verify_hmac(&decoded.header, &frame[start..start + len], &keyring).unwrap_err();
        assert!(matches!(err, FrameError::HmacMismatch { .. }));
    }

    #[test]
    fn incomplete_frame_returns_none() {
        let msg = Message::new([3u8; 16], 1, "t").encode();
        let frame = encode_frame(&msg, None);
        let partial = &frame[..frame.len() - 3];
        assert!(decode_frame(partial).unwrap().is_none());
    }

    #[test]
    fn resyncs_past_garbage_to_next_record_separator() {
        let msg1 = encode_frame(&Message::new([4u8; 16], 1, "t").encode(), None);
        let msg2 = encode_frame(&Message::new([5u8; 16], 2, "t").encode(), None);
        let mut stream = b"GARBAGE".to_vec();
        stream.extend_from_slice(&msg1);
        stream.extend_from_slice(&msg2);

        let first_rs = find_next_record_separator(&stream, 0).unwrap();
        assert_eq!(first_rs, 7);
        let decoded = decode_frame(&stream[first_rs..]).unwrap().unwrap();
        assert_eq!(decoded.consumed, msg1.len());
    }
}
