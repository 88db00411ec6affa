//! Order-preserving binary encoding of [`KvKey`] for byte-keyed stores.
//!
//! # Binary Format
//!
//! A key encodes to the concatenation of its parts. Each part starts with a
//! tag byte:
//! - `0x01` bytes, `0x02` string: the payload with every `0x00` escaped as
//!   `0x00 0xFF`, followed by a `0x00` terminator
//! - `0x14` integer: 8 bytes big-endian with the sign bit flipped
//! - `0x26` false, `0x27` true: no payload
//!
//! Because parts are self-delimiting, the encoding of a key is a byte prefix
//! of the encoding of every key that extends it, which makes prefix scans in
//! LMDB line up with [`KvKey::is_prefix_of`].

use kvttl_core::{KeyPart, KvKey};

const TAG_BYTES: u8 = 0x01;
const TAG_STR: u8 = 0x02;
const TAG_INT: u8 = 0x14;
const TAG_FALSE: u8 = 0x26;
const TAG_TRUE: u8 = 0x27;

const TERMINATOR: u8 = 0x00;
const ESCAPE: u8 = 0xFF;

/// Encode a key to bytes.
pub fn encode_key(key: &KvKey) -> Vec<u8> {
    let mut out = Vec::with_capacity(key.len() * 8);
    for part in key.parts() {
        match part {
            KeyPart::Bytes(bytes) => {
                out.push(TAG_BYTES);
                push_escaped(&mut out, bytes);
            }
            KeyPart::Str(s) => {
                out.push(TAG_STR);
                push_escaped(&mut out, s.as_bytes());
            }
            KeyPart::Int(i) => {
                out.push(TAG_INT);
                out.extend_from_slice(&((*i as u64) ^ (1 << 63)).to_be_bytes());
            }
            KeyPart::Bool(false) => out.push(TAG_FALSE),
            KeyPart::Bool(true) => out.push(TAG_TRUE),
        }
    }
    out
}

/// Decode bytes produced by [`encode_key`].
///
/// Returns `None` if:
/// - A tag byte is unknown
/// - A string or byte payload is unterminated or badly escaped
/// - An integer payload is truncated
/// - A string payload is not valid UTF-8
pub fn decode_key(mut bytes: &[u8]) -> Option<KvKey> {
    let mut parts = Vec::new();
    while let Some((&tag, rest)) = bytes.split_first() {
        bytes = rest;
        let part = match tag {
            TAG_BYTES | TAG_STR => {
                let (payload, rest) = take_escaped(bytes)?;
                bytes = rest;
                if tag == TAG_STR {
                    KeyPart::Str(String::from_utf8(payload).ok()?)
                } else {
                    KeyPart::Bytes(payload)
                }
            }
            TAG_INT => {
                if bytes.len() < 8 {
                    return None;
                }
                let (raw, rest) = bytes.split_at(8);
                bytes = rest;
                let raw: [u8; 8] = raw.try_into().ok()?;
                KeyPart::Int((u64::from_be_bytes(raw) ^ (1 << 63)) as i64)
            }
            TAG_FALSE => KeyPart::Bool(false),
            TAG_TRUE => KeyPart::Bool(true),
            _ => return None,
        };
        parts.push(part);
    }
    Some(KvKey::new(parts))
}

fn push_escaped(out: &mut Vec<u8>, payload: &[u8]) {
    for &byte in payload {
        out.push(byte);
        if byte == TERMINATOR {
            out.push(ESCAPE);
        }
    }
    out.push(TERMINATOR);
}

fn take_escaped(bytes: &[u8]) -> Option<(Vec<u8>, &[u8])> {
    let mut payload = Vec::new();
    let mut i = 0;
    while i < bytes.len() {
        let byte = bytes[i];
        if byte == TERMINATOR {
            if bytes.get(i + 1) == Some(&ESCAPE) {
                payload.push(TERMINATOR);
                i += 2;
                continue;
            }
            return Some((payload, &bytes[i + 1..]));
        }
        payload.push(byte);
        i += 1;
    }
    None
}
