//! Sequence-tagged key encoding.
//!
//! Point lookups carry an internal key: the user key followed by an 8-byte
//! little-endian trailer packing `(sequence << 8) | kind`. The sequence number
//! doubles as the hotness clock for filter readers, so the multi-queue parses
//! it out of every probe.

use byteorder::{ByteOrder, LittleEndian};

/// Monotone tick attached to every write; also the hotness clock.
pub type SequenceNumber = u64;

/// Trailer appended to a user key to form an internal key.
pub const INTERNAL_KEY_TRAILER_SIZE: usize = 8;

/// Sequence numbers are packed into the upper 56 bits of the trailer.
pub const MAX_SEQUENCE_NUMBER: SequenceNumber = (1 << 56) - 1;

/// What the entry at this key holds.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[repr(u8)]
pub enum ValueKind {
    Deletion = 0,
    Value = 1,
}

impl ValueKind {
    fn from_tag(tag: u8) -> Option<Self> {
        match tag {
            0 => Some(ValueKind::Deletion),
            1 => Some(ValueKind::Value),
            _ => None,
        }
    }
}

/// An internal key split back into its parts.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ParsedInternalKey<'a> {
    pub user_key: &'a [u8],
    pub sequence: SequenceNumber,
    pub kind: ValueKind,
}

/// Append `user_key` plus the packed trailer to `dst`.
pub fn append_internal_key(
    dst: &mut Vec<u8>,
    user_key: &[u8],
    sequence: SequenceNumber,
    kind: ValueKind,
) {
    debug_assert!(sequence <= MAX_SEQUENCE_NUMBER);
    dst.extend_from_slice(user_key);
    let mut trailer = [0u8; INTERNAL_KEY_TRAILER_SIZE];
    LittleEndian::write_u64(&mut trailer, (sequence << 8) | kind as u64);
    dst.extend_from_slice(&trailer);
}

/// Build an internal key from its parts.
pub fn encode_internal_key(
    user_key: &[u8],
    sequence: SequenceNumber,
    kind: ValueKind,
) -> Vec<u8> {
    let mut dst = Vec::with_capacity(user_key.len() + INTERNAL_KEY_TRAILER_SIZE);
    append_internal_key(&mut dst, user_key, sequence, kind);
    dst
}

/// Split an internal key. Returns `None` when `key` is too short or the kind
/// tag is not a known value; callers treat such probes as plain user keys.
pub fn parse_internal_key(key: &[u8]) -> Option<ParsedInternalKey<'_>> {
    if key.len() < INTERNAL_KEY_TRAILER_SIZE {
        return None;
    }
    let split = key.len() - INTERNAL_KEY_TRAILER_SIZE;
    let tag = LittleEndian::read_u64(&key[split..]);
    let kind = ValueKind::from_tag((tag & 0xff) as u8)?;
    Some(ParsedInternalKey {
        user_key: &key[..split],
        sequence: tag >> 8,
        kind,
    })
}

/// The user-key portion of an internal key, or the whole slice when it does
/// not parse as one.
pub fn user_key(key: &[u8]) -> &[u8] {
    match parse_internal_key(key) {
        Some(parsed) => parsed.user_key,
        None => key,
    }
}
