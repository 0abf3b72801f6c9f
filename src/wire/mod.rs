//! The request/reply wire format (§6).
//!
//! Every exchange is: a 4-byte type tag, a 4-byte body length, then a body.
//! Forward requests' bodies are a fixed typed header followed by
//! out-of-line strings/blobs; replies' bodies are a 4-byte status followed
//! by the same out-of-line scheme for data-returning calls.

mod allocator;
mod argument;
mod tag;

pub use allocator::{AllocationError, RequestAllocator, DEFAULT_REGION_CAPACITY};
pub(crate) use argument::ArgumentIterator;
pub use tag::Tag;

pub(crate) const FRAME_HEADER_LEN: usize = 8;

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum DecodeError {
    /// Not enough bytes remained to satisfy a `fetch`.
    ShortRead,
    /// The leading tag did not map to any known operation.
    UnknownTag(u32),
    /// The frame's declared body length did not match the bytes present.
    LengthMismatch { declared: u32, actual: usize },
    /// A reply arrived bearing a different tag than the one awaited.
    TagMismatch { expected: Tag, found: Tag },
}

impl std::fmt::Display for DecodeError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            DecodeError::ShortRead => f.write_str("short read while decoding frame"),
            DecodeError::UnknownTag(tag) => write!(f, "unknown wire tag {tag}"),
            DecodeError::LengthMismatch { declared, actual } => {
                write!(f, "frame declared {declared} bytes but {actual} were present")
            }
            DecodeError::TagMismatch { expected, found } => {
                write!(f, "expected reply tag {expected:?}, got {found:?}")
            }
        }
    }
}

impl std::error::Error for DecodeError {}

/// Prefix `body` with its tag and length, producing a full frame. Public for
/// the same reason as `decode_frame`: an out-of-process harness playing the
/// server side of the reverse channel needs to build request frames too.
pub fn encode_frame(tag: Tag, body: &[u8]) -> Vec<u8> {
    let mut out = Vec::with_capacity(FRAME_HEADER_LEN + body.len());
    out.extend_from_slice(&u32::from(tag).to_ne_bytes());
    out.extend_from_slice(&(body.len() as u32).to_ne_bytes());
    out.extend_from_slice(body);
    out
}

/// Split a frame into its tag and body, validating the length prefix. Public
/// so an out-of-process test harness can decode the requests a `Volume`
/// sends without reaching into this crate's own test doubles.
pub fn decode_frame(frame: &[u8]) -> Result<(Tag, &[u8]), DecodeError> {
    if frame.len() < FRAME_HEADER_LEN {
        return Err(DecodeError::ShortRead);
    }
    let tag_value = u32::from_ne_bytes(frame[0..4].try_into().unwrap());
    let declared_len = u32::from_ne_bytes(frame[4..8].try_into().unwrap());
    let tag = Tag::try_from(tag_value).map_err(|_| DecodeError::UnknownTag(tag_value))?;
    let body = &frame[FRAME_HEADER_LEN..];
    if body.len() != declared_len as usize {
        return Err(DecodeError::LengthMismatch {
            declared: declared_len,
            actual: body.len(),
        });
    }
    Ok((tag, body))
}

/// A decoded reply: status plus an iterator over any trailing payload.
#[derive(Debug)]
pub(crate) struct ReplyView<'a> {
    pub tag: Tag,
    pub status: i32,
    pub payload: ArgumentIterator<'a>,
}

/// Decode a reply frame, verifying it carries the tag the caller awaited.
pub(crate) fn decode_reply(frame: &[u8], expected: Tag) -> Result<ReplyView<'_>, DecodeError> {
    let (tag, body) = decode_frame(frame)?;
    if tag != expected {
        return Err(DecodeError::TagMismatch { expected, found: tag });
    }
    if body.len() < 4 {
        return Err(DecodeError::ShortRead);
    }
    let status = i32::from_ne_bytes(body[0..4].try_into().unwrap());
    Ok(ReplyView {
        tag,
        status,
        payload: ArgumentIterator::new(&body[4..]),
    })
}

/// Build a reply frame: status followed by an optional payload builder.
pub fn encode_reply(
    tag: Tag,
    status: i32,
    capacity: usize,
    build: impl FnOnce(&mut RequestAllocator) -> Result<(), AllocationError>,
) -> Result<Vec<u8>, AllocationError> {
    let mut alloc = RequestAllocator::new(tag, capacity);
    alloc.put(&status)?;
    build(&mut alloc)?;
    Ok(alloc.finish())
}

/// Build a bare-status reply with no payload (the common case).
pub fn encode_status_reply(tag: Tag, status: i32) -> Vec<u8> {
    encode_reply(tag, status, FRAME_HEADER_LEN + 4, |_| Ok(())).expect("status-only reply never exhausts its region")
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn frame_roundtrip() {
        let frame = encode_frame(Tag::ReceiptAck, b"hi");
        let (tag, body) = decode_frame(&frame).unwrap();
        assert_eq!(tag, Tag::ReceiptAck);
        assert_eq!(body, b"hi");
    }

    #[test]
    fn unknown_tag_rejected() {
        let mut frame = encode_frame(Tag::ReceiptAck, b"");
        frame[0..4].copy_from_slice(&999_999u32.to_ne_bytes());
        assert!(matches!(decode_frame(&frame), Err(DecodeError::UnknownTag(999_999))));
    }

    #[test]
    fn reply_status_roundtrip() {
        let frame = encode_status_reply(Tag::Close, 0);
        let view = decode_reply(&frame, Tag::Close).unwrap();
        assert_eq!(view.status, 0);
        assert_eq!(view.payload.len(), 0);
    }

    #[test]
    fn reply_tag_mismatch_detected() {
        let frame = encode_status_reply(Tag::Close, 0);
        let err = decode_reply(&frame, Tag::Open).unwrap_err();
        assert!(matches!(err, DecodeError::TagMismatch { .. }));
    }
}
