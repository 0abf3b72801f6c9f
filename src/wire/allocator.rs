//! Builds outgoing request/reply frames over a port's shared region.
//!
//! A `RequestAllocator` is rooted at a fixed-capacity buffer (the port's
//! "shared memory region"); the fixed header is written first, then each
//! out-of-line string/blob is appended with a 4-byte length prefix and
//! zero-padded to alignment. Exhausting the region is a `Resource` error,
//! not a panic, since a malicious or just-too-chatty server must not be
//! able to bring down the kernel side.

use zerocopy::{Immutable, IntoBytes};

use super::argument::{ALIGNMENT, padded_len};
use super::tag::Tag;

/// Default capacity of a port's shared region. Matches no particular
/// hardware; chosen generously enough that realistic paths/buffers never
/// spill, while still being a real, enforced bound.
pub const DEFAULT_REGION_CAPACITY: usize = 64 * 1024;

#[derive(Debug)]
pub struct RequestAllocator {
    tag: Tag,
    capacity: usize,
    buf: Vec<u8>,
}

/// Returned when a request/reply cannot be built within the port's region.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct AllocationError;

impl std::fmt::Display for AllocationError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str("shared region exhausted")
    }
}

impl std::error::Error for AllocationError {}

impl RequestAllocator {
    pub fn new(tag: Tag, capacity: usize) -> Self {
        // Reserve space for the frame header written by `finish`.
        RequestAllocator {
            tag,
            capacity,
            buf: Vec::with_capacity(capacity.min(256)),
        }
    }

    fn remaining(&self) -> usize {
        self.capacity.saturating_sub(self.buf.len() + super::FRAME_HEADER_LEN)
    }

    /// Append a fixed-layout struct in place.
    pub fn put<T: IntoBytes + Immutable>(&mut self, value: &T) -> Result<(), AllocationError> {
        let bytes = value.as_bytes();
        if bytes.len() > self.remaining() {
            return Err(AllocationError);
        }
        self.buf.extend_from_slice(bytes);
        Ok(())
    }

    /// Allocate a length-prefixed, alignment-padded string out-of-line.
    pub fn allocate_string(&mut self, s: impl AsRef<[u8]>) -> Result<(), AllocationError> {
        self.allocate_data(s.as_ref())
    }

    /// Allocate a length-prefixed, alignment-padded blob out-of-line.
    pub fn allocate_data(&mut self, data: &[u8]) -> Result<(), AllocationError> {
        let total = 4 + padded_len(data.len());
        if total > self.remaining() {
            return Err(AllocationError);
        }
        self.buf.extend_from_slice(&(data.len() as u32).to_ne_bytes());
        self.buf.extend_from_slice(data);
        let pad = padded_len(data.len()) - data.len();
        self.buf.resize(self.buf.len() + pad, 0);
        debug_assert_eq!(self.buf.len() % ALIGNMENT, 0);
        Ok(())
    }

    /// Finish building the frame: prefix the tag and total length.
    pub fn finish(self) -> Vec<u8> {
        super::encode_frame(self.tag, &self.buf)
    }
}
