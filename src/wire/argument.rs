//! Decomposes a reply/request byte slice into typed arguments.
//!
//! A page-aligned kernel buffer lets a parser cast typed arguments in
//! place; this shared region is plain heap bytes packed at arbitrary
//! offsets (mixed narrow/wide fixed fields ahead of out-of-line strings),
//! so fixed arguments are copied out by value instead
//! (`FromBytes::read_from_prefix`) rather than reinterpreted in place —
//! this sidesteps alignment entirely rather than trusting it. Strings and
//! blobs here are length-prefixed and alignment-padded (§6) rather than
//! NUL-terminated.

use std::ffi::OsStr;
use std::os::unix::ffi::OsStrExt;

use zerocopy::FromBytes;

use super::DecodeError;

pub(crate) const ALIGNMENT: usize = 4;

pub(crate) fn padded_len(len: usize) -> usize {
    len.div_ceil(ALIGNMENT) * ALIGNMENT
}

/// A cursor over a request/reply's variable-length payload region.
#[derive(Debug)]
pub(crate) struct ArgumentIterator<'a> {
    data: &'a [u8],
}

impl<'a> ArgumentIterator<'a> {
    pub(crate) fn new(data: &'a [u8]) -> Self {
        ArgumentIterator { data }
    }

    pub(crate) fn len(&self) -> usize {
        self.data.len()
    }

    pub(crate) fn is_empty(&self) -> bool {
        self.data.is_empty()
    }

    pub(crate) fn fetch_all(&mut self) -> &'a [u8] {
        std::mem::take(&mut self.data)
    }

    /// Copy out a fixed-layout value, regardless of the current offset's
    /// alignment.
    pub(crate) fn fetch<T: FromBytes>(&mut self) -> Result<T, DecodeError> {
        let (value, rest) = T::read_from_prefix(self.data).map_err(|_| DecodeError::ShortRead)?;
        self.data = rest;
        Ok(value)
    }

    /// Copy out `count` fixed-layout values.
    pub(crate) fn fetch_vec<T: FromBytes>(&mut self, count: usize) -> Result<Vec<T>, DecodeError> {
        let mut out = Vec::with_capacity(count);
        for _ in 0..count {
            out.push(self.fetch()?);
        }
        Ok(out)
    }

    /// Fetch a length-prefixed, alignment-padded string (may be non-UTF8).
    pub(crate) fn fetch_str(&mut self) -> Result<&'a OsStr, DecodeError> {
        let raw = self.fetch_blob()?;
        Ok(OsStr::from_bytes(raw))
    }

    /// Fetch a length-prefixed, alignment-padded opaque blob.
    pub(crate) fn fetch_blob(&mut self) -> Result<&'a [u8], DecodeError> {
        let len: u32 = self.fetch()?;
        let len = len as usize;
        let padded = padded_len(len);
        if self.data.len() < padded {
            return Err(DecodeError::ShortRead);
        }
        let (bytes, rest) = self.data.split_at(padded);
        self.data = rest;
        Ok(&bytes[..len])
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn blob(bytes: &[u8]) -> Vec<u8> {
        let mut out = (bytes.len() as u32).to_ne_bytes().to_vec();
        out.extend_from_slice(bytes);
        out.resize(4 + padded_len(bytes.len()), 0);
        out
    }

    #[test]
    fn string_roundtrip() {
        let mut data = blob(b"foo");
        data.extend(blob(b"bar"));
        let mut it = ArgumentIterator::new(&data);
        assert_eq!(it.fetch_str().unwrap(), "foo");
        assert_eq!(it.fetch_str().unwrap(), "bar");
        assert_eq!(it.len(), 0);
    }

    #[test]
    fn generic_argument_survives_odd_offsets() {
        // A single leading byte pushes the u64 that follows off any
        // natural alignment boundary; copying must still succeed.
        let mut data = vec![0xffu8];
        data.extend_from_slice(&42u64.to_ne_bytes());
        let mut it = ArgumentIterator::new(&data[1..]);
        let value: u64 = it.fetch().unwrap();
        assert_eq!(value, 42);
    }

    #[test]
    fn short_read() {
        let data = [0u8; 2];
        let mut it = ArgumentIterator::new(&data);
        let res = it.fetch::<u32>();
        assert!(matches!(res, Err(DecodeError::ShortRead)));
    }

    #[test]
    fn short_blob() {
        let mut data = (10u32).to_ne_bytes().to_vec();
        data.extend_from_slice(b"short");
        let mut it = ArgumentIterator::new(&data);
        assert!(matches!(it.fetch_blob(), Err(DecodeError::ShortRead)));
    }
}
