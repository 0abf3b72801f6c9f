//! IOCtl classification and validation (§4.8, §6 "IOCtl constants").

use crate::config::{IoctlDescriptor, IoctlRegistry};

/// 20-byte magic prefix a framework-internal IOCtl argument must begin
/// with. Arbitrary but fixed, like any other wire constant not otherwise
/// pinned down by a real deployment's registry.
pub const FRAMEWORK_MAGIC: [u8; 20] = *b"userlandfs-gateway-1";

pub const PROTOCOL_VERSION: u32 = 1;

/// The only framework-internal command defined: trigger
/// `PutAllPendingVNodes` on the owning volume.
pub const COMMAND_PUT_ALL_PENDING_VNODES: u32 = 1;

/// A couple of well-known, server-independent commands every flavor gets
/// for free (§4.8): uncached I/O and create/modified-time retrieval.
pub const WELL_KNOWN_UNCACHED_IO: i32 = -100;
pub const WELL_KNOWN_GET_TIMES: i32 = -101;

/// The reserved command number naming a framework-internal request; its
/// argument buffer carries the magic/version/command triple checked by
/// `parse_framework_argument`.
pub const FRAMEWORK_INTERNAL_COMMAND: i32 = -1;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum WellKnownIoctl {
    UncachedIo,
    GetTimes,
}

#[derive(Debug)]
pub enum Classification<'a> {
    WellKnown(WellKnownIoctl),
    FrameworkInternal,
    ServerDefined(&'a IoctlDescriptor),
    Unknown,
}

pub fn classify<'a>(command: i32, registry: &'a IoctlRegistry) -> Classification<'a> {
    match command {
        WELL_KNOWN_UNCACHED_IO => Classification::WellKnown(WellKnownIoctl::UncachedIo),
        WELL_KNOWN_GET_TIMES => Classification::WellKnown(WellKnownIoctl::GetTimes),
        FRAMEWORK_INTERNAL_COMMAND => Classification::FrameworkInternal,
        _ if command >= 0 => {
            if let Some(descriptor) = registry.get(command as u32) {
                Classification::ServerDefined(descriptor)
            } else {
                Classification::Unknown
            }
        }
        _ => Classification::Unknown,
    }
}

/// Parses a framework-internal argument, validating the magic prefix and
/// protocol version (§6, scenario S6). Returns the embedded command on
/// success.
pub fn parse_framework_argument(buffer: &[u8]) -> Option<u32> {
    const HEADER_LEN: usize = 20 + 4 + 4;
    if buffer.len() < HEADER_LEN {
        return None;
    }
    if buffer[0..20] != FRAMEWORK_MAGIC {
        return None;
    }
    let version = u32::from_ne_bytes(buffer[20..24].try_into().unwrap());
    if version != PROTOCOL_VERSION {
        return None;
    }
    Some(u32::from_ne_bytes(buffer[24..28].try_into().unwrap()))
}

/// Validate a server-defined IOCtl's buffer against its descriptor (§4.8):
/// the region must be at least `buffer_size` readable bytes, and if
/// `write_buffer_size` is non-zero the region must additionally be
/// writable for that many bytes. In-process, "writable" just means the
/// caller handed us `&mut [u8]`, which the type system already enforces;
/// what's left to check is that it's long enough both ways.
pub fn validate_buffer(descriptor: &IoctlDescriptor, buffer_len: usize) -> bool {
    if !descriptor.is_buffer {
        return true;
    }
    if buffer_len < descriptor.buffer_size as usize {
        return false;
    }
    if descriptor.write_buffer_size > 0 && buffer_len < descriptor.write_buffer_size as usize {
        return false;
    }
    true
}
