//! Error taxonomy for the gateway.
//!
//! Every category in the design's error handling section gets exactly one
//! variant here, so callers match on category rather than string-sniffing.
//! `Display`/`Error` are hand-implemented (no `thiserror`) to match the
//! style of the wire-level errors this crate's request parser already used.

use std::fmt;

use crate::port::PortError;
use crate::wire::DecodeError;

/// The five OPEN_* conditions `PutAllPendingVNodes` can fail with, one per
/// open-entity counter that was found non-zero.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum OpenEntityKind {
    Files,
    Directories,
    AttributeDirectories,
    IndexDirectories,
    Queries,
}

impl fmt::Display for OpenEntityKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            OpenEntityKind::Files => "files",
            OpenEntityKind::Directories => "directories",
            OpenEntityKind::AttributeDirectories => "attribute directories",
            OpenEntityKind::IndexDirectories => "index directories",
            OpenEntityKind::Queries => "queries",
        };
        f.write_str(name)
    }
}

/// Failure reasons for `PutAllPendingVNodes` that are not a plain OPEN_* gate.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TeardownError {
    /// The pool is still connected; teardown only runs once disconnected.
    StillConnected,
    /// Counting was already disabled for this volume.
    CountingDisabled,
    /// One of the five open-entity counters was still non-zero.
    Open(OpenEntityKind),
}

impl fmt::Display for TeardownError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            TeardownError::StillConnected => f.write_str("pool is still connected"),
            TeardownError::CountingDisabled => f.write_str("vnode counting already disabled"),
            TeardownError::Open(kind) => write!(f, "open {kind} remain"),
        }
    }
}

impl std::error::Error for TeardownError {}

/// Top-level error returned by every Volume/FileSystem/Gateway operation.
#[derive(Debug)]
pub enum GatewayError {
    /// The server did not advertise the capability, or the command tag is unknown.
    NotSupported,
    /// Allocation failure or port exhaustion.
    Resource(String),
    /// Reply tag mismatch, oversized payload, or malformed frame. One bad
    /// exchange does not disconnect the pool.
    Protocol(DecodeError),
    /// The pool is disconnected; only the §4.4 fallbacks may still succeed.
    Disconnected,
    /// The server itself returned a non-OK status, carried through unchanged.
    Server(i32),
    /// A server-team forward call exceeded its deadline; the port involved
    /// has been permanently closed as a side effect.
    ReentrancyTimeout,
    /// `PutAllPendingVNodes` preconditions failed.
    Teardown(TeardownError),
}

impl fmt::Display for GatewayError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            GatewayError::NotSupported => f.write_str("operation not supported by server"),
            GatewayError::Resource(msg) => write!(f, "resource error: {msg}"),
            GatewayError::Protocol(err) => write!(f, "protocol error: {err}"),
            GatewayError::Disconnected => f.write_str("server connection lost"),
            GatewayError::Server(status) => write!(f, "server returned error {status}"),
            GatewayError::ReentrancyTimeout => f.write_str("reentrant call timed out, port closed"),
            GatewayError::Teardown(err) => write!(f, "teardown refused: {err}"),
        }
    }
}

impl std::error::Error for GatewayError {
    fn source(&self) -> Option<&(dyn std::error::Error + 'static)> {
        match self {
            GatewayError::Protocol(err) => Some(err),
            GatewayError::Teardown(err) => Some(err),
            _ => None,
        }
    }
}

impl From<DecodeError> for GatewayError {
    fn from(err: DecodeError) -> Self {
        GatewayError::Protocol(err)
    }
}

impl From<PortError> for GatewayError {
    fn from(err: PortError) -> Self {
        match err {
            PortError::Disconnected => GatewayError::Disconnected,
            PortError::Exhausted => GatewayError::Resource("no free port".to_owned()),
            PortError::TimedOut => GatewayError::ReentrancyTimeout,
        }
    }
}

impl From<TeardownError> for GatewayError {
    fn from(err: TeardownError) -> Self {
        GatewayError::Teardown(err)
    }
}

/// Well-known `bad-value`/`no-memory` style numeric statuses, for callers
/// that need a POSIX-ish `errno` rather than a typed `GatewayError`.
impl GatewayError {
    pub fn to_errno(&self) -> i32 {
        match self {
            GatewayError::NotSupported => libc::EINVAL,
            GatewayError::Resource(_) => libc::ENOMEM,
            GatewayError::Protocol(_) => libc::EBADMSG,
            GatewayError::Disconnected => libc::ENOLINK,
            GatewayError::Server(status) => *status,
            GatewayError::ReentrancyTimeout => libc::ETIMEDOUT,
            GatewayError::Teardown(TeardownError::StillConnected) => libc::EBUSY,
            GatewayError::Teardown(TeardownError::CountingDisabled) => libc::EALREADY,
            GatewayError::Teardown(TeardownError::Open(_)) => libc::EBUSY,
        }
    }
}

/// Errors raised while loading or validating a driver-settings document.
#[derive(Debug)]
pub enum ConfigError {
    Io(std::io::Error),
    Parse(toml::de::Error),
    DuplicateFlavor(String),
    DuplicateIoctlCommand { flavor: String, command: u32 },
    InvalidIoctl { flavor: String, command: u32, reason: &'static str },
}

impl fmt::Display for ConfigError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ConfigError::Io(err) => write!(f, "could not read settings file: {err}"),
            ConfigError::Parse(err) => write!(f, "could not parse settings document: {err}"),
            ConfigError::DuplicateFlavor(name) => write!(f, "flavor '{name}' declared twice"),
            ConfigError::DuplicateIoctlCommand { flavor, command } => {
                write!(f, "flavor '{flavor}' declares ioctl {command} twice")
            }
            ConfigError::InvalidIoctl { flavor, command, reason } => {
                write!(f, "flavor '{flavor}' ioctl {command}: {reason}")
            }
        }
    }
}

impl std::error::Error for ConfigError {
    fn source(&self) -> Option<&(dyn std::error::Error + 'static)> {
        match self {
            ConfigError::Io(err) => Some(err),
            ConfigError::Parse(err) => Some(err),
            _ => None,
        }
    }
}

impl From<ConfigError> for GatewayError {
    fn from(err: ConfigError) -> Self {
        GatewayError::Resource(err.to_string())
    }
}
