//! Kernel-side gateway for a userland filesystem framework.
//!
//! Bridges a host VFS to a userspace FS server process over a bounded pool
//! of bidirectional message ports. Three concerns carry the weight: per-
//! volume request dispatch (`volume`), vnode reference accounting and
//! disconnect-safe teardown (`vnode_counter`), and an asynchronous
//! notification back-channel (`notification`) that runs the reverse path
//! with the same termination discipline as the forward one.

#![warn(missing_debug_implementations, rust_2018_idioms, unreachable_pub)]

mod capabilities;
mod config;
mod error;
mod file_system;
mod gateway;
mod ioctl;
mod notification;
mod port;
mod request_handler;
mod select_sync;
mod vfs;
mod vnode_counter;
mod volume;
mod wire;

pub use crate::capabilities::Capabilities;
pub use crate::config::{FlavorSettings, IoctlDescriptor, IoctlRegistry, Settings};
pub use crate::error::{ConfigError, GatewayError, OpenEntityKind, TeardownError};
pub use crate::file_system::{FileSystem, current_thread_is_server_team, mark_current_thread_as_server_team};
pub use crate::gateway::{ConnectedEndpoints, Gateway};
pub use crate::ioctl::{Classification, WellKnownIoctl};
pub use crate::port::{AcquiredPort, Port, PortError, PortPool, ServerEndpoint};
pub use crate::vfs::{Cookie, FsInfo, HostVfs, MountId, NodeKind, NotifyOp, SelectSyncToken, Stat, Vnid};
pub use crate::vnode_counter::{DecrementError, VNodeCounter};
pub use crate::volume::Volume;
pub use crate::wire::{
    AllocationError, DEFAULT_REGION_CAPACITY, DecodeError, RequestAllocator, Tag, decode_frame, encode_frame, encode_reply, encode_status_reply,
};

#[cfg(test)]
mod fake_server;

#[cfg(test)]
pub(crate) use fake_server::{FakeServer, RecordingHostVfs};
