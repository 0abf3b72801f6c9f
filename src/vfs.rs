//! Types and the downward callback surface shared with the host VFS (§6).
//!
//! `HostVfs` is the trait the gateway calls *out to* — get/put/new/publish
//! vnode, notification delivery, select wakeups. The gateway is generic
//! over `H: HostVfs` so it never assumes a particular kernel.

use std::ffi::OsStr;

/// A 64-bit node identifier, unique within one mount.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct Vnid(pub u64);

/// Host-assigned identifier for one mounted volume.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct MountId(pub u64);

/// Opaque handle returned by open-like operations, passed back on
/// subsequent I/O and close.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct Cookie(pub u64);

/// Opaque handle the VFS passes to `select`, used to wake the waiter later.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct SelectSyncToken(pub u64);

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum NodeKind {
    File,
    Directory,
    Symlink,
}

/// The kind of directory-entry event a `notify_listener` call announces.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum NotifyOp {
    EntryCreated,
    EntryRemoved,
    EntryMoved,
    StatChanged,
    AttrChanged,
}

impl NotifyOp {
    /// Per §4.5/§8 property 8: operations that name an entry must carry a
    /// non-empty name.
    pub fn requires_name(self) -> bool {
        matches!(self, NotifyOp::EntryCreated | NotifyOp::EntryRemoved | NotifyOp::EntryMoved)
    }
}

/// Minimal stat block the gateway can synthesize or pass through (§4.4).
#[derive(Debug, Clone, Copy)]
pub struct Stat {
    pub kind: NodeKind,
    pub permissions: u32,
    pub nlink: u32,
    pub size: u64,
}

/// Filesystem-level info returned by read-fs-info, including the
/// disconnected synthesized form (§4.4).
#[derive(Debug, Clone)]
pub struct FsInfo {
    pub block_size: u32,
    pub read_only: bool,
    pub volume_name: String,
}

/// The downward callback surface the gateway requires of its host (§6).
/// All methods take a POSIX-ish `i32` status on the error path so the
/// gateway can propagate it unchanged into a reply.
pub trait HostVfs: Send + Sync + 'static {
    fn get_vnode(&self, mount: MountId, vnid: Vnid) -> Result<(), i32>;
    fn put_vnode(&self, mount: MountId, vnid: Vnid) -> Result<(), i32>;
    fn new_vnode(&self, mount: MountId, vnid: Vnid) -> Result<(), i32>;
    fn publish_vnode(&self, mount: MountId, vnid: Vnid, kind: NodeKind) -> Result<(), i32>;
    fn remove_vnode(&self, mount: MountId, vnid: Vnid) -> Result<(), i32>;
    fn unremove_vnode(&self, mount: MountId, vnid: Vnid) -> Result<(), i32>;
    fn is_vnode_removed(&self, mount: MountId, vnid: Vnid) -> Result<bool, i32>;

    /// `name` is `None` for operations that don't name a specific entry.
    fn notify_listener(
        &self,
        mount: MountId,
        op: NotifyOp,
        vnid: Vnid,
        name: Option<&OsStr>,
    ) -> Result<(), i32>;

    fn notify_select_event(&self, token: SelectSyncToken, event: u8) -> Result<(), i32>;
}
