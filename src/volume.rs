//! Per-mount Volume: every upward VFS hook funnels through here (§3, §4.2,
//! §4.4, §4.6).
//!
//! Most hooks share one of a handful of shapes — a bare status call, a
//! call returning a cookie that feeds an open-entity counter, a call
//! copying variable-size data into a caller buffer. Rather than hand-roll
//! sixty near-identical bodies, the shape is written once (`status_call`,
//! `open_call`, `close_call`, `free_cookie_call`, `data_call`) and every
//! hook is a thin, typed wrapper naming its tag and capability. The handful
//! of hooks with their own accounting rules (lookup, create, read-fs-info,
//! ioctl, put-all-pending-vnodes) are written out in full.

use std::ffi::OsStr;
use std::os::unix::ffi::OsStrExt;
use std::sync::{Arc, Weak};
use std::sync::atomic::{AtomicI32, Ordering};
use std::time::Duration;

use crate::capabilities::Capabilities;
use crate::config::IoctlRegistry;
use crate::error::{GatewayError, OpenEntityKind, TeardownError};
use crate::file_system::FileSystem;
use crate::ioctl::{self, Classification};
use crate::vfs::{Cookie, FsInfo, HostVfs, MountId, NodeKind, SelectSyncToken, Stat, Vnid};
use crate::vnode_counter::VNodeCounter;
use crate::wire::{AllocationError, RequestAllocator, Tag};

const REENTRANT_DEADLINE: Duration = Duration::from_secs(10);

/// The five open-entity counters that gate disconnected teardown (§3, §4.6).
/// Attributes themselves are deliberately not counted (§9 open question b).
#[derive(Default, Debug)]
pub struct OpenEntityCounters {
    files: AtomicI32,
    directories: AtomicI32,
    attribute_directories: AtomicI32,
    index_directories: AtomicI32,
    queries: AtomicI32,
}

impl OpenEntityCounters {
    fn slot(&self, kind: OpenEntityKind) -> &AtomicI32 {
        match kind {
            OpenEntityKind::Files => &self.files,
            OpenEntityKind::Directories => &self.directories,
            OpenEntityKind::AttributeDirectories => &self.attribute_directories,
            OpenEntityKind::IndexDirectories => &self.index_directories,
            OpenEntityKind::Queries => &self.queries,
        }
    }

    fn increment(&self, kind: OpenEntityKind) {
        self.slot(kind).fetch_add(1, Ordering::AcqRel);
    }

    /// Decrements and returns the counter's new value.
    fn decrement(&self, kind: OpenEntityKind) -> i32 {
        self.slot(kind).fetch_sub(1, Ordering::AcqRel) - 1
    }

    /// The first non-zero counter, checked in a fixed order, or `None` if
    /// all five are quiescent.
    fn first_open(&self) -> Option<OpenEntityKind> {
        const ALL: [OpenEntityKind; 5] = [
            OpenEntityKind::Files,
            OpenEntityKind::Directories,
            OpenEntityKind::AttributeDirectories,
            OpenEntityKind::IndexDirectories,
            OpenEntityKind::Queries,
        ];
        ALL.into_iter().find(|&kind| self.slot(kind).load(Ordering::Acquire) != 0)
    }
}

/// Per-mount state implementing every VFS entry point (§3).
pub struct Volume<H: HostVfs> {
    fs: Weak<FileSystem<H>>,
    mount_id: MountId,
    root_vnid: Vnid,
    server_handle: u64,
    capabilities: Capabilities,
    counters: OpenEntityCounters,
    vnodes: VNodeCounter,
}

// `H` need not be `Debug` for this to be meaningful; the interesting state
// is the mount identity and accounting, not the host callback object.
impl<H: HostVfs> std::fmt::Debug for Volume<H> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Volume")
            .field("mount_id", &self.mount_id)
            .field("root_vnid", &self.root_vnid)
            .field("capabilities", &self.capabilities)
            .field("counters", &self.counters)
            .field("vnodes", &self.vnodes)
            .field("connected", &!self.is_disconnected())
            .finish()
    }
}

impl<H: HostVfs> Volume<H> {
    pub(crate) fn new(
        fs: Weak<FileSystem<H>>,
        mount_id: MountId,
        root_vnid: Vnid,
        server_handle: u64,
        capabilities: Capabilities,
    ) -> Self {
        Volume {
            fs,
            mount_id,
            root_vnid,
            server_handle,
            capabilities,
            counters: OpenEntityCounters::default(),
            vnodes: VNodeCounter::new(),
        }
    }

    /// Performs the mount-volume wire exchange (§4.2, §4.7). No `Volume`
    /// exists yet at this point — there is no `server_handle` to prefix the
    /// request with — so this acquires a port straight from the pool rather
    /// than going through `exchange`, and builds the `Volume` itself from
    /// the reply's root vnid, server-assigned handle, and capability set.
    pub(crate) fn mount(
        fs: &Arc<FileSystem<H>>,
        mount_id: MountId,
        device: &OsStr,
        flags: u32,
        parameters: &OsStr,
    ) -> Result<Self, GatewayError> {
        let acquired = fs.pool().acquire().ok_or(GatewayError::Disconnected)?;
        let mut alloc = RequestAllocator::new(Tag::MountVolume, acquired.port().capacity());
        let build = |alloc: &mut RequestAllocator| -> Result<(), AllocationError> {
            alloc.put(&mount_id.0)?;
            alloc.put(&flags)?;
            alloc.allocate_string(device.as_bytes())?;
            alloc.allocate_string(parameters.as_bytes())
        };
        build(&mut alloc).map_err(|AllocationError| GatewayError::Resource("mount request region exhausted".to_owned()))?;
        let frame = alloc.finish();
        let reply = acquired.port().send_and_receive(frame)?;
        let mut view = crate::wire::decode_reply(&reply, Tag::MountVolume)?;
        if view.status != 0 {
            return Err(GatewayError::Server(view.status));
        }
        let root_vnid = Vnid(view.payload.fetch()?);
        let server_handle: u64 = view.payload.fetch()?;
        let capabilities = Capabilities::from_bits_truncate(view.payload.fetch()?);
        if capabilities.is_empty() {
            log::warn!("rejecting mount {mount_id:?}: server advertised no capabilities");
            return Err(GatewayError::NotSupported);
        }
        Ok(Volume::new(Arc::downgrade(fs), mount_id, root_vnid, server_handle, capabilities))
    }

    pub fn mount_id(&self) -> MountId {
        self.mount_id
    }

    pub fn root_vnid(&self) -> Vnid {
        self.root_vnid
    }

    pub fn capabilities(&self) -> Capabilities {
        self.capabilities
    }

    pub fn vnode_counter(&self) -> &VNodeCounter {
        &self.vnodes
    }

    fn is_disconnected(&self) -> bool {
        match self.fs.upgrade() {
            Some(fs) => fs.pool().is_disconnected(),
            None => true,
        }
    }

    // ---- §4.2 / §4.3: the core forward-dispatch shape ----------------

    /// Step 1-2, 5, 10: capability gate, port acquire, send-and-await,
    /// scoped release. `cap = None` bypasses the gate for lifecycle calls
    /// (mount/unmount/sync) that have no capability bit of their own.
    fn exchange(
        &self,
        tag: Tag,
        cap: Option<Capabilities>,
        build: impl FnOnce(&mut RequestAllocator) -> Result<(), AllocationError>,
    ) -> Result<Vec<u8>, GatewayError> {
        if let Some(cap) = cap {
            if !self.capabilities.contains(cap) {
                return Err(GatewayError::NotSupported);
            }
        }
        let fs = self.fs.upgrade().ok_or(GatewayError::Disconnected)?;
        let acquired = fs.pool().acquire().ok_or(GatewayError::Disconnected)?;
        let mut alloc = RequestAllocator::new(tag, acquired.port().capacity());
        alloc
            .put(&self.server_handle)
            .and_then(|_| build(&mut alloc))
            .map_err(|AllocationError| GatewayError::Resource("request region exhausted".to_owned()))?;
        let frame = alloc.finish();
        let deadline = if fs.current_thread_is_server_team() {
            Some(REENTRANT_DEADLINE)
        } else {
            None
        };
        let reply = acquired.port().send_and_receive_with_deadline(frame, deadline)?;
        if tag.reply_carries_data() {
            if let Ok((_, body)) = crate::wire::decode_frame(&reply) {
                if body.len() >= 4 && i32::from_ne_bytes(body[0..4].try_into().unwrap()) == 0 {
                    let _ = acquired.port().send_only(crate::wire::encode_frame(Tag::ReceiptAck, &[]));
                }
            }
        }
        Ok(reply)
    }

    /// A call whose reply carries only a status, no payload.
    fn status_call(
        &self,
        tag: Tag,
        cap: Option<Capabilities>,
        build: impl FnOnce(&mut RequestAllocator) -> Result<(), AllocationError>,
    ) -> Result<(), GatewayError> {
        let frame = self.exchange(tag, cap, build)?;
        let view = crate::wire::decode_reply(&frame, tag)?;
        if view.status != 0 {
            return Err(GatewayError::Server(view.status));
        }
        Ok(())
    }

    /// A call whose reply carries status plus a variable-size payload
    /// copied into the caller's buffer (§4.2 step 8).
    fn data_call(
        &self,
        tag: Tag,
        cap: Option<Capabilities>,
        build: impl FnOnce(&mut RequestAllocator) -> Result<(), AllocationError>,
        out: &mut [u8],
    ) -> Result<usize, GatewayError> {
        let frame = self.exchange(tag, cap, build)?;
        let mut view = crate::wire::decode_reply(&frame, tag)?;
        if view.status != 0 {
            return Err(GatewayError::Server(view.status));
        }
        let data = view.payload.fetch_all();
        if data.len() > out.len() {
            return Err(GatewayError::Protocol(crate::wire::DecodeError::ShortRead));
        }
        out[..data.len()].copy_from_slice(data);
        Ok(data.len())
    }

    /// A call that opens an entity and returns a cookie, incrementing the
    /// matching open-entity counter on success.
    fn open_call(
        &self,
        tag: Tag,
        cap: Capabilities,
        kind: OpenEntityKind,
        build: impl FnOnce(&mut RequestAllocator) -> Result<(), AllocationError>,
    ) -> Result<Cookie, GatewayError> {
        let frame = self.exchange(tag, Some(cap), build)?;
        let mut view = crate::wire::decode_reply(&frame, tag)?;
        if view.status != 0 {
            return Err(GatewayError::Server(view.status));
        }
        let raw: u64 = view.payload.fetch()?;
        self.counters.increment(kind);
        Ok(Cookie(raw))
    }

    /// A plain close, OK on a disconnected pool (§4.4).
    fn close_call(&self, tag: Tag, cap: Capabilities, cookie: Cookie) -> Result<(), GatewayError> {
        if self.is_disconnected() {
            return Ok(());
        }
        self.status_call(tag, Some(cap), |alloc| alloc.put(&cookie.0))
    }

    /// A free-cookie call: OK on a disconnected pool, decrementing the
    /// relevant counter and, at zero, invoking `PutAllPendingVNodes` (§4.4
    /// final paragraph).
    fn free_cookie_call(
        &self,
        tag: Tag,
        cap: Capabilities,
        kind: OpenEntityKind,
        cookie: Cookie,
    ) -> Result<(), GatewayError> {
        if self.is_disconnected() {
            let remaining = self.counters.decrement(kind);
            if remaining <= 0 {
                self.put_all_pending_vnodes()?;
            }
            return Ok(());
        }
        self.status_call(tag, Some(cap), |alloc| alloc.put(&cookie.0))?;
        self.counters.decrement(kind);
        Ok(())
    }

    // ---- Lifecycle ------------------------------------------------------

    pub fn unmount(&self) -> Result<(), GatewayError> {
        self.status_call(Tag::UnmountVolume, None, |_| Ok(()))
    }

    pub fn sync(&self) -> Result<(), GatewayError> {
        self.status_call(Tag::Sync, Some(Capabilities::SYNC), |_| Ok(()))
    }

    /// Disconnected fallback synthesizes a persistent read-only info block
    /// (§4.4).
    pub fn read_fs_info(&self, flavor: &str) -> Result<FsInfo, GatewayError> {
        if self.is_disconnected() {
            return Ok(FsInfo {
                block_size: 512,
                read_only: true,
                volume_name: format!("{flavor}:disconnected"),
            });
        }
        let mut buf = [0u8; 256];
        let len = self.data_call(Tag::ReadFsStat, Some(Capabilities::READ_FS_STAT), |_| Ok(()), &mut buf)?;
        decode_fs_info(&buf[..len])
    }

    pub fn write_fs_info(&self, info: &FsInfo) -> Result<(), GatewayError> {
        self.status_call(Tag::WriteFsStat, Some(Capabilities::WRITE_FS_STAT), |alloc| {
            alloc.put(&info.block_size)?;
            alloc.put(&(info.read_only as u8))?;
            alloc.allocate_string(info.volume_name.as_bytes())
        })
    }

    pub fn read_vnode(&self, vnid: Vnid) -> Result<NodeKind, GatewayError> {
        let frame = self.exchange(Tag::ReadVnode, Some(Capabilities::READ_VNODE), |alloc| alloc.put(&vnid.0))?;
        let mut view = crate::wire::decode_reply(&frame, Tag::ReadVnode)?;
        if view.status != 0 {
            return Err(GatewayError::Server(view.status));
        }
        let kind: u8 = view.payload.fetch()?;
        decode_node_kind(kind)
    }

    /// OK on a disconnected pool (§4.4).
    pub fn write_vnode(&self, vnid: Vnid) -> Result<(), GatewayError> {
        if self.is_disconnected() {
            return Ok(());
        }
        self.status_call(Tag::WriteVnode, Some(Capabilities::WRITE_VNODE), |alloc| alloc.put(&vnid.0))
    }

    pub fn remove_vnode(&self, vnid: Vnid) -> Result<(), GatewayError> {
        self.status_call(Tag::RemoveVnode, Some(Capabilities::REMOVE_VNODE), |alloc| alloc.put(&vnid.0))
    }

    /// §4.6: decrements the target vnid on success (the VFS itself takes
    /// the balancing reference). §4.4: "." on the root node is answered
    /// locally while disconnected, no wire round trip — but the reference
    /// is still real, so `HostVfs::get_vnode` is still called on the root
    /// node before returning (net-zero against the decrement a connected
    /// lookup would have done, Testable Property 7).
    pub fn lookup(&self, parent: Vnid, name: &OsStr) -> Result<(Vnid, NodeKind), GatewayError> {
        if self.is_disconnected() {
            if parent == self.root_vnid && name == "." {
                let fs = self.fs.upgrade().ok_or(GatewayError::Disconnected)?;
                fs.vfs().get_vnode(self.mount_id, self.root_vnid).map_err(GatewayError::Server)?;
                return Ok((self.root_vnid, NodeKind::Directory));
            }
            return Err(GatewayError::Disconnected);
        }
        let frame = self.exchange(Tag::Lookup, Some(Capabilities::LOOKUP), |alloc| {
            alloc.put(&parent.0)?;
            alloc.allocate_string(name.as_bytes())
        })?;
        let mut view = crate::wire::decode_reply(&frame, Tag::Lookup)?;
        if view.status != 0 {
            return Err(GatewayError::Server(view.status));
        }
        let vnid: u64 = view.payload.fetch()?;
        let kind: u8 = view.payload.fetch()?;
        let vnid = Vnid(vnid);
        let _ = self.vnodes.decrement(vnid);
        Ok((vnid, decode_node_kind(kind)?))
    }

    pub fn get_vnode_name(&self, vnid: Vnid, out: &mut [u8]) -> Result<usize, GatewayError> {
        self.data_call(Tag::GetVnodeName, Some(Capabilities::GET_VNODE_NAME), |alloc| alloc.put(&vnid.0), out)
    }

    /// Disconnected fallback synthesizes a directory stat for the root node
    /// only (§4.4); all other nodes propagate the disconnection.
    pub fn read_stat(&self, vnid: Vnid) -> Result<Stat, GatewayError> {
        if self.is_disconnected() {
            if vnid == self.root_vnid {
                return Ok(Stat { kind: NodeKind::Directory, permissions: 0o777, nlink: 1, size: 512 });
            }
            return Err(GatewayError::Disconnected);
        }
        let mut buf = [0u8; 32];
        let len = self.data_call(Tag::ReadStat, Some(Capabilities::READ_STAT), |alloc| alloc.put(&vnid.0), &mut buf)?;
        decode_stat(&buf[..len])
    }

    pub fn write_stat(&self, vnid: Vnid, stat: &Stat, mask: u32) -> Result<(), GatewayError> {
        self.status_call(Tag::WriteStat, Some(Capabilities::WRITE_STAT), |alloc| {
            alloc.put(&vnid.0)?;
            alloc.put(&(stat.permissions))?;
            alloc.put(&(stat.nlink))?;
            alloc.put(&(stat.size))?;
            alloc.put(&mask)
        })
    }

    pub fn access(&self, vnid: Vnid, mode: u32) -> Result<(), GatewayError> {
        self.status_call(Tag::Access, Some(Capabilities::ACCESS), |alloc| {
            alloc.put(&vnid.0)?;
            alloc.put(&mode)
        })
    }

    pub fn fsync(&self, vnid: Vnid) -> Result<(), GatewayError> {
        self.status_call(Tag::FSync, Some(Capabilities::FSYNC), |alloc| alloc.put(&vnid.0))
    }

    // ---- Files -----------------------------------------------------------

    /// §4.6: decrements the new vnid on success (the VFS will balance it).
    pub fn create(&self, parent: Vnid, name: &OsStr, mode: u32) -> Result<(Vnid, Cookie), GatewayError> {
        let frame = self.exchange(Tag::Create, Some(Capabilities::CREATE), |alloc| {
            alloc.put(&parent.0)?;
            alloc.put(&mode)?;
            alloc.allocate_string(name.as_bytes())
        })?;
        let mut view = crate::wire::decode_reply(&frame, Tag::Create)?;
        if view.status != 0 {
            return Err(GatewayError::Server(view.status));
        }
        let vnid: u64 = view.payload.fetch()?;
        let cookie: u64 = view.payload.fetch()?;
        let vnid = Vnid(vnid);
        let _ = self.vnodes.decrement(vnid);
        self.counters.increment(OpenEntityKind::Files);
        Ok((vnid, Cookie(cookie)))
    }

    pub fn open(&self, vnid: Vnid, flags: u32) -> Result<Cookie, GatewayError> {
        self.open_call(Tag::Open, Capabilities::OPEN, OpenEntityKind::Files, |alloc| {
            alloc.put(&vnid.0)?;
            alloc.put(&flags)
        })
    }

    pub fn close(&self, cookie: Cookie) -> Result<(), GatewayError> {
        self.close_call(Tag::Close, Capabilities::CLOSE, cookie)
    }

    pub fn free_cookie(&self, cookie: Cookie) -> Result<(), GatewayError> {
        self.free_cookie_call(Tag::FreeCookie, Capabilities::FREE_COOKIE, OpenEntityKind::Files, cookie)
    }

    pub fn read(&self, cookie: Cookie, offset: u64, out: &mut [u8]) -> Result<usize, GatewayError> {
        let len = out.len() as u32;
        self.data_call(
            Tag::Read,
            Some(Capabilities::READ),
            |alloc| {
                alloc.put(&cookie.0)?;
                alloc.put(&offset)?;
                alloc.put(&len)
            },
            out,
        )
    }

    pub fn write(&self, cookie: Cookie, offset: u64, data: &[u8]) -> Result<usize, GatewayError> {
        let frame = self.exchange(Tag::Write, Some(Capabilities::WRITE), |alloc| {
            alloc.put(&cookie.0)?;
            alloc.put(&offset)?;
            alloc.allocate_data(data)
        })?;
        let mut view = crate::wire::decode_reply(&frame, Tag::Write)?;
        if view.status != 0 {
            return Err(GatewayError::Server(view.status));
        }
        let written: u32 = view.payload.fetch()?;
        Ok(written as usize)
    }

    /// §4.8: classifies before ever contacting the server; unknown commands
    /// never reach the wire.
    pub fn ioctl(&self, registry: &IoctlRegistry, command: i32, buffer: &mut [u8]) -> Result<usize, GatewayError> {
        match ioctl::classify(command, registry) {
            Classification::Unknown => Err(GatewayError::NotSupported),
            Classification::WellKnown(_) => {
                let input = buffer.to_vec();
                self.status_call(Tag::IoCtl, Some(Capabilities::IOCTL), |alloc| {
                    alloc.put(&command)?;
                    alloc.allocate_data(&input)
                })?;
                Ok(0)
            }
            Classification::FrameworkInternal => match ioctl::parse_framework_argument(buffer) {
                Some(ioctl::COMMAND_PUT_ALL_PENDING_VNODES) => {
                    self.put_all_pending_vnodes()?;
                    Ok(0)
                }
                _ => Err(GatewayError::NotSupported),
            },
            Classification::ServerDefined(descriptor) => {
                if !ioctl::validate_buffer(descriptor, buffer.len()) {
                    return Err(GatewayError::NotSupported);
                }
                let input = buffer.to_vec();
                self.data_call(
                    Tag::IoCtl,
                    Some(Capabilities::IOCTL),
                    |alloc| {
                        alloc.put(&command)?;
                        alloc.allocate_data(&input)
                    },
                    buffer,
                )
            }
        }
    }

    pub fn set_flags(&self, cookie: Cookie, flags: u32) -> Result<(), GatewayError> {
        self.status_call(Tag::SetFlags, Some(Capabilities::SET_FLAGS), |alloc| {
            alloc.put(&cookie.0)?;
            alloc.put(&flags)
        })
    }

    pub fn select(&self, cookie: Cookie, event: u8, token: SelectSyncToken) -> Result<(), GatewayError> {
        self.status_call(Tag::Select, Some(Capabilities::SELECT), |alloc| {
            alloc.put(&cookie.0)?;
            alloc.put(&event)?;
            alloc.put(&token.0)
        })
    }

    pub fn deselect(&self, cookie: Cookie, event: u8, token: SelectSyncToken) -> Result<(), GatewayError> {
        self.status_call(Tag::Deselect, Some(Capabilities::DESELECT), |alloc| {
            alloc.put(&cookie.0)?;
            alloc.put(&event)?;
            alloc.put(&token.0)
        })
    }

    // ---- Links -------------------------------------------------------

    pub fn create_symlink(&self, parent: Vnid, name: &OsStr, target: &OsStr, mode: u32) -> Result<Vnid, GatewayError> {
        let frame = self.exchange(Tag::CreateSymlink, Some(Capabilities::CREATE_SYMLINK), |alloc| {
            alloc.put(&parent.0)?;
            alloc.put(&mode)?;
            alloc.allocate_string(name.as_bytes())?;
            alloc.allocate_string(target.as_bytes())
        })?;
        let mut view = crate::wire::decode_reply(&frame, Tag::CreateSymlink)?;
        if view.status != 0 {
            return Err(GatewayError::Server(view.status));
        }
        Ok(Vnid(view.payload.fetch()?))
    }

    pub fn read_symlink(&self, vnid: Vnid, out: &mut [u8]) -> Result<usize, GatewayError> {
        self.data_call(Tag::ReadSymlink, Some(Capabilities::READ_SYMLINK), |alloc| alloc.put(&vnid.0), out)
    }

    pub fn link(&self, parent: Vnid, name: &OsStr, target: Vnid) -> Result<(), GatewayError> {
        self.status_call(Tag::Link, Some(Capabilities::LINK), |alloc| {
            alloc.put(&parent.0)?;
            alloc.put(&target.0)?;
            alloc.allocate_string(name.as_bytes())
        })
    }

    pub fn unlink(&self, parent: Vnid, name: &OsStr) -> Result<(), GatewayError> {
        self.status_call(Tag::Unlink, Some(Capabilities::UNLINK), |alloc| {
            alloc.put(&parent.0)?;
            alloc.allocate_string(name.as_bytes())
        })
    }

    pub fn rename(&self, old_parent: Vnid, old_name: &OsStr, new_parent: Vnid, new_name: &OsStr) -> Result<(), GatewayError> {
        self.status_call(Tag::Rename, Some(Capabilities::RENAME), |alloc| {
            alloc.put(&old_parent.0)?;
            alloc.put(&new_parent.0)?;
            alloc.allocate_string(old_name.as_bytes())?;
            alloc.allocate_string(new_name.as_bytes())
        })
    }

    // ---- Directories -------------------------------------------------

    pub fn create_dir(&self, parent: Vnid, name: &OsStr, mode: u32) -> Result<Vnid, GatewayError> {
        let frame = self.exchange(Tag::CreateDir, Some(Capabilities::CREATE_DIR), |alloc| {
            alloc.put(&parent.0)?;
            alloc.put(&mode)?;
            alloc.allocate_string(name.as_bytes())
        })?;
        let mut view = crate::wire::decode_reply(&frame, Tag::CreateDir)?;
        if view.status != 0 {
            return Err(GatewayError::Server(view.status));
        }
        let vnid = Vnid(view.payload.fetch()?);
        let _ = self.vnodes.decrement(vnid);
        Ok(vnid)
    }

    pub fn remove_dir(&self, parent: Vnid, name: &OsStr) -> Result<(), GatewayError> {
        self.status_call(Tag::RemoveDir, Some(Capabilities::REMOVE_DIR), |alloc| {
            alloc.put(&parent.0)?;
            alloc.allocate_string(name.as_bytes())
        })
    }

    pub fn open_dir(&self, vnid: Vnid) -> Result<Cookie, GatewayError> {
        self.open_call(Tag::OpenDir, Capabilities::OPEN_DIR, OpenEntityKind::Directories, |alloc| alloc.put(&vnid.0))
    }

    pub fn close_dir(&self, cookie: Cookie) -> Result<(), GatewayError> {
        self.close_call(Tag::CloseDir, Capabilities::CLOSE_DIR, cookie)
    }

    pub fn free_dir_cookie(&self, cookie: Cookie) -> Result<(), GatewayError> {
        self.free_cookie_call(Tag::FreeDirCookie, Capabilities::FREE_DIR_COOKIE, OpenEntityKind::Directories, cookie)
    }

    pub fn read_dir(&self, cookie: Cookie, out: &mut [u8]) -> Result<usize, GatewayError> {
        self.data_call(Tag::ReadDir, Some(Capabilities::READ_DIR), |alloc| alloc.put(&cookie.0), out)
    }

    pub fn rewind_dir(&self, cookie: Cookie) -> Result<(), GatewayError> {
        self.status_call(Tag::RewindDir, Some(Capabilities::REWIND_DIR), |alloc| alloc.put(&cookie.0))
    }

    // ---- Attribute directories ----------------------------------------

    pub fn open_attr_dir(&self, vnid: Vnid) -> Result<Cookie, GatewayError> {
        self.open_call(Tag::OpenAttrDir, Capabilities::OPEN_ATTR_DIR, OpenEntityKind::AttributeDirectories, |alloc| {
            alloc.put(&vnid.0)
        })
    }

    pub fn close_attr_dir(&self, cookie: Cookie) -> Result<(), GatewayError> {
        self.close_call(Tag::CloseAttrDir, Capabilities::CLOSE_ATTR_DIR, cookie)
    }

    pub fn free_attr_dir_cookie(&self, cookie: Cookie) -> Result<(), GatewayError> {
        self.free_cookie_call(
            Tag::FreeAttrDirCookie,
            Capabilities::FREE_ATTR_DIR_COOKIE,
            OpenEntityKind::AttributeDirectories,
            cookie,
        )
    }

    pub fn read_attr_dir(&self, cookie: Cookie, out: &mut [u8]) -> Result<usize, GatewayError> {
        self.data_call(Tag::ReadAttrDir, Some(Capabilities::READ_ATTR_DIR), |alloc| alloc.put(&cookie.0), out)
    }

    pub fn rewind_attr_dir(&self, cookie: Cookie) -> Result<(), GatewayError> {
        self.status_call(Tag::RewindAttrDir, Some(Capabilities::REWIND_ATTR_DIR), |alloc| alloc.put(&cookie.0))
    }

    // ---- Attributes (not counted: §9 open question b) -----------------

    pub fn create_attr(&self, vnid: Vnid, name: &OsStr, attr_type: u32) -> Result<Cookie, GatewayError> {
        let frame = self.exchange(Tag::CreateAttr, Some(Capabilities::CREATE_ATTR), |alloc| {
            alloc.put(&vnid.0)?;
            alloc.put(&attr_type)?;
            alloc.allocate_string(name.as_bytes())
        })?;
        let mut view = crate::wire::decode_reply(&frame, Tag::CreateAttr)?;
        if view.status != 0 {
            return Err(GatewayError::Server(view.status));
        }
        Ok(Cookie(view.payload.fetch()?))
    }

    pub fn open_attr(&self, vnid: Vnid, name: &OsStr) -> Result<Cookie, GatewayError> {
        let frame = self.exchange(Tag::OpenAttr, Some(Capabilities::OPEN_ATTR), |alloc| {
            alloc.put(&vnid.0)?;
            alloc.allocate_string(name.as_bytes())
        })?;
        let mut view = crate::wire::decode_reply(&frame, Tag::OpenAttr)?;
        if view.status != 0 {
            return Err(GatewayError::Server(view.status));
        }
        Ok(Cookie(view.payload.fetch()?))
    }

    pub fn close_attr(&self, cookie: Cookie) -> Result<(), GatewayError> {
        self.close_call(Tag::CloseAttr, Capabilities::CLOSE_ATTR, cookie)
    }

    pub fn free_attr_cookie(&self, cookie: Cookie) -> Result<(), GatewayError> {
        if self.is_disconnected() {
            return Ok(());
        }
        self.status_call(Tag::FreeAttrCookie, Some(Capabilities::FREE_ATTR_COOKIE), |alloc| alloc.put(&cookie.0))
    }

    pub fn read_attr(&self, cookie: Cookie, offset: u64, out: &mut [u8]) -> Result<usize, GatewayError> {
        let len = out.len() as u32;
        self.data_call(
            Tag::ReadAttr,
            Some(Capabilities::READ_ATTR),
            |alloc| {
                alloc.put(&cookie.0)?;
                alloc.put(&offset)?;
                alloc.put(&len)
            },
            out,
        )
    }

    pub fn write_attr(&self, cookie: Cookie, offset: u64, data: &[u8]) -> Result<usize, GatewayError> {
        let frame = self.exchange(Tag::WriteAttr, Some(Capabilities::WRITE_ATTR), |alloc| {
            alloc.put(&cookie.0)?;
            alloc.put(&offset)?;
            alloc.allocate_data(data)
        })?;
        let mut view = crate::wire::decode_reply(&frame, Tag::WriteAttr)?;
        if view.status != 0 {
            return Err(GatewayError::Server(view.status));
        }
        Ok(view.payload.fetch::<u32>()? as usize)
    }

    pub fn read_attr_stat(&self, vnid: Vnid, name: &OsStr) -> Result<Stat, GatewayError> {
        let mut buf = [0u8; 32];
        let len = self.data_call(
            Tag::ReadAttrStat,
            Some(Capabilities::READ_ATTR_STAT),
            |alloc| {
                alloc.put(&vnid.0)?;
                alloc.allocate_string(name.as_bytes())
            },
            &mut buf,
        )?;
        decode_stat(&buf[..len])
    }

    pub fn write_attr_stat(&self, vnid: Vnid, name: &OsStr, stat: &Stat, mask: u32) -> Result<(), GatewayError> {
        self.status_call(Tag::WriteAttrStat, Some(Capabilities::WRITE_ATTR_STAT), |alloc| {
            alloc.put(&vnid.0)?;
            alloc.put(&stat.permissions)?;
            alloc.put(&stat.nlink)?;
            alloc.put(&stat.size)?;
            alloc.put(&mask)?;
            alloc.allocate_string(name.as_bytes())
        })
    }

    pub fn rename_attr(&self, vnid: Vnid, old_name: &OsStr, new_name: &OsStr) -> Result<(), GatewayError> {
        self.status_call(Tag::RenameAttr, Some(Capabilities::RENAME_ATTR), |alloc| {
            alloc.put(&vnid.0)?;
            alloc.allocate_string(old_name.as_bytes())?;
            alloc.allocate_string(new_name.as_bytes())
        })
    }

    pub fn remove_attr(&self, vnid: Vnid, name: &OsStr) -> Result<(), GatewayError> {
        self.status_call(Tag::RemoveAttr, Some(Capabilities::REMOVE_ATTR), |alloc| {
            alloc.put(&vnid.0)?;
            alloc.allocate_string(name.as_bytes())
        })
    }

    // ---- Indices -------------------------------------------------------

    pub fn open_index_dir(&self) -> Result<Cookie, GatewayError> {
        self.open_call(Tag::OpenIndexDir, Capabilities::OPEN_INDEX_DIR, OpenEntityKind::IndexDirectories, |_| Ok(()))
    }

    pub fn close_index_dir(&self, cookie: Cookie) -> Result<(), GatewayError> {
        self.close_call(Tag::CloseIndexDir, Capabilities::CLOSE_INDEX_DIR, cookie)
    }

    pub fn free_index_dir_cookie(&self, cookie: Cookie) -> Result<(), GatewayError> {
        self.free_cookie_call(
            Tag::FreeIndexDirCookie,
            Capabilities::FREE_INDEX_DIR_COOKIE,
            OpenEntityKind::IndexDirectories,
            cookie,
        )
    }

    pub fn read_index_dir(&self, cookie: Cookie, out: &mut [u8]) -> Result<usize, GatewayError> {
        self.data_call(Tag::ReadIndexDir, Some(Capabilities::READ_INDEX_DIR), |alloc| alloc.put(&cookie.0), out)
    }

    pub fn rewind_index_dir(&self, cookie: Cookie) -> Result<(), GatewayError> {
        self.status_call(Tag::RewindIndexDir, Some(Capabilities::REWIND_INDEX_DIR), |alloc| alloc.put(&cookie.0))
    }

    pub fn create_index(&self, name: &OsStr, attr_type: u32, flags: u32) -> Result<(), GatewayError> {
        self.status_call(Tag::CreateIndex, Some(Capabilities::CREATE_INDEX), |alloc| {
            alloc.put(&attr_type)?;
            alloc.put(&flags)?;
            alloc.allocate_string(name.as_bytes())
        })
    }

    pub fn remove_index(&self, name: &OsStr) -> Result<(), GatewayError> {
        self.status_call(Tag::RemoveIndex, Some(Capabilities::REMOVE_INDEX), |alloc| alloc.allocate_string(name.as_bytes()))
    }

    pub fn read_index_stat(&self, name: &OsStr) -> Result<Stat, GatewayError> {
        let mut buf = [0u8; 32];
        let len = self.data_call(
            Tag::ReadIndexStat,
            Some(Capabilities::READ_INDEX_STAT),
            |alloc| alloc.allocate_string(name.as_bytes()),
            &mut buf,
        )?;
        decode_stat(&buf[..len])
    }

    // ---- Queries ---------------------------------------------------------

    pub fn open_query(&self, query: &OsStr, flags: u32) -> Result<Cookie, GatewayError> {
        self.open_call(Tag::OpenQuery, Capabilities::OPEN_QUERY, OpenEntityKind::Queries, |alloc| {
            alloc.put(&flags)?;
            alloc.allocate_string(query.as_bytes())
        })
    }

    pub fn close_query(&self, cookie: Cookie) -> Result<(), GatewayError> {
        self.close_call(Tag::CloseQuery, Capabilities::CLOSE_QUERY, cookie)
    }

    pub fn free_query_cookie(&self, cookie: Cookie) -> Result<(), GatewayError> {
        self.free_cookie_call(Tag::FreeQueryCookie, Capabilities::FREE_QUERY_COOKIE, OpenEntityKind::Queries, cookie)
    }

    pub fn read_query(&self, cookie: Cookie, out: &mut [u8]) -> Result<usize, GatewayError> {
        self.data_call(Tag::ReadQuery, Some(Capabilities::READ_QUERY), |alloc| alloc.put(&cookie.0), out)
    }

    pub fn rewind_query(&self, cookie: Cookie) -> Result<(), GatewayError> {
        self.status_call(Tag::RewindQuery, Some(Capabilities::REWIND_QUERY), |alloc| alloc.put(&cookie.0))
    }

    // ---- §4.6: PutAllPendingVNodes --------------------------------------

    /// Triggered by the `COMMAND_PUT_ALL_PENDING_VNODES` ioctl or by a
    /// free-cookie fallback driving its counter to zero while disconnected.
    pub fn put_all_pending_vnodes(&self) -> Result<(), GatewayError> {
        if !self.is_disconnected() {
            return Err(TeardownError::StillConnected.into());
        }
        if let Some(kind) = self.counters.first_open() {
            log::debug!("put-all-pending-vnodes on {:?} refused: {kind} still open", self.mount_id);
            return Err(TeardownError::Open(kind).into());
        }
        let pending = self.vnodes.take_and_disable().ok_or(TeardownError::CountingDisabled)?;
        let fs = self.fs.upgrade().ok_or(GatewayError::Disconnected)?;
        log::info!("tearing down {:?}: releasing {} pending vnodes", self.mount_id, pending.len());
        for (vnid, count) in pending {
            for _ in 0..count {
                let _ = fs.vfs().put_vnode(self.mount_id, vnid);
            }
        }
        Ok(())
    }
}

fn decode_node_kind(raw: u8) -> Result<NodeKind, GatewayError> {
    match raw {
        0 => Ok(NodeKind::File),
        1 => Ok(NodeKind::Directory),
        2 => Ok(NodeKind::Symlink),
        _ => Err(GatewayError::Protocol(crate::wire::DecodeError::ShortRead)),
    }
}

fn decode_stat(mut body: &[u8]) -> Result<Stat, GatewayError> {
    use zerocopy::FromBytes;
    let kind: u8 = u8::read_from_prefix(body).map_err(|_| GatewayError::Protocol(crate::wire::DecodeError::ShortRead))?.0;
    body = &body[1..];
    let permissions = read_u32(&mut body)?;
    let nlink = read_u32(&mut body)?;
    let size = read_u64(&mut body)?;
    Ok(Stat { kind: decode_node_kind(kind)?, permissions, nlink, size })
}

fn decode_fs_info(mut body: &[u8]) -> Result<FsInfo, GatewayError> {
    let block_size = read_u32(&mut body)?;
    let read_only = body.first().copied().unwrap_or(0) != 0;
    body = &body[1.min(body.len())..];
    let name_len = read_u32(&mut body)? as usize;
    let name = body.get(..name_len).ok_or(GatewayError::Protocol(crate::wire::DecodeError::ShortRead))?;
    Ok(FsInfo {
        block_size,
        read_only,
        volume_name: String::from_utf8_lossy(name).into_owned(),
    })
}

fn read_u32(body: &mut &[u8]) -> Result<u32, GatewayError> {
    use zerocopy::FromBytes;
    let (value, rest) = u32::read_from_prefix(body).map_err(|_| GatewayError::Protocol(crate::wire::DecodeError::ShortRead))?;
    *body = rest;
    Ok(value)
}

fn read_u64(body: &mut &[u8]) -> Result<u64, GatewayError> {
    use zerocopy::FromBytes;
    let (value, rest) = u64::read_from_prefix(body).map_err(|_| GatewayError::Protocol(crate::wire::DecodeError::ShortRead))?;
    *body = rest;
    Ok(value)
}
