//! Singleton per FS flavor: the notification port and thread, the forward
//! PortPool, the select-sync and IOCtl registries, and the mounted-volumes
//! list (§3, §4.7).
//!
//! `Volume` holds only a `Weak<FileSystem<H>>` back-reference; `FileSystem`
//! owns its volumes strongly, so the back-edge the design notes describe
//! (§9 "cyclic ownership") never becomes a reference cycle.

use std::cell::Cell;
use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Weak};
use std::thread::JoinHandle;

use parking_lot::Mutex;

use crate::config::IoctlRegistry;
use crate::port::{Port, PortPool};
use crate::select_sync::SelectSyncRegistry;
use crate::vfs::{HostVfs, MountId};
use crate::volume::Volume;

thread_local! {
    static SERVER_TEAM_THREAD: Cell<bool> = const { Cell::new(false) };
}

/// Marks the calling thread as belonging to the userspace server's team, so
/// `_SendRequest` applies the bounded-deadline reentrancy rule (§4.3) to any
/// forward call it makes. The fake server test harness calls this once per
/// worker thread it spawns.
pub fn mark_current_thread_as_server_team() {
    SERVER_TEAM_THREAD.with(|flag| flag.set(true));
}

pub fn current_thread_is_server_team() -> bool {
    SERVER_TEAM_THREAD.with(|flag| flag.get())
}

pub struct FileSystem<H: HostVfs> {
    flavor: String,
    vfs: H,
    pool: PortPool,
    notification_port: Arc<Port>,
    select_sync: SelectSyncRegistry,
    ioctl_registry: IoctlRegistry,
    terminating: Arc<AtomicBool>,
    notification_thread: Mutex<Option<JoinHandle<()>>>,
    volumes: Mutex<HashMap<MountId, Arc<Volume<H>>>>,
}

// `H` and the volume table aren't printed; what matters for a dump of this
// type is the flavor and whether it's still alive.
impl<H: HostVfs> std::fmt::Debug for FileSystem<H> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("FileSystem")
            .field("flavor", &self.flavor)
            .field("pool", &self.pool)
            .field("terminating", &self.is_terminating())
            .field("volumes", &self.volume_count())
            .finish()
    }
}

impl<H: HostVfs> FileSystem<H> {
    /// Adopts an already-handshaken pool and notification port (§4.7 steps
    /// 1-3 happen in whatever connects the two sides together; this is the
    /// "FS-connect succeeded" continuation: load config, spawn the thread).
    pub fn new(
        flavor: impl Into<String>,
        vfs: H,
        pool: PortPool,
        notification_port: Arc<Port>,
        ioctl_registry: IoctlRegistry,
    ) -> Arc<Self> {
        let fs = Arc::new(FileSystem {
            flavor: flavor.into(),
            vfs,
            pool,
            notification_port,
            select_sync: SelectSyncRegistry::new(),
            ioctl_registry,
            terminating: Arc::new(AtomicBool::new(false)),
            notification_thread: Mutex::new(None),
            volumes: Mutex::new(HashMap::new()),
        });
        log::info!("starting '{}' gateway ({} forward ports)", fs.flavor, fs.pool.len());
        let handle = crate::notification::spawn(Arc::clone(&fs));
        *fs.notification_thread.lock() = Some(handle);
        fs
    }

    pub fn flavor(&self) -> &str {
        &self.flavor
    }

    pub fn vfs(&self) -> &H {
        &self.vfs
    }

    pub fn pool(&self) -> &PortPool {
        &self.pool
    }

    pub fn notification_port(&self) -> &Arc<Port> {
        &self.notification_port
    }

    pub fn select_sync(&self) -> &SelectSyncRegistry {
        &self.select_sync
    }

    pub fn ioctl_registry(&self) -> &IoctlRegistry {
        &self.ioctl_registry
    }

    pub fn is_terminating(&self) -> bool {
        self.terminating.load(Ordering::Acquire)
    }

    pub fn current_thread_is_server_team(&self) -> bool {
        current_thread_is_server_team()
    }

    pub fn volume(&self, mount: MountId) -> Option<Arc<Volume<H>>> {
        self.volumes.lock().get(&mount).cloned()
    }

    /// Registers a freshly mounted volume, handing it a weak back-pointer
    /// to this `FileSystem`.
    pub fn adopt_volume(self: &Arc<Self>, mount: MountId, volume: Volume<H>) -> Arc<Volume<H>> {
        let volume = Arc::new(volume);
        self.volumes.lock().insert(mount, Arc::clone(&volume));
        volume
    }

    pub fn forget_volume(&self, mount: MountId) {
        self.volumes.lock().remove(&mount);
    }

    pub fn volume_count(&self) -> usize {
        self.volumes.lock().len()
    }

    fn weak(self: &Arc<Self>) -> Weak<Self> {
        Arc::downgrade(self)
    }

    pub fn new_volume_handle(self: &Arc<Self>, mount: MountId, root_vnid: crate::vfs::Vnid, server_handle: u64, capabilities: crate::capabilities::Capabilities) -> Volume<H> {
        Volume::new(self.weak(), mount, root_vnid, server_handle, capabilities)
    }

    /// §4.7 teardown: stop the thread, drain leftover traffic (handled by
    /// the thread itself past this point), join, then let the registries
    /// drop with this `Arc`.
    pub fn shutdown(&self) {
        log::info!("shutting down '{}' gateway ({} volumes still mounted)", self.flavor, self.volume_count());
        self.terminating.store(true, Ordering::Release);
        if let Some(handle) = self.notification_thread.lock().take() {
            let _ = handle.join();
        }
    }
}
