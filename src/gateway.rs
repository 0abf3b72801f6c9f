//! The VFS shim (§2 "Gateway"): translates the host's hook vector into
//! `Volume`/`FileSystem` calls, owns global init/shutdown, and performs the
//! minimal parameter validation that must happen before a request is ever
//! built (empty names, zero-length buffers where a buffer is mandatory).

use std::ffi::OsStr;
use std::path::Path;
use std::sync::Arc;

use crate::config::{ConfigError, Settings};
use crate::error::GatewayError;
use crate::file_system::FileSystem;
use crate::port::{Port, PortPool};
use crate::vfs::{HostVfs, MountId};
use crate::volume::Volume;

/// Global entry point a host VFS driver holds one of per loaded flavor.
pub struct Gateway<H: HostVfs> {
    fs: Arc<FileSystem<H>>,
}

impl<H: HostVfs> std::fmt::Debug for Gateway<H> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Gateway").field("fs", &self.fs).finish()
    }
}

/// Everything the other side of a fresh FS-connect handshake (§4.7) needs
/// to hand back before a `Gateway` can be built: the forward pool, the
/// dedicated notification port, and the per-flavor IOCtl registry.
#[derive(Debug)]
pub struct ConnectedEndpoints {
    pub pool: PortPool,
    pub notification_port: std::sync::Arc<Port>,
}

impl<H: HostVfs> Gateway<H> {
    /// Adopts a connected flavor and starts its notification thread. The
    /// handshake itself (naming the flavor over a well-known init port,
    /// receiving back the forward pool and notification port) is the
    /// transport glue's job, not this type's — see `ConnectedEndpoints`.
    pub fn new(
        flavor: impl Into<String>,
        vfs: H,
        endpoints: ConnectedEndpoints,
        settings: &Settings,
    ) -> Result<Self, ConfigError> {
        let flavor = flavor.into();
        let ioctl_registry = settings.registry_for(&flavor)?;
        let fs = FileSystem::new(flavor, vfs, endpoints.pool, endpoints.notification_port, ioctl_registry);
        Ok(Gateway { fs })
    }

    /// Loads `path` as a driver-settings document (missing file ⇒ empty
    /// settings, §6 "Configuration") and connects under it.
    pub fn load(flavor: impl Into<String>, vfs: H, endpoints: ConnectedEndpoints, path: &Path) -> Result<Self, GatewayError> {
        let settings = Settings::load(path)?;
        Ok(Self::new(flavor, vfs, endpoints, &settings)?)
    }

    pub fn file_system(&self) -> &Arc<FileSystem<H>> {
        &self.fs
    }

    /// Mount a new volume: send the mount-volume request over an acquired
    /// port, derive the root vnid and server-assigned volume handle from
    /// the reply, and register the result under the host-assigned mount id
    /// (§4.2, §4.7). A server that advertises no capabilities at all is
    /// rejected once its reply arrives; no capability set is assumed ahead
    /// of the wire.
    pub fn mount(&self, mount_id: MountId, device: &OsStr, flags: u32, parameters: &OsStr) -> Result<Arc<Volume<H>>, GatewayError> {
        log::info!("mounting {mount_id:?}");
        let volume = Volume::mount(&self.fs, mount_id, device, flags, parameters)?;
        log::info!("mounted {mount_id:?} (root {:?})", volume.root_vnid());
        Ok(self.fs.adopt_volume(mount_id, volume))
    }

    /// Unmount: ask the volume to tell the server, then drop it from the
    /// registry regardless of the wire result — a volume that failed to
    /// say goodbye is still gone from the host's perspective.
    pub fn unmount(&self, mount_id: MountId) -> Result<(), GatewayError> {
        let volume = self.fs.volume(mount_id).ok_or(GatewayError::NotSupported)?;
        let result = volume.unmount();
        if let Err(ref err) = result {
            log::warn!("unmount {mount_id:?} failed ({err}); dropping it from the registry anyway");
        }
        self.fs.forget_volume(mount_id);
        result
    }

    pub fn volume(&self, mount_id: MountId) -> Option<Arc<Volume<H>>> {
        self.fs.volume(mount_id)
    }

    /// Shuts the whole flavor down: stops the notification thread and lets
    /// the registries drop. Any volume still mounted at this point is the
    /// host's bug, not this type's to paper over.
    pub fn shutdown(&self) {
        self.fs.shutdown();
    }
}
