//! The notification thread (§4.5): the only reader of the dedicated
//! notification port, dispatching server-originated requests by tag
//! through the same `HandlerTable` shape the design notes prescribe (§9).

use std::ffi::OsStr;
use std::os::unix::ffi::OsStrExt;
use std::sync::Arc;
use std::thread::{self, JoinHandle};
use std::time::Duration;

use crate::error::GatewayError;
use crate::file_system::FileSystem;
use crate::port::PortError;
use crate::request_handler::HandlerTable;
use crate::vfs::{HostVfs, MountId, NotifyOp, SelectSyncToken, Vnid};
use crate::wire::{ArgumentIterator, Tag, decode_frame, encode_status_reply};

const POLL_INTERVAL: Duration = Duration::from_millis(50);

fn decode_notify_op(raw: u8) -> Option<NotifyOp> {
    match raw {
        0 => Some(NotifyOp::EntryCreated),
        1 => Some(NotifyOp::EntryRemoved),
        2 => Some(NotifyOp::EntryMoved),
        3 => Some(NotifyOp::StatChanged),
        4 => Some(NotifyOp::AttrChanged),
        _ => None,
    }
}

fn vnode_target(it: &mut ArgumentIterator<'_>) -> Option<(MountId, Vnid)> {
    let mount: u64 = it.fetch().ok()?;
    let vnid: u64 = it.fetch().ok()?;
    Some((MountId(mount), Vnid(vnid)))
}

fn status_of(result: Result<(), i32>) -> i32 {
    match result {
        Ok(()) => 0,
        Err(status) => status,
    }
}

fn handle_get_vnode<H: HostVfs>(fs: &FileSystem<H>, body: &[u8]) -> Vec<u8> {
    let mut it = ArgumentIterator::new(body);
    let Some((mount, vnid)) = vnode_target(&mut it) else {
        return encode_status_reply(Tag::GetVnode, GatewayError::NotSupported.to_errno());
    };
    let Some(volume) = fs.volume(mount) else {
        return encode_status_reply(Tag::GetVnode, GatewayError::NotSupported.to_errno());
    };
    let result = fs.vfs().get_vnode(mount, vnid);
    if result.is_ok() {
        volume.vnode_counter().increment(vnid);
    }
    encode_status_reply(Tag::GetVnode, status_of(result))
}

fn handle_put_vnode<H: HostVfs>(fs: &FileSystem<H>, body: &[u8]) -> Vec<u8> {
    let mut it = ArgumentIterator::new(body);
    let Some((mount, vnid)) = vnode_target(&mut it) else {
        return encode_status_reply(Tag::PutVnode, GatewayError::NotSupported.to_errno());
    };
    let Some(volume) = fs.volume(mount) else {
        return encode_status_reply(Tag::PutVnode, GatewayError::NotSupported.to_errno());
    };
    let result = fs.vfs().put_vnode(mount, vnid);
    if result.is_ok() {
        let _ = volume.vnode_counter().decrement(vnid);
    }
    encode_status_reply(Tag::PutVnode, status_of(result))
}

fn handle_new_vnode<H: HostVfs>(fs: &FileSystem<H>, body: &[u8]) -> Vec<u8> {
    // §9 open question (a): no counter change on the reverse new-vnode path.
    let mut it = ArgumentIterator::new(body);
    let Some((mount, vnid)) = vnode_target(&mut it) else {
        return encode_status_reply(Tag::NewVnode, GatewayError::NotSupported.to_errno());
    };
    if fs.volume(mount).is_none() {
        return encode_status_reply(Tag::NewVnode, GatewayError::NotSupported.to_errno());
    }
    encode_status_reply(Tag::NewVnode, status_of(fs.vfs().new_vnode(mount, vnid)))
}

fn handle_publish_vnode<H: HostVfs>(fs: &FileSystem<H>, body: &[u8]) -> Vec<u8> {
    let mut it = ArgumentIterator::new(body);
    let Some((mount, vnid)) = vnode_target(&mut it) else {
        return encode_status_reply(Tag::PublishVnode, GatewayError::NotSupported.to_errno());
    };
    let Ok(kind_raw) = it.fetch::<u8>() else {
        return encode_status_reply(Tag::PublishVnode, GatewayError::NotSupported.to_errno());
    };
    let kind = match kind_raw {
        0 => crate::vfs::NodeKind::File,
        1 => crate::vfs::NodeKind::Directory,
        2 => crate::vfs::NodeKind::Symlink,
        _ => return encode_status_reply(Tag::PublishVnode, GatewayError::NotSupported.to_errno()),
    };
    let Some(volume) = fs.volume(mount) else {
        return encode_status_reply(Tag::PublishVnode, GatewayError::NotSupported.to_errno());
    };
    let result = fs.vfs().publish_vnode(mount, vnid, kind);
    if result.is_ok() {
        volume.vnode_counter().increment(vnid);
    }
    encode_status_reply(Tag::PublishVnode, status_of(result))
}

fn handle_remove_vnode<H: HostVfs>(fs: &FileSystem<H>, body: &[u8]) -> Vec<u8> {
    let mut it = ArgumentIterator::new(body);
    let Some((mount, vnid)) = vnode_target(&mut it) else {
        return encode_status_reply(Tag::RemoveVnodeReverse, GatewayError::NotSupported.to_errno());
    };
    if fs.volume(mount).is_none() {
        return encode_status_reply(Tag::RemoveVnodeReverse, GatewayError::NotSupported.to_errno());
    }
    encode_status_reply(Tag::RemoveVnodeReverse, status_of(fs.vfs().remove_vnode(mount, vnid)))
}

fn handle_unremove_vnode<H: HostVfs>(fs: &FileSystem<H>, body: &[u8]) -> Vec<u8> {
    let mut it = ArgumentIterator::new(body);
    let Some((mount, vnid)) = vnode_target(&mut it) else {
        return encode_status_reply(Tag::UnremoveVnode, GatewayError::NotSupported.to_errno());
    };
    if fs.volume(mount).is_none() {
        return encode_status_reply(Tag::UnremoveVnode, GatewayError::NotSupported.to_errno());
    }
    encode_status_reply(Tag::UnremoveVnode, status_of(fs.vfs().unremove_vnode(mount, vnid)))
}

fn handle_is_vnode_removed<H: HostVfs>(fs: &FileSystem<H>, body: &[u8]) -> Vec<u8> {
    let mut it = ArgumentIterator::new(body);
    let Some((mount, vnid)) = vnode_target(&mut it) else {
        return encode_status_reply(Tag::IsVnodeRemoved, GatewayError::NotSupported.to_errno());
    };
    if fs.volume(mount).is_none() {
        return encode_status_reply(Tag::IsVnodeRemoved, GatewayError::NotSupported.to_errno());
    }
    match fs.vfs().is_vnode_removed(mount, vnid) {
        Ok(removed) => crate::wire::encode_reply(Tag::IsVnodeRemoved, 0, 4096, |alloc| alloc.put(&(removed as u8)))
            .unwrap_or_else(|_| encode_status_reply(Tag::IsVnodeRemoved, GatewayError::Resource(String::new()).to_errno())),
        Err(status) => encode_status_reply(Tag::IsVnodeRemoved, status),
    }
}

/// Shared by `notify-listener` and `send-notification`: both validate a
/// namespace id (0 = volume-less, accepted unconditionally) and a non-empty
/// name when the operation names an entry (§4.5, Testable Property 8).
fn handle_entry_notification<H: HostVfs>(fs: &FileSystem<H>, tag: Tag, body: &[u8]) -> Vec<u8> {
    let mut it = ArgumentIterator::new(body);
    let Ok(mount_raw) = it.fetch::<u64>() else {
        return encode_status_reply(tag, GatewayError::NotSupported.to_errno());
    };
    let Ok(op_raw) = it.fetch::<u8>() else {
        return encode_status_reply(tag, GatewayError::NotSupported.to_errno());
    };
    let Ok(vnid_raw) = it.fetch::<u64>() else {
        return encode_status_reply(tag, GatewayError::NotSupported.to_errno());
    };
    let Ok(name_bytes) = it.fetch_blob() else {
        return encode_status_reply(tag, GatewayError::NotSupported.to_errno());
    };
    let Some(op) = decode_notify_op(op_raw) else {
        return encode_status_reply(tag, GatewayError::NotSupported.to_errno());
    };
    if mount_raw != 0 && fs.volume(MountId(mount_raw)).is_none() {
        return encode_status_reply(tag, GatewayError::NotSupported.to_errno());
    }
    if op.requires_name() && name_bytes.is_empty() {
        return encode_status_reply(tag, GatewayError::NotSupported.to_errno());
    }
    let name = if name_bytes.is_empty() {
        None
    } else {
        Some(OsStr::from_bytes(name_bytes))
    };
    let result = fs.vfs().notify_listener(MountId(mount_raw), op, Vnid(vnid_raw), name);
    encode_status_reply(tag, status_of(result))
}

fn handle_notify_select_event<H: HostVfs>(fs: &FileSystem<H>, body: &[u8]) -> Vec<u8> {
    let mut it = ArgumentIterator::new(body);
    let (Ok(token_raw), Ok(event)) = (it.fetch::<u64>(), it.fetch::<u8>()) else {
        return encode_status_reply(Tag::NotifySelectEvent, GatewayError::NotSupported.to_errno());
    };
    let token = SelectSyncToken(token_raw);
    if !fs.select_sync().contains(token) {
        return encode_status_reply(Tag::NotifySelectEvent, GatewayError::NotSupported.to_errno());
    }
    let result = fs.vfs().notify_select_event(token, event);
    encode_status_reply(Tag::NotifySelectEvent, status_of(result))
}

fn build_handlers<H: HostVfs>() -> HandlerTable<FileSystem<H>> {
    let mut table = HandlerTable::new();
    table.register(Tag::GetVnode, handle_get_vnode::<H>);
    table.register(Tag::PutVnode, handle_put_vnode::<H>);
    table.register(Tag::NewVnode, handle_new_vnode::<H>);
    table.register(Tag::PublishVnode, handle_publish_vnode::<H>);
    table.register(Tag::RemoveVnodeReverse, handle_remove_vnode::<H>);
    table.register(Tag::UnremoveVnode, handle_unremove_vnode::<H>);
    table.register(Tag::IsVnodeRemoved, handle_is_vnode_removed::<H>);
    table.register(Tag::NotifyListener, |fs: &FileSystem<H>, body: &[u8]| {
        handle_entry_notification(fs, Tag::NotifyListener, body)
    });
    table.register(Tag::SendNotification, |fs: &FileSystem<H>, body: &[u8]| {
        handle_entry_notification(fs, Tag::SendNotification, body)
    });
    table.register(Tag::NotifySelectEvent, handle_notify_select_event::<H>);
    table
}

/// Spawns the dedicated notification thread for `fs`, returning its handle
/// so `FileSystem::shutdown` can join it.
pub fn spawn<H: HostVfs>(fs: Arc<FileSystem<H>>) -> JoinHandle<()> {
    let handlers = build_handlers::<H>();
    thread::Builder::new()
        .name(format!("{}-notify", fs.flavor()))
        .spawn(move || {
            loop {
                match fs.notification_port().receive_request(POLL_INTERVAL) {
                    Ok(frame) => {
                        let Ok((tag, body)) = decode_frame(&frame) else {
                            log::warn!("notification thread dropped a malformed frame");
                            continue;
                        };
                        let reply = if fs.is_terminating() {
                            // Drain without servicing (§4.5): a generic OK
                            // preserves whatever invariant the server-side
                            // caller was blocked on.
                            log::debug!("draining reverse request {tag:?} without servicing, terminating");
                            encode_status_reply(tag, 0)
                        } else {
                            handlers.dispatch(&fs, tag, body).unwrap_or_else(|| {
                                log::warn!("no reverse handler registered for {tag:?}");
                                encode_status_reply(tag, GatewayError::NotSupported.to_errno())
                            })
                        };
                        let _ = fs.notification_port().reply(reply);
                    }
                    Err(PortError::TimedOut) => {
                        if fs.is_terminating() {
                            break;
                        }
                    }
                    Err(PortError::Disconnected) | Err(PortError::Exhausted) => {
                        log::warn!("notification port disconnected, thread exiting");
                        break;
                    }
                }
            }
            log::debug!("notification thread for '{}' exiting", fs.flavor());
        })
        .expect("failed to spawn notification thread")
}
