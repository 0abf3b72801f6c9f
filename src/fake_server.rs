//! Test-only doubles: a minimal in-process "server" driving the
//! `ServerEndpoint` halves of a pool plus the notification port, and a
//! `HostVfs` that records every callback it receives. Used only by this
//! crate's own tests — never compiled into a consumer's binary.

use std::sync::Arc;
use std::thread::{self, JoinHandle};

use parking_lot::Mutex;

use crate::file_system::mark_current_thread_as_server_team;
use crate::port::{Port, PortPool, ServerEndpoint};
use crate::vfs::{HostVfs, MountId, NotifyOp, SelectSyncToken, Vnid};
use crate::wire::{Tag, decode_frame, encode_reply, encode_status_reply};

/// Drives every `ServerEndpoint` of a pool on its own worker thread,
/// answering forward requests with a caller-supplied closure per tag. Each
/// worker marks itself as server-team so reentrant calls are exercised
/// realistically (§4.3).
pub(crate) struct FakeServer {
    workers: Vec<JoinHandle<()>>,
}

pub(crate) type ForwardResponder = Arc<dyn Fn(Tag, &[u8]) -> Vec<u8> + Send + Sync>;

impl FakeServer {
    pub(crate) fn spawn(endpoints: Vec<ServerEndpoint>, responder: ForwardResponder) -> Self {
        let workers = endpoints
            .into_iter()
            .map(|endpoint| {
                let responder = Arc::clone(&responder);
                thread::spawn(move || {
                    mark_current_thread_as_server_team();
                    while let Ok(frame) = endpoint.from_kernel.recv() {
                        let Ok((tag, body)) = decode_frame(&frame) else { continue };
                        let reply = responder(tag, body);
                        if endpoint.to_kernel.send(reply).is_err() {
                            break;
                        }
                        if tag.reply_carries_data() {
                            // Receipt-ack is fire-and-forget on the same
                            // channel pair; drain it so it doesn't show up
                            // as the next request's frame.
                            let _ = endpoint.from_kernel.recv();
                        }
                    }
                })
            })
            .collect();
        FakeServer { workers }
    }

    pub(crate) fn join(self) {
        for worker in self.workers {
            let _ = worker.join();
        }
    }
}

/// A trivial always-OK responder, the default shape for tests that only
/// care about port/counter bookkeeping, not payload content.
pub(crate) fn ok_responder() -> ForwardResponder {
    Arc::new(|tag, _body| encode_status_reply(tag, 0))
}

/// Answers a `Tag::MountVolume` request with a fixed root vnid, server
/// handle, and capability bitmask, bare-OK for everything else.
pub(crate) fn mount_responder(root_vnid: u64, server_handle: u64, capabilities: u64) -> ForwardResponder {
    Arc::new(move |tag, _body| {
        if tag != Tag::MountVolume {
            return encode_status_reply(tag, 0);
        }
        encode_reply(tag, 0, 256, |alloc| {
            alloc.put(&root_vnid)?;
            alloc.put(&server_handle)?;
            alloc.put(&capabilities)
        })
        .unwrap()
    })
}

pub(crate) fn lookup_responder(vnid: u64, kind: u8) -> ForwardResponder {
    Arc::new(move |tag, _body| {
        encode_reply(tag, 0, 256, |alloc| {
            alloc.put(&vnid)?;
            alloc.put(&kind)
        })
        .unwrap()
    })
}

/// Answers every `Open*` tag with a fixed cookie, everything else with a
/// bare OK — the shape most open/close/free-cookie tests need.
pub(crate) fn cookie_then_ok_responder(cookie: u64) -> ForwardResponder {
    Arc::new(move |tag, _body| match tag {
        Tag::Open | Tag::OpenDir | Tag::OpenQuery | Tag::OpenIndexDir | Tag::OpenAttrDir | Tag::OpenAttr | Tag::CreateAttr => {
            encode_reply(tag, 0, 64, |alloc| alloc.put(&cookie)).unwrap()
        }
        _ => encode_status_reply(tag, 0),
    })
}

/// Records every downward call the gateway makes, for assertions.
#[derive(Default)]
pub(crate) struct RecordingHostVfs {
    get_vnode_calls: Mutex<Vec<(MountId, Vnid)>>,
    put_vnode_calls: Mutex<Vec<(MountId, Vnid)>>,
    notify_calls: Mutex<Vec<(MountId, NotifyOp, Vnid, bool)>>,
    select_events: Mutex<Vec<(SelectSyncToken, u8)>>,
}

impl RecordingHostVfs {
    pub(crate) fn new() -> Self {
        Self::default()
    }

    pub(crate) fn get_vnode_count(&self, vnid: Vnid) -> usize {
        self.get_vnode_calls.lock().iter().filter(|(_, v)| *v == vnid).count()
    }

    pub(crate) fn put_vnode_count(&self, vnid: Vnid) -> usize {
        self.put_vnode_calls.lock().iter().filter(|(_, v)| *v == vnid).count()
    }

    pub(crate) fn total_put_vnode_calls(&self) -> usize {
        self.put_vnode_calls.lock().len()
    }

    pub(crate) fn notify_call_count(&self) -> usize {
        self.notify_calls.lock().len()
    }
}

impl HostVfs for RecordingHostVfs {
    fn get_vnode(&self, mount: MountId, vnid: Vnid) -> Result<(), i32> {
        self.get_vnode_calls.lock().push((mount, vnid));
        Ok(())
    }

    fn put_vnode(&self, mount: MountId, vnid: Vnid) -> Result<(), i32> {
        self.put_vnode_calls.lock().push((mount, vnid));
        Ok(())
    }

    fn new_vnode(&self, _mount: MountId, _vnid: Vnid) -> Result<(), i32> {
        Ok(())
    }

    fn publish_vnode(&self, _mount: MountId, _vnid: Vnid, _kind: crate::vfs::NodeKind) -> Result<(), i32> {
        Ok(())
    }

    fn remove_vnode(&self, _mount: MountId, _vnid: Vnid) -> Result<(), i32> {
        Ok(())
    }

    fn unremove_vnode(&self, _mount: MountId, _vnid: Vnid) -> Result<(), i32> {
        Ok(())
    }

    fn is_vnode_removed(&self, _mount: MountId, _vnid: Vnid) -> Result<bool, i32> {
        Ok(false)
    }

    fn notify_listener(
        &self,
        mount: MountId,
        op: NotifyOp,
        vnid: Vnid,
        name: Option<&std::ffi::OsStr>,
    ) -> Result<(), i32> {
        self.notify_calls.lock().push((mount, op, vnid, name.is_some()));
        Ok(())
    }

    fn notify_select_event(&self, token: SelectSyncToken, event: u8) -> Result<(), i32> {
        self.select_events.lock().push((token, event));
        Ok(())
    }
}

/// Builds a connected pool + notification port pair and a `FakeServer`
/// answering forward calls, wiring both sides up the way a real transport
/// would after a successful FS-connect handshake (§4.7).
pub(crate) fn connected_pair(
    port_count: usize,
    responder: ForwardResponder,
) -> (PortPool, Arc<Port>, FakeServer) {
    let (pool, endpoints) = PortPool::with_default_capacity(port_count);
    let (notification_port, _notification_endpoint) = Port::dedicated_pair(crate::wire::DEFAULT_REGION_CAPACITY);
    let server = FakeServer::spawn(endpoints, responder);
    (pool, notification_port, server)
}
