//! Black-box test harness shared by the integration suites in this
//! directory. Drives a real `Gateway` the way a transport would: a
//! `FakeServer` answers forward requests over the acquired-port pool on its
//! own threads, and the caller gets back the notification port's server-side
//! `ServerEndpoint` directly, so a test can inject reverse requests itself.
//! Built entirely on `userland_gateway`'s public surface — no access to the
//! crate's own `#[cfg(test)]` doubles.

use std::ffi::OsStr;
use std::thread::{self, JoinHandle};
use std::sync::Arc;

use parking_lot::Mutex;
use userland_gateway::{
    AllocationError, Capabilities, ConnectedEndpoints, Gateway, HostVfs, MountId, NodeKind, NotifyOp, Port, PortPool,
    RequestAllocator, SelectSyncToken, Settings, Tag, Vnid, decode_frame, encode_reply, encode_status_reply,
    mark_current_thread_as_server_team,
};

pub type ForwardResponder = Arc<dyn Fn(Tag, &[u8]) -> Vec<u8> + Send + Sync>;

/// Drives every `ServerEndpoint` of a forward pool on its own thread,
/// answering each request with a caller-supplied closure keyed on tag.
pub struct FakeServer {
    workers: Vec<JoinHandle<()>>,
}

impl FakeServer {
    pub fn spawn(endpoints: Vec<userland_gateway::ServerEndpoint>, responder: ForwardResponder) -> Self {
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
                            let _ = endpoint.from_kernel.recv();
                        }
                    }
                })
            })
            .collect();
        FakeServer { workers }
    }

    pub fn join(self) {
        for worker in self.workers {
            let _ = worker.join();
        }
    }
}

pub fn ok_responder() -> ForwardResponder {
    Arc::new(|tag, _body| encode_status_reply(tag, 0))
}

/// Answers `Tag::MountVolume` with a fixed root vnid, server handle, and
/// capability bitmask; bare OK for everything else.
pub fn mount_responder(root_vnid: u64, server_handle: u64, capabilities: u64) -> ForwardResponder {
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

/// Answers every `Open*`/`CreateAttr` tag with a fixed cookie, everything
/// else with a bare OK.
pub fn cookie_then_ok_responder(cookie: u64) -> ForwardResponder {
    Arc::new(move |tag, _body| match tag {
        Tag::Open | Tag::OpenDir | Tag::OpenQuery | Tag::OpenIndexDir | Tag::OpenAttrDir | Tag::OpenAttr | Tag::CreateAttr => {
            encode_reply(tag, 0, 64, |alloc| alloc.put(&cookie)).unwrap()
        }
        _ => encode_status_reply(tag, 0),
    })
}

/// Answers `Tag::Create` with a fixed vnid and cookie, everything else OK.
pub fn create_responder(vnid: u64, cookie: u64) -> ForwardResponder {
    Arc::new(move |tag, _body| match tag {
        Tag::Create => encode_reply(tag, 0, 64, |alloc| {
            alloc.put(&vnid)?;
            alloc.put(&cookie)
        })
        .unwrap(),
        _ => encode_status_reply(tag, 0),
    })
}

/// Records every downward call the gateway makes, for assertions.
#[derive(Default)]
pub struct RecordingHostVfs {
    get_vnode_calls: Mutex<Vec<(MountId, Vnid)>>,
    put_vnode_calls: Mutex<Vec<(MountId, Vnid)>>,
    notify_calls: Mutex<Vec<(MountId, NotifyOp, Vnid, bool)>>,
}

impl RecordingHostVfs {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn get_vnode_count(&self, vnid: Vnid) -> usize {
        self.get_vnode_calls.lock().iter().filter(|(_, v)| *v == vnid).count()
    }

    pub fn put_vnode_count(&self, vnid: Vnid) -> usize {
        self.put_vnode_calls.lock().iter().filter(|(_, v)| *v == vnid).count()
    }

    pub fn total_put_vnode_calls(&self) -> usize {
        self.put_vnode_calls.lock().len()
    }

    pub fn notify_call_count(&self) -> usize {
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

    fn publish_vnode(&self, _mount: MountId, _vnid: Vnid, _kind: NodeKind) -> Result<(), i32> {
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

    fn notify_listener(&self, mount: MountId, op: NotifyOp, vnid: Vnid, name: Option<&OsStr>) -> Result<(), i32> {
        self.notify_calls.lock().push((mount, op, vnid, name.is_some()));
        Ok(())
    }

    fn notify_select_event(&self, _token: SelectSyncToken, _event: u8) -> Result<(), i32> {
        Ok(())
    }
}

/// Builds a connected, but not yet mounted, `Gateway` plus the `FakeServer`
/// answering its forward pool, and hands back the notification port's
/// server-side endpoint so a test can inject reverse requests.
pub fn connected_gateway(
    port_count: usize,
    responder: ForwardResponder,
) -> (Gateway<RecordingHostVfs>, FakeServer, userland_gateway::ServerEndpoint) {
    let (pool, endpoints) = PortPool::with_default_capacity(port_count);
    let (notification_port, notification_endpoint) = Port::dedicated_pair(userland_gateway::DEFAULT_REGION_CAPACITY);
    let server = FakeServer::spawn(endpoints, responder);
    let gateway_endpoints = ConnectedEndpoints { pool, notification_port };
    let gateway = Gateway::new("test-flavor", RecordingHostVfs::new(), gateway_endpoints, &Settings::default()).unwrap();
    (gateway, server, notification_endpoint)
}

/// Mounts a volume that advertises every capability, via a `mount_responder`
/// spliced in front of `responder` for every other tag.
pub fn connected_and_mounted(
    port_count: usize,
    root_vnid: u64,
    responder: ForwardResponder,
) -> (Gateway<RecordingHostVfs>, FakeServer, userland_gateway::ServerEndpoint) {
    let combined: ForwardResponder = Arc::new(move |tag, body| {
        if tag == Tag::MountVolume {
            return mount_responder(root_vnid, 1, Capabilities::all().bits())(tag, body);
        }
        responder(tag, body)
    });
    let (gateway, server, notification) = connected_gateway(port_count, combined);
    gateway.mount(MountId(1), OsStr::new("test-device"), 0, OsStr::new("")).unwrap();
    (gateway, server, notification)
}

/// Builds a full request frame the way the gateway itself would, for
/// injecting a server-originated (reverse) request over the notification
/// port's server-side endpoint.
pub fn build_request(tag: Tag, capacity: usize, build: impl FnOnce(&mut RequestAllocator) -> Result<(), AllocationError>) -> Vec<u8> {
    let mut alloc = RequestAllocator::new(tag, capacity);
    build(&mut alloc).expect("request region exhausted");
    alloc.finish()
}

/// Sends `frame` over the notification endpoint's kernel-facing channel and
/// decodes the matching reply's tag, status, and raw trailing bytes.
pub fn send_reverse_request(endpoint: &userland_gateway::ServerEndpoint, frame: Vec<u8>) -> (Tag, i32, Vec<u8>) {
    endpoint.to_kernel.send(frame).expect("notification port closed");
    let reply = endpoint.from_kernel.recv().expect("no reply from notification thread");
    let (tag, body) = decode_frame(&reply).expect("malformed reply frame");
    assert!(body.len() >= 4, "reply body too short to carry a status");
    let status = i32::from_ne_bytes(body[0..4].try_into().unwrap());
    (tag, status, body[4..].to_vec())
}
