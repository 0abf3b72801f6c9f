//! Black-box coverage of the reverse notification path: Testable Property 8
//! and Scenario S5 (a notify-listener naming an entry must carry a name).

mod support;

use userland_gateway::{MountId, Tag, Vnid};

use support::{build_request, connected_and_mounted, cookie_then_ok_responder, send_reverse_request};

const ENTRY_CREATED: u8 = 0;
const ENTRY_MOVED: u8 = 2;

fn notify_listener_request(mount: MountId, op: u8, vnid: Vnid, name: &[u8]) -> Vec<u8> {
    build_request(Tag::NotifyListener, 256, |alloc| {
        alloc.put(&mount.0)?;
        alloc.put(&op)?;
        alloc.put(&vnid.0)?;
        alloc.allocate_string(name)
    })
}

/// Testable Property 8 / Scenario S5: a notify-listener naming
/// `ENTRY_CREATED`/`ENTRY_MOVED` with an empty name is rejected before ever
/// reaching the host VFS.
#[test]
fn notify_listener_rejects_an_entry_event_with_no_name() {
    let (gateway, server, notification) = connected_and_mounted(1, 1, cookie_then_ok_responder(1));

    let (tag, status, _body) = send_reverse_request(&notification, notify_listener_request(MountId(1), ENTRY_CREATED, Vnid(4), b""));
    assert_eq!(tag, Tag::NotifyListener);
    assert_ne!(status, 0, "an empty name on an entry event must be refused");

    let (tag, status, _body) = send_reverse_request(&notification, notify_listener_request(MountId(1), ENTRY_MOVED, Vnid(4), b""));
    assert_eq!(tag, Tag::NotifyListener);
    assert_ne!(status, 0);

    assert_eq!(gateway.file_system().vfs().notify_call_count(), 0, "the host VFS must never see a rejected event");

    gateway.shutdown();
    drop(gateway);
    server.join();
}

#[test]
fn notify_listener_accepts_a_well_formed_entry_event() {
    let (gateway, server, notification) = connected_and_mounted(1, 1, cookie_then_ok_responder(1));

    let (tag, status, _body) = send_reverse_request(&notification, notify_listener_request(MountId(1), ENTRY_CREATED, Vnid(4), b"new-file"));
    assert_eq!(tag, Tag::NotifyListener);
    assert_eq!(status, 0);
    assert_eq!(gateway.file_system().vfs().notify_call_count(), 1);

    gateway.shutdown();
    drop(gateway);
    server.join();
}
