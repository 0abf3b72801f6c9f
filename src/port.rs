//! Bidirectional message ports and the pool that hands them out (§3, §4.1).
//!
//! A port is modeled as a pair of bounded channels (kernel→server,
//! server→kernel) plus a fixed-capacity buffer standing in for the shared
//! memory region the Haiku original roots its allocator in. The pool never
//! exposes per-port state across a release: each acquire gets a fresh
//! `RequestAllocator` rooted at the port's capacity.

use std::collections::VecDeque;
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::mpsc::{self, RecvTimeoutError};
use std::time::Duration;

use parking_lot::{Condvar, Mutex};

use crate::wire::DEFAULT_REGION_CAPACITY;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PortError {
    /// The pool (or this port) is permanently disconnected.
    Disconnected,
    /// No free port was available and the caller chose not to block.
    Exhausted,
    /// A server-team call exceeded its reentrancy deadline.
    TimedOut,
}

impl std::fmt::Display for PortError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            PortError::Disconnected => f.write_str("port disconnected"),
            PortError::Exhausted => f.write_str("no free port"),
            PortError::TimedOut => f.write_str("port send timed out"),
        }
    }
}

impl std::error::Error for PortError {}

/// One half of a port, held by the gateway (kernel) side.
#[derive(Debug)]
pub struct Port {
    id: usize,
    capacity: usize,
    to_server: mpsc::Sender<Vec<u8>>,
    from_server: mpsc::Receiver<Vec<u8>>,
    closed: AtomicBool,
}

/// The other half, handed to whatever plays the userspace server in tests
/// or in a real deployment's transport glue.
#[derive(Debug)]
pub struct ServerEndpoint {
    pub id: usize,
    pub to_kernel: mpsc::Sender<Vec<u8>>,
    pub from_kernel: mpsc::Receiver<Vec<u8>>,
}

impl Port {
    pub fn id(&self) -> usize {
        self.id
    }

    pub fn capacity(&self) -> usize {
        self.capacity
    }

    pub fn is_closed(&self) -> bool {
        self.closed.load(Ordering::Acquire)
    }

    fn close(&self) {
        self.closed.store(true, Ordering::Release);
    }

    /// Blocking send-and-receive with no deadline (§4.3, non-server thread).
    pub fn send_and_receive(&self, frame: Vec<u8>) -> Result<Vec<u8>, PortError> {
        self.send_and_receive_with_deadline(frame, None)
    }

    /// Receive an unsolicited, server-originated request with a short
    /// timeout (§4.5). Used by the notification thread, which owns this
    /// port exclusively and is never the one to speak first.
    pub fn receive_request(&self, timeout: Duration) -> Result<Vec<u8>, PortError> {
        match self.from_server.recv_timeout(timeout) {
            Ok(bytes) => Ok(bytes),
            Err(RecvTimeoutError::Timeout) => Err(PortError::TimedOut),
            Err(RecvTimeoutError::Disconnected) => {
                self.close();
                Err(PortError::Disconnected)
            }
        }
    }

    /// Fire-and-forget reply to a request received via `receive_request`.
    pub fn reply(&self, frame: Vec<u8>) -> Result<(), PortError> {
        self.to_server.send(frame).map_err(|_| PortError::Disconnected)
    }

    /// Fire-and-forget send with no expectation of a reply (receipt-acks,
    /// the no-request idle sentinel).
    pub fn send_only(&self, frame: Vec<u8>) -> Result<(), PortError> {
        if self.is_closed() {
            return Err(PortError::Disconnected);
        }
        self.to_server.send(frame).map_err(|_| {
            self.close();
            PortError::Disconnected
        })
    }

    /// Send-and-receive with an optional bounded deadline. Exceeding the
    /// deadline (or a send failure because the peer hung up) closes the
    /// port permanently, matching §4.3's reentrancy-timeout discipline.
    pub fn send_and_receive_with_deadline(
        &self,
        frame: Vec<u8>,
        deadline: Option<Duration>,
    ) -> Result<Vec<u8>, PortError> {
        if self.is_closed() {
            return Err(PortError::Disconnected);
        }
        if self.to_server.send(frame).is_err() {
            self.close();
            return Err(PortError::Disconnected);
        }
        let reply = match deadline {
            None => self.from_server.recv().map_err(|_| RecvTimeoutError::Disconnected),
            Some(budget) => self.from_server.recv_timeout(budget),
        };
        match reply {
            Ok(bytes) => Ok(bytes),
            Err(RecvTimeoutError::Timeout) => {
                log::error!("port {} exceeded its reentrancy deadline, closing", self.id);
                self.close();
                Err(PortError::TimedOut)
            }
            Err(RecvTimeoutError::Disconnected) => {
                self.close();
                Err(PortError::Disconnected)
            }
        }
    }
}

/// A pool of ports, acquired exclusively for the duration of one exchange.
#[derive(Debug)]
pub struct PortPool {
    ports: Vec<Arc<Port>>,
    free: Mutex<VecDeque<usize>>,
    condvar: Condvar,
    disconnected: AtomicBool,
}

/// Scoped handle returned by `Acquire`; releasing happens in `Drop`,
/// mirroring the Haiku original's `PortReleaser` guard.
#[derive(Debug)]
pub struct AcquiredPort<'a> {
    pool: &'a PortPool,
    port: Arc<Port>,
}

impl<'a> AcquiredPort<'a> {
    pub fn port(&self) -> &Port {
        &self.port
    }
}

impl Drop for AcquiredPort<'_> {
    fn drop(&mut self) {
        self.pool.release(self.port.id);
    }
}

impl Port {
    /// Build one port outside any pool: used for the dedicated notification
    /// port (§3), which is never acquired/released like a pool member.
    pub fn dedicated_pair(capacity: usize) -> (Arc<Port>, ServerEndpoint) {
        let (to_server, from_kernel) = mpsc::channel();
        let (to_kernel, from_server) = mpsc::channel();
        let port = Arc::new(Port {
            id: 0,
            capacity,
            to_server,
            from_server,
            closed: AtomicBool::new(false),
        });
        (port, ServerEndpoint { id: 0, to_kernel, from_kernel })
    }
}

impl PortPool {
    /// Build a pool of `count` ports, returning the kernel-side pool and the
    /// matching server-side endpoints (for a fake or real server to drive).
    pub fn new(count: usize, capacity: usize) -> (Self, Vec<ServerEndpoint>) {
        let mut ports = Vec::with_capacity(count);
        let mut endpoints = Vec::with_capacity(count);
        for id in 0..count {
            let (to_server, from_kernel) = mpsc::channel();
            let (to_kernel, from_server) = mpsc::channel();
            ports.push(Arc::new(Port {
                id,
                capacity,
                to_server,
                from_server,
                closed: AtomicBool::new(false),
            }));
            endpoints.push(ServerEndpoint { id, to_kernel, from_kernel });
        }
        let free = Mutex::new((0..count).collect());
        (
            PortPool {
                ports,
                free,
                condvar: Condvar::new(),
                disconnected: AtomicBool::new(false),
            },
            endpoints,
        )
    }

    pub fn with_default_capacity(count: usize) -> (Self, Vec<ServerEndpoint>) {
        Self::new(count, DEFAULT_REGION_CAPACITY)
    }

    pub fn is_disconnected(&self) -> bool {
        self.disconnected.load(Ordering::Acquire) || self.ports.iter().all(|p| p.is_closed())
    }

    /// Sets the sticky disconnected flag and wakes any blocked acquirers.
    /// Idempotent.
    pub fn disconnect(&self) {
        if !self.disconnected.swap(true, Ordering::AcqRel) {
            log::warn!("port pool disconnected ({} ports)", self.ports.len());
        }
        self.condvar.notify_all();
    }

    /// Blocks until a port is free, or returns `None` if the pool is (or
    /// becomes) disconnected while waiting.
    pub fn acquire(&self) -> Option<AcquiredPort<'_>> {
        if self.is_disconnected() {
            return None;
        }
        let mut free = self.free.lock();
        loop {
            if self.is_disconnected() {
                return None;
            }
            if let Some(id) = free.iter().position(|&id| !self.ports[id].is_closed()) {
                let id = free.remove(id).unwrap();
                return Some(AcquiredPort { pool: self, port: self.ports[id].clone() });
            }
            self.condvar.wait(&mut free);
        }
    }

    fn release(&self, id: usize) {
        if self.ports[id].is_closed() {
            // A closed port is never returned to service; disconnect the
            // whole pool, matching the documented "close permanently"
            // behavior of a server-team reentrancy timeout.
            log::error!("port {id} closed, disconnecting pool");
            self.disconnect();
        }
        let mut free = self.free.lock();
        free.push_back(id);
        drop(free);
        self.condvar.notify_one();
    }

    pub fn len(&self) -> usize {
        self.ports.len()
    }

    pub fn is_empty(&self) -> bool {
        self.ports.is_empty()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn acquire_release_roundtrip() {
        let (pool, _endpoints) = PortPool::new(2, 1024);
        let a = pool.acquire().unwrap();
        let b = pool.acquire().unwrap();
        assert_eq!(pool.free.lock().len(), 0);
        drop(a);
        drop(b);
        assert_eq!(pool.free.lock().len(), 2);
    }

    #[test]
    fn disconnect_wakes_acquirers() {
        let (pool, _endpoints) = PortPool::new(1, 1024);
        let guard = pool.acquire().unwrap();
        pool.disconnect();
        assert!(pool.is_disconnected());
        drop(guard);
        assert!(pool.acquire().is_none());
    }
}
