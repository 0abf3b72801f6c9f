//! Per-volume map of outstanding kernel-owned vnode references (§3, §4.6).
//!
//! The enable flag is logically part of the map rather than a sibling
//! field: conceptually this is a sum type `Enabled(map) | Disabled`,
//! flipped exactly once, which is how it's modeled here.

use std::collections::HashMap;

use parking_lot::Mutex;

use crate::vfs::Vnid;

#[derive(Debug)]
enum State {
    Enabled(HashMap<Vnid, i32>),
    Disabled,
}

#[derive(Debug)]
pub struct VNodeCounter {
    state: Mutex<State>,
}

/// Why a decrement could not be applied; in both cases counting disables.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DecrementError {
    /// The flag was already disabled before this call took the lock.
    AlreadyDisabled,
    /// The vnid had no outstanding references to balance.
    NotTracked,
}

impl VNodeCounter {
    pub fn new() -> Self {
        VNodeCounter { state: Mutex::new(State::Enabled(HashMap::new())) }
    }

    pub fn is_enabled(&self) -> bool {
        matches!(*self.state.lock(), State::Enabled(_))
    }

    /// R get-vnode / R publish-vnode / F lookup-undo / F create-undo share
    /// this shape on the increment side; callers choose the right rule
    /// (§4.6) before calling.
    pub fn increment(&self, vnid: Vnid) -> bool {
        match &mut *self.state.lock() {
            State::Enabled(map) => {
                *map.entry(vnid).or_insert(0) += 1;
                true
            }
            State::Disabled => false,
        }
    }

    /// F lookup (success) / F create (success): the VFS will itself take
    /// the balancing reference, so the counter decrements pre-emptively.
    /// R put-vnode (success) decrements too. Disables counting (and
    /// reports an error) if the vnid was not tracked, or if counting was
    /// already off.
    pub fn decrement(&self, vnid: Vnid) -> Result<(), DecrementError> {
        let mut guard = self.state.lock();
        match &mut *guard {
            State::Enabled(map) => match map.get_mut(&vnid) {
                Some(count) => {
                    *count -= 1;
                    if *count <= 0 {
                        map.remove(&vnid);
                    }
                    Ok(())
                }
                None => {
                    *guard = State::Disabled;
                    Err(DecrementError::NotTracked)
                }
            },
            State::Disabled => Err(DecrementError::AlreadyDisabled),
        }
    }

    /// Sum of all outstanding counts; used by tests and by the teardown
    /// exactness check. Zero (and `0`, not an error) once disabled.
    pub fn sum(&self) -> i64 {
        match &*self.state.lock() {
            State::Enabled(map) => map.values().map(|&c| c as i64).sum(),
            State::Disabled => 0,
        }
    }

    pub fn get(&self, vnid: Vnid) -> i32 {
        match &*self.state.lock() {
            State::Enabled(map) => map.get(&vnid).copied().unwrap_or(0),
            State::Disabled => 0,
        }
    }

    /// Disable counting unconditionally and return the final map, which
    /// `PutAllPendingVNodes` drains one `put_vnode` call at a time. Returns
    /// `None` if counting was already disabled.
    pub fn take_and_disable(&self) -> Option<HashMap<Vnid, i32>> {
        let mut guard = self.state.lock();
        match std::mem::replace(&mut *guard, State::Disabled) {
            State::Enabled(map) => Some(map),
            State::Disabled => None,
        }
    }
}

impl Default for VNodeCounter {
    fn default() -> Self {
        Self::new()
    }
}
