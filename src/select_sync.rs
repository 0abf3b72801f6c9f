//! Process-wide registry of select-sync tokens currently claimed by the FS
//! (§3, §9). Ref-counted so re-entrant selects on the same token are
//! tolerated: each `add` increments, each `remove` decrements and removes
//! the entry at zero.

use std::collections::HashMap;

use parking_lot::Mutex;

use crate::vfs::SelectSyncToken;

#[derive(Debug)]
pub struct SelectSyncRegistry {
    counts: Mutex<HashMap<SelectSyncToken, u32>>,
}

impl SelectSyncRegistry {
    pub fn new() -> Self {
        SelectSyncRegistry { counts: Mutex::new(HashMap::new()) }
    }

    pub fn add(&self, token: SelectSyncToken) {
        *self.counts.lock().entry(token).or_insert(0) += 1;
    }

    /// Returns `true` if the token was present (and its count is now one
    /// lower, possibly removed).
    pub fn remove(&self, token: SelectSyncToken) -> bool {
        let mut counts = self.counts.lock();
        match counts.get_mut(&token) {
            Some(count) => {
                *count -= 1;
                if *count == 0 {
                    counts.remove(&token);
                }
                true
            }
            None => false,
        }
    }

    pub fn contains(&self, token: SelectSyncToken) -> bool {
        self.counts.lock().contains_key(&token)
    }
}

impl Default for SelectSyncRegistry {
    fn default() -> Self {
        Self::new()
    }
}
