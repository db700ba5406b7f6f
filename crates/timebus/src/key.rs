//! Task key generation.

use std::sync::atomic::{AtomicU64, Ordering};

use crate::TaskKey;

/// First key handed out. Keys below this value are reserved for sentinels.
pub const FIRST_KEY: u64 = 100;

/// Issues unique, strictly increasing task keys. Safe to share across threads.
#[derive(Debug)]
pub struct KeyGenerator {
    next: AtomicU64,
}

impl KeyGenerator {
    pub fn new() -> Self {
        Self {
            next: AtomicU64::new(FIRST_KEY),
        }
    }

    /// Return the next key. Keys are never reclaimed.
    pub fn generate(&self) -> TaskKey {
        TaskKey::new(self.next.fetch_add(1, Ordering::Relaxed))
    }
}

impl Default for KeyGenerator {
    fn default() -> Self {
        Self::new()
    }
}
