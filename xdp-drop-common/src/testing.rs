//! In-memory stand-ins for the kernel tables, for host tests.

extern crate std;

use core::sync::atomic::{AtomicU64, Ordering};
use std::{boxed::Box, collections::HashMap, sync::Mutex};

use crate::{AddressKey, DropCounters};

/// Drop counter table with the kernel map's create-if-absent semantics.
///
/// Counters are leaked so `counter` can hand out plain references, like
/// pointers into a kernel map.
#[derive(Default)]
pub struct MemoryCounters(Mutex<HashMap<AddressKey, &'static AtomicU64>>);

impl MemoryCounters {
    pub fn get(&self, key: &AddressKey) -> Option<u64> {
        let map = self.0.lock().unwrap();
        map.get(key).map(|c| c.load(Ordering::Relaxed))
    }

    pub fn len(&self) -> usize {
        self.0.lock().unwrap().len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

impl DropCounters for MemoryCounters {
    fn counter(&self, key: &AddressKey) -> Option<&AtomicU64> {
        self.0.lock().unwrap().get(key).copied()
    }

    fn create(&self, key: &AddressKey, initial: u64) -> bool {
        let mut map = self.0.lock().unwrap();
        if map.contains_key(key) {
            return false;
        }
        map.insert(*key, Box::leak(Box::new(AtomicU64::new(initial))));
        true
    }
}
