//! Per-process "keyed table": an open-ended map from an opaque, globally
//! unique key to caller data plus an optional destructor, used for
//! kernel-side bookkeeping that doesn't fit the descriptor table's
//! object-kind model (e.g. tagging a channel attachment with extra state).
//!
//! Keys are handed out from one kernel-wide monotonic counter so they can't
//! collide across processes even though each process only ever sees its own
//! table.

use alloc::boxed::Box;
use alloc::collections::BTreeMap;
use core::sync::atomic::{AtomicU64, Ordering};

use spin::Mutex;

use crate::error::{KernelError, Result};

static NEXT_KEY: AtomicU64 = AtomicU64::new(1);

/// A keyed-table entry handle.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct Key(u64);

impl Key {
    pub fn as_u64(&self) -> u64 {
        self.0
    }
}

fn next_key() -> Key {
    Key(NEXT_KEY.fetch_add(1, Ordering::Relaxed))
}

type Destructor = Box<dyn FnOnce(Box<dyn core::any::Any + Send>) + Send>;

struct Entry {
    value: Box<dyn core::any::Any + Send>,
    destructor: Option<Destructor>,
}

#[derive(Default)]
pub struct KeyedTable {
    entries: Mutex<BTreeMap<u64, Entry>>,
}

impl KeyedTable {
    pub fn new() -> Self {
        Self {
            entries: Mutex::new(BTreeMap::new()),
        }
    }

    /// Insert `value` under a fresh key, running `destructor` (if any) when
    /// the entry is later cleared or the table is torn down.
    pub fn insert(
        &self,
        value: Box<dyn core::any::Any + Send>,
        destructor: Option<Destructor>,
    ) -> Key {
        let key = next_key();
        self.entries.lock().insert(
            key.as_u64(),
            Entry {
                value,
                destructor,
            },
        );
        key
    }

    /// Remove a single entry, running its destructor if one was set.
    pub fn clear(&self, key: Key) -> Result<()> {
        let entry = self
            .entries
            .lock()
            .remove(&key.as_u64())
            .ok_or(KernelError::NoSuchResource {
                resource: "keyed table entry",
                id: key.as_u64(),
            })?;
        if let Some(destructor) = entry.destructor {
            destructor(entry.value);
        }
        Ok(())
    }

    pub fn contains(&self, key: Key) -> bool {
        self.entries.lock().contains_key(&key.as_u64())
    }

    /// Remove every entry, running each destructor in key order. Called on
    /// process death.
    pub fn clear_all(&self) {
        let entries: alloc::vec::Vec<_> = {
            let mut table = self.entries.lock();
            let keys: alloc::vec::Vec<u64> = table.keys().copied().collect();
            keys.into_iter().filter_map(|k| table.remove(&k)).collect()
        };
        for entry in entries {
            if let Some(destructor) = entry.destructor {
                destructor(entry.value);
            }
        }
    }

    pub fn len(&self) -> usize {
        self.entries.lock().len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

#[cfg(all(test, not(target_os = "none")))]
mod tests {
    use super::*;
    use core::sync::atomic::AtomicBool;
    use alloc::sync::Arc;

    #[test]
    fn insert_and_clear_runs_destructor() {
        let table = KeyedTable::new();
        let ran = Arc::new(AtomicBool::new(false));
        let ran_clone = ran.clone();
        let key = table.insert(
            Box::new(42u32),
            Some(Box::new(move |_| ran_clone.store(true, Ordering::Relaxed))),
        );
        assert!(table.contains(key));
        table.clear(key).unwrap();
        assert!(ran.load(Ordering::Relaxed));
        assert!(!table.contains(key));
    }

    #[test]
    fn clear_all_runs_every_destructor() {
        let table = KeyedTable::new();
        let count = Arc::new(core::sync::atomic::AtomicUsize::new(0));
        for _ in 0..5 {
            let count_clone = count.clone();
            table.insert(
                Box::new(()),
                Some(Box::new(move |_| {
                    count_clone.fetch_add(1, Ordering::Relaxed);
                })),
            );
        }
        table.clear_all();
        assert_eq!(count.load(Ordering::Relaxed), 5);
        assert!(table.is_empty());
    }

    #[test]
    fn keys_are_never_reused() {
        let a = next_key();
        let b = next_key();
        assert_ne!(a, b);
    }
}
