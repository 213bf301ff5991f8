//! Per-process descriptor table: small integer handles (`did`) mapping to
//! the kernel objects a process can reach -- mappings, channels, server
//! channels, and monitors.
//!
//! "Retaining" an object on install and releasing it on uninstall is just
//! `Arc::clone`/`Drop`; there's no separate vtable the way a non-GC'd
//! runtime without `Arc` would need one.

use alloc::sync::Arc;
use alloc::vec::Vec;
use core::sync::atomic::{AtomicUsize, Ordering};

use spin::Mutex;

use crate::error::{KernelError, Result};

/// Upper bound on live descriptors in a single process.
pub const MAX_DESCRIPTORS: usize = 4096;

/// A descriptor table handle.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct Did(u32);

impl Did {
    pub fn as_u32(&self) -> u32 {
        self.0
    }
}

/// Marker trait for anything a descriptor table slot can hold.
pub trait DescriptorObject: Send + Sync {
    fn kind(&self) -> &'static str;
}

pub struct DescriptorTable {
    slots: Mutex<Vec<Option<Arc<dyn DescriptorObject>>>>,
    next_lowest: AtomicUsize,
}

impl Default for DescriptorTable {
    fn default() -> Self {
        Self::new()
    }
}

impl DescriptorTable {
    pub fn new() -> Self {
        Self {
            slots: Mutex::new(Vec::new()),
            next_lowest: AtomicUsize::new(0),
        }
    }

    /// Install `object`, returning the `did` it was assigned. Reuses the
    /// lowest free slot, matching the cached `next_lowest` hint.
    pub fn install(&self, object: Arc<dyn DescriptorObject>) -> Result<Did> {
        let mut slots = self.slots.lock();
        let hint = self.next_lowest.load(Ordering::Relaxed);

        let index = if hint < slots.len() {
            hint
        } else {
            if slots.len() >= MAX_DESCRIPTORS {
                return Err(KernelError::TooBig {
                    limit: MAX_DESCRIPTORS,
                    requested: slots.len() + 1,
                });
            }
            slots.push(None);
            slots.len() - 1
        };

        slots[index] = Some(object);

        let next = slots
            .iter()
            .enumerate()
            .skip(index + 1)
            .find(|(_, slot)| slot.is_none())
            .map(|(i, _)| i)
            .unwrap_or(slots.len());
        self.next_lowest.store(next, Ordering::Relaxed);

        Ok(Did(index as u32))
    }

    /// Remove and return the object at `did`.
    pub fn uninstall(&self, did: Did) -> Result<Arc<dyn DescriptorObject>> {
        let mut slots = self.slots.lock();
        let index = did.as_u32() as usize;
        let slot = slots
            .get_mut(index)
            .and_then(|s| s.take())
            .ok_or(KernelError::NoSuchResource {
                resource: "descriptor",
                id: did.as_u32() as u64,
            })?;

        let hint = self.next_lowest.load(Ordering::Relaxed);
        if index < hint {
            self.next_lowest.store(index, Ordering::Relaxed);
        }

        Ok(slot)
    }

    /// Look up the object at `did` without removing it, retaining a new
    /// reference.
    pub fn lookup(&self, did: Did) -> Result<Arc<dyn DescriptorObject>> {
        self.slots
            .lock()
            .get(did.as_u32() as usize)
            .and_then(|s| s.clone())
            .ok_or(KernelError::NoSuchResource {
                resource: "descriptor",
                id: did.as_u32() as u64,
            })
    }

    /// Remove and return every installed object, for process teardown.
    pub fn drain(&self) -> Vec<Arc<dyn DescriptorObject>> {
        let mut slots = self.slots.lock();
        let drained = slots.iter_mut().filter_map(|s| s.take()).collect();
        self.next_lowest.store(0, Ordering::Relaxed);
        drained
    }
}

#[cfg(all(test, not(target_os = "none")))]
mod tests {
    use super::*;

    struct Dummy;
    impl DescriptorObject for Dummy {
        fn kind(&self) -> &'static str {
            "dummy"
        }
    }

    #[test]
    fn install_lookup_uninstall_round_trip() {
        let table = DescriptorTable::new();
        let did = table.install(Arc::new(Dummy)).unwrap();
        assert!(table.lookup(did).is_ok());
        table.uninstall(did).unwrap();
        assert!(table.lookup(did).is_err());
    }

    #[test]
    fn reuses_lowest_freed_slot() {
        let table = DescriptorTable::new();
        let a = table.install(Arc::new(Dummy)).unwrap();
        let b = table.install(Arc::new(Dummy)).unwrap();
        table.uninstall(a).unwrap();
        let c = table.install(Arc::new(Dummy)).unwrap();
        assert_eq!(a, c);
        assert_ne!(b, c);
    }

    #[test]
    fn drain_empties_the_table() {
        let table = DescriptorTable::new();
        table.install(Arc::new(Dummy)).unwrap();
        table.install(Arc::new(Dummy)).unwrap();
        assert_eq!(table.drain().len(), 2);
        assert_eq!(table.drain().len(), 0);
    }
}
