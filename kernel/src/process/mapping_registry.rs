//! Per-process record of which virtual ranges are occupied and by which
//! [`Mapping`](crate::mm::mapping::Mapping), independent of the page
//! tables themselves -- this is the bookkeeping a fault handler or a
//! `munmap`-style call consults to find "what owns this address."

use alloc::sync::Arc;
use alloc::vec::Vec;

use spin::Mutex;

use crate::error::{KernelError, Result};
use crate::mm::mapping::Mapping;
use crate::mm::{PageFlags, VirtualAddress};

#[derive(Clone)]
pub struct MappingEntry {
    pub virt_start: VirtualAddress,
    pub page_count: usize,
    pub flags: PageFlags,
    pub backing: Option<Arc<Mapping>>,
}

impl MappingEntry {
    fn end(&self) -> u64 {
        self.virt_start.as_u64() + (self.page_count as u64) * crate::mm::pmm::FRAME_SIZE as u64
    }

    fn contains(&self, addr: VirtualAddress) -> bool {
        let a = addr.as_u64();
        a >= self.virt_start.as_u64() && a < self.end()
    }

    fn overlaps(&self, other_start: VirtualAddress, other_page_count: usize) -> bool {
        let other_end =
            other_start.as_u64() + (other_page_count as u64) * crate::mm::pmm::FRAME_SIZE as u64;
        other_start.as_u64() < self.end() && self.virt_start.as_u64() < other_end
    }
}

#[derive(Default)]
pub struct MappingRegistry {
    entries: Mutex<Vec<MappingEntry>>,
}

impl MappingRegistry {
    pub fn new() -> Self {
        Self {
            entries: Mutex::new(Vec::new()),
        }
    }

    /// Record a freshly installed range. Rejected if it overlaps an
    /// existing entry.
    pub fn register(&self, entry: MappingEntry) -> Result<()> {
        let mut entries = self.entries.lock();
        if entries
            .iter()
            .any(|e| e.overlaps(entry.virt_start, entry.page_count))
        {
            return Err(KernelError::AlreadyInProgress {
                resource: "mapping range",
            });
        }
        entries.push(entry);
        Ok(())
    }

    /// Find the entry containing `addr`, e.g. to resolve a page fault.
    pub fn find_containing(&self, addr: VirtualAddress) -> Option<MappingEntry> {
        self.entries
            .lock()
            .iter()
            .find(|e| e.contains(addr))
            .cloned()
    }

    /// Remove the entry starting exactly at `base`.
    pub fn unregister(&self, base: VirtualAddress) -> Result<MappingEntry> {
        let mut entries = self.entries.lock();
        let index = entries
            .iter()
            .position(|e| e.virt_start == base)
            .ok_or(KernelError::NoSuchResource {
                resource: "mapping range",
                id: base.as_u64(),
            })?;
        Ok(entries.remove(index))
    }

    /// Drain every entry, for process teardown.
    pub fn drain(&self) -> Vec<MappingEntry> {
        self.entries.lock().drain(..).collect()
    }
}

#[cfg(all(test, not(target_os = "none")))]
mod tests {
    use super::*;

    fn entry(base: u64, pages: usize) -> MappingEntry {
        MappingEntry {
            virt_start: VirtualAddress::new(base),
            page_count: pages,
            flags: PageFlags::PRESENT,
            backing: None,
        }
    }

    #[test]
    fn register_rejects_overlap() {
        let registry = MappingRegistry::new();
        registry.register(entry(0x1000, 4)).unwrap();
        assert!(registry.register(entry(0x2000, 2)).is_err());
        assert!(registry.register(entry(0x5000, 2)).is_ok());
    }

    #[test]
    fn find_containing_locates_the_right_entry() {
        let registry = MappingRegistry::new();
        registry.register(entry(0x1000, 4)).unwrap();
        let found = registry.find_containing(VirtualAddress::new(0x2500));
        assert!(found.is_some());
        assert!(registry
            .find_containing(VirtualAddress::new(0x9000))
            .is_none());
    }

    #[test]
    fn unregister_then_drain() {
        let registry = MappingRegistry::new();
        registry.register(entry(0x1000, 4)).unwrap();
        registry.register(entry(0x5000, 1)).unwrap();
        registry.unregister(VirtualAddress::new(0x1000)).unwrap();
        assert_eq!(registry.drain().len(), 1);
    }
}
