//! A process's (or the kernel's) virtual address space: a page table
//! hierarchy plus the free-list allocator that hands out ranges within it.

use alloc::sync::Arc;
use alloc::vec::Vec;

use spin::Mutex;

use super::mapping::Mapping;
use super::page_table::{self, PageMapper, PageTableHierarchy};
use super::pmm::FrameNumber;
use super::vmm::VirtualRangeAllocator;
use super::{PageFlags, PageSize, VirtualAddress};
use crate::error::{KernelError, Result};

/// Lowest and highest addresses user address spaces hand out; well below
/// the canonical-address hole and the kernel's own half.
const USER_RANGE_BASE: u64 = 0x0000_0001_0000_0000;
const USER_RANGE_LEN: u64 = 0x0000_7FFF_0000_0000 - USER_RANGE_BASE;

struct ActiveRegion {
    base: VirtualAddress,
    len: u64,
    mapping: Arc<Mapping>,
}

/// A single address space: its page tables, its free virtual ranges, and
/// the mappings currently installed into it.
pub struct AddressSpace {
    hierarchy: PageTableHierarchy,
    ranges: VirtualRangeAllocator,
    regions: Mutex<Vec<ActiveRegion>>,
    is_kernel: bool,
}

impl AddressSpace {
    /// A fresh user address space with an empty page table hierarchy. Its
    /// kernel half is populated immediately from the current template, if
    /// one has been registered yet, and kept in sync with it afterward.
    pub fn new() -> Result<Self> {
        let hierarchy = PageTableHierarchy::new()?;
        page_table::register_kernel_mirror_target(hierarchy.root_addr(), false);
        Ok(Self {
            hierarchy,
            ranges: VirtualRangeAllocator::new(VirtualAddress::new(USER_RANGE_BASE), USER_RANGE_LEN),
            regions: Mutex::new(Vec::new()),
            is_kernel: false,
        })
    }

    /// The kernel's own address space. Unlike a user space, its range
    /// allocator starts pre-reserved for the identity-mapped physical
    /// window; callers only request the remainder for heap/slab growth.
    /// Becomes the template every other address space's kernel half is
    /// copied from.
    pub fn new_kernel(heap_base: VirtualAddress, heap_len: u64) -> Result<Self> {
        let hierarchy = PageTableHierarchy::new()?;
        page_table::register_kernel_mirror_target(hierarchy.root_addr(), true);
        Ok(Self {
            hierarchy,
            ranges: VirtualRangeAllocator::new(heap_base, heap_len),
            regions: Mutex::new(Vec::new()),
            is_kernel: true,
        })
    }

    pub fn is_kernel(&self) -> bool {
        self.is_kernel
    }

    pub fn root_addr(&self) -> super::PhysicalAddress {
        self.hierarchy.root_addr()
    }

    /// Install `mapping` somewhere in this space chosen by the allocator,
    /// returning the base address it was placed at.
    pub fn map(&self, mapping: Arc<Mapping>, flags: PageFlags) -> Result<VirtualAddress> {
        let len = mapping.size() as u64;
        let base = self.ranges.allocate(len, PageSize::Small as u64)?;
        self.map_fixed(base, mapping, flags)?;
        Ok(base)
    }

    /// Install `mapping` at a caller-chosen base address. Walks the
    /// mapping's pages one at a time and batches consecutive pages whose
    /// resolved frames happen to be physically contiguous into a single
    /// `PageMapper::map_fixed` call; a mapping backed by independently
    /// allocated or indirect pages just ends up mapped one page at a time
    /// instead of assuming the whole mapping is one contiguous run.
    pub fn map_fixed(&self, base: VirtualAddress, mapping: Arc<Mapping>, flags: PageFlags) -> Result<()> {
        let len = mapping.size() as u64;
        self.ranges.reserve(base, len)?;

        let mut mapper = PageMapper::from_hierarchy(&self.hierarchy);
        let page_count = mapping.page_count();

        let result = (|| -> Result<()> {
            let mut index = 0;
            while index < page_count {
                let run_start = mapping.bind_page(index)?;
                let mut run_len = 1usize;
                while index + run_len < page_count {
                    let next = mapping.bind_page(index + run_len)?;
                    if next.as_u64() != run_start.as_u64() + run_len as u64 {
                        break;
                    }
                    run_len += 1;
                }
                let virt = base.add(index * super::pmm::FRAME_SIZE);
                mapper.map_fixed(run_start.as_addr(), virt, run_len, flags)?;
                index += run_len;
            }
            Ok(())
        })();

        if let Err(err) = result {
            self.ranges.free(base, len);
            return Err(err);
        }

        self.regions.lock().push(ActiveRegion { base, len, mapping });
        Ok(())
    }

    /// Remove whatever mapping occupies `base`, unmapping every page it
    /// spans and returning the range to the free list.
    pub fn unmap(&self, base: VirtualAddress) -> Result<()> {
        let region = {
            let mut regions = self.regions.lock();
            let index = regions
                .iter()
                .position(|r| r.base == base)
                .ok_or(KernelError::NoSuchResource {
                    resource: "mapped region",
                    id: base.as_u64(),
                })?;
            regions.remove(index)
        };

        let mut mapper = PageMapper::from_hierarchy(&self.hierarchy);
        let page_count = region.mapping.size().div_ceil(super::pmm::FRAME_SIZE);
        for i in 0..page_count {
            let _ = mapper.unmap_page(region.base.add(i * super::pmm::FRAME_SIZE));
        }

        self.ranges.free(region.base, region.len);
        crate::arch::tlb_flush_all();
        Ok(())
    }

    pub fn translate(&self, addr: VirtualAddress) -> Option<super::PhysicalAddress> {
        let mapper = PageMapper::from_hierarchy(&self.hierarchy);
        mapper.translate(addr).map(|f| f.as_addr())
    }

    /// Tear down every region and free the page table frames backing this
    /// address space. Called when the owning process exits.
    ///
    /// Takes `&self` rather than consuming it: a process owns its
    /// `AddressSpace` directly (not behind an `Arc`), so teardown happens
    /// in place through `Process::address_space`, with the `Process`
    /// itself dropped afterward by the registry.
    pub fn destroy(&self) {
        let regions: Vec<_> = self.regions.lock().drain(..).collect();
        let mut mapper = PageMapper::from_hierarchy(&self.hierarchy);
        for region in &regions {
            let page_count = region.mapping.size().div_ceil(super::pmm::FRAME_SIZE);
            for i in 0..page_count {
                let _ = mapper.unmap_page(region.base.add(i * super::pmm::FRAME_SIZE));
            }
        }
        // `regions` drops here, releasing every `Arc<Mapping>` this space
        // held; a mapping's own `Drop` frees whatever frames it owned.
        //
        // Page table frames themselves (L4/L3/L2/L1) are intentionally
        // leaked here: walking and freeing every intermediate table needs
        // a recursive teardown this crate doesn't implement yet.

        page_table::unregister_kernel_mirror_target(self.hierarchy.root_addr());
    }
}

#[cfg(all(test, not(target_os = "none")))]
mod tests {
    use super::*;
    use crate::mm::pmm::{PhysicalRegion, PMM};

    fn with_backing_pmm<T>(f: impl FnOnce() -> T) -> T {
        PMM.lock().add_regions(&[PhysicalRegion {
            start: FrameNumber::new(256),
            frame_count: 4096,
        }]);
        f()
    }

    #[test]
    fn map_and_unmap_round_trip() {
        with_backing_pmm(|| {
            let space = AddressSpace::new().expect("new address space");
            let mapping = Mapping::new_lazy(4096, PageFlags::PRESENT | PageFlags::WRITABLE);
            let base = space.map(mapping, PageFlags::PRESENT | PageFlags::WRITABLE).unwrap();
            assert!(space.translate(base).is_some());
            space.unmap(base).unwrap();
            assert!(space.translate(base).is_none());
        });
    }
}
