//! Four-level page tables (PML4/PDPT/PD/PT on x86_64; the equivalent
//! ARMv8-A stage-1 levels on aarch64) and the mapper that walks them.

#![allow(dead_code)]

use alloc::vec::Vec;
use core::ops::{Index, IndexMut};

use spin::Mutex;

use super::pmm::{AllocFlags, FrameNumber, FRAME_SIZE, PMM};
use super::{PageFlags, PhysicalAddress, VirtualAddress};
use crate::error::{KernelError, Result};

/// Number of entries in a page table.
pub const PAGE_TABLE_ENTRIES: usize = 512;

/// PML4 slot a table recursively maps into itself, the classic trick for
/// reaching an arbitrary live table's contents by address instead of by a
/// separate identity window.
pub const RECURSIVE_SLOT: usize = 510;

/// PML4 slot carrying the formal identity window: 512 1 GiB huge pages
/// covering the first 512 GiB of physical memory, installed by
/// [`init_identity_window`].
pub const IDENTITY_SLOT: usize = 509;

/// First PML4 index considered part of the kernel half of every address
/// space; every entry at or above this index is kept identical across
/// every registered address space by the mirroring registry below, except
/// [`RECURSIVE_SLOT`] which must always point at its own table.
pub const KERNEL_HALF_START: usize = 256;

/// Software-only sentinel bit marking an entry that should be bound to a
/// concrete frame the first time it faults, rather than eagerly now. Only
/// meaningful while `PRESENT` is clear, since hardware ignores bits 9-11 of
/// a not-present entry -- this crate has no interrupt controller or fault
/// handler to act on it, so it is a data-structure primitive only, read
/// back by whatever fault-handling code is eventually wired up elsewhere.
const BIND_ON_DEMAND_BIT: u64 = 1 << 9;

/// Base virtual address of the identity window code outside this module
/// already assumes exists at boot (every physical frame reachable at its
/// own address). [`init_identity_window`] formalizes that same window
/// under [`IDENTITY_SLOT`] rather than changing it.
const IDENTITY_WINDOW_BASE: u64 = 0;

/// One page-table slot: a physical frame number plus flag bits, packed the
/// way hardware expects.
#[derive(Debug, Clone, Copy)]
#[repr(transparent)]
pub struct PageTableEntry {
    entry: u64,
}

impl PageTableEntry {
    pub const fn empty() -> Self {
        Self { entry: 0 }
    }

    pub const fn is_unused(&self) -> bool {
        self.entry == 0
    }

    pub const fn is_present(&self) -> bool {
        self.entry & PageFlags::PRESENT.bits() != 0
    }

    pub fn frame(&self) -> Option<FrameNumber> {
        self.is_present()
            .then(|| FrameNumber::new((self.entry & 0x000F_FFFF_FFFF_F000) >> 12))
    }

    pub fn addr(&self) -> Option<PhysicalAddress> {
        self.frame().map(|f| PhysicalAddress::new(f.as_u64() << 12))
    }

    pub const fn flags(&self) -> PageFlags {
        // Keep everything except the frame-address field (bits 12-51): the
        // low flag bits and the NX bit (63) both live outside it.
        PageFlags::from_bits(self.entry & !0x000F_FFFF_FFFF_F000)
    }

    pub fn set(&mut self, frame: FrameNumber, flags: PageFlags) {
        self.entry = (frame.as_u64() << 12) | flags.bits();
    }

    pub fn set_addr(&mut self, addr: PhysicalAddress, flags: PageFlags) {
        self.set(FrameNumber::new(addr.as_u64() >> 12), flags);
    }

    pub fn clear(&mut self) {
        self.entry = 0;
    }

    /// Mark a not-present entry as bind-on-demand. Only valid on an entry
    /// that isn't already present.
    pub fn set_bind_on_demand(&mut self) {
        debug_assert!(!self.is_present());
        self.entry |= BIND_ON_DEMAND_BIT;
    }

    pub fn is_bind_on_demand(&self) -> bool {
        !self.is_present() && self.entry & BIND_ON_DEMAND_BIT != 0
    }

    pub fn clear_bind_on_demand(&mut self) {
        self.entry &= !BIND_ON_DEMAND_BIT;
    }
}

/// A single level of the translation hierarchy: 512 entries, page-aligned.
#[repr(C, align(4096))]
pub struct PageTable {
    entries: [PageTableEntry; PAGE_TABLE_ENTRIES],
}

impl PageTable {
    pub const fn new() -> Self {
        Self {
            entries: [PageTableEntry::empty(); PAGE_TABLE_ENTRIES],
        }
    }

    pub fn zero(&mut self) {
        for entry in &mut self.entries {
            entry.clear();
        }
    }

    pub fn iter(&self) -> impl Iterator<Item = &PageTableEntry> {
        self.entries.iter()
    }

    pub fn iter_mut(&mut self) -> impl Iterator<Item = &mut PageTableEntry> {
        self.entries.iter_mut()
    }
}

impl Default for PageTable {
    fn default() -> Self {
        Self::new()
    }
}

impl Index<usize> for PageTable {
    type Output = PageTableEntry;
    fn index(&self, index: usize) -> &Self::Output {
        &self.entries[index]
    }
}

impl IndexMut<usize> for PageTable {
    fn index_mut(&mut self, index: usize) -> &mut Self::Output {
        &mut self.entries[index]
    }
}

/// Cast a physical table address to the pointer that reaches it through
/// the kernel's identity window. The one place every other unsafe table
/// walk in this module funnels through, so the window's base only needs
/// naming once.
fn phys_to_virt(addr: PhysicalAddress) -> *mut PageTable {
    (IDENTITY_WINDOW_BASE + addr.as_u64()) as *mut PageTable
}

/// The top-level table of a translation hierarchy, allocated fresh for
/// every address space.
pub struct PageTableHierarchy {
    pub root: PhysicalAddress,
}

impl PageTableHierarchy {
    /// Allocate and zero a fresh root table, with its recursive self-map
    /// slot installed.
    pub fn new() -> Result<Self> {
        let frame = PMM.lock().allocate(1, AllocFlags::default())?;
        let root = frame.addr();

        // SAFETY: `frame` was just allocated from the PMM and is reachable
        // through the identity window, so this pointer is valid and
        // exclusively owned by us until the frame is freed.
        unsafe {
            let table = &mut *phys_to_virt(root);
            table.zero();
            table[RECURSIVE_SLOT].set(frame.number(), PageFlags::PRESENT | PageFlags::WRITABLE);
        }

        Ok(Self { root })
    }

    pub const fn root_addr(&self) -> PhysicalAddress {
        self.root
    }
}

/// Build the formal identity window: 512 1 GiB huge identity mappings
/// under `PML4[IDENTITY_SLOT]`, covering the first 512 GiB of physical
/// memory. Idempotent only in the sense that calling it twice leaks the
/// first PDPT frame; callers should call it once per hierarchy.
pub fn init_identity_window(hierarchy: &PageTableHierarchy) -> Result<()> {
    let pdpt_frame = PMM.lock().allocate(1, AllocFlags::default())?;

    // SAFETY: `pdpt_frame` was just allocated and is reachable through the
    // window this function is in the middle of formalizing; `hierarchy`'s
    // root is likewise reachable per `PageTableHierarchy::new`'s contract.
    unsafe {
        let pdpt = &mut *phys_to_virt(pdpt_frame.addr());
        pdpt.zero();
        for gib in 0..PAGE_TABLE_ENTRIES {
            pdpt[gib].set(
                FrameNumber::new((gib as u64) << 18),
                PageFlags::PRESENT | PageFlags::WRITABLE | PageFlags::HUGE | PageFlags::GLOBAL,
            );
        }

        let root = &mut *phys_to_virt(hierarchy.root_addr());
        root[IDENTITY_SLOT].set(pdpt_frame.number(), PageFlags::PRESENT | PageFlags::WRITABLE);
    }

    Ok(())
}

/// The current template for every address space's kernel half, set by
/// whichever call to [`register_kernel_mirror_target`] passes
/// `is_kernel = true`.
static KERNEL_TEMPLATE: Mutex<Option<PhysicalAddress>> = Mutex::new(None);

/// Every non-kernel root currently registered to receive kernel-half
/// updates.
static MIRROR_TARGETS: Mutex<Vec<PhysicalAddress>> = Mutex::new(Vec::new());

/// Register `root` with the kernel-half mirroring registry. A kernel
/// space (`is_kernel = true`) becomes the new template and immediately
/// pushes its current kernel half out to every already-registered user
/// space; a user space (`is_kernel = false`) is added to the mirror list
/// and immediately receives the current template's kernel half, if one
/// has been set yet.
///
/// Called from [`super::address_space::AddressSpace::new`] and
/// `new_kernel` so that every address space, created in any order, ends
/// up with the same view of kernel-space mappings.
pub fn register_kernel_mirror_target(root: PhysicalAddress, is_kernel: bool) {
    if is_kernel {
        *KERNEL_TEMPLATE.lock() = Some(root);
        for &target in MIRROR_TARGETS.lock().iter() {
            copy_kernel_half(root, target);
        }
    } else {
        MIRROR_TARGETS.lock().push(root);
        if let Some(template) = *KERNEL_TEMPLATE.lock() {
            copy_kernel_half(template, root);
        }
    }
}

/// Remove `root` from the mirror list. Called from
/// [`super::address_space::AddressSpace::destroy`]; a no-op if `root` was
/// the kernel template itself (the template is never unregistered, only
/// replaced by a later `register_kernel_mirror_target(.., true)` call).
pub fn unregister_kernel_mirror_target(root: PhysicalAddress) {
    MIRROR_TARGETS.lock().retain(|&r| r != root);
}

/// Copy every kernel-half PML4 entry from `source` into `dest`, except
/// [`RECURSIVE_SLOT`] which must keep pointing at `dest` itself.
fn copy_kernel_half(source: PhysicalAddress, dest: PhysicalAddress) {
    // SAFETY: both addresses are registered page-table roots, reachable
    // through the identity window for as long as their owning address
    // space is alive.
    unsafe {
        let src = &*phys_to_virt(source);
        let dst = &mut *phys_to_virt(dest);
        for index in KERNEL_HALF_START..PAGE_TABLE_ENTRIES {
            if index == RECURSIVE_SLOT {
                continue;
            }
            dst[index] = src[index];
        }
    }
}

/// Propagate a single changed kernel-half PML4 entry to every registered
/// mirror target. Intended for future callers that grow the kernel's own
/// mappings (heap growth, new MMIO windows) after address spaces already
/// exist; nothing in this crate calls it yet.
pub fn mirror_kernel_half_entry(index: usize, entry: PageTableEntry) {
    if index < KERNEL_HALF_START || index == RECURSIVE_SLOT {
        return;
    }
    for &target in MIRROR_TARGETS.lock().iter() {
        // SAFETY: `target` is a registered page-table root.
        unsafe {
            (&mut *phys_to_virt(target))[index] = entry;
        }
    }
}

/// Breaks a virtual address into the four 9-bit indices used to walk the
/// hierarchy, plus the byte offset within the final page.
#[derive(Debug, Clone, Copy)]
pub struct VirtualAddressBreakdown {
    pub l4_index: usize,
    pub l3_index: usize,
    pub l2_index: usize,
    pub l1_index: usize,
    pub page_offset: u16,
}

impl VirtualAddressBreakdown {
    pub fn new(addr: VirtualAddress) -> Self {
        let indices = addr.table_indices();
        Self {
            l4_index: indices[0],
            l3_index: indices[1],
            l2_index: indices[2],
            l1_index: indices[3],
            page_offset: (addr.as_u64() & 0xFFF) as u16,
        }
    }
}

/// The hierarchy currently loaded into the hardware's root-table register.
pub struct ActivePageTable {
    root: PhysicalAddress,
}

impl ActivePageTable {
    #[cfg(target_arch = "x86_64")]
    pub fn current() -> Self {
        Self {
            root: crate::arch::x86_64::mmu::read_cr3(),
        }
    }

    #[cfg(target_arch = "aarch64")]
    pub fn current() -> Self {
        Self {
            root: crate::arch::aarch64::mmu::read_ttbr0(),
        }
    }

    pub fn make_active(&self) {
        #[cfg(target_arch = "x86_64")]
        crate::arch::x86_64::mmu::write_cr3(self.root);

        #[cfg(target_arch = "aarch64")]
        crate::arch::aarch64::mmu::write_ttbr0(self.root);
    }

    pub const fn root_addr(&self) -> PhysicalAddress {
        self.root
    }
}

/// Pages per leaf at each huge-page-eligible level, in 4 KiB page units.
const PAGES_PER_2MIB: usize = 1 << 9;
const PAGES_PER_1GIB: usize = 1 << 18;

/// Which table level a `write_leaf` call should stop descending at.
#[derive(Clone, Copy)]
enum Level {
    Gib1,
    Mib2,
    Small,
}

/// Walks and edits a translation hierarchy. Operates on the identity-mapped
/// view of physical memory, so every intermediate table is reached by
/// casting its physical address straight to a pointer.
pub struct PageMapper {
    root: *mut PageTable,
}

impl PageMapper {
    /// # Safety
    ///
    /// `root` must point to a valid, exclusively-owned root table for the
    /// lifetime of this mapper.
    pub unsafe fn new(root: *mut PageTable) -> Self {
        Self { root }
    }

    pub fn from_hierarchy(hierarchy: &PageTableHierarchy) -> Self {
        // SAFETY: `hierarchy.root` was allocated and zeroed by
        // `PageTableHierarchy::new` and is reachable through the identity
        // window.
        unsafe { Self::new(phys_to_virt(hierarchy.root_addr())) }
    }

    fn next_level(entry: &mut PageTableEntry) -> Result<*mut PageTable> {
        if !entry.is_present() {
            let frame = PMM.lock().allocate(1, AllocFlags::default())?;
            entry.set(frame.number(), PageFlags::PRESENT | PageFlags::WRITABLE);
            // SAFETY: the frame was just allocated and is reachable
            // through the identity window.
            unsafe {
                (&mut *phys_to_virt(frame.addr())).zero();
            }
        }
        Ok(phys_to_virt(entry.addr().unwrap()))
    }

    /// Write a single leaf entry at `level`, descending only as far as that
    /// level requires and overwriting whatever was already there. Does not
    /// free any child table a previously-present non-huge entry pointed
    /// at -- the same leak `AddressSpace::destroy` already documents for
    /// whole-hierarchy teardown, here scoped to a single overwritten entry.
    fn write_leaf(&mut self, level: Level, virt: VirtualAddress, frame: FrameNumber, flags: PageFlags) -> Result<()> {
        let b = VirtualAddressBreakdown::new(virt);
        let flags = flags | PageFlags::PRESENT;

        // SAFETY: `self.root` is valid for the mapper's lifetime per the
        // constructor's contract; each subsequent table pointer comes from
        // `next_level`, which only returns addresses of tables it just
        // allocated and zeroed or that a present entry already pointed at.
        unsafe {
            let l4 = &mut *self.root;
            let l3 = &mut *Self::next_level(&mut l4[b.l4_index])?;
            match level {
                Level::Gib1 => {
                    l3[b.l3_index].set(frame, flags | PageFlags::HUGE);
                }
                Level::Mib2 => {
                    let l2 = &mut *Self::next_level(&mut l3[b.l3_index])?;
                    l2[b.l2_index].set(frame, flags | PageFlags::HUGE);
                }
                Level::Small => {
                    let l2 = &mut *Self::next_level(&mut l3[b.l3_index])?;
                    let l1 = &mut *Self::next_level(&mut l2[b.l2_index])?;
                    l1[b.l1_index].set(frame, flags);
                }
            }
        }
        Ok(())
    }

    /// Map a single 4 KiB page. Returns `AlreadyInProgress` if the page is
    /// already mapped; callers that want overwrite semantics and/or
    /// huge-page upgrade should use [`Self::map_fixed`] instead.
    pub fn map_page(
        &mut self,
        page: VirtualAddress,
        frame: FrameNumber,
        flags: PageFlags,
    ) -> Result<()> {
        let b = VirtualAddressBreakdown::new(page);

        // SAFETY: see `write_leaf`.
        unsafe {
            let l4 = &mut *self.root;
            let l3 = &mut *Self::next_level(&mut l4[b.l4_index])?;
            let l2 = &mut *Self::next_level(&mut l3[b.l3_index])?;
            let l1 = &mut *Self::next_level(&mut l2[b.l2_index])?;

            let entry = &mut l1[b.l1_index];
            if entry.is_present() {
                return Err(KernelError::AlreadyInProgress {
                    resource: "page mapping",
                });
            }
            entry.set(frame, flags | PageFlags::PRESENT);
        }

        Ok(())
    }

    /// Map `page_count` contiguous pages starting at physical `phys` into
    /// virtual `virt`, overwriting whatever was already mapped there
    /// (unlike [`Self::map_page`]), upgrading to 2 MiB or 1 GiB leaves
    /// wherever the remaining run and both addresses are aligned enough to
    /// allow it, and invalidating the TLB for every address actually
    /// touched.
    pub fn map_fixed(
        &mut self,
        phys: PhysicalAddress,
        virt: VirtualAddress,
        page_count: usize,
        flags: PageFlags,
    ) -> Result<()> {
        let mut remaining = page_count;
        let mut cur_phys = phys.as_u64();
        let mut cur_virt = virt.as_u64();

        let gib1_bytes = PAGES_PER_1GIB as u64 * FRAME_SIZE as u64;
        let mib2_bytes = PAGES_PER_2MIB as u64 * FRAME_SIZE as u64;

        while remaining > 0 {
            let (level, step_pages) = if remaining >= PAGES_PER_1GIB
                && cur_phys % gib1_bytes == 0
                && cur_virt % gib1_bytes == 0
            {
                (Level::Gib1, PAGES_PER_1GIB)
            } else if remaining >= PAGES_PER_2MIB
                && cur_phys % mib2_bytes == 0
                && cur_virt % mib2_bytes == 0
            {
                (Level::Mib2, PAGES_PER_2MIB)
            } else {
                (Level::Small, 1)
            };

            let frame = FrameNumber::from_addr(PhysicalAddress::new(cur_phys));
            self.write_leaf(level, VirtualAddress::new(cur_virt), frame, flags)?;

            crate::arch::barriers::data_sync_barrier();
            crate::arch::tlb_flush_address(cur_virt);

            let step_bytes = step_pages as u64 * FRAME_SIZE as u64;
            cur_phys += step_bytes;
            cur_virt += step_bytes;
            remaining -= step_pages;
        }

        Ok(())
    }

    /// Mark a not-yet-present page as bind-on-demand: a later fault (or
    /// explicit [`Self::resolve_bind_on_demand`] call) is expected to bind
    /// it to a concrete frame. Fails if the page is already mapped.
    pub fn mark_bind_on_demand(&mut self, page: VirtualAddress) -> Result<()> {
        let b = VirtualAddressBreakdown::new(page);

        // SAFETY: see `write_leaf`.
        unsafe {
            let l4 = &mut *self.root;
            let l3 = &mut *Self::next_level(&mut l4[b.l4_index])?;
            let l2 = &mut *Self::next_level(&mut l3[b.l3_index])?;
            let l1 = &mut *Self::next_level(&mut l2[b.l2_index])?;

            let entry = &mut l1[b.l1_index];
            if entry.is_present() {
                return Err(KernelError::AlreadyInProgress {
                    resource: "page mapping",
                });
            }
            entry.set_bind_on_demand();
        }
        Ok(())
    }

    /// Resolve a page previously marked bind-on-demand to a concrete
    /// frame. Fails if the page isn't currently marked that way.
    pub fn resolve_bind_on_demand(
        &mut self,
        page: VirtualAddress,
        frame: FrameNumber,
        flags: PageFlags,
    ) -> Result<()> {
        let b = VirtualAddressBreakdown::new(page);

        // SAFETY: see `write_leaf`.
        unsafe {
            let l4 = &mut *self.root;
            let l3 = &mut *Self::next_level(&mut l4[b.l4_index])?;
            let l2 = &mut *Self::next_level(&mut l3[b.l3_index])?;
            let l1 = &mut *Self::next_level(&mut l2[b.l2_index])?;

            let entry = &mut l1[b.l1_index];
            if !entry.is_bind_on_demand() {
                return Err(KernelError::InvalidArgument {
                    name: "page",
                    value: "not marked bind-on-demand",
                });
            }
            entry.set(frame, flags | PageFlags::PRESENT);
        }
        Ok(())
    }

    /// Unmap a single 4 KiB page, returning the frame it held. Also
    /// recognizes a 2 MiB or 1 GiB huge leaf installed by `map_fixed` and
    /// clears that instead of misreading it as an intermediate table.
    pub fn unmap_page(&mut self, page: VirtualAddress) -> Result<FrameNumber> {
        let b = VirtualAddressBreakdown::new(page);

        // SAFETY: same reasoning as `map_page`; every intermediate entry
        // is checked for presence (and for being a huge leaf) before being
        // dereferenced as a child table.
        unsafe {
            let l4 = &mut *self.root;
            let l4_entry = &l4[b.l4_index];
            if !l4_entry.is_present() {
                return Err(KernelError::NoSuchResource {
                    resource: "page mapping (l4)",
                    id: page.as_u64(),
                });
            }
            let l3 = &mut *phys_to_virt(l4_entry.addr().unwrap());
            let l3_entry = &mut l3[b.l3_index];
            if !l3_entry.is_present() {
                return Err(KernelError::NoSuchResource {
                    resource: "page mapping (l3)",
                    id: page.as_u64(),
                });
            }
            if l3_entry.flags().contains(PageFlags::HUGE) {
                let frame = l3_entry.frame().unwrap();
                l3_entry.clear();
                return Ok(frame);
            }
            let l2 = &mut *phys_to_virt(l3_entry.addr().unwrap());
            let l2_entry = &mut l2[b.l2_index];
            if !l2_entry.is_present() {
                return Err(KernelError::NoSuchResource {
                    resource: "page mapping (l2)",
                    id: page.as_u64(),
                });
            }
            if l2_entry.flags().contains(PageFlags::HUGE) {
                let frame = l2_entry.frame().unwrap();
                l2_entry.clear();
                return Ok(frame);
            }
            let l1 = &mut *phys_to_virt(l2_entry.addr().unwrap());

            let entry = &mut l1[b.l1_index];
            let frame = entry.frame().ok_or(KernelError::NoSuchResource {
                resource: "page mapping (l1)",
                id: page.as_u64(),
            })?;
            entry.clear();
            Ok(frame)
        }
    }

    /// Walk the hierarchy without modifying it, returning the mapped frame
    /// if present. Recognizes huge leaves at the PD/PDPT level.
    pub fn translate(&self, page: VirtualAddress) -> Option<FrameNumber> {
        let b = VirtualAddressBreakdown::new(page);

        // SAFETY: read-only walk; every level is checked present before
        // the next pointer is formed.
        unsafe {
            let l4 = &*self.root;
            let l4_entry = &l4[b.l4_index];
            if !l4_entry.is_present() {
                return None;
            }
            let l3 = &*phys_to_virt(l4_entry.addr()?);
            let l3_entry = &l3[b.l3_index];
            if !l3_entry.is_present() {
                return None;
            }
            if l3_entry.flags().contains(PageFlags::HUGE) {
                // A 1 GiB leaf stores only the region's base frame; the
                // PD/PT indices the CPU would otherwise use to walk
                // further become the low bits of the offset within it.
                let offset = (b.l2_index << 9) | b.l1_index;
                return l3_entry.frame().map(|f| FrameNumber::new(f.as_u64() + offset as u64));
            }
            let l2 = &*phys_to_virt(l3_entry.addr()?);
            let l2_entry = &l2[b.l2_index];
            if !l2_entry.is_present() {
                return None;
            }
            if l2_entry.flags().contains(PageFlags::HUGE) {
                return l2_entry.frame().map(|f| FrameNumber::new(f.as_u64() + b.l1_index as u64));
            }
            let l1 = &*phys_to_virt(l2_entry.addr()?);
            l1[b.l1_index].frame()
        }
    }
}

#[cfg(all(test, not(target_os = "none")))]
mod tests {
    use super::*;

    #[test]
    fn entry_round_trips_frame_and_flags() {
        let mut entry = PageTableEntry::empty();
        assert!(entry.is_unused());
        entry.set(FrameNumber::new(42), PageFlags::PRESENT | PageFlags::WRITABLE);
        assert!(entry.is_present());
        assert_eq!(entry.frame().unwrap().as_u64(), 42);
        assert!(entry.flags().contains(PageFlags::WRITABLE));
        entry.clear();
        assert!(entry.is_unused());
    }

    #[test]
    fn bind_on_demand_round_trips_and_clears_on_set() {
        let mut entry = PageTableEntry::empty();
        entry.set_bind_on_demand();
        assert!(entry.is_bind_on_demand());
        assert!(!entry.is_present());
        entry.set(FrameNumber::new(1), PageFlags::PRESENT);
        assert!(!entry.is_bind_on_demand());
    }

    #[test]
    fn breakdown_extracts_four_nine_bit_indices() {
        let addr = VirtualAddress::new(0x0000_1234_5678_9000);
        let b = VirtualAddressBreakdown::new(addr);
        assert_eq!(
            [b.l4_index, b.l3_index, b.l2_index, b.l1_index],
            addr.table_indices()
        );
    }

    fn with_backing_pmm<T>(f: impl FnOnce() -> T) -> T {
        use super::super::pmm::PhysicalRegion;
        PMM.lock().add_regions(&[PhysicalRegion {
            start: FrameNumber::new(1 << 18),
            frame_count: 1 << 20,
        }]);
        f()
    }

    #[test]
    fn map_fixed_overwrites_an_existing_small_mapping() {
        with_backing_pmm(|| {
            let hierarchy = PageTableHierarchy::new().expect("hierarchy");
            let mut mapper = PageMapper::from_hierarchy(&hierarchy);
            let virt = VirtualAddress::new(0x0000_2000_0000);

            mapper
                .map_page(virt, FrameNumber::new(1 << 18), PageFlags::PRESENT | PageFlags::WRITABLE)
                .unwrap();
            assert_eq!(mapper.translate(virt).unwrap().as_u64(), 1 << 18);

            mapper
                .map_fixed(
                    FrameNumber::new((1 << 18) + 7).as_addr(),
                    virt,
                    1,
                    PageFlags::PRESENT | PageFlags::WRITABLE,
                )
                .unwrap();
            assert_eq!(mapper.translate(virt).unwrap().as_u64(), (1 << 18) + 7);
        });
    }

    #[test]
    fn map_fixed_upgrades_to_a_2mib_huge_leaf_when_aligned() {
        with_backing_pmm(|| {
            let hierarchy = PageTableHierarchy::new().expect("hierarchy");
            let mut mapper = PageMapper::from_hierarchy(&hierarchy);

            let base_frame = FrameNumber::new(1 << 18);
            let virt = VirtualAddress::new(0x0000_4000_0000);
            mapper
                .map_fixed(base_frame.as_addr(), virt, PAGES_PER_2MIB, PageFlags::PRESENT | PageFlags::WRITABLE)
                .unwrap();

            assert_eq!(mapper.translate(virt).unwrap(), base_frame);
            let last_page = virt.add((PAGES_PER_2MIB - 1) * FRAME_SIZE);
            assert_eq!(
                mapper.translate(last_page).unwrap().as_u64(),
                base_frame.as_u64() + (PAGES_PER_2MIB - 1) as u64
            );
        });
    }

    #[test]
    fn recursive_slot_maps_the_root_to_itself() {
        with_backing_pmm(|| {
            let hierarchy = PageTableHierarchy::new().expect("hierarchy");
            // SAFETY: test-only direct read of the table we just built.
            let table = unsafe { &*phys_to_virt(hierarchy.root_addr()) };
            assert!(table[RECURSIVE_SLOT].is_present());
            assert_eq!(
                table[RECURSIVE_SLOT].addr().unwrap(),
                hierarchy.root_addr()
            );
        });
    }

    #[test]
    fn kernel_half_mirrors_into_registered_targets() {
        with_backing_pmm(|| {
            let kernel = PageTableHierarchy::new().expect("kernel hierarchy");
            let user = PageTableHierarchy::new().expect("user hierarchy");

            register_kernel_mirror_target(user.root_addr(), false);
            register_kernel_mirror_target(kernel.root_addr(), true);

            // SAFETY: test-only direct writes/reads of tables we own.
            unsafe {
                let k = &mut *phys_to_virt(kernel.root_addr());
                k[KERNEL_HALF_START].set(FrameNumber::new(123), PageFlags::PRESENT | PageFlags::WRITABLE);
            }
            mirror_kernel_half_entry(KERNEL_HALF_START, {
                let k = unsafe { &*phys_to_virt(kernel.root_addr()) };
                k[KERNEL_HALF_START]
            });

            let u = unsafe { &*phys_to_virt(user.root_addr()) };
            assert_eq!(u[KERNEL_HALF_START].addr().unwrap().as_u64(), 123 << 12);

            unregister_kernel_mirror_target(user.root_addr());
        });
    }

    #[test]
    fn init_identity_window_installs_512_1gib_identity_mappings() {
        with_backing_pmm(|| {
            let hierarchy = PageTableHierarchy::new().expect("hierarchy");
            init_identity_window(&hierarchy).expect("identity window");

            let mapper = PageMapper::from_hierarchy(&hierarchy);
            let probe = VirtualAddress::new(((IDENTITY_SLOT as u64) << 39) | (5u64 << 30));
            assert_eq!(mapper.translate(probe).unwrap().as_u64(), 5u64 << 18);
        });
    }
}
