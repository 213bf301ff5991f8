//! Physical/virtual memory management: the buddy allocator, page tables,
//! per-address-space virtual allocator, shareable mappings, and the slab
//! allocator built on top of them.

#![allow(dead_code)]

pub mod address_space;
pub mod heap;
pub mod mapping;
pub mod page_table;
pub mod pmm;
pub mod slab;
pub mod vmm;

pub use address_space::AddressSpace;
pub use mapping::Mapping;
pub use pmm::{FrameAllocatorStats, PhysicalFrame, FRAME_SIZE, PMM};

/// Physical memory address.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct PhysicalAddress(pub u64);

impl PhysicalAddress {
    pub const fn new(addr: u64) -> Self {
        Self(addr)
    }

    pub fn as_u64(&self) -> u64 {
        self.0
    }

    pub fn is_aligned(&self, align: u64) -> bool {
        self.0 % align == 0
    }
}

impl core::ops::Add<u64> for PhysicalAddress {
    type Output = Self;
    fn add(self, rhs: u64) -> Self {
        Self(self.0 + rhs)
    }
}

/// Virtual memory address.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct VirtualAddress(pub u64);

impl VirtualAddress {
    pub const fn new(addr: u64) -> Self {
        Self(addr)
    }

    pub fn as_u64(&self) -> u64 {
        self.0
    }

    pub fn add(&self, offset: usize) -> Self {
        Self(self.0 + offset as u64)
    }

    pub fn is_aligned(&self, align: u64) -> bool {
        self.0 % align == 0
    }

    /// Four 9-bit page-table indices, from PML4/L0 down to the leaf level.
    pub fn table_indices(&self) -> [usize; 4] {
        [
            ((self.0 >> 39) & 0x1ff) as usize,
            ((self.0 >> 30) & 0x1ff) as usize,
            ((self.0 >> 21) & 0x1ff) as usize,
            ((self.0 >> 12) & 0x1ff) as usize,
        ]
    }
}

impl core::ops::Add<u64> for VirtualAddress {
    type Output = Self;
    fn add(self, rhs: u64) -> Self {
        Self(self.0 + rhs)
    }
}

/// Page size options recognized by the paging code.
#[repr(usize)]
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PageSize {
    /// 4 KiB pages.
    Small = 4096,
    /// 2 MiB pages.
    Large = 2 * 1024 * 1024,
    /// 1 GiB pages.
    Huge = 1024 * 1024 * 1024,
}

/// Page permission/attribute flags, architecture-neutral; translated to the
/// hardware encoding by `page_table`.
#[derive(Debug, Clone, Copy, Default)]
pub struct PageFlags(u64);

impl PageFlags {
    pub const PRESENT: Self = Self(1 << 0);
    pub const WRITABLE: Self = Self(1 << 1);
    pub const USER: Self = Self(1 << 2);
    pub const NO_CACHE: Self = Self(1 << 4);
    pub const HUGE: Self = Self(1 << 7);
    pub const GLOBAL: Self = Self(1 << 8);
    pub const NO_EXECUTE: Self = Self(1 << 63);

    pub const fn empty() -> Self {
        Self(0)
    }

    pub const fn from_bits(bits: u64) -> Self {
        Self(bits)
    }

    pub fn contains(&self, other: Self) -> bool {
        self.0 & other.0 == other.0
    }

    pub const fn bits(&self) -> u64 {
        self.0
    }
}

impl core::ops::BitOr for PageFlags {
    type Output = Self;
    fn bitor(self, rhs: Self) -> Self::Output {
        Self(self.0 | rhs.0)
    }
}

/// Bring up the physical frame allocator, the kernel address space, and the
/// kernel heap, in that order -- each depends on the previous step.
pub fn init(regions: &[pmm::PhysicalRegion]) {
    pmm::PMM.lock().add_regions(regions);
    log::info!(target: "mm", "physical memory manager initialized");

    heap::init().expect("kernel heap initialization failed");
    log::info!(target: "mm", "kernel heap initialized");
}
