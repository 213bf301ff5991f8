//! Physical memory manager: a buddy allocator over the frames firmware
//! reports as usable.
//!
//! Grounded on the teacher's NUMA/bitmap hybrid frame allocator, trimmed
//! to a plain multi-region buddy allocator -- this crate doesn't model
//! NUMA topology, and the bitmap fast path for small counts is folded into
//! the buddy split/merge logic instead of kept as a separate allocator.

use alloc::boxed::Box;
use core::sync::atomic::{AtomicU64, Ordering};

use spin::Mutex;

use crate::error::{KernelError, Result};

/// Size of a physical frame.
pub const FRAME_SIZE: usize = 4096;

/// Highest buddy order tracked; 2^31 frames covers any region this kernel
/// will realistically see.
const MAX_ORDER: usize = 31;

/// Physical frame number (a frame-sized unit, not a byte address).
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord)]
pub struct FrameNumber(u64);

impl FrameNumber {
    pub const fn new(num: u64) -> Self {
        Self(num)
    }

    pub const fn as_u64(&self) -> u64 {
        self.0
    }

    pub fn as_addr(&self) -> super::PhysicalAddress {
        super::PhysicalAddress::new(self.0 * FRAME_SIZE as u64)
    }

    pub fn from_addr(addr: super::PhysicalAddress) -> Self {
        Self(addr.as_u64() / FRAME_SIZE as u64)
    }
}

/// One physical frame, returned from `allocate` and consumed by `free`.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct PhysicalFrame {
    number: FrameNumber,
}

impl PhysicalFrame {
    pub fn new(number: FrameNumber) -> Self {
        Self { number }
    }

    pub fn number(&self) -> FrameNumber {
        self.number
    }

    pub fn addr(&self) -> super::PhysicalAddress {
        self.number.as_addr()
    }
}

/// A contiguous, power-of-two-sized physical region reported by firmware.
#[derive(Debug, Clone, Copy)]
pub struct PhysicalRegion {
    pub start: FrameNumber,
    pub frame_count: usize,
}

/// DMA restricts allocation to below the classic 16 MiB ISA boundary.
#[derive(Debug, Clone, Copy, Default)]
pub struct AllocFlags {
    pub dma: bool,
}

#[derive(Debug, Default)]
struct BuddyBlock {
    frame: FrameNumber,
    next: Option<Box<BuddyBlock>>,
}

/// One firmware-reported region, split into per-order free lists.
struct Region {
    start: FrameNumber,
    frame_count: usize,
    free_lists: [Mutex<Option<Box<BuddyBlock>>>; MAX_ORDER + 1],
    free_frames: AtomicU64,
}

impl Region {
    fn new(start: FrameNumber, frame_count: usize) -> Self {
        let total = if frame_count.is_power_of_two() {
            frame_count
        } else {
            frame_count.next_power_of_two() / 2
        };

        let free_lists = core::array::from_fn(|_| Mutex::new(None));
        let region = Self {
            start,
            frame_count: total,
            free_lists,
            free_frames: AtomicU64::new(total as u64),
        };

        if total > 0 {
            let order = total.trailing_zeros() as usize;
            *region.free_lists[order].lock() = Some(Box::new(BuddyBlock {
                frame: start,
                next: None,
            }));
        }

        region
    }

    fn order_for(count: usize) -> usize {
        count.max(1).next_power_of_two().trailing_zeros() as usize
    }

    fn contains_dma(&self) -> bool {
        // DMA zone: below 16 MiB.
        self.start.as_u64() * FRAME_SIZE as u64 < 16 * 1024 * 1024
    }

    fn allocate(&self, page_count: usize) -> Option<FrameNumber> {
        let order = Self::order_for(page_count);
        if order > MAX_ORDER {
            return None;
        }

        for current_order in order..=MAX_ORDER {
            let mut list = self.free_lists[current_order].lock();
            let Some(mut block) = list.take() else {
                continue;
            };
            *list = block.next.take();
            drop(list);

            let mut split_order = current_order;
            while split_order > order {
                split_order -= 1;
                let buddy_frame = FrameNumber::new(block.frame.as_u64() + (1 << split_order));
                let mut buddy_list = self.free_lists[split_order].lock();
                *buddy_list = Some(Box::new(BuddyBlock {
                    frame: buddy_frame,
                    next: buddy_list.take(),
                }));
            }

            self.free_frames
                .fetch_sub(1 << order, Ordering::Release);
            return Some(block.frame);
        }
        None
    }

    fn free(&self, frame: FrameNumber, page_count: usize) {
        let order = Self::order_for(page_count);
        let mut current_frame = frame;
        let mut current_order = order;

        while current_order < MAX_ORDER {
            let offset_in_region = current_frame.as_u64() - self.start.as_u64();
            let buddy_offset = offset_in_region ^ (1 << current_order);
            let buddy_frame = FrameNumber::new(self.start.as_u64() + buddy_offset);

            let mut list = self.free_lists[current_order].lock();
            let found = remove_if_present(&mut list, buddy_frame);
            drop(list);

            if found {
                current_frame =
                    FrameNumber::new(current_frame.as_u64().min(buddy_frame.as_u64()));
                current_order += 1;
            } else {
                break;
            }
        }

        let mut list = self.free_lists[current_order].lock();
        *list = Some(Box::new(BuddyBlock {
            frame: current_frame,
            next: list.take(),
        }));
        drop(list);

        self.free_frames.fetch_add(1 << order, Ordering::Release);
    }

    /// Allocate a block whose *absolute* start frame is a multiple of
    /// `1 << align_order`, not merely aligned relative to this region's own
    /// start (which is what naively asking the plain buddy search for an
    /// order `>= align_order` block actually gives you, since a buddy
    /// block's natural alignment is relative to `self.start`, and firmware
    /// rarely hands out regions themselves aligned to every order a caller
    /// might ask for).
    ///
    /// Walks free lists from the required span's order upward, rejecting
    /// any block that doesn't contain an absolutely-aligned sub-window of
    /// the right size, and once one is found, trims the leftover prefix
    /// and suffix back into the free lists as their own maximal
    /// power-of-two, correctly aligned chunks instead of discarding them.
    fn allocate_aligned(&self, page_count: usize, align_order: usize) -> Option<FrameNumber> {
        let order_needed = Self::order_for(page_count);
        let span_order = order_needed.max(align_order).min(MAX_ORDER);
        let span = 1u64 << span_order;
        let align = 1u64 << align_order.min(MAX_ORDER);

        for current_order in span_order..=MAX_ORDER {
            let mut list = self.free_lists[current_order].lock();
            let block_size = 1u64 << current_order;

            let mut candidate = None;
            {
                let mut cursor = &*list;
                while let Some(node) = cursor {
                    let block_start = node.frame.as_u64();
                    let aligned_start = align_up(block_start, align);
                    if aligned_start + span <= block_start + block_size {
                        candidate = Some(node.frame);
                        break;
                    }
                    cursor = &node.next;
                }
            }

            let Some(block_frame) = candidate else {
                continue;
            };
            remove_if_present(&mut list, block_frame);
            drop(list);

            let block_start = block_frame.as_u64();
            let block_end = block_start + block_size;
            let aligned_start = align_up(block_start, align);

            self.push_chunks(block_start, aligned_start - block_start);
            self.push_chunks(aligned_start + span, block_end - (aligned_start + span));

            self.free_frames.fetch_sub(span, Ordering::Release);
            return Some(FrameNumber::new(aligned_start));
        }
        None
    }

    /// Decompose `len` frames starting at `start` into maximal power-of-two
    /// chunks, each aligned to its own size, and push each into its order's
    /// free list. Used to return the prefix/suffix trimmed off a block by
    /// `allocate_aligned` without losing track of them.
    fn push_chunks(&self, mut start: u64, mut len: u64) {
        while len > 0 {
            let align_order = if start == 0 {
                MAX_ORDER as u32
            } else {
                start.trailing_zeros()
            };
            let size_order = 63 - len.leading_zeros();
            let order = (align_order.min(size_order) as usize).min(MAX_ORDER);
            let size = 1u64 << order;

            let mut list = self.free_lists[order].lock();
            *list = Some(Box::new(BuddyBlock {
                frame: FrameNumber::new(start),
                next: list.take(),
            }));
            drop(list);
            self.free_frames.fetch_add(size, Ordering::Release);

            start += size;
            len -= size;
        }
    }
}

fn align_up(value: u64, align: u64) -> u64 {
    (value + align - 1) & !(align - 1)
}

/// Removes `target` from the free list if present, returning whether it was
/// found. Walks the `Box` chain with `Option::take`, which sidesteps the
/// raw-pointer traversal a manual doubly linked list would need here.
fn remove_if_present(list: &mut Option<Box<BuddyBlock>>, target: FrameNumber) -> bool {
    if let Some(head) = list {
        if head.frame == target {
            *list = head.next.take();
            return true;
        }
    }
    let mut cursor = list;
    loop {
        let Some(node) = cursor else { return false };
        if let Some(next) = &node.next {
            if next.frame == target {
                node.next = node.next.take().unwrap().next;
                return true;
            }
        } else {
            return false;
        }
        cursor = &mut node.next;
    }
}

/// Statistics snapshot for diagnostics.
#[derive(Debug, Default, Clone, Copy)]
pub struct FrameAllocatorStats {
    pub total_frames: u64,
    pub free_frames: u64,
}

/// The physical memory manager: a set of independently locked regions.
pub struct FrameAllocator {
    regions: Mutex<alloc::vec::Vec<Region>>,
}

impl FrameAllocator {
    pub const fn new() -> Self {
        Self {
            regions: Mutex::new(alloc::vec::Vec::new()),
        }
    }

    /// Register the regions firmware reported as usable. Called once during
    /// `mm::init`.
    pub fn add_regions(&self, regions: &[PhysicalRegion]) {
        let mut guard = self.regions.lock();
        for r in regions {
            guard.push(Region::new(r.start, r.frame_count));
        }
    }

    /// Allocate `page_count` contiguous frames, rounded up to the next
    /// power of two.
    pub fn allocate(&self, page_count: usize, flags: AllocFlags) -> Result<PhysicalFrame> {
        if page_count == 0 {
            return Err(KernelError::InvalidArgument {
                name: "page_count",
                value: "zero",
            });
        }

        let guard = self.regions.lock();
        for region in guard.iter() {
            if flags.dma && !region.contains_dma() {
                continue;
            }
            if let Some(frame) = region.allocate(page_count) {
                return Ok(PhysicalFrame::new(frame));
            }
        }
        Err(KernelError::TemporaryOutage {
            reason: "no physical region has a large enough free block",
        })
    }

    /// Allocate `page_count` frames whose absolute start frame number is a
    /// multiple of `1 << alignment_power`.
    pub fn allocate_aligned(
        &self,
        page_count: usize,
        alignment_power: u32,
        flags: AllocFlags,
    ) -> Result<PhysicalFrame> {
        if page_count == 0 {
            return Err(KernelError::InvalidArgument {
                name: "page_count",
                value: "zero",
            });
        }

        let guard = self.regions.lock();
        for region in guard.iter() {
            if flags.dma && !region.contains_dma() {
                continue;
            }
            if let Some(frame) = region.allocate_aligned(page_count, alignment_power as usize) {
                return Ok(PhysicalFrame::new(frame));
            }
        }
        Err(KernelError::TemporaryOutage {
            reason: "no physical region has a large enough aligned free block",
        })
    }

    /// Return `page_count` frames starting at `frame` to the allocator.
    /// The caller must pass the same `page_count` it allocated with.
    pub fn free(&self, frame: FrameNumber, page_count: usize) {
        let guard = self.regions.lock();
        for region in guard.iter() {
            let region_end = region.start.as_u64() + region.frame_count as u64;
            if frame.as_u64() >= region.start.as_u64() && frame.as_u64() < region_end {
                region.free(frame, page_count);
                return;
            }
        }
        panic!("freed frame {:?} does not belong to any known region", frame);
    }

    pub fn stats(&self) -> FrameAllocatorStats {
        let guard = self.regions.lock();
        let mut stats = FrameAllocatorStats::default();
        for region in guard.iter() {
            stats.total_frames += region.frame_count as u64;
            stats.free_frames += region.free_frames.load(Ordering::Relaxed);
        }
        stats
    }
}

impl Default for FrameAllocator {
    fn default() -> Self {
        Self::new()
    }
}

/// The global physical memory manager.
pub static PMM: Mutex<FrameAllocatorHandle> = Mutex::new(FrameAllocatorHandle::new());

/// Thin newtype so the global can be a plain `Mutex` without requiring
/// `FrameAllocator` itself to be `Sync`-wrapped twice; `FrameAllocator`
/// already serializes per-region, so this outer mutex only guards
/// `add_regions` during boot.
pub struct FrameAllocatorHandle(FrameAllocator);

impl FrameAllocatorHandle {
    const fn new() -> Self {
        Self(FrameAllocator::new())
    }

    pub fn add_regions(&self, regions: &[PhysicalRegion]) {
        self.0.add_regions(regions);
    }
}

impl core::ops::Deref for FrameAllocatorHandle {
    type Target = FrameAllocator;
    fn deref(&self) -> &FrameAllocator {
        &self.0
    }
}

#[cfg(all(test, not(target_os = "none")))]
mod tests {
    use super::*;

    fn single_region_allocator(frame_count: usize) -> FrameAllocator {
        let allocator = FrameAllocator::new();
        allocator.add_regions(&[PhysicalRegion {
            start: FrameNumber::new(0),
            frame_count,
        }]);
        allocator
    }

    #[test]
    fn allocate_free_round_trip_restores_capacity() {
        let allocator = single_region_allocator(16);
        let a = allocator
            .allocate(4, AllocFlags::default())
            .expect("allocate 4 pages");
        let b = allocator
            .allocate(8, AllocFlags::default())
            .expect("allocate 8 pages");
        assert_ne!(a.addr(), b.addr());

        allocator.free(a.number(), 4);
        allocator.free(b.number(), 8);

        let stats = allocator.stats();
        assert_eq!(stats.free_frames, stats.total_frames);
    }

    #[test]
    fn allocations_never_overlap() {
        let allocator = single_region_allocator(64);
        let mut frames = alloc::vec::Vec::new();
        for _ in 0..8 {
            frames.push(
                allocator
                    .allocate(4, AllocFlags::default())
                    .expect("allocate"),
            );
        }
        for i in 0..frames.len() {
            for j in (i + 1)..frames.len() {
                assert_ne!(frames[i].addr(), frames[j].addr());
            }
        }
    }

    #[test]
    fn out_of_memory_when_region_exhausted() {
        let allocator = single_region_allocator(4);
        allocator
            .allocate(4, AllocFlags::default())
            .expect("allocate all frames");
        assert!(allocator.allocate(1, AllocFlags::default()).is_err());
    }

    #[test]
    fn allocate_aligned_honors_absolute_alignment_against_a_misaligned_region() {
        // Region starts at frame 1, not a multiple of any order above 0:
        // a naive "natural buddy alignment" implementation would hand back
        // frame 1 here and call it 4-frame aligned, which it isn't.
        let allocator = FrameAllocator::new();
        allocator.add_regions(&[PhysicalRegion {
            start: FrameNumber::new(1),
            frame_count: 64,
        }]);

        let frame = allocator
            .allocate_aligned(2, 2, AllocFlags::default())
            .expect("aligned allocation");
        assert_eq!(frame.number().as_u64() % 4, 0);
    }

    #[test]
    fn allocate_aligned_trims_leftover_fragments_back_into_free_lists() {
        let allocator = FrameAllocator::new();
        allocator.add_regions(&[PhysicalRegion {
            start: FrameNumber::new(1),
            frame_count: 64,
        }]);

        let stats_before = allocator.stats();
        let frame = allocator
            .allocate_aligned(1, 2, AllocFlags::default())
            .expect("aligned allocation");
        assert_eq!(frame.number().as_u64() % 4, 0);

        allocator.free(frame.number(), 1 << Region::order_for(1).max(2));
        let stats_after = allocator.stats();
        assert_eq!(stats_before.free_frames, stats_after.free_frames);
    }

    #[test]
    fn allocate_aligned_rejects_misaligned_blocks_and_keeps_searching() {
        let allocator = FrameAllocator::new();
        allocator.add_regions(&[PhysicalRegion {
            start: FrameNumber::new(2),
            frame_count: 32,
        }]);

        // First frame (2) isn't 8-aligned; the allocator must reject it and
        // find/trim a block that actually is, not just hand back frame 2.
        let frame = allocator
            .allocate_aligned(1, 3, AllocFlags::default())
            .expect("aligned allocation");
        assert_eq!(frame.number().as_u64() % 8, 0);
    }
}
