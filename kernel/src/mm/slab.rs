//! Fixed-size object slab allocator, for kernel structures (descriptor
//! table entries, mapping nodes, message headers) that are allocated and
//! freed far more often than the general heap's `malloc`-style churn
//! warrants.
//!
//! Each cache carves whole PMM pages into equal-size objects and threads an
//! intrusive free list through the unused ones, identity-mapped the same
//! way the page table code reaches physical memory directly.

use alloc::vec::Vec;
use core::ptr::NonNull;

use spin::Mutex;

use super::pmm::{AllocFlags, FRAME_SIZE, PMM};
use crate::error::{KernelError, Result};

struct FreeObject {
    next: Option<NonNull<FreeObject>>,
}

struct SlabPage {
    base: NonNull<u8>,
    free_list: Option<NonNull<FreeObject>>,
    free_count: usize,
    total_objects: usize,
}

// SAFETY: every `SlabPage` is only ever touched through the owning
// `SlabCache`'s mutex.
unsafe impl Send for SlabPage {}

/// An allocator for objects of one fixed size.
pub struct SlabCache {
    object_size: usize,
    pages: Mutex<Vec<SlabPage>>,
}

impl SlabCache {
    /// `object_size` is rounded up to 8-byte alignment; objects smaller
    /// than a pointer still get a full pointer's worth of space so the
    /// intrusive free list fits.
    pub const fn new(object_size: usize) -> Self {
        Self {
            object_size,
            pages: Mutex::new(Vec::new()),
        }
    }

    fn object_size(&self) -> usize {
        self.object_size.max(core::mem::size_of::<FreeObject>())
    }

    fn grow(&self, pages: &mut Vec<SlabPage>) -> Result<()> {
        let frame = PMM.lock().allocate(1, AllocFlags::default())?;
        let base = frame.addr().as_u64() as *mut u8;
        let base = NonNull::new(base).ok_or(KernelError::Unknown)?;

        let object_size = self.object_size();
        let total_objects = FRAME_SIZE / object_size;
        let mut free_list = None;

        for i in (0..total_objects).rev() {
            // SAFETY: `base` points at a freshly allocated, exclusively
            // owned page; each `i * object_size` offset stays within it
            // because `total_objects = FRAME_SIZE / object_size`.
            unsafe {
                let obj = base.as_ptr().add(i * object_size) as *mut FreeObject;
                obj.write(FreeObject { next: free_list });
                free_list = Some(NonNull::new_unchecked(obj));
            }
        }

        pages.push(SlabPage {
            base,
            free_list,
            free_count: total_objects,
            total_objects,
        });
        Ok(())
    }

    /// Allocate one object, growing the cache by a page if every existing
    /// page is full.
    pub fn alloc(&self) -> Result<NonNull<u8>> {
        let mut pages = self.pages.lock();

        if !pages.iter().any(|p| p.free_count > 0) {
            self.grow(&mut pages)?;
        }

        let page = pages.iter_mut().find(|p| p.free_count > 0).unwrap();
        // SAFETY: `free_count > 0` guarantees `free_list` is `Some`.
        let obj = unsafe { page.free_list.unwrap_unchecked() };
        // SAFETY: `obj` was pushed onto this page's free list by `grow` or
        // a prior `dealloc`, so it is a live, correctly aligned object slot.
        page.free_list = unsafe { obj.as_ref().next };
        page.free_count -= 1;

        Ok(obj.cast())
    }

    /// Return an object to its page's free list.
    ///
    /// # Safety
    ///
    /// `ptr` must have come from a prior `alloc` on this same cache and
    /// must not be freed twice.
    pub unsafe fn dealloc(&self, ptr: NonNull<u8>) {
        let mut pages = self.pages.lock();
        let object_size = self.object_size();

        for page in pages.iter_mut() {
            let page_start = page.base.as_ptr() as usize;
            let page_end = page_start + page.total_objects * object_size;
            let addr = ptr.as_ptr() as usize;
            if addr >= page_start && addr < page_end {
                let obj: NonNull<FreeObject> = ptr.cast();
                // SAFETY: `addr` falls within this page's object range and
                // the caller guarantees `ptr` is a live allocation from
                // this cache.
                unsafe {
                    obj.as_ptr().write(FreeObject {
                        next: page.free_list,
                    });
                }
                page.free_list = Some(obj);
                page.free_count += 1;
                return;
            }
        }
    }

    pub fn stats(&self) -> (usize, usize) {
        let pages = self.pages.lock();
        let total: usize = pages.iter().map(|p| p.total_objects).sum();
        let free: usize = pages.iter().map(|p| p.free_count).sum();
        (total, free)
    }
}

#[cfg(all(test, not(target_os = "none")))]
mod tests {
    use super::*;
    use crate::mm::pmm::PhysicalRegion;
    use crate::mm::pmm::FrameNumber as PmmFrameNumber;

    fn seeded_cache(object_size: usize) -> SlabCache {
        PMM.lock().add_regions(&[PhysicalRegion {
            start: PmmFrameNumber::new(1024),
            frame_count: 64,
        }]);
        SlabCache::new(object_size)
    }

    #[test]
    fn alloc_dealloc_round_trip() {
        let cache = seeded_cache(64);
        let a = cache.alloc().unwrap();
        let (total, free) = cache.stats();
        assert_eq!(free, total - 1);
        // SAFETY: `a` was just allocated from `cache` and not freed yet.
        unsafe { cache.dealloc(a) };
        let (_, free_after) = cache.stats();
        assert_eq!(free_after, total);
    }

    #[test]
    fn grows_across_pages_when_full() {
        let cache = seeded_cache(2048);
        let (total_one_page, _) = {
            let a = cache.alloc().unwrap();
            let stats = cache.stats();
            unsafe { cache.dealloc(a) };
            stats
        };
        let mut allocated = alloc::vec::Vec::new();
        for _ in 0..(total_one_page + 1) {
            allocated.push(cache.alloc().unwrap());
        }
        let (total, _) = cache.stats();
        assert!(total > total_one_page);
        for ptr in allocated {
            // SAFETY: every pointer came from `cache.alloc()` above.
            unsafe { cache.dealloc(ptr) };
        }
    }
}
