//! Shareable mapping objects: the thing a descriptor-table entry or a
//! channel message actually points at when it transfers memory, as opposed
//! to the raw physical frame.
//!
//! A [`Mapping`] is reference-counted (`Arc`) so the same backing can be
//! installed into several address spaces at once; `retain`/`release` below
//! are just named wrappers around `Arc::clone`/`drop` so call sites read
//! the way the syscall surface describes the operation. Unlike a single
//! whole-mapping backing, each logical page has its own slot, so a mapping
//! can be partially bound -- a file-backed mapping populated page-by-page
//! as it's touched, for instance -- without forcing every page to share
//! the same physical frame or the same owner.

use alloc::sync::Arc;
use alloc::vec::Vec;

use spin::Mutex;

use super::pmm::{AllocFlags, FrameNumber, PMM};
use super::PageFlags;
use crate::error::{KernelError, Result};
use crate::process::descriptor::DescriptorObject;

/// One logical page's backing.
enum Slot {
    /// No physical memory behind this page yet.
    Unbound,
    /// Bound to a concrete frame. `owned` tracks whether this mapping is
    /// responsible for freeing it back to the PMM when the mapping drops
    /// (set for pages this mapping itself allocated; clear for frames
    /// handed in by a caller who keeps their own ownership of them).
    Direct { frame: FrameNumber, owned: bool },
    /// Shares another mapping's page; resolving this one resolves the
    /// target at the given page offset.
    Indirect { target: Arc<Mapping>, offset: usize },
}

/// A shareable, refcounted region of memory, independent of any one
/// address space's page tables.
pub struct Mapping {
    slots: Mutex<Vec<Slot>>,
    page_count: usize,
    size: usize,
    flags: PageFlags,
}

impl DescriptorObject for Mapping {
    fn kind(&self) -> &'static str {
        "mapping"
    }
}

impl Mapping {
    /// A mapping already bound to `page_count` contiguous physical frames
    /// starting at `frame`, not owned by this mapping (a caller-supplied
    /// backing, e.g. an MMIO region, is never freed by `Drop`).
    pub fn new_direct(frame: FrameNumber, size: usize, flags: PageFlags) -> Arc<Self> {
        let page_count = size.div_ceil(super::pmm::FRAME_SIZE).max(1);
        let slots = (0..page_count)
            .map(|i| Slot::Direct {
                frame: FrameNumber::new(frame.as_u64() + i as u64),
                owned: false,
            })
            .collect();
        Arc::new(Self {
            slots: Mutex::new(slots),
            page_count,
            size,
            flags,
        })
    }

    /// A mapping that forwards every page to the same offset in another
    /// mapping's backing. Used when two descriptors should always resolve
    /// to the same frames even if the original is later rebound.
    pub fn new_indirect(target: Arc<Mapping>) -> Arc<Self> {
        let size = target.size;
        let flags = target.flags;
        let page_count = target.page_count;
        let slots = (0..page_count)
            .map(|offset| Slot::Indirect {
                target: Arc::clone(&target),
                offset,
            })
            .collect();
        Arc::new(Self {
            slots: Mutex::new(slots),
            page_count,
            size,
            flags,
        })
    }

    /// A mapping with no physical backing yet; pages are allocated on
    /// first `bind`/`bind_range`, owned by this mapping.
    pub fn new_lazy(size: usize, flags: PageFlags) -> Arc<Self> {
        let page_count = size.div_ceil(super::pmm::FRAME_SIZE).max(1);
        let slots = (0..page_count).map(|_| Slot::Unbound).collect();
        Arc::new(Self {
            slots: Mutex::new(slots),
            page_count,
            size,
            flags,
        })
    }

    pub fn size(&self) -> usize {
        self.size
    }

    pub fn page_count(&self) -> usize {
        self.page_count
    }

    pub fn flags(&self) -> PageFlags {
        self.flags
    }

    fn check_range(&self, offset: usize, count: usize) -> Result<()> {
        if count == 0 || offset + count > self.page_count {
            return Err(KernelError::InvalidArgument {
                name: "offset/count",
                value: "out of range for this mapping",
            });
        }
        Ok(())
    }

    /// Resolve a single slot to a concrete frame, allocating one if it is
    /// still unbound. Recurses through `Indirect` slots to their target.
    fn resolve_slot(slots: &mut [Slot], index: usize) -> Result<FrameNumber> {
        match &slots[index] {
            Slot::Direct { frame, .. } => Ok(*frame),
            Slot::Indirect { target, offset } => target.bind_page(*offset),
            Slot::Unbound => {
                let allocated = PMM.lock().allocate(1, AllocFlags::default())?;
                slots[index] = Slot::Direct {
                    frame: allocated.number(),
                    owned: true,
                };
                Ok(allocated.number())
            }
        }
    }

    /// Resolve a single page to a concrete frame, allocating one if it is
    /// still unbound. Lets a caller walk a partially- or non-contiguously
    /// bound mapping page by page instead of assuming `bind`'s contiguous
    /// layout.
    pub(crate) fn bind_page(&self, index: usize) -> Result<FrameNumber> {
        let mut slots = self.slots.lock();
        Self::resolve_slot(&mut slots, index)
    }

    /// Resolve this mapping's first page to a concrete physical frame,
    /// allocating one if the backing is still lazy. Kept for callers that
    /// only care about a single-frame mapping; multi-page mappings should
    /// use `bind_range`/`bind_page` per page instead.
    pub fn bind(&self) -> Result<FrameNumber> {
        let mut slots = self.slots.lock();
        let first = Self::resolve_slot(&mut slots, 0)?;
        for i in 1..self.page_count {
            Self::resolve_slot(&mut slots, i)?;
        }
        Ok(first)
    }

    /// Bind `count` pages starting at `offset` to `count` contiguous frames
    /// starting at `phys` (or, if `phys` is `None`, freshly allocated
    /// frames owned by this mapping), returning the first frame.
    pub fn bind_range(&self, offset: usize, count: usize, phys: Option<FrameNumber>) -> Result<FrameNumber> {
        self.check_range(offset, count)?;
        let mut slots = self.slots.lock();

        let first_frame = match phys {
            Some(frame) => frame,
            None => PMM.lock().allocate(count, AllocFlags::default())?.number(),
        };

        for i in 0..count {
            let frame = FrameNumber::new(first_frame.as_u64() + i as u64);
            slots[offset + i] = Slot::Direct {
                frame,
                owned: phys.is_none(),
            };
        }
        Ok(first_frame)
    }

    /// Bind `count` pages starting at `offset` to the same range of another
    /// mapping, starting at `other_offset` in its own pages.
    pub fn bind_indirect_range(
        &self,
        offset: usize,
        count: usize,
        other: &Arc<Mapping>,
        other_offset: usize,
    ) -> Result<()> {
        self.check_range(offset, count)?;
        other.check_range(other_offset, count)?;
        let mut slots = self.slots.lock();
        for i in 0..count {
            slots[offset + i] = Slot::Indirect {
                target: Arc::clone(other),
                offset: other_offset + i,
            };
        }
        Ok(())
    }

    /// Rebind a direct mapping's first page to point at a different frame.
    /// Fails if any slot is indirect, whose binding is owned by its target.
    pub fn rebind(&self, frame: FrameNumber) -> Result<()> {
        let mut slots = self.slots.lock();
        if slots.iter().any(|s| matches!(s, Slot::Indirect { .. })) {
            return Err(KernelError::Forbidden {
                operation: "rebind indirect mapping",
            });
        }
        slots[0] = Slot::Direct { frame, owned: false };
        Ok(())
    }

    pub fn is_bound(&self) -> bool {
        self.slots.lock().iter().all(|s| !matches!(s, Slot::Unbound))
    }
}

impl Drop for Mapping {
    fn drop(&mut self) {
        for slot in self.slots.get_mut() {
            if let Slot::Direct { frame, owned: true } = slot {
                PMM.lock().free(*frame, 1);
            }
        }
    }
}

/// Take out another reference to `mapping`. Named to match the
/// retain/release vocabulary the descriptor table uses for every shared
/// kernel object.
pub fn retain(mapping: &Arc<Mapping>) -> Arc<Mapping> {
    Arc::clone(mapping)
}

/// Drop one reference. Owned `Direct` frames are released back to the PMM
/// by `Mapping`'s own `Drop` impl once the last `Arc` goes away; this
/// function exists purely for call-site symmetry with `retain`.
pub fn release(mapping: Arc<Mapping>) {
    drop(mapping);
}

#[cfg(all(test, not(target_os = "none")))]
mod tests {
    use super::*;
    use crate::mm::pmm::{PhysicalRegion, PMM};

    fn with_backing_pmm<T>(f: impl FnOnce() -> T) -> T {
        PMM.lock().add_regions(&[PhysicalRegion {
            start: FrameNumber::new(4096),
            frame_count: 256,
        }]);
        f()
    }

    #[test]
    fn direct_mapping_binds_to_its_frame() {
        let mapping = Mapping::new_direct(FrameNumber::new(7), 4096, PageFlags::PRESENT);
        assert_eq!(mapping.bind().unwrap().as_u64(), 7);
    }

    #[test]
    fn indirect_mapping_resolves_through_target() {
        let target = Mapping::new_direct(FrameNumber::new(3), 4096, PageFlags::PRESENT);
        let alias = Mapping::new_indirect(Arc::clone(&target));
        assert_eq!(alias.bind().unwrap(), target.bind().unwrap());
    }

    #[test]
    fn indirect_mapping_rejects_rebind() {
        let target = Mapping::new_direct(FrameNumber::new(3), 4096, PageFlags::PRESENT);
        let alias = Mapping::new_indirect(target);
        assert!(alias.rebind(FrameNumber::new(9)).is_err());
    }

    #[test]
    fn retain_and_release_track_the_same_allocation() {
        let mapping = Mapping::new_direct(FrameNumber::new(1), 4096, PageFlags::PRESENT);
        let extra = retain(&mapping);
        assert_eq!(Arc::strong_count(&mapping), 2);
        release(extra);
        assert_eq!(Arc::strong_count(&mapping), 1);
    }

    #[test]
    fn dropping_a_lazy_mapping_frees_its_owned_frames() {
        with_backing_pmm(|| {
            let stats_before = PMM.lock().stats();
            {
                let mapping = Mapping::new_lazy(3 * crate::mm::pmm::FRAME_SIZE, PageFlags::PRESENT);
                mapping.bind().unwrap();
                assert!(mapping.is_bound());
            }
            let stats_after = PMM.lock().stats();
            assert_eq!(stats_before.free_frames, stats_after.free_frames);
        });
    }

    #[test]
    fn dropping_a_borrowed_direct_mapping_does_not_free_its_frame() {
        with_backing_pmm(|| {
            let frame = PMM.lock().allocate(1, AllocFlags::default()).unwrap().number();
            let stats_before = PMM.lock().stats();
            {
                let mapping = Mapping::new_direct(frame, 4096, PageFlags::PRESENT);
                mapping.bind().unwrap();
            }
            let stats_after = PMM.lock().stats();
            assert_eq!(stats_before.free_frames, stats_after.free_frames);
            PMM.lock().free(frame, 1);
        });
    }

    #[test]
    fn bind_range_allows_partial_binding() {
        with_backing_pmm(|| {
            let mapping = Mapping::new_lazy(4 * crate::mm::pmm::FRAME_SIZE, PageFlags::PRESENT);
            assert!(!mapping.is_bound());
            mapping.bind_range(1, 2, None).unwrap();
            assert!(!mapping.is_bound());
            mapping.bind_range(0, 1, None).unwrap();
            mapping.bind_range(3, 1, None).unwrap();
            assert!(mapping.is_bound());
        });
    }
}
