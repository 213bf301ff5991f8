//! RAII wrappers for kernel resources: frees/unmaps/logs on drop instead of
//! requiring every call site to remember the matching cleanup call.

use core::ops::{Deref, DerefMut};

use alloc::vec::Vec;
use spin::MutexGuard;

use crate::mm::pmm::{FrameNumber, PMM};

/// Returns a single physical frame to the PMM when dropped.
pub struct FrameGuard {
    frame: FrameNumber,
    page_count: usize,
}

impl FrameGuard {
    pub fn new(frame: FrameNumber, page_count: usize) -> Self {
        Self { frame, page_count }
    }

    pub fn frame(&self) -> FrameNumber {
        self.frame
    }

    /// Release ownership without freeing, e.g. when handing the frame to a
    /// [`crate::mm::mapping::Mapping`] that now owns its lifetime.
    pub fn leak(self) -> FrameNumber {
        let frame = self.frame;
        core::mem::forget(self);
        frame
    }
}

impl Drop for FrameGuard {
    fn drop(&mut self) {
        PMM.lock().free(self.frame, self.page_count);
    }
}

/// Returns a batch of physical frames to the PMM when dropped.
pub struct FramesGuard {
    frames: Vec<(FrameNumber, usize)>,
}

impl FramesGuard {
    pub fn new(frames: Vec<(FrameNumber, usize)>) -> Self {
        Self { frames }
    }

    pub fn leak(self) -> Vec<(FrameNumber, usize)> {
        let frames = self.frames.clone();
        core::mem::forget(self);
        frames
    }
}

impl Drop for FramesGuard {
    fn drop(&mut self) {
        for &(frame, page_count) in &self.frames {
            PMM.lock().free(frame, page_count);
        }
    }
}

/// Logs lock acquisition and release around a `spin::MutexGuard`, useful
/// while tracking down lock-ordering bugs in new subsystems.
pub struct TrackedMutexGuard<'a, T> {
    guard: MutexGuard<'a, T>,
    name: &'static str,
}

impl<'a, T> TrackedMutexGuard<'a, T> {
    pub fn new(guard: MutexGuard<'a, T>, name: &'static str) -> Self {
        log::trace!(target: "raii", "acquired lock: {}", name);
        Self { guard, name }
    }
}

impl<T> Drop for TrackedMutexGuard<'_, T> {
    fn drop(&mut self) {
        log::trace!(target: "raii", "released lock: {}", self.name);
    }
}

impl<T> Deref for TrackedMutexGuard<'_, T> {
    type Target = T;
    fn deref(&self) -> &Self::Target {
        &self.guard
    }
}

impl<T> DerefMut for TrackedMutexGuard<'_, T> {
    fn deref_mut(&mut self) -> &mut Self::Target {
        &mut self.guard
    }
}

/// Runs arbitrary cleanup code when a scope exits, including via an early
/// return or a panic unwind.
pub struct ScopeGuard<F: FnOnce()> {
    cleanup: Option<F>,
}

impl<F: FnOnce()> ScopeGuard<F> {
    pub fn new(cleanup: F) -> Self {
        Self {
            cleanup: Some(cleanup),
        }
    }

    /// Cancel the cleanup; used once the protected operation has
    /// committed and no longer needs to be rolled back.
    pub fn cancel(mut self) {
        self.cleanup = None;
    }
}

impl<F: FnOnce()> Drop for ScopeGuard<F> {
    fn drop(&mut self) {
        if let Some(cleanup) = self.cleanup.take() {
            cleanup();
        }
    }
}

#[macro_export]
macro_rules! defer {
    ($e:expr) => {
        let _guard = $crate::raii::ScopeGuard::new(|| $e);
    };
}

#[cfg(all(test, not(target_os = "none")))]
mod tests {
    use super::*;

    #[test]
    fn scope_guard_runs_on_drop() {
        let mut cleaned = false;
        {
            let _guard = ScopeGuard::new(|| cleaned = true);
        }
        assert!(cleaned);
    }

    #[test]
    fn scope_guard_cancel_skips_cleanup() {
        let mut cleaned = false;
        {
            let guard = ScopeGuard::new(|| cleaned = true);
            guard.cancel();
        }
        assert!(!cleaned);
    }

    #[test]
    fn frame_guard_frees_frame_on_drop() {
        use crate::mm::pmm::{AllocFlags, PhysicalRegion};
        PMM.lock().add_regions(&[PhysicalRegion {
            start: FrameNumber::new(4096),
            frame_count: 16,
        }]);
        let frame = PMM.lock().allocate(1, AllocFlags::default()).unwrap();
        let stats_before = PMM.lock().stats();
        {
            let _guard = FrameGuard::new(frame.number(), 1);
        }
        let stats_after = PMM.lock().stats();
        assert_eq!(stats_after.free_frames, stats_before.free_frames + 1);
    }
}
