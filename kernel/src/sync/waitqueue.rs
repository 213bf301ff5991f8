//! Generic wait queue used by the locks in this module and by the monitor
//! and futex subsystems.
//!
//! There is no thread scheduler in this crate: "blocking" means spinning on
//! a sequence counter with a spin-loop hint, the way a futex's fast path
//! spins before the kernel parks the caller. `wake_one`/`wake_all` bump the
//! counter and every waiter re-checks its own predicate, so a spurious
//! wakeup is always safe -- it just costs one extra predicate check.

use core::sync::atomic::{AtomicBool, AtomicU64, AtomicUsize, Ordering};

use crate::error::{KernelError, Result};

/// A queue threads can wait on until woken by `wake_one`/`wake_all`.
#[derive(Default)]
pub struct WaitQueue {
    sequence: AtomicU64,
    waiting: AtomicUsize,
}

impl WaitQueue {
    pub const fn new() -> Self {
        Self {
            sequence: AtomicU64::new(0),
            waiting: AtomicUsize::new(0),
        }
    }

    /// Block the caller until `predicate` returns `true`, re-checking after
    /// every wakeup.
    pub fn wait_while(&self, mut predicate: impl FnMut() -> bool) {
        while predicate() {
            let seen = self.sequence.load(Ordering::Acquire);
            self.waiting.fetch_add(1, Ordering::Relaxed);
            while self.sequence.load(Ordering::Acquire) == seen && predicate() {
                core::hint::spin_loop();
            }
            self.waiting.fetch_sub(1, Ordering::Relaxed);
        }
    }

    /// Like `wait_while`, but also bails out with `Signaled` once `signaled`
    /// is observed set, instead of only ever returning through the
    /// predicate becoming false. Never returns `Signaled` after the
    /// predicate has already gone false for real -- the check only runs
    /// before a spin round, never after a successful one.
    pub fn wait_while_interruptible(
        &self,
        mut predicate: impl FnMut() -> bool,
        signaled: &AtomicBool,
    ) -> Result<()> {
        while predicate() {
            if signaled.load(Ordering::Acquire) {
                return Err(KernelError::Signaled);
            }
            let seen = self.sequence.load(Ordering::Acquire);
            self.waiting.fetch_add(1, Ordering::Relaxed);
            while self.sequence.load(Ordering::Acquire) == seen && predicate() {
                if signaled.load(Ordering::Acquire) {
                    self.waiting.fetch_sub(1, Ordering::Relaxed);
                    return Err(KernelError::Signaled);
                }
                core::hint::spin_loop();
            }
            self.waiting.fetch_sub(1, Ordering::Relaxed);
        }
        Ok(())
    }

    /// Like `wait_while_interruptible`, but also bails out with
    /// `PermanentOutage` once `should_abort` returns `true`, checked on the
    /// same cadence as `signaled` -- every spin round, not just once per
    /// wakeup, so there's no separate wake needed for the abort condition
    /// to be noticed promptly.
    pub fn wait_while_interruptible_or_abort(
        &self,
        mut predicate: impl FnMut() -> bool,
        signaled: &AtomicBool,
        mut should_abort: impl FnMut() -> bool,
    ) -> Result<()> {
        while predicate() {
            if signaled.load(Ordering::Acquire) {
                return Err(KernelError::Signaled);
            }
            if should_abort() {
                return Err(KernelError::PermanentOutage {
                    reason: "wait aborted",
                });
            }
            let seen = self.sequence.load(Ordering::Acquire);
            self.waiting.fetch_add(1, Ordering::Relaxed);
            while self.sequence.load(Ordering::Acquire) == seen && predicate() {
                if signaled.load(Ordering::Acquire) {
                    self.waiting.fetch_sub(1, Ordering::Relaxed);
                    return Err(KernelError::Signaled);
                }
                if should_abort() {
                    self.waiting.fetch_sub(1, Ordering::Relaxed);
                    return Err(KernelError::PermanentOutage {
                        reason: "wait aborted",
                    });
                }
                core::hint::spin_loop();
            }
            self.waiting.fetch_sub(1, Ordering::Relaxed);
        }
        Ok(())
    }

    /// Wake one waiter (best-effort; every waiter re-checks its predicate,
    /// so more than one may spuriously wake).
    pub fn wake_one(&self) {
        if self.waiting.load(Ordering::Relaxed) > 0 {
            self.sequence.fetch_add(1, Ordering::Release);
        }
    }

    /// Wake every waiter.
    pub fn wake_all(&self) {
        self.sequence.fetch_add(1, Ordering::Release);
    }

    /// Wake up to `n` waiters. This queue's single sequence counter wakes
    /// every current waiter on any bump -- there is no per-waiter handle to
    /// unpark just one -- so this is one bump when there is anyone to wake,
    /// and the return value is an upper bound on how many actually were
    /// waiting, not an exact count of who re-acquired.
    pub fn wake_many(&self, n: usize) -> usize {
        let waiting = self.waiting.load(Ordering::Relaxed);
        if n == 0 || waiting == 0 {
            return 0;
        }
        self.sequence.fetch_add(1, Ordering::Release);
        waiting.min(n)
    }

    pub fn waiting_count(&self) -> usize {
        self.waiting.load(Ordering::Relaxed)
    }
}

#[cfg(all(test, not(target_os = "none")))]
mod tests {
    use super::*;

    #[test]
    fn wait_while_returns_immediately_when_predicate_is_false() {
        let queue = WaitQueue::new();
        queue.wait_while(|| false);
        assert_eq!(queue.waiting_count(), 0);
    }

    #[test]
    fn wake_one_is_a_no_op_with_no_waiters() {
        let queue = WaitQueue::new();
        queue.wake_one();
        assert_eq!(queue.waiting_count(), 0);
    }

    #[test]
    fn wake_many_is_a_no_op_with_no_waiters() {
        let queue = WaitQueue::new();
        assert_eq!(queue.wake_many(5), 0);
    }

    #[test]
    fn wait_while_interruptible_returns_ok_when_predicate_is_already_false() {
        let queue = WaitQueue::new();
        let signaled = AtomicBool::new(false);
        assert!(queue.wait_while_interruptible(|| false, &signaled).is_ok());
    }

    #[test]
    fn wait_while_interruptible_bails_out_when_already_signaled() {
        let queue = WaitQueue::new();
        let signaled = AtomicBool::new(true);
        let result = queue.wait_while_interruptible(|| true, &signaled);
        assert_eq!(result, Err(KernelError::Signaled));
        assert_eq!(queue.waiting_count(), 0);
    }

    #[test]
    fn wait_while_interruptible_or_abort_bails_out_on_abort_condition() {
        let queue = WaitQueue::new();
        let signaled = AtomicBool::new(false);
        let result = queue.wait_while_interruptible_or_abort(|| true, &signaled, || true);
        assert_eq!(result, Err(KernelError::PermanentOutage { reason: "wait aborted" }));
        assert_eq!(queue.waiting_count(), 0);
    }
}
