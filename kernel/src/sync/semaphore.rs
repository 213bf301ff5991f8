//! Counting semaphore over a bounded range, used to gate access to a pool
//! of interchangeable resources (e.g. channel ring slots).

use core::sync::atomic::{AtomicBool, AtomicU32, Ordering};

use super::waitqueue::WaitQueue;
use crate::error::{KernelError, Result};

pub struct Semaphore {
    count: AtomicU32,
    max: u32,
    waiters: WaitQueue,
}

impl Semaphore {
    pub const fn new(initial: u32, max: u32) -> Self {
        Self {
            count: AtomicU32::new(initial),
            max,
            waiters: WaitQueue::new(),
        }
    }

    /// P operation: block until a permit is available.
    pub fn acquire(&self) {
        self.waiters.wait_while(|| !self.try_acquire());
    }

    /// P operation that can be cut short: returns `Err(KernelError::Signaled)`
    /// if `signaled` is set before a permit becomes available, instead of
    /// blocking forever.
    pub fn acquire_interruptible(&self, signaled: &AtomicBool) -> Result<()> {
        self.waiters.wait_while_interruptible(|| !self.try_acquire(), signaled)
    }

    /// Like `acquire_interruptible`, but also gives up with
    /// `KernelError::PermanentOutage` once `should_abort` returns `true` --
    /// used where the other side of a channel going away should cancel a
    /// blocked acquire even without anybody marking it signaled.
    pub fn acquire_until(&self, signaled: &AtomicBool, should_abort: impl FnMut() -> bool) -> Result<()> {
        self.waiters
            .wait_while_interruptible_or_abort(|| !self.try_acquire(), signaled, should_abort)
    }

    pub fn try_acquire(&self) -> bool {
        let mut count = self.count.load(Ordering::Relaxed);
        loop {
            if count == 0 {
                return false;
            }
            match self.count.compare_exchange_weak(
                count,
                count - 1,
                Ordering::Acquire,
                Ordering::Relaxed,
            ) {
                Ok(_) => return true,
                Err(observed) => count = observed,
            }
        }
    }

    /// V operation. Fails if releasing would exceed the configured maximum,
    /// which indicates a caller bug (more releases than acquires).
    pub fn release(&self) -> Result<()> {
        let mut count = self.count.load(Ordering::Relaxed);
        loop {
            if count >= self.max {
                return Err(KernelError::InvalidArgument {
                    name: "semaphore",
                    value: "release would exceed max count",
                });
            }
            match self.count.compare_exchange_weak(
                count,
                count + 1,
                Ordering::Release,
                Ordering::Relaxed,
            ) {
                Ok(_) => {
                    self.waiters.wake_one();
                    return Ok(());
                }
                Err(observed) => count = observed,
            }
        }
    }

    pub fn count(&self) -> u32 {
        self.count.load(Ordering::Relaxed)
    }
}

#[cfg(all(test, not(target_os = "none")))]
mod tests {
    use super::*;

    #[test]
    fn acquire_and_release_round_trip() {
        let sem = Semaphore::new(2, 2);
        assert!(sem.try_acquire());
        assert!(sem.try_acquire());
        assert!(!sem.try_acquire());
        sem.release().unwrap();
        assert_eq!(sem.count(), 1);
    }

    #[test]
    fn release_past_max_is_rejected() {
        let sem = Semaphore::new(1, 1);
        assert!(sem.release().is_err());
    }

    #[test]
    fn acquire_interruptible_succeeds_immediately_when_a_permit_is_free() {
        let sem = Semaphore::new(1, 1);
        let signaled = AtomicBool::new(false);
        assert!(sem.acquire_interruptible(&signaled).is_ok());
        assert_eq!(sem.count(), 0);
    }

    #[test]
    fn acquire_interruptible_fails_when_already_signaled_and_no_permit() {
        let sem = Semaphore::new(0, 1);
        let signaled = AtomicBool::new(true);
        assert_eq!(sem.acquire_interruptible(&signaled), Err(KernelError::Signaled));
    }
}
