//! Recursive mutex: the same owner may re-lock without deadlocking itself,
//! tracked by a caller-supplied owner token rather than a real thread id
//! (this crate has no scheduler to ask).

use core::sync::atomic::{AtomicU64, AtomicUsize, Ordering};

use super::waitqueue::WaitQueue;
use crate::error::{KernelError, Result};

const UNLOCKED: u64 = 0;

pub struct RecursiveMutex {
    owner: AtomicU64,
    depth: AtomicUsize,
    waiters: WaitQueue,
}

impl Default for RecursiveMutex {
    fn default() -> Self {
        Self::new()
    }
}

impl RecursiveMutex {
    pub const fn new() -> Self {
        Self {
            owner: AtomicU64::new(UNLOCKED),
            depth: AtomicUsize::new(0),
            waiters: WaitQueue::new(),
        }
    }

    /// Acquire the mutex on behalf of `owner` (a non-zero caller-chosen
    /// token, typically a thread id), blocking until it is free or already
    /// held by the same owner.
    pub fn lock(&self, owner: u64) {
        debug_assert_ne!(owner, UNLOCKED);
        self.waiters.wait_while(|| !self.try_lock(owner));
    }

    /// Non-blocking acquire.
    pub fn try_lock(&self, owner: u64) -> bool {
        debug_assert_ne!(owner, UNLOCKED);
        if self.owner.load(Ordering::Relaxed) == owner {
            self.depth.fetch_add(1, Ordering::Relaxed);
            return true;
        }
        if self
            .owner
            .compare_exchange(UNLOCKED, owner, Ordering::Acquire, Ordering::Relaxed)
            .is_ok()
        {
            self.depth.store(1, Ordering::Relaxed);
            true
        } else {
            false
        }
    }

    /// Release one level of recursion. The mutex is only actually freed,
    /// and a waiter woken, once the last recursive lock unwinds.
    pub fn unlock(&self, owner: u64) -> Result<()> {
        if self.owner.load(Ordering::Relaxed) != owner {
            return Err(KernelError::Forbidden {
                operation: "mutex unlock by non-owner",
            });
        }

        let remaining = self.depth.fetch_sub(1, Ordering::Relaxed) - 1;
        if remaining == 0 {
            self.owner.store(UNLOCKED, Ordering::Release);
            self.waiters.wake_one();
        }
        Ok(())
    }

    pub fn is_locked(&self) -> bool {
        self.owner.load(Ordering::Relaxed) != UNLOCKED
    }

    pub fn owner(&self) -> Option<u64> {
        match self.owner.load(Ordering::Relaxed) {
            UNLOCKED => None,
            owner => Some(owner),
        }
    }
}

#[cfg(all(test, not(target_os = "none")))]
mod tests {
    use super::*;

    #[test]
    fn same_owner_can_relock() {
        let mutex = RecursiveMutex::new();
        mutex.lock(1);
        mutex.lock(1);
        assert!(mutex.is_locked());
        mutex.unlock(1).unwrap();
        assert!(mutex.is_locked());
        mutex.unlock(1).unwrap();
        assert!(!mutex.is_locked());
    }

    #[test]
    fn other_owner_is_rejected_by_try_lock() {
        let mutex = RecursiveMutex::new();
        mutex.lock(1);
        assert!(!mutex.try_lock(2));
        mutex.unlock(1).unwrap();
        assert!(mutex.try_lock(2));
    }

    #[test]
    fn unlock_by_non_owner_is_forbidden() {
        let mutex = RecursiveMutex::new();
        mutex.lock(1);
        assert!(mutex.unlock(2).is_err());
    }
}
